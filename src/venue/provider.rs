// 场地搜索服务
// 以中心点和半径查询附近场所

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::VenueConfig;
use crate::error::AppError;
use crate::location::Coordinates;

/// 营业状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BusinessStatus {
    Operational,
    ClosedTemporarily,
    ClosedPermanently,
    #[serde(other)]
    Unknown,
}

/// 搜索服务返回的候选场所
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueCandidate {
    pub place_id: String,
    pub name: Option<String>,
    pub formatted_address: Option<String>,
    pub coordinates: Option<Coordinates>,
    /// 第一个为主分类
    pub categories: Vec<String>,
    pub rating: Option<f64>,
    pub business_status: Option<BusinessStatus>,
}

#[async_trait]
pub trait VenueProvider: Send + Sync {
    async fn search(&self, center: Coordinates, radius_m: f64)
    -> Result<Vec<VenueCandidate>, AppError>;
}

#[derive(Debug, Deserialize)]
struct PlacesResponse {
    status: String,
    #[serde(default)]
    results: Vec<PlaceResult>,
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaceResult {
    place_id: String,
    name: Option<String>,
    vicinity: Option<String>,
    formatted_address: Option<String>,
    geometry: Option<PlaceGeometry>,
    #[serde(default)]
    types: Vec<String>,
    rating: Option<f64>,
    business_status: Option<BusinessStatus>,
}

#[derive(Debug, Deserialize)]
struct PlaceGeometry {
    location: PlaceLocation,
}

#[derive(Debug, Deserialize)]
struct PlaceLocation {
    lat: f64,
    lng: f64,
}

impl From<PlaceResult> for VenueCandidate {
    fn from(place: PlaceResult) -> Self {
        let coordinates = place
            .geometry
            .and_then(|g| Coordinates::new(g.location.lat, g.location.lng).ok());

        VenueCandidate {
            place_id: place.place_id,
            name: place.name,
            formatted_address: place.formatted_address.or(place.vicinity),
            coordinates,
            categories: place.types,
            rating: place.rating,
            business_status: place.business_status,
        }
    }
}

/// Places nearby-search 接口客户端
pub struct PlacesClient {
    http_client: Client,
    api_url: String,
    api_key: String,
}

impl PlacesClient {
    pub fn new(config: &VenueConfig) -> Result<Self, AppError> {
        let http_client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| AppError::Provider(format!("failed to build http client: {}", e)))?;

        Ok(Self {
            http_client,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl VenueProvider for PlacesClient {
    async fn search(
        &self,
        center: Coordinates,
        radius_m: f64,
    ) -> Result<Vec<VenueCandidate>, AppError> {
        let location = format!("{},{}", center.latitude, center.longitude);
        let radius = format!("{}", radius_m.round() as i64);
        let params = [
            ("location", location.as_str()),
            ("radius", radius.as_str()),
            ("type", "bar"),
            ("key", self.api_key.as_str()),
        ];

        debug!(%location, %radius, "Querying venue provider");

        let response = self
            .http_client
            .get(&self.api_url)
            .query(&params)
            .send()
            .await
            .map_err(|e| AppError::Provider(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::Provider(format!(
                "provider returned status {}",
                response.status()
            )));
        }

        let body: PlacesResponse = response
            .json()
            .await
            .map_err(|e| AppError::Provider(format!("invalid response body: {}", e)))?;

        match body.status.as_str() {
            "OK" | "ZERO_RESULTS" => {}
            other => {
                return Err(AppError::Provider(format!(
                    "provider status {}: {}",
                    other,
                    body.error_message.unwrap_or_default()
                )));
            }
        }

        debug!(count = body.results.len(), "Venue candidates received");
        Ok(body.results.into_iter().map(VenueCandidate::from).collect())
    }
}
