// 位置标准化
// 校验原始坐标，必要时根据地名或区域默认点修正，并给出可信度

use serde::{Deserialize, Serialize};

use crate::config::MatchingConfig;
use crate::error::AppError;

/// 可信度等级，位置解析和场地评分共用
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    /// 校验坐标：必须是有限数值、在合法范围内，且不是 (0,0)
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, AppError> {
        if !latitude.is_finite() || !longitude.is_finite() {
            return Err(AppError::Validation("coordinates must be finite numbers".into()));
        }
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(AppError::Validation(format!("latitude {} out of range", latitude)));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(AppError::Validation(format!("longitude {} out of range", longitude)));
        }
        if latitude == 0.0 && longitude == 0.0 {
            return Err(AppError::Validation("null island (0,0) is not a real position".into()));
        }
        Ok(Self { latitude, longitude })
    }

    pub fn distance_to(&self, other: &Coordinates) -> f64 {
        crate::utils::calculate_distance(
            self.latitude,
            self.longitude,
            other.latitude,
            other.longitude,
        )
    }
}

/// 位置来源
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum LocationSource {
    Reported,
    Landmark(String),
    RegionalDefault,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedLocation {
    pub coordinates: Coordinates,
    pub confidence: Confidence,
    pub source: LocationSource,
}

struct Landmark {
    name: &'static str,
    aliases: &'static [&'static str],
    latitude: f64,
    longitude: f64,
}

/// 已知地标表
const GAZETTEER: &[Landmark] = &[
    Landmark {
        name: "Alexanderplatz",
        aliases: &["alexanderplatz", "alexplatz", "alex"],
        latitude: 52.5219,
        longitude: 13.4132,
    },
    Landmark {
        name: "Brandenburger Tor",
        aliases: &["brandenburger tor", "brandenburg gate"],
        latitude: 52.5163,
        longitude: 13.3777,
    },
    Landmark {
        name: "Potsdamer Platz",
        aliases: &["potsdamer platz", "potsdamer"],
        latitude: 52.5096,
        longitude: 13.3759,
    },
    Landmark {
        name: "Hackescher Markt",
        aliases: &["hackescher markt", "hackescher"],
        latitude: 52.5225,
        longitude: 13.4022,
    },
    Landmark {
        name: "Warschauer Strasse",
        aliases: &["warschauer strasse", "warschauer straße", "warschauer"],
        latitude: 52.5058,
        longitude: 13.4496,
    },
    Landmark {
        name: "Kottbusser Tor",
        aliases: &["kottbusser tor", "kotti"],
        latitude: 52.4991,
        longitude: 13.4180,
    },
    Landmark {
        name: "Mauerpark",
        aliases: &["mauerpark"],
        latitude: 52.5438,
        longitude: 13.4024,
    },
    Landmark {
        name: "Tempelhofer Feld",
        aliases: &["tempelhofer feld", "tempelhof"],
        latitude: 52.4731,
        longitude: 13.4013,
    },
];

/// 区域默认点（市中心）
pub const REGIONAL_DEFAULT: Coordinates = Coordinates {
    latitude: 52.5200,
    longitude: 13.4050,
};

/// 在地标表中按子串查找地名，较长的别名优先
fn lookup_landmark(text: &str) -> Option<&'static Landmark> {
    let needle = text.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }

    GAZETTEER
        .iter()
        .flat_map(|lm| lm.aliases.iter().map(move |alias| (lm, *alias)))
        .filter(|(_, alias)| needle.contains(alias))
        .max_by_key(|(_, alias)| alias.len())
        .map(|(lm, _)| lm)
}

pub fn normalize(
    latitude: Option<f64>,
    longitude: Option<f64>,
    location_name: Option<&str>,
) -> NormalizedLocation {
    if let (Some(lat), Some(lon)) = (latitude, longitude) {
        match Coordinates::new(lat, lon) {
            Ok(coordinates) => {
                return NormalizedLocation {
                    coordinates,
                    confidence: Confidence::High,
                    source: LocationSource::Reported,
                };
            }
            Err(e) => tracing::debug!("Discarding reported coordinates: {}", e),
        }
    }

    if let Some(landmark) = location_name.and_then(lookup_landmark) {
        tracing::debug!("Resolved location from landmark {}", landmark.name);
        return NormalizedLocation {
            coordinates: Coordinates {
                latitude: landmark.latitude,
                longitude: landmark.longitude,
            },
            confidence: Confidence::Medium,
            source: LocationSource::Landmark(landmark.name.to_string()),
        };
    }

    NormalizedLocation {
        coordinates: REGIONAL_DEFAULT,
        confidence: Confidence::Low,
        source: LocationSource::RegionalDefault,
    }
}

/// 可信度越低搜索半径越大，用来弥补位置误差
pub fn search_radius(confidence: Confidence, config: &MatchingConfig) -> f64 {
    let radius = match confidence {
        Confidence::High => config.radius_high_m,
        Confidence::Medium => config.radius_medium_m,
        Confidence::Low => config.radius_low_m,
    };
    radius.min(config.max_search_radius)
}
