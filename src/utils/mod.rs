use axum::Json;
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::config::Config;

/// 地球半径（米）
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// 统一响应结构
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub msg: String,
    pub resp_data: Option<T>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,   // 用户ID
    pub exp: i64,      // 过期时间
    pub iat: i64,      // 签发时间
    pub is_temp: bool, // 匿名用户标识
}

fn sign(
    user_id: &str,
    lifetime_secs: i64,
    is_temp: bool,
    secret: &str,
) -> Result<(String, i64), jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let expiration = (now + Duration::seconds(lifetime_secs)).timestamp();

    let claims = Claims {
        sub: user_id.to_string(),
        exp: expiration,
        iat: now.timestamp(),
        is_temp,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok((token, expiration))
}

pub fn generate_token(
    user_id: &str,
    config: &Config,
) -> Result<(String, i64), jsonwebtoken::errors::Error> {
    sign(user_id, config.jwt_expiration_secs as i64, false, &config.jwt_secret)
}

/// 匿名用户使用短期令牌
pub fn generate_temp_token(
    user_id: &str,
    config: &Config,
) -> Result<(String, i64), jsonwebtoken::errors::Error> {
    tracing::debug!("Generating temp token for user: {}", user_id);
    sign(
        user_id,
        config.temp_token_expiration_secs as i64,
        true,
        &config.jwt_secret,
    )
}

pub fn verify_token(token: &str, config: &Config) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &Validation::default(),
    )?;

    Ok(token_data.claims)
}

pub fn success_to_api_response<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        code: error_codes::SUCCESS,
        msg: "success".into(),
        resp_data: Some(data),
    })
}

/// 使用Haversine公式计算两点之间的大圆距离（米）
pub fn calculate_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let delta_phi = (lat2 - lat1).to_radians();
    let delta_lambda = (lon2 - lon1).to_radians();

    let a = (delta_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (delta_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// 半径换算为经纬度包围盒的半宽，用于数据库预筛选
pub fn bounding_deltas(latitude: f64, radius_m: f64) -> (f64, f64) {
    // 1度纬度约111km
    let lat_delta = radius_m / 111_000.0;
    let cos_lat = latitude.to_radians().cos().abs().max(0.01);
    let lon_delta = (radius_m / (111_000.0 * cos_lat)).min(180.0);
    (lat_delta, lon_delta)
}

pub mod error_codes {
    pub const SUCCESS: i32 = 0;
    pub const VALIDATION_ERROR: i32 = 1000;
    pub const AUTH_FAILED: i32 = 1002;
    pub const NOT_FOUND: i32 = 1004;
    pub const CAPACITY: i32 = 1006;
    pub const PROVIDER_ERROR: i32 = 1007;
    pub const INTERNAL_ERROR: i32 = 5000;
}
