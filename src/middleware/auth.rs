use axum::{
    body::Body,
    extract::{Query, State},
    http::{Request, Uri},
    middleware::Next,
    response::Response,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use serde::Deserialize;

use crate::AppState;
use crate::error::AppError;
use crate::utils::verify_token;

/// 校验 Bearer token，并把 Claims 放入请求扩展
///
/// WebSocket 客户端无法设置请求头，允许通过 `token` 查询参数传递。
pub async fn auth_middleware(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let token = match &bearer {
        Some(TypedHeader(Authorization(bearer))) => Some(bearer.token().to_string()),
        None => token_from_query(req.uri()),
    }
    .ok_or_else(|| AppError::Unauthorized("missing bearer token".into()))?;

    let claims = verify_token(&token, &state.config).map_err(|e| {
        tracing::debug!("Token rejected: {}", e);
        AppError::Unauthorized("invalid or expired token".into())
    })?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

fn token_from_query(uri: &Uri) -> Option<String> {
    let Query(query) = Query::<TokenQuery>::try_from_uri(uri).ok()?;
    query.token.filter(|token| !token.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(s: &str) -> Uri {
        s.parse().unwrap()
    }

    #[test]
    fn token_is_read_from_query() {
        assert_eq!(
            token_from_query(&uri("/api/groups/events?group_id=g1&token=abc")),
            Some("abc".to_string())
        );
        assert_eq!(token_from_query(&uri("/api/groups/events?group_id=g1")), None);
        assert_eq!(token_from_query(&uri("/api/groups/events?token=")), None);
        assert_eq!(token_from_query(&uri("/api/groups/events")), None);
    }

    #[test]
    fn query_token_is_percent_decoded() {
        assert_eq!(
            token_from_query(&uri("/api/groups/events?token=ab%2Ecd%3D")),
            Some("ab.cd=".to_string())
        );
    }
}
