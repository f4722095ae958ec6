use axum::Json;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::utils::{ApiResponse, error_codes};

/// 错误分类，对应撮合核心对外暴露的几类错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Auth,
    Capacity,
    NotFound,
    Provider,
    Consistency,
    Internal,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid location: {0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("group {0} is already full")]
    GroupFull(String),

    #[error("user {0} already belongs to an active group")]
    AlreadyMember(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("venue provider error: {0}")]
    Provider(String),

    #[error("member count drift in group {group_id}: recorded {recorded}, actual {actual}")]
    Consistency {
        group_id: String,
        recorded: i32,
        actual: i32,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("cache error: {0}")]
    Cache(#[from] redis::RedisError),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Validation(_) => ErrorKind::Validation,
            AppError::Unauthorized(_) => ErrorKind::Auth,
            AppError::GroupFull(_) | AppError::AlreadyMember(_) => ErrorKind::Capacity,
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::Provider(_) => ErrorKind::Provider,
            AppError::Consistency { .. } => ErrorKind::Consistency,
            AppError::Database(_) | AppError::Cache(_) => ErrorKind::Internal,
        }
    }

    /// 只有场地服务的错误允许重试，其余错误直接返回给调用方
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Provider
    }

    fn status_and_code(&self) -> (StatusCode, i32) {
        match self.kind() {
            ErrorKind::Validation => (StatusCode::BAD_REQUEST, error_codes::VALIDATION_ERROR),
            ErrorKind::Auth => (StatusCode::UNAUTHORIZED, error_codes::AUTH_FAILED),
            ErrorKind::Capacity => (StatusCode::CONFLICT, error_codes::CAPACITY),
            ErrorKind::NotFound => (StatusCode::NOT_FOUND, error_codes::NOT_FOUND),
            ErrorKind::Provider => (StatusCode::BAD_GATEWAY, error_codes::PROVIDER_ERROR),
            ErrorKind::Consistency | ErrorKind::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_codes::INTERNAL_ERROR,
            ),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        // 内部错误不把细节暴露给客户端
        let msg = match self.kind() {
            ErrorKind::Consistency | ErrorKind::Internal => {
                tracing::error!("Internal error: {}", self);
                "internal server error".to_string()
            }
            _ => self.to_string(),
        };

        let body = Json(ApiResponse::<()> {
            code,
            msg,
            resp_data: None,
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_errors_share_a_kind() {
        assert_eq!(AppError::GroupFull("g".into()).kind(), ErrorKind::Capacity);
        assert_eq!(AppError::AlreadyMember("u".into()).kind(), ErrorKind::Capacity);
    }

    #[test]
    fn only_provider_errors_are_retryable() {
        assert!(AppError::Provider("timeout".into()).is_retryable());
        assert!(!AppError::Validation("nan".into()).is_retryable());
        assert!(!AppError::GroupFull("g".into()).is_retryable());
        assert!(!AppError::NotFound("group".into()).is_retryable());
    }

    #[test]
    fn consistency_errors_render_as_internal() {
        let response = AppError::Consistency {
            group_id: "g".into(),
            recorded: 3,
            actual: 2,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
