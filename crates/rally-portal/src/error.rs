//! HTTP error mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rally_tenant::AccessError;
use thiserror::Error;

use crate::models::ApiResponse;

/// Errors returned by route handlers
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Access(#[from] AccessError),

    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid request: {0}")]
    BadRequest(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Access(AccessError::Unauthenticated) => StatusCode::UNAUTHORIZED,
            Self::Access(AccessError::AccessDenied { .. }) => StatusCode::FORBIDDEN,
            Self::Access(AccessError::QuotaExceeded { .. }) => StatusCode::PAYMENT_REQUIRED,
            Self::Access(AccessError::InvalidPromoCode) => StatusCode::BAD_REQUEST,
            Self::Access(AccessError::StorageUnavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Access(AccessError::Unauthenticated) => "UNAUTHENTICATED",
            Self::Access(AccessError::AccessDenied { .. }) => "ACCESS_DENIED",
            Self::Access(AccessError::QuotaExceeded { .. }) => "QUOTA_EXCEEDED",
            Self::Access(AccessError::InvalidPromoCode) => "INVALID_PROMO_CODE",
            Self::Access(AccessError::StorageUnavailable(_)) => "STORAGE_UNAVAILABLE",
            Self::NotFound(_) => "NOT_FOUND",
            Self::BadRequest(_) => "BAD_REQUEST",
        }
    }

    fn public_message(&self) -> String {
        match self {
            // Storage details stay in the logs
            Self::Access(AccessError::StorageUnavailable(_)) => {
                "storage temporarily unavailable, retry later".to_string()
            }
            Self::Access(AccessError::QuotaExceeded { reason })
            | Self::Access(AccessError::AccessDenied { reason }) => reason.clone(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = ApiResponse::<()>::error(self.code(), &self.public_message());
        (status, Json(body)).into_response()
    }
}
