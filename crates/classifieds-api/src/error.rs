use std::collections::BTreeMap;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use classifieds_db::DbError;
use serde_json::json;
use tracing::error;

/// Message shared by every early rejection (bad CSRF token, throttling), so
/// the caller cannot tell which guard tripped.
pub const GENERIC_REJECTION: &str = "Invalid request. Please try again.";

const GENERIC_FAILURE: &str = "Something went wrong. Please try again.";

/// Field name -> human readable problem.
pub type FieldErrors = BTreeMap<&'static str, String>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Username or email already exists")]
    DuplicateIdentity,

    #[error("Invalid username/email or password")]
    InvalidCredentials,

    /// CSRF verification failed.
    #[error("{}", GENERIC_REJECTION)]
    InvalidRequest,

    #[error("{}", GENERIC_REJECTION)]
    RateLimited,

    /// Single-message input problem, safe to show verbatim.
    #[error("{0}")]
    Validation(String),

    #[error("Please correct the highlighted fields")]
    Fields(FieldErrors),

    #[error("Ad not found or access denied")]
    NotFound,

    #[error("persistence failure: {0}")]
    PersistenceFailure(#[from] DbError),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            Self::DuplicateIdentity => (StatusCode::CONFLICT, json!({ "error": self.to_string() })),
            Self::InvalidCredentials => {
                (StatusCode::UNAUTHORIZED, json!({ "error": self.to_string() }))
            }
            Self::InvalidRequest | Self::RateLimited => {
                (StatusCode::FORBIDDEN, json!({ "error": GENERIC_REJECTION }))
            }
            Self::Validation(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            Self::Fields(fields) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({ "error": self.to_string(), "fields": fields }),
            ),
            Self::NotFound => (StatusCode::NOT_FOUND, json!({ "error": self.to_string() })),
            Self::PersistenceFailure(e) => {
                error!("Persistence failure: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": GENERIC_FAILURE }))
            }
            Self::Internal(e) => {
                error!("Internal error: {:#}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": GENERIC_FAILURE }))
            }
        };

        (status, Json(body)).into_response()
    }
}
