use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;
use uuid::Uuid;

use crate::responses::RequestMeta;
use crate::types::{CommissionStatus, UnknownVariant};

pub const E_BAD_AMOUNT: &str = "BAD_AMOUNT";
pub const E_BAD_REQUEST: &str = "BAD_REQUEST";
pub const E_INVALID_ACTION: &str = "INVALID_ACTION";
pub const E_INVALID_RATE: &str = "INVALID_RATE";
pub const E_INVALID_TRANSITION: &str = "INVALID_TRANSITION";
pub const E_REFERRAL_NOT_FOUND: &str = "REFERRAL_NOT_FOUND";
pub const E_COMMISSION_NOT_FOUND: &str = "COMMISSION_NOT_FOUND";
pub const E_STORE_UNAVAILABLE: &str = "STORE_UNAVAILABLE";

/// Errors raised by a storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl From<UnknownVariant> for StoreError {
    fn from(e: UnknownVariant) -> Self {
        StoreError::Corrupt(e.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("no active affiliate owns referral code `{0}`")]
    ReferralNotFound(String),

    #[error("commission {0} not found")]
    CommissionNotFound(Uuid),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("unknown commission action `{0}`")]
    InvalidAction(String),

    #[error("invalid commission rate: {0}")]
    InvalidRate(String),

    #[error("cannot {action} a commission that is {from}")]
    InvalidTransition {
        from: CommissionStatus,
        action: &'static str,
    },

    #[error("failed to insert commission: {0}")]
    InsertFailed(#[source] StoreError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LedgerError {
    /// Whether the caller may retry the whole operation unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::InsertFailed(_) | LedgerError::Store(_))
    }

    pub fn into_api(self, meta: RequestMeta) -> ApiErrorWithMeta {
        match self {
            LedgerError::ReferralNotFound(_) => ApiError::NotFound(self.to_string())
                .with_meta(meta)
                .with_code(E_REFERRAL_NOT_FOUND),
            LedgerError::CommissionNotFound(_) => ApiError::NotFound(self.to_string())
                .with_meta(meta)
                .with_code(E_COMMISSION_NOT_FOUND),
            LedgerError::InvalidAmount(_) => ApiError::BadRequest(self.to_string())
                .with_meta(meta)
                .with_code(E_BAD_AMOUNT),
            LedgerError::InvalidAction(_) => ApiError::BadRequest(self.to_string())
                .with_meta(meta)
                .with_code(E_INVALID_ACTION),
            LedgerError::InvalidTransition { .. } => ApiError::Conflict(self.to_string())
                .with_meta(meta)
                .with_code(E_INVALID_TRANSITION),
            LedgerError::InvalidRate(_) => ApiError::Internal(self.into())
                .with_meta(meta)
                .with_code(E_INVALID_RATE),
            LedgerError::InsertFailed(_) | LedgerError::Store(_) => {
                ApiError::Unavailable(self.into())
                    .with_meta(meta)
                    .with_code(E_STORE_UNAVAILABLE)
            }
        }
    }
}

/// A notification the delivery collaborator refused or never received.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification rejected with status {0}")]
    Rejected(u16),

    #[error("notification transport failed: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Unavailable(anyhow::Error),
    Internal(anyhow::Error),
}

#[derive(Debug)]
pub struct ApiErrorWithMeta {
    error: ApiError,
    meta: RequestMeta,
    code: Option<String>,
}

impl ApiError {
    pub fn with_meta(self, meta: RequestMeta) -> ApiErrorWithMeta {
        ApiErrorWithMeta {
            error: self,
            meta,
            code: None,
        }
    }
}

impl ApiErrorWithMeta {
    pub fn with_code(mut self, code: &str) -> Self {
        self.code = Some(code.to_string());
        self
    }
}

impl IntoResponse for ApiErrorWithMeta {
    fn into_response(self) -> Response {
        let (status, error_message) = match self.error {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Unavailable(e) => {
                error!(request_id = %self.meta.request_id, "store unavailable: {:?}", e);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "service temporarily unavailable".to_string(),
                )
            }
            ApiError::Internal(e) => {
                error!(request_id = %self.meta.request_id, "internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };

        let mut body = json!({
            "request_id": self.meta.request_id,
            "error": error_message,
        });
        if let Some(code) = self.code {
            body["code"] = json!(code);
        }

        (status, Json(body)).into_response()
    }
}
