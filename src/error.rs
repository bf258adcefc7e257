use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::models::order::OrderStatus;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    /// The chosen slot was taken by a concurrent request. Safe to retry
    /// after a fresh proposal.
    #[error("slot conflict: {0}")]
    SlotConflict(String),

    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("a reason is required for cancellation and reactivation")]
    MissingReason,

    #[error("no drivers can cover this order; reschedule or assign manually")]
    NoCandidateDrivers,

    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    /// Stable machine-readable code so callers can tell a retryable slot
    /// race apart from a downstream failure.
    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::NotFound(_) => "not_found",
            DispatchError::BadRequest(_) => "bad_request",
            DispatchError::SlotConflict(_) => "slot_conflict",
            DispatchError::InvalidTransition { .. } => "invalid_transition",
            DispatchError::MissingReason => "missing_reason",
            DispatchError::NoCandidateDrivers => "no_candidate_drivers",
            DispatchError::Persistence(_) => "persistence_failure",
            DispatchError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let status = match &self {
            DispatchError::NotFound(_) => StatusCode::NOT_FOUND,
            DispatchError::BadRequest(_) | DispatchError::MissingReason => StatusCode::BAD_REQUEST,
            DispatchError::SlotConflict(_) | DispatchError::InvalidTransition { .. } => {
                StatusCode::CONFLICT
            }
            DispatchError::NoCandidateDrivers => StatusCode::SERVICE_UNAVAILABLE,
            DispatchError::Persistence(_) | DispatchError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(json!({
            "error": self.to_string(),
            "code": self.code(),
        }));

        (status, body).into_response()
    }
}
