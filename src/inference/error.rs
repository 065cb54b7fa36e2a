//! Prediction error taxonomy
//!
//! Every failure of a submission maps onto exactly one [`PredictionError`]. Only
//! [`PredictionError::Unauthorized`] outlives the submission: it revokes the session.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capture::ValidationError;

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum PredictionError {
    #[error("Session expired, please sign in again")]
    Unauthorized,
    #[error("Image is too large for the server")]
    PayloadTooLarge,
    #[error("The server could not process this image")]
    UnsupportedImage,
    #[error("Server rejected the request: {0}")]
    ServerRejected(String),
    #[error("The prediction service did not answer in time")]
    Timeout,
    #[error("The prediction service is unreachable")]
    Unreachable,
    #[error("Invalid response from server: {0}")]
    MalformedResponse(String),
    #[error("Prediction failed: {0}")]
    Unknown(String),
    /// A submission was requested while another one was in flight
    #[error("A prediction is already in progress")]
    NotIdle,
    #[error(transparent)]
    InvalidImage(#[from] ValidationError),
}

impl PredictionError {
    /// Classify a non-success HTTP status; `detail` is the best server message available
    pub fn from_status(status: u16, detail: impl Into<String>) -> Self {
        match status {
            401 => PredictionError::Unauthorized,
            413 => PredictionError::PayloadTooLarge,
            422 => PredictionError::UnsupportedImage,
            _ => PredictionError::ServerRejected(detail.into()),
        }
    }

    /// Classify a transport-level failure
    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            PredictionError::Timeout
        } else if err.is_connect() || err.is_request() {
            PredictionError::Unreachable
        } else if err.is_decode() {
            PredictionError::MalformedResponse(err.to_string())
        } else {
            PredictionError::Unknown(err.to_string())
        }
    }

    pub fn is_fatal_to_session(&self) -> bool {
        matches!(self, PredictionError::Unauthorized)
    }
}

/// Pull the `detail` field out of an error body, falling back to the raw text
pub fn error_detail(body: &str, status_line: &str) -> String {
    let from_json = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| match v.get("detail") {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(other) if !other.is_null() => Some(other.to_string()),
            _ => None,
        });

    from_json
        .or_else(|| {
            let trimmed = body.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        })
        .unwrap_or_else(|| status_line.to_string())
}
