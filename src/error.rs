//! Error types for the verification relay

use thiserror::Error;
use warp::http::StatusCode;

#[derive(Error, Debug)]
pub enum VerifierError {
    #[error("Missing required fields: {}", .0.join(", "))]
    MissingField(Vec<&'static str>),

    #[error("Invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Invalid request body: {0}")]
    InvalidPayload(String),

    #[error("Verification rejected ({code}): {message}")]
    UpstreamRejected { message: String, code: String },

    #[error("Rate limit exceeded for {0}")]
    RateLimited(String),

    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    #[error("Transport error talking to verification authority: {0}")]
    Transport(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl VerifierError {
    /// HTTP status the error is surfaced with at the request boundary.
    pub fn status_code(&self) -> StatusCode {
        match self {
            VerifierError::MissingField(_)
            | VerifierError::InvalidField { .. }
            | VerifierError::InvalidPayload(_)
            | VerifierError::UpstreamRejected { .. } => StatusCode::BAD_REQUEST,
            VerifierError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            VerifierError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            VerifierError::Transport(_) | VerifierError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

impl From<reqwest::Error> for VerifierError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            VerifierError::Transport(format!("request timed out: {}", e))
        } else {
            VerifierError::Transport(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, VerifierError>;
