use http::StatusCode;
use thiserror::Error;

/// Message returned to the daemon when a handler panics.
pub const PANIC_MESSAGE: &str = "internal plugin error";

/// Per-request failure carried through the middleware chain.
///
/// The error-envelope layer turns it into `{"Err": "<message>"}` using
/// [`HandlerError::status`] as the HTTP status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HandlerError {
    status: StatusCode,
    message: String,
}

impl HandlerError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(path: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, format!("no handler registered for {path}"))
    }

    /// Wraps a driver failure, keeping the whole context chain in the message.
    pub fn from_driver(err: anyhow::Error) -> Self {
        Self::internal(format!("{err:#}"))
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}
