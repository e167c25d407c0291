use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Error kinds shared by the remote clients, detectors and the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The remote hiccuped; the call was (or may be) retried.
    #[error("transient remote failure: {0}")]
    TransientRemote(String),
    /// The remote rejected the request; retrying cannot help.
    #[error("permanent remote failure: {0}")]
    PermanentRemote(String),
    #[error("{0} not found")]
    NotFound(String),
    /// Data from a remote violated the expected schema.
    #[error("parse error: {0}")]
    Parse(String),
    /// Internal bug; surface, never swallow.
    #[error("invariant violated: {0}")]
    InvariantViolated(String),
    #[error("cancelled")]
    Cancelled,
    #[error("timed out after {0} seconds")]
    Timeout(u64),
    #[error("duplicate key: {0}")]
    DuplicateKey(String),
}

impl ClientError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::TransientRemote(_))
    }
}

/// JSON error envelope returned by every handler:
/// `{ success: false, message, correlation_id }`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub correlation_id: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            correlation_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(
                correlation_id = %self.correlation_id,
                status = %self.status,
                "{}", self.message
            );
        }
        let body = serde_json::json!({
            "success": false,
            "message": self.message,
            "correlation_id": self.correlation_id,
        });
        (self.status, Json(body)).into_response()
    }
}

impl From<ClientError> for ApiError {
    fn from(err: ClientError) -> Self {
        match &err {
            ClientError::TransientRemote(_) | ClientError::Timeout(_) => {
                ApiError::unavailable(err.to_string())
            }
            ClientError::NotFound(_) => ApiError::not_found(err.to_string()),
            ClientError::DuplicateKey(_) => ApiError::conflict(err.to_string()),
            _ => ApiError::internal(err.to_string()),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_maps_to_503_and_not_found_to_404() {
        let e: ApiError = ClientError::TransientRemote("boom".to_string()).into();
        assert_eq!(e.status, StatusCode::SERVICE_UNAVAILABLE);
        let e: ApiError = ClientError::NotFound("device x".to_string()).into();
        assert_eq!(e.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn only_transient_is_retryable() {
        assert!(ClientError::TransientRemote("x".to_string()).is_retryable());
        assert!(!ClientError::PermanentRemote("x".to_string()).is_retryable());
        assert!(!ClientError::NotFound("x".to_string()).is_retryable());
    }
}
