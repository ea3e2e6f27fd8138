//! Remote API errors.

use thiserror::Error;

/// Result type for remote API calls.
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors raised when talking to the remote API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request never produced a response.
    #[error("request failed: {0}")]
    Network(String),

    /// The server answered with a non-success status.
    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },

    /// The response body did not have the expected shape.
    #[error("invalid response: {0}")]
    Decode(String),

    /// The server refused the request outright.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The request could not be built from local data.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The blocking worker running the request died.
    #[error("request worker failed: {0}")]
    Worker(String),
}

impl ApiError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Worker(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::Decode(_) | Self::Rejected(_) | Self::InvalidRequest(_) => false,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Status {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            Self::Network(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ApiError::Network("reset".into()).is_transient());
        assert!(ApiError::Status {
            status: 503,
            message: "unavailable".into()
        }
        .is_transient());
        assert!(!ApiError::Status {
            status: 404,
            message: "missing".into()
        }
        .is_transient());
        assert!(!ApiError::Rejected("no".into()).is_transient());
    }

    #[test]
    fn test_status_display() {
        let err = ApiError::Status {
            status: 401,
            message: "unauthorized".into(),
        };
        assert_eq!(err.to_string(), "server returned 401: unauthorized");
    }
}
