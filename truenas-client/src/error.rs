use thiserror::Error;

/// A record returned by the appliance that could not be turned into a typed value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("{resource} response is not a list")]
    NotAList { resource: &'static str },

    #[error("{resource} record #{index} is not an object")]
    NotAnObject {
        resource: &'static str,
        index: usize,
    },

    #[error("{resource} record #{index} is missing field '{field}'")]
    MissingField {
        resource: &'static str,
        index: usize,
        field: &'static str,
    },

    #[error("{resource} record #{index} field '{field}' is not {expected}")]
    WrongType {
        resource: &'static str,
        index: usize,
        field: &'static str,
        expected: &'static str,
    },
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("invalid client configuration: {0}")]
    InvalidConfig(String),

    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {endpoint} timed out")]
    Timeout { endpoint: String },

    #[error("{endpoint} returned HTTP {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("failed to decode response: {0}")]
    Decode(#[from] DecodeError),

    /// Failure injected by the in-memory client.
    #[error("simulated failure: {0}")]
    Simulated(String),
}

impl ApiError {
    /// Whether a retry of the same read could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Timeout { .. } => true,
            ApiError::Transport { source, .. } => source.is_connect() || source.is_request(),
            ApiError::Status { status, .. } => *status == 429 || *status >= 500,
            ApiError::InvalidConfig(_) | ApiError::Decode(_) | ApiError::Simulated(_) => false,
        }
    }

    /// Short label used for metrics.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidConfig(_) => "invalid_config",
            ApiError::Transport { .. } => "transport",
            ApiError::Timeout { .. } => "timeout",
            ApiError::Status { .. } => "http_status",
            ApiError::Decode(_) => "decode",
            ApiError::Simulated(_) => "simulated",
        }
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_retryable() {
        let err = ApiError::Status {
            endpoint: "iscsi/target".to_string(),
            status: 503,
            body: String::new(),
        };
        assert!(err.is_retryable());

        let err = ApiError::Status {
            endpoint: "iscsi/target".to_string(),
            status: 404,
            body: String::new(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_decode_not_retryable() {
        let err = ApiError::from(DecodeError::NotAList { resource: "extent" });
        assert!(!err.is_retryable());
        assert_eq!(err.code(), "decode");
        assert_eq!(
            err.to_string(),
            "failed to decode response: extent response is not a list"
        );
    }
}
