use thiserror::Error;

/// Why a single provider fetch failed.
///
/// These never escape the manager as fatal conditions: each one is recorded
/// against its provider in `FetchOutcome::errors`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// Credential missing, or rejected upstream with HTTP 401
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Transport failure or a non-2xx status
    #[error("network error{}: {message}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    NetworkError {
        status: Option<u16>,
        message: String,
    },

    /// A field required for the usage figure could not be decoded
    #[error("decoding error: {0}")]
    DecodingError(String),
}

impl ProviderError {
    pub fn network(message: impl Into<String>) -> Self {
        ProviderError::NetworkError {
            status: None,
            message: message.into(),
        }
    }

    pub fn http_status(status: u16, message: impl Into<String>) -> Self {
        ProviderError::NetworkError {
            status: Some(status),
            message: message.into(),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::NetworkError { status, .. } => *status,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::network("request timed out")
        } else if err.is_connect() {
            ProviderError::network("connection failed")
        } else {
            match err.status() {
                Some(status) => ProviderError::http_status(status.as_u16(), err.to_string()),
                None => ProviderError::network(err.to_string()),
            }
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::DecodingError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            ProviderError::AuthenticationFailed("no API key".to_string()).to_string(),
            "authentication failed: no API key"
        );
        assert_eq!(
            ProviderError::http_status(503, "upstream down").to_string(),
            "network error (HTTP 503): upstream down"
        );
        assert_eq!(
            ProviderError::network("connection failed").to_string(),
            "network error: connection failed"
        );
    }

    #[test]
    fn test_from_serde() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: ProviderError = json_err.into();
        assert!(matches!(err, ProviderError::DecodingError(_)));
    }

    #[test]
    fn test_status_accessor() {
        assert_eq!(ProviderError::http_status(500, "x").status(), Some(500));
        assert_eq!(ProviderError::DecodingError("x".into()).status(), None);
    }
}
