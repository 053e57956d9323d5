//! Error taxonomy shared by the HTTP client and the bulk writer

use std::time::Duration;

/// Error from one upstream read or one store write attempt.
///
/// `Clone` because a single in-flight request result is handed to every
/// deduplicated waiter.
#[derive(Debug, Clone, PartialEq)]
pub enum HarvestError {
    /// Connection failure or request timeout on a single HTTP call
    Network { message: String, timeout: bool },
    /// Upstream answered with a non-2xx status
    UpstreamHttp { status: u16, message: String },
    /// Response body was not valid JSON
    Decode(String),
    /// Some operations of a logical commit failed while others succeeded
    PartialBatchFailure {
        failed: usize,
        total: usize,
        message: String,
    },
    /// A sub-batch exceeded its hard commit ceiling
    CommitTimeout { after: Duration },
    /// The document store rejected or failed a sub-batch commit
    Store { message: String, timeout: bool },
    /// Payload too large or malformed; raised before any network call
    Validation(String),
    /// Writing to local fallback storage failed
    Fallback(String),
    /// Configuration-level failure; the only kind that aborts a run
    Config(String),
    /// Retry budget spent; carries the last underlying error
    RetriesExhausted {
        label: String,
        attempts: u32,
        last: Box<HarvestError>,
    },
}

impl std::fmt::Display for HarvestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network {
                message,
                timeout: true,
            } => write!(f, "network timeout: {message}"),
            Self::Network { message, .. } => write!(f, "network error: {message}"),
            Self::UpstreamHttp { status, message } => write!(f, "HTTP {status}: {message}"),
            Self::Decode(msg) => write!(f, "invalid response body: {msg}"),
            Self::PartialBatchFailure {
                failed,
                total,
                message,
            } => write!(f, "{failed}/{total} operations failed: {message}"),
            Self::CommitTimeout { after } => {
                write!(f, "commit timed out after {:.1}s", after.as_secs_f64())
            }
            Self::Store {
                message,
                timeout: true,
            } => write!(f, "store timeout: {message}"),
            Self::Store { message, .. } => write!(f, "store error: {message}"),
            Self::Validation(msg) => write!(f, "validation: {msg}"),
            Self::Fallback(msg) => write!(f, "fallback storage: {msg}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::RetriesExhausted {
                label,
                attempts,
                last,
            } => write!(f, "{label}: failed after {attempts} attempts: {last}"),
        }
    }
}

impl std::error::Error for HarvestError {}

impl HarvestError {
    /// Whether a retry could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::UpstreamHttp { .. } => true,
            // Partial failures and store errors are transient from the writer's view
            Self::Store { .. } | Self::PartialBatchFailure { .. } => true,
            // A hard timeout means acute distress: fail fast and let the writer adapt
            Self::CommitTimeout { .. } => false,
            Self::Decode(_) | Self::Validation(_) | Self::Fallback(_) | Self::Config(_) => false,
            Self::RetriesExhausted { .. } => false,
        }
    }

    /// Timeout-class errors trigger the writer's emergency downscale.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::CommitTimeout { .. } => true,
            Self::Network { timeout, .. } | Self::Store { timeout, .. } => *timeout,
            Self::RetriesExhausted { last, .. } => last.is_timeout(),
            _ => false,
        }
    }

    /// Innermost error, looking through `RetriesExhausted`.
    pub fn root(&self) -> &HarvestError {
        match self {
            Self::RetriesExhausted { last, .. } => last.root(),
            other => other,
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

impl From<std::io::Error> for HarvestError {
    fn from(e: std::io::Error) -> Self {
        Self::Fallback(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http_err(status: u16) -> HarvestError {
        HarvestError::UpstreamHttp {
            status,
            message: "test".to_string(),
        }
    }

    #[test]
    fn http_errors_retryable() {
        assert!(http_err(500).is_retryable());
        assert!(http_err(429).is_retryable());
        assert!(http_err(404).is_retryable());
    }

    #[test]
    fn validation_not_retryable() {
        assert!(!HarvestError::validation("too big").is_retryable());
    }

    #[test]
    fn commit_timeout_not_retryable_but_timeout() {
        let err = HarvestError::CommitTimeout {
            after: Duration::from_secs(120),
        };
        assert!(!err.is_retryable());
        assert!(err.is_timeout());
    }

    #[test]
    fn exhausted_exposes_root() {
        let err = HarvestError::RetriesExhausted {
            label: "GET /items".to_string(),
            attempts: 3,
            last: Box::new(HarvestError::Network {
                message: "reset".to_string(),
                timeout: true,
            }),
        };
        assert!(err.is_timeout());
        assert!(matches!(err.root(), HarvestError::Network { .. }));
        assert_eq!(
            format!("{err}"),
            "GET /items: failed after 3 attempts: network timeout: reset"
        );
    }

    #[test]
    fn display_http() {
        assert_eq!(format!("{}", http_err(503)), "HTTP 503: test");
    }

    #[test]
    fn io_error_maps_to_fallback() {
        let err: HarvestError = std::io::Error::other("disk").into();
        assert!(matches!(err, HarvestError::Fallback(_)));
    }
}
