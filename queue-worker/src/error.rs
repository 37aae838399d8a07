//! Error taxonomy for the queue core.
//!
//! Two families are distinguished:
//! - [`QueueError`]: problems in the messaging layer itself (routing,
//!   transport, envelope decode)
//! - [`ApiError`]: problems talking to the upstream Steam API, split into
//!   retryable and non-retryable cases so processors can map them to the
//!   right outcome

use thiserror::Error;

/// Errors raised by the messaging layer.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The named queue was never registered. Returned to producers before
    /// any broker I/O happens.
    #[error("unknown queue: {0}")]
    UnknownQueue(String),

    /// The broker rejected or failed a publish. Not retried internally;
    /// callers decide whether to retry.
    #[error("publish to queue {queue} failed")]
    Publish {
        queue: String,
        #[source]
        source: lapin::Error,
    },

    /// The message body was not a well-formed envelope. Non-retryable:
    /// redelivering unparseable bytes cannot succeed.
    #[error("malformed message body")]
    Decode(#[from] serde_json::Error),
}

/// Errors raised by the upstream API client.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The resource legitimately does not exist upstream. Maps to a
    /// permanent `Fail` outcome.
    #[error("resource {0} does not exist upstream")]
    NotFound(u64),

    /// Timeout, rate limit, 5xx or malformed response. Maps to `Retry`.
    #[error("transient upstream failure: {0}")]
    Transient(String),
}

impl ApiError {
    /// Whether a processor should route this error through the retry engine.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_split() {
        assert!(ApiError::Transient("timeout".into()).is_retryable());
        assert!(!ApiError::NotFound(730).is_retryable());
    }

    #[test]
    fn test_decode_error_from_serde() {
        let err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: QueueError = err.into();
        assert!(matches!(err, QueueError::Decode(_)));
    }
}
