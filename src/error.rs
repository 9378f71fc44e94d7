//! Crate-wide error taxonomy shared by connectors, middleware, and the
//! binding service.

use thiserror::Error;

/// Every failure mode a connector, middleware, or the dispatch engine can
/// surface.
#[derive(Debug, Error, Clone)]
pub enum BridgeError {
    /// A binding, source, or target property failed validation.
    #[error("config invalid: {0}")]
    ConfigInvalid(String),

    /// A required metadata key was absent or empty.
    #[error("missing required key: {key}")]
    MissingRequiredKey {
        /// The metadata key that was required.
        key: String,
    },

    /// A metadata value parsed but violated its declared bounds.
    #[error("value out of range for key {key}: {value} not in [{lo}, {hi}]")]
    OutOfRange {
        /// The offending metadata key.
        key: String,
        /// The observed, parsed value.
        value: i64,
        /// Inclusive lower bound.
        lo: i64,
        /// Inclusive upper bound.
        hi: i64,
    },

    /// A metadata value did not match one of its allowed enum members.
    #[error("invalid value for key {key}: {value}")]
    InvalidEnum {
        /// The offending metadata key.
        key: String,
        /// The observed, unrecognized value.
        value: String,
    },

    /// The underlying broker transport reported an I/O or connection
    /// failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// An RPC target exceeded its configured deadline.
    #[error("timeout after {0:?}")]
    Timeout(std::time::Duration),

    /// The per-attempt remaining time was exhausted before the retry budget.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// An RPC target returned a response envelope with a non-empty error
    /// field.
    #[error("remote error: {0}")]
    Remote(String),

    /// The operation was cancelled by context cancellation.
    #[error("cancelled")]
    Cancelled,

    /// An inbound byte stream was not a valid envelope record.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// A query/command target produced an empty response payload where one
    /// was required.
    #[error("empty response")]
    EmptyResponse,
}

impl BridgeError {
    /// True when the error is fatal to the binding that produced it (it
    /// should transition `Failed` rather than be retried).
    #[must_use]
    pub fn is_fatal_to_binding(&self) -> bool {
        matches!(
            self,
            BridgeError::ConfigInvalid(_)
                | BridgeError::MissingRequiredKey { .. }
                | BridgeError::OutOfRange { .. }
                | BridgeError::InvalidEnum { .. }
        )
    }
}
