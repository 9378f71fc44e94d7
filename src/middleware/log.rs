//! Log middleware: the innermost link, closest to the base target (§4.5,
//! §6 `log_level` property).

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::Middleware;
use crate::envelope::{Request, Response};
use crate::error::BridgeError;
use crate::metadata::Metadata;

/// The verbosity at which a call is logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Log every call at debug level, success or failure.
    Debug,
    /// Log successes at info, failures at error.
    Info,
    /// Log only failures, at error.
    Error,
}

/// Read `log_level` out of `properties`, if present.
///
/// # Errors
/// Returns [`BridgeError::InvalidEnum`] when `log_level` is set to anything
/// other than `debug`, `info`, or `error`.
pub fn parse_level(properties: &Metadata) -> Result<Option<LogLevel>, BridgeError> {
    match properties.parse_string("log_level", "").to_ascii_lowercase().as_str() {
        "" => Ok(None),
        "debug" => Ok(Some(LogLevel::Debug)),
        "info" => Ok(Some(LogLevel::Info)),
        "error" => Ok(Some(LogLevel::Error)),
        other => Err(BridgeError::InvalidEnum { key: "log_level".to_string(), value: other.to_string() }),
    }
}

/// Logs each call at the configured [`LogLevel`], then delegates.
pub struct LogMiddleware {
    inner: Arc<dyn Middleware>,
    level: LogLevel,
    binding: String,
}

impl LogMiddleware {
    /// Wrap `inner`, logging every call for `binding` at `level`.
    #[must_use]
    pub fn new(inner: Arc<dyn Middleware>, level: LogLevel, binding: String) -> Self {
        Self { inner, level, binding }
    }
}

#[async_trait]
impl Middleware for LogMiddleware {
    async fn do_call(&self, ctx: CancellationToken, request: Request) -> Result<Response, BridgeError> {
        let result = self.inner.do_call(ctx, request).await;
        match (self.level, &result) {
            (LogLevel::Debug, Ok(resp)) => {
                tracing::debug!(binding = %self.binding, bytes = resp.data.len(), "call succeeded");
            }
            (LogLevel::Debug, Err(err)) => {
                tracing::debug!(binding = %self.binding, error = %err, "call failed");
            }
            (LogLevel::Info, Ok(resp)) => {
                tracing::info!(binding = %self.binding, bytes = resp.data.len(), "call succeeded");
            }
            (LogLevel::Info, Err(err)) => {
                tracing::error!(binding = %self.binding, error = %err, "call failed");
            }
            (LogLevel::Error, Ok(_)) => {}
            (LogLevel::Error, Err(err)) => {
                tracing::error!(binding = %self.binding, error = %err, "call failed");
            }
        }
        result
    }
}
