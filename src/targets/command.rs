//! Command target connector (§4.4).

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::broker::Broker;
use crate::envelope::{Request, Response};
use crate::error::BridgeError;
use crate::metadata::Metadata;
use crate::middleware::Middleware;

/// Issues an RPC command and waits up to `default_timeout_seconds` (a
/// per-request `timeout_seconds` metadata entry overrides it), returning the
/// remote envelope verbatim on success. A response carrying a non-empty
/// `error` field is surfaced as [`BridgeError::Remote`] rather than `Ok`.
pub struct CommandTarget {
    broker: Broker,
    default_channel: String,
    default_timeout: Duration,
}

impl CommandTarget {
    /// Build from this binding's connection metadata.
    ///
    /// # Errors
    /// Returns [`BridgeError::MissingRequiredKey`] when `default_channel` is
    /// absent, or [`BridgeError::OutOfRange`] when `default_timeout_seconds`
    /// is present but out of `[1, 86400]`.
    pub fn new(broker: Broker, properties: &Metadata) -> Result<Self, BridgeError> {
        let default_channel = properties.must_parse_string("default_channel")?;
        let timeout_secs = properties.parse_int_with_range("default_timeout_seconds", 30, 1, 86_400)?;
        #[allow(clippy::cast_sign_loss, reason = "bounds already checked to be positive")]
        Ok(Self { broker, default_channel, default_timeout: Duration::from_secs(timeout_secs as u64) })
    }

    fn channel_for(&self, request: &Request) -> String {
        request.metadata.get("channel").cloned().unwrap_or_else(|| self.default_channel.clone())
    }

    fn timeout_for(&self, request: &Request) -> Duration {
        request
            .metadata
            .get("timeout_seconds")
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout)
    }
}

#[async_trait]
impl Middleware for CommandTarget {
    async fn do_call(&self, ctx: CancellationToken, request: Request) -> Result<Response, BridgeError> {
        let channel = self.channel_for(&request);
        let timeout = self.timeout_for(&request);
        let response = match tokio::time::timeout(timeout, self.broker.rpc_send(&channel, request, &ctx)).await {
            Ok(result) => result?,
            Err(_) => return Err(BridgeError::Timeout(timeout)),
        };
        if !response.is_success() {
            return Err(BridgeError::Remote(response.error));
        }
        Ok(response)
    }
}
