//! Retry middleware (§4.5, §6 `retry_*` properties, §8 retry properties).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio_util::sync::CancellationToken;

use super::Middleware;
use crate::envelope::{Request, Response};
use crate::error::BridgeError;
use crate::metadata::Metadata;

/// How the delay between attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDelayType {
    /// The same delay before every retry.
    Fixed,
    /// `attempt * delay` before the next retry.
    BackOff,
    /// `delay` plus a uniformly random jitter up to `max_jitter`.
    Random,
}

/// Retries a failing inner call up to `attempts` times total, honoring
/// cooperative cancellation and the per-attempt deadline carried by an RPC
/// target's own timeout: an attempt that times out exhausts the per-attempt
/// deadline and ends the retry loop immediately, surfaced as
/// [`BridgeError::DeadlineExceeded`] rather than retried like a transient
/// failure.
pub struct RetryMiddleware {
    inner: Arc<dyn Middleware>,
    attempts: u32,
    delay: Duration,
    max_jitter: Duration,
    delay_type: RetryDelayType,
}

impl RetryMiddleware {
    /// Build from a binding's properties. Returns `None` when `retry_attempts`
    /// is absent, leaving the chain link out entirely.
    ///
    /// # Errors
    /// Returns [`BridgeError::OutOfRange`]/[`BridgeError::MissingRequiredKey`]
    /// when `retry_attempts` is present but `retry_delay_milliseconds` is
    /// absent or either is out of bounds, and
    /// [`BridgeError::InvalidEnum`] when `retry_delay_type` is set to
    /// anything other than `fixed`, `back-off`, or `random`.
    pub fn from_properties(inner: Arc<dyn Middleware>, properties: &Metadata) -> Result<Option<Self>, BridgeError> {
        let raw_attempts = properties.parse_string("retry_attempts", "");
        if raw_attempts.is_empty() {
            return Ok(None);
        }
        let attempts = properties.must_parse_int_with_range("retry_attempts", 1, 1_000_000)?;
        let delay_ms = properties.must_parse_int_with_range("retry_delay_milliseconds", 1, 1_000_000_000)?;
        let max_jitter_ms = properties.parse_int_with_range("retry_max_jitter_milliseconds", 0, 0, 1_000_000_000)?;
        let delay_type = match properties.parse_string("retry_delay_type", "fixed").to_ascii_lowercase().as_str() {
            "fixed" => RetryDelayType::Fixed,
            "back-off" => RetryDelayType::BackOff,
            "random" => RetryDelayType::Random,
            other => {
                return Err(BridgeError::InvalidEnum { key: "retry_delay_type".to_string(), value: other.to_string() });
            }
        };
        #[allow(clippy::cast_sign_loss, reason = "bounds already checked to be non-negative")]
        Ok(Some(Self {
            inner,
            attempts: attempts as u32,
            delay: Duration::from_millis(delay_ms as u64),
            max_jitter: Duration::from_millis(max_jitter_ms as u64),
            delay_type,
        }))
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        delay_for(self.delay_type, self.delay, self.max_jitter, attempt)
    }
}

/// Pure delay computation, factored out of [`RetryMiddleware`] so it can be
/// exercised directly by property tests without spinning up a chain.
fn delay_for(delay_type: RetryDelayType, delay: Duration, max_jitter: Duration, attempt: u32) -> Duration {
    match delay_type {
        RetryDelayType::Fixed => delay,
        RetryDelayType::BackOff => delay.saturating_mul(attempt),
        RetryDelayType::Random => {
            let jitter = if max_jitter.is_zero() {
                Duration::ZERO
            } else {
                #[allow(clippy::cast_possible_truncation, reason = "jitter bound fits comfortably in u64 millis")]
                let millis = rand::thread_rng().gen_range(0..=max_jitter.as_millis() as u64);
                Duration::from_millis(millis)
            };
            delay + jitter
        }
    }
}

#[async_trait]
impl Middleware for RetryMiddleware {
    async fn do_call(&self, ctx: CancellationToken, request: Request) -> Result<Response, BridgeError> {
        let mut last_err = BridgeError::Cancelled;
        for attempt in 1..=self.attempts {
            if ctx.is_cancelled() {
                return Err(BridgeError::Cancelled);
            }
            match self.inner.do_call(ctx.clone(), request.clone()).await {
                Ok(resp) => return Ok(resp),
                Err(BridgeError::Timeout(_)) => return Err(BridgeError::DeadlineExceeded),
                Err(err) => {
                    last_err = err;
                    if attempt == self.attempts {
                        break;
                    }
                    let delay = self.delay_for_attempt(attempt);
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = ctx.cancelled() => return Err(BridgeError::Cancelled),
                    }
                }
            }
        }
        Err(last_err)
    }
}
