//! Null target connector (§4.4): a test double that echoes the request back
//! as the response, with optional artificial delay and an injectable error.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::envelope::{Request, Response};
use crate::error::BridgeError;
use crate::metadata::Metadata;
use crate::middleware::Middleware;

/// Echoes `request.data` as a successful response after an optional delay,
/// or returns a pre-seeded error instead — useful for exercising retry,
/// rate-limit, and timeout behavior without a real downstream system.
pub struct NullTarget {
    delay: Duration,
    error: Option<String>,
}

impl NullTarget {
    /// Build from this binding's connection metadata. `delay_milliseconds`
    /// defaults to `0`; `error`, when non-empty, is returned instead of
    /// echoing the request.
    ///
    /// # Errors
    /// Returns [`BridgeError::OutOfRange`] when `delay_milliseconds` is
    /// present but outside `[0, 3_600_000]`.
    pub fn new(properties: &Metadata) -> Result<Self, BridgeError> {
        let delay_ms = properties.parse_int_with_range("delay_milliseconds", 0, 0, 3_600_000)?;
        let error = {
            let e = properties.parse_string("error", "");
            if e.is_empty() { None } else { Some(e) }
        };
        #[allow(clippy::cast_sign_loss, reason = "bounds already checked to be non-negative")]
        Ok(Self { delay: Duration::from_millis(delay_ms as u64), error })
    }
}

#[async_trait]
impl Middleware for NullTarget {
    async fn do_call(&self, ctx: CancellationToken, request: Request) -> Result<Response, BridgeError> {
        if !self.delay.is_zero() {
            tokio::select! {
                () = tokio::time::sleep(self.delay) => {}
                () = ctx.cancelled() => return Err(BridgeError::Cancelled),
            }
        }
        if let Some(error) = &self.error {
            return Err(BridgeError::Remote(error.clone()));
        }
        Ok(Response::success(request.data))
    }
}
