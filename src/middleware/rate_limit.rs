//! Rate-limit middleware: the outermost link in the chain (§4.5, §6
//! `rate_per_second` property, §8 rate-limiter property).

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use super::Middleware;
use crate::envelope::{Request, Response};
use crate::error::BridgeError;
use crate::metadata::Metadata;

/// Spaces calls so that no more than `rate_per_second` pass through per
/// second, amortized across the second rather than bursted at its start.
/// Implemented as a single shared time slot: each caller reserves the next
/// free slot `1/rate` seconds after the previous reservation, then sleeps
/// until it arrives.
pub struct RateLimitMiddleware {
    inner: Arc<dyn Middleware>,
    interval: Duration,
    next_slot: AsyncMutex<Instant>,
}

impl RateLimitMiddleware {
    /// Wrap `inner` behind a `rate_per_second`-calls-per-second limiter.
    #[must_use]
    pub fn new(inner: Arc<dyn Middleware>, rate_per_second: u32) -> Self {
        let rate = f64::from(rate_per_second.max(1));
        Self { inner, interval: Duration::from_secs_f64(1.0 / rate), next_slot: AsyncMutex::new(Instant::now()) }
    }

    /// Build from a binding's properties. Returns `None` when `rate_per_second`
    /// is absent or `0`, leaving the chain link out entirely (unlimited).
    ///
    /// # Errors
    /// Returns [`BridgeError::OutOfRange`] when `rate_per_second` is present
    /// but not an integer in `[0, i32::MAX]`.
    pub fn from_properties(inner: Arc<dyn Middleware>, properties: &Metadata) -> Result<Option<Self>, BridgeError> {
        let raw = properties.parse_string("rate_per_second", "");
        if raw.is_empty() {
            return Ok(None);
        }
        let rate = properties.must_parse_int_with_range("rate_per_second", 0, i64::from(i32::MAX))?;
        if rate == 0 {
            return Ok(None);
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, reason = "bounds already checked to fit u32")]
        Ok(Some(Self::new(inner, rate as u32)))
    }

    async fn acquire(&self, cancel: &CancellationToken) -> Result<(), BridgeError> {
        let wait_until = {
            let mut slot = self.next_slot.lock().await;
            let now = Instant::now();
            let scheduled = (*slot).max(now);
            *slot = scheduled + self.interval;
            scheduled
        };
        tokio::select! {
            () = tokio::time::sleep_until(wait_until.into()) => Ok(()),
            () = cancel.cancelled() => Err(BridgeError::Cancelled),
        }
    }
}

#[async_trait]
impl Middleware for RateLimitMiddleware {
    async fn do_call(&self, ctx: CancellationToken, request: Request) -> Result<Response, BridgeError> {
        self.acquire(&ctx).await?;
        self.inner.do_call(ctx, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::tests::CountingTarget;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn from_properties_absent_key_disables_middleware() {
        let base: Arc<dyn Middleware> = Arc::new(CountingTarget { calls: Arc::new(AtomicUsize::new(0)) });
        assert!(RateLimitMiddleware::from_properties(base, &Metadata::empty()).unwrap().is_none());
    }

    #[test]
    fn from_properties_treats_zero_as_disabled() {
        let base: Arc<dyn Middleware> = Arc::new(CountingTarget { calls: Arc::new(AtomicUsize::new(0)) });
        let mut props = Metadata::empty();
        props.set("rate_per_second", "0");
        assert!(RateLimitMiddleware::from_properties(base, &props).unwrap().is_none());
    }

    #[test]
    fn from_properties_accepts_rate_above_1000() {
        let base: Arc<dyn Middleware> = Arc::new(CountingTarget { calls: Arc::new(AtomicUsize::new(0)) });
        let mut props = Metadata::empty();
        props.set("rate_per_second", "5000");
        assert!(RateLimitMiddleware::from_properties(base, &props).unwrap().is_some());
    }

    #[test]
    fn from_properties_rejects_negative_rate() {
        let base: Arc<dyn Middleware> = Arc::new(CountingTarget { calls: Arc::new(AtomicUsize::new(0)) });
        let mut props = Metadata::empty();
        props.set("rate_per_second", "-1");
        assert!(RateLimitMiddleware::from_properties(base, &props).is_err());
    }

    #[tokio::test]
    async fn limiter_spaces_calls_across_the_second() {
        let calls = Arc::new(AtomicUsize::new(0));
        let base: Arc<dyn Middleware> = Arc::new(CountingTarget { calls: calls.clone() });
        let limiter = RateLimitMiddleware::new(base, 10);
        let start = Instant::now();
        for _ in 0..5 {
            limiter.do_call(CancellationToken::new(), Request::new(Vec::new())).await.unwrap();
        }
        let elapsed = start.elapsed();
        // 5 calls at 10/s should take at least ~400ms (4 intervals of 100ms).
        assert!(elapsed >= Duration::from_millis(350), "elapsed={elapsed:?}");
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn cancellation_aborts_the_wait() {
        let base: Arc<dyn Middleware> = Arc::new(CountingTarget { calls: Arc::new(AtomicUsize::new(0)) });
        let limiter = RateLimitMiddleware::new(base, 1);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = limiter.do_call(cancel, Request::new(Vec::new())).await;
        assert!(matches!(result, Err(BridgeError::Cancelled)));
    }
}
