//! The middleware chain (§4.5).
//!
//! Every middleware and the base target share one contract,
//! `do_call(ctx, request) -> Result<Response, BridgeError>`, so the chain is
//! built by wrapping one `Arc<dyn Middleware>` in another. The chain is
//! assembled at binding-construction time from that binding's property bag,
//! so dispatch is necessarily dynamic — hence `#[async_trait]` rather than a
//! generic stack of concrete types.

pub mod log;
pub mod metrics;
pub mod rate_limit;
pub mod retry;

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub use log::{LogLevel, LogMiddleware};
pub use metrics::MetricsMiddleware;
pub use rate_limit::RateLimitMiddleware;
pub use retry::{RetryDelayType, RetryMiddleware};

use crate::envelope::{Request, Response};
use crate::error::BridgeError;
use crate::metadata::Metadata;
use crate::metrics::MetricsStore;

/// A link in the middleware chain, or a connector's base target. Every
/// implementor wraps an inner `do_call` (or, for a base target, performs the
/// call directly) and returns what it saw, possibly after side effects
/// (logging, rate limiting, retrying, recording metrics).
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Perform one call through this link of the chain.
    ///
    /// # Errors
    /// Propagates whatever the inner link or base target returns, or a
    /// middleware-specific failure (cancellation, rate-limit budget
    /// exhaustion is not an error — callers wait — config errors surface at
    /// build time instead).
    async fn do_call(&self, ctx: CancellationToken, request: Request) -> Result<Response, BridgeError>;
}

/// Build the fixed-order chain (`rate-limit -> retry -> metrics -> log`,
/// outside-in) around `base`, enabling each link only when its properties
/// are present in `properties`.
///
/// # Errors
/// Returns a config error if an enabled middleware's properties fail
/// validation (e.g. an unrecognized `retry_delay_type`).
pub fn build_chain(
    base: Arc<dyn Middleware>,
    properties: &Metadata,
    store: MetricsStore,
    binding: &str,
    source_kind: &str,
    target_kind: &str,
) -> Result<Arc<dyn Middleware>, BridgeError> {
    let mut chain = base;

    if let Some(level) = log::parse_level(properties)? {
        chain = Arc::new(LogMiddleware::new(chain, level, binding.to_string()));
    }

    chain = Arc::new(MetricsMiddleware::new(chain, store, binding.to_string(), source_kind.to_string(), target_kind.to_string()));

    if let Some(retry) = retry::RetryMiddleware::from_properties(chain.clone(), properties)? {
        chain = Arc::new(retry);
    }

    if let Some(limiter) = rate_limit::RateLimitMiddleware::from_properties(chain.clone(), properties)? {
        chain = Arc::new(limiter);
    }

    Ok(chain)
}
