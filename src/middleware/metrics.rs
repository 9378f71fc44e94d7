//! Metrics middleware: records one accumulated report per
//! `(binding, source_kind, target_kind)` triple (§4.5, §4.9, §8 metrics
//! accounting property).

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::Middleware;
use crate::envelope::{Request, Response};
use crate::error::BridgeError;
use crate::metrics::{MetricReport, MetricsStore};

/// Always present in the chain (unlike log/rate-limit/retry, which are
/// opt-in), so every binding's activity is observable through the status
/// endpoint.
pub struct MetricsMiddleware {
    inner: Arc<dyn Middleware>,
    store: MetricsStore,
    binding: String,
    source_kind: String,
    target_kind: String,
}

impl MetricsMiddleware {
    /// Wrap `inner`, recording every call against `store` under the key
    /// `{binding}-{source_kind}-{target_kind}`.
    #[must_use]
    pub fn new(inner: Arc<dyn Middleware>, store: MetricsStore, binding: String, source_kind: String, target_kind: String) -> Self {
        Self { inner, store, binding, source_kind, target_kind }
    }
}

#[async_trait]
impl Middleware for MetricsMiddleware {
    async fn do_call(&self, ctx: CancellationToken, request: Request) -> Result<Response, BridgeError> {
        let request_bytes = request.data.len() as u64;
        let result = self.inner.do_call(ctx, request).await;

        let mut delta = MetricReport::new(&self.binding, &self.source_kind, &self.target_kind);
        delta.request_count = 1;
        delta.request_volume = request_bytes;
        match &result {
            Ok(resp) => {
                delta.response_count = 1;
                delta.response_volume = resp.data.len() as u64;
            }
            Err(_) => delta.errors_count = 1,
        }
        self.store.accumulate(&delta);

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::tests::CountingTarget;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn records_success_and_error_counts_cumulatively() {
        let base: Arc<dyn Middleware> = Arc::new(CountingTarget { calls: Arc::new(AtomicUsize::new(0)) });
        let store = MetricsStore::new();
        let mw = MetricsMiddleware::new(base, store.clone(), "b1".to_string(), "events".to_string(), "null".to_string());

        mw.do_call(CancellationToken::new(), Request::new(b"abc".to_vec())).await.unwrap();
        mw.do_call(CancellationToken::new(), Request::new(b"de".to_vec())).await.unwrap();

        let report = store.get("b1-events-null").unwrap();
        assert_eq!(report.request_count, 2);
        assert_eq!(report.response_count, 2);
        assert_eq!(report.request_volume, 5);
    }
}
