//! The binding: fan-out/reduce dispatch (§4.6) and its lifecycle state
//! machine (§4.7, the per-binding half of it — the service owns the
//! collection).

use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::envelope::{Request, Response};
use crate::error::BridgeError;
use crate::middleware::Middleware;
use crate::sources::Source;

/// A binding's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingState {
    /// Constructed but not yet started.
    Created,
    /// Sources and targets instantiated, middleware chains built.
    Initialized,
    /// Sources are running and dispatching.
    Running,
    /// Stopped cleanly; `stop()` is idempotent past this point.
    Stopped,
    /// Init or start failed; the service removes and logs this binding
    /// without blocking the rest of the fleet.
    Failed,
}

/// True for the two RPC-style patterns (`command`, `query`), whose
/// reduction embeds failure in the response envelope rather than returning
/// a `Result::Err` upward. One-way patterns (`events`, `queue`) do the
/// opposite: success is an empty envelope, and any target failure surfaces
/// as an `Err` so a queue source can decide whether to requeue.
fn is_rpc_pattern(source_kind: &str) -> bool {
    matches!(source_kind, "command" | "query")
}

/// A named unit pairing a source set with a target set and a property bag,
/// per the data model's invariants (name unique within the service,
/// pattern-symmetric sources/targets — enforced by the service at
/// construction, not here).
pub struct Binding {
    name: String,
    source_kind: String,
    rpc_pattern: bool,
    targets: Vec<std::sync::Arc<dyn Middleware>>,
    sources: Vec<std::sync::Arc<dyn Source>>,
    state: StdMutex<BindingState>,
    cancel: CancellationToken,
    handles: StdMutex<Vec<JoinHandle<()>>>,
}

impl Binding {
    /// Construct a binding in the `Created` state. `targets` must already
    /// be fully wrapped in their middleware chains (§4.5); `sources` are not
    /// started until [`Binding::start`].
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        source_kind: impl Into<String>,
        targets: Vec<std::sync::Arc<dyn Middleware>>,
        sources: Vec<std::sync::Arc<dyn Source>>,
    ) -> Self {
        let source_kind = source_kind.into();
        Self {
            name: name.into(),
            rpc_pattern: is_rpc_pattern(&source_kind),
            source_kind,
            targets,
            sources,
            state: StdMutex::new(BindingState::Created),
            cancel: CancellationToken::new(),
            handles: StdMutex::new(Vec::new()),
        }
    }

    /// This binding's configured name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The binding's current lifecycle state.
    #[must_use]
    pub fn state(&self) -> BindingState {
        *self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn set_state(&self, state: BindingState) {
        *self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = state;
    }

    /// Start every source, each dispatching into this binding's fan-out
    /// (`self` as a [`Middleware`]). Targets are already live by
    /// construction, so no inbound message can arrive before they are
    /// ready.
    ///
    /// # Errors
    /// Returns an error if the binding has no sources or no targets
    /// configured (a data-model invariant enforced here as a final guard).
    pub fn start(self: &std::sync::Arc<Self>) -> Result<(), BridgeError> {
        if self.sources.is_empty() || self.targets.is_empty() {
            self.set_state(BindingState::Failed);
            return Err(BridgeError::ConfigInvalid(format!("binding {} needs at least one source and one target", self.name)));
        }
        self.set_state(BindingState::Initialized);

        let dispatch: std::sync::Arc<dyn Middleware> = std::sync::Arc::clone(self);
        let mut handles = self.handles.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        for source in &self.sources {
            let source = source.clone();
            let dispatch = dispatch.clone();
            let ctx = self.cancel.clone();
            let binding_name = self.name.clone();
            handles.push(tokio::spawn(async move {
                if let Err(err) = source.run(ctx, dispatch).await {
                    tracing::error!(binding = %binding_name, source = %source.name(), error = %err, "source exited with an error");
                }
            }));
        }
        drop(handles);
        self.set_state(BindingState::Running);
        Ok(())
    }

    /// Cancel every source's context and wait for them to finish. Idempotent:
    /// calling `stop` more than once, or before `start`, is a no-op beyond
    /// the first call.
    pub async fn stop(&self) {
        if self.state() == BindingState::Stopped {
            return;
        }
        self.cancel.cancel();
        let handles = std::mem::take(&mut *self.handles.lock().unwrap_or_else(std::sync::PoisonError::into_inner));
        for handle in handles {
            let _ = handle.await;
        }
        self.set_state(BindingState::Stopped);
    }
}

#[async_trait]
impl Middleware for Binding {
    /// Fan `request` out to every target concurrently and reduce per §4.6.
    async fn do_call(&self, ctx: CancellationToken, request: Request) -> Result<Response, BridgeError> {
        let calls = self.targets.iter().map(|target| {
            let target = target.clone();
            let ctx = ctx.clone();
            let request = request.clone();
            async move { target.do_call(ctx, request).await }
        });
        let results: Vec<Result<Response, BridgeError>> = futures_util::future::join_all(calls).await;

        if self.rpc_pattern {
            return Ok(reduce_rpc(results));
        }

        let errors: Vec<String> = results.into_iter().filter_map(Result::err).map(|e| e.to_string()).collect();
        if errors.is_empty() {
            Ok(Response::success(Vec::new()))
        } else {
            for error in &errors {
                tracing::warn!(binding = %self.name, error = %error, "target dispatch failed");
            }
            Err(BridgeError::Remote(errors.join("; ")))
        }
    }
}

/// RPC reduction (§4.6): one target forwards verbatim (its error becomes a
/// failure envelope); more than one returns the first success, or a
/// concatenation of every error if all failed.
fn reduce_rpc(results: Vec<Result<Response, BridgeError>>) -> Response {
    if results.len() == 1 {
        return match results.into_iter().next() {
            Some(Ok(resp)) => resp,
            Some(Err(err)) => Response::failure(err.to_string()),
            None => Response::failure("no targets configured"),
        };
    }
    if let Some(resp) = results.iter().find_map(|r| r.as_ref().ok().cloned()) {
        return resp;
    }
    let joined = results.into_iter().filter_map(Result::err).map(|e| e.to_string()).collect::<Vec<_>>().join("; ");
    Response::failure(joined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Request;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingOk {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Middleware for CountingOk {
        async fn do_call(&self, _ctx: CancellationToken, request: Request) -> Result<Response, BridgeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Response::success(request.data))
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl Middleware for AlwaysFails {
        async fn do_call(&self, _ctx: CancellationToken, _request: Request) -> Result<Response, BridgeError> {
            Err(BridgeError::Remote("nope".to_string()))
        }
    }

    #[tokio::test]
    async fn one_way_fan_out_invokes_every_target_once() {
        let calls_a = Arc::new(AtomicUsize::new(0));
        let calls_b = Arc::new(AtomicUsize::new(0));
        let targets: Vec<Arc<dyn Middleware>> =
            vec![Arc::new(CountingOk { calls: calls_a.clone() }), Arc::new(CountingOk { calls: calls_b.clone() })];
        let binding = Binding::new("b1", "events", targets, Vec::new());
        let resp = binding.do_call(CancellationToken::new(), Request::new(b"x".to_vec())).await.unwrap();
        assert!(resp.is_success());
        assert_eq!(calls_a.load(Ordering::SeqCst), 1);
        assert_eq!(calls_b.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn one_way_surfaces_error_when_any_target_fails() {
        let targets: Vec<Arc<dyn Middleware>> = vec![Arc::new(AlwaysFails)];
        let binding = Binding::new("b1", "queue", targets, Vec::new());
        let result = binding.do_call(CancellationToken::new(), Request::new(Vec::new())).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn rpc_single_target_forwards_response_verbatim() {
        let targets: Vec<Arc<dyn Middleware>> = vec![Arc::new(CountingOk { calls: Arc::new(AtomicUsize::new(0)) })];
        let binding = Binding::new("b1", "command", targets, Vec::new());
        let resp = binding.do_call(CancellationToken::new(), Request::new(b"y".to_vec())).await.unwrap();
        assert_eq!(resp.data, b"y");
    }

    #[tokio::test]
    async fn rpc_single_target_error_becomes_failure_response() {
        let targets: Vec<Arc<dyn Middleware>> = vec![Arc::new(AlwaysFails)];
        let binding = Binding::new("b1", "query", targets, Vec::new());
        let resp = binding.do_call(CancellationToken::new(), Request::new(Vec::new())).await.unwrap();
        assert!(!resp.is_success());
    }

    #[tokio::test]
    async fn rpc_multi_target_returns_first_success() {
        let targets: Vec<Arc<dyn Middleware>> = vec![Arc::new(AlwaysFails), Arc::new(CountingOk { calls: Arc::new(AtomicUsize::new(0)) })];
        let binding = Binding::new("b1", "command", targets, Vec::new());
        let resp = binding.do_call(CancellationToken::new(), Request::new(b"z".to_vec())).await.unwrap();
        assert_eq!(resp.data, b"z");
    }

    #[tokio::test]
    async fn rpc_multi_target_all_fail_concatenates_errors() {
        let targets: Vec<Arc<dyn Middleware>> = vec![Arc::new(AlwaysFails), Arc::new(AlwaysFails)];
        let binding = Binding::new("b1", "query", targets, Vec::new());
        let resp = binding.do_call(CancellationToken::new(), Request::new(Vec::new())).await.unwrap();
        assert!(resp.error.contains("nope"));
    }

    #[tokio::test]
    async fn start_fails_without_sources_or_targets() {
        let binding = Arc::new(Binding::new("b1", "events", Vec::new(), Vec::new()));
        assert!(binding.start().is_err());
        assert_eq!(binding.state(), BindingState::Failed);
    }

    #[tokio::test]
    async fn stop_before_start_is_a_no_op() {
        let binding = Binding::new("b1", "events", Vec::new(), Vec::new());
        binding.stop().await;
        assert_eq!(binding.state(), BindingState::Stopped);
    }
}
