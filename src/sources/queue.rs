//! Queue source connector (§4.3).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{CommonOptions, Source};
use crate::broker::Broker;
use crate::error::BridgeError;
use crate::metadata::Metadata;
use crate::middleware::Middleware;

/// Polls a FIFO queue channel with `sources` independent worker loops. A
/// failed dispatch is requeued (with its attempt counter incremented) while
/// under `max_requeue`; once exhausted it is logged and dropped. Ack/nack
/// happens on every exit path: requeue, or simply not requeuing, both
/// conclude the pop.
pub struct QueueSource {
    name: String,
    channel: String,
    client_id: String,
    workers: usize,
    wait_timeout: Duration,
    max_requeue: i64,
    broker: Broker,
}

impl QueueSource {
    /// Build from this binding's connection metadata.
    ///
    /// # Errors
    /// Propagates [`CommonOptions::parse`]'s validation errors, plus
    /// [`BridgeError::OutOfRange`] for `sources`, `batch_size`,
    /// `wait_timeout`, or `max_requeue` outside their bounds.
    pub fn new(name: impl Into<String>, broker: Broker, properties: &Metadata) -> Result<Self, BridgeError> {
        let common = CommonOptions::parse(properties)?;
        let workers = properties.parse_int_with_range("sources", 1, 1, 100)?;
        // `batch_size` is recognized and validated for config-parity with a
        // real broker deployment; this transport's queue_pop delivers one
        // message per call, so batching has no further effect here.
        let _batch_size = properties.parse_int_with_range("batch_size", 1, 1, 1024)?;
        let wait_timeout_secs = properties.parse_int_with_range("wait_timeout", 5, 1, 86400)?;
        let max_requeue = properties.parse_int_with_range("max_requeue", 0, 0, 1_000_000)?;
        #[allow(clippy::cast_sign_loss, reason = "bounds already checked to be positive")]
        Ok(Self {
            name: name.into(),
            channel: common.channel,
            client_id: common.client_id,
            workers: workers as usize,
            wait_timeout: Duration::from_secs(wait_timeout_secs as u64),
            max_requeue,
            broker,
        })
    }
}

#[async_trait]
impl Source for QueueSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: CancellationToken, dispatch: Arc<dyn Middleware>) -> Result<(), BridgeError> {
        tracing::info!(source = %self.name, channel = %self.channel, client_id = %self.client_id, workers = self.workers, "queue source starting");
        let mut handles = Vec::with_capacity(self.workers);
        for _ in 0..self.workers {
            let ctx = ctx.clone();
            let dispatch = dispatch.clone();
            let broker = self.broker.clone();
            let channel = self.channel.clone();
            let wait_timeout = self.wait_timeout;
            let max_requeue = self.max_requeue;
            let source_name = self.name.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let message = tokio::select! {
                        popped = tokio::time::timeout(wait_timeout, broker.queue_pop(&channel, &ctx)) => {
                            match popped {
                                Ok(Ok(msg)) => msg,
                                Ok(Err(_)) => break,
                                Err(_) => continue,
                            }
                        }
                        () = ctx.cancelled() => break,
                    };
                    let attempt = i64::from(message.attempt());
                    match dispatch.do_call(ctx.clone(), message.request.clone()).await {
                        Ok(_) => {}
                        Err(err) if attempt < max_requeue => {
                            tracing::debug!(source = %source_name, error = %err, attempt, "requeueing failed queue message");
                            broker.queue_requeue(&channel, message);
                        }
                        Err(err) => {
                            tracing::warn!(source = %source_name, error = %err, attempt, "queue message exhausted requeue budget, dropping");
                        }
                    }
                }
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::QueueMessage;
    use crate::envelope::{Request, Response};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    struct FailsUntilAttempt {
        threshold: u32,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Middleware for FailsUntilAttempt {
        async fn do_call(&self, _ctx: CancellationToken, request: Request) -> Result<Response, BridgeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let attempt: u32 = request.metadata.get("x-requeue-attempt").and_then(|v| v.parse().ok()).unwrap_or(0);
            if attempt < self.threshold {
                Err(BridgeError::Remote("not yet".to_string()))
            } else {
                Ok(Response::success(request.data))
            }
        }
    }

    #[tokio::test]
    async fn requeues_until_success_within_budget() {
        let broker = Broker::new();
        let mut props = Metadata::empty();
        props.set("channel", "work");
        props.set("sources", "1");
        props.set("max_requeue", "3");
        props.set("wait_timeout", "1");
        let source = QueueSource::new("src", broker.clone(), &props).unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let dispatch: Arc<dyn Middleware> = Arc::new(FailsUntilAttempt { threshold: 2, calls: calls.clone() });

        broker.queue_push("work", QueueMessage::new(Request::new(b"payload".to_vec())));

        let ctx = CancellationToken::new();
        let ctx_task = ctx.clone();
        let handle = tokio::spawn(async move { source.run(ctx_task, dispatch).await });

        tokio::time::sleep(StdDuration::from_millis(100)).await;
        ctx.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
