//! Command source connector (§4.3).

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{CommonOptions, Source};
use crate::broker::Broker;
use crate::envelope::Response;
use crate::error::BridgeError;
use crate::metadata::Metadata;
use crate::middleware::Middleware;

/// Subscribes to a commands channel via the broker's RPC correlation table.
/// For each inbound call, dispatches the request and always replies —
/// target errors become a failure response rather than a dropped call, so
/// the caller on the other end of [`crate::broker::Broker::rpc_send`] is
/// never left waiting.
pub struct CommandSource {
    name: String,
    channel: String,
    client_id: String,
    broker: Broker,
}

impl CommandSource {
    /// Build from this binding's connection metadata.
    ///
    /// # Errors
    /// Propagates [`CommonOptions::parse`]'s validation errors.
    pub fn new(name: impl Into<String>, broker: Broker, properties: &Metadata) -> Result<Self, BridgeError> {
        let common = CommonOptions::parse(properties)?;
        Ok(Self { name: name.into(), channel: common.channel, client_id: common.client_id, broker })
    }
}

#[async_trait]
impl Source for CommandSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: CancellationToken, dispatch: Arc<dyn Middleware>) -> Result<(), BridgeError> {
        tracing::info!(source = %self.name, channel = %self.channel, client_id = %self.client_id, "command source starting");
        let mut inbound = self
            .broker
            .rpc_receiver(&self.channel)
            .ok_or_else(|| BridgeError::Transport(format!("channel {} already has a registered responder", self.channel)))?;

        loop {
            tokio::select! {
                call = inbound.recv() => {
                    let Some(mut call) = call else { return Ok(()) };
                    let dispatch = dispatch.clone();
                    let ctx2 = ctx.clone();
                    let source_name = self.name.clone();
                    tokio::spawn(async move {
                        let request = call.take_request();
                        let response = match dispatch.do_call(ctx2, request).await {
                            Ok(resp) => resp,
                            Err(err) => {
                                tracing::warn!(source = %source_name, error = %err, "command dispatch failed");
                                Response::failure(err.to_string())
                            }
                        };
                        call.respond(response);
                    });
                }
                () = ctx.cancelled() => return Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Request;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Echo {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Middleware for Echo {
        async fn do_call(&self, _ctx: CancellationToken, request: Request) -> Result<Response, BridgeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Response::success(request.data))
        }
    }

    #[tokio::test]
    async fn replies_to_the_caller() {
        let broker = Broker::new();
        let mut props = Metadata::empty();
        props.set("channel", "commands");
        let source = CommandSource::new("src", broker.clone(), &props).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let dispatch: Arc<dyn Middleware> = Arc::new(Echo { calls });

        let ctx = CancellationToken::new();
        let ctx_task = ctx.clone();
        let handle = tokio::spawn(async move { source.run(ctx_task, dispatch).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let caller_cancel = CancellationToken::new();
        let response = broker.rpc_send("commands", Request::new(b"do-it".to_vec()), &caller_cancel).await.unwrap();
        assert_eq!(response.data, b"do-it");

        ctx.cancel();
        handle.await.unwrap().unwrap();
    }
}
