//! Events / events-store source connector (§4.3).

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use super::{CommonOptions, Source};
use crate::broker::Broker;
use crate::envelope::Request;
use crate::error::BridgeError;
use crate::metadata::Metadata;
use crate::middleware::Middleware;

/// Subscribes to a broadcast channel and dispatches each received event
/// concurrently, bounded by `concurrency`. When this source's `kind` is
/// `events-store` and `response_channel` is set, the reduced dispatch
/// response is republished there; for the plain `events` kind the response
/// is always discarded, matching the fire-and-forget contract of a one-way
/// pattern (§4.3 restricts republish to the events-store pattern).
pub struct EventsSource {
    name: String,
    channel: String,
    client_id: String,
    response_channel: Option<String>,
    is_events_store: bool,
    concurrency: usize,
    broker: Broker,
}

impl EventsSource {
    /// Build from this binding's connection metadata.
    ///
    /// # Errors
    /// Propagates [`CommonOptions::parse`]'s validation errors.
    pub fn new(name: impl Into<String>, broker: Broker, properties: &Metadata) -> Result<Self, BridgeError> {
        let common = CommonOptions::parse(properties)?;
        let response_channel = {
            let v = properties.parse_string("response_channel", "");
            if v.is_empty() { None } else { Some(v) }
        };
        Ok(Self {
            name: name.into(),
            channel: common.channel,
            client_id: common.client_id,
            response_channel,
            is_events_store: properties.kind == "events-store",
            concurrency: common.concurrency,
            broker,
        })
    }
}

#[async_trait]
impl Source for EventsSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: CancellationToken, dispatch: Arc<dyn Middleware>) -> Result<(), BridgeError> {
        tracing::info!(source = %self.name, channel = %self.channel, client_id = %self.client_id, "events source starting");
        let mut events = self.broker.subscribe_events(&self.channel);
        let permits = Arc::new(Semaphore::new(self.concurrency));

        loop {
            tokio::select! {
                received = events.recv() => {
                    match received {
                        Ok(request) => self.spawn_dispatch(request, &ctx, &dispatch, &permits).await,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(source = %self.name, skipped, "events source lagged, dropping buffered events");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                            return Err(BridgeError::Transport("event channel closed".to_string()));
                        }
                    }
                }
                () = ctx.cancelled() => return Ok(()),
            }
        }
    }
}

impl EventsSource {
    async fn spawn_dispatch(
        &self,
        request: Request,
        ctx: &CancellationToken,
        dispatch: &Arc<dyn Middleware>,
        permits: &Arc<Semaphore>,
    ) {
        let Ok(permit) = permits.clone().acquire_owned().await else { return };
        let dispatch = dispatch.clone();
        let broker = self.broker.clone();
        let response_channel = if self.is_events_store { self.response_channel.clone() } else { None };
        let ctx = ctx.clone();
        let source_name = self.name.clone();
        tokio::spawn(async move {
            let _permit = permit;
            match dispatch.do_call(ctx, request).await {
                Ok(resp) => {
                    if let Some(channel) = response_channel {
                        broker.publish_event(&channel, Request { data: resp.data, metadata: resp.metadata });
                    }
                }
                Err(err) => tracing::warn!(source = %source_name, error = %err, "events dispatch failed"),
            }
        });
    }
}
