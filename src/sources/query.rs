//! Query source connector (§4.3). Identical wiring to the command source —
//! the distinction between the two patterns lives in the target side, which
//! additionally rejects an empty response payload (see
//! `crate::targets::query`).

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{CommonOptions, Source};
use crate::broker::Broker;
use crate::envelope::Response;
use crate::error::BridgeError;
use crate::metadata::Metadata;
use crate::middleware::Middleware;

/// Subscribes to a query channel via the broker's RPC correlation table and
/// always replies, turning a failed dispatch into a failure response.
pub struct QuerySource {
    name: String,
    channel: String,
    client_id: String,
    broker: Broker,
}

impl QuerySource {
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
impl Source for QuerySource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: CancellationToken, dispatch: Arc<dyn Middleware>) -> Result<(), BridgeError> {
        tracing::info!(source = %self.name, channel = %self.channel, client_id = %self.client_id, "query source starting");
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
                                tracing::warn!(source = %source_name, error = %err, "query dispatch failed");
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
