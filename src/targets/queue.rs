//! Queue target connector (§4.4). Send-to-queue; response semantics mirror
//! the events target.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::broker::{Broker, QueueMessage};
use crate::envelope::{Request, Response};
use crate::error::BridgeError;
use crate::metadata::Metadata;
use crate::middleware::Middleware;

/// Pushes the request onto a queue channel and responds with an empty
/// success envelope.
pub struct QueueTarget {
    broker: Broker,
    channel: String,
}

impl QueueTarget {
    /// Build from this binding's connection metadata.
    ///
    /// # Errors
    /// Returns [`BridgeError::MissingRequiredKey`] when `channel` is absent.
    pub fn new(broker: Broker, properties: &Metadata) -> Result<Self, BridgeError> {
        let channel = properties.must_parse_string("channel")?;
        Ok(Self { broker, channel })
    }
}

#[async_trait]
impl Middleware for QueueTarget {
    async fn do_call(&self, _ctx: CancellationToken, request: Request) -> Result<Response, BridgeError> {
        self.broker.queue_push(&self.channel, QueueMessage::new(request));
        Ok(Response::success(Vec::new()))
    }
}
