//! Events / events-store target connector (§4.4).

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::broker::Broker;
use crate::envelope::{Request, Response};
use crate::error::BridgeError;
use crate::metadata::Metadata;
use crate::middleware::Middleware;

/// Publish-only target: once the broker has accepted the publish, responds
/// with an empty success envelope. There is no remote error path in the
/// in-process transport (publish never fails), so the only failure mode
/// left is one this target cannot produce — a deliberate simplification
/// from the original transport's connection-level publish errors.
pub struct EventsTarget {
    broker: Broker,
    channel: String,
}

impl EventsTarget {
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
impl Middleware for EventsTarget {
    async fn do_call(&self, _ctx: CancellationToken, request: Request) -> Result<Response, BridgeError> {
        self.broker.publish_event(&self.channel, request);
        Ok(Response::success(Vec::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publishes_and_returns_empty_success() {
        let broker = Broker::new();
        let mut props = Metadata::empty();
        props.set("channel", "downstream");
        let target = EventsTarget::new(broker.clone(), &props).unwrap();
        let mut subscriber = broker.subscribe_events("downstream");

        let resp = target.do_call(CancellationToken::new(), Request::new(b"x".to_vec())).await.unwrap();
        assert!(resp.is_success());
        assert!(resp.data.is_empty());

        let published = subscriber.recv().await.unwrap();
        assert_eq!(published.data, b"x");
    }

    #[test]
    fn requires_channel() {
        let broker = Broker::new();
        assert!(EventsTarget::new(broker, &Metadata::empty()).is_err());
    }
}
