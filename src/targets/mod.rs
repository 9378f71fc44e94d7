//! Target connectors: events, events-store, queue, command, query, null
//! (§4.4). Each implements [`Middleware`] directly — `do_call` is exactly
//! the target's own contract — and becomes the base link that the
//! middleware chain (§4.5) wraps.

pub mod command;
pub mod events;
pub mod null;
pub mod query;
pub mod queue;

use std::sync::Arc;

pub use command::CommandTarget;
pub use events::EventsTarget;
pub use null::NullTarget;
pub use query::QueryTarget;
pub use queue::QueueTarget;

use crate::broker::Broker;
use crate::error::BridgeError;
use crate::metadata::Metadata;
use crate::middleware::Middleware;

/// Build the base target (pre-middleware) for `kind` from its connection
/// metadata.
///
/// # Errors
/// Propagates whatever the chosen connector's constructor returns for
/// invalid or missing metadata, and [`BridgeError::InvalidEnum`] for an
/// unrecognized `kind`.
pub fn build(kind: &str, broker: Broker, properties: &Metadata) -> Result<Arc<dyn Middleware>, BridgeError> {
    match kind {
        "events" | "events-store" => Ok(Arc::new(EventsTarget::new(broker, properties)?)),
        "queue" => Ok(Arc::new(QueueTarget::new(broker, properties)?)),
        "command" => Ok(Arc::new(CommandTarget::new(broker, properties)?)),
        "query" => Ok(Arc::new(QueryTarget::new(broker, properties)?)),
        "null" => Ok(Arc::new(NullTarget::new(properties)?)),
        other => Err(BridgeError::InvalidEnum { key: "targets.kind".to_string(), value: other.to_string() }),
    }
}
