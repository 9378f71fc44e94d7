//! Source connectors: events, events-store, queue, command, query (§4.3).

pub mod command;
pub mod events;
pub mod query;
pub mod queue;

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub use command::CommandSource;
pub use events::EventsSource;
pub use query::QuerySource;
pub use queue::QueueSource;

use crate::broker::Broker;
use crate::error::BridgeError;
use crate::metadata::Metadata;
use crate::middleware::Middleware;

/// Every source connector's lifecycle contract.
#[async_trait]
pub trait Source: Send + Sync {
    /// This source instance's connector name, for logs and error messages.
    fn name(&self) -> &str;

    /// Run until `ctx` is cancelled or the inbound stream ends, dispatching
    /// each inbound message through `dispatch` — a binding's fan-out and
    /// reduce, already exposed as a `Middleware` handle.
    ///
    /// # Errors
    /// Returns an error when the connection to the broker is lost; the
    /// supervising binding logs this and marks the source degraded. There
    /// is no internal retry of the subscribe call — that is the service's
    /// job on the next reload.
    async fn run(&self, ctx: CancellationToken, dispatch: Arc<dyn Middleware>) -> Result<(), BridgeError>;
}

/// Build the named source connector for `kind` from its connection metadata.
///
/// # Errors
/// Propagates whatever the chosen connector's constructor returns for
/// invalid or missing metadata, and [`BridgeError::InvalidEnum`] for an
/// unrecognized `kind`.
pub fn build(name: &str, kind: &str, broker: Broker, properties: &Metadata) -> Result<Arc<dyn Source>, BridgeError> {
    match kind {
        "events" => Ok(Arc::new(EventsSource::new(name, broker, properties)?)),
        "events-store" => Ok(Arc::new(EventsSource::new(name, broker, properties)?)),
        "queue" => Ok(Arc::new(QueueSource::new(name, broker, properties)?)),
        "command" => Ok(Arc::new(CommandSource::new(name, broker, properties)?)),
        "query" => Ok(Arc::new(QuerySource::new(name, broker, properties)?)),
        other => Err(BridgeError::InvalidEnum { key: "sources.kind".to_string(), value: other.to_string() }),
    }
}

/// Common metadata recognized by every source kind (§6). Fields unused by
/// the in-process broker (`auto_reconnect`, `reconnect_interval_seconds`,
/// `auth_token`) are still parsed and validated so a configuration document
/// written against a real broker deployment loads unchanged here.
pub(crate) struct CommonOptions {
    #[allow(dead_code, reason = "parsed for config-parity with a real broker deployment; the in-process transport is addressless")]
    pub address: (String, u16),
    pub client_id: String,
    #[allow(dead_code, reason = "parsed for config-parity with a real broker deployment; this transport is unauthenticated")]
    pub auth_token: String,
    pub channel: String,
    #[allow(dead_code, reason = "the in-process broadcast transport delivers to every subscriber regardless of group")]
    pub group: String,
    pub concurrency: usize,
    #[allow(dead_code, reason = "the in-process transport never disconnects, so there is nothing to reconnect")]
    pub auto_reconnect: bool,
    #[allow(dead_code, reason = "the in-process transport never disconnects, so there is nothing to reconnect")]
    pub reconnect_interval_seconds: i64,
}

impl CommonOptions {
    pub fn parse(properties: &Metadata) -> Result<Self, BridgeError> {
        let address = properties.must_parse_address("address", "localhost:50000")?;
        let client_id = properties.parse_string("client_id", "");
        let client_id = if client_id.is_empty() { uuid::Uuid::new_v4().to_string() } else { client_id };
        let auth_token = properties.parse_string("auth_token", "");
        let channel = properties.must_parse_string("channel")?;
        let group = properties.parse_string("group", "");
        let group = if group.is_empty() { uuid::Uuid::new_v4().to_string() } else { group };
        let concurrency = properties.parse_int_with_range("concurrency", 1, 1, 100)?;
        let auto_reconnect = properties.parse_bool("auto_reconnect", true);
        let reconnect_interval_seconds = properties.parse_int_with_range("reconnect_interval_seconds", 5, 1, 1_000_000)?;
        #[allow(clippy::cast_sign_loss, reason = "bounds already checked to be positive")]
        Ok(Self {
            address,
            client_id,
            auth_token,
            channel,
            group,
            concurrency: concurrency as usize,
            auto_reconnect,
            reconnect_interval_seconds,
        })
    }
}
