//! Configuration document, validation into a live binding set, and the
//! hot-reload watcher (§4.10, §6 "Configuration document").

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::binding::Binding;
use crate::broker::Broker;
use crate::error::BridgeError;
use crate::metadata::Metadata;
use crate::metrics::MetricsStore;
use crate::middleware;
use crate::sources;
use crate::targets;

/// One connector kind and its per-connection property bags. A binding's
/// `sources`/`targets` each use one kind, instantiated once per entry in
/// `connections` (§6 "connection").
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConnectorGroup {
    /// The connector kind shared by every connection in this group.
    pub kind: String,
    /// One property bag per connector instance.
    #[serde(default)]
    pub connections: Vec<BTreeMap<String, String>>,
}

/// One binding document (§6 "binding"): a name, a shared property bag
/// consumed by the middleware chain, and a source/target connector group.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BindingConfig {
    /// Unique name within the service.
    pub name: String,
    /// Shared properties consulted by `middleware::build_chain` (log level,
    /// retry, rate-limit settings).
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    /// The source connector group.
    pub sources: ConnectorGroup,
    /// The target connector group.
    pub targets: ConnectorGroup,
}

/// The top-level configuration document (§6 "configuration document").
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// TCP port for the status/metrics API (§4.9). `0` disables it.
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    /// Every binding this process runs.
    #[serde(default)]
    pub bindings: Vec<BindingConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self { api_port: default_api_port(), bindings: Vec::new() }
    }
}

fn default_api_port() -> u16 {
    8080
}

/// Load a [`Config`] from `path`, merged with `FLOWBRIDGE_`-prefixed
/// environment variable overrides (outer wins over inner).
///
/// # Errors
/// Returns [`BridgeError::ConfigInvalid`] when the file is missing,
/// malformed, or fails to deserialize into [`Config`].
pub fn load(path: &Path) -> Result<Config, BridgeError> {
    Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed("FLOWBRIDGE_"))
        .extract()
        .map_err(|err| BridgeError::ConfigInvalid(err.to_string()))
}

/// Validate `config` and instantiate every binding's connectors and
/// middleware chains, producing the live, startable [`Binding`] set (§4.10's
/// "validated `BindingSet`").
///
/// # Errors
/// Returns [`BridgeError::ConfigInvalid`] for a duplicate binding name or a
/// binding with no source or target connections, and propagates whatever
/// error the named connector kind's constructor or the middleware chain
/// builder returns.
pub fn build_bindings(config: &Config, broker: &Broker, metrics: &MetricsStore) -> Result<Vec<Arc<Binding>>, BridgeError> {
    let mut seen_names = std::collections::HashSet::new();
    let mut bindings = Vec::with_capacity(config.bindings.len());

    for binding_cfg in &config.bindings {
        if !seen_names.insert(binding_cfg.name.clone()) {
            return Err(BridgeError::ConfigInvalid(format!("duplicate binding name {}", binding_cfg.name)));
        }
        if binding_cfg.sources.connections.is_empty() || binding_cfg.targets.connections.is_empty() {
            return Err(BridgeError::ConfigInvalid(format!(
                "binding {} needs at least one source and one target connection",
                binding_cfg.name
            )));
        }

        let shared_properties = Metadata::new(binding_cfg.name.clone(), binding_cfg.sources.kind.clone(), binding_cfg.properties.clone());

        let mut built_targets = Vec::with_capacity(binding_cfg.targets.connections.len());
        for (index, raw) in binding_cfg.targets.connections.iter().enumerate() {
            let target_meta = Metadata::new(format!("{}-target-{index}", binding_cfg.name), binding_cfg.targets.kind.clone(), raw.clone());
            let base = targets::build(&binding_cfg.targets.kind, broker.clone(), &target_meta)?;
            let chain = middleware::build_chain(
                base,
                &shared_properties,
                metrics.clone(),
                &binding_cfg.name,
                &binding_cfg.sources.kind,
                &binding_cfg.targets.kind,
            )?;
            built_targets.push(chain);
        }

        let mut built_sources = Vec::with_capacity(binding_cfg.sources.connections.len());
        for (index, raw) in binding_cfg.sources.connections.iter().enumerate() {
            let source_name = format!("{}-source-{index}", binding_cfg.name);
            let source_meta = Metadata::new(source_name.clone(), binding_cfg.sources.kind.clone(), raw.clone());
            let source = sources::build(&source_name, &binding_cfg.sources.kind, broker.clone(), &source_meta)?;
            built_sources.push(source);
        }

        bindings.push(Arc::new(Binding::new(binding_cfg.name.clone(), binding_cfg.sources.kind.clone(), built_targets, built_sources)));
    }

    Ok(bindings)
}

/// Render a starter configuration document, used by the `-build` CLI flag.
#[must_use]
pub fn template() -> String {
    let mut example_source = BTreeMap::new();
    example_source.insert("channel".to_string(), "orders".to_string());

    let config = Config {
        api_port: default_api_port(),
        bindings: vec![BindingConfig {
            name: "example".to_string(),
            properties: BTreeMap::new(),
            sources: ConnectorGroup { kind: "events".to_string(), connections: vec![example_source] },
            targets: ConnectorGroup { kind: "null".to_string(), connections: vec![BTreeMap::new()] },
        }],
    };
    toml::to_string_pretty(&config).unwrap_or_default()
}

/// Poll `path`'s modification time every `poll_interval` and, on change,
/// reload and validate the document, pushing the new binding set down the
/// returned channel (§4.10). A document that fails to load or validate is
/// logged and the channel receives nothing, leaving the caller's current
/// binding set in place.
pub fn spawn_watcher(
    path: PathBuf,
    poll_interval: Duration,
    broker: Broker,
    metrics: MetricsStore,
    ctx: CancellationToken,
) -> mpsc::Receiver<Vec<Arc<Binding>>> {
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(async move {
        let mut last_modified = file_modified(&path);
        loop {
            tokio::select! {
                () = tokio::time::sleep(poll_interval) => {}
                () = ctx.cancelled() => return,
            }

            let modified = file_modified(&path);
            if modified == last_modified {
                continue;
            }
            last_modified = modified;

            match load(&path).and_then(|config| build_bindings(&config, &broker, &metrics)) {
                Ok(bindings) => {
                    if tx.send(bindings).await.is_err() {
                        return;
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "invalid config on reload, retaining previous binding set");
                }
            }
        }
    });
    rx
}

fn file_modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> Config {
        let mut source = BTreeMap::new();
        source.insert("channel".to_string(), "orders".to_string());
        Config {
            api_port: 8080,
            bindings: vec![BindingConfig {
                name: "b1".to_string(),
                properties: BTreeMap::new(),
                sources: ConnectorGroup { kind: "events".to_string(), connections: vec![source] },
                targets: ConnectorGroup { kind: "null".to_string(), connections: vec![BTreeMap::new()] },
            }],
        }
    }

    #[test]
    fn build_bindings_rejects_duplicate_names() {
        let mut config = sample_config();
        config.bindings.push(config.bindings[0].clone());
        let broker = Broker::new();
        let metrics = MetricsStore::new();
        let result = build_bindings(&config, &broker, &metrics);
        assert!(matches!(result, Err(BridgeError::ConfigInvalid(_))));
    }

    #[test]
    fn build_bindings_rejects_binding_with_no_target_connections() {
        let mut config = sample_config();
        config.bindings[0].targets.connections.clear();
        let broker = Broker::new();
        let metrics = MetricsStore::new();
        let result = build_bindings(&config, &broker, &metrics);
        assert!(matches!(result, Err(BridgeError::ConfigInvalid(_))));
    }

    #[test]
    fn build_bindings_instantiates_one_binding_per_document_entry() {
        let config = sample_config();
        let broker = Broker::new();
        let metrics = MetricsStore::new();
        let bindings = build_bindings(&config, &broker, &metrics).unwrap();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].name(), "b1");
    }

    #[test]
    fn template_round_trips_through_toml() {
        let rendered = template();
        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.bindings.len(), 1);
        assert_eq!(parsed.bindings[0].sources.kind, "events");
    }
}
