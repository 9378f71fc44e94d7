use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use flowbridge::api;
use flowbridge::broker::Broker;
use flowbridge::config;
use flowbridge::metrics::MetricsStore;
use flowbridge::service::BindingService;

const CONFIG_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// flowbridge: a message-bridge runtime wiring source channels to target
/// channels across event, queue, command, and query patterns.
#[derive(Parser, Debug)]
#[command(name = "flowbridge")]
struct Cli {
    /// Generate a template configuration file and exit.
    #[arg(long = "build")]
    build: bool,

    /// Path to the configuration file.
    #[arg(long = "config", default_value = "config.toml")]
    config: PathBuf,
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                return;
            }
        };
        let mut quit = match signal(SignalKind::quit()) {
            Ok(sig) => sig,
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGQUIT handler");
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
            _ = quit.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let cli = Cli::parse();

    if cli.build {
        let template = config::template();
        std::fs::write(&cli.config, template).with_context(|| format!("writing template config to {}", cli.config.display()))?;
        tracing::info!(path = %cli.config.display(), "wrote template configuration");
        return Ok(());
    }

    if let Err(err) = run(cli.config).await {
        tracing::error!(error = %err, "fatal error");
        std::process::exit(1);
    }
    Ok(())
}

async fn run(config_path: PathBuf) -> Result<()> {
    let initial = config::load(&config_path).with_context(|| format!("loading config from {}", config_path.display()))?;

    let broker = Broker::new();
    let metrics = MetricsStore::new();
    let service = Arc::new(BindingService::new());

    let bindings = config::build_bindings(&initial, &broker, &metrics).context("validating initial config")?;
    service.start(bindings).context("starting initial binding set")?;

    let api_cancel = CancellationToken::new();
    let api_handle = tokio::spawn(api::serve(initial.api_port, Arc::clone(&service), metrics.clone(), api_cancel.clone()));

    let watcher_cancel = CancellationToken::new();
    let mut reload_rx =
        config::spawn_watcher(config_path, CONFIG_POLL_INTERVAL, broker.clone(), metrics.clone(), watcher_cancel.clone());

    tracing::info!("flowbridge started");
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut reload_channel_closed = false;
    loop {
        tokio::select! {
            () = &mut shutdown => {
                tracing::info!("shutdown signal received");
                break;
            }
            new_bindings = reload_rx.recv(), if !reload_channel_closed => {
                match new_bindings {
                    Some(bindings) => {
                        tracing::info!("reloading binding set from changed config");
                        if let Err(err) = service.reload(bindings).await {
                            tracing::error!(error = %err, "error restarting service with new config file");
                        }
                    }
                    None => {
                        tracing::warn!("config watcher task exited, no further hot-reloads will occur");
                        reload_channel_closed = true;
                    }
                }
            }
        }
    }

    watcher_cancel.cancel();
    api_cancel.cancel();
    service.stop().await;
    let _ = api_handle.await;
    Ok(())
}
