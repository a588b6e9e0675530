use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use myriad_box::Board;
use myriad_box::Config;
use myriad_box::Coordinator;
use myriad_box::Registry;
use myriad_box::api;
use myriad_box::api::AppState;
use myriad_box::config::ConfigError;
use myriad_box::format_diagnostics;
use myriad_box::logging;
use myriad_box::providers;
use tokio::sync::oneshot;
use tracing::error;
use tracing::info;
use tracing::warn;

/// Aggregate public data feeds into periodically refreshed sensor values
#[derive(Parser, Debug)]
#[command(name = "myriad_box", version, about, long_about = None)]
struct Args {
    /// Configuration file. May be repeated; earlier files win on conflicts
    #[arg(short, long, value_name = "PATH", default_value = "myriad_box.toml")]
    config: Vec<PathBuf>,

    /// Address for the HTTP API, overriding [api] listen
    #[arg(long, value_name = "ADDR")]
    listen: Option<String>,

    /// Port for the HTTP API, overriding [api] port
    #[arg(long)]
    port: Option<u16>,
}

/// Load and validate configuration, printing diagnostics to stderr.
fn load_config(paths: &[PathBuf], registry: &Registry) -> anyhow::Result<Config> {
    match Config::from_files(paths, registry) {
        Ok((config, warnings)) => {
            if !warnings.is_empty() {
                eprint!("{}", format_diagnostics(&warnings));
            }
            Ok(config)
        }
        Err(ConfigError::Invalid(diagnostics)) => {
            eprint!("{}", format_diagnostics(&diagnostics));
            let errors = diagnostics.iter().filter(|d| d.is_error()).count();
            anyhow::bail!("configuration has {} error(s)", errors)
        }
        Err(e) => Err(e.into()),
    }
}

fn reload(paths: &[PathBuf], registry: &Registry, coordinator: &Coordinator) {
    info!("Reloading configuration from {:?}", paths);

    let config = match load_config(paths, registry) {
        Ok(config) => config,
        Err(e) => {
            error!("Keeping current configuration: {:#}", e);
            return;
        }
    };

    let failures = coordinator.apply(&config.providers);
    if failures.is_empty() {
        info!("Configuration reloaded");
    } else {
        warn!(
            "Configuration reloaded, {} provider change(s) rejected",
            failures.len()
        );
    }
}

/// Reload requests, delivered by SIGHUP.
#[cfg(unix)]
struct Reloads(tokio::signal::unix::Signal);

#[cfg(unix)]
impl Reloads {
    fn listen() -> std::io::Result<Self> {
        use tokio::signal::unix::SignalKind;
        use tokio::signal::unix::signal;

        Ok(Self(signal(SignalKind::hangup())?))
    }

    async fn recv(&mut self) -> Option<()> {
        self.0.recv().await
    }
}

#[cfg(not(unix))]
struct Reloads;

#[cfg(not(unix))]
impl Reloads {
    fn listen() -> std::io::Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) -> Option<()> {
        std::future::pending().await
    }
}

/// Wait for Ctrl+C, reloading configuration on every reload request.
async fn run_until_shutdown(
    mut reloads: Reloads,
    paths: &[PathBuf],
    registry: &Registry,
    coordinator: &Coordinator,
) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Received shutdown signal");
                return Ok(());
            }
            Some(()) = reloads.recv() => reload(paths, registry, coordinator),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let registry = Arc::new(providers::default_registry());
    let config = load_config(&args.config, &registry)?;

    logging::init(&config.logging);
    // SIGHUP terminates the process until a handler exists.
    let reloads = Reloads::listen()?;

    info!("myriad_box {} starting", env!("CARGO_PKG_VERSION"));
    info!("Loaded config from: {:?}", args.config);
    info!("Available providers: {}", registry.all_ids().join(", "));

    let coordinator = Arc::new(Coordinator::new(registry.clone(), &config.http)?);
    let board = Board::new(coordinator.clone());
    let board_task = board.spawn();

    // Serve before the first fetches so sensors can be read as "loading".
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let listen = args.listen.unwrap_or_else(|| config.api.listen.clone());
    let port = args.port.unwrap_or(config.api.port);
    let state = AppState::new(coordinator.clone(), board.clone());
    let mut api_task =
        tokio::spawn(async move { api::serve(&listen, port, state, shutdown_rx).await });

    coordinator.initialize(&config.providers).await?;
    info!(
        "All providers started ({} enabled), press Ctrl+C to exit",
        coordinator.enabled_ids().len()
    );

    let api_finished = tokio::select! {
        result = run_until_shutdown(reloads, &args.config, &registry, &coordinator) => {
            if let Err(e) = result {
                error!("Failed to listen for signals: {}", e);
            }
            false
        }
        result = &mut api_task => {
            match result {
                Ok(Ok(())) => warn!("HTTP API server exited"),
                Ok(Err(e)) => error!("HTTP API server failed: {:#}", e),
                Err(e) => error!("HTTP API task failed: {}", e),
            }
            true
        }
    };

    info!("Shutting down");
    let _ = shutdown_tx.send(());
    coordinator.shutdown().await;
    board_task.abort();

    if !api_finished {
        match api_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("HTTP API server failed: {:#}", e),
            Err(e) => error!("HTTP API task failed: {}", e),
        }
    }

    info!("myriad_box shutdown complete");
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use std::process::Command;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_hangup_is_queued_until_read() {
        let mut reloads = Reloads::listen().unwrap();

        let status = Command::new("kill")
            .args(["-HUP", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        let received = tokio::time::timeout(Duration::from_secs(5), reloads.recv()).await;
        assert_eq!(received.unwrap(), Some(()));
    }
}
