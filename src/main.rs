// zroute - routing proxy for Claude Code
//
// Sits between Claude Code and its API. Main-session requests go to Anthropic;
// Task-tool subagents go to z.ai after their bodies are sanitized for it.
//
// Architecture:
// - Proxy server (axum): classifies, sanitizes and forwards each request
// - Tool tracker: counts subagent tool calls and injects escalating warnings
// - Event sink: structured per-request events over an mpsc channel
// - Storage: writes events to JSON Lines files for later analysis

mod cli;
mod config;
mod events;
mod logging;
mod proxy;
mod startup;

use anyhow::Result;
use logging::{EventSink, Storage};

#[tokio::main]
async fn main() -> Result<()> {
    // Handle CLI commands first (config, check); exit early if one ran
    if cli::handle_cli() {
        return Ok(());
    }

    // Ensure config template exists (helps users discover options)
    config::Config::ensure_config_exists();

    let config = cli::load_config_or_exit();

    // Guard flushes the file writer on drop; held until main returns
    let _log_guard = match logging::init_tracing(&config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };

    let run_id = events::generate_run_id();
    tracing::debug!("Run ID: {}", run_id);

    // Event log writer runs in the background; the proxy never waits on it
    let (events, storage_handle) = if config.events.enabled {
        let (sink, rx) = EventSink::channel(run_id.clone(), config.events.channel_buffer);
        match Storage::new(&config.events.dir, &run_id, rx) {
            Ok(storage) => (sink, Some(tokio::spawn(storage.run()))),
            Err(e) => {
                tracing::warn!("Event log disabled: {:#}", e);
                (EventSink::disabled(), None)
            }
        }
    } else {
        (EventSink::disabled(), None)
    };

    startup::print_startup(&config);
    startup::log_startup(&config);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let mut proxy_handle = tokio::spawn(proxy::start_proxy(config, events, shutdown_rx));

    tokio::select! {
        result = &mut proxy_handle => {
            // Proxy stopped on its own (bind failure, server error)
            match result {
                Ok(Err(e)) => {
                    tracing::error!("Proxy failed: {:#}", e);
                    eprintln!("Error: {:#}", e);
                    std::process::exit(1);
                }
                Err(e) => {
                    tracing::error!("Proxy task panicked: {}", e);
                    std::process::exit(1);
                }
                Ok(Ok(())) => {}
            }
        }
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                tracing::error!("Failed to listen for Ctrl+C: {}", e);
            }
            tracing::info!("Shutting down...");

            // If the send fails, the proxy has already shut down
            let _ = shutdown_tx.send(());
            match proxy_handle.await {
                Ok(Err(e)) => tracing::error!("Proxy error during shutdown: {:#}", e),
                Err(e) => tracing::error!("Proxy task panicked: {}", e),
                Ok(Ok(())) => {}
            }
        }
    }

    // The proxy state (and its event sender) is gone, so the writer drains and exits
    if let Some(handle) = storage_handle {
        match handle.await {
            Ok(Err(e)) => tracing::error!("Event log writer failed: {:#}", e),
            Err(e) => tracing::error!("Event log writer panicked: {}", e),
            Ok(Ok(())) => {}
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
