// Logging module - structured request events and tracing setup
//
// Two outputs leave the proxy:
// - `tracing` diagnostics (console, optional rolling file) configured by `init_tracing`
// - `ProxyEvent`s pushed through `EventSink` to the JSONL writer (`Storage`)
//
// The sink never waits: a full or closed channel drops the event.

mod storage;

pub use storage::Storage;

use crate::config::{LogRotation, LoggingConfig};
use crate::events::{ProxyEvent, TrackedEvent};
use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

// ─────────────────────────────────────────────────────────────────────────────
// Event Sink
// ─────────────────────────────────────────────────────────────────────────────

/// Fire-and-forget handle for structured events
#[derive(Debug, Clone)]
pub struct EventSink {
    run_id: String,
    tx: Option<mpsc::Sender<TrackedEvent>>,
}

impl EventSink {
    pub fn new(run_id: impl Into<String>, tx: mpsc::Sender<TrackedEvent>) -> Self {
        Self {
            run_id: run_id.into(),
            tx: Some(tx),
        }
    }

    /// Sink that discards everything (event log disabled)
    pub fn disabled() -> Self {
        Self {
            run_id: String::new(),
            tx: None,
        }
    }

    /// Create a sink together with the receiving end for `Storage`
    pub fn channel(run_id: impl Into<String>, buffer: usize) -> (Self, mpsc::Receiver<TrackedEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self::new(run_id, tx), rx)
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Queue an event without blocking; returns whether it was accepted
    pub fn emit(&self, event: ProxyEvent) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        match tx.try_send(TrackedEvent::new(self.run_id.clone(), event)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                tracing::trace!(
                    request_id = dropped.event.request_id(),
                    "Event channel full, dropping event"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::trace!("Event channel closed, dropping event");
                false
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tracing Setup
// ─────────────────────────────────────────────────────────────────────────────

/// Install the global subscriber
///
/// `RUST_LOG` wins over the configured level. When file output is enabled the
/// returned guard must live until exit or buffered lines are lost.
pub fn init_tracing(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
    };

    let console = if config.json {
        fmt::layer().json().with_filter(filter()).boxed()
    } else {
        fmt::layer().with_target(false).with_filter(filter()).boxed()
    };

    let (file_layer, guard) = if config.file_enabled {
        std::fs::create_dir_all(&config.file_dir).with_context(|| {
            format!("Failed to create log directory {}", config.file_dir.display())
        })?;
        let appender = match config.file_rotation {
            LogRotation::Hourly => {
                tracing_appender::rolling::hourly(&config.file_dir, &config.file_prefix)
            }
            LogRotation::Daily => {
                tracing_appender::rolling::daily(&config.file_dir, &config.file_prefix)
            }
            LogRotation::Never => {
                tracing_appender::rolling::never(&config.file_dir, &config.file_prefix)
            }
        };
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = fmt::layer()
            .json()
            .with_ansi(false)
            .with_writer(writer)
            .with_filter(filter())
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}
