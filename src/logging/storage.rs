// Storage - writes tracked events to disk in JSON Lines format
//
// One file per proxy run: zroute-YYYYMMDD-HHMMSS-XXXX.jsonl
// Example: jq 'select(.type == "route_decided") | .target' logs/zroute-*.jsonl

use crate::events::TrackedEvent;
use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

/// Drains the event channel into the run's log file
pub struct Storage {
    path: PathBuf,
    file: File,
    event_rx: mpsc::Receiver<TrackedEvent>,
}

impl Storage {
    pub fn new(log_dir: &Path, run_id: &str, event_rx: mpsc::Receiver<TrackedEvent>) -> Result<Self> {
        fs::create_dir_all(log_dir)
            .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

        let path = log_dir.join(format!("zroute-{}.jsonl", run_id));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open event log {}", path.display()))?;

        Ok(Self {
            path,
            file,
            event_rx,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write events until every sender is dropped
    pub async fn run(mut self) -> Result<()> {
        tracing::info!("Event log: {}", self.path.display());

        while let Some(event) = self.event_rx.recv().await {
            if let Err(e) = self.write_event(&event) {
                tracing::error!("Failed to write event: {:?}", e);
            }
        }

        tracing::debug!("Event log writer shutting down");
        Ok(())
    }

    fn write_event(&mut self, event: &TrackedEvent) -> Result<()> {
        let json = serde_json::to_string(event).context("Failed to serialize event")?;
        writeln!(self.file, "{}", json).context("Failed to write to event log")?;
        // Flushed per event so the log is readable while the proxy runs
        self.file.flush().context("Failed to flush event log")?;
        Ok(())
    }
}
