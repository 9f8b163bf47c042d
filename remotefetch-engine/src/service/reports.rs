//! Report sinks
//!
//! Every pipeline run produces exactly one report, which the executor hands
//! to a sink once the task's bookkeeping is done.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use remotefetch_core::domain::report::FetchRunReport;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, mpsc};

/// Receives finished run reports
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn deliver(&self, report: FetchRunReport) -> Result<()>;
}

/// Forwards reports to an unbounded channel
#[derive(Clone)]
pub struct ChannelReportSink {
    sender: mpsc::UnboundedSender<FetchRunReport>,
}

impl ChannelReportSink {
    /// Creates a sink together with the receiving end of its channel
    pub fn new() -> (Self, mpsc::UnboundedReceiver<FetchRunReport>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl ReportSink for ChannelReportSink {
    async fn deliver(&self, report: FetchRunReport) -> Result<()> {
        self.sender
            .send(report)
            .map_err(|_| anyhow!("report receiver was dropped"))
    }
}

/// Appends reports to a file, one JSON document per line
pub struct JsonLinesReportSink {
    path: PathBuf,
    // Serializes appends so lines never interleave
    write_lock: Mutex<()>,
}

impl JsonLinesReportSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ReportSink for JsonLinesReportSink {
    async fn deliver(&self, report: FetchRunReport) -> Result<()> {
        let mut line = serde_json::to_vec(&report).context("Failed to encode run report")?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open report file {}", self.path.display()))?;

        file.write_all(&line)
            .await
            .context("Failed to append run report")?;
        file.flush().await?;
        Ok(())
    }
}
