//! Downstream boundaries: opportunity sinks and the out-of-band alert path.
//!
//! Formatting and delivery across channels (Telegram, Discord, ...) live
//! outside the core; the core only hands a ranked opportunity list to a
//! sink and pushes unexpected fetch errors onto the alert channel.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::types::Opportunity;

// ---------------------------------------------------------------------------
// Opportunity sinks
// ---------------------------------------------------------------------------

/// Consumer of the ranked opportunity list. Each publish supersedes the
/// previous active set.
pub trait OpportunitySink: Send + Sync {
    fn publish(&self, opportunities: &[Opportunity]) -> Result<()>;
}

/// Writes the ranked list to a JSON file, replacing the previous one.
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl OpportunitySink for JsonFileSink {
    fn publish(&self, opportunities: &[Opportunity]) -> Result<()> {
        let json = serde_json::to_string_pretty(opportunities)
            .context("Failed to serialise opportunities")?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        info!(
            count = opportunities.len(),
            path = %self.path.display(),
            "Opportunities published"
        );
        Ok(())
    }
}

/// Logs the best opportunities; useful as a default sink.
pub struct LogSink {
    pub top: usize,
}

impl OpportunitySink for LogSink {
    fn publish(&self, opportunities: &[Opportunity]) -> Result<()> {
        if opportunities.is_empty() {
            info!("No profitable opportunities this cycle");
            return Ok(());
        }
        info!(count = opportunities.len(), "Profitable opportunities found");
        for opp in opportunities.iter().take(self.top) {
            info!(
                item = %opp.item_name,
                source = %opp.source,
                buy = format!("${:.2}", opp.buy_price),
                net = format!("${:.2}", opp.net_reference_price),
                profitability = format!("{:.2}%", opp.profitability_pct()),
                "Opportunity"
            );
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

/// An out-of-band alert about an unexpected failure. Ordinary timeouts
/// never become alerts.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub source_key: String,
    pub message: String,
}

/// Cheap cloneable handle for pushing alerts from any task.
#[derive(Clone)]
pub struct AlertSender {
    tx: mpsc::UnboundedSender<Alert>,
}

impl AlertSender {
    pub fn send(&self, source_key: &str, message: impl Into<String>) {
        let alert = Alert {
            source_key: source_key.to_string(),
            message: message.into(),
        };
        // A closed receiver just means the drain task is gone at shutdown.
        let _ = self.tx.send(alert);
    }
}

/// Create an alert channel and spawn a task that drains it into the log.
/// External delivery integrations subscribe here instead.
pub fn spawn_alert_log() -> AlertSender {
    let (tx, mut rx) = mpsc::unbounded_channel::<Alert>();
    tokio::spawn(async move {
        while let Some(alert) = rx.recv().await {
            error!(
                source = %alert.source_key,
                message = %alert.message,
                "ALERT: unexpected source failure"
            );
        }
    });
    AlertSender { tx }
}

/// Create an alert channel without a drain task; the caller owns the
/// receiver. Used by tests and external notifier integrations.
pub fn alert_channel() -> (AlertSender, mpsc::UnboundedReceiver<Alert>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (AlertSender { tx }, rx)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
