//! Snapshot persistence boundary.
//!
//! The core produces and consumes per-source price snapshots; the storage
//! technology behind them is somebody else's problem. `JsonSnapshotStore`
//! keeps one JSON file per source, which is all the downstream tooling
//! needs. `MemorySnapshotStore` backs tests and embedded use.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, info};

use crate::types::Snapshot;

/// Per-source snapshot storage. `put_snapshot` fully replaces the
/// previous snapshot for that source.
pub trait SnapshotStore: Send + Sync {
    fn put_snapshot(&self, source: &str, snapshot: &Snapshot) -> Result<()>;
    fn get_snapshot(&self, source: &str) -> Result<Option<Snapshot>>;
}

// ---------------------------------------------------------------------------
// JSON file store
// ---------------------------------------------------------------------------

/// One `<source>_data.json` file per source under a data directory.
pub struct JsonSnapshotStore {
    dir: PathBuf,
}

impl JsonSnapshotStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create data dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn path_for(&self, source: &str) -> PathBuf {
        self.dir.join(format!("{}_data.json", source.to_lowercase()))
    }
}

impl SnapshotStore for JsonSnapshotStore {
    fn put_snapshot(&self, source: &str, snapshot: &Snapshot) -> Result<()> {
        let path = self.path_for(source);
        let json = serde_json::to_string_pretty(snapshot)
            .context("Failed to serialise snapshot")?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write snapshot to {}", path.display()))?;
        debug!(source, items = snapshot.len(), path = %path.display(), "Snapshot saved");
        Ok(())
    }

    fn get_snapshot(&self, source: &str) -> Result<Option<Snapshot>> {
        let path = self.path_for(source);
        if !path.exists() {
            info!(source, "No snapshot on disk yet");
            return Ok(None);
        }

        let json = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read snapshot from {}", path.display()))?;
        let snapshot: Snapshot = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse snapshot from {}", path.display()))?;
        Ok(Some(snapshot))
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Keeps snapshots in a map. Used by tests and single-process embedding.
#[derive(Default)]
pub struct MemorySnapshotStore {
    snapshots: RwLock<HashMap<String, Snapshot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn put_snapshot(&self, source: &str, snapshot: &Snapshot) -> Result<()> {
        self.snapshots
            .write()
            .unwrap()
            .insert(source.to_string(), snapshot.clone());
        Ok(())
    }

    fn get_snapshot(&self, source: &str) -> Result<Option<Snapshot>> {
        Ok(self.snapshots.read().unwrap().get(source).cloned())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
