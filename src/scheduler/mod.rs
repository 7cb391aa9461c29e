//! Concurrent multi-source scheduler.
//!
//! Runs each configured source on its own cadence — anywhere from half a
//! minute to hours — while bounding in-flight fetches with a per-group
//! worker pool. A source's cycle is strictly sequential (cycle N+1 never
//! starts before cycle N resolves), one source's outage never blocks a
//! sibling, and a stop signal halts new cycles promptly while letting
//! in-flight requests finish.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{watch, Semaphore};
use tokio::time::Duration;
use tracing::{error, info, warn};

use crate::config::SourceConfig;
use crate::net::fetcher::RetryingFetcher;
use crate::sources::SourceRegistry;
use crate::storage::SnapshotStore;
use crate::types::{Snapshot, SourceState, SourceStatus};

/// Create a stop signal pair. Flip the sender to `true` to stop all
/// scheduler loops.
pub fn stop_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

pub struct Scheduler {
    registry: SourceRegistry,
    configs: HashMap<String, SourceConfig>,
    fetcher: Arc<RetryingFetcher>,
    store: Arc<dyn SnapshotStore>,
    statuses: Mutex<HashMap<String, SourceStatus>>,
    stop: watch::Receiver<bool>,
}

impl Scheduler {
    pub fn new(
        registry: SourceRegistry,
        configs: HashMap<String, SourceConfig>,
        fetcher: Arc<RetryingFetcher>,
        store: Arc<dyn SnapshotStore>,
        stop: watch::Receiver<bool>,
    ) -> Self {
        let statuses = registry
            .keys()
            .map(|key| (key.clone(), SourceStatus::default()))
            .collect();
        Self {
            registry,
            configs,
            fetcher,
            store,
            statuses: Mutex::new(statuses),
            stop,
        }
    }

    /// Current status of one source.
    pub fn status(&self, source: &str) -> Option<SourceStatus> {
        self.statuses.lock().unwrap().get(source).cloned()
    }

    /// Status of every registered source.
    pub fn statuses(&self) -> HashMap<String, SourceStatus> {
        self.statuses.lock().unwrap().clone()
    }

    fn set_state(&self, source: &str, state: SourceState) {
        if let Some(status) = self.statuses.lock().unwrap().get_mut(source) {
            status.state = state;
        }
    }

    fn note_failure(&self, source: &str) {
        if let Some(status) = self.statuses.lock().unwrap().get_mut(source) {
            status.record_failure();
        }
    }

    fn note_success(&self, source: &str, items: usize) {
        if let Some(status) = self.statuses.lock().unwrap().get_mut(source) {
            status.record_success(items);
        }
    }

    /// One fetch → validate/dedupe → publish cycle for one source.
    ///
    /// Failures are absorbed here: an empty or failed cycle leaves the
    /// previous snapshot in place and bumps the failure counter, nothing
    /// more.
    pub async fn run_cycle(&self, source: &str) {
        let adapter = match self.registry.get(source) {
            Some(a) => Arc::clone(a),
            None => {
                warn!(source, "Cycle requested for unregistered source");
                return;
            }
        };

        self.set_state(source, SourceState::Running);
        info!(source, "Cycle starting");

        match adapter.fetch_data(&self.fetcher).await {
            Ok(records) if !records.is_empty() => {
                let raw_count = records.len();
                let (snapshot, dropped) = Snapshot::from_records(records);
                if dropped > 0 {
                    warn!(source, dropped, "Invalid records discarded");
                }

                if snapshot.is_empty() {
                    warn!(source, raw_count, "All records failed validation");
                    self.note_failure(source);
                    return;
                }

                let items = snapshot.len();
                if let Err(e) = self.store.put_snapshot(source, &snapshot) {
                    error!(source, error = %e, "Failed to publish snapshot");
                    self.note_failure(source);
                    return;
                }

                info!(source, items, "Cycle complete, snapshot published");
                self.note_success(source, items);
            }
            Ok(_) => {
                warn!(source, "Cycle yielded no records");
                self.note_failure(source);
            }
            Err(e) => {
                error!(source, error = %e, "Cycle failed");
                self.note_failure(source);
            }
        }
    }

    /// Execute every listed source exactly once through a worker pool of
    /// the given size. Returns when all have resolved.
    pub async fn run_once(&self, sources: &[String], workers: usize) {
        let pool = Arc::new(Semaphore::new(workers.max(1)));
        let cycles = sources.iter().map(|source| {
            let pool = Arc::clone(&pool);
            async move {
                let _permit = pool.acquire().await.expect("semaphore never closed");
                self.run_cycle(source).await;
            }
        });
        futures::future::join_all(cycles).await;
        info!(count = sources.len(), "Run-once batch complete");
    }

    /// Run every listed source on its own cadence until the stop signal
    /// flips, with at most `workers` fetches in flight at once. Each
    /// source's loop is strictly sequential; a persistently failing
    /// source only ever occupies its own loop.
    pub async fn run_forever(&self, sources: &[String], workers: usize) {
        let pool = Arc::new(Semaphore::new(workers.max(1)));
        let loops = sources.iter().map(|source| {
            let pool = Arc::clone(&pool);
            self.source_loop(source, pool)
        });
        futures::future::join_all(loops).await;
        info!("All source loops stopped");
    }

    async fn source_loop(&self, source: &str, pool: Arc<Semaphore>) {
        let cadence = Duration::from_secs(
            self.configs
                .get(source)
                .map(|c| c.cadence_secs)
                .unwrap_or(60),
        );
        let mut stop = self.stop.clone();

        info!(source, cadence_secs = cadence.as_secs(), "Source loop starting");

        loop {
            if *stop.borrow() {
                break;
            }

            {
                let _permit = pool.acquire().await.expect("semaphore never closed");
                if *stop.borrow() {
                    break;
                }
                self.run_cycle(source).await;
            }

            tokio::select! {
                _ = tokio::time::sleep(cadence) => {}
                changed = stop.changed() => {
                    // A dropped sender means shutdown as well.
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(source, "Source loop stopped");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
