//! Rotating egress proxy pool with health tracking and recovery.
//!
//! Per-proxy state machine: healthy ⇄ failed(count, last_fail) →
//! permanently removed once the failure count reaches 10. A failed proxy
//! becomes recoverable after a 5-minute cool-down, and only while its
//! failure count is still below 5.
//!
//! Pool sizes are small (tens to hundreds), so one mutex guards all
//! mutation; probes run outside the lock.

use async_trait::async_trait;
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Failure count at which a proxy is deleted from the pool for good.
const PERMANENT_REMOVAL_THRESHOLD: u32 = 10;

/// A proxy with this many failures (or more) is never re-probed.
const RECOVERY_MAX_FAILURES: u32 = 5;

/// How long a failed proxy must rest before a recovery probe.
const RECOVERY_COOLDOWN: Duration = Duration::from_secs(5 * 60);

// ---------------------------------------------------------------------------
// Probing
// ---------------------------------------------------------------------------

/// Health probe for a single proxy.
///
/// Separated behind a trait so the pool can be exercised in tests without
/// touching the network.
#[async_trait]
pub trait ProxyProber: Send + Sync {
    /// Whether a request through `proxy` currently succeeds.
    async fn probe(&self, proxy: &str) -> bool;
}

/// Probes by fetching a known endpoint through the proxy.
pub struct HttpProber {
    probe_url: String,
    timeout: Duration,
}

impl HttpProber {
    pub fn new(probe_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            probe_url: probe_url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ProxyProber for HttpProber {
    async fn probe(&self, proxy: &str) -> bool {
        let client = match reqwest::Client::builder()
            .timeout(self.timeout)
            .proxy(match reqwest::Proxy::all(proxy) {
                Ok(p) => p,
                Err(_) => return false,
            })
            .build()
        {
            Ok(c) => c,
            Err(_) => return false,
        };

        match client.get(&self.probe_url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct FailureRecord {
    count: u32,
    last_fail: Instant,
}

#[derive(Default)]
struct PoolState {
    /// Every proxy the pool still knows about (superset of `available`).
    all: Vec<String>,
    /// Proxies currently offerable. Never contains duplicates.
    available: Vec<String>,
    failed: HashMap<String, FailureRecord>,
    requests_made: u64,
    failures: u64,
}

/// Pool statistics for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct ProxyPoolStats {
    pub total: usize,
    pub available: usize,
    pub failed: usize,
    pub requests_made: u64,
    pub failures: u64,
    pub health_pct: f64,
}

/// Rotating proxy pool shared by all source fetch loops.
pub struct ProxyPool {
    state: Mutex<PoolState>,
    prober: Arc<dyn ProxyProber>,
}

impl ProxyPool {
    /// Build a pool from raw proxy entries. Entries are normalized; blank
    /// ones are dropped.
    pub fn new(raw: Vec<String>, prober: Arc<dyn ProxyProber>) -> Self {
        let all: Vec<String> = raw.iter().filter_map(|p| Self::normalize(p)).collect();
        info!(count = all.len(), "Proxy pool initialised");
        Self {
            state: Mutex::new(PoolState {
                available: all.clone(),
                all,
                ..PoolState::default()
            }),
            prober,
        }
    }

    /// Load a pool from a newline-delimited file. Blank lines and lines
    /// starting with `#` are ignored.
    pub fn from_file(path: impl AsRef<Path>, prober: Arc<dyn ProxyProber>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read proxy list {}: {e}", path.display())
        })?;
        let raw: Vec<String> = contents
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(String::from)
            .collect();
        Ok(Self::new(raw, prober))
    }

    /// Ensure a scheme prefix. `host:port` becomes `http://host:port`.
    pub fn normalize(raw: &str) -> Option<String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        let has_scheme = ["http://", "https://", "socks4://", "socks5://"]
            .iter()
            .any(|s| raw.starts_with(s));
        if has_scheme {
            Some(raw.to_string())
        } else {
            Some(format!("http://{raw}"))
        }
    }

    /// Probe every proxy once and keep only the working ones available.
    /// Non-responders get their first failure mark.
    pub async fn initial_health_check(&self) {
        let all = {
            let state = self.state.lock().unwrap();
            state.all.clone()
        };
        info!(count = all.len(), "Running initial proxy health check");

        let mut working = Vec::new();
        let mut dead = Vec::new();
        for proxy in all {
            if self.prober.probe(&proxy).await {
                working.push(proxy);
            } else {
                dead.push(proxy);
            }
        }

        let mut state = self.state.lock().unwrap();
        info!(
            working = working.len(),
            total = state.all.len(),
            "Initial health check complete"
        );
        state.available = working;
        let now = Instant::now();
        for proxy in dead {
            state.failed.insert(
                proxy,
                FailureRecord {
                    count: 1,
                    last_fail: now,
                },
            );
        }
    }

    /// Hand out a proxy: uniform random pick, then rotated to the tail so
    /// back-to-back reuse is avoided. When nothing is available, stale
    /// failures are given a recovery attempt first.
    pub async fn acquire(&self) -> Option<String> {
        {
            let mut state = self.state.lock().unwrap();
            state.requests_made += 1;
            if let Some(proxy) = Self::pick(&mut state) {
                return Some(proxy);
            }
        }

        // Pool empty — try to bring stale failures back before giving up.
        self.recover_stale().await;

        let mut state = self.state.lock().unwrap();
        match Self::pick(&mut state) {
            Some(proxy) => Some(proxy),
            None => {
                warn!("No proxies available");
                None
            }
        }
    }

    fn pick(state: &mut PoolState) -> Option<String> {
        if state.available.is_empty() {
            return None;
        }
        let idx = rand::thread_rng().gen_range(0..state.available.len());
        let proxy = state.available.remove(idx);
        state.available.push(proxy.clone());
        Some(proxy)
    }

    /// Record a failure. At 10 failures the proxy is deleted permanently.
    pub fn mark_failed(&self, proxy: &str) {
        let mut state = self.state.lock().unwrap();
        state.failures += 1;
        state.available.retain(|p| p != proxy);

        let count = {
            let record = state
                .failed
                .entry(proxy.to_string())
                .or_insert(FailureRecord {
                    count: 0,
                    last_fail: Instant::now(),
                });
            record.count += 1;
            record.last_fail = Instant::now();
            record.count
        };

        debug!(proxy, failures = count, "Proxy marked failed");

        if count >= PERMANENT_REMOVAL_THRESHOLD {
            warn!(proxy, "Proxy removed permanently");
            state.all.retain(|p| p != proxy);
            state.failed.remove(proxy);
        }
    }

    /// Record a success: failure count decays by one, and the failure
    /// record clears once it reaches zero.
    pub fn mark_success(&self, proxy: &str) {
        let mut state = self.state.lock().unwrap();
        let cleared = match state.failed.get_mut(proxy) {
            Some(record) => {
                record.count = record.count.saturating_sub(1);
                record.count == 0
            }
            None => false,
        };
        if cleared {
            state.failed.remove(proxy);
        }
    }

    /// Re-probe failed proxies whose last failure is older than the
    /// cool-down and whose count is still below the recovery ceiling.
    /// Recovered proxies return to the available list with their failure
    /// count relaxed by two.
    pub async fn recover_stale(&self) {
        let candidates: Vec<String> = {
            let state = self.state.lock().unwrap();
            let now = Instant::now();
            state
                .failed
                .iter()
                .filter(|(_, rec)| {
                    now.duration_since(rec.last_fail) > RECOVERY_COOLDOWN
                        && rec.count < RECOVERY_MAX_FAILURES
                })
                .map(|(proxy, _)| proxy.clone())
                .collect()
        };

        for proxy in candidates {
            info!(proxy = %proxy, "Attempting proxy recovery");
            let alive = self.prober.probe(&proxy).await;

            let mut state = self.state.lock().unwrap();
            if alive {
                if state.all.contains(&proxy) && !state.available.contains(&proxy) {
                    state.available.push(proxy.clone());
                }
                if let Some(record) = state.failed.get_mut(&proxy) {
                    record.count = record.count.saturating_sub(2);
                }
                info!(proxy = %proxy, "Proxy recovered");
            } else if let Some(record) = state.failed.get_mut(&proxy) {
                record.last_fail = Instant::now();
            }
        }
    }

    /// Best proxies for priority use: never-failed entries first, then
    /// ascending failure count. Diagnostic only.
    pub fn best_proxies(&self, count: usize) -> Vec<String> {
        let state = self.state.lock().unwrap();

        let mut best: Vec<String> = state
            .available
            .iter()
            .filter(|p| !state.failed.contains_key(*p))
            .take(count)
            .cloned()
            .collect();

        if best.len() < count {
            let mut flaky: Vec<(&String, u32)> = state
                .failed
                .iter()
                .filter(|(p, _)| state.available.contains(*p))
                .map(|(p, rec)| (p, rec.count))
                .collect();
            flaky.sort_by_key(|(_, c)| *c);

            for (proxy, _) in flaky {
                if best.len() >= count {
                    break;
                }
                best.push(proxy.clone());
            }
        }

        best
    }

    pub fn stats(&self) -> ProxyPoolStats {
        let state = self.state.lock().unwrap();
        let total = state.all.len();
        ProxyPoolStats {
            total,
            available: state.available.len(),
            failed: state.failed.len(),
            requests_made: state.requests_made,
            failures: state.failures,
            health_pct: if total > 0 {
                state.available.len() as f64 / total as f64 * 100.0
            } else {
                0.0
            },
        }
    }

    /// Failure count for a proxy (0 when unknown). Test/diagnostic helper.
    pub fn failure_count(&self, proxy: &str) -> u32 {
        let state = self.state.lock().unwrap();
        state.failed.get(proxy).map(|r| r.count).unwrap_or(0)
    }

    /// Whether the proxy is still part of the pool at all.
    pub fn contains(&self, proxy: &str) -> bool {
        let state = self.state.lock().unwrap();
        state.all.iter().any(|p| p == proxy)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic prober with a fixed answer.
    struct StaticProber(bool);

    #[async_trait]
    impl ProxyProber for StaticProber {
        async fn probe(&self, _proxy: &str) -> bool {
            self.0
        }
    }

    fn pool(raw: &[&str]) -> ProxyPool {
        ProxyPool::new(
            raw.iter().map(|s| s.to_string()).collect(),
            Arc::new(StaticProber(true)),
        )
    }

    // -- Normalization --

    #[test]
    fn test_normalize_adds_scheme() {
        assert_eq!(
            ProxyPool::normalize("1.2.3.4:8080"),
            Some("http://1.2.3.4:8080".to_string())
        );
    }

    #[test]
    fn test_normalize_keeps_existing_scheme() {
        assert_eq!(
            ProxyPool::normalize("socks5://1.2.3.4:1080"),
            Some("socks5://1.2.3.4:1080".to_string())
        );
        assert_eq!(
            ProxyPool::normalize("https://1.2.3.4:443"),
            Some("https://1.2.3.4:443".to_string())
        );
    }

    #[test]
    fn test_normalize_blank() {
        assert_eq!(ProxyPool::normalize("   "), None);
        assert_eq!(ProxyPool::normalize(""), None);
    }

    #[test]
    fn test_all_stored_proxies_have_scheme() {
        let p = pool(&["1.1.1.1:80", "https://2.2.2.2:443", "3.3.3.3:8080"]);
        let state = p.state.lock().unwrap();
        for proxy in &state.all {
            assert!(proxy.contains("://"), "missing scheme: {proxy}");
        }
    }

    // -- Acquire / rotation --

    #[tokio::test]
    async fn test_acquire_rotates_to_tail() {
        let p = pool(&["1.1.1.1:80", "2.2.2.2:80", "3.3.3.3:80"]);
        let got = p.acquire().await.unwrap();
        let state = p.state.lock().unwrap();
        assert_eq!(state.available.last(), Some(&got));
        assert_eq!(state.available.len(), 3);
    }

    #[tokio::test]
    async fn test_acquire_empty_pool_returns_none() {
        let p = pool(&[]);
        assert!(p.acquire().await.is_none());
    }

    // -- Failure accounting --

    #[tokio::test]
    async fn test_mark_failed_removes_from_available() {
        let p = pool(&["1.1.1.1:80", "2.2.2.2:80"]);
        p.mark_failed("http://1.1.1.1:80");
        let state = p.state.lock().unwrap();
        assert_eq!(state.available, vec!["http://2.2.2.2:80"]);
        assert_eq!(state.all.len(), 2);
    }

    #[tokio::test]
    async fn test_ten_failures_is_permanent() {
        let p = pool(&["1.1.1.1:80"]);
        for _ in 0..10 {
            p.mark_failed("http://1.1.1.1:80");
        }
        assert!(!p.contains("http://1.1.1.1:80"));
        assert_eq!(p.failure_count("http://1.1.1.1:80"), 0); // record cleared
        assert!(p.acquire().await.is_none());
    }

    #[tokio::test]
    async fn test_mark_success_decays_failures() {
        let p = pool(&["1.1.1.1:80"]);
        p.mark_failed("http://1.1.1.1:80");
        p.mark_failed("http://1.1.1.1:80");
        assert_eq!(p.failure_count("http://1.1.1.1:80"), 2);

        p.mark_success("http://1.1.1.1:80");
        assert_eq!(p.failure_count("http://1.1.1.1:80"), 1);

        p.mark_success("http://1.1.1.1:80");
        assert_eq!(p.failure_count("http://1.1.1.1:80"), 0);
        // Record cleared entirely at zero.
        assert!(!p.state.lock().unwrap().failed.contains_key("http://1.1.1.1:80"));
    }

    #[test]
    fn test_mark_success_never_goes_negative() {
        let p = pool(&["1.1.1.1:80"]);
        p.mark_success("http://1.1.1.1:80");
        p.mark_success("http://1.1.1.1:80");
        assert_eq!(p.failure_count("http://1.1.1.1:80"), 0);
    }

    // -- Recovery --

    #[tokio::test(start_paused = true)]
    async fn test_recovery_after_cooldown() {
        let p = pool(&["1.1.1.1:80"]);
        p.mark_failed("http://1.1.1.1:80");
        assert!(p.acquire().await.is_none());

        // Cool-down not yet elapsed: still nothing.
        tokio::time::advance(Duration::from_secs(60)).await;
        p.recover_stale().await;
        assert!(p.state.lock().unwrap().available.is_empty());

        // Past the 5-minute cool-down the proxy is re-probed and returns.
        tokio::time::advance(Duration::from_secs(5 * 60)).await;
        p.recover_stale().await;
        assert_eq!(p.acquire().await, Some("http://1.1.1.1:80".to_string()));
        // Relaxed by two, floored at zero.
        assert_eq!(p.failure_count("http://1.1.1.1:80"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_recovery_at_five_failures() {
        let p = pool(&["1.1.1.1:80"]);
        for _ in 0..5 {
            p.mark_failed("http://1.1.1.1:80");
        }
        tokio::time::advance(Duration::from_secs(10 * 60)).await;
        p.recover_stale().await;
        assert!(p.state.lock().unwrap().available.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_probe_restamps_cooldown() {
        let p = ProxyPool::new(
            vec!["1.1.1.1:80".to_string()],
            Arc::new(StaticProber(false)),
        );
        p.mark_failed("http://1.1.1.1:80");

        tokio::time::advance(Duration::from_secs(6 * 60)).await;
        p.recover_stale().await;
        // Probe failed — proxy stays out and its cool-down restarts.
        assert!(p.state.lock().unwrap().available.is_empty());

        tokio::time::advance(Duration::from_secs(60)).await;
        p.recover_stale().await;
        assert!(p.state.lock().unwrap().available.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovered_proxy_not_duplicated() {
        let p = pool(&["1.1.1.1:80"]);
        p.mark_failed("http://1.1.1.1:80");
        tokio::time::advance(Duration::from_secs(6 * 60)).await;
        p.recover_stale().await;
        p.recover_stale().await;
        let state = p.state.lock().unwrap();
        assert_eq!(state.available.len(), 1);
        assert!(state.available.len() <= state.all.len());
    }

    // -- Health check --

    #[tokio::test]
    async fn test_initial_health_check_partitions() {
        let p = ProxyPool::new(
            vec!["1.1.1.1:80".to_string(), "2.2.2.2:80".to_string()],
            Arc::new(StaticProber(false)),
        );
        p.initial_health_check().await;
        let stats = p.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.available, 0);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.health_pct, 0.0);
    }

    // -- Best proxies --

    #[tokio::test]
    async fn test_best_proxies_prefers_never_failed() {
        let p = pool(&["1.1.1.1:80", "2.2.2.2:80", "3.3.3.3:80"]);
        // Fail proxy 1 twice but keep it available via a manual re-add
        // (simulating a recovery).
        p.mark_failed("http://1.1.1.1:80");
        p.mark_failed("http://1.1.1.1:80");
        p.state
            .lock()
            .unwrap()
            .available
            .push("http://1.1.1.1:80".to_string());

        let best = p.best_proxies(3);
        assert_eq!(best.len(), 3);
        // The flaky proxy comes last.
        assert_eq!(best[2], "http://1.1.1.1:80");
    }

    #[test]
    fn test_stats_health_pct() {
        let p = pool(&["1.1.1.1:80", "2.2.2.2:80"]);
        p.mark_failed("http://1.1.1.1:80");
        let stats = p.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.available, 1);
        assert!((stats.health_pct - 50.0).abs() < 1e-10);
    }

    // -- File loading --

    #[test]
    fn test_from_file_skips_comments_and_blanks() {
        let mut path = std::env::temp_dir();
        path.push(format!("skimmer_proxy_test_{}.txt", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            "# fleet A\n1.1.1.1:80\n\n  \nhttps://2.2.2.2:443\n# trailing comment\n",
        )
        .unwrap();

        let p = ProxyPool::from_file(&path, Arc::new(StaticProber(true))).unwrap();
        let stats = p.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.available, 2);

        std::fs::remove_file(&path).unwrap();
    }
}
