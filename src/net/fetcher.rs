//! Retrying HTTP fetch layer.
//!
//! Every outbound call from every source adapter goes through here:
//! rate-limit admission first, then the request with a rotated realistic
//! User-Agent and a per-request timeout, optionally through a pool proxy.
//! Transient failures (timeout, connection errors, 429, 5xx) are retried
//! with linear backoff and a fresh proxy; other 4xx responses are
//! permanent for the cycle and not retried. After exhausting retries the
//! fetch resolves to `None` — callers treat that as "no data this cycle",
//! never as fatal.

use async_trait::async_trait;
use rand::seq::SliceRandom;
use reqwest::{Client, Method, StatusCode};
use std::sync::{Arc, Mutex};
use tokio::time::Duration;
use tracing::{debug, error, warn};

use crate::net::proxy::ProxyPool;
use crate::net::rate_limiter::RateLimiter;
use crate::notify::AlertSender;
use crate::types::{FetchStats, SkimmerError};

/// Realistic desktop User-Agents, rotated per attempt.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:120.0) Gecko/20100101 Firefox/120.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
];

/// Stateful transport for sources that need a real browser session
/// (anti-bot walls a bare HTTP client cannot pass). Driver lifecycle is
/// owned by the integration, not the core.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Navigate to `url` and return the page's JSON body.
    async fn get_json(&self, url: &str) -> anyhow::Result<String>;
}

/// Per-call fetch behaviour, derived from the source's configuration.
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub timeout: Duration,
    pub use_proxy: bool,
    /// Extra headers the marketplace expects (Referer, Origin, auth).
    pub headers: Vec<(String, String)>,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_delay: Duration::from_secs(2),
            timeout: Duration::from_secs(10),
            use_proxy: false,
            headers: Vec::new(),
        }
    }
}

impl FetchPolicy {
    pub fn from_source(cfg: &crate::config::SourceConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            retry_delay: Duration::from_secs(cfg.retry_delay_secs),
            timeout: Duration::from_secs(cfg.timeout_secs),
            use_proxy: cfg.use_proxy,
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }
}

/// Shared fetch wrapper: one instance per process, injected into every
/// source adapter through the scheduler.
pub struct RetryingFetcher {
    limiter: Arc<RateLimiter>,
    proxies: Option<Arc<ProxyPool>>,
    alerts: Option<AlertSender>,
    base_client: Client,
    stats: Mutex<FetchStats>,
}

impl RetryingFetcher {
    pub fn new(
        limiter: Arc<RateLimiter>,
        proxies: Option<Arc<ProxyPool>>,
        alerts: Option<AlertSender>,
    ) -> anyhow::Result<Self> {
        let base_client = Client::builder()
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {e}"))?;
        Ok(Self {
            limiter,
            proxies,
            alerts,
            base_client,
            stats: Mutex::new(FetchStats::default()),
        })
    }

    fn random_user_agent() -> &'static str {
        USER_AGENTS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(USER_AGENTS[0])
    }

    /// Proxied attempts need their own client — reqwest binds proxies at
    /// client construction, not per request.
    fn client_for(&self, proxy: Option<&str>) -> Option<Client> {
        match proxy {
            None => Some(self.base_client.clone()),
            Some(url) => {
                let proxy = reqwest::Proxy::all(url).ok()?;
                Client::builder().proxy(proxy).build().ok()
            }
        }
    }

    fn record_request(&self) {
        self.stats.lock().unwrap().requests_made += 1;
    }

    fn record_failure(&self, error: &str) {
        let mut stats = self.stats.lock().unwrap();
        stats.requests_failed += 1;
        stats.last_error = Some(error.to_string());
    }

    pub fn stats(&self) -> FetchStats {
        self.stats.lock().unwrap().clone()
    }

    /// Execute one HTTP call for `source_key` under the full guard stack.
    ///
    /// Returns the successful response, or `None` once retries are
    /// exhausted or a permanent (non-429 4xx) response is seen.
    pub async fn fetch(
        &self,
        source_key: &str,
        method: Method,
        url: &str,
        policy: &FetchPolicy,
    ) -> Option<reqwest::Response> {
        self.limiter.wait_if_needed(source_key).await;

        let mut proxy: Option<String> = if policy.use_proxy {
            match &self.proxies {
                Some(pool) => {
                    let acquired = pool.acquire().await;
                    if acquired.is_none() {
                        // Proceed bare rather than skipping the cycle.
                        warn!(source = source_key, "{}", SkimmerError::ProxyExhausted);
                    }
                    acquired
                }
                None => None,
            }
        } else {
            None
        };

        for attempt in 1..=policy.max_retries {
            self.record_request();

            let client = match self.client_for(proxy.as_deref()) {
                Some(c) => c,
                None => {
                    // A proxy URL reqwest refuses to parse is useless;
                    // drop it and continue bare.
                    if let (Some(pool), Some(p)) = (&self.proxies, proxy.take()) {
                        pool.mark_failed(&p);
                    }
                    self.base_client.clone()
                }
            };

            let mut request = client
                .request(method.clone(), url)
                .timeout(policy.timeout)
                .header("User-Agent", Self::random_user_agent())
                .header("Accept", "application/json")
                .header("Accept-Language", "en-US,en;q=0.9");
            for (name, value) in &policy.headers {
                request = request.header(name.as_str(), value.as_str());
            }

            match request.send().await {
                Ok(resp) if resp.status().is_success() => {
                    debug!(source = source_key, url, attempt, "Request succeeded");
                    if let (Some(pool), Some(p)) = (&self.proxies, proxy.as_deref()) {
                        pool.mark_success(p);
                    }
                    return Some(resp);
                }
                Ok(resp) if Self::is_permanent(resp.status()) => {
                    let err = SkimmerError::Permanent {
                        source_key: source_key.to_string(),
                        message: format!("HTTP {}", resp.status()),
                    };
                    warn!(url, "{err} — not retrying this cycle");
                    self.record_failure(&err.to_string());
                    return None;
                }
                Ok(resp) => {
                    // 429 / 5xx: transient, worth another attempt.
                    let err = SkimmerError::Transient {
                        source_key: source_key.to_string(),
                        message: format!("HTTP {}", resp.status()),
                    };
                    warn!(url, attempt, max = policy.max_retries, "{err}");
                    self.record_failure(&err.to_string());
                    proxy = self.rotate_failed_proxy(proxy, policy).await;
                }
                Err(e) if e.is_timeout() || e.is_connect() || e.is_request() => {
                    let err = SkimmerError::Transient {
                        source_key: source_key.to_string(),
                        message: e.to_string(),
                    };
                    warn!(url, attempt, max = policy.max_retries, "{err}");
                    self.record_failure(&err.to_string());
                    proxy = self.rotate_failed_proxy(proxy, policy).await;
                }
                Err(e) => {
                    // Not a transport problem — escalate, timeouts excluded.
                    error!(source = source_key, url, error = %e, "Unexpected fetch error");
                    self.record_failure(&e.to_string());
                    if let Some(alerts) = &self.alerts {
                        alerts.send(source_key, e.to_string());
                    }
                    proxy = self.rotate_failed_proxy(proxy, policy).await;
                }
            }

            if attempt < policy.max_retries {
                let backoff = policy.retry_delay * attempt;
                debug!(source = source_key, secs = backoff.as_secs(), "Backing off");
                tokio::time::sleep(backoff).await;
            }
        }

        error!(
            source = source_key,
            url,
            retries = policy.max_retries,
            "Fetch failed after all retries"
        );
        None
    }

    /// Run a browser-session transport under the same admission, retry
    /// cap and backoff as plain HTTP, so browser-driven sources honour
    /// the identical contract.
    pub async fn fetch_browser(
        &self,
        source_key: &str,
        session: &dyn BrowserSession,
        url: &str,
        policy: &FetchPolicy,
    ) -> Option<String> {
        self.limiter.wait_if_needed(source_key).await;

        for attempt in 1..=policy.max_retries {
            self.record_request();

            match session.get_json(url).await {
                Ok(body) => {
                    debug!(source = source_key, url, attempt, "Browser fetch succeeded");
                    return Some(body);
                }
                Err(e) => {
                    warn!(
                        source = source_key,
                        url,
                        attempt,
                        max = policy.max_retries,
                        error = %e,
                        "Browser fetch failed"
                    );
                    self.record_failure(&e.to_string());
                    let message = e.to_string();
                    if !message.to_lowercase().contains("timeout") {
                        if let Some(alerts) = &self.alerts {
                            alerts.send(source_key, message);
                        }
                    }
                }
            }

            if attempt < policy.max_retries {
                tokio::time::sleep(policy.retry_delay * attempt).await;
            }
        }

        error!(
            source = source_key,
            url,
            retries = policy.max_retries,
            "Browser fetch failed after all retries"
        );
        None
    }

    /// Non-429 4xx means the request itself is wrong for this cycle
    /// (bad path, auth, gone) — retrying would only hammer the endpoint.
    fn is_permanent(status: StatusCode) -> bool {
        status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS
    }

    /// Mark the used proxy failed and draw a replacement for the next
    /// attempt.
    async fn rotate_failed_proxy(
        &self,
        proxy: Option<String>,
        policy: &FetchPolicy,
    ) -> Option<String> {
        let pool = match (&self.proxies, policy.use_proxy) {
            (Some(pool), true) => pool,
            _ => return None,
        };
        if let Some(p) = proxy {
            pool.mark_failed(&p);
        }
        pool.acquire().await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::alert_channel;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_permanent_status_classification() {
        assert!(RetryingFetcher::is_permanent(StatusCode::NOT_FOUND));
        assert!(RetryingFetcher::is_permanent(StatusCode::FORBIDDEN));
        assert!(RetryingFetcher::is_permanent(StatusCode::BAD_REQUEST));
        assert!(!RetryingFetcher::is_permanent(StatusCode::TOO_MANY_REQUESTS));
        assert!(!RetryingFetcher::is_permanent(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!RetryingFetcher::is_permanent(StatusCode::BAD_GATEWAY));
        assert!(!RetryingFetcher::is_permanent(StatusCode::OK));
    }

    #[test]
    fn test_user_agent_rotation_pool() {
        let ua = RetryingFetcher::random_user_agent();
        assert!(USER_AGENTS.contains(&ua));
        assert!(ua.starts_with("Mozilla/5.0"));
    }

    #[test]
    fn test_policy_from_source_config() {
        let cfg = crate::config::SourceConfig {
            max_retries: 7,
            retry_delay_secs: 3,
            timeout_secs: 20,
            use_proxy: true,
            ..crate::config::SourceConfig::default()
        };
        let policy = FetchPolicy::from_source(&cfg);
        assert_eq!(policy.max_retries, 7);
        assert_eq!(policy.retry_delay, Duration::from_secs(3));
        assert_eq!(policy.timeout, Duration::from_secs(20));
        assert!(policy.use_proxy);
    }

    #[test]
    fn test_policy_with_header() {
        let policy = FetchPolicy::default().with_header("Referer", "https://cs.deals/");
        assert_eq!(
            policy.headers,
            vec![("Referer".to_string(), "https://cs.deals/".to_string())]
        );
    }

    /// Browser session that fails a fixed number of times before serving.
    struct FlakySession {
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl BrowserSession for FlakySession {
        async fn get_json(&self, _url: &str) -> anyhow::Result<String> {
            if self.failures_left.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                n.checked_sub(1)
            }).is_ok()
            {
                anyhow::bail!("page load timeout");
            }
            Ok(r#"{"items":[]}"#.to_string())
        }
    }

    fn fetcher() -> RetryingFetcher {
        RetryingFetcher::new(Arc::new(RateLimiter::new()), None, None).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_browser_fetch_retries_then_succeeds() {
        let f = fetcher();
        let session = FlakySession {
            failures_left: AtomicU32::new(2),
        };
        let policy = FetchPolicy {
            max_retries: 5,
            retry_delay: Duration::from_secs(1),
            ..FetchPolicy::default()
        };

        let body = f
            .fetch_browser("manncostore", &session, "https://mannco.store/items/get", &policy)
            .await;
        assert_eq!(body.as_deref(), Some(r#"{"items":[]}"#));

        let stats = f.stats();
        assert_eq!(stats.requests_made, 3);
        assert_eq!(stats.requests_failed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_browser_fetch_exhaustion_returns_none() {
        let f = fetcher();
        let session = FlakySession {
            failures_left: AtomicU32::new(u32::MAX),
        };
        let policy = FetchPolicy {
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            ..FetchPolicy::default()
        };

        let body = f
            .fetch_browser("manncostore", &session, "https://mannco.store/items/get", &policy)
            .await;
        assert!(body.is_none());
        assert_eq!(f.stats().requests_failed, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_browser_timeout_not_alerted() {
        let (alerts, mut rx) = alert_channel();
        let f = RetryingFetcher::new(Arc::new(RateLimiter::new()), None, Some(alerts)).unwrap();
        let session = FlakySession {
            failures_left: AtomicU32::new(u32::MAX),
        };
        let policy = FetchPolicy {
            max_retries: 2,
            retry_delay: Duration::from_secs(1),
            ..FetchPolicy::default()
        };

        let _ = f
            .fetch_browser("manncostore", &session, "https://mannco.store/items/get", &policy)
            .await;
        // The session fails with a timeout message — no alert crosses.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_fetch_respects_rate_limit_stamp() {
        let limiter = Arc::new(RateLimiter::new());
        limiter.add_limit("k", 5, 60);
        let f = RetryingFetcher::new(Arc::clone(&limiter), None, None).unwrap();

        // An unroutable URL fails fast; what matters is that the
        // admission was stamped before the attempt.
        let policy = FetchPolicy {
            max_retries: 1,
            retry_delay: Duration::from_millis(1),
            timeout: Duration::from_millis(50),
            ..FetchPolicy::default()
        };
        let _ = f
            .fetch("k", Method::GET, "http://127.0.0.1:1/none", &policy)
            .await;

        assert!(limiter.can_make_request("k"));
        assert_eq!(f.stats().requests_made, 1);
        assert_eq!(f.stats().requests_failed, 1);
    }
}
