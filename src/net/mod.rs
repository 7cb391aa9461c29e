//! Network acquisition layer.
//!
//! Everything between a source adapter and the wire: per-source rate
//! limiting, the rotating proxy pool, and the retrying fetch wrapper
//! that every outbound call goes through.

pub mod fetcher;
pub mod proxy;
pub mod rate_limiter;

pub use fetcher::{BrowserSession, FetchPolicy, RetryingFetcher};
pub use proxy::{HttpProber, ProxyPool, ProxyPoolStats, ProxyProber};
pub use rate_limiter::RateLimiter;
