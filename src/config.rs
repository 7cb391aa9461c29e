//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API keys) are referenced by env-var name in the config and
//! resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub app: AppSection,
    pub proxy: ProxySettings,
    pub reference: ReferenceConfig,
    #[serde(default)]
    pub rate_limits: Vec<RateLimitConfig>,
    #[serde(default)]
    pub groups: HashMap<String, GroupConfig>,
    pub sources: HashMap<String, SourceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppSection {
    pub name: String,
    /// Seconds between arbitrage recomputations.
    pub analysis_interval_secs: u64,
    /// Directory for snapshot and opportunity JSON files.
    pub output_dir: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProxySettings {
    pub enabled: bool,
    /// Newline-delimited proxy list (`host:port` or scheme-qualified).
    pub file: String,
    /// Probe endpoint for health checks.
    #[serde(default = "default_probe_url")]
    pub probe_url: String,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
    /// Probe every proxy at pool construction.
    #[serde(default)]
    pub health_check: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReferenceConfig {
    /// Source key of the reference (sell-side) marketplace.
    pub source: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    pub key: String,
    pub max_calls: usize,
    pub window_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GroupConfig {
    /// Worker pool size when the group is launched together.
    pub workers: usize,
}

/// Per-source configuration surface.
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    /// Base endpoint (adapters append query parameters / page numbers).
    pub endpoint: String,
    /// Seconds between fetch cycles for this source.
    pub cadence_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub use_proxy: bool,
    /// Minimum profitability ratio for opportunities from this source.
    #[serde(default = "default_threshold")]
    pub min_profitability: f64,
    /// Named execution group ("fast", "slow", "steam", ...).
    #[serde(default = "default_group")]
    pub group: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Env-var name holding this source's API key, if it needs one.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            cadence_secs: 60,
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay(),
            timeout_secs: default_timeout(),
            use_proxy: false,
            min_profitability: default_threshold(),
            group: default_group(),
            enabled: true,
            api_key_env: None,
        }
    }
}

fn default_probe_url() -> String {
    "http://httpbin.org/ip".to_string()
}

fn default_probe_timeout() -> u64 {
    5
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_delay() -> u64 {
    2
}

fn default_timeout() -> u64 {
    10
}

fn default_threshold() -> f64 {
    0.5
}

fn default_group() -> String {
    "default".to_string()
}

fn default_enabled() -> bool {
    true
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Keys of enabled sources belonging to the given group.
    pub fn group_members(&self, group: &str) -> Vec<String> {
        let mut members: Vec<String> = self
            .sources
            .iter()
            .filter(|(_, cfg)| cfg.enabled && cfg.group == group)
            .map(|(key, _)| key.clone())
            .collect();
        members.sort();
        members
    }

    /// Worker pool size for a group (defaults to the member count).
    pub fn group_workers(&self, group: &str) -> usize {
        self.groups
            .get(group)
            .map(|g| g.workers)
            .unwrap_or_else(|| self.group_members(group).len().max(1))
    }
}
