//! Configuration management for the relay service

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::warn;

use crate::rate_limiter::DEFAULT_MAX_TRACKED_KEYS;

/// Default World ID developer portal verification endpoint
pub const DEFAULT_VERIFY_ENDPOINT: &str = "https://developer.worldcoin.org/api/v1/verify";

/// Deployment environment; controls whether error detail reaches clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Some(Environment::Development),
            "production" | "prod" => Some(Environment::Production),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// World ID application identifier
    pub app_id: String,

    /// Developer portal API key, sent as a bearer token
    pub api_key: String,

    /// Verification authority endpoint
    pub verify_endpoint: String,

    /// Address the HTTP server binds to
    pub listen_addr: SocketAddr,

    /// Upstream request timeout in seconds
    pub request_timeout_secs: u64,

    /// Maximum verification attempts per client within the window
    pub rate_limit_max_requests: usize,

    /// Rate limit window in milliseconds
    pub rate_limit_window_ms: u64,

    /// Disable only for trusted, fronted deployments
    pub rate_limit_enabled: bool,

    /// Cap on distinct clients tracked by the rate limiter
    pub rate_limit_max_tracked_keys: usize,

    /// How often stale rate limit windows are pruned, in seconds
    pub rate_limit_prune_interval_secs: u64,

    /// Require `0x` + 64 hex for merkle root and nullifier hash
    pub enforce_hash_format: bool,

    /// Accepted actions; empty accepts any
    pub allowed_actions: Vec<String>,

    /// Key rate limiting on the first `X-Forwarded-For` entry
    pub trust_forwarded_for: bool,

    /// Maximum accepted request body size in bytes
    pub max_body_bytes: u64,

    pub environment: Environment,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_id: "app_staging_your_app_id_here".to_string(),
            api_key: String::new(),
            verify_endpoint: DEFAULT_VERIFY_ENDPOINT.to_string(),
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            request_timeout_secs: 10,
            rate_limit_max_requests: 10,
            rate_limit_window_ms: 60_000,
            rate_limit_enabled: true,
            rate_limit_max_tracked_keys: DEFAULT_MAX_TRACKED_KEYS,
            rate_limit_prune_interval_secs: 60,
            enforce_hash_format: true,
            allowed_actions: vec![],
            trust_forwarded_for: false,
            max_body_bytes: 64 * 1024, // 64 KiB
            environment: Environment::Production,
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    pub fn load(path: &str) -> Result<Self> {
        let mut config = if std::path::Path::new(path).exists() {
            let contents = fs::read_to_string(path)?;
            toml::from_str(&contents)?
        } else {
            Config::default()
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(app_id) = env::var("WORLDCOIN_APP_ID") {
            self.app_id = app_id;
        }

        if let Ok(key) = env::var("WORLDCOIN_API_KEY") {
            self.api_key = key;
        }

        if let Ok(endpoint) = env::var("WORLDID_VERIFY_ENDPOINT") {
            self.verify_endpoint = endpoint;
        }

        if let Ok(addr) = env::var("LISTEN_ADDR") {
            match addr.parse() {
                Ok(addr) => self.listen_addr = addr,
                Err(e) => warn!("Ignoring invalid LISTEN_ADDR {}: {}", addr, e),
            }
        }

        if let Ok(secs) = env::var("REQUEST_TIMEOUT_SECS") {
            if let Ok(secs) = secs.parse() {
                self.request_timeout_secs = secs;
            }
        }

        if let Ok(max) = env::var("RATE_LIMIT_MAX_REQUESTS") {
            if let Ok(max) = max.parse() {
                self.rate_limit_max_requests = max;
            }
        }

        if let Ok(window) = env::var("RATE_LIMIT_WINDOW_MS") {
            if let Ok(window) = window.parse() {
                self.rate_limit_window_ms = window;
            }
        }

        if let Ok(max) = env::var("RATE_LIMIT_MAX_TRACKED_KEYS") {
            if let Ok(max) = max.parse() {
                self.rate_limit_max_tracked_keys = max;
            }
        }

        if let Ok(enabled) = env::var("RATE_LIMIT_ENABLED") {
            if let Some(enabled) = parse_bool(&enabled) {
                self.rate_limit_enabled = enabled;
            }
        }

        if let Ok(enforce) = env::var("ENFORCE_HASH_FORMAT") {
            if let Some(enforce) = parse_bool(&enforce) {
                self.enforce_hash_format = enforce;
            }
        }

        if let Ok(actions) = env::var("ALLOWED_ACTIONS") {
            self.allowed_actions = actions
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        if let Ok(trust) = env::var("TRUST_FORWARDED_FOR") {
            if let Some(trust) = parse_bool(&trust) {
                self.trust_forwarded_for = trust;
            }
        }

        if let Ok(max) = env::var("MAX_BODY_BYTES") {
            if let Ok(max) = max.parse() {
                self.max_body_bytes = max;
            }
        }

        if let Ok(app_env) = env::var("APP_ENV") {
            match Environment::parse(&app_env) {
                Some(environment) => self.environment = environment,
                None => warn!("Ignoring unknown APP_ENV {}", app_env),
            }
        }
    }

    /// Validate configuration values.
    ///
    /// A missing API key is not an error: the process starts and every
    /// upstream call fails authentication instead.
    pub fn validate(&self) -> Result<()> {
        if self.app_id.trim().is_empty() {
            return Err(anyhow::anyhow!("World ID app id is required"));
        }

        if self.verify_endpoint.trim().is_empty() {
            return Err(anyhow::anyhow!("Verification endpoint is required"));
        }

        if self.request_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Request timeout must be greater than zero"));
        }

        if self.rate_limit_max_requests == 0 || self.rate_limit_window_ms == 0 {
            return Err(anyhow::anyhow!("Rate limit and window must be greater than zero"));
        }

        if self.rate_limit_max_tracked_keys == 0 {
            return Err(anyhow::anyhow!("Rate limiter must track at least one client"));
        }

        if self.api_key.is_empty() {
            warn!("WORLDCOIN_API_KEY is not set; upstream verification calls will be rejected");
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_millis(self.rate_limit_window_ms)
    }

    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
