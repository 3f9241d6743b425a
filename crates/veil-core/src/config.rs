//! Configuration for Veil.
//!
//! Explicit defaults, environment-variable loading, validation up front.
//! The server constructs stores from a validated config at startup;
//! nothing reads the environment after boot.

use crate::constants::*;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Which session-store backend to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Single-process in-memory store with a periodic sweep.
    #[default]
    Memory,
    /// Shared Redis store; required when multiple instances must agree.
    Redis,
}

impl std::str::FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(BackendKind::Memory),
            "redis" | "shared" => Ok(BackendKind::Redis),
            other => Err(Error::InvalidConfiguration {
                field: "backend".to_string(),
                reason: format!("unknown backend '{}', expected memory|redis", other),
            }),
        }
    }
}

/// Main configuration for Veil.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VeilConfig {
    /// Session-store backend selection.
    #[serde(default)]
    pub backend: BackendKind,

    /// Redis connection URL. Required when `backend` is `Redis`.
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Key prefix for the shared backend.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Session time-to-live in seconds.
    #[serde(default = "default_session_ttl_seconds")]
    pub session_ttl_seconds: u64,

    /// Maximum live timers per scope.
    #[serde(default = "default_timers_per_scope_max")]
    pub timers_per_scope_max: usize,

    /// Hard timer lifetime cap in hours (1-24).
    #[serde(default = "default_timer_lifetime_hours")]
    pub timer_lifetime_hours: u64,

    /// Rate limit: maximum actions per actor per window.
    #[serde(default = "default_rate_limit_actions_max")]
    pub rate_limit_actions_max: u32,

    /// Rate limit window in seconds.
    #[serde(default = "default_rate_limit_window_seconds")]
    pub rate_limit_window_seconds: u64,

    /// Hex-encoded Ed25519 public key for verifying HTTP-transport
    /// requests. Required to serve `POST /interactions`.
    #[serde(default)]
    pub public_key_hex: Option<String>,

    /// HTTP bind address.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Base URL of the outbound delivery API.
    #[serde(default = "default_delivery_base_url")]
    pub delivery_base_url: String,
}

fn default_key_prefix() -> String {
    KEY_PREFIX_DEFAULT.to_string()
}

fn default_session_ttl_seconds() -> u64 {
    SESSION_TTL_SECONDS_DEFAULT
}

fn default_timers_per_scope_max() -> usize {
    TIMERS_PER_SCOPE_MAX_DEFAULT
}

fn default_timer_lifetime_hours() -> u64 {
    TIMER_LIFETIME_HOURS_DEFAULT
}

fn default_rate_limit_actions_max() -> u32 {
    RATE_LIMIT_ACTIONS_MAX_DEFAULT
}

fn default_rate_limit_window_seconds() -> u64 {
    RATE_LIMIT_WINDOW_SECONDS_DEFAULT
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_delivery_base_url() -> String {
    "https://discord.com/api/v10".to_string()
}

impl Default for VeilConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            redis_url: None,
            key_prefix: default_key_prefix(),
            session_ttl_seconds: default_session_ttl_seconds(),
            timers_per_scope_max: default_timers_per_scope_max(),
            timer_lifetime_hours: default_timer_lifetime_hours(),
            rate_limit_actions_max: default_rate_limit_actions_max(),
            rate_limit_window_seconds: default_rate_limit_window_seconds(),
            public_key_hex: None,
            bind_address: default_bind_address(),
            delivery_base_url: default_delivery_base_url(),
        }
    }
}

impl VeilConfig {
    /// Load configuration from `VEIL_*` environment variables, falling
    /// back to defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(backend) = read_env("VEIL_BACKEND") {
            config.backend = backend.parse()?;
        }
        config.redis_url = read_env("VEIL_REDIS_URL");
        if let Some(prefix) = read_env("VEIL_KEY_PREFIX") {
            config.key_prefix = prefix;
        }
        if let Some(ttl) = read_env("VEIL_SESSION_TTL_SECONDS") {
            config.session_ttl_seconds = parse_env("VEIL_SESSION_TTL_SECONDS", &ttl)?;
        }
        if let Some(cap) = read_env("VEIL_TIMERS_PER_SCOPE_MAX") {
            config.timers_per_scope_max = parse_env("VEIL_TIMERS_PER_SCOPE_MAX", &cap)?;
        }
        if let Some(hours) = read_env("VEIL_TIMER_LIFETIME_HOURS") {
            config.timer_lifetime_hours = parse_env("VEIL_TIMER_LIFETIME_HOURS", &hours)?;
        }
        if let Some(max) = read_env("VEIL_RATE_LIMIT_ACTIONS_MAX") {
            config.rate_limit_actions_max = parse_env("VEIL_RATE_LIMIT_ACTIONS_MAX", &max)?;
        }
        if let Some(window) = read_env("VEIL_RATE_LIMIT_WINDOW_SECONDS") {
            config.rate_limit_window_seconds =
                parse_env("VEIL_RATE_LIMIT_WINDOW_SECONDS", &window)?;
        }
        config.public_key_hex = read_env("VEIL_PUBLIC_KEY");
        if let Some(bind) = read_env("VEIL_BIND_ADDRESS") {
            config.bind_address = bind;
        }
        if let Some(base) = read_env("VEIL_DELIVERY_BASE_URL") {
            config.delivery_base_url = base;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.backend == BackendKind::Redis && self.redis_url.is_none() {
            return Err(Error::InvalidConfiguration {
                field: "redis_url".to_string(),
                reason: "required when backend is redis".to_string(),
            });
        }
        if self.key_prefix.is_empty() || self.key_prefix.contains(':') {
            return Err(Error::InvalidConfiguration {
                field: "key_prefix".to_string(),
                reason: "must be non-empty and contain no ':'".to_string(),
            });
        }
        if self.session_ttl_seconds == 0 {
            return Err(Error::InvalidConfiguration {
                field: "session_ttl_seconds".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.timers_per_scope_max == 0 {
            return Err(Error::InvalidConfiguration {
                field: "timers_per_scope_max".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if !(TIMER_LIFETIME_HOURS_MIN..=TIMER_LIFETIME_HOURS_MAX)
            .contains(&self.timer_lifetime_hours)
        {
            return Err(Error::InvalidConfiguration {
                field: "timer_lifetime_hours".to_string(),
                reason: format!(
                    "must be within [{}, {}] hours",
                    TIMER_LIFETIME_HOURS_MIN, TIMER_LIFETIME_HOURS_MAX
                ),
            });
        }
        if self.rate_limit_actions_max == 0 || self.rate_limit_window_seconds == 0 {
            return Err(Error::InvalidConfiguration {
                field: "rate_limit".to_string(),
                reason: "actions max and window must be positive".to_string(),
            });
        }
        if !self.bind_address.contains(':') {
            return Err(Error::InvalidConfiguration {
                field: "bind_address".to_string(),
                reason: "must be in host:port format".to_string(),
            });
        }
        Ok(())
    }

    /// Timer lifetime cap in milliseconds.
    pub fn timer_lifetime_ms(&self) -> u64 {
        self.timer_lifetime_hours * 3_600_000
    }

    /// Session TTL in milliseconds.
    pub fn session_ttl_ms(&self) -> u64 {
        self.session_ttl_seconds * 1_000
    }
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| Error::InvalidConfiguration {
        field: name.to_string(),
        reason: format!("could not parse '{}'", value),
    })
}
