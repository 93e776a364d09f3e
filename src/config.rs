//! Flat settings bundle for the memory service
//!
//! Every knob can come from the environment (`MNEMOS_*`) or be filled in
//! programmatically; `validate` enforces the production-mode contract.

use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, Result};

fn default_durable_path() -> String {
    "mnemos.db".to_string()
}

fn default_ttl_working() -> u64 {
    3600
}

fn default_ttl_episodic() -> u64 {
    86_400
}

fn default_ttl_cache() -> u64 {
    300
}

fn default_consolidation_interval() -> u64 {
    300
}

fn default_pruning_interval() -> u64 {
    3600
}

fn default_rate_limit() -> u32 {
    1000
}

fn default_rate_window() -> u64 {
    60
}

fn default_token_ttl_hours() -> i64 {
    24
}

fn default_embedding_dimensions() -> usize {
    384
}

fn default_max_content_bytes() -> usize {
    1_000_000
}

fn default_true() -> bool {
    true
}

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Enable the fast in-memory KV tier
    #[serde(default = "default_true")]
    pub fast_kv_enabled: bool,
    /// Enable the vector index tier
    #[serde(default = "default_true")]
    pub vector_enabled: bool,
    /// Path to the durable SQLite store (":memory:" for tests)
    #[serde(default = "default_durable_path")]
    pub durable_path: String,

    /// Fast-tier TTL for working memory, seconds
    #[serde(default = "default_ttl_working")]
    pub ttl_working_secs: u64,
    /// Fast-tier TTL for episodic memory, seconds
    #[serde(default = "default_ttl_episodic")]
    pub ttl_episodic_secs: u64,
    /// Fast-tier cache TTL for semantic/procedural items, seconds.
    /// Also bounds local cache staleness.
    #[serde(default = "default_ttl_cache")]
    pub ttl_cache_secs: u64,

    /// Seconds between consolidation passes per persona
    #[serde(default = "default_consolidation_interval")]
    pub consolidation_interval_secs: u64,
    /// Seconds between forgetting-curve pruning passes per persona
    #[serde(default = "default_pruning_interval")]
    pub pruning_interval_secs: u64,
    /// Run the background lifecycle loops
    #[serde(default = "default_true")]
    pub lifecycle_enabled: bool,

    /// Sliding-window request limit per client key
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u32,
    /// Sliding-window width, seconds
    #[serde(default = "default_rate_window")]
    pub rate_window_secs: u64,

    /// Require tokens on every core operation
    #[serde(default)]
    pub auth_enabled: bool,
    /// Token lifetime, hours
    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: i64,

    /// Embedding vector dimension
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: usize,
    /// Maximum serialized content size accepted by `remember`
    #[serde(default = "default_max_content_bytes")]
    pub max_content_bytes: usize,

    /// Production mode: forces auth on and rejects insecure defaults
    #[serde(default)]
    pub production: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            fast_kv_enabled: true,
            vector_enabled: true,
            durable_path: default_durable_path(),
            ttl_working_secs: default_ttl_working(),
            ttl_episodic_secs: default_ttl_episodic(),
            ttl_cache_secs: default_ttl_cache(),
            consolidation_interval_secs: default_consolidation_interval(),
            pruning_interval_secs: default_pruning_interval(),
            lifecycle_enabled: true,
            rate_limit: default_rate_limit(),
            rate_window_secs: default_rate_window(),
            auth_enabled: false,
            token_ttl_hours: default_token_ttl_hours(),
            embedding_dimensions: default_embedding_dimensions(),
            max_content_bytes: default_max_content_bytes(),
            production: false,
        }
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v.to_lowercase() == "true" || v == "1")
        .unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Settings {
    /// Load settings from `MNEMOS_*` environment variables, filling gaps
    /// with defaults
    pub fn from_env() -> Self {
        let d = Settings::default();
        Self {
            fast_kv_enabled: env_bool("MNEMOS_FAST_KV_ENABLED", d.fast_kv_enabled),
            vector_enabled: env_bool("MNEMOS_VECTOR_ENABLED", d.vector_enabled),
            durable_path: std::env::var("MNEMOS_DURABLE_PATH").unwrap_or(d.durable_path),
            ttl_working_secs: env_parse("MNEMOS_TTL_WORKING", d.ttl_working_secs),
            ttl_episodic_secs: env_parse("MNEMOS_TTL_EPISODIC", d.ttl_episodic_secs),
            ttl_cache_secs: env_parse("MNEMOS_TTL_CACHE", d.ttl_cache_secs),
            consolidation_interval_secs: env_parse(
                "MNEMOS_CONSOLIDATION_INTERVAL",
                d.consolidation_interval_secs,
            ),
            pruning_interval_secs: env_parse("MNEMOS_PRUNING_INTERVAL", d.pruning_interval_secs),
            lifecycle_enabled: env_bool("MNEMOS_LIFECYCLE_ENABLED", d.lifecycle_enabled),
            rate_limit: env_parse("MNEMOS_RATE_LIMIT", d.rate_limit),
            rate_window_secs: env_parse("MNEMOS_RATE_WINDOW", d.rate_window_secs),
            auth_enabled: env_bool("MNEMOS_AUTH_ENABLED", d.auth_enabled),
            token_ttl_hours: env_parse("MNEMOS_TOKEN_TTL_HOURS", d.token_ttl_hours),
            embedding_dimensions: env_parse("MNEMOS_EMBEDDING_DIMENSIONS", d.embedding_dimensions),
            max_content_bytes: env_parse("MNEMOS_MAX_CONTENT_BYTES", d.max_content_bytes),
            production: env_bool("MNEMOS_PRODUCTION", d.production),
        }
    }

    /// Enforce invariants; production mode rejects insecure defaults.
    /// Returns the (possibly adjusted) settings.
    pub fn validate(mut self) -> Result<Self> {
        if self.rate_window_secs == 0 {
            return Err(MemoryError::Config("Rate window must be non-zero".into()));
        }
        if self.embedding_dimensions == 0 {
            return Err(MemoryError::Config(
                "Embedding dimension must be non-zero".into(),
            ));
        }
        if self.token_ttl_hours <= 0 {
            return Err(MemoryError::Config("Token TTL must be positive".into()));
        }

        if self.production {
            if !self.auth_enabled {
                tracing::warn!("Production mode forces auth_enabled=true");
                self.auth_enabled = true;
            }
            if self.durable_path == ":memory:" {
                return Err(MemoryError::Config(
                    "Production mode requires a persistent durable store".into(),
                ));
            }
            if self.rate_limit == 0 {
                return Err(MemoryError::Config(
                    "Production mode requires a non-zero rate limit".into(),
                ));
            }
        }

        Ok(self)
    }

    /// In-memory settings for tests: no disk, no background loops
    pub fn ephemeral() -> Self {
        Self {
            durable_path: ":memory:".to_string(),
            lifecycle_enabled: false,
            ..Settings::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default().validate().unwrap();
        assert_eq!(settings.ttl_working_secs, 3600);
        assert_eq!(settings.ttl_episodic_secs, 86_400);
        assert_eq!(settings.ttl_cache_secs, 300);
        assert!(!settings.auth_enabled);
    }

    #[test]
    fn test_production_forces_auth() {
        let settings = Settings {
            production: true,
            auth_enabled: false,
            durable_path: "/var/lib/mnemos/mnemos.db".into(),
            ..Settings::default()
        };
        let validated = settings.validate().unwrap();
        assert!(validated.auth_enabled);
    }

    #[test]
    fn test_production_rejects_memory_store() {
        let settings = Settings {
            production: true,
            durable_path: ":memory:".into(),
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_zero_window_rejected() {
        let settings = Settings {
            rate_window_secs: 0,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }
}
