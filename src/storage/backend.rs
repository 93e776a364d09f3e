//! Storage backend contract
//!
//! Every tier - fast KV, vector index, durable archive - implements the
//! same contract so the router can compose them without knowing which
//! engine sits behind a call. Methods are async: each call is a suspension
//! point on the shared worker pool.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::Result;
use crate::persona::Persona;
use crate::types::{MemoryItem, MemoryQuery};

/// Statistics reported by a backend
#[derive(Debug, Clone, Default)]
pub struct BackendStats {
    /// Backend name ("fast_kv", "vector", "durable")
    pub backend: String,
    /// Whether the backend is reachable
    pub connected: bool,
    /// Total items held
    pub item_count: u64,
    /// Engine-specific details
    pub details: HashMap<String, serde_json::Value>,
}

/// Health probe result
#[derive(Debug, Clone)]
pub struct BackendHealth {
    pub healthy: bool,
    /// Latency of a trivial operation in milliseconds
    pub latency_ms: f64,
    pub error: Option<String>,
}

impl Default for BackendHealth {
    fn default() -> Self {
        Self {
            healthy: true,
            latency_ms: 0.0,
            error: None,
        }
    }
}

/// The storage contract shared by all tiers
///
/// `store` is an upsert by id and must not leave partial observable state
/// on failure. `delete` is idempotent. `search` interprets the query as far
/// as the engine allows: the vector tier ranks by similarity, the fast tier
/// by importance, the durable tier by importance then recency.
#[async_trait]
pub trait MemoryBackend: Send + Sync {
    /// Prepare the backend; false marks it unavailable without failing the
    /// service
    async fn initialize(&self) -> Result<bool>;

    /// Upsert an item by id
    async fn store(&self, item: &MemoryItem) -> Result<()>;

    /// Fetch an item by id
    async fn retrieve(&self, id: &str) -> Result<Option<MemoryItem>>;

    /// Persona-scoped search
    async fn search(&self, query: &MemoryQuery, persona: Persona) -> Result<Vec<MemoryItem>>;

    /// Remove an item by id; returns whether it was present
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Backend statistics
    async fn stats(&self) -> BackendStats;

    /// Cheap health probe
    async fn health(&self) -> BackendHealth;

    /// Backend name for logs and health maps
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_health_default() {
        let health = BackendHealth::default();
        assert!(health.healthy);
        assert!(health.error.is_none());
    }

    #[test]
    fn test_backend_stats_default() {
        let stats = BackendStats::default();
        assert!(!stats.connected);
        assert_eq!(stats.item_count, 0);
    }
}
