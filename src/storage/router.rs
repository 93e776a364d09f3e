//! Hybrid storage router
//!
//! Picks backends per (kind, operation), keeps a small local TTL cache, and
//! merges multi-tier search results. Drivers never reference the router;
//! availability is tracked here so a transient driver failure cannot poison
//! the routing decision.
//!
//! Write policy by kind:
//! - working:    fast KV, else durable
//! - episodic:   fast KV primary; durable archive only when importance > 0.5
//! - semantic:   vector primary, fast KV as cache; durable when vector is down
//! - procedural: vector primary, durable always (canonical)

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::error::{MemoryError, Result};
use crate::persona::Persona;
use crate::storage::backend::{BackendStats, MemoryBackend};
use crate::storage::durable::{DurableFilter, DurableStore};
use crate::storage::fast_kv::FastKvStore;
use crate::storage::vector::VectorStore;
use crate::types::{HealthState, MemoryItem, MemoryKind, MemoryQuery, ServiceHealth};

const CACHE_MAX_ENTRIES: usize = 1000;

/// Importance above which an episodic write is archived to durable.
/// Strictly greater: 0.5 exactly stays in the fast tier only.
const EPISODIC_ARCHIVE_THRESHOLD: f32 = 0.5;

#[derive(Debug, Clone)]
struct CacheEntry {
    item: MemoryItem,
    expires_at: DateTime<Utc>,
}

/// Router counters
#[derive(Debug, Default)]
pub struct RouterCounters {
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub cache_invalidations: AtomicU64,
    pub writes: AtomicU64,
    pub searches: AtomicU64,
}

/// Routes operations across the fast, vector, and durable tiers
pub struct HybridRouter {
    fast: Option<Arc<FastKvStore>>,
    vector: Option<Arc<VectorStore>>,
    durable: Arc<DurableStore>,
    fast_available: AtomicBool,
    vector_available: AtomicBool,
    durable_available: AtomicBool,
    cache: DashMap<String, CacheEntry>,
    cache_ttl: Duration,
    counters: RouterCounters,
}

impl HybridRouter {
    pub fn new(
        fast: Option<Arc<FastKvStore>>,
        vector: Option<Arc<VectorStore>>,
        durable: Arc<DurableStore>,
        cache_ttl_secs: u64,
    ) -> Self {
        Self {
            fast,
            vector,
            durable,
            fast_available: AtomicBool::new(false),
            vector_available: AtomicBool::new(false),
            durable_available: AtomicBool::new(false),
            cache: DashMap::new(),
            cache_ttl: Duration::seconds(cache_ttl_secs.max(1) as i64),
            counters: RouterCounters::default(),
        }
    }

    /// Initialize every configured driver. The router functions as long as
    /// the durable tier comes up; secondary failures only log.
    pub async fn initialize(&self) -> Result<bool> {
        let durable_ok = self.durable.initialize().await.unwrap_or(false);
        self.durable_available.store(durable_ok, Ordering::SeqCst);

        if let Some(fast) = &self.fast {
            match fast.initialize().await {
                Ok(ok) => self.fast_available.store(ok, Ordering::SeqCst),
                Err(e) => tracing::warn!(error = %e, "Fast KV initialization failed"),
            }
        }
        if let Some(vector) = &self.vector {
            match vector.initialize().await {
                Ok(ok) => self.vector_available.store(ok, Ordering::SeqCst),
                Err(e) => tracing::warn!(error = %e, "Vector initialization failed"),
            }
        }

        tracing::info!(
            fast = self.fast_up(),
            vector = self.vector_up(),
            durable = durable_ok,
            "Hybrid router initialized"
        );
        Ok(durable_ok)
    }

    fn fast_up(&self) -> bool {
        self.fast.is_some() && self.fast_available.load(Ordering::SeqCst)
    }

    fn vector_up(&self) -> bool {
        self.vector.is_some() && self.vector_available.load(Ordering::SeqCst)
    }

    fn durable_up(&self) -> bool {
        self.durable_available.load(Ordering::SeqCst)
    }

    /// Force a driver offline (used by tests and admin tooling)
    pub fn set_fast_available(&self, up: bool) {
        self.fast_available.store(up, Ordering::SeqCst);
    }

    pub fn set_vector_available(&self, up: bool) {
        self.vector_available.store(up, Ordering::SeqCst);
    }

    pub fn counters(&self) -> &RouterCounters {
        &self.counters
    }

    // ------------------------------------------------------------------
    // Cache
    // ------------------------------------------------------------------

    fn cache_get(&self, id: &str) -> Option<MemoryItem> {
        let now = Utc::now();
        if let Some(entry) = self.cache.get(id) {
            if entry.expires_at > now {
                self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.item.clone());
            }
        }
        // Expired entries are dropped on the miss path
        self.cache.remove_if(id, |_, e| e.expires_at <= now);
        self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    fn cache_put(&self, item: &MemoryItem) {
        if self.cache.len() >= CACHE_MAX_ENTRIES {
            self.evict_cache();
        }
        self.cache.insert(
            item.id.clone(),
            CacheEntry {
                item: item.clone(),
                expires_at: Utc::now() + self.cache_ttl,
            },
        );
    }

    /// Drop expired entries; if still over capacity, drop the soonest to
    /// expire
    fn evict_cache(&self) {
        let now = Utc::now();
        self.cache.retain(|_, e| e.expires_at > now);
        while self.cache.len() >= CACHE_MAX_ENTRIES {
            let victim = self
                .cache
                .iter()
                .min_by_key(|e| e.value().expires_at)
                .map(|e| e.key().clone());
            match victim {
                Some(id) => {
                    self.cache.remove(&id);
                }
                None => break,
            }
        }
    }

    /// Invalidate the local cache entry for an id
    pub fn invalidate(&self, id: &str) {
        if self.cache.remove(id).is_some() {
            self.counters
                .cache_invalidations
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Route a write by kind. The primary write must succeed; secondary
    /// failures log, except the mandatory durable write for procedural
    /// items.
    pub async fn store(&self, item: &MemoryItem) -> Result<()> {
        self.counters.writes.fetch_add(1, Ordering::Relaxed);
        self.invalidate(&item.id);

        match item.kind {
            MemoryKind::Working => self.store_working(item).await?,
            MemoryKind::Episodic => self.store_episodic(item).await?,
            MemoryKind::Semantic => self.store_semantic(item).await?,
            MemoryKind::Procedural => self.store_procedural(item).await?,
        }

        self.cache_put(item);
        Ok(())
    }

    async fn store_working(&self, item: &MemoryItem) -> Result<()> {
        if self.fast_up() {
            if let Some(fast) = &self.fast {
                match fast.store(item).await {
                    Ok(()) => return Ok(()),
                    Err(e) => tracing::warn!(id = %item.id, error = %e, "Fast KV write failed, falling back to durable"),
                }
            }
        }
        self.durable_write(item).await
    }

    async fn store_episodic(&self, item: &MemoryItem) -> Result<()> {
        let mut primary_ok = false;
        if self.fast_up() {
            if let Some(fast) = &self.fast {
                match fast.store(item).await {
                    Ok(()) => primary_ok = true,
                    Err(e) => tracing::warn!(id = %item.id, error = %e, "Fast KV episodic write failed"),
                }
            }
        }

        // Archive important episodes regardless of the fast-tier outcome
        if item.importance > EPISODIC_ARCHIVE_THRESHOLD {
            if let Err(e) = self.durable_write(item).await {
                if primary_ok {
                    tracing::warn!(id = %item.id, error = %e, "Episodic durable archive failed");
                } else {
                    return Err(e);
                }
            }
            return Ok(());
        }

        if primary_ok {
            Ok(())
        } else {
            self.durable_write(item).await
        }
    }

    async fn store_semantic(&self, item: &MemoryItem) -> Result<()> {
        if self.vector_up() {
            if let Some(vector) = &self.vector {
                match vector.store(item).await {
                    Ok(()) => {
                        // Hot-recall cache; failure is harmless
                        if self.fast_up() {
                            if let Some(fast) = &self.fast {
                                if let Err(e) = fast.store(item).await {
                                    tracing::debug!(id = %item.id, error = %e, "Semantic cache write failed");
                                }
                            }
                        }
                        return Ok(());
                    }
                    Err(e) => {
                        tracing::warn!(id = %item.id, error = %e, "Vector write failed, falling back to durable")
                    }
                }
            }
        }
        self.durable_write(item).await
    }

    async fn store_procedural(&self, item: &MemoryItem) -> Result<()> {
        if self.vector_up() {
            if let Some(vector) = &self.vector {
                if let Err(e) = vector.store(item).await {
                    tracing::warn!(id = %item.id, error = %e, "Vector procedural write failed");
                }
            }
        }
        // Canonical copy; this write is mandatory
        self.durable_write(item).await
    }

    async fn durable_write(&self, item: &MemoryItem) -> Result<()> {
        if !self.durable_up() {
            return Err(MemoryError::BackendUnavailable(format!(
                "No backend available for {} write",
                item.kind
            )));
        }
        self.durable.store(item).await.map_err(|e| {
            tracing::error!(id = %item.id, error = %e, "Durable write failed");
            MemoryError::BackendUnavailable(format!("Durable write failed: {}", e))
        })
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Probe order: local cache, fast KV, vector, durable. A hit outside
    /// the fast tier is written back to it.
    pub async fn retrieve(&self, id: &str) -> Result<Option<MemoryItem>> {
        if let Some(item) = self.cache_get(id) {
            return Ok(Some(item));
        }

        if self.fast_up() {
            if let Some(fast) = &self.fast {
                if let Ok(Some(item)) = fast.retrieve(id).await {
                    self.cache_put(&item);
                    return Ok(Some(item));
                }
            }
        }

        if self.vector_up() {
            if let Some(vector) = &self.vector {
                if let Ok(Some(item)) = vector.retrieve(id).await {
                    self.write_back(&item).await;
                    self.cache_put(&item);
                    return Ok(Some(item));
                }
            }
        }

        match self.durable.retrieve(id).await? {
            Some(item) => {
                self.write_back(&item).await;
                self.cache_put(&item);
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }

    async fn write_back(&self, item: &MemoryItem) {
        if self.fast_up() {
            if let Some(fast) = &self.fast {
                if let Err(e) = fast.store(item).await {
                    tracing::debug!(id = %item.id, error = %e, "Fast KV write-back failed");
                }
            }
        }
    }

    /// Compose results across tiers, deduplicate by id preserving first
    /// occurrence, and truncate to the query limit. Vector hits rank above
    /// recency hits.
    pub async fn search(&self, query: &MemoryQuery, persona: Persona) -> Result<Vec<MemoryItem>> {
        self.counters.searches.fetch_add(1, Ordering::Relaxed);
        let mut results: Vec<MemoryItem> = Vec::new();

        if (query.needs_knowledge || query.needs_procedure) && self.vector_up() {
            if let Some(vector) = &self.vector {
                let mut vq = query.clone();
                vq.kinds = Some(self.semantic_kinds(query));
                match vector.search(&vq, persona).await {
                    Ok(hits) => results.extend(hits),
                    Err(e) => tracing::warn!(error = %e, "Vector search failed"),
                }
            }
        }

        if query.needs_experience && self.fast_up() {
            if let Some(fast) = &self.fast {
                match fast.search(query, persona).await {
                    Ok(hits) => results.extend(hits),
                    Err(e) => tracing::warn!(error = %e, "Fast KV search failed"),
                }
            }
        }

        if results.len() < query.limit && self.durable_up() {
            match self.durable.search(query, persona).await {
                Ok(hits) => results.extend(hits),
                Err(e) => tracing::warn!(error = %e, "Durable search failed"),
            }
        }

        let mut seen: HashSet<String> = HashSet::new();
        let mut unique = Vec::with_capacity(results.len());
        for item in results {
            if seen.insert(item.id.clone()) {
                unique.push(item);
            }
        }
        unique.truncate(query.limit);
        Ok(unique)
    }

    /// Which vector collections a query should touch
    fn semantic_kinds(&self, query: &MemoryQuery) -> Vec<MemoryKind> {
        let mut kinds = Vec::new();
        if query.needs_knowledge && query.wants_kind(MemoryKind::Semantic) {
            kinds.push(MemoryKind::Semantic);
        }
        if query.needs_procedure && query.wants_kind(MemoryKind::Procedural) {
            kinds.push(MemoryKind::Procedural);
        }
        kinds
    }

    // ------------------------------------------------------------------
    // Deletes and access tracking
    // ------------------------------------------------------------------

    /// Remove an id from every tier and the cache. Idempotent.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        self.invalidate(id);
        let mut found = false;

        if self.fast_up() {
            if let Some(fast) = &self.fast {
                found |= fast.delete(id).await.unwrap_or(false);
            }
        }
        if self.vector_up() {
            if let Some(vector) = &self.vector {
                found |= vector.delete(id).await.unwrap_or(false);
            }
        }
        found |= self.durable.delete(id).await?;
        Ok(found)
    }

    /// Record a successful recall: bump counters everywhere the item lives.
    /// Best-effort; read paths never fail on tracking.
    pub async fn record_access(&self, item: &MemoryItem) {
        let now = Utc::now();
        let mut touched = item.clone();
        touched.mark_accessed(now);

        if let Err(e) = self.durable.touch(&item.id, now) {
            tracing::debug!(id = %item.id, error = %e, "Durable access tracking failed");
        }
        if self.fast_up() {
            if let Some(fast) = &self.fast {
                if fast.retrieve(&item.id).await.ok().flatten().is_some() {
                    let _ = fast.store(&touched).await;
                }
            }
        }
        self.invalidate(&item.id);
        self.cache_put(&touched);
    }

    // ------------------------------------------------------------------
    // Lifecycle support
    // ------------------------------------------------------------------

    /// Working-memory view for consolidation: fast tier when up, durable
    /// fallback rows otherwise
    pub async fn working_items(&self, persona: Persona, limit: usize) -> Result<Vec<MemoryItem>> {
        let mut query = MemoryQuery::text("");
        query.limit = limit;
        query.kinds = Some(vec![MemoryKind::Working]);

        if self.fast_up() {
            if let Some(fast) = &self.fast {
                return fast.search(&query, persona).await;
            }
        }
        self.durable.query_filtered(&DurableFilter {
            persona: Some(persona),
            kind: Some(MemoryKind::Working),
            limit,
            ..Default::default()
        })
    }

    /// Long-term listing for the pruner; durable is authoritative
    pub fn long_term_items(
        &self,
        persona: Persona,
        kind: MemoryKind,
        limit: usize,
    ) -> Result<Vec<MemoryItem>> {
        self.durable.list_kind(persona, kind, limit)
    }

    /// Drop a residual working copy after consolidation promoted the id to
    /// a long-term kind. Entries already rewritten under the new kind are
    /// left alone.
    pub fn remove_working_copy(&self, id: &str) -> bool {
        self.invalidate(id);
        match &self.fast {
            Some(fast) if self.fast_up() => fast.remove_if_kind(id, MemoryKind::Working),
            _ => false,
        }
    }

    // ------------------------------------------------------------------
    // Stats & health
    // ------------------------------------------------------------------

    pub async fn stats(&self) -> Vec<BackendStats> {
        let mut all = Vec::new();
        if let Some(fast) = &self.fast {
            all.push(fast.stats().await);
        }
        if let Some(vector) = &self.vector {
            all.push(vector.stats().await);
        }
        all.push(self.durable.stats().await);
        all
    }

    pub fn cache_stats(&self) -> HashMap<String, serde_json::Value> {
        HashMap::from([
            ("entries".to_string(), serde_json::json!(self.cache.len())),
            (
                "hits".to_string(),
                serde_json::json!(self.counters.cache_hits.load(Ordering::Relaxed)),
            ),
            (
                "misses".to_string(),
                serde_json::json!(self.counters.cache_misses.load(Ordering::Relaxed)),
            ),
            (
                "invalidations".to_string(),
                serde_json::json!(self.counters.cache_invalidations.load(Ordering::Relaxed)),
            ),
            (
                "writes".to_string(),
                serde_json::json!(self.counters.writes.load(Ordering::Relaxed)),
            ),
            (
                "searches".to_string(),
                serde_json::json!(self.counters.searches.load(Ordering::Relaxed)),
            ),
        ])
    }

    pub async fn health(&self) -> ServiceHealth {
        let mut backends = HashMap::new();
        let mut degraded = false;

        match &self.fast {
            Some(fast) => {
                let h = fast.health().await;
                let up = h.healthy && self.fast_up();
                degraded |= !up;
                backends.insert("fast_kv".to_string(), health_word(up));
            }
            None => {
                backends.insert("fast_kv".to_string(), "disabled".to_string());
            }
        }
        match &self.vector {
            Some(vector) => {
                let h = vector.health().await;
                let up = h.healthy && self.vector_up();
                degraded |= !up;
                backends.insert("vector".to_string(), health_word(up));
            }
            None => {
                backends.insert("vector".to_string(), "disabled".to_string());
            }
        }

        let durable_health = self.durable.health().await;
        let durable_ok = durable_health.healthy && self.durable_up();
        backends.insert("durable".to_string(), health_word(durable_ok));

        let status = if !durable_ok {
            HealthState::Unhealthy
        } else if degraded {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };

        ServiceHealth {
            status,
            timestamp: Utc::now(),
            backends,
        }
    }
}

fn health_word(up: bool) -> String {
    if up { "healthy" } else { "unhealthy" }.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::default_embedder;
    use crate::security::isolation::PersonaIsolation;
    use crate::storage::fast_kv::KindTtls;
    use std::collections::HashMap as StdHashMap;

    async fn router() -> HybridRouter {
        let isolation = Arc::new(PersonaIsolation::new());
        let fast = Arc::new(FastKvStore::new(Arc::clone(&isolation), KindTtls::default()));
        let vector = Arc::new(VectorStore::new(default_embedder(128)));
        let durable = Arc::new(DurableStore::open_in_memory().unwrap());
        let r = HybridRouter::new(Some(fast), Some(vector), durable, 300);
        r.initialize().await.unwrap();
        r
    }

    fn item(persona: Persona, kind: MemoryKind, content: &str, importance: f32) -> MemoryItem {
        MemoryItem::new(
            persona,
            kind,
            content.into(),
            importance,
            vec![],
            StdHashMap::new(),
        )
    }

    #[tokio::test]
    async fn test_working_routes_to_fast() {
        let r = router().await;
        let m = item(Persona::Athena, MemoryKind::Working, "scratch", 0.4);
        r.store(&m).await.unwrap();

        // Not archived: the durable tier stays empty
        assert!(r.durable.retrieve(&m.id).await.unwrap().is_none());
        assert_eq!(r.retrieve(&m.id).await.unwrap().unwrap().id, m.id);
    }

    #[tokio::test]
    async fn test_working_falls_back_to_durable() {
        let r = router().await;
        r.set_fast_available(false);

        let m = item(Persona::Athena, MemoryKind::Working, "fallback", 0.4);
        r.store(&m).await.unwrap();
        assert!(r.durable.retrieve(&m.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_episodic_archive_strictly_above_half() {
        let r = router().await;

        let at_half = item(Persona::Hestia, MemoryKind::Episodic, "minor event", 0.5);
        r.store(&at_half).await.unwrap();
        assert!(r.durable.retrieve(&at_half.id).await.unwrap().is_none());

        let above = item(Persona::Hestia, MemoryKind::Episodic, "major event", 0.51);
        r.store(&above).await.unwrap();
        assert!(r.durable.retrieve(&above.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_procedural_durable_is_mandatory() {
        let r = router().await;
        let m = item(Persona::Artemis, MemoryKind::Procedural, "deploy steps", 0.9);
        r.store(&m).await.unwrap();
        assert!(r.durable.retrieve(&m.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_semantic_survives_vector_outage() {
        let r = router().await;
        r.set_vector_available(false);

        let m = item(Persona::Athena, MemoryKind::Semantic, "concept of backpressure", 0.8);
        r.store(&m).await.unwrap();
        assert!(r.durable.retrieve(&m.id).await.unwrap().is_some());

        // Search falls back to the durable LIKE path
        let mut q = MemoryQuery::text("backpressure");
        q.needs_experience = false;
        let results = r.search(&q, Persona::Athena).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_search_dedupes_across_tiers() {
        let r = router().await;
        // Above the archive threshold: lives in both fast and durable
        let m = item(Persona::Bellona, MemoryKind::Episodic, "rollout drill", 0.9);
        r.store(&m).await.unwrap();

        let q = MemoryQuery::text("rollout").with_limit(10);
        let results = r.search(&q, Persona::Bellona).await.unwrap();
        let ids: Vec<&String> = results.iter().map(|i| &i.id).collect();
        let unique: HashSet<&&String> = ids.iter().collect();
        assert_eq!(ids.len(), unique.len());
    }

    #[tokio::test]
    async fn test_delete_idempotent_and_total() {
        let r = router().await;
        let m = item(Persona::Athena, MemoryKind::Episodic, "ephemeral", 0.9);
        r.store(&m).await.unwrap();

        assert!(r.delete(&m.id).await.unwrap());
        assert!(!r.delete(&m.id).await.unwrap());
        assert!(r.retrieve(&m.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_health_degraded_without_fast() {
        let r = router().await;
        assert_eq!(r.health().await.status, HealthState::Healthy);

        r.set_fast_available(false);
        let health = r.health().await;
        assert_eq!(health.status, HealthState::Degraded);
        assert_eq!(health.backends["fast_kv"], "unhealthy");
        assert_eq!(health.backends["durable"], "healthy");
    }

    #[tokio::test]
    async fn test_cache_serves_after_backend_loss() {
        let r = router().await;
        let m = item(Persona::Athena, MemoryKind::Semantic, "cached concept", 0.8);
        r.store(&m).await.unwrap();

        // Warm the cache, then take everything but durable down
        let _ = r.retrieve(&m.id).await.unwrap();
        r.set_fast_available(false);
        r.set_vector_available(false);

        let got = r.retrieve(&m.id).await.unwrap();
        assert!(got.is_some());
    }

    #[tokio::test]
    async fn test_write_invalidates_cache() {
        let r = router().await;
        let mut m = item(Persona::Athena, MemoryKind::Semantic, "v1", 0.8);
        r.store(&m).await.unwrap();
        let _ = r.retrieve(&m.id).await.unwrap();

        m.content = "v2".into();
        r.store(&m).await.unwrap();

        let got = r.retrieve(&m.id).await.unwrap().unwrap();
        assert_eq!(got.content.as_text(), "v2");
    }

    #[tokio::test]
    async fn test_record_access_bumps_counters() {
        let r = router().await;
        let m = item(Persona::Athena, MemoryKind::Procedural, "steps", 0.9);
        r.store(&m).await.unwrap();

        r.record_access(&m).await;
        let got = r.durable.retrieve(&m.id).await.unwrap().unwrap();
        assert_eq!(got.access_count, 1);
    }

    #[tokio::test]
    async fn test_working_items_listing() {
        let r = router().await;
        for i in 0..3 {
            r.store(&item(
                Persona::Artemis,
                MemoryKind::Working,
                &format!("note {}", i),
                0.5,
            ))
            .await
            .unwrap();
        }
        let items = r.working_items(Persona::Artemis, 10).await.unwrap();
        assert_eq!(items.len(), 3);
        assert!(items.iter().all(|i| i.kind == MemoryKind::Working));
    }
}
