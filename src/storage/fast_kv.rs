//! Fast in-memory KV tier with per-key TTL
//!
//! Holds working memory, the recent episodic view, and hot-recall caches
//! for the long-term kinds. Layout follows the documented key scheme:
//! the primary map plays `memory:{id}`, the per-(persona, kind) rank set
//! plays `persona:{p}:{kind}`, and the per-kind id set plays `type:{kind}`.
//! Index updates happen in the same critical section as the primary write,
//! so a write is atomic with its secondary indices.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;

use crate::error::{MemoryError, Result};
use crate::persona::Persona;
use crate::security::isolation::PersonaIsolation;
use crate::storage::backend::{BackendHealth, BackendStats, MemoryBackend};
use crate::types::{MemoryItem, MemoryKind, MemoryQuery};

/// Base TTLs per kind, seconds (before persona scaling)
#[derive(Debug, Clone, Copy)]
pub struct KindTtls {
    pub working: u64,
    pub episodic: u64,
    /// Semantic/procedural entries are caches with a short TTL
    pub cache: u64,
}

impl Default for KindTtls {
    fn default() -> Self {
        Self {
            working: 3600,
            episodic: 86_400,
            cache: 300,
        }
    }
}

/// Ordering key over (importance, id). Importance is in [0, 1], so the raw
/// f32 bit pattern sorts monotonically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct RankKey {
    bits: u32,
    id: String,
}

impl RankKey {
    fn new(importance: f32, id: &str) -> Self {
        Self {
            bits: importance.max(0.0).to_bits(),
            id: id.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct KvEntry {
    item: MemoryItem,
    expires_at: DateTime<Utc>,
}

impl KvEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// One persona namespace: primary map plus secondary indices
#[derive(Debug, Default)]
struct Shard {
    entries: HashMap<String, KvEntry>,
    by_rank: HashMap<(Persona, MemoryKind), BTreeSet<RankKey>>,
    by_kind: HashMap<MemoryKind, HashSet<String>>,
}

impl Shard {
    fn unlink(&mut self, entry: &KvEntry) {
        let item = &entry.item;
        if let Some(set) = self.by_rank.get_mut(&(item.persona, item.kind)) {
            set.remove(&RankKey::new(item.importance, &item.id));
        }
        if let Some(set) = self.by_kind.get_mut(&item.kind) {
            set.remove(&item.id);
        }
    }

    fn link(&mut self, entry: &KvEntry) {
        let item = &entry.item;
        self.by_rank
            .entry((item.persona, item.kind))
            .or_default()
            .insert(RankKey::new(item.importance, &item.id));
        self.by_kind
            .entry(item.kind)
            .or_default()
            .insert(item.id.clone());
    }

    fn remove(&mut self, id: &str) -> Option<KvEntry> {
        let entry = self.entries.remove(id)?;
        self.unlink(&entry);
        Some(entry)
    }
}

/// In-memory KV driver with TTL and importance-ordered retrieval
pub struct FastKvStore {
    namespaces: DashMap<u8, Arc<RwLock<Shard>>>,
    isolation: Arc<PersonaIsolation>,
    ttls: KindTtls,
    available: AtomicBool,
}

impl FastKvStore {
    pub fn new(isolation: Arc<PersonaIsolation>, ttls: KindTtls) -> Self {
        let namespaces = DashMap::new();
        for p in Persona::all() {
            namespaces.insert(p.namespace_id(), Arc::new(RwLock::new(Shard::default())));
        }
        Self {
            namespaces,
            isolation,
            ttls,
            available: AtomicBool::new(false),
        }
    }

    fn shard(&self, persona: Persona) -> Arc<RwLock<Shard>> {
        let handle = self.isolation.handle(persona);
        self.namespaces
            .get(&handle.namespace_id)
            .map(|s| Arc::clone(&s))
            // Namespaces are pre-created for the closed set; shared is the
            // infallible fallback.
            .unwrap_or_else(|| {
                Arc::clone(
                    &self
                        .namespaces
                        .entry(Persona::Shared.namespace_id())
                        .or_default(),
                )
            })
    }

    fn ttl_for(&self, persona: Persona, kind: MemoryKind) -> chrono::Duration {
        let base = PersonaIsolation::base_ttl_secs(
            kind,
            self.ttls.working,
            self.ttls.episodic,
            self.ttls.cache,
        );
        self.isolation.scaled_ttl(persona, base)
    }

    /// Remove an entry only if it still holds the given kind. Used by
    /// consolidation to clear residual working copies without touching a
    /// freshly promoted entry under the same id.
    pub fn remove_if_kind(&self, id: &str, kind: MemoryKind) -> bool {
        for ns in self.namespaces.iter() {
            let mut shard = ns.value().write();
            let matches = shard
                .entries
                .get(id)
                .map(|e| e.item.kind == kind)
                .unwrap_or(false);
            if matches {
                shard.remove(id);
                return true;
            }
        }
        false
    }

    /// Drop every expired entry; returns the number removed
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut removed = 0;
        for ns in self.namespaces.iter() {
            let mut shard = ns.value().write();
            let expired: Vec<String> = shard
                .entries
                .iter()
                .filter(|(_, e)| e.is_expired(now))
                .map(|(id, _)| id.clone())
                .collect();
            for id in expired {
                shard.remove(&id);
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::debug!(removed, "Purged expired fast-KV entries");
        }
        removed
    }

    fn total_items(&self) -> u64 {
        self.namespaces
            .iter()
            .map(|ns| ns.value().read().entries.len() as u64)
            .sum()
    }
}

#[async_trait]
impl MemoryBackend for FastKvStore {
    async fn initialize(&self) -> Result<bool> {
        self.available.store(true, Ordering::SeqCst);
        tracing::info!("Fast KV backend initialized");
        Ok(true)
    }

    async fn store(&self, item: &MemoryItem) -> Result<()> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(MemoryError::BackendUnavailable("fast_kv".into()));
        }

        let shard = self.shard(item.persona);
        let now = Utc::now();
        let expires_at = now + self.ttl_for(item.persona, item.kind);

        let mut guard = shard.write();

        if !guard.entries.contains_key(&item.id)
            && guard.entries.len() as u64 >= self.isolation.max_items(item.persona)
        {
            return Err(MemoryError::Storage(format!(
                "Namespace quota exceeded for {}",
                item.persona
            )));
        }

        // Upsert: drop stale index entries before relinking
        if let Some(old) = guard.entries.remove(&item.id) {
            guard.unlink(&old);
        }

        let entry = KvEntry {
            item: item.clone(),
            expires_at,
        };
        guard.link(&entry);
        guard.entries.insert(item.id.clone(), entry);

        Ok(())
    }

    async fn retrieve(&self, id: &str) -> Result<Option<MemoryItem>> {
        if !self.available.load(Ordering::SeqCst) {
            return Ok(None);
        }

        let now = Utc::now();
        for ns in self.namespaces.iter() {
            let found = {
                let shard = ns.value().read();
                shard.entries.get(id).cloned()
            };
            if let Some(entry) = found {
                if entry.is_expired(now) {
                    ns.value().write().remove(id);
                    return Ok(None);
                }
                return Ok(Some(entry.item));
            }
        }
        Ok(None)
    }

    async fn search(&self, query: &MemoryQuery, persona: Persona) -> Result<Vec<MemoryItem>> {
        if !self.available.load(Ordering::SeqCst) {
            return Ok(vec![]);
        }

        let shard = self.shard(persona);
        let now = Utc::now();
        let needle = query.text.trim().to_lowercase();

        let mut expired: Vec<String> = Vec::new();
        let mut results: Vec<MemoryItem> = Vec::new();
        {
            let guard = shard.read();
            for kind in MemoryKind::all() {
                if !query.wants_kind(*kind) {
                    continue;
                }
                let Some(ranked) = guard.by_rank.get(&(persona, *kind)) else {
                    continue;
                };
                // Descending importance; O(log n) positioning, O(k) hydration
                for key in ranked.iter().rev() {
                    let Some(entry) = guard.entries.get(&key.id) else {
                        continue;
                    };
                    if entry.is_expired(now) {
                        expired.push(key.id.clone());
                        continue;
                    }
                    let item = &entry.item;
                    if !query.matches_tags(&item.tags) {
                        continue;
                    }
                    if !needle.is_empty()
                        && !item.content.as_text().to_lowercase().contains(&needle)
                    {
                        continue;
                    }
                    results.push(item.clone());
                    if results.len() >= query.limit * MemoryKind::all().len() {
                        break;
                    }
                }
            }
        }

        if !expired.is_empty() {
            let mut guard = shard.write();
            for id in expired {
                guard.remove(&id);
            }
        }

        results.sort_by(|a, b| {
            b.importance
                .partial_cmp(&a.importance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(query.limit);
        Ok(results)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        if !self.available.load(Ordering::SeqCst) {
            return Ok(false);
        }
        for ns in self.namespaces.iter() {
            let mut shard = ns.value().write();
            if shard.remove(id).is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn stats(&self) -> BackendStats {
        let mut details = HashMap::new();
        for p in Persona::all() {
            let shard = self.shard(*p);
            let count = shard.read().entries.len();
            if *p != Persona::Shared || count > 0 {
                details.insert(
                    format!("namespace_{}", p),
                    serde_json::json!(count),
                );
            }
        }
        BackendStats {
            backend: "fast_kv".to_string(),
            connected: self.available.load(Ordering::SeqCst),
            item_count: self.total_items(),
            details,
        }
    }

    async fn health(&self) -> BackendHealth {
        let start = Instant::now();
        let connected = self.available.load(Ordering::SeqCst);
        let _ = self.total_items();
        BackendHealth {
            healthy: connected,
            latency_ms: start.elapsed().as_secs_f64() * 1000.0,
            error: (!connected).then(|| "fast_kv unavailable".to_string()),
        }
    }

    fn name(&self) -> &'static str {
        "fast_kv"
    }
}
