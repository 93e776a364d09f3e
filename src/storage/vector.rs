//! Vector index tier: one collection per memory kind
//!
//! System of record for semantic search. Each record keeps the item, a
//! flattened document, and its embedding; the embedding is materialized on
//! store when the item does not already carry one. Search ranks by cosine
//! similarity, filtered to the querying persona.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::embedding::{cosine_similarity, Embedder};
use crate::error::{MemoryError, Result};
use crate::persona::Persona;
use crate::storage::backend::{BackendHealth, BackendStats, MemoryBackend};
use crate::types::{MemoryItem, MemoryKind, MemoryQuery};

#[derive(Debug, Clone)]
struct VectorRecord {
    item: MemoryItem,
    embedding: Vec<f32>,
}

/// In-process vector index with per-kind collections
pub struct VectorStore {
    collections: HashMap<MemoryKind, RwLock<HashMap<String, VectorRecord>>>,
    embedder: Arc<dyn Embedder>,
    available: AtomicBool,
}

impl VectorStore {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        let mut collections = HashMap::new();
        for kind in MemoryKind::all() {
            collections.insert(*kind, RwLock::new(HashMap::new()));
        }
        Self {
            collections,
            embedder,
            available: AtomicBool::new(false),
        }
    }

    fn collection(&self, kind: MemoryKind) -> &RwLock<HashMap<String, VectorRecord>> {
        // Collections exist for every kind; constructed in new()
        &self.collections[&kind]
    }

    /// Which collections a query wants to see
    fn wanted_kinds(query: &MemoryQuery) -> Vec<MemoryKind> {
        MemoryKind::all()
            .iter()
            .copied()
            .filter(|k| query.wants_kind(*k))
            .collect()
    }

    fn total_items(&self) -> u64 {
        self.collections
            .values()
            .map(|c| c.read().len() as u64)
            .sum()
    }
}

#[async_trait]
impl MemoryBackend for VectorStore {
    async fn initialize(&self) -> Result<bool> {
        self.available.store(true, Ordering::SeqCst);
        tracing::info!(
            model = self.embedder.model_name(),
            dimensions = self.embedder.dimensions(),
            "Vector backend initialized"
        );
        Ok(true)
    }

    async fn store(&self, item: &MemoryItem) -> Result<()> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(MemoryError::BackendUnavailable("vector".into()));
        }

        let embedding = match &item.embedding {
            Some(e) if e.len() == self.embedder.dimensions() => e.clone(),
            _ => self.embedder.embed(&item.content.as_text())?,
        };

        // An id lives in exactly one collection; a kind change moves it
        for (kind, collection) in &self.collections {
            if *kind != item.kind {
                collection.write().remove(&item.id);
            }
        }

        let mut stored = item.clone();
        stored.embedding = Some(embedding.clone());
        self.collection(item.kind).write().insert(
            item.id.clone(),
            VectorRecord {
                item: stored,
                embedding,
            },
        );
        Ok(())
    }

    async fn retrieve(&self, id: &str) -> Result<Option<MemoryItem>> {
        if !self.available.load(Ordering::SeqCst) {
            return Ok(None);
        }
        for collection in self.collections.values() {
            if let Some(record) = collection.read().get(id) {
                return Ok(Some(record.item.clone()));
            }
        }
        Ok(None)
    }

    async fn search(&self, query: &MemoryQuery, persona: Persona) -> Result<Vec<MemoryItem>> {
        if !self.available.load(Ordering::SeqCst) {
            return Ok(vec![]);
        }

        let query_embedding = match &query.embedding {
            Some(e) => e.clone(),
            None => self.embedder.embed(&query.text)?,
        };

        let mut scored: Vec<(f32, MemoryItem)> = Vec::new();
        for kind in Self::wanted_kinds(query) {
            let collection = self.collection(kind).read();
            for record in collection.values() {
                if record.item.persona != persona {
                    continue;
                }
                if !query.matches_tags(&record.item.tags) {
                    continue;
                }
                let similarity = cosine_similarity(&query_embedding, &record.embedding);
                if similarity < query.min_similarity {
                    continue;
                }
                scored.push((similarity, record.item.clone()));
            }
        }

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(query.limit);
        Ok(scored.into_iter().map(|(_, item)| item).collect())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        if !self.available.load(Ordering::SeqCst) {
            return Ok(false);
        }
        let mut found = false;
        for collection in self.collections.values() {
            found |= collection.write().remove(id).is_some();
        }
        Ok(found)
    }

    async fn stats(&self) -> BackendStats {
        let mut details = HashMap::new();
        for (kind, collection) in &self.collections {
            details.insert(
                format!("collection_{}", kind),
                serde_json::json!(collection.read().len()),
            );
        }
        details.insert(
            "model".to_string(),
            serde_json::json!(self.embedder.model_name()),
        );
        BackendStats {
            backend: "vector".to_string(),
            connected: self.available.load(Ordering::SeqCst),
            item_count: self.total_items(),
            details,
        }
    }

    async fn health(&self) -> BackendHealth {
        let start = Instant::now();
        let connected = self.available.load(Ordering::SeqCst);
        let error = if connected {
            // A trivial embed exercises the model contract
            self.embedder.embed("ping").err().map(|e| e.to_string())
        } else {
            Some("vector unavailable".to_string())
        };
        BackendHealth {
            healthy: connected && error.is_none(),
            latency_ms: start.elapsed().as_secs_f64() * 1000.0,
            error,
        }
    }

    fn name(&self) -> &'static str {
        "vector"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::default_embedder;
    use std::collections::HashMap as StdHashMap;

    fn store() -> VectorStore {
        let v = VectorStore::new(default_embedder(128));
        v.available.store(true, Ordering::SeqCst);
        v
    }

    fn item(persona: Persona, kind: MemoryKind, content: &str) -> MemoryItem {
        MemoryItem::new(
            persona,
            kind,
            content.into(),
            0.5,
            vec![],
            StdHashMap::new(),
        )
    }

    #[tokio::test]
    async fn test_store_materializes_embedding() {
        let v = store();
        let m = item(Persona::Athena, MemoryKind::Semantic, "queue consumers");
        assert!(m.embedding.is_none());
        v.store(&m).await.unwrap();

        let got = v.retrieve(&m.id).await.unwrap().unwrap();
        assert_eq!(got.embedding.as_ref().map(|e| e.len()), Some(128));
    }

    #[tokio::test]
    async fn test_search_filters_by_persona() {
        let v = store();
        v.store(&item(Persona::Athena, MemoryKind::Semantic, "rollout strategy"))
            .await
            .unwrap();
        v.store(&item(Persona::Hestia, MemoryKind::Semantic, "rollout strategy"))
            .await
            .unwrap();

        let query = MemoryQuery::text("rollout strategy");
        let results = v.search(&query, Persona::Athena).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].persona, Persona::Athena);
    }

    #[tokio::test]
    async fn test_search_ranks_by_similarity() {
        let v = store();
        v.store(&item(
            Persona::Seshat,
            MemoryKind::Semantic,
            "indexing standards for documentation",
        ))
        .await
        .unwrap();
        v.store(&item(
            Persona::Seshat,
            MemoryKind::Semantic,
            "completely unrelated lunch plans",
        ))
        .await
        .unwrap();

        let query = MemoryQuery::text("documentation indexing standards").with_limit(2);
        let results = v.search(&query, Persona::Seshat).await.unwrap();
        assert_eq!(
            results[0].content.as_text(),
            "indexing standards for documentation"
        );
    }

    #[tokio::test]
    async fn test_min_similarity_drops_weak_hits() {
        let v = store();
        v.store(&item(Persona::Artemis, MemoryKind::Procedural, "cache warmup steps"))
            .await
            .unwrap();

        let query = MemoryQuery::text("entirely different topic").with_min_similarity(0.9);
        let results = v.search(&query, Persona::Artemis).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_kind_change_moves_collections() {
        let v = store();
        let mut m = item(Persona::Artemis, MemoryKind::Semantic, "profiling steps");
        v.store(&m).await.unwrap();

        m.kind = MemoryKind::Procedural;
        v.store(&m).await.unwrap();

        let mut query = MemoryQuery::text("profiling steps");
        query.kinds = Some(vec![MemoryKind::Semantic]);
        assert!(v.search(&query, Persona::Artemis).await.unwrap().is_empty());

        let got = v.retrieve(&m.id).await.unwrap().unwrap();
        assert_eq!(got.kind, MemoryKind::Procedural);
    }

    #[tokio::test]
    async fn test_delete_clears_all_collections() {
        let v = store();
        let m = item(Persona::Bellona, MemoryKind::Procedural, "supply steps");
        v.store(&m).await.unwrap();
        assert!(v.delete(&m.id).await.unwrap());
        assert!(!v.delete(&m.id).await.unwrap());
    }
}
