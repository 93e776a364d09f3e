//! Working-memory consolidation
//!
//! Promotes working items into a long-term kind when they are important,
//! frequently recalled, or match the persona's focus keywords. Promotion
//! keeps the id: the long-term write replaces the working copy wherever it
//! lives, and residual fast-tier copies older than an hour are evicted.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::error::Result;
use crate::persona::{profile, Persona, PersonaProfile};
use crate::storage::router::HybridRouter;
use crate::types::{infer_long_term_kind, MemoryItem, MemoryKind};

/// Importance above which a working item is always promoted (strict)
pub const CONSOLIDATION_IMPORTANCE_THRESHOLD: f32 = 0.7;

/// Recall count above which a working item is always promoted (strict)
pub const CONSOLIDATION_ACCESS_THRESHOLD: u32 = 5;

/// Age at which the working copy of a promoted item is evicted
pub const WORKING_MAX_AGE_SECS: i64 = 3600;

/// How many working items one pass inspects
const SCAN_LIMIT: usize = 100;

/// Decide whether a working item deserves a long-term home
pub fn should_consolidate(item: &MemoryItem, profile: &PersonaProfile) -> bool {
    if item.importance > CONSOLIDATION_IMPORTANCE_THRESHOLD {
        return true;
    }
    if item.access_count > CONSOLIDATION_ACCESS_THRESHOLD {
        return true;
    }
    let content = item.content.as_text().to_lowercase();
    profile.focus.iter().any(|kw| content.contains(kw))
}

/// Outcome of one consolidation pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsolidationReport {
    pub persona: Option<Persona>,
    pub scanned: usize,
    pub promoted: usize,
    pub evicted: usize,
}

/// Runs consolidation passes against the router
pub struct Consolidator {
    router: Arc<HybridRouter>,
}

impl Consolidator {
    pub fn new(router: Arc<HybridRouter>) -> Self {
        Self { router }
    }

    /// One pass over a persona's working memory. Respects `cancelled`
    /// between items.
    pub async fn run_once<F>(&self, persona: Persona, cancelled: F) -> Result<ConsolidationReport>
    where
        F: Fn() -> bool,
    {
        let prof = profile(persona);
        let items = self.router.working_items(persona, SCAN_LIMIT).await?;
        let now = Utc::now();

        let mut report = ConsolidationReport {
            persona: Some(persona),
            scanned: items.len(),
            ..Default::default()
        };

        for item in items {
            if cancelled() {
                break;
            }
            if item.kind != MemoryKind::Working {
                continue;
            }
            if !should_consolidate(&item, prof) {
                continue;
            }

            let mut promoted = item.clone();
            promoted.kind = infer_long_term_kind(&item.content);

            if let Err(e) = self.router.store(&promoted).await {
                tracing::warn!(id = %item.id, error = %e, "Consolidation write failed");
                continue;
            }
            report.promoted += 1;
            tracing::debug!(
                id = %item.id,
                persona = %persona,
                kind = promoted.kind.as_str(),
                "Consolidated working memory"
            );

            if item.age_seconds(now) > WORKING_MAX_AGE_SECS
                && self.router.remove_working_copy(&item.id)
            {
                report.evicted += 1;
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::default_embedder;
    use crate::security::isolation::PersonaIsolation;
    use crate::storage::durable::DurableStore;
    use crate::storage::fast_kv::{FastKvStore, KindTtls};
    use crate::storage::vector::VectorStore;
    use std::collections::HashMap;

    async fn router() -> Arc<HybridRouter> {
        let isolation = Arc::new(PersonaIsolation::new());
        let fast = Arc::new(FastKvStore::new(Arc::clone(&isolation), KindTtls::default()));
        let vector = Arc::new(VectorStore::new(default_embedder(128)));
        let durable = Arc::new(DurableStore::open_in_memory().unwrap());
        let r = Arc::new(HybridRouter::new(Some(fast), Some(vector), durable, 300));
        r.initialize().await.unwrap();
        r
    }

    fn working(persona: Persona, content: &str, importance: f32) -> MemoryItem {
        MemoryItem::new(
            persona,
            MemoryKind::Working,
            content.into(),
            importance,
            vec![],
            HashMap::new(),
        )
    }

    #[test]
    fn test_should_consolidate_thresholds() {
        let prof = profile(Persona::Artemis);

        let mut item = working(Persona::Artemis, "nothing special", 0.7);
        // Boundary is strict
        assert!(!should_consolidate(&item, prof));
        item.importance = 0.71;
        assert!(should_consolidate(&item, prof));

        let mut item = working(Persona::Artemis, "nothing special", 0.1);
        item.access_count = 5;
        assert!(!should_consolidate(&item, prof));
        item.access_count = 6;
        assert!(should_consolidate(&item, prof));
    }

    #[test]
    fn test_focus_keywords_trigger() {
        let prof = profile(Persona::Hestia);
        let item = working(Persona::Hestia, "possible vulnerability in the parser", 0.1);
        assert!(should_consolidate(&item, prof));

        let item = working(Persona::Hestia, "grocery list", 0.1);
        assert!(!should_consolidate(&item, prof));
    }

    #[tokio::test]
    async fn test_promotion_infers_procedural() {
        let r = router().await;
        let item = working(
            Persona::Artemis,
            "steps: 1) profile 2) optimize 3) verify",
            0.8,
        );
        r.store(&item).await.unwrap();

        let consolidator = Consolidator::new(Arc::clone(&r));
        let report = consolidator
            .run_once(Persona::Artemis, || false)
            .await
            .unwrap();
        assert_eq!(report.promoted, 1);

        let got = r.retrieve(&item.id).await.unwrap().unwrap();
        assert_eq!(got.kind, MemoryKind::Procedural);
    }

    #[tokio::test]
    async fn test_low_importance_item_left_in_working() {
        let r = router().await;
        let item = working(Persona::Bellona, "scratch", 0.2);
        r.store(&item).await.unwrap();

        let consolidator = Consolidator::new(Arc::clone(&r));
        let report = consolidator
            .run_once(Persona::Bellona, || false)
            .await
            .unwrap();
        assert_eq!(report.promoted, 0);

        let got = r.retrieve(&item.id).await.unwrap().unwrap();
        assert_eq!(got.kind, MemoryKind::Working);
    }

    #[tokio::test]
    async fn test_cancellation_stops_between_items() {
        let r = router().await;
        for i in 0..5 {
            r.store(&working(Persona::Athena, &format!("planning item {}", i), 0.9))
                .await
                .unwrap();
        }

        let consolidator = Consolidator::new(Arc::clone(&r));
        let report = consolidator.run_once(Persona::Athena, || true).await.unwrap();
        assert_eq!(report.promoted, 0);
    }
}
