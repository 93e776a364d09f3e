//! Forgetting-curve pruning
//!
//! Retention decays exponentially from the last access (30-day constant)
//! and is bought back by recall frequency, importance, and the persona's
//! priority for the kind. Episodic items below 0.10 and semantic items
//! below 0.05 are pruned; procedural memory is never pruned automatically.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::persona::{profile, Persona, PersonaProfile};
use crate::storage::router::HybridRouter;
use crate::types::{MemoryItem, MemoryKind};

/// Exponential decay constant, days
pub const DECAY_DAYS: f64 = 30.0;

/// Retention floor below which episodic items are pruned
pub const EPISODIC_PRUNE_THRESHOLD: f64 = 0.10;

/// Retention floor below which semantic items are pruned (more conservative)
pub const SEMANTIC_PRUNE_THRESHOLD: f64 = 0.05;

/// How many items one pass inspects per kind
const SCAN_LIMIT: usize = 1000;

/// Compute retention for an item at `now`
///
/// `base + min(0.05 * access_count, 0.3) + 0.2 * importance +
/// 0.04 * priority(kind)`, capped at 1.0.
pub fn retention(item: &MemoryItem, profile: &PersonaProfile, now: DateTime<Utc>) -> f64 {
    let days = (now - item.last_access).num_seconds().max(0) as f64 / 86_400.0;
    let base = (-days / DECAY_DAYS).exp();

    let frequency_bonus = (item.access_count as f64 * 0.05).min(0.3);
    let importance_bonus = item.importance as f64 * 0.2;
    let priority_bonus = profile.priority(item.kind).value() as f64 / 5.0 * 0.2;

    (base + frequency_bonus + importance_bonus + priority_bonus).min(1.0)
}

/// Prune threshold for a kind; `None` means never pruned automatically
pub fn prune_threshold(kind: MemoryKind) -> Option<f64> {
    match kind {
        MemoryKind::Episodic => Some(EPISODIC_PRUNE_THRESHOLD),
        MemoryKind::Semantic => Some(SEMANTIC_PRUNE_THRESHOLD),
        MemoryKind::Working | MemoryKind::Procedural => None,
    }
}

/// Outcome of one pruning pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct PruneReport {
    pub persona: Option<Persona>,
    pub scanned: usize,
    pub pruned: usize,
}

/// Runs forgetting-curve passes against the router
pub struct Pruner {
    router: Arc<HybridRouter>,
}

impl Pruner {
    pub fn new(router: Arc<HybridRouter>) -> Self {
        Self { router }
    }

    /// One pass over a persona's episodic and semantic memory. Respects
    /// `cancelled` between items.
    pub async fn run_once<F>(&self, persona: Persona, cancelled: F) -> Result<PruneReport>
    where
        F: Fn() -> bool,
    {
        let prof = profile(persona);
        let now = Utc::now();
        let mut report = PruneReport {
            persona: Some(persona),
            ..Default::default()
        };

        for kind in [MemoryKind::Episodic, MemoryKind::Semantic] {
            let Some(threshold) = prune_threshold(kind) else {
                continue;
            };
            let items = self.router.long_term_items(persona, kind, SCAN_LIMIT)?;
            report.scanned += items.len();

            for item in items {
                if cancelled() {
                    return Ok(report);
                }
                let r = retention(&item, prof, now);
                if r < threshold {
                    match self.router.delete(&item.id).await {
                        Ok(_) => {
                            report.pruned += 1;
                            tracing::info!(
                                id = %item.id,
                                persona = %persona,
                                kind = kind.as_str(),
                                retention = r,
                                "Pruned memory"
                            );
                        }
                        Err(e) => {
                            tracing::warn!(id = %item.id, error = %e, "Prune delete failed")
                        }
                    }
                }
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
    use chrono::Duration;
    use std::collections::HashMap;

    fn item_with_age(
        persona: Persona,
        kind: MemoryKind,
        importance: f32,
        access_count: u32,
        days_since_access: i64,
    ) -> MemoryItem {
        let mut item = MemoryItem::new(
            persona,
            kind,
            "aging memory".into(),
            importance,
            vec![],
            HashMap::new(),
        );
        item.access_count = access_count;
        item.last_access = Utc::now() - Duration::days(days_since_access);
        item
    }

    #[test]
    fn test_fresh_item_retains() {
        let prof = profile(Persona::Athena);
        let item = item_with_age(Persona::Athena, MemoryKind::Episodic, 0.5, 0, 0);
        let r = retention(&item, prof, Utc::now());
        assert!(r > 0.9);
        assert!(r <= 1.0);
    }

    #[test]
    fn test_stale_unimportant_item_decays() {
        // artemis holds episodic memory at Low priority (bonus 0.04)
        let prof = profile(Persona::Artemis);
        let item = item_with_age(Persona::Artemis, MemoryKind::Episodic, 0.1, 0, 400);
        let r = retention(&item, prof, Utc::now());
        // exp(-400/30) ~ 0 + 0.02 importance + 0.04 priority
        assert!(r < EPISODIC_PRUNE_THRESHOLD);
    }

    #[test]
    fn test_access_frequency_buys_retention() {
        let prof = profile(Persona::Athena);
        let quiet = item_with_age(Persona::Athena, MemoryKind::Episodic, 0.1, 0, 60);
        let busy = item_with_age(Persona::Athena, MemoryKind::Episodic, 0.1, 10, 60);
        assert!(
            retention(&busy, prof, Utc::now()) > retention(&quiet, prof, Utc::now())
        );

        // Frequency bonus is capped at 0.3
        let very_busy = item_with_age(Persona::Athena, MemoryKind::Episodic, 0.1, 1000, 60);
        let diff = retention(&very_busy, prof, Utc::now()) - retention(&busy, prof, Utc::now());
        assert!(diff < 0.011);
    }

    #[test]
    fn test_retention_capped_at_one() {
        let prof = profile(Persona::Hestia);
        let item = item_with_age(Persona::Hestia, MemoryKind::Episodic, 1.0, 100, 0);
        assert!((retention(&item, prof, Utc::now()) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_procedural_never_pruned() {
        assert!(prune_threshold(MemoryKind::Procedural).is_none());
        assert!(prune_threshold(MemoryKind::Working).is_none());
        assert_eq!(
            prune_threshold(MemoryKind::Episodic),
            Some(EPISODIC_PRUNE_THRESHOLD)
        );
        assert_eq!(
            prune_threshold(MemoryKind::Semantic),
            Some(SEMANTIC_PRUNE_THRESHOLD)
        );
    }

    #[tokio::test]
    async fn test_prune_pass_removes_stale_episode() {
        let isolation = Arc::new(PersonaIsolation::new());
        let fast = Arc::new(FastKvStore::new(Arc::clone(&isolation), KindTtls::default()));
        let vector = Arc::new(VectorStore::new(default_embedder(128)));
        let durable = Arc::new(DurableStore::open_in_memory().unwrap());
        let router = Arc::new(HybridRouter::new(Some(fast), Some(vector), durable, 300));
        router.initialize().await.unwrap();

        // Old enough to fall below the episodic threshold; importance above
        // 0.5 would archive, so store directly at low importance
        let stale = item_with_age(Persona::Artemis, MemoryKind::Episodic, 0.1, 0, 400);
        // Bypass the fast tier so the durable archive holds the item
        router.set_fast_available(false);
        router.store(&stale).await.unwrap();
        router.set_fast_available(true);

        let fresh = item_with_age(Persona::Artemis, MemoryKind::Episodic, 0.9, 3, 0);
        router.store(&fresh).await.unwrap();

        let pruner = Pruner::new(Arc::clone(&router));
        let report = pruner.run_once(Persona::Artemis, || false).await.unwrap();
        assert_eq!(report.pruned, 1);

        assert!(router.retrieve(&stale.id).await.unwrap().is_none());
        assert!(router.retrieve(&fresh.id).await.unwrap().is_some());
    }
}
