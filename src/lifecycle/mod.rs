//! Background lifecycle loops
//!
//! Each agent persona owns two recurring tasks: a consolidator and a
//! pruner. One tokio task per (persona, loop) keeps executions of the same
//! loop strictly sequential; all tasks share a watch-channel stop signal
//! checked between items and at every interval boundary.

pub mod consolidation;
pub mod forgetting;

pub use consolidation::{
    should_consolidate, ConsolidationReport, Consolidator, CONSOLIDATION_ACCESS_THRESHOLD,
    CONSOLIDATION_IMPORTANCE_THRESHOLD, WORKING_MAX_AGE_SECS,
};
pub use forgetting::{
    prune_threshold, retention, PruneReport, Pruner, EPISODIC_PRUNE_THRESHOLD,
    SEMANTIC_PRUNE_THRESHOLD,
};

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::persona::Persona;
use crate::storage::router::HybridRouter;

/// Owns the per-persona background loops
pub struct LifecycleEngine {
    router: Arc<HybridRouter>,
    consolidation_interval: Duration,
    pruning_interval: Duration,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl LifecycleEngine {
    pub fn new(
        router: Arc<HybridRouter>,
        consolidation_interval_secs: u64,
        pruning_interval_secs: u64,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            router,
            consolidation_interval: Duration::from_secs(consolidation_interval_secs.max(1)),
            pruning_interval: Duration::from_secs(pruning_interval_secs.max(1)),
            stop_tx,
            stop_rx,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn consolidator and pruner tasks for every agent persona.
    /// Idempotent: calling twice does not double the tasks.
    pub fn start(&self) {
        let mut handles = self.handles.lock();
        if !handles.is_empty() {
            return;
        }

        for persona in Persona::agents() {
            handles.push(self.spawn_consolidator(*persona));
            handles.push(self.spawn_pruner(*persona));
        }
        tracing::info!(tasks = handles.len(), "Lifecycle loops started");
    }

    fn spawn_consolidator(&self, persona: Persona) -> JoinHandle<()> {
        let consolidator = Consolidator::new(Arc::clone(&self.router));
        let interval = self.consolidation_interval;
        let mut stop = self.stop_rx.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.changed() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                if *stop.borrow() {
                    break;
                }
                let cancelled = {
                    let stop = stop.clone();
                    move || *stop.borrow()
                };
                match consolidator.run_once(persona, cancelled).await {
                    Ok(report) if report.promoted > 0 => {
                        tracing::info!(
                            persona = %persona,
                            promoted = report.promoted,
                            evicted = report.evicted,
                            "Consolidation pass complete"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(persona = %persona, error = %e, "Consolidation pass failed"),
                }
            }
            tracing::debug!(persona = %persona, "Consolidator stopped");
        })
    }

    fn spawn_pruner(&self, persona: Persona) -> JoinHandle<()> {
        let pruner = Pruner::new(Arc::clone(&self.router));
        let interval = self.pruning_interval;
        let mut stop = self.stop_rx.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.changed() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                if *stop.borrow() {
                    break;
                }
                let cancelled = {
                    let stop = stop.clone();
                    move || *stop.borrow()
                };
                match pruner.run_once(persona, cancelled).await {
                    Ok(report) if report.pruned > 0 => {
                        tracing::info!(
                            persona = %persona,
                            pruned = report.pruned,
                            "Pruning pass complete"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(persona = %persona, error = %e, "Pruning pass failed"),
                }
            }
            tracing::debug!(persona = %persona, "Pruner stopped");
        })
    }

    /// Signal every loop to stop and wait for them to drain
    pub async fn stop(&self) {
        let _ = self.stop_tx.send(true);
        let handles: Vec<JoinHandle<()>> = {
            let mut guard = self.handles.lock();
            guard.drain(..).collect()
        };
        futures::future::join_all(handles).await;
        tracing::info!("Lifecycle loops stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.handles.lock().is_empty()
    }

    /// Immediate consolidation pass, outside the schedule
    pub async fn consolidate_now(&self, persona: Persona) -> Result<ConsolidationReport> {
        Consolidator::new(Arc::clone(&self.router))
            .run_once(persona, || false)
            .await
    }

    /// Immediate pruning pass, outside the schedule
    pub async fn prune_now(&self, persona: Persona) -> Result<PruneReport> {
        Pruner::new(Arc::clone(&self.router))
            .run_once(persona, || false)
            .await
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
    use crate::types::{MemoryItem, MemoryKind};
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

    #[tokio::test]
    async fn test_start_stop() {
        let engine = LifecycleEngine::new(router().await, 3600, 3600);
        engine.start();
        assert!(engine.is_running());

        // Idempotent start
        engine.start();

        engine.stop().await;
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn test_consolidate_now() {
        let r = router().await;
        let engine = LifecycleEngine::new(Arc::clone(&r), 3600, 3600);

        let item = MemoryItem::new(
            Persona::Seshat,
            MemoryKind::Working,
            "definition of the retrieval standard".into(),
            0.9,
            vec![],
            HashMap::new(),
        );
        r.store(&item).await.unwrap();

        let report = engine.consolidate_now(Persona::Seshat).await.unwrap();
        assert_eq!(report.promoted, 1);
        let got = r.retrieve(&item.id).await.unwrap().unwrap();
        assert_eq!(got.kind, MemoryKind::Semantic);
    }
}
