//! Memory manager facade
//!
//! Owns the whole component graph - router, isolation, access control,
//! rate limiter, lifecycle engine - and exposes the public operations:
//! remember, recall, retrieve, delete, share, stats, health. Handlers
//! receive a reference to one `MemoryManager`; there are no globals.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;

use crate::config::Settings;
use crate::embedding::default_embedder;
use crate::error::{MemoryError, Result};
use crate::lifecycle::{ConsolidationReport, LifecycleEngine, PruneReport};
use crate::persona::Persona;
use crate::security::access::{AccessControl, AuthDecision, IssuedToken, MemoryOp};
use crate::security::audit::AuditLog;
use crate::security::isolation::PersonaIsolation;
use crate::security::rate_limit::{RateLimiter, WindowCoordinator};
use crate::storage::durable::DurableStore;
use crate::storage::fast_kv::{FastKvStore, KindTtls};
use crate::storage::router::HybridRouter;
use crate::storage::vector::VectorStore;
use crate::types::{
    infer_kind, validate_importance, MemoryContent, MemoryItem, MemoryKind, MemoryQuery,
    ServiceHealth, META_SHARED_AT, META_SHARED_FROM,
};

#[derive(Debug, Default)]
struct ManagerCounters {
    total_stores: AtomicU64,
    total_recalls: AtomicU64,
    total_shares: AtomicU64,
}

/// The service core: storage fabric plus security envelope plus lifecycle
pub struct MemoryManager {
    settings: Settings,
    isolation: Arc<PersonaIsolation>,
    router: Arc<HybridRouter>,
    access: Arc<AccessControl>,
    limiter: Arc<RateLimiter>,
    audit: Arc<AuditLog>,
    lifecycle: LifecycleEngine,
    counters: ManagerCounters,
}

impl MemoryManager {
    /// Build the component graph from settings
    pub fn new(settings: Settings) -> Result<Self> {
        Self::with_coordinator(settings, None)
    }

    /// Build with a distributed rate-limit coordinator attached
    pub fn with_coordinator(
        settings: Settings,
        coordinator: Option<Arc<dyn WindowCoordinator>>,
    ) -> Result<Self> {
        let settings = settings.validate()?;

        let isolation = Arc::new(PersonaIsolation::new());
        let embedder = default_embedder(settings.embedding_dimensions);

        let fast = settings.fast_kv_enabled.then(|| {
            Arc::new(FastKvStore::new(
                Arc::clone(&isolation),
                KindTtls {
                    working: settings.ttl_working_secs,
                    episodic: settings.ttl_episodic_secs,
                    cache: settings.ttl_cache_secs,
                },
            ))
        });
        let vector = settings
            .vector_enabled
            .then(|| Arc::new(VectorStore::new(Arc::clone(&embedder))));
        let durable = Arc::new(DurableStore::open(&settings.durable_path)?);

        let router = Arc::new(HybridRouter::new(
            fast,
            vector,
            durable,
            settings.ttl_cache_secs,
        ));

        let audit = Arc::new(AuditLog::default());
        let mut limiter = RateLimiter::new(settings.rate_limit, settings.rate_window_secs);
        if let Some(coordinator) = coordinator {
            limiter = limiter.with_coordinator(coordinator);
        }
        let limiter = Arc::new(limiter);

        let access = Arc::new(AccessControl::new(
            Arc::clone(&audit),
            Arc::clone(&limiter),
            settings.token_ttl_hours,
        ));

        let lifecycle = LifecycleEngine::new(
            Arc::clone(&router),
            settings.consolidation_interval_secs,
            settings.pruning_interval_secs,
        );

        Ok(Self {
            settings,
            isolation,
            router,
            access,
            limiter,
            audit,
            lifecycle,
            counters: ManagerCounters::default(),
        })
    }

    /// Bring up the storage fabric; starts lifecycle loops when enabled.
    /// Returns false when the durable tier is unavailable.
    pub async fn initialize(&self) -> Result<bool> {
        let ok = self.router.initialize().await?;
        if ok && self.settings.lifecycle_enabled {
            self.lifecycle.start();
        }
        Ok(ok)
    }

    /// Stop background loops and drain them
    pub async fn shutdown(&self) {
        self.lifecycle.stop().await;
    }

    // ------------------------------------------------------------------
    // Auth surface
    // ------------------------------------------------------------------

    /// Authenticate a persona; the returned raw token is shown exactly once
    pub fn authenticate(
        &self,
        persona: &str,
        credentials: Option<&HashMap<String, String>>,
    ) -> Result<IssuedToken> {
        let p: Persona = persona
            .parse()
            .map_err(|e: String| MemoryError::Validation(e))?;
        self.access
            .authenticate(p, credentials)
            .ok_or_else(|| MemoryError::Auth(format!("Authentication failed for {}", p)))
    }

    /// Raw authorization check, exposed for adapters
    pub async fn authorize(
        &self,
        token: &str,
        op: MemoryOp,
        target_persona: Option<&str>,
        kind: Option<MemoryKind>,
    ) -> AuthDecision {
        let target = target_persona.map(|name| Persona::resolve(name).0);
        self.access.authorize(token, op, target, kind).await
    }

    /// Gate a core operation when auth is enabled
    async fn guard(
        &self,
        token: Option<&str>,
        op: MemoryOp,
        target: Persona,
        kind: Option<MemoryKind>,
    ) -> Result<()> {
        if !self.settings.auth_enabled {
            return Ok(());
        }
        let token = token.ok_or_else(|| MemoryError::Auth("Missing token".into()))?;
        let decision = self.access.authorize(token, op, Some(target), kind).await;
        if decision.allowed {
            return Ok(());
        }
        let reason = decision.reason.unwrap_or_else(|| "Denied".into());
        if reason == "Rate limit exceeded" {
            return Err(MemoryError::RateLimited(self.settings.rate_window_secs));
        }
        Err(MemoryError::Unauthorized(reason))
    }

    // ------------------------------------------------------------------
    // Core operations
    // ------------------------------------------------------------------

    /// Store a memory. Kind is inferred from content when absent.
    pub async fn remember(
        &self,
        token: Option<&str>,
        persona: &str,
        content: MemoryContent,
        kind: Option<MemoryKind>,
        importance: f32,
        tags: Vec<String>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<MemoryItem> {
        let (p, _known) = Persona::resolve(persona);
        validate_importance(importance)?;
        if content.approx_len() > self.settings.max_content_bytes {
            return Err(MemoryError::Validation(format!(
                "Content exceeds {} bytes",
                self.settings.max_content_bytes
            )));
        }

        let kind = kind.unwrap_or_else(|| infer_kind(&content));
        self.guard(token, MemoryOp::Store, p, Some(kind)).await?;

        let item = MemoryItem::new(p, kind, content, importance, tags, metadata);
        if let Err(e) = self.router.store(&item).await {
            self.audit.append(
                p.as_str(),
                "backend_failure",
                serde_json::json!({"op": "store", "kind": kind.as_str(), "error": e.redacted()}),
            );
            return Err(e);
        }

        self.counters.total_stores.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(id = %item.id, persona = %p, kind = kind.as_str(), "Stored memory");
        Ok(item)
    }

    /// Persona-scoped search. `semantic` pulls in the vector tiers on top
    /// of the recency view.
    pub async fn recall(
        &self,
        token: Option<&str>,
        persona: &str,
        query_text: &str,
        limit: usize,
        semantic: bool,
    ) -> Result<Vec<MemoryItem>> {
        let (p, _known) = Persona::resolve(persona);
        if limit == 0 {
            return Ok(vec![]);
        }
        self.guard(token, MemoryOp::Search, p, None).await?;

        let mut query = MemoryQuery::text(query_text);
        query.limit = limit;
        query.needs_experience = true;
        query.needs_knowledge = semantic;
        query.needs_procedure = semantic;

        let results = self.retry_idempotent(|| self.router.search(&query, p)).await?;

        for item in &results {
            self.router.record_access(item).await;
        }
        self.counters.total_recalls.fetch_add(1, Ordering::Relaxed);
        Ok(results)
    }

    /// Direct retrieval by id. Authorization is checked against the owning
    /// persona once the item is found; denied lookups reveal nothing.
    pub async fn retrieve_by_id(
        &self,
        token: Option<&str>,
        id: &str,
    ) -> Result<Option<MemoryItem>> {
        let item = self.retry_idempotent(|| self.router.retrieve(id)).await?;
        match item {
            Some(item) => {
                if let Err(e) = self
                    .guard(token, MemoryOp::Retrieve, item.persona, None)
                    .await
                {
                    return Err(e);
                }
                self.router.record_access(&item).await;
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }

    /// Delete from every tier. Idempotent: deleting a missing id succeeds.
    pub async fn delete(&self, token: Option<&str>, id: &str) -> Result<bool> {
        if let Some(existing) = self.router.retrieve(id).await? {
            self.guard(token, MemoryOp::Delete, existing.persona, None)
                .await?;
        }
        self.retry_idempotent(|| self.router.delete(id)).await
    }

    /// Copy memories matching a query from one persona to another. Copies
    /// are new items tagged with their origin.
    pub async fn share(
        &self,
        token: Option<&str>,
        from_persona: &str,
        to_persona: &str,
        query_text: &str,
        limit: usize,
    ) -> Result<usize> {
        let (from, _) = Persona::resolve(from_persona);
        let (to, _) = Persona::resolve(to_persona);

        self.guard(token, MemoryOp::Search, from, None).await?;
        if self.settings.auth_enabled && !self.access.can_share(from, to) {
            return Err(MemoryError::Unauthorized(format!(
                "Sharing not permitted from {} to {}",
                from, to
            )));
        }

        let mut query = MemoryQuery::text(query_text);
        query.limit = limit;
        let sources = self.router.search(&query, from).await?;

        let mut copied = 0;
        for source in sources {
            let mut metadata = source.metadata.clone();
            metadata.insert(
                META_SHARED_FROM.to_string(),
                serde_json::json!(from.as_str()),
            );
            metadata.insert(
                META_SHARED_AT.to_string(),
                serde_json::json!(Utc::now().to_rfc3339()),
            );

            let copy = MemoryItem::new(
                to,
                source.kind,
                source.content.clone(),
                source.importance,
                source.tags.clone(),
                metadata,
            );
            match self.router.store(&copy).await {
                Ok(()) => copied += 1,
                Err(e) => {
                    tracing::warn!(id = %source.id, error = %e, "Share copy failed")
                }
            }
        }

        self.counters.total_shares.fetch_add(1, Ordering::Relaxed);
        self.audit.append(
            from.as_str(),
            "share",
            serde_json::json!({"to": to.as_str(), "copied": copied}),
        );
        tracing::info!(from = %from, to = %to, copied, "Shared memories");
        Ok(copied)
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub async fn stats(&self) -> serde_json::Value {
        let mut backends = serde_json::Map::new();
        for stats in self.router.stats().await {
            backends.insert(
                stats.backend.clone(),
                serde_json::json!({
                    "connected": stats.connected,
                    "item_count": stats.item_count,
                    "details": stats.details,
                }),
            );
        }

        let personas: serde_json::Map<String, serde_json::Value> = Persona::agents()
            .iter()
            .map(|p| {
                let status = self.isolation.status(*p);
                (
                    p.as_str().to_string(),
                    serde_json::json!({
                        "namespace_id": status.namespace_id,
                        "max_items": status.max_items,
                        "ttl_multiplier": status.ttl_multiplier,
                    }),
                )
            })
            .collect();

        serde_json::json!({
            "manager": {
                "total_stores": self.counters.total_stores.load(Ordering::Relaxed),
                "total_recalls": self.counters.total_recalls.load(Ordering::Relaxed),
                "total_shares": self.counters.total_shares.load(Ordering::Relaxed),
            },
            "personas": personas,
            "backends": backends,
            "cache": self.router.cache_stats(),
            "audit_entries": self.audit.len(),
            "active_tokens": self.access.token_count(),
            "rate_limiter": {
                "mode": if self.limiter.using_fallback() { "fallback" } else { "distributed" },
                "limit": self.settings.rate_limit,
                "window_secs": self.settings.rate_window_secs,
            },
        })
    }

    pub async fn health(&self) -> ServiceHealth {
        self.router.health().await
    }

    /// Immediate lifecycle passes, outside the schedule
    pub async fn consolidate_now(&self, persona: &str) -> Result<ConsolidationReport> {
        let (p, _) = Persona::resolve(persona);
        self.lifecycle.consolidate_now(p).await
    }

    pub async fn prune_now(&self, persona: &str) -> Result<PruneReport> {
        let (p, _) = Persona::resolve(persona);
        self.lifecycle.prune_now(p).await
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn access(&self) -> &Arc<AccessControl> {
        &self.access
    }

    /// Edge rate limiter, for HTTP adapters
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn audit_log(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    pub fn isolation(&self) -> &Arc<PersonaIsolation> {
        &self.isolation
    }

    pub fn router(&self) -> &Arc<HybridRouter> {
        &self.router
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// Retry an idempotent backend call once with a short backoff
    async fn retry_idempotent<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        match f().await {
            Ok(value) => Ok(value),
            Err(e) if e.is_retryable() => {
                tracing::debug!(error = %e, "Retrying idempotent operation");
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                f().await
            }
            Err(e) => Err(e),
        }
    }
}
