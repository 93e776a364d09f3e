//! Token-based access control
//!
//! Personas authenticate to receive an opaque token; the server keeps only
//! the SHA-256 of it. Authorization walks a fixed sequence: token validity,
//! per-persona rate check, operation permission, kind permission, then the
//! cross-persona matrix. Every decision that matters lands in the audit
//! ring.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::persona::Persona;
use crate::security::audit::AuditLog;
use crate::security::rate_limit::RateLimiter;
use crate::types::MemoryKind;

/// Access levels, ordered: each level includes everything below it
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    None,
    Read,
    Write,
    Delete,
    Admin,
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::None => "none",
            AccessLevel::Read => "read",
            AccessLevel::Write => "write",
            AccessLevel::Delete => "delete",
            AccessLevel::Admin => "admin",
        }
    }
}

/// Operations subject to authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryOp {
    Store,
    Retrieve,
    Search,
    Delete,
    Update,
    List,
}

impl MemoryOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryOp::Store => "store",
            MemoryOp::Retrieve => "retrieve",
            MemoryOp::Search => "search",
            MemoryOp::Delete => "delete",
            MemoryOp::Update => "update",
            MemoryOp::List => "list",
        }
    }

    pub fn all() -> &'static [MemoryOp] {
        &[
            MemoryOp::Store,
            MemoryOp::Retrieve,
            MemoryOp::Search,
            MemoryOp::Delete,
            MemoryOp::Update,
            MemoryOp::List,
        ]
    }

    pub fn is_read(&self) -> bool {
        matches!(self, MemoryOp::Retrieve | MemoryOp::Search | MemoryOp::List)
    }

    pub fn is_write(&self) -> bool {
        matches!(self, MemoryOp::Store | MemoryOp::Update)
    }
}

impl std::fmt::Display for MemoryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server-side token claims. Only the hash is stored; the raw token is
/// returned once at authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    pub token_hash: String,
    pub persona: Persona,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub access_level: AccessLevel,
    pub allowed_ops: HashSet<MemoryOp>,
    pub allowed_kinds: HashSet<MemoryKind>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl AccessToken {
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    pub fn can_perform(&self, op: MemoryOp) -> bool {
        self.allowed_ops.contains(&op)
    }
}

/// Authentication result: the raw token (show once) plus its claims
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: AccessToken,
}

/// Per-persona policy in the cross-persona matrix
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessPolicy {
    pub persona: Persona,
    pub can_read_from: HashSet<Persona>,
    pub can_write_to: HashSet<Persona>,
    pub can_share_with: HashSet<Persona>,
    pub restricted_kinds: HashSet<MemoryKind>,
    pub max_memory_size: u64,
    pub rate_limit_per_minute: u32,
}

/// Admin-applied policy changes; `None` fields are untouched
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PolicyUpdate {
    pub can_read_from: Option<HashSet<Persona>>,
    pub can_write_to: Option<HashSet<Persona>>,
    pub can_share_with: Option<HashSet<Persona>>,
    pub rate_limit_per_minute: Option<u32>,
}

/// Outcome of an authorization check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl AuthDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Operations allowed at an access level
fn ops_for_level(level: AccessLevel) -> HashSet<MemoryOp> {
    let mut ops = HashSet::new();
    if level >= AccessLevel::Read {
        ops.extend([MemoryOp::Retrieve, MemoryOp::Search, MemoryOp::List]);
    }
    if level >= AccessLevel::Write {
        ops.extend([MemoryOp::Store, MemoryOp::Update]);
    }
    if level >= AccessLevel::Delete {
        ops.insert(MemoryOp::Delete);
    }
    if level >= AccessLevel::Admin {
        ops.extend(MemoryOp::all().iter().copied());
    }
    ops
}

fn personas(list: &[Persona]) -> HashSet<Persona> {
    list.iter().copied().collect()
}

/// The static access matrix: who reads from, writes to, and shares with
/// whom, and at which level
fn default_matrix() -> HashMap<Persona, (AccessPolicy, AccessLevel)> {
    use Persona::*;
    let mut map = HashMap::new();

    // Strategic oversight reads everything
    map.insert(
        Athena,
        (
            AccessPolicy {
                persona: Athena,
                can_read_from: personas(&[Shared, Artemis, Hestia, Bellona, Seshat]),
                can_write_to: personas(&[Shared, Athena]),
                can_share_with: personas(&[Artemis, Hestia, Bellona, Seshat]),
                restricted_kinds: HashSet::new(),
                max_memory_size: 1_500_000,
                rate_limit_per_minute: 1000,
            },
            AccessLevel::Admin,
        ),
    );

    // Technical work stays within its own lane
    map.insert(
        Artemis,
        (
            AccessPolicy {
                persona: Artemis,
                can_read_from: personas(&[Shared, Artemis]),
                can_write_to: personas(&[Shared, Artemis]),
                can_share_with: personas(&[Athena, Hestia]),
                restricted_kinds: HashSet::new(),
                max_memory_size: 1_000_000,
                rate_limit_per_minute: 1000,
            },
            AccessLevel::Write,
        ),
    );

    // Security oversight reads everything, writes security logs to system
    map.insert(
        Hestia,
        (
            AccessPolicy {
                persona: Hestia,
                can_read_from: personas(&[Shared, Athena, Artemis, Hestia, Bellona, Seshat]),
                can_write_to: personas(&[Shared, Hestia, System]),
                can_share_with: personas(&[Athena]),
                restricted_kinds: HashSet::new(),
                max_memory_size: 1_200_000,
                rate_limit_per_minute: 1000,
            },
            AccessLevel::Admin,
        ),
    );

    // Tactical coordination
    map.insert(
        Bellona,
        (
            AccessPolicy {
                persona: Bellona,
                can_read_from: personas(&[Shared, Bellona, Athena]),
                can_write_to: personas(&[Shared, Bellona]),
                can_share_with: personas(&[Athena, Artemis, Seshat]),
                restricted_kinds: HashSet::new(),
                max_memory_size: 800_000,
                rate_limit_per_minute: 1000,
            },
            AccessLevel::Write,
        ),
    );

    // Documentation reads everything, shares with everyone
    map.insert(
        Seshat,
        (
            AccessPolicy {
                persona: Seshat,
                can_read_from: personas(&[Shared, Athena, Artemis, Hestia, Bellona, Seshat]),
                can_write_to: personas(&[Shared, Seshat]),
                can_share_with: personas(&[Athena, Artemis, Hestia, Bellona]),
                restricted_kinds: HashSet::new(),
                max_memory_size: 2_000_000,
                rate_limit_per_minute: 1000,
            },
            AccessLevel::Write,
        ),
    );

    map
}

/// Token issuance, authorization, and the cross-persona matrix
pub struct AccessControl {
    tokens: DashMap<String, AccessToken>,
    policies: RwLock<HashMap<Persona, AccessPolicy>>,
    levels: HashMap<Persona, AccessLevel>,
    audit: Arc<AuditLog>,
    limiter: Arc<RateLimiter>,
    token_ttl: Duration,
}

impl AccessControl {
    pub fn new(audit: Arc<AuditLog>, limiter: Arc<RateLimiter>, token_ttl_hours: i64) -> Self {
        let matrix = default_matrix();
        let mut policies = HashMap::new();
        let mut levels = HashMap::new();
        for (persona, (policy, level)) in matrix {
            policies.insert(persona, policy);
            levels.insert(persona, level);
        }
        tracing::info!(personas = policies.len(), "Access policies initialized");
        Self {
            tokens: DashMap::new(),
            policies: RwLock::new(policies),
            levels,
            audit,
            limiter,
            token_ttl: Duration::hours(token_ttl_hours.max(1)),
        }
    }

    fn hash_token(raw: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(raw.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn generate_token() -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    pub fn level_of(&self, persona: Persona) -> AccessLevel {
        self.levels
            .get(&persona)
            .copied()
            .unwrap_or(AccessLevel::None)
    }

    /// Issue a token for a persona in the matrix. Unknown or non-agent
    /// personas cannot authenticate.
    pub fn authenticate(
        &self,
        persona: Persona,
        _credentials: Option<&HashMap<String, String>>,
    ) -> Option<IssuedToken> {
        let policies = self.policies.read();
        if !policies.contains_key(&persona) {
            tracing::warn!(persona = %persona, "Authentication failed: persona not in matrix");
            return None;
        }
        let policy = &policies[&persona];
        let level = self.level_of(persona);

        let raw = Self::generate_token();
        let token_hash = Self::hash_token(&raw);
        let now = Utc::now();

        let allowed_kinds: HashSet<MemoryKind> = MemoryKind::all()
            .iter()
            .copied()
            .filter(|k| !policy.restricted_kinds.contains(k))
            .collect();

        let claims = AccessToken {
            token_hash: token_hash.clone(),
            persona,
            created_at: now,
            expires_at: now + self.token_ttl,
            access_level: level,
            allowed_ops: ops_for_level(level),
            allowed_kinds,
            metadata: HashMap::new(),
        };
        drop(policies);

        self.tokens.insert(token_hash, claims.clone());
        self.audit.append(
            persona.as_str(),
            "authenticate",
            serde_json::json!({"status": "success", "level": level.as_str()}),
        );
        tracing::info!(persona = %persona, level = level.as_str(), "Authenticated");

        Some(IssuedToken { token: raw, claims })
    }

    /// Authorize an operation. `token` is the raw token as handed to the
    /// caller; it is hashed for lookup.
    pub async fn authorize(
        &self,
        token: &str,
        op: MemoryOp,
        target_persona: Option<Persona>,
        kind: Option<MemoryKind>,
    ) -> AuthDecision {
        let token_hash = Self::hash_token(token);
        let now = Utc::now();

        let claims = match self.tokens.get(&token_hash) {
            Some(entry) => entry.clone(),
            None => return AuthDecision::deny("Invalid token"),
        };

        if !claims.is_valid(now) {
            self.tokens.remove(&token_hash);
            return AuthDecision::deny("Token expired");
        }

        // Per-persona sliding window
        let limit = self
            .policy_of(claims.persona)
            .map(|p| p.rate_limit_per_minute)
            .unwrap_or(1000);
        let rate = self
            .limiter
            .check_limit(&format!("persona:{}", claims.persona), limit)
            .await;
        if !rate.allowed {
            self.audit.append(
                claims.persona.as_str(),
                "rate_limit_exceeded",
                serde_json::json!({"retry_after": rate.retry_after}),
            );
            return AuthDecision::deny("Rate limit exceeded");
        }

        if !claims.can_perform(op) {
            self.audit.append(
                claims.persona.as_str(),
                "authorize_denied",
                serde_json::json!({"op": op.as_str(), "reason": "operation"}),
            );
            return AuthDecision::deny(format!("Operation {} not allowed", op));
        }

        if let Some(kind) = kind {
            if !claims.allowed_kinds.contains(&kind) {
                return AuthDecision::deny(format!("Memory kind {} not allowed", kind));
            }
        }

        if let Some(target) = target_persona {
            if target != claims.persona
                && !self.cross_persona_allowed(claims.persona, target, op)
            {
                self.audit.append(
                    claims.persona.as_str(),
                    "authorize_denied",
                    serde_json::json!({
                        "op": op.as_str(),
                        "target": target.as_str(),
                        "reason": "cross_persona",
                    }),
                );
                return AuthDecision::deny(format!(
                    "Cross-persona access denied from {} to {}",
                    claims.persona, target
                ));
            }
        }

        self.audit.append(
            claims.persona.as_str(),
            &format!("authorize_{}", op),
            serde_json::json!({
                "target": target_persona.map(|p| p.as_str()),
                "kind": kind.map(|k| k.as_str()),
            }),
        );
        AuthDecision::allow()
    }

    fn cross_persona_allowed(&self, source: Persona, target: Persona, op: MemoryOp) -> bool {
        let policies = self.policies.read();
        let Some(policy) = policies.get(&source) else {
            return false;
        };

        if op.is_read() {
            return policy.can_read_from.contains(&target);
        }
        if op.is_write() {
            return policy.can_write_to.contains(&target);
        }
        // Cross-persona delete takes admin level
        if op == MemoryOp::Delete {
            return self.level_of(source) == AccessLevel::Admin;
        }
        false
    }

    /// Revoke a token (raw form, as held by the caller)
    pub fn revoke_token(&self, token: &str) -> bool {
        let token_hash = Self::hash_token(token);
        match self.tokens.remove(&token_hash) {
            Some((_, claims)) => {
                self.audit.append(
                    claims.persona.as_str(),
                    "revoke_token",
                    serde_json::json!({"status": "success"}),
                );
                tracing::info!(persona = %claims.persona, "Token revoked");
                true
            }
            None => false,
        }
    }

    /// Drop expired tokens; returns how many were removed
    pub fn cleanup_expired_tokens(&self) -> usize {
        let now = Utc::now();
        let before = self.tokens.len();
        self.tokens.retain(|_, claims| claims.is_valid(now));
        let removed = before - self.tokens.len();
        if removed > 0 {
            tracing::info!(removed, "Cleaned up expired tokens");
        }
        removed
    }

    /// Live token summaries (no hashes leave this module)
    pub fn active_tokens(&self) -> Vec<(Persona, DateTime<Utc>, DateTime<Utc>, AccessLevel)> {
        let now = Utc::now();
        self.tokens
            .iter()
            .filter(|e| e.value().is_valid(now))
            .map(|e| {
                let c = e.value();
                (c.persona, c.created_at, c.expires_at, c.access_level)
            })
            .collect()
    }

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    pub fn policy_of(&self, persona: Persona) -> Option<AccessPolicy> {
        self.policies.read().get(&persona).cloned()
    }

    /// Can `from` push copies of its memories to `to`?
    pub fn can_share(&self, from: Persona, to: Persona) -> bool {
        self.policies
            .read()
            .get(&from)
            .map(|p| p.can_share_with.contains(&to))
            .unwrap_or(false)
    }

    /// Admin path: mutate a persona's policy
    pub fn update_policy(&self, persona: Persona, updates: PolicyUpdate) -> bool {
        let mut policies = self.policies.write();
        let Some(policy) = policies.get_mut(&persona) else {
            return false;
        };
        if let Some(read) = updates.can_read_from {
            policy.can_read_from = read;
        }
        if let Some(write) = updates.can_write_to {
            policy.can_write_to = write;
        }
        if let Some(share) = updates.can_share_with {
            policy.can_share_with = share;
        }
        if let Some(limit) = updates.rate_limit_per_minute {
            policy.rate_limit_per_minute = limit;
        }
        drop(policies);

        self.audit.append(
            Persona::System.as_str(),
            "update_policy",
            serde_json::json!({"persona": persona.as_str()}),
        );
        tracing::info!(persona = %persona, "Access policy updated");
        true
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }
}
