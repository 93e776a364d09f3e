//! Core types for Mnemos

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use crate::persona::Persona;

/// Unique identifier for a memory (opaque; UUID v4 text)
pub type MemoryId = String;

/// Memory kind classification
///
/// The kind drives storage routing: `working` lives in the fast tier,
/// `episodic` is recent-first with a durable archive, `semantic` and
/// `procedural` are indexed for similarity search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    /// Transient scratch state, short TTL
    #[default]
    Working,
    /// Events with temporal context
    Episodic,
    /// Concepts and knowledge
    Semantic,
    /// Learned patterns and how-to steps
    Procedural,
}

impl MemoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryKind::Working => "working",
            MemoryKind::Episodic => "episodic",
            MemoryKind::Semantic => "semantic",
            MemoryKind::Procedural => "procedural",
        }
    }

    pub fn all() -> &'static [MemoryKind] {
        &[
            MemoryKind::Working,
            MemoryKind::Episodic,
            MemoryKind::Semantic,
            MemoryKind::Procedural,
        ]
    }

    /// Long-term kinds have an authoritative durable table
    pub fn is_long_term(&self) -> bool {
        !matches!(self, MemoryKind::Working)
    }

    /// Kinds that are indexed for similarity search
    pub fn needs_semantic_index(&self) -> bool {
        matches!(self, MemoryKind::Semantic | MemoryKind::Procedural)
    }
}

impl std::fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MemoryKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "working" => Ok(MemoryKind::Working),
            "episodic" => Ok(MemoryKind::Episodic),
            "semantic" => Ok(MemoryKind::Semantic),
            "procedural" => Ok(MemoryKind::Procedural),
            _ => Err(format!("Unknown memory kind: {}", s)),
        }
    }
}

/// Memory payload: free text or a structured map
///
/// The variant is preserved on round-trip: a string stays a string, an
/// object stays an object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MemoryContent {
    Text(String),
    Structured(serde_json::Map<String, serde_json::Value>),
}

impl MemoryContent {
    /// Flattened text view used for classification, search, and embedding
    pub fn as_text(&self) -> String {
        match self {
            MemoryContent::Text(s) => s.clone(),
            MemoryContent::Structured(map) => serde_json::Value::Object(map.clone()).to_string(),
        }
    }

    /// Approximate serialized size in bytes, for validation
    pub fn approx_len(&self) -> usize {
        match self {
            MemoryContent::Text(s) => s.len(),
            MemoryContent::Structured(map) => serde_json::Value::Object(map.clone())
                .to_string()
                .len(),
        }
    }
}

impl From<&str> for MemoryContent {
    fn from(s: &str) -> Self {
        MemoryContent::Text(s.to_string())
    }
}

impl From<String> for MemoryContent {
    fn from(s: String) -> Self {
        MemoryContent::Text(s)
    }
}

/// Metadata key marking a cross-persona copy with its source persona
pub const META_SHARED_FROM: &str = "shared_from";
/// Metadata key carrying the share timestamp (ISO-8601)
pub const META_SHARED_AT: &str = "shared_at";

fn default_importance() -> f32 {
    0.5
}

/// A memory item - the unit of storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryItem {
    /// Unique identifier, assigned on create, immutable
    pub id: MemoryId,
    /// Owning persona (lowercased, closed set)
    pub persona: Persona,
    /// Memory kind; immutable after creation except for consolidation
    pub kind: MemoryKind,
    /// Payload, text or structured
    pub content: MemoryContent,
    /// Importance score in [0.0, 1.0]; drives ranking and retention
    #[serde(default = "default_importance")]
    pub importance: f32,
    /// Creation time (UTC)
    pub timestamp: DateTime<Utc>,
    /// Last read/write time; monotonic
    pub last_access: DateTime<Utc>,
    /// Number of successful recalls; never decreases
    #[serde(default)]
    pub access_count: u32,
    /// Tags for filtering
    #[serde(default)]
    pub tags: Vec<String>,
    /// Free-form metadata; `shared_from` / `shared_at` are reserved
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Embedding vector, materialized lazily by the vector tier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl MemoryItem {
    /// Create a fresh item with a generated id and current timestamps
    pub fn new(
        persona: Persona,
        kind: MemoryKind,
        content: MemoryContent,
        importance: f32,
        tags: Vec<String>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            persona,
            kind,
            content,
            importance,
            timestamp: now,
            last_access: now,
            access_count: 0,
            tags,
            metadata,
            embedding: None,
        }
    }

    /// Age since creation, in seconds
    pub fn age_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.timestamp).num_seconds()
    }

    /// Record a successful recall; `last_access` only moves forward
    pub fn mark_accessed(&mut self, now: DateTime<Utc>) {
        self.access_count = self.access_count.saturating_add(1);
        if now > self.last_access {
            self.last_access = now;
        }
    }

    /// Whether this item was copied from another persona
    pub fn shared_from(&self) -> Option<&str> {
        self.metadata.get(META_SHARED_FROM).and_then(|v| v.as_str())
    }
}

/// Query against the store
///
/// The `needs_*` flags select which tiers participate in a search:
/// experience hits the fast recency tier, knowledge and procedure hit the
/// vector index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryQuery {
    /// Free-text query
    pub text: String,
    /// Pre-computed query embedding; computed from `text` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Maximum number of results
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Similarity floor for vector hits
    #[serde(default)]
    pub min_similarity: f32,
    /// Include recent/working results
    #[serde(default = "default_true")]
    pub needs_experience: bool,
    /// Include semantic knowledge results
    #[serde(default = "default_true")]
    pub needs_knowledge: bool,
    /// Include procedural results
    #[serde(default = "default_true")]
    pub needs_procedure: bool,
    /// Restrict to specific kinds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<MemoryKind>>,
    /// Require all of these tags
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

fn default_limit() -> usize {
    5
}

fn default_true() -> bool {
    true
}

impl MemoryQuery {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            embedding: None,
            limit: default_limit(),
            min_similarity: 0.0,
            needs_experience: true,
            needs_knowledge: true,
            needs_procedure: true,
            kinds: None,
            tags: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_min_similarity(mut self, threshold: f32) -> Self {
        self.min_similarity = threshold;
        self
    }

    /// Does `kind` pass the kind filter?
    pub fn wants_kind(&self, kind: MemoryKind) -> bool {
        match &self.kinds {
            Some(kinds) => kinds.contains(&kind),
            None => true,
        }
    }

    /// Do the item's tags satisfy the tag filter?
    pub fn matches_tags(&self, tags: &[String]) -> bool {
        match &self.tags {
            Some(wanted) => wanted.iter().all(|t| tags.iter().any(|have| have == t)),
            None => true,
        }
    }
}

// ============================================================================
// Kind classification
// ============================================================================

/// Keywords that mark procedural content
pub const PROCEDURAL_KEYWORDS: &[&str] = &["method", "algorithm", "process", "steps", "procedure"];

/// Keywords that mark semantic (conceptual) content
pub const SEMANTIC_KEYWORDS: &[&str] = &["concept", "definition", "theory", "principle", "rule"];

/// Additional semantic cues recognized at the ingest boundary
pub const SEMANTIC_INGEST_KEYWORDS: &[&str] = &["architecture", "design"];

/// Episodic cues recognized at the ingest boundary
pub const EPISODIC_INGEST_KEYWORDS: &[&str] = &["event", "happened", "occurred", "did", "was"];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|w| haystack.contains(w))
}

/// Infer the kind of incoming content with no explicit kind.
///
/// Procedural and semantic cues win over episodic ones; content matching
/// nothing lands in working memory and gets promoted (or not) later by
/// consolidation.
pub fn infer_kind(content: &MemoryContent) -> MemoryKind {
    let text = content.as_text().to_lowercase();

    if contains_any(&text, PROCEDURAL_KEYWORDS) {
        MemoryKind::Procedural
    } else if contains_any(&text, SEMANTIC_KEYWORDS)
        || contains_any(&text, SEMANTIC_INGEST_KEYWORDS)
    {
        MemoryKind::Semantic
    } else if contains_any(&text, EPISODIC_INGEST_KEYWORDS) {
        MemoryKind::Episodic
    } else {
        MemoryKind::Working
    }
}

/// Infer the long-term kind for a working item being consolidated.
///
/// Unlike [`infer_kind`], never returns `Working`: anything without a
/// procedural or semantic cue is archived as an episode.
pub fn infer_long_term_kind(content: &MemoryContent) -> MemoryKind {
    let text = content.as_text().to_lowercase();

    if contains_any(&text, PROCEDURAL_KEYWORDS) {
        MemoryKind::Procedural
    } else if contains_any(&text, SEMANTIC_KEYWORDS) {
        MemoryKind::Semantic
    } else {
        MemoryKind::Episodic
    }
}

// ============================================================================
// Validation
// ============================================================================

/// Validate an importance score
pub fn validate_importance(importance: f32) -> crate::error::Result<f32> {
    if !(0.0..=1.0).contains(&importance) || importance.is_nan() {
        return Err(crate::error::MemoryError::Validation(format!(
            "Importance must be in [0.0, 1.0], got {}",
            importance
        )));
    }
    Ok(importance)
}

// ============================================================================
// Health
// ============================================================================

/// Overall service health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthState::Healthy => write!(f, "healthy"),
            HealthState::Degraded => write!(f, "degraded"),
            HealthState::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Health report across the storage fabric
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub status: HealthState,
    pub timestamp: DateTime<Utc>,
    /// Backend name -> "healthy" / "unhealthy" / "disabled"
    pub backends: HashMap<String, String>,
}
