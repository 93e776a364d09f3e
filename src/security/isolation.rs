//! Persona isolation: namespace mapping and per-persona limits
//!
//! Each persona maps to a fixed logical namespace on the fast tier, with
//! its own quota and TTL scaling. Handle construction never fails: unknown
//! personas get the `shared` namespace and a warning.

use std::collections::HashMap;

use chrono::Duration;
use serde::Serialize;

use crate::persona::{profile, Persona};
use crate::types::MemoryKind;

/// A handle onto a persona's isolated namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamespaceHandle {
    pub persona: Persona,
    pub namespace_id: u8,
    /// True when the handle is a shared-namespace fallback
    pub fallback: bool,
}

/// Isolation status report for one persona
#[derive(Debug, Clone, Serialize)]
pub struct IsolationStatus {
    pub persona: Persona,
    pub namespace_id: u8,
    pub max_items: u64,
    pub ttl_multiplier: f64,
    pub privileged: bool,
}

/// Maps personas to isolated namespaces and applies per-persona policy
#[derive(Debug)]
pub struct PersonaIsolation {
    handles: HashMap<Persona, NamespaceHandle>,
}

impl Default for PersonaIsolation {
    fn default() -> Self {
        Self::new()
    }
}

impl PersonaIsolation {
    pub fn new() -> Self {
        let mut handles = HashMap::new();
        for p in Persona::all() {
            handles.insert(
                *p,
                NamespaceHandle {
                    persona: *p,
                    namespace_id: p.namespace_id(),
                    fallback: false,
                },
            );
        }
        tracing::debug!(personas = handles.len(), "Persona isolation initialized");
        Self { handles }
    }

    /// Namespace handle for a known persona; infallible
    pub fn handle(&self, persona: Persona) -> NamespaceHandle {
        match self.handles.get(&persona) {
            Some(h) => *h,
            // Closed set means this arm is unreachable for enum personas,
            // but the fallback contract is: shared, never an error.
            None => self.fallback_handle(),
        }
    }

    /// Resolve an external name to a handle. Unknown names land on the
    /// shared namespace, flagged.
    pub fn handle_for_name(&self, name: &str) -> NamespaceHandle {
        let (persona, known) = Persona::resolve(name);
        let mut handle = self.handle(persona);
        handle.fallback = !known;
        handle
    }

    fn fallback_handle(&self) -> NamespaceHandle {
        NamespaceHandle {
            persona: Persona::Shared,
            namespace_id: Persona::Shared.namespace_id(),
            fallback: true,
        }
    }

    /// Per-persona TTL scaling applied to every fast-tier TTL
    pub fn ttl_multiplier(&self, persona: Persona) -> f64 {
        profile(persona).ttl_multiplier
    }

    /// Scale a base TTL (seconds) by the persona's multiplier
    pub fn scaled_ttl(&self, persona: Persona, base_secs: u64) -> Duration {
        let scaled = (base_secs as f64 * self.ttl_multiplier(persona)).round() as i64;
        Duration::seconds(scaled.max(1))
    }

    /// Item quota for the persona's namespace
    pub fn max_items(&self, persona: Persona) -> u64 {
        profile(persona).max_items
    }

    pub fn status(&self, persona: Persona) -> IsolationStatus {
        let prof = profile(persona);
        IsolationStatus {
            persona,
            namespace_id: persona.namespace_id(),
            max_items: prof.max_items,
            ttl_multiplier: prof.ttl_multiplier,
            privileged: prof.privileged,
        }
    }

    /// Base TTL in seconds for a kind, before persona scaling
    pub fn base_ttl_secs(kind: MemoryKind, working: u64, episodic: u64, cache: u64) -> u64 {
        match kind {
            MemoryKind::Working => working,
            MemoryKind::Episodic => episodic,
            MemoryKind::Semantic | MemoryKind::Procedural => cache,
        }
    }
}
