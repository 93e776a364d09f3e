//! The closed persona set and per-persona memory profiles
//!
//! Personas are the primary isolation boundary. The set is closed: unknown
//! names are flagged at the boundary and routed to `shared`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::types::MemoryKind;

/// A named agent identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Persona {
    Athena,
    Artemis,
    Hestia,
    Bellona,
    Seshat,
    /// Cross-persona shared artifacts
    Shared,
    /// System-level data (audit, security logs)
    System,
}

impl Persona {
    pub fn as_str(&self) -> &'static str {
        match self {
            Persona::Athena => "athena",
            Persona::Artemis => "artemis",
            Persona::Hestia => "hestia",
            Persona::Bellona => "bellona",
            Persona::Seshat => "seshat",
            Persona::Shared => "shared",
            Persona::System => "system",
        }
    }

    /// All members of the closed set
    pub fn all() -> &'static [Persona] {
        &[
            Persona::Athena,
            Persona::Artemis,
            Persona::Hestia,
            Persona::Bellona,
            Persona::Seshat,
            Persona::Shared,
            Persona::System,
        ]
    }

    /// The five agent personas that own memory and background loops
    pub fn agents() -> &'static [Persona] {
        &[
            Persona::Athena,
            Persona::Artemis,
            Persona::Hestia,
            Persona::Bellona,
            Persona::Seshat,
        ]
    }

    pub fn is_agent(&self) -> bool {
        !matches!(self, Persona::Shared | Persona::System)
    }

    /// Logical namespace number on the fast tier
    pub fn namespace_id(&self) -> u8 {
        match self {
            Persona::Athena => 0,
            Persona::Artemis => 1,
            Persona::Hestia => 2,
            Persona::Bellona => 3,
            Persona::Seshat => 4,
            Persona::Shared => 5,
            Persona::System => 6,
        }
    }

    /// Resolve an external name. Unknown names fall back to `shared`;
    /// the second element is false when the fallback was taken.
    pub fn resolve(name: &str) -> (Persona, bool) {
        match name.parse() {
            Ok(p) => (p, true),
            Err(_) => {
                tracing::warn!(persona = name, "Unknown persona, routing to shared");
                (Persona::Shared, false)
            }
        }
    }
}

impl std::fmt::Display for Persona {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Persona {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "athena" => Ok(Persona::Athena),
            "artemis" => Ok(Persona::Artemis),
            "hestia" => Ok(Persona::Hestia),
            "bellona" => Ok(Persona::Bellona),
            "seshat" => Ok(Persona::Seshat),
            "shared" => Ok(Persona::Shared),
            "system" => Ok(Persona::System),
            other => Err(format!("Unknown persona: {}", other)),
        }
    }
}

/// Retention priority of a memory kind for one persona
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KindPriority {
    Low,
    Medium,
    High,
}

impl KindPriority {
    /// Integer weight in [1, 5] used by the forgetting curve
    pub fn value(&self) -> u8 {
        match self {
            KindPriority::Low => 1,
            KindPriority::Medium => 3,
            KindPriority::High => 5,
        }
    }
}

/// Per-persona memory profile: namespace quota, TTL scaling, retention
/// priorities and focus keywords
#[derive(Debug, Clone)]
pub struct PersonaProfile {
    pub persona: Persona,
    /// Maximum memories held for this persona
    pub max_items: u64,
    /// Multiplier applied to every fast-tier TTL
    pub ttl_multiplier: f64,
    /// privileged personas get extended oversight in the access matrix
    pub privileged: bool,
    /// Retention priority per kind; kinds absent here read as Medium
    pub priorities: HashMap<MemoryKind, KindPriority>,
    /// Content keywords that force consolidation of working memory
    pub focus: &'static [&'static str],
}

impl PersonaProfile {
    /// Priority for a kind, defaulting to Medium when unconfigured
    pub fn priority(&self, kind: MemoryKind) -> KindPriority {
        self.priorities
            .get(&kind)
            .copied()
            .unwrap_or(KindPriority::Medium)
    }

    fn plain(persona: Persona) -> Self {
        Self {
            persona,
            max_items: 1_000_000,
            ttl_multiplier: 1.0,
            privileged: false,
            priorities: HashMap::new(),
            focus: &[],
        }
    }
}

static PROFILES: Lazy<HashMap<Persona, PersonaProfile>> = Lazy::new(|| {
    use KindPriority::*;
    use MemoryKind::*;

    let mut map = HashMap::new();

    // Strategic planning keeps data longer and needs more headroom
    map.insert(
        Persona::Athena,
        PersonaProfile {
            persona: Persona::Athena,
            max_items: 1_500_000,
            ttl_multiplier: 1.2,
            privileged: true,
            priorities: HashMap::from([(Semantic, High), (Episodic, Medium), (Procedural, High)]),
            focus: &["architecture", "planning", "strategy", "team", "project"],
        },
    );

    // Technical data expires faster
    map.insert(
        Persona::Artemis,
        PersonaProfile {
            persona: Persona::Artemis,
            max_items: 1_000_000,
            ttl_multiplier: 0.8,
            privileged: false,
            priorities: HashMap::from([(Procedural, High), (Semantic, High), (Episodic, Low)]),
            focus: &["optimization", "performance", "algorithm", "efficiency", "code"],
        },
    );

    // Security logs are kept longest among the core agents
    map.insert(
        Persona::Hestia,
        PersonaProfile {
            persona: Persona::Hestia,
            max_items: 1_200_000,
            ttl_multiplier: 1.5,
            privileged: true,
            priorities: HashMap::from([(Episodic, High), (Semantic, High), (Procedural, High)]),
            focus: &["security", "vulnerability", "threat", "risk", "compliance"],
        },
    );

    // Tactical data is transient
    map.insert(
        Persona::Bellona,
        PersonaProfile {
            persona: Persona::Bellona,
            max_items: 800_000,
            ttl_multiplier: 0.6,
            privileged: false,
            priorities: HashMap::from([(Procedural, High), (Episodic, Medium), (Semantic, Medium)]),
            focus: &["execution", "tactics", "resources", "timeline", "coordination"],
        },
    );

    // Documentation archive: most space, longest retention
    map.insert(
        Persona::Seshat,
        PersonaProfile {
            persona: Persona::Seshat,
            max_items: 2_000_000,
            ttl_multiplier: 2.0,
            privileged: true,
            priorities: HashMap::from([(Semantic, High), (Procedural, High), (Episodic, Medium)]),
            focus: &["documentation", "knowledge", "organization", "retrieval", "standards"],
        },
    );

    map.insert(Persona::Shared, PersonaProfile::plain(Persona::Shared));
    map.insert(Persona::System, PersonaProfile::plain(Persona::System));

    map
});

/// Profile lookup; every member of the closed set has one
pub fn profile(persona: Persona) -> &'static PersonaProfile {
    PROFILES
        .get(&persona)
        .unwrap_or_else(|| &PROFILES[&Persona::Shared])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persona_roundtrip() {
        for p in Persona::all() {
            let parsed: Persona = p.as_str().parse().unwrap();
            assert_eq!(*p, parsed);
        }
    }

    #[test]
    fn test_resolve_unknown_falls_back_to_shared() {
        let (p, known) = Persona::resolve("zeus");
        assert_eq!(p, Persona::Shared);
        assert!(!known);

        let (p, known) = Persona::resolve("  Athena ");
        assert_eq!(p, Persona::Athena);
        assert!(known);
    }

    #[test]
    fn test_namespace_ids_unique() {
        let mut seen = std::collections::HashSet::new();
        for p in Persona::all() {
            assert!(seen.insert(p.namespace_id()));
        }
    }

    #[test]
    fn test_missing_priority_defaults_to_medium() {
        // No agent profile configures a working-memory priority
        let profile = profile(Persona::Athena);
        assert_eq!(profile.priority(MemoryKind::Working), KindPriority::Medium);
        assert_eq!(profile.priority(MemoryKind::Semantic), KindPriority::High);
    }

    #[test]
    fn test_every_persona_has_profile() {
        for p in Persona::all() {
            let prof = profile(*p);
            assert_eq!(prof.persona, *p);
        }
    }

    #[test]
    fn test_agent_focus_nonempty() {
        for p in Persona::agents() {
            assert!(!profile(*p).focus.is_empty());
        }
    }
}
