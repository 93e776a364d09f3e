//! Property-based tests
//!
//! Invariants that must hold for all inputs: retention stays in bounds and
//! responds monotonically to its drivers, classification never panics, the
//! sliding window never over-admits, and persona resolution is total.
//!
//! Run with: cargo test --test property_tests

use proptest::prelude::*;

use chrono::{Duration, Utc};
use std::collections::HashMap;

use mnemos::lifecycle::{prune_threshold, retention};
use mnemos::persona::{profile, Persona};
use mnemos::security::{client_key, InProcessWindows};
use mnemos::types::{
    infer_kind, infer_long_term_kind, validate_importance, MemoryContent, MemoryItem, MemoryKind,
};

fn item(
    persona: Persona,
    kind: MemoryKind,
    importance: f32,
    access_count: u32,
    days_old: i64,
) -> MemoryItem {
    let mut m = MemoryItem::new(
        persona,
        kind,
        MemoryContent::Text("content".into()),
        importance,
        vec![],
        HashMap::new(),
    );
    m.access_count = access_count;
    m.last_access = Utc::now() - Duration::days(days_old);
    m
}

fn any_persona() -> impl Strategy<Value = Persona> {
    prop::sample::select(Persona::all().to_vec())
}

fn any_kind() -> impl Strategy<Value = MemoryKind> {
    prop::sample::select(MemoryKind::all().to_vec())
}

// ============================================================================
// FORGETTING CURVE
// ============================================================================

proptest! {
    /// Retention is always a probability
    #[test]
    fn retention_in_unit_interval(
        persona in any_persona(),
        kind in any_kind(),
        importance in 0.0f32..=1.0,
        access_count in 0u32..10_000,
        days_old in 0i64..5_000,
    ) {
        let m = item(persona, kind, importance, access_count, days_old);
        let r = retention(&m, profile(persona), Utc::now());
        prop_assert!((0.0..=1.0).contains(&r));
    }

    /// More recalls never lower retention
    #[test]
    fn retention_monotonic_in_access_count(
        persona in any_persona(),
        kind in any_kind(),
        importance in 0.0f32..=1.0,
        access_count in 0u32..1_000,
        days_old in 0i64..1_000,
    ) {
        let now = Utc::now();
        let quiet = item(persona, kind, importance, access_count, days_old);
        let busy = item(persona, kind, importance, access_count + 1, days_old);
        prop_assert!(
            retention(&busy, profile(persona), now)
                >= retention(&quiet, profile(persona), now)
        );
    }

    /// Higher importance never lowers retention
    #[test]
    fn retention_monotonic_in_importance(
        persona in any_persona(),
        kind in any_kind(),
        importance in 0.0f32..=0.9,
        days_old in 0i64..1_000,
    ) {
        let now = Utc::now();
        let low = item(persona, kind, importance, 0, days_old);
        let high = item(persona, kind, importance + 0.1, 0, days_old);
        prop_assert!(
            retention(&high, profile(persona), now)
                >= retention(&low, profile(persona), now)
        );
    }

    /// For an old, never-recalled, unimportant episode only the persona's
    /// kind-priority bonus remains; pruning eligibility follows from it
    #[test]
    fn stale_episode_retention_is_priority_bonus(
        persona in any_persona(),
        days_old in 365i64..5_000,
    ) {
        let prof = profile(persona);
        let m = item(persona, MemoryKind::Episodic, 0.0, 0, days_old);
        let r = retention(&m, prof, Utc::now());

        let bonus = prof.priority(MemoryKind::Episodic).value() as f64 / 5.0 * 0.2;
        prop_assert!((r - bonus).abs() < 0.01);

        // Personas that de-prioritize episodes (bonus below the threshold)
        // see them pruned; the rest retain them by design
        let threshold = prune_threshold(MemoryKind::Episodic).unwrap();
        prop_assert_eq!(r < threshold, bonus < threshold - 0.01);
    }
}

// ============================================================================
// KIND CLASSIFICATION
// ============================================================================

proptest! {
    /// Classification is total: never panics, always lands in the enum
    #[test]
    fn infer_kind_total(s in "\\PC*") {
        let content = MemoryContent::Text(s);
        let _ = infer_kind(&content);
        let long_term = infer_long_term_kind(&content);
        prop_assert!(long_term != MemoryKind::Working);
    }

    /// A procedural keyword always wins
    #[test]
    fn procedural_keyword_dominates(prefix in "[a-z ]{0,20}", suffix in "[a-z ]{0,20}") {
        let content = MemoryContent::Text(format!("{} algorithm {}", prefix, suffix));
        prop_assert_eq!(infer_kind(&content), MemoryKind::Procedural);
        prop_assert_eq!(infer_long_term_kind(&content), MemoryKind::Procedural);
    }

    /// Classification is case-insensitive
    #[test]
    fn classification_case_insensitive(word in prop::sample::select(vec![
        "CONCEPT", "Definition", "tHeOrY", "PRINCIPLE", "Rule",
    ])) {
        let content = MemoryContent::Text(format!("a {} to remember", word));
        prop_assert_eq!(infer_long_term_kind(&content), MemoryKind::Semantic);
    }
}

// ============================================================================
// VALIDATION
// ============================================================================

proptest! {
    /// Importance validation accepts exactly [0, 1]
    #[test]
    fn importance_validation_bounds(x in -10.0f32..10.0) {
        let result = validate_importance(x);
        if (0.0..=1.0).contains(&x) {
            prop_assert!(result.is_ok());
        } else {
            prop_assert!(result.is_err());
        }
    }

    /// Persona resolution is total and always lands in the closed set
    #[test]
    fn persona_resolution_total(s in "\\PC*") {
        let (p, known) = Persona::resolve(&s);
        if !known {
            prop_assert_eq!(p, Persona::Shared);
        }
        prop_assert!(Persona::all().contains(&p));
    }
}

// ============================================================================
// SLIDING WINDOW
// ============================================================================

proptest! {
    /// The window never admits more than the limit
    #[test]
    fn window_never_over_admits(
        limit in 1u32..20,
        requests in 1usize..60,
        spacing_ms in 0i64..500,
    ) {
        let windows = InProcessWindows::new();
        let window = Duration::seconds(10);
        let start = Utc::now();

        let mut admitted_in_window = 0u32;
        for i in 0..requests {
            let now = start + Duration::milliseconds(spacing_ms * i as i64);
            let slide = windows.slide_sync("k", now, window, limit);
            if slide.allowed {
                admitted_in_window += 1;
            }
            // Every prefix that fits inside one window obeys the limit
            if now - start <= window {
                prop_assert!(admitted_in_window <= limit);
            }
            prop_assert!(slide.count <= limit);
        }
    }

    /// Distinct keys never interfere
    #[test]
    fn window_keys_independent(limit in 1u32..5, extra in 1usize..10) {
        let windows = InProcessWindows::new();
        let window = Duration::seconds(60);
        let now = Utc::now();

        for _ in 0..(limit as usize + extra) {
            windows.slide_sync("a", now, window, limit);
        }
        // Key "b" is untouched by key "a" exhausting its budget
        let slide = windows.slide_sync("b", now, window, limit);
        prop_assert!(slide.allowed);
    }

    /// Client keys are deterministic and persona-preferring
    #[test]
    fn client_key_deterministic(ip in "[0-9.]{1,15}", ua in "[a-z/0-9.]{0,20}") {
        let anon1 = client_key(&ip, &ua, None);
        let anon2 = client_key(&ip, &ua, None);
        prop_assert_eq!(&anon1, &anon2);

        let authed = client_key(&ip, &ua, Some("athena"));
        prop_assert!(authed.ends_with("athena"));
    }
}
