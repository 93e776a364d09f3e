//! Bounded append-only audit log
//!
//! A ring of the last 10,000 access-control events. Appends are O(1); the
//! admin query path filters by persona and operation.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Number of entries retained
pub const AUDIT_CAPACITY: usize = 10_000;

/// One audit event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    /// Persona name as presented (unknown names are recorded verbatim)
    pub persona: String,
    pub operation: String,
    pub details: serde_json::Value,
}

/// Append-only ring buffer of audit records
pub struct AuditLog {
    entries: Mutex<VecDeque<AuditRecord>>,
    capacity: usize,
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new(AUDIT_CAPACITY)
    }
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    /// Append an event, dropping the oldest entry when full
    pub fn append(&self, persona: &str, operation: &str, details: serde_json::Value) {
        let record = AuditRecord {
            timestamp: Utc::now(),
            persona: persona.to_string(),
            operation: operation.to_string(),
            details,
        };
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(record);
    }

    /// Most recent entries matching the filters, oldest first
    pub fn query(
        &self,
        persona: Option<&str>,
        operation: Option<&str>,
        limit: usize,
    ) -> Vec<AuditRecord> {
        let entries = self.entries.lock();
        let matching: Vec<AuditRecord> = entries
            .iter()
            .filter(|r| persona.map(|p| r.persona == p).unwrap_or(true))
            .filter(|r| operation.map(|op| r.operation == op).unwrap_or(true))
            .cloned()
            .collect();
        let skip = matching.len().saturating_sub(limit);
        matching.into_iter().skip(skip).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_query() {
        let log = AuditLog::new(100);
        log.append("athena", "authenticate", serde_json::json!({"status": "success"}));
        log.append("artemis", "authorize_store", serde_json::json!({}));
        log.append("athena", "authorize_search", serde_json::json!({}));

        assert_eq!(log.len(), 3);
        assert_eq!(log.query(Some("athena"), None, 10).len(), 2);
        assert_eq!(log.query(None, Some("authorize_store"), 10).len(), 1);
        assert_eq!(log.query(Some("athena"), Some("authenticate"), 10).len(), 1);
    }

    #[test]
    fn test_ring_is_bounded() {
        let log = AuditLog::new(5);
        for i in 0..12 {
            log.append("athena", "op", serde_json::json!({ "i": i }));
        }
        assert_eq!(log.len(), 5);
        // Oldest entries were dropped
        let entries = log.query(None, None, 10);
        assert_eq!(entries.first().unwrap().details["i"], serde_json::json!(7));
        assert_eq!(entries.last().unwrap().details["i"], serde_json::json!(11));
    }

    #[test]
    fn test_query_limit_takes_most_recent() {
        let log = AuditLog::new(100);
        for i in 0..10 {
            log.append("seshat", "op", serde_json::json!({ "i": i }));
        }
        let entries = log.query(Some("seshat"), None, 3);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries.last().unwrap().details["i"], serde_json::json!(9));
    }
}
