//! Append-only audit trail of attack operations.
//!
//! Every start, stop and smart-targeting upgrade lands here and is
//! mirrored to the log. The in-memory window is bounded; the storage
//! sink receives entries for durable keeping when persistence is on.

use crate::types::MacAddr;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use tracing::info;
use uuid::Uuid;

/// In-memory audit window.
const AUDIT_CAP: usize = 4_096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuditKind {
    DeauthStart,
    DeauthStop,
    AuthFloodStart,
    AuthFloodStop,
    WpsStart,
    WpsStop,
    SmartTargeting,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub at: DateTime<Utc>,
    pub kind: AuditKind,
    pub target: Option<MacAddr>,
    pub attack_id: Option<Uuid>,
    pub message: String,
}

pub struct AuditLog {
    entries: Mutex<VecDeque<AuditEntry>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self { entries: Mutex::new(VecDeque::new()) }
    }

    pub fn record(
        &self,
        kind: AuditKind,
        target: Option<MacAddr>,
        attack_id: Option<Uuid>,
        message: impl Into<String>,
    ) {
        let entry = AuditEntry {
            at: Utc::now(),
            kind,
            target,
            attack_id,
            message: message.into(),
        };
        info!("audit {:?}: {}", entry.kind, entry.message);
        let mut entries = self.entries.lock();
        if entries.len() >= AUDIT_CAP {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Test/query helper: does any entry's message contain `needle`?
    pub fn contains(&self, needle: &str) -> bool {
        self.entries.lock().iter().any(|e| e.message.contains(needle))
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_query() {
        let log = AuditLog::new();
        assert!(log.is_empty());
        log.record(AuditKind::DeauthStart, None, None, "Deauth started against X");
        assert_eq!(log.len(), 1);
        assert!(log.contains("started against"));
        assert!(!log.contains("unrelated"));
    }

    #[test]
    fn test_bounded() {
        let log = AuditLog::new();
        for i in 0..AUDIT_CAP + 10 {
            log.record(AuditKind::WpsStop, None, None, format!("entry {i} done"));
        }
        assert_eq!(log.len(), AUDIT_CAP);
        assert!(!log.contains("entry 0 done"));
        assert!(log.contains("entry 4000 done"));
    }
}
