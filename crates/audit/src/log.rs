use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};
use tracing::{debug, warn};

use taxtrack_core::{Session, TaxStatus};
use taxtrack_store::{KeyValueStore, PageStore, StoreError};

use crate::entry::{AuditAction, AuditEntry, VerificationInfo};

/// Default number of entries retained.
pub const DEFAULT_MAX_ENTRIES: usize = 1000;

/// Append-only, bounded audit trail persisted as one JSON array.
///
/// Appends are read-modify-write on a single key; the internal lock keeps
/// concurrent appends from the same process from losing entries.
pub struct AuditLog {
    kv: Arc<dyn KeyValueStore>,
    key: String,
    max_entries: usize,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("key", &self.key)
            .field("max_entries", &self.max_entries)
            .finish_non_exhaustive()
    }
}

impl AuditLog {
    pub fn new(kv: Arc<dyn KeyValueStore>, key: impl Into<String>, max_entries: usize) -> Self {
        Self {
            kv,
            key: key.into(),
            max_entries: max_entries.max(1),
            write_lock: Mutex::new(()),
        }
    }

    /// Audit log living next to the pages of `pages`, under `<prefix>audit_log`.
    pub fn for_pages(pages: &PageStore, max_entries: usize) -> Self {
        Self::new(Arc::clone(pages.kv()), pages.audit_key(), max_entries)
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn append(
        &self,
        session: Option<&Session>,
        action: AuditAction,
        person_id: &str,
        details: Map<String, Value>,
    ) -> Result<AuditEntry, StoreError> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let entry = AuditEntry::new(session, action, person_id, details);
        let mut entries = self.all();
        entries.push(entry.clone());
        if entries.len() > self.max_entries {
            let excess = entries.len() - self.max_entries;
            entries.drain(..excess);
        }

        let raw = serde_json::to_string(&entries).map_err(|source| StoreError::Codec {
            key: self.key.clone(),
            source,
        })?;
        self.kv.set(&self.key, &raw)?;
        debug!(action = %action, person = %person_id, "audit entry appended");
        Ok(entry)
    }

    /// Every entry in chronological order.  A missing or malformed log reads
    /// as empty.
    pub fn all(&self) -> Vec<AuditEntry> {
        let raw = match self.kv.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(err) => {
                warn!(key = %self.key, error = %err, "audit log unreadable; treating as empty");
                return Vec::new();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|err| {
            warn!(key = %self.key, error = %err, "malformed audit log; treating as empty");
            Vec::new()
        })
    }

    /// The last `n` entries, most recent first.
    pub fn recent(&self, n: usize) -> Vec<AuditEntry> {
        let mut entries = self.all();
        let start = entries.len().saturating_sub(n);
        entries.drain(..start);
        entries.reverse();
        entries
    }

    /// Entries whose subject is `person_id`, chronological.
    pub fn for_person(&self, person_id: &str) -> Vec<AuditEntry> {
        self.all()
            .into_iter()
            .filter(|e| e.person_id == person_id)
            .collect()
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.kv.remove(&self.key)
    }

    fn last_status_change(&self, person_id: &str) -> Option<AuditEntry> {
        self.all()
            .into_iter()
            .rev()
            .find(|e| e.person_id == person_id && e.action == AuditAction::StatusChange)
    }

    pub fn verification_info(&self, person_id: &str) -> Option<VerificationInfo> {
        self.last_status_change(person_id)
            .as_ref()
            .map(VerificationInfo::from)
    }

    /// Whether the latest status change of `person_id` was the person
    /// marking themselves as filed.
    pub fn is_self_verified(&self, person_id: &str) -> bool {
        self.last_status_change(person_id).is_some_and(|e| {
            e.is_self_verification && e.new_status() == Some(TaxStatus::Filed)
        })
    }
}
