//! The in-memory copy of every page and the rules for changing it.
//!
//! Every mutation follows the same order: authorize, change memory, persist
//! the page, then append the audit entry describing it.  A failed persist is
//! returned as [`TrackerError::StorageFailure`] without undoing the in-memory
//! change and without an audit entry.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use taxtrack_audit::{AuditAction, AuditLog};
use taxtrack_core::{
    ADMIN_ID, ALL_SUBJECT, Identity, PageCollection, PageStats, PersonRecord, Session, TaxStatus,
    TrackerError, TrackerResult, Verification, VerifierRef,
};
use taxtrack_remote::{RemotePage, RemoteSnapshot, VerifyType};
use taxtrack_store::{PageStore, SeedProvider};

use crate::policy;
use crate::sheets::SheetMap;

/// Fold `remote` into `local`.  Returns whether anything changed.
///
/// Records are matched by id and never created.  Each field is copied only
/// when the remote supplies it and it differs, so merging the same remote
/// page twice changes nothing the second time.
pub fn merge(local: &mut PageCollection, remote: &RemotePage) -> bool {
    if remote.is_empty() {
        return false;
    }

    let mut changed = false;
    for incoming in &remote.personnel {
        let Some(record) = local.find_mut(&incoming.id) else {
            continue;
        };

        if let Some(status) = incoming.tax_status {
            if status != record.tax_status {
                record.tax_status = status;
                changed = true;
            }
        }

        let record_name = record.full_name();
        match record.verification.as_mut() {
            Some(existing) => {
                let mut verifier_changed = false;
                if let Some(by) = &incoming.verified_by {
                    if !same_verifier(&existing.verified_by, by) {
                        existing.verified_by = by.clone();
                        verifier_changed = true;
                        changed = true;
                    }
                }
                if let Some(at) = incoming.verified_at {
                    if at != existing.verified_at {
                        existing.verified_at = at;
                        changed = true;
                    }
                }
                // Flags describe whoever verified last, so they follow the verifier.
                if verifier_changed || incoming.verify_type.is_some() {
                    let flags = verification_flags(
                        incoming.verify_type,
                        &existing.verified_by,
                        &record.id,
                        &record_name,
                    );
                    if flags != (existing.is_self_verified, existing.is_admin_verified) {
                        (existing.is_self_verified, existing.is_admin_verified) = flags;
                        changed = true;
                    }
                }
            }
            None => {
                if let (Some(by), Some(at)) = (&incoming.verified_by, incoming.verified_at) {
                    let (is_self_verified, is_admin_verified) =
                        verification_flags(incoming.verify_type, by, &record.id, &record_name);
                    record.verification = Some(Verification {
                        verified_by: by.clone(),
                        verified_at: at,
                        is_self_verified,
                        is_admin_verified,
                    });
                    changed = true;
                }
            }
        }
    }
    changed
}

/// `(is_self_verified, is_admin_verified)` for a remote verification.
/// Without a verify type the verifier is compared with the record and the
/// administrator, by id or, for name-only references, by name.
fn verification_flags(
    verify_type: Option<VerifyType>,
    by: &VerifierRef,
    record_id: &str,
    record_name: &str,
) -> (bool, bool) {
    match verify_type {
        Some(VerifyType::SelfVerified) => (true, false),
        Some(VerifyType::Admin) => (false, true),
        None if by.id.is_empty() => (
            by.name == record_name,
            by.name == Identity::admin().full_name(),
        ),
        None => (by.id == record_id, by.id == ADMIN_ID),
    }
}

/// Sheets often carry the verifier's name only; a name-only reference is
/// compared by name.
fn same_verifier(local: &VerifierRef, remote: &VerifierRef) -> bool {
    if remote.id.is_empty() {
        local.name == remote.name
    } else {
        local == remote
    }
}

fn status_details(old: TaxStatus, new: TaxStatus, page_key: &str) -> Map<String, Value> {
    let mut details = Map::new();
    details.insert("oldStatus".to_string(), json!(old));
    details.insert("newStatus".to_string(), json!(new));
    details.insert("pageKey".to_string(), json!(page_key));
    details
}

pub struct Reconciler {
    pages: PageStore,
    seed: Arc<dyn SeedProvider>,
    audit: Arc<AuditLog>,
    order: Vec<String>,
    data: BTreeMap<String, PageCollection>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("pages", &self.order)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Load every seed page from the store, seeding and persisting the ones
    /// that are missing or unreadable.
    pub fn load(pages: PageStore, seed: Arc<dyn SeedProvider>, audit: Arc<AuditLog>) -> Self {
        let order = seed.page_keys();
        let mut data = BTreeMap::new();
        for key in &order {
            let page = match pages.load_page(key) {
                Some(page) => page,
                None => {
                    let Some(page) = seed.seed_page(key) else {
                        continue;
                    };
                    if let Err(err) = pages.save_page(key, &page) {
                        warn!(page = %key, error = %err, "failed to persist seeded page");
                    }
                    debug!(page = %key, "page seeded");
                    page
                }
            };
            data.insert(key.clone(), page);
        }
        Self {
            pages,
            seed,
            audit,
            order,
            data,
        }
    }

    pub fn page_keys(&self) -> &[String] {
        &self.order
    }

    pub fn page(&self, page_key: &str) -> Option<&PageCollection> {
        self.data.get(page_key)
    }

    pub fn page_stats(&self, page_key: &str) -> PageStats {
        self.data
            .get(page_key)
            .map(PageCollection::stats)
            .unwrap_or_default()
    }

    pub fn overall_stats(&self) -> PageStats {
        self.data.values().map(PageCollection::stats).sum()
    }

    pub fn last_updated(&self, page_key: &str) -> Option<chrono::DateTime<Utc>> {
        self.pages.last_updated(page_key)
    }

    fn page_mut(&mut self, page_key: &str) -> TrackerResult<&mut PageCollection> {
        self.data
            .get_mut(page_key)
            .ok_or_else(|| TrackerError::not_found(format!("no page {page_key}")))
    }

    fn persist(&self, page_key: &str) -> TrackerResult<()> {
        let Some(page) = self.data.get(page_key) else {
            return Ok(());
        };
        self.pages.save_page(page_key, page).map(|_| ()).map_err(|err| {
            warn!(page = %page_key, error = %err, "failed to persist page");
            TrackerError::from(err)
        })
    }

    fn record_audit(
        &self,
        session: &Session,
        action: AuditAction,
        subject: &str,
        details: Map<String, Value>,
    ) {
        if let Err(err) = self.audit.append(Some(session), action, subject, details) {
            warn!(error = %err, action = %action, person = %subject, "failed to append audit entry");
        }
    }

    /// Merge one remote page; persists at most once.
    pub fn merge_page(&mut self, page_key: &str, remote: &RemotePage) -> TrackerResult<bool> {
        let Some(local) = self.data.get_mut(page_key) else {
            return Ok(false);
        };
        let changed = merge(local, remote);
        if changed {
            self.persist(page_key)?;
            info!(page = %page_key, changed, "merged remote changes");
        }
        Ok(changed)
    }

    /// Merge every known page present in `snapshot`.  All pages are
    /// attempted; the first persist failure is returned afterwards.
    pub fn merge_snapshot(
        &mut self,
        snapshot: &RemoteSnapshot,
        sheets: &SheetMap,
    ) -> TrackerResult<bool> {
        let mut changed = false;
        let mut first_err = None;
        for key in self.order.clone() {
            let remote = snapshot
                .page(sheets.sheet_for(&key))
                .or_else(|| snapshot.page(&key));
            let Some(remote) = remote else {
                continue;
            };
            match self.merge_page(&key, remote) {
                Ok(page_changed) => changed |= page_changed,
                Err(err) => {
                    first_err.get_or_insert(err);
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(changed),
        }
    }

    pub fn apply_mutation(
        &mut self,
        session: &Session,
        page_key: &str,
        person_id: &str,
        new_status: TaxStatus,
    ) -> TrackerResult<PersonRecord> {
        policy::require_mutation(session, person_id)?;

        let page = self.page_mut(page_key)?;
        let record = page.find_mut(person_id).ok_or_else(|| {
            TrackerError::not_found(format!("no person {person_id} on page {page_key}"))
        })?;
        let old_status = record.tax_status;
        record.verify(
            new_status,
            Verification {
                verified_by: session.user.as_verifier(),
                verified_at: Utc::now(),
                is_self_verified: session.is_subject(person_id),
                is_admin_verified: session.is_admin,
            },
        );
        let updated = record.clone();

        self.persist(page_key)?;
        self.record_audit(
            session,
            AuditAction::StatusChange,
            person_id,
            status_details(old_status, new_status, page_key),
        );
        info!(page = %page_key, person = %person_id, status = %new_status, "status updated");
        Ok(updated)
    }

    /// Administrator update of several records.  Unknown and repeated ids
    /// are skipped; the page is persisted once.
    pub fn apply_batch_mutation(
        &mut self,
        session: &Session,
        page_key: &str,
        person_ids: &[String],
        new_status: TaxStatus,
    ) -> TrackerResult<Vec<PersonRecord>> {
        policy::require_admin(session, "batch update")?;

        let now = Utc::now();
        let verifier = session.user.as_verifier();
        let page = self.page_mut(page_key)?;
        let mut updated = Vec::new();
        let mut old_statuses = Vec::new();
        let mut seen = BTreeSet::new();
        for id in person_ids {
            if !seen.insert(id.as_str()) {
                continue;
            }
            let Some(record) = page.find_mut(id) else {
                debug!(page = %page_key, person = %id, "batch update skipped unknown id");
                continue;
            };
            old_statuses.push(record.tax_status);
            record.verify(
                new_status,
                Verification {
                    verified_by: verifier.clone(),
                    verified_at: now,
                    is_self_verified: session.is_subject(id),
                    is_admin_verified: session.is_admin,
                },
            );
            updated.push(record.clone());
        }
        if updated.is_empty() {
            return Ok(updated);
        }

        self.persist(page_key)?;
        for (record, old_status) in updated.iter().zip(old_statuses) {
            let mut details = status_details(old_status, new_status, page_key);
            details.insert("batch".to_string(), json!(true));
            self.record_audit(session, AuditAction::StatusChange, &record.id, details);
        }
        info!(page = %page_key, count = updated.len(), status = %new_status, "batch status update");
        Ok(updated)
    }

    pub fn mark_all_filed(
        &mut self,
        session: &Session,
        page_key: &str,
    ) -> TrackerResult<Vec<PersonRecord>> {
        policy::require_admin(session, "mark all as filed")?;
        let ids: Vec<String> = self
            .page_mut(page_key)?
            .personnel
            .iter()
            .map(|p| p.id.clone())
            .collect();
        self.apply_batch_mutation(session, page_key, &ids, TaxStatus::Filed)
    }

    /// Clear status and verification of every record on the page.
    pub fn reset_page(&mut self, session: &Session, page_key: &str) -> TrackerResult<usize> {
        policy::require_admin(session, "page reset")?;

        let page = self.page_mut(page_key)?;
        page.personnel.iter_mut().for_each(PersonRecord::clear);
        let count = page.personnel.len();

        self.persist(page_key)?;
        let mut details = Map::new();
        details.insert("pageKey".to_string(), json!(page_key));
        self.record_audit(session, AuditAction::ResetPage, ALL_SUBJECT, details);
        info!(page = %page_key, count, "page reset");
        Ok(count)
    }

    /// Wipe every persisted page and the audit history, then reseed.  The
    /// only surviving audit entry is the one describing the reset.
    pub fn factory_reset(&mut self, session: &Session) -> TrackerResult<()> {
        policy::require_admin(session, "factory reset")?;

        let removed = self.pages.clear_pages()?;
        self.audit.clear()?;

        self.order = self.seed.page_keys();
        self.data.clear();
        let mut first_err = None;
        for key in self.order.clone() {
            let Some(page) = self.seed.seed_page(&key) else {
                continue;
            };
            self.data.insert(key.clone(), page);
            if let Err(err) = self.persist(&key) {
                first_err.get_or_insert(err);
            }
        }
        if let Some(err) = first_err {
            return Err(err);
        }

        let mut details = Map::new();
        details.insert("pages".to_string(), json!(self.order.len()));
        self.record_audit(session, AuditAction::FactoryReset, ALL_SUBJECT, details);
        info!(removed, "factory reset complete");
        Ok(())
    }

    /// Re-read one page after another process wrote it.
    pub fn reload_page(&mut self, page_key: &str) -> bool {
        if !self.data.contains_key(page_key) {
            return false;
        }
        match self.pages.load_page(page_key) {
            Some(page) if self.data.get(page_key) != Some(&page) => {
                self.data.insert(page_key.to_string(), page);
                debug!(page = %page_key, "page reloaded from store");
                true
            }
            _ => false,
        }
    }

    pub fn store(&self) -> &PageStore {
        &self.pages
    }
}
