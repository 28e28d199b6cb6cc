use std::collections::BTreeMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use taxtrack_audit::AuditLog;
use taxtrack_config::AppConfig;
use taxtrack_core::{
    PageCollection, PageStats, PersonRecord, Session, TaxStatus, TrackerError, TrackerResult,
};
use taxtrack_remote::RemoteSync;
use taxtrack_store::{KeyValueStore, PageStore, SeedProvider};

use crate::auth::Authenticator;
use crate::directory::PersonnelDirectory;
use crate::reconcile::Reconciler;
use crate::session::SessionManager;
use crate::sheets::SheetMap;
use crate::sync::SyncService;

/// Process-wide entry point: every service, built once and shared by handle.
///
/// Mutations require a valid persisted session and are pushed to the remote
/// in the background after they are stored locally.
pub struct Tracker {
    reconciler: Arc<Mutex<Reconciler>>,
    sync: Arc<SyncService>,
    sessions: Arc<SessionManager>,
    audit: Arc<AuditLog>,
    directory: Arc<PersonnelDirectory>,
    auth: Authenticator,
    poll_interval: Duration,
    pending_pushes: StdMutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Tracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracker")
            .field("sync", &self.sync)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl Tracker {
    pub fn new(
        config: &AppConfig,
        kv: Arc<dyn KeyValueStore>,
        seed: Arc<dyn SeedProvider>,
        remote: Option<Arc<dyn RemoteSync>>,
    ) -> Self {
        let pages = PageStore::new(kv, config.store.key_prefix.clone());
        let audit = Arc::new(AuditLog::for_pages(&pages, config.audit.max_entries));
        let sessions = Arc::new(SessionManager::for_pages(
            &pages,
            config.session.max_age_hours,
        ));
        let directory = Arc::new(PersonnelDirectory::from_seed(seed.as_ref()));
        let auth = Authenticator::new(
            Arc::clone(&sessions),
            Arc::clone(&directory),
            Arc::clone(&audit),
            config.session.admin_pin.clone(),
        );
        let sync = Arc::new(SyncService::new(
            remote,
            SheetMap::new(config.remote.sheet_names.clone()),
        ));
        let reconciler = Reconciler::load(pages, seed, Arc::clone(&audit));

        Self {
            reconciler: Arc::new(Mutex::new(reconciler)),
            sync,
            sessions,
            audit,
            directory,
            auth,
            poll_interval: Duration::from_secs(config.sync.poll_interval_secs.max(1)),
            pending_pushes: StdMutex::new(Vec::new()),
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn directory(&self) -> &PersonnelDirectory {
        &self.directory
    }

    pub fn auth(&self) -> &Authenticator {
        &self.auth
    }

    pub fn sync(&self) -> &SyncService {
        &self.sync
    }

    pub fn reconciler(&self) -> Arc<Mutex<Reconciler>> {
        Arc::clone(&self.reconciler)
    }

    fn track_push(&self, push: Option<JoinHandle<()>>) {
        if let Some(handle) = push {
            self.pending_pushes
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(handle);
        }
    }

    /// Wait up to `timeout` for background pushes to finish.  Pushes still
    /// running afterwards are abandoned.
    pub async fn flush_pushes(&self, timeout: Duration) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self
                .pending_pushes
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        if handles.is_empty() {
            return;
        }
        let count = handles.len();
        let all = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(timeout, all).await.is_err() {
            warn!(count, "remote pushes still pending at exit; they are dropped");
        } else {
            debug!(count, "remote pushes flushed");
        }
    }

    pub async fn connect(&self) -> bool {
        self.sync.check_connection().await
    }

    pub async fn update_status(
        &self,
        page_key: &str,
        person_id: &str,
        status: TaxStatus,
    ) -> TrackerResult<PersonRecord> {
        let session = self.sessions.require_session()?;
        let record = {
            let mut reconciler = self.reconciler.lock().await;
            reconciler.apply_mutation(&session, page_key, person_id, status)?
        };
        self.track_push(self.sync.push_status(page_key, &record));
        Ok(record)
    }

    pub async fn batch_update(
        &self,
        page_key: &str,
        person_ids: &[String],
        status: TaxStatus,
    ) -> TrackerResult<Vec<PersonRecord>> {
        let session = self.sessions.require_session()?;
        let records = {
            let mut reconciler = self.reconciler.lock().await;
            reconciler.apply_batch_mutation(&session, page_key, person_ids, status)?
        };
        self.track_push(self.sync.push_batch(page_key, &records));
        Ok(records)
    }

    pub async fn mark_all_filed(&self, page_key: &str) -> TrackerResult<Vec<PersonRecord>> {
        let session = self.sessions.require_session()?;
        self.reconciler
            .lock()
            .await
            .mark_all_filed(&session, page_key)
    }

    pub async fn reset_page(&self, page_key: &str) -> TrackerResult<usize> {
        let session = self.sessions.require_session()?;
        self.reconciler.lock().await.reset_page(&session, page_key)
    }

    pub async fn factory_reset(&self) -> TrackerResult<()> {
        let session = self.sessions.require_session()?;
        self.reconciler.lock().await.factory_reset(&session)
    }

    /// Pull from the remote now, connecting first if needed.
    pub async fn sync_now(&self) -> TrackerResult<bool> {
        if !self.sync.is_connected() && !self.sync.check_connection().await {
            return Err(TrackerError::RemoteUnavailable(
                "remote service not reachable".to_string(),
            ));
        }
        self.sync.pull(&self.reconciler).await
    }

    pub fn spawn_polling(&self, shutdown: watch::Receiver<bool>) -> Option<JoinHandle<()>> {
        self.sync
            .spawn_polling(Arc::clone(&self.reconciler), self.poll_interval, shutdown)
    }

    /// React to a store write by another process.  Returns whether any
    /// in-memory page changed.
    pub async fn reload_from_store(&self, store_key: &str) -> bool {
        let mut reconciler = self.reconciler.lock().await;
        let Some(page_key) = reconciler.store().page_key_of(store_key).map(str::to_string) else {
            return false;
        };
        reconciler.reload_page(&page_key)
    }

    /// Every page as currently persisted, keyed by page key.
    pub async fn export_pages(&self) -> TrackerResult<BTreeMap<String, PageCollection>> {
        Ok(self.reconciler.lock().await.store().export_all()?)
    }

    pub fn current_session(&self) -> Option<Session> {
        self.sessions.restore()
    }

    pub async fn page_keys(&self) -> Vec<String> {
        self.reconciler.lock().await.page_keys().to_vec()
    }

    pub async fn page(&self, page_key: &str) -> TrackerResult<PageCollection> {
        self.reconciler
            .lock()
            .await
            .page(page_key)
            .cloned()
            .ok_or_else(|| TrackerError::not_found(format!("no page {page_key}")))
    }

    pub async fn stats(&self, page_key: &str) -> PageStats {
        self.reconciler.lock().await.page_stats(page_key)
    }

    pub async fn overall_stats(&self) -> PageStats {
        self.reconciler.lock().await.overall_stats()
    }

    pub async fn last_updated(&self, page_key: &str) -> Option<DateTime<Utc>> {
        self.reconciler.lock().await.last_updated(page_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    use taxtrack_core::PageCollection;
    use taxtrack_store::{FileStore, MemoryStore, StaticSeedProvider};
    use tempfile::TempDir;

    use crate::sync::tests::FakeRemote;

    fn seed() -> Arc<dyn SeedProvider> {
        Arc::new(StaticSeedProvider::from_pages([(
            "page1",
            PageCollection {
                title: "Officers".to_string(),
                subtitle: "Headquarters".to_string(),
                personnel: vec![
                    PersonRecord::new("hq-001", "Capt.", "Prasert", "Wong"),
                    PersonRecord::new("hq-002", "Lt.", "Kanya", "Srisuk"),
                ],
            },
        )]))
    }

    fn tracker_with(remote: Option<Arc<dyn RemoteSync>>) -> Tracker {
        Tracker::new(
            &AppConfig::default(),
            Arc::new(MemoryStore::new()),
            seed(),
            remote,
        )
    }

    #[tokio::test]
    async fn mutations_require_a_session() {
        let tracker = tracker_with(None);
        let err = tracker
            .update_status("page1", "hq-001", TaxStatus::Filed)
            .await
            .unwrap_err();
        assert!(matches!(err, TrackerError::SessionExpired));
        assert!(tracker.audit().all().is_empty());
    }

    #[tokio::test]
    async fn user_updates_own_record_and_push_is_sent() {
        let remote = FakeRemote::online();
        let tracker = tracker_with(Some(remote.clone() as Arc<dyn RemoteSync>));
        assert!(tracker.connect().await);
        tracker.auth().login_person("hq-002").unwrap();

        let record = tracker
            .update_status("page1", "hq-002", TaxStatus::Filed)
            .await
            .unwrap();
        assert!(record.is_self_verified());
        assert!(matches!(
            tracker
                .update_status("page1", "hq-001", TaxStatus::Filed)
                .await,
            Err(TrackerError::Unauthorized(_))
        ));

        tracker.flush_pushes(Duration::from_secs(5)).await;
        let pushed = remote.pushed.lock().unwrap();
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].2[0].id, "hq-002");
    }

    #[tokio::test]
    async fn admin_page_operations_are_not_pushed() {
        let remote = FakeRemote::online();
        let tracker = tracker_with(Some(remote.clone() as Arc<dyn RemoteSync>));
        tracker.connect().await;
        tracker.auth().login_admin("1919").unwrap();

        assert_eq!(tracker.mark_all_filed("page1").await.unwrap().len(), 2);
        assert_eq!(tracker.overall_stats().await.percentage, 100);
        assert_eq!(tracker.reset_page("page1").await.unwrap(), 2);
        tracker.factory_reset().await.unwrap();
        tracker.flush_pushes(Duration::from_secs(5)).await;
        assert!(remote.pushed.lock().unwrap().is_empty());
        assert!(tracker.current_session().is_some());
    }

    #[tokio::test]
    async fn sync_now_reports_unreachable_remote() {
        let remote = FakeRemote::online();
        remote.online.store(false, Ordering::SeqCst);
        let tracker = tracker_with(Some(remote as Arc<dyn RemoteSync>));
        assert!(matches!(
            tracker.sync_now().await,
            Err(TrackerError::RemoteUnavailable(_))
        ));
        assert!(tracker.sync_now().await.is_err());

        let local = tracker_with(None);
        assert!(local.sync_now().await.is_err());
    }

    #[tokio::test]
    async fn export_reflects_persisted_changes() {
        let tracker = tracker_with(None);
        tracker.auth().login_admin("1919").unwrap();
        tracker
            .update_status("page1", "hq-001", TaxStatus::Filed)
            .await
            .unwrap();

        let exported = tracker.export_pages().await.unwrap();
        assert_eq!(exported.keys().collect::<Vec<_>>(), vec!["page1"]);
        assert_eq!(exported["page1"].stats().filed, 1);
        assert_eq!(exported["page1"], tracker.page("page1").await.unwrap());
    }

    #[tokio::test]
    async fn two_instances_converge_through_the_store() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::default();
        let first = Tracker::new(&config, Arc::new(FileStore::new(dir.path())), seed(), None);
        let second = Tracker::new(&config, Arc::new(FileStore::new(dir.path())), seed(), None);

        second.auth().login_admin("1919").unwrap();
        second
            .batch_update("page1", &["hq-001".to_string()], TaxStatus::NotFiled)
            .await
            .unwrap();

        assert!(first.reload_from_store("vat_tax_page1").await);
        assert!(!first.reload_from_store("vat_tax_session").await);
        assert_eq!(first.stats("page1").await.not_filed, 1);
        // Both instances share one device session.
        assert!(first.current_session().unwrap().is_admin);
    }
}
