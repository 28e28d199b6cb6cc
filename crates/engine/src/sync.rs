use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use taxtrack_core::{PersonRecord, TrackerError, TrackerResult};
use taxtrack_remote::{RemoteSync, StatusUpdate};

use crate::reconcile::Reconciler;
use crate::sheets::SheetMap;

/// Talks to the remote service on behalf of the reconciler.
///
/// Without a remote the service runs in local-only mode: pulls fail with
/// `RemoteUnavailable` and pushes are skipped.
pub struct SyncService {
    remote: Option<Arc<dyn RemoteSync>>,
    connected: AtomicBool,
    sheets: SheetMap,
}

impl std::fmt::Debug for SyncService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncService")
            .field("enabled", &self.remote.is_some())
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl SyncService {
    pub fn new(remote: Option<Arc<dyn RemoteSync>>, sheets: SheetMap) -> Self {
        Self {
            remote,
            connected: AtomicBool::new(false),
            sheets,
        }
    }

    pub fn local_only() -> Self {
        Self::new(None, SheetMap::default())
    }

    pub fn is_enabled(&self) -> bool {
        self.remote.is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn sheets(&self) -> &SheetMap {
        &self.sheets
    }

    /// Ping the remote and remember the outcome.
    pub async fn check_connection(&self) -> bool {
        let Some(remote) = &self.remote else {
            return false;
        };
        let ok = match remote.ping().await {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "remote service unreachable");
                false
            }
        };
        let was = self.connected.swap(ok, Ordering::SeqCst);
        if ok != was {
            info!(connected = ok, "remote connection state changed");
        }
        ok
    }

    /// Fetch every page and merge it.  The fetch runs without holding the
    /// reconciler lock.
    pub async fn pull(&self, reconciler: &Mutex<Reconciler>) -> TrackerResult<bool> {
        let Some(remote) = &self.remote else {
            return Err(TrackerError::RemoteUnavailable(
                "no remote service configured".to_string(),
            ));
        };
        let snapshot = match remote.fetch_all().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                self.connected.store(false, Ordering::SeqCst);
                warn!(error = %err, "remote fetch failed");
                return Err(err.into());
            }
        };
        let mut reconciler = reconciler.lock().await;
        reconciler.merge_snapshot(&snapshot, &self.sheets)
    }

    fn push_target(&self) -> Option<Arc<dyn RemoteSync>> {
        let remote = self.remote.as_ref()?;
        if !self.is_connected() {
            debug!("remote not connected; change kept local");
            return None;
        }
        Some(Arc::clone(remote))
    }

    /// Send one record's status to the remote in the background.  Failures
    /// are logged; local state is never rolled back.
    pub fn push_status(&self, page_key: &str, record: &PersonRecord) -> Option<JoinHandle<()>> {
        let remote = self.push_target()?;
        let page_key = page_key.to_string();
        let sheet = self.sheets.sheet_for(&page_key).to_string();
        let update = StatusUpdate::from_record(record);
        Some(tokio::spawn(async move {
            match remote.update_status(&page_key, &sheet, &update).await {
                Ok(()) => debug!(page = %page_key, person = %update.id, "status pushed"),
                Err(err) => {
                    warn!(page = %page_key, person = %update.id, error = %err, "status push failed")
                }
            }
        }))
    }

    pub fn push_batch(&self, page_key: &str, records: &[PersonRecord]) -> Option<JoinHandle<()>> {
        if records.is_empty() {
            return None;
        }
        let remote = self.push_target()?;
        let page_key = page_key.to_string();
        let sheet = self.sheets.sheet_for(&page_key).to_string();
        let updates: Vec<StatusUpdate> = records.iter().map(StatusUpdate::from_record).collect();
        Some(tokio::spawn(async move {
            match remote.batch_update(&page_key, &sheet, &updates).await {
                Ok(()) => debug!(page = %page_key, count = updates.len(), "batch pushed"),
                Err(err) => warn!(page = %page_key, error = %err, "batch push failed"),
            }
        }))
    }

    /// Poll the remote every `period` until `shutdown` flips to `true`.
    ///
    /// While connected each tick pulls and merges; while disconnected each
    /// tick retries the connection.  Returns `None` in local-only mode.
    pub fn spawn_polling(
        self: &Arc<Self>,
        reconciler: Arc<Mutex<Reconciler>>,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> Option<JoinHandle<()>> {
        if !self.is_enabled() {
            return None;
        }
        let sync = Arc::clone(self);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                        continue;
                    }
                }

                if sync.is_connected() {
                    match sync.pull(&reconciler).await {
                        Ok(changed) => debug!(changed, "poll complete"),
                        Err(err) => debug!(error = %err, "poll failed"),
                    }
                } else {
                    let ok = sync.check_connection().await;
                    debug!(connected = ok, "reconnect attempt");
                }
            }
            debug!("polling stopped");
        }))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use chrono::Utc;
    use taxtrack_audit::AuditLog;
    use taxtrack_core::{Identity, PageCollection, Session, TaxStatus};
    use taxtrack_remote::{RemoteError, RemotePage, RemotePerson, RemoteSnapshot};
    use taxtrack_store::{KeyValueStore, MemoryStore, PageStore, StaticSeedProvider};

    /// Scriptable in-memory remote that records every write.
    #[derive(Default)]
    pub(crate) struct FakeRemote {
        pub online: AtomicBool,
        pub snapshot: StdMutex<RemoteSnapshot>,
        pub pushed: StdMutex<Vec<(String, String, Vec<StatusUpdate>)>>,
        pub fetches: std::sync::atomic::AtomicUsize,
    }

    impl FakeRemote {
        pub fn online() -> Arc<Self> {
            let remote = Self::default();
            remote.online.store(true, Ordering::SeqCst);
            Arc::new(remote)
        }

        fn check(&self) -> Result<(), RemoteError> {
            if self.online.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(RemoteError::Http(503))
            }
        }
    }

    #[async_trait]
    impl RemoteSync for FakeRemote {
        async fn ping(&self) -> Result<(), RemoteError> {
            self.check()
        }

        async fn fetch_all(&self) -> Result<RemoteSnapshot, RemoteError> {
            self.check()?;
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.snapshot.lock().unwrap().clone())
        }

        async fn update_status(
            &self,
            page_key: &str,
            sheet: &str,
            update: &StatusUpdate,
        ) -> Result<(), RemoteError> {
            self.check()?;
            self.pushed.lock().unwrap().push((
                page_key.to_string(),
                sheet.to_string(),
                vec![update.clone()],
            ));
            Ok(())
        }

        async fn batch_update(
            &self,
            page_key: &str,
            sheet: &str,
            updates: &[StatusUpdate],
        ) -> Result<(), RemoteError> {
            self.check()?;
            self.pushed.lock().unwrap().push((
                page_key.to_string(),
                sheet.to_string(),
                updates.to_vec(),
            ));
            Ok(())
        }
    }

    fn reconciler() -> Arc<Mutex<Reconciler>> {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let pages = PageStore::new(kv, "vat_tax_");
        let audit = Arc::new(AuditLog::for_pages(&pages, 100));
        let seed = StaticSeedProvider::from_pages([(
            "page1",
            PageCollection {
                title: "Officers".to_string(),
                subtitle: "Headquarters".to_string(),
                personnel: vec![taxtrack_core::PersonRecord::new(
                    "hq-001", "Capt.", "Prasert", "Wong",
                )],
            },
        )]);
        Arc::new(Mutex::new(Reconciler::load(pages, Arc::new(seed), audit)))
    }

    fn filed_snapshot() -> RemoteSnapshot {
        let mut row = RemotePerson::new("hq-001");
        row.tax_status = Some(TaxStatus::Filed);
        RemoteSnapshot {
            pages: BTreeMap::from([(
                "Officers".to_string(),
                RemotePage {
                    personnel: vec![row],
                    last_updated: None,
                },
            )]),
        }
    }

    fn sheets() -> SheetMap {
        SheetMap::new(BTreeMap::from([(
            "page1".to_string(),
            "Officers".to_string(),
        )]))
    }

    #[tokio::test]
    async fn local_only_mode_never_connects() {
        let sync = SyncService::local_only();
        assert!(!sync.check_connection().await);
        assert!(matches!(
            sync.pull(&reconciler()).await,
            Err(TrackerError::RemoteUnavailable(_))
        ));
        let record = taxtrack_core::PersonRecord::new("x", "", "", "");
        assert!(sync.push_status("page1", &record).is_none());
    }

    #[tokio::test]
    async fn pull_merges_under_sheet_name() {
        let remote = FakeRemote::online();
        *remote.snapshot.lock().unwrap() = filed_snapshot();
        let sync = SyncService::new(Some(remote.clone() as Arc<dyn RemoteSync>), sheets());
        let reconciler = reconciler();

        assert!(sync.check_connection().await);
        assert!(sync.pull(&reconciler).await.unwrap());
        assert!(!sync.pull(&reconciler).await.unwrap());
        assert_eq!(reconciler.lock().await.page_stats("page1").filed, 1);
    }

    #[tokio::test]
    async fn failed_fetch_marks_disconnected() {
        let remote = FakeRemote::online();
        let sync = SyncService::new(Some(remote.clone() as Arc<dyn RemoteSync>), sheets());
        assert!(sync.check_connection().await);
        remote.online.store(false, Ordering::SeqCst);
        assert!(sync.pull(&reconciler()).await.is_err());
        assert!(!sync.is_connected());
    }

    #[tokio::test]
    async fn pushes_only_when_connected() {
        let remote = FakeRemote::online();
        let sync = SyncService::new(Some(remote.clone() as Arc<dyn RemoteSync>), sheets());
        let admin = Session::new(Identity::admin(), true, Utc::now());
        let record = reconciler()
            .lock()
            .await
            .apply_mutation(&admin, "page1", "hq-001", TaxStatus::Filed)
            .unwrap();

        assert!(sync.push_status("page1", &record).is_none());

        sync.check_connection().await;
        sync.push_status("page1", &record).unwrap().await.unwrap();
        sync.push_batch("page1", std::slice::from_ref(&record))
            .unwrap()
            .await
            .unwrap();
        assert!(sync.push_batch("page1", &[]).is_none());

        let pushed = remote.pushed.lock().unwrap();
        assert_eq!(pushed.len(), 2);
        assert_eq!(pushed[0].0, "page1");
        assert_eq!(pushed[0].1, "Officers");
        assert_eq!(pushed[0].2[0].verified_by, "Admin");
    }

    #[tokio::test]
    async fn failed_push_keeps_local_state() {
        let remote = FakeRemote::online();
        let sync = SyncService::new(Some(remote.clone() as Arc<dyn RemoteSync>), sheets());
        sync.check_connection().await;
        remote.online.store(false, Ordering::SeqCst);

        let reconciler = reconciler();
        let admin = Session::new(Identity::admin(), true, Utc::now());
        let record = reconciler
            .lock()
            .await
            .apply_mutation(&admin, "page1", "hq-001", TaxStatus::Filed)
            .unwrap();
        sync.push_status("page1", &record).unwrap().await.unwrap();
        assert!(remote.pushed.lock().unwrap().is_empty());
        assert_eq!(reconciler.lock().await.page_stats("page1").filed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn polling_reconnects_then_pulls_until_shutdown() {
        let remote = FakeRemote::online();
        remote.online.store(false, Ordering::SeqCst);
        *remote.snapshot.lock().unwrap() = filed_snapshot();
        let sync = Arc::new(SyncService::new(
            Some(remote.clone() as Arc<dyn RemoteSync>),
            sheets(),
        ));
        let reconciler = reconciler();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = sync
            .spawn_polling(Arc::clone(&reconciler), Duration::from_secs(30), shutdown_rx)
            .unwrap();

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(!sync.is_connected());

        remote.online.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(sync.is_connected());
        assert_eq!(remote.fetches.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(remote.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(reconciler.lock().await.page_stats("page1").filed, 1);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[test]
    fn polling_is_not_spawned_without_remote() {
        let sync = Arc::new(SyncService::local_only());
        let (_tx, rx) = watch::channel(false);
        assert!(sync.spawn_polling(reconciler(), Duration::from_secs(1), rx).is_none());
    }
}
