use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use taxtrack_core::{Identity, Session, TrackerError, TrackerResult};
use taxtrack_store::{KeyValueStore, PageStore};

use crate::policy;

/// Upper bound on a configured session lifetime (a century).
const MAX_AGE_CAP_HOURS: u64 = 24 * 365 * 100;

/// Persists the single active session of this device.
pub struct SessionManager {
    kv: Arc<dyn KeyValueStore>,
    key: String,
    max_age: Duration,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("key", &self.key)
            .field("max_age", &self.max_age)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    pub fn new(kv: Arc<dyn KeyValueStore>, key: impl Into<String>, max_age: Duration) -> Self {
        Self {
            kv,
            key: key.into(),
            max_age,
        }
    }

    pub fn for_pages(pages: &PageStore, max_age_hours: u64) -> Self {
        let hours = max_age_hours.min(MAX_AGE_CAP_HOURS) as i64;
        Self::new(
            Arc::clone(pages.kv()),
            pages.session_key(),
            Duration::hours(hours),
        )
    }

    /// Start a session for `identity`, replacing any previous one.
    pub fn establish(&self, identity: Identity, as_admin: bool) -> TrackerResult<Session> {
        let session = Session::new(identity, as_admin, Utc::now());
        let raw = serde_json::to_string(&session)
            .map_err(|err| TrackerError::StorageFailure(err.to_string()))?;
        self.kv.set(&self.key, &raw)?;
        info!(user = %session.user.id, admin = as_admin, "session established");
        Ok(session)
    }

    pub fn restore(&self) -> Option<Session> {
        self.restore_at(Utc::now())
    }

    /// The persisted session if it is still valid at `now`.  Expired sessions
    /// are destroyed; unreadable ones read as logged out.
    pub fn restore_at(&self, now: DateTime<Utc>) -> Option<Session> {
        let raw = match self.kv.get(&self.key) {
            Ok(raw) => raw?,
            Err(err) => {
                warn!(error = %err, "session unreadable; treating as logged out");
                return None;
            }
        };
        let session: Session = match serde_json::from_str(&raw) {
            Ok(session) => session,
            Err(err) => {
                warn!(error = %err, "malformed session; treating as logged out");
                return None;
            }
        };
        if now - session.login_time >= self.max_age {
            info!(user = %session.user.id, "session expired");
            if let Err(err) = self.kv.remove(&self.key) {
                warn!(error = %err, "failed to remove expired session");
            }
            return None;
        }
        Some(session)
    }

    /// Destroy the persisted session.  Safe to call when logged out.
    pub fn terminate(&self) -> TrackerResult<()> {
        self.kv.remove(&self.key)?;
        Ok(())
    }

    pub fn current_identity_owns(&self, person_id: &str) -> bool {
        self.restore()
            .is_some_and(|session| policy::can_mutate(&session, person_id))
    }

    pub fn require_session(&self) -> TrackerResult<Session> {
        self.restore().ok_or(TrackerError::SessionExpired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taxtrack_store::MemoryStore;

    fn manager() -> SessionManager {
        SessionManager::new(
            Arc::new(MemoryStore::new()),
            "vat_tax_session",
            Duration::hours(24),
        )
    }

    fn person() -> Identity {
        Identity {
            id: "c1-003".to_string(),
            rank: "Pvt.".to_string(),
            first_name: "Anan".to_string(),
            last_name: "Suk".to_string(),
            page_key: Some("page2".to_string()),
            unit: Some("1st Company".to_string()),
        }
    }

    #[test]
    fn establish_then_restore() {
        let sessions = manager();
        assert!(sessions.restore().is_none());
        let session = sessions.establish(person(), false).unwrap();
        assert_eq!(sessions.restore(), Some(session));
        assert!(sessions.current_identity_owns("c1-003"));
        assert!(!sessions.current_identity_owns("c1-004"));
    }

    #[test]
    fn session_expires_at_max_age() {
        let sessions = manager();
        let session = sessions.establish(person(), false).unwrap();
        let almost = session.login_time + Duration::hours(24) - Duration::seconds(1);
        assert!(sessions.restore_at(almost).is_some());

        let expired = session.login_time + Duration::hours(24);
        assert!(sessions.restore_at(expired).is_none());
        // The expired record is gone for good.
        assert!(sessions.restore_at(almost).is_none());
        assert!(matches!(
            sessions.require_session(),
            Err(TrackerError::SessionExpired)
        ));
    }

    #[test]
    fn malformed_session_reads_as_logged_out() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        kv.set("vat_tax_session", "{\"user\": 7}").unwrap();
        let sessions = SessionManager::new(kv, "vat_tax_session", Duration::hours(24));
        assert!(sessions.restore().is_none());
        assert!(!sessions.current_identity_owns("anyone"));
    }

    #[test]
    fn terminate_is_idempotent_and_admin_owns_everything() {
        let sessions = manager();
        sessions.establish(Identity::admin(), true).unwrap();
        assert!(sessions.current_identity_owns("c1-004"));
        sessions.terminate().unwrap();
        sessions.terminate().unwrap();
        assert!(sessions.restore().is_none());
    }
}
