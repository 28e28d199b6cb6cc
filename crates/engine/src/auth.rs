use std::sync::Arc;

use serde_json::{Map, Value, json};
use tracing::{info, warn};

use taxtrack_audit::{AuditAction, AuditLog};
use taxtrack_core::{ADMIN_ID, Identity, Session, TrackerError, TrackerResult};

use crate::directory::PersonnelDirectory;
use crate::session::SessionManager;

/// Login and logout flows on top of the session manager.
#[derive(Debug)]
pub struct Authenticator {
    sessions: Arc<SessionManager>,
    directory: Arc<PersonnelDirectory>,
    audit: Arc<AuditLog>,
    admin_pin: String,
}

fn mode(mode: &str) -> Map<String, Value> {
    let mut details = Map::new();
    details.insert("mode".to_string(), json!(mode));
    details
}

impl Authenticator {
    pub fn new(
        sessions: Arc<SessionManager>,
        directory: Arc<PersonnelDirectory>,
        audit: Arc<AuditLog>,
        admin_pin: impl Into<String>,
    ) -> Self {
        Self {
            sessions,
            directory,
            audit,
            admin_pin: admin_pin.into(),
        }
    }

    fn record(
        &self,
        session: Option<&Session>,
        action: AuditAction,
        subject: &str,
        details: Map<String, Value>,
    ) {
        if let Err(err) = self.audit.append(session, action, subject, details) {
            warn!(error = %err, action = %action, "failed to append audit entry");
        }
    }

    pub fn login_person(&self, person_id: &str) -> TrackerResult<Session> {
        let identity = self
            .directory
            .find_by_id(person_id)
            .cloned()
            .ok_or_else(|| TrackerError::not_found(format!("no person with id {person_id}")))?;
        let session = self.sessions.establish(identity, false)?;
        self.record(Some(&session), AuditAction::Login, person_id, mode("user"));
        info!(person = %person_id, "user logged in");
        Ok(session)
    }

    pub fn login_admin(&self, pin: &str) -> TrackerResult<Session> {
        if pin != self.admin_pin {
            warn!("administrator login rejected");
            return Err(TrackerError::unauthorized("incorrect administrator PIN"));
        }
        let session = self.sessions.establish(Identity::admin(), true)?;
        self.record(Some(&session), AuditAction::Login, ADMIN_ID, mode("admin"));
        info!("administrator logged in");
        Ok(session)
    }

    /// Record the logout of whoever is logged in, then end the session.
    pub fn logout(&self) -> TrackerResult<Option<Session>> {
        let current = self.sessions.restore();
        if let Some(session) = &current {
            let subject = if session.is_admin {
                ADMIN_ID
            } else {
                session.user.id.as_str()
            };
            self.record(Some(session), AuditAction::Logout, subject, Map::new());
        }
        self.sessions.terminate()?;
        Ok(current)
    }
}
