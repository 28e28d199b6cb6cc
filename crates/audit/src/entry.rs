use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use taxtrack_core::{Session, TaxStatus, VerifierRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Login,
    Logout,
    StatusChange,
    ResetPage,
    FactoryReset,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Logout => "logout",
            Self::StatusChange => "status_change",
            Self::ResetPage => "reset_page",
            Self::FactoryReset => "factory_reset",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    #[serde(default)]
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    pub person_id: String,
    #[serde(default)]
    pub performed_by: Option<VerifierRef>,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub is_self_verification: bool,
    #[serde(default)]
    pub details: Map<String, Value>,
}

impl AuditEntry {
    /// Build an entry stamped now, with the actor fields taken from
    /// `session`.  Without a session the actor is unknown.
    pub fn new(
        session: Option<&Session>,
        action: AuditAction,
        person_id: impl Into<String>,
        details: Map<String, Value>,
    ) -> Self {
        let person_id = person_id.into();
        let (performed_by, is_admin, is_self_verification) = match session {
            Some(s) => (
                Some(s.user.as_verifier()),
                s.is_admin,
                s.is_subject(&person_id),
            ),
            None => (None, false, false),
        };
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            action,
            person_id,
            performed_by,
            is_admin,
            is_self_verification,
            details,
        }
    }

    /// `details.newStatus` of a status change, when present and readable.
    pub fn new_status(&self) -> Option<TaxStatus> {
        self.details
            .get("newStatus")
            .and_then(Value::as_str)
            .and_then(TaxStatus::from_label)
    }

    pub fn old_status(&self) -> Option<TaxStatus> {
        self.details
            .get("oldStatus")
            .and_then(Value::as_str)
            .and_then(TaxStatus::from_label)
    }

    pub fn is_batch(&self) -> bool {
        self.details
            .get("batch")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// The most recent verification of a person as recorded by the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationInfo {
    pub is_self_verified: bool,
    pub verified_by: Option<VerifierRef>,
    pub verified_at: DateTime<Utc>,
    pub is_admin: bool,
    pub status: TaxStatus,
}

impl From<&AuditEntry> for VerificationInfo {
    fn from(entry: &AuditEntry) -> Self {
        Self {
            is_self_verified: entry.is_self_verification,
            verified_by: entry.performed_by.clone(),
            verified_at: entry.timestamp,
            is_admin: entry.is_admin,
            status: entry.new_status().unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use taxtrack_core::Identity;

    fn person() -> Identity {
        Identity {
            id: "p-7".to_string(),
            rank: "Sgt.".to_string(),
            first_name: "Wichai".to_string(),
            last_name: "Kaew".to_string(),
            page_key: Some("page3".to_string()),
            unit: None,
        }
    }

    #[test]
    fn actor_fields_come_from_session() {
        let session = Session::new(person(), false, Utc::now());
        let entry = AuditEntry::new(Some(&session), AuditAction::StatusChange, "p-7", Map::new());
        assert!(entry.is_self_verification);
        assert!(!entry.is_admin);
        assert_eq!(entry.performed_by.unwrap().name, "Wichai Kaew");

        let other = AuditEntry::new(Some(&session), AuditAction::StatusChange, "p-8", Map::new());
        assert!(!other.is_self_verification);
    }

    #[test]
    fn no_session_means_unknown_actor() {
        let entry = AuditEntry::new(None, AuditAction::Logout, "p-7", Map::new());
        assert!(entry.performed_by.is_none());
        assert!(!entry.is_admin);
        assert!(!entry.is_self_verification);
    }

    #[test]
    fn persisted_field_names_are_camel_case() {
        let mut details = Map::new();
        details.insert("newStatus".to_string(), json!(TaxStatus::Filed));
        details.insert("batch".to_string(), json!(true));
        let entry = AuditEntry::new(None, AuditAction::ResetPage, "ALL", details);
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["action"], "reset_page");
        assert_eq!(value["personId"], "ALL");
        assert!(value["performedBy"].is_null());
        assert_eq!(value["isSelfVerification"], false);

        let back: AuditEntry = serde_json::from_value(value).unwrap();
        assert_eq!(back.new_status(), Some(TaxStatus::Filed));
        assert!(back.is_batch());
    }

    #[test]
    fn legacy_entry_without_id_decodes() {
        let raw = r#"{
            "timestamp": "2026-01-05T09:30:00.000Z",
            "action": "status_change",
            "personId": "p-1",
            "performedBy": {"id": "ADMIN", "rank": "", "name": "Admin "},
            "isAdmin": true,
            "isSelfVerification": false,
            "details": {"oldStatus": "", "newStatus": "ยังไม่ยื่น"},
            "userAgent": "Mozilla/5.0"
        }"#;
        let entry: AuditEntry = serde_json::from_str(raw).unwrap();
        assert!(entry.id.is_nil());
        assert_eq!(entry.old_status(), Some(TaxStatus::Unset));
        assert_eq!(entry.new_status(), Some(TaxStatus::NotFiled));
    }
}
