use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::VerifierRef;

/// Identifier used for the administrator identity and as the audit subject of
/// administrator logins.
pub const ADMIN_ID: &str = "ADMIN";

/// Audit subject for page-wide and store-wide operations.
pub const ALL_SUBJECT: &str = "ALL";

/// The operator acting on the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: String,
    #[serde(default)]
    pub rank: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl Identity {
    /// Placeholder identity used for administrator sessions.
    pub fn admin() -> Self {
        Self {
            id: ADMIN_ID.to_string(),
            rank: String::new(),
            first_name: "Admin".to_string(),
            last_name: String::new(),
            page_key: None,
            unit: None,
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    pub fn as_verifier(&self) -> VerifierRef {
        VerifierRef {
            id: self.id.clone(),
            rank: self.rank.clone(),
            name: self.full_name(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user: Identity,
    #[serde(default)]
    pub is_admin: bool,
    pub login_time: DateTime<Utc>,
}

impl Session {
    pub fn new(user: Identity, is_admin: bool, login_time: DateTime<Utc>) -> Self {
        Self {
            user,
            is_admin,
            login_time,
        }
    }

    /// Whether the session's identity is the subject `person_id`.
    pub fn is_subject(&self, person_id: &str) -> bool {
        self.user.id == person_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_identity_verifier_name_is_trimmed() {
        let v = Identity::admin().as_verifier();
        assert_eq!(v.id, ADMIN_ID);
        assert_eq!(v.name, "Admin");
    }

    #[test]
    fn session_serializes_with_original_field_names() {
        let session = Session::new(Identity::admin(), true, Utc::now());
        let value = serde_json::to_value(&session).unwrap();
        assert_eq!(value["user"]["firstName"], "Admin");
        assert_eq!(value["isAdmin"], true);
        assert!(value["loginTime"].is_string());
    }
}
