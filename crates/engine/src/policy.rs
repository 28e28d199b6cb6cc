//! Who may change what.

use taxtrack_core::{Session, TrackerError, TrackerResult};

/// Administrators may change any record; everyone else only their own.
pub fn can_mutate(session: &Session, target_person_id: &str) -> bool {
    session.is_admin || session.is_subject(target_person_id)
}

pub fn require_mutation(session: &Session, target_person_id: &str) -> TrackerResult<()> {
    if can_mutate(session, target_person_id) {
        Ok(())
    } else {
        Err(TrackerError::unauthorized(format!(
            "{} may only update their own record",
            session.user.full_name()
        )))
    }
}

/// Gate for page-wide and store-wide operations.
pub fn require_admin(session: &Session, operation: &str) -> TrackerResult<()> {
    if session.is_admin {
        Ok(())
    } else {
        Err(TrackerError::unauthorized(format!(
            "{operation} is available to administrators only"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use taxtrack_core::Identity;

    fn user(id: &str) -> Session {
        let identity = Identity {
            id: id.to_string(),
            rank: "Cpl.".to_string(),
            first_name: "Narong".to_string(),
            last_name: "Chai".to_string(),
            page_key: Some("page2".to_string()),
            unit: None,
        };
        Session::new(identity, false, Utc::now())
    }

    #[test]
    fn users_may_only_touch_their_own_record() {
        let s = user("c2-001");
        assert!(can_mutate(&s, "c2-001"));
        assert!(!can_mutate(&s, "c2-002"));
        assert!(require_mutation(&s, "c2-001").is_ok());
        assert!(matches!(
            require_mutation(&s, "c2-002"),
            Err(TrackerError::Unauthorized(_))
        ));
    }

    #[test]
    fn admin_may_touch_anything() {
        let admin = Session::new(Identity::admin(), true, Utc::now());
        assert!(can_mutate(&admin, "c2-002"));
        assert!(require_admin(&admin, "reset").is_ok());
        assert!(require_admin(&user("c2-001"), "reset").is_err());
    }
}
