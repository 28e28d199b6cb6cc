pub mod error;
pub mod identity;
pub mod record;
pub mod status;

pub use error::{TrackerError, TrackerResult};
pub use identity::{ADMIN_ID, ALL_SUBJECT, Identity, Session};
pub use record::{PageCollection, PageStats, PersonRecord, Verification, VerifierRef};
pub use status::{FILED_LABEL, NOT_FILED_LABEL, TaxStatus};
