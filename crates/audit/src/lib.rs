pub mod entry;
pub mod log;

pub use entry::{AuditAction, AuditEntry, VerificationInfo};
pub use log::{AuditLog, DEFAULT_MAX_ENTRIES};
