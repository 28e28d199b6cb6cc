use thiserror::Error;

/// Failures surfaced by the tracker core.
///
/// `Unauthorized` and `NotFound` are rejections meant for the operator;
/// `RemoteUnavailable` degrades to local-only mode; `StorageFailure` on write
/// leaves in-memory state as it is.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("not authorized: {0}")]
    Unauthorized(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("remote service unavailable: {0}")]
    RemoteUnavailable(String),
    #[error("storage failure: {0}")]
    StorageFailure(String),
    #[error("session expired or missing; log in again")]
    SessionExpired,
}

impl TrackerError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Rejections the operator can act on, as opposed to infrastructure faults.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::Unauthorized(_) | Self::NotFound(_) | Self::SessionExpired
        )
    }
}

pub type TrackerResult<T> = Result<T, TrackerError>;
