use thiserror::Error;

use taxtrack_core::TrackerError;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("service answered HTTP {0}")]
    Http(u16),
    #[error("service rejected the request: {0}")]
    Rejected(String),
    #[error("undecodable response: {0}")]
    Decode(String),
    #[error("failed to encode request: {0}")]
    Encode(#[source] serde_json::Error),
}

impl From<RemoteError> for TrackerError {
    fn from(err: RemoteError) -> Self {
        TrackerError::RemoteUnavailable(err.to_string())
    }
}
