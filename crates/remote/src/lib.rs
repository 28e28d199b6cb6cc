pub mod client;
pub mod error;
pub mod payload;

use async_trait::async_trait;

pub use client::SheetsClient;
pub use error::RemoteError;
pub use payload::{
    RemotePage, RemotePerson, RemoteSnapshot, StatusUpdate, VerifyType, decode_all_data,
};

/// The spreadsheet-backed service holding the shared copy of every page.
///
/// `page_key` is the local page identifier; `sheet` is the name the service
/// knows the page by.  Both travel with every write.
#[async_trait]
pub trait RemoteSync: Send + Sync {
    /// `Ok` iff the service answers `status: "ok"`.
    async fn ping(&self) -> Result<(), RemoteError>;
    async fn fetch_all(&self) -> Result<RemoteSnapshot, RemoteError>;
    async fn update_status(
        &self,
        page_key: &str,
        sheet: &str,
        update: &StatusUpdate,
    ) -> Result<(), RemoteError>;
    async fn batch_update(
        &self,
        page_key: &str,
        sheet: &str,
        updates: &[StatusUpdate],
    ) -> Result<(), RemoteError>;
}
