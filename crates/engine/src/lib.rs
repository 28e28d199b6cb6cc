pub mod auth;
pub mod directory;
pub mod policy;
pub mod reconcile;
pub mod session;
pub mod sheets;
pub mod sync;
pub mod tracker;

pub use auth::Authenticator;
pub use directory::PersonnelDirectory;
pub use policy::{can_mutate, require_admin, require_mutation};
pub use reconcile::{Reconciler, merge};
pub use session::SessionManager;
pub use sheets::SheetMap;
pub use sync::SyncService;
pub use tracker::Tracker;
