pub mod kv;
pub mod pages;
pub mod seed;
pub mod watch;

pub use kv::{FileStore, KeyValueStore, MemoryStore, StoreError, store_key_from_path};
pub use pages::{PageEnvelope, PageStore};
pub use seed::{SeedProvider, StaticSeedProvider};
pub use watch::{StoreChange, spawn_store_watcher};
