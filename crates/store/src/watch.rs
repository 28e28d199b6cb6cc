use std::fs;
use std::path::Path;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::kv::{StoreError, store_key_from_path};

/// A store key was written or removed by some process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
    pub key: String,
}

/// Watch a [`FileStore`](crate::FileStore) directory and forward a
/// [`StoreChange`] for every create, modify or remove of a `<prefix>*.json`
/// file.  The returned watcher must be kept alive for events to flow.
pub fn spawn_store_watcher(
    dir: &Path,
    prefix: &str,
    tx: mpsc::UnboundedSender<StoreChange>,
) -> Result<RecommendedWatcher, StoreError> {
    fs::create_dir_all(dir).map_err(|source| StoreError::Io {
        key: dir.display().to_string(),
        source,
    })?;

    let prefix = prefix.to_string();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        let event = match res {
            Ok(event) => event,
            Err(err) => {
                warn!(error = %err, "store watcher error");
                return;
            }
        };
        if !matches!(
            event.kind,
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
        ) {
            return;
        }
        for key in changed_keys(&event, &prefix) {
            debug!(key = %key, "store change observed");
            if tx.send(StoreChange { key }).is_err() {
                return;
            }
        }
    })?;

    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

fn changed_keys(event: &Event, prefix: &str) -> Vec<String> {
    let mut keys: Vec<String> = event
        .paths
        .iter()
        .filter_map(|path| store_key_from_path(path))
        .filter(|key| key.starts_with(prefix))
        .collect();
    keys.dedup();
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind};
    use std::path::PathBuf;

    #[test]
    fn only_prefixed_json_files_are_reported() {
        let event = Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path(PathBuf::from("/d/vat_tax_page1.json"))
            .add_path(PathBuf::from("/d/vat_tax_page1.json.tmp"))
            .add_path(PathBuf::from("/d/other_page1.json"));
        assert_eq!(changed_keys(&event, "vat_tax_"), vec!["vat_tax_page1"]);
    }

    #[test]
    fn rename_pairs_collapse_to_one_key() {
        let event = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/d/vat_tax_session.json"))
            .add_path(PathBuf::from("/d/vat_tax_session.json"));
        assert_eq!(changed_keys(&event, "vat_tax_"), vec!["vat_tax_session"]);
    }

    #[test]
    fn watcher_starts_on_missing_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let watcher = spawn_store_watcher(&dir.path().join("data"), "vat_tax_", tx);
        assert!(watcher.is_ok());
        assert!(dir.path().join("data").is_dir());
    }
}
