use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use taxtrack_config::AppConfig;
use taxtrack_engine::Tracker;
use taxtrack_store::{StoreChange, spawn_store_watcher};

/// Follow the remote (polling) and other processes writing the same data
/// directory until Ctrl-C.
pub(crate) async fn run_watch(tracker: Arc<Tracker>, config: &AppConfig) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let poller = tracker.spawn_polling(shutdown_rx);
    if poller.is_none() {
        println!("local-only mode: following store changes only");
    }

    let (change_tx, mut change_rx) = mpsc::unbounded_channel::<StoreChange>();
    let _watcher = match spawn_store_watcher(
        Path::new(&config.store.data_dir),
        &config.store.key_prefix,
        change_tx,
    ) {
        Ok(watcher) => Some(watcher),
        Err(err) => {
            warn!(error = %err, "store watcher unavailable; cross-process changes are not followed");
            None
        }
    };

    let follower = {
        let tracker = Arc::clone(&tracker);
        tokio::spawn(async move {
            while let Some(change) = change_rx.recv().await {
                if tracker.reload_from_store(&change.key).await {
                    info!(key = %change.key, "page updated by another process");
                } else {
                    debug!(key = %change.key, "store change ignored");
                }
            }
        })
    };

    println!("watching for changes; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    let _ = shutdown_tx.send(true);
    if let Some(poller) = poller {
        let _ = poller.await;
    }
    follower.abort();
    println!("stopped");
    Ok(())
}
