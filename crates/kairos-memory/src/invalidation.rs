//! Background task applying peer cache invalidations.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::store::{MemoryStore, INVALIDATION_CHANNEL};

/// Subscribe to the invalidation channel and evict announced uuids until
/// shutdown. Messages that are not uuids are dropped.
pub async fn run_invalidation_listener(
    store: Arc<MemoryStore>,
    mut rx_shutdown: broadcast::Receiver<()>,
) -> Result<(), ()> {
    let mut messages = match store.kv().subscribe(INVALIDATION_CHANNEL).await {
        Ok(messages) => messages,
        Err(err) => {
            warn!("Cache invalidation listener could not subscribe: {err}");
            return Err(());
        }
    };
    info!("Cache invalidation listener started");

    loop {
        tokio::select! {
            message = messages.recv() => {
                match message {
                    Some(raw) => match Uuid::parse_str(&raw) {
                        Ok(uuid) => {
                            debug!("Evicting {uuid} after peer invalidation");
                            store.evict(uuid);
                        }
                        Err(_) => warn!("Ignoring malformed invalidation message: {raw}"),
                    },
                    None => {
                        warn!("Invalidation channel closed");
                        return Err(());
                    }
                }
            },
            _ = rx_shutdown.recv() => {
                info!("Cache invalidation listener terminated");
                return Ok(());
            }
        }
    }
}
