//! Poll loop — lists active chats and fans out reconciliations.
//!
//! One batch of concurrent per-chat tasks per cycle. Individual
//! failures are collected and logged, never propagated; a failure
//! listing chats skips the cycle. The loop only stops when the
//! shutdown flag is set.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::BotConfig;
use crate::engine::reconciler::Reconciler;
use crate::engine::types::ChatPlatform;

/// Spawn the background poll loop.
///
/// Returns a `JoinHandle` and a shutdown flag. Set the flag to stop
/// polling after the current cycle.
pub fn spawn_poller(
    platform: Arc<dyn ChatPlatform>,
    reconciler: Arc<Reconciler>,
    config: BotConfig,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(
            "Poller started — checking every {}s, window {}h",
            config.poll_interval_secs, config.recency_window_hours
        );

        let mut tick = tokio::time::interval(Duration::from_secs(config.poll_interval_secs));

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Poller shutting down");
                return;
            }

            poll_once(&platform, &reconciler, config.chat_page_limit).await;
        }
    });

    (handle, shutdown_flag)
}

/// Run a single poll cycle: list chats → reconcile each concurrently →
/// wait for the whole batch.
pub async fn poll_once(
    platform: &Arc<dyn ChatPlatform>,
    reconciler: &Arc<Reconciler>,
    page_limit: usize,
) {
    let chats = match platform.list_chats(page_limit).await {
        Ok(chats) => chats,
        Err(e) => {
            error!("Failed to list chats: {e}");
            return;
        }
    };

    if chats.is_empty() {
        return;
    }

    debug!("Reconciling {} chat(s)", chats.len());

    let tasks: Vec<JoinHandle<()>> = chats
        .into_iter()
        .map(|chat| {
            let reconciler = Arc::clone(reconciler);
            tokio::spawn(async move {
                reconciler.reconcile(&chat.id).await;
            })
        })
        .collect();

    for result in join_all(tasks).await {
        if let Err(e) = result {
            error!("Reconciliation task panicked: {e}");
        }
    }
}
