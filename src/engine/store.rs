//! Per-chat engine state — the only mutable state the bot holds.
//!
//! The authoritative conversation history lives on the chat platform;
//! this store keeps just two derived facts per chat id: the timestamp
//! of the last inbound message we answered, and whether the funnel
//! finished. Entries are created lazily and never removed — `completed`
//! is a permanent terminal marker for the life of the process.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, Default)]
struct ChatState {
    last_processed_created: i64,
    completed: bool,
}

/// Concurrent per-chat state store.
///
/// All operations are atomic per key. `advance_processed` only ever
/// moves the timestamp forward, so `last_processed_created` is
/// monotonically non-decreasing no matter how cycles interleave.
#[derive(Default)]
pub struct ChatStore {
    states: Mutex<HashMap<String, ChatState>>,
    guards: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Timestamp of the most recent inbound message already answered
    /// for this chat. Zero for chats never seen before.
    pub async fn last_processed(&self, chat_id: &str) -> i64 {
        self.states
            .lock()
            .await
            .get(chat_id)
            .map(|s| s.last_processed_created)
            .unwrap_or(0)
    }

    /// Record that the inbound message at `created` has been answered.
    /// Keeps the stored maximum, never rewinds.
    pub async fn advance_processed(&self, chat_id: &str, created: i64) {
        let mut states = self.states.lock().await;
        let state = states.entry(chat_id.to_string()).or_default();
        state.last_processed_created = state.last_processed_created.max(created);
    }

    /// Whether this chat's funnel already completed.
    pub async fn is_completed(&self, chat_id: &str) -> bool {
        self.states
            .lock()
            .await
            .get(chat_id)
            .map(|s| s.completed)
            .unwrap_or(false)
    }

    /// Mark the chat terminally complete. Irreversible.
    pub async fn mark_completed(&self, chat_id: &str) {
        let mut states = self.states.lock().await;
        states.entry(chat_id.to_string()).or_default().completed = true;
    }

    /// Single-flight token for this chat id.
    ///
    /// A reconciliation must hold the token's lock for its whole run;
    /// an overlapping cycle that fails `try_lock` skips the chat, so
    /// two runs can never race between the dedup check and the state
    /// write.
    pub async fn reconcile_guard(&self, chat_id: &str) -> Arc<Mutex<()>> {
        let mut guards = self.guards.lock().await;
        Arc::clone(
            guards
                .entry(chat_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }
}
