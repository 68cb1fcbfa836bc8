//! Conversation reconciliation and stage-tracking engine.
//!
//! Per poll cycle, every active chat flows through:
//! 1. `poller` — list chats, fan out one reconciliation per chat
//! 2. `reconciler` — dedup, then classify/format/generate/send
//! 3. `stages` — ordered heuristic rules → current funnel stage
//! 4. `history` — bounded, role-labeled transcript for the generator
//! 5. `store` — per-chat watermark + terminal completion flag

pub mod history;
pub mod poller;
pub mod reconciler;
pub mod stages;
pub mod store;
pub mod types;

pub use reconciler::Reconciler;
pub use store::ChatStore;
pub use types::{ChatPlatform, LeadExtractor, Notifier, ResponseGenerator};
