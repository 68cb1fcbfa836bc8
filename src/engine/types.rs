//! Shared types for the reconciliation engine.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ChannelError, LlmError};

// ── Messages ────────────────────────────────────────────────────────

/// Who sent a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// From the prospective tenant.
    In,
    /// From the agent (us).
    Out,
}

/// Message payload kind. Only text is processed; everything else
/// (images, locations, system notices) is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    #[serde(other)]
    Other,
}

/// A single chat message as fetched from the platform. Immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub direction: Direction,
    pub kind: MessageKind,
    pub text: String,
    /// Unix timestamp (seconds).
    pub created: i64,
}

impl Message {
    /// True for non-empty text messages — the only kind the engine replies to.
    pub fn is_processable_text(&self) -> bool {
        self.kind == MessageKind::Text && !self.text.trim().is_empty()
    }
}

/// A chat reference from the conversation lister.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRef {
    pub id: String,
}

// ── Funnel stages ───────────────────────────────────────────────────

/// One step in the fixed intake funnel, in funnel order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Greeting,
    Residents,
    Children,
    Pets,
    RentalPeriod,
    Deadline,
    Contacts,
    Complete,
}

impl Stage {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::Residents => "residents",
            Self::Children => "children",
            Self::Pets => "pets",
            Self::RentalPeriod => "rental_period",
            Self::Deadline => "deadline",
            Self::Contacts => "contacts",
            Self::Complete => "complete",
        }
    }
}

// ── Lead record ─────────────────────────────────────────────────────

/// Structured applicant data extracted from a finished conversation.
///
/// All fields are optional on the wire; the extractor fills what the
/// conversation actually established.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeadRecord {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub residents_info: Option<String>,
    #[serde(default)]
    pub residents_count: Option<u32>,
    #[serde(default)]
    pub has_children: bool,
    #[serde(default)]
    pub children_details: Option<String>,
    #[serde(default)]
    pub has_pets: bool,
    #[serde(default)]
    pub pets_details: Option<String>,
    #[serde(default)]
    pub rental_period: Option<String>,
    #[serde(default)]
    pub move_in_deadline: Option<String>,
}

// ── Collaborator traits ─────────────────────────────────────────────

/// Chat platform I/O — listing, fetching, sending. Pure transport,
/// no funnel logic.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// List active chats, up to `limit`.
    async fn list_chats(&self, limit: usize) -> Result<Vec<ChatRef>, ChannelError>;

    /// Fetch recent messages for a chat (unordered), up to `limit`.
    async fn fetch_messages(
        &self,
        chat_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, ChannelError>;

    /// Send a reply into a chat. `Ok(false)` means the platform
    /// rejected the message without a transport error.
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<bool, ChannelError>;
}

/// Produces the next agent reply from a formatted transcript.
///
/// The reply may embed the completion marker to signal funnel end.
/// `Ok(None)` means no reply could be generated this cycle.
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn generate(
        &self,
        transcript: &str,
        is_first_message: bool,
    ) -> Result<Option<String>, LlmError>;
}

/// Extracts a structured lead record from a finished transcript.
#[async_trait]
pub trait LeadExtractor: Send + Sync {
    async fn extract(&self, final_transcript: &str) -> Result<Option<LeadRecord>, LlmError>;
}

/// Delivers a completed lead record downstream.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, lead: &LeadRecord) -> Result<bool, ChannelError>;
}
