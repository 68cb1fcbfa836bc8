//! OpenAI chat-completions client — response generation and lead
//! extraction.
//!
//! One HTTP client implements both LLM-backed collaborator traits.
//! Generation drives the intake funnel with a persona prompt that
//! instructs the model to emit the completion marker when the script
//! is done; extraction turns a finished transcript into a `LeadRecord`
//! via a strict-JSON prompt.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::warn;

use crate::config::{BotConfig, OpenAiConfig};
use crate::engine::types::{LeadExtractor, LeadRecord, ResponseGenerator};
use crate::error::LlmError;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Temperature for funnel replies — conversational but on-script.
const REPLY_TEMPERATURE: f32 = 0.7;

/// Max tokens per reply (chat messages are short).
const REPLY_MAX_TOKENS: u32 = 400;

/// Temperature for extraction (deterministic).
const EXTRACT_TEMPERATURE: f32 = 0.0;

const EXTRACT_MAX_TOKENS: u32 = 512;

/// OpenAI-backed generator/extractor.
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    model: String,
    agent_name: String,
    completion_marker: String,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig, bot: &BotConfig) -> Self {
        Self::with_base_url(config, bot, DEFAULT_BASE_URL)
    }

    /// Override the API host (tests point this at a local server).
    pub fn with_base_url(
        config: OpenAiConfig,
        bot: &BotConfig,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: config.api_key,
            model: config.model,
            agent_name: bot.agent_name.clone(),
            completion_marker: bot.completion_marker.clone(),
        }
    }

    async fn complete(
        &self,
        system: &str,
        user: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<Option<String>, LlmError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
            "temperature": temperature,
            "max_tokens": max_tokens,
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::RequestFailed(format!(
                "chat completion failed with status {status}: {body}"
            )));
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.trim().to_string())
            .filter(|content| !content.is_empty());
        Ok(content)
    }
}

#[async_trait]
impl ResponseGenerator for OpenAiClient {
    async fn generate(
        &self,
        transcript: &str,
        is_first_message: bool,
    ) -> Result<Option<String>, LlmError> {
        let system = build_agent_prompt(&self.agent_name, &self.completion_marker);
        let user = build_reply_request(transcript, is_first_message);
        self.complete(&system, &user, REPLY_TEMPERATURE, REPLY_MAX_TOKENS)
            .await
    }
}

#[async_trait]
impl LeadExtractor for OpenAiClient {
    async fn extract(&self, final_transcript: &str) -> Result<Option<LeadRecord>, LlmError> {
        let Some(content) = self
            .complete(
                EXTRACTION_PROMPT,
                final_transcript,
                EXTRACT_TEMPERATURE,
                EXTRACT_MAX_TOKENS,
            )
            .await?
        else {
            return Ok(None);
        };

        match parse_lead_json(&content) {
            Ok(lead) => Ok(Some(lead)),
            Err(e) => {
                warn!(error = %e, raw = %content, "Failed to parse extracted lead record");
                Ok(None)
            }
        }
    }
}

// ── Prompt construction ─────────────────────────────────────────────

/// Build the funnel persona prompt.
fn build_agent_prompt(agent_name: &str, completion_marker: &str) -> String {
    format!(
        "You are {agent_name}, a friendly rental agent chatting with a prospective \
         tenant about a long-term apartment listing. Work through these steps one \
         question at a time, in order, never skipping ahead and never repeating a \
         step the client already answered:\n\
         1. Greet the client by name ({agent_name}) and confirm the flat is available.\n\
         2. Ask who will be living in the flat and how many adults.\n\
         3. Ask whether children will be living there, and their ages.\n\
         4. Ask about pets or other animals.\n\
         5. Ask for the intended rental period.\n\
         6. Ask for the desired move-in date.\n\
         7. Ask for a contact phone number.\n\n\
         Keep replies short (1-3 sentences), warm and professional. Ask exactly one \
         question per reply. Once the client has provided a phone number and every \
         step is covered, thank them, say the owner will be in touch, and append \
         {completion_marker} to the very end of the reply. Never mention \
         {completion_marker} otherwise."
    )
}

/// Build the user turn carrying the transcript.
fn build_reply_request(transcript: &str, is_first_message: bool) -> String {
    if is_first_message {
        format!(
            "The conversation so far:\n{transcript}\n\n\
             This is the client's first message. Introduce yourself and start the script."
        )
    } else {
        format!(
            "The conversation so far:\n{transcript}\n\n\
             Write your next reply."
        )
    }
}

/// Extraction prompt: strict JSON, fixed field set.
const EXTRACTION_PROMPT: &str = "You extract rental application data from a finished \
    conversation between an agent and a prospective tenant. Respond with ONLY a JSON \
    object — no prose, no code fences — using exactly these keys (omit keys the \
    conversation does not establish):\n\
    {\"name\": \"...\", \"phone\": \"...\", \"residents_info\": \"...\", \
    \"residents_count\": 0, \"has_children\": false, \"children_details\": \"...\", \
    \"has_pets\": false, \"pets_details\": \"...\", \"rental_period\": \"...\", \
    \"move_in_deadline\": \"...\"}";

// ── Response parsing ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

/// Parse the extraction output, tolerating code fences the model may
/// add despite instructions.
fn parse_lead_json(content: &str) -> Result<LeadRecord, serde_json::Error> {
    let trimmed = content.trim();
    let stripped = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed);
    serde_json::from_str(stripped.trim())
}
