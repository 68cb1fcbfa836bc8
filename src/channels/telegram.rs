//! Telegram handoff notifier — delivers completed lead records.
//!
//! Renders the fixed human-readable application summary and posts it
//! to a Telegram chat via the Bot API. Markdown first, plain-text
//! fallback.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::warn;

use crate::config::TelegramConfig;
use crate::engine::types::{LeadRecord, Notifier};
use crate::error::ChannelError;

const DEFAULT_BASE_URL: &str = "https://api.telegram.org";

/// Telegram Bot API notifier.
pub struct TelegramNotifier {
    http: reqwest::Client,
    base_url: String,
    bot_token: SecretString,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(config: TelegramConfig) -> Self {
        Self::with_base_url(config, DEFAULT_BASE_URL)
    }

    /// Override the API host (tests point this at a local server).
    pub fn with_base_url(config: TelegramConfig, base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            bot_token: config.bot_token,
            chat_id: config.chat_id,
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{method}",
            self.base_url,
            self.bot_token.expose_secret()
        )
    }

    async fn post_message(
        &self,
        text: &str,
        parse_mode: Option<&str>,
    ) -> Result<reqwest::Response, ChannelError> {
        let mut body = serde_json::json!({
            "chat_id": self.chat_id,
            "text": text,
        });
        if let Some(mode) = parse_mode {
            body["parse_mode"] = serde_json::Value::String(mode.to_string());
        }

        self.http
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::Http(e.to_string()))
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, lead: &LeadRecord) -> Result<bool, ChannelError> {
        let text = render_summary(lead);

        let response = self.post_message(&text, Some("Markdown")).await?;
        if response.status().is_success() {
            return Ok(true);
        }

        let markdown_status = response.status();
        warn!(
            status = ?markdown_status,
            "Telegram sendMessage with Markdown failed; retrying as plain text"
        );

        let response = self.post_message(&text, None).await?;
        if response.status().is_success() {
            return Ok(true);
        }

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        warn!(status, body = %body, "Telegram rejected the lead summary");
        Ok(false)
    }
}

/// Render the fixed application summary. Optional fields are skipped,
/// except children/pets which render an explicit "none".
pub fn render_summary(lead: &LeadRecord) -> String {
    let mut text = String::from("NEW RENTAL APPLICATION\n\n");

    if let Some(name) = &lead.name {
        text.push_str(&format!("Name: {name}\n"));
    }
    if let Some(phone) = &lead.phone {
        text.push_str(&format!("Phone: {phone}\n"));
    }
    if let Some(residents) = &lead.residents_info {
        text.push_str(&format!("Residents: {residents}\n"));
    }
    if let Some(count) = lead.residents_count {
        text.push_str(&format!("Adults: {count}\n"));
    }

    if lead.has_children {
        let details = lead.children_details.as_deref().unwrap_or("yes");
        text.push_str(&format!("Children: {details}\n"));
    } else {
        text.push_str("Children: none\n");
    }

    if lead.has_pets {
        let details = lead.pets_details.as_deref().unwrap_or("yes");
        text.push_str(&format!("Pets: {details}\n"));
    } else {
        text.push_str("Pets: none\n");
    }

    if let Some(period) = &lead.rental_period {
        text.push_str(&format!("Rental period: {period}\n"));
    }
    if let Some(deadline) = &lead.move_in_deadline {
        text.push_str(&format!("Move-in date: {deadline}\n"));
    }

    text.push_str("\nStatus: ready to present to the owner");
    text
}
