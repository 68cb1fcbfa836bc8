//! Configuration types.
//!
//! Everything is process-wide and fixed at startup. Tunables come from
//! environment variables with sane defaults; credentials are required.

use secrecy::SecretString;

use crate::error::ConfigError;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Display name of the renting agent persona. Used as the outbound
    /// transcript label and checked by the greeting classifier rule.
    pub agent_name: String,
    /// Seconds to sleep between poll cycles.
    pub poll_interval_secs: u64,
    /// Inbound messages older than this many hours are treated as stale.
    pub recency_window_hours: u64,
    /// Maximum number of messages fetched and kept in a transcript.
    pub history_cap: usize,
    /// Substring the response generator emits to signal funnel completion.
    /// Stripped from the client-visible reply.
    pub completion_marker: String,
    /// Page size when listing active chats.
    pub chat_page_limit: usize,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            agent_name: "Svetlana".to_string(),
            poll_interval_secs: 30,
            recency_window_hours: 24,
            history_cap: 30,
            completion_marker: "[LEAD_COMPLETE]".to_string(),
            chat_page_limit: 100,
        }
    }
}

impl BotConfig {
    /// Load overrides from `LEAD_INTAKE_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            agent_name: env_or("LEAD_INTAKE_AGENT_NAME", defaults.agent_name),
            poll_interval_secs: env_parse("LEAD_INTAKE_POLL_INTERVAL_SECS", defaults.poll_interval_secs),
            recency_window_hours: env_parse("LEAD_INTAKE_WINDOW_HOURS", defaults.recency_window_hours),
            history_cap: env_parse("LEAD_INTAKE_HISTORY_CAP", defaults.history_cap),
            completion_marker: env_or("LEAD_INTAKE_COMPLETION_MARKER", defaults.completion_marker),
            chat_page_limit: env_parse("LEAD_INTAKE_CHAT_PAGE_LIMIT", defaults.chat_page_limit),
        }
    }
}

/// Avito messenger credentials.
#[derive(Debug, Clone)]
pub struct AvitoConfig {
    pub user_id: String,
    pub client_id: String,
    pub client_secret: SecretString,
}

impl AvitoConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            user_id: required("AVITO_USER_ID")?,
            client_id: required("AVITO_CLIENT_ID")?,
            client_secret: SecretString::from(required("AVITO_CLIENT_SECRET")?),
        })
    }
}

/// Telegram handoff credentials.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: SecretString,
    pub chat_id: String,
}

impl TelegramConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            bot_token: SecretString::from(required("TELEGRAM_BOT_TOKEN")?),
            chat_id: required("TELEGRAM_CHAT_ID")?,
        })
    }
}

/// OpenAI chat-completions credentials.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: SecretString,
    pub model: String,
}

impl OpenAiConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            api_key: SecretString::from(required("OPENAI_API_KEY")?),
            model: env_or("OPENAI_MODEL", "gpt-4o-mini".to_string()),
        })
    }
}

fn required(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
