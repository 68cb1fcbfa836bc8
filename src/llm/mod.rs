//! LLM-backed collaborators — reply generation and lead extraction.

pub mod openai;

pub use openai::OpenAiClient;
