//! Lead Intake — rental-lead chat funnel engine.

pub mod channels;
pub mod config;
pub mod engine;
pub mod error;
pub mod llm;
