//! Transcript formatting for the response generator.
//!
//! Pure function of its input: the platform returns messages in no
//! particular order, so the formatter re-sorts by `created` before
//! applying the cap and rendering.

use crate::engine::types::{Direction, Message};

/// Fixed transcript label for inbound (tenant) messages.
pub const CLIENT_LABEL: &str = "client";

/// Render a bounded, role-labeled transcript, oldest message first.
///
/// At most the `cap` most recent messages (by `created`) are kept.
/// Non-text and empty-text entries are dropped after capping. Outbound
/// lines are labeled with `agent_name`; if an outbound text already
/// starts with that label (duplicated by an earlier formatting pass),
/// the redundant prefix is stripped before re-labeling.
pub fn format_transcript(messages: &[Message], cap: usize, agent_name: &str) -> String {
    let mut ordered: Vec<&Message> = messages.iter().collect();
    ordered.sort_by_key(|m| m.created);

    let skip = ordered.len().saturating_sub(cap);
    let agent_prefix = format!("{agent_name}:");

    let mut lines = Vec::new();
    for message in ordered.into_iter().skip(skip) {
        if !message.is_processable_text() {
            continue;
        }
        let text = message.text.trim();
        match message.direction {
            Direction::In => lines.push(format!("{CLIENT_LABEL}: {text}")),
            Direction::Out => {
                let body = text
                    .strip_prefix(&agent_prefix)
                    .map(str::trim)
                    .unwrap_or(text);
                lines.push(format!("{agent_name}: {body}"));
            }
        }
    }

    lines.join("\n")
}
