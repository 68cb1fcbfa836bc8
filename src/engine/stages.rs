//! Funnel stage classification.
//!
//! Pure, deterministic heuristic over the fetched message history. The
//! classifier is an explicit ordered rule table — first matching rule
//! wins — over a set of facts gathered from the dialog in one pass, so
//! every predicate and every keyword set is testable on its own. A
//! later rule is only reached when each earlier stage's condition for
//! staying open is unmet.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::engine::types::{Direction, Message, Stage};

// ── Keyword sets ────────────────────────────────────────────────────

/// An agent message counts as the greeting once it carries one of
/// these alongside the agent's name.
const GREETING_KEYWORDS: &[&str] = &[
    "hello",
    "good morning",
    "good afternoon",
    "good evening",
    "greetings",
    "welcome",
];

/// Client phrases that answer "who will be living here".
const RESIDENT_KEYWORDS: &[&str] = &[
    "one person",
    "two people",
    "three people",
    "four people",
    "1 person",
    "2 people",
    "3 people",
    "4 people",
    "just me",
    "by myself",
    "alone",
    "my wife",
    "my husband",
    "my partner",
    "couple",
    "family of",
    "of us",
    "adults",
    "roommate",
    "planning to move in",
];

/// Client phrases that pin down a rental duration.
const DURATION_KEYWORDS: &[&str] = &[
    "month",
    "year",
    "long term",
    "long-term",
    "short term",
    "short-term",
    "half a year",
];

/// The agent's residents question, matched against its latest message.
const RESIDENTS_PROBE: &str = "who will be living";

const CHILDREN_PROBES: &[&str] = &["child", "kid"];

const PET_PROBES: &[&str] = &["pet", "animal", "dog", "cat"];

const DURATION_PROBES: &[&str] = &["term", "duration", "how long", "period"];

const DEADLINE_PROBES: &[&str] = &["date", "move in", "move-in"];

const PHONE_PROBES: &[&str] = &["phone", "number", "contact"];

/// Minimum digit count for a client message to count as a phone number.
const PHONE_MIN_DIGITS: usize = 10;

static MONTH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(january|february|march|april|may|june|july|august|september|october|november|december)\b",
    )
    .unwrap()
});

// ── Dialog facts ────────────────────────────────────────────────────

/// Everything the rule table needs, gathered from the message list in
/// one pass. Agent/client text is partitioned (text kind, non-empty,
/// lowercased); "the agent's last message" is the outbound text with
/// the greatest `created`.
#[derive(Debug, Clone, Default)]
pub struct DialogFacts {
    pub has_agent_message: bool,
    pub greeting_sent: bool,
    pub residents_answered: bool,
    pub agent_asked_residents: bool,
    pub agent_asked_children: bool,
    pub agent_asked_pets: bool,
    pub duration_given: bool,
    pub agent_asked_duration: bool,
    pub deadline_given: bool,
    pub agent_asked_deadline: bool,
    pub phone_given: bool,
    pub agent_asked_phone: bool,
}

impl DialogFacts {
    pub fn gather(messages: &[Message], agent_name: &str) -> Self {
        let name_token = agent_name.to_lowercase();
        let mut agent_texts: Vec<String> = Vec::new();
        let mut client_texts: Vec<String> = Vec::new();
        let mut agent_last: Option<(i64, String)> = None;

        for message in messages {
            if !message.is_processable_text() {
                continue;
            }
            let text = message.text.trim().to_lowercase();
            match message.direction {
                Direction::In => client_texts.push(text),
                Direction::Out => {
                    if agent_last
                        .as_ref()
                        .map_or(true, |(created, _)| message.created > *created)
                    {
                        agent_last = Some((message.created, text.clone()));
                    }
                    agent_texts.push(text);
                }
            }
        }

        let client_all = client_texts.join("\n");
        let agent_last = agent_last.map(|(_, text)| text).unwrap_or_default();

        Self {
            has_agent_message: !agent_texts.is_empty(),
            greeting_sent: agent_texts
                .iter()
                .any(|t| contains_any(t, GREETING_KEYWORDS) && t.contains(&name_token)),
            residents_answered: contains_any(&client_all, RESIDENT_KEYWORDS),
            agent_asked_residents: agent_last.contains(RESIDENTS_PROBE),
            agent_asked_children: contains_any(&agent_last, CHILDREN_PROBES),
            agent_asked_pets: contains_any(&agent_last, PET_PROBES),
            duration_given: contains_any(&client_all, DURATION_KEYWORDS),
            agent_asked_duration: contains_any(&agent_last, DURATION_PROBES),
            deadline_given: MONTH_RE.is_match(&client_all)
                || (client_all.contains("date")
                    && client_all.chars().any(|c| c.is_ascii_digit())),
            agent_asked_deadline: contains_any(&agent_last, DEADLINE_PROBES),
            phone_given: client_texts
                .iter()
                .any(|t| has_digit_run(t, PHONE_MIN_DIGITS)),
            agent_asked_phone: contains_any(&agent_last, PHONE_PROBES),
        }
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

/// True if `text` contains at least `min_digits` digit characters in
/// one run. Common phone separators (spaces, dashes, parentheses, `+`)
/// do not break a run, so "8 912 345-67-89" counts.
fn has_digit_run(text: &str, min_digits: usize) -> bool {
    let mut run = 0usize;
    for c in text.chars() {
        if c.is_ascii_digit() {
            run += 1;
            if run >= min_digits {
                return true;
            }
        } else if !matches!(c, ' ' | '-' | '(' | ')' | '+') {
            run = 0;
        }
    }
    false
}

// ── Rule table ──────────────────────────────────────────────────────

/// One entry in the ordered classification table. A stage is open while
/// its predicate holds; later rules assume all earlier predicates were
/// false.
pub struct StageRule {
    pub name: &'static str,
    pub stage: Stage,
    pub applies: fn(&DialogFacts) -> bool,
}

pub const STAGE_RULES: &[StageRule] = &[
    StageRule {
        name: "no-agent-reply",
        stage: Stage::Greeting,
        applies: |f| !f.has_agent_message,
    },
    StageRule {
        name: "greeting-not-sent",
        stage: Stage::Greeting,
        applies: |f| !f.greeting_sent,
    },
    StageRule {
        name: "residents-open",
        stage: Stage::Residents,
        applies: |f| !f.residents_answered || f.agent_asked_residents,
    },
    StageRule {
        name: "children-open",
        stage: Stage::Children,
        applies: |f| f.agent_asked_children && !f.duration_given,
    },
    StageRule {
        name: "pets-open",
        stage: Stage::Pets,
        applies: |f| f.agent_asked_pets && !f.duration_given,
    },
    StageRule {
        name: "rental-period-open",
        stage: Stage::RentalPeriod,
        applies: |f| !f.duration_given || f.agent_asked_duration,
    },
    StageRule {
        name: "deadline-open",
        stage: Stage::Deadline,
        applies: |f| !f.deadline_given || f.agent_asked_deadline,
    },
    StageRule {
        name: "contacts-open",
        stage: Stage::Contacts,
        applies: |f| !f.phone_given || f.agent_asked_phone,
    },
];

/// Classify the current funnel stage from a fetched message list.
pub fn classify(messages: &[Message], agent_name: &str) -> Stage {
    let facts = DialogFacts::gather(messages, agent_name);
    classify_facts(&facts)
}

/// Walk the rule table over pre-gathered facts; first match wins,
/// otherwise the funnel is complete.
pub fn classify_facts(facts: &DialogFacts) -> Stage {
    for rule in STAGE_RULES {
        if (rule.applies)(facts) {
            debug!(rule = rule.name, stage = rule.stage.label(), "Stage rule matched");
            return rule.stage;
        }
    }
    Stage::Complete
}
