//! Per-chat reconciliation — decides whether a reply is owed and
//! produces it.
//!
//! Core invariant: at most one outbound reply per qualifying inbound
//! message, across any number of overlapping poll cycles. Enforced by
//! the per-chat single-flight guard plus the `last_processed` watermark
//! and the newer-outbound check, in that order.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::BotConfig;
use crate::engine::history;
use crate::engine::stages;
use crate::engine::store::ChatStore;
use crate::engine::types::{
    ChatPlatform, Direction, LeadExtractor, Message, MessageKind, Notifier, ResponseGenerator,
};
use crate::error::Error;

/// Drives one chat through a poll cycle: dedup → classify → format →
/// generate → send → watermark update → one-shot completion handoff.
pub struct Reconciler {
    platform: Arc<dyn ChatPlatform>,
    generator: Arc<dyn ResponseGenerator>,
    extractor: Arc<dyn LeadExtractor>,
    notifier: Arc<dyn Notifier>,
    store: Arc<ChatStore>,
    config: BotConfig,
}

impl Reconciler {
    pub fn new(
        platform: Arc<dyn ChatPlatform>,
        generator: Arc<dyn ResponseGenerator>,
        extractor: Arc<dyn LeadExtractor>,
        notifier: Arc<dyn Notifier>,
        store: Arc<ChatStore>,
        config: BotConfig,
    ) -> Self {
        Self {
            platform,
            generator,
            extractor,
            notifier,
            store,
            config,
        }
    }

    /// The chat store shared with the poller and tests.
    pub fn store(&self) -> &Arc<ChatStore> {
        &self.store
    }

    /// Reconcile one chat. Never propagates failures — a collaborator
    /// error is logged and the chat is retried on the next cycle with
    /// its state untouched.
    pub async fn reconcile(&self, chat_id: &str) {
        let guard = self.store.reconcile_guard(chat_id).await;
        let Ok(_in_flight) = guard.try_lock() else {
            debug!(chat = chat_id, "Reconciliation already in flight, skipping");
            return;
        };

        if let Err(e) = self.reconcile_inner(chat_id).await {
            warn!(chat = chat_id, error = %e, "Reconciliation failed, will retry next cycle");
        }
    }

    async fn reconcile_inner(&self, chat_id: &str) -> Result<(), Error> {
        if self.store.is_completed(chat_id).await {
            return Ok(());
        }

        let messages = self
            .platform
            .fetch_messages(chat_id, self.config.history_cap)
            .await?;
        if messages.is_empty() {
            return Ok(());
        }

        let Some(inbound) = latest_inbound(&messages) else {
            return Ok(());
        };

        let cutoff = Utc::now().timestamp() - self.config.recency_window_hours as i64 * 3600;
        if inbound.created < cutoff {
            debug!(chat = chat_id, created = inbound.created, "Latest inbound is stale");
            return Ok(());
        }

        if inbound.created <= self.store.last_processed(chat_id).await {
            return Ok(());
        }
        let already_answered = messages
            .iter()
            .any(|m| m.direction == Direction::Out && m.created > inbound.created);
        if already_answered {
            debug!(chat = chat_id, "A newer outbound reply already exists");
            return Ok(());
        }

        let stage = stages::classify(&messages, &self.config.agent_name);
        let transcript =
            history::format_transcript(&messages, self.config.history_cap, &self.config.agent_name);
        let is_first_message = !messages
            .iter()
            .any(|m| m.direction == Direction::Out && m.kind == MessageKind::Text);

        info!(
            chat = chat_id,
            stage = stage.label(),
            first = is_first_message,
            "Generating reply"
        );

        let Some(raw_reply) = self.generator.generate(&transcript, is_first_message).await? else {
            warn!(chat = chat_id, "Response generator returned nothing");
            return Ok(());
        };

        let reply = raw_reply
            .replace(&self.config.completion_marker, "")
            .trim()
            .to_string();

        if !self.platform.send_message(chat_id, &reply).await? {
            warn!(chat = chat_id, "Platform rejected the reply, state left untouched");
            return Ok(());
        }

        self.store.advance_processed(chat_id, inbound.created).await;
        info!(chat = chat_id, created = inbound.created, "Reply sent");

        if raw_reply.contains(&self.config.completion_marker) {
            let final_transcript =
                format!("{transcript}\n{}: {reply}", self.config.agent_name);
            self.handoff(chat_id, &final_transcript).await;
        }

        Ok(())
    }

    /// One-shot completion handoff: extract the lead record and forward
    /// it. The chat is marked complete regardless of the outcome — a
    /// failed extraction or delivery is absorbed, never retried.
    async fn handoff(&self, chat_id: &str, final_transcript: &str) {
        info!(chat = chat_id, "Funnel complete, extracting lead record");

        match self.extractor.extract(final_transcript).await {
            Ok(Some(lead)) => match self.notifier.notify(&lead).await {
                Ok(true) => info!(chat = chat_id, "Lead record delivered"),
                Ok(false) => warn!(chat = chat_id, "Notifier rejected the lead record"),
                Err(e) => warn!(chat = chat_id, error = %e, "Lead delivery failed"),
            },
            Ok(None) => warn!(chat = chat_id, "Extractor returned no lead record"),
            Err(e) => warn!(chat = chat_id, error = %e, "Lead extraction failed"),
        }

        self.store.mark_completed(chat_id).await;
    }
}

/// The inbound text message with the greatest `created`, if any.
fn latest_inbound(messages: &[Message]) -> Option<&Message> {
    messages
        .iter()
        .filter(|m| m.direction == Direction::In && m.is_processable_text())
        .max_by_key(|m| m.created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use crate::engine::types::{ChatRef, LeadRecord};
    use crate::error::{ChannelError, LlmError};

    struct MockPlatform {
        messages: Vec<Message>,
        sent: Mutex<Vec<(String, String)>>,
        accept_sends: bool,
    }

    impl MockPlatform {
        fn new(messages: Vec<Message>) -> Self {
            Self {
                messages,
                sent: Mutex::new(Vec::new()),
                accept_sends: true,
            }
        }

        async fn sent_count(&self) -> usize {
            self.sent.lock().await.len()
        }
    }

    #[async_trait]
    impl ChatPlatform for MockPlatform {
        async fn list_chats(&self, _limit: usize) -> Result<Vec<ChatRef>, ChannelError> {
            Ok(vec![ChatRef { id: "chat-1".into() }])
        }

        async fn fetch_messages(
            &self,
            _chat_id: &str,
            _limit: usize,
        ) -> Result<Vec<Message>, ChannelError> {
            Ok(self.messages.clone())
        }

        async fn send_message(&self, chat_id: &str, text: &str) -> Result<bool, ChannelError> {
            if !self.accept_sends {
                return Ok(false);
            }
            self.sent.lock().await.push((chat_id.into(), text.into()));
            Ok(true)
        }
    }

    struct MockGenerator {
        reply: Option<String>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl MockGenerator {
        fn replying(reply: &str) -> Self {
            Self {
                reply: Some(reply.into()),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }

        fn silent() -> Self {
            Self {
                reply: None,
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ResponseGenerator for MockGenerator {
        async fn generate(
            &self,
            _transcript: &str,
            _is_first_message: bool,
        ) -> Result<Option<String>, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(self.reply.clone())
        }
    }

    struct MockExtractor;

    #[async_trait]
    impl LeadExtractor for MockExtractor {
        async fn extract(&self, _final_transcript: &str) -> Result<Option<LeadRecord>, LlmError> {
            Ok(Some(LeadRecord {
                name: Some("Anna".into()),
                phone: Some("89123456789".into()),
                ..Default::default()
            }))
        }
    }

    struct MockNotifier {
        calls: AtomicUsize,
    }

    impl MockNotifier {
        fn new() -> Self {
            Self { calls: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl Notifier for MockNotifier {
        async fn notify(&self, _lead: &LeadRecord) -> Result<bool, ChannelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
    }

    fn now() -> i64 {
        Utc::now().timestamp()
    }

    fn inbound(text: &str, created: i64) -> Message {
        Message {
            id: format!("in-{created}"),
            direction: Direction::In,
            kind: MessageKind::Text,
            text: text.into(),
            created,
        }
    }

    fn outbound(text: &str, created: i64) -> Message {
        Message {
            id: format!("out-{created}"),
            direction: Direction::Out,
            kind: MessageKind::Text,
            text: text.into(),
            created,
        }
    }

    struct Fixture {
        platform: Arc<MockPlatform>,
        generator: Arc<MockGenerator>,
        notifier: Arc<MockNotifier>,
        reconciler: Reconciler,
    }

    fn fixture(platform: MockPlatform, generator: MockGenerator) -> Fixture {
        let platform = Arc::new(platform);
        let generator = Arc::new(generator);
        let notifier = Arc::new(MockNotifier::new());
        let reconciler = Reconciler::new(
            Arc::clone(&platform) as Arc<dyn ChatPlatform>,
            Arc::clone(&generator) as Arc<dyn ResponseGenerator>,
            Arc::new(MockExtractor),
            Arc::clone(&notifier) as Arc<dyn Notifier>,
            Arc::new(ChatStore::new()),
            BotConfig::default(),
        );
        Fixture {
            platform,
            generator,
            notifier,
            reconciler,
        }
    }

    #[tokio::test]
    async fn replies_to_fresh_inbound_and_advances_watermark() {
        let t = now();
        let f = fixture(
            MockPlatform::new(vec![inbound("Hello", t)]),
            MockGenerator::replying("Hello! I'm Svetlana."),
        );

        f.reconciler.reconcile("chat-1").await;

        let sent = f.platform.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "Hello! I'm Svetlana.");
        drop(sent);
        assert_eq!(f.reconciler.store().last_processed("chat-1").await, t);
        assert!(!f.reconciler.store().is_completed("chat-1").await);
    }

    #[tokio::test]
    async fn skips_inbound_at_or_below_watermark() {
        let t = now();
        let f = fixture(
            MockPlatform::new(vec![inbound("Hello", t)]),
            MockGenerator::replying("Hi!"),
        );
        f.reconciler.store().advance_processed("chat-1", t).await;

        f.reconciler.reconcile("chat-1").await;

        assert_eq!(f.platform.sent_count().await, 0);
        assert_eq!(f.generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn skips_when_newer_outbound_exists() {
        let t = now();
        let f = fixture(
            MockPlatform::new(vec![
                inbound("Hello", t - 10),
                outbound("Hello! I'm Svetlana.", t),
            ]),
            MockGenerator::replying("Hi again!"),
        );

        f.reconciler.reconcile("chat-1").await;

        assert_eq!(f.platform.sent_count().await, 0);
        assert_eq!(f.reconciler.store().last_processed("chat-1").await, 0);
    }

    #[tokio::test]
    async fn skips_stale_inbound() {
        let config = BotConfig::default();
        let stale = now() - (config.recency_window_hours as i64 * 3600 + 60);
        let f = fixture(
            MockPlatform::new(vec![inbound("Hello from last week", stale)]),
            MockGenerator::replying("Hi!"),
        );

        f.reconciler.reconcile("chat-1").await;

        assert_eq!(f.platform.sent_count().await, 0);
    }

    #[tokio::test]
    async fn skips_empty_and_non_text_histories() {
        let t = now();
        let mut voice = inbound("", t);
        voice.kind = MessageKind::Other;

        let f = fixture(MockPlatform::new(vec![voice]), MockGenerator::replying("Hi!"));
        f.reconciler.reconcile("chat-1").await;
        assert_eq!(f.platform.sent_count().await, 0);

        let f = fixture(MockPlatform::new(vec![]), MockGenerator::replying("Hi!"));
        f.reconciler.reconcile("chat-1").await;
        assert_eq!(f.platform.sent_count().await, 0);
    }

    #[tokio::test]
    async fn generator_silence_leaves_state_untouched() {
        let t = now();
        let f = fixture(
            MockPlatform::new(vec![inbound("Hello", t)]),
            MockGenerator::silent(),
        );

        f.reconciler.reconcile("chat-1").await;

        assert_eq!(f.platform.sent_count().await, 0);
        assert_eq!(f.reconciler.store().last_processed("chat-1").await, 0);
    }

    #[tokio::test]
    async fn rejected_send_leaves_state_for_retry() {
        let t = now();
        let mut platform = MockPlatform::new(vec![inbound("Hello", t)]);
        platform.accept_sends = false;
        let f = fixture(platform, MockGenerator::replying("Hi!"));

        f.reconciler.reconcile("chat-1").await;

        // Watermark untouched — the same inbound is eligible next cycle.
        assert_eq!(f.reconciler.store().last_processed("chat-1").await, 0);
        assert_eq!(f.generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn completion_marker_strips_notifies_once_and_terminates() {
        let t = now();
        let marker = BotConfig::default().completion_marker;
        let f = fixture(
            MockPlatform::new(vec![inbound("My number is 89123456789", t)]),
            MockGenerator::replying(&format!("Thank you, we will be in touch! {marker}")),
        );

        f.reconciler.reconcile("chat-1").await;

        let sent = f.platform.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert!(!sent[0].1.contains(&marker), "marker must not reach the client");
        assert_eq!(sent[0].1, "Thank you, we will be in touch!");
        drop(sent);

        assert_eq!(f.notifier.calls.load(Ordering::SeqCst), 1);
        assert!(f.reconciler.store().is_completed("chat-1").await);

        // Later cycles observe the terminal flag and do nothing, even
        // for newer inbound messages.
        f.reconciler.reconcile("chat-1").await;
        assert_eq!(f.platform.sent_count().await, 1);
        assert_eq!(f.notifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn first_message_flag_follows_outbound_presence() {
        struct FlagCapture {
            flags: Mutex<Vec<bool>>,
        }

        #[async_trait]
        impl ResponseGenerator for FlagCapture {
            async fn generate(
                &self,
                _transcript: &str,
                is_first_message: bool,
            ) -> Result<Option<String>, LlmError> {
                self.flags.lock().await.push(is_first_message);
                Ok(Some("ok".into()))
            }
        }

        let t = now();
        let platform = Arc::new(MockPlatform::new(vec![inbound("Hello", t)]));
        let capture = Arc::new(FlagCapture { flags: Mutex::new(Vec::new()) });
        let reconciler = Reconciler::new(
            Arc::clone(&platform) as Arc<dyn ChatPlatform>,
            Arc::clone(&capture) as Arc<dyn ResponseGenerator>,
            Arc::new(MockExtractor),
            Arc::new(MockNotifier::new()),
            Arc::new(ChatStore::new()),
            BotConfig::default(),
        );

        reconciler.reconcile("chat-1").await;
        assert_eq!(*capture.flags.lock().await, vec![true]);

        let platform = Arc::new(MockPlatform::new(vec![
            outbound("Hello! I'm Svetlana.", t - 20),
            inbound("Two of us", t),
        ]));
        let capture = Arc::new(FlagCapture { flags: Mutex::new(Vec::new()) });
        let reconciler = Reconciler::new(
            platform as Arc<dyn ChatPlatform>,
            Arc::clone(&capture) as Arc<dyn ResponseGenerator>,
            Arc::new(MockExtractor),
            Arc::new(MockNotifier::new()),
            Arc::new(ChatStore::new()),
            BotConfig::default(),
        );
        reconciler.reconcile("chat-1").await;
        assert_eq!(*capture.flags.lock().await, vec![false]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_reconciliations_dispatch_exactly_once() {
        let t = now();
        let platform = Arc::new(MockPlatform::new(vec![inbound("Hello", t)]));
        let generator = Arc::new(MockGenerator {
            reply: Some("Hi!".into()),
            delay: Duration::from_millis(50),
            calls: AtomicUsize::new(0),
        });
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&platform) as Arc<dyn ChatPlatform>,
            Arc::clone(&generator) as Arc<dyn ResponseGenerator>,
            Arc::new(MockExtractor),
            Arc::new(MockNotifier::new()),
            Arc::new(ChatStore::new()),
            BotConfig::default(),
        ));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let reconciler = Arc::clone(&reconciler);
            tasks.push(tokio::spawn(async move {
                reconciler.reconcile("chat-1").await;
            }));
        }
        for task in tasks {
            task.await.expect("task should not panic");
        }

        assert_eq!(platform.sent_count().await, 1, "exactly one dispatch");
        assert_eq!(reconciler.store().last_processed("chat-1").await, t);
    }
}
