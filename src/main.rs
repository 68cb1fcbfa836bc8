use std::sync::Arc;
use std::sync::atomic::Ordering;

use lead_intake::channels::{AvitoClient, TelegramNotifier};
use lead_intake::config::{AvitoConfig, BotConfig, OpenAiConfig, TelegramConfig};
use lead_intake::engine::poller::spawn_poller;
use lead_intake::engine::types::{ChatPlatform, LeadExtractor, Notifier, ResponseGenerator};
use lead_intake::engine::{ChatStore, Reconciler};
use lead_intake::llm::OpenAiClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = BotConfig::from_env();
    let avito_config = AvitoConfig::from_env()?;
    let telegram_config = TelegramConfig::from_env()?;
    let openai_config = OpenAiConfig::from_env()?;

    eprintln!("🏠 Lead Intake v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Agent persona: {}", config.agent_name);
    eprintln!("   Model: {}", openai_config.model);
    eprintln!(
        "   Polling every {}s, recency window {}h, history cap {}",
        config.poll_interval_secs, config.recency_window_hours, config.history_cap
    );

    let platform: Arc<dyn ChatPlatform> = Arc::new(AvitoClient::new(avito_config));
    let notifier: Arc<dyn Notifier> = Arc::new(TelegramNotifier::new(telegram_config));
    let llm = Arc::new(OpenAiClient::new(openai_config, &config));
    let generator: Arc<dyn ResponseGenerator> = llm.clone();
    let extractor: Arc<dyn LeadExtractor> = llm;

    let reconciler = Arc::new(Reconciler::new(
        Arc::clone(&platform),
        generator,
        extractor,
        notifier,
        Arc::new(ChatStore::new()),
        config.clone(),
    ));

    let (handle, shutdown) = spawn_poller(platform, reconciler, config);

    tokio::signal::ctrl_c().await?;
    eprintln!("\nShutting down after the current cycle...");
    shutdown.store(true, Ordering::Relaxed);
    handle.await?;

    Ok(())
}
