use anyhow::{Context, Result};
use std::sync::Arc;
use teloxide::prelude::*;
use tracing::info;
use tracing_subscriber::EnvFilter;

use borderify::bot;
use borderify::config::BotConfig;
use borderify::conversation::Conversation;
use borderify::image_store::ImageStore;
use borderify::session_store::InMemorySessionStore;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Initialize logging
    init_tracing();

    info!("Starting Borderify Telegram Bot");

    let config = BotConfig::from_env().context("Invalid configuration")?;

    std::fs::create_dir_all(&config.temp_dir).with_context(|| {
        format!(
            "Failed to create temporary directory {}",
            config.temp_dir.display()
        )
    })?;
    info!(temp_dir = %config.temp_dir.display(), "Pending pictures directory ready");

    let conversation = Arc::new(Conversation::new(
        Arc::new(InMemorySessionStore::new()),
        ImageStore::new(&config.temp_dir),
        config.render,
    ));

    // Initialize the bot
    let bot = Bot::new(config.bot_token.clone());

    if let Some(ttl) = config.session_ttl {
        info!(ttl_secs = ttl.as_secs(), "Session reaper enabled");
        bot::spawn_session_reaper(bot.clone(), Arc::clone(&conversation), ttl);
    }

    info!("Bot initialized, starting dispatcher");

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(bot::message_handler))
        .branch(Update::filter_callback_query().endpoint(bot::callback_handler));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![conversation])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}
