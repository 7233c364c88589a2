/// Tweet Relay Bot
///
/// A Telegram bot that relays new posts from tracked Twitter accounts to
/// their subscribed editors:
/// - Polls the upstream timeline API on a configurable hourly schedule
/// - Tracks a "last seen" cursor per channel so nothing is relayed twice
/// - Translates post text via OpenAI (best effort, never blocks delivery)
/// - Forwards text, photos, albums and videos with captions

use anyhow::Result;
use tweet_relay_bot::{bot, config};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger
    pretty_env_logger::init();

    log::info!("Starting Tweet Relay Bot...");

    // Load configuration from environment
    let cfg = config::Config::from_env()?;

    // Validate configuration and connections
    cfg.validate().await?;

    // Run the bot
    bot::run_bot(cfg).await?;

    Ok(())
}
