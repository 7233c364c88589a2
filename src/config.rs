/// Configuration module for managing environment variables and API keys
///
/// All configuration is loaded once at startup (typically from a .env file)
/// and passed explicitly into the components that need it — no ambient
/// lookups inside core logic.

use anyhow::{Context, Result};
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    /// Telegram bot token from BotFather
    pub telegram_token: String,

    /// Telegram user ids allowed to administer the bot
    pub admin_ids: Vec<i64>,

    /// RapidAPI host of the upstream timeline API
    pub twitter_api_host: String,

    /// RapidAPI key for the upstream timeline API
    pub twitter_api_key: String,

    /// OpenAI API key; translation is disabled when unset
    pub openai_api_key: Option<String>,

    /// Chat model used for translation (e.g. "gpt-4o-mini")
    pub gpt_model: String,

    /// Path to the translation instruction template
    pub translation_prompt_path: String,

    /// PostgreSQL database URL
    pub database_url: String,

    /// How many timeline entries to request per fetch
    pub fetch_count: u32,

    /// Lookback window (hours) for channels without a cursor
    pub lookback_hours: i64,

    /// Drop retweets from the relayed stream
    pub exclude_retweets: bool,

    /// Include admins in the recipient fan-out of every channel
    pub notify_admins_on_update: bool,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if any required environment variable is missing
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists
        dotenv::dotenv().ok();

        Ok(Config {
            telegram_token: env::var("TELEGRAM_BOT_TOKEN")
                .context("TELEGRAM_BOT_TOKEN must be set")?,

            admin_ids: parse_admin_ids(&env::var("ADMIN_IDS").unwrap_or_default()),

            twitter_api_host: env::var("TWITTER_API_HOST")
                .unwrap_or_else(|_| "twitter241.p.rapidapi.com".to_string()),

            twitter_api_key: env::var("TWITTER_API_KEY")
                .context("TWITTER_API_KEY must be set")?,

            openai_api_key: env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()),

            gpt_model: env::var("GPT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),

            translation_prompt_path: env::var("TRANSLATION_PROMPT_PATH")
                .unwrap_or_else(|_| "prompts/translation_prompt.txt".to_string()),

            database_url: env::var("DATABASE_URL")
                .context("DATABASE_URL must be set")?,

            fetch_count: env::var("FETCH_COUNT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),

            lookback_hours: env::var("LOOKBACK_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(72),

            exclude_retweets: env::var("EXCLUDE_RETWEETS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(true),

            notify_admins_on_update: env::var("NOTIFY_ADMINS_ON_UPDATE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(true),
        })
    }

    /// Check the static admin allow-list
    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_ids.contains(&user_id)
    }

    /// Validate that the database is reachable before starting the bot
    pub async fn validate(&self) -> Result<()> {
        log::info!("Validating configuration...");

        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(2)
            .connect(&self.database_url)
            .await
            .context("Failed to connect to PostgreSQL database")?;

        sqlx::query("SELECT 1")
            .fetch_one(&pool)
            .await
            .context("Database connection test query failed")?;

        if self.openai_api_key.is_none() {
            log::warn!("OPENAI_API_KEY not set, posts will be relayed untranslated");
        }

        log::info!("Configuration validated successfully");
        Ok(())
    }
}

fn parse_admin_ids(raw: &str) -> Vec<i64> {
    raw.split(',')
        .filter_map(|id| id.trim().parse().ok())
        .collect()
}
