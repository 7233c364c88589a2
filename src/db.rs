/// Persistence module: PostgreSQL store for editors, channels,
/// subscriptions and the polling schedule.
///
/// Tables are bootstrapped on startup with CREATE TABLE IF NOT EXISTS.
/// The only transactional guarantee the pipeline needs from this layer is
/// that all cursor advances of one run commit together.

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};

/// Default polling hours seeded into a fresh database.
const DEFAULT_SCHEDULE_HOURS: &str = "9,12,15,18,21";

/// A recipient entitled to receive posts from subscribed channels.
#[derive(Debug, Clone, FromRow)]
pub struct Editor {
    pub id: i32,
    pub telegram_id: String,
    pub name: String,
}

/// One tracked upstream timeline. `last_post_time` is the cursor: the
/// maximum created_at among posts ever delivered for this channel.
#[derive(Debug, Clone, FromRow)]
pub struct Channel {
    pub id: i32,
    pub name: String,
    pub twitter_id: String,
    pub last_post_time: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChannelWithEditors {
    pub channel: Channel,
    pub editors: Vec<Editor>,
}

/// Singleton schedule record: permitted hours of day plus the marker of the
/// last automatic firing (format `YYYY-MM-DD-HH-MM-SS`).
#[derive(Debug, Clone, FromRow)]
pub struct ScheduleSettings {
    pub hours: String,
    pub last_run: Option<String>,
}

#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .context("Failed to connect to PostgreSQL")?;
        Ok(Self { pool })
    }

    /// Create the schema if it does not exist yet.
    pub async fn init(&self) -> Result<()> {
        log::info!("Initializing database tables...");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS editors (
                id SERIAL PRIMARY KEY,
                telegram_id TEXT UNIQUE NOT NULL,
                name TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create editors table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS channels (
                id SERIAL PRIMARY KEY,
                name TEXT NOT NULL,
                twitter_id TEXT UNIQUE NOT NULL,
                last_post_time TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create channels table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS editor_channel (
                editor_id INTEGER NOT NULL REFERENCES editors(id) ON DELETE CASCADE,
                channel_id INTEGER NOT NULL REFERENCES channels(id) ON DELETE CASCADE,
                PRIMARY KEY (editor_id, channel_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create editor_channel table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schedule_settings (
                id INTEGER PRIMARY KEY,
                hours TEXT NOT NULL,
                last_run TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create schedule_settings table")?;

        log::info!("Database tables initialized");
        Ok(())
    }

    // --- editors ---

    pub async fn all_editors(&self) -> Result<Vec<Editor>> {
        sqlx::query_as::<_, Editor>("SELECT id, telegram_id, name FROM editors ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .context("Failed to load editors")
    }

    pub async fn editor_by_telegram_id(&self, telegram_id: &str) -> Result<Option<Editor>> {
        sqlx::query_as::<_, Editor>(
            "SELECT id, telegram_id, name FROM editors WHERE telegram_id = $1",
        )
        .bind(telegram_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to look up editor")
    }

    /// Returns None if an editor with this telegram id already exists.
    pub async fn create_editor(&self, telegram_id: &str, name: &str) -> Result<Option<Editor>> {
        sqlx::query_as::<_, Editor>(
            r#"
            INSERT INTO editors (telegram_id, name)
            VALUES ($1, $2)
            ON CONFLICT (telegram_id) DO NOTHING
            RETURNING id, telegram_id, name
            "#,
        )
        .bind(telegram_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to create editor")
    }

    pub async fn delete_editor(&self, telegram_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM editors WHERE telegram_id = $1")
            .bind(telegram_id)
            .execute(&self.pool)
            .await
            .context("Failed to delete editor")?;
        Ok(result.rows_affected() > 0)
    }

    // --- channels & subscriptions ---

    pub async fn channel_by_twitter_id(&self, twitter_id: &str) -> Result<Option<Channel>> {
        sqlx::query_as::<_, Channel>(
            "SELECT id, name, twitter_id, last_post_time FROM channels WHERE twitter_id = $1",
        )
        .bind(twitter_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to look up channel")
    }

    pub async fn channel_by_name(&self, name: &str) -> Result<Option<Channel>> {
        sqlx::query_as::<_, Channel>(
            "SELECT id, name, twitter_id, last_post_time FROM channels WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to look up channel")
    }

    /// Create the channel if it is not tracked yet and subscribe the editor
    /// to it. Both steps are idempotent.
    pub async fn subscribe_editor(
        &self,
        editor_id: i32,
        name: &str,
        twitter_id: &str,
    ) -> Result<Channel> {
        let mut tx = self.pool.begin().await.context("Failed to open transaction")?;

        sqlx::query(
            r#"
            INSERT INTO channels (name, twitter_id)
            VALUES ($1, $2)
            ON CONFLICT (twitter_id) DO NOTHING
            "#,
        )
        .bind(name)
        .bind(twitter_id)
        .execute(&mut *tx)
        .await
        .context("Failed to insert channel")?;

        let channel = sqlx::query_as::<_, Channel>(
            "SELECT id, name, twitter_id, last_post_time FROM channels WHERE twitter_id = $1",
        )
        .bind(twitter_id)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to read back channel")?;

        sqlx::query(
            r#"
            INSERT INTO editor_channel (editor_id, channel_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(editor_id)
        .bind(channel.id)
        .execute(&mut *tx)
        .await
        .context("Failed to create subscription")?;

        tx.commit().await.context("Failed to commit subscription")?;
        Ok(channel)
    }

    pub async fn unsubscribe_editor(&self, editor_id: i32, channel_id: i32) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM editor_channel WHERE editor_id = $1 AND channel_id = $2",
        )
        .bind(editor_id)
        .bind(channel_id)
        .execute(&self.pool)
        .await
        .context("Failed to remove subscription")?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_channel(&self, channel_id: i32) -> Result<bool> {
        let result = sqlx::query("DELETE FROM channels WHERE id = $1")
            .bind(channel_id)
            .execute(&self.pool)
            .await
            .context("Failed to delete channel")?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn editor_channels(&self, editor_id: i32) -> Result<Vec<Channel>> {
        sqlx::query_as::<_, Channel>(
            r#"
            SELECT c.id, c.name, c.twitter_id, c.last_post_time
            FROM channels c
            JOIN editor_channel ec ON ec.channel_id = c.id
            WHERE ec.editor_id = $1
            ORDER BY c.id
            "#,
        )
        .bind(editor_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load editor channels")
    }

    /// Load every channel together with its subscribed editors in one
    /// consistent read. This is the snapshot an update run operates on.
    pub async fn channels_with_editors(&self) -> Result<Vec<ChannelWithEditors>> {
        let mut tx = self.pool.begin().await.context("Failed to open transaction")?;

        let channels = sqlx::query_as::<_, Channel>(
            "SELECT id, name, twitter_id, last_post_time FROM channels ORDER BY id",
        )
        .fetch_all(&mut *tx)
        .await
        .context("Failed to load channels")?;

        let mut result = Vec::with_capacity(channels.len());
        for channel in channels {
            let editors = sqlx::query_as::<_, Editor>(
                r#"
                SELECT e.id, e.telegram_id, e.name
                FROM editors e
                JOIN editor_channel ec ON ec.editor_id = e.id
                WHERE ec.channel_id = $1
                ORDER BY e.id
                "#,
            )
            .bind(channel.id)
            .fetch_all(&mut *tx)
            .await
            .context("Failed to load channel editors")?;

            result.push(ChannelWithEditors { channel, editors });
        }

        tx.commit().await.context("Failed to close read transaction")?;
        Ok(result)
    }

    /// Persist all cursor advances of one run as a single commit.
    pub async fn commit_cursors(&self, advances: &[(i32, String)]) -> Result<()> {
        if advances.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.context("Failed to open transaction")?;
        for (channel_id, cursor) in advances {
            sqlx::query("UPDATE channels SET last_post_time = $1 WHERE id = $2")
                .bind(cursor)
                .bind(channel_id)
                .execute(&mut *tx)
                .await
                .context("Failed to advance channel cursor")?;
        }
        tx.commit().await.context("Failed to commit cursor advances")?;
        Ok(())
    }

    // --- schedule ---

    pub async fn schedule_settings(&self) -> Result<ScheduleSettings> {
        sqlx::query("INSERT INTO schedule_settings (id, hours) VALUES (1, $1) ON CONFLICT DO NOTHING")
            .bind(DEFAULT_SCHEDULE_HOURS)
            .execute(&self.pool)
            .await
            .context("Failed to seed schedule settings")?;

        sqlx::query_as::<_, ScheduleSettings>(
            "SELECT hours, last_run FROM schedule_settings WHERE id = 1",
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to load schedule settings")
    }

    pub async fn update_schedule_hours(&self, hours: &str) -> Result<()> {
        sqlx::query("UPDATE schedule_settings SET hours = $1 WHERE id = 1")
            .bind(hours)
            .execute(&self.pool)
            .await
            .context("Failed to update schedule hours")?;
        Ok(())
    }

    pub async fn mark_schedule_run(&self, last_run: &str) -> Result<()> {
        sqlx::query("UPDATE schedule_settings SET last_run = $1 WHERE id = 1")
            .bind(last_run)
            .execute(&self.pool)
            .await
            .context("Failed to mark schedule run")?;
        Ok(())
    }
}
