/// Update pipeline module
///
/// The top-level control loop: for every tracked channel, work out what is
/// new since the cursor, fetch it, enrich and fan it out to subscribers,
/// then advance all cursors in one commit and assemble a run report.
///
/// Every per-channel, per-post and per-recipient failure is downgraded to
/// an operator notification; only failing to load the channel list aborts
/// a run. A global lock keeps runs from interleaving: a trigger that finds
/// a run in flight is skipped, not queued.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use lazy_static::lazy_static;
use teloxide::prelude::*;
use teloxide::types::ChatId;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::db::{Channel, Store};
use crate::extractor::{format_timestamp, NormalizedPost};
use crate::formatter::{deliver, format_post};
use crate::rate_limit::{worst_reading, RateLimitReading};
use crate::translator::Translator;
use crate::twitter::{PollWindow, TweetsPage, TwitterClient, TwitterError};

lazy_static! {
    // At-most-one orchestrator execution system-wide.
    static ref UPDATE_LOCK: Mutex<()> = Mutex::new(());
}

/// Everything a run needs, wired once at startup.
pub struct RelayContext {
    pub config: Config,
    pub store: Store,
    pub twitter: TwitterClient,
    pub translator: Translator,
}

/// Aggregate produced once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub channels_total: usize,
    pub new_posts: usize,
    pub worst_rate_limit: Option<RateLimitReading>,
}

impl RunReport {
    /// Operator-facing summary. The empty-readings case is spelled out
    /// explicitly rather than left to a formatting accident.
    pub fn to_message(&self) -> String {
        let quota = match &self.worst_rate_limit {
            Some(reading) => format!("API quota left: {}", reading),
            None => "API quota: no readings collected this run".to_string(),
        };
        format!(
            "📊 Update finished\n• Channels: {}\n• New posts: {}\n\n{}",
            self.channels_total, self.new_posts, quota
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(RunReport),
    /// No channels are tracked; not an error.
    NothingToDo,
    /// Another run holds the lock; this trigger is dropped.
    AlreadyRunning,
}

/// Compute the fetch window for one channel: its cursor when present,
/// otherwise a fixed lookback from now.
fn poll_window(
    channel: &Channel,
    lookback_hours: i64,
    exclude_retweets: bool,
    now: chrono::DateTime<Utc>,
) -> PollWindow {
    let cutoff = channel
        .last_post_time
        .clone()
        .unwrap_or_else(|| format_timestamp(now - Duration::hours(lookback_hours)));

    PollWindow {
        twitter_id: channel.twitter_id.clone(),
        cutoff: Some(cutoff),
        exclude_retweets,
    }
}

/// New cursor value for a channel: the maximum created_at over the posts
/// delivered this cycle, independent of delivery order.
fn advance_cursor(posts: &[NormalizedPost]) -> Option<String> {
    posts.iter().map(|p| p.created_at.clone()).max()
}

/// Collect the recipient set for a channel: its editors, plus the admins
/// when configured.
fn recipients_for(
    editor_ids: impl Iterator<Item = Option<i64>>,
    admin_ids: &[i64],
    include_admins: bool,
) -> BTreeSet<i64> {
    let mut recipients: BTreeSet<i64> = editor_ids.flatten().collect();
    if include_admins {
        recipients.extend(admin_ids.iter().copied());
    }
    recipients
}

/// Per-run bookkeeping: quota readings, cursor advances and counters, fed
/// one channel's fetch result at a time.
#[derive(Debug, Default)]
struct RunLedger {
    readings: Vec<RateLimitReading>,
    cursor_advances: Vec<(i32, String)>,
    channels_total: usize,
    new_posts: usize,
}

impl RunLedger {
    /// Absorb one channel's fetch result and return the posts to relay.
    ///
    /// A failed fetch still counts the channel but advances nothing; an
    /// empty page records its quota reading and leaves the cursor put.
    fn absorb(
        &mut self,
        channel_id: i32,
        result: Result<TweetsPage, TwitterError>,
    ) -> Result<Vec<NormalizedPost>, TwitterError> {
        self.channels_total += 1;
        let page = result?;

        if let Some(reading) = page.rate_limit {
            self.readings.push(reading);
        }
        if page.posts.is_empty() {
            return Ok(Vec::new());
        }

        if let Some(cursor) = advance_cursor(&page.posts) {
            self.cursor_advances.push((channel_id, cursor));
        }
        self.new_posts += page.posts.len();
        Ok(page.posts)
    }

    fn cursor_advances(&self) -> &[(i32, String)] {
        &self.cursor_advances
    }

    fn into_report(self) -> RunReport {
        RunReport {
            channels_total: self.channels_total,
            new_posts: self.new_posts,
            worst_rate_limit: worst_reading(&self.readings),
        }
    }
}

async fn notify_admins(bot: &Bot, admin_ids: &[i64], text: &str) {
    for admin_id in admin_ids {
        if let Err(e) = bot.send_message(ChatId(*admin_id), text).await {
            log::error!("Failed to notify admin {}: {}", admin_id, e);
        }
    }
}

/// Execute one full update run.
///
/// Returns Err only when the channel list itself cannot be loaded; every
/// other failure is reported and worked around.
pub async fn run_update(ctx: &RelayContext, bot: &Bot) -> Result<RunOutcome> {
    let Ok(_guard) = UPDATE_LOCK.try_lock() else {
        log::info!("Update already in progress, skipping this trigger");
        return Ok(RunOutcome::AlreadyRunning);
    };

    let channels = ctx
        .store
        .channels_with_editors()
        .await
        .context("Failed to load channel list")?;

    if channels.is_empty() {
        log::info!("No channels tracked, nothing to do");
        return Ok(RunOutcome::NothingToDo);
    }

    log::info!("Starting update run over {} channel(s)", channels.len());

    let mut ledger = RunLedger::default();

    for entry in &channels {
        let channel = &entry.channel;
        let window = poll_window(
            channel,
            ctx.config.lookback_hours,
            ctx.config.exclude_retweets,
            Utc::now(),
        );

        let fetched = ctx.twitter.get_user_tweets(&window, ctx.config.fetch_count).await;
        let posts = match ledger.absorb(channel.id, fetched) {
            Ok(posts) => posts,
            Err(e) => {
                // One channel's failure never aborts the run.
                log::error!("Fetch failed for @{}: {}", channel.name, e);
                notify_admins(
                    bot,
                    &ctx.config.admin_ids,
                    &format!("❌ Failed to fetch posts for @{}:\n{}", channel.name, e),
                )
                .await;
                continue;
            }
        };

        if posts.is_empty() {
            log::debug!("No new posts for @{}", channel.name);
            continue;
        }

        let recipients = recipients_for(
            entry.editors.iter().map(|e| e.telegram_id.parse().ok()),
            &ctx.config.admin_ids,
            ctx.config.notify_admins_on_update,
        );

        let post_count = posts.len();

        for mut post in posts {
            if let Err(e) = ctx.translator.enrich(&mut post).await {
                log::warn!("{:#}", e);
                notify_admins(
                    bot,
                    &ctx.config.admin_ids,
                    &format!(
                        "⚠️ Translation failed for a post from @{}; delivered untranslated.\n{}",
                        channel.name, e
                    ),
                )
                .await;
            }

            let messages = format_post(&post);
            for recipient in &recipients {
                if let Err(e) = deliver(bot, ChatId(*recipient), &messages).await {
                    notify_admins(
                        bot,
                        &ctx.config.admin_ids,
                        &format!(
                            "❌ Failed to deliver post {} from @{} to {}:\n{}",
                            post.id, channel.name, recipient, e
                        ),
                    )
                    .await;
                }
            }
        }

        log::info!("Relayed {} new post(s) for @{}", post_count, channel.name);
    }

    // All cursor advances of this run commit together. If this fails, the
    // already-delivered posts stay delivered and will be re-sent next run.
    if let Err(e) = ctx.store.commit_cursors(ledger.cursor_advances()).await {
        log::error!("Cursor commit failed: {:#}", e);
        notify_admins(
            bot,
            &ctx.config.admin_ids,
            &format!(
                "❌ Failed to persist channel cursors; delivered posts may repeat next run.\n{:#}",
                e
            ),
        )
        .await;
    }

    let report = ledger.into_report();

    log::info!(
        "Update run finished: {} channel(s), {} new post(s)",
        report.channels_total,
        report.new_posts
    );

    Ok(RunOutcome::Completed(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn post(id: &str, created_at: &str) -> NormalizedPost {
        NormalizedPost {
            id: id.to_string(),
            text: String::new(),
            original_text: None,
            is_quote: false,
            is_retweet: false,
            created_at: created_at.to_string(),
            media: Vec::new(),
        }
    }

    fn channel(cursor: Option<&str>) -> Channel {
        Channel {
            id: 1,
            name: "acme".to_string(),
            twitter_id: "42".to_string(),
            last_post_time: cursor.map(String::from),
        }
    }

    #[test]
    fn cursor_advances_to_max_created_at_regardless_of_order() {
        let posts = vec![
            post("a", "2024-01-01-10-00-00"),
            post("b", "2024-01-01-11-00-00"),
            post("c", "2024-01-01-09-00-00"),
        ];
        assert_eq!(advance_cursor(&posts).as_deref(), Some("2024-01-01-11-00-00"));
    }

    #[test]
    fn no_posts_means_no_cursor_advance() {
        assert!(advance_cursor(&[]).is_none());
    }

    #[test]
    fn poll_window_uses_persisted_cursor_when_present() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        let window = poll_window(&channel(Some("2024-03-09-08-00-00")), 72, true, now);
        assert_eq!(window.cutoff.as_deref(), Some("2024-03-09-08-00-00"));
        assert!(window.exclude_retweets);
    }

    #[test]
    fn poll_window_falls_back_to_lookback_without_cursor() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        let window = poll_window(&channel(None), 72, true, now);
        assert_eq!(window.cutoff.as_deref(), Some("2024-03-07-12-00-00"));
    }

    #[test]
    fn recipients_union_editors_and_optionally_admins() {
        let editors = [Some(10), None, Some(20)];
        let with_admins = recipients_for(editors.iter().copied(), &[20, 99], true);
        assert_eq!(with_admins.into_iter().collect::<Vec<_>>(), vec![10, 20, 99]);

        let editors_only = recipients_for(editors.iter().copied(), &[20, 99], false);
        assert_eq!(editors_only.into_iter().collect::<Vec<_>>(), vec![10, 20]);
    }

    #[test]
    fn report_shows_worst_reading() {
        let report = RunReport {
            channels_total: 2,
            new_posts: 1,
            worst_rate_limit: Some(RateLimitReading { remaining: 10, limit: 100 }),
        };
        let message = report.to_message();
        assert!(message.contains("Channels: 2"));
        assert!(message.contains("New posts: 1"));
        assert!(message.contains("10/100"));
    }

    #[test]
    fn failing_channel_is_counted_but_only_healthy_cursors_advance() {
        let mut ledger = RunLedger::default();

        let failed = ledger.absorb(1, Err(TwitterError::Api("HTTP 500: down".to_string())));
        assert!(failed.is_err());

        let relayed = ledger
            .absorb(
                2,
                Ok(TweetsPage {
                    posts: vec![post("a", "2024-01-01-10-00-00")],
                    rate_limit: Some(RateLimitReading { remaining: 5, limit: 100 }),
                }),
            )
            .unwrap();
        assert_eq!(relayed.len(), 1);

        assert_eq!(
            ledger.cursor_advances(),
            &[(2, "2024-01-01-10-00-00".to_string())]
        );

        let report = ledger.into_report();
        assert_eq!(report.channels_total, 2);
        assert_eq!(report.new_posts, 1);
        assert_eq!(
            report.worst_rate_limit,
            Some(RateLimitReading { remaining: 5, limit: 100 })
        );
    }

    #[test]
    fn empty_page_still_records_its_quota_reading() {
        let mut ledger = RunLedger::default();

        let relayed = ledger
            .absorb(
                1,
                Ok(TweetsPage {
                    posts: Vec::new(),
                    rate_limit: Some(RateLimitReading { remaining: 7, limit: 100 }),
                }),
            )
            .unwrap();
        assert!(relayed.is_empty());
        assert!(ledger.cursor_advances().is_empty());

        let report = ledger.into_report();
        assert_eq!(report.channels_total, 1);
        assert_eq!(report.new_posts, 0);
        assert_eq!(
            report.worst_rate_limit,
            Some(RateLimitReading { remaining: 7, limit: 100 })
        );
    }

    #[test]
    fn cursor_of_a_multi_post_page_is_the_latest_timestamp() {
        let mut ledger = RunLedger::default();

        ledger
            .absorb(
                3,
                Ok(TweetsPage {
                    posts: vec![
                        post("a", "2024-01-01-11-00-00"),
                        post("b", "2024-01-01-09-00-00"),
                    ],
                    rate_limit: None,
                }),
            )
            .unwrap();

        assert_eq!(
            ledger.cursor_advances(),
            &[(3, "2024-01-01-11-00-00".to_string())]
        );
        assert_eq!(ledger.into_report().new_posts, 2);
    }

    #[test]
    fn report_spells_out_missing_readings() {
        let report = RunReport {
            channels_total: 1,
            new_posts: 0,
            worst_rate_limit: None,
        };
        assert!(report.to_message().contains("no readings"));
    }
}
