/// Scheduler module
///
/// Fires the update pipeline automatically during the configured hours of
/// day. The permitted hours and the last-run marker live in the database,
/// so operators can retune the schedule without a restart. At most one
/// automatic run starts per calendar hour.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::{DateTime, Timelike, Utc};
use teloxide::prelude::*;
use teloxide::types::ChatId;
use tokio::time;

use crate::extractor::format_timestamp;
use crate::pipeline::{run_update, RelayContext, RunOutcome};

/// How often the schedule is re-checked.
const TICK_INTERVAL: Duration = Duration::from_secs(60);

/// Parse and normalize an operator-supplied hours list ("9, 12,15") into
/// the canonical sorted comma-joined form ("9,12,15"). Rejects anything
/// that is not an hour of day.
pub fn normalize_hours(input: &str) -> Result<String> {
    let mut hours = BTreeSet::new();
    for token in input.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        let hour: u32 = match token.parse() {
            Ok(h) if h <= 23 => h,
            _ => bail!("'{}' is not an hour between 0 and 23", token),
        };
        hours.insert(hour);
    }
    if hours.is_empty() {
        bail!("schedule needs at least one hour");
    }
    Ok(hours
        .into_iter()
        .map(|h| h.to_string())
        .collect::<Vec<_>>()
        .join(","))
}

fn parse_hours(hours: &str) -> BTreeSet<u32> {
    hours
        .split(',')
        .filter_map(|h| h.trim().parse().ok())
        .collect()
}

/// Decide whether an automatic run should start now. True when the current
/// hour is scheduled and no run was already started within this calendar
/// hour (compared on the `YYYY-MM-DD-HH` prefix of the last-run marker).
fn should_fire(hours: &str, last_run: Option<&str>, now: DateTime<Utc>) -> bool {
    if !parse_hours(hours).contains(&now.hour()) {
        return false;
    }

    let current_hour_prefix = now.format("%Y-%m-%d-%H").to_string();
    match last_run {
        Some(last_run) => !last_run.starts_with(&current_hour_prefix),
        None => true,
    }
}

/// Run the schedule loop forever. Each firing goes through the same
/// orchestrator entry point as a manual trigger; if a run is already in
/// flight the tick is skipped, not queued.
pub async fn start_scheduler(ctx: Arc<RelayContext>, bot: Bot) {
    log::info!("Starting update scheduler (checking every {:?})", TICK_INTERVAL);

    let mut interval = time::interval(TICK_INTERVAL);
    // Skip the first tick (immediate execution).
    interval.tick().await;

    loop {
        interval.tick().await;

        let settings = match ctx.store.schedule_settings().await {
            Ok(settings) => settings,
            Err(e) => {
                log::error!("Failed to load schedule settings: {:#}", e);
                continue;
            }
        };

        let now = Utc::now();
        if !should_fire(&settings.hours, settings.last_run.as_deref(), now) {
            continue;
        }

        // Mark before running so a failed run still counts for this hour.
        if let Err(e) = ctx.store.mark_schedule_run(&format_timestamp(now)).await {
            log::error!("Failed to mark schedule run: {:#}", e);
            continue;
        }

        log::info!("Scheduled update triggered (hour {})", now.hour());

        match run_update(&ctx, &bot).await {
            Ok(RunOutcome::Completed(report)) => {
                for admin_id in &ctx.config.admin_ids {
                    if let Err(e) = bot.send_message(ChatId(*admin_id), report.to_message()).await
                    {
                        log::error!("Failed to send run report to {}: {}", admin_id, e);
                    }
                }
            }
            Ok(RunOutcome::NothingToDo) => {
                log::info!("Scheduled update found no channels to process");
            }
            Ok(RunOutcome::AlreadyRunning) => {
                log::warn!("Scheduled update skipped: a run is already in progress");
            }
            Err(e) => {
                log::error!("Scheduled update failed: {:#}", e);
                for admin_id in &ctx.config.admin_ids {
                    let text = format!("❌ Scheduled update failed:\n{:#}", e);
                    if let Err(send_err) = bot.send_message(ChatId(*admin_id), text).await {
                        log::error!("Failed to notify admin {}: {}", admin_id, send_err);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, hour, minute, 0).unwrap()
    }

    #[test]
    fn normalizes_hour_lists() {
        assert_eq!(normalize_hours("9, 12,15").unwrap(), "9,12,15");
        assert_eq!(normalize_hours("15,9,12,9").unwrap(), "9,12,15");
        assert_eq!(normalize_hours("0,23").unwrap(), "0,23");
    }

    #[test]
    fn rejects_invalid_hours() {
        assert!(normalize_hours("24").is_err());
        assert!(normalize_hours("9,noon").is_err());
        assert!(normalize_hours("").is_err());
        assert!(normalize_hours("-1").is_err());
    }

    #[test]
    fn fires_only_during_scheduled_hours() {
        assert!(should_fire("9,12,15", None, at(12, 30)));
        assert!(!should_fire("9,12,15", None, at(13, 0)));
    }

    #[test]
    fn fires_at_most_once_per_calendar_hour() {
        // Already ran at 12:05 today.
        assert!(!should_fire("12", Some("2024-03-10-12-05-00"), at(12, 30)));
        // Ran at 12 yesterday: today's 12 o'clock still fires.
        assert!(should_fire("12", Some("2024-03-09-12-05-00"), at(12, 30)));
        // Ran at 9, now it is 12.
        assert!(should_fire("9,12", Some("2024-03-10-09-01-00"), at(12, 0)));
    }
}
