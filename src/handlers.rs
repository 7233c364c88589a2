/// Command handlers module
///
/// Implements the operator surface: channel and editor management, the
/// schedule, and the manual update trigger. Authorization is a static
/// allow-list: admins come from config, editors from the store. Admin-only
/// commands stay silent for everyone else.

use std::sync::Arc;

use anyhow::Result;
use lazy_static::lazy_static;
use regex::Regex;
use teloxide::prelude::*;

use crate::db::Editor;
use crate::pipeline::{run_update, RelayContext, RunOutcome};
use crate::scheduler::normalize_hours;
use crate::twitter::TwitterError;

lazy_static! {
    static ref HANDLE_RE: Regex = Regex::new(r"^[A-Za-z0-9_]{1,15}$").expect("valid handle regex");
}

fn sender_id(msg: &Message) -> Option<i64> {
    msg.from().map(|user| user.id.0 as i64)
}

/// Look up the sender as an editor, auto-registering admins on the fly
/// (an admin is always also an editor, as on /start).
async fn resolve_editor(ctx: &RelayContext, user_id: i64) -> Result<Option<Editor>> {
    let telegram_id = user_id.to_string();
    if let Some(editor) = ctx.store.editor_by_telegram_id(&telegram_id).await? {
        return Ok(Some(editor));
    }
    if ctx.config.is_admin(user_id) {
        ctx.store.create_editor(&telegram_id, "Admin").await?;
        return ctx.store.editor_by_telegram_id(&telegram_id).await;
    }
    Ok(None)
}

pub async fn handle_start(bot: Bot, msg: Message, ctx: Arc<RelayContext>) -> Result<()> {
    let Some(user_id) = sender_id(&msg) else {
        return Ok(());
    };

    if ctx.config.is_admin(user_id) {
        // Make sure the admin exists as an editor so subscriptions work.
        resolve_editor(&ctx, user_id).await?;
        bot.send_message(
            msg.chat.id,
            "👑 Welcome to the relay admin panel!\n\n\
             /addchannel <handle> — track a Twitter account\n\
             /removechannel <handle> — drop it from your subscriptions\n\
             /deletechannel <handle> — remove it for everyone\n\
             /channels — your subscriptions\n\
             /allchannels — every tracked channel\n\
             /addeditor <telegram_id> <name> — allow a new editor\n\
             /removeeditor <telegram_id> — revoke an editor\n\
             /schedule [hours] — show or set polling hours\n\
             /update — run the pipeline now",
        )
        .await?;
        return Ok(());
    }

    let telegram_id = user_id.to_string();
    if let Some(editor) = ctx.store.editor_by_telegram_id(&telegram_id).await? {
        bot.send_message(
            msg.chat.id,
            format!(
                "👤 Welcome, {}!\n\n\
                 /addchannel <handle> — track a Twitter account\n\
                 /removechannel <handle> — drop it from your subscriptions\n\
                 /channels — your subscriptions",
                editor.name
            ),
        )
        .await?;
        return Ok(());
    }

    bot.send_message(msg.chat.id, "🚫 You don't have access to this bot.")
        .await?;
    Ok(())
}

pub async fn handle_help(bot: Bot, msg: Message, ctx: Arc<RelayContext>) -> Result<()> {
    handle_start(bot, msg, ctx).await
}

/// Manual pipeline trigger. Admin only.
pub async fn handle_update(bot: Bot, msg: Message, ctx: Arc<RelayContext>) -> Result<()> {
    let Some(user_id) = sender_id(&msg) else {
        return Ok(());
    };
    if !ctx.config.is_admin(user_id) {
        return Ok(());
    }

    bot.send_message(msg.chat.id, "⏳ Checking all channels for new posts...")
        .await?;

    match run_update(&ctx, &bot).await {
        Ok(RunOutcome::Completed(report)) => {
            bot.send_message(msg.chat.id, report.to_message()).await?;
        }
        Ok(RunOutcome::NothingToDo) => {
            bot.send_message(msg.chat.id, "❌ There are no channels to update")
                .await?;
        }
        Ok(RunOutcome::AlreadyRunning) => {
            bot.send_message(msg.chat.id, "⏳ An update is already in progress")
                .await?;
        }
        Err(e) => {
            log::error!("Manual update failed: {:#}", e);
            bot.send_message(msg.chat.id, format!("❌ Update failed:\n{:#}", e))
                .await?;
        }
    }
    Ok(())
}

pub async fn handle_channels(bot: Bot, msg: Message, ctx: Arc<RelayContext>) -> Result<()> {
    let Some(user_id) = sender_id(&msg) else {
        return Ok(());
    };
    let Some(editor) = resolve_editor(&ctx, user_id).await? else {
        bot.send_message(msg.chat.id, "❌ You are not registered as an editor")
            .await?;
        return Ok(());
    };

    let channels = ctx.store.editor_channels(editor.id).await?;
    if channels.is_empty() {
        bot.send_message(msg.chat.id, "❌ You have no subscribed channels")
            .await?;
        return Ok(());
    }

    let mut lines = vec!["📋 Your channels:".to_string()];
    for channel in channels {
        lines.push(format!(
            "• @{} (ID: {}) — last post: {}",
            channel.name,
            channel.twitter_id,
            channel.last_post_time.as_deref().unwrap_or("not updated yet"),
        ));
    }
    bot.send_message(msg.chat.id, lines.join("\n")).await?;
    Ok(())
}

pub async fn handle_all_channels(bot: Bot, msg: Message, ctx: Arc<RelayContext>) -> Result<()> {
    let Some(user_id) = sender_id(&msg) else {
        return Ok(());
    };
    if !ctx.config.is_admin(user_id) {
        return Ok(());
    }

    let channels = ctx.store.channels_with_editors().await?;
    if channels.is_empty() {
        bot.send_message(msg.chat.id, "❌ No channels found").await?;
        return Ok(());
    }

    let mut lines = vec!["📋 All tracked channels:".to_string()];
    for entry in channels {
        let editors = if entry.editors.is_empty() {
            "no editors".to_string()
        } else {
            entry
                .editors
                .iter()
                .map(|e| e.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        };
        lines.push(format!(
            "• @{} (ID: {})\n  Last post: {}\n  Editors: {}",
            entry.channel.name,
            entry.channel.twitter_id,
            entry.channel.last_post_time.as_deref().unwrap_or("not updated yet"),
            editors,
        ));
    }
    bot.send_message(msg.chat.id, lines.join("\n")).await?;
    Ok(())
}

pub async fn handle_add_channel(
    bot: Bot,
    msg: Message,
    ctx: Arc<RelayContext>,
    handle: String,
) -> Result<()> {
    let Some(user_id) = sender_id(&msg) else {
        return Ok(());
    };
    let Some(editor) = resolve_editor(&ctx, user_id).await? else {
        bot.send_message(msg.chat.id, "❌ You are not registered as an editor")
            .await?;
        return Ok(());
    };

    let handle = handle.trim().trim_start_matches('@').to_string();
    if !HANDLE_RE.is_match(&handle) {
        bot.send_message(
            msg.chat.id,
            "❌ Invalid handle. Use up to 15 latin letters, digits or underscores,\n\
             e.g. /addchannel nasa",
        )
        .await?;
        return Ok(());
    }

    match ctx.twitter.get_user_by_handle(&handle).await {
        Ok(lookup) => {
            let channel = ctx
                .store
                .subscribe_editor(editor.id, &handle, &lookup.external_id)
                .await?;
            bot.send_message(
                msg.chat.id,
                format!("✅ Channel added: @{} (Twitter ID: {})", channel.name, channel.twitter_id),
            )
            .await?;
        }
        Err(e @ TwitterError::Api(_)) | Err(e @ TwitterError::Malformed(_)) => {
            bot.send_message(msg.chat.id, format!("❌ Could not resolve @{}: {}", handle, e))
                .await?;
        }
        Err(TwitterError::Transport(e)) => {
            log::error!("Handle lookup transport error: {}", e);
            bot.send_message(
                msg.chat.id,
                "❌ Upstream API is unreachable right now, try again later",
            )
            .await?;
        }
    }
    Ok(())
}

pub async fn handle_remove_channel(
    bot: Bot,
    msg: Message,
    ctx: Arc<RelayContext>,
    handle: String,
) -> Result<()> {
    let Some(user_id) = sender_id(&msg) else {
        return Ok(());
    };
    let Some(editor) = resolve_editor(&ctx, user_id).await? else {
        bot.send_message(msg.chat.id, "❌ You are not registered as an editor")
            .await?;
        return Ok(());
    };

    let handle = handle.trim().trim_start_matches('@');
    let Some(channel) = ctx.store.channel_by_name(handle).await? else {
        bot.send_message(msg.chat.id, format!("❌ Channel @{} is not tracked", handle))
            .await?;
        return Ok(());
    };

    if ctx.store.unsubscribe_editor(editor.id, channel.id).await? {
        bot.send_message(msg.chat.id, format!("✅ Unsubscribed from @{}", handle))
            .await?;
    } else {
        bot.send_message(msg.chat.id, format!("❌ You are not subscribed to @{}", handle))
            .await?;
    }
    Ok(())
}

pub async fn handle_delete_channel(
    bot: Bot,
    msg: Message,
    ctx: Arc<RelayContext>,
    handle: String,
) -> Result<()> {
    let Some(user_id) = sender_id(&msg) else {
        return Ok(());
    };
    if !ctx.config.is_admin(user_id) {
        return Ok(());
    }

    let handle = handle.trim().trim_start_matches('@');
    let Some(channel) = ctx.store.channel_by_name(handle).await? else {
        bot.send_message(msg.chat.id, format!("❌ Channel @{} is not tracked", handle))
            .await?;
        return Ok(());
    };

    if ctx.store.delete_channel(channel.id).await? {
        bot.send_message(
            msg.chat.id,
            format!("✅ Channel @{} removed from the system", handle),
        )
        .await?;
    } else {
        bot.send_message(msg.chat.id, "❌ Failed to delete the channel")
            .await?;
    }
    Ok(())
}

pub async fn handle_add_editor(
    bot: Bot,
    msg: Message,
    ctx: Arc<RelayContext>,
    args: String,
) -> Result<()> {
    let Some(user_id) = sender_id(&msg) else {
        return Ok(());
    };
    if !ctx.config.is_admin(user_id) {
        return Ok(());
    }

    let mut parts = args.trim().splitn(2, char::is_whitespace);
    let telegram_id = parts.next().unwrap_or_default().trim();
    let name = parts.next().unwrap_or_default().trim();

    if telegram_id.parse::<i64>().is_err() || name.is_empty() {
        bot.send_message(
            msg.chat.id,
            "❌ Usage: /addeditor <telegram_id> <name>\ne.g. /addeditor 123456789 Ivan",
        )
        .await?;
        return Ok(());
    }

    match ctx.store.create_editor(telegram_id, name).await? {
        Some(editor) => {
            bot.send_message(
                msg.chat.id,
                format!("✅ Editor {} (ID: {}) added", editor.name, editor.telegram_id),
            )
            .await?;
        }
        None => {
            bot.send_message(
                msg.chat.id,
                format!("❌ An editor with ID {} already exists", telegram_id),
            )
            .await?;
        }
    }
    Ok(())
}

pub async fn handle_remove_editor(
    bot: Bot,
    msg: Message,
    ctx: Arc<RelayContext>,
    telegram_id: String,
) -> Result<()> {
    let Some(user_id) = sender_id(&msg) else {
        return Ok(());
    };
    if !ctx.config.is_admin(user_id) {
        return Ok(());
    }

    let telegram_id = telegram_id.trim();
    if ctx.store.delete_editor(telegram_id).await? {
        bot.send_message(msg.chat.id, format!("✅ Editor {} removed", telegram_id))
            .await?;
    } else {
        bot.send_message(msg.chat.id, format!("❌ No editor with ID {}", telegram_id))
            .await?;
    }
    Ok(())
}

/// What one `/schedule` invocation is allowed to do. Unknown users get
/// silence; editors may look at the settings; only admins change them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScheduleAction {
    Ignore,
    View,
    Set,
}

fn schedule_action(is_editor: bool, is_admin: bool, wants_set: bool) -> ScheduleAction {
    if wants_set {
        if is_admin {
            ScheduleAction::Set
        } else {
            ScheduleAction::Ignore
        }
    } else if is_editor || is_admin {
        ScheduleAction::View
    } else {
        ScheduleAction::Ignore
    }
}

/// `/schedule` shows the current settings; `/schedule 9,12,15` replaces the
/// polling hours (admin only).
pub async fn handle_schedule(
    bot: Bot,
    msg: Message,
    ctx: Arc<RelayContext>,
    hours: String,
) -> Result<()> {
    let Some(user_id) = sender_id(&msg) else {
        return Ok(());
    };

    let hours = hours.trim();
    let editor = resolve_editor(&ctx, user_id).await?;
    let action = schedule_action(
        editor.is_some(),
        ctx.config.is_admin(user_id),
        !hours.is_empty(),
    );

    match action {
        ScheduleAction::Ignore => return Ok(()),
        ScheduleAction::View => {
            let settings = ctx.store.schedule_settings().await?;
            bot.send_message(
                msg.chat.id,
                format!(
                    "⏰ Polling hours (UTC): {}\nLast automatic run: {}",
                    settings.hours,
                    settings.last_run.as_deref().unwrap_or("never"),
                ),
            )
            .await?;
            return Ok(());
        }
        ScheduleAction::Set => {}
    }

    match normalize_hours(hours) {
        Ok(normalized) => {
            ctx.store.update_schedule_hours(&normalized).await?;
            bot.send_message(
                msg.chat.id,
                format!("✅ Polling hours set to: {} (UTC)", normalized),
            )
            .await?;
        }
        Err(e) => {
            bot.send_message(
                msg.chat.id,
                format!("❌ {}\nUsage: /schedule 9,12,15,18,21", e),
            )
            .await?;
        }
    }
    Ok(())
}
