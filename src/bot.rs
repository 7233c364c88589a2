/// Telegram bot module
///
/// Sets up and runs the bot with the teloxide framework, wiring together
/// configuration, the store, the upstream client, the translator and the
/// background scheduler.

use anyhow::{Context, Result};
use std::sync::Arc;
use teloxide::{prelude::*, utils::command::BotCommands};

use crate::config::Config;
use crate::db::Store;
use crate::handlers::{
    handle_add_channel, handle_add_editor, handle_all_channels, handle_channels,
    handle_delete_channel, handle_help, handle_remove_channel, handle_remove_editor,
    handle_schedule, handle_start, handle_update,
};
use crate::pipeline::RelayContext;
use crate::scheduler::start_scheduler;
use crate::translator::Translator;
use crate::twitter::TwitterClient;

/// Bot commands available to operators
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Supported commands:")]
pub enum Command {
    #[command(description = "Start the bot and see the available actions")]
    Start,
    #[command(description = "Show help information")]
    Help,
    #[command(description = "Check all channels for new posts now")]
    Update,
    #[command(description = "List your subscribed channels")]
    Channels,
    #[command(description = "List every tracked channel (admin)")]
    AllChannels,
    #[command(description = "Track a Twitter account: /addchannel <handle>")]
    AddChannel(String),
    #[command(description = "Unsubscribe from a channel: /removechannel <handle>")]
    RemoveChannel(String),
    #[command(description = "Delete a channel for everyone (admin)")]
    DeleteChannel(String),
    #[command(description = "Register an editor: /addeditor <telegram_id> <name> (admin)")]
    AddEditor(String),
    #[command(description = "Remove an editor: /removeeditor <telegram_id> (admin)")]
    RemoveEditor(String),
    #[command(description = "Show or set polling hours: /schedule [9,12,15]")]
    Schedule(String),
}

/// Initialize all collaborators and run the bot until shutdown.
pub async fn run_bot(config: Config) -> Result<()> {
    log::info!("Initializing bot...");

    let store = Store::connect(&config.database_url).await?;
    store.init().await?;

    let twitter = TwitterClient::new(&config.twitter_api_host, &config.twitter_api_key)
        .context("Failed to build the upstream API client")?;
    let translator = Translator::new(&config);

    let ctx = Arc::new(RelayContext {
        store,
        twitter,
        translator,
        config: config.clone(),
    });

    let bot = Bot::new(config.telegram_token.clone());

    let me = bot
        .get_me()
        .await
        .context("Failed to connect to the Telegram API")?;
    log::info!("Bot started: @{}", me.username());

    // Background schedule loop; shares the run lock with manual triggers.
    tokio::spawn(start_scheduler(ctx.clone(), bot.clone()));

    let handler = Update::filter_message().filter_command::<Command>().endpoint(
        |bot: Bot, msg: Message, cmd: Command, ctx: Arc<RelayContext>| async move {
            match cmd {
                Command::Start => handle_start(bot, msg, ctx).await,
                Command::Help => handle_help(bot, msg, ctx).await,
                Command::Update => handle_update(bot, msg, ctx).await,
                Command::Channels => handle_channels(bot, msg, ctx).await,
                Command::AllChannels => handle_all_channels(bot, msg, ctx).await,
                Command::AddChannel(handle) => handle_add_channel(bot, msg, ctx, handle).await,
                Command::RemoveChannel(handle) => {
                    handle_remove_channel(bot, msg, ctx, handle).await
                }
                Command::DeleteChannel(handle) => {
                    handle_delete_channel(bot, msg, ctx, handle).await
                }
                Command::AddEditor(args) => handle_add_editor(bot, msg, ctx, args).await,
                Command::RemoveEditor(id) => handle_remove_editor(bot, msg, ctx, id).await,
                Command::Schedule(hours) => handle_schedule(bot, msg, ctx, hours).await,
            }
        },
    );

    log::info!("Bot is running. Press Ctrl+C to stop.");

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![ctx])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}
