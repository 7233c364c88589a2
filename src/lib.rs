/// Tweet Relay Bot Library
///
/// Polls Twitter timelines for a set of tracked channels, filters out
/// already-seen and retweeted content, optionally translates the text,
/// and relays each new post to the channel's Telegram subscribers.

pub mod bot;
pub mod config;
pub mod db;
pub mod extractor;
pub mod filter;
pub mod formatter;
pub mod handlers;
pub mod pipeline;
pub mod rate_limit;
pub mod scheduler;
pub mod translator;
pub mod twitter;
