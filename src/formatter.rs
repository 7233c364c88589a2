/// Delivery formatter module
///
/// Turns one normalized post into the transport payloads Telegram can
/// carry: a text message, a single photo, a photo album or a video.
/// Building payloads is pure and unit-tested; sending them is a thin
/// teloxide wrapper that treats every payload failure as non-fatal.

use anyhow::Result;
use lazy_static::lazy_static;
use regex::Regex;
use teloxide::prelude::*;
use teloxide::types::{ChatId, InputFile, InputMedia, InputMediaPhoto};
use url::Url;

use crate::extractor::{MediaKind, NormalizedPost};

/// Telegram's caption limit for photo/video messages.
pub const CAPTION_LIMIT: usize = 1024;

lazy_static! {
    static ref URL_RE: Regex = Regex::new(r"https?://\S+").expect("valid url regex");
    /// Same pattern with adjacent whitespace, used when stripping URLs out
    /// of the display text.
    static ref URL_STRIP_RE: Regex = Regex::new(r"\s*https?://\S+").expect("valid url regex");
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumPhoto {
    pub url: String,
    pub caption: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    Text(String),
    Photo { url: String, caption: Option<String> },
    Album(Vec<AlbumPhoto>),
    Video { url: String, caption: Option<String> },
}

/// Move embedded links out of the text into a trailing block of clickable
/// reference lines, so a mostly-bare-link post still reads well.
fn format_text(text: &str) -> String {
    let links: Vec<&str> = URL_RE.find_iter(text).map(|m| m.as_str()).collect();
    let clean = URL_STRIP_RE.replace_all(text, "").trim().to_string();

    if links.is_empty() {
        return clean;
    }

    let block = format!("🔗 {}", links.join("\n🔗 "));
    if clean.is_empty() {
        block
    } else {
        format!("{}\n\n{}", clean, block)
    }
}

/// Hard character cutoff, no ellipsis.
fn truncate_caption(text: &str) -> String {
    text.chars().take(CAPTION_LIMIT).collect()
}

/// Convert one post into its transport payloads.
///
/// With media present, at most one video is sent (the first found; extra
/// videos are dropped by design) plus the photos as a single message or
/// album. Animated gifs ride the video path.
pub fn format_post(post: &NormalizedPost) -> Vec<OutboundMessage> {
    let text = format_text(&post.text);
    let mut messages = Vec::new();

    if post.media.is_empty() {
        // Never send empty messages.
        if !text.is_empty() {
            messages.push(OutboundMessage::Text(text));
        }
        return messages;
    }

    let caption = if text.is_empty() {
        None
    } else {
        Some(truncate_caption(&text))
    };

    let photos: Vec<&str> = post
        .media
        .iter()
        .filter(|m| m.kind == MediaKind::Photo)
        .map(|m| m.url.as_str())
        .collect();
    let videos: Vec<&str> = post
        .media
        .iter()
        .filter(|m| matches!(m.kind, MediaKind::Video | MediaKind::AnimatedGif))
        .map(|m| m.url.as_str())
        .collect();

    if let Some(first_video) = videos.first() {
        messages.push(OutboundMessage::Video {
            url: first_video.to_string(),
            caption: caption.clone(),
        });
    }

    match photos.len() {
        0 => {}
        1 => messages.push(OutboundMessage::Photo {
            url: photos[0].to_string(),
            caption: caption.clone(),
        }),
        _ => {
            let album = photos
                .iter()
                .enumerate()
                .map(|(i, url)| AlbumPhoto {
                    url: url.to_string(),
                    caption: if i == 0 { caption.clone() } else { None },
                })
                .collect();
            messages.push(OutboundMessage::Album(album));
        }
    }

    // A post with only unresolvable media ends up here with payloads
    // stripped down to nothing; fall back to the bare text.
    if messages.is_empty() && !text.is_empty() {
        messages.push(OutboundMessage::Text(text));
    }

    messages
}

/// Send every payload to one recipient. Each payload failure is collected
/// instead of propagated, so a broken media URL never blocks the rest.
pub async fn deliver(bot: &Bot, chat_id: ChatId, messages: &[OutboundMessage]) -> Result<()> {
    let mut failures = Vec::new();

    for message in messages {
        if let Err(e) = send_one(bot, chat_id, message).await {
            log::error!("Delivery to {} failed: {}", chat_id, e);
            failures.push(e.to_string());
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        anyhow::bail!("{} payload(s) failed: {}", failures.len(), failures.join("; "))
    }
}

async fn send_one(bot: &Bot, chat_id: ChatId, message: &OutboundMessage) -> Result<()> {
    match message {
        OutboundMessage::Text(text) => {
            bot.send_message(chat_id, text.clone()).await?;
        }
        OutboundMessage::Photo { url, caption } => {
            let request = bot.send_photo(chat_id, InputFile::url(parse_url(url)?));
            match caption {
                Some(caption) => request.caption(caption.clone()).await?,
                None => request.await?,
            };
        }
        OutboundMessage::Video { url, caption } => {
            let request = bot.send_video(chat_id, InputFile::url(parse_url(url)?));
            match caption {
                Some(caption) => request.caption(caption.clone()).await?,
                None => request.await?,
            };
        }
        OutboundMessage::Album(photos) => {
            let mut group = Vec::with_capacity(photos.len());
            for photo in photos {
                let mut media = InputMediaPhoto::new(InputFile::url(parse_url(&photo.url)?));
                if let Some(caption) = &photo.caption {
                    media = media.caption(caption.clone());
                }
                group.push(InputMedia::Photo(media));
            }
            bot.send_media_group(chat_id, group).await?;
        }
    }
    Ok(())
}

fn parse_url(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| anyhow::anyhow!("invalid media url {}: {}", raw, e))
}
