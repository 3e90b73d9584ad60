//! Midjourney reply rules.

use super::parser::{replace_links, split_bold, ContentParser, ReplyOutcome};
use super::types::BotError;
use crate::correlator::{Classification, SearchKey};
use crate::transport::Message;

pub const MIDJOURNEY_BOT_ID: &str = "936929561302675456";

const UPSCALE_TERM: &str = "Upscaled by";
const IMAGE_NUMBER_TERM: &str = "Image #";
const VARIATION_TERM: &str = "Variations by";
const UPSCALE_ID: &str = "MJ::JOB::upsample::";
const VARIATION_ID: &str = "MJ::JOB::variation::";

/// Notice carried by the first embed of a bot reply.
#[derive(Debug, Clone, PartialEq, Eq)]
enum EmbedNotice {
    Queued,
    Error(BotError),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MidjourneyParser;

impl MidjourneyParser {
    pub fn new() -> Self {
        Self
    }
}

/// Classify the embed of an error or notice reply.
fn parse_embed(message: &Message) -> Option<EmbedNotice> {
    let embed = message.embeds.first()?;
    let title = embed.title.as_deref().unwrap_or_default().to_lowercase();
    let desc = embed
        .description
        .as_deref()
        .unwrap_or_default()
        .to_lowercase();
    let detail = format!("midjourney: {}: {}", title, desc);

    let notice = match title.as_str() {
        "invalid parameter" | "invalid link" | "banned prompt" | "banned prompt detected" => {
            EmbedNotice::Error(BotError::validation(detail))
        }
        "job queued" => EmbedNotice::Queued,
        "queue full" => EmbedNotice::Error(BotError::capacity(detail)),
        "pending mod message" | "action required" | "captcha required" => {
            EmbedNotice::Error(BotError::fatal(detail))
        }
        _ => EmbedNotice::Error(BotError::transient(detail)),
    };
    Some(notice)
}

/// Recover the echoed prompt of a queued job from the `/imagine` footer.
fn parse_footer(prompt: &str, message: &Message) -> Result<String, BotError> {
    let footer = message
        .embeds
        .first()
        .and_then(|e| e.footer.as_ref())
        .map(|f| f.text.as_str())
        .ok_or_else(|| BotError::transient("midjourney: queued reply has no footer"))?;
    let command = footer.strip_prefix("/imagine ").ok_or_else(|| {
        BotError::transient(format!("midjourney: footer doesn't start with /imagine: {}", footer))
    })?;
    let suffixes = command.strip_prefix(prompt).ok_or_else(|| {
        BotError::transient(format!("midjourney: footer doesn't start with prompt: {}", footer))
    })?;
    // A doubled space appears when suffixes are configured on the account.
    let suffixes = if suffixes.starts_with("  ") {
        &suffixes[1..]
    } else {
        suffixes
    };
    Ok(format!("{}{}", prompt, suffixes))
}

impl ContentParser for MidjourneyParser {
    fn name(&self) -> &'static str {
        "midjourney"
    }

    fn bot_id(&self) -> &'static str {
        MIDJOURNEY_BOT_ID
    }

    fn concurrency(&self) -> usize {
        3
    }

    fn upscale_prefix(&self) -> &'static str {
        UPSCALE_ID
    }

    fn variation_prefix(&self) -> &'static str {
        VARIATION_ID
    }

    fn acknowledges_imagine(&self) -> bool {
        true
    }

    fn classify(&self, message: &Message) -> Option<Classification> {
        if let Some(attachment) = message.attachments.first() {
            if message.components.is_empty() {
                return None;
            }
            let (prompt, rest) = split_bold(&message.content)?;
            let prompt = replace_links(prompt);
            let key = if rest.contains(UPSCALE_TERM) || rest.contains(IMAGE_NUMBER_TERM) {
                SearchKey::Upscale(prompt)
            } else if rest.contains(VARIATION_TERM) {
                SearchKey::Variation(prompt)
            } else {
                SearchKey::Preview(prompt)
            };
            return Some(Classification::new(key, attachment.url.clone()));
        }

        let nonce = message.nonce.as_ref()?;
        if split_bold(&message.content).is_none() && parse_embed(message).is_none() {
            return None;
        }
        Some(Classification::new(SearchKey::Nonce(nonce.clone()), nonce.clone()))
    }

    fn parse_reply(&self, prompt: &str, message: &Message) -> ReplyOutcome {
        if let Some((echoed, _)) = split_bold(&message.content) {
            return ReplyOutcome::Echo(echoed.to_string());
        }
        match parse_embed(message) {
            Some(EmbedNotice::Queued) => match parse_footer(prompt, message) {
                Ok(echoed) => ReplyOutcome::Queued(echoed),
                Err(e) => ReplyOutcome::Failed(e),
            },
            Some(EmbedNotice::Error(e)) => ReplyOutcome::Failed(e),
            None => ReplyOutcome::Failed(BotError::transient(format!(
                "midjourney: couldn't parse prompt from imagine response: {}",
                message.content
            ))),
        }
    }

    fn normalize_prompt(&self, prompt: &str) -> String {
        replace_links(prompt)
    }
}
