//! Bot-specific reading of chat messages.

use once_cell::sync::Lazy;
use regex_lite::Regex;

use super::types::BotError;
use crate::correlator::Classification;
use crate::transport::Message;

/// What the acknowledgement of an imagine request says.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// The bot echoed the prompt and started the job.
    Echo(String),
    /// The job was accepted into the bot's queue; it may take longer.
    Queued(String),
    /// The bot refused or failed.
    Failed(BotError),
}

/// Content rules for one bot family.
pub trait ContentParser: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// User id of the bot, which is also its application id.
    fn bot_id(&self) -> &'static str;

    fn concurrency(&self) -> usize;

    /// Custom id prefix of the upscale buttons.
    fn upscale_prefix(&self) -> &'static str;

    /// Custom id prefix of the variation buttons.
    fn variation_prefix(&self) -> &'static str;

    /// Whether an imagine request is acknowledged by a message carrying its
    /// nonce before the grid arrives.
    fn acknowledges_imagine(&self) -> bool;

    /// Key and dedup identifier of an inbound message, if relevant.
    fn classify(&self, message: &Message) -> Option<Classification>;

    /// Interpret the acknowledgement of an imagine request for `prompt`.
    fn parse_reply(&self, prompt: &str, message: &Message) -> ReplyOutcome;

    /// Prompt in the form used for correlation keys.
    fn normalize_prompt(&self, prompt: &str) -> String {
        prompt.to_string()
    }

    /// Upscale button identifiers of a grid message, prefix stripped.
    fn image_ids(&self, message: &Message) -> Vec<String> {
        let prefix = self.upscale_prefix();
        message
            .components
            .iter()
            .filter(|row| row.components.len() >= 4)
            .filter(|row| {
                row.components[0]
                    .custom_id
                    .as_deref()
                    .is_some_and(|id| id.starts_with(prefix))
            })
            .flat_map(|row| row.components.iter())
            .filter_map(|c| c.custom_id.as_deref()?.strip_prefix(prefix))
            .map(str::to_string)
            .collect()
    }
}

/// Split `**prompt** rest` into `(prompt, rest)`.
pub fn split_bold(content: &str) -> Option<(&str, &str)> {
    let mut parts = content.splitn(3, "**");
    let _before = parts.next()?;
    let prompt = parts.next()?;
    let rest = parts.next()?;
    Some((prompt, rest))
}

static WRAPPED_LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"<https?://[^\s]+>").unwrap());
static LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://[^\s]+").unwrap());

/// Replace every link with `<LINK>`. The bot rewrites links between its
/// replies, so keys must not depend on them.
pub fn replace_links(text: &str) -> String {
    let text = WRAPPED_LINK.replace_all(text, "<LINK>");
    LINK.replace_all(&text, "<LINK>").into_owned()
}
