//! BlueWillow reply rules.

use super::parser::{split_bold, ContentParser, ReplyOutcome};
use super::types::BotError;
use crate::correlator::{Classification, SearchKey};
use crate::transport::Message;

pub const BLUEWILLOW_BOT_ID: &str = "1049413890276077690";

const UPSCALE_TERM: &str = "Upscaling by";
const VARIATION_TERM: &str = "Variations by";
const UPSCALE_ID: &str = "UPSCALE:";
const VARIATION_ID: &str = "VARIATION:";
/// In-progress renders are posted as webp.
const IN_PROGRESS_TYPE: &str = "image/webp";

#[derive(Debug, Clone, Copy, Default)]
pub struct BlueWillowParser;

impl BlueWillowParser {
    pub fn new() -> Self {
        Self
    }
}

impl ContentParser for BlueWillowParser {
    fn name(&self) -> &'static str {
        "bluewillow"
    }

    fn bot_id(&self) -> &'static str {
        BLUEWILLOW_BOT_ID
    }

    fn concurrency(&self) -> usize {
        5
    }

    fn upscale_prefix(&self) -> &'static str {
        UPSCALE_ID
    }

    fn variation_prefix(&self) -> &'static str {
        VARIATION_ID
    }

    /// BlueWillow does not echo the prompt in an acknowledgement.
    fn acknowledges_imagine(&self) -> bool {
        false
    }

    fn classify(&self, message: &Message) -> Option<Classification> {
        if let Some(attachment) = message.attachments.first() {
            if attachment.content_type.as_deref() == Some(IN_PROGRESS_TYPE) {
                return None;
            }
            let (prompt, rest) = split_bold(&message.content)?;
            let key = if rest.contains(UPSCALE_TERM) {
                SearchKey::Upscale(prompt.to_string())
            } else if message.components.is_empty() {
                return None;
            } else if rest.contains(VARIATION_TERM) {
                SearchKey::Variation(prompt.to_string())
            } else {
                SearchKey::Preview(prompt.to_string())
            };
            return Some(Classification::new(key, attachment.url.clone()));
        }

        let nonce = message.nonce.as_ref()?;
        split_bold(&message.content)?;
        Some(Classification::new(SearchKey::Nonce(nonce.clone()), nonce.clone()))
    }

    fn parse_reply(&self, prompt: &str, message: &Message) -> ReplyOutcome {
        match split_bold(&message.content) {
            Some((echoed, _)) => ReplyOutcome::Echo(echoed.to_string()),
            None if message.content.is_empty() => ReplyOutcome::Echo(prompt.to_string()),
            None => ReplyOutcome::Failed(BotError::transient(format!(
                "bluewillow: unexpected reply: {}",
                message.content
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures::{grid_message, nonce_reply};

    #[test]
    fn test_in_progress_webp_ignored() {
        let mut msg = grid_message("m1", "c", "**cat** - (50%)", "https://cdn/p.webp", UPSCALE_ID);
        msg.attachments[0].content_type = Some("image/webp".into());
        assert!(BlueWillowParser.classify(&msg).is_none());
    }

    #[test]
    fn test_classify_keys() {
        let grid = grid_message("m1", "c", "**cat** - <@1>", "https://cdn/g.png", UPSCALE_ID);
        assert_eq!(
            BlueWillowParser.classify(&grid).unwrap().key,
            SearchKey::Preview("cat".into())
        );

        let mut up = grid_message("m2", "c", "**cat** - Upscaling by <@1>", "https://cdn/u.png", UPSCALE_ID);
        up.components.clear();
        assert_eq!(
            BlueWillowParser.classify(&up).unwrap().key,
            SearchKey::Upscale("cat".into())
        );

        let var = grid_message("m3", "c", "**cat** - Variations by <@1>", "https://cdn/v.png", UPSCALE_ID);
        assert_eq!(
            BlueWillowParser.classify(&var).unwrap().key,
            SearchKey::Variation("cat".into())
        );
    }

    #[test]
    fn test_links_are_kept() {
        let grid = grid_message("m1", "c", "**https://x.y/a.png cat**", "https://cdn/g.png", UPSCALE_ID);
        assert_eq!(
            BlueWillowParser.classify(&grid).unwrap().key,
            SearchKey::Preview("https://x.y/a.png cat".into())
        );
        assert_eq!(BlueWillowParser.normalize_prompt("https://x.y cat"), "https://x.y cat");
    }

    #[test]
    fn test_nonce_requires_prompt() {
        assert!(BlueWillowParser.classify(&nonce_reply("c", "1", "**cat**")).is_some());
        assert!(BlueWillowParser.classify(&nonce_reply("c", "1", "working")).is_none());
    }
}
