//! Protocol adapters for image generation bots.
//!
//! [`ChatBotAdapter`] implements [`BotClient`] for any bot family; the
//! differences between bots live in a [`ContentParser`].

mod adapter;
mod bluewillow;
mod midjourney;
mod parser;
mod types;
mod validator;

use std::sync::Arc;

pub use adapter::{AdapterTimeouts, ChatBotAdapter, NonceGenerator, QUEUED_TIMEOUT, REPLY_TIMEOUT};
pub use bluewillow::{BlueWillowParser, BLUEWILLOW_BOT_ID};
pub use midjourney::{MidjourneyParser, MIDJOURNEY_BOT_ID};
pub use parser::{replace_links, split_bold, ContentParser, ReplyOutcome};
pub use types::{BotClient, BotError, ErrorKind, Preview};
pub use validator::{BannedWordValidator, PromptValidator};

use crate::config::BotKind;
use crate::transport::Transport;

/// Build the adapter for `kind`.
pub fn create_bot_client(
    kind: BotKind,
    transport: Arc<dyn Transport>,
    validator: Arc<dyn PromptValidator>,
    channel: &str,
) -> Arc<dyn BotClient> {
    match kind {
        BotKind::Midjourney => Arc::new(ChatBotAdapter::new(
            transport,
            MidjourneyParser::new(),
            validator,
            channel,
        )),
        BotKind::Bluewillow => Arc::new(ChatBotAdapter::new(
            transport,
            BlueWillowParser::new(),
            validator,
            channel,
        )),
    }
}
