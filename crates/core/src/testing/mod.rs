//! Testing utilities and mock implementations.
//!
//! [`MockTransport`] plays a chat bot over the transport seam so adapters can
//! be exercised end to end; [`MockBotClient`] stands in for a whole adapter
//! when testing the scheduler and the job runner.
//!
//! # Example
//!
//! ```rust,ignore
//! use gridforge_core::testing::{MockBotClient, MockTransport};
//!
//! let transport = MockTransport::midjourney();
//! transport.set_duplicate_events(true);
//!
//! let client = MockBotClient::new()
//!     .fail_upscale_always("a cat", 2, BotError::capacity("queue full"));
//! let calls = client.counters();
//! ```

mod mock_bot_client;
mod mock_transport;

pub use mock_bot_client::{MockBotClient, MockCounters};
pub use mock_transport::{BotStyle, MockTransport};

/// Message builders.
pub mod fixtures {
    use crate::transport::{Attachment, Component, Embed, EmbedFooter, Message};

    fn content_type_of(url: &str) -> &'static str {
        if url.ends_with(".webp") {
            "image/webp"
        } else if url.ends_with(".jpg") || url.ends_with(".jpeg") {
            "image/jpeg"
        } else {
            "image/png"
        }
    }

    /// Attachment pointing at `url`.
    pub fn attachment(id: &str, url: &str) -> Attachment {
        Attachment {
            id: format!("a-{}", id),
            url: url.to_string(),
            filename: url.rsplit('/').next().unwrap_or_default().to_string(),
            content_type: Some(content_type_of(url).to_string()),
        }
    }

    /// Button row of a grid: `{prefix}{n}::{id}` for n in 1..=4.
    pub fn grid_buttons(id: &str, prefix: &str) -> Component {
        Component {
            kind: 1,
            label: None,
            custom_id: None,
            components: (1..=4)
                .map(|n| Component {
                    kind: 2,
                    label: Some(format!("U{}", n)),
                    custom_id: Some(format!("{}{}::{}", prefix, n, id)),
                    components: Vec::new(),
                })
                .collect(),
        }
    }

    /// Grid message with one image and a row of four buttons.
    pub fn grid_message(id: &str, channel: &str, content: &str, url: &str, prefix: &str) -> Message {
        Message {
            id: id.to_string(),
            channel_id: channel.to_string(),
            content: content.to_string(),
            attachments: vec![attachment(id, url)],
            components: vec![grid_buttons(id, prefix)],
            ..Default::default()
        }
    }

    /// Text reply carrying the nonce of the interaction it answers.
    pub fn nonce_reply(channel: &str, nonce: &str, content: &str) -> Message {
        Message {
            id: format!("r-{}", nonce),
            channel_id: channel.to_string(),
            content: content.to_string(),
            nonce: Some(nonce.to_string()),
            ..Default::default()
        }
    }

    /// Embed-only reply (errors and queue notices).
    pub fn embed_reply(
        channel: &str,
        nonce: &str,
        title: &str,
        description: &str,
        footer: Option<&str>,
    ) -> Message {
        Message {
            embeds: vec![Embed {
                title: Some(title.to_string()),
                description: Some(description.to_string()),
                footer: footer.map(|text| EmbedFooter {
                    text: text.to_string(),
                }),
            }],
            ..nonce_reply(channel, nonce, "")
        }
    }
}
