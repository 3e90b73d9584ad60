//! Discord message model, interaction payloads and the transport seam.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors from the chat transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Discord error {code}: {message}")]
    Api { code: u64, message: String },

    #[error("Unknown message")]
    MessageNotFound,

    #[error("Bad gateway")]
    BadGateway,

    #[error("Request timeout")]
    Timeout,

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Command not found: {0}")]
    CommandNotFound(String),

    #[error("Transport not started")]
    NotStarted,

    #[error("Cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Decode error: {0}")]
    Decode(String),
}

impl TransportError {
    /// Whether repeating the same call may succeed.
    pub fn is_temporary(&self) -> bool {
        !matches!(
            self,
            TransportError::MessageNotFound
                | TransportError::CommandNotFound(_)
                | TransportError::NotStarted
                | TransportError::Cancelled
        )
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_connect() {
            TransportError::Connection(e.to_string())
        } else if e.is_decode() {
            TransportError::Decode(e.to_string())
        } else {
            TransportError::Http {
                status: e.status().map(|s| s.as_u16()).unwrap_or(0),
                message: e.to_string(),
            }
        }
    }
}

/// Target channel, optionally inside a guild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRef {
    pub guild_id: Option<String>,
    pub channel_id: String,
}

impl ChannelRef {
    /// Parse `"<guild>/<channel>"` or `"<channel>"`.
    pub fn parse(value: &str) -> Self {
        match value.split_once('/') {
            Some((guild, channel)) => Self {
                guild_id: Some(guild.to_string()),
                channel_id: channel.to_string(),
            },
            None => Self {
                guild_id: None,
                channel_id: value.to_string(),
            },
        }
    }

    pub fn direct(channel_id: impl Into<String>) -> Self {
        Self {
            guild_id: None,
            channel_id: channel_id.into(),
        }
    }

    /// Web client path of the channel, used as the request referer.
    pub fn referer_path(&self) -> String {
        match &self.guild_id {
            Some(guild) => format!("channels/{}/{}", guild, self.channel_id),
            None => format!("channels/@me/{}", self.channel_id),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(default)]
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Component {
    #[serde(rename = "type", default)]
    pub kind: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<Component>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbedFooter {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Embed {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub footer: Option<EmbedFooter>,
}

/// A chat message as delivered by MESSAGE_CREATE / MESSAGE_UPDATE.
///
/// Update payloads can be partial, so everything but the ids defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub channel_id: String,
    #[serde(default)]
    pub guild_id: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default, deserialize_with = "nonce_string")]
    pub nonce: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub components: Vec<Component>,
    #[serde(default)]
    pub embeds: Vec<Embed>,
}

/// Nonces arrive either as strings or as integers.
fn nonce_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    MessageCreate,
    MessageUpdate,
}

impl EventKind {
    pub fn from_dispatch(name: &str) -> Option<Self> {
        match name {
            "MESSAGE_CREATE" => Some(EventKind::MessageCreate),
            "MESSAGE_UPDATE" => Some(EventKind::MessageUpdate),
            _ => None,
        }
    }
}

/// A message notification from the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub kind: EventKind,
    pub message: Message,
}

/// Slash command registered by an application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplicationCommand {
    pub id: String,
    pub application_id: String,
    #[serde(default)]
    pub version: String,
    pub name: String,
    #[serde(rename = "type", default = "default_command_type")]
    pub kind: u8,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub options: Vec<serde_json::Value>,
}

fn default_command_type() -> u8 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandOption {
    #[serde(rename = "type")]
    pub kind: u8,
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandData {
    pub version: String,
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: u8,
    pub options: Vec<CommandOption>,
    pub application_command: ApplicationCommand,
    pub attachments: Vec<serde_json::Value>,
}

/// Slash command invocation (interaction type 2).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandInteraction {
    #[serde(rename = "type")]
    pub kind: u8,
    pub application_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<String>,
    pub channel_id: String,
    pub session_id: String,
    pub data: CommandData,
    pub nonce: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentData {
    pub component_type: u8,
    pub custom_id: String,
}

/// Button click on a bot message (interaction type 3).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentInteraction {
    #[serde(rename = "type")]
    pub kind: u8,
    pub application_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<String>,
    pub channel_id: String,
    pub session_id: String,
    pub data: ComponentData,
    pub nonce: String,
    pub message_id: String,
}

/// Outbound interaction.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum InteractionRequest {
    Command(CommandInteraction),
    Component(ComponentInteraction),
}

impl InteractionRequest {
    /// Slash command with a single string option.
    pub fn command(
        command: &ApplicationCommand,
        channel: &ChannelRef,
        session_id: String,
        option: &str,
        value: &str,
        nonce: String,
    ) -> Self {
        InteractionRequest::Command(CommandInteraction {
            kind: 2,
            application_id: command.application_id.clone(),
            guild_id: channel.guild_id.clone(),
            channel_id: channel.channel_id.clone(),
            session_id,
            data: CommandData {
                version: command.version.clone(),
                id: command.id.clone(),
                name: command.name.clone(),
                kind: 1,
                options: vec![CommandOption {
                    kind: 3,
                    name: option.to_string(),
                    value: value.to_string(),
                }],
                application_command: command.clone(),
                attachments: Vec::new(),
            },
            nonce,
        })
    }

    /// Button press on `message_id`.
    pub fn button(
        application_id: &str,
        channel: &ChannelRef,
        session_id: String,
        message_id: &str,
        custom_id: String,
        nonce: String,
    ) -> Self {
        InteractionRequest::Component(ComponentInteraction {
            kind: 3,
            application_id: application_id.to_string(),
            guild_id: channel.guild_id.clone(),
            channel_id: channel.channel_id.clone(),
            session_id,
            data: ComponentData {
                component_type: 2,
                custom_id,
            },
            nonce,
            message_id: message_id.to_string(),
        })
    }

    pub fn nonce(&self) -> &str {
        match self {
            InteractionRequest::Command(c) => &c.nonce,
            InteractionRequest::Component(c) => &c.nonce,
        }
    }
}

/// Callback receiving inbound events. Runs on the transport's event task.
pub type EventHandler = Arc<dyn Fn(&InboundEvent) + Send + Sync>;

/// Chat-client transport consumed by bot adapters.
///
/// Implementations own rate limiting and transient-failure retries.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the event stream. Idempotent.
    async fn start(&self, cancel: &CancellationToken) -> Result<(), TransportError>;

    /// Post an interaction.
    async fn send(&self, request: &InteractionRequest) -> Result<(), TransportError>;

    /// Download `url` into `dest`. Returns [`TransportError::Cancelled`]
    /// once `cancel` fires, including while waiting between retries.
    async fn download(
        &self,
        url: &str,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError>;

    /// Register a handler for inbound message events.
    fn subscribe(&self, handler: EventHandler);

    /// Current gateway session id (empty before `start`).
    fn session_id(&self) -> String;

    /// DM channel id with `user_id`, if one exists.
    fn dm_channel(&self, user_id: &str) -> Option<String>;

    /// Channel the session is about to interact in.
    fn use_channel(&self, _channel: &ChannelRef) {}

    /// Look up the slash command `name` owned by `application_id` in `channel`.
    async fn find_command(
        &self,
        application_id: &str,
        channel: &ChannelRef,
        name: &str,
    ) -> Result<ApplicationCommand, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_ref_parse() {
        let guild = ChannelRef::parse("111/222");
        assert_eq!(guild.guild_id.as_deref(), Some("111"));
        assert_eq!(guild.channel_id, "222");
        assert_eq!(guild.referer_path(), "channels/111/222");

        let dm = ChannelRef::parse("333");
        assert_eq!(dm.guild_id, None);
        assert_eq!(dm.referer_path(), "channels/@me/333");
    }

    #[test]
    fn test_deserialize_message_with_numeric_nonce() {
        let json = r#"{
            "id": "1",
            "channel_id": "2",
            "content": "**a cat** - <@123> (fast)",
            "nonce": 1092834,
            "attachments": [{"id": "9", "url": "https://cdn/a.png", "filename": "a.png", "content_type": "image/png"}],
            "components": [{"type": 1, "components": [{"type": 2, "custom_id": "MJ::JOB::upsample::1::abc", "label": "U1"}]}],
            "embeds": []
        }"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.nonce.as_deref(), Some("1092834"));
        assert_eq!(msg.attachments[0].url, "https://cdn/a.png");
        assert_eq!(
            msg.components[0].components[0].custom_id.as_deref(),
            Some("MJ::JOB::upsample::1::abc")
        );
    }

    #[test]
    fn test_deserialize_partial_update() {
        let msg: Message = serde_json::from_str(r#"{"id": "1", "channel_id": "2"}"#).unwrap();
        assert!(msg.content.is_empty());
        assert!(msg.nonce.is_none());
        assert!(msg.attachments.is_empty());
    }

    #[test]
    fn test_command_interaction_payload() {
        let command = ApplicationCommand {
            id: "cmd".into(),
            application_id: "app".into(),
            version: "v1".into(),
            name: "imagine".into(),
            kind: 1,
            ..Default::default()
        };
        let channel = ChannelRef::parse("g/c");
        let req = InteractionRequest::command(&command, &channel, "sess".into(), "prompt", "a cat", "42".into());
        let json = serde_json::to_value(&req).unwrap();

        assert_eq!(json["type"], 2);
        assert_eq!(json["guild_id"], "g");
        assert_eq!(json["data"]["options"][0]["value"], "a cat");
        assert_eq!(json["data"]["options"][0]["type"], 3);
        assert_eq!(json["nonce"], "42");
        assert_eq!(req.nonce(), "42");
    }

    #[test]
    fn test_button_payload_omits_missing_guild() {
        let req = InteractionRequest::button(
            "app",
            &ChannelRef::direct("c"),
            "sess".into(),
            "m1",
            "MJ::JOB::upsample::1::abc".into(),
            "7".into(),
        );
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["type"], 3);
        assert!(json.get("guild_id").is_none());
        assert_eq!(json["data"]["component_type"], 2);
        assert_eq!(json["message_id"], "m1");
    }

    #[test]
    fn test_temporary_classification() {
        assert!(TransportError::BadGateway.is_temporary());
        assert!(TransportError::Timeout.is_temporary());
        assert!(!TransportError::MessageNotFound.is_temporary());
        assert!(!TransportError::Cancelled.is_temporary());
    }
}
