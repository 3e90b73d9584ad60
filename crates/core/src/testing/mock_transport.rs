//! Mock transport playing a scripted chat bot.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::fixtures::{embed_reply, grid_message, nonce_reply};
use crate::bot::{BLUEWILLOW_BOT_ID, MIDJOURNEY_BOT_ID};
use crate::transport::{
    ApplicationCommand, ChannelRef, CommandInteraction, ComponentInteraction,
    EventHandler, EventKind, InboundEvent, InteractionRequest, Message, Transport, TransportError,
};

/// Channel returned by [`Transport::dm_channel`].
pub const MOCK_DM_CHANNEL: &str = "dm-channel";

/// Which bot the mock imitates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotStyle {
    /// Acknowledges imagine with a nonce reply, then posts the grid.
    Midjourney,
    /// Posts the grid directly.
    BlueWillow,
}

impl BotStyle {
    fn bot_id(&self) -> &'static str {
        match self {
            BotStyle::Midjourney => MIDJOURNEY_BOT_ID,
            BotStyle::BlueWillow => BLUEWILLOW_BOT_ID,
        }
    }

    fn upscale_prefix(&self) -> &'static str {
        match self {
            BotStyle::Midjourney => "MJ::JOB::upsample::",
            BotStyle::BlueWillow => "UPSCALE:",
        }
    }

    fn variation_prefix(&self) -> &'static str {
        match self {
            BotStyle::Midjourney => "MJ::JOB::variation::",
            BotStyle::BlueWillow => "VARIATION:",
        }
    }
}

/// Scripted behaviour for one prompt.
#[derive(Debug, Clone)]
enum PromptRule {
    /// Never answer.
    Silent,
    /// Answer the imagine with an embed notice and stop.
    Embed { title: String, description: String },
    /// Answer with a "Job queued" notice, then post the grid.
    Queued,
}

#[derive(Default)]
struct State {
    handlers: Vec<EventHandler>,
    sent: Vec<InteractionRequest>,
    downloads: Vec<(String, PathBuf)>,
    /// Grid message id to the prompt it shows.
    grids: HashMap<String, String>,
    rules: HashMap<String, PromptRule>,
    send_failures: VecDeque<TransportError>,
    echo_suffix: String,
    download_body: Vec<u8>,
    fail_downloads: bool,
    download_delay: Duration,
    command_delay: Duration,
}

struct Inner {
    style: BotStyle,
    state: Mutex<State>,
    duplicate_events: AtomicBool,
    next_id: AtomicU64,
    started: AtomicUsize,
    grid_delay: Duration,
}

/// Mock implementation of the Transport trait.
///
/// Every interaction sent through it is answered the way the imitated bot
/// would answer, through the subscribed event handlers:
/// - imagine: optional nonce acknowledgement, then a grid with four buttons
/// - upscale button: a single image reply
/// - variation button: a new grid
///
/// Replies to buttons are emitted before `send` returns.
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<Inner>,
}

impl MockTransport {
    pub fn new(style: BotStyle) -> Self {
        Self {
            inner: Arc::new(Inner {
                style,
                state: Mutex::new(State {
                    download_body: b"mock image".to_vec(),
                    ..Default::default()
                }),
                duplicate_events: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
                started: AtomicUsize::new(0),
                grid_delay: Duration::from_millis(10),
            }),
        }
    }

    pub fn midjourney() -> Self {
        Self::new(BotStyle::Midjourney)
    }

    pub fn bluewillow() -> Self {
        Self::new(BotStyle::BlueWillow)
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state()
    }

    /// Emit every message as MESSAGE_CREATE followed by MESSAGE_UPDATE.
    pub fn set_duplicate_events(&self, enabled: bool) {
        self.inner.duplicate_events.store(enabled, Ordering::SeqCst);
    }

    /// Text the bot appends to echoed prompts (e.g. `" --v 5"`).
    pub fn set_echo_suffix(&self, suffix: impl Into<String>) {
        self.state().echo_suffix = suffix.into();
    }

    /// Never answer imagine requests for `prompt`.
    pub fn ignore_prompt(&self, prompt: &str) {
        self.state().rules.insert(prompt.to_string(), PromptRule::Silent);
    }

    /// Answer imagine requests for `prompt` with an embed titled `title`.
    pub fn reject_prompt(&self, prompt: &str, title: &str, description: &str) {
        self.state().rules.insert(
            prompt.to_string(),
            PromptRule::Embed {
                title: title.to_string(),
                description: description.to_string(),
            },
        );
    }

    /// Report imagine requests for `prompt` as queued before answering.
    pub fn queue_prompt(&self, prompt: &str) {
        self.state().rules.insert(prompt.to_string(), PromptRule::Queued);
    }

    /// Make the next `send` call fail with `error`.
    pub fn fail_next_send(&self, error: TransportError) {
        self.state().send_failures.push_back(error);
    }

    pub fn set_download_body(&self, body: Vec<u8>) {
        self.state().download_body = body;
    }

    pub fn set_fail_downloads(&self, fail: bool) {
        self.state().fail_downloads = fail;
    }

    /// Stall every download this long (ends early on cancellation).
    pub fn set_download_delay(&self, delay: Duration) {
        self.state().download_delay = delay;
    }

    /// Stall command discovery this long.
    pub fn set_command_delay(&self, delay: Duration) {
        self.state().command_delay = delay;
    }

    /// Interactions sent so far.
    pub fn sent(&self) -> Vec<InteractionRequest> {
        self.state().sent.clone()
    }

    /// Downloads requested so far, as `(url, destination)`.
    pub fn downloads(&self) -> Vec<(String, PathBuf)> {
        self.state().downloads.clone()
    }

    pub fn start_count(&self) -> usize {
        self.inner.started.load(Ordering::SeqCst)
    }

    /// Deliver `message` to the subscribed handlers.
    pub fn emit(&self, message: Message) {
        self.inner.emit(message);
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_id(&self) -> String {
        format!("m{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn emit(&self, message: Message) {
        let handlers = self.state().handlers.clone();
        let mut kinds = vec![EventKind::MessageCreate];
        if self.duplicate_events.load(Ordering::SeqCst) {
            kinds.push(EventKind::MessageUpdate);
        }
        for kind in kinds {
            let event = InboundEvent {
                kind,
                message: message.clone(),
            };
            for handler in &handlers {
                handler(&event);
            }
        }
    }

    fn bot_mention(&self) -> String {
        format!("<@{}>", self.style.bot_id())
    }

    fn grid(&self, channel: &str, prompt: &str, marker: &str) -> Message {
        let id = self.next_id();
        let url = format!("https://cdn.test/{}/grid.png", id);
        let content = format!("**{}** - {}{}", prompt, marker, self.bot_mention());
        self.state().grids.insert(id.clone(), prompt.to_string());
        grid_message(&id, channel, &content, &url, self.style.upscale_prefix())
    }

    fn post_grid_later(self: &Arc<Self>, channel: String, prompt: String) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(inner.grid_delay).await;
            let grid = inner.grid(&channel, &prompt, "");
            inner.emit(grid);
        });
    }

    fn answer_imagine(self: &Arc<Self>, command: &CommandInteraction) {
        let Some(prompt) = command.data.options.first().map(|o| o.value.clone()) else {
            return;
        };
        let channel = command.channel_id.clone();
        let (rule, suffix) = {
            let state = self.state();
            (state.rules.get(&prompt).cloned(), state.echo_suffix.clone())
        };

        match rule {
            Some(PromptRule::Silent) => {}
            Some(PromptRule::Embed { title, description }) => {
                self.emit(embed_reply(&channel, &command.nonce, &title, &description, None));
            }
            Some(PromptRule::Queued) => {
                let footer = format!("/imagine {}", prompt);
                self.emit(embed_reply(
                    &channel,
                    &command.nonce,
                    "Job queued",
                    "Your job will start shortly",
                    Some(&footer),
                ));
                self.post_grid_later(channel, prompt);
            }
            None if self.style == BotStyle::Midjourney => {
                let echoed = format!("{}{}", prompt, suffix);
                let ack = format!("**{}** - {} (Waiting to start)", echoed, self.bot_mention());
                self.emit(nonce_reply(&channel, &command.nonce, &ack));
                self.post_grid_later(channel, echoed);
            }
            None => {
                let grid = self.grid(&channel, &prompt, "");
                self.emit(grid);
            }
        }
    }

    fn answer_button(&self, interaction: &ComponentInteraction) {
        let Some(prompt) = self.state().grids.get(&interaction.message_id).cloned() else {
            return;
        };
        let channel = &interaction.channel_id;
        let custom_id = &interaction.data.custom_id;

        if let Some(rest) = custom_id.strip_prefix(self.style.upscale_prefix()) {
            let number = rest.split("::").next().unwrap_or("1");
            let id = self.next_id();
            let url = format!("https://cdn.test/{}/upscale.png", id);
            let reply = match self.style {
                BotStyle::Midjourney => {
                    let content = format!("**{}** - Image #{} {}", prompt, number, self.bot_mention());
                    let mut reply = grid_message(&id, channel, &content, &url, "MJ::JOB::reroll::");
                    reply.components[0].components.truncate(2);
                    reply
                }
                BotStyle::BlueWillow => {
                    let content = format!("**{}** - Upscaling by {}", prompt, self.bot_mention());
                    let mut reply = grid_message(&id, channel, &content, &url, "");
                    reply.components.clear();
                    reply
                }
            };
            self.emit(reply);
        } else if custom_id.starts_with(self.style.variation_prefix()) {
            let grid = self.grid(channel, &prompt, "Variations by ");
            self.emit(grid);
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn start(&self, _cancel: &CancellationToken) -> Result<(), TransportError> {
        self.inner.started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, request: &InteractionRequest) -> Result<(), TransportError> {
        {
            let mut state = self.state();
            if let Some(error) = state.send_failures.pop_front() {
                return Err(error);
            }
            state.sent.push(request.clone());
        }
        match request {
            InteractionRequest::Command(command) => self.inner.answer_imagine(command),
            InteractionRequest::Component(interaction) => self.inner.answer_button(interaction),
        }
        Ok(())
    }

    async fn download(
        &self,
        url: &str,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        let (body, fail, delay) = {
            let mut state = self.state();
            state.downloads.push((url.to_string(), dest.to_path_buf()));
            (state.download_body.clone(), state.fail_downloads, state.download_delay)
        };
        if !delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
        if fail {
            return Err(TransportError::Http {
                status: 404,
                message: format!("no such asset: {}", url),
            });
        }
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, body).await?;
        Ok(())
    }

    fn subscribe(&self, handler: EventHandler) {
        self.state().handlers.push(handler);
    }

    fn session_id(&self) -> String {
        "mock-session".to_string()
    }

    fn dm_channel(&self, _user_id: &str) -> Option<String> {
        Some(MOCK_DM_CHANNEL.to_string())
    }

    async fn find_command(
        &self,
        application_id: &str,
        _channel: &ChannelRef,
        name: &str,
    ) -> Result<ApplicationCommand, TransportError> {
        let delay = self.state().command_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(ApplicationCommand {
            id: "cmd-1".to_string(),
            application_id: application_id.to_string(),
            version: "1".to_string(),
            name: name.to_string(),
            kind: 1,
            description: String::new(),
            options: Vec::new(),
        })
    }
}
