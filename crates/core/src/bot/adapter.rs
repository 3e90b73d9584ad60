//! Generic chat-bot adapter: imagine, upscale and variation on top of a
//! transport, a correlator and a bot-specific [`ContentParser`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::parser::{ContentParser, ReplyOutcome};
use super::types::{BotClient, BotError, Preview};
use super::validator::PromptValidator;
use crate::correlator::{Classification, Correlator, EventClassifier, SearchKey};
use crate::metrics;
use crate::transport::{
    ApplicationCommand, ChannelRef, EventHandler, InboundEvent, InteractionRequest, Message,
    Transport,
};

/// Deadline for a bot reply.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(10 * 60);
/// Deadline for the grid of a job the bot reported as queued.
pub const QUEUED_TIMEOUT: Duration = Duration::from_secs(20 * 60);

/// Milliseconds between the Unix epoch and the Discord epoch.
const DISCORD_EPOCH_MS: u64 = 1_420_070_400_000;

/// Snowflake-shaped unique nonces.
#[derive(Debug, Default)]
pub struct NonceGenerator {
    sequence: AtomicU64,
}

impl NonceGenerator {
    pub fn next(&self) -> String {
        let millis = (chrono::Utc::now().timestamp_millis() as u64).saturating_sub(DISCORD_EPOCH_MS);
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed) & 0xFFF;
        ((millis << 22) | seq).to_string()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AdapterTimeouts {
    pub reply: Duration,
    pub queued: Duration,
}

impl Default for AdapterTimeouts {
    fn default() -> Self {
        Self {
            reply: REPLY_TIMEOUT,
            queued: QUEUED_TIMEOUT,
        }
    }
}

/// Drops messages from other channels, then defers to the bot's rules.
struct ChannelClassifier<P> {
    parser: Arc<P>,
    channel: Arc<OnceLock<ChannelRef>>,
}

impl<P: ContentParser> EventClassifier<Message> for ChannelClassifier<P> {
    fn classify(&self, message: &Message) -> Option<Classification> {
        let channel = self.channel.get()?;
        if message.channel_id != channel.channel_id {
            return None;
        }
        self.parser.classify(message)
    }
}

/// Bot client for any bot family described by a [`ContentParser`].
pub struct ChatBotAdapter<P: ContentParser> {
    transport: Arc<dyn Transport>,
    parser: Arc<P>,
    validator: Arc<dyn PromptValidator>,
    correlator: Correlator<Message>,
    channel_setting: String,
    channel: Arc<OnceLock<ChannelRef>>,
    command: OnceLock<ApplicationCommand>,
    nonces: NonceGenerator,
    timeouts: AdapterTimeouts,
    start_lock: Mutex<()>,
}

impl<P: ContentParser> ChatBotAdapter<P> {
    /// `channel` is `"<guild>/<channel>"`, `"<channel>"`, or empty for the
    /// bot's DM channel.
    pub fn new(
        transport: Arc<dyn Transport>,
        parser: P,
        validator: Arc<dyn PromptValidator>,
        channel: impl Into<String>,
    ) -> Self {
        let parser = Arc::new(parser);
        let channel_ref = Arc::new(OnceLock::new());
        let correlator = Correlator::new(Arc::new(ChannelClassifier {
            parser: Arc::clone(&parser),
            channel: Arc::clone(&channel_ref),
        }));

        let tap = correlator.clone();
        let handler: EventHandler = Arc::new(move |event: &InboundEvent| {
            tap.dispatch(&event.message);
        });
        transport.subscribe(handler);

        Self {
            transport,
            parser,
            validator,
            correlator,
            channel_setting: channel.into(),
            channel: channel_ref,
            command: OnceLock::new(),
            nonces: NonceGenerator::default(),
            timeouts: AdapterTimeouts::default(),
            start_lock: Mutex::new(()),
        }
    }

    pub fn with_timeouts(mut self, timeouts: AdapterTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn correlator(&self) -> &Correlator<Message> {
        &self.correlator
    }

    fn session(&self) -> Result<(&ChannelRef, &ApplicationCommand), BotError> {
        match (self.channel.get(), self.command.get()) {
            (Some(channel), Some(command)) => Ok((channel, command)),
            _ => Err(BotError::transient(format!("{}: client not started", self.parser.name()))),
        }
    }

    /// Register on `key`, post `request`, await the matching reply.
    async fn send_and_wait(
        &self,
        key: SearchKey,
        request: &InteractionRequest,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Message, BotError> {
        let pending = tokio::select! {
            _ = cancel.cancelled() => return Err(BotError::cancelled()),
            result = self.correlator.register_then_send(key, || self.transport.send(request)) => result?,
        };
        Ok(pending.wait(timeout, cancel).await?)
    }

    fn preview_from(
        &self,
        message: &Message,
        prompt: &str,
        response_prompt: String,
    ) -> Result<Preview, BotError> {
        let image_ids = self.parser.image_ids(message);
        if image_ids.is_empty() {
            return Err(BotError::transient(format!(
                "{}: message has no image ids",
                self.parser.name()
            )));
        }
        let url = first_attachment(message, self.parser.name())?;
        Ok(Preview {
            url,
            prompt: prompt.to_string(),
            response_prompt,
            message_id: message.id.clone(),
            image_ids,
        })
    }

    fn button(
        &self,
        preview: &Preview,
        index: usize,
        prefix: &str,
    ) -> Result<InteractionRequest, BotError> {
        let Some(image_id) = preview.image_ids.get(index) else {
            return Err(BotError::validation(format!(
                "{}: invalid index {} (grid has {} images)",
                self.parser.name(),
                index,
                preview.image_ids.len()
            )));
        };
        let (channel, command) = self.session()?;
        Ok(InteractionRequest::button(
            &command.application_id,
            channel,
            self.transport.session_id(),
            &preview.message_id,
            format!("{}{}", prefix, image_id),
            self.nonces.next(),
        ))
    }

    async fn imagine_inner(&self, prompt: &str, cancel: &CancellationToken) -> Result<Preview, BotError> {
        self.validator.validate(prompt)?;
        let (channel, command) = self.session()?;
        let request = InteractionRequest::command(
            command,
            channel,
            self.transport.session_id(),
            "prompt",
            prompt,
            self.nonces.next(),
        );
        debug!(bot = self.parser.name(), nonce = request.nonce(), prompt, "Sending imagine");

        if !self.parser.acknowledges_imagine() {
            let response_prompt = self.parser.normalize_prompt(prompt);
            let grid = self
                .send_and_wait(
                    SearchKey::Preview(response_prompt.clone()),
                    &request,
                    self.timeouts.reply,
                    cancel,
                )
                .await?;
            return self.preview_from(&grid, prompt, response_prompt);
        }

        let ack = self
            .send_and_wait(
                SearchKey::Nonce(request.nonce().to_string()),
                &request,
                self.timeouts.reply,
                cancel,
            )
            .await?;
        let (echoed, timeout) = match self.parser.parse_reply(prompt, &ack) {
            ReplyOutcome::Echo(echoed) => (echoed, self.timeouts.reply),
            ReplyOutcome::Queued(echoed) => {
                info!(bot = self.parser.name(), prompt, "Job queued by bot");
                (echoed, self.timeouts.queued)
            }
            ReplyOutcome::Failed(e) => return Err(e),
        };

        let response_prompt = self.parser.normalize_prompt(&echoed);
        let grid = self
            .correlator
            .subscribe(SearchKey::Preview(response_prompt.clone()))
            .wait(timeout, cancel)
            .await?;
        self.preview_from(&grid, prompt, response_prompt)
    }
}

fn first_attachment(message: &Message, bot: &str) -> Result<String, BotError> {
    message
        .attachments
        .first()
        .map(|a| a.url.clone())
        .ok_or_else(|| BotError::transient(format!("{}: reply has no attachment", bot)))
}

fn observe<T>(bot: &str, operation: &str, started: Instant, result: &Result<T, BotError>) {
    let outcome = match result {
        Ok(_) => "success",
        Err(e) => e.kind.as_str(),
    };
    metrics::BOT_OPERATIONS
        .with_label_values(&[bot, operation, outcome])
        .inc();
    metrics::BOT_OPERATION_DURATION
        .with_label_values(&[bot, operation])
        .observe(started.elapsed().as_secs_f64());
}

#[async_trait]
impl<P: ContentParser> BotClient for ChatBotAdapter<P> {
    fn name(&self) -> &str {
        self.parser.name()
    }

    fn concurrency(&self) -> usize {
        self.parser.concurrency()
    }

    async fn start(&self, cancel: &CancellationToken) -> Result<(), BotError> {
        let _guard = self.start_lock.lock().await;
        if self.command.get().is_some() {
            return Ok(());
        }
        let bot = self.parser.name();

        self.transport.start(cancel).await?;

        let channel = match self.channel.get() {
            Some(channel) => channel.clone(),
            None if self.channel_setting.is_empty() => self
                .transport
                .dm_channel(self.parser.bot_id())
                .map(ChannelRef::direct)
                .ok_or_else(|| BotError::fatal(format!("{}: couldn't find dm channel for bot", bot)))?,
            None => ChannelRef::parse(&self.channel_setting),
        };
        self.transport.use_channel(&channel);
        let _ = self.channel.set(channel.clone());

        let command = tokio::select! {
            _ = cancel.cancelled() => return Err(BotError::cancelled()),
            result = self.transport.find_command(self.parser.bot_id(), &channel, "imagine") => result
                .map_err(|e| BotError::from(e).context(format!("{}: couldn't find imagine command", bot)))?,
        };
        info!(bot, channel = %channel.channel_id, command = %command.id, "Bot client ready");
        let _ = self.command.set(command);
        Ok(())
    }

    async fn imagine(&self, prompt: &str, cancel: &CancellationToken) -> Result<Preview, BotError> {
        let started = Instant::now();
        let result = self.imagine_inner(prompt, cancel).await;
        observe(self.parser.name(), "imagine", started, &result);
        result
    }

    async fn upscale(
        &self,
        preview: &Preview,
        index: usize,
        cancel: &CancellationToken,
    ) -> Result<String, BotError> {
        let started = Instant::now();
        let result = async {
            let request = self.button(preview, index, self.parser.upscale_prefix())?;
            let reply = self
                .send_and_wait(
                    SearchKey::Upscale(preview.response_prompt.clone()),
                    &request,
                    self.timeouts.reply,
                    cancel,
                )
                .await?;
            first_attachment(&reply, self.parser.name())
        }
        .await;
        observe(self.parser.name(), "upscale", started, &result);
        result
    }

    async fn variation(
        &self,
        preview: &Preview,
        index: usize,
        cancel: &CancellationToken,
    ) -> Result<Preview, BotError> {
        let started = Instant::now();
        let result = async {
            let request = self.button(preview, index, self.parser.variation_prefix())?;
            let reply = self
                .send_and_wait(
                    SearchKey::Variation(preview.response_prompt.clone()),
                    &request,
                    self.timeouts.reply,
                    cancel,
                )
                .await?;
            self.preview_from(&reply, &preview.prompt, preview.response_prompt.clone())
        }
        .await;
        observe(self.parser.name(), "variation", started, &result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_nonces_are_unique() {
        let gen = NonceGenerator::default();
        let nonces: HashSet<String> = (0..1000).map(|_| gen.next()).collect();
        assert_eq!(nonces.len(), 1000);
    }

    #[test]
    fn test_nonce_is_numeric() {
        let gen = NonceGenerator::default();
        let nonce = gen.next();
        assert!(nonce.parse::<u64>().is_ok());
    }
}
