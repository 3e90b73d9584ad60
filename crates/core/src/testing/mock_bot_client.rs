//! Mock bot client for testing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::bot::{BotClient, BotError, Preview};

/// Call counters shared between a [`MockBotClient`] and the test.
#[derive(Debug, Default)]
pub struct MockCounters {
    start: AtomicUsize,
    imagine: AtomicUsize,
    upscale: AtomicUsize,
    variation: AtomicUsize,
}

impl MockCounters {
    pub fn start(&self) -> usize {
        self.start.load(Ordering::SeqCst)
    }

    pub fn imagine(&self) -> usize {
        self.imagine.load(Ordering::SeqCst)
    }

    pub fn upscale(&self) -> usize {
        self.upscale.load(Ordering::SeqCst)
    }

    pub fn variation(&self) -> usize {
        self.variation.load(Ordering::SeqCst)
    }

    /// Every bot operation (start excluded).
    pub fn total(&self) -> usize {
        self.imagine() + self.upscale() + self.variation()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Imagine,
    Upscale,
    Variation,
}

#[derive(Debug)]
struct FailureRule {
    operation: Operation,
    prompt: String,
    /// Quadrant index for upscale/variation rules.
    index: Option<usize>,
    /// `None` fails forever.
    remaining: Option<u32>,
    error: BotError,
}

/// Mock implementation of the BotClient trait.
///
/// Produces deterministic previews and upscales; URLs encode the prompt and
/// the path through the generation tree. Failures are injected per prompt
/// and, for upscale/variation, per quadrant index.
#[derive(Debug)]
pub struct MockBotClient {
    concurrency: usize,
    delay: Duration,
    rules: Mutex<Vec<FailureRule>>,
    counters: Arc<MockCounters>,
    start_error: Mutex<Option<BotError>>,
    in_flight: HashMap<String, Duration>,
}

impl Default for MockBotClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBotClient {
    pub fn new() -> Self {
        Self {
            concurrency: 3,
            delay: Duration::ZERO,
            rules: Mutex::new(Vec::new()),
            counters: Arc::new(MockCounters::default()),
            start_error: Mutex::new(None),
            in_flight: HashMap::new(),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Sleep this long in every operation (cancellable).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// The imagine of `prompt` takes `delay` and completes even if
    /// cancelled meanwhile, like a reply already on its way.
    pub fn with_in_flight_imagine(mut self, prompt: &str, delay: Duration) -> Self {
        self.in_flight.insert(prompt.to_string(), delay);
        self
    }

    pub fn counters(&self) -> Arc<MockCounters> {
        Arc::clone(&self.counters)
    }

    pub fn fail_start(self, error: BotError) -> Self {
        *self.start_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(error);
        self
    }

    fn rule(self, operation: Operation, prompt: &str, index: Option<usize>, remaining: Option<u32>, error: BotError) -> Self {
        self.rules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(FailureRule {
                operation,
                prompt: prompt.to_string(),
                index,
                remaining,
                error,
            });
        self
    }

    pub fn fail_imagine_always(self, prompt: &str, error: BotError) -> Self {
        self.rule(Operation::Imagine, prompt, None, None, error)
    }

    pub fn fail_imagine_times(self, prompt: &str, times: u32, error: BotError) -> Self {
        self.rule(Operation::Imagine, prompt, None, Some(times), error)
    }

    /// Fail every upscale of quadrant `index` on any grid of `prompt`.
    pub fn fail_upscale_always(self, prompt: &str, index: usize, error: BotError) -> Self {
        self.rule(Operation::Upscale, prompt, Some(index), None, error)
    }

    pub fn fail_variation_always(self, prompt: &str, index: usize, error: BotError) -> Self {
        self.rule(Operation::Variation, prompt, Some(index), None, error)
    }

    fn injected(&self, operation: Operation, prompt: &str, index: Option<usize>) -> Option<BotError> {
        let mut rules = self.rules.lock().unwrap_or_else(PoisonError::into_inner);
        let rule = rules.iter_mut().find(|r| {
            r.operation == operation
                && r.prompt == prompt
                && (r.index.is_none() || r.index == index)
                && r.remaining != Some(0)
        })?;
        if let Some(remaining) = rule.remaining.as_mut() {
            *remaining -= 1;
        }
        Some(rule.error.clone())
    }

    async fn pause(&self, cancel: &CancellationToken) -> Result<(), BotError> {
        if self.delay.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = cancel.cancelled() => Err(BotError::cancelled()),
            _ = tokio::time::sleep(self.delay) => Ok(()),
        }
    }
}

fn grid(url: String, prompt: &str) -> Preview {
    Preview {
        image_ids: (1..=4).map(|n| format!("{}::{}", n, url)).collect(),
        url,
        prompt: prompt.to_string(),
        response_prompt: prompt.to_string(),
        message_id: "mock-message".to_string(),
    }
}

#[async_trait]
impl BotClient for MockBotClient {
    fn name(&self) -> &str {
        "mock"
    }

    fn concurrency(&self) -> usize {
        self.concurrency
    }

    async fn start(&self, _cancel: &CancellationToken) -> Result<(), BotError> {
        self.counters.start.fetch_add(1, Ordering::SeqCst);
        match self.start_error.lock().unwrap_or_else(PoisonError::into_inner).clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn imagine(&self, prompt: &str, cancel: &CancellationToken) -> Result<Preview, BotError> {
        self.counters.imagine.fetch_add(1, Ordering::SeqCst);
        match self.in_flight.get(prompt) {
            Some(delay) => tokio::time::sleep(*delay).await,
            None => self.pause(cancel).await?,
        }
        if let Some(error) = self.injected(Operation::Imagine, prompt, None) {
            return Err(error);
        }
        let slug: String = prompt.chars().filter(|c| c.is_alphanumeric()).collect();
        Ok(grid(format!("https://cdn.test/{}/grid.png", slug), prompt))
    }

    async fn upscale(
        &self,
        preview: &Preview,
        index: usize,
        cancel: &CancellationToken,
    ) -> Result<String, BotError> {
        self.counters.upscale.fetch_add(1, Ordering::SeqCst);
        self.pause(cancel).await?;
        if index >= preview.image_ids.len() {
            return Err(BotError::validation(format!("invalid index {}", index)));
        }
        if let Some(error) = self.injected(Operation::Upscale, &preview.prompt, Some(index)) {
            return Err(error);
        }
        Ok(format!("{}/u{}.png", preview.url.trim_end_matches(".png"), index))
    }

    async fn variation(
        &self,
        preview: &Preview,
        index: usize,
        cancel: &CancellationToken,
    ) -> Result<Preview, BotError> {
        self.counters.variation.fetch_add(1, Ordering::SeqCst);
        self.pause(cancel).await?;
        if index >= preview.image_ids.len() {
            return Err(BotError::validation(format!("invalid index {}", index)));
        }
        if let Some(error) = self.injected(Operation::Variation, &preview.prompt, Some(index)) {
            return Err(error);
        }
        let url = format!("{}/v{}.png", preview.url.trim_end_matches(".png"), index);
        Ok(grid(url, &preview.prompt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_failure_rule_runs_out() {
        let client = MockBotClient::new().fail_imagine_times("cat", 1, BotError::transient("x"));
        let cancel = CancellationToken::new();
        assert!(client.imagine("cat", &cancel).await.is_err());
        assert!(client.imagine("cat", &cancel).await.is_ok());
        assert_eq!(client.counters().imagine(), 2);
    }

    #[tokio::test]
    async fn test_urls_are_distinct_per_branch() {
        let client = MockBotClient::new();
        let cancel = CancellationToken::new();
        let preview = client.imagine("a cat", &cancel).await.unwrap();
        let up = client.upscale(&preview, 1, &cancel).await.unwrap();
        let varied = client.variation(&preview, 1, &cancel).await.unwrap();
        let up_varied = client.upscale(&varied, 1, &cancel).await.unwrap();
        assert_eq!(preview.url, "https://cdn.test/acat/grid.png");
        assert_eq!(up, "https://cdn.test/acat/grid/u1.png");
        assert_ne!(up, up_varied);
    }
}
