//! Bulk scheduler: fans prompts out over lanes and walks each prompt's
//! generation tree (preview, upscales, variations).

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::{EngineConfig, GRID_SIZE};
use super::retry::retry_if;
use super::types::{EngineEvent, GeneratedImage};
use crate::bot::{BotClient, BotError, ErrorKind};
use crate::metrics;

const OUTPUT_BUFFER: usize = 32;

/// Lane work item: prompt index and text.
pub type LaneEntry = (usize, String);

/// Runs prompts against a bot with bounded parallelism.
pub struct BulkScheduler {
    client: Arc<dyn BotClient>,
    config: EngineConfig,
}

/// Why a lane stopped early.
#[derive(Debug)]
enum Stop {
    Cancelled,
    Aborted,
}

impl BulkScheduler {
    pub fn new(client: Arc<dyn BotClient>, config: EngineConfig) -> Self {
        Self { client, config }
    }

    /// Effective number of lanes.
    pub fn lanes(&self) -> usize {
        let max = self.client.concurrency().max(1);
        match self.config.concurrency {
            0 => max,
            requested => requested.min(max),
        }
    }

    /// Round-robin prompts over `lanes` by index, leaving out `skip`.
    pub fn partition(prompts: &[String], skip: &HashSet<usize>, lanes: usize) -> Vec<Vec<LaneEntry>> {
        let lanes = lanes.max(1);
        let mut chunks = vec![Vec::new(); lanes];
        for (index, prompt) in prompts.iter().enumerate() {
            if skip.contains(&index) {
                continue;
            }
            chunks[index % lanes].push((index, prompt.clone()));
        }
        chunks
    }

    /// Start every lane and return the merged output stream.
    ///
    /// The stream closes once all lanes finish. A fatal bot error is sent as
    /// [`EngineEvent::Aborted`] and stops the other lanes; `cancel` itself is
    /// never cancelled by the scheduler.
    pub fn run(
        &self,
        prompts: &[String],
        skip: &HashSet<usize>,
        cancel: &CancellationToken,
    ) -> mpsc::Receiver<EngineEvent> {
        let (tx, rx) = mpsc::channel(OUTPUT_BUFFER);
        let run_cancel = cancel.child_token();
        let lanes = self.lanes();

        info!(
            bot = self.client.name(),
            prompts = prompts.len(),
            skipped = skip.len(),
            lanes,
            upscale = self.config.upscale,
            variation = self.config.variation,
            "Starting bulk generation"
        );

        for (id, entries) in Self::partition(prompts, skip, lanes).into_iter().enumerate() {
            if entries.is_empty() {
                continue;
            }
            let lane = Lane {
                id,
                client: Arc::clone(&self.client),
                config: self.config.clone(),
                tx: tx.clone(),
                cancel: run_cancel.clone(),
            };
            tokio::spawn(lane.run(entries));
        }
        rx
    }
}

/// Scale `wait` by a random factor in [0.85, 1.15].
fn jittered(wait: Duration) -> Duration {
    let factor = rand::rng().random_range(0.85..=1.15);
    wait.mul_f64(factor)
}

struct Lane {
    id: usize,
    client: Arc<dyn BotClient>,
    config: EngineConfig,
    tx: mpsc::Sender<EngineEvent>,
    cancel: CancellationToken,
}

impl Lane {
    async fn run(self, entries: Vec<LaneEntry>) {
        for (position, (index, prompt)) in entries.iter().enumerate() {
            let wait = if position == 0 {
                self.config.first_wait
            } else {
                jittered(self.config.wait)
            };
            if !wait.is_zero() {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
            }

            if let Err(stop) = self.process(*index, prompt).await {
                debug!(lane = self.id, ?stop, "Lane stopped");
                break;
            }
        }
        debug!(lane = self.id, "Lane finished");
    }

    /// Walk the generation tree of one prompt.
    async fn process(&self, index: usize, prompt: &str) -> Result<(), Stop> {
        let client = &self.client;
        let cancel = &self.cancel;
        let upscale = self.config.upscale;
        let variation = self.config.variation;

        let Some(preview) = self
            .call("imagine", prompt, index, None, || client.imagine(prompt, cancel))
            .await?
        else {
            return Ok(());
        };

        if !upscale {
            self.emit(image(&preview.url, prompt, true, index, 0, !variation))
                .await?;
        }

        let quadrants = preview.image_ids.len().min(GRID_SIZE);
        for i in 0..quadrants {
            let last_quadrant = i + 1 == quadrants;

            if upscale {
                if let Some(url) = self
                    .call("upscale", prompt, index, Some(i), || client.upscale(&preview, i, cancel))
                    .await?
                {
                    self.emit(image(&url, prompt, false, index, i, last_quadrant && !variation))
                        .await?;
                }
            }

            if !variation {
                continue;
            }

            let base = GRID_SIZE + i * GRID_SIZE;
            let Some(varied) = self
                .call("variation", prompt, index, Some(base), || {
                    client.variation(&preview, i, cancel)
                })
                .await?
            else {
                continue;
            };

            if !upscale {
                self.emit(image(&varied.url, prompt, true, index, base, last_quadrant))
                    .await?;
                continue;
            }

            let sub_quadrants = varied.image_ids.len().min(GRID_SIZE);
            for j in 0..sub_quadrants {
                let image_index = base + j;
                if let Some(url) = self
                    .call("upscale", prompt, index, Some(image_index), || {
                        client.upscale(&varied, j, cancel)
                    })
                    .await?
                {
                    let is_last = last_quadrant && j + 1 == sub_quadrants;
                    self.emit(image(&url, prompt, false, index, image_index, is_last))
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// Run one bot call through the retry wrapper.
    ///
    /// `Ok(None)` means the unit was skipped; `Err` means the lane must stop.
    async fn call<T, F, Fut>(
        &self,
        operation: &str,
        prompt: &str,
        prompt_index: usize,
        image_index: Option<usize>,
        op: F,
    ) -> Result<Option<T>, Stop>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BotError>>,
    {
        let err = match retry_if(operation, self.config.max_attempts, BotError::is_retryable, op).await {
            Ok(value) => return Ok(Some(value)),
            Err(err) => err,
        };

        if err.is_fatal() {
            error!(
                lane = self.id,
                operation,
                prompt,
                prompt_index,
                image_index,
                error = %err,
                "Fatal bot error, aborting run"
            );
            let _ = self.tx.send(EngineEvent::Aborted(err)).await;
            self.cancel.cancel();
            return Err(Stop::Aborted);
        }
        if err.kind == ErrorKind::Cancelled || self.cancel.is_cancelled() {
            return Err(Stop::Cancelled);
        }

        let unit = if operation == "imagine" { "prompt" } else { "image" };
        metrics::SKIPPED.with_label_values(&[unit, err.kind.as_str()]).inc();
        warn!(
            lane = self.id,
            operation,
            prompt,
            prompt_index,
            image_index,
            error = %err,
            "Skipping {}",
            unit
        );
        Ok(None)
    }

    async fn emit(&self, image: GeneratedImage) -> Result<(), Stop> {
        debug!(
            lane = self.id,
            prompt_index = image.prompt_index,
            image_index = image.image_index,
            is_last = image.is_last,
            "Image ready"
        );
        // A produced image goes out if there is room; cancellation only
        // interrupts a full channel.
        tokio::select! {
            biased;
            sent = self.tx.send(EngineEvent::Image(image)) => match sent {
                Ok(()) => {
                    metrics::IMAGES_EMITTED.inc();
                    Ok(())
                }
                Err(_) => Err(Stop::Cancelled),
            },
            _ = self.cancel.cancelled() => Err(Stop::Cancelled),
        }
    }
}

fn image(
    url: &str,
    prompt: &str,
    preview: bool,
    prompt_index: usize,
    image_index: usize,
    is_last: bool,
) -> GeneratedImage {
    GeneratedImage {
        url: url.to_string(),
        prompt: prompt.to_string(),
        preview,
        prompt_index,
        image_index,
        is_last,
    }
}
