//! Job runner: owns one generation run from load/create to terminal status.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::assets::AssetWriter;
use super::config::JobConfig;
use super::prompts::build_prompts;
use super::store::{JobStore, JobView};
use super::types::{Job, JobError, JobImage, JobOutcome, JobStatus, Progress, ProgressCallback};
use crate::bot::{BotClient, BotError};
use crate::engine::{total_images, BulkScheduler, EngineEvent, GeneratedImage};
use crate::metrics;
use crate::transport::Transport;

/// How the event loop ended.
enum Ending {
    Closed,
    Cancelled,
    Aborted(BotError),
}

/// Runs jobs against a bot client and persists them in a store.
pub struct JobRunner {
    client: Arc<dyn BotClient>,
    store: Arc<dyn JobStore>,
    downloader: Option<Arc<dyn Transport>>,
    progress: Option<ProgressCallback>,
}

impl JobRunner {
    pub fn new(client: Arc<dyn BotClient>, store: Arc<dyn JobStore>) -> Self {
        Self {
            client,
            store,
            downloader: None,
            progress: None,
        }
    }

    /// Transport used to download images when a job asks for it.
    pub fn with_downloader(mut self, downloader: Arc<dyn Transport>) -> Self {
        self.downloader = Some(downloader);
        self
    }

    /// Callback invoked each time the percentage increases.
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Create or resume the job described by `config` and run it.
    ///
    /// A job already `finished` is returned as is. A fatal bot error leaves
    /// the job `partially_finished` and returns [`JobError::Aborted`].
    pub async fn run_job(
        &self,
        config: &JobConfig,
        cancel: &CancellationToken,
    ) -> Result<JobOutcome, JobError> {
        let view = JobView {
            thumbnail: config.thumbnail,
        };
        let assets = self.asset_writer(config)?;

        let mut job = match self.store.load(&config.id)? {
            Some(job) if job.is_finished() => {
                info!(job_id = %job.id, "Job already finished, nothing to do");
                return Ok(JobOutcome::from(&job));
            }
            Some(mut job) => {
                let discarded = job.discard_unfinished_images();
                info!(
                    job_id = %job.id,
                    prompts = job.prompts.len(),
                    finished = job.finished.len(),
                    discarded,
                    "Resuming job"
                );
                job
            }
            None => {
                let prompts = build_prompts(&config.prompts, &config.prefix, &config.suffix)?;
                if prompts.is_empty() {
                    return Err(JobError::NoPrompts);
                }
                let job = Job::new(config.id.clone(), prompts);
                self.store.save(&job, &view)?;
                info!(job_id = %job.id, prompts = job.prompts.len(), "Created job");
                job
            }
        };
        if job.prompts.is_empty() {
            return Err(JobError::NoPrompts);
        }

        self.client.start(cancel).await.map_err(JobError::Start)?;

        let total = total_images(job.prompts.len(), config.engine.variation);
        let skip = job.skip_set();
        job.status = JobStatus::Running;
        let job = Mutex::new(job);
        let mut reported = 0.0;
        {
            let mut job = job.lock().await;
            self.checkpoint(&mut job, total, &view, &mut reported)?;
        }

        // Lanes stop whenever this function returns.
        let run = cancel.child_token();
        let _stop_lanes = run.clone().drop_guard();
        let scheduler = BulkScheduler::new(Arc::clone(&self.client), config.engine.clone());
        let mut events = {
            let job = job.lock().await;
            scheduler.run(&job.prompts, &skip, &run)
        };

        let ending = loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ending::Cancelled,
                event = events.recv() => event,
            };
            match event {
                None => break Ending::Closed,
                Some(EngineEvent::Aborted(err)) => break Ending::Aborted(err),
                Some(EngineEvent::Image(image)) => {
                    let records = materialize(&assets, &image, cancel).await;
                    let mut job = job.lock().await;
                    record(&mut job, &image, records);
                    self.checkpoint(&mut job, total, &view, &mut reported)?;
                }
            }
        };

        // Stop the lanes, then keep whatever they had already produced.
        run.cancel();
        let mut drained = 0;
        while let Some(event) = events.recv().await {
            match event {
                EngineEvent::Image(image) => {
                    let records = materialize(&assets, &image, cancel).await;
                    record(&mut *job.lock().await, &image, records);
                    drained += 1;
                }
                EngineEvent::Aborted(err) => debug!(error = %err, "Ignoring later abort"),
            }
        }
        if drained > 0 {
            debug!(drained, "Recorded images produced before the lanes stopped");
        }

        let mut job = job.into_inner();
        self.checkpoint(&mut job, total, &view, &mut reported)?;
        let complete = job.percentage >= 100.0;
        job.status = match &ending {
            _ if complete => JobStatus::Finished,
            Ending::Cancelled => JobStatus::Cancelled,
            Ending::Closed | Ending::Aborted(_) => JobStatus::PartiallyFinished,
        };
        self.store.save(&job, &view)?;
        metrics::JOBS.with_label_values(&[job.status.as_str()]).inc();

        let outcome = JobOutcome::from(&job);
        match ending {
            Ending::Aborted(err) => {
                error!(job_id = %job.id, error = %err, "Job aborted");
                Err(JobError::Aborted(err))
            }
            _ => {
                info!(
                    job_id = %job.id,
                    status = %job.status,
                    percentage = job.percentage,
                    images = job.images.len(),
                    finished_prompts = job.finished.len(),
                    "Job run ended"
                );
                Ok(outcome)
            }
        }
    }

    fn asset_writer(&self, config: &JobConfig) -> Result<AssetWriter, JobError> {
        if !config.download {
            return Ok(AssetWriter::record_only());
        }
        let Some(downloader) = &self.downloader else {
            return Err(JobError::InvalidConfig(
                "download requested but no downloader configured".to_string(),
            ));
        };
        Ok(AssetWriter::new(
            Arc::clone(downloader),
            config.images_dir(),
            config.thumbnail,
        ))
    }

    /// Recompute progress, report increases, and persist.
    fn checkpoint(
        &self,
        job: &mut Job,
        total: usize,
        view: &JobView,
        reported: &mut f32,
    ) -> Result<(), JobError> {
        job.updated_at = Utc::now();
        let done = job.images.len();
        job.percentage = percentage(done, total);

        if job.percentage > *reported {
            *reported = job.percentage;
            let progress = Progress {
                percentage: job.percentage,
                estimated: estimate(job.elapsed(), done, total),
            };
            info!(
                job_id = %job.id,
                percentage = progress.percentage,
                remaining_secs = progress.estimated.as_secs(),
                "Progress"
            );
            if let Some(callback) = &self.progress {
                callback(progress);
            }
        }

        job.sort_images();
        if let Err(e) = self.store.save(job, view) {
            warn!(job_id = %job.id, error = %e, "Couldn't persist job");
            return Err(e.into());
        }
        Ok(())
    }
}

/// Records for `image`; files are skipped once `cancel` fires.
async fn materialize(
    assets: &AssetWriter,
    image: &GeneratedImage,
    cancel: &CancellationToken,
) -> Vec<JobImage> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => assets.record(image),
        records = assets.materialize(image, cancel) => records,
    }
}

fn record(job: &mut Job, image: &GeneratedImage, records: Vec<JobImage>) {
    job.images.extend(records);
    if image.is_last {
        job.mark_finished(image.prompt_index);
    }
}

/// Share of `total` that `done` represents, capped at 100.
fn percentage(done: usize, total: usize) -> f32 {
    if total == 0 {
        return 0.0;
    }
    (done as f32 * 100.0 / total as f32).min(100.0)
}

/// Remaining time at the average pace so far.
fn estimate(elapsed: Duration, done: usize, total: usize) -> Duration {
    if done == 0 {
        return Duration::ZERO;
    }
    let per_image = elapsed.div_f64(done as f64);
    per_image.mul_f64(total.saturating_sub(done) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage() {
        assert_eq!(percentage(0, 20), 0.0);
        assert_eq!(percentage(5, 20), 25.0);
        assert_eq!(percentage(24, 20), 100.0);
        assert_eq!(percentage(3, 0), 0.0);
    }

    #[test]
    fn test_estimate() {
        assert_eq!(estimate(Duration::from_secs(10), 0, 8), Duration::ZERO);
        assert_eq!(estimate(Duration::from_secs(10), 2, 8), Duration::from_secs(30));
        assert_eq!(estimate(Duration::from_secs(10), 8, 8), Duration::ZERO);
    }
}
