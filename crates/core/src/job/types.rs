//! Types for jobs (albums).

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bot::BotError;

/// Lifecycle of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Created,
    Running,
    PartiallyFinished,
    Finished,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Created => "created",
            JobStatus::Running => "running",
            JobStatus::PartiallyFinished => "partially_finished",
            JobStatus::Finished => "finished",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "created" => Some(JobStatus::Created),
            "running" => Some(JobStatus::Running),
            "partially_finished" => Some(JobStatus::PartiallyFinished),
            "finished" => Some(JobStatus::Finished),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded image slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobImage {
    pub url: String,
    pub prompt: String,
    pub prompt_index: usize,
    pub image_index: usize,
    /// File name under `images/` when the image was downloaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

/// Persisted state of one generation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub percentage: f32,
    /// Sorted once at creation; indices are stable across resumes.
    pub prompts: Vec<String>,
    /// Prompt indices whose whole generation tree completed. Only grows.
    #[serde(default)]
    pub finished: Vec<usize>,
    #[serde(default)]
    pub images: Vec<JobImage>,
}

impl Job {
    /// New job over `prompts`, which are sorted here.
    pub fn new(id: impl Into<String>, mut prompts: Vec<String>) -> Self {
        prompts.sort();
        let now = Utc::now();
        Self {
            id: id.into(),
            status: JobStatus::Created,
            created_at: now,
            updated_at: now,
            percentage: 0.0,
            prompts,
            finished: Vec::new(),
            images: Vec::new(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status == JobStatus::Finished
    }

    /// Prompt indices to leave out of the next run.
    pub fn skip_set(&self) -> HashSet<usize> {
        self.finished.iter().copied().collect()
    }

    pub fn mark_finished(&mut self, prompt_index: usize) {
        if !self.finished.contains(&prompt_index) {
            self.finished.push(prompt_index);
        }
    }

    /// Drop images of prompts that will be regenerated from scratch.
    ///
    /// Returns how many were removed.
    pub fn discard_unfinished_images(&mut self) -> usize {
        let finished = self.skip_set();
        let before = self.images.len();
        self.images.retain(|image| finished.contains(&image.prompt_index));
        before - self.images.len()
    }

    /// Order images by prompt, then URL.
    pub fn sort_images(&mut self) {
        self.images.sort_by(|a, b| {
            a.prompt
                .cmp(&b.prompt)
                .then_with(|| a.url.cmp(&b.url))
                .then_with(|| a.image_index.cmp(&b.image_index))
        });
    }

    /// Time between creation and the last update.
    pub fn elapsed(&self) -> Duration {
        (self.updated_at - self.created_at)
            .to_std()
            .unwrap_or_default()
    }
}

/// Listing entry for a stored job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub percentage: f32,
    pub prompts: usize,
    pub finished_prompts: usize,
    pub images: usize,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            status: job.status,
            created_at: job.created_at,
            updated_at: job.updated_at,
            percentage: job.percentage,
            prompts: job.prompts.len(),
            finished_prompts: job.finished.len(),
            images: job.images.len(),
        }
    }
}

/// Progress report passed to the progress callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub percentage: f32,
    /// Estimated time until the run completes.
    pub estimated: Duration,
}

/// Callback invoked whenever the percentage increases.
pub type ProgressCallback = Arc<dyn Fn(Progress) + Send + Sync>;

/// Result of [`JobRunner::run_job`](super::JobRunner::run_job).
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub id: String,
    pub status: JobStatus,
    pub percentage: f32,
    pub images: usize,
    pub finished_prompts: usize,
}

impl From<&Job> for JobOutcome {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            status: job.status,
            percentage: job.percentage,
            images: job.images.len(),
            finished_prompts: job.finished.len(),
        }
    }
}

/// Errors from job persistence.
#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for JobStoreError {
    fn from(e: rusqlite::Error) -> Self {
        JobStoreError::Database(e.to_string())
    }
}

/// Errors that end a job run.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("no prompts to generate")]
    NoPrompts,

    #[error("couldn't read prompt file {path}: {source}")]
    PromptFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid job configuration: {0}")]
    InvalidConfig(String),

    #[error("job store error: {0}")]
    Store(#[from] JobStoreError),

    #[error("couldn't start bot client: {0}")]
    Start(#[source] BotError),

    /// A fatal bot error stopped the run; the job is left resumable.
    #[error("run aborted: {0}")]
    Aborted(#[source] BotError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(prompt: &str, url: &str, prompt_index: usize, image_index: usize) -> JobImage {
        JobImage {
            url: url.to_string(),
            prompt: prompt.to_string(),
            prompt_index,
            image_index,
            file: None,
        }
    }

    #[test]
    fn test_new_job_sorts_prompts() {
        let job = Job::new("a", vec!["b".into(), "a".into(), "c".into()]);
        assert_eq!(job.prompts, vec!["a", "b", "c"]);
        assert_eq!(job.status, JobStatus::Created);
        assert_eq!(job.percentage, 0.0);
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&JobStatus::PartiallyFinished).unwrap(),
            "\"partially_finished\""
        );
        for status in [
            JobStatus::Created,
            JobStatus::Running,
            JobStatus::PartiallyFinished,
            JobStatus::Finished,
            JobStatus::Cancelled,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("partially finished"), None);
    }

    #[test]
    fn test_mark_finished_is_idempotent() {
        let mut job = Job::new("a", vec!["x".into()]);
        job.mark_finished(0);
        job.mark_finished(0);
        assert_eq!(job.finished, vec![0]);
        assert!(job.skip_set().contains(&0));
    }

    #[test]
    fn test_sort_images_by_prompt_then_url() {
        let mut job = Job::new("a", vec![]);
        job.images = vec![
            image("b", "u1", 1, 0),
            image("a", "u2", 0, 1),
            image("a", "u1", 0, 3),
            image("a", "u1", 0, 2),
        ];
        job.sort_images();
        let order: Vec<(&str, &str, usize)> = job
            .images
            .iter()
            .map(|i| (i.prompt.as_str(), i.url.as_str(), i.image_index))
            .collect();
        assert_eq!(
            order,
            vec![("a", "u1", 2), ("a", "u1", 3), ("a", "u2", 1), ("b", "u1", 0)]
        );
    }

    #[test]
    fn test_discard_unfinished_images() {
        let mut job = Job::new("a", vec!["x".into(), "y".into()]);
        job.images = vec![image("x", "u", 0, 0), image("y", "v", 1, 0)];
        job.mark_finished(0);
        assert_eq!(job.discard_unfinished_images(), 1);
        assert_eq!(job.images.len(), 1);
        assert_eq!(job.images[0].prompt_index, 0);
    }

    #[test]
    fn test_job_json_layout() {
        let job = Job::new("20240101_000000", vec!["cat".into()]);
        let value = serde_json::to_value(&job).unwrap();
        for key in ["id", "status", "created_at", "updated_at", "percentage", "prompts", "finished", "images"] {
            assert!(value.get(key).is_some(), "missing {}", key);
        }
        let parsed: Job = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, job);
    }
}
