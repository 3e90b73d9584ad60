//! Types for bot operations.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::correlator::WaitError;
use crate::transport::TransportError;

/// How a failed bot operation should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Rejected prompt. Never retried; the prompt is abandoned.
    Validation,
    /// Upstream queue full. Retried.
    Capacity,
    /// Network or parsing hiccup. Retried.
    Transient,
    /// No reply before the deadline. Retried.
    Timeout,
    /// The target message is gone. The unit is abandoned.
    NotFound,
    /// The account needs human attention. Aborts the whole run.
    Fatal,
    /// The run was cancelled.
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Capacity => "capacity",
            ErrorKind::Transient => "transient",
            ErrorKind::Timeout => "timeout",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Fatal => "fatal",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified bot operation failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct BotError {
    pub kind: ErrorKind,
    pub message: String,
}

impl BotError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn capacity(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Capacity, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "operation cancelled")
    }

    /// Prefix the message with where the error happened.
    pub fn context(mut self, context: impl fmt::Display) -> Self {
        self.message = format!("{}: {}", context, self.message);
        self
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Capacity | ErrorKind::Transient | ErrorKind::Timeout
        )
    }

    pub fn is_fatal(&self) -> bool {
        self.kind == ErrorKind::Fatal
    }
}

impl From<TransportError> for BotError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::MessageNotFound => BotError::not_found(e.to_string()),
            TransportError::Cancelled => BotError::cancelled(),
            other => BotError::transient(other.to_string()),
        }
    }
}

impl From<WaitError> for BotError {
    fn from(e: WaitError) -> Self {
        match e {
            WaitError::Timeout(_) => BotError::new(ErrorKind::Timeout, e.to_string()),
            WaitError::Cancelled => BotError::cancelled(),
            WaitError::Closed => BotError::transient(e.to_string()),
        }
    }
}

/// A 2x2 grid reply to an imagine or variation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preview {
    /// Grid image location.
    pub url: String,
    /// Prompt as submitted.
    pub prompt: String,
    /// Prompt as echoed by the bot; correlation key of follow-up replies.
    pub response_prompt: String,
    pub message_id: String,
    /// One button identifier per quadrant.
    pub image_ids: Vec<String>,
}

/// Image generation bot driven through chat interactions.
#[async_trait]
pub trait BotClient: Send + Sync {
    /// Bot name for logs and metrics.
    fn name(&self) -> &str;

    /// Maximum number of parallel lanes the bot tolerates.
    fn concurrency(&self) -> usize;

    /// Connect and discover what the bot needs. Idempotent.
    async fn start(&self, cancel: &CancellationToken) -> Result<(), BotError>;

    /// Request a new grid for `prompt`.
    async fn imagine(&self, prompt: &str, cancel: &CancellationToken) -> Result<Preview, BotError>;

    /// Enlarge quadrant `index` of `preview`; returns the image URL.
    async fn upscale(
        &self,
        preview: &Preview,
        index: usize,
        cancel: &CancellationToken,
    ) -> Result<String, BotError>;

    /// New grid inspired by quadrant `index` of `preview`.
    async fn variation(
        &self,
        preview: &Preview,
        index: usize,
        cancel: &CancellationToken,
    ) -> Result<Preview, BotError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_retryable_kinds() {
        assert!(BotError::capacity("queue full").is_retryable());
        assert!(BotError::transient("x").is_retryable());
        assert!(BotError::new(ErrorKind::Timeout, "x").is_retryable());
        assert!(!BotError::validation("banned").is_retryable());
        assert!(!BotError::not_found("gone").is_retryable());
        assert!(!BotError::fatal("captcha").is_retryable());
        assert!(!BotError::cancelled().is_retryable());
    }

    #[test]
    fn test_only_fatal_is_fatal() {
        assert!(BotError::fatal("pending mod message").is_fatal());
        assert!(!BotError::capacity("queue full").is_fatal());
    }

    #[test]
    fn test_transport_conversion() {
        let e: BotError = TransportError::MessageNotFound.into();
        assert_eq!(e.kind, ErrorKind::NotFound);

        let e: BotError = TransportError::Timeout.into();
        assert_eq!(e.kind, ErrorKind::Transient);

        let e: BotError = TransportError::Cancelled.into();
        assert_eq!(e.kind, ErrorKind::Cancelled);
    }

    #[test]
    fn test_wait_conversion() {
        let e: BotError = WaitError::Timeout(Duration::from_secs(600)).into();
        assert_eq!(e.kind, ErrorKind::Timeout);
        assert!(e.is_retryable());

        let e: BotError = WaitError::Cancelled.into();
        assert_eq!(e.kind, ErrorKind::Cancelled);
    }

    #[test]
    fn test_display_and_context() {
        let e = BotError::capacity("queue full").context("midjourney");
        assert_eq!(e.to_string(), "capacity: midjourney: queue full");
    }
}
