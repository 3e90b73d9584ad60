//! Types shared by the correlator and its callers.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Correlation identifier used to match an inbound event to a request.
///
/// Two keys are equal only when both the tag and the payload match exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SearchKey {
    /// Grid reply for an imagine request, keyed by the echoed prompt.
    Preview(String),
    /// Single image reply for an upscale request, keyed by the echoed prompt.
    Upscale(String),
    /// Grid reply for a variation request, keyed by the echoed prompt.
    Variation(String),
    /// Acknowledgement carrying the nonce of the request.
    Nonce(String),
    /// Reply referencing an interaction id.
    Interaction(String),
}

impl SearchKey {
    /// Tag name, used for logs and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            SearchKey::Preview(_) => "preview",
            SearchKey::Upscale(_) => "upscale",
            SearchKey::Variation(_) => "variation",
            SearchKey::Nonce(_) => "nonce",
            SearchKey::Interaction(_) => "interaction",
        }
    }

    /// The key payload.
    pub fn value(&self) -> &str {
        match self {
            SearchKey::Preview(v)
            | SearchKey::Upscale(v)
            | SearchKey::Variation(v)
            | SearchKey::Nonce(v)
            | SearchKey::Interaction(v) => v,
        }
    }
}

impl fmt::Display for SearchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind(), self.value())
    }
}

/// Result of classifying an inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Key of the waiter queue this event belongs to.
    pub key: SearchKey,
    /// Identifier of the physical event (attachment URL or nonce).
    pub dedup_id: String,
}

impl Classification {
    pub fn new(key: SearchKey, dedup_id: impl Into<String>) -> Self {
        Self {
            key,
            dedup_id: dedup_id.into(),
        }
    }
}

/// Bot-specific rules that turn raw events into correlation keys.
pub trait EventClassifier<E>: Send + Sync {
    /// Classify an event, or return `None` when it is not relevant.
    fn classify(&self, event: &E) -> Option<Classification>;
}

/// What happened to an event handed to [`super::Correlator::dispatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The classifier did not recognise the event.
    Ignored,
    /// The event was already delivered once.
    Duplicate,
    /// A waiter accepted the event. `expired` waiters were discarded first.
    Delivered { expired: usize },
    /// No live waiter accepted the event.
    Unmatched { expired: usize },
}

impl DispatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchOutcome::Ignored => "ignored",
            DispatchOutcome::Duplicate => "duplicate",
            DispatchOutcome::Delivered { .. } => "delivered",
            DispatchOutcome::Unmatched { .. } => "unmatched",
        }
    }
}

/// Errors while awaiting a correlated reply.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WaitError {
    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("wait cancelled")]
    Cancelled,

    #[error("correlator dropped the waiter")]
    Closed,
}
