//! Request/response correlation over an unordered inbound event stream.
//!
//! Outbound requests register a waiter under a [`SearchKey`] before they are
//! sent. Inbound events are classified into a key plus a dedup identifier
//! and handed to the oldest live waiter for that key. Each physical event is
//! delivered at most once, even when the upstream reports it twice
//! (message created, then updated).

mod correlator;
mod dedup;
mod types;

pub use correlator::{Correlator, PendingReply, WaiterHandle};
pub use dedup::DedupCache;
pub use types::{Classification, DispatchOutcome, EventClassifier, SearchKey, WaitError};
