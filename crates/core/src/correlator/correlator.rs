//! Waiter queues plus dedup cache behind one lock.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::dedup::{DedupCache, DEFAULT_DEDUP_CAPACITY};
use super::types::{DispatchOutcome, EventClassifier, SearchKey, WaitError};
use crate::metrics;

/// Waiter callback. Returns true when the event was accepted, false when the
/// requester already gave up and the next waiter should be tried.
type Deliver<E> = Box<dyn FnMut(&E) -> bool + Send>;

struct Waiter<E> {
    id: u64,
    deliver: Deliver<E>,
}

struct State<E> {
    waiters: HashMap<SearchKey, VecDeque<Waiter<E>>>,
    delivered: DedupCache,
    next_id: u64,
}

impl<E> State<E> {
    fn remove(&mut self, key: &SearchKey, id: u64) -> bool {
        let Some(queue) = self.waiters.get_mut(key) else {
            return false;
        };
        let before = queue.len();
        queue.retain(|w| w.id != id);
        let removed = queue.len() != before;
        if queue.is_empty() {
            self.waiters.remove(key);
        }
        removed
    }
}

/// Identifies one registered waiter so it can be withdrawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaiterHandle {
    key: SearchKey,
    id: u64,
}

impl WaiterHandle {
    pub fn key(&self) -> &SearchKey {
        &self.key
    }
}

/// Matches inbound events of type `E` to outstanding requests.
///
/// Cheap to clone; clones share the same waiter map and dedup cache. Each
/// adapter instance owns its own correlator.
pub struct Correlator<E> {
    state: Arc<Mutex<State<E>>>,
    classifier: Arc<dyn EventClassifier<E>>,
}

impl<E> Clone for Correlator<E> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            classifier: Arc::clone(&self.classifier),
        }
    }
}

fn lock<E>(state: &Mutex<State<E>>) -> MutexGuard<'_, State<E>> {
    // Waiter callbacks never panic while holding the lock in practice, but a
    // poisoned map is still structurally valid.
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<E: Clone + Send + 'static> Correlator<E> {
    pub fn new(classifier: Arc<dyn EventClassifier<E>>) -> Self {
        Self::with_dedup_capacity(classifier, DEFAULT_DEDUP_CAPACITY)
    }

    pub fn with_dedup_capacity(classifier: Arc<dyn EventClassifier<E>>, capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                waiters: HashMap::new(),
                delivered: DedupCache::with_capacity(capacity),
                next_id: 0,
            })),
            classifier,
        }
    }

    /// Append a waiter to the FIFO queue of `key`.
    pub fn register<F>(&self, key: SearchKey, deliver: F) -> WaiterHandle
    where
        F: FnMut(&E) -> bool + Send + 'static,
    {
        let mut state = lock(&self.state);
        let id = state.next_id;
        state.next_id += 1;
        state
            .waiters
            .entry(key.clone())
            .or_default()
            .push_back(Waiter {
                id,
                deliver: Box::new(deliver),
            });
        trace!(key = %key, waiter = id, "Registered waiter");
        WaiterHandle { key, id }
    }

    /// Withdraw a waiter. Returns false if it was already consumed or removed.
    pub fn unregister(&self, handle: &WaiterHandle) -> bool {
        lock(&self.state).remove(&handle.key, handle.id)
    }

    /// Number of waiters currently queued for `key`.
    pub fn pending(&self, key: &SearchKey) -> usize {
        lock(&self.state)
            .waiters
            .get(key)
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    /// Route an inbound event to the oldest live waiter of its key.
    ///
    /// Waiters are invoked while the lock is held, so they must not block.
    pub fn dispatch(&self, event: &E) -> DispatchOutcome {
        let outcome = self.dispatch_locked(event);
        metrics::CORRELATOR_DISPATCH
            .with_label_values(&[outcome.as_str()])
            .inc();
        outcome
    }

    fn dispatch_locked(&self, event: &E) -> DispatchOutcome {
        let Some(class) = self.classifier.classify(event) else {
            return DispatchOutcome::Ignored;
        };

        let mut state = lock(&self.state);
        if state.delivered.contains(&class.dedup_id) {
            trace!(key = %class.key, id = %class.dedup_id, "Dropping already delivered event");
            return DispatchOutcome::Duplicate;
        }

        let mut expired = 0;
        let accepted = loop {
            let Some(queue) = state.waiters.get_mut(&class.key) else {
                break false;
            };
            let Some(mut waiter) = queue.pop_front() else {
                state.waiters.remove(&class.key);
                break false;
            };
            if queue.is_empty() {
                state.waiters.remove(&class.key);
            }
            if (waiter.deliver)(event) {
                break true;
            }
            expired += 1;
        };

        if accepted {
            state.delivered.insert(class.dedup_id);
            debug!(key = %class.key, expired, "Delivered event to waiter");
            DispatchOutcome::Delivered { expired }
        } else {
            trace!(key = %class.key, expired, "No waiter accepted event");
            DispatchOutcome::Unmatched { expired }
        }
    }

    /// Register a one-shot waiter on `key` and return its pending reply.
    pub fn subscribe(&self, key: SearchKey) -> PendingReply<E> {
        let (tx, rx) = oneshot::channel();
        let mut tx = Some(tx);
        let handle = self.register(key, move |event: &E| match tx.take() {
            // A closed receiver means the requester stopped waiting.
            Some(tx) => tx.send(event.clone()).is_ok(),
            None => false,
        });
        PendingReply {
            rx,
            handle,
            state: Arc::downgrade(&self.state),
        }
    }

    /// Register a waiter on `key`, then run `send`.
    ///
    /// The waiter exists before the request leaves, so a reply that arrives
    /// before `send` returns is still delivered. If `send` fails the waiter is
    /// withdrawn and the error returned.
    pub async fn register_then_send<F, Fut, Err>(
        &self,
        key: SearchKey,
        send: F,
    ) -> Result<PendingReply<E>, Err>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), Err>>,
    {
        let pending = self.subscribe(key);
        send().await?;
        Ok(pending)
    }
}

/// A reply that has been registered for but not yet received.
///
/// Dropping it withdraws the waiter.
pub struct PendingReply<E> {
    rx: oneshot::Receiver<E>,
    handle: WaiterHandle,
    state: Weak<Mutex<State<E>>>,
}

impl<E> PendingReply<E> {
    pub fn key(&self) -> &SearchKey {
        &self.handle.key
    }

    /// Wait for the reply, bounded by `timeout` and the cancellation token.
    pub async fn wait(mut self, timeout: Duration, cancel: &CancellationToken) -> Result<E, WaitError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(WaitError::Cancelled),
            result = tokio::time::timeout(timeout, &mut self.rx) => match result {
                Ok(Ok(event)) => Ok(event),
                Ok(Err(_)) => Err(WaitError::Closed),
                Err(_) => Err(WaitError::Timeout(timeout)),
            },
        }
    }
}

impl<E> Drop for PendingReply<E> {
    fn drop(&mut self) {
        if let Some(state) = self.state.upgrade() {
            let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
            state.remove(&self.handle.key, self.handle.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlator::Classification;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq)]
    struct Event {
        key: String,
        id: String,
    }

    fn event(key: &str, id: &str) -> Event {
        Event {
            key: key.to_string(),
            id: id.to_string(),
        }
    }

    struct ByKey;

    impl EventClassifier<Event> for ByKey {
        fn classify(&self, event: &Event) -> Option<Classification> {
            if event.key.is_empty() {
                return None;
            }
            Some(Classification::new(
                SearchKey::Preview(event.key.clone()),
                event.id.clone(),
            ))
        }
    }

    fn correlator() -> Correlator<Event> {
        Correlator::new(Arc::new(ByKey))
    }

    fn recorder(log: &Arc<Mutex<Vec<(String, String)>>>, name: &str) -> impl FnMut(&Event) -> bool + Send + 'static {
        let log = Arc::clone(log);
        let name = name.to_string();
        move |e: &Event| {
            log.lock().unwrap().push((name.clone(), e.id.clone()));
            true
        }
    }

    #[test]
    fn test_waiters_served_in_registration_order() {
        let c = correlator();
        let log = Arc::new(Mutex::new(Vec::new()));
        let key = SearchKey::Preview("cat".into());

        c.register(key.clone(), recorder(&log, "A"));
        c.register(key.clone(), recorder(&log, "B"));

        assert!(matches!(c.dispatch(&event("cat", "1")), DispatchOutcome::Delivered { expired: 0 }));
        assert!(matches!(c.dispatch(&event("cat", "2")), DispatchOutcome::Delivered { expired: 0 }));

        let log = log.lock().unwrap();
        assert_eq!(
            *log,
            vec![("A".to_string(), "1".to_string()), ("B".to_string(), "2".to_string())]
        );
        assert_eq!(c.pending(&key), 0);
    }

    #[test]
    fn test_duplicate_event_reaches_one_waiter() {
        let c = correlator();
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let calls = Arc::clone(&calls);
            c.register(SearchKey::Preview("cat".into()), move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                true
            });
        }

        c.dispatch(&event("cat", "https://cdn/x.png"));
        assert_eq!(c.dispatch(&event("cat", "https://cdn/x.png")), DispatchOutcome::Duplicate);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(c.pending(&SearchKey::Preview("cat".into())), 1);
    }

    #[test]
    fn test_expired_waiter_is_skipped_and_discarded() {
        let c = correlator();
        let log = Arc::new(Mutex::new(Vec::new()));
        let expired_calls = Arc::new(AtomicUsize::new(0));
        let key = SearchKey::Preview("cat".into());

        let counter = Arc::clone(&expired_calls);
        c.register(key.clone(), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            false
        });
        c.register(key.clone(), recorder(&log, "B"));

        assert_eq!(c.dispatch(&event("cat", "1")), DispatchOutcome::Delivered { expired: 1 });
        assert_eq!(c.dispatch(&event("cat", "2")), DispatchOutcome::Unmatched { expired: 0 });

        assert_eq!(expired_calls.load(Ordering::SeqCst), 1);
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_unmatched_event_is_not_remembered() {
        let c = correlator();
        assert_eq!(c.dispatch(&event("cat", "1")), DispatchOutcome::Unmatched { expired: 0 });

        let log = Arc::new(Mutex::new(Vec::new()));
        c.register(SearchKey::Preview("cat".into()), recorder(&log, "late"));
        assert!(matches!(c.dispatch(&event("cat", "1")), DispatchOutcome::Delivered { .. }));
    }

    #[test]
    fn test_irrelevant_event_is_ignored() {
        let c = correlator();
        assert_eq!(c.dispatch(&event("", "1")), DispatchOutcome::Ignored);
    }

    #[test]
    fn test_keys_do_not_cross() {
        let c = correlator();
        let log = Arc::new(Mutex::new(Vec::new()));
        c.register(SearchKey::Upscale("cat".into()), recorder(&log, "up"));

        assert_eq!(c.dispatch(&event("cat", "1")), DispatchOutcome::Unmatched { expired: 0 });
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unregister() {
        let c = correlator();
        let key = SearchKey::Nonce("42".into());
        let handle = c.register(key.clone(), |_| true);
        assert_eq!(c.pending(&key), 1);
        assert!(c.unregister(&handle));
        assert!(!c.unregister(&handle));
        assert_eq!(c.pending(&key), 0);
    }

    #[tokio::test]
    async fn test_pending_reply_receives_event() {
        let c = correlator();
        let pending = c.subscribe(SearchKey::Preview("cat".into()));
        c.dispatch(&event("cat", "1"));

        let got = pending
            .wait(Duration::from_secs(1), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(got, event("cat", "1"));
    }

    #[tokio::test]
    async fn test_timed_out_reply_passes_event_to_next_waiter() {
        let c = correlator();
        let key = SearchKey::Preview("cat".into());
        let first = c.subscribe(key.clone());
        let second = c.subscribe(key.clone());

        let err = first
            .wait(Duration::from_millis(10), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, WaitError::Timeout(Duration::from_millis(10)));
        assert_eq!(c.pending(&key), 1);

        c.dispatch(&event("cat", "1"));
        let got = second
            .wait(Duration::from_secs(1), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(got.id, "1");
    }

    #[tokio::test]
    async fn test_cancelled_wait() {
        let c = correlator();
        let pending = c.subscribe(SearchKey::Preview("cat".into()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = pending.wait(Duration::from_secs(60), &cancel).await.unwrap_err();
        assert_eq!(err, WaitError::Cancelled);
        assert_eq!(c.pending(&SearchKey::Preview("cat".into())), 0);
    }

    #[tokio::test]
    async fn test_register_then_send_sees_fast_reply() {
        let c = correlator();
        let inner = c.clone();
        let pending = c
            .register_then_send(SearchKey::Preview("cat".into()), || async move {
                // Reply arrives before the send call returns.
                inner.dispatch(&event("cat", "fast"));
                Ok::<(), String>(())
            })
            .await
            .unwrap();

        let got = pending
            .wait(Duration::from_secs(1), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(got.id, "fast");
    }

    #[tokio::test]
    async fn test_register_then_send_failure_withdraws_waiter() {
        let c = correlator();
        let key = SearchKey::Nonce("1".into());
        let result = c
            .register_then_send(key.clone(), || async { Err::<(), _>("boom") })
            .await;
        assert_eq!(result.err(), Some("boom"));
        assert_eq!(c.pending(&key), 0);
    }

    #[test]
    fn test_concurrent_dispatch_delivers_once() {
        let c = correlator();
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            let calls = Arc::clone(&calls);
            c.register(SearchKey::Preview("cat".into()), move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                true
            });
        }

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let c = c.clone();
                std::thread::spawn(move || {
                    c.dispatch(&event("cat", "same"));
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
