//! Bounded immediate retries.

use std::fmt::Display;
use std::future::Future;

use tracing::warn;

use crate::metrics;

/// Call `op` until it succeeds or `max_attempts` calls have failed.
///
/// No delay between attempts; the last error is returned.
pub async fn retry<T, E, F, Fut>(operation: &str, max_attempts: u32, op: F) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    retry_if(operation, max_attempts, |_| true, op).await
}

/// Like [`retry`], but stops early when `should_retry` rejects the error.
pub async fn retry_if<T, E, F, Fut, P>(
    operation: &str,
    max_attempts: u32,
    should_retry: P,
    mut op: F,
) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;
    loop {
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        attempt += 1;
        if attempt >= max_attempts || !should_retry(&err) {
            return Err(err);
        }
        metrics::RETRIES.with_label_values(&[operation]).inc();
        warn!(operation, attempt, max_attempts, error = %err, "Retrying");
    }
}
