//! Bounded exponential backoff for one-shot calls the caller retries in place, such as
//! startup probes of configured endpoints. Queue paths never use this; they rely on
//! broker redelivery.

use std::future::Future;
use std::time::Duration;

use log::{error, warn};
use tokio::time::sleep;

/// Number of attempts before giving up.
pub const MAX_RETRY_ATTEMPTS: u32 = 5;
/// Delay before the first retry.
const MIN_DELAY: Duration = Duration::from_secs(1);
/// Upper bound on a single delay.
const MAX_DELAY: Duration = Duration::from_secs(30);

/// Runs `call` until it succeeds or the attempts run out, returning the last error.
pub async fn retry_with_backoff<T, E, F, Fut>(what: &str, call: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_with_policy(what, MAX_RETRY_ATTEMPTS, MIN_DELAY, MAX_DELAY, call).await
}

/// [`retry_with_backoff`] with an explicit attempt count and delay bounds.
pub async fn retry_with_policy<T, E, F, Fut>(
    what: &str,
    attempts: u32,
    min_delay: Duration,
    max_delay: Duration,
    mut call: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut last_error = None;

    for duration in exponential_backoff::Backoff::new(attempts.max(1), min_delay, max_delay) {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                match duration {
                    Some(duration) => {
                        warn!("🔁 {what} failed: {e}. Retrying in {duration:?}");
                        sleep(duration).await;
                    }
                    None => error!("❌ {what} failed: {e}. Giving up"),
                }
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(e) => Err(e),
        // The backoff always yields at least one attempt.
        None => call().await,
    }
}
