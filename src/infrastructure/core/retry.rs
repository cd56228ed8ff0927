//! Bounded retry with exponential backoff and jitter for transient I/O.
//!
//! Policy: base 1 s, multiplier 2, 3 attempts, up to 250 ms of random
//! jitter per wait. Safety refusals must never pass through here; retrying
//! a refusal would convert a deliberate "no" into an eventual "yes".

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

const BASE_DELAY: Duration = Duration::from_secs(1);
const MULTIPLIER: u32 = 2;
const MAX_ATTEMPTS: u32 = 3;
const MAX_JITTER_MS: u64 = 250;

/// Run `op` up to three times, backing off 1 s then 2 s (plus jitter)
/// between attempts. Returns the last error when every attempt fails.
pub async fn with_backoff<F, Fut, T, E>(name: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;
                if attempt >= MAX_ATTEMPTS {
                    return Err(e);
                }
                let backoff = BASE_DELAY * MULTIPLIER.pow(attempt - 1);
                let jitter =
                    Duration::from_millis(rand::rng().random_range(0..=MAX_JITTER_MS));
                warn!(
                    "{name}: attempt {attempt}/{MAX_ATTEMPTS} failed ({e}); retrying in {:?}",
                    backoff + jitter
                );
                tokio::time::sleep(backoff + jitter).await;
            }
        }
    }
}
