//! Outbound HTTP client profiles.
//!
//! Two profiles, one per thing tradewarden talks to. The exchange gets
//! tight deadlines and bounded retries: every request must resolve well
//! inside one reconciliation poll, and VALR deduplicates on
//! customerOrderId, so a retried placement cannot double-fill. The Discord
//! notifier gets a short deadline and no retries at all; a dropped embed on
//! the cold path is not worth a retry storm.

use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use std::time::Duration;
use tracing::warn;

const AGENT: &str = concat!("tradewarden/", env!("CARGO_PKG_VERSION"));

const EXCHANGE_DEADLINE: Duration = Duration::from_secs(10);
const NOTIFIER_DEADLINE: Duration = Duration::from_secs(5);
const CONNECT_DEADLINE: Duration = Duration::from_secs(3);

/// Client for signed exchange calls. Transient faults retry twice (three
/// attempts total), backing off between one and four seconds.
pub fn exchange_client() -> ClientWithMiddleware {
    let retry_policy = ExponentialBackoff::builder()
        .retry_bounds(Duration::from_secs(1), Duration::from_secs(4))
        .build_with_max_retries(2);

    ClientBuilder::new(base_client(EXCHANGE_DEADLINE))
        .with(RetryTransientMiddleware::new_with_policy(retry_policy))
        .build()
}

/// Client for webhook notifications. No retry middleware.
pub fn notifier_client() -> ClientWithMiddleware {
    ClientBuilder::new(base_client(NOTIFIER_DEADLINE)).build()
}

fn base_client(deadline: Duration) -> Client {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(AGENT));

    match Client::builder()
        .default_headers(headers)
        .timeout(deadline)
        .connect_timeout(CONNECT_DEADLINE)
        .pool_max_idle_per_host(2)
        .build()
    {
        Ok(client) => client,
        // Only TLS backend initialisation can fail here; a default client
        // still honors per-request deadlines set by callers.
        Err(e) => {
            warn!("outbound: client build failed ({e}); using defaults");
            Client::new()
        }
    }
}
