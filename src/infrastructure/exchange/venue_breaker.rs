//! Exchange availability breaker.
//!
//! The order manager asks for admission before every submission and reports
//! the outcome afterwards. Five consecutive failures take the venue offline
//! for sixty seconds; once the window passes, a single probe order is
//! admitted and its outcome decides whether the venue reopens or goes dark
//! for another window. This is about the venue being unreachable, not about
//! losses: unlike the trading lockout it recovers on its own, and it never
//! consults anything but its own failure streak.

use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// Consecutive submission failures that take the venue offline.
const TRIP_AFTER_FAILURES: u32 = 5;
/// How long the venue stays offline before a probe is admitted.
const OFFLINE_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
#[error("venue '{venue}' is offline; next attempt in {retry_in:?}")]
pub struct VenueOffline {
    pub venue: &'static str,
    pub retry_in: Duration,
}

struct VenueHealth {
    consecutive_failures: u32,
    offline_until: Option<Instant>,
    probe_in_flight: bool,
}

pub struct VenueBreaker {
    venue: &'static str,
    health: Mutex<VenueHealth>,
}

impl VenueBreaker {
    pub fn new(venue: &'static str) -> Self {
        Self {
            venue,
            health: Mutex::new(VenueHealth {
                consecutive_failures: 0,
                offline_until: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Ask to send one order. While the venue is offline the answer is no,
    /// except for a single probe once the window has passed.
    pub async fn admit(&self, correlation_id: Uuid) -> Result<(), VenueOffline> {
        let mut health = self.health.lock().await;
        let Some(until) = health.offline_until else {
            return Ok(());
        };

        let now = Instant::now();
        if now < until {
            return Err(VenueOffline {
                venue: self.venue,
                retry_in: until - now,
            });
        }

        // Window over. One probe at a time; everyone else keeps waiting on
        // its verdict.
        if health.probe_in_flight {
            return Err(VenueOffline {
                venue: self.venue,
                retry_in: Duration::ZERO,
            });
        }
        health.probe_in_flight = true;
        info!(
            "VenueBreaker [{correlation_id}]: probing '{}' after offline window",
            self.venue
        );
        Ok(())
    }

    pub async fn record_success(&self) {
        let mut health = self.health.lock().await;
        if health.offline_until.is_some() {
            info!("VenueBreaker: '{}' is back online", self.venue);
        }
        health.consecutive_failures = 0;
        health.offline_until = None;
        health.probe_in_flight = false;
    }

    pub async fn record_failure(&self) {
        let mut health = self.health.lock().await;
        health.consecutive_failures += 1;

        if health.probe_in_flight {
            // The probe died; stay dark for another full window.
            health.probe_in_flight = false;
            health.offline_until = Some(Instant::now() + OFFLINE_WINDOW);
            warn!(
                "VenueBreaker: probe to '{}' failed; offline for another {:?}",
                self.venue, OFFLINE_WINDOW
            );
            return;
        }

        if health.offline_until.is_none()
            && health.consecutive_failures >= TRIP_AFTER_FAILURES
        {
            health.offline_until = Some(Instant::now() + OFFLINE_WINDOW);
            warn!(
                "VenueBreaker: '{}' offline after {} consecutive submission failures",
                self.venue, health.consecutive_failures
            );
        }
    }

    pub async fn is_offline(&self) -> bool {
        match self.health.lock().await.offline_until {
            Some(until) => Instant::now() < until,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corr() -> Uuid {
        Uuid::new_v4()
    }

    #[tokio::test]
    async fn test_stays_online_below_the_streak() {
        let breaker = VenueBreaker::new("valr");
        for _ in 0..4 {
            breaker.record_failure().await;
        }
        assert!(breaker.admit(corr()).await.is_ok());
        assert!(!breaker.is_offline().await);
    }

    #[tokio::test]
    async fn test_success_resets_the_streak() {
        let breaker = VenueBreaker::new("valr");
        for _ in 0..4 {
            breaker.record_failure().await;
        }
        breaker.record_success().await;
        for _ in 0..4 {
            breaker.record_failure().await;
        }
        assert!(breaker.admit(corr()).await.is_ok());
    }

    #[tokio::test]
    async fn test_fifth_failure_takes_venue_offline() {
        let breaker = VenueBreaker::new("valr");
        for _ in 0..5 {
            breaker.record_failure().await;
        }

        let err = breaker.admit(corr()).await.unwrap_err();
        assert_eq!(err.venue, "valr");
        assert!(err.retry_in > Duration::ZERO);
        assert!(breaker.is_offline().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_probe_after_window() {
        let breaker = VenueBreaker::new("valr");
        for _ in 0..5 {
            breaker.record_failure().await;
        }

        tokio::time::advance(OFFLINE_WINDOW + Duration::from_secs(1)).await;

        // First caller gets the probe slot, the second keeps waiting.
        assert!(breaker.admit(corr()).await.is_ok());
        assert!(breaker.admit(corr()).await.is_err());

        breaker.record_success().await;
        assert!(breaker.admit(corr()).await.is_ok());
        assert!(!breaker.is_offline().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_probe_restarts_the_window() {
        let breaker = VenueBreaker::new("valr");
        for _ in 0..5 {
            breaker.record_failure().await;
        }

        tokio::time::advance(OFFLINE_WINDOW + Duration::from_secs(1)).await;
        assert!(breaker.admit(corr()).await.is_ok());
        breaker.record_failure().await;

        // Dark again for a fresh window.
        assert!(breaker.admit(corr()).await.is_err());
        tokio::time::advance(OFFLINE_WINDOW + Duration::from_secs(1)).await;
        assert!(breaker.admit(corr()).await.is_ok());
    }
}
