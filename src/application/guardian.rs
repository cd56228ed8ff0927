//! Guardian hard stop.
//!
//! Sole owner of the process-wide SYSTEM_LOCKED flag. A daily equity loss at
//! or beyond the configured limit engages the lock atomically, persists a
//! durable record and fans the event out to every observer before
//! `check_vitals` returns; the lock survives restarts via
//! [`Guardian::restore`]. Manual unlock requires a non-empty reason and is
//! audit-logged; if the loss condition still holds, the next vitals check
//! re-locks immediately.

use crate::domain::audit::AuditRecord;
use crate::domain::events::TradingEvent;
use crate::domain::guardian::{GuardianLock, LockReason, VitalsReport};
use crate::domain::money::{self, PERCENT_SCALE, ZAR_SCALE};
use crate::domain::repositories::{AuditLog, GuardianLockRepository};
use crate::infrastructure::EventBus;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Observer invoked synchronously inside the lock-transition critical
/// section: every observer has seen the lock before any new permit can be
/// issued.
#[async_trait]
pub trait LockObserver: Send + Sync {
    async fn on_guardian_lock(&self, lock: &GuardianLock);
}

struct DayAnchor {
    date: NaiveDate,
    starting_equity: Decimal,
}

pub struct Guardian {
    locked: AtomicBool,
    daily_loss_limit_pct: Decimal,
    lock_repo: Arc<dyn GuardianLockRepository>,
    audit: Arc<dyn AuditLog>,
    bus: EventBus,
    /// Starting equity of the current UTC day, set on first observation.
    day_anchor: Mutex<Option<DayAnchor>>,
    /// Observers are invoked serially under this mutex, which is also held
    /// across the whole lock transition.
    observers: Mutex<Vec<Arc<dyn LockObserver>>>,
}

impl Guardian {
    /// Construct and rehydrate from the persisted lock record, if any.
    pub async fn restore(
        daily_loss_limit_pct: Decimal,
        lock_repo: Arc<dyn GuardianLockRepository>,
        audit: Arc<dyn AuditLog>,
        bus: EventBus,
    ) -> Result<Self> {
        let guardian = Self {
            locked: AtomicBool::new(false),
            daily_loss_limit_pct,
            lock_repo,
            audit,
            bus,
            day_anchor: Mutex::new(None),
            observers: Mutex::new(Vec::new()),
        };

        if let Some(lock) = guardian.lock_repo.load().await? {
            guardian.locked.store(true, Ordering::SeqCst);
            warn!(
                "Guardian: restored persisted lock {} ({}, loss {}%)",
                lock.lock_id,
                lock.reason,
                lock.daily_loss_pct * Decimal::ONE_HUNDRED
            );
        }

        Ok(guardian)
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    pub async fn on_lock(&self, observer: Arc<dyn LockObserver>) {
        self.observers.lock().await.push(observer);
    }

    /// Run one vitals check against a fresh equity snapshot.
    ///
    /// The first observation of each UTC day anchors that day's starting
    /// equity; later checks compare against it.
    pub async fn check_vitals(
        &self,
        current_equity: Decimal,
        correlation_id: Option<Uuid>,
    ) -> Result<VitalsReport> {
        let today = Utc::now().date_naive();
        let starting_equity = {
            let mut anchor = self.day_anchor.lock().await;
            match anchor.as_ref() {
                Some(a) if a.date == today => a.starting_equity,
                _ => {
                    *anchor = Some(DayAnchor {
                        date: today,
                        starting_equity: current_equity,
                    });
                    current_equity
                }
            }
        };

        let daily_loss_zar =
            money::quantize(starting_equity - current_equity, ZAR_SCALE);
        let daily_loss_pct = if starting_equity > Decimal::ZERO {
            money::quantize(
                (starting_equity - current_equity) / starting_equity,
                PERCENT_SCALE,
            )
        } else {
            Decimal::ZERO
        };

        let mut report = VitalsReport {
            checked_at: Utc::now(),
            starting_equity_zar: starting_equity,
            current_equity_zar: current_equity,
            daily_loss_zar,
            daily_loss_pct,
            locked: self.is_locked(),
            lock: None,
        };

        if daily_loss_pct >= self.daily_loss_limit_pct {
            let lock = self
                .engage(
                    LockReason::DailyLossExceeded,
                    daily_loss_zar,
                    daily_loss_pct,
                    correlation_id,
                )
                .await?;
            report.locked = true;
            report.lock = lock;
        }

        Ok(report)
    }

    /// Engage the hard stop. Compare-and-set guarantees the transition runs
    /// exactly once; the loser of a race simply observes `locked`.
    async fn engage(
        &self,
        reason: LockReason,
        daily_loss_zar: Decimal,
        daily_loss_pct: Decimal,
        correlation_id: Option<Uuid>,
    ) -> Result<Option<GuardianLock>> {
        if self
            .locked
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(None);
        }

        let lock = GuardianLock {
            lock_id: Uuid::new_v4(),
            locked_at: Utc::now(),
            reason,
            daily_loss_zar,
            daily_loss_pct,
            correlation_id,
        };

        error!(
            "Guardian: SYSTEM LOCKED ({reason}, loss R{daily_loss_zar} / {}%)",
            daily_loss_pct * Decimal::ONE_HUNDRED
        );

        self.lock_repo.save(&lock).await?;
        self.audit
            .append(
                &AuditRecord::new(
                    correlation_id.unwrap_or_else(Uuid::new_v4),
                    "guardian",
                    "GUARDIAN_LOCK",
                    "LOCKED",
                )
                .with_context(serde_json::json!({
                    "reason": lock.reason.to_string(),
                    "daily_loss_zar": money::canonical_string(daily_loss_zar),
                    "daily_loss_pct": money::canonical_string(daily_loss_pct),
                })),
            )
            .await?;

        // Observers run serially inside the transition: no new permit can be
        // issued until each has seen the lock.
        let observers = self.observers.lock().await;
        for observer in observers.iter() {
            observer.on_guardian_lock(&lock).await;
        }
        drop(observers);

        self.bus
            .publish(TradingEvent::GuardianLocked { lock: lock.clone() })
            .await;

        Ok(Some(lock))
    }

    /// Engage the hard stop manually (panic button).
    pub async fn panic_lock(&self, correlation_id: Uuid) -> Result<bool> {
        Ok(self
            .engage(LockReason::Panic, Decimal::ZERO, Decimal::ZERO, Some(correlation_id))
            .await?
            .is_some())
    }

    /// Clear the hard stop. Refused without a reason; the clear is audited.
    pub async fn manual_unlock(
        &self,
        actor: &str,
        reason: &str,
        correlation_id: Uuid,
    ) -> Result<bool> {
        if reason.trim().is_empty() {
            warn!("Guardian: manual unlock refused (empty reason)");
            return Ok(false);
        }
        if !self.is_locked() {
            return Ok(false);
        }

        self.lock_repo.clear().await?;
        self.locked.store(false, Ordering::SeqCst);

        self.audit
            .append(
                &AuditRecord::new(correlation_id, actor, "GUARDIAN_UNLOCK", "UNLOCKED")
                    .with_context(serde_json::json!({ "reason": reason })),
            )
            .await?;
        self.bus
            .publish(TradingEvent::GuardianUnlocked {
                actor: actor.to_string(),
                reason: reason.to_string(),
                correlation_id,
            })
            .await;

        info!("Guardian: unlocked by {actor} ({reason})");
        Ok(true)
    }
}
