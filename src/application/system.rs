//! Application wiring and supervision.
//!
//! Components are constructed leaves-first: database, repositories, metrics,
//! event bus, Guardian, circuit breaker, policy, trust governor, HITL
//! gateway, order manager, pipeline. `start` recovers persisted approvals,
//! runs one vitals pass and then spawns the supervised workers. A worker
//! that dies is respawned with exponential backoff capped at 30 seconds; a
//! single service failure never takes down the process.

use anyhow::Result;
use rust_decimal_macros::dec;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::application::circuit_breaker::TradingCircuitBreaker;
use crate::application::guardian::Guardian;
use crate::application::hitl::{ExpiryWorker, HitlConfig, HitlGateway};
use crate::application::order_manager::OrderManager;
use crate::application::pipeline::SignalPipeline;
use crate::application::policy::PermissionPolicy;
use crate::application::rgi::{RewardGovernor, TrustAggregator};
use crate::application::risk_governor::RiskGovernor;
use crate::config::Config;
use crate::domain::audit::AuditRecord;
use crate::domain::events::LoggingListener;
use crate::domain::ports::{EquityService, ExchangeService, MarketSnapshotService};
use crate::domain::repositories::{AuditLog, SignalRepository};
use crate::domain::signal::Signal;
use crate::infrastructure::EventBus;
use crate::infrastructure::exchange::{
    MockEquityService, MockExchangeService, MockMarketService, ValrExchangeService,
};
use crate::infrastructure::notifier::DiscordNotifier;
use crate::infrastructure::observability::Metrics;
use crate::infrastructure::persistence::Database;
use crate::infrastructure::persistence::repositories::{
    SqliteApprovalRepository, SqliteAuditLog, SqliteClosedTradeRepository,
    SqliteGuardianLockRepository, SqliteLearningEventRepository, SqliteSignalRepository,
    SqliteTrustStateRepository,
};
use rust_decimal::prelude::ToPrimitive;

const SUPERVISOR_BACKOFF_CAP: Duration = Duration::from_secs(30);

pub struct Application {
    pub config: Config,
    pub bus: EventBus,
    pub metrics: Metrics,
    pub guardian: Arc<Guardian>,
    pub policy: Arc<PermissionPolicy>,
    pub hitl: Arc<HitlGateway>,
    pub pipeline: Arc<SignalPipeline>,
    pub aggregator: Arc<TrustAggregator>,
    pub signals: Arc<dyn SignalRepository>,
    pub audit: Arc<dyn AuditLog>,
    pub equity: Arc<dyn EquityService>,
}

pub struct SystemHandle {
    pub signal_tx: mpsc::Sender<Signal>,
    pub shutdown_tx: watch::Sender<bool>,
}

impl Application {
    pub async fn build(config: Config) -> Result<Self> {
        info!(
            "Building application (mock_mode={}, hitl_enabled={})...",
            config.mock_mode, config.hitl_enabled
        );

        // 1. Persistence.
        let db = Database::new(&config.database_url).await?;
        let signals: Arc<dyn SignalRepository> =
            Arc::new(SqliteSignalRepository::new(db.clone()));
        let approvals = Arc::new(SqliteApprovalRepository::new(db.clone()));
        let audit: Arc<dyn AuditLog> = Arc::new(SqliteAuditLog::new(db.clone()));
        let trades = Arc::new(SqliteClosedTradeRepository::new(db.clone()));
        let lock_repo = Arc::new(SqliteGuardianLockRepository::new(db.clone()));
        let trust_repo = Arc::new(SqliteTrustStateRepository::new(db.clone()));
        let learning = Arc::new(SqliteLearningEventRepository::new(db.clone()));

        // 2. Observability and events.
        let metrics = Metrics::new()?;
        let bus = EventBus::new();
        bus.subscribe(Arc::new(LoggingListener)).await;
        if let Some(url) = &config.discord_webhook_url {
            bus.subscribe(Arc::new(DiscordNotifier::new(url.clone()))).await;
        }

        // 3. Safety services.
        let guardian = Arc::new(
            Guardian::restore(
                config.guardian_daily_loss_limit_pct,
                lock_repo,
                audit.clone(),
                bus.clone(),
            )
            .await?,
        );
        let breaker = Arc::new(TradingCircuitBreaker::new(trades.clone()));
        let policy = Arc::new(PermissionPolicy::new(audit.clone(), bus.clone()));
        let risk = RiskGovernor::from_config(&config);
        let rgi = Arc::new(RewardGovernor::new(trust_repo.clone(), metrics.clone()));
        let aggregator = Arc::new(TrustAggregator::new(
            learning.clone(),
            trust_repo,
            rgi.clone(),
        ));

        // 4. Venue adapters.
        let (exchange, equity, market): (
            Arc<dyn ExchangeService>,
            Arc<dyn EquityService>,
            Arc<dyn MarketSnapshotService>,
        ) = if config.mock_mode {
            (
                Arc::new(MockExchangeService::new()),
                Arc::new(MockEquityService::new(dec!(100000.00))),
                Arc::new(MockMarketService::new(dec!(1850000.00))),
            )
        } else {
            let valr = Arc::new(ValrExchangeService::new(
                config.exchange_base_url.clone(),
                config.exchange_api_key.clone(),
                config.exchange_api_secret.clone(),
            ));
            (valr.clone(), valr.clone(), valr)
        };

        // 5. HITL gateway, wired into the Guardian lock cascade.
        let hitl = HitlGateway::new(
            HitlConfig::from_config(&config),
            approvals,
            audit.clone(),
            guardian.clone(),
            bus.clone(),
            metrics.clone(),
        );
        guardian.on_lock(hitl.clone()).await;

        // 6. Execution and the pulse.
        let orders = Arc::new(OrderManager::new(
            exchange,
            audit.clone(),
            bus.clone(),
            metrics.clone(),
        ));
        let pipeline = Arc::new(SignalPipeline::new(
            policy.clone(),
            breaker,
            risk,
            rgi,
            hitl.clone(),
            orders,
            guardian.clone(),
            equity.clone(),
            market,
            audit.clone(),
            trades,
            learning,
            metrics.clone(),
            config.guardian_daily_loss_limit_pct,
        ));

        Ok(Self {
            config,
            bus,
            metrics,
            guardian,
            policy,
            hitl,
            pipeline,
            aggregator,
            signals,
            audit,
            equity,
        })
    }

    /// Recover, prime vitals, then start the supervised workers.
    pub async fn start(self: Arc<Self>) -> Result<SystemHandle> {
        let recovery = self.hitl.recover_on_startup().await?;
        info!(
            "Startup recovery: {} recovered, {} corrupt, {} expired",
            recovery.recovered.len(),
            recovery.rejected_corrupt.len(),
            recovery.rejected_expired.len()
        );

        self.run_vitals_once().await;

        let (signal_tx, signal_rx) =
            mpsc::channel::<Signal>(self.config.ingress_queue_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // Ingress consumer: drains the bounded queue the webhook feeds.
        let signal_rx = Arc::new(tokio::sync::Mutex::new(signal_rx));
        {
            let app = Arc::clone(&self);
            let signal_rx = Arc::clone(&signal_rx);
            supervise("pipeline", shutdown_rx.clone(), move |mut shutdown| {
                let app = Arc::clone(&app);
                let signal_rx = Arc::clone(&signal_rx);
                async move {
                    let mut rx = signal_rx.lock().await;
                    loop {
                        tokio::select! {
                            maybe_signal = rx.recv() => {
                                let Some(signal) = maybe_signal else { return };
                                let corr = signal.correlation_id;
                                // A refused or failed signal is Safe-Idle: the
                                // signal dies, the process does not.
                                if let Err(e) = app.pipeline.handle_signal(signal).await {
                                    error!("pipeline [{corr}]: {e:#}");
                                    let record = AuditRecord::new(
                                        corr,
                                        "orchestrator",
                                        "SIGNAL_FAILED",
                                        "CRITICAL",
                                    )
                                    .with_context(serde_json::json!({
                                        "error": format!("{e:#}"),
                                    }));
                                    if let Err(audit_err) = app.audit.append(&record).await {
                                        error!("pipeline [{corr}]: audit append failed: {audit_err:#}");
                                    }
                                }
                            }
                            _ = shutdown.changed() => {
                                if *shutdown.borrow() { return }
                            }
                        }
                    }
                }
            });
        }

        // HITL expiry sweep.
        {
            let hitl = self.hitl.clone();
            supervise("hitl_expiry", shutdown_rx.clone(), move |shutdown| {
                let worker = ExpiryWorker::new(hitl.clone());
                async move { worker.run(shutdown).await }
            });
        }

        // Vitals loop: equity -> Guardian -> pipeline snapshot -> trust
        // aggregation (cold path).
        {
            let app = Arc::clone(&self);
            let interval = Duration::from_secs(self.config.vitals_interval_seconds);
            supervise("vitals", shutdown_rx.clone(), move |mut shutdown| {
                let app = Arc::clone(&app);
                async move {
                    let mut ticker = tokio::time::interval(interval);
                    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                    loop {
                        tokio::select! {
                            _ = ticker.tick() => {
                                app.run_vitals_once().await;
                                if let Err(e) = app.aggregator.aggregate().await {
                                    warn!("vitals: trust aggregation failed: {e}");
                                }
                            }
                            _ = shutdown.changed() => {
                                if *shutdown.borrow() { return }
                            }
                        }
                    }
                }
            });
        }

        info!("Trading system running.");
        Ok(SystemHandle {
            signal_tx,
            shutdown_tx,
        })
    }

    async fn run_vitals_once(&self) {
        let equity = crate::infrastructure::core::retry::with_backoff("vitals_equity", || {
            self.equity.current_equity_zar()
        })
        .await;
        match equity {
            Ok(equity) => {
                self.metrics.equity_zar.set(equity.to_f64().unwrap_or(0.0));
                match self.guardian.check_vitals(equity, None).await {
                    Ok(report) => self.pipeline.update_vitals(report).await,
                    Err(e) => warn!("vitals: guardian check failed: {e}"),
                }
            }
            Err(e) => warn!("vitals: equity snapshot failed: {e}"),
        }
    }
}

/// Keep a worker alive: rerun its future whenever it returns while the
/// shutdown flag is clear, doubling the delay up to the cap.
fn supervise<F, Fut>(name: &'static str, shutdown: watch::Receiver<bool>, factory: F)
where
    F: Fn(watch::Receiver<bool>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut backoff = Duration::from_secs(1);
        loop {
            if *shutdown.borrow() {
                return;
            }
            factory(shutdown.clone()).await;
            if *shutdown.borrow() {
                info!("worker '{name}' stopped (shutdown)");
                return;
            }
            warn!("worker '{name}' terminated unexpectedly; respawning in {backoff:?}");
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(SUPERVISOR_BACKOFF_CAP);
        }
    });
}
