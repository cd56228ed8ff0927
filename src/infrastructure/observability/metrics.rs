//! Prometheus metrics definitions.
//!
//! The only place in the system where financial values become floats: at
//! exposition, after all decimal arithmetic is done.

use prometheus::{
    Gauge, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Signals accepted by the webhook
    pub signals_received_total: IntCounter,
    /// Signals that reached the exchange
    pub signals_executed_total: IntCounter,
    /// Current account equity in ZAR
    pub equity_zar: Gauge,
    /// Fill slippage per reconciliation, percent
    pub slippage_pct: Histogram,
    /// Rolling expectancy over closed trades, ZAR
    pub expectancy: Gauge,
    /// HITL approval requests created
    pub hitl_requests_total: IntCounter,
    /// HITL approvals
    pub hitl_approvals_total: IntCounter,
    /// HITL rejections by reason
    pub hitl_rejections_total: IntCounterVec,
    /// HITL rejections due to expiry
    pub hitl_rejections_timeout_total: IntCounter,
    /// Seconds from request creation to operator decision
    pub hitl_response_latency_seconds: Histogram,
    /// Requests refused because the Guardian was locked
    pub blocked_by_guardian_total: IntCounter,
    /// Last trust probability served
    pub rgi_trust_probability: Gauge,
    /// Adjusted confidence distribution
    pub rgi_adjusted_confidence: Histogram,
    /// Safe mode latch (0/1)
    pub rgi_safe_mode_active: Gauge,
    /// Trust table availability (0/1)
    pub rgi_model_loaded: Gauge,
}

impl Metrics {
    /// Create a new Metrics instance with all series registered
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let signals_received_total = IntCounter::with_opts(Opts::new(
            "signals_received_total",
            "Signals accepted by the webhook",
        ))?;
        registry.register(Box::new(signals_received_total.clone()))?;

        let signals_executed_total = IntCounter::with_opts(Opts::new(
            "signals_executed_total",
            "Signals that reached the exchange",
        ))?;
        registry.register(Box::new(signals_executed_total.clone()))?;

        let equity_zar =
            Gauge::with_opts(Opts::new("equity_zar", "Current account equity in ZAR"))?;
        registry.register(Box::new(equity_zar.clone()))?;

        let slippage_pct = Histogram::with_opts(
            HistogramOpts::new("slippage_pct", "Fill slippage per reconciliation in percent")
                .buckets(vec![0.0, 0.05, 0.1, 0.2, 0.3, 0.5, 0.75, 1.0, 2.0]),
        )?;
        registry.register(Box::new(slippage_pct.clone()))?;

        let expectancy = Gauge::with_opts(Opts::new(
            "expectancy",
            "Rolling expectancy over closed trades in ZAR",
        ))?;
        registry.register(Box::new(expectancy.clone()))?;

        let hitl_requests_total = IntCounter::with_opts(Opts::new(
            "hitl_requests_total",
            "HITL approval requests created",
        ))?;
        registry.register(Box::new(hitl_requests_total.clone()))?;

        let hitl_approvals_total =
            IntCounter::with_opts(Opts::new("hitl_approvals_total", "HITL approvals"))?;
        registry.register(Box::new(hitl_approvals_total.clone()))?;

        let hitl_rejections_total = IntCounterVec::new(
            Opts::new("hitl_rejections_total", "HITL rejections by reason"),
            &["reason"],
        )?;
        registry.register(Box::new(hitl_rejections_total.clone()))?;

        let hitl_rejections_timeout_total = IntCounter::with_opts(Opts::new(
            "hitl_rejections_timeout_total",
            "HITL rejections due to expiry",
        ))?;
        registry.register(Box::new(hitl_rejections_timeout_total.clone()))?;

        let hitl_response_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "hitl_response_latency_seconds",
                "Seconds from request creation to operator decision",
            )
            .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0]),
        )?;
        registry.register(Box::new(hitl_response_latency_seconds.clone()))?;

        let blocked_by_guardian_total = IntCounter::with_opts(Opts::new(
            "blocked_by_guardian_total",
            "Requests refused because the Guardian was locked",
        ))?;
        registry.register(Box::new(blocked_by_guardian_total.clone()))?;

        let rgi_trust_probability = Gauge::with_opts(Opts::new(
            "rgi_trust_probability",
            "Last trust probability served",
        ))?;
        registry.register(Box::new(rgi_trust_probability.clone()))?;

        let rgi_adjusted_confidence = Histogram::with_opts(
            HistogramOpts::new(
                "rgi_adjusted_confidence",
                "Adjusted confidence distribution",
            )
            .buckets(vec![0.1, 0.25, 0.5, 0.75, 0.9, 0.95, 0.99, 1.0]),
        )?;
        registry.register(Box::new(rgi_adjusted_confidence.clone()))?;

        let rgi_safe_mode_active = Gauge::with_opts(Opts::new(
            "rgi_safe_mode_active",
            "Safe mode latch (0/1)",
        ))?;
        registry.register(Box::new(rgi_safe_mode_active.clone()))?;

        let rgi_model_loaded = Gauge::with_opts(Opts::new(
            "rgi_model_loaded",
            "Trust table availability (0/1)",
        ))?;
        registry.register(Box::new(rgi_model_loaded.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            signals_received_total,
            signals_executed_total,
            equity_zar,
            slippage_pct,
            expectancy,
            hitl_requests_total,
            hitl_approvals_total,
            hitl_rejections_total,
            hitl_rejections_timeout_total,
            hitl_response_latency_seconds,
            blocked_by_guardian_total,
            rgi_trust_probability,
            rgi_adjusted_confidence,
            rgi_safe_mode_active,
            rgi_model_loaded,
        })
    }

    /// Text exposition for the /metrics endpoint.
    pub fn encode(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        Ok(encoder.encode_to_string(&self.registry.gather())?)
    }
}
