//! Metrics collection using Prometheus
//!
//! This module provides metrics for the queue, ready checks, match
//! provisioning and message handling.

use crate::types::{FormationKind, MatchStatus};
use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the matchmaking service
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Service-level metrics
    service_metrics: ServiceMetrics,

    /// Queue membership metrics
    queue_metrics: QueueMetrics,

    /// Ready check metrics
    ready_check_metrics: ReadyCheckMetrics,

    /// Match and provisioning metrics
    match_metrics: MatchMetrics,

    /// Performance metrics
    performance_metrics: PerformanceMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Total AMQP messages processed
    pub amqp_messages_total: IntCounterVec,

    /// AMQP message processing errors
    pub amqp_errors_total: IntCounterVec,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,
}

/// Queue membership metrics
#[derive(Clone)]
pub struct QueueMetrics {
    /// Players currently queued
    pub queue_size: IntGauge,

    /// Join attempts by result
    pub joins_total: IntCounterVec,

    /// Players who left the queue
    pub leaves_total: IntCounter,

    /// Time spent queued before a match formed
    pub queue_wait_time_seconds: Histogram,
}

/// Ready check metrics
#[derive(Clone)]
pub struct ReadyCheckMetrics {
    pub ready_checks_started_total: IntCounter,

    /// Ready checks ended, by outcome (completed, timeout, forced, reset)
    pub ready_check_outcomes_total: IntCounterVec,

    pub ready_check_active: IntGauge,
}

/// Match and provisioning metrics
#[derive(Clone)]
pub struct MatchMetrics {
    /// Matches formed by kind (ready_check, forced)
    pub matches_formed_total: IntCounterVec,

    /// 1 while a match is in flight
    pub match_in_progress: IntGauge,

    pub matches_completed_total: IntCounterVec,

    /// Time from server request to public address
    pub provisioning_duration_seconds: Histogram,

    pub provisioning_failures_total: IntCounterVec,
}

/// Performance metrics
#[derive(Clone)]
pub struct PerformanceMetrics {
    /// Gateway command processing time
    pub command_processing_duration: HistogramVec,

    /// AMQP operation durations
    pub amqp_operation_duration: HistogramVec,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let queue_metrics = QueueMetrics::new(&registry)?;
        let ready_check_metrics = ReadyCheckMetrics::new(&registry)?;
        let match_metrics = MatchMetrics::new(&registry)?;
        let performance_metrics = PerformanceMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            queue_metrics,
            ready_check_metrics,
            match_metrics,
            performance_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    pub fn queue(&self) -> &QueueMetrics {
        &self.queue_metrics
    }

    pub fn ready_check(&self) -> &ReadyCheckMetrics {
        &self.ready_check_metrics
    }

    pub fn matches(&self) -> &MatchMetrics {
        &self.match_metrics
    }

    pub fn performance(&self) -> &PerformanceMetrics {
        &self.performance_metrics
    }

    /// Record a join attempt and the resulting queue size
    pub fn record_join(&self, result: &str, queue_size: usize) {
        self.queue_metrics
            .joins_total
            .with_label_values(&[result])
            .inc();
        self.set_queue_size(queue_size);
    }

    /// Record a player leaving the queue
    pub fn record_leave(&self, queue_size: usize) {
        self.queue_metrics.leaves_total.inc();
        self.set_queue_size(queue_size);
    }

    pub fn set_queue_size(&self, queue_size: usize) {
        self.queue_metrics.queue_size.set(queue_size as i64);
    }

    pub fn record_ready_check_started(&self) {
        self.ready_check_metrics.ready_checks_started_total.inc();
        self.ready_check_metrics.ready_check_active.set(1);
    }

    /// Record how a ready check ended
    pub fn record_ready_check_ended(&self, outcome: &str) {
        self.ready_check_metrics
            .ready_check_outcomes_total
            .with_label_values(&[outcome])
            .inc();
        self.ready_check_metrics.ready_check_active.set(0);
    }

    /// Record a formed match along with how long each player waited
    pub fn record_match_formed(&self, kind: FormationKind, wait_seconds: &[f64]) {
        let kind_str = match kind {
            FormationKind::ReadyCheck => "ready_check",
            FormationKind::Forced => "forced",
        };

        self.match_metrics
            .matches_formed_total
            .with_label_values(&[kind_str])
            .inc();
        self.match_metrics.match_in_progress.set(1);

        for wait in wait_seconds {
            self.queue_metrics.queue_wait_time_seconds.observe(*wait);
        }
    }

    pub fn set_match_in_progress(&self, in_progress: bool) {
        self.match_metrics
            .match_in_progress
            .set(if in_progress { 1 } else { 0 });
    }

    /// Record a successful server provisioning
    pub fn record_provisioning_success(&self, duration: Duration) {
        self.match_metrics
            .provisioning_duration_seconds
            .observe(duration.as_secs_f64());
    }

    /// Record a failed server provisioning
    pub fn record_provisioning_failure(&self, reason: &str) {
        self.match_metrics
            .provisioning_failures_total
            .with_label_values(&[reason])
            .inc();
    }

    pub fn record_match_completed(&self, status: MatchStatus) {
        self.match_metrics
            .matches_completed_total
            .with_label_values(&[&status.to_string()])
            .inc();
    }

    /// Record gateway command processing time
    pub fn record_command(&self, command: &str, duration: Duration) {
        self.performance_metrics
            .command_processing_duration
            .with_label_values(&[command])
            .observe(duration.as_secs_f64());
    }

    /// Record AMQP operation
    pub fn record_amqp_operation(&self, operation: &str, success: bool, duration: Duration) {
        let status = if success { "success" } else { "error" };

        self.service_metrics
            .amqp_messages_total
            .with_label_values(&[operation, status])
            .inc();

        if !success {
            self.service_metrics
                .amqp_errors_total
                .with_label_values(&[operation])
                .inc();
        }

        self.performance_metrics
            .amqp_operation_duration
            .with_label_values(&[operation, status])
            .observe(duration.as_secs_f64());
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("pug_queue_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let amqp_messages_total = IntCounterVec::new(
            Opts::new(
                "pug_queue_amqp_messages_total",
                "Total AMQP messages processed",
            ),
            &["operation", "status"],
        )?;
        registry.register(Box::new(amqp_messages_total.clone()))?;

        let amqp_errors_total = IntCounterVec::new(
            Opts::new("pug_queue_amqp_errors_total", "Total AMQP errors"),
            &["operation"],
        )?;
        registry.register(Box::new(amqp_errors_total.clone()))?;

        let health_status = IntGauge::new(
            "pug_queue_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("pug_queue_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        Ok(Self {
            uptime_seconds,
            amqp_messages_total,
            amqp_errors_total,
            health_status,
            component_health,
        })
    }
}

impl QueueMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let queue_size = IntGauge::new("pug_queue_size", "Players currently queued")?;
        registry.register(Box::new(queue_size.clone()))?;

        let joins_total = IntCounterVec::new(
            Opts::new("pug_queue_joins_total", "Join attempts by result"),
            &["result"],
        )?;
        registry.register(Box::new(joins_total.clone()))?;

        let leaves_total = IntCounter::new("pug_queue_leaves_total", "Players who left the queue")?;
        registry.register(Box::new(leaves_total.clone()))?;

        let queue_wait_time_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "pug_queue_wait_time_seconds",
                "Time queued before a match formed",
            )
            .buckets(vec![10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1200.0, 3600.0]),
        )?;
        registry.register(Box::new(queue_wait_time_seconds.clone()))?;

        Ok(Self {
            queue_size,
            joins_total,
            leaves_total,
            queue_wait_time_seconds,
        })
    }
}

impl ReadyCheckMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let ready_checks_started_total = IntCounter::new(
            "pug_queue_ready_checks_started_total",
            "Ready checks started",
        )?;
        registry.register(Box::new(ready_checks_started_total.clone()))?;

        let ready_check_outcomes_total = IntCounterVec::new(
            Opts::new(
                "pug_queue_ready_check_outcomes_total",
                "Ready checks ended by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(ready_check_outcomes_total.clone()))?;

        let ready_check_active = IntGauge::new(
            "pug_queue_ready_check_active",
            "Whether a ready check is running",
        )?;
        registry.register(Box::new(ready_check_active.clone()))?;

        Ok(Self {
            ready_checks_started_total,
            ready_check_outcomes_total,
            ready_check_active,
        })
    }
}

impl MatchMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let matches_formed_total = IntCounterVec::new(
            Opts::new("pug_queue_matches_formed_total", "Matches formed"),
            &["kind"],
        )?;
        registry.register(Box::new(matches_formed_total.clone()))?;

        let match_in_progress = IntGauge::new(
            "pug_queue_match_in_progress",
            "Whether a match is in flight",
        )?;
        registry.register(Box::new(match_in_progress.clone()))?;

        let matches_completed_total = IntCounterVec::new(
            Opts::new("pug_queue_matches_completed_total", "Matches closed out"),
            &["status"],
        )?;
        registry.register(Box::new(matches_completed_total.clone()))?;

        let provisioning_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "pug_queue_provisioning_duration_seconds",
                "Time from server request to public address",
            )
            .buckets(vec![5.0, 15.0, 30.0, 60.0, 120.0, 180.0, 300.0, 600.0]),
        )?;
        registry.register(Box::new(provisioning_duration_seconds.clone()))?;

        let provisioning_failures_total = IntCounterVec::new(
            Opts::new(
                "pug_queue_provisioning_failures_total",
                "Server provisioning failures",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(provisioning_failures_total.clone()))?;

        Ok(Self {
            matches_formed_total,
            match_in_progress,
            matches_completed_total,
            provisioning_duration_seconds,
            provisioning_failures_total,
        })
    }
}

impl PerformanceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let command_processing_duration = HistogramVec::new(
            HistogramOpts::new(
                "pug_queue_command_processing_duration_seconds",
                "Gateway command processing time",
            )
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5]),
            &["command"],
        )?;
        registry.register(Box::new(command_processing_duration.clone()))?;

        let amqp_operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "pug_queue_amqp_operation_duration_seconds",
                "AMQP operation duration",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["operation", "status"],
        )?;
        registry.register(Box::new(amqp_operation_duration.clone()))?;

        Ok(Self {
            command_processing_duration,
            amqp_operation_duration,
        })
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new().expect("Failed to create default metrics collector")
    }
}
