//! Health checks for the queue service
//!
//! [`ServiceProbe`] is a cheap, cloneable view over the running components
//! that the HTTP health endpoints query.

use crate::amqp::AmqpConnection;
use crate::orchestrator::MatchOrchestrator;
use crate::queue::{MatchmakingQueue, QueueStats};
use crate::types::{MatchRecord, QueueSnapshot};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::error;

/// Health check status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Gauge value used by the service health metric
    pub fn as_gauge(self) -> u8 {
        match self {
            HealthStatus::Healthy => 2,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 0,
        }
    }

    fn worst(self, other: HealthStatus) -> HealthStatus {
        if self.as_gauge() <= other.as_gauge() {
            self
        } else {
            other
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "✅ healthy"),
            HealthStatus::Degraded => write!(f, "⚠️  degraded"),
            HealthStatus::Unhealthy => write!(f, "❌ unhealthy"),
        }
    }
}

/// Handles to the components health checks look at
#[derive(Clone)]
pub struct ServiceProbe {
    service_name: String,
    queue: MatchmakingQueue,
    orchestrator: Arc<MatchOrchestrator>,
    amqp: Option<Arc<AmqpConnection>>,
    is_running: Arc<RwLock<bool>>,
    started_at: DateTime<Utc>,
}

impl ServiceProbe {
    pub fn new(
        service_name: impl Into<String>,
        orchestrator: Arc<MatchOrchestrator>,
        is_running: Arc<RwLock<bool>>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            queue: orchestrator.queue().clone(),
            orchestrator,
            amqp: None,
            is_running,
            started_at: Utc::now(),
        }
    }

    pub fn with_amqp(mut self, connection: Arc<AmqpConnection>) -> Self {
        self.amqp = Some(connection);
        self
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds().max(0)
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: HealthStatus,
    pub service: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub checks: Vec<ComponentCheck>,
    pub stats: Option<ServiceStats>,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    pub name: String,
    pub status: HealthStatus,
    pub message: Option<String>,
    pub duration_ms: u64,
}

/// Queue and match state reported by `/stats`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStats {
    pub queue: QueueSnapshot,
    pub totals: QueueStats,
    pub active_match: Option<MatchRecord>,
    pub uptime_seconds: i64,
}

impl HealthCheck {
    /// Full health check with per-component results
    pub async fn check(probe: &ServiceProbe) -> Result<Self> {
        let checks = vec![
            Self::check_service_running(probe).await,
            Self::check_queue(probe),
            Self::check_amqp(probe),
        ];

        let status = checks
            .iter()
            .fold(HealthStatus::Healthy, |acc, check| acc.worst(check.status));

        Ok(HealthCheck {
            status,
            service: probe.service_name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: Utc::now(),
            checks,
            stats: Self::gather_service_stats(probe),
        })
    }

    /// Liveness only asks whether the service thinks it is running
    pub async fn liveness_check(probe: &ServiceProbe) -> Result<HealthStatus> {
        Ok(if probe.is_running().await {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        })
    }

    /// Readiness also needs the queue and broker to be usable
    pub async fn readiness_check(probe: &ServiceProbe) -> Result<HealthStatus> {
        if !probe.is_running().await {
            return Ok(HealthStatus::Unhealthy);
        }
        Ok(Self::check_queue(probe)
            .status
            .worst(Self::check_amqp(probe).status))
    }

    async fn check_service_running(probe: &ServiceProbe) -> ComponentCheck {
        let start = std::time::Instant::now();
        let (status, message) = if probe.is_running().await {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        };

        ComponentCheck {
            name: "service_running".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn check_queue(probe: &ServiceProbe) -> ComponentCheck {
        let start = std::time::Instant::now();
        let (status, message) = match probe.queue.status() {
            Ok(_) => (HealthStatus::Healthy, None),
            Err(e) => {
                error!("Queue health check failed: {}", e);
                (HealthStatus::Unhealthy, Some(e.to_string()))
            }
        };

        ComponentCheck {
            name: "queue".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn check_amqp(probe: &ServiceProbe) -> ComponentCheck {
        let start = std::time::Instant::now();
        let (status, message) = match &probe.amqp {
            Some(connection) if connection.is_alive() => (HealthStatus::Healthy, None),
            Some(_) => (
                HealthStatus::Unhealthy,
                Some("AMQP connection closed".to_string()),
            ),
            None => (
                HealthStatus::Degraded,
                Some("No AMQP connection attached".to_string()),
            ),
        };

        ComponentCheck {
            name: "amqp_connection".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn gather_service_stats(probe: &ServiceProbe) -> Option<ServiceStats> {
        let queue = probe.queue.status().ok()?;
        let totals = probe.queue.stats().ok()?;
        let active_match = probe.orchestrator.active_match().ok()?;
        Some(ServiceStats {
            queue,
            totals,
            active_match,
            uptime_seconds: probe.uptime_seconds(),
        })
    }
}
