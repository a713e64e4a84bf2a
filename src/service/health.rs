//! Health checks and service statistics
//!
//! Readiness and liveness probes plus the pool statistics served on
//! `/stats`.

use crate::amqp::connection::AmqpConnection;
use crate::pairing::PairingService;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::debug;

/// Health check status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Gauge value for `pairing_room_health_status`
    pub fn as_gauge(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 2,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 0,
        }
    }

    fn worst(self, other: HealthStatus) -> HealthStatus {
        match (self, other) {
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Everything the probes look at, cheap to clone into the HTTP server
#[derive(Clone)]
pub struct HealthContext {
    pub service_name: String,
    pub pairing: Arc<PairingService>,
    pub is_running: Arc<RwLock<bool>>,
    pub amqp: Option<Arc<AmqpConnection>>,
    pub started_at: Instant,
}

impl HealthContext {
    pub fn new(service_name: impl Into<String>, pairing: Arc<PairingService>) -> Self {
        Self {
            service_name: service_name.into(),
            pairing,
            is_running: Arc::new(RwLock::new(false)),
            amqp: None,
            started_at: Instant::now(),
        }
    }

    pub fn with_amqp(mut self, connection: Arc<AmqpConnection>) -> Self {
        self.amqp = Some(connection);
        self
    }

    pub fn with_running_flag(mut self, is_running: Arc<RwLock<bool>>) -> Self {
        self.is_running = is_running;
        self
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: HealthStatus,
    pub service: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub checks: Vec<ComponentCheck>,
    pub stats: ServiceStats,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    pub name: String,
    pub status: HealthStatus,
    /// Why the component is not healthy
    pub message: Option<String>,
    pub duration_ms: u64,
}

/// Waiting parties in one pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStats {
    pub fingerprint: String,
    pub pair_size: usize,
    pub waiting: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceStats {
    pub active_pools: usize,
    pub parties_waiting: usize,
    pub pools: Vec<PoolStats>,
    pub uptime_seconds: u64,
}

impl HealthCheck {
    /// Perform a comprehensive health check of the service
    pub async fn check(context: &HealthContext) -> Result<Self> {
        let checks = vec![
            Self::check_service_running(context).await,
            Self::check_pairing(context),
            Self::check_amqp_health(context),
        ];

        let status = checks
            .iter()
            .fold(HealthStatus::Healthy, |acc, check| acc.worst(check.status));

        Ok(HealthCheck {
            status,
            service: context.service_name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            checks,
            stats: Self::gather_service_stats(context),
        })
    }

    /// Simple liveness check - just verify service is running
    pub async fn liveness_check(context: &HealthContext) -> Result<HealthStatus> {
        if context.is_running().await {
            Ok(HealthStatus::Healthy)
        } else {
            Ok(HealthStatus::Unhealthy)
        }
    }

    /// Readiness check - verify service can handle requests
    pub async fn readiness_check(context: &HealthContext) -> Result<HealthStatus> {
        if !context.is_running().await {
            return Ok(HealthStatus::Unhealthy);
        }

        Ok(Self::check_pairing(context)
            .status
            .worst(Self::check_amqp_health(context).status))
    }

    async fn check_service_running(context: &HealthContext) -> ComponentCheck {
        let start = Instant::now();

        let (status, message) = if context.is_running().await {
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

    fn check_pairing(context: &HealthContext) -> ComponentCheck {
        let start = Instant::now();

        let (status, message) = match context.pairing.registry().len() {
            Ok(_) => (HealthStatus::Healthy, None),
            Err(e) => (
                HealthStatus::Unhealthy,
                Some(format!("Pool registry unavailable: {}", e)),
            ),
        };

        ComponentCheck {
            name: "pool_registry".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn check_amqp_health(context: &HealthContext) -> ComponentCheck {
        let start = Instant::now();

        let (status, message) = match &context.amqp {
            Some(connection) if connection.is_alive() => (HealthStatus::Healthy, None),
            Some(_) => (
                HealthStatus::Unhealthy,
                Some("AMQP connection is closed".to_string()),
            ),
            None => (
                HealthStatus::Degraded,
                Some("No broker connection".to_string()),
            ),
        };

        ComponentCheck {
            name: "amqp_connection".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn gather_service_stats(context: &HealthContext) -> ServiceStats {
        let uptime_seconds = context.started_at.elapsed().as_secs();

        let pools = match context.pairing.registry().pools() {
            Ok(pools) => pools,
            Err(e) => {
                debug!("Failed to list pools for stats: {}", e);
                return ServiceStats {
                    uptime_seconds,
                    ..ServiceStats::default()
                };
            }
        };

        let mut stats: Vec<PoolStats> = pools
            .iter()
            .map(|pool| PoolStats {
                fingerprint: pool.key().fingerprint(),
                pair_size: pool.pair_size(),
                waiting: pool.len().unwrap_or(0),
            })
            .collect();
        stats.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));

        ServiceStats {
            active_pools: stats.len(),
            parties_waiting: stats.iter().map(|p| p.waiting).sum(),
            pools: stats,
            uptime_seconds,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}
