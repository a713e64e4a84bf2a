//! Metrics collection using Prometheus
//!
//! This module provides metrics collection for the pairing-room
//! matchmaking service using Prometheus metrics.

use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the pairing service
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Service-level metrics
    service_metrics: ServiceMetrics,

    /// Pool-related metrics
    pool_metrics: PoolMetrics,

    /// Pair and conflict metrics
    pairing_metrics: PairingMetrics,

    /// Inbound and outbound event metrics
    event_metrics: EventMetrics,

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

/// Pool-related metrics
#[derive(Clone)]
pub struct PoolMetrics {
    /// Live pools in this process
    pub active_pools: IntGauge,

    /// Pools created or hydrated, by origin
    pub pools_opened_total: IntCounterVec,

    /// Parties that joined a pool
    pub parties_joined_total: IntCounter,

    /// Leave requests, by result
    pub parties_left_total: IntCounterVec,

    /// Parties currently waiting across all pools
    pub parties_waiting: IntGauge,
}

/// Pair and conflict metrics
#[derive(Clone)]
pub struct PairingMetrics {
    /// Pairs created
    pub pairs_created_total: IntCounter,

    /// Drain attempts, by result
    pub drain_attempts_total: IntCounterVec,

    /// Pairs flagged by the conflict detector
    pub conflicts_flagged_total: IntCounter,

    /// Conflict checks, by status
    pub conflict_checks_total: IntCounterVec,

    /// Best-effort side effects that failed, by action
    pub advisory_failures_total: IntCounterVec,
}

/// Event metrics
#[derive(Clone)]
pub struct EventMetrics {
    /// Inbound events, by kind and status
    pub events_consumed_total: IntCounterVec,

    /// Outbound events, by status
    pub events_published_total: IntCounterVec,
}

/// Performance metrics
#[derive(Clone)]
pub struct PerformanceMetrics {
    /// End-to-end join-and-pair time
    pub pairing_duration: Histogram,

    /// Schedule matcher search time
    pub matcher_duration: Histogram,

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
        let pool_metrics = PoolMetrics::new(&registry)?;
        let pairing_metrics = PairingMetrics::new(&registry)?;
        let event_metrics = EventMetrics::new(&registry)?;
        let performance_metrics = PerformanceMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            pool_metrics,
            pairing_metrics,
            event_metrics,
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

    pub fn pool(&self) -> &PoolMetrics {
        &self.pool_metrics
    }

    pub fn pairing(&self) -> &PairingMetrics {
        &self.pairing_metrics
    }

    pub fn events(&self) -> &EventMetrics {
        &self.event_metrics
    }

    pub fn performance(&self) -> &PerformanceMetrics {
        &self.performance_metrics
    }

    /// Refresh the pool gauges from a registry scan
    pub fn update_pool_gauges(&self, active_pools: usize, parties_waiting: usize) {
        self.pool_metrics.active_pools.set(active_pools as i64);
        self.pool_metrics.parties_waiting.set(parties_waiting as i64);
    }

    /// Record a pool being opened (`created` or `hydrated`)
    pub fn record_pool_opened(&self, origin: &str) {
        self.pool_metrics
            .pools_opened_total
            .with_label_values(&[origin])
            .inc();
    }

    pub fn record_party_joined(&self) {
        self.pool_metrics.parties_joined_total.inc();
    }

    /// Record a leave request (`removed`, `ignored` or `rejected`)
    pub fn record_party_left(&self, result: &str) {
        self.pool_metrics
            .parties_left_total
            .with_label_values(&[result])
            .inc();
    }

    /// Record one drain attempt and how long the whole request took
    pub fn record_drain(&self, result: &str, duration: Duration) {
        self.pairing_metrics
            .drain_attempts_total
            .with_label_values(&[result])
            .inc();

        if result == "paired" {
            self.pairing_metrics.pairs_created_total.inc();
        }

        self.performance_metrics
            .pairing_duration
            .observe(duration.as_secs_f64());
    }

    pub fn record_matcher_run(&self, duration: Duration) {
        self.performance_metrics
            .matcher_duration
            .observe(duration.as_secs_f64());
    }

    pub fn record_conflict_check(&self, success: bool, flagged: usize) {
        let status = if success { "success" } else { "error" };
        self.pairing_metrics
            .conflict_checks_total
            .with_label_values(&[status])
            .inc();
        self.pairing_metrics
            .conflicts_flagged_total
            .inc_by(flagged as u64);
    }

    pub fn record_advisory_failure(&self, action: &str) {
        self.pairing_metrics
            .advisory_failures_total
            .with_label_values(&[action])
            .inc();
    }

    /// Record an inbound event by kind and status
    pub fn record_event(&self, kind: &str, success: bool) {
        let status = if success { "success" } else { "error" };
        self.event_metrics
            .events_consumed_total
            .with_label_values(&[kind, status])
            .inc();
    }

    pub fn record_publish(&self, success: bool) {
        let status = if success { "success" } else { "error" };
        self.event_metrics
            .events_published_total
            .with_label_values(&[status])
            .inc();
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
            IntGauge::new("pairing_room_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let amqp_messages_total = IntCounterVec::new(
            Opts::new(
                "pairing_room_amqp_messages_total",
                "Total AMQP messages processed",
            ),
            &["operation", "status"],
        )?;
        registry.register(Box::new(amqp_messages_total.clone()))?;

        let amqp_errors_total = IntCounterVec::new(
            Opts::new("pairing_room_amqp_errors_total", "Total AMQP errors"),
            &["operation"],
        )?;
        registry.register(Box::new(amqp_errors_total.clone()))?;

        let health_status = IntGauge::new(
            "pairing_room_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("pairing_room_component_health", "Component health status"),
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

impl PoolMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let active_pools = IntGauge::new("pairing_room_active_pools", "Number of live pools")?;
        registry.register(Box::new(active_pools.clone()))?;

        let pools_opened_total = IntCounterVec::new(
            Opts::new("pairing_room_pools_opened_total", "Pools created or hydrated"),
            &["origin"],
        )?;
        registry.register(Box::new(pools_opened_total.clone()))?;

        let parties_joined_total = IntCounter::new(
            "pairing_room_parties_joined_total",
            "Total parties that joined a pool",
        )?;
        registry.register(Box::new(parties_joined_total.clone()))?;

        let parties_left_total = IntCounterVec::new(
            Opts::new("pairing_room_parties_left_total", "Total leave requests"),
            &["result"],
        )?;
        registry.register(Box::new(parties_left_total.clone()))?;

        let parties_waiting = IntGauge::new(
            "pairing_room_parties_waiting",
            "Parties currently waiting across all pools",
        )?;
        registry.register(Box::new(parties_waiting.clone()))?;

        Ok(Self {
            active_pools,
            pools_opened_total,
            parties_joined_total,
            parties_left_total,
            parties_waiting,
        })
    }
}

impl PairingMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let pairs_created_total =
            IntCounter::new("pairing_room_pairs_created_total", "Total pairs created")?;
        registry.register(Box::new(pairs_created_total.clone()))?;

        let drain_attempts_total = IntCounterVec::new(
            Opts::new("pairing_room_drain_attempts_total", "Pool drain attempts"),
            &["result"],
        )?;
        registry.register(Box::new(drain_attempts_total.clone()))?;

        let conflicts_flagged_total = IntCounter::new(
            "pairing_room_conflicts_flagged_total",
            "Pairs flagged as conflicting",
        )?;
        registry.register(Box::new(conflicts_flagged_total.clone()))?;

        let conflict_checks_total = IntCounterVec::new(
            Opts::new("pairing_room_conflict_checks_total", "Conflict checks run"),
            &["status"],
        )?;
        registry.register(Box::new(conflict_checks_total.clone()))?;

        let advisory_failures_total = IntCounterVec::new(
            Opts::new(
                "pairing_room_advisory_failures_total",
                "Best-effort side effects that failed",
            ),
            &["action"],
        )?;
        registry.register(Box::new(advisory_failures_total.clone()))?;

        Ok(Self {
            pairs_created_total,
            drain_attempts_total,
            conflicts_flagged_total,
            conflict_checks_total,
            advisory_failures_total,
        })
    }
}

impl EventMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let events_consumed_total = IntCounterVec::new(
            Opts::new("pairing_room_events_consumed_total", "Inbound events handled"),
            &["kind", "status"],
        )?;
        registry.register(Box::new(events_consumed_total.clone()))?;

        let events_published_total = IntCounterVec::new(
            Opts::new("pairing_room_events_published_total", "Outbound events published"),
            &["status"],
        )?;
        registry.register(Box::new(events_published_total.clone()))?;

        Ok(Self {
            events_consumed_total,
            events_published_total,
        })
    }
}

impl PerformanceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let pairing_duration = Histogram::with_opts(
            HistogramOpts::new(
                "pairing_room_pairing_duration_seconds",
                "Join and pair processing time",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )?;
        registry.register(Box::new(pairing_duration.clone()))?;

        let matcher_duration = Histogram::with_opts(
            HistogramOpts::new(
                "pairing_room_matcher_duration_seconds",
                "Schedule matcher search time",
            )
            .buckets(vec![0.0001, 0.001, 0.005, 0.01, 0.05, 0.1]),
        )?;
        registry.register(Box::new(matcher_duration.clone()))?;

        let amqp_operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "pairing_room_amqp_operation_duration_seconds",
                "AMQP operation duration",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["operation", "status"],
        )?;
        registry.register(Box::new(amqp_operation_duration.clone()))?;

        Ok(Self {
            pairing_duration,
            matcher_duration,
            amqp_operation_duration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_metrics_collector_creation() {
        let collector = MetricsCollector::new().expect("Failed to create metrics collector");

        let _service = collector.service();
        let _pool = collector.pool();
        let _pairing = collector.pairing();
        let _events = collector.events();
        let _performance = collector.performance();
    }

    #[test]
    fn test_drain_recording_counts_pairs() {
        let collector = MetricsCollector::new().expect("Failed to create metrics collector");

        collector.record_drain("waiting", Duration::from_millis(2));
        collector.record_drain("paired", Duration::from_millis(5));
        collector.record_drain("paired", Duration::from_millis(5));

        assert_eq!(collector.pairing().pairs_created_total.get(), 2);
        assert_eq!(
            collector
                .pairing()
                .drain_attempts_total
                .with_label_values(&["waiting"])
                .get(),
            1
        );
        assert_eq!(collector.performance().pairing_duration.get_sample_count(), 3);
    }

    #[test]
    fn test_pool_and_event_recording() {
        let collector = MetricsCollector::new().expect("Failed to create metrics collector");

        collector.record_pool_opened("created");
        collector.record_party_joined();
        collector.record_party_left("removed");
        collector.update_pool_gauges(3, 7);
        collector.record_event("queue_joined", true);
        collector.record_publish(false);
        collector.record_conflict_check(true, 2);

        assert_eq!(collector.pool().parties_joined_total.get(), 1);
        assert_eq!(collector.pool().active_pools.get(), 3);
        assert_eq!(collector.pool().parties_waiting.get(), 7);
        assert_eq!(collector.pairing().conflicts_flagged_total.get(), 2);
    }

    #[test]
    fn test_health_status_updates() {
        let collector = MetricsCollector::new().expect("Failed to create metrics collector");

        collector.update_health_status(2);
        collector.update_component_health("pool_registry", true);
        collector.update_component_health("amqp", false);
        assert_eq!(collector.service().health_status.get(), 2);
    }

    #[test]
    fn test_metrics_timer() {
        let collector = MetricsCollector::new().expect("Failed to create metrics collector");
        let timer = collector.start_timer();

        std::thread::sleep(Duration::from_millis(10));
        let duration = timer.elapsed();

        assert!(duration >= Duration::from_millis(10));

        let final_duration = timer.stop();
        assert!(final_duration >= Duration::from_millis(10));
    }
}
