//! Main application state and service coordination
//!
//! [`AppState`] wires storage, the pairing service, the event consumer and
//! the health server together, and owns the broker consumer and the
//! background tasks.

use crate::amqp::connection::AmqpConnection;
use crate::amqp::handlers::{MatchmakingEventConsumer, QueueEventConsumer};
use crate::amqp::publisher::{AmqpEventPublisher, EventPublisher, PublisherConfig};
use crate::config::AppConfig;
use crate::directory::{InMemoryPartyDirectory, StaticRegionDirectory};
use crate::metrics::{HealthServer, HealthServerConfig, MetricsCollector, MetricsService};
use crate::pairing::{
    ConflictDetector, InMemoryPairStore, LoggingConflictNotifier, PairingService,
};
use crate::pool::{InMemoryPoolStore, PoolRegistry};
use crate::service::health::{HealthCheck, HealthContext};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("AMQP connection error: {message}")]
    AmqpConnection { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// Main application state containing all service components
pub struct AppState {
    config: AppConfig,
    pairing: Arc<PairingService>,
    consumer: Arc<MatchmakingEventConsumer>,
    /// Absent when running without a broker
    amqp_connection: Option<Arc<AmqpConnection>>,
    metrics_service: Arc<MetricsService>,
    health_context: HealthContext,
    background_tasks: Vec<JoinHandle<()>>,
    queue_consumer: Option<QueueEventConsumer>,
    is_running: Arc<RwLock<bool>>,
}

impl AppState {
    /// Connect to the broker and initialize every component
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing pairing-room matchmaking service");
        info!(
            "Configuration: service={}, amqp_url={}, regions={}",
            config.service.name,
            config.amqp.url,
            config.regions.len()
        );

        let amqp_connection = Self::initialize_amqp(&config).await?;

        let channel = amqp_connection
            .open_channel()
            .await
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to open publisher channel: {}", e),
            })?;
        let publisher_config = PublisherConfig {
            max_retries: config.amqp.max_retry_attempts,
            retry_delay_ms: config.amqp.retry_delay_ms,
            ..PublisherConfig::default()
        };
        let publisher = AmqpEventPublisher::new(channel, publisher_config)
            .await
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to initialize event publisher: {}", e),
            })?;

        Self::assemble(config, Some(amqp_connection), Arc::new(publisher))
    }

    /// Initialize without a broker; match-created events go to `publisher`
    pub fn offline(
        config: AppConfig,
        publisher: Arc<dyn EventPublisher>,
    ) -> Result<Self, ServiceError> {
        info!("Initializing pairing-room without a broker connection");
        Self::assemble(config, None, publisher)
    }

    fn assemble(
        config: AppConfig,
        amqp_connection: Option<Arc<AmqpConnection>>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Result<Self, ServiceError> {
        crate::config::validate_config(&config).map_err(|e| ServiceError::Configuration {
            message: e.to_string(),
        })?;

        let metrics_collector =
            Arc::new(
                MetricsCollector::new().map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to create metrics collector: {}", e),
                })?,
            );

        let pairing = Arc::new(Self::initialize_pairing(&config, metrics_collector.clone()));

        let regions = StaticRegionDirectory::from_slugs(
            config
                .regions
                .iter()
                .map(|r| (r.slug.as_str(), r.name.as_str())),
        );
        let consumer = Arc::new(
            MatchmakingEventConsumer::new(
                pairing.clone(),
                Arc::new(regions),
                publisher,
                config.matchmaking.clone(),
            )
            .with_metrics(metrics_collector.clone()),
        );

        let is_running = Arc::new(RwLock::new(false));
        let mut health_context = HealthContext::new(config.service.name.clone(), pairing.clone())
            .with_running_flag(is_running.clone());
        if let Some(connection) = &amqp_connection {
            health_context = health_context.with_amqp(connection.clone());
        }

        info!(
            "Initializing metrics service on port {}",
            config.service.health_port
        );
        let health_config = HealthServerConfig {
            port: config.service.health_port,
            host: "0.0.0.0".to_string(),
        };
        let health_server = Arc::new(
            HealthServer::new(health_config, metrics_collector.clone())
                .with_context(health_context.clone()),
        );
        let metrics_service = Arc::new(MetricsService::new(metrics_collector, health_server));

        Ok(Self {
            config,
            pairing,
            consumer,
            amqp_connection,
            metrics_service,
            health_context,
            background_tasks: Vec::new(),
            queue_consumer: None,
            is_running,
        })
    }

    fn initialize_pairing(config: &AppConfig, metrics: Arc<MetricsCollector>) -> PairingService {
        let settings = &config.matchmaking;
        let parties = if settings.auto_register_parties {
            Arc::new(InMemoryPartyDirectory::with_auto_register())
        } else {
            Arc::new(InMemoryPartyDirectory::new())
        };
        let pairs = Arc::new(InMemoryPairStore::new());

        let mut service = PairingService::new(
            Arc::new(PoolRegistry::new()),
            Arc::new(InMemoryPoolStore::new()),
            pairs.clone(),
            parties.clone(),
        )
        .with_metrics(metrics);

        if settings.enable_conflict_checks {
            let detector = ConflictDetector::new(pairs, parties)
                .with_notifier(Arc::new(LoggingConflictNotifier))
                .with_max_pairs(settings.max_pairs_per_check);
            service = service.with_conflict_detector(detector);
        } else {
            info!("Conflict checks disabled");
        }

        service
    }

    /// Start all background services and message consumption
    pub async fn start(&mut self) -> Result<(), ServiceError> {
        info!("Starting pairing-room matchmaking service");

        *self.is_running.write().await = true;

        self.start_metrics_service().await?;

        if self.amqp_connection.is_some() {
            self.start_amqp_consumption().await?;
        } else {
            warn!("No broker connection, queue events will not be consumed");
        }

        self.start_background_tasks();

        info!("Pairing-room matchmaking service started");
        Ok(())
    }

    /// Perform graceful shutdown
    pub async fn shutdown(&mut self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of pairing-room service");

        *self.is_running.write().await = false;

        if let Some(consumer) = self.queue_consumer.take() {
            if let Err(e) = consumer.stop_consuming().await {
                warn!("Failed to stop AMQP consumer: {}", e);
            } else {
                info!("AMQP message consumption stopped");
            }
        }

        if let Err(e) = self.metrics_service.stop().await {
            warn!("Failed to stop metrics service: {}", e);
        }

        self.stop_background_tasks().await;

        let waiting = self
            .pairing
            .registry()
            .waiting_parties()
            .map_err(|e| ServiceError::BackgroundTask {
                message: format!("Failed to get final stats: {}", e),
            })?;
        info!(
            "Final statistics: {} pools, {} parties still waiting",
            self.pairing.registry().len().unwrap_or(0),
            waiting
        );

        info!("Pairing-room service shutdown completed");
        Ok(())
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub fn pairing(&self) -> Arc<PairingService> {
        self.pairing.clone()
    }

    pub fn consumer(&self) -> Arc<MatchmakingEventConsumer> {
        self.consumer.clone()
    }

    pub fn metrics_service(&self) -> Arc<MetricsService> {
        self.metrics_service.clone()
    }

    pub fn health_context(&self) -> &HealthContext {
        &self.health_context
    }

    async fn initialize_amqp(config: &AppConfig) -> Result<Arc<AmqpConnection>, ServiceError> {
        info!("Connecting to AMQP broker: {}", config.amqp.url);

        let amqp_config = config
            .amqp_connection()
            .map_err(|e| ServiceError::Configuration {
                message: format!("Failed to parse AMQP URL: {}", e),
            })?;

        let connection =
            AmqpConnection::new(amqp_config)
                .await
                .map_err(|e| ServiceError::AmqpConnection {
                    message: format!("Failed to connect to AMQP: {}", e),
                })?;

        Ok(Arc::new(connection))
    }

    async fn start_metrics_service(&mut self) -> Result<(), ServiceError> {
        let metrics_service = self.metrics_service.clone();
        let port = self.config.service.health_port;

        let metrics_handle = tokio::spawn(async move {
            if let Err(e) = metrics_service.start().await {
                error!("Metrics service failed: {}", e);
            }
        });
        self.background_tasks.push(metrics_handle);

        // Give the server a moment to bind
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        info!("Metrics service started on port {}", port);
        Ok(())
    }

    async fn start_amqp_consumption(&mut self) -> Result<(), ServiceError> {
        let Some(connection) = &self.amqp_connection else {
            return Ok(());
        };

        let channel = connection
            .open_channel()
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to open consumer channel: {}", e),
            })?;

        let queue_name = self.config.amqp.queue_name.clone();
        let consumer = QueueEventConsumer::new(self.consumer.clone(), channel);
        consumer
            .start_consuming(&queue_name)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to start consuming messages: {}", e),
            })?;

        self.queue_consumer = Some(consumer);
        info!("Listening for queue events on '{}'", queue_name);
        Ok(())
    }

    fn start_background_tasks(&mut self) {
        let interval_duration = self.config.health_check_interval();
        info!(
            "Starting background tasks ({}s interval)",
            interval_duration.as_secs()
        );

        let gauges_task = {
            let pairing = self.pairing.clone();
            let is_running = self.is_running.clone();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(interval_duration);

                while *is_running.read().await {
                    interval.tick().await;
                    if let Err(e) = pairing.refresh_pool_gauges() {
                        warn!("Failed to refresh pool gauges: {}", e);
                    }
                }

                debug!("Pool gauge task stopped");
            })
        };

        let health_task = {
            let metrics_collector = self.metrics_service.collector();
            let context = self.health_context.clone();
            let is_running = self.is_running.clone();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(interval_duration);

                while *is_running.read().await {
                    interval.tick().await;

                    metrics_collector
                        .service()
                        .uptime_seconds
                        .set(context.started_at.elapsed().as_secs() as i64);

                    match HealthCheck::check(&context).await {
                        Ok(health) => {
                            metrics_collector.update_health_status(health.status.as_gauge());
                            for check in &health.checks {
                                metrics_collector.update_component_health(
                                    &check.name,
                                    check.status.as_gauge() > 0,
                                );
                            }
                            debug!("Health status: {}", health.status);
                        }
                        Err(e) => warn!("Health check failed: {}", e),
                    }
                }

                debug!("Health metrics task stopped");
            })
        };

        self.background_tasks.push(gauges_task);
        self.background_tasks.push(health_task);
    }

    async fn stop_background_tasks(&mut self) {
        let task_count = self.background_tasks.len();
        if task_count == 0 {
            return;
        }

        info!("Stopping {} background tasks...", task_count);
        for task in self.background_tasks.drain(..) {
            task.abort();
        }

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        info!("All {} background tasks stopped", task_count);
    }
}
