//! Main application state and service coordination
//!
//! `AppState` wires the queue, orchestrator, AMQP transport and health server
//! together and owns the background tasks that keep them running.

use crate::amqp::{
    AmqpConnection, AmqpEventPublisher, CommandConsumer, EventPublisher, PublisherConfig,
};
use crate::config::{AmqpConfig, AppConfig};
use crate::metrics::{HealthServer, HealthServerConfig, MetricsCollector, MetricsService};
use crate::orchestrator::{InMemoryRecordStore, MatchOrchestrator, MatchRecordStore};
use crate::provisioning::{HttpProvisioner, ServerProvisioner, SimulatedProvisioner};
use crate::queue::MatchmakingQueue;
use crate::service::dispatcher::CommandDispatcher;
use crate::service::health::{HealthCheck, ServiceProbe};
use anyhow::Result;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

/// Interval for refreshing gauges that are not updated by queue operations
const HEALTH_METRICS_INTERVAL: Duration = Duration::from_secs(15);

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

    queue: MatchmakingQueue,
    orchestrator: Arc<MatchOrchestrator>,
    dispatcher: Arc<CommandDispatcher>,

    amqp_connection: Arc<AmqpConnection>,
    metrics_service: Arc<MetricsService>,
    probe: ServiceProbe,

    background_tasks: Vec<JoinHandle<()>>,
    command_consumer: Option<CommandConsumer>,

    is_running: Arc<RwLock<bool>>,
}

impl AppState {
    /// Connect to the broker and build every component
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing {} service", config.service.name);
        info!(
            "Configuration: amqp_url={}, capacity={}, ready_check_timeout={}s",
            config.amqp.url,
            config.matchmaking.queue_capacity,
            config.matchmaking.ready_check_timeout_seconds
        );

        let metrics_collector =
            Arc::new(
                MetricsCollector::new().map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to create metrics collector: {}", e),
                })?,
            );

        let amqp_connection = Self::initialize_amqp(&config).await?;
        let publisher = Self::initialize_publisher(&config, &amqp_connection).await?;

        let queue = MatchmakingQueue::with_metrics(config.queue_config(), metrics_collector.clone());
        let provisioner = Self::initialize_provisioner(&config)?;
        let records: Arc<dyn MatchRecordStore> = Arc::new(InMemoryRecordStore::default());
        let orchestrator = Arc::new(MatchOrchestrator::new(
            queue.clone(),
            provisioner,
            records,
            config.orchestrator_config(),
        ));
        let dispatcher = Arc::new(CommandDispatcher::new(orchestrator.clone(), publisher));

        let is_running = Arc::new(RwLock::new(false));
        let probe = ServiceProbe::new(
            config.service.name.clone(),
            orchestrator.clone(),
            is_running.clone(),
        )
        .with_amqp(amqp_connection.clone());

        let metrics_service = Self::initialize_metrics(&config, metrics_collector, probe.clone());

        Ok(Self {
            config,
            queue,
            orchestrator,
            dispatcher,
            amqp_connection,
            metrics_service,
            probe,
            background_tasks: Vec::new(),
            command_consumer: None,
            is_running,
        })
    }

    /// Start the health server, command consumption and background tasks
    pub async fn start(&mut self) -> Result<(), ServiceError> {
        info!("Starting {} service", self.config.service.name);

        *self.is_running.write().await = true;

        self.start_metrics_service().await?;
        self.start_background_tasks();
        self.start_amqp_consumption().await?;

        info!("✅ {} service started successfully", self.config.service.name);
        Ok(())
    }

    /// Stop consuming, drain in-flight match starts and stop background tasks
    pub async fn shutdown(&mut self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of {}", self.config.service.name);

        *self.is_running.write().await = false;

        if let Some(consumer) = self.command_consumer.take() {
            if let Err(e) = consumer.stop_consuming().await {
                warn!("Failed to stop AMQP consumer: {}", e);
            } else {
                info!("✅ AMQP command consumption stopped");
            }
        }

        let drain = tokio::time::timeout(
            self.config.shutdown_timeout(),
            self.dispatcher.wait_for_match_starts(),
        )
        .await;
        match drain {
            Ok(Ok(())) => debug!("No match starts in flight"),
            Ok(Err(e)) => warn!("Failed to drain match starts: {}", e),
            Err(_) => warn!(
                "Match starts still running after {:?}, abandoning them",
                self.config.shutdown_timeout()
            ),
        }

        self.stop_background_tasks().await;

        if let Err(e) = self.metrics_service.stop().await {
            warn!("Failed to stop metrics service: {}", e);
        } else {
            info!("✅ Metrics service stopped");
        }

        let final_stats = self
            .queue
            .stats()
            .map_err(|e| ServiceError::BackgroundTask {
                message: format!("Failed to get final stats: {}", e),
            })?;
        info!("Final queue statistics: {:?}", final_stats);

        for active in self.orchestrator.active_matches().unwrap_or_default() {
            warn!(
                match_id = %active.match_id,
                "Shutting down with a match still in progress"
            );
        }

        info!("✅ {} shutdown completed", self.config.service.name);
        Ok(())
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub fn queue(&self) -> &MatchmakingQueue {
        &self.queue
    }

    pub fn orchestrator(&self) -> Arc<MatchOrchestrator> {
        self.orchestrator.clone()
    }

    pub fn metrics_service(&self) -> Arc<MetricsService> {
        self.metrics_service.clone()
    }

    pub fn amqp_connection(&self) -> Arc<AmqpConnection> {
        self.amqp_connection.clone()
    }

    pub fn probe(&self) -> ServiceProbe {
        self.probe.clone()
    }

    async fn initialize_amqp(config: &AppConfig) -> Result<Arc<AmqpConnection>, ServiceError> {
        info!("Connecting to AMQP broker: {}", config.amqp.url);

        let amqp_config = AmqpConfig::from_settings(&config.amqp).map_err(|e| {
            ServiceError::Configuration {
                message: format!("Failed to parse AMQP URL: {}", e),
            }
        })?;

        let connection =
            AmqpConnection::new(amqp_config)
                .await
                .map_err(|e| ServiceError::AmqpConnection {
                    message: format!("Failed to connect to AMQP: {}", e),
                })?;

        Ok(Arc::new(connection))
    }

    async fn initialize_publisher(
        config: &AppConfig,
        connection: &AmqpConnection,
    ) -> Result<Arc<dyn EventPublisher>, ServiceError> {
        let channel = connection
            .open_channel()
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: e.to_string(),
            })?;

        let publisher = AmqpEventPublisher::new(
            channel,
            config.amqp.events_exchange.clone(),
            PublisherConfig::default(),
        )
        .await
        .map_err(|e| ServiceError::Initialization {
            message: format!("Failed to initialize event publisher: {}", e),
        })?;

        Ok(Arc::new(publisher))
    }

    /// Use the HTTP provisioner when an API URL is configured
    fn initialize_provisioner(
        config: &AppConfig,
    ) -> Result<Arc<dyn ServerProvisioner>, ServiceError> {
        match &config.provisioning.url {
            Some(url) => {
                info!("Using provisioning API at {}", url);
                let provisioner = HttpProvisioner::new(
                    url,
                    config.provisioning.token.clone(),
                    config.provision_request_timeout(),
                )
                .map_err(|e| ServiceError::Configuration {
                    message: e.to_string(),
                })?;
                Ok(Arc::new(provisioner))
            }
            None => {
                warn!("No provisioning URL configured, using simulated servers");
                Ok(Arc::new(SimulatedProvisioner::new()))
            }
        }
    }

    fn initialize_metrics(
        config: &AppConfig,
        collector: Arc<MetricsCollector>,
        probe: ServiceProbe,
    ) -> Arc<MetricsService> {
        info!(
            "Initializing metrics service on port {}",
            config.service.health_port
        );

        let health_config = HealthServerConfig {
            port: config.service.health_port,
            host: "0.0.0.0".to_string(),
        };
        let health_server =
            Arc::new(HealthServer::new(health_config, collector.clone()).with_probe(probe));

        Arc::new(MetricsService::new(collector, health_server))
    }

    async fn start_metrics_service(&mut self) -> Result<(), ServiceError> {
        let metrics_service = self.metrics_service.clone();
        let port = self.config.service.health_port;

        let handle = tokio::spawn(async move {
            if let Err(e) = metrics_service.start().await {
                error!("Metrics service failed: {}", e);
            }
        });
        self.background_tasks.push(handle);

        // Give the server a moment to bind
        tokio::time::sleep(Duration::from_millis(100)).await;

        info!("✅ Metrics service started on port {}", port);
        Ok(())
    }

    async fn start_amqp_consumption(&mut self) -> Result<(), ServiceError> {
        let queue_name = self.config.amqp.command_queue.clone();

        let channel = self
            .amqp_connection
            .open_channel()
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to open consumer channel: {}", e),
            })?;

        let consumer = CommandConsumer::new(self.dispatcher.clone(), channel);
        consumer
            .start_consuming(&queue_name)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to start consuming commands: {}", e),
            })?;

        self.command_consumer = Some(consumer);
        info!("✅ Listening for commands on '{}'", queue_name);
        Ok(())
    }

    fn start_background_tasks(&mut self) {
        let forwarder = self.dispatcher.spawn_event_forwarder();

        let health_metrics_task = {
            let collector = self.metrics_service.collector();
            let probe = self.probe.clone();
            let queue = self.queue.clone();
            let is_running = self.is_running.clone();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(HEALTH_METRICS_INTERVAL);

                while *is_running.read().await {
                    interval.tick().await;

                    collector
                        .service()
                        .uptime_seconds
                        .set(probe.uptime_seconds());

                    match HealthCheck::check(&probe).await {
                        Ok(health) => {
                            collector.update_health_status(health.status.as_gauge());
                            for check in &health.checks {
                                collector.update_component_health(
                                    &check.name,
                                    check.status != crate::service::HealthStatus::Unhealthy,
                                );
                            }
                        }
                        Err(e) => warn!("Health check failed: {}", e),
                    }

                    match queue.status() {
                        Ok(snapshot) => {
                            collector.set_queue_size(snapshot.size);
                            debug!(
                                queue_size = snapshot.size,
                                ready_check_active = snapshot.ready_check_active,
                                match_in_progress = snapshot.match_in_progress,
                                "Queue heartbeat"
                            );
                        }
                        Err(e) => warn!("Failed to read queue status: {}", e),
                    }
                }
            })
        };

        self.background_tasks.push(forwarder);
        self.background_tasks.push(health_metrics_task);
        info!("Background tasks started");
    }

    async fn stop_background_tasks(&mut self) {
        let task_count = self.background_tasks.len();
        if task_count == 0 {
            return;
        }

        for task in self.background_tasks.drain(..) {
            task.abort();
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        info!("✅ All {} background tasks stopped", task_count);
    }
}
