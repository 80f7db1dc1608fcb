//! AMQP event publisher for outbound gateway events

use crate::amqp::messages::{MessageEnvelope, MessageUtils};
use crate::error::{MatchmakingError, Result};
use crate::types::*;
use amqprs::{
    channel::{BasicPublishArguments, Channel, ExchangeDeclareArguments},
    BasicProperties,
};
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

/// Trait for publishing queue and match events to the gateway
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Reply to a processed command
    async fn publish_command_reply(&self, reply: CommandReply) -> Result<()>;

    async fn publish_ready_check_started(&self, event: ReadyCheckStarted) -> Result<()>;

    async fn publish_ready_check_cancelled(&self, event: ReadyCheckCancelled) -> Result<()>;

    /// A server is up and the match can be joined
    async fn publish_match_started(&self, event: MatchStarted) -> Result<()>;

    async fn publish_match_failed(&self, event: MatchFailed) -> Result<()>;

    async fn publish_match_completed(&self, event: MatchCompleted) -> Result<()>;
}

/// Configuration for event publishing
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub enable_deduplication: bool,
    /// Number of message ids remembered for deduplication
    pub deduplication_window: usize,
    pub publish_timeout_ms: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 500,
            enable_deduplication: true,
            deduplication_window: 10_000,
            publish_timeout_ms: 5000,
        }
    }
}

/// Bounded set of recently published message ids
#[derive(Debug, Default)]
struct PublishedIds {
    ids: HashSet<String>,
    order: VecDeque<String>,
}

impl PublishedIds {
    fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    fn insert(&mut self, id: String, window: usize) {
        if !self.ids.insert(id.clone()) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > window {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }

    fn len(&self) -> usize {
        self.ids.len()
    }

    fn clear(&mut self) {
        self.ids.clear();
        self.order.clear();
    }
}

/// Publishes every gateway event to a single topic exchange
pub struct AmqpEventPublisher {
    channel: Channel,
    exchange: String,
    config: PublisherConfig,
    published_messages: Mutex<PublishedIds>,
}

impl AmqpEventPublisher {
    /// Create a publisher and declare its exchange
    pub async fn new(
        channel: Channel,
        exchange: impl Into<String>,
        config: PublisherConfig,
    ) -> Result<Self> {
        let publisher = Self {
            channel,
            exchange: exchange.into(),
            config,
            published_messages: Mutex::new(PublishedIds::default()),
        };

        publisher.setup_exchange().await?;

        Ok(publisher)
    }

    async fn setup_exchange(&self) -> Result<()> {
        let args = ExchangeDeclareArguments::new(&self.exchange, "topic")
            .durable(true)
            .finish();
        self.channel.exchange_declare(args).await.map_err(|e| {
            MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to declare exchange {}: {}", self.exchange, e),
            }
        })?;

        info!("Declared events exchange '{}'", self.exchange);
        Ok(())
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    async fn publish_event(&self, event: GatewayEvent, correlation_id: Option<String>) -> Result<()> {
        let routing_key = MessageUtils::routing_key(&event).to_string();
        let mut envelope = MessageEnvelope::new(event, routing_key);
        if let Some(correlation_id) = correlation_id {
            envelope = envelope.with_correlation_id(correlation_id);
        }
        self.publish_with_retry(&envelope).await
    }

    /// Publish with deduplication and exponential backoff
    async fn publish_with_retry<T>(&self, envelope: &MessageEnvelope<T>) -> Result<()>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
    {
        if self.config.enable_deduplication {
            let published_messages = self
                .published_messages
                .lock()
                .map_err(|_| MatchmakingError::lock_poisoned("published messages"))?;
            if published_messages.contains(&envelope.correlation_id) {
                debug!(
                    "Message {} already published, skipping",
                    envelope.correlation_id
                );
                return Ok(());
            }
        }

        let mut retry_count = 0;
        let mut delay = Duration::from_millis(self.config.retry_delay_ms);

        loop {
            match self.try_publish(envelope).await {
                Ok(_) => {
                    if self.config.enable_deduplication {
                        let mut published_messages = self
                            .published_messages
                            .lock()
                            .map_err(|_| MatchmakingError::lock_poisoned("published messages"))?;
                        published_messages.insert(
                            envelope.correlation_id.clone(),
                            self.config.deduplication_window,
                        );
                    }

                    debug!(
                        "Published {} to {} ({})",
                        envelope.correlation_id, self.exchange, envelope.routing_key
                    );
                    return Ok(());
                }
                Err(e) => {
                    retry_count += 1;
                    if retry_count > self.config.max_retries {
                        error!(
                            "Failed to publish message {} after {} retries: {}",
                            envelope.correlation_id, self.config.max_retries, e
                        );
                        return Err(e);
                    }

                    warn!(
                        "Publish attempt {} failed for message {}: {}. Retrying in {:?}",
                        retry_count, envelope.correlation_id, e, delay
                    );

                    sleep(delay).await;
                    delay = Duration::from_millis((delay.as_millis() as u64 * 2).min(5000));
                }
            }
        }
    }

    async fn try_publish<T>(&self, envelope: &MessageEnvelope<T>) -> Result<()>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
    {
        let payload = envelope.to_bytes()?;

        let args = BasicPublishArguments::new(&self.exchange, &envelope.routing_key);
        let mut properties = BasicProperties::default();
        properties
            .with_message_id(&envelope.correlation_id)
            .with_correlation_id(&envelope.correlation_id)
            .with_timestamp(envelope.timestamp.timestamp() as u64)
            .with_content_type("application/json");

        timeout(
            Duration::from_millis(self.config.publish_timeout_ms),
            self.channel.basic_publish(properties, payload, args),
        )
        .await
        .map_err(|_| MatchmakingError::AmqpConnectionFailed {
            message: format!(
                "Publish timed out after {}ms",
                self.config.publish_timeout_ms
            ),
        })?
        .map_err(|e| MatchmakingError::AmqpConnectionFailed {
            message: format!("Failed to publish message: {}", e),
        })?;

        Ok(())
    }

    pub fn cached_message_count(&self) -> usize {
        self.published_messages
            .lock()
            .map(|cache| cache.len())
            .unwrap_or(0)
    }

    pub fn clear_deduplication_cache(&self) {
        if let Ok(mut published_messages) = self.published_messages.lock() {
            published_messages.clear();
        }
    }
}

#[async_trait]
impl EventPublisher for AmqpEventPublisher {
    async fn publish_command_reply(&self, reply: CommandReply) -> Result<()> {
        let correlation_id = reply.request_id.clone();
        self.publish_event(GatewayEvent::CommandReply(reply), Some(correlation_id))
            .await
    }

    async fn publish_ready_check_started(&self, event: ReadyCheckStarted) -> Result<()> {
        self.publish_event(GatewayEvent::ReadyCheckStarted(event), None)
            .await
    }

    async fn publish_ready_check_cancelled(&self, event: ReadyCheckCancelled) -> Result<()> {
        self.publish_event(GatewayEvent::ReadyCheckCancelled(event), None)
            .await
    }

    async fn publish_match_started(&self, event: MatchStarted) -> Result<()> {
        let correlation_id = format!("match-started-{}", event.record.match_id);
        self.publish_event(GatewayEvent::MatchStarted(event), Some(correlation_id))
            .await
    }

    async fn publish_match_failed(&self, event: MatchFailed) -> Result<()> {
        self.publish_event(GatewayEvent::MatchFailed(event), None)
            .await
    }

    async fn publish_match_completed(&self, event: MatchCompleted) -> Result<()> {
        let correlation_id = format!("match-completed-{}", event.result.match_id);
        self.publish_event(GatewayEvent::MatchCompleted(event), Some(correlation_id))
            .await
    }
}

/// Event publisher that keeps everything in memory
#[derive(Debug, Default)]
pub struct MockEventPublisher {
    published_events: Mutex<Vec<GatewayEvent>>,
}

impl MockEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, event: GatewayEvent) {
        if let Ok(mut events) = self.published_events.lock() {
            events.push(event);
        }
    }

    pub fn get_published_events(&self) -> Vec<GatewayEvent> {
        self.published_events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Routing keys of everything published, oldest first
    pub fn get_published_routing_keys(&self) -> Vec<&'static str> {
        self.get_published_events()
            .iter()
            .map(MessageUtils::routing_key)
            .collect()
    }

    pub fn clear_events(&self) {
        if let Ok(mut events) = self.published_events.lock() {
            events.clear();
        }
    }
}

#[async_trait]
impl EventPublisher for MockEventPublisher {
    async fn publish_command_reply(&self, reply: CommandReply) -> Result<()> {
        self.record(GatewayEvent::CommandReply(reply));
        Ok(())
    }

    async fn publish_ready_check_started(&self, event: ReadyCheckStarted) -> Result<()> {
        self.record(GatewayEvent::ReadyCheckStarted(event));
        Ok(())
    }

    async fn publish_ready_check_cancelled(&self, event: ReadyCheckCancelled) -> Result<()> {
        self.record(GatewayEvent::ReadyCheckCancelled(event));
        Ok(())
    }

    async fn publish_match_started(&self, event: MatchStarted) -> Result<()> {
        self.record(GatewayEvent::MatchStarted(event));
        Ok(())
    }

    async fn publish_match_failed(&self, event: MatchFailed) -> Result<()> {
        self.record(GatewayEvent::MatchFailed(event));
        Ok(())
    }

    async fn publish_match_completed(&self, event: MatchCompleted) -> Result<()> {
        self.record(GatewayEvent::MatchCompleted(event));
        Ok(())
    }
}
