//! AMQP consumer for gateway commands
//!
//! Deliveries on the command queue are decoded into [`CommandEnvelope`]s and
//! handed to a [`CommandHandler`]. Every delivery is acknowledged once the
//! handler returns; a command that cannot be decoded will not decode on
//! redelivery either, so failures go to [`CommandHandler::handle_error`]
//! instead of being requeued.

use crate::amqp::messages::MessageUtils;
use crate::error::{MatchmakingError, Result};
use crate::types::CommandEnvelope;
use amqprs::{
    channel::{
        BasicAckArguments, BasicCancelArguments, BasicConsumeArguments, Channel,
        QueueDeclareArguments,
    },
    consumer::AsyncConsumer,
    BasicProperties, Deliver,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Trait defining the interface for handling gateway commands
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Handle a decoded command
    async fn handle_command(&self, envelope: CommandEnvelope) -> Result<()>;

    /// Handle a delivery that could not be decoded or processed
    async fn handle_error(&self, error: MatchmakingError, message_data: &[u8]);
}

/// Consumer bound to the command queue
pub struct CommandConsumer {
    handler: Arc<dyn CommandHandler>,
    channel: Channel,
    consumer_tag: String,
}

impl CommandConsumer {
    pub fn new(handler: Arc<dyn CommandHandler>, channel: Channel) -> Self {
        let consumer_tag = format!("pug-queue-consumer-{}", uuid::Uuid::new_v4());

        Self {
            handler,
            channel,
            consumer_tag,
        }
    }

    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    /// Declare `queue_name` as a durable queue and start consuming from it
    pub async fn start_consuming(&self, queue_name: &str) -> Result<()> {
        let declare_args = QueueDeclareArguments::new(queue_name)
            .durable(true)
            .auto_delete(false)
            .finish();
        self.channel
            .queue_declare(declare_args)
            .await
            .map_err(|e| MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to declare queue {}: {}", queue_name, e),
            })?;

        let args = BasicConsumeArguments::new(queue_name, &self.consumer_tag);
        self.channel
            .basic_consume(CommandDeliveryConsumer::new(self.handler.clone()), args)
            .await
            .map_err(|e| MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to start consuming: {}", e),
            })?;

        info!("Started consuming commands from queue: {}", queue_name);
        Ok(())
    }

    pub async fn stop_consuming(&self) -> Result<()> {
        let args = BasicCancelArguments::new(&self.consumer_tag);

        self.channel.basic_cancel(args).await.map_err(|e| {
            MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to stop consuming: {}", e),
            }
        })?;

        info!("Stopped consuming commands");
        Ok(())
    }
}

struct CommandDeliveryConsumer {
    handler: Arc<dyn CommandHandler>,
}

impl CommandDeliveryConsumer {
    fn new(handler: Arc<dyn CommandHandler>) -> Self {
        Self { handler }
    }

    async fn process_message(&self, content: &[u8]) -> Result<()> {
        let envelope = MessageUtils::deserialize_command(content)?;

        debug!(
            request_id = %envelope.request_id,
            command = envelope.command.name(),
            "Command decoded"
        );

        self.handler.handle_command(envelope).await
    }
}

#[async_trait]
impl AsyncConsumer for CommandDeliveryConsumer {
    async fn consume(
        &mut self,
        channel: &Channel,
        deliver: Deliver,
        _basic_properties: BasicProperties,
        content: Vec<u8>,
    ) {
        let delivery_tag = deliver.delivery_tag();
        debug!(
            "AMQP message received - delivery_tag: {}, routing_key: '{}', size: {} bytes",
            delivery_tag,
            deliver.routing_key(),
            content.len()
        );

        let start_time = std::time::Instant::now();

        match self.process_message(&content).await {
            Ok(_) => {
                debug!(
                    "Command processed - delivery_tag: {}, processing_time: {:.2}ms",
                    delivery_tag,
                    start_time.elapsed().as_secs_f64() * 1000.0
                );
            }
            Err(e) => {
                warn!(
                    "Command processing failed - delivery_tag: {}, processing_time: {:.2}ms, error: {}",
                    delivery_tag,
                    start_time.elapsed().as_secs_f64() * 1000.0,
                    e
                );
                let error = e
                    .downcast::<MatchmakingError>()
                    .unwrap_or_else(|e| MatchmakingError::InternalError {
                        message: e.to_string(),
                    });
                self.handler.handle_error(error, &content).await;
            }
        }

        if let Err(e) = channel
            .basic_ack(BasicAckArguments::new(delivery_tag, false))
            .await
        {
            error!("Failed to ack delivery {}: {}", delivery_tag, e);
        }
    }
}

/// Command handler that records what it receives
#[derive(Default)]
pub struct MockCommandHandler {
    pub received_commands: Arc<tokio::sync::Mutex<Vec<CommandEnvelope>>>,
    pub received_errors: Arc<tokio::sync::Mutex<Vec<String>>>,
}

impl MockCommandHandler {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CommandHandler for MockCommandHandler {
    async fn handle_command(&self, envelope: CommandEnvelope) -> Result<()> {
        self.received_commands.lock().await.push(envelope);
        Ok(())
    }

    async fn handle_error(&self, error: MatchmakingError, _message_data: &[u8]) {
        self.received_errors.lock().await.push(error.to_string());
    }
}
