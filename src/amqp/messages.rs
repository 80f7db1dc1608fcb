//! AMQP message definitions and serialization

use crate::error::{MatchmakingError, Result};
use crate::types::*;
use serde_json;

/// Default AMQP names, overridable through [`crate::config::AmqpSettings`]
pub const QUEUE_COMMANDS_QUEUE: &str = "pug.commands";
pub const QUEUE_EVENTS_EXCHANGE: &str = "pug.events";

/// Routing keys for gateway events
pub const COMMAND_REPLY_ROUTING_KEY: &str = "queue.reply";
pub const READY_CHECK_STARTED_ROUTING_KEY: &str = "queue.ready_check.started";
pub const READY_CHECK_CANCELLED_ROUTING_KEY: &str = "queue.ready_check.cancelled";
pub const MATCH_STARTED_ROUTING_KEY: &str = "match.started";
pub const MATCH_FAILED_ROUTING_KEY: &str = "match.failed";
pub const MATCH_COMPLETED_ROUTING_KEY: &str = "match.completed";

/// Message envelope with metadata
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MessageEnvelope<T> {
    pub payload: T,
    pub correlation_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub routing_key: String,
}

impl<T> MessageEnvelope<T>
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    pub fn new(payload: T, routing_key: String) -> Self {
        Self {
            payload,
            correlation_id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now(),
            routing_key,
        }
    }

    /// Keep the gateway's request id so replies can be matched up
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            MatchmakingError::InternalError {
                message: format!("Failed to serialize message: {}", e),
            }
            .into()
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            MatchmakingError::InvalidCommand {
                reason: format!("Failed to deserialize message: {}", e),
            }
            .into()
        })
    }
}

/// Message serialization and validation utilities
pub struct MessageUtils;

impl MessageUtils {
    /// Decode and validate a command delivered by the gateway
    pub fn deserialize_command(bytes: &[u8]) -> Result<CommandEnvelope> {
        let envelope: CommandEnvelope =
            serde_json::from_slice(bytes).map_err(|e| MatchmakingError::InvalidCommand {
                reason: format!("Failed to deserialize command: {}", e),
            })?;

        Self::validate_command(&envelope.command)?;
        Ok(envelope)
    }

    pub fn validate_command(command: &QueueCommand) -> Result<()> {
        let player_id = match command {
            QueueCommand::Join { player_id, .. }
            | QueueCommand::Leave { player_id }
            | QueueCommand::Ready { player_id }
            | QueueCommand::Profile { player_id } => Some(player_id),
            _ => None,
        };

        if player_id.is_some_and(|id| id.trim().is_empty()) {
            return Err(MatchmakingError::InvalidCommand {
                reason: "Player ID cannot be empty".to_string(),
            }
            .into());
        }

        if let QueueCommand::ForceStart { minimum: Some(0) } = command {
            return Err(MatchmakingError::InvalidCommand {
                reason: "Force start minimum must be at least 1".to_string(),
            }
            .into());
        }

        if let QueueCommand::RecentMatches { limit } = command {
            if *limit == 0 || *limit > MAX_RECENT_MATCHES {
                return Err(MatchmakingError::InvalidCommand {
                    reason: format!(
                        "Recent match limit must be between 1 and {}",
                        MAX_RECENT_MATCHES
                    ),
                }
                .into());
            }
        }

        Ok(())
    }

    /// Serialize any AMQP message to bytes
    pub fn serialize_message<T: serde::Serialize>(message: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(message).map_err(|e| {
            MatchmakingError::InternalError {
                message: format!("Failed to serialize message: {}", e),
            }
            .into()
        })
    }

    pub fn routing_key(event: &GatewayEvent) -> &'static str {
        match event {
            GatewayEvent::CommandReply(_) => COMMAND_REPLY_ROUTING_KEY,
            GatewayEvent::ReadyCheckStarted(_) => READY_CHECK_STARTED_ROUTING_KEY,
            GatewayEvent::ReadyCheckCancelled(_) => READY_CHECK_CANCELLED_ROUTING_KEY,
            GatewayEvent::MatchStarted(_) => MATCH_STARTED_ROUTING_KEY,
            GatewayEvent::MatchFailed(_) => MATCH_FAILED_ROUTING_KEY,
            GatewayEvent::MatchCompleted(_) => MATCH_COMPLETED_ROUTING_KEY,
        }
    }
}
