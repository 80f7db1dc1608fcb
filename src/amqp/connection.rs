//! AMQP connection management with retry logic

use crate::config::AmqpConfig;
use crate::error::{MatchmakingError, Result};
use amqprs::channel::Channel;
use amqprs::connection::{Connection, OpenConnectionArguments};
use anyhow::Context;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

/// Upper bound for the reconnect backoff
const MAX_RETRY_DELAY_MS: u64 = 30_000;

/// Broker connection shared by the command consumer and the event publisher
pub struct AmqpConnection {
    connection: Connection,
    config: AmqpConfig,
}

impl AmqpConnection {
    /// Connect, retrying with exponential backoff up to `max_retries` times
    pub async fn new(config: AmqpConfig) -> Result<Self> {
        let connection = Self::connect_with_retry(&config).await?;
        Ok(Self { connection, config })
    }

    async fn connect_with_retry(config: &AmqpConfig) -> Result<Connection> {
        let attempts = config.max_retries + 1;
        let mut delay_ms = config.retry_delay_ms;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match Self::try_connect(config).await {
                Ok(connection) => {
                    info!(
                        attempt,
                        "Connected to AMQP broker at {}:{}{}", config.host, config.port, config.vhost
                    );
                    return Ok(connection);
                }
                Err(e) if attempt < attempts => {
                    warn!(
                        attempt,
                        retry_in_ms = delay_ms,
                        "AMQP broker unreachable: {}", e
                    );
                    sleep(Duration::from_millis(delay_ms)).await;
                    delay_ms = delay_ms.saturating_mul(2).min(MAX_RETRY_DELAY_MS);
                }
                Err(e) => last_error = e.to_string(),
            }
        }

        error!(attempts, "Giving up on the AMQP broker");
        Err(MatchmakingError::AmqpConnectionFailed {
            message: format!("no connection after {} attempts: {}", attempts, last_error),
        }
        .into())
    }

    async fn try_connect(config: &AmqpConfig) -> Result<Connection> {
        let mut args = OpenConnectionArguments::new(
            &config.host,
            config.port,
            &config.username,
            &config.password,
        );
        args.virtual_host(&config.vhost);

        let opened = timeout(
            Duration::from_millis(config.connection_timeout_ms),
            Connection::open(&args),
        )
        .await
        .map_err(|_| MatchmakingError::AmqpConnectionFailed {
            message: format!(
                "connection attempt timed out after {}ms",
                config.connection_timeout_ms
            ),
        })?;

        let connection = opened.map_err(|e| MatchmakingError::AmqpConnectionFailed {
            message: e.to_string(),
        })?;
        Ok(connection)
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn config(&self) -> &AmqpConfig {
        &self.config
    }

    pub async fn open_channel(&self) -> Result<Channel> {
        self.connection.open_channel(None).await.map_err(|e| {
            MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to open AMQP channel: {}", e),
            }
            .into()
        })
    }

    pub fn is_alive(&self) -> bool {
        self.connection.is_open()
    }

    pub async fn close(self) -> Result<()> {
        self.connection
            .close()
            .await
            .context("Failed to close AMQP connection")
    }
}
