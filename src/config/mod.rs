//! Configuration management for the pug-queue service
//!
//! This module handles configuration loading from environment variables or a
//! TOML file, validation, and default values.

pub mod amqp;
pub mod app;

// Re-export commonly used types
pub use amqp::AmqpConfig;
pub use app::{
    validate_config, AmqpSettings, AppConfig, MatchmakingSettings, ProvisioningSettings,
    ServiceSettings,
};
