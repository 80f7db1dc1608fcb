//! PUG Queue - pick-up game matchmaking service
//!
//! A single shared queue fills to capacity, holds a ready check with a
//! deadline, and hands formed matches to an orchestrator that provisions a
//! dedicated game server. Commands and events travel over AMQP.

pub mod amqp;
pub mod config;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod provisioning;
pub mod queue;
pub mod service;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{MatchmakingError, Result};
pub use types::*;

pub use amqp::publisher::EventPublisher;
pub use orchestrator::{MatchOrchestrator, MatchRecordStore};
pub use provisioning::ServerProvisioner;
pub use queue::{MatchmakingQueue, QueueConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
