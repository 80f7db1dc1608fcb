//! Match orchestration
//!
//! Takes formations produced by the queue, stands up a dedicated server
//! through the provisioning collaborator, and closes matches out.

pub mod lifecycle;
pub mod records;

pub use lifecycle::{MatchOrchestrator, OrchestratorConfig};
pub use records::{win_rate, InMemoryRecordStore, MatchRecordStore, PlayerProfile};
