//! Matchmaking queue with ready checks
//!
//! Players join a single fixed-capacity queue. Filling it starts a timed
//! ready check; once every queued player confirms, the queue forms a match
//! and stays closed until that match is released.

pub mod formation;
pub mod manager;
pub mod state;

pub use formation::{assign_teams, select_region};
pub use manager::{MatchmakingQueue, QueueStats};
pub use state::{ForcedFormation, QueueConfig, QueueEntry, QueueState, ReadyCheck};
