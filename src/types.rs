//! Common types used throughout the matchmaking service

use crate::orchestrator::PlayerProfile;
use crate::provisioning::InstanceInfo;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Stable external identifier for a player
pub type PlayerId = String;

/// Unique identifier for a ready check instance
pub type ReadyCheckId = Uuid;

/// Unique identifier for a started match
pub type MatchId = Uuid;

/// Identifies the cohort a formation took out of the queue
pub type FormationId = Uuid;

/// Lightweight copy of a player's external identity
///
/// The queue holds these by value; the record store remains the system of
/// record for anything beyond id, name and region hint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRef {
    pub id: PlayerId,
    pub display_name: String,
    pub region: Option<String>,
}

impl PlayerRef {
    pub fn new(id: impl Into<PlayerId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            region: None,
        }
    }

    /// Attach a region hint
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }
}

/// Team a player is assigned to when a match forms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Team {
    Red,
    Blue,
}

impl std::fmt::Display for Team {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Team::Red => write!(f, "red"),
            Team::Blue => write!(f, "blue"),
        }
    }
}

/// How a match formation came about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormationKind {
    /// Every queued player confirmed during the ready check
    ReadyCheck,
    /// An administrator forced the match regardless of readiness
    Forced,
}

/// Immutable result of a successful ready check or forced start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchFormation {
    pub formation_id: FormationId,
    /// Selected players in original join order
    pub players: Vec<PlayerRef>,
    pub team_assignment: BTreeMap<PlayerId, Team>,
    pub region: String,
    pub kind: FormationKind,
    pub formed_at: DateTime<Utc>,
}

impl MatchFormation {
    pub fn size(&self) -> usize {
        self.players.len()
    }

    pub fn team_of(&self, player_id: &str) -> Option<Team> {
        self.team_assignment.get(player_id).copied()
    }

    /// Players on the given team, in join order
    pub fn roster(&self, team: Team) -> Vec<&PlayerRef> {
        self.players
            .iter()
            .filter(|p| self.team_of(&p.id) == Some(team))
            .collect()
    }

    pub fn red_team(&self) -> Vec<&PlayerRef> {
        self.roster(Team::Red)
    }

    pub fn blue_team(&self) -> Vec<&PlayerRef> {
        self.roster(Team::Blue)
    }
}

/// One queued player as seen by a status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMember {
    pub player: PlayerRef,
    pub joined_at: DateTime<Utc>,
    pub waiting_seconds: i64,
    pub ready: bool,
}

/// Read-only view of the queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub size: usize,
    pub capacity: usize,
    /// Members in join order
    pub members: Vec<QueueMember>,
    pub ready_check_active: bool,
    pub ready_count: Option<usize>,
    pub match_in_progress: bool,
    pub taken_at: DateTime<Utc>,
}

/// Detailed view of an active ready check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyStatus {
    pub check_id: ReadyCheckId,
    pub ready_count: usize,
    pub required: usize,
    pub players_ready: Vec<PlayerId>,
    pub players_waiting: Vec<PlayerId>,
    pub started_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

/// Outcome of a join attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum JoinOutcome {
    Accepted {
        /// 1-based position in the queue
        position: usize,
        queue_size: usize,
        /// Set when this join filled the queue and started a ready check
        ready_check: Option<ReadyCheckStarted>,
    },
    AlreadyQueued,
    QueueFull,
    MatchInProgress,
}

/// Outcome of a leave attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum LeaveOutcome {
    Removed { queue_size: usize, was_ready: bool },
    NotQueued,
}

/// Outcome of a ready confirmation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ReadyOutcome {
    Accepted { ready_count: usize, required: usize },
    /// This confirmation completed the check and finalized the match
    MatchFormed { formation: MatchFormation },
    NoActiveCheck,
    NotQueued,
    AlreadyReady,
}

/// Why a ready check ended without forming a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    Timeout,
    /// Explicit cancellation or administrative reset
    Reset,
    /// Replaced by a forced match formation
    Superseded,
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelReason::Timeout => write!(f, "timeout"),
            CancelReason::Reset => write!(f, "reset"),
            CancelReason::Superseded => write!(f, "superseded"),
        }
    }
}

/// Event emitted when a full queue starts a ready check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadyCheckStarted {
    pub check_id: ReadyCheckId,
    pub players: Vec<PlayerRef>,
    pub started_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

/// Event emitted when a ready check ends without a match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadyCheckCancelled {
    pub check_id: ReadyCheckId,
    pub reason: CancelReason,
    pub ready_count: usize,
    /// Players still queued after the cancellation
    pub remaining: Vec<PlayerId>,
    pub timestamp: DateTime<Utc>,
}

/// Notifications broadcast by the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum QueueNotification {
    ReadyCheckStarted(ReadyCheckStarted),
    ReadyCheckCancelled(ReadyCheckCancelled),
    MatchFormed(MatchFormation),
}

/// Public endpoint of a provisioned game server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEndpoint {
    pub instance_id: String,
    pub public_address: String,
}

/// Immutable record of a started match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub match_id: MatchId,
    pub formation: MatchFormation,
    pub server: ServerEndpoint,
    pub map_name: String,
    pub started_at: DateTime<Utc>,
}

/// Why the orchestrator could not stand up a server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProvisionFailure {
    #[error("provider error: {message}")]
    Provider { message: String },

    #[error("instance {instance_id} had no public address after {attempts} polls")]
    ReadinessTimeout { instance_id: String, attempts: u32 },

    #[error("instance {instance_id} entered state '{status}'")]
    InstanceFailed { instance_id: String, status: String },
}

/// Result of asking the orchestrator to start a match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum MatchStart {
    Started { record: MatchRecord },
    ProvisionFailed { reason: ProvisionFailure },
}

/// Final outcome reported for a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MatchOutcome {
    Completed { winner: Option<Team> },
    Cancelled,
}

/// Lifecycle status of a match as recorded in the record store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Completed,
    Cancelled,
    /// The server never came up
    Failed,
}

impl std::fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchStatus::Completed => write!(f, "completed"),
            MatchStatus::Cancelled => write!(f, "cancelled"),
            MatchStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Final summary of a match, handed to the record store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub match_id: MatchId,
    pub status: MatchStatus,
    pub winner: Option<Team>,
    pub region: String,
    pub map_name: String,
    pub server_instance_id: Option<String>,
    pub red_team: Vec<PlayerId>,
    pub blue_team: Vec<PlayerId>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_minutes: i64,
}

/// Commands accepted from the messaging gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueCommand {
    Join {
        player_id: PlayerId,
        display_name: String,
        region: Option<String>,
    },
    Leave {
        player_id: PlayerId,
    },
    Ready {
        player_id: PlayerId,
    },
    Status,
    ForceStart {
        minimum: Option<usize>,
    },
    Reset,
    CompleteMatch {
        match_id: MatchId,
        outcome: MatchOutcome,
    },
    /// Career totals for one player
    Profile {
        player_id: PlayerId,
    },
    /// Latest match results, newest first
    RecentMatches {
        #[serde(default = "default_recent_matches")]
        limit: usize,
    },
    /// Servers the provider is currently running
    Servers,
}

/// Results returned by a `recent_matches` command without an explicit limit
pub const DEFAULT_RECENT_MATCHES: usize = 10;

/// Upper bound on results returned by one `recent_matches` command
pub const MAX_RECENT_MATCHES: usize = 100;

fn default_recent_matches() -> usize {
    DEFAULT_RECENT_MATCHES
}

impl QueueCommand {
    /// Short name used for logging and metrics labels
    pub fn name(&self) -> &'static str {
        match self {
            QueueCommand::Join { .. } => "join",
            QueueCommand::Leave { .. } => "leave",
            QueueCommand::Ready { .. } => "ready",
            QueueCommand::Status => "status",
            QueueCommand::ForceStart { .. } => "force_start",
            QueueCommand::Reset => "reset",
            QueueCommand::CompleteMatch { .. } => "complete_match",
            QueueCommand::Profile { .. } => "profile",
            QueueCommand::RecentMatches { .. } => "recent_matches",
            QueueCommand::Servers => "servers",
        }
    }
}

/// A command together with the gateway's correlation id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub request_id: String,
    pub command: QueueCommand,
    pub timestamp: DateTime<Utc>,
}

/// Structured result of a gateway command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum CommandOutcome {
    Join(JoinOutcome),
    Leave(LeaveOutcome),
    Ready(ReadyOutcome),
    Status { ready: Option<ReadyStatusSummary> },
    ForceStart { formation: Option<MatchFormation> },
    Reset,
    CompleteMatch { result: MatchResult },
    Profile { profile: Option<PlayerProfile> },
    RecentMatches { matches: Vec<MatchResult> },
    Servers { servers: Vec<InstanceInfo> },
    Rejected { reason: String },
}

/// Compact ready-check progress attached to status replies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyStatusSummary {
    pub ready_count: usize,
    pub required: usize,
    pub players_waiting: Vec<PlayerId>,
}

impl From<ReadyStatus> for ReadyStatusSummary {
    fn from(status: ReadyStatus) -> Self {
        Self {
            ready_count: status.ready_count,
            required: status.required,
            players_waiting: status.players_waiting,
        }
    }
}

/// Reply published for every processed command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandReply {
    pub request_id: String,
    pub outcome: CommandOutcome,
    pub queue: QueueSnapshot,
    pub timestamp: DateTime<Utc>,
}

/// Event emitted once a server is up for a formed match
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchStarted {
    pub record: MatchRecord,
    pub timestamp: DateTime<Utc>,
}

/// Event emitted when a formed match could not get a server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchFailed {
    pub formation: MatchFormation,
    pub reason: ProvisionFailure,
    pub timestamp: DateTime<Utc>,
}

/// Event emitted when a match has been closed out
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchCompleted {
    pub result: MatchResult,
    pub timestamp: DateTime<Utc>,
}

/// Union type for all outbound gateway events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GatewayEvent {
    CommandReply(CommandReply),
    ReadyCheckStarted(ReadyCheckStarted),
    ReadyCheckCancelled(ReadyCheckCancelled),
    MatchStarted(MatchStarted),
    MatchFailed(MatchFailed),
    MatchCompleted(MatchCompleted),
}
