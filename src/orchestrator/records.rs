//! Player and match history
//!
//! This module defines the record store the orchestrator reports finished
//! matches to, with an in-memory implementation. Matchmaking never depends
//! on it for correctness.

use crate::error::{MatchmakingError, Result};
use crate::types::{MatchFormation, MatchResult, MatchStatus, PlayerId, PlayerRef};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

/// Aggregate statistics for one player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerProfile {
    pub player: PlayerRef,
    /// Completed matches only
    pub total_matches: u64,
    pub wins: u64,
    pub losses: u64,
    /// Percentage with one decimal place
    pub win_rate: f64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl PlayerProfile {
    pub fn new(player: PlayerRef) -> Self {
        let now = Utc::now();
        Self {
            player,
            total_matches: 0,
            wins: 0,
            losses: 0,
            win_rate: 0.0,
            first_seen: now,
            last_seen: now,
        }
    }

    /// Count a completed match; `won` is `None` for a draw
    pub fn record_completed(&mut self, won: Option<bool>, at: DateTime<Utc>) {
        self.total_matches += 1;
        match won {
            Some(true) => self.wins += 1,
            Some(false) => self.losses += 1,
            None => {}
        }
        self.win_rate = win_rate(self.wins, self.total_matches);
        self.last_seen = at;
    }
}

/// Wins as a percentage of matches, rounded to one decimal place
pub fn win_rate(wins: u64, total_matches: u64) -> f64 {
    if total_matches == 0 {
        return 0.0;
    }
    let rate = wins as f64 / total_matches as f64 * 100.0;
    (rate * 10.0).round() / 10.0
}

/// Store for player identities and match results
#[async_trait]
pub trait MatchRecordStore: Send + Sync {
    /// Resolve a gateway identity, creating a profile on first sight
    async fn find_or_create_player(
        &self,
        external_id: &str,
        display_name: &str,
        region_hint: Option<&str>,
    ) -> Result<PlayerRef>;

    /// Persist a finished match and update participant statistics
    async fn record_match(&self, formation: &MatchFormation, result: &MatchResult) -> Result<()>;

    async fn player_profile(&self, player_id: &str) -> Result<Option<PlayerProfile>>;

    /// Most recent results first
    async fn recent_matches(&self, limit: usize) -> Result<Vec<MatchResult>>;
}

/// In-memory record store
#[derive(Debug)]
pub struct InMemoryRecordStore {
    players: RwLock<HashMap<PlayerId, PlayerProfile>>,
    matches: RwLock<VecDeque<MatchResult>>,
    max_matches: usize,
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl InMemoryRecordStore {
    /// Keep at most `max_matches` results; older ones are dropped
    pub fn new(max_matches: usize) -> Self {
        Self {
            players: RwLock::new(HashMap::new()),
            matches: RwLock::new(VecDeque::new()),
            max_matches,
        }
    }

    pub fn player_count(&self) -> Result<usize> {
        let players = self.players.read().map_err(|_| {
            MatchmakingError::RecordStoreFailed {
                message: "Failed to acquire players read lock".to_string(),
            }
        })?;
        Ok(players.len())
    }
}

#[async_trait]
impl MatchRecordStore for InMemoryRecordStore {
    async fn find_or_create_player(
        &self,
        external_id: &str,
        display_name: &str,
        region_hint: Option<&str>,
    ) -> Result<PlayerRef> {
        if external_id.trim().is_empty() {
            return Err(MatchmakingError::InvalidCommand {
                reason: "Player ID cannot be empty".to_string(),
            }
            .into());
        }

        let mut players = self.players.write().map_err(|_| {
            MatchmakingError::RecordStoreFailed {
                message: "Failed to acquire players write lock".to_string(),
            }
        })?;

        let region = region_hint
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string);

        let profile = players
            .entry(external_id.to_string())
            .or_insert_with(|| PlayerProfile::new(PlayerRef::new(external_id, display_name)));

        if !display_name.is_empty() {
            profile.player.display_name = display_name.to_string();
        }
        if region.is_some() {
            profile.player.region = region;
        }
        profile.last_seen = Utc::now();

        Ok(profile.player.clone())
    }

    async fn record_match(&self, formation: &MatchFormation, result: &MatchResult) -> Result<()> {
        if result.status == MatchStatus::Completed {
            let mut players = self.players.write().map_err(|_| {
                MatchmakingError::RecordStoreFailed {
                    message: "Failed to acquire players write lock".to_string(),
                }
            })?;

            for player in &formation.players {
                let won = result
                    .winner
                    .map(|winner| formation.team_of(&player.id) == Some(winner));
                players
                    .entry(player.id.clone())
                    .or_insert_with(|| PlayerProfile::new(player.clone()))
                    .record_completed(won, result.ended_at);
            }
        }

        let mut matches = self.matches.write().map_err(|_| {
            MatchmakingError::RecordStoreFailed {
                message: "Failed to acquire matches write lock".to_string(),
            }
        })?;
        matches.push_front(result.clone());
        matches.truncate(self.max_matches);

        Ok(())
    }

    async fn player_profile(&self, player_id: &str) -> Result<Option<PlayerProfile>> {
        let players = self.players.read().map_err(|_| {
            MatchmakingError::RecordStoreFailed {
                message: "Failed to acquire players read lock".to_string(),
            }
        })?;
        Ok(players.get(player_id).cloned())
    }

    async fn recent_matches(&self, limit: usize) -> Result<Vec<MatchResult>> {
        let matches = self.matches.read().map_err(|_| {
            MatchmakingError::RecordStoreFailed {
                message: "Failed to acquire matches read lock".to_string(),
            }
        })?;
        Ok(matches.iter().take(limit).cloned().collect())
    }
}
