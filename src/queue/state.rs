//! Queue and ready-check state machine
//!
//! `QueueState` is plain data with synchronous transitions. It never spawns,
//! sleeps or reads the clock; callers pass `now` in. Serializing access is the
//! job of [`crate::queue::MatchmakingQueue`].

use crate::queue::formation::{assign_teams, select_region};
use crate::types::{
    CancelReason, FormationId, FormationKind, JoinOutcome, LeaveOutcome, MatchFormation, PlayerId,
    PlayerRef,
    QueueMember, QueueSnapshot, ReadyCheckCancelled, ReadyCheckId, ReadyCheckStarted,
    ReadyOutcome, ReadyStatus,
};
use crate::utils::{
    generate_formation_id, generate_ready_check_id, to_chrono_duration, waiting_seconds,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Static queue parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Number of players that triggers a ready check
    pub capacity: usize,
    pub ready_check_timeout: Duration,
    /// Default minimum for a forced start
    pub force_start_minimum: usize,
    /// Region used when hints are absent or tied
    pub default_region: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 8,
            ready_check_timeout: Duration::from_secs(60),
            force_start_minimum: 4,
            default_region: "Sydney".to_string(),
        }
    }
}

/// A queued player
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub player: PlayerRef,
    pub joined_at: DateTime<Utc>,
}

/// An active ready check
#[derive(Debug, Clone)]
pub struct ReadyCheck {
    pub id: ReadyCheckId,
    pub ready_set: HashSet<PlayerId>,
    pub started_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

/// A forced formation, plus the ready check it replaced if one was running
#[derive(Debug, Clone)]
pub struct ForcedFormation {
    pub formation: MatchFormation,
    pub superseded: Option<ReadyCheckCancelled>,
}

/// Process-wide queue state
#[derive(Debug, Clone)]
pub struct QueueState {
    config: QueueConfig,
    /// Kept in join order
    entries: Vec<QueueEntry>,
    ready_check: Option<ReadyCheck>,
    /// Formation whose match currently holds the queue closed
    in_flight: Option<FormationId>,
}

impl QueueState {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            entries: Vec::new(),
            ready_check: None,
            in_flight: None,
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, player_id: &str) -> bool {
        self.position_of(player_id).is_some()
    }

    pub fn match_in_progress(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn in_flight_formation(&self) -> Option<FormationId> {
        self.in_flight
    }

    pub fn ready_check(&self) -> Option<&ReadyCheck> {
        self.ready_check.as_ref()
    }

    fn position_of(&self, player_id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.player.id == player_id)
    }

    /// Add a player to the back of the queue
    ///
    /// The join that fills the queue starts the ready check in the same call.
    pub fn join(&mut self, player: PlayerRef, now: DateTime<Utc>) -> JoinOutcome {
        if self.contains(&player.id) {
            return JoinOutcome::AlreadyQueued;
        }
        if self.match_in_progress() {
            return JoinOutcome::MatchInProgress;
        }
        if self.entries.len() >= self.config.capacity {
            return JoinOutcome::QueueFull;
        }

        self.entries.push(QueueEntry {
            player,
            joined_at: now,
        });

        let ready_check = if self.entries.len() == self.config.capacity && self.ready_check.is_none()
        {
            Some(self.start_ready_check(now))
        } else {
            None
        };

        self.check_invariants();
        JoinOutcome::Accepted {
            position: self.entries.len(),
            queue_size: self.entries.len(),
            ready_check,
        }
    }

    fn start_ready_check(&mut self, now: DateTime<Utc>) -> ReadyCheckStarted {
        let check = ReadyCheck {
            id: generate_ready_check_id(),
            ready_set: HashSet::with_capacity(self.config.capacity),
            started_at: now,
            deadline: now + to_chrono_duration(self.config.ready_check_timeout),
        };

        let started = ReadyCheckStarted {
            check_id: check.id,
            players: self.entries.iter().map(|e| e.player.clone()).collect(),
            started_at: check.started_at,
            deadline: check.deadline,
        };

        self.ready_check = Some(check);
        started
    }

    /// Remove a player, along with any readiness they had confirmed
    ///
    /// An active ready check keeps running.
    pub fn leave(&mut self, player_id: &str) -> LeaveOutcome {
        let Some(position) = self.position_of(player_id) else {
            return LeaveOutcome::NotQueued;
        };

        self.entries.remove(position);
        let was_ready = self
            .ready_check
            .as_mut()
            .map(|check| check.ready_set.remove(player_id))
            .unwrap_or(false);

        self.check_invariants();
        LeaveOutcome::Removed {
            queue_size: self.entries.len(),
            was_ready,
        }
    }

    /// Confirm readiness for the active check
    ///
    /// The confirmation that brings the ready set to capacity finalizes the
    /// match in the same call.
    pub fn mark_ready(&mut self, player_id: &str, now: DateTime<Utc>) -> ReadyOutcome {
        if self.ready_check.is_none() {
            return ReadyOutcome::NoActiveCheck;
        }
        if !self.contains(player_id) {
            return ReadyOutcome::NotQueued;
        }

        let capacity = self.config.capacity;
        let ready_count = match self.ready_check.as_mut() {
            Some(check) => {
                if !check.ready_set.insert(player_id.to_string()) {
                    return ReadyOutcome::AlreadyReady;
                }
                check.ready_set.len()
            }
            None => return ReadyOutcome::NoActiveCheck,
        };

        if ready_count == capacity {
            let formation = self.finalize(FormationKind::ReadyCheck, now);
            return ReadyOutcome::MatchFormed { formation };
        }

        self.check_invariants();
        ReadyOutcome::Accepted {
            ready_count,
            required: capacity,
        }
    }

    /// Drop the active ready check, leaving every player queued
    pub fn cancel_ready_check(
        &mut self,
        reason: CancelReason,
        now: DateTime<Utc>,
    ) -> Option<ReadyCheckCancelled> {
        let check = self.ready_check.take()?;
        Some(ReadyCheckCancelled {
            check_id: check.id,
            reason,
            ready_count: check.ready_set.len(),
            remaining: self.entries.iter().map(|e| e.player.id.clone()).collect(),
            timestamp: now,
        })
    }

    /// Time out the ready check with the given id
    ///
    /// A no-op when that check already finalized or was replaced, so a stale
    /// timer can never cancel a later check.
    pub fn expire_ready_check(
        &mut self,
        check_id: ReadyCheckId,
        now: DateTime<Utc>,
    ) -> Option<ReadyCheckCancelled> {
        match &self.ready_check {
            Some(check) if check.id == check_id => {
                self.cancel_ready_check(CancelReason::Timeout, now)
            }
            _ => None,
        }
    }

    /// Form a match from the whole queue, ignoring readiness
    ///
    /// Returns `None` when fewer than `minimum` players are queued or a match
    /// is already in flight.
    pub fn force_form_match(
        &mut self,
        minimum: usize,
        now: DateTime<Utc>,
    ) -> Option<ForcedFormation> {
        if self.match_in_progress() || self.entries.len() < minimum.max(1) {
            return None;
        }

        let superseded = self.cancel_ready_check(CancelReason::Superseded, now);
        let formation = self.finalize(FormationKind::Forced, now);
        Some(ForcedFormation {
            formation,
            superseded,
        })
    }

    fn finalize(&mut self, kind: FormationKind, now: DateTime<Utc>) -> MatchFormation {
        let players: Vec<PlayerRef> = self.entries.drain(..).map(|e| e.player).collect();
        let team_assignment = assign_teams(&players);
        let region = select_region(&players, &self.config.default_region);

        let formation_id = generate_formation_id();
        self.ready_check = None;
        self.in_flight = Some(formation_id);
        self.check_invariants();

        MatchFormation {
            formation_id,
            players,
            team_assignment,
            region,
            kind,
            formed_at: now,
        }
    }

    /// Clear everything; returns the cancelled check if one was running
    pub fn reset(&mut self, now: DateTime<Utc>) -> Option<ReadyCheckCancelled> {
        self.entries.clear();
        let cancelled = self.cancel_ready_check(CancelReason::Reset, now);
        self.in_flight = None;
        cancelled
    }

    /// Re-open the queue after the match formed as `formation_id` ended or
    /// failed to start
    ///
    /// Only the formation currently holding the queue can release it; a match
    /// left over from before a reset is ignored. Returns whether the queue
    /// re-opened.
    pub fn release_match(&mut self, formation_id: FormationId) -> bool {
        if self.in_flight != Some(formation_id) {
            return false;
        }
        self.in_flight = None;
        true
    }

    /// Seconds each queued player has waited so far, in join order
    pub fn wait_times(&self, now: DateTime<Utc>) -> Vec<f64> {
        self.entries
            .iter()
            .map(|e| waiting_seconds(e.joined_at, now) as f64)
            .collect()
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> QueueSnapshot {
        let ready_set = self.ready_check.as_ref().map(|c| &c.ready_set);
        let members = self
            .entries
            .iter()
            .map(|entry| QueueMember {
                player: entry.player.clone(),
                joined_at: entry.joined_at,
                waiting_seconds: waiting_seconds(entry.joined_at, now),
                ready: ready_set.is_some_and(|set| set.contains(&entry.player.id)),
            })
            .collect();

        QueueSnapshot {
            size: self.entries.len(),
            capacity: self.config.capacity,
            members,
            ready_check_active: self.ready_check.is_some(),
            ready_count: ready_set.map(|set| set.len()),
            match_in_progress: self.match_in_progress(),
            taken_at: now,
        }
    }

    pub fn ready_status(&self) -> Option<ReadyStatus> {
        let check = self.ready_check.as_ref()?;
        let (ready, waiting): (Vec<&QueueEntry>, Vec<&QueueEntry>) = self
            .entries
            .iter()
            .partition(|e| check.ready_set.contains(&e.player.id));

        Some(ReadyStatus {
            check_id: check.id,
            ready_count: check.ready_set.len(),
            required: self.config.capacity,
            players_ready: ready.into_iter().map(|e| e.player.id.clone()).collect(),
            players_waiting: waiting.into_iter().map(|e| e.player.id.clone()).collect(),
            started_at: check.started_at,
            deadline: check.deadline,
        })
    }

    /// Panics when the state is inconsistent; that only happens through a bug
    pub fn check_invariants(&self) {
        assert!(
            self.entries.len() <= self.config.capacity,
            "queue holds {} entries, capacity is {}",
            self.entries.len(),
            self.config.capacity
        );

        let mut seen = HashSet::with_capacity(self.entries.len());
        for entry in &self.entries {
            assert!(
                seen.insert(entry.player.id.as_str()),
                "player {} is queued twice",
                entry.player.id
            );
        }

        if let Some(check) = &self.ready_check {
            for player_id in &check.ready_set {
                assert!(
                    seen.contains(player_id.as_str()),
                    "ready player {} has no queue entry",
                    player_id
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Team;
    use chrono::Duration as ChronoDuration;

    fn create_test_state(capacity: usize) -> QueueState {
        QueueState::new(QueueConfig {
            capacity,
            ..QueueConfig::default()
        })
    }

    fn create_test_player(n: usize) -> PlayerRef {
        PlayerRef::new(format!("player_{}", n), format!("Player {}", n))
    }

    fn fill(state: &mut QueueState, count: usize, now: DateTime<Utc>) {
        for i in 0..count {
            state.join(create_test_player(i), now);
        }
    }

    #[test]
    fn test_join_accepts_in_order() {
        let mut state = create_test_state(8);
        let now = Utc::now();

        let first = state.join(create_test_player(1), now);
        let second = state.join(create_test_player(2), now);

        assert_eq!(
            first,
            JoinOutcome::Accepted {
                position: 1,
                queue_size: 1,
                ready_check: None
            }
        );
        assert!(matches!(second, JoinOutcome::Accepted { position: 2, .. }));
        assert_eq!(state.len(), 2);
    }

    #[test]
    fn test_join_rejections() {
        let mut state = create_test_state(2);
        let now = Utc::now();

        state.join(create_test_player(1), now);
        assert_eq!(
            state.join(create_test_player(1), now),
            JoinOutcome::AlreadyQueued
        );

        state.join(create_test_player(2), now);
        assert_eq!(state.join(create_test_player(3), now), JoinOutcome::QueueFull);

        state.force_form_match(1, now).unwrap();
        assert_eq!(
            state.join(create_test_player(4), now),
            JoinOutcome::MatchInProgress
        );
    }

    #[test]
    fn test_filling_join_starts_ready_check() {
        let mut state = create_test_state(8);
        let now = Utc::now();
        fill(&mut state, 7, now);
        assert!(state.ready_check().is_none());

        let (queue_size, started) = match state.join(create_test_player(7), now) {
            JoinOutcome::Accepted {
                queue_size,
                ready_check: Some(started),
                ..
            } => (queue_size, started),
            other => panic!("expected ready check to start, got {:?}", other),
        };

        assert_eq!(queue_size, 8);
        assert_eq!(started.players.len(), 8);
        assert_eq!(started.deadline - started.started_at, ChronoDuration::seconds(60));
        assert_eq!(state.ready_check().map(|c| c.id), Some(started.check_id));
    }

    #[test]
    fn test_mark_ready_outcomes() {
        let mut state = create_test_state(4);
        let now = Utc::now();

        assert_eq!(
            state.mark_ready("player_0", now),
            ReadyOutcome::NoActiveCheck
        );

        fill(&mut state, 4, now);
        assert_eq!(state.mark_ready("stranger", now), ReadyOutcome::NotQueued);
        assert_eq!(
            state.mark_ready("player_0", now),
            ReadyOutcome::Accepted {
                ready_count: 1,
                required: 4
            }
        );
        assert_eq!(state.mark_ready("player_0", now), ReadyOutcome::AlreadyReady);
        assert_eq!(state.ready_check().unwrap().ready_set.len(), 1);
    }

    #[test]
    fn test_last_ready_finalizes_match() {
        let mut state = create_test_state(8);
        let now = Utc::now();
        fill(&mut state, 8, now);

        for i in 0..7 {
            state.mark_ready(&format!("player_{}", i), now);
        }
        let formation = match state.mark_ready("player_7", now) {
            ReadyOutcome::MatchFormed { formation } => formation,
            other => panic!("expected a formed match, got {:?}", other),
        };
        assert_eq!(formation.size(), 8);
        assert_eq!(formation.kind, FormationKind::ReadyCheck);
        assert_eq!(formation.team_of("player_3"), Some(Team::Red));
        assert_eq!(formation.team_of("player_4"), Some(Team::Blue));
        assert_eq!(formation.region, "Sydney");

        assert!(state.is_empty());
        assert!(state.ready_check().is_none());
        assert!(state.match_in_progress());
    }

    #[test]
    fn test_leave_during_check_keeps_check_running() {
        let mut state = create_test_state(4);
        let now = Utc::now();
        fill(&mut state, 4, now);
        state.mark_ready("player_1", now);

        let outcome = state.leave("player_1");
        assert_eq!(
            outcome,
            LeaveOutcome::Removed {
                queue_size: 3,
                was_ready: true
            }
        );
        assert!(state.ready_check().is_some());
        assert_eq!(state.ready_check().unwrap().ready_set.len(), 0);
        assert_eq!(state.leave("player_1"), LeaveOutcome::NotQueued);
    }

    #[test]
    fn test_rejoin_during_check_is_unready() {
        let mut state = create_test_state(4);
        let now = Utc::now();
        fill(&mut state, 4, now);
        let check_id = state.ready_check().unwrap().id;

        state.mark_ready("player_2", now);
        state.leave("player_2");
        let outcome = state.join(create_test_player(2), now);

        // Refilling the queue does not restart the running check
        assert!(matches!(
            outcome,
            JoinOutcome::Accepted {
                ready_check: None,
                ..
            }
        ));
        assert_eq!(state.ready_check().unwrap().id, check_id);
        let status = state.ready_status().unwrap();
        assert_eq!(status.ready_count, 0);
        assert!(status.players_waiting.contains(&"player_2".to_string()));
    }

    #[test]
    fn test_expire_only_matches_current_check() {
        let mut state = create_test_state(2);
        let now = Utc::now();
        fill(&mut state, 2, now);
        let check_id = state.ready_check().unwrap().id;

        assert!(state
            .expire_ready_check(generate_ready_check_id(), now)
            .is_none());
        assert!(state.ready_check().is_some());

        let cancelled = state.expire_ready_check(check_id, now).unwrap();
        assert_eq!(cancelled.reason, CancelReason::Timeout);
        assert_eq!(cancelled.remaining.len(), 2);
        assert_eq!(state.len(), 2);
        assert!(state.ready_check().is_none());

        assert!(state.expire_ready_check(check_id, now).is_none());
    }

    #[test]
    fn test_force_form_match() {
        let mut state = create_test_state(8);
        let now = Utc::now();
        fill(&mut state, 3, now);
        assert!(state.force_form_match(4, now).is_none());
        assert_eq!(state.len(), 3);

        state.join(create_test_player(3), now);
        let forced = state.force_form_match(4, now).unwrap();
        assert!(forced.superseded.is_none());
        assert_eq!(forced.formation.kind, FormationKind::Forced);
        assert_eq!(forced.formation.red_team().len(), 2);
        assert_eq!(forced.formation.blue_team().len(), 2);

        assert!(state.match_in_progress());
        assert!(state.force_form_match(0, now).is_none());
    }

    #[test]
    fn test_force_supersedes_active_check() {
        let mut state = create_test_state(4);
        let now = Utc::now();
        fill(&mut state, 4, now);
        state.mark_ready("player_0", now);

        let forced = state.force_form_match(4, now).unwrap();
        let superseded = forced.superseded.unwrap();
        assert_eq!(superseded.reason, CancelReason::Superseded);
        assert_eq!(superseded.ready_count, 1);
        assert_eq!(forced.formation.size(), 4);
        assert!(state.ready_check().is_none());
    }

    #[test]
    fn test_reset_and_release() {
        let mut state = create_test_state(2);
        let now = Utc::now();
        fill(&mut state, 2, now);

        let cancelled = state.reset(now).unwrap();
        assert_eq!(cancelled.reason, CancelReason::Reset);
        assert!(cancelled.remaining.is_empty());
        assert!(state.is_empty());

        fill(&mut state, 2, now);
        let forced = state.force_form_match(2, now).unwrap();
        assert_eq!(
            state.in_flight_formation(),
            Some(forced.formation.formation_id)
        );
        assert!(state.release_match(forced.formation.formation_id));
        assert!(!state.release_match(forced.formation.formation_id));
        assert!(matches!(
            state.join(create_test_player(9), now),
            JoinOutcome::Accepted { .. }
        ));
    }

    #[test]
    fn test_stale_formation_cannot_release_after_reset() {
        let mut state = create_test_state(2);
        let now = Utc::now();

        fill(&mut state, 2, now);
        let stale = state.force_form_match(2, now).unwrap().formation;
        state.reset(now);

        fill(&mut state, 2, now);
        let current = state.force_form_match(2, now).unwrap().formation;
        assert_ne!(stale.formation_id, current.formation_id);

        assert!(!state.release_match(stale.formation_id));
        assert!(state.match_in_progress());
        assert_eq!(
            state.join(create_test_player(7), now),
            JoinOutcome::MatchInProgress
        );

        assert!(state.release_match(current.formation_id));
        assert!(!state.match_in_progress());
    }

    #[test]
    fn test_snapshot_reports_members_and_waits() {
        let mut state = create_test_state(3);
        let start = Utc::now();
        state.join(create_test_player(1).with_region("Perth"), start);
        state.join(create_test_player(2), start + ChronoDuration::seconds(30));

        let snapshot = state.snapshot(start + ChronoDuration::seconds(90));
        assert_eq!(snapshot.size, 2);
        assert_eq!(snapshot.capacity, 3);
        assert!(!snapshot.ready_check_active);
        assert_eq!(snapshot.ready_count, None);
        assert_eq!(snapshot.members[0].waiting_seconds, 90);
        assert_eq!(snapshot.members[1].waiting_seconds, 60);
        assert_eq!(snapshot.members[0].player.region.as_deref(), Some("Perth"));

        state.join(create_test_player(3), start);
        state.mark_ready("player_2", start);
        let snapshot = state.snapshot(start);
        assert!(snapshot.ready_check_active);
        assert_eq!(snapshot.ready_count, Some(1));
        assert!(snapshot.members[1].ready);
        assert!(!snapshot.members[0].ready);
    }

    #[test]
    fn test_ready_status() {
        let mut state = create_test_state(3);
        let now = Utc::now();
        assert!(state.ready_status().is_none());

        fill(&mut state, 3, now);
        state.mark_ready("player_1", now);

        let status = state.ready_status().unwrap();
        assert_eq!(status.ready_count, 1);
        assert_eq!(status.required, 3);
        assert_eq!(status.players_ready, vec!["player_1".to_string()]);
        assert_eq!(
            status.players_waiting,
            vec!["player_0".to_string(), "player_2".to_string()]
        );
    }
}
