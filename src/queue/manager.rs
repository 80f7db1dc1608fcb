//! Shared matchmaking queue
//!
//! `MatchmakingQueue` wraps [`QueueState`] in a single mutex so every
//! transition is serialized, owns the ready-check deadline timer and
//! broadcasts queue notifications.

use crate::error::{MatchmakingError, Result};
use crate::metrics::MetricsCollector;
use crate::queue::state::{QueueConfig, QueueState};
use crate::types::{
    CancelReason, FormationId, JoinOutcome, LeaveOutcome, MatchFormation, PlayerRef,
    QueueNotification, QueueSnapshot, ReadyCheckCancelled, ReadyCheckId, ReadyOutcome,
    ReadyStatus,
};
use crate::utils::current_timestamp;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

const NOTIFICATION_CHANNEL_CAPACITY: usize = 256;

/// Running totals since process start
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub players_joined: u64,
    pub players_left: u64,
    pub ready_checks_started: u64,
    pub ready_checks_timed_out: u64,
    pub matches_formed: u64,
    pub forced_matches: u64,
}

/// Deadline task for one ready check
struct ReadyCheckTimer {
    check_id: ReadyCheckId,
    handle: AbortHandle,
}

struct Inner {
    state: QueueState,
    timer: Option<ReadyCheckTimer>,
    stats: QueueStats,
}

struct Shared {
    config: QueueConfig,
    inner: Mutex<Inner>,
    notifications: broadcast::Sender<QueueNotification>,
    metrics: Arc<MetricsCollector>,
}

/// The process-wide matchmaking queue
///
/// Cloning is cheap and every clone shares the same state. Mutating
/// operations start or abort the ready-check timer, so they must be called
/// from within a tokio runtime.
#[derive(Clone)]
pub struct MatchmakingQueue {
    shared: Arc<Shared>,
}

impl MatchmakingQueue {
    /// Create a new queue with its own metrics collector
    pub fn new(config: QueueConfig) -> Self {
        let metrics = Arc::new(MetricsCollector::new().unwrap_or_else(|_| {
            warn!("Failed to create metrics collector, using default");
            MetricsCollector::default()
        }));

        Self::with_metrics(config, metrics)
    }

    /// Create a new queue that records into the given metrics collector
    pub fn with_metrics(config: QueueConfig, metrics: Arc<MetricsCollector>) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CHANNEL_CAPACITY);

        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: QueueState::new(config.clone()),
                    timer: None,
                    stats: QueueStats::default(),
                }),
                config,
                notifications,
                metrics,
            }),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.shared.config
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.shared.metrics.clone()
    }

    /// Receive ready-check and match-formation notifications
    pub fn subscribe(&self) -> broadcast::Receiver<QueueNotification> {
        self.shared.notifications.subscribe()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.shared
            .inner
            .lock()
            .map_err(|_| MatchmakingError::lock_poisoned("queue state").into())
    }

    fn notify(&self, notification: QueueNotification) {
        // No subscribers is fine
        let _ = self.shared.notifications.send(notification);
    }

    fn announce_cancelled(&self, inner: &mut Inner, cancelled: ReadyCheckCancelled) {
        let outcome = match cancelled.reason {
            CancelReason::Timeout => {
                inner.stats.ready_checks_timed_out += 1;
                "timeout"
            }
            CancelReason::Reset => "reset",
            CancelReason::Superseded => "forced",
        };
        self.shared.metrics.record_ready_check_ended(outcome);
        self.notify(QueueNotification::ReadyCheckCancelled(cancelled));
    }

    fn announce_formed(&self, inner: &mut Inner, formation: &MatchFormation, waits: &[f64]) {
        inner.stats.matches_formed += 1;
        self.shared
            .metrics
            .record_match_formed(formation.kind, waits);
        self.shared.metrics.set_queue_size(inner.state.len());

        info!(
            players = formation.size(),
            region = %formation.region,
            kind = ?formation.kind,
            "Match formed"
        );
        self.notify(QueueNotification::MatchFormed(formation.clone()));
    }

    /// Add a player to the queue
    pub fn join(&self, player: PlayerRef) -> Result<JoinOutcome> {
        let now = current_timestamp();
        let mut inner = self.lock()?;
        let player_id = player.id.clone();

        let outcome = inner.state.join(player, now);
        match &outcome {
            JoinOutcome::Accepted {
                queue_size,
                ready_check,
                ..
            } => {
                inner.stats.players_joined += 1;
                self.shared.metrics.record_join("accepted", *queue_size);
                info!(player_id = %player_id, queue_size, "Player joined queue");

                if let Some(started) = ready_check {
                    inner.stats.ready_checks_started += 1;
                    self.shared.metrics.record_ready_check_started();
                    info!(
                        check_id = %started.check_id,
                        deadline = %started.deadline,
                        "Queue full, ready check started"
                    );
                    self.notify(QueueNotification::ReadyCheckStarted(started.clone()));
                }
            }
            rejected => {
                let label = match rejected {
                    JoinOutcome::AlreadyQueued => "already_queued",
                    JoinOutcome::QueueFull => "queue_full",
                    _ => "match_in_progress",
                };
                debug!(player_id = %player_id, result = label, "Join rejected");
                self.shared.metrics.record_join(label, inner.state.len());
            }
        }

        self.sync_timer(&mut inner);
        Ok(outcome)
    }

    /// Remove a player from the queue
    pub fn leave(&self, player_id: &str) -> Result<LeaveOutcome> {
        let mut inner = self.lock()?;

        let outcome = inner.state.leave(player_id);
        match &outcome {
            LeaveOutcome::Removed {
                queue_size,
                was_ready,
            } => {
                inner.stats.players_left += 1;
                self.shared.metrics.record_leave(*queue_size);
                info!(player_id, queue_size, was_ready, "Player left queue");
            }
            LeaveOutcome::NotQueued => debug!(player_id, "Leave ignored, player not queued"),
        }

        self.sync_timer(&mut inner);
        Ok(outcome)
    }

    /// Confirm a player's readiness for the active check
    pub fn mark_ready(&self, player_id: &str) -> Result<ReadyOutcome> {
        let now = current_timestamp();
        let mut inner = self.lock()?;
        let waits = inner.state.wait_times(now);

        let outcome = inner.state.mark_ready(player_id, now);
        match &outcome {
            ReadyOutcome::Accepted {
                ready_count,
                required,
            } => {
                debug!(player_id, ready_count, required, "Player ready");
            }
            ReadyOutcome::MatchFormed { formation } => {
                self.shared.metrics.record_ready_check_ended("completed");
                self.announce_formed(&mut inner, formation, &waits);
            }
            other => debug!(player_id, outcome = ?other, "Ready ignored"),
        }

        self.sync_timer(&mut inner);
        Ok(outcome)
    }

    /// Cancel the active ready check, keeping every player queued
    pub fn cancel_ready_check(&self) -> Result<Option<ReadyCheckCancelled>> {
        let now = current_timestamp();
        let mut inner = self.lock()?;

        let cancelled = inner.state.cancel_ready_check(CancelReason::Reset, now);
        if let Some(cancelled) = &cancelled {
            info!(check_id = %cancelled.check_id, "Ready check cancelled");
            self.announce_cancelled(&mut inner, cancelled.clone());
        }

        self.sync_timer(&mut inner);
        Ok(cancelled)
    }

    /// Time out the given ready check; called by its deadline timer
    ///
    /// Has no effect when the check already finalized or was replaced.
    pub fn expire_ready_check(&self, check_id: ReadyCheckId) -> Result<Option<ReadyCheckCancelled>> {
        let now = current_timestamp();
        let mut inner = self.lock()?;

        if inner.timer.as_ref().map(|t| t.check_id) == Some(check_id) {
            inner.timer = None;
        }

        let cancelled = inner.state.expire_ready_check(check_id, now);
        match &cancelled {
            Some(cancelled) => {
                info!(
                    check_id = %check_id,
                    ready_count = cancelled.ready_count,
                    queued = cancelled.remaining.len(),
                    "Ready check timed out"
                );
                self.announce_cancelled(&mut inner, cancelled.clone());
            }
            None => debug!(check_id = %check_id, "Stale ready check timer ignored"),
        }

        self.sync_timer(&mut inner);
        Ok(cancelled)
    }

    /// Form a match from the current queue regardless of readiness
    ///
    /// `minimum` defaults to the configured force start minimum.
    pub fn force_form_match(&self, minimum: Option<usize>) -> Result<Option<MatchFormation>> {
        let now = current_timestamp();
        let minimum = minimum.unwrap_or(self.shared.config.force_start_minimum);
        let mut inner = self.lock()?;
        let waits = inner.state.wait_times(now);

        let forced = inner.state.force_form_match(minimum, now);
        let formation = match forced {
            Some(forced) => {
                if let Some(superseded) = forced.superseded {
                    info!(check_id = %superseded.check_id, "Ready check superseded by forced start");
                    self.announce_cancelled(&mut inner, superseded);
                }
                inner.stats.forced_matches += 1;
                self.announce_formed(&mut inner, &forced.formation, &waits);
                Some(forced.formation)
            }
            None => {
                debug!(
                    minimum,
                    queued = inner.state.len(),
                    match_in_progress = inner.state.match_in_progress(),
                    "Forced start refused"
                );
                None
            }
        };

        self.sync_timer(&mut inner);
        Ok(formation)
    }

    /// Clear the queue, any ready check and the in-progress flag
    pub fn reset(&self) -> Result<()> {
        let now = current_timestamp();
        let mut inner = self.lock()?;

        if let Some(cancelled) = inner.state.reset(now) {
            self.announce_cancelled(&mut inner, cancelled);
        }
        self.shared.metrics.set_queue_size(0);
        self.shared.metrics.set_match_in_progress(false);
        info!("Queue reset");

        self.sync_timer(&mut inner);
        Ok(())
    }

    /// Re-open the queue once the in-flight match has ended or failed
    ///
    /// Only the formation currently holding the queue can release it; a
    /// formation from before a reset is ignored.
    pub fn release_match(&self, formation_id: FormationId) -> Result<bool> {
        let mut inner = self.lock()?;
        let released = inner.state.release_match(formation_id);
        if released {
            self.shared.metrics.set_match_in_progress(false);
            debug!("Queue re-opened for new joins");
        } else {
            debug!(
                formation_id = %formation_id,
                "Ignoring release from a formation that no longer holds the queue"
            );
        }
        Ok(released)
    }

    pub fn status(&self) -> Result<QueueSnapshot> {
        let now = current_timestamp();
        let inner = self.lock()?;
        Ok(inner.state.snapshot(now))
    }

    pub fn ready_status(&self) -> Result<Option<ReadyStatus>> {
        let inner = self.lock()?;
        Ok(inner.state.ready_status())
    }

    pub fn stats(&self) -> Result<QueueStats> {
        let inner = self.lock()?;
        Ok(inner.stats.clone())
    }

    /// Keep exactly one deadline timer for the active ready check
    fn sync_timer(&self, inner: &mut Inner) {
        let active = inner.state.ready_check().map(|check| check.id);

        if let Some(timer) = &inner.timer {
            if Some(timer.check_id) == active {
                return;
            }
        }

        if let Some(stale) = inner.timer.take() {
            stale.handle.abort();
        }

        if let Some(check_id) = active {
            let shared: Weak<Shared> = Arc::downgrade(&self.shared);
            let timeout = self.shared.config.ready_check_timeout;

            let handle = tokio::spawn(async move {
                tokio::time::sleep(timeout).await;

                let Some(shared) = shared.upgrade() else {
                    return;
                };
                let queue = MatchmakingQueue { shared };
                if let Err(e) = queue.expire_ready_check(check_id) {
                    error!(check_id = %check_id, "Failed to expire ready check: {}", e);
                }
            });

            inner.timer = Some(ReadyCheckTimer {
                check_id,
                handle: handle.abort_handle(),
            });
        }
    }
}
