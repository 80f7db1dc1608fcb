//! Gateway command dispatch
//!
//! Translates [`QueueCommand`]s into queue and orchestrator calls, publishes
//! a [`CommandReply`] for each one, and forwards ready-check notifications to
//! the gateway. Match starts run on their own tasks so provisioning never
//! blocks command processing.

use crate::amqp::handlers::CommandHandler;
use crate::amqp::publisher::EventPublisher;
use crate::error::{MatchmakingError, Result};
use crate::metrics::MetricsCollector;
use crate::orchestrator::MatchOrchestrator;
use crate::queue::MatchmakingQueue;
use crate::types::*;
use crate::utils::current_timestamp;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

pub struct CommandDispatcher {
    queue: MatchmakingQueue,
    orchestrator: Arc<MatchOrchestrator>,
    publisher: Arc<dyn EventPublisher>,
    metrics: Arc<MetricsCollector>,
    match_starts: Mutex<JoinSet<()>>,
}

impl CommandDispatcher {
    pub fn new(orchestrator: Arc<MatchOrchestrator>, publisher: Arc<dyn EventPublisher>) -> Self {
        let queue = orchestrator.queue().clone();
        let metrics = queue.metrics();
        Self {
            queue,
            orchestrator,
            publisher,
            metrics,
            match_starts: Mutex::new(JoinSet::new()),
        }
    }

    pub fn queue(&self) -> &MatchmakingQueue {
        &self.queue
    }

    pub fn orchestrator(&self) -> Arc<MatchOrchestrator> {
        self.orchestrator.clone()
    }

    /// Execute one command and publish its reply
    ///
    /// Invalid commands and unknown match ids become
    /// [`CommandOutcome::Rejected`], as do provider errors while listing
    /// servers. Anything else is an operational error.
    pub async fn dispatch(&self, envelope: CommandEnvelope) -> Result<CommandReply> {
        let timer = self.metrics.start_timer();
        let command_name = envelope.command.name();

        let outcome = match self.execute(envelope.command).await {
            Ok(outcome) => outcome,
            Err(e) => match e.downcast_ref::<MatchmakingError>() {
                Some(MatchmakingError::InvalidCommand { .. })
                | Some(MatchmakingError::MatchNotFound { .. })
                | Some(MatchmakingError::ProvisioningFailed { .. }) => {
                    info!(
                        request_id = %envelope.request_id,
                        command = command_name,
                        "Command rejected: {}",
                        e
                    );
                    CommandOutcome::Rejected {
                        reason: e.to_string(),
                    }
                }
                _ => return Err(e),
            },
        };

        let reply = CommandReply {
            request_id: envelope.request_id,
            outcome,
            queue: self.queue.status()?,
            timestamp: current_timestamp(),
        };
        self.publisher.publish_command_reply(reply.clone()).await?;

        self.metrics.record_command(command_name, timer.stop());
        Ok(reply)
    }

    async fn execute(&self, command: QueueCommand) -> Result<CommandOutcome> {
        match command {
            QueueCommand::Join {
                player_id,
                display_name,
                region,
            } => {
                let player = self
                    .orchestrator
                    .records()
                    .find_or_create_player(&player_id, &display_name, region.as_deref())
                    .await?;
                Ok(CommandOutcome::Join(self.queue.join(player)?))
            }
            QueueCommand::Leave { player_id } => {
                Ok(CommandOutcome::Leave(self.queue.leave(&player_id)?))
            }
            QueueCommand::Ready { player_id } => {
                let outcome = self.queue.mark_ready(&player_id)?;
                if let ReadyOutcome::MatchFormed { formation } = &outcome {
                    self.launch_match(formation.clone())?;
                }
                Ok(CommandOutcome::Ready(outcome))
            }
            QueueCommand::Status => Ok(CommandOutcome::Status {
                ready: self.queue.ready_status()?.map(Into::into),
            }),
            QueueCommand::ForceStart { minimum } => {
                let formation = self.queue.force_form_match(minimum)?;
                if let Some(formation) = &formation {
                    self.launch_match(formation.clone())?;
                }
                Ok(CommandOutcome::ForceStart { formation })
            }
            QueueCommand::Reset => {
                self.queue.reset()?;
                Ok(CommandOutcome::Reset)
            }
            QueueCommand::CompleteMatch { match_id, outcome } => {
                let result = self.orchestrator.complete_match(match_id, outcome).await?;
                let event = MatchCompleted {
                    result: result.clone(),
                    timestamp: current_timestamp(),
                };
                if let Err(e) = self.publisher.publish_match_completed(event).await {
                    warn!(match_id = %match_id, "Failed to publish match completion: {}", e);
                }
                Ok(CommandOutcome::CompleteMatch { result })
            }
            QueueCommand::Profile { player_id } => Ok(CommandOutcome::Profile {
                profile: self.orchestrator.records().player_profile(&player_id).await?,
            }),
            QueueCommand::RecentMatches { limit } => Ok(CommandOutcome::RecentMatches {
                matches: self
                    .orchestrator
                    .records()
                    .recent_matches(limit.min(MAX_RECENT_MATCHES))
                    .await?,
            }),
            QueueCommand::Servers => Ok(CommandOutcome::Servers {
                servers: self.orchestrator.list_servers().await?,
            }),
        }
    }

    /// Hand a formed match to its own start task
    ///
    /// If the task cannot be launched the queue is re-opened before the
    /// error is returned.
    fn launch_match(&self, formation: MatchFormation) -> Result<()> {
        let orchestrator = self.orchestrator.clone();
        let publisher = self.publisher.clone();

        let mut match_starts = match self.match_starts.lock() {
            Ok(match_starts) => match_starts,
            Err(_) => {
                error!(
                    formation_id = %formation.formation_id,
                    "Cannot launch match start, re-opening queue"
                );
                self.queue.release_match(formation.formation_id)?;
                return Err(MatchmakingError::lock_poisoned("match starts").into());
            }
        };
        while match_starts.try_join_next().is_some() {}
        match_starts.spawn(run_match_start(orchestrator, publisher, formation));
        Ok(())
    }

    /// Wait for every match start launched so far to finish
    pub async fn wait_for_match_starts(&self) -> Result<()> {
        let mut pending = {
            let mut match_starts = self
                .match_starts
                .lock()
                .map_err(|_| MatchmakingError::lock_poisoned("match starts"))?;
            std::mem::take(&mut *match_starts)
        };

        while let Some(joined) = pending.join_next().await {
            if let Err(e) = joined {
                warn!("Match start task ended abnormally: {}", e);
            }
        }
        Ok(())
    }

    /// Forward ready-check notifications from the queue to the gateway
    pub fn spawn_event_forwarder(&self) -> JoinHandle<()> {
        let mut notifications = self.queue.subscribe();
        let publisher = self.publisher.clone();

        tokio::spawn(async move {
            info!("Ready-check event forwarder started");
            loop {
                let published = match notifications.recv().await {
                    Ok(QueueNotification::ReadyCheckStarted(event)) => {
                        publisher.publish_ready_check_started(event).await
                    }
                    Ok(QueueNotification::ReadyCheckCancelled(event)) => {
                        publisher.publish_ready_check_cancelled(event).await
                    }
                    // Match starts are published once provisioning resolves
                    Ok(QueueNotification::MatchFormed(_)) => Ok(()),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Event forwarder lagged, {} notifications dropped", skipped);
                        Ok(())
                    }
                    Err(RecvError::Closed) => break,
                };

                if let Err(e) = published {
                    error!("Failed to publish ready-check event: {}", e);
                }
            }
            info!("Ready-check event forwarder stopped");
        })
    }

    /// Reject a delivery that never made it to [`Self::dispatch`]
    async fn reject_raw(&self, request_id: String, reason: String) -> Result<()> {
        let reply = CommandReply {
            request_id,
            outcome: CommandOutcome::Rejected { reason },
            queue: self.queue.status()?,
            timestamp: current_timestamp(),
        };
        self.publisher.publish_command_reply(reply).await
    }
}

async fn run_match_start(
    orchestrator: Arc<MatchOrchestrator>,
    publisher: Arc<dyn EventPublisher>,
    formation: MatchFormation,
) {
    let published = match orchestrator.start_match(formation.clone()).await {
        Ok(MatchStart::Started { record }) => {
            publisher
                .publish_match_started(MatchStarted {
                    record,
                    timestamp: current_timestamp(),
                })
                .await
        }
        Ok(MatchStart::ProvisionFailed { reason }) => {
            publisher
                .publish_match_failed(MatchFailed {
                    formation,
                    reason,
                    timestamp: current_timestamp(),
                })
                .await
        }
        Err(e) => {
            error!("Match start aborted: {}", e);
            if let Err(e) = orchestrator.queue().release_match(formation.formation_id) {
                error!("Failed to re-open queue after aborted start: {}", e);
            }
            Ok(())
        }
    };

    if let Err(e) = published {
        error!("Failed to publish match start result: {}", e);
    }
}

#[async_trait]
impl CommandHandler for CommandDispatcher {
    async fn handle_command(&self, envelope: CommandEnvelope) -> Result<()> {
        let timer = self.metrics.start_timer();
        let request_id = envelope.request_id.clone();
        let result = self.dispatch(envelope).await;
        self.metrics
            .record_amqp_operation("handle_command", result.is_ok(), timer.stop());

        let reply = result?;
        debug!(request_id = %request_id, queue_size = reply.queue.size, "Command handled");
        Ok(())
    }

    async fn handle_error(&self, error: MatchmakingError, message_data: &[u8]) {
        warn!(
            "Dropping command ({} bytes): {}",
            message_data.len(),
            error
        );

        let request_id = serde_json::from_slice::<serde_json::Value>(message_data)
            .ok()
            .and_then(|value| value.get("request_id")?.as_str().map(str::to_string));

        if let Some(request_id) = request_id {
            if let Err(e) = self.reject_raw(request_id, error.to_string()).await {
                error!("Failed to publish rejection: {}", e);
            }
        }
    }
}
