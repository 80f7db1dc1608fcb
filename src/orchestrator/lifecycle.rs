//! Match lifecycle: provision a server for a formed match, track it while it
//! runs and close it out.

use crate::error::{MatchmakingError, Result};
use crate::metrics::MetricsCollector;
use crate::orchestrator::records::MatchRecordStore;
use crate::provisioning::{InstanceInfo, ServerProvisioner};
use crate::queue::MatchmakingQueue;
use crate::types::{
    MatchFormation, MatchId, MatchOutcome, MatchRecord, MatchResult, MatchStart, MatchStatus,
    ProvisionFailure, ServerEndpoint, Team,
};
use crate::utils::{current_timestamp, duration_minutes, generate_match_id};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Map every match is played on
    pub map_name: String,
    pub poll_interval: Duration,
    /// Status polls before giving up on a server
    pub max_poll_attempts: u32,
    /// Tear down leftover servers before requesting a new one
    pub terminate_existing_servers: bool,
    /// Tear down servers once a match is completed
    pub terminate_on_complete: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            map_name: "dm4".to_string(),
            poll_interval: Duration::from_secs(5),
            max_poll_attempts: 60,
            terminate_existing_servers: true,
            terminate_on_complete: true,
        }
    }
}

/// Turns match formations into running matches
///
/// Owns no queue state of its own; it only re-opens the queue once the
/// match it was handed has ended or failed to start. Matches that outlive a
/// queue reset stay tracked until completed, but completing them never
/// re-opens a queue held by a newer formation.
pub struct MatchOrchestrator {
    queue: MatchmakingQueue,
    provisioner: Arc<dyn ServerProvisioner>,
    records: Arc<dyn MatchRecordStore>,
    config: OrchestratorConfig,
    active: Mutex<Vec<MatchRecord>>,
    metrics: Arc<MetricsCollector>,
}

impl MatchOrchestrator {
    pub fn new(
        queue: MatchmakingQueue,
        provisioner: Arc<dyn ServerProvisioner>,
        records: Arc<dyn MatchRecordStore>,
        config: OrchestratorConfig,
    ) -> Self {
        let metrics = queue.metrics();
        Self {
            queue,
            provisioner,
            records,
            config,
            active: Mutex::new(Vec::new()),
            metrics,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn queue(&self) -> &MatchmakingQueue {
        &self.queue
    }

    pub fn records(&self) -> Arc<dyn MatchRecordStore> {
        self.records.clone()
    }

    fn active(&self) -> Result<MutexGuard<'_, Vec<MatchRecord>>> {
        self.active
            .lock()
            .map_err(|_| MatchmakingError::lock_poisoned("active match").into())
    }

    /// The most recently started match still being played, if any
    pub fn active_match(&self) -> Result<Option<MatchRecord>> {
        Ok(self.active()?.last().cloned())
    }

    /// Every started match that has not been completed, oldest first
    pub fn active_matches(&self) -> Result<Vec<MatchRecord>> {
        Ok(self.active()?.clone())
    }

    /// Provision a server for `formation` and start the match
    ///
    /// A provisioning failure re-opens the queue and is returned as
    /// [`MatchStart::ProvisionFailed`]; it is never retried here.
    pub async fn start_match(&self, formation: MatchFormation) -> Result<MatchStart> {
        let timer = self.metrics.start_timer();
        info!(
            players = formation.size(),
            region = %formation.region,
            map = %self.config.map_name,
            "Provisioning server for match"
        );

        if self.config.terminate_existing_servers {
            self.terminate_servers("before match start").await;
        }

        match self.provision(&formation).await {
            Ok(server) => {
                let record = MatchRecord {
                    match_id: generate_match_id(),
                    formation,
                    server,
                    map_name: self.config.map_name.clone(),
                    started_at: current_timestamp(),
                };

                if let Err(e) = self.track(&record) {
                    error!(match_id = %record.match_id, "Could not track started match: {}", e);
                    self.metrics.record_provisioning_failure("untracked");
                    self.queue.release_match(record.formation.formation_id)?;
                    self.terminate_servers("after untracked start").await;
                    return Err(e);
                }

                self.metrics.record_provisioning_success(timer.stop());
                info!(
                    match_id = %record.match_id,
                    address = %record.server.public_address,
                    "🎮 Match started"
                );
                Ok(MatchStart::Started { record })
            }
            Err(reason) => {
                error!(region = %formation.region, "Failed to start match: {}", reason);
                self.metrics.record_provisioning_failure(failure_label(&reason));
                self.queue.release_match(formation.formation_id)?;

                if !matches!(reason, ProvisionFailure::Provider { .. })
                    && self.config.terminate_on_complete
                {
                    self.terminate_servers("after failed start").await;
                }

                let now = current_timestamp();
                let result = MatchResult {
                    match_id: generate_match_id(),
                    status: MatchStatus::Failed,
                    winner: None,
                    region: formation.region.clone(),
                    map_name: self.config.map_name.clone(),
                    server_instance_id: failed_instance_id(&reason),
                    red_team: roster_ids(&formation, Team::Red),
                    blue_team: roster_ids(&formation, Team::Blue),
                    started_at: formation.formed_at,
                    ended_at: now,
                    duration_minutes: 0,
                };
                self.store_result(&formation, &result).await;

                Ok(MatchStart::ProvisionFailed { reason })
            }
        }
    }

    fn track(&self, record: &MatchRecord) -> Result<()> {
        let mut active = self.active()?;
        if let Some(previous) = active.last() {
            debug!(
                match_id = %previous.match_id,
                "Earlier match still running alongside the new one"
            );
        }
        active.push(record.clone());
        Ok(())
    }

    /// Request a server and poll until it has a public address
    async fn provision(
        &self,
        formation: &MatchFormation,
    ) -> std::result::Result<ServerEndpoint, ProvisionFailure> {
        let info = self
            .provisioner
            .request_server(&formation.region, &self.config.map_name)
            .await
            .map_err(|e| ProvisionFailure::Provider {
                message: e.to_string(),
            })?;

        let instance_id = info.instance_id;
        if let Some(address) = info.public_address.filter(|a| !a.trim().is_empty()) {
            return Ok(ServerEndpoint {
                instance_id,
                public_address: address,
            });
        }

        let attempts = self.config.max_poll_attempts;
        for attempt in 1..=attempts {
            match self.provisioner.poll_status(&instance_id).await {
                Ok(status) if status.has_failed() => {
                    return Err(ProvisionFailure::InstanceFailed {
                        instance_id,
                        status: status.status,
                    });
                }
                Ok(status) => {
                    if let Some(address) = status.ready_address() {
                        return Ok(ServerEndpoint {
                            instance_id,
                            public_address: address.to_string(),
                        });
                    }
                    debug!(instance_id = %instance_id, attempt, status = %status.status, "Server not ready");
                }
                Err(e) => {
                    warn!(instance_id = %instance_id, attempt, "Status poll failed: {}", e);
                }
            }

            if attempt < attempts {
                sleep(self.config.poll_interval).await;
            }
        }

        Err(ProvisionFailure::ReadinessTimeout {
            instance_id,
            attempts,
        })
    }

    /// Close out the active match and re-open the queue
    pub async fn complete_match(
        &self,
        match_id: MatchId,
        outcome: MatchOutcome,
    ) -> Result<MatchResult> {
        let record = {
            let mut active = self.active()?;
            match active.iter().position(|r| r.match_id == match_id) {
                Some(index) => active.remove(index),
                None => {
                    return Err(MatchmakingError::MatchNotFound {
                        match_id: match_id.to_string(),
                    }
                    .into());
                }
            }
        };

        let (status, winner) = match outcome {
            MatchOutcome::Completed { winner } => (MatchStatus::Completed, winner),
            MatchOutcome::Cancelled => (MatchStatus::Cancelled, None),
        };

        let ended_at = current_timestamp();
        let result = MatchResult {
            match_id,
            status,
            winner,
            region: record.formation.region.clone(),
            map_name: record.map_name.clone(),
            server_instance_id: Some(record.server.instance_id.clone()),
            red_team: roster_ids(&record.formation, Team::Red),
            blue_team: roster_ids(&record.formation, Team::Blue),
            started_at: record.started_at,
            ended_at,
            duration_minutes: duration_minutes(record.started_at, ended_at),
        };

        if !self.queue.release_match(record.formation.formation_id)? {
            debug!(match_id = %match_id, "Queue already re-opened or held by a newer match");
        }
        self.metrics.record_match_completed(status);
        info!(
            match_id = %match_id,
            status = %status,
            winner = ?winner,
            duration_minutes = result.duration_minutes,
            "Match finished"
        );

        self.store_result(&record.formation, &result).await;
        if self.config.terminate_on_complete {
            self.terminate_servers("after match").await;
        }

        Ok(result)
    }

    async fn store_result(&self, formation: &MatchFormation, result: &MatchResult) {
        if let Err(e) = self.records.record_match(formation, result).await {
            warn!(match_id = %result.match_id, "Failed to record match: {}", e);
        }
    }

    /// Servers the provider is currently running for us
    pub async fn list_servers(&self) -> Result<Vec<InstanceInfo>> {
        let servers = self.provisioner.list_servers().await?;
        debug!(count = servers.len(), "Listed provider servers");
        Ok(servers)
    }

    /// Terminate all servers, logging instead of failing
    async fn terminate_servers(&self, context: &str) {
        match self.provisioner.terminate_all().await {
            Ok(report) if report.terminated_count > 0 => {
                info!(terminated = report.terminated_count, "Terminated servers {}", context);
            }
            Ok(_) => debug!("No servers to terminate {}", context),
            Err(e) => warn!("Failed to terminate servers {}: {}", context, e),
        }
    }
}

fn roster_ids(formation: &MatchFormation, team: Team) -> Vec<String> {
    formation
        .roster(team)
        .into_iter()
        .map(|p| p.id.clone())
        .collect()
}

fn failure_label(reason: &ProvisionFailure) -> &'static str {
    match reason {
        ProvisionFailure::Provider { .. } => "provider",
        ProvisionFailure::ReadinessTimeout { .. } => "readiness_timeout",
        ProvisionFailure::InstanceFailed { .. } => "instance_failed",
    }
}

fn failed_instance_id(reason: &ProvisionFailure) -> Option<String> {
    match reason {
        ProvisionFailure::Provider { .. } => None,
        ProvisionFailure::ReadinessTimeout { instance_id, .. }
        | ProvisionFailure::InstanceFailed { instance_id, .. } => Some(instance_id.clone()),
    }
}
