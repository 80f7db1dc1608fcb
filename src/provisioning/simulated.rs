//! In-process provisioner used by the simulator and tests

use super::{InstanceInfo, InstanceStatus, ServerProvisioner, TerminationReport};
use crate::error::{MatchmakingError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug, Clone)]
struct SimulatedInstance {
    region: String,
    map_name: String,
    polls: u32,
    terminated: bool,
}

/// A server request seen by the simulator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerRequestRecord {
    pub instance_id: String,
    pub region: String,
    pub map_name: String,
}

/// Provisioner that fakes instance boot without leaving the process
///
/// Each instance reports `pending` for a configurable number of polls and
/// then `running` with an address. Failures can be injected for requests or
/// for the instance lifecycle.
pub struct SimulatedProvisioner {
    polls_until_ready: Option<u32>,
    request_failure: Option<String>,
    failed_state: Option<String>,
    next_id: AtomicU64,
    instances: Mutex<HashMap<String, SimulatedInstance>>,
}

impl Default for SimulatedProvisioner {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedProvisioner {
    /// Instances become ready on the second poll
    pub fn new() -> Self {
        Self {
            polls_until_ready: Some(2),
            request_failure: None,
            failed_state: None,
            next_id: AtomicU64::new(1),
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// Number of polls an instance reports `pending` before it gets an address
    pub fn with_polls_until_ready(mut self, polls: u32) -> Self {
        self.polls_until_ready = Some(polls);
        self
    }

    /// Instances never get an address
    pub fn never_ready(mut self) -> Self {
        self.polls_until_ready = None;
        self
    }

    /// Every server request fails with `message`
    pub fn failing_requests(mut self, message: impl Into<String>) -> Self {
        self.request_failure = Some(message.into());
        self
    }

    /// Instances report `state` on every poll
    pub fn with_failed_state(mut self, state: impl Into<String>) -> Self {
        self.failed_state = Some(state.into());
        self
    }

    fn instances(&self) -> Result<MutexGuard<'_, HashMap<String, SimulatedInstance>>> {
        self.instances
            .lock()
            .map_err(|_| MatchmakingError::lock_poisoned("simulated instances").into())
    }

    /// All server requests received so far, oldest first
    pub fn requests(&self) -> Result<Vec<ServerRequestRecord>> {
        let instances = self.instances()?;
        let mut records: Vec<ServerRequestRecord> = instances
            .iter()
            .map(|(id, instance)| ServerRequestRecord {
                instance_id: id.clone(),
                region: instance.region.clone(),
                map_name: instance.map_name.clone(),
            })
            .collect();
        records.sort_by_key(|r| instance_number(&r.instance_id));
        Ok(records)
    }

    /// Instances that have not been terminated
    pub fn running_count(&self) -> Result<usize> {
        Ok(self.instances()?.values().filter(|i| !i.terminated).count())
    }
}

fn instance_number(instance_id: &str) -> u64 {
    instance_id
        .trim_start_matches("sim-")
        .parse()
        .unwrap_or(u64::MAX)
}

fn simulated_address(instance_id: &str) -> String {
    format!("198.51.100.{}", instance_number(instance_id) % 250 + 1)
}

#[async_trait]
impl ServerProvisioner for SimulatedProvisioner {
    async fn request_server(&self, region: &str, map_name: &str) -> Result<InstanceInfo> {
        if let Some(message) = &self.request_failure {
            return Err(MatchmakingError::ProvisioningFailed {
                message: message.clone(),
            }
            .into());
        }

        let instance_id = format!("sim-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.instances()?.insert(
            instance_id.clone(),
            SimulatedInstance {
                region: region.to_string(),
                map_name: map_name.to_string(),
                polls: 0,
                terminated: false,
            },
        );
        debug!(instance_id = %instance_id, region, map_name, "Simulated server requested");

        Ok(InstanceInfo {
            instance_id,
            status: "pending".to_string(),
            public_address: None,
        })
    }

    async fn poll_status(&self, instance_id: &str) -> Result<InstanceStatus> {
        let mut instances = self.instances()?;
        let instance = instances.get_mut(instance_id).ok_or_else(|| {
            MatchmakingError::ProvisioningFailed {
                message: format!("Unknown instance {}", instance_id),
            }
        })?;

        if instance.terminated {
            return Ok(InstanceStatus {
                status: "terminated".to_string(),
                public_address: None,
            });
        }
        if let Some(state) = &self.failed_state {
            return Ok(InstanceStatus {
                status: state.clone(),
                public_address: None,
            });
        }

        instance.polls += 1;
        let ready = self
            .polls_until_ready
            .is_some_and(|threshold| instance.polls >= threshold);

        Ok(if ready {
            InstanceStatus {
                status: "running".to_string(),
                public_address: Some(simulated_address(instance_id)),
            }
        } else {
            InstanceStatus {
                status: "pending".to_string(),
                public_address: None,
            }
        })
    }

    async fn terminate_all(&self) -> Result<TerminationReport> {
        let mut instances = self.instances()?;
        let mut terminated_count = 0;
        for instance in instances.values_mut().filter(|i| !i.terminated) {
            instance.terminated = true;
            terminated_count += 1;
        }
        Ok(TerminationReport { terminated_count })
    }

    async fn list_servers(&self) -> Result<Vec<InstanceInfo>> {
        let instances = self.instances()?;
        let mut servers: Vec<InstanceInfo> = instances
            .iter()
            .filter(|(_, instance)| !instance.terminated)
            .map(|(instance_id, instance)| {
                let ready = self.failed_state.is_none()
                    && self
                        .polls_until_ready
                        .is_some_and(|threshold| instance.polls >= threshold);
                let status = match &self.failed_state {
                    Some(state) => state.clone(),
                    None if ready => "running".to_string(),
                    None => "pending".to_string(),
                };
                InstanceInfo {
                    instance_id: instance_id.clone(),
                    status,
                    public_address: ready.then(|| simulated_address(instance_id)),
                }
            })
            .collect();
        servers.sort_by_key(|server| instance_number(&server.instance_id));
        Ok(servers)
    }
}
