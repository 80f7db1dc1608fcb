//! Test fixtures and mock implementations for integration testing

#![allow(dead_code)]

use async_trait::async_trait;
use pug_queue::amqp::MockEventPublisher;
use pug_queue::error::{MatchmakingError, Result};
use pug_queue::orchestrator::{InMemoryRecordStore, MatchOrchestrator, OrchestratorConfig};
use pug_queue::provisioning::{InstanceInfo, InstanceStatus, ServerProvisioner, TerminationReport};
use pug_queue::queue::{MatchmakingQueue, QueueConfig};
use pug_queue::service::CommandDispatcher;
use pug_queue::types::{CommandEnvelope, GatewayEvent, PlayerRef, QueueCommand};
use pug_queue::utils::current_timestamp;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Provisioner that replays a fixed script of poll results
///
/// The last scripted status repeats once the script runs out.
pub struct ScriptedProvisioner {
    request_error: Option<String>,
    statuses: Mutex<VecDeque<InstanceStatus>>,
    last_status: Mutex<InstanceStatus>,
    requests: Mutex<Vec<(String, String)>>,
    live: Mutex<Vec<String>>,
    polls: AtomicU32,
    terminations: AtomicU32,
}

impl ScriptedProvisioner {
    pub fn new(statuses: Vec<InstanceStatus>) -> Self {
        let last_status = statuses.last().cloned().unwrap_or_else(pending);
        Self {
            request_error: None,
            statuses: Mutex::new(statuses.into()),
            last_status: Mutex::new(last_status),
            requests: Mutex::new(Vec::new()),
            live: Mutex::new(Vec::new()),
            polls: AtomicU32::new(0),
            terminations: AtomicU32::new(0),
        }
    }

    /// Ready after `pending_polls` pending responses
    pub fn ready_after(pending_polls: usize) -> Self {
        let mut statuses: Vec<InstanceStatus> = (0..pending_polls).map(|_| pending()).collect();
        statuses.push(running("203.0.113.10"));
        Self::new(statuses)
    }

    pub fn failing_requests(message: &str) -> Self {
        let mut provisioner = Self::new(vec![]);
        provisioner.request_error = Some(message.to_string());
        provisioner
    }

    pub fn requests(&self) -> Vec<(String, String)> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn poll_count(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn termination_count(&self) -> u32 {
        self.terminations.load(Ordering::SeqCst)
    }
}

pub fn pending() -> InstanceStatus {
    InstanceStatus {
        status: "pending".to_string(),
        public_address: None,
    }
}

pub fn running(address: &str) -> InstanceStatus {
    InstanceStatus {
        status: "running".to_string(),
        public_address: Some(address.to_string()),
    }
}

pub fn failed(state: &str) -> InstanceStatus {
    InstanceStatus {
        status: state.to_string(),
        public_address: None,
    }
}

#[async_trait]
impl ServerProvisioner for ScriptedProvisioner {
    async fn request_server(&self, region: &str, map_name: &str) -> Result<InstanceInfo> {
        if let Some(message) = &self.request_error {
            return Err(MatchmakingError::ProvisioningFailed {
                message: message.clone(),
            }
            .into());
        }

        let mut requests = self
            .requests
            .lock()
            .map_err(|_| MatchmakingError::lock_poisoned("requests"))?;
        requests.push((region.to_string(), map_name.to_string()));
        let instance_id = format!("i-{}", requests.len());
        self.live
            .lock()
            .map_err(|_| MatchmakingError::lock_poisoned("live servers"))?
            .push(instance_id.clone());

        Ok(InstanceInfo {
            instance_id,
            status: "pending".to_string(),
            public_address: None,
        })
    }

    async fn poll_status(&self, _instance_id: &str) -> Result<InstanceStatus> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .statuses
            .lock()
            .map_err(|_| MatchmakingError::lock_poisoned("statuses"))?
            .pop_front();

        match next {
            Some(status) => Ok(status),
            None => Ok(self
                .last_status
                .lock()
                .map_err(|_| MatchmakingError::lock_poisoned("last status"))?
                .clone()),
        }
    }

    async fn terminate_all(&self) -> Result<TerminationReport> {
        self.terminations.fetch_add(1, Ordering::SeqCst);
        let mut live = self
            .live
            .lock()
            .map_err(|_| MatchmakingError::lock_poisoned("live servers"))?;
        let terminated_count = live.len() as u32;
        live.clear();
        Ok(TerminationReport { terminated_count })
    }

    async fn list_servers(&self) -> Result<Vec<InstanceInfo>> {
        let status = self
            .last_status
            .lock()
            .map_err(|_| MatchmakingError::lock_poisoned("last status"))?
            .clone();
        let live = self
            .live
            .lock()
            .map_err(|_| MatchmakingError::lock_poisoned("live servers"))?;
        Ok(live
            .iter()
            .map(|instance_id| InstanceInfo {
                instance_id: instance_id.clone(),
                status: status.status.clone(),
                public_address: status.public_address.clone(),
            })
            .collect())
    }
}

/// Queue, orchestrator and dispatcher wired to in-memory collaborators
pub struct TestSystem {
    pub queue: MatchmakingQueue,
    pub orchestrator: Arc<MatchOrchestrator>,
    pub dispatcher: Arc<CommandDispatcher>,
    pub publisher: Arc<MockEventPublisher>,
    pub records: Arc<InMemoryRecordStore>,
}

impl TestSystem {
    pub fn new(capacity: usize, provisioner: Arc<dyn ServerProvisioner>) -> Self {
        Self::with_timeout(capacity, Duration::from_secs(60), provisioner)
    }

    pub fn with_timeout(
        capacity: usize,
        ready_check_timeout: Duration,
        provisioner: Arc<dyn ServerProvisioner>,
    ) -> Self {
        let queue = MatchmakingQueue::new(QueueConfig {
            capacity,
            ready_check_timeout,
            force_start_minimum: 2,
            ..QueueConfig::default()
        });
        let records = Arc::new(InMemoryRecordStore::default());
        let orchestrator = Arc::new(MatchOrchestrator::new(
            queue.clone(),
            provisioner,
            records.clone(),
            OrchestratorConfig {
                poll_interval: Duration::from_millis(5),
                max_poll_attempts: 4,
                ..OrchestratorConfig::default()
            },
        ));
        let publisher = Arc::new(MockEventPublisher::new());
        let dispatcher = Arc::new(CommandDispatcher::new(
            orchestrator.clone(),
            publisher.clone(),
        ));

        Self {
            queue,
            orchestrator,
            dispatcher,
            publisher,
            records,
        }
    }

    /// Events other than command replies, oldest first
    pub fn gateway_events(&self) -> Vec<GatewayEvent> {
        self.publisher
            .get_published_events()
            .into_iter()
            .filter(|event| !matches!(event, GatewayEvent::CommandReply(_)))
            .collect()
    }
}

pub fn test_player(i: usize) -> PlayerRef {
    PlayerRef::new(format!("{}", 100 + i), format!("Player{}", i)).with_region("Sydney")
}

pub fn envelope(command: QueueCommand) -> CommandEnvelope {
    CommandEnvelope {
        request_id: uuid::Uuid::new_v4().to_string(),
        command,
        timestamp: current_timestamp(),
    }
}

pub fn join_command(i: usize) -> QueueCommand {
    let player = test_player(i);
    QueueCommand::Join {
        player_id: player.id,
        display_name: player.display_name,
        region: player.region,
    }
}

pub fn ready_command(i: usize) -> QueueCommand {
    QueueCommand::Ready {
        player_id: test_player(i).id,
    }
}

/// Let spawned forwarders and timers run
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
