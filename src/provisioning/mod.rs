//! Game server provisioning
//!
//! The orchestrator talks to the compute provider through [`ServerProvisioner`].
//! `HttpProvisioner` calls a real lifecycle API; `SimulatedProvisioner` runs
//! in-process for the simulator and tests.

pub mod http;
pub mod simulated;

pub use http::HttpProvisioner;
pub use simulated::SimulatedProvisioner;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Instance states that will never produce a usable server
pub const FAILED_INSTANCE_STATES: &[&str] = &["shutting-down", "terminated", "stopping", "stopped"];

/// Response to a server request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub instance_id: String,
    pub status: String,
    #[serde(default)]
    pub public_address: Option<String>,
}

/// Current state of a requested instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceStatus {
    pub status: String,
    /// Absent until the instance is reachable
    #[serde(default)]
    pub public_address: Option<String>,
}

impl InstanceStatus {
    /// Whether the instance has given up on ever becoming ready
    pub fn has_failed(&self) -> bool {
        FAILED_INSTANCE_STATES.contains(&self.status.as_str())
    }

    /// The public address, if one has been assigned
    pub fn ready_address(&self) -> Option<&str> {
        self.public_address
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminationReport {
    pub terminated_count: u32,
}

/// Lifecycle API for dedicated game servers
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ServerProvisioner: Send + Sync {
    /// Ask for a new server in `region` running `map_name`
    async fn request_server(&self, region: &str, map_name: &str) -> Result<InstanceInfo>;

    /// Look up a previously requested instance
    async fn poll_status(&self, instance_id: &str) -> Result<InstanceStatus>;

    /// Tear down every server the provider is running for us
    async fn terminate_all(&self) -> Result<TerminationReport>;

    /// Servers the provider is currently running for us
    async fn list_servers(&self) -> Result<Vec<InstanceInfo>>;
}
