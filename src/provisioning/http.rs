//! HTTP client for the provisioning lifecycle API

use super::{InstanceInfo, InstanceStatus, ServerProvisioner, TerminationReport};
use crate::error::{MatchmakingError, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Serialize)]
struct ServerRequest<'a> {
    region: &'a str,
    map_name: &'a str,
}

/// Provisioner backed by a JSON HTTP API
///
/// Endpoints, relative to the base URL:
/// - `POST /servers` with `{region, map_name}`
/// - `GET /servers/{id}`
/// - `GET /servers`
/// - `POST /servers/terminate-all`
pub struct HttpProvisioner {
    base_url: String,
    token: Option<String>,
    http: Client,
}

impl HttpProvisioner {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MatchmakingError::ConfigurationError {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> Result<T> {
        let response: Response = self.authorized(request).send().await.map_err(|e| {
            MatchmakingError::ProvisioningFailed {
                message: format!("{} request failed: {}", what, e),
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!("Provisioning API error on {}: {} - {}", what, status, body);
            return Err(MatchmakingError::ProvisioningFailed {
                message: format!("{} returned {}: {}", what, status, body),
            }
            .into());
        }

        response.json::<T>().await.map_err(|e| {
            MatchmakingError::ProvisioningFailed {
                message: format!("Failed to parse {} response: {}", what, e),
            }
            .into()
        })
    }
}

#[async_trait]
impl ServerProvisioner for HttpProvisioner {
    async fn request_server(&self, region: &str, map_name: &str) -> Result<InstanceInfo> {
        debug!(region, map_name, "Requesting game server");
        let request = self
            .http
            .post(self.url("/servers"))
            .json(&ServerRequest { region, map_name });
        self.send(request, "request server").await
    }

    async fn poll_status(&self, instance_id: &str) -> Result<InstanceStatus> {
        let request = self.http.get(self.url(&format!("/servers/{}", instance_id)));
        self.send(request, "poll status").await
    }

    async fn terminate_all(&self) -> Result<TerminationReport> {
        let request = self.http.post(self.url("/servers/terminate-all"));
        self.send(request, "terminate all").await
    }

    async fn list_servers(&self) -> Result<Vec<InstanceInfo>> {
        let request = self.http.get(self.url("/servers"));
        self.send(request, "list servers").await
    }
}
