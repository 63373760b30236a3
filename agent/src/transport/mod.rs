//! HTTP client for the master's agent-facing API (§6): registration with
//! retry/backoff, heartbeat, task pull, and result reporting.

use std::time::Duration;

use scan_shared::protocol::{
    DispatchTask, HeartbeatRequest, HeartbeatResponse, RegisterAgentRequest, RegisterAgentResponse,
    TaskStatusReport,
};
use scan_shared::types::AgentId;
use tracing::warn;

use crate::config::MasterConnection;
use crate::error::{AgentError, AgentResult};

pub struct MasterClient {
    client: reqwest::Client,
    base_url: String,
    config: MasterConnection,
}

impl MasterClient {
    pub fn new(config: MasterConnection) -> Self {
        Self {
            client: reqwest::Client::builder().timeout(Duration::from_secs(30)).build().unwrap_or_default(),
            base_url: config.base_url.clone(),
            config,
        }
    }

    /// Retries registration with a fixed backoff up to `registration_retries`
    /// attempts; a master that is still starting up should not strand the
    /// agent permanently.
    pub async fn register_with_retry(&self, request: &RegisterAgentRequest) -> AgentResult<RegisterAgentResponse> {
        let mut last_err = None;
        for attempt in 1..=self.config.registration_retries {
            match self.register(request).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    warn!("registration attempt {attempt}/{} failed: {e}", self.config.registration_retries);
                    last_err = Some(e);
                    tokio::time::sleep(Duration::from_secs(self.config.registration_backoff_secs)).await;
                }
            }
        }
        let _ = last_err;
        Err(AgentError::RegistrationExhausted(self.config.registration_retries))
    }

    async fn register(&self, request: &RegisterAgentRequest) -> AgentResult<RegisterAgentResponse> {
        let response = self.client.post(format!("{}/v1/agents/register", self.base_url)).json(request).send().await?;
        Ok(response.error_for_status()?.json().await?)
    }

    pub async fn heartbeat(&self, request: &HeartbeatRequest) -> AgentResult<HeartbeatResponse> {
        let response = self.client.post(format!("{}/v1/agents/heartbeat", self.base_url)).json(request).send().await?;
        Ok(response.error_for_status()?.json().await?)
    }

    pub async fn pull_tasks(&self, agent_id: AgentId) -> AgentResult<Vec<DispatchTask>> {
        let response = self.client.get(format!("{}/v1/agents/{}/tasks", self.base_url, agent_id)).send().await?;
        Ok(response.error_for_status()?.json().await?)
    }

    pub async fn report_task(&self, report: &TaskStatusReport) -> AgentResult<()> {
        self.client.post(format!("{}/v1/tasks/report", self.base_url)).json(report).send().await?.error_for_status()?;
        Ok(())
    }
}
