//! Agent<->Master message shapes. These are the in-memory representation;
//! `master`/`agent` map them onto the gRPC service defined over the same
//! fields (see DESIGN.md).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::ExecutionPolicy;
use crate::types::{AgentId, StageType, TaskId, TaskPriority, ToolResultStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterAgentRequest {
    pub hostname: String,
    pub ip: String,
    pub port: u16,
    pub version: String,
    pub os: String,
    pub arch: String,
    pub capabilities: Vec<StageType>,
    pub tags: Vec<String>,
    pub task_support: Vec<StageType>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterAgentResponse {
    pub agent_id: AgentId,
    pub token: String,
    pub config: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub agent_id: AgentId,
    pub status: crate::types::AgentStatus,
    pub in_flight: u32,
    pub metrics: Value,
    pub last_task_id: Option<TaskId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub next_interval_secs: u64,
    pub pending_commands: Vec<Command>,
    pub config_updated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchTask {
    pub task_id: TaskId,
    pub task_type: StageType,
    pub targets: Vec<String>,
    pub params: Value,
    pub execution_policy: ExecutionPolicy,
    pub deadline: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusReport {
    pub task_id: TaskId,
    pub status: ToolResultStatus,
    pub error: Option<String>,
    pub result: Option<ToolScanResult>,
}

/// Uniform intermediate shape every scanner-output parser normalizes into
/// (see [`crate::parsers`]).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolScanResult {
    #[serde(default)]
    pub hosts: Vec<HostResult>,
    #[serde(default)]
    pub ports: Vec<PortResult>,
    #[serde(default)]
    pub webs: Vec<WebResult>,
    #[serde(default)]
    pub vulns: Vec<VulnResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostResult {
    pub ip: String,
    pub alive: bool,
    pub ttl: Option<u8>,
    pub rtt_ms: Option<f64>,
    pub os_guess: Option<String>,
    pub hostname: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortResult {
    pub ip: String,
    pub port: u16,
    pub protocol: String,
    pub state: String,
    pub service: Option<String>,
    pub product: Option<String>,
    pub version: Option<String>,
    pub banner: Option<String>,
    pub cpe: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebResult {
    pub url: String,
    pub ip: String,
    pub port: u16,
    pub title: Option<String>,
    pub status_code: Option<u16>,
    pub tech_stack: Vec<String>,
    pub headers: std::collections::HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VulnResult {
    pub template_id: String,
    pub name: String,
    pub severity: String,
    pub description: String,
    pub proof: String,
    pub reference: Vec<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub id: uuid::Uuid,
    pub command_type: String,
    pub action: String,
    pub payload: Value,
    pub priority: TaskPriority,
    pub timeout_secs: u64,
    pub expire_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    pub command_id: uuid::Uuid,
    pub agent_id: AgentId,
    pub success: bool,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub duration_ms: u64,
}
