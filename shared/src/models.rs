//! Entity definitions for the data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::types::{
    AgentId, AgentStatus, EntityTagSource, PocStatus, ProjectId, ProjectStatus, ScheduleKind,
    StageId, StageType, TagId, TaskId, TaskPriority, TaskStatus, VulnStatus, VulnTarget,
    WorkflowId,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    /// Textual list of CIDRs/IPs/domains forming the seed target scope.
    pub target_scope: Vec<String>,
    pub schedule_kind: ScheduleKind,
    pub cron_expression: Option<String>,
    pub status: ProjectStatus,
    pub last_exec_time: Option<DateTime<Utc>>,
    pub enabled: bool,
    /// Extended seed-target payload (opaque to the scheduler, consumed by
    /// resolver sources of type `manual`/`api`).
    pub seed_payload: Value,
    pub workflow_ids: Vec<WorkflowId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub name: String,
    pub version: u32,
    pub enabled: bool,
    pub global_variables: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanStage {
    pub id: StageId,
    pub workflow_id: WorkflowId,
    pub name: String,
    pub stage_type: StageType,
    pub predecessor_ids: Vec<StageId>,
    pub tool_name: String,
    pub tool_parameters: Value,
    pub target_policy: TargetPolicy,
    pub execution_policy: ExecutionPolicy,
    pub performance: PerformanceSettings,
    pub output_config: OutputConfig,
    pub notify_config: Option<NotifyConfig>,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetPolicy {
    pub sources: Vec<TargetSource>,
    pub whitelist_enabled: bool,
    pub whitelist: Vec<String>,
    pub skip_conditions: Vec<SkipCondition>,
    pub shuffle: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TargetSource {
    Manual { value: String },
    File { path: String },
    Db { query_id: String },
    View { query_id: String },
    Sql { query_id: String },
    Api { endpoint: String },
    PreviousStage { stage_name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOperator {
    Equals,
    NotEquals,
    Contains,
    StartsWith,
    EndsWith,
    Regex,
    Like,
    In,
    NotIn,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Cidr,
    Exists,
    IsNull,
    IsNotNull,
    ListContains,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkipCondition {
    pub field: String,
    pub operator: MatchOperator,
    pub value: Value,
    #[serde(default)]
    pub ignore_case: bool,
}

/// Recursive predicate tree shared by skip-condition evaluation and the
/// tagging engine's match rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchNode {
    And { nodes: Vec<MatchNode> },
    Or { nodes: Vec<MatchNode> },
    Leaf {
        field: String,
        operator: MatchOperator,
        value: Value,
        #[serde(default)]
        ignore_case: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPolicy {
    pub proxy: Option<String>,
    pub priority: TaskPriority,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceSettings {
    pub scan_rate: u32,
    pub concurrency: u32,
    pub chunk_size: u32,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub propagate_to_next: bool,
    pub persist: bool,
    pub file_path: Option<String>,
    pub best_effort: bool,
    pub tolerated_failure_ratio: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    pub on_failure: bool,
    pub on_completion: bool,
    pub channels: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTask {
    pub id: TaskId,
    pub project_id: ProjectId,
    pub workflow_id: WorkflowId,
    pub stage_id: StageId,
    pub task_type: StageType,
    pub input_target: Vec<String>,
    pub tool_parameters: Value,
    pub assigned_agent_id: Option<AgentId>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub result_payload: Option<Value>,
}

impl AgentTask {
    /// Enforces the monotonic transition rule: terminal states never move,
    /// the `Assigned|Running -> Pending` retry path must originate from a
    /// non-terminal state.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        if next == TaskStatus::Pending {
            return matches!(self.status, TaskStatus::Assigned | TaskStatus::Running);
        }
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub hostname: String,
    pub address: String,
    pub port: u16,
    pub status: AgentStatus,
    pub capabilities: Vec<StageType>,
    pub tags: Vec<String>,
    pub last_heartbeat: DateTime<Utc>,
    pub in_flight: u32,
    pub version: String,
    pub os: String,
    pub arch: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AssetUnified {
    pub project_id: ProjectId,
    pub ip: String,
    pub port: u16,
    pub protocol: Option<String>,
    pub service: Option<String>,
    pub product: Option<String>,
    pub version: Option<String>,
    pub banner: Option<String>,
    pub hostname: Option<String>,
    pub os: Option<String>,
    pub url: Option<String>,
    pub title: Option<String>,
    pub status_code: Option<u16>,
    pub tech_stack: Vec<String>,
    pub fingerprint: Option<String>,
    pub is_web: bool,
    pub source: Option<String>,
    pub sync_time: Option<DateTime<Utc>>,
}

impl AssetUnified {
    /// `(project_id, ip, port)` unique key.
    pub fn key(&self) -> (ProjectId, String, u16) {
        (self.project_id, self.ip.clone(), self.port)
    }

    /// Newer attributes overwrite; an empty incoming field never overwrites
    /// a non-empty existing one.
    pub fn merge_from(&mut self, other: &AssetUnified) {
        macro_rules! merge_opt {
            ($field:ident) => {
                if other.$field.is_some() {
                    self.$field = other.$field.clone();
                }
            };
        }
        merge_opt!(protocol);
        merge_opt!(service);
        merge_opt!(product);
        merge_opt!(version);
        merge_opt!(banner);
        merge_opt!(hostname);
        merge_opt!(os);
        merge_opt!(url);
        merge_opt!(title);
        merge_opt!(status_code);
        merge_opt!(fingerprint);
        merge_opt!(source);
        if !other.tech_stack.is_empty() {
            self.tech_stack = other.tech_stack.clone();
        }
        self.is_web = self.is_web || other.is_web;
        if other.sync_time.is_some() {
            self.sync_time = other.sync_time;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetVuln {
    pub id: String,
    pub target: VulnTarget,
    pub cve_or_id: String,
    pub severity: String,
    pub confidence: f32,
    pub evidence: Value,
    pub attributes: Value,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub status: VulnStatus,
    pub verify_status: Option<String>,
    pub verified_by: Option<String>,
    pub verify_result: Option<Value>,
}

impl AssetVuln {
    /// `(target_type, target_ref_id, cve || id_alias)` dedup key.
    pub fn dedup_key(&self) -> (String, String, String) {
        let target_type = match &self.target {
            VulnTarget::Host { .. } => "host",
            VulnTarget::Service { .. } => "service",
            VulnTarget::Web { .. } => "web",
        };
        (
            target_type.to_string(),
            self.target.ref_id().to_string(),
            self.cve_or_id.clone(),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetVulnPoc {
    pub id: String,
    pub vuln_id: String,
    pub status: PocStatus,
    pub priority: TaskPriority,
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub id: TagId,
    pub name: String,
    pub parent_id: Option<TagId>,
    pub path: String,
    pub color: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityTag {
    pub entity_type: String,
    pub entity_id: String,
    pub tag_id: TagId,
    pub source: EntityTagSource,
    pub rule_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRule {
    pub id: String,
    pub target_tag: TagId,
    pub entity_type: String,
    pub priority: TaskPriority,
    pub enabled: bool,
    pub tree: MatchNode,
}
