//! Newtype identifiers and the status/priority enums shared by every entity
//! in the data model.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn nil() -> Self {
                Self(Uuid::nil())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$name> for Uuid {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

uuid_id!(ProjectId);
uuid_id!(WorkflowId);
uuid_id!(StageId);
uuid_id!(TaskId);
uuid_id!(AgentId);
uuid_id!(TagId);

/// How a project's workflow run is triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    Manual,
    Once,
    Cron,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Idle,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageType {
    IpAlive,
    PortScan,
    ServiceScan,
    WebScan,
    VulnScan,
    Brute,
    Custom,
}

/// An `AgentTask` transitions monotonically through this enum except for
/// the retry path `Assigned | Running -> Pending`. Terminal states are
/// `Succeeded`, `Failed`, `Cancelled`, `Timeout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Assigned,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    Timeout,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Cancelled | TaskStatus::Timeout
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low = 0,
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl Default for TaskPriority {
    fn default() -> Self {
        TaskPriority::Normal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Online,
    Offline,
    Busy,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VulnStatus {
    Open,
    Confirmed,
    Resolved,
    Ignored,
    FalsePositive,
}

/// Per-PoC lifecycle used to implement "first PoC to reach `Verified` wins"
/// (see DESIGN.md — Open Question: PoC selection strategy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PocStatus {
    Pending,
    Running,
    Verified,
    Failed,
    Superseded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityTagSource {
    Manual,
    Auto,
    Propagation,
}

impl EntityTagSource {
    /// `manual > propagation > auto`; a higher value must never be
    /// overwritten by a write at a lower precedence.
    pub fn precedence(self) -> u8 {
        match self {
            EntityTagSource::Manual => 2,
            EntityTagSource::Propagation => 1,
            EntityTagSource::Auto => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolResultStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

/// Target identified by host, service, or web facet — used by `AssetVuln`
/// as a polymorphic finding target (sum type, per the design notes on
/// preferring a tagged-variant representation over a storage-level union).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "target_type", rename_all = "snake_case")]
pub enum VulnTarget {
    Host { ref_id: String },
    Service { ref_id: String },
    Web { ref_id: String },
}

impl VulnTarget {
    pub fn ref_id(&self) -> &str {
        match self {
            VulnTarget::Host { ref_id } => ref_id,
            VulnTarget::Service { ref_id } => ref_id,
            VulnTarget::Web { ref_id } => ref_id,
        }
    }
}
