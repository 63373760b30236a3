use thiserror::Error;

#[derive(Error, Debug)]
pub enum MasterError {
    #[error(transparent)]
    Core(#[from] scan_shared::CoreError),

    #[error("config error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("project not found: {0}")]
    ProjectNotFound(uuid::Uuid),

    #[error("workflow not found: {0}")]
    WorkflowNotFound(uuid::Uuid),

    #[error("stage not found: {0}")]
    StageNotFound(uuid::Uuid),

    #[error("no candidate agent available for task {0}")]
    NoCandidateAgent(uuid::Uuid),

    #[error("dispatch queue full")]
    QueueFull,

    #[error("cron expression invalid: {0}")]
    InvalidCron(String),
}

pub type MasterResult<T> = std::result::Result<T, MasterError>;
