use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error(transparent)]
    Core(#[from] scan_shared::CoreError),

    #[error("config error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("registration failed after {0} attempts")]
    RegistrationExhausted(u32),

    #[error("adapter '{0}' does not support tool '{1}'")]
    UnsupportedTool(String, String),

    #[error("subprocess failed: {0}")]
    SubprocessFailure(String),

    #[error("deadline exceeded")]
    Timeout,
}

pub type AgentResult<T> = std::result::Result<T, AgentError>;
