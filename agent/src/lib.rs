pub mod adapters;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod limiter;
pub mod pipeline;
pub mod transport;

pub use config::AgentConfig;
pub use error::{AgentError, AgentResult};
