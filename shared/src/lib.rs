//! Cross-cutting data models, protocol shapes, error taxonomy, config
//! fragments and scanner-output parsers shared by `master` and `agent`.

pub mod classify;
pub mod config;
pub mod error;
pub mod models;
pub mod parsers;
pub mod protocol;
pub mod types;

pub use error::{CoreError, CoreResult};
