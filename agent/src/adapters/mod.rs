//! Scanner adapter trait (§4.6): wraps an external scan tool behind a
//! uniform request/result envelope so the pipeline never branches on which
//! binary is actually running.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::Instant;

use scan_shared::protocol::ToolScanResult;

use crate::error::{AgentError, AgentResult};

pub mod nmap;
pub mod masscan;

pub use masscan::MasscanAdapter;
pub use nmap::NmapAdapter;

#[derive(Debug, Clone)]
pub struct AdapterRequest {
    pub task_id: scan_shared::types::TaskId,
    pub tool_name: String,
    pub tool_parameters: Value,
    pub targets: Vec<String>,
    pub timeout: Duration,
    pub output_path: PathBuf,
    pub working_dir: PathBuf,
    pub environment: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterStatus {
    NotStarted,
    Running,
    Exited,
}

#[derive(Debug, Clone, Default)]
pub struct ResourceUsage {
    pub wall_time: Duration,
}

#[derive(Debug, Clone)]
pub struct AdapterResult {
    pub status: AdapterStatus,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub output_files: Vec<PathBuf>,
    pub parsed: Option<ToolScanResult>,
    pub resource_usage: ResourceUsage,
}

#[async_trait]
pub trait ScannerAdapter: Send + Sync {
    fn name(&self) -> &str;
    fn supported_tools(&self) -> &[&str];

    fn validate(&self, request: &AdapterRequest) -> AgentResult<()> {
        if !self.supported_tools().contains(&request.tool_name.as_str()) {
            return Err(AgentError::UnsupportedTool(self.name().to_string(), request.tool_name.clone()));
        }
        Ok(())
    }

    async fn execute(&self, request: &AdapterRequest) -> AgentResult<AdapterResult>;

    /// Best-effort cooperative stop; adapters without a running subprocess
    /// (already exited) treat this as a no-op.
    async fn stop(&self) -> AgentResult<()> {
        Ok(())
    }

    fn status(&self) -> AdapterStatus {
        AdapterStatus::NotStarted
    }

    /// Removes any scratch files the adapter wrote beyond the requested
    /// output path.
    async fn cleanup(&self, _request: &AdapterRequest) -> AgentResult<()> {
        Ok(())
    }
}

/// Runs a subprocess to completion with a deadline, capturing stdout/stderr.
/// Shared by every adapter that shells out to a CLI tool rather than linking
/// a library.
pub(crate) async fn run_subprocess(
    binary: &str,
    args: &[String],
    request: &AdapterRequest,
) -> AgentResult<(AdapterResult, Vec<u8>)> {
    let started = Instant::now();
    let mut command = Command::new(binary);
    command
        .args(args)
        .current_dir(&request.working_dir)
        .envs(&request.environment)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command.spawn().map_err(|e| AgentError::SubprocessFailure(e.to_string()))?;

    let mut stdout_pipe = child.stdout.take().expect("stdout piped");
    let mut stderr_pipe = child.stderr.take().expect("stderr piped");
    let mut stdout_buf = Vec::new();
    let mut stderr_buf = Vec::new();

    let wait = async {
        let _ = tokio::join!(stdout_pipe.read_to_end(&mut stdout_buf), stderr_pipe.read_to_end(&mut stderr_buf));
        child.wait().await
    };

    let exit_status = match tokio::time::timeout(request.timeout, wait).await {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => return Err(AgentError::SubprocessFailure(e.to_string())),
        Err(_) => {
            let _ = child.kill().await;
            return Err(AgentError::Timeout);
        }
    };

    let result = AdapterResult {
        status: AdapterStatus::Exited,
        exit_code: exit_status.code(),
        stdout: String::from_utf8_lossy(&stdout_buf).to_string(),
        stderr: String::from_utf8_lossy(&stderr_buf).to_string(),
        output_files: Vec::new(),
        parsed: None,
        resource_usage: ResourceUsage { wall_time: started.elapsed() },
    };
    Ok((result, stdout_buf))
}
