//! Scan platform agent: registers with the master, then loops on
//! heartbeat/pull/execute/report against whatever `DispatchTask`s land in
//! its queue.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Arg, Command};
use scan_shared::protocol::{HeartbeatRequest, RegisterAgentRequest, TaskStatusReport, ToolScanResult};
use scan_shared::types::{AgentId, AgentStatus, StageType, ToolResultStatus};
use tracing::{error, info, warn};

use scan_agent::config::AgentConfig;
use scan_agent::fingerprint::RuleStore;
use scan_agent::limiter::AimdLimiter;
use scan_agent::pipeline::Pipeline;
use scan_agent::transport::MasterClient;

const CAPABILITIES: &[StageType] =
    &[StageType::IpAlive, StageType::PortScan, StageType::ServiceScan, StageType::WebScan];

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let matches = Command::new("scan-agent")
        .version(env!("CARGO_PKG_VERSION"))
        .author("AgentAsKit Contributors")
        .about("Distributed scan platform worker")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .get_matches();

    let config_path = matches.get_one::<PathBuf>("config").map(|p| p.to_string_lossy().to_string());
    let config = AgentConfig::load(config_path.as_deref())?;

    info!("starting scan-agent, hostname={}", config.hostname);

    let client = MasterClient::new(config.master.clone());
    let registration = client
        .register_with_retry(&RegisterAgentRequest {
            hostname: config.hostname.clone(),
            ip: "0.0.0.0".to_string(),
            port: 0,
            version: env!("CARGO_PKG_VERSION").to_string(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            capabilities: CAPABILITIES.to_vec(),
            tags: Vec::new(),
            task_support: CAPABILITIES.to_vec(),
        })
        .await?;

    let agent_id: AgentId = registration.agent_id;
    info!("registered as agent {agent_id}");

    let alive_limiter = Arc::new(AimdLimiter::new(
        config.limiters.alive_probe.initial,
        config.limiters.alive_probe.min,
        config.limiters.alive_probe.max,
    ));
    let service_limiter = Arc::new(AimdLimiter::new(
        config.limiters.service_scan.initial,
        config.limiters.service_scan.min,
        config.limiters.service_scan.max,
    ));
    let rules = Arc::new(RuleStore::new());
    let pipeline = Pipeline::new(alive_limiter, service_limiter, rules);

    let mut in_flight = 0u32;
    loop {
        let heartbeat = client
            .heartbeat(&HeartbeatRequest {
                agent_id,
                status: AgentStatus::Online,
                in_flight,
                metrics: serde_json::json!({}),
                last_task_id: None,
            })
            .await;

        if let Err(e) = &heartbeat {
            warn!("heartbeat failed: {e}");
        }

        match client.pull_tasks(agent_id).await {
            Ok(tasks) => {
                in_flight = tasks.len() as u32;
                for task in tasks {
                    let report = match execute(&pipeline, &task).await {
                        Ok(result) => TaskStatusReport {
                            task_id: task.task_id,
                            status: ToolResultStatus::Completed,
                            error: None,
                            result: Some(result),
                        },
                        Err(e) => TaskStatusReport {
                            task_id: task.task_id,
                            status: ToolResultStatus::Failed,
                            error: Some(e.to_string()),
                            result: None,
                        },
                    };
                    if let Err(e) = client.report_task(&report).await {
                        error!("failed to report task {}: {e}", task.task_id);
                    }
                }
                in_flight = 0;
            }
            Err(e) => warn!("failed to pull tasks: {e}"),
        }

        tokio::time::sleep(Duration::from_secs(config.heartbeat_interval_secs)).await;
    }
}

async fn execute(pipeline: &Pipeline, task: &scan_shared::protocol::DispatchTask) -> Result<ToolScanResult> {
    let result = match task.task_type {
        StageType::IpAlive => pipeline.run_alive(&task.targets).await,
        StageType::PortScan => {
            let port_range = task.params.get("ports").and_then(|v| v.as_str()).unwrap_or("1-1000");
            let scan_rate = task.params.get("scan_rate").and_then(|v| v.as_u64()).unwrap_or(1000) as u32;
            pipeline.run_port_scan(&task.targets, port_range, scan_rate, task.task_id).await?
        }
        StageType::ServiceScan => {
            let brute_enabled = task.params.get("brute_enabled").and_then(|v| v.as_bool()).unwrap_or(false);
            let ports: Vec<_> = task
                .targets
                .iter()
                .map(|ip| scan_shared::protocol::PortResult {
                    ip: ip.clone(),
                    port: task.params.get("port").and_then(|v| v.as_u64()).unwrap_or(0) as u16,
                    protocol: "tcp".to_string(),
                    state: "open".to_string(),
                    service: None,
                    product: None,
                    version: None,
                    banner: None,
                    cpe: None,
                })
                .collect();
            pipeline.run_service_scan(&ports, brute_enabled, task.task_id).await?
        }
        _ => ToolScanResult::default(),
    };
    Ok(result)
}
