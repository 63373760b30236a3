//! Port-scan stage (§4.4): expands the alive host set into an open-port
//! list via the masscan adapter, rate-limited by the stage's configured
//! `scan_rate` rather than the AIMD limiter (masscan already self-paces).

use scan_shared::protocol::PortResult;

use crate::adapters::{AdapterRequest, MasscanAdapter, ScannerAdapter};
use crate::error::AgentResult;

pub async fn scan_ports(ip: &str, ports: &str, scan_rate: u32, task_id: scan_shared::types::TaskId) -> AgentResult<Vec<PortResult>> {
    let adapter = MasscanAdapter;
    let request = AdapterRequest {
        task_id,
        tool_name: "masscan".to_string(),
        tool_parameters: serde_json::json!({ "rate": scan_rate, "ports": ports }),
        targets: vec![ip.to_string()],
        timeout: std::time::Duration::from_secs(120),
        output_path: std::env::temp_dir(),
        working_dir: std::env::temp_dir(),
        environment: Default::default(),
    };
    let result = adapter.execute(&request).await?;
    Ok(result.parsed.map(|p| p.ports).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_port_range_parses_as_literal_string() {
        // masscan takes `-p` as a free-form range string; this just guards
        // against accidentally re-parsing it as a number upstream.
        let ports = "1-65535";
        assert!(ports.contains('-'));
    }
}
