//! Masscan adapter: high-rate alive/port probing. Output carries no
//! product/version data, unlike nmap.

use async_trait::async_trait;
use scan_shared::parsers::parse_masscan_json;

use super::{run_subprocess, AdapterRequest, AdapterResult, ScannerAdapter};
use crate::error::AgentResult;

pub struct MasscanAdapter;

const SUPPORTED: &[&str] = &["masscan"];

#[async_trait]
impl ScannerAdapter for MasscanAdapter {
    fn name(&self) -> &str {
        "masscan"
    }

    fn supported_tools(&self) -> &[&str] {
        SUPPORTED
    }

    async fn execute(&self, request: &AdapterRequest) -> AgentResult<AdapterResult> {
        self.validate(request)?;

        let rate = request.tool_parameters.get("rate").and_then(|v| v.as_u64()).unwrap_or(1000);
        let ports = request.tool_parameters.get("ports").and_then(|v| v.as_str()).unwrap_or("1-65535");

        let mut args = vec!["-oJ".to_string(), "-".to_string(), "--rate".to_string(), rate.to_string(), "-p".to_string(), ports.to_string()];
        args.extend(request.targets.iter().cloned());

        let (mut result, stdout) = run_subprocess("masscan", &args, request).await?;
        if let Ok(json) = String::from_utf8(stdout) {
            result.parsed = parse_masscan_json(&json).ok();
        }
        Ok(result)
    }
}
