//! Nmap adapter: port scan and service identification, both driven off the
//! same `-oX -` XML output.

use async_trait::async_trait;
use scan_shared::parsers::parse_nmap_xml;

use super::{run_subprocess, AdapterRequest, AdapterResult, ScannerAdapter};
use crate::error::AgentResult;

pub struct NmapAdapter;

const SUPPORTED: &[&str] = &["nmap"];

#[async_trait]
impl ScannerAdapter for NmapAdapter {
    fn name(&self) -> &str {
        "nmap"
    }

    fn supported_tools(&self) -> &[&str] {
        SUPPORTED
    }

    async fn execute(&self, request: &AdapterRequest) -> AgentResult<AdapterResult> {
        self.validate(request)?;

        let mut args = vec!["-oX".to_string(), "-".to_string()];
        if let Some(extra) = request.tool_parameters.get("args").and_then(|v| v.as_str()) {
            args.extend(extra.split_whitespace().map(str::to_string));
        }
        args.extend(request.targets.iter().cloned());

        let (mut result, stdout) = run_subprocess("nmap", &args, request).await?;
        if let Ok(xml) = String::from_utf8(stdout) {
            result.parsed = parse_nmap_xml(&xml).ok();
        }
        Ok(result)
    }
}
