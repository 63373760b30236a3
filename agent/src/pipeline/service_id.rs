//! Service identification stage (§4.4): nmap version detection for banner
//! capture, then the banner-regex fingerprint engine layers product/CPE
//! matches on top. Runs at the low concurrency tier (default ≤20, §5).

use scan_shared::protocol::PortResult;

use crate::adapters::{AdapterRequest, NmapAdapter, ScannerAdapter};
use crate::error::AgentResult;
use crate::fingerprint::{FingerprintRule, ServiceEngine};

pub async fn identify(ip: &str, port: u16, task_id: scan_shared::types::TaskId) -> AgentResult<Option<PortResult>> {
    let adapter = NmapAdapter;
    let request = AdapterRequest {
        task_id,
        tool_name: "nmap".to_string(),
        tool_parameters: serde_json::json!({ "args": format!("-sV -p{port}") }),
        targets: vec![ip.to_string()],
        timeout: std::time::Duration::from_secs(60),
        output_path: std::env::temp_dir(),
        working_dir: std::env::temp_dir(),
        environment: Default::default(),
    };
    let result = adapter.execute(&request).await?;
    Ok(result.parsed.and_then(|p| p.ports.into_iter().find(|pr| pr.port == port)))
}

/// Re-derives product/CPE from the captured banner using the fingerprint
/// rule set, in case nmap's own service DB missed it.
pub fn enrich_with_fingerprint(port: &mut PortResult, rules: &[FingerprintRule]) {
    let Some(banner) = port.banner.clone() else { return };
    if let Some(m) = ServiceEngine::evaluate(rules, &banner).into_iter().next() {
        port.product.get_or_insert(m.product);
        port.cpe.get_or_insert(m.cpe);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::ServiceRuleBody;

    #[test]
    fn enrichment_fills_missing_product_only() {
        let mut port = PortResult {
            ip: "10.0.0.1".into(),
            port: 22,
            protocol: "tcp".into(),
            state: "open".into(),
            service: Some("ssh".into()),
            product: None,
            version: None,
            banner: Some("SSH-2.0-OpenSSH_8.9p1".into()),
            cpe: None,
        };
        let rules = vec![FingerprintRule {
            id: "r1".into(),
            product: "OpenSSH".into(),
            vendor: Some("OpenBSD".into()),
            r#type: "service".into(),
            cpe: None,
            http: None,
            service: Some(ServiceRuleBody { regex: r"OpenSSH_(\S+)".into() }),
        }];
        enrich_with_fingerprint(&mut port, &rules);
        assert_eq!(port.product.as_deref(), Some("OpenSSH"));
        assert!(port.cpe.is_some());
    }
}
