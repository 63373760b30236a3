//! The five-stage scan funnel (§4.4): alive probe, port scan, service
//! identification, OS fingerprint, and phase-2 dispatch. Each stage is a
//! standalone function the agent's dispatch loop calls according to the
//! `StageType` carried by the `DispatchTask` it was handed; service
//! identification additionally does best-effort inline web probing for
//! ports classified as web targets, since that needs no specialized tool
//! beyond the `reqwest` client already linked for master communication.

pub mod alive;
pub mod os_fingerprint;
pub mod phase2;
pub mod port_scan;
pub mod service_id;

use std::sync::Arc;
use std::time::Duration;

use scan_shared::protocol::{HostResult, PortResult, ToolScanResult, WebResult};
use scan_shared::types::TaskId;
use tracing::debug;

use crate::error::AgentResult;
use crate::fingerprint::{HttpContext, HttpEngine, RuleStore};
use crate::limiter::AimdLimiter;
use alive::{probe_with_fallback, NmapPingProber, Prober, TcpConnectProber};
use phase2::{plan_for_port, Phase2Kind};

pub struct Pipeline {
    alive_limiter: Arc<AimdLimiter>,
    service_limiter: Arc<AimdLimiter>,
    fingerprint_rules: Arc<RuleStore>,
    http_client: reqwest::Client,
}

impl Pipeline {
    pub fn new(alive_limiter: Arc<AimdLimiter>, service_limiter: Arc<AimdLimiter>, fingerprint_rules: Arc<RuleStore>) -> Self {
        Self {
            alive_limiter,
            service_limiter,
            fingerprint_rules,
            http_client: reqwest::Client::builder().timeout(Duration::from_secs(5)).build().unwrap_or_default(),
        }
    }

    /// Stage 1: probes each target with the composable prober chain
    /// (ARP/ICMP via nmap, TCP-connect fallback), admission-limited by the
    /// alive-probe AIMD limiter.
    pub async fn run_alive(&self, targets: &[String]) -> ToolScanResult {
        let probers: Vec<Box<dyn Prober>> = vec![Box::new(NmapPingProber::default()), Box::new(TcpConnectProber::default())];

        let mut hosts = Vec::with_capacity(targets.len());
        for ip in targets {
            let outcome = probe_with_fallback(&probers, ip, &self.alive_limiter).await;
            let os_guess = os_fingerprint::resolve_os(outcome.ttl, None);
            hosts.push(HostResult {
                ip: ip.clone(),
                alive: outcome.alive,
                ttl: outcome.ttl,
                rtt_ms: outcome.rtt.map(|d| d.as_secs_f64() * 1000.0),
                os_guess,
                hostname: outcome.hostname,
            });
        }
        ToolScanResult { hosts, ..Default::default() }
    }

    /// Stage 2: expands alive targets into an open-port list via masscan,
    /// rate-limited by the stage's configured `scan_rate` rather than the
    /// AIMD limiter.
    pub async fn run_port_scan(&self, targets: &[String], port_range: &str, scan_rate: u32, task_id: TaskId) -> AgentResult<ToolScanResult> {
        let mut ports = Vec::new();
        for ip in targets {
            ports.extend(port_scan::scan_ports(ip, port_range, scan_rate, task_id).await?);
        }
        Ok(ToolScanResult { ports, ..Default::default() })
    }

    /// Stage 3 + inline phase-2 web probing: identifies each port's service
    /// via nmap version detection, enriches with the fingerprint rule set,
    /// and immediately probes ports classified as web targets.
    pub async fn run_service_scan(&self, ports: &[PortResult], brute_enabled: bool, task_id: TaskId) -> AgentResult<ToolScanResult> {
        let mut identified = Vec::with_capacity(ports.len());
        let mut webs = Vec::new();
        let rules = self.fingerprint_rules.snapshot();

        for port in ports {
            let _permit = self.service_limiter.acquire().await;
            let mut result = match service_id::identify(&port.ip, port.port, task_id).await {
                Ok(Some(identified)) => identified,
                Ok(None) => port.clone(),
                Err(e) => {
                    debug!("service id failed for {}:{}: {e}", port.ip, port.port);
                    port.clone()
                }
            };
            service_id::enrich_with_fingerprint(&mut result, &rules);

            for dispatch in plan_for_port(&result, brute_enabled) {
                if dispatch.kind == Phase2Kind::Web {
                    if let Some(web) = self.probe_web(&result).await {
                        webs.push(web);
                    }
                }
            }
            identified.push(result);
        }

        Ok(ToolScanResult { ports: identified, webs, ..Default::default() })
    }

    async fn probe_web(&self, port: &PortResult) -> Option<WebResult> {
        let scheme = if port.port == 443 || port.port == 8443 { "https" } else { "http" };
        let url = format!("{scheme}://{}:{}/", port.ip, port.port);
        let response = self.http_client.get(url.as_str()).send().await.ok()?;
        let status_code = response.status().as_u16();
        let headers: std::collections::HashMap<String, String> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string().to_lowercase(), v.to_str().unwrap_or_default().to_string()))
            .collect();
        let body = response.text().await.unwrap_or_default();

        let ctx = HttpContext { body, headers, status_code };
        let title = ctx.title();

        let rules = self.fingerprint_rules.snapshot();
        let matches = HttpEngine::evaluate(&rules, &ctx);
        let tech_stack = matches.iter().map(|m| m.product.clone()).collect();

        Some(WebResult {
            url,
            ip: port.ip.clone(),
            port: port.port,
            title,
            status_code: Some(status_code),
            tech_stack,
            headers: ctx.headers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_context_title_reads_html_title_tag() {
        let ctx = HttpContext {
            body: "<html><head><title>  Example  </title></head></html>".into(),
            headers: Default::default(),
            status_code: 200,
        };
        assert_eq!(ctx.title(), Some("Example".to_string()));
    }

    #[test]
    fn http_context_title_is_none_when_absent() {
        let ctx = HttpContext { body: "<html><body>no title here</body></html>".into(), headers: Default::default(), status_code: 200 };
        assert_eq!(ctx.title(), None);
    }
}
