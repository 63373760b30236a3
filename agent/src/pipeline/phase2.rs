//! Phase-2 dispatch (§4.4): once service identification completes, web and
//! vuln scans run immediately at high priority while brute-force attempts
//! queue behind them at low priority — credential attacks are the most
//! disruptive scan class, so they never compete with reconnaissance for
//! limiter headroom. Web/brute eligibility itself is decided by
//! `scan_shared::classify`, shared with the master's ingest pipeline so a
//! port is never classified differently on the two sides.

use scan_shared::classify::{is_brute_eligible, is_web_target};
use scan_shared::protocol::PortResult;
use scan_shared::types::TaskPriority;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase2Kind {
    Web,
    Vuln,
    Brute,
}

#[derive(Debug, Clone)]
pub struct Phase2Dispatch {
    pub kind: Phase2Kind,
    pub priority: TaskPriority,
}

/// Builds the set of phase-2 dispatches for a port once service ID has run:
/// web scan if inferred as a web target, vuln scan always, brute only for
/// whitelisted protocols.
pub fn plan_for_port(port: &PortResult, brute_enabled: bool) -> Vec<Phase2Dispatch> {
    let mut plan = Vec::new();
    if is_web_target(port.service.as_deref(), port.product.as_deref(), port.banner.as_deref(), port.port) {
        plan.push(Phase2Dispatch { kind: Phase2Kind::Web, priority: TaskPriority::High });
    }
    plan.push(Phase2Dispatch { kind: Phase2Kind::Vuln, priority: TaskPriority::High });
    if brute_enabled {
        if let Some(service) = &port.service {
            if is_brute_eligible(service) {
                plan.push(Phase2Dispatch { kind: Phase2Kind::Brute, priority: TaskPriority::Low });
            }
        }
    }
    plan
}
