//! Result ingestion (§4.5): normalizes a task's tool output into the unified
//! asset/vuln model and merges it idempotently into storage.

use std::sync::Arc;

use chrono::Utc;
use scan_shared::models::{AssetUnified, AssetVuln};
use scan_shared::protocol::{TaskStatusReport, ToolScanResult};
use scan_shared::types::{ProjectId, TaskStatus, ToolResultStatus, VulnStatus, VulnTarget};
use tracing::{error, warn};

use crate::error::MasterResult;
use crate::storage::Store;
use crate::tagging::Tagger;

pub struct Ingestor {
    store: Arc<Store>,
    tagger: Arc<Tagger>,
}

impl Ingestor {
    pub fn new(store: Arc<Store>, tagger: Arc<Tagger>) -> Self {
        Self { store, tagger }
    }

    /// Applies a `TaskStatusReport` to storage: updates the originating
    /// task's terminal status, then merges any attached scan result. Rows
    /// that fail to decode are logged to `etl_errors` rather than dropped
    /// silently (§8).
    pub fn ingest(&self, report: &TaskStatusReport) -> MasterResult<()> {
        let Some(mut task) = self.store.get_task(report.task_id)? else {
            warn!("status report for unknown task {}", report.task_id);
            return Ok(());
        };

        let next_status = match report.status {
            ToolResultStatus::Completed => TaskStatus::Succeeded,
            ToolResultStatus::Failed => TaskStatus::Failed,
            ToolResultStatus::Cancelled => TaskStatus::Cancelled,
            ToolResultStatus::Timeout => TaskStatus::Timeout,
            ToolResultStatus::Pending | ToolResultStatus::Running => TaskStatus::Running,
        };

        if task.can_transition_to(next_status) {
            task.status = next_status;
            if next_status.is_terminal() {
                task.finished_at = Some(Utc::now());
            }
        }
        self.store.upsert_task(&task)?;

        if let Some(result) = &report.result {
            self.merge_result(task.project_id, result)?;
        }

        if let Some(err) = &report.error {
            self.store.log_etl_error(&serde_json::to_string(report).unwrap_or_default(), err)?;
        }

        Ok(())
    }

    /// Merges a normalized `ToolScanResult` into the asset/vuln tables and
    /// runs auto-tagging over every touched asset.
    fn merge_result(&self, project_id: ProjectId, result: &ToolScanResult) -> MasterResult<()> {
        for host in &result.hosts {
            if !host.alive {
                continue;
            }
            let asset = AssetUnified {
                project_id,
                ip: host.ip.clone(),
                port: 0,
                hostname: host.hostname.clone(),
                os: host.os_guess.clone(),
                sync_time: Some(Utc::now()),
                source: Some("host_scan".to_string()),
                ..Default::default()
            };
            let merged = self.store.upsert_asset(&asset)?;
            self.tagger.auto_tag_asset(&merged)?;
        }

        for port in &result.ports {
            if port.state != "open" {
                continue;
            }
            let is_web = scan_shared::classify::is_web_target(
                port.service.as_deref(),
                port.product.as_deref(),
                port.banner.as_deref(),
                port.port,
            );
            let asset = AssetUnified {
                project_id,
                ip: port.ip.clone(),
                port: port.port,
                protocol: Some(port.protocol.clone()),
                service: port.service.clone(),
                product: port.product.clone(),
                version: port.version.clone(),
                banner: port.banner.clone(),
                fingerprint: port.cpe.clone(),
                is_web,
                sync_time: Some(Utc::now()),
                source: Some("port_scan".to_string()),
                ..Default::default()
            };
            let merged = self.store.upsert_asset(&asset)?;
            self.tagger.auto_tag_asset(&merged)?;
        }

        for web in &result.webs {
            let asset = AssetUnified {
                project_id,
                ip: web.ip.clone(),
                port: web.port,
                url: Some(web.url.clone()),
                title: web.title.clone(),
                status_code: web.status_code,
                tech_stack: web.tech_stack.clone(),
                is_web: true,
                sync_time: Some(Utc::now()),
                source: Some("web_scan".to_string()),
                ..Default::default()
            };
            let merged = self.store.upsert_asset(&asset)?;
            self.tagger.auto_tag_asset(&merged)?;
        }

        for vuln in &result.vulns {
            if let Some(first_web) = result.webs.first() {
                let target = VulnTarget::Web { ref_id: format!("{}:{}", first_web.ip, first_web.port) };
                self.record_vuln(target, vuln)?;
            } else if let Some(first_port) = result.ports.first() {
                let target = VulnTarget::Service { ref_id: format!("{}:{}", first_port.ip, first_port.port) };
                self.record_vuln(target, vuln)?;
            } else {
                error!("vuln result {} has no associated target in the same batch", vuln.template_id);
            }
        }

        Ok(())
    }

    fn record_vuln(&self, target: VulnTarget, vuln: &scan_shared::protocol::VulnResult) -> MasterResult<()> {
        let now = Utc::now();
        let record = AssetVuln {
            id: uuid::Uuid::new_v4().to_string(),
            target,
            cve_or_id: vuln.template_id.clone(),
            severity: vuln.severity.clone(),
            confidence: 1.0,
            evidence: serde_json::json!({ "proof": vuln.proof, "reference": vuln.reference }),
            attributes: serde_json::json!({ "name": vuln.name, "description": vuln.description, "url": vuln.url }),
            first_seen_at: now,
            last_seen_at: now,
            status: VulnStatus::Open,
            verify_status: None,
            verified_by: None,
            verify_result: None,
        };
        self.store.upsert_vuln(&record)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scan_shared::models::AgentTask;
    use scan_shared::protocol::{HostResult, PortResult};
    use scan_shared::types::{StageId, StageType, TaskId, TaskPriority, WorkflowId};
    use tempfile::tempdir;

    fn ingestor() -> (Ingestor, Arc<Store>) {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path().to_str().unwrap()).unwrap());
        let tagger = Arc::new(Tagger::new(store.clone()));
        (Ingestor::new(store.clone(), tagger), store)
    }

    fn pending_task(project_id: ProjectId) -> AgentTask {
        AgentTask {
            id: TaskId::new(),
            project_id,
            workflow_id: WorkflowId::new(),
            stage_id: StageId::new(),
            task_type: StageType::PortScan,
            input_target: vec!["10.0.0.5".into()],
            tool_parameters: serde_json::json!({}),
            assigned_agent_id: None,
            status: TaskStatus::Assigned,
            priority: TaskPriority::Normal,
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            finished_at: None,
            retry_count: 0,
            result_payload: None,
        }
    }

    #[test]
    fn completed_report_marks_task_succeeded_and_merges_ports() {
        let (ingestor, store) = ingestor();
        let project_id = ProjectId::new();
        let task = pending_task(project_id);
        store.upsert_task(&task).unwrap();

        let report = TaskStatusReport {
            task_id: task.id,
            status: ToolResultStatus::Completed,
            error: None,
            result: Some(ToolScanResult {
                hosts: vec![],
                ports: vec![PortResult {
                    ip: "10.0.0.5".into(),
                    port: 22,
                    protocol: "tcp".into(),
                    state: "open".into(),
                    service: Some("ssh".into()),
                    product: None,
                    version: None,
                    banner: None,
                    cpe: None,
                }],
                webs: vec![],
                vulns: vec![],
            }),
        };
        ingestor.ingest(&report).unwrap();

        let updated = store.get_task(task.id).unwrap().unwrap();
        assert_eq!(updated.status, TaskStatus::Succeeded);

        let assets = store.assets_for_project(project_id).unwrap();
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].service.as_deref(), Some("ssh"));
    }

    #[test]
    fn dead_host_is_not_persisted() {
        let (ingestor, store) = ingestor();
        let project_id = ProjectId::new();
        let task = pending_task(project_id);
        store.upsert_task(&task).unwrap();

        let report = TaskStatusReport {
            task_id: task.id,
            status: ToolResultStatus::Completed,
            error: None,
            result: Some(ToolScanResult {
                hosts: vec![HostResult {
                    ip: "10.0.0.9".into(),
                    alive: false,
                    ttl: None,
                    rtt_ms: None,
                    os_guess: None,
                    hostname: None,
                }],
                ports: vec![],
                webs: vec![],
                vulns: vec![],
            }),
        };
        ingestor.ingest(&report).unwrap();

        assert!(store.assets_for_project(project_id).unwrap().is_empty());
    }
}
