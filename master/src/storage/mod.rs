//! Embedded `sled` key-value store backing the asset/task/tag tables with
//! typed, idempotent upsert helpers. Transactions around multi-row merges;
//! plain idempotent upserts elsewhere (§5 shared-state rules).

use scan_shared::models::{
    Agent, AgentTask, AssetUnified, AssetVuln, EntityTag, MatchRule, Project, ScanStage, Tag, Workflow,
};
use scan_shared::types::{AgentId, ProjectId, StageId, TagId, TaskId, WorkflowId};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::MasterResult;

pub struct Store {
    db: sled::Db,
    projects: sled::Tree,
    workflows: sled::Tree,
    stages: sled::Tree,
    tasks: sled::Tree,
    agents: sled::Tree,
    assets: sled::Tree,
    vulns: sled::Tree,
    tags: sled::Tree,
    entity_tags: sled::Tree,
    etl_errors: sled::Tree,
    match_rules: sled::Tree,
}

fn encode<T: Serialize>(value: &T) -> MasterResult<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> MasterResult<T> {
    Ok(bincode::deserialize(bytes)?)
}

impl Store {
    pub fn open(data_dir: &str) -> MasterResult<Self> {
        let db = sled::open(data_dir)?;
        Ok(Self {
            projects: db.open_tree("projects")?,
            workflows: db.open_tree("workflows")?,
            stages: db.open_tree("stages")?,
            tasks: db.open_tree("tasks")?,
            agents: db.open_tree("agents")?,
            assets: db.open_tree("assets")?,
            vulns: db.open_tree("vulns")?,
            tags: db.open_tree("tags")?,
            entity_tags: db.open_tree("entity_tags")?,
            etl_errors: db.open_tree("etl_errors")?,
            match_rules: db.open_tree("match_rules")?,
            db,
        })
    }

    pub fn upsert_project(&self, project: &Project) -> MasterResult<()> {
        self.projects
            .insert(project.id.0.as_bytes(), encode(project)?)?;
        Ok(())
    }

    pub fn get_project(&self, id: ProjectId) -> MasterResult<Option<Project>> {
        self.projects
            .get(id.0.as_bytes())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    pub fn all_projects(&self) -> MasterResult<Vec<Project>> {
        self.projects
            .iter()
            .values()
            .map(|v| decode(&v?))
            .collect()
    }

    pub fn upsert_workflow(&self, workflow: &Workflow) -> MasterResult<()> {
        self.workflows
            .insert(workflow.id.0.as_bytes(), encode(workflow)?)?;
        Ok(())
    }

    pub fn get_workflow(&self, id: WorkflowId) -> MasterResult<Option<Workflow>> {
        self.workflows
            .get(id.0.as_bytes())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    pub fn upsert_stage(&self, stage: &ScanStage) -> MasterResult<()> {
        self.stages.insert(stage.id.0.as_bytes(), encode(stage)?)?;
        Ok(())
    }

    pub fn get_stage(&self, id: StageId) -> MasterResult<Option<ScanStage>> {
        self.stages
            .get(id.0.as_bytes())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    pub fn stages_for_workflow(&self, workflow_id: WorkflowId) -> MasterResult<Vec<ScanStage>> {
        self.stages
            .iter()
            .values()
            .map(|v| decode::<ScanStage>(&v?))
            .filter(|s| matches!(s, Ok(s) if s.workflow_id == workflow_id))
            .collect()
    }

    pub fn upsert_task(&self, task: &AgentTask) -> MasterResult<()> {
        self.tasks.insert(task.id.0.as_bytes(), encode(task)?)?;
        Ok(())
    }

    pub fn get_task(&self, id: TaskId) -> MasterResult<Option<AgentTask>> {
        self.tasks
            .get(id.0.as_bytes())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    pub fn tasks_for_project(&self, project_id: ProjectId) -> MasterResult<Vec<AgentTask>> {
        self.tasks
            .iter()
            .values()
            .map(|v| decode::<AgentTask>(&v?))
            .filter(|t| matches!(t, Ok(t) if t.project_id == project_id))
            .collect()
    }

    pub fn upsert_agent(&self, agent: &Agent) -> MasterResult<()> {
        self.agents.insert(agent.id.0.as_bytes(), encode(agent)?)?;
        Ok(())
    }

    pub fn get_agent(&self, id: AgentId) -> MasterResult<Option<Agent>> {
        self.agents
            .get(id.0.as_bytes())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    pub fn all_agents(&self) -> MasterResult<Vec<Agent>> {
        self.agents.iter().values().map(|v| decode(&v?)).collect()
    }

    fn asset_key(project_id: ProjectId, ip: &str, port: u16) -> Vec<u8> {
        format!("{}:{}:{}", project_id.0, ip, port).into_bytes()
    }

    /// Idempotent upsert keyed by `(project_id, ip, port)`: the merge never
    /// lets an empty incoming field clobber a populated existing one.
    pub fn upsert_asset(&self, asset: &AssetUnified) -> MasterResult<AssetUnified> {
        let key = Self::asset_key(asset.project_id, &asset.ip, asset.port);
        let merged = self.assets.transaction(|tx| {
            let existing = tx.get(&key)?;
            let mut current = match existing {
                Some(bytes) => bincode::deserialize(&bytes)
                    .map_err(|e| sled::transaction::ConflictableTransactionError::Abort(e))?,
                None => asset.clone(),
            };
            current.merge_from(asset);
            let encoded = bincode::serialize(&current)
                .map_err(|e| sled::transaction::ConflictableTransactionError::Abort(e))?;
            tx.insert(key.as_slice(), encoded)?;
            Ok(current)
        });
        merged.map_err(|e: sled::transaction::TransactionError<bincode::Error>| match e {
            sled::transaction::TransactionError::Storage(e) => e.into(),
            sled::transaction::TransactionError::Abort(e) => e.into(),
        })
    }

    pub fn assets_for_project(&self, project_id: ProjectId) -> MasterResult<Vec<AssetUnified>> {
        let prefix = format!("{}:", project_id.0);
        self.assets
            .scan_prefix(prefix.as_bytes())
            .values()
            .map(|v| decode(&v?))
            .collect()
    }

    /// Vulns dedup by `(target_type, target_ref_id, cve||id_alias)`;
    /// `first_seen_at` is preserved across merges, `last_seen_at` updated.
    pub fn upsert_vuln(&self, vuln: &AssetVuln) -> MasterResult<AssetVuln> {
        let key = vuln.dedup_key();
        let key_bytes = format!("{}:{}:{}", key.0, key.1, key.2).into_bytes();
        let merged = self.vulns.transaction(|tx| {
            let existing = tx.get(&key_bytes)?;
            let mut current: AssetVuln = match existing {
                Some(bytes) => bincode::deserialize(&bytes)
                    .map_err(|e| sled::transaction::ConflictableTransactionError::Abort(e))?,
                None => vuln.clone(),
            };
            current.last_seen_at = vuln.last_seen_at;
            current.evidence = vuln.evidence.clone();
            current.attributes = vuln.attributes.clone();
            current.status = vuln.status;
            let encoded = bincode::serialize(&current)
                .map_err(|e| sled::transaction::ConflictableTransactionError::Abort(e))?;
            tx.insert(key_bytes.as_slice(), encoded)?;
            Ok(current)
        });
        merged.map_err(|e: sled::transaction::TransactionError<bincode::Error>| match e {
            sled::transaction::TransactionError::Storage(e) => e.into(),
            sled::transaction::TransactionError::Abort(e) => e.into(),
        })
    }

    pub fn upsert_tag(&self, tag: &Tag) -> MasterResult<()> {
        self.tags.insert(tag.id.0.as_bytes(), encode(tag)?)?;
        Ok(())
    }

    pub fn get_tag(&self, id: TagId) -> MasterResult<Option<Tag>> {
        self.tags
            .get(id.0.as_bytes())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    pub fn all_tags(&self) -> MasterResult<Vec<Tag>> {
        self.tags.iter().values().map(|v| decode(&v?)).collect()
    }

    fn entity_tag_key(entity_type: &str, entity_id: &str, tag_id: TagId) -> Vec<u8> {
        format!("{entity_type}:{entity_id}:{}", tag_id.0).into_bytes()
    }

    /// `(entity_type, entity_id, tag_id)` unique; caller enforces the
    /// source-precedence invariant before calling this.
    pub fn upsert_entity_tag(&self, entity_tag: &EntityTag) -> MasterResult<()> {
        let key = Self::entity_tag_key(
            &entity_tag.entity_type,
            &entity_tag.entity_id,
            entity_tag.tag_id,
        );
        self.entity_tags.insert(key, encode(entity_tag)?)?;
        Ok(())
    }

    pub fn get_entity_tag(
        &self,
        entity_type: &str,
        entity_id: &str,
        tag_id: TagId,
    ) -> MasterResult<Option<EntityTag>> {
        let key = Self::entity_tag_key(entity_type, entity_id, tag_id);
        self.entity_tags
            .get(key)?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    pub fn entity_tags_for(&self, entity_type: &str, entity_id: &str) -> MasterResult<Vec<EntityTag>> {
        let prefix = format!("{entity_type}:{entity_id}:");
        self.entity_tags
            .scan_prefix(prefix.as_bytes())
            .values()
            .map(|v| decode(&v?))
            .collect()
    }

    pub fn remove_entity_tag(&self, entity_type: &str, entity_id: &str, tag_id: TagId) -> MasterResult<()> {
        let key = Self::entity_tag_key(entity_type, entity_id, tag_id);
        self.entity_tags.remove(key)?;
        Ok(())
    }

    pub fn upsert_match_rule(&self, rule: &MatchRule) -> MasterResult<()> {
        self.match_rules.insert(rule.id.as_bytes(), encode(rule)?)?;
        Ok(())
    }

    pub fn get_match_rule(&self, id: &str) -> MasterResult<Option<MatchRule>> {
        self.match_rules.get(id.as_bytes())?.map(|bytes| decode(&bytes)).transpose()
    }

    pub fn remove_match_rule(&self, id: &str) -> MasterResult<()> {
        self.match_rules.remove(id.as_bytes())?;
        Ok(())
    }

    pub fn match_rules_for(&self, entity_type: &str) -> MasterResult<Vec<MatchRule>> {
        self.match_rules
            .iter()
            .values()
            .map(|v| decode::<MatchRule>(&v?))
            .filter(|r| matches!(r, Ok(r) if r.entity_type == entity_type))
            .collect()
    }

    pub fn log_etl_error(&self, raw_payload: &str, reason: &str) -> MasterResult<()> {
        let entry = serde_json::json!({
            "raw_payload": raw_payload,
            "reason": reason,
            "recorded_at": chrono::Utc::now(),
        });
        let key = uuid::Uuid::new_v4();
        self.etl_errors.insert(key.as_bytes(), encode(&entry)?)?;
        Ok(())
    }

    pub fn flush(&self) -> MasterResult<()> {
        self.db.flush()?;
        Ok(())
    }
}
