//! Scheduler (§4.2): trigger evaluation, DAG execution by predecessor
//! satisfaction, backpressure, failure handling.

pub mod backoff;
pub mod cron;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use scan_shared::models::{AgentTask, Project, ScanStage};
use scan_shared::types::{
    AgentId, ProjectId, ProjectStatus, ScheduleKind, StageId, TaskId, TaskPriority, TaskStatus,
};
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::error::{MasterError, MasterResult};
use crate::registry::Registry;
use crate::resolver;
use crate::storage::Store;
use cron::CronSchedule;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageRunStatus {
    NotStarted,
    Running,
    Succeeded,
    Failed,
}

/// Derives a stage's aggregate status from the tasks generated for it. A
/// stage with no tasks yet is `NotStarted`; once every task is terminal the
/// stage is `Succeeded` unless the failure ratio exceeds the stage's
/// tolerance, in which case it's `Failed`.
pub fn aggregate_stage_status(stage: &ScanStage, tasks: &[AgentTask]) -> StageRunStatus {
    if tasks.is_empty() {
        return StageRunStatus::NotStarted;
    }
    if tasks.iter().any(|t| !t.status.is_terminal()) {
        return StageRunStatus::Running;
    }
    let failed = tasks
        .iter()
        .filter(|t| matches!(t.status, TaskStatus::Failed | TaskStatus::Timeout))
        .count();
    let ratio = failed as f64 / tasks.len() as f64;
    if ratio > stage.output_config.tolerated_failure_ratio {
        StageRunStatus::Failed
    } else {
        StageRunStatus::Succeeded
    }
}

/// A stage is ready when every predecessor has reached `Succeeded`.
pub fn stage_is_ready(stage: &ScanStage, predecessor_statuses: &HashMap<StageId, StageRunStatus>) -> bool {
    stage
        .predecessor_ids
        .iter()
        .all(|pred| predecessor_statuses.get(pred) == Some(&StageRunStatus::Succeeded))
}

pub struct Scheduler {
    store: Arc<Store>,
    registry: Arc<Registry>,
    config: SchedulerConfig,
    admission: Arc<Semaphore>,
    running: Arc<RwLock<bool>>,
}

impl Scheduler {
    pub fn new(store: Arc<Store>, registry: Arc<Registry>, config: SchedulerConfig) -> Self {
        let admission = Arc::new(Semaphore::new(config.max_concurrent_tasks));
        Self {
            store,
            registry,
            config,
            admission,
            running: Arc::new(RwLock::new(false)),
        }
    }

    pub async fn run(self: Arc<Self>) {
        *self.running.write().await = true;
        info!("scheduler started, tick interval {}s", self.config.tick_interval_secs);
        while *self.running.read().await {
            if let Err(e) = self.tick().await {
                error!("scheduler tick failed: {e}");
            }
            tokio::time::sleep(std::time::Duration::from_secs(self.config.tick_interval_secs)).await;
        }
        info!("scheduler stopped");
    }

    pub async fn stop(&self) {
        *self.running.write().await = false;
    }

    /// One scheduler tick: evaluate every enabled project's trigger, advance
    /// those that are ready, reconcile agent liveness, and re-admit any task
    /// that just regained capacity.
    pub async fn tick(&self) -> MasterResult<()> {
        for offline_agent in self.registry.sweep_liveness()? {
            self.revert_in_flight_tasks(offline_agent).await?;
        }

        for project in self.store.all_projects()? {
            if !project.enabled {
                continue;
            }
            if self.should_advance(&project)? {
                self.start_run(project).await?;
            }
        }
        Ok(())
    }

    fn should_advance(&self, project: &Project) -> MasterResult<bool> {
        match project.schedule_kind {
            ScheduleKind::Manual => Ok(false),
            ScheduleKind::Once => Ok(project.status == ProjectStatus::Idle && project.last_exec_time.is_none()),
            ScheduleKind::Cron => {
                let expr = project
                    .cron_expression
                    .as_deref()
                    .ok_or_else(|| MasterError::InvalidCron("missing cron_expression".to_string()))?;
                let schedule = CronSchedule::parse(expr)?;
                let last = project.last_exec_time.unwrap_or_else(|| Utc::now() - chrono::Duration::days(1));
                match schedule.next_fire(last, self.config.cron_lookahead_minutes) {
                    Some(next) => Ok(Utc::now() >= next),
                    None => Ok(false),
                }
            }
        }
    }

    /// Advances a project's run: marks it `running`, dispatches every
    /// currently-ready stage across its workflows. Projects with an empty
    /// target scope complete immediately with zero tasks (§8 boundary
    /// behavior).
    async fn start_run(&self, mut project: Project) -> MasterResult<()> {
        info!("advancing project {} ({:?})", project.id, project.schedule_kind);
        project.status = ProjectStatus::Running;
        project.last_exec_time = Some(Utc::now());
        self.store.upsert_project(&project)?;

        if project.target_scope.is_empty() && project.workflow_ids.is_empty() {
            project.status = ProjectStatus::Completed;
            self.store.upsert_project(&project)?;
            return Ok(());
        }

        for workflow_id in &project.workflow_ids {
            self.advance_workflow(&project, *workflow_id).await?;
        }

        self.reconcile_project_status(&mut project)?;
        Ok(())
    }

    async fn advance_workflow(&self, project: &Project, workflow_id: scan_shared::types::WorkflowId) -> MasterResult<()> {
        let stages = self.store.stages_for_workflow(workflow_id)?;
        if stages.is_empty() {
            return Ok(());
        }
        let tasks = self.store.tasks_for_project(project.id)?;

        let mut statuses: HashMap<StageId, StageRunStatus> = HashMap::new();
        for stage in &stages {
            let stage_tasks: Vec<AgentTask> = tasks.iter().filter(|t| t.stage_id == stage.id).cloned().collect();
            statuses.insert(stage.id, aggregate_stage_status(stage, &stage_tasks));
        }

        for stage in &stages {
            if !stage.enabled {
                continue;
            }
            if statuses.get(&stage.id) != Some(&StageRunStatus::NotStarted) {
                continue;
            }
            if stage_is_ready(stage, &statuses) {
                self.dispatch_stage(project, stage).await?;
            }
        }
        Ok(())
    }

    /// Generates the task set for a ready stage via the target resolver and
    /// queues each chunk, respecting `(priority desc, created_at asc)`
    /// admission ordering and the global concurrency budget.
    async fn dispatch_stage(&self, project: &Project, stage: &ScanStage) -> MasterResult<()> {
        if stage.performance.chunk_size == 0 {
            return Err(MasterError::Config(format!("stage {} has chunk_size=0", stage.id)));
        }

        let resolved = resolver::resolve(
            &stage.target_policy,
            Vec::new(),
            &Default::default(),
            stage.performance.chunk_size,
            stage.stage_type,
        )?;

        if resolved.chunks.is_empty() {
            debug!("stage {} resolved to zero targets, treating as complete", stage.id);
            return Ok(());
        }

        for chunk in resolved.chunks {
            let task = AgentTask {
                id: TaskId::new(),
                project_id: project.id,
                workflow_id: stage.workflow_id,
                stage_id: stage.id,
                task_type: stage.stage_type,
                input_target: chunk,
                tool_parameters: stage.tool_parameters.clone(),
                assigned_agent_id: None,
                status: TaskStatus::Pending,
                priority: stage.execution_policy.priority,
                created_at: Utc::now(),
                started_at: None,
                finished_at: None,
                retry_count: 0,
                result_payload: None,
            };
            self.store.upsert_task(&task)?;
            self.try_admit(task).await?;
        }
        Ok(())
    }

    /// Holds tasks in `pending` until the global admission limit and a
    /// capable online agent are both available.
    async fn try_admit(&self, mut task: AgentTask) -> MasterResult<()> {
        let Ok(permit) = self.admission.clone().try_acquire_owned() else {
            debug!("admission limit reached, task {} stays pending", task.id);
            return Ok(());
        };

        let Some(agent_id) = self.registry.select_agent(task.task_type, &[])? else {
            warn!("no candidate agent for task {}", task.id);
            drop(permit);
            return Ok(());
        };

        task.assigned_agent_id = Some(agent_id);
        task.status = TaskStatus::Assigned;
        task.started_at = Some(Utc::now());
        self.store.upsert_task(&task)?;
        self.registry.note_dispatch(agent_id);

        // The permit is intentionally dropped once dispatch bookkeeping is
        // recorded: in-flight accounting lives in the registry, not in the
        // semaphore, which only throttles the rate of *new* admissions per
        // tick.
        drop(permit);
        Ok(())
    }

    /// §7 failure handling: a failed task retries with exponential backoff
    /// up to the stage's `max_retries`, resetting the agent assignment.
    pub async fn handle_task_failure(&self, task_id: TaskId) -> MasterResult<()> {
        let Some(mut task) = self.store.get_task(task_id)? else {
            return Ok(());
        };
        let Some(stage) = self.store.get_stage(task.stage_id)? else {
            return Ok(());
        };

        if let Some(agent_id) = task.assigned_agent_id {
            self.registry.note_completion(agent_id, false);
        }

        if task.retry_count < stage.performance.max_retries && task.can_transition_to(TaskStatus::Pending) {
            task.retry_count += 1;
            task.status = TaskStatus::Pending;
            task.assigned_agent_id = None;
            self.store.upsert_task(&task)?;
            let delay = backoff::backoff_for(task.retry_count, task.id.0.as_u128() as u64);
            debug!("task {} will retry in {:?} (attempt {})", task.id, delay, task.retry_count);
        } else {
            task.status = TaskStatus::Failed;
            self.store.upsert_task(&task)?;
        }
        Ok(())
    }

    pub async fn handle_task_success(&self, task_id: TaskId) -> MasterResult<()> {
        let Some(task) = self.store.get_task(task_id)? else {
            return Ok(());
        };
        if let Some(agent_id) = task.assigned_agent_id {
            self.registry.note_completion(agent_id, true);
        }
        Ok(())
    }

    /// §4.3: offline-transitioned in-flight tasks revert to `pending` within
    /// one scheduler tick.
    async fn revert_in_flight_tasks(&self, agent_id: AgentId) -> MasterResult<()> {
        for project in self.store.all_projects()? {
            for mut task in self.store.tasks_for_project(project.id)? {
                if task.assigned_agent_id == Some(agent_id)
                    && matches!(task.status, TaskStatus::Assigned | TaskStatus::Running)
                {
                    task.status = TaskStatus::Pending;
                    task.assigned_agent_id = None;
                    self.store.upsert_task(&task)?;
                }
            }
        }
        Ok(())
    }

    fn reconcile_project_status(&self, project: &mut Project) -> MasterResult<()> {
        let tasks = self.store.tasks_for_project(project.id)?;
        if tasks.is_empty() || tasks.iter().all(|t| t.status.is_terminal()) {
            let any_hard_failure = tasks.iter().any(|t| t.status == TaskStatus::Failed);
            project.status = if any_hard_failure {
                ProjectStatus::Failed
            } else {
                ProjectStatus::Completed
            };
            self.store.upsert_project(project)?;
        }
        Ok(())
    }
}

/// Queue ordering comparator: `(priority desc, created_at asc)`.
pub fn task_queue_order(a: &AgentTask, b: &AgentTask) -> std::cmp::Ordering {
    b.priority.cmp(&a.priority).then(a.created_at.cmp(&b.created_at))
}

#[allow(dead_code)]
fn priority_rank(p: TaskPriority) -> u8 {
    p as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use scan_shared::models::{ExecutionPolicy, OutputConfig, PerformanceSettings, TargetPolicy, TargetSource};
    use scan_shared::types::{StageType, WorkflowId};

    fn base_stage(id: StageId, workflow_id: WorkflowId, predecessors: Vec<StageId>) -> ScanStage {
        ScanStage {
            id,
            workflow_id,
            name: "stage".into(),
            stage_type: StageType::PortScan,
            predecessor_ids: predecessors,
            tool_name: "nmap".into(),
            tool_parameters: serde_json::json!({}),
            target_policy: TargetPolicy {
                sources: vec![TargetSource::Manual { value: "1.1.1.1".into() }],
                whitelist_enabled: false,
                whitelist: vec![],
                skip_conditions: vec![],
                shuffle: false,
            },
            execution_policy: ExecutionPolicy { proxy: None, priority: TaskPriority::Normal },
            performance: PerformanceSettings {
                scan_rate: 1000,
                concurrency: 10,
                chunk_size: 100,
                timeout_secs: 30,
                max_retries: 2,
            },
            output_config: OutputConfig {
                propagate_to_next: true,
                persist: true,
                file_path: None,
                best_effort: false,
                tolerated_failure_ratio: 0.2,
            },
            notify_config: None,
            enabled: true,
        }
    }

    fn task_with_status(stage_id: StageId, project_id: ProjectId, status: TaskStatus) -> AgentTask {
        AgentTask {
            id: TaskId::new(),
            project_id,
            workflow_id: WorkflowId::new(),
            stage_id,
            task_type: StageType::PortScan,
            input_target: vec!["1.1.1.1".into()],
            tool_parameters: serde_json::json!({}),
            assigned_agent_id: None,
            status,
            priority: TaskPriority::Normal,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            retry_count: 0,
            result_payload: None,
        }
    }

    #[test]
    fn stage_with_no_tasks_is_not_started() {
        let stage = base_stage(StageId::new(), WorkflowId::new(), vec![]);
        assert_eq!(aggregate_stage_status(&stage, &[]), StageRunStatus::NotStarted);
    }

    #[test]
    fn stage_succeeds_when_failures_within_tolerance() {
        let stage = base_stage(StageId::new(), WorkflowId::new(), vec![]);
        let project_id = ProjectId::new();
        let tasks = vec![
            task_with_status(stage.id, project_id, TaskStatus::Succeeded),
            task_with_status(stage.id, project_id, TaskStatus::Succeeded),
            task_with_status(stage.id, project_id, TaskStatus::Succeeded),
            task_with_status(stage.id, project_id, TaskStatus::Succeeded),
            task_with_status(stage.id, project_id, TaskStatus::Failed),
        ];
        assert_eq!(aggregate_stage_status(&stage, &tasks), StageRunStatus::Succeeded);
    }

    #[test]
    fn stage_fails_when_failure_ratio_exceeded() {
        let stage = base_stage(StageId::new(), WorkflowId::new(), vec![]);
        let project_id = ProjectId::new();
        let tasks = vec![
            task_with_status(stage.id, project_id, TaskStatus::Failed),
            task_with_status(stage.id, project_id, TaskStatus::Failed),
            task_with_status(stage.id, project_id, TaskStatus::Succeeded),
        ];
        assert_eq!(aggregate_stage_status(&stage, &tasks), StageRunStatus::Failed);
    }

    #[test]
    fn stage_is_ready_only_when_all_predecessors_succeeded() {
        let pred_id = StageId::new();
        let stage = base_stage(StageId::new(), WorkflowId::new(), vec![pred_id]);
        let mut statuses = HashMap::new();
        statuses.insert(pred_id, StageRunStatus::Running);
        assert!(!stage_is_ready(&stage, &statuses));
        statuses.insert(pred_id, StageRunStatus::Succeeded);
        assert!(stage_is_ready(&stage, &statuses));
    }

    #[test]
    fn queue_orders_by_priority_desc_then_created_at_asc() {
        let project_id = ProjectId::new();
        let stage_id = StageId::new();
        let mut high = task_with_status(stage_id, project_id, TaskStatus::Pending);
        high.priority = TaskPriority::High;
        high.created_at = Utc::now();
        let mut normal = task_with_status(stage_id, project_id, TaskStatus::Pending);
        normal.priority = TaskPriority::Normal;
        normal.created_at = Utc::now() - Duration::seconds(5);

        let mut queue = vec![normal.clone(), high.clone()];
        queue.sort_by(task_queue_order);
        assert_eq!(queue[0].id, high.id);
    }
}
