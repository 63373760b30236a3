//! Crate-level coverage for trigger evaluation driving a scheduler tick:
//! a `Manual` project never advances on its own, a `Once` project advances
//! exactly once, and a `Cron` project only advances once its expression's
//! next fire time has passed.

use std::sync::Arc;

use chrono::Utc;
use scan_shared::models::Project;
use scan_shared::types::{ProjectId, ProjectStatus, ScheduleKind};
use tempfile::tempdir;

use scan_master::config::{RegistryConfig, SchedulerConfig};
use scan_master::registry::Registry;
use scan_master::scheduler::Scheduler;
use scan_master::storage::Store;

fn scheduler() -> (Scheduler, Arc<Store>) {
    let dir = tempdir().unwrap();
    let store = Arc::new(Store::open(dir.path().to_str().unwrap()).unwrap());
    let registry = Arc::new(Registry::new(store.clone(), RegistryConfig::default()));
    let scheduler = Scheduler::new(store.clone(), registry, SchedulerConfig::default());
    (scheduler, store)
}

fn base_project(id: ProjectId, schedule_kind: ScheduleKind) -> Project {
    Project {
        id,
        name: "p".into(),
        target_scope: vec![],
        schedule_kind,
        cron_expression: None,
        status: ProjectStatus::Idle,
        last_exec_time: None,
        enabled: true,
        seed_payload: serde_json::json!({}),
        workflow_ids: vec![],
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

#[tokio::test]
async fn manual_project_never_advances() {
    let (scheduler, store) = scheduler();
    let project_id = ProjectId::new();
    store.upsert_project(&base_project(project_id, ScheduleKind::Manual)).unwrap();

    scheduler.tick().await.unwrap();

    let project = store.get_project(project_id).unwrap().unwrap();
    assert_eq!(project.status, ProjectStatus::Idle);
}

#[tokio::test]
async fn once_project_advances_on_first_tick_and_completes_with_empty_scope() {
    let (scheduler, store) = scheduler();
    let project_id = ProjectId::new();
    store.upsert_project(&base_project(project_id, ScheduleKind::Once)).unwrap();

    scheduler.tick().await.unwrap();

    let project = store.get_project(project_id).unwrap().unwrap();
    assert!(project.last_exec_time.is_some());
    assert_eq!(project.status, ProjectStatus::Completed);
}

#[tokio::test]
async fn once_project_does_not_advance_twice() {
    let (scheduler, store) = scheduler();
    let project_id = ProjectId::new();
    store.upsert_project(&base_project(project_id, ScheduleKind::Once)).unwrap();

    scheduler.tick().await.unwrap();
    let first_exec = store.get_project(project_id).unwrap().unwrap().last_exec_time;

    scheduler.tick().await.unwrap();
    let second_exec = store.get_project(project_id).unwrap().unwrap().last_exec_time;

    assert_eq!(first_exec, second_exec);
}

#[tokio::test]
async fn cron_project_does_not_advance_before_next_fire() {
    let (scheduler, store) = scheduler();
    let project_id = ProjectId::new();
    let mut project = base_project(project_id, ScheduleKind::Cron);
    project.cron_expression = Some("0 0 1 1 *".to_string()); // once a year, Jan 1st
    project.last_exec_time = Some(Utc::now());
    store.upsert_project(&project).unwrap();

    scheduler.tick().await.unwrap();

    let reloaded = store.get_project(project_id).unwrap().unwrap();
    assert_eq!(reloaded.status, ProjectStatus::Idle);
}

#[tokio::test]
async fn cron_project_advances_once_due() {
    let (scheduler, store) = scheduler();
    let project_id = ProjectId::new();
    let mut project = base_project(project_id, ScheduleKind::Cron);
    project.cron_expression = Some("* * * * *".to_string());
    project.last_exec_time = Some(Utc::now() - chrono::Duration::minutes(5));
    store.upsert_project(&project).unwrap();

    scheduler.tick().await.unwrap();

    let reloaded = store.get_project(project_id).unwrap().unwrap();
    assert_eq!(reloaded.status, ProjectStatus::Completed);
}
