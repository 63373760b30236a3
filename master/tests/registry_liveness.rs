//! Crate-level coverage of agent registry liveness: an agent that misses
//! its heartbeat window is swept offline and is no longer a candidate for
//! dispatch, while a heartbeat received in time brings it back online.

use std::sync::Arc;

use chrono::Utc;
use scan_shared::models::Agent;
use scan_shared::types::{AgentId, AgentStatus, StageType};
use tempfile::tempdir;

use scan_master::config::RegistryConfig;
use scan_master::registry::Registry;
use scan_master::storage::Store;

fn agent(id: AgentId, status: AgentStatus, last_heartbeat: chrono::DateTime<Utc>) -> Agent {
    Agent {
        id,
        hostname: "h".into(),
        address: "127.0.0.1".into(),
        port: 9000,
        status,
        capabilities: vec![StageType::PortScan],
        tags: vec![],
        last_heartbeat,
        in_flight: 0,
        version: "1".into(),
        os: "linux".into(),
        arch: "x86_64".into(),
    }
}

#[test]
fn stale_agent_is_swept_offline_and_dropped_from_candidates() {
    let dir = tempdir().unwrap();
    let store = Arc::new(Store::open(dir.path().to_str().unwrap()).unwrap());
    let config = RegistryConfig {
        heartbeat_interval_secs: 1,
        liveness_multiplier: 1,
    };
    let registry = Registry::new(store, config);

    let id = AgentId::new();
    registry
        .register(&agent(id, AgentStatus::Online, Utc::now() - chrono::Duration::seconds(30)))
        .unwrap();

    assert_eq!(registry.select_agent(StageType::PortScan, &[]).unwrap(), Some(id));

    let offline = registry.sweep_liveness().unwrap();
    assert_eq!(offline, vec![id]);
    assert_eq!(registry.select_agent(StageType::PortScan, &[]).unwrap(), None);
}

#[test]
fn fresh_heartbeat_keeps_agent_alive_and_eligible() {
    let dir = tempdir().unwrap();
    let store = Arc::new(Store::open(dir.path().to_str().unwrap()).unwrap());
    let config = RegistryConfig {
        heartbeat_interval_secs: 60,
        liveness_multiplier: 3,
    };
    let registry = Registry::new(store, config);

    let id = AgentId::new();
    registry.register(&agent(id, AgentStatus::Online, Utc::now())).unwrap();

    let offline = registry.sweep_liveness().unwrap();
    assert!(offline.is_empty());
    assert_eq!(registry.select_agent(StageType::PortScan, &[]).unwrap(), Some(id));
}

#[test]
fn heartbeat_after_going_offline_brings_agent_back_online() {
    let dir = tempdir().unwrap();
    let store = Arc::new(Store::open(dir.path().to_str().unwrap()).unwrap());
    let config = RegistryConfig {
        heartbeat_interval_secs: 1,
        liveness_multiplier: 1,
    };
    let registry = Registry::new(store, config);

    let id = AgentId::new();
    registry
        .register(&agent(id, AgentStatus::Online, Utc::now() - chrono::Duration::seconds(30)))
        .unwrap();
    registry.sweep_liveness().unwrap();
    assert_eq!(registry.select_agent(StageType::PortScan, &[]).unwrap(), None);

    registry.record_heartbeat(id, 0).unwrap();
    assert_eq!(registry.select_agent(StageType::PortScan, &[]).unwrap(), Some(id));
}
