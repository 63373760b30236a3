//! Agent registry & dispatcher (§4.3): capability-match candidate
//! selection, fewest-in-flight tiebreak, heartbeat-driven liveness.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use scan_shared::models::Agent;
use scan_shared::types::{AgentId, AgentStatus, StageType, TaskId};
use tracing::{info, warn};

use crate::config::RegistryConfig;
use crate::storage::Store;

#[derive(Debug, Clone, Default)]
struct AgentRuntimeState {
    in_flight: u32,
    last_success_at: Option<chrono::DateTime<Utc>>,
}

/// In-memory view of agent liveness and load, backed by `Store` for
/// durability. Global, read-heavy, guarded by `dashmap`'s per-shard locks
/// rather than one coarse `RwLock` (§5 shared-state rules).
pub struct Registry {
    store: Arc<Store>,
    config: RegistryConfig,
    runtime: DashMap<AgentId, AgentRuntimeState>,
}

impl Registry {
    pub fn new(store: Arc<Store>, config: RegistryConfig) -> Self {
        Self {
            store,
            config,
            runtime: DashMap::new(),
        }
    }

    pub fn register(&self, agent: &Agent) -> crate::error::MasterResult<()> {
        self.store.upsert_agent(agent)?;
        self.runtime.entry(agent.id).or_default();
        info!("agent {} registered ({})", agent.id, agent.hostname);
        Ok(())
    }

    pub fn record_heartbeat(&self, agent_id: AgentId, in_flight: u32) -> crate::error::MasterResult<()> {
        if let Some(mut agent) = self.store.get_agent(agent_id)? {
            agent.last_heartbeat = Utc::now();
            agent.in_flight = in_flight;
            if agent.status == AgentStatus::Offline {
                agent.status = AgentStatus::Online;
            }
            self.store.upsert_agent(&agent)?;
        }
        self.runtime.entry(agent_id).or_default().in_flight = in_flight;
        Ok(())
    }

    fn liveness_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(
            (self.config.heartbeat_interval_secs * self.config.liveness_multiplier as u64) as i64,
        )
    }

    /// Marks agents with a stale heartbeat `offline` and returns the
    /// task ids that were in-flight on them, for the scheduler to revert
    /// to `pending`.
    pub fn sweep_liveness(&self) -> crate::error::MasterResult<Vec<AgentId>> {
        let window = self.liveness_window();
        let now = Utc::now();
        let mut newly_offline = Vec::new();
        for mut agent in self.store.all_agents()? {
            if agent.status != AgentStatus::Offline && now - agent.last_heartbeat > window {
                warn!("agent {} missed heartbeat window, marking offline", agent.id);
                agent.status = AgentStatus::Offline;
                self.store.upsert_agent(&agent)?;
                newly_offline.push(agent.id);
            }
        }
        Ok(newly_offline)
    }

    /// Candidates: `online`, capability includes `task_type`, tags satisfy
    /// any required-tag constraint. Winner: fewest in-flight, ties broken by
    /// most-recently-successful.
    pub fn select_agent(
        &self,
        task_type: StageType,
        required_tags: &[String],
    ) -> crate::error::MasterResult<Option<AgentId>> {
        let agents = self.store.all_agents()?;
        let mut best: Option<(Agent, u32, Option<chrono::DateTime<Utc>>)> = None;

        for agent in agents {
            if agent.status != AgentStatus::Online {
                continue;
            }
            if !agent.capabilities.contains(&task_type) {
                continue;
            }
            if !required_tags.iter().all(|t| agent.tags.contains(t)) {
                continue;
            }
            let runtime = self.runtime.get(&agent.id).map(|r| r.clone()).unwrap_or_default();
            let candidate = (agent.clone(), runtime.in_flight, runtime.last_success_at);

            best = Some(match best {
                None => candidate,
                Some(current) => {
                    if candidate.1 < current.1 {
                        candidate
                    } else if candidate.1 == current.1
                        && candidate.2.unwrap_or_default() > current.2.unwrap_or_default()
                    {
                        candidate
                    } else {
                        current
                    }
                }
            });
        }

        Ok(best.map(|(agent, _, _)| agent.id))
    }

    pub fn note_dispatch(&self, agent_id: AgentId) {
        self.runtime.entry(agent_id).or_default().in_flight += 1;
    }

    pub fn note_completion(&self, agent_id: AgentId, succeeded: bool) {
        let mut state = self.runtime.entry(agent_id).or_default();
        state.in_flight = state.in_flight.saturating_sub(1);
        if succeeded {
            state.last_success_at = Some(Utc::now());
        }
    }

    pub fn in_flight_count(&self, agent_id: AgentId) -> u32 {
        self.runtime.get(&agent_id).map(|r| r.in_flight).unwrap_or(0)
    }

    pub fn last_task_dispatched(&self, _agent_id: AgentId) -> Option<TaskId> {
        None
    }
}

#[allow(dead_code)]
type AgentCapabilitySet = HashMap<AgentId, Vec<StageType>>;

#[cfg(test)]
mod tests {
    use super::*;
    use scan_shared::types::AgentStatus as Status;
    use tempfile::tempdir;

    fn test_agent(id: AgentId, status: Status, caps: Vec<StageType>) -> Agent {
        Agent {
            id,
            hostname: "h".into(),
            address: "127.0.0.1".into(),
            port: 9000,
            status,
            capabilities: caps,
            tags: vec![],
            last_heartbeat: Utc::now(),
            in_flight: 0,
            version: "1".into(),
            os: "linux".into(),
            arch: "x86_64".into(),
        }
    }

    #[test]
    fn selects_fewest_in_flight_among_online_candidates() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path().to_str().unwrap()).unwrap());
        let registry = Registry::new(store, RegistryConfig::default());

        let a = AgentId::new();
        let b = AgentId::new();
        registry.register(&test_agent(a, Status::Online, vec![StageType::PortScan])).unwrap();
        registry.register(&test_agent(b, Status::Online, vec![StageType::PortScan])).unwrap();
        registry.note_dispatch(a);

        let selected = registry.select_agent(StageType::PortScan, &[]).unwrap();
        assert_eq!(selected, Some(b));
    }

    #[test]
    fn offline_agents_are_not_candidates() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path().to_str().unwrap()).unwrap());
        let registry = Registry::new(store, RegistryConfig::default());

        let a = AgentId::new();
        registry.register(&test_agent(a, Status::Offline, vec![StageType::PortScan])).unwrap();

        let selected = registry.select_agent(StageType::PortScan, &[]).unwrap();
        assert_eq!(selected, None);
    }

    #[test]
    fn stale_heartbeat_transitions_to_offline() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path().to_str().unwrap()).unwrap());
        let config = RegistryConfig {
            heartbeat_interval_secs: 1,
            liveness_multiplier: 1,
        };
        let registry = Registry::new(store, config);

        let a = AgentId::new();
        let mut agent = test_agent(a, Status::Online, vec![]);
        agent.last_heartbeat = Utc::now() - chrono::Duration::seconds(10);
        registry.register(&agent).unwrap();

        let offline = registry.sweep_liveness().unwrap();
        assert_eq!(offline, vec![a]);
    }
}
