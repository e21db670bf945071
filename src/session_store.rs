// session_store.rs
// Persistence for simulation state: trait seam plus sled and in-memory backends

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use sled::Db;
use tracing::{debug, info};

use crate::errors::{SafeLock, SimError, SimResult};
use crate::simulation::SimulationState;

const SIMULATIONS_TREE: &str = "simulations";

/// Load/save of whole simulation states keyed by simulation id.
///
/// Callers own concurrency control; a store only guarantees that a `save`
/// fully replaces the previous value.
pub trait SessionStore: Send + Sync {
    fn load(&self, simulation_id: &str) -> SimResult<Option<SimulationState>>;
    fn save(&self, state: &SimulationState) -> SimResult<()>;
    fn delete(&self, simulation_id: &str) -> SimResult<bool>;
    fn list_ids(&self) -> SimResult<Vec<String>>;

    fn require(&self, simulation_id: &str) -> SimResult<SimulationState> {
        self.load(simulation_id)?
            .ok_or_else(|| SimError::not_found("simulation", simulation_id))
    }
}

/// Sled-backed store; one JSON document per simulation.
pub struct SledSessionStore {
    db: Db,
    tree: sled::Tree,
}

impl SledSessionStore {
    pub fn open(path: &Path) -> SimResult<Self> {
        let db = sled::open(path)?;
        let tree = db.open_tree(SIMULATIONS_TREE)?;
        info!("Opened session store at {}", path.display());
        Ok(Self { db, tree })
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> SimResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl SessionStore for SledSessionStore {
    fn load(&self, simulation_id: &str) -> SimResult<Option<SimulationState>> {
        match self.tree.get(simulation_id.as_bytes())? {
            Some(bytes) => {
                let state = serde_json::from_slice(&bytes)
                    .map_err(|e| SimError::serialization("decode simulation", e))?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    fn save(&self, state: &SimulationState) -> SimResult<()> {
        let bytes = serde_json::to_vec(state)
            .map_err(|e| SimError::serialization("encode simulation", e))?;
        self.tree.insert(state.simulation_id.as_bytes(), bytes)?;
        debug!("Saved simulation {} at turn {}", state.simulation_id, state.current_turn);
        Ok(())
    }

    fn delete(&self, simulation_id: &str) -> SimResult<bool> {
        Ok(self.tree.remove(simulation_id.as_bytes())?.is_some())
    }

    fn list_ids(&self) -> SimResult<Vec<String>> {
        let mut ids = Vec::new();
        for key in self.tree.iter().keys() {
            ids.push(String::from_utf8_lossy(&key?).into_owned());
        }
        Ok(ids)
    }
}

/// Process-local store for tests and `store.in_memory = true`.
#[derive(Default)]
pub struct MemorySessionStore {
    states: Mutex<HashMap<String, SimulationState>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self, simulation_id: &str) -> SimResult<Option<SimulationState>> {
        Ok(self.states.safe_lock()?.get(simulation_id).cloned())
    }

    fn save(&self, state: &SimulationState) -> SimResult<()> {
        self.states
            .safe_lock()?
            .insert(state.simulation_id.clone(), state.clone());
        Ok(())
    }

    fn delete(&self, simulation_id: &str) -> SimResult<bool> {
        Ok(self.states.safe_lock()?.remove(simulation_id).is_some())
    }

    fn list_ids(&self) -> SimResult<Vec<String>> {
        let mut ids: Vec<String> = self.states.safe_lock()?.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trip() {
        let store = MemorySessionStore::new();
        let state = SimulationState::new("boundary_call", "Ring.");
        store.save(&state).unwrap();
        assert_eq!(store.load(&state.simulation_id).unwrap(), Some(state.clone()));
        assert_eq!(store.list_ids().unwrap(), vec![state.simulation_id.clone()]);
        assert!(store.delete(&state.simulation_id).unwrap());
        assert!(matches!(
            store.require(&state.simulation_id),
            Err(SimError::NotFound { .. })
        ));
    }
}
