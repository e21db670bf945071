//! Single-flight guard for simulation submissions.
//!
//! A simulation may only have one turn in flight. The guard hands out a
//! permit per simulation id and rejects a second concurrent submission with
//! a conflict instead of queueing it.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::errors::{SafeLock, SimError, SimResult};

#[derive(Default, Clone)]
pub struct SubmissionGuard {
    in_flight: Arc<Mutex<HashSet<String>>>,
}

/// Released on drop.
pub struct SubmissionPermit {
    simulation_id: String,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl SubmissionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `simulation_id`, failing if a submission is already running.
    pub fn acquire(&self, simulation_id: &str) -> SimResult<SubmissionPermit> {
        let mut in_flight = self.in_flight.safe_lock()?;
        if !in_flight.insert(simulation_id.to_string()) {
            warn!("Rejected concurrent submission for {}", simulation_id);
            return Err(SimError::conflict(format!(
                "a turn for simulation {simulation_id} is already being processed"
            )));
        }
        Ok(SubmissionPermit {
            simulation_id: simulation_id.to_string(),
            in_flight: self.in_flight.clone(),
        })
    }

    pub fn active(&self) -> SimResult<usize> {
        Ok(self.in_flight.safe_lock()?.len())
    }
}

impl Drop for SubmissionPermit {
    fn drop(&mut self) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.remove(&self.simulation_id);
        }
    }
}
