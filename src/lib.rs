//! Library root for the `persona_sim` crate
//! Narrative persona simulation: turn sequencing, nested exchanges,
//! tolerant response parsing, trait aggregation and archetype resolution

// Core error handling
pub mod api_errors;
pub mod errors;

// Configuration & logging
pub mod config_loader;
pub mod logging;

// Model plumbing
pub mod generation;
pub mod prompts;
pub mod response_interpreter;

// Scenario data and scoring
pub mod archetype;
pub mod scenario;
pub mod trait_scores;

// Simulation engine
pub mod simulation;
pub mod sub_dialogue;
pub mod turn_sequencer;

// Audit records
pub mod audit;

// Persistence & request handling
pub mod input_validator;
pub mod session_store;
pub mod submission_guard;

// Web server interface
pub mod api;
pub mod app_state;
pub mod web;

// CLI
pub mod cli;

#[cfg(test)]
mod tests {
    pub mod test_utils;
    pub mod sequencer;
    pub mod sub_dialogue;
    pub mod end_to_end;
}

pub use archetype::{ArchetypeResolver, ArchetypeResult};
pub use errors::{SimError, SimResult};
pub use simulation::{SimulationState, TurnInput};
pub use turn_sequencer::{TurnOutcome, TurnSequencer};
