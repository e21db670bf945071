// audit.rs
// Structured per-turn audit records, emitted through tracing

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

/// Severity of an audit record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditSeverity {
    Info,
    Warn,
}

/// What happened on a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnAction {
    Classified,
    Chose,
    DialogueStep,
    DialogueComplete,
    Concluded,
    Rejected,
}

/// One audit record per processed turn step
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnAuditEvent {
    pub id: String,
    pub simulation_id: String,
    pub scenario_type: String,
    pub turn: u32,
    pub action: TurnAction,
    pub timestamp: DateTime<Utc>,
    pub classification: Option<String>,
    pub trait_name: Option<String>,
    pub trait_score: Option<i32>,
    pub archetype_id: Option<i32>,
    pub fallback_used: bool,
    pub severity: AuditSeverity,
}

impl TurnAuditEvent {
    pub fn new(simulation_id: &str, scenario_type: &str, turn: u32, action: TurnAction) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            simulation_id: simulation_id.to_string(),
            scenario_type: scenario_type.to_string(),
            turn,
            action,
            timestamp: Utc::now(),
            classification: None,
            trait_name: None,
            trait_score: None,
            archetype_id: None,
            fallback_used: false,
            severity: AuditSeverity::Info,
        }
    }

    pub fn with_classification(mut self, label: &str) -> Self {
        self.classification = Some(label.to_string());
        self
    }

    pub fn with_score(mut self, trait_name: &str, score: i32) -> Self {
        self.trait_name = Some(trait_name.to_string());
        self.trait_score = Some(score);
        self
    }

    pub fn with_archetype(mut self, archetype_id: i32) -> Self {
        self.archetype_id = Some(archetype_id);
        self
    }

    /// Marks that a degraded value was substituted; raises severity to WARN
    pub fn with_fallback(mut self, used: bool) -> Self {
        self.fallback_used = used;
        if used {
            self.severity = AuditSeverity::Warn;
        }
        self
    }

    pub fn with_severity(mut self, severity: AuditSeverity) -> Self {
        self.severity = severity;
        self
    }

    /// Write to the `audit` tracing target
    pub fn emit(&self) {
        let payload = serde_json::to_string(self).unwrap_or_else(|_| self.id.clone());
        match self.severity {
            AuditSeverity::Info => info!(target: "audit", "{}", payload),
            AuditSeverity::Warn => warn!(target: "audit", "{}", payload),
        }
    }
}
