//! Archetype resolution.
//!
//! Maps a complete trait record onto one archetype of a fixed ordinal
//! scale: unweighted mean, round to nearest, consistency adjustment of at
//! most one step, clamp, then a static name lookup. Resolution can also be
//! delegated to the generation backend, in which case the returned id is
//! validated and never coerced.

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::errors::{SimError, SimResult};
use crate::generation::TextGenerator;
use crate::response_interpreter;
use crate::trait_scores::{TraitRecord, TraitScale};

lazy_static! {
    /// Names for ids 1..=9, most resistant to most willing.
    static ref STANDARD_NAMES: Vec<&'static str> = vec![
        "The Fortress",
        "The Gatekeeper",
        "The Skeptic",
        "The Deflector",
        "The Diplomat",
        "The Listener",
        "The Collaborator",
        "The Enthusiast",
        "The Open Door",
    ];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchetypeResult {
    pub archetype_id: i32,
    pub archetype_name: String,
    pub rationale: String,
}

/// Id -> name lookup covering a contiguous id range.
#[derive(Debug, Clone)]
pub struct ArchetypeTable {
    min_id: i32,
    names: Vec<String>,
}

impl ArchetypeTable {
    pub fn standard() -> Self {
        Self {
            min_id: 1,
            names: STANDARD_NAMES.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn custom(min_id: i32, names: Vec<String>) -> Self {
        Self { min_id, names }
    }

    pub fn max_id(&self) -> i32 {
        self.min_id + self.names.len() as i32 - 1
    }

    pub fn name(&self, id: i32) -> Option<&str> {
        if id < self.min_id {
            return None;
        }
        self.names.get((id - self.min_id) as usize).map(String::as_str)
    }
}

/// Boundaries for the consistency adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyThresholds {
    /// Scores at or above this count as "high".
    pub high_score_min: i32,
    /// Scores at or below this count as "low".
    pub low_score_max: i32,
    /// How many traits must agree before the id is nudged.
    pub min_traits: usize,
}

impl ConsistencyThresholds {
    /// Top and bottom thirds of the scale, three agreeing traits.
    pub fn from_scale(scale: &TraitScale) -> Self {
        let third = scale.span() / 3;
        Self {
            high_score_min: scale.max - third + 1,
            low_score_max: scale.min + third - 1,
            min_traits: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustment {
    None,
    Up,
    Down,
}

/// Intermediate values of a local resolution, kept for the rationale.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub mean: f64,
    pub provisional_id: i32,
    pub adjustment: Adjustment,
    pub final_id: i32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelVerdict {
    archetype_id: Value,
    #[serde(default)]
    rationale: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ArchetypeResolver {
    scale: TraitScale,
    thresholds: ConsistencyThresholds,
    table: ArchetypeTable,
}

impl Default for ArchetypeResolver {
    fn default() -> Self {
        let scale = TraitScale::default();
        Self {
            scale,
            thresholds: ConsistencyThresholds::from_scale(&scale),
            table: ArchetypeTable::standard(),
        }
    }
}

impl ArchetypeResolver {
    pub fn new(
        scale: TraitScale,
        thresholds: ConsistencyThresholds,
        table: ArchetypeTable,
    ) -> SimResult<Self> {
        if table.min_id != scale.min || table.max_id() != scale.max {
            return Err(SimError::config(format!(
                "archetype table covers {}..={} but trait scale is {}..={}",
                table.min_id,
                table.max_id(),
                scale.min,
                scale.max
            )));
        }
        Ok(Self {
            scale,
            thresholds,
            table,
        })
    }

    pub fn scale(&self) -> TraitScale {
        self.scale
    }

    /// Run the local algorithm without building a result.
    pub fn compute(&self, record: &TraitRecord) -> SimResult<Resolution> {
        if record.is_empty() {
            return Err(SimError::invariant("no trait scores to resolve"));
        }

        let values: Vec<i32> = record.values().collect();
        let mean = values.iter().map(|v| *v as f64).sum::<f64>() / values.len() as f64;
        let provisional_id = mean.round() as i32;

        let high = values.iter().filter(|v| **v >= self.thresholds.high_score_min).count();
        let low = values.iter().filter(|v| **v <= self.thresholds.low_score_max).count();
        let min = self.thresholds.min_traits;

        let (adjustment, adjusted) = if high >= min && low < min {
            let ceiling = values.iter().copied().max().unwrap_or(provisional_id);
            (Adjustment::Up, (provisional_id + 1).min(ceiling).max(provisional_id))
        } else if low >= min && high < min {
            let floor = values.iter().copied().min().unwrap_or(provisional_id);
            (Adjustment::Down, (provisional_id - 1).max(floor).min(provisional_id))
        } else {
            (Adjustment::None, provisional_id)
        };

        Ok(Resolution {
            mean,
            provisional_id,
            adjustment,
            final_id: self.scale.clamp(adjusted as i64),
        })
    }

    /// Resolve locally.
    pub fn resolve(&self, record: &TraitRecord) -> SimResult<ArchetypeResult> {
        let r = self.compute(record)?;
        let adjustment = match r.adjustment {
            Adjustment::None => "no consistency adjustment",
            Adjustment::Up => "consistently high traits nudged it up",
            Adjustment::Down => "consistently low traits nudged it down",
        };
        let rationale = format!(
            "Mean score {:.2} across {} traits rounds to {}; {}.",
            r.mean,
            record.len(),
            r.provisional_id,
            adjustment
        );
        self.build_result(r.final_id, rationale)
    }

    /// Ask the backend for a verdict on `prompt` and validate it.
    pub async fn resolve_with_model(
        &self,
        generator: &dyn TextGenerator,
        prompt: &str,
        max_output_tokens: u32,
    ) -> SimResult<ArchetypeResult> {
        let raw = generator.generate(prompt, max_output_tokens).await?;
        let verdict: ModelVerdict = response_interpreter::extract_required(&raw, "archetype verdict")?;
        self.accept_verdict(&verdict.archetype_id, verdict.rationale)
    }

    fn accept_verdict(&self, id: &Value, rationale: Option<String>) -> SimResult<ArchetypeResult> {
        let id = match id {
            Value::Number(n) => match (n.as_i64(), n.as_f64()) {
                (Some(i), _) => i,
                (None, Some(f)) if f.fract() == 0.0 => f as i64,
                _ => return Err(SimError::invariant(format!("archetype id {n} is not integral"))),
            },
            other => {
                return Err(SimError::invariant(format!("archetype id {other} is not a number")));
            }
        };
        if id < self.scale.min as i64 || id > self.scale.max as i64 {
            warn!("Model returned out-of-range archetype id {}", id);
            return Err(SimError::invariant(format!(
                "archetype id {id} outside {}..={}",
                self.scale.min, self.scale.max
            )));
        }
        let rationale = rationale
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| "Resolved from the simulation's trait profile.".to_string());
        self.build_result(id as i32, rationale)
    }

    fn build_result(&self, id: i32, rationale: String) -> SimResult<ArchetypeResult> {
        let name = self
            .table
            .name(id)
            .ok_or_else(|| SimError::invariant(format!("no archetype named for id {id}")))?;
        info!("Resolved archetype {} ({})", id, name);
        Ok(ArchetypeResult {
            archetype_id: id,
            archetype_name: name.to_string(),
            rationale,
        })
    }
}
