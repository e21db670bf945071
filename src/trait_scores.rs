//! Trait score accumulation.
//!
//! `TraitRecord` is the running per-trait score map carried by a simulation.
//! `ScoreAggregator` writes into it with overwrite semantics and clamps
//! values into the configured `TraitScale`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Fixed bounded range trait scores live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraitScale {
    pub min: i32,
    pub max: i32,
}

impl Default for TraitScale {
    fn default() -> Self {
        Self { min: 1, max: 9 }
    }
}

impl TraitScale {
    pub fn new(min: i32, max: i32) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: i32) -> bool {
        value >= self.min && value <= self.max
    }

    pub fn clamp(&self, value: i64) -> i32 {
        value.clamp(self.min as i64, self.max as i64) as i32
    }

    pub fn midpoint(&self) -> i32 {
        (((self.min + self.max) as f64) / 2.0).round() as i32
    }

    /// Number of distinct values on the scale.
    pub fn span(&self) -> i32 {
        self.max - self.min + 1
    }
}

/// Partial mapping of trait name to score. Absent keys are "not yet measured".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraitRecord(BTreeMap<String, i32>);

impl TraitRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<i32> {
        self.0.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i32)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn values(&self) -> impl Iterator<Item = i32> + '_ {
        self.0.values().copied()
    }

    /// Complete view for resolution: every required trait present, missing
    /// ones filled with `default`. Traits already measured are kept even if
    /// they are not in `required`.
    pub fn with_defaults<S: AsRef<str>>(&self, required: &[S], default: i32) -> TraitRecord {
        let mut complete = self.0.clone();
        for name in required {
            complete.entry(name.as_ref().to_string()).or_insert(default);
        }
        TraitRecord(complete)
    }
}

impl<S: Into<String>> FromIterator<(S, i32)> for TraitRecord {
    fn from_iter<I: IntoIterator<Item = (S, i32)>>(iter: I) -> Self {
        TraitRecord(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// Dumb accumulator: latest write for a trait wins, values are clamped.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreAggregator {
    scale: TraitScale,
}

impl ScoreAggregator {
    pub fn new(scale: TraitScale) -> Self {
        Self { scale }
    }

    pub fn scale(&self) -> TraitScale {
        self.scale
    }

    /// Return `record` with `trait_name` set to `value` clamped into range.
    pub fn record(&self, record: &TraitRecord, trait_name: &str, value: i64) -> TraitRecord {
        let clamped = self.scale.clamp(value);
        if clamped as i64 != value {
            warn!(
                "Trait '{}' score {} outside {}..={}, clamped to {}",
                trait_name, value, self.scale.min, self.scale.max, clamped
            );
        }
        let mut next = record.clone();
        if let Some(previous) = next.0.insert(trait_name.to_string(), clamped) {
            warn!("Trait '{}' rewritten: {} -> {}", trait_name, previous, clamped);
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_write_overwrites() {
        let agg = ScoreAggregator::default();
        let rec = agg.record(&TraitRecord::new(), "persistence", 4);
        let rec = agg.record(&rec, "persistence", 7);
        assert_eq!(rec.get("persistence"), Some(7));
        assert_eq!(rec.len(), 1);
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let agg = ScoreAggregator::new(TraitScale::new(1, 9));
        let rec = agg.record(&TraitRecord::new(), "openness", 11);
        assert_eq!(rec.get("openness"), Some(9));
        let rec = agg.record(&rec, "openness", -3);
        assert_eq!(rec.get("openness"), Some(1));
    }

    #[test]
    fn record_does_not_touch_input() {
        let agg = ScoreAggregator::default();
        let original = TraitRecord::new();
        let _ = agg.record(&original, "assertiveness", 6);
        assert!(original.is_empty());
    }

    #[test]
    fn defaults_fill_only_missing_traits() {
        let rec: TraitRecord = [("persistence", 8)].into_iter().collect();
        let full = rec.with_defaults(&["persistence", "openness"], 5);
        assert_eq!(full.get("persistence"), Some(8));
        assert_eq!(full.get("openness"), Some(5));
    }

    #[test]
    fn scale_midpoint() {
        assert_eq!(TraitScale::new(1, 9).midpoint(), 5);
        assert_eq!(TraitScale::new(1, 5).midpoint(), 3);
    }
}
