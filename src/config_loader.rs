// config_loader.rs
// Purpose: layered runtime configuration (defaults -> TOML file -> SIM_ env)

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::archetype::{ArchetypeResolver, ArchetypeTable, ConsistencyThresholds};
use crate::errors::{SimError, SimResult};
use crate::trait_scores::TraitScale;

pub const DEFAULT_CONFIG_FILE: &str = "persona_sim.toml";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    pub url: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub turn_max_tokens: u32,
    pub dialogue_max_tokens: u32,
    pub conclusion_max_tokens: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            timeout_secs: 30,
            turn_max_tokens: 400,
            dialogue_max_tokens: 300,
            conclusion_max_tokens: 900,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionMode {
    /// Mean, round, consistency adjustment, clamp.
    Local,
    /// Ask the generation backend for the verdict and validate it.
    Model,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    pub story_window_chars: usize,
    pub trait_min: i32,
    pub trait_max: i32,
    pub default_trait_score: i32,
    pub dialogue_max_user_turns: usize,
    pub message_delimiter: String,
    pub consistency_min_traits: usize,
    /// Lowest score counted as "high"; derived from the top third when unset.
    #[serde(default)]
    pub high_score_min: Option<i32>,
    /// Highest score counted as "low"; derived from the bottom third when unset.
    #[serde(default)]
    pub low_score_max: Option<i32>,
    pub resolution_mode: ResolutionMode,
    #[serde(default)]
    pub scenario_file: Option<String>,
    /// Archetype names for ids trait_min..=trait_max; the standard table otherwise.
    #[serde(default)]
    pub archetype_names: Option<Vec<String>>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            story_window_chars: 4000,
            trait_min: 1,
            trait_max: 9,
            default_trait_score: 5,
            dialogue_max_user_turns: 3,
            message_delimiter: "||".to_string(),
            consistency_min_traits: 3,
            high_score_min: None,
            low_score_max: None,
            resolution_mode: ResolutionMode::Local,
            scenario_file: None,
            archetype_names: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub in_memory: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SimConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl SimConfig {
    pub fn trait_scale(&self) -> TraitScale {
        TraitScale::new(self.engine.trait_min, self.engine.trait_max)
    }

    pub fn consistency_thresholds(&self) -> ConsistencyThresholds {
        let derived = ConsistencyThresholds::from_scale(&self.trait_scale());
        ConsistencyThresholds {
            high_score_min: self.engine.high_score_min.unwrap_or(derived.high_score_min),
            low_score_max: self.engine.low_score_max.unwrap_or(derived.low_score_max),
            min_traits: self.engine.consistency_min_traits,
        }
    }

    pub fn archetype_resolver(&self) -> SimResult<ArchetypeResolver> {
        let table = match &self.engine.archetype_names {
            Some(names) => ArchetypeTable::custom(self.engine.trait_min, names.clone()),
            None => ArchetypeTable::standard(),
        };
        ArchetypeResolver::new(self.trait_scale(), self.consistency_thresholds(), table)
    }

    /// Store location, falling back to the platform data directory.
    pub fn store_path(&self) -> PathBuf {
        match &self.store.path {
            Some(p) => PathBuf::from(p),
            None => dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("persona_sim")
                .join("sessions"),
        }
    }

    /// Copy safe to print or log.
    pub fn redacted(&self) -> SimConfig {
        let mut copy = self.clone();
        if copy.backend.api_key.is_some() {
            copy.backend.api_key = Some("***".to_string());
        }
        copy
    }

    pub fn validate(&self) -> SimResult<()> {
        if self.backend.url.trim().is_empty() {
            return Err(SimError::config("backend.url must be set"));
        }
        if self.backend.timeout_secs == 0 {
            return Err(SimError::config("backend.timeout_secs must be positive"));
        }
        if self.engine.trait_min >= self.engine.trait_max {
            return Err(SimError::config("engine.trait_min must be below engine.trait_max"));
        }
        let scale = self.trait_scale();
        if !scale.contains(self.engine.default_trait_score) {
            return Err(SimError::config(
                "engine.default_trait_score must lie within the trait range",
            ));
        }
        let thresholds = self.consistency_thresholds();
        if !scale.contains(thresholds.high_score_min) || !scale.contains(thresholds.low_score_max) {
            return Err(SimError::config("consistency thresholds must lie within the trait range"));
        }
        if thresholds.low_score_max >= thresholds.high_score_min {
            return Err(SimError::config("engine.low_score_max must be below engine.high_score_min"));
        }
        if self.engine.dialogue_max_user_turns == 0 {
            return Err(SimError::config("engine.dialogue_max_user_turns must be positive"));
        }
        if self.engine.message_delimiter.is_empty() {
            return Err(SimError::config("engine.message_delimiter must not be empty"));
        }
        if self.engine.story_window_chars == 0 {
            return Err(SimError::config("engine.story_window_chars must be positive"));
        }
        self.archetype_resolver()?;
        Ok(())
    }
}

fn figment_for(path: &Path) -> Figment {
    Figment::from(Serialized::defaults(SimConfig::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("SIM_").split("__"))
}

/// Load configuration from `SIM_CONFIG` (or `persona_sim.toml`) plus env overrides.
pub fn load_config() -> SimResult<SimConfig> {
    let path = std::env::var("SIM_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
    load_config_from(Path::new(&path))
}

/// Load configuration from an explicit TOML file plus env overrides.
///
/// A missing file is not an error; defaults and environment still apply.
pub fn load_config_from(path: &Path) -> SimResult<SimConfig> {
    let config: SimConfig = figment_for(path).extract()?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = SimConfig::default();
        assert!(cfg.validate().is_ok());
        let t = cfg.consistency_thresholds();
        assert_eq!(t.high_score_min, 7);
        assert_eq!(t.low_score_max, 3);
        assert_eq!(t.min_traits, 3);
    }

    #[test]
    fn inverted_range_is_rejected() {
        let mut cfg = SimConfig::default();
        cfg.engine.trait_min = 9;
        cfg.engine.trait_max = 1;
        assert!(matches!(cfg.validate(), Err(SimError::Config { .. })));
    }

    #[test]
    fn redaction_hides_key() {
        let mut cfg = SimConfig::default();
        cfg.backend.api_key = Some("sk-secret".to_string());
        assert_eq!(cfg.redacted().backend.api_key.as_deref(), Some("***"));
    }
}
