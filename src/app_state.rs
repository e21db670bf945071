use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::{
    config_loader::SimConfig,
    errors::SimResult,
    generation::{HttpTextGenerator, TextGenerator},
    input_validator::InputValidator,
    prompts::TemplatePrompts,
    scenario::ScenarioCatalog,
    session_store::{MemorySessionStore, SessionStore, SledSessionStore},
    submission_guard::SubmissionGuard,
    turn_sequencer::TurnSequencer,
};

pub struct AppState {
    pub config: SimConfig,
    pub catalog: ScenarioCatalog,
    pub sequencer: TurnSequencer,
    pub store: Arc<dyn SessionStore>,
    pub guard: SubmissionGuard,
    pub validator: InputValidator,
    pub generator_name: String,
}

impl AppState {
    pub fn new(
        config: SimConfig,
        catalog: ScenarioCatalog,
        generator: Arc<dyn TextGenerator>,
        store: Arc<dyn SessionStore>,
    ) -> SimResult<Self> {
        let generator_name = generator.name().to_string();
        let sequencer = TurnSequencer::from_config(&config, generator, Arc::new(TemplatePrompts))?;
        Ok(Self {
            config,
            catalog,
            sequencer,
            store,
            guard: SubmissionGuard::new(),
            validator: InputValidator::new(),
            generator_name,
        })
    }

    /// Wire the HTTP backend, scenario catalog and store described by `config`.
    pub fn from_config(config: SimConfig) -> SimResult<Self> {
        let catalog = load_catalog(&config)?;
        let generator: Arc<dyn TextGenerator> = Arc::new(HttpTextGenerator::new(&config.backend)?);
        let store = open_store(&config)?;
        Self::new(config, catalog, generator, store)
    }
}

/// Built-in scenarios plus any from `engine.scenario_file`.
pub fn load_catalog(config: &SimConfig) -> SimResult<ScenarioCatalog> {
    let mut catalog = ScenarioCatalog::with_builtins();
    if let Some(file) = &config.engine.scenario_file {
        catalog.load_file(Path::new(file))?;
    }
    Ok(catalog)
}

pub fn open_store(config: &SimConfig) -> SimResult<Arc<dyn SessionStore>> {
    if config.store.in_memory {
        info!("Using in-memory session store");
        return Ok(Arc::new(MemorySessionStore::new()));
    }
    Ok(Arc::new(SledSessionStore::open(&config.store_path())?))
}
