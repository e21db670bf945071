use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};

use crate::{
    api_errors::RETRY_MESSAGE,
    app_state::{load_catalog, open_store, AppState},
    config_loader::{load_config, load_config_from, SimConfig},
    errors::SimError,
    generation::{HttpTextGenerator, ScriptedGenerator, TextGenerator},
    prompts::TemplatePrompts,
    scenario::TurnPlan,
    simulation::TurnInput,
    trait_scores::TraitRecord,
    turn_sequencer::{TurnPrompt, TurnSequencer},
};

/// Top-level CLI for the persona simulation engine
#[derive(Parser)]
#[command(
    name = "persona_sim",
    version,
    about = "Narrative persona simulation engine"
)]
pub struct Cli {
    /// Configuration file (defaults to SIM_CONFIG or persona_sim.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the HTTP API
    Serve {
        /// Host/IP to bind (overrides server.host)
        #[arg(long)]
        host: Option<String>,
        /// Port to bind (overrides server.port)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Play a scenario interactively in the terminal
    Play {
        #[arg(short, long, default_value = "boundary_call")]
        scenario: String,
        /// Replay completions from a JSON array of strings instead of calling the backend
        #[arg(long)]
        script: Option<PathBuf>,
    },

    /// Resolve an archetype from trait scores, e.g. `resolve warmth=7 candor=4`
    Resolve {
        #[arg(required = true)]
        scores: Vec<String>,
    },

    /// List available scenarios
    Scenarios,

    /// Print a stored simulation as JSON
    Show {
        #[arg(long)]
        id: String,
    },

    /// Print the effective configuration with secrets redacted
    Config,
}

pub fn resolve_config(path: Option<&Path>) -> anyhow::Result<SimConfig> {
    let config = match path {
        Some(p) => load_config_from(p),
        None => load_config(),
    };
    config.context("failed to load configuration")
}

pub fn dispatch(cli: Cli, config: SimConfig) -> anyhow::Result<()> {
    match cli.command {
        Commands::Serve { host, port } => {
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);
            let rt = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("failed to build Tokio runtime")?;
            rt.block_on(serve(config, &host, port))
        }
        Commands::Play { scenario, script } => {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("failed to build Tokio runtime")?;
            rt.block_on(play(config, &scenario, script.as_deref()))
        }
        Commands::Resolve { scores } => {
            let record = parse_scores(&scores)?;
            let result = config.archetype_resolver()?.resolve(&record)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Commands::Scenarios => {
            let catalog = load_catalog(&config)?;
            for s in catalog.list() {
                println!("{:<16} {} ({} turns)", s.scenario_type, s.title, s.final_turn());
            }
            Ok(())
        }
        Commands::Show { id } => {
            let store = open_store(&config)?;
            let state = store.require(&id)?;
            println!("{}", serde_json::to_string_pretty(&state)?);
            Ok(())
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config.redacted())?);
            Ok(())
        }
    }
}

async fn serve(config: SimConfig, host: &str, port: u16) -> anyhow::Result<()> {
    let addr = format!("{host}:{port}");
    let state = Arc::new(AppState::from_config(config)?);
    let app = crate::web::build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("HTTP server listening on http://{addr}");
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

/// Parse `name=value` pairs into a trait record.
pub fn parse_scores(pairs: &[String]) -> anyhow::Result<TraitRecord> {
    pairs
        .iter()
        .map(|pair| {
            let (name, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("expected name=value, got '{pair}'"))?;
            let value: i32 = value
                .trim()
                .parse()
                .with_context(|| format!("score for '{name}' is not an integer"))?;
            Ok((name.trim().to_string(), value))
        })
        .collect()
}

fn load_script(path: &Path) -> anyhow::Result<ScriptedGenerator> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read script {}", path.display()))?;
    let replies: Vec<String> = serde_json::from_str(&content)
        .with_context(|| format!("script {} must be a JSON array of strings", path.display()))?;
    Ok(ScriptedGenerator::new(replies))
}

fn print_prompt(prompt: &TurnPrompt) {
    match &prompt.counterpart {
        Some(who) => println!("\n[{}] {}: {}", prompt.turn, who, prompt.situation),
        None => println!("\n[{}] {}", prompt.turn, prompt.situation),
    }
    for option in &prompt.options {
        println!("  {:<10} {}", option.id, option.summary);
    }
}

async fn play(config: SimConfig, scenario_type: &str, script: Option<&Path>) -> anyhow::Result<()> {
    let catalog = load_catalog(&config)?;
    let generator: Arc<dyn TextGenerator> = match script {
        Some(path) => Arc::new(load_script(path)?),
        None => Arc::new(HttpTextGenerator::new(&config.backend)?),
    };
    let sequencer = TurnSequencer::from_config(&config, generator, Arc::new(TemplatePrompts))?;
    let scenario = catalog.require(scenario_type)?;

    let mut state = sequencer.start(scenario);
    println!("{}", state.story_so_far);
    if let Some(prompt) = TurnPrompt::for_turn(scenario, 1) {
        if prompt.kind == "choice" {
            print_prompt(&prompt);
        }
    }

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    while !state.is_complete() {
        print!("> ");
        io::stdout().flush()?;
        let Some(line) = lines.next() else {
            break;
        };
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "quit" || line == "exit" {
            break;
        }

        let input = match scenario.plan_for(state.current_turn) {
            Some(TurnPlan::Choice(_)) => TurnInput::Choice(line.to_string()),
            _ => TurnInput::FreeText(line.to_string()),
        };

        match sequencer.advance(scenario, &state, input).await {
            Ok(outcome) => {
                for message in &outcome.respondent_messages {
                    println!("  \"{message}\"");
                }
                if let Some(scene) = &outcome.scene_text {
                    println!("\n{scene}");
                }
                if let Some(prompt) = outcome.next_prompt.as_ref().filter(|p| p.kind == "choice") {
                    print_prompt(prompt);
                }
                if let Some(archetype) = &outcome.archetype {
                    println!(
                        "\nYou are {} ({}).\n{}",
                        archetype.archetype_name, archetype.archetype_id, archetype.rationale
                    );
                }
                state = outcome.state;
            }
            Err(e) if e.is_retryable() => {
                tracing::warn!("Turn failed: {e}");
                println!("{RETRY_MESSAGE}");
            }
            Err(e @ SimError::Validation { .. }) => println!("{e}"),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scores_parse_from_pairs() {
        let record = parse_scores(&["warmth=7".to_string(), " candor = 4".to_string()]).unwrap();
        assert_eq!(record.get("warmth"), Some(7));
        assert_eq!(record.get("candor"), Some(4));
        assert!(parse_scores(&["warmth".to_string()]).is_err());
        assert!(parse_scores(&["warmth=high".to_string()]).is_err());
    }

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["persona_sim", "resolve", "a=1", "b=9"]).unwrap();
        assert!(matches!(cli.command, Commands::Resolve { ref scores } if scores.len() == 2));
        let cli = Cli::try_parse_from(["persona_sim", "--config", "x.toml", "serve", "--port", "9000"]).unwrap();
        assert_eq!(cli.config.as_deref(), Some(Path::new("x.toml")));
        assert!(matches!(cli.command, Commands::Serve { port: Some(9000), .. }));
    }
}
