//! Scenario catalog.
//!
//! A scenario is an ordered turn plan plus the trait list and guidance used
//! at resolution time. Built-in scenarios are constructed once and never
//! mutated; deployments can add more from a TOML file.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::{SimError, SimResult};

/// Intent label a free-text answer can be classified into.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentLabel {
    pub label: String,
    pub description: String,
    /// Score recorded when the model classifies but omits a trait score.
    #[serde(default)]
    pub fallback_score: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedTurn {
    pub situation: String,
    pub labels: Vec<IntentLabel>,
    #[serde(default)]
    pub trait_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChoiceOption {
    pub id: String,
    pub summary: String,
    #[serde(default)]
    pub score: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChoiceTurn {
    pub situation: String,
    pub options: Vec<ChoiceOption>,
    #[serde(default)]
    pub trait_name: Option<String>,
}

impl ChoiceTurn {
    pub fn option(&self, id: &str) -> Option<&ChoiceOption> {
        self.options.iter().find(|o| o.id == id)
    }
}

/// Nested exchange with a counterpart (friend, negotiator, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeSpec {
    pub exchange_id: String,
    pub counterpart: String,
    pub opening_line: String,
    pub trait_name: String,
    pub context: String,
    /// Overrides the configured user-turn ceiling for this exchange.
    #[serde(default)]
    pub max_user_turns: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TurnPlan {
    Classified(ClassifiedTurn),
    Choice(ChoiceTurn),
    Dialogue(ExchangeSpec),
}

impl TurnPlan {
    pub fn kind(&self) -> &'static str {
        match self {
            TurnPlan::Classified(_) => "classified",
            TurnPlan::Choice(_) => "choice",
            TurnPlan::Dialogue(_) => "dialogue",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioDefinition {
    pub scenario_type: String,
    pub title: String,
    pub premise: String,
    pub required_traits: Vec<String>,
    pub resolution_guidance: String,
    pub turns: Vec<TurnPlan>,
}

impl ScenarioDefinition {
    /// Turns are numbered from 1; the last planned turn is terminal.
    pub fn final_turn(&self) -> u32 {
        self.turns.len() as u32
    }

    pub fn plan_for(&self, turn: u32) -> Option<&TurnPlan> {
        if turn == 0 {
            return None;
        }
        self.turns.get(turn as usize - 1)
    }

    pub fn exchange(&self, exchange_id: &str) -> Option<&ExchangeSpec> {
        self.turns.iter().find_map(|t| match t {
            TurnPlan::Dialogue(spec) if spec.exchange_id == exchange_id => Some(spec),
            _ => None,
        })
    }

    pub fn validate(&self) -> SimResult<()> {
        let field = format!("scenario.{}", self.scenario_type);
        if self.scenario_type.trim().is_empty() {
            return Err(SimError::config("scenario_type must not be empty"));
        }
        if self.turns.is_empty() {
            return Err(SimError::config(format!("{field}: at least one turn is required")));
        }
        if self.required_traits.is_empty() {
            return Err(SimError::config(format!("{field}: required_traits must not be empty")));
        }
        let mut exchange_ids = HashSet::new();
        for (i, turn) in self.turns.iter().enumerate() {
            match turn {
                TurnPlan::Classified(c) if c.labels.is_empty() => {
                    return Err(SimError::config(format!("{field}: turn {} has no labels", i + 1)));
                }
                TurnPlan::Choice(c) => {
                    let ids: HashSet<_> = c.options.iter().map(|o| o.id.as_str()).collect();
                    if c.options.is_empty() || ids.len() != c.options.len() {
                        return Err(SimError::config(format!(
                            "{field}: turn {} needs unique, non-empty options",
                            i + 1
                        )));
                    }
                }
                TurnPlan::Dialogue(spec) => {
                    if !exchange_ids.insert(spec.exchange_id.as_str()) {
                        return Err(SimError::config(format!(
                            "{field}: duplicate exchange '{}'",
                            spec.exchange_id
                        )));
                    }
                    if spec.opening_line.trim().is_empty() {
                        return Err(SimError::config(format!(
                            "{field}: exchange '{}' needs an opening line",
                            spec.exchange_id
                        )));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScenarioCatalog {
    scenarios: BTreeMap<String, ScenarioDefinition>,
}

#[derive(Deserialize)]
struct ScenarioFile {
    #[serde(default)]
    scenarios: Vec<ScenarioDefinition>,
}

lazy_static! {
    static ref BUILTIN: Vec<ScenarioDefinition> = vec![boundary_call(), negotiation()];
}

impl ScenarioCatalog {
    pub fn with_builtins() -> Self {
        let mut catalog = Self::default();
        for scenario in BUILTIN.iter() {
            catalog.scenarios.insert(scenario.scenario_type.clone(), scenario.clone());
        }
        catalog
    }

    /// Add (or replace) a scenario after validating it.
    pub fn insert(&mut self, scenario: ScenarioDefinition) -> SimResult<()> {
        scenario.validate()?;
        self.scenarios.insert(scenario.scenario_type.clone(), scenario);
        Ok(())
    }

    /// Merge scenarios from a TOML file containing `[[scenarios]]` tables.
    pub fn load_file(&mut self, path: &Path) -> SimResult<usize> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SimError::io(format!("reading {}", path.display()), e))?;
        let file: ScenarioFile = toml::from_str(&content)
            .map_err(|e| SimError::config(format!("invalid scenario file: {e}")))?;
        let count = file.scenarios.len();
        for scenario in file.scenarios {
            self.insert(scenario)?;
        }
        info!("Loaded {} scenarios from {}", count, path.display());
        Ok(count)
    }

    pub fn get(&self, scenario_type: &str) -> Option<&ScenarioDefinition> {
        self.scenarios.get(scenario_type)
    }

    pub fn require(&self, scenario_type: &str) -> SimResult<&ScenarioDefinition> {
        self.get(scenario_type)
            .ok_or_else(|| SimError::validation("scenarioType", format!("unknown scenario '{scenario_type}'")))
    }

    pub fn list(&self) -> impl Iterator<Item = &ScenarioDefinition> {
        self.scenarios.values()
    }
}

fn label(label: &str, description: &str, fallback_score: i32) -> IntentLabel {
    IntentLabel {
        label: label.to_string(),
        description: description.to_string(),
        fallback_score: Some(fallback_score),
    }
}

fn boundary_labels() -> Vec<IntentLabel> {
    vec![
        label("Engaged", "willing to hear the caller out or agree", 8),
        label("Reluctant", "polite but postpones or hedges", 4),
        label("Deflecting", "changes the subject or redirects elsewhere", 3),
        label("Refusing", "clearly declines and ends the conversation", 1),
    ]
}

fn boundary_call() -> ScenarioDefinition {
    ScenarioDefinition {
        scenario_type: "boundary_call".to_string(),
        title: "The Persistent Caller".to_string(),
        premise: "You are in the middle of a busy afternoon when a cheerful fundraiser \
                  calls and asks for a few minutes of your time and a monthly pledge."
            .to_string(),
        required_traits: vec![
            "receptiveness".to_string(),
            "compliance".to_string(),
            "candor".to_string(),
            "warmth".to_string(),
        ],
        resolution_guidance: "Low scores describe firm boundary-setting, high scores describe \
                              openness to the caller's requests."
            .to_string(),
        turns: vec![
            TurnPlan::Classified(ClassifiedTurn {
                situation: "The caller introduces the cause and asks if you have a moment.".to_string(),
                labels: boundary_labels(),
                trait_name: Some("receptiveness".to_string()),
            }),
            TurnPlan::Classified(ClassifiedTurn {
                situation: "The caller presses on and asks for a small monthly pledge.".to_string(),
                labels: boundary_labels(),
                trait_name: Some("compliance".to_string()),
            }),
            TurnPlan::Dialogue(ExchangeSpec {
                exchange_id: "friend_debrief".to_string(),
                counterpart: "Sam, your roommate".to_string(),
                opening_line: "Hey, you look a bit rattled. Who was that on the phone?".to_string(),
                trait_name: "candor".to_string(),
                context: "Sam overheard part of the call and is curious how you really feel about it."
                    .to_string(),
                max_user_turns: Some(3),
            }),
            TurnPlan::Classified(ClassifiedTurn {
                situation: "The caller phones back the next day for a final answer.".to_string(),
                labels: boundary_labels(),
                trait_name: Some("warmth".to_string()),
            }),
        ],
    }
}

fn negotiation() -> ScenarioDefinition {
    ScenarioDefinition {
        scenario_type: "negotiation".to_string(),
        title: "The Counteroffer".to_string(),
        premise: "You have received a job offer below your expectations and the hiring \
                  manager wants to settle terms today."
            .to_string(),
        required_traits: vec![
            "flexibility".to_string(),
            "cooperation".to_string(),
            "risk_tolerance".to_string(),
            "self_advocacy".to_string(),
        ],
        resolution_guidance: "Low scores describe guarded, self-protective negotiation, high \
                              scores describe accommodating, trust-first negotiation."
            .to_string(),
        turns: vec![
            TurnPlan::Classified(ClassifiedTurn {
                situation: "The hiring manager presents the offer and waits for your reaction.".to_string(),
                labels: vec![
                    label("Accommodating", "accepts or nearly accepts as offered", 8),
                    label("Probing", "asks questions to understand flexibility", 6),
                    label("Anchoring", "names a firm higher number", 4),
                    label("Withdrawing", "signals willingness to walk away", 2),
                ],
                trait_name: Some("flexibility".to_string()),
            }),
            TurnPlan::Dialogue(ExchangeSpec {
                exchange_id: "counterpart".to_string(),
                counterpart: "Jordan, the hiring manager".to_string(),
                opening_line: "I want to make this work. Tell me what matters most to you.".to_string(),
                trait_name: "cooperation".to_string(),
                context: "Jordan has a little room on salary and more room on start date and remote days."
                    .to_string(),
                max_user_turns: Some(4),
            }),
            TurnPlan::Choice(ChoiceTurn {
                situation: "Jordan makes a final offer.".to_string(),
                options: vec![
                    ChoiceOption {
                        id: "accept".to_string(),
                        summary: "Accept the final offer".to_string(),
                        score: Some(8),
                    },
                    ChoiceOption {
                        id: "counter".to_string(),
                        summary: "Counter one last time".to_string(),
                        score: Some(5),
                    },
                    ChoiceOption {
                        id: "decline".to_string(),
                        summary: "Decline and keep looking".to_string(),
                        score: Some(2),
                    },
                ],
                trait_name: Some("risk_tolerance".to_string()),
            }),
            TurnPlan::Classified(ClassifiedTurn {
                situation: "A friend asks how you feel about the way it went.".to_string(),
                labels: vec![
                    label("Satisfied", "content with the outcome", 7),
                    label("Ambivalent", "mixed feelings", 5),
                    label("Regretful", "wishes they had pushed harder", 3),
                ],
                trait_name: Some("self_advocacy".to_string()),
            }),
        ],
    }
}
