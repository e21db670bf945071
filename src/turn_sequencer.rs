//! Turn sequencing.
//!
//! Drives one simulation through its scenario's ordered turn plan. Each call
//! to [`TurnSequencer::advance`] consumes one user input and returns a new
//! state; the input state is never modified, so a failed call can simply be
//! retried. Turns below the final one end in a narration round trip and an
//! increment of `current_turn`. The final turn ends in a conclusion round
//! trip and archetype resolution instead, after which the run is read-only.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::archetype::{ArchetypeResolver, ArchetypeResult};
use crate::audit::{TurnAction, TurnAuditEvent};
use crate::config_loader::{ResolutionMode, SimConfig};
use crate::errors::{SimError, SimResult};
use crate::generation::TextGenerator;
use crate::prompts::{PromptComposer, TurnContext};
use crate::response_interpreter::{self, loose_integer};
use crate::scenario::{ChoiceOption, ChoiceTurn, ClassifiedTurn, ScenarioDefinition, TurnPlan};
use crate::simulation::{SimulationState, TurnInput, UserChoice};
use crate::sub_dialogue::{
    DialogueSettings, DialogueStatus, DialogueTranscript, ExchangeOutcome, SubDialogueEngine,
};
use crate::trait_scores::{ScoreAggregator, TraitRecord};

/// Label used when the model's classification matches no known label.
pub const UNKNOWN_LABEL: &str = "Unknown";

#[derive(Debug, Clone)]
pub struct SequencerSettings {
    pub story_window_chars: usize,
    pub turn_max_tokens: u32,
    pub conclusion_max_tokens: u32,
    pub default_trait_score: i32,
    pub resolution_mode: ResolutionMode,
}

impl Default for SequencerSettings {
    fn default() -> Self {
        Self {
            story_window_chars: 4000,
            turn_max_tokens: 400,
            conclusion_max_tokens: 900,
            default_trait_score: 5,
            resolution_mode: ResolutionMode::Local,
        }
    }
}

impl SequencerSettings {
    pub fn from_config(config: &SimConfig) -> Self {
        Self {
            story_window_chars: config.engine.story_window_chars,
            turn_max_tokens: config.backend.turn_max_tokens,
            conclusion_max_tokens: config.backend.conclusion_max_tokens,
            default_trait_score: config.engine.default_trait_score,
            resolution_mode: config.engine.resolution_mode,
        }
    }
}

/// What the next turn asks of the user.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnPrompt {
    pub turn: u32,
    pub kind: &'static str,
    pub situation: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<ChoiceOption>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counterpart: Option<String>,
}

impl TurnPrompt {
    pub fn for_turn(scenario: &ScenarioDefinition, turn: u32) -> Option<Self> {
        let plan = scenario.plan_for(turn)?;
        let prompt = match plan {
            TurnPlan::Classified(c) => Self {
                turn,
                kind: plan.kind(),
                situation: c.situation.clone(),
                options: Vec::new(),
                counterpart: None,
            },
            TurnPlan::Choice(c) => Self {
                turn,
                kind: plan.kind(),
                situation: c.situation.clone(),
                options: c.options.clone(),
                counterpart: None,
            },
            TurnPlan::Dialogue(d) => Self {
                turn,
                kind: plan.kind(),
                situation: d.opening_line.clone(),
                options: Vec::new(),
                counterpart: Some(d.counterpart.clone()),
            },
        };
        Some(prompt)
    }
}

/// Result of one `advance` call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnOutcome {
    pub state: SimulationState,
    pub classification: Option<String>,
    pub action_summary: Option<String>,
    /// Next scene, or the closing scene on the final turn.
    pub scene_text: Option<String>,
    pub respondent_messages: Vec<String>,
    pub dialogue_status: Option<DialogueStatus>,
    pub exchange: Option<ExchangeOutcome>,
    /// False while a nested exchange is still running.
    pub turn_advanced: bool,
    pub next_prompt: Option<TurnPrompt>,
    pub archetype: Option<ArchetypeResult>,
}

impl TurnOutcome {
    fn pending(state: SimulationState) -> Self {
        Self {
            state,
            classification: None,
            action_summary: None,
            scene_text: None,
            respondent_messages: Vec::new(),
            dialogue_status: None,
            exchange: None,
            turn_advanced: false,
            next_prompt: None,
            archetype: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClassificationReply {
    #[serde(alias = "label")]
    classification: String,
    #[serde(default)]
    action_summary: Option<String>,
    #[serde(default)]
    trait_score: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NarrationReply {
    #[serde(alias = "nextScene", alias = "text")]
    next_scene_text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConclusionReply {
    #[serde(alias = "conclusion", alias = "text")]
    closing_text: String,
}

/// Everything a finished turn contributes to the state.
struct TurnEffect {
    classification: String,
    action_summary: String,
    score: Option<(String, i64)>,
    choice: Option<String>,
    fallback: bool,
    action: TurnAction,
    respondent_messages: Vec<String>,
    exchange: Option<ExchangeOutcome>,
}

enum Progress {
    /// Nested exchange still running; state carries the new transcript.
    InExchange(TurnOutcome),
    Done(TurnEffect),
}

#[derive(Clone)]
pub struct TurnSequencer {
    generator: Arc<dyn TextGenerator>,
    prompts: Arc<dyn PromptComposer>,
    dialogue: SubDialogueEngine,
    aggregator: ScoreAggregator,
    resolver: ArchetypeResolver,
    settings: SequencerSettings,
}

impl TurnSequencer {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        prompts: Arc<dyn PromptComposer>,
        dialogue_settings: DialogueSettings,
        resolver: ArchetypeResolver,
        settings: SequencerSettings,
    ) -> Self {
        let dialogue = SubDialogueEngine::new(generator.clone(), prompts.clone(), dialogue_settings);
        Self {
            generator,
            prompts,
            dialogue,
            aggregator: ScoreAggregator::new(resolver.scale()),
            resolver,
            settings,
        }
    }

    pub fn from_config(
        config: &SimConfig,
        generator: Arc<dyn TextGenerator>,
        prompts: Arc<dyn PromptComposer>,
    ) -> SimResult<Self> {
        let dialogue_settings = DialogueSettings {
            max_user_turns: config.engine.dialogue_max_user_turns,
            delimiter: config.engine.message_delimiter.clone(),
            max_output_tokens: config.backend.dialogue_max_tokens,
            scale: config.trait_scale(),
        };
        Ok(Self::new(
            generator,
            prompts,
            dialogue_settings,
            config.archetype_resolver()?,
            SequencerSettings::from_config(config),
        ))
    }

    pub fn dialogue(&self) -> &SubDialogueEngine {
        &self.dialogue
    }

    pub fn resolver(&self) -> &ArchetypeResolver {
        &self.resolver
    }

    /// Fresh state at turn 1 with the premise and opening situation as story.
    pub fn start(&self, scenario: &ScenarioDefinition) -> SimulationState {
        let opening = match TurnPrompt::for_turn(scenario, 1) {
            Some(TurnPrompt {
                counterpart: Some(who),
                situation,
                ..
            }) => format!("{}\n\n{}: \"{}\"", scenario.premise, who, situation),
            Some(prompt) => format!("{}\n\n{}", scenario.premise, prompt.situation),
            None => scenario.premise.clone(),
        };
        let state = SimulationState::new(&scenario.scenario_type, &opening);
        info!(
            "Started simulation {} ({})",
            state.simulation_id, scenario.scenario_type
        );
        state
    }

    /// Process one user input against `state`.
    pub async fn advance(
        &self,
        scenario: &ScenarioDefinition,
        state: &SimulationState,
        input: TurnInput,
    ) -> SimResult<TurnOutcome> {
        if state.is_complete() {
            return Err(SimError::simulation_complete(&state.simulation_id));
        }
        if state.scenario_type != scenario.scenario_type {
            return Err(SimError::validation(
                "scenarioType",
                format!(
                    "simulation is '{}', not '{}'",
                    state.scenario_type, scenario.scenario_type
                ),
            ));
        }
        let final_turn = scenario.final_turn();
        let plan = scenario
            .plan_for(state.current_turn)
            .filter(|_| state.current_turn <= final_turn)
            .ok_or_else(|| {
                SimError::validation(
                    "currentTurn",
                    format!("turn {} is outside 1..={}", state.current_turn, final_turn),
                )
            })?;

        let mut next = state.clone();
        let effect = match self.process(scenario, &mut next, plan, &input).await? {
            Progress::InExchange(outcome) => return Ok(outcome),
            Progress::Done(effect) => effect,
        };

        let turn = next.current_turn;
        next.user_actions.push(effect.action_summary.clone());
        if let Some(choice_id) = &effect.choice {
            next.user_choices.push(UserChoice {
                turn,
                choice_id: choice_id.clone(),
            });
        }
        if let Some((name, value)) = &effect.score {
            next.trait_scores = self.aggregator.record(&next.trait_scores, name, *value);
        }

        let terminal = turn >= final_turn;
        let (scene_text, archetype) = if terminal {
            let (closing, archetype) = self
                .conclude(scenario, &next, &effect)
                .await
                .map_err(|e| into_terminal(&next.simulation_id, e))?;
            (closing, Some(archetype))
        } else {
            (self.narrate(scenario, &next, &effect).await?, None)
        };

        next.append_story(&scene_text);
        match &archetype {
            Some(result) => next.archetype_result = Some(result.clone()),
            None => next.current_turn += 1,
        }
        next.updated_at = Utc::now();

        let mut event = TurnAuditEvent::new(&next.simulation_id, &next.scenario_type, turn, effect.action)
            .with_classification(&effect.classification)
            .with_fallback(effect.fallback);
        if let Some((name, _)) = &effect.score {
            if let Some(recorded) = next.trait_scores.get(name) {
                event = event.with_score(name, recorded);
            }
        }
        event.emit();
        if let Some(result) = &archetype {
            TurnAuditEvent::new(&next.simulation_id, &next.scenario_type, turn, TurnAction::Concluded)
                .with_archetype(result.archetype_id)
                .emit();
        }

        let next_prompt = if terminal {
            None
        } else {
            TurnPrompt::for_turn(scenario, next.current_turn)
        };

        Ok(TurnOutcome {
            state: next,
            classification: Some(effect.classification),
            action_summary: Some(effect.action_summary),
            scene_text: Some(scene_text),
            respondent_messages: effect.respondent_messages,
            dialogue_status: effect.exchange.as_ref().map(|_| DialogueStatus::Complete),
            exchange: effect.exchange,
            turn_advanced: true,
            next_prompt,
            archetype,
        })
    }

    /// Resolve `record` with the configured mode.
    pub async fn resolve(
        &self,
        scenario: &ScenarioDefinition,
        record: &TraitRecord,
        story_window: &str,
    ) -> SimResult<ArchetypeResult> {
        match self.settings.resolution_mode {
            ResolutionMode::Local => self.resolver.resolve(record),
            ResolutionMode::Model => {
                let prompt =
                    self.prompts
                        .resolution_prompt(scenario, record, self.resolver.scale(), story_window);
                self.resolver
                    .resolve_with_model(self.generator.as_ref(), &prompt, self.settings.turn_max_tokens)
                    .await
            }
        }
    }

    async fn process(
        &self,
        scenario: &ScenarioDefinition,
        next: &mut SimulationState,
        plan: &TurnPlan,
        input: &TurnInput,
    ) -> SimResult<Progress> {
        match (plan, input) {
            (TurnPlan::Classified(turn), TurnInput::FreeText(text)) => {
                Ok(Progress::Done(self.classify(scenario, next, turn, text).await?))
            }
            (TurnPlan::Choice(turn), TurnInput::Choice(id)) => Ok(Progress::Done(choose(turn, id)?)),
            (TurnPlan::Dialogue(exchange), TurnInput::FreeText(text)) => {
                let transcript = next
                    .active_dialogue
                    .clone()
                    .unwrap_or_else(|| DialogueTranscript::seeded(&exchange.opening_line));
                let step = self.dialogue.step(&transcript, text, exchange).await?;

                let Some(outcome) = step.outcome else {
                    next.active_dialogue = Some(step.transcript);
                    next.updated_at = Utc::now();
                    TurnAuditEvent::new(
                        &next.simulation_id,
                        &next.scenario_type,
                        next.current_turn,
                        TurnAction::DialogueStep,
                    )
                    .emit();
                    let mut pending = TurnOutcome::pending(next.clone());
                    pending.respondent_messages = step.respondent_messages;
                    pending.dialogue_status = Some(step.status);
                    return Ok(Progress::InExchange(pending));
                };

                next.active_dialogue = None;
                debug!(
                    "Exchange '{}' closed after {} turns",
                    exchange.exchange_id,
                    step.transcript.turns.len()
                );
                Ok(Progress::Done(TurnEffect {
                    classification: "Conversation".to_string(),
                    action_summary: format!(
                        "Talked it through with {}. {}",
                        exchange.counterpart, outcome.rationale
                    ),
                    score: Some((outcome.trait_name.clone(), outcome.score as i64)),
                    choice: None,
                    fallback: outcome.fallback,
                    action: TurnAction::DialogueComplete,
                    respondent_messages: step.respondent_messages,
                    exchange: Some(outcome),
                }))
            }
            (TurnPlan::Choice(_), TurnInput::FreeText(_)) => Err(SimError::validation(
                "choiceId",
                format!("turn {} expects a choiceId", next.current_turn),
            )),
            (_, TurnInput::Choice(_)) => Err(SimError::validation(
                "userInput",
                format!("turn {} expects free text", next.current_turn),
            )),
        }
    }

    fn context<'a>(&self, scenario: &'a ScenarioDefinition, state: &'a SimulationState) -> TurnContext<'a> {
        TurnContext {
            scenario,
            turn: state.current_turn,
            story_window: state.story_window(self.settings.story_window_chars),
            user_actions: &state.user_actions,
            scale: self.resolver.scale(),
        }
    }

    async fn classify(
        &self,
        scenario: &ScenarioDefinition,
        state: &SimulationState,
        turn: &ClassifiedTurn,
        text: &str,
    ) -> SimResult<TurnEffect> {
        let prompt = self
            .prompts
            .classification_prompt(&self.context(scenario, state), turn, text);
        let raw = self.generator.generate(&prompt, self.settings.turn_max_tokens).await?;
        let reply: ClassificationReply =
            response_interpreter::extract_required(&raw, "turn classification")?;

        let wanted = reply.classification.trim();
        let label = turn.labels.iter().find(|l| l.label.eq_ignore_ascii_case(wanted));
        if label.is_none() {
            warn!(
                "Classification {:?} matches no label on turn {}",
                reply.classification, state.current_turn
            );
        }

        let action_summary = reply
            .action_summary
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Responded: \"{}\"", text.chars().take(120).collect::<String>()));

        let model_score = reply.trait_score.as_ref().and_then(loose_integer);
        let (score, fallback) = match (&turn.trait_name, model_score) {
            (Some(name), Some(v)) => (Some((name.clone(), v)), false),
            (Some(name), None) => {
                let fb = label.and_then(|l| l.fallback_score);
                if fb.is_none() {
                    warn!("No score for '{}' on turn {}", name, state.current_turn);
                }
                (fb.map(|v| (name.clone(), v as i64)), true)
            }
            (None, _) => (None, false),
        };

        Ok(TurnEffect {
            classification: label
                .map(|l| l.label.clone())
                .unwrap_or_else(|| UNKNOWN_LABEL.to_string()),
            action_summary,
            score,
            choice: None,
            fallback,
            action: TurnAction::Classified,
            respondent_messages: Vec::new(),
            exchange: None,
        })
    }

    async fn narrate(
        &self,
        scenario: &ScenarioDefinition,
        state: &SimulationState,
        effect: &TurnEffect,
    ) -> SimResult<String> {
        let prompt = self.prompts.narration_prompt(
            &self.context(scenario, state),
            &effect.classification,
            &effect.action_summary,
            scenario.plan_for(state.current_turn + 1),
        );
        let raw = self.generator.generate(&prompt, self.settings.turn_max_tokens).await?;
        let reply: NarrationReply = response_interpreter::extract_required(&raw, "scene narration")?;
        if reply.next_scene_text.trim().is_empty() {
            return Err(SimError::backend("narration", "empty scene text"));
        }
        Ok(reply.next_scene_text)
    }

    async fn conclude(
        &self,
        scenario: &ScenarioDefinition,
        state: &SimulationState,
        effect: &TurnEffect,
    ) -> SimResult<(String, ArchetypeResult)> {
        let ctx = self.context(scenario, state);
        let prompt = self
            .prompts
            .conclusion_prompt(&ctx, &effect.classification, &effect.action_summary);
        let raw = self
            .generator
            .generate(&prompt, self.settings.conclusion_max_tokens)
            .await?;
        let closing = match response_interpreter::extract_as::<ConclusionReply>(&raw) {
            Ok(reply) if !reply.closing_text.trim().is_empty() => reply.closing_text,
            _ => response_interpreter::strip_fences(&raw),
        };
        if closing.trim().is_empty() {
            return Err(SimError::backend("conclusion", "empty closing text"));
        }

        let record = state
            .trait_scores
            .with_defaults(&scenario.required_traits, self.settings.default_trait_score);
        let archetype = self.resolve(scenario, &record, ctx.story_window).await?;
        Ok((closing, archetype))
    }
}

fn choose(turn: &ChoiceTurn, choice_id: &str) -> SimResult<TurnEffect> {
    let option = turn.option(choice_id).ok_or_else(|| {
        SimError::validation("choiceId", format!("'{choice_id}' is not one of the offered options"))
    })?;
    let score = match (&turn.trait_name, option.score) {
        (Some(name), Some(v)) => Some((name.clone(), v as i64)),
        _ => None,
    };
    Ok(TurnEffect {
        classification: option.id.clone(),
        action_summary: option.summary.clone(),
        score,
        choice: Some(option.id.clone()),
        fallback: false,
        action: TurnAction::Chose,
        respondent_messages: Vec::new(),
        exchange: None,
    })
}

/// Failures on the final turn end the request without a partial result.
fn into_terminal(simulation_id: &str, err: SimError) -> SimError {
    match err {
        SimError::TerminalFailure { .. } => err,
        other => {
            error!("Final turn of {} failed: {}", simulation_id, other);
            SimError::terminal(other.to_string())
        }
    }
}
