use std::sync::Arc;

use crate::config_loader::{ResolutionMode, SimConfig};
use crate::errors::SimError;
use crate::generation::ScriptedGenerator;
use crate::simulation::{SimulationState, TurnInput, UserChoice};
use crate::sub_dialogue::DialogueStatus;
use crate::tests::test_utils::*;
use crate::trait_scores::TraitRecord;
use crate::turn_sequencer::UNKNOWN_LABEL;

fn state_at(scenario_type: &str, turn: u32) -> SimulationState {
    let mut state = SimulationState::new(scenario_type, "The phone rings.");
    state.current_turn = turn;
    state
}

fn text(s: &str) -> TurnInput {
    TurnInput::FreeText(s.to_string())
}

#[tokio::test]
async fn classified_turn_records_score_and_advances() {
    let generator = Arc::new(ScriptedGenerator::new([
        classification("Reluctant", 4),
        narration("The caller sighs and tries again."),
    ]));
    let sequencer = sequencer_with(generator.clone());
    let catalog = catalog();
    let scenario = catalog.get("boundary_call").unwrap();
    let state = sequencer.start(scenario);

    let outcome = sequencer
        .advance(scenario, &state, text("I'll call you back in five"))
        .await
        .unwrap();

    assert_eq!(outcome.classification.as_deref(), Some("Reluctant"));
    assert!(outcome.turn_advanced);
    assert_eq!(outcome.state.current_turn, 2);
    assert_eq!(outcome.state.trait_scores.get("receptiveness"), Some(4));
    assert_eq!(outcome.state.user_actions.len(), 1);
    assert!(outcome.state.story_so_far.ends_with("The caller sighs and tries again."));
    assert_eq!(outcome.next_prompt.as_ref().map(|p| p.turn), Some(2));

    // input state is untouched
    assert_eq!(state.current_turn, 1);
    assert!(state.trait_scores.is_empty());
    assert_eq!(generator.remaining().unwrap(), 0);
}

#[tokio::test]
async fn leading_json_fragment_in_prose_is_skipped() {
    let generator = Arc::new(ScriptedGenerator::new([
        concat!(
            r#"Considering {"tone": "hesitant, noncommittal and eager to end the call quickly"} "#,
            r#"I classify this as: {"classification": "Reluctant", "actionSummary": "Stalled.", "traitScore": 3}"#,
        )
        .to_string(),
        narration("The caller waits."),
    ]));
    let sequencer = sequencer_with(generator);
    let catalog = catalog();
    let scenario = catalog.get("boundary_call").unwrap();

    let outcome = sequencer
        .advance(scenario, &state_at("boundary_call", 1), text("Maybe later"))
        .await
        .unwrap();

    assert_eq!(outcome.classification.as_deref(), Some("Reluctant"));
    assert_eq!(outcome.state.trait_scores.get("receptiveness"), Some(3));
}

#[tokio::test]
async fn reply_without_classification_is_retryable() {
    let generator = Arc::new(ScriptedGenerator::new([
        r#"{"actionSummary": "Hung up.", "traitScore": 2}"#.to_string(),
    ]));
    let sequencer = sequencer_with(generator);
    let catalog = catalog();
    let scenario = catalog.get("boundary_call").unwrap();
    let state = state_at("boundary_call", 1);

    let err = sequencer
        .advance(scenario, &state, text("Bye"))
        .await
        .unwrap_err();

    assert!(err.is_retryable());
    assert!(state.trait_scores.is_empty());
}

#[tokio::test]
async fn unknown_label_degrades_without_score() {
    let generator = Arc::new(ScriptedGenerator::new([
        r#"{"classification": "Bewildered", "actionSummary": "Stared at the phone."}"#.to_string(),
        narration("Silence on the line."),
    ]));
    let sequencer = sequencer_with(generator);
    let catalog = catalog();
    let scenario = catalog.get("boundary_call").unwrap();

    let outcome = sequencer
        .advance(scenario, &state_at("boundary_call", 1), text("..."))
        .await
        .unwrap();

    assert_eq!(outcome.classification.as_deref(), Some(UNKNOWN_LABEL));
    assert_eq!(outcome.action_summary.as_deref(), Some("Stared at the phone."));
    assert!(outcome.state.trait_scores.is_empty());
    assert_eq!(outcome.state.current_turn, 2);
}

#[tokio::test]
async fn label_fallback_score_applies_when_model_omits_one() {
    let generator = Arc::new(ScriptedGenerator::new([
        "Sure! ```json\n{\"classification\": \"engaged\"}\n```".to_string(),
        narration("The caller brightens."),
    ]));
    let sequencer = sequencer_with(generator);
    let catalog = catalog();
    let scenario = catalog.get("boundary_call").unwrap();

    let outcome = sequencer
        .advance(scenario, &state_at("boundary_call", 1), text("Go ahead, I'm listening"))
        .await
        .unwrap();

    assert_eq!(outcome.classification.as_deref(), Some("Engaged"));
    assert_eq!(outcome.state.trait_scores.get("receptiveness"), Some(8));
    assert_eq!(
        outcome.action_summary.as_deref(),
        Some("Responded: \"Go ahead, I'm listening\"")
    );
}

#[tokio::test]
async fn unparseable_classification_is_retryable() {
    let generator = Arc::new(ScriptedGenerator::new([
        "I think the user was reluctant, probably a four.",
    ]));
    let sequencer = sequencer_with(generator.clone());
    let catalog = catalog();
    let scenario = catalog.get("boundary_call").unwrap();

    let err = sequencer
        .advance(scenario, &state_at("boundary_call", 1), text("Not now"))
        .await
        .unwrap_err();

    assert!(matches!(err, SimError::Parse { .. }));
    assert!(err.is_retryable());
    assert_eq!(generator.remaining().unwrap(), 0);
}

#[tokio::test]
async fn narration_failure_leaves_nothing_applied() {
    let generator = Arc::new(ScriptedGenerator::new([classification("Refusing", 1)]));
    generator.push_failure("timeout").unwrap();
    let sequencer = sequencer_with(generator);
    let catalog = catalog();
    let scenario = catalog.get("boundary_call").unwrap();
    let state = state_at("boundary_call", 1);

    let err = sequencer.advance(scenario, &state, text("No.")).await.unwrap_err();

    assert!(err.is_retryable());
    assert_eq!(state.current_turn, 1);
    assert!(state.user_actions.is_empty());
}

#[tokio::test]
async fn input_kind_must_match_turn() {
    let generator = Arc::new(ScriptedGenerator::default());
    let sequencer = sequencer_with(generator.clone());
    let catalog = catalog();
    let negotiation = catalog.get("negotiation").unwrap();

    let err = sequencer
        .advance(negotiation, &state_at("negotiation", 3), text("I'll take it"))
        .await
        .unwrap_err();
    assert!(matches!(err, SimError::Validation { ref field, .. } if field == "choiceId"));

    let err = sequencer
        .advance(
            negotiation,
            &state_at("negotiation", 1),
            TurnInput::Choice("accept".to_string()),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SimError::Validation { ref field, .. } if field == "userInput"));
    assert!(generator.prompts().unwrap().is_empty());
}

#[tokio::test]
async fn choice_turn_records_option_score() {
    let generator = Arc::new(ScriptedGenerator::new([narration("Jordan nods slowly.")]));
    let sequencer = sequencer_with(generator);
    let catalog = catalog();
    let scenario = catalog.get("negotiation").unwrap();

    let outcome = sequencer
        .advance(
            scenario,
            &state_at("negotiation", 3),
            TurnInput::Choice("counter".to_string()),
        )
        .await
        .unwrap();

    assert_eq!(outcome.state.trait_scores.get("risk_tolerance"), Some(5));
    assert_eq!(
        outcome.state.user_choices,
        vec![UserChoice {
            turn: 3,
            choice_id: "counter".to_string()
        }]
    );
    assert_eq!(outcome.action_summary.as_deref(), Some("Counter one last time"));
    assert_eq!(outcome.state.current_turn, 4);
}

#[tokio::test]
async fn unknown_choice_is_rejected_before_any_call() {
    let generator = Arc::new(ScriptedGenerator::default());
    let sequencer = sequencer_with(generator.clone());
    let catalog = catalog();
    let scenario = catalog.get("negotiation").unwrap();

    let err = sequencer
        .advance(
            scenario,
            &state_at("negotiation", 3),
            TurnInput::Choice("walk_out".to_string()),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, SimError::Validation { .. }));
    assert!(generator.prompts().unwrap().is_empty());
}

#[tokio::test]
async fn dialogue_turn_holds_until_exchange_completes() {
    let generator = Arc::new(ScriptedGenerator::new([
        reply("continue", "Oh really? What did they want?"),
        final_reply("Good for you.||Want some tea?", 6, "Was open about the call"),
        narration("The next day the phone rings again."),
    ]));
    let sequencer = sequencer_with(generator);
    let catalog = catalog();
    let scenario = catalog.get("boundary_call").unwrap();
    let state = state_at("boundary_call", 3);

    let first = sequencer
        .advance(scenario, &state, text("Just a fundraiser."))
        .await
        .unwrap();
    assert!(!first.turn_advanced);
    assert_eq!(first.dialogue_status, Some(DialogueStatus::Continue));
    assert_eq!(first.state.current_turn, 3);
    assert_eq!(first.respondent_messages, vec!["Oh really? What did they want?"]);
    let transcript = first.state.active_dialogue.as_ref().unwrap();
    assert_eq!(transcript.turns.len(), 3);

    let second = sequencer
        .advance(scenario, &first.state, text("Money, I said I'd think about it."))
        .await
        .unwrap();
    assert!(second.turn_advanced);
    assert_eq!(second.dialogue_status, Some(DialogueStatus::Complete));
    assert_eq!(second.respondent_messages, vec!["Good for you.", "Want some tea?"]);
    assert_eq!(second.state.trait_scores.get("candor"), Some(6));
    assert!(second.state.active_dialogue.is_none());
    assert_eq!(second.state.current_turn, 4);
    assert_eq!(second.exchange.as_ref().map(|e| e.fallback), Some(false));
}

#[tokio::test]
async fn final_turn_resolves_and_locks_the_run() {
    let generator = Arc::new(ScriptedGenerator::new([
        classification("Reluctant", 4),
        closing("You hang up and get on with your afternoon."),
    ]));
    let sequencer = sequencer_with(generator);
    let catalog = catalog();
    let scenario = catalog.get("boundary_call").unwrap();
    let mut state = state_at("boundary_call", 4);
    state.trait_scores = [("receptiveness", 4), ("compliance", 4), ("candor", 4)]
        .into_iter()
        .collect::<TraitRecord>();

    let outcome = sequencer
        .advance(scenario, &state, text("I'll call you back in five"))
        .await
        .unwrap();

    let archetype = outcome.archetype.clone().unwrap();
    assert_eq!(archetype.archetype_id, 4);
    assert_eq!(archetype.archetype_name, "The Deflector");
    assert_eq!(outcome.state.current_turn, 4);
    assert!(outcome.state.is_complete());
    assert!(outcome.next_prompt.is_none());
    assert!(outcome.state.story_so_far.ends_with("get on with your afternoon."));

    let err = sequencer
        .advance(scenario, &outcome.state, text("hello?"))
        .await
        .unwrap_err();
    assert!(matches!(err, SimError::SimulationComplete { .. }));
}

#[tokio::test]
async fn missing_traits_default_before_resolution() {
    let generator = Arc::new(ScriptedGenerator::new([
        classification("Engaged", 9),
        closing("The end."),
    ]));
    let sequencer = sequencer_with(generator);
    let catalog = catalog();
    let scenario = catalog.get("boundary_call").unwrap();

    let outcome = sequencer
        .advance(scenario, &state_at("boundary_call", 4), text("Sure, sign me up"))
        .await
        .unwrap();

    // warmth 9 plus three defaults of 5: mean 6
    assert_eq!(outcome.archetype.unwrap().archetype_id, 6);
    assert_eq!(outcome.state.trait_scores.len(), 1);
}

#[tokio::test]
async fn terminal_failure_is_not_retryable_and_stores_nothing() {
    let generator = Arc::new(ScriptedGenerator::new([classification("Reluctant", 4)]));
    generator.push_failure("upstream 503").unwrap();
    let sequencer = sequencer_with(generator);
    let catalog = catalog();
    let scenario = catalog.get("boundary_call").unwrap();
    let state = state_at("boundary_call", 4);

    let err = sequencer.advance(scenario, &state, text("Later")).await.unwrap_err();

    assert!(matches!(err, SimError::TerminalFailure { .. }));
    assert!(!err.is_retryable());
    assert!(state.archetype_result.is_none());
}

#[tokio::test]
async fn model_resolution_is_validated() {
    let mut config = SimConfig::default();
    config.engine.resolution_mode = ResolutionMode::Model;
    let catalog = catalog();
    let scenario = catalog.get("boundary_call").unwrap();

    let generator = Arc::new(ScriptedGenerator::new([
        classification("Engaged", 8),
        closing("The end."),
        r#"{"archetypeId": 7, "rationale": "Warm and open throughout."}"#.to_string(),
    ]));
    let sequencer = sequencer_with_config(&config, generator);
    let outcome = sequencer
        .advance(scenario, &state_at("boundary_call", 4), text("Happy to help"))
        .await
        .unwrap();
    let archetype = outcome.archetype.unwrap();
    assert_eq!(archetype.archetype_id, 7);
    assert_eq!(archetype.rationale, "Warm and open throughout.");

    let generator = Arc::new(ScriptedGenerator::new([
        classification("Engaged", 8),
        closing("The end."),
        r#"{"archetypeId": 12}"#.to_string(),
    ]));
    let sequencer = sequencer_with_config(&config, generator);
    let err = sequencer
        .advance(scenario, &state_at("boundary_call", 4), text("Happy to help"))
        .await
        .unwrap_err();
    assert!(matches!(err, SimError::TerminalFailure { .. }));
}

#[tokio::test]
async fn prompts_see_only_the_story_tail() {
    let mut config = SimConfig::default();
    config.engine.story_window_chars = 10;
    let generator = Arc::new(ScriptedGenerator::new([
        classification("Reluctant", 4),
        narration("Next."),
    ]));
    let sequencer = sequencer_with_config(&config, generator.clone());
    let catalog = catalog();
    let scenario = catalog.get("boundary_call").unwrap();
    let mut state = state_at("boundary_call", 1);
    state.story_so_far = format!("{}0123456789", "A".repeat(50));

    let outcome = sequencer.advance(scenario, &state, text("Later")).await.unwrap();

    let prompts = generator.prompts().unwrap();
    assert!(prompts[0].contains("Story so far:\n0123456789\n"));
    assert!(!prompts[0].contains("A0123456789"));
    // full story is still kept in state
    assert!(outcome.state.story_so_far.starts_with("AAAA"));
}

#[test]
fn default_resolver_covers_standard_scale() {
    let r = resolver();
    assert_eq!(r.scale().min, 1);
    assert_eq!(r.scale().max, 9);
}
