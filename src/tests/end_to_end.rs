use std::sync::Arc;

use crate::generation::ScriptedGenerator;
use crate::session_store::{MemorySessionStore, SessionStore};
use crate::simulation::TurnInput;
use crate::tests::test_utils::*;

const ANSWER: &str = "I'll call you back in five";

/// Full boundary_call run where every answer is a polite brush-off,
/// persisted between turns the way the HTTP layer does it.
#[tokio::test]
async fn reluctant_caller_resolves_mid_low() {
    let generator = Arc::new(ScriptedGenerator::new([
        // turn 1
        classification("Reluctant", 4),
        narration("The caller presses for a pledge."),
        // turn 2
        classification("Reluctant", 4),
        narration("You hang up. Sam looks over."),
        // turn 3: three exchange steps, ceiling is 3
        reply("continue", "Call them back? Really?"),
        reply("continue", "You always say that."),
        final_reply("Fine, your call.", 4, "Kept it vague"),
        narration("The next afternoon the phone rings again."),
        // turn 4
        classification("Reluctant", 4),
        closing("You let it ring out."),
    ]));
    let sequencer = sequencer_with(generator.clone());
    let store = MemorySessionStore::new();
    let catalog = catalog();
    let scenario = catalog.get("boundary_call").unwrap();

    let state = sequencer.start(scenario);
    let id = state.simulation_id.clone();
    store.save(&state).unwrap();

    let mut exchange_steps = 0;
    loop {
        let current = store.require(&id).unwrap();
        if current.is_complete() {
            break;
        }
        let outcome = sequencer
            .advance(scenario, &current, TurnInput::FreeText(ANSWER.to_string()))
            .await
            .unwrap();
        if current.current_turn == 3 {
            exchange_steps += 1;
        }
        store.save(&outcome.state).unwrap();
    }

    let finished = store.require(&id).unwrap();
    let archetype = finished.archetype_result.clone().unwrap();
    assert_eq!(archetype.archetype_id, 4);
    assert_eq!(archetype.archetype_name, "The Deflector");
    assert_eq!(exchange_steps, 3);
    assert_eq!(finished.current_turn, 4);
    assert_eq!(finished.user_actions.len(), 4);
    assert!(finished.trait_scores.values().all(|v| v == 4));
    assert_eq!(finished.trait_scores.len(), 4);
    assert_eq!(generator.remaining().unwrap(), 0);
}

/// Same responses wrapped in prose and fences resolve identically.
#[tokio::test]
async fn wrapped_completions_resolve_the_same() {
    let wrap = |s: String| format!("Here is my answer:\n```json\n{s}\n```\nHope that helps!");
    let generator = Arc::new(ScriptedGenerator::new([
        wrap(classification("Reluctant", 4)),
        closing("Done."),
    ]));
    let sequencer = sequencer_with(generator);
    let catalog = catalog();
    let scenario = catalog.get("boundary_call").unwrap();
    let mut state = sequencer.start(scenario);
    state.current_turn = 4;
    state.trait_scores = [("receptiveness", 4), ("compliance", 4), ("candor", 4)]
        .into_iter()
        .collect();

    let outcome = sequencer
        .advance(scenario, &state, TurnInput::FreeText(ANSWER.to_string()))
        .await
        .unwrap();

    assert_eq!(outcome.archetype.unwrap().archetype_id, 4);
}
