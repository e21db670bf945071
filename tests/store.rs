// tests/store.rs
use persona_sim::session_store::{SessionStore, SledSessionStore};
use persona_sim::simulation::{SimulationState, UserChoice};
use persona_sim::sub_dialogue::{DialogueTranscript, Sender};

#[test]
fn sled_store_round_trips_full_state() {
    let temp_dir = tempfile::tempdir().expect("temp dir should be created");
    let mut state = SimulationState::new("negotiation", "An offer arrives.");
    state.current_turn = 3;
    state.user_actions.push("Asked about remote days.".to_string());
    state.user_choices.push(UserChoice {
        turn: 3,
        choice_id: "counter".to_string(),
    });
    let mut transcript = DialogueTranscript::seeded("Tell me what matters.");
    transcript.push(Sender::Initiator, "Flexibility.");
    state.active_dialogue = Some(transcript);

    let store = SledSessionStore::open(temp_dir.path()).expect("store should open");
    store.save(&state).unwrap();
    store.flush().unwrap();

    let loaded = store.load(&state.simulation_id).unwrap().expect("state persisted");
    assert_eq!(loaded, state);
    assert_eq!(store.list_ids().unwrap(), vec![state.simulation_id.clone()]);
}

#[test]
fn save_replaces_and_delete_removes() {
    let temp_dir = tempfile::tempdir().expect("temp dir should be created");
    let store = SledSessionStore::open(temp_dir.path()).unwrap();
    let mut state = SimulationState::new("boundary_call", "Ring.");
    store.save(&state).unwrap();

    state.current_turn = 2;
    store.save(&state).unwrap();
    assert_eq!(store.require(&state.simulation_id).unwrap().current_turn, 2);

    assert!(store.delete(&state.simulation_id).unwrap());
    assert!(!store.delete(&state.simulation_id).unwrap());
    assert!(store.load(&state.simulation_id).unwrap().is_none());
}
