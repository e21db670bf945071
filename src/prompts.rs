//! Prompt construction.
//!
//! The engine treats prompts as opaque strings. `PromptComposer` is the seam
//! where scenario copy plugs in; `TemplatePrompts` is the default set and
//! fixes the JSON shapes the engine reads back.

use crate::scenario::{ClassifiedTurn, ExchangeSpec, ScenarioDefinition, TurnPlan};
use crate::sub_dialogue::{DialogueTranscript, Sender};
use crate::trait_scores::{TraitRecord, TraitScale};

/// Data a turn prompt is built from.
pub struct TurnContext<'a> {
    pub scenario: &'a ScenarioDefinition,
    pub turn: u32,
    pub story_window: &'a str,
    pub user_actions: &'a [String],
    pub scale: TraitScale,
}

pub trait PromptComposer: Send + Sync {
    fn classification_prompt(&self, ctx: &TurnContext<'_>, turn: &ClassifiedTurn, user_input: &str) -> String;

    fn narration_prompt(
        &self,
        ctx: &TurnContext<'_>,
        classification: &str,
        action_summary: &str,
        next: Option<&TurnPlan>,
    ) -> String;

    fn conclusion_prompt(&self, ctx: &TurnContext<'_>, classification: &str, action_summary: &str) -> String;

    fn exchange_prompt(
        &self,
        exchange: &ExchangeSpec,
        transcript: &DialogueTranscript,
        must_conclude: bool,
        scale: TraitScale,
        delimiter: &str,
    ) -> String;

    fn resolution_prompt(
        &self,
        scenario: &ScenarioDefinition,
        record: &TraitRecord,
        scale: TraitScale,
        story_window: &str,
    ) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TemplatePrompts;

fn situation_of(plan: &TurnPlan) -> String {
    match plan {
        TurnPlan::Classified(c) => c.situation.clone(),
        TurnPlan::Choice(c) => {
            let options: Vec<String> = c.options.iter().map(|o| format!("- {}", o.summary)).collect();
            format!("{}\nThe user will choose between:\n{}", c.situation, options.join("\n"))
        }
        TurnPlan::Dialogue(d) => format!(
            "{} starts a conversation with the user. {}",
            d.counterpart, d.context
        ),
    }
}

fn actions_block(actions: &[String]) -> String {
    if actions.is_empty() {
        return "(none yet)".to_string();
    }
    actions
        .iter()
        .enumerate()
        .map(|(i, a)| format!("{}. {}", i + 1, a))
        .collect::<Vec<_>>()
        .join("\n")
}

impl PromptComposer for TemplatePrompts {
    fn classification_prompt(&self, ctx: &TurnContext<'_>, turn: &ClassifiedTurn, user_input: &str) -> String {
        let labels: Vec<String> = turn
            .labels
            .iter()
            .map(|l| format!("- {}: {}", l.label, l.description))
            .collect();
        let score_line = match &turn.trait_name {
            Some(name) => format!(
                "\n- \"traitScore\": integer {}-{} rating the user's {} in this answer",
                ctx.scale.min, ctx.scale.max, name
            ),
            None => String::new(),
        };
        format!(
            "Scenario: {title}\n{premise}\n\nStory so far:\n{story}\n\nCurrent situation (turn {turn}): {situation}\n\n\
             The user responded:\n\"{input}\"\n\n\
             Classify the response into exactly one of these labels:\n{labels}\n\n\
             Return ONLY a JSON object with:\n\
             - \"classification\": one label from the list\n\
             - \"actionSummary\": one sentence describing what the user did{score_line}",
            title = ctx.scenario.title,
            premise = ctx.scenario.premise,
            story = ctx.story_window,
            turn = ctx.turn,
            situation = turn.situation,
            input = user_input,
            labels = labels.join("\n"),
        )
    }

    fn narration_prompt(
        &self,
        ctx: &TurnContext<'_>,
        classification: &str,
        action_summary: &str,
        next: Option<&TurnPlan>,
    ) -> String {
        let next_beat = next
            .map(situation_of)
            .unwrap_or_else(|| "Move the story toward its close.".to_string());
        format!(
            "Scenario: {title}\n\nStory so far:\n{story}\n\nWhat the user has done:\n{actions}\n\n\
             The user's latest response was classified as \"{classification}\": {summary}\n\n\
             Write the next scene (2-4 short paragraphs) showing the consequences and leading into:\n{next}\n\n\
             Return ONLY a JSON object: {{\"nextSceneText\": \"...\"}}",
            title = ctx.scenario.title,
            story = ctx.story_window,
            actions = actions_block(ctx.user_actions),
            summary = action_summary,
            next = next_beat,
        )
    }

    fn conclusion_prompt(&self, ctx: &TurnContext<'_>, classification: &str, action_summary: &str) -> String {
        format!(
            "Scenario: {title}\n\nStory so far:\n{story}\n\nEverything the user did:\n{actions}\n\n\
             The final response was classified as \"{classification}\": {summary}\n\n\
             Write the closing scene of the story (3-5 paragraphs). Do not ask the user anything further.\n\n\
             Return ONLY a JSON object: {{\"closingText\": \"...\"}}",
            title = ctx.scenario.title,
            story = ctx.story_window,
            actions = actions_block(ctx.user_actions),
            summary = action_summary,
        )
    }

    fn exchange_prompt(
        &self,
        exchange: &ExchangeSpec,
        transcript: &DialogueTranscript,
        must_conclude: bool,
        scale: TraitScale,
        delimiter: &str,
    ) -> String {
        let history: Vec<String> = transcript
            .turns
            .iter()
            .map(|t| match t.sender {
                Sender::Respondent => format!("{}: {}", exchange.counterpart, t.text),
                Sender::Initiator => format!("User: {}", t.text),
            })
            .collect();
        let ending = if must_conclude {
            "This is the last exchange: wrap up the conversation naturally and set \"status\" to \"complete\"."
        } else {
            "Set \"status\" to \"complete\" only when the conversation has reached a natural end, otherwise \"continue\"."
        };
        format!(
            "You are {who}. {context}\n\nConversation so far:\n{history}\n\n\
             Reply in character with one short message. To send two separate messages, join them with \"{delimiter}\".\n\
             {ending}\n\n\
             Return ONLY a JSON object with:\n\
             - \"status\": \"continue\" or \"complete\"\n\
             - \"message\": your reply\n\
             - when complete, \"traitScore\": integer {min}-{max} rating the user's {trait_name}, and \"reasoning\": one sentence",
            who = exchange.counterpart,
            context = exchange.context,
            history = history.join("\n"),
            min = scale.min,
            max = scale.max,
            trait_name = exchange.trait_name,
        )
    }

    fn resolution_prompt(
        &self,
        scenario: &ScenarioDefinition,
        record: &TraitRecord,
        scale: TraitScale,
        story_window: &str,
    ) -> String {
        let scores: Vec<String> = record.iter().map(|(k, v)| format!("- {k}: {v}")).collect();
        format!(
            "Scenario: {title}\n{guidance}\n\nFinal story:\n{story}\n\nTrait scores ({min}-{max}):\n{scores}\n\n\
             Choose the single archetype id from {min} (lowest) to {max} (highest) that best fits this profile.\n\
             Return ONLY a JSON object: {{\"archetypeId\": <integer>, \"rationale\": \"one or two sentences\"}}",
            title = scenario.title,
            guidance = scenario.resolution_guidance,
            story = story_window,
            min = scale.min,
            max = scale.max,
            scores = scores.join("\n"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::ScenarioCatalog;

    #[test]
    fn classification_prompt_lists_labels_and_input() {
        let catalog = ScenarioCatalog::with_builtins();
        let scenario = catalog.get("boundary_call").unwrap();
        let TurnPlan::Classified(turn) = scenario.plan_for(1).unwrap() else {
            panic!("turn 1 should be classified");
        };
        let ctx = TurnContext {
            scenario,
            turn: 1,
            story_window: "The phone rings.",
            user_actions: &[],
            scale: TraitScale::default(),
        };
        let prompt = TemplatePrompts.classification_prompt(&ctx, turn, "I'll call you back in five");
        assert!(prompt.contains("Reluctant"));
        assert!(prompt.contains("I'll call you back in five"));
        assert!(prompt.contains("traitScore"));
    }

    #[test]
    fn exchange_prompt_renders_history_in_order() {
        let catalog = ScenarioCatalog::with_builtins();
        let spec = catalog.get("boundary_call").unwrap().exchange("friend_debrief").unwrap();
        let mut transcript = DialogueTranscript::seeded(&spec.opening_line);
        transcript.push(Sender::Initiator, "Just a fundraiser.");
        let prompt = TemplatePrompts.exchange_prompt(spec, &transcript, true, TraitScale::default(), "||");
        let opening = prompt.find("Sam, your roommate: Hey").unwrap();
        let reply = prompt.find("User: Just a fundraiser.").unwrap();
        assert!(opening < reply);
        assert!(prompt.contains("last exchange"));
    }
}
