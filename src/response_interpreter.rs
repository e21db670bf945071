//! Structured-result extraction from model completions.
//!
//! Completions are nominally JSON but routinely arrive wrapped in prose,
//! inside code fences, or with trailing commentary. `extract` walks a fixed
//! ladder of strategies and returns the payload the first successful
//! strategy recovers:
//!
//! 1. the whole text
//! 2. the interior of a ```` ```json ```` fenced block
//! 3. the best balanced `{...}` / `[...]` span (objects first, then longest)
//! 4. the envelope from the first `{`/`[` to the last `}`/`]`, with light
//!    repair (trailing commas, typographic quotes)

use lazy_static::lazy_static;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::errors::{SimError, SimResult};

lazy_static! {
    static ref FENCED_JSON: Regex = Regex::new(r"(?is)```[ \t]*json[ \t]*\r?\n?(.*?)```").unwrap();
    static ref ANY_FENCE: Regex = Regex::new(r"(?s)^\s*```[a-zA-Z]*\s*(.*?)\s*```\s*$").unwrap();
    static ref TRAILING_COMMA: Regex = Regex::new(r",(\s*[}\]])").unwrap();
}

/// Upper bound on candidate start positions tried by the balanced-span scan.
const MAX_SPAN_CANDIDATES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Direct,
    FencedBlock,
    BalancedSpan,
    TrimmedEnvelope,
}

impl Strategy {
    pub const ALL: [Strategy; 4] = [
        Strategy::Direct,
        Strategy::FencedBlock,
        Strategy::BalancedSpan,
        Strategy::TrimmedEnvelope,
    ];
}

#[derive(Debug, Error)]
#[error("no structured payload found in model output ({snippet:?})")]
pub struct ParseError {
    pub snippet: String,
}

impl ParseError {
    fn new(raw: &str) -> Self {
        Self {
            snippet: raw.chars().take(80).collect(),
        }
    }

    /// Promote to an engine error for a critical path.
    pub fn into_sim_error(self, context: &str) -> SimError {
        warn!("Recovery ladder exhausted for {}: {}", context, self);
        SimError::parse(context, Strategy::ALL.len())
    }
}

/// Extract the first structured value the ladder can recover.
pub fn extract(raw: &str) -> Result<Value, ParseError> {
    extract_with_strategy(raw).map(|(value, _)| value)
}

/// Like [`extract`], also reporting which strategy succeeded.
pub fn extract_with_strategy(raw: &str) -> Result<(Value, Strategy), ParseError> {
    run_ladder(raw, Some)
}

/// Extract and deserialize into `T`. A candidate that is valid JSON but does
/// not fit `T` does not stop the ladder.
pub fn extract_as<T: DeserializeOwned>(raw: &str) -> Result<T, ParseError> {
    run_ladder(raw, |value| serde_json::from_value::<T>(value).ok()).map(|(t, _)| t)
}

/// [`extract_as`] for critical paths: failure becomes a retryable `SimError`.
pub fn extract_required<T: DeserializeOwned>(raw: &str, context: &str) -> SimResult<T> {
    extract_as(raw).map_err(|e| e.into_sim_error(context))
}

/// [`extract_as`] for low-stakes paths: failure yields `fallback`.
pub fn extract_or<T: DeserializeOwned>(raw: &str, context: &str, fallback: T) -> T {
    match extract_as(raw) {
        Ok(value) => value,
        Err(e) => {
            warn!("Using fallback for {}: {}", context, e);
            fallback
        }
    }
}

/// Strip one surrounding code fence, if present, leaving plain prose.
pub fn strip_fences(raw: &str) -> String {
    match ANY_FENCE.captures(raw) {
        Some(caps) => caps.get(1).map(|m| m.as_str()).unwrap_or("").trim().to_string(),
        None => raw.trim().to_string(),
    }
}

/// Read a score the model may have sent as a number or a numeric string.
pub fn loose_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f.round() as i64))
        }
        _ => None,
    }
}

fn run_ladder<R>(
    raw: &str,
    mut accept: impl FnMut(Value) -> Option<R>,
) -> Result<(R, Strategy), ParseError> {
    let mut try_parse = |text: &str| -> Option<(R, u8)> {
        let value = serde_json::from_str::<Value>(text.trim()).ok()?;
        let rank = shape_rank(&value);
        accept(value).map(|r| (r, rank))
    };

    if let Some((r, _)) = try_parse(raw) {
        return Ok((r, Strategy::Direct));
    }

    for caps in FENCED_JSON.captures_iter(raw) {
        if let Some(inner) = caps.get(1) {
            if let Some((r, _)) = try_parse(inner.as_str()) {
                debug!("Recovered payload from fenced block");
                return Ok((r, Strategy::FencedBlock));
            }
        }
    }

    // Bracketed prose ("[1]", "{sic}") can parse too, so every span is
    // tried and the best-shaped, longest one wins.
    let mut best: Option<(R, (u8, usize))> = None;
    for span in balanced_spans(raw) {
        if let Some((r, rank)) = try_parse(span) {
            let key = (rank, span.len());
            if best.as_ref().map_or(true, |(_, k)| key > *k) {
                best = Some((r, key));
            }
        }
    }
    if let Some((r, _)) = best {
        debug!("Recovered payload from balanced span");
        return Ok((r, Strategy::BalancedSpan));
    }

    if let Some(envelope) = trimmed_envelope(raw) {
        if let Some((r, _)) = try_parse(envelope) {
            debug!("Recovered payload from trimmed envelope");
            return Ok((r, Strategy::TrimmedEnvelope));
        }
        if let Some((r, _)) = try_parse(&repair(envelope)) {
            debug!("Recovered payload from repaired envelope");
            return Ok((r, Strategy::TrimmedEnvelope));
        }
    }

    Err(ParseError::new(raw))
}

/// Objects outrank arrays, which outrank scalars.
fn shape_rank(value: &Value) -> u8 {
    match value {
        Value::Object(map) if !map.is_empty() => 3,
        Value::Object(_) => 2,
        Value::Array(_) => 1,
        _ => 0,
    }
}

/// Balanced `{...}`/`[...]` spans in order of their opening position.
/// Brackets inside string literals are ignored.
fn balanced_spans(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut spans = Vec::new();

    let starts = bytes
        .iter()
        .enumerate()
        .filter(|(_, b)| **b == b'{' || **b == b'[')
        .map(|(i, _)| i)
        .take(MAX_SPAN_CANDIDATES);

    for start in starts {
        let mut stack: Vec<u8> = Vec::new();
        let mut in_string = false;
        let mut escaped = false;

        for (offset, &b) in bytes[start..].iter().enumerate() {
            if in_string {
                match b {
                    _ if escaped => escaped = false,
                    b'\\' => escaped = true,
                    b'"' => in_string = false,
                    _ => {}
                }
                continue;
            }
            match b {
                b'"' => in_string = true,
                b'{' => stack.push(b'}'),
                b'[' => stack.push(b']'),
                b'}' | b']' => {
                    if stack.pop() != Some(b) {
                        break;
                    }
                    if stack.is_empty() {
                        spans.push(&text[start..=start + offset]);
                        break;
                    }
                }
                _ => {}
            }
        }
    }
    spans
}

fn trimmed_envelope(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let end = text.rfind(['}', ']'])?;
    if end <= start {
        return None;
    }
    Some(&text[start..=end])
}

fn repair(text: &str) -> String {
    let unquoted = text
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");
    TRAILING_COMMA.replace_all(&unquoted, "$1").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    const PAYLOAD: &str = r#"{"classification": "Reluctant", "actionSummary": "Put the caller off", "traitScore": 3}"#;

    fn bare() -> Value {
        serde_json::from_str(PAYLOAD).unwrap()
    }

    #[test]
    fn direct_parse() {
        let (v, s) = extract_with_strategy(PAYLOAD).unwrap();
        assert_eq!(v, bare());
        assert_eq!(s, Strategy::Direct);
    }

    #[test]
    fn wrapped_payloads_match_bare_parse() {
        let wrappings = [
            format!("Sure! Here is the result:\n```json\n{PAYLOAD}\n```\nLet me know if you need more."),
            format!("```JSON\n{PAYLOAD}```"),
            format!("Result: {PAYLOAD} -- I hope this helps, the user seemed hesitant."),
            format!("{PAYLOAD}\n\nNote: the score reflects reluctance {{not certain}}."),
            format!("[analysis] The user deflects. {PAYLOAD}"),
            format!("As noted [1], result: {PAYLOAD}"),
            format!("Considering {{\"tone\": \"hesitant\"}} I classify this as: {PAYLOAD}"),
        ];
        for text in wrappings {
            assert_eq!(extract(&text).unwrap(), bare(), "failed on: {text}");
        }
    }

    #[test]
    fn fenced_block_wins_over_prose_brackets() {
        let text = format!("Some {{braces}} first\n```json\n{PAYLOAD}\n```");
        let (v, s) = extract_with_strategy(&text).unwrap();
        assert_eq!(v, bare());
        assert_eq!(s, Strategy::FencedBlock);
    }

    #[test]
    fn braces_inside_strings_do_not_break_span() {
        let text = r#"Answer: {"message": "a } inside", "status": "continue"} trailing"#;
        let v = extract(text).unwrap();
        assert_eq!(v, json!({"message": "a } inside", "status": "continue"}));
    }

    #[test]
    fn trailing_comma_is_repaired() {
        let text = "Here you go: {\"archetypeId\": 5, \"rationale\": \"balanced\",}";
        let (v, s) = extract_with_strategy(text).unwrap();
        assert_eq!(v, json!({"archetypeId": 5, "rationale": "balanced"}));
        assert_eq!(s, Strategy::TrimmedEnvelope);
    }

    #[test]
    fn nested_object_returns_outer_span() {
        let text = r#"Verdict: {"outer": {"inner": 1}, "ok": true}"#;
        assert_eq!(extract(text).unwrap(), json!({"outer": {"inner": 1}, "ok": true}));
    }

    #[test]
    fn arrays_are_supported() {
        let text = "labels follow: [\"Engaged\", \"Reluctant\"] end";
        assert_eq!(extract(text).unwrap(), json!(["Engaged", "Reluctant"]));
    }

    #[test]
    fn plain_prose_fails() {
        let err = extract("I could not decide, sorry.").unwrap_err();
        assert!(err.snippet.starts_with("I could not"));
    }

    #[test]
    fn typed_extraction_skips_non_matching_candidates() {
        #[derive(Deserialize, Debug, PartialEq)]
        struct Verdict {
            #[serde(rename = "archetypeId")]
            archetype_id: i64,
        }
        let text = r#"Scores were {"a": 1}. Final: {"archetypeId": 4}"#;
        let v: Verdict = extract_as(text).unwrap();
        assert_eq!(v, Verdict { archetype_id: 4 });
    }

    #[test]
    fn fallback_used_on_low_stakes_path() {
        let v: Value = extract_or("nothing here", "dialogue score", json!({"traitScore": 5}));
        assert_eq!(v["traitScore"], 5);
    }

    #[test]
    fn required_failure_is_retryable() {
        let err = extract_required::<Value>("no json", "classification").unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn strip_fences_leaves_prose() {
        assert_eq!(strip_fences("```\nHello there\n```"), "Hello there");
        assert_eq!(strip_fences("  plain  "), "plain");
    }

    #[test]
    fn loose_integer_accepts_numeric_strings() {
        assert_eq!(loose_integer(&serde_json::json!(7)), Some(7));
        assert_eq!(loose_integer(&serde_json::json!(6.6)), Some(7));
        assert_eq!(loose_integer(&serde_json::json!(" 4 ")), Some(4));
        assert_eq!(loose_integer(&serde_json::json!("high")), None);
        assert_eq!(loose_integer(&serde_json::json!(null)), None);
    }
}
