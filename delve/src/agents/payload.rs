//! Boundary validation for JSON produced by command-backed collaborators.
//!
//! Every payload goes through the same three steps: locate a JSON object in
//! the raw output, check it against the embedded schema, then deserialize it
//! into the typed value. Nothing past this module sees untyped JSON.

use std::sync::LazyLock;

use jsonschema::Validator;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::agents::analyst::{Conclusion, Reflection};
use crate::agents::search::SearchResult;
use crate::core::types::Decision;

const DECISION_SCHEMA: &str = include_str!("../../schemas/decision.schema.json");
const REFLECTION_SCHEMA: &str = include_str!("../../schemas/reflection.schema.json");
const CONCLUSION_SCHEMA: &str = include_str!("../../schemas/conclusion.schema.json");
const SEARCH_RESULT_SCHEMA: &str = include_str!("../../schemas/search_result.schema.json");
const FINISH_SCHEMA: &str = include_str!("../../schemas/finish.schema.json");

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("no JSON object found in {kind} output")]
    NoJson { kind: &'static str },
    #[error("{kind} output is not valid JSON: {source}")]
    Json {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("{kind} output failed schema validation: {}", .errors.join("; "))]
    Schema {
        kind: &'static str,
        errors: Vec<String>,
    },
    #[error("{kind} schema is invalid: {message}")]
    BadSchema { kind: &'static str, message: String },
}

/// A compiled schema for one payload kind.
struct PayloadSchema {
    kind: &'static str,
    validator: Result<Validator, String>,
}

impl PayloadSchema {
    fn compile(kind: &'static str, raw: &str) -> Self {
        let validator = serde_json::from_str::<Value>(raw)
            .map_err(|err| err.to_string())
            .and_then(|schema| jsonschema::validator_for(&schema).map_err(|err| err.to_string()));
        Self { kind, validator }
    }

    fn parse<T: DeserializeOwned>(&self, raw: &str) -> Result<T, PayloadError> {
        let value = extract_json(raw).ok_or(PayloadError::NoJson { kind: self.kind })?;
        let validator = self
            .validator
            .as_ref()
            .map_err(|message| PayloadError::BadSchema {
                kind: self.kind,
                message: message.clone(),
            })?;
        if !validator.is_valid(&value) {
            let errors = validator
                .iter_errors(&value)
                .map(|err| err.to_string())
                .collect();
            return Err(PayloadError::Schema {
                kind: self.kind,
                errors,
            });
        }
        serde_json::from_value(value).map_err(|source| PayloadError::Json {
            kind: self.kind,
            source,
        })
    }
}

static DECISION: LazyLock<PayloadSchema> =
    LazyLock::new(|| PayloadSchema::compile("decision", DECISION_SCHEMA));
static REFLECTION: LazyLock<PayloadSchema> =
    LazyLock::new(|| PayloadSchema::compile("reflection", REFLECTION_SCHEMA));
static CONCLUSION: LazyLock<PayloadSchema> =
    LazyLock::new(|| PayloadSchema::compile("conclusion", CONCLUSION_SCHEMA));
static SEARCH_RESULT: LazyLock<PayloadSchema> =
    LazyLock::new(|| PayloadSchema::compile("search", SEARCH_RESULT_SCHEMA));
static FINISH: LazyLock<PayloadSchema> =
    LazyLock::new(|| PayloadSchema::compile("finish", FINISH_SCHEMA));

pub fn parse_decision(raw: &str) -> Result<Decision, PayloadError> {
    DECISION.parse(raw)
}

pub fn parse_reflection(raw: &str) -> Result<Reflection, PayloadError> {
    REFLECTION.parse(raw)
}

pub fn parse_conclusion(raw: &str) -> Result<Conclusion, PayloadError> {
    CONCLUSION.parse(raw)
}

pub fn parse_search_result(raw: &str) -> Result<SearchResult, PayloadError> {
    SEARCH_RESULT.parse(raw)
}

#[derive(Deserialize)]
struct FinalAnswer {
    answer: String,
}

/// Parse a `finish` payload into the final answer text.
pub fn parse_answer(raw: &str) -> Result<String, PayloadError> {
    FINISH.parse::<FinalAnswer>(raw).map(|payload| payload.answer)
}

/// Locate the JSON object in raw agent output.
///
/// Accepts a bare object, an object inside a fenced code block, or the last
/// line of a stream that parses as an object (agents often log before answering).
pub fn extract_json(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    if let Some(start) = trimmed.find("```") {
        let body = &trimmed[start + 3..];
        let body = body.strip_prefix("json").unwrap_or(body);
        if let Some(end) = body.find("```")
            && let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(body[..end].trim())
        {
            return Some(value);
        }
    }

    if let Some(line) = trimmed
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| line.starts_with('{'))
        && let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(line)
    {
        return Some(value);
    }

    // Last resort: the outermost braces.
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    match serde_json::from_str::<Value>(trimmed.get(start..=end)?) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::analyst::ReflectionVerdict;
    use crate::core::types::{FindingUpdate, Verdict};
    use crate::state::Confidence;

    #[test]
    fn decision_passes_schema_and_types() {
        let raw = r#"{
            "reasoning": "need pricing data",
            "decision": "spawn",
            "nodes_to_spawn": [{"question": "What does A cost?", "reason": "pricing"}],
            "findings_updates": [{"action": "add", "key": "a", "title": "A", "content": "exists"}]
        }"#;
        let decision = parse_decision(raw).expect("decision");
        assert_eq!(decision.verdict, Verdict::Spawn);
        assert_eq!(decision.nodes_to_spawn.len(), 1);
        assert!(matches!(decision.findings_updates[0], FindingUpdate::Add { .. }));
    }

    #[test]
    fn add_without_content_fails_schema() {
        let raw = r#"{"reasoning": "r", "decision": "done",
            "findings_updates": [{"action": "add", "key": "a", "title": "A"}]}"#;
        let err = parse_decision(raw).expect_err("schema");
        assert!(matches!(err, PayloadError::Schema { kind: "decision", .. }));
    }

    #[test]
    fn unknown_verdict_is_rejected() {
        let err = parse_decision(r#"{"reasoning": "r", "decision": "maybe"}"#).expect_err("verdict");
        assert!(err.to_string().contains("schema validation"));
    }

    #[test]
    fn missing_json_is_reported() {
        let err = parse_reflection("I could not decide.").expect_err("no json");
        assert!(matches!(err, PayloadError::NoJson { kind: "reflection" }));
    }

    #[test]
    fn json_is_found_in_fences_and_trailing_lines() {
        let fenced = "Here you go:\n```json\n{\"verdict\": \"dead_end\", \"note\": \"nothing\"}\n```";
        let reflection = parse_reflection(fenced).expect("fenced");
        assert_eq!(reflection.verdict, ReflectionVerdict::DeadEnd);

        let streamed = "thinking...\nstill thinking\n{\"answer\": \"42\", \"confidence\": \"high\"}";
        let conclusion = parse_conclusion(streamed).expect("streamed");
        assert_eq!(conclusion.confidence, Confidence::High);
        assert!(conclusion.suggested_followups.is_empty());
    }

    #[test]
    fn search_and_finish_payloads_parse() {
        let result = parse_search_result(
            r#"{"answer": "text", "sources": [{"title": "Docs", "url": "https://docs.rs"}]}"#,
        )
        .expect("search");
        assert_eq!(result.sources[0].title, "Docs");

        assert_eq!(parse_answer(r#"{"answer": "final"}"#).expect("finish"), "final");
        assert!(parse_answer(r#"{"answer": ""}"#).is_err());
    }
}
