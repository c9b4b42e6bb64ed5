//! Strict verdict parsing
//!
//! Locates one JSON object in free-text model output (whole text, then a
//! fenced code block, then first `{` to last `}`), then validates it against
//! the verdict schema. Anything that fails is a parse error; nothing is
//! guessed.

use crate::models::{Confidence, MatchType, Verdict};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

static FENCED_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"```(?:json|JSON)?\s*([\s\S]*?)\s*```").expect("fenced block regex")
});

#[derive(Debug, Error, PartialEq)]
pub enum VerdictParseError {
    #[error("no JSON object in model output: {0}")]
    NoJson(String),

    #[error("verdict does not match schema: {0}")]
    Schema(String),
}

#[derive(Deserialize)]
struct RawVerdict {
    match_type: MatchType,
    confidence: Confidence,
    #[serde(default)]
    corrected_name: Option<String>,
    #[serde(default)]
    site_id: Option<String>,
    #[serde(default)]
    wikidata_id: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

/// Parse and validate a verdict from raw model output
pub fn parse_verdict(output: &str) -> Result<Verdict, VerdictParseError> {
    let object = locate_object(output)?;
    let raw: RawVerdict =
        serde_json::from_value(object).map_err(|e| VerdictParseError::Schema(e.to_string()))?;

    let site_id = non_blank(raw.site_id)
        .map(|id| {
            Uuid::parse_str(&id)
                .map_err(|_| VerdictParseError::Schema(format!("site_id '{}' is not a UUID", id)))
        })
        .transpose()?;
    let wikidata_id = non_blank(raw.wikidata_id);

    match raw.match_type {
        MatchType::DbMatch if site_id.is_none() => {
            return Err(VerdictParseError::Schema("db_match requires site_id".to_string()));
        }
        MatchType::WikidataMatch if !wikidata_id.as_deref().is_some_and(is_entity_id) => {
            return Err(VerdictParseError::Schema(
                "wikidata_match requires a wikidata_id like Q123".to_string(),
            ));
        }
        _ => {}
    }

    Ok(Verdict {
        match_type: raw.match_type,
        confidence: raw.confidence,
        corrected_name: non_blank(raw.corrected_name),
        site_id,
        wikidata_id,
        country: non_blank(raw.country),
        reason: non_blank(raw.reason),
        model: None,
    })
}

pub(crate) fn locate_object(output: &str) -> Result<Value, VerdictParseError> {
    if let Some(object) = as_object(output) {
        return Ok(object);
    }

    if let Some(caps) = FENCED_BLOCK.captures(output) {
        if let Some(object) = as_object(&caps[1]) {
            tracing::debug!("Verdict taken from fenced code block");
            return Ok(object);
        }
    }

    if let (Some(start), Some(end)) = (output.find('{'), output.rfind('}')) {
        if start < end {
            if let Some(object) = as_object(&output[start..=end]) {
                tracing::debug!("Verdict taken from brace match");
                return Ok(object);
            }
        }
    }

    let snippet: String = output.chars().take(200).collect();
    Err(VerdictParseError::NoJson(snippet))
}

fn as_object(text: &str) -> Option<Value> {
    serde_json::from_str::<Value>(text.trim())
        .ok()
        .filter(Value::is_object)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn is_entity_id(id: &str) -> bool {
    id.len() > 1 && id.starts_with('Q') && id[1..].chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_json() {
        let verdict = parse_verdict(
            r#"{"match_type": "new_site", "confidence": "medium", "corrected_name": " Sayburç ", "reason": "reliefs"}"#,
        )
        .unwrap();
        assert_eq!(verdict.match_type, MatchType::NewSite);
        assert_eq!(verdict.confidence, Confidence::Medium);
        assert_eq!(verdict.corrected_name.as_deref(), Some("Sayburç"));
    }

    #[test]
    fn test_fenced_block_with_prose() {
        let output = "Here is my verdict:\n```json\n{\"match_type\": \"wikidata_match\", \"confidence\": \"high\", \"wikidata_id\": \"Q110967443\"}\n```\nLet me know.";
        let verdict = parse_verdict(output).unwrap();
        assert_eq!(verdict.wikidata_id.as_deref(), Some("Q110967443"));
    }

    #[test]
    fn test_brace_match_in_prose() {
        let id = Uuid::new_v4();
        let output = format!(
            "The answer is {{\"match_type\": \"db_match\", \"confidence\": \"low\", \"site_id\": \"{}\"}} as requested.",
            id
        );
        let verdict = parse_verdict(&output).unwrap();
        assert_eq!(verdict.site_id, Some(id));
        assert_eq!(verdict.target(), Some(id.to_string()));
    }

    #[test]
    fn test_no_json_is_error() {
        assert!(matches!(
            parse_verdict("I cannot decide."),
            Err(VerdictParseError::NoJson(_))
        ));
        assert!(matches!(parse_verdict("[1, 2]"), Err(VerdictParseError::NoJson(_))));
    }

    #[test]
    fn test_schema_violations() {
        // Unknown enum value
        assert!(matches!(
            parse_verdict(r#"{"match_type": "maybe", "confidence": "high"}"#),
            Err(VerdictParseError::Schema(_))
        ));
        // db_match without an id
        assert!(matches!(
            parse_verdict(r#"{"match_type": "db_match", "confidence": "high", "site_id": ""}"#),
            Err(VerdictParseError::Schema(_))
        ));
        // db_match with a non-UUID id
        assert!(matches!(
            parse_verdict(r#"{"match_type": "db_match", "confidence": "high", "site_id": "42"}"#),
            Err(VerdictParseError::Schema(_))
        ));
        // wikidata_match with a label instead of an id
        assert!(matches!(
            parse_verdict(r#"{"match_type": "wikidata_match", "confidence": "high", "wikidata_id": "Knossos"}"#),
            Err(VerdictParseError::Schema(_))
        ));
    }

    #[test]
    fn test_not_a_site_needs_no_ids() {
        let verdict = parse_verdict(r#"{"match_type": "not_a_site", "confidence": "high", "site_id": null}"#).unwrap();
        assert_eq!(verdict.match_type, MatchType::NotASite);
        assert_eq!(verdict.site_id, None);
    }
}
