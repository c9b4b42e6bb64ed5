//! Adjudication client
//!
//! Builds the prompts, sends them to the primary or review model and turns
//! the answers into validated verdicts.

use crate::error::ProcessingResult;
use crate::models::{AdjudicationRequest, KbCandidate, Verdict};
use crate::services::llm_client::LlmClient;
use crate::services::verdict_parser::{locate_object, parse_verdict};
use serde_json::json;
use std::sync::Arc;

const ADJUDICATION_SYSTEM_PROMPT: &str = r#"You identify archaeological and historical sites mentioned in video transcripts.

You receive a JSON object with the name as heard, how often it was mentioned, metadata already known, facts from the transcripts, the videos it came from, candidate records from our database (db_candidates, with ids) and candidate entities from Wikidata (kb_candidates, with Q-ids).

Decide what the name refers to:
- "db_match": one of the db_candidates. Set "site_id" to its id.
- "wikidata_match": one of the kb_candidates, not in our database. Set "wikidata_id".
- "new_site": a real site that neither list contains.
- "not_a_site": not an archaeological or historical site (a person, a modern town, a transcription error).

Rules:
- The site must be in the same country the facts place it in. A candidate in another country is not a match.
- Never propose a match listed in "rejected_matches".
- If the name is misspelled or transliterated, give the correct spelling in "corrected_name".
- Set "country" to the country the facts place the site in, if they say.

Answer with a single JSON object and nothing else:
{"match_type": "...", "confidence": "low|medium|high", "corrected_name": "...", "site_id": "...", "wikidata_id": "...", "country": "...", "reason": "..."}"#;

const REVIEW_SYSTEM_PROMPT: &str = r#"You review another model's identification of an archaeological site mentioned in video transcripts.

You receive the original request and the first verdict. Confirm the verdict or override it with your own, using the same rules and answer format as the first model.

Hard rule: if the verdict's target (a db_candidate or kb_candidate) lies in a different country than the one the facts describe, the verdict is wrong. Override it; never confirm a geographic mismatch.

Answer with a single JSON object and nothing else:
{"match_type": "...", "confidence": "low|medium|high", "corrected_name": "...", "site_id": "...", "wikidata_id": "...", "country": "...", "reason": "..."}"#;

const DISAMBIGUATION_SYSTEM_PROMPT: &str = r#"Several Wikidata entities share a name. Using the facts, pick the one the facts describe.

Answer with a single JSON object: {"wikidata_id": "Q..."} or {"wikidata_id": null} if none fits."#;

/// Primary and review model pair
pub struct Adjudicator {
    primary: Arc<dyn LlmClient>,
    reviewer: Arc<dyn LlmClient>,
}

impl Adjudicator {
    pub fn new(primary: Arc<dyn LlmClient>, reviewer: Arc<dyn LlmClient>) -> Self {
        Self { primary, reviewer }
    }

    /// Primary verdict, escalated to the review model below high confidence.
    ///
    /// A primary failure (no answer, or an answer that does not parse) is an
    /// error. A review failure keeps the primary verdict.
    pub async fn adjudicate(&self, request: &AdjudicationRequest) -> ProcessingResult<Verdict> {
        let user_prompt = request_json(request)?;
        let output = self
            .primary
            .chat(ADJUDICATION_SYSTEM_PROMPT, &user_prompt)
            .await?;
        let mut verdict = parse_verdict(&output)?;
        verdict.model = Some(self.primary.model_name().to_string());

        tracing::debug!(
            name = %request.name,
            match_type = %verdict.match_type,
            confidence = %verdict.confidence,
            "Primary verdict"
        );

        if !verdict.confidence.needs_review() {
            return Ok(verdict);
        }

        match self.review(request, &verdict).await {
            Some(reviewed) => Ok(reviewed),
            None => Ok(verdict),
        }
    }

    /// Ask the review model to confirm or override `primary`
    pub async fn review(&self, request: &AdjudicationRequest, primary: &Verdict) -> Option<Verdict> {
        let user_prompt = serde_json::to_string_pretty(&json!({
            "request": request,
            "verdict": primary,
        }))
        .ok()?;

        let output = match self.reviewer.chat(REVIEW_SYSTEM_PROMPT, &user_prompt).await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(name = %request.name, error = %e, "Review model unavailable, keeping primary verdict");
                return None;
            }
        };

        match parse_verdict(&output) {
            Ok(mut reviewed) => {
                reviewed.model = Some(self.reviewer.model_name().to_string());
                if reviewed.match_type != primary.match_type || reviewed.target() != primary.target() {
                    tracing::info!(
                        name = %request.name,
                        from = %primary.match_type,
                        to = %reviewed.match_type,
                        "Review overrode primary verdict"
                    );
                }
                Some(reviewed)
            }
            Err(e) => {
                tracing::warn!(name = %request.name, error = %e, "Unparseable review, keeping primary verdict");
                None
            }
        }
    }

    /// Pick one of several same-named entities; `None` when the model declines or fails
    pub async fn disambiguate(&self, name: &str, facts: &[String], candidates: &[KbCandidate]) -> Option<String> {
        let user_prompt = serde_json::to_string_pretty(&json!({
            "name": name,
            "facts": facts,
            "candidates": candidates,
        }))
        .ok()?;

        let output = match self.primary.chat(DISAMBIGUATION_SYSTEM_PROMPT, &user_prompt).await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(name = %name, error = %e, "Disambiguation unavailable");
                return None;
            }
        };

        let chosen = locate_object(&output)
            .ok()?
            .get("wikidata_id")?
            .as_str()?
            .trim()
            .to_string();

        // Only an id from the offered list is accepted
        candidates
            .iter()
            .find(|c| c.id == chosen)
            .map(|c| c.id.clone())
    }
}

fn request_json(request: &AdjudicationRequest) -> ProcessingResult<String> {
    Ok(serde_json::to_string_pretty(request)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProcessingError;
    use crate::models::{Confidence, KnownMetadata, MatchType};
    use crate::services::llm_client::LlmError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Returns canned answers in order and records the prompts it saw
    struct Scripted {
        answers: Mutex<Vec<Result<String, LlmError>>>,
        prompts: Mutex<Vec<String>>,
        model: &'static str,
    }

    impl Scripted {
        fn new(model: &'static str, answers: Vec<Result<String, LlmError>>) -> Arc<Self> {
            Arc::new(Self {
                answers: Mutex::new(answers.into_iter().rev().collect()),
                prompts: Mutex::new(Vec::new()),
                model,
            })
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl LlmClient for Scripted {
        async fn chat(&self, _system: &str, user: &str) -> Result<String, LlmError> {
            self.prompts.lock().unwrap().push(user.to_string());
            self.answers
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Err(LlmError::EmptyResponse))
        }

        fn model_name(&self) -> &str {
            self.model
        }
    }

    fn request() -> AdjudicationRequest {
        AdjudicationRequest {
            name: "Temple of Apollo".to_string(),
            mention_count: 3,
            known: KnownMetadata::default(),
            facts: vec!["Located in Pompeii".to_string()],
            media: vec![],
            db_candidates: vec![],
            kb_candidates: vec![],
            rejected_matches: vec![],
        }
    }

    #[tokio::test]
    async fn test_high_confidence_skips_review() {
        let primary = Scripted::new("fast", vec![Ok(r#"{"match_type": "new_site", "confidence": "high"}"#.to_string())]);
        let reviewer = Scripted::new("strong", vec![]);
        let adjudicator = Adjudicator::new(primary.clone(), reviewer.clone());

        let verdict = adjudicator.adjudicate(&request()).await.unwrap();
        assert_eq!(verdict.model.as_deref(), Some("fast"));
        assert_eq!(reviewer.calls(), 0);
    }

    #[tokio::test]
    async fn test_low_confidence_uses_review() {
        let primary = Scripted::new("fast", vec![Ok(r#"{"match_type": "new_site", "confidence": "low"}"#.to_string())]);
        let reviewer = Scripted::new(
            "strong",
            vec![Ok(r#"{"match_type": "not_a_site", "confidence": "high"}"#.to_string())],
        );
        let adjudicator = Adjudicator::new(primary, reviewer.clone());

        let verdict = adjudicator.adjudicate(&request()).await.unwrap();
        assert_eq!(verdict.match_type, MatchType::NotASite);
        assert_eq!(verdict.model.as_deref(), Some("strong"));
        assert!(reviewer.prompts.lock().unwrap()[0].contains("\"verdict\""));
    }

    #[tokio::test]
    async fn test_review_failure_keeps_primary() {
        let primary = Scripted::new("fast", vec![Ok(r#"{"match_type": "new_site", "confidence": "medium"}"#.to_string())]);
        let reviewer = Scripted::new("strong", vec![Ok("not json".to_string())]);
        let adjudicator = Adjudicator::new(primary, reviewer);

        let verdict = adjudicator.adjudicate(&request()).await.unwrap();
        assert_eq!(verdict.match_type, MatchType::NewSite);
        assert_eq!(verdict.confidence, Confidence::Medium);
    }

    #[tokio::test]
    async fn test_primary_failures_are_errors() {
        let unreachable = Adjudicator::new(
            Scripted::new("fast", vec![Err(LlmError::Network("timeout".to_string()))]),
            Scripted::new("strong", vec![]),
        );
        assert!(matches!(
            unreachable.adjudicate(&request()).await,
            Err(ProcessingError::Transport(_))
        ));

        let garbled = Adjudicator::new(
            Scripted::new("fast", vec![Ok("The site is probably in Italy.".to_string())]),
            Scripted::new("strong", vec![]),
        );
        assert!(matches!(
            garbled.adjudicate(&request()).await,
            Err(ProcessingError::MalformedVerdict(_))
        ));
    }

    #[tokio::test]
    async fn test_disambiguate_only_accepts_offered_ids() {
        let candidates = vec![
            KbCandidate {
                id: "Q1".to_string(),
                label: "Apollo temple".to_string(),
                description: None,
                has_encyclopedia_page: true,
            },
            KbCandidate {
                id: "Q2".to_string(),
                label: "Apollo temple".to_string(),
                description: None,
                has_encyclopedia_page: true,
            },
        ];

        let picks = Adjudicator::new(
            Scripted::new("fast", vec![Ok(r#"{"wikidata_id": "Q2"}"#.to_string())]),
            Scripted::new("strong", vec![]),
        );
        assert_eq!(picks.disambiguate("Temple", &[], &candidates).await.as_deref(), Some("Q2"));

        let invents = Adjudicator::new(
            Scripted::new("fast", vec![Ok(r#"{"wikidata_id": "Q999"}"#.to_string())]),
            Scripted::new("strong", vec![]),
        );
        assert_eq!(invents.disambiguate("Temple", &[], &candidates).await, None);
    }
}
