//! Phase 2: ADJUDICATION
//!
//! Builds the request, takes the (possibly escalated) verdict, then steers
//! it toward records that already exist: a corrected spelling is searched
//! again, and a `new_site` the knowledge base clearly knows is turned into a
//! knowledge-base match.

use super::IdentificationEngine;
use crate::models::{
    AdjudicationRequest, DbCandidate, Discovery, EvidenceBundle, KbCandidate, KnownMetadata, MatchType, Verdict,
};
use ruinmap_common::names::normalize_name;

/// Description words that mark a knowledge-base entity as a heritage site
const HERITAGE_KEYWORDS: &[&str] = &[
    "archaeological",
    "archeological",
    "heritage",
    "monument",
    "ruin",
    "ancient",
    "temple",
    "fortress",
    "castle",
    "tomb",
    "necropolis",
    "excavat",
    "megalith",
    "pyramid",
    "prehistoric",
    "settlement",
];

impl IdentificationEngine {
    pub(super) fn build_request(
        &self,
        discovery: &Discovery,
        bundle: &EvidenceBundle,
        db_candidates: Vec<DbCandidate>,
        kb_candidates: Vec<KbCandidate>,
        rejected_matches: Vec<String>,
    ) -> AdjudicationRequest {
        AdjudicationRequest {
            name: discovery.display_name().to_string(),
            mention_count: discovery.mention_count,
            known: KnownMetadata {
                country: discovery.country.clone(),
                site_type: discovery.site_type.clone(),
                period: discovery.period_name.clone(),
            },
            facts: bundle.facts.iter().take(self.config.max_facts).cloned().collect(),
            media: bundle.media.iter().take(self.config.max_media_contexts).cloned().collect(),
            db_candidates,
            kb_candidates,
            rejected_matches,
        }
    }

    /// Apply the corrected-name and keyword overrides, then record the
    /// country the verdict read from the evidence
    pub(super) async fn post_process(&self, discovery: &mut Discovery, mut verdict: Verdict) -> Verdict {
        if verdict.match_type == MatchType::NotASite {
            return verdict;
        }

        let excluded = discovery.decisions.rejected_targets();
        let corrected = verdict
            .corrected_name
            .clone()
            .filter(|c| c.trim() != discovery.name.trim());

        if let Some(corrected) = corrected.as_deref() {
            if let Some(site) = self.existing_record_for(corrected, &excluded).await {
                if verdict.match_type != MatchType::DbMatch || verdict.site_id != Some(site.id) {
                    tracing::info!(
                        discovery_id = %discovery.id,
                        corrected = %corrected,
                        site_id = %site.id,
                        from = %verdict.match_type,
                        "Corrected name found in canonical records, redirecting verdict"
                    );
                    verdict.match_type = MatchType::DbMatch;
                    verdict.site_id = Some(site.id);
                    verdict.wikidata_id = None;
                    verdict.reason = Some(format!(
                        "Corrected name '{}' matches existing record '{}'",
                        corrected, site.name
                    ));
                }
            }
        }

        if verdict.match_type == MatchType::NewSite {
            let lookup = corrected.as_deref().unwrap_or_else(|| discovery.display_name()).to_string();
            if let Some((candidate, why)) = self.known_entity_for(&lookup, corrected.is_some(), &excluded).await {
                tracing::info!(
                    discovery_id = %discovery.id,
                    wikidata_id = %candidate.id,
                    label = %candidate.label,
                    "new_site verdict redirected to knowledge base entity"
                );
                verdict.match_type = MatchType::WikidataMatch;
                verdict.wikidata_id = Some(candidate.id);
                verdict.reason = Some(why);
            }
        }

        if discovery.country.is_none() {
            if let Some(country) = verdict.country.clone() {
                discovery.country = Some(country);
            }
        }

        verdict
    }

    /// Canonical record reached by the corrected spelling, if any
    async fn existing_record_for(&self, corrected: &str, excluded: &[String]) -> Option<DbCandidate> {
        let found = self
            .index
            .search(
                &normalize_name(corrected),
                1 + excluded.len(),
                self.config.correction_similarity_threshold,
            )
            .await;

        match found {
            Ok(candidates) => candidates
                .into_iter()
                .find(|c| !excluded.contains(&c.id.to_string())),
            Err(e) => {
                tracing::warn!(corrected = %corrected, error = %e, "Similarity re-search failed");
                None
            }
        }
    }

    /// Knowledge-base entity that makes a `new_site` verdict unlikely.
    ///
    /// With a corrected name, an entity labelled exactly that wins. Otherwise
    /// the first entity whose description reads like a heritage site.
    async fn known_entity_for(
        &self,
        name: &str,
        corrected: bool,
        excluded: &[String],
    ) -> Option<(KbCandidate, String)> {
        let candidates = match self.kb.search(name, self.config.kb_candidate_limit).await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!(name = %name, error = %e, "Knowledge base re-search failed");
                return None;
            }
        };
        let candidates: Vec<KbCandidate> = candidates
            .into_iter()
            .filter(|c| !excluded.contains(&c.id))
            .collect();

        if corrected {
            let wanted = normalize_name(name);
            if let Some(hit) = candidates.iter().find(|c| normalize_name(&c.label) == wanted) {
                let why = format!("Corrected name '{}' is knowledge base entity {}", name, hit.id);
                return Some((hit.clone(), why));
            }
        }

        candidates
            .into_iter()
            .find(|c| c.description.as_deref().is_some_and(is_heritage_description))
            .map(|c| {
                let why = format!(
                    "Knowledge base entity {} ({}) describes a heritage site",
                    c.id,
                    c.description.as_deref().unwrap_or_default()
                );
                (c, why)
            })
    }
}

fn is_heritage_description(description: &str) -> bool {
    let lower = description.to_lowercase();
    HERITAGE_KEYWORDS.iter().any(|k| lower.contains(k))
}
