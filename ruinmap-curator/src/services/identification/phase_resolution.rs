//! Phase 3: RESOLUTION
//!
//! Dispatches on the final verdict, enriches from the knowledge base, runs
//! the promotion gate and commits the outcome in one transaction scope.

use super::{DiscoveryOutcome, IdentificationEngine};
use crate::db::{discoveries, evidence, sites};
use crate::error::{ProcessingError, ProcessingResult};
use crate::models::{
    CanonicalSite, Confidence, DecisionRecord, Discovery, DiscoveryStatus, EvidenceBundle, MatchType, Verdict,
};
use crate::services::knowledge_base::{KbEntity, KbError};
use crate::utils::{begin_monitored, retry_on_lock};
use ruinmap_common::names::{fold_case, same_country};
use uuid::Uuid;

/// What the outcome write has to do
#[derive(Debug, Clone)]
enum Resolution {
    NotASite,
    Rejected { reason: String },
    /// Existing canonical record; promoted through the link when eligible
    Linked { site_id: Uuid },
    /// Knowledge-base entity or new site; gets its own record when eligible
    Enriched,
}

impl IdentificationEngine {
    pub(super) async fn resolve(
        &self,
        mut discovery: Discovery,
        bundle: &EvidenceBundle,
        verdict: Verdict,
    ) -> ProcessingResult<DiscoveryOutcome> {
        match verdict.match_type {
            MatchType::NotASite => self.commit_outcome(discovery, &verdict, Resolution::NotASite).await,
            MatchType::DbMatch => self.resolve_db_match(discovery, bundle, verdict).await,
            MatchType::WikidataMatch | MatchType::NewSite => {
                self.enrich_from_verdict(&mut discovery, &verdict).await?;
                self.commit_outcome(discovery, &verdict, Resolution::Enriched).await
            }
        }
    }

    async fn resolve_db_match(
        &self,
        mut discovery: Discovery,
        bundle: &EvidenceBundle,
        verdict: Verdict,
    ) -> ProcessingResult<DiscoveryOutcome> {
        let site_id = verdict
            .site_id
            .ok_or_else(|| ProcessingError::Integrity("db_match verdict without a site id".to_string()))?;
        let site = sites::require_site(&self.db, site_id).await?;

        if let Some(existing) = discovery.site_id.filter(|existing| *existing != site_id) {
            return Err(ProcessingError::Integrity(format!(
                "Discovery already linked to record {}, verdict names {}",
                existing, site_id
            )));
        }

        if let Some(reason) = country_conflict(&site, &discovery, verdict.confidence) {
            tracing::info!(discovery_id = %discovery.id, site_id = %site_id, reason = %reason, "Rejecting match");
            return self
                .commit_outcome(discovery, &verdict, Resolution::Rejected { reason })
                .await;
        }

        discovery.fill_missing_from_site(&site);
        self.enrich_linked(&mut discovery, bundle).await;
        discovery.link_site(site_id)?;

        self.commit_outcome(discovery, &verdict, Resolution::Linked { site_id })
            .await
    }

    /// Further detail for a linked Discovery: the record's own entity, else
    /// the one candidate with an encyclopedia page, else the model's pick
    /// among several such candidates
    async fn enrich_linked(&self, discovery: &mut Discovery, bundle: &EvidenceBundle) {
        let entity_id = match discovery.wikidata_id.clone() {
            Some(id) => Some(id),
            None => self.pick_encyclopedic_entity(discovery, bundle).await,
        };

        let Some(entity_id) = entity_id else {
            return;
        };
        match self.kb.entity(&entity_id).await {
            Ok(entity) => apply_entity(discovery, &entity),
            Err(e) => {
                tracing::warn!(discovery_id = %discovery.id, wikidata_id = %entity_id, error = %e, "Entity fetch failed")
            }
        }
    }

    async fn pick_encyclopedic_entity(&self, discovery: &Discovery, bundle: &EvidenceBundle) -> Option<String> {
        let name = discovery.display_name();
        let candidates = match self.kb.search(name, self.config.kb_candidate_limit).await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!(discovery_id = %discovery.id, error = %e, "Knowledge base search failed");
                return None;
            }
        };

        let with_page: Vec<_> = candidates
            .into_iter()
            .filter(|c| c.has_encyclopedia_page)
            .collect();

        match with_page.as_slice() {
            [] => None,
            [only] => Some(only.id.clone()),
            several => {
                let facts: Vec<String> = bundle.facts.iter().take(self.config.max_facts).cloned().collect();
                let picked = self.adjudicator.disambiguate(name, &facts, several).await;
                tracing::debug!(
                    discovery_id = %discovery.id,
                    offered = several.len(),
                    picked = ?picked,
                    "Disambiguated knowledge base candidates"
                );
                picked
            }
        }
    }

    /// Detail for `wikidata_match` / `new_site`
    async fn enrich_from_verdict(&self, discovery: &mut Discovery, verdict: &Verdict) -> ProcessingResult<()> {
        if let Some(id) = verdict.wikidata_id.as_deref() {
            match self.kb.entity(id).await {
                Ok(entity) => apply_entity(discovery, &entity),
                Err(KbError::NotFound(missing)) => {
                    return Err(ProcessingError::Integrity(format!(
                        "Verdict references unknown knowledge base entity {}",
                        missing
                    )));
                }
                Err(e) => {
                    tracing::warn!(discovery_id = %discovery.id, wikidata_id = %id, error = %e, "Entity fetch failed")
                }
            }
        }

        if discovery.confirmed_name.is_none() {
            discovery.confirmed_name = Some(
                verdict
                    .corrected_name
                    .clone()
                    .unwrap_or_else(|| discovery.name.clone()),
            );
        }

        if discovery.country.is_none() {
            if let (Some(lat), Some(lon)) = (discovery.lat, discovery.lon) {
                match self.kb.country_at(lat, lon).await {
                    Ok(country) => discovery.country = country,
                    Err(e) => tracing::warn!(discovery_id = %discovery.id, error = %e, "Reverse geocoding failed"),
                }
            }
        }
        Ok(())
    }

    /// Score, gate, and write the outcome atomically
    async fn commit_outcome(
        &self,
        mut discovery: Discovery,
        verdict: &Verdict,
        resolution: Resolution,
    ) -> ProcessingResult<DiscoveryOutcome> {
        if verdict.match_type != MatchType::NotASite {
            if let Some(corrected) = verdict.corrected_name.as_ref() {
                if discovery.confirmed_name.is_none() {
                    discovery.confirmed_name = Some(corrected.clone());
                }
            }
        }

        let eligible = match resolution {
            Resolution::Linked { .. } | Resolution::Enriched => {
                discovery.score = self.gate.score(&discovery);
                let decision = self.gate.evaluate(&discovery);
                tracing::debug!(
                    discovery_id = %discovery.id,
                    score = discovery.score,
                    decision = ?decision,
                    "Promotion gate"
                );
                decision.is_eligible()
            }
            Resolution::NotASite | Resolution::Rejected { .. } => false,
        };

        let discovery_id = discovery.id;
        let written = retry_on_lock("identification::commit_outcome", self.config.max_lock_wait_ms, || {
            let attempt = discovery.clone();
            let resolution = resolution.clone();
            async move { self.write_outcome(attempt, verdict, resolution, eligible).await }
        })
        .await?;

        match written {
            Some((outcome, status)) => {
                tracing::info!(discovery_id = %discovery_id, status = %status, outcome = ?outcome, "Discovery resolved");
                Ok(outcome)
            }
            None => Err(ProcessingError::Integrity(format!(
                "Discovery {} was promoted while being processed",
                discovery_id
            ))),
        }
    }

    /// One attempt at the outcome scope; `None` when the row refused the update
    async fn write_outcome(
        &self,
        mut discovery: Discovery,
        verdict: &Verdict,
        resolution: Resolution,
        eligible: bool,
    ) -> ruinmap_common::Result<Option<(DiscoveryOutcome, DiscoveryStatus)>> {
        let mut tx = begin_monitored(&self.db, "identification::write_outcome").await?;
        let mut reason = verdict.reason.clone();

        let outcome = match resolution {
            Resolution::NotASite => {
                discovery.transition_to(DiscoveryStatus::Matched)?;
                DiscoveryOutcome::NotASite
            }
            Resolution::Rejected { reason: why } => {
                discovery.transition_to(DiscoveryStatus::Rejected)?;
                reason = Some(why);
                DiscoveryOutcome::Rejected
            }
            Resolution::Linked { site_id } => {
                evidence::link_unlinked_by_folded_name(tx.conn()?, &fold_case(&discovery.name), site_id).await?;
                if eligible {
                    let promotion = self.gate.promote_linked(tx.conn()?, &mut discovery).await?;
                    DiscoveryOutcome::Promoted {
                        created: promotion.created,
                    }
                } else {
                    discovery.transition_to(DiscoveryStatus::Matched)?;
                    DiscoveryOutcome::Matched
                }
            }
            Resolution::Enriched => {
                if eligible {
                    let promotion = self.gate.promote_new(tx.conn()?, &mut discovery).await?;
                    DiscoveryOutcome::Promoted {
                        created: promotion.created,
                    }
                } else {
                    discovery.transition_to(DiscoveryStatus::Enriched)?;
                    DiscoveryOutcome::Enriched
                }
            }
        };

        let mut record = DecisionRecord::new(discovery.status);
        record.model = verdict.model.clone();
        record.match_type = Some(verdict.match_type);
        record.confidence = Some(verdict.confidence);
        record.target = verdict.target();
        record.reason = reason;
        discovery.decisions.push(record, self.config.decision_log_limit);
        discovery.last_error = None;

        if !discoveries::save_discovery(tx.conn()?, &discovery).await? {
            tx.rollback().await?;
            return Ok(None);
        }
        tx.commit().await?;
        Ok(Some((outcome, discovery.status)))
    }
}

/// Rejection reason when the record and the evidence disagree on country
/// and the verdict was not made with high confidence
fn country_conflict(site: &CanonicalSite, discovery: &Discovery, confidence: Confidence) -> Option<String> {
    if confidence == Confidence::High {
        return None;
    }
    match (site.country.as_deref(), discovery.country.as_deref()) {
        (Some(site_country), Some(evidence_country)) if !same_country(site_country, evidence_country) => {
            Some(format!(
                "Country mismatch: '{}' is in {}, evidence places the site in {}",
                site.name, site_country, evidence_country
            ))
        }
        _ => None,
    }
}

/// Fill the Discovery's missing fields from a knowledge-base entity
fn apply_entity(discovery: &mut Discovery, entity: &KbEntity) {
    if discovery.confirmed_name.is_none() {
        discovery.confirmed_name = entity.label.clone();
    }
    if !discovery.has_coordinates() {
        if let (Some(lat), Some(lon)) = (entity.lat, entity.lon) {
            discovery.lat = Some(lat);
            discovery.lon = Some(lon);
        }
    }
    if discovery.country.is_none() {
        discovery.country = entity.country.clone();
    }
    if discovery.site_type.is_none() {
        discovery.site_type = entity.classification.first().cloned();
    }
    if discovery.period_start.is_none() {
        discovery.period_start = entity.inception_year;
    }
    if discovery.period_name.is_none() {
        discovery.period_name = entity.period_name().map(str::to_string);
    }
    if discovery.description.is_none() {
        discovery.description = entity.best_description().map(str::to_string);
    }
    if discovery.thumbnail_url.is_none() {
        discovery.thumbnail_url = entity.thumbnail_url.clone();
    }
    if discovery.wikidata_id.is_none() {
        discovery.wikidata_id = Some(entity.id.clone());
    }
    if discovery.wikipedia_url.is_none() {
        discovery.wikipedia_url = entity.wikipedia_url.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn greek_temple() -> CanonicalSite {
        CanonicalSite::new("pleiades", "Temple of Apollo").with_country("Greece")
    }

    #[test]
    fn test_country_conflict_below_high_confidence() {
        let site = greek_temple();
        let mut discovery = Discovery::new("Temple of Apollo");
        discovery.country = Some("Italy".to_string());

        let reason = country_conflict(&site, &discovery, Confidence::Medium).unwrap();
        assert!(reason.contains("Greece"));
        assert!(reason.contains("Italy"));
        assert_eq!(country_conflict(&site, &discovery, Confidence::High), None);
    }

    #[test]
    fn test_unknown_country_is_no_conflict() {
        let site = greek_temple();
        let discovery = Discovery::new("Temple of Apollo");
        assert_eq!(country_conflict(&site, &discovery, Confidence::Low), None);

        let mut same = Discovery::new("Temple of Apollo");
        same.country = Some("greece".to_string());
        assert_eq!(country_conflict(&site, &same, Confidence::Low), None);
    }

    #[test]
    fn test_apply_entity_only_fills_gaps() {
        let mut discovery = Discovery::new("Sayburc");
        discovery.country = Some("Turkey".to_string());
        let entity = KbEntity {
            id: "Q110967443".to_string(),
            label: Some("Sayburç".to_string()),
            lat: Some(37.1),
            lon: Some(39.5),
            country: Some("Türkiye".to_string()),
            classification: vec!["archaeological site".to_string()],
            inception_year: Some(-9000),
            ..Default::default()
        };

        apply_entity(&mut discovery, &entity);
        assert_eq!(discovery.confirmed_name.as_deref(), Some("Sayburç"));
        assert_eq!(discovery.country.as_deref(), Some("Turkey"));
        assert_eq!(discovery.site_type.as_deref(), Some("archaeological site"));
        assert_eq!(discovery.period_name.as_deref(), Some("Neolithic"));
        assert_eq!(discovery.wikidata_id.as_deref(), Some("Q110967443"));
        assert!(discovery.has_coordinates());
    }
}
