//! Promotion gate
//!
//! Decides whether a resolved Discovery is complete enough for the
//! canonical dataset and, when it is, creates (or reuses) its canonical
//! record. Promotion runs on the caller's transaction so the record, the
//! name index, the evidence links and the Discovery status commit together.

use crate::db::{evidence, sites};
use crate::models::{CanonicalSite, Discovery, DiscoveryStatus};
use crate::services::completeness_scorer::CompletenessScorer;
use crate::services::temporal_policy::TemporalPolicy;
use chrono::Utc;
use ruinmap_common::names::{fold_case, normalize_name};
use ruinmap_common::Result;
use serde_json::json;
use sqlx::SqliteConnection;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Eligible,
    BelowThreshold { score: i64, threshold: i64 },
    MissingCoordinates,
    TemporallyIneligible,
}

impl GateDecision {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Self::Eligible)
    }
}

/// Result of a promotion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Promotion {
    pub site_id: Uuid,
    /// `false` when an existing record was reused
    pub created: bool,
    pub evidence_linked: u64,
}

pub struct PromotionGate {
    scorer: CompletenessScorer,
    policy: Arc<dyn TemporalPolicy>,
    threshold: i64,
    curation_source_id: String,
    duplicate_radius_degrees: f64,
}

impl PromotionGate {
    pub fn new(
        policy: Arc<dyn TemporalPolicy>,
        threshold: i64,
        curation_source_id: &str,
        duplicate_radius_degrees: f64,
    ) -> Self {
        Self {
            scorer: CompletenessScorer::default(),
            policy,
            threshold,
            curation_source_id: curation_source_id.to_string(),
            duplicate_radius_degrees,
        }
    }

    pub fn score(&self, discovery: &Discovery) -> i64 {
        self.scorer.score(discovery)
    }

    /// Gate check on the Discovery's current fields
    pub fn evaluate(&self, discovery: &Discovery) -> GateDecision {
        let score = self.scorer.score(discovery);
        if score < self.threshold {
            GateDecision::BelowThreshold {
                score,
                threshold: self.threshold,
            }
        } else if !discovery.has_coordinates() {
            GateDecision::MissingCoordinates
        } else if !self.policy.is_eligible(discovery.period_start, discovery.lon) {
            GateDecision::TemporallyIneligible
        } else {
            GateDecision::Eligible
        }
    }

    /// Promote a Discovery already linked to an existing canonical record
    pub async fn promote_linked(&self, conn: &mut SqliteConnection, discovery: &mut Discovery) -> Result<Promotion> {
        let site_id = match discovery.site_id {
            Some(id) => id,
            None => {
                return Err(ruinmap_common::Error::RefusedTransition(format!(
                    "Discovery {} has no canonical link to promote",
                    discovery.id
                )))
            }
        };

        sites::add_site_name(&mut *conn, site_id, &discovery.name, "alias").await?;
        let evidence_linked =
            evidence::link_unlinked_by_folded_name(&mut *conn, &fold_case(&discovery.name), site_id).await?;
        discovery.transition_to(DiscoveryStatus::Promoted)?;

        Ok(Promotion {
            site_id,
            created: false,
            evidence_linked,
        })
    }

    /// Create the canonical record for a Discovery, or reuse a same-named
    /// curation record close enough to be the same site
    pub async fn promote_new(&self, conn: &mut SqliteConnection, discovery: &mut Discovery) -> Result<Promotion> {
        let name = discovery.display_name().to_string();
        let normalized = normalize_name(&name);

        let existing = sites::find_in_source_by_name(&mut *conn, &self.curation_source_id, &normalized)
            .await?
            .into_iter()
            .find(|site| self.is_same_place(site, discovery));

        let (site_id, created) = match existing {
            Some(site) => {
                tracing::info!(
                    discovery_id = %discovery.id,
                    site_id = %site.id,
                    name = %name,
                    "Reusing existing curated record"
                );
                (site.id, false)
            }
            None => {
                let site = self.build_site(discovery, &name);
                sites::insert_site(&mut *conn, &site).await?;
                (site.id, true)
            }
        };

        sites::add_site_name(&mut *conn, site_id, &name, "canonical").await?;
        if normalize_name(&discovery.name) != normalized {
            sites::add_site_name(&mut *conn, site_id, &discovery.name, "alias").await?;
        }
        let evidence_linked =
            evidence::link_unlinked_by_folded_name(&mut *conn, &fold_case(&discovery.name), site_id).await?;

        discovery.link_site(site_id)?;
        discovery.transition_to(DiscoveryStatus::Promoted)?;

        Ok(Promotion {
            site_id,
            created,
            evidence_linked,
        })
    }

    /// Same site when within the radius, or when either side lacks coordinates
    fn is_same_place(&self, site: &CanonicalSite, discovery: &Discovery) -> bool {
        match (site.lat, site.lon, discovery.lat, discovery.lon) {
            (Some(lat1), Some(lon1), Some(lat2), Some(lon2)) => {
                (lat1 - lat2).abs() <= self.duplicate_radius_degrees
                    && (lon1 - lon2).abs() <= self.duplicate_radius_degrees
            }
            _ => true,
        }
    }

    fn build_site(&self, discovery: &Discovery, name: &str) -> CanonicalSite {
        let mut site = CanonicalSite::new(&self.curation_source_id, name);
        site.lat = discovery.lat;
        site.lon = discovery.lon;
        site.country = discovery.country.clone();
        site.site_type = discovery.site_type.clone();
        site.period_name = discovery.period_name.clone();
        site.period_start = discovery.period_start;
        site.description = discovery.description.clone();
        site.thumbnail_url = discovery.thumbnail_url.clone();
        site.wikidata_id = discovery.wikidata_id.clone();
        site.wikipedia_url = discovery.wikipedia_url.clone();
        site.provenance = json!({
            "discovery_id": discovery.id.to_string(),
            "observed_name": discovery.name,
            "mention_count": discovery.mention_count,
            "score": discovery.score,
            "decided_by": discovery.decisions.last().and_then(|d| d.model.clone()),
            "promoted_at": Utc::now().to_rfc3339(),
        });
        site
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::temporal_policy::EraCutoffPolicy;

    fn gate() -> PromotionGate {
        PromotionGate::new(Arc::new(EraCutoffPolicy::default()), 55, "ruinmap_curated", 0.5)
    }

    fn enriched(name: &str) -> Discovery {
        let mut d = Discovery::new(name);
        d.confirmed_name = Some(name.to_string());
        d.lat = Some(37.0);
        d.lon = Some(38.0);
        d.country = Some("Turkey".to_string());
        d.site_type = Some("tell".to_string());
        d
    }

    #[test]
    fn test_evaluate_order() {
        let gate = gate();
        let mut d = enriched("Karahan Tepe");
        // 25 + 20 + 10 + 10 = 65
        assert_eq!(gate.evaluate(&d), GateDecision::Eligible);

        d.period_start = Some(1700);
        assert_eq!(gate.evaluate(&d), GateDecision::TemporallyIneligible);

        // 25 + 10 + 10 + 10 (period) = 55, still at the threshold
        d.lat = None;
        assert_eq!(gate.evaluate(&d), GateDecision::MissingCoordinates);

        d.site_type = None;
        assert_eq!(
            gate.evaluate(&d),
            GateDecision::BelowThreshold { score: 45, threshold: 55 }
        );
    }

    #[test]
    fn test_same_place_rules() {
        let gate = gate();
        let d = enriched("Karahan Tepe");
        let near = CanonicalSite::new("ruinmap_curated", "Karahan Tepe").with_coordinates(37.3, 38.2);
        let far = CanonicalSite::new("ruinmap_curated", "Karahan Tepe").with_coordinates(39.0, 38.0);
        let unplaced = CanonicalSite::new("ruinmap_curated", "Karahan Tepe");

        assert!(gate.is_same_place(&near, &d));
        assert!(!gate.is_same_place(&far, &d));
        assert!(gate.is_same_place(&unplaced, &d));
    }
}
