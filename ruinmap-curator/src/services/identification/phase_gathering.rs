//! Phase 1: GATHERING
//!
//! Evidence aggregation, the fingerprint skip rule, the `enriching` marker
//! and candidate search.

use super::IdentificationEngine;
use crate::db::{discoveries, evidence};
use crate::error::ProcessingResult;
use crate::models::{DbCandidate, Discovery, DiscoveryStatus, EvidenceBundle, KbCandidate};
use crate::utils::retry_on_lock;
use ruinmap_common::names::{fold_case, normalize_name};

impl IdentificationEngine {
    /// Evidence filed under the Discovery's raw name, compared case-folded only
    pub(super) async fn collect_evidence(&self, discovery: &Discovery) -> ProcessingResult<EvidenceBundle> {
        let folded = fold_case(&discovery.name);
        let items = evidence::load_for_folded_name(&self.db, &folded).await?;
        let media = evidence::load_media_for_folded_name(&self.db, &folded).await?;
        let bundle = EvidenceBundle::collect(&items, media);

        tracing::debug!(
            discovery_id = %discovery.id,
            items = bundle.item_count,
            facts = bundle.facts.len(),
            media = bundle.media.len(),
            "Evidence collected"
        );
        Ok(bundle)
    }

    /// Skip when the fingerprint matches and the Discovery is settled
    pub(super) fn is_unchanged(&self, discovery: &Discovery, fingerprint: &str) -> bool {
        discovery.status.is_settled() && discovery.evidence_hash.as_deref() == Some(fingerprint)
    }

    /// Negative constraints from earlier rejections
    pub(super) fn rejection_constraints(&self, discovery: &Discovery) -> Vec<String> {
        if discovery.status != DiscoveryStatus::Rejected {
            return Vec::new();
        }
        let reasons = discovery.decisions.rejection_reasons();
        if !reasons.is_empty() {
            tracing::debug!(discovery_id = %discovery.id, count = reasons.len(), "Injecting prior rejections");
        }
        reasons
    }

    /// Persist `enriching` with the new fingerprint; `false` when the
    /// Discovery can no longer change
    pub(super) async fn begin_enriching(&self, discovery: &mut Discovery, fingerprint: &str) -> ProcessingResult<bool> {
        let id = discovery.id;
        let mentions = discovery.mention_count;
        let updated = retry_on_lock("identification::mark_enriching", self.config.max_lock_wait_ms, || {
            discoveries::mark_enriching(&self.db, id, fingerprint, mentions)
        })
        .await?;

        if updated {
            discovery.transition_to(DiscoveryStatus::Enriching)?;
            discovery.evidence_hash = Some(fingerprint.to_string());
            discovery.processed_mentions = mentions;
            discovery.last_error = None;
            tracing::info!(discovery_id = %id, name = %discovery.name, mentions, "Identifying discovery");
        }
        Ok(updated)
    }

    /// Canonical and knowledge-base candidates; an unavailable collaborator
    /// contributes none
    pub(super) async fn gather_candidates(&self, discovery: &Discovery) -> (Vec<DbCandidate>, Vec<KbCandidate>) {
        let name = discovery.display_name();

        let db_candidates = match self
            .index
            .search(
                &normalize_name(name),
                self.config.db_candidate_limit,
                self.config.similarity_threshold,
            )
            .await
        {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!(discovery_id = %discovery.id, error = %e, "Similarity search failed, continuing without");
                Vec::new()
            }
        };

        let kb_candidates = match self.kb.search(name, self.config.kb_candidate_limit).await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!(discovery_id = %discovery.id, error = %e, "Knowledge base search failed, continuing without");
                Vec::new()
            }
        };

        tracing::debug!(
            discovery_id = %discovery.id,
            db = db_candidates.len(),
            kb = kb_candidates.len(),
            "Candidates gathered"
        );
        (db_candidates, kb_candidates)
    }
}
