//! Identification engine
//!
//! Drains pending Discoveries one at a time and resolves each into an
//! existing canonical record, a knowledge-base entity, a new site, or noise.
//!
//! # State Progression
//! pending → enriching → {matched | enriched | rejected | failed} → promoted
//!
//! # Phases
//! - **gathering**: evidence bundle, fingerprint skip, `enriching` marker,
//!   candidate search
//! - **adjudication**: request, verdict with escalation, corrected-name and
//!   keyword overrides
//! - **resolution**: conflict check, enrichment, promotion, outcome write
//!
//! Each Discovery writes in two scopes. The `enriching` marker and the new
//! fingerprint commit before any external call, so a restart resumes with
//! the evidence change still visible. The outcome commits in one scope of
//! its own after every external call has returned. A failure in either is
//! contained to that Discovery, which is then marked `failed`.

use crate::config::CuratorConfig;
use crate::db::{discoveries, settings};
use crate::error::ProcessingResult;
use crate::models::Discovery;
use crate::services::adjudicator::Adjudicator;
use crate::services::knowledge_base::KnowledgeBase;
use crate::services::promotion_gate::PromotionGate;
use crate::services::similarity_index::SimilarityIndex;
use crate::utils::retry_on_lock;
use chrono::Utc;
use ruinmap_common::Result;
use sqlx::SqlitePool;
use std::sync::Arc;

mod phase_gathering;
mod phase_adjudication;
mod phase_resolution;
mod statistics;

pub use statistics::{CycleStatistics, DiscoveryOutcome};

/// Identification engine with its injected collaborators
pub struct IdentificationEngine {
    db: SqlitePool,
    index: Arc<dyn SimilarityIndex>,
    kb: Arc<dyn KnowledgeBase>,
    adjudicator: Adjudicator,
    gate: PromotionGate,
    config: CuratorConfig,
}

impl IdentificationEngine {
    pub fn new(
        db: SqlitePool,
        index: Arc<dyn SimilarityIndex>,
        kb: Arc<dyn KnowledgeBase>,
        adjudicator: Adjudicator,
        gate: PromotionGate,
        config: CuratorConfig,
    ) -> Self {
        Self {
            db,
            index,
            kb,
            adjudicator,
            gate,
            config,
        }
    }

    /// One batch drain.
    ///
    /// Only a failure to select the batch is an error; per-Discovery failures
    /// are counted and the batch carries on.
    pub async fn run_cycle(&self) -> Result<CycleStatistics> {
        let batch = discoveries::select_batch(&self.db, self.config.batch_size).await?;
        let mut stats = CycleStatistics {
            selected: batch.len(),
            ..Default::default()
        };

        if batch.is_empty() {
            tracing::debug!("No discoveries to identify");
        } else {
            tracing::info!(count = batch.len(), "Identification cycle started");
        }

        for discovery in batch {
            let outcome = self.process_discovery(discovery).await;
            stats.record(&outcome);
        }

        settings::set_last_cycle_at(&self.db, Utc::now()).await?;
        tracing::info!("Identification cycle complete: {}", stats.display_string());
        Ok(stats)
    }

    /// Process one Discovery, containing any failure to it
    pub async fn process_discovery(&self, discovery: Discovery) -> DiscoveryOutcome {
        let discovery_id = discovery.id;
        let name = discovery.name.clone();

        match self.try_process(discovery).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let reason = e.to_string();
                tracing::error!(discovery_id = %discovery_id, name = %name, error = %reason, "Discovery failed");

                let marked = retry_on_lock("identification::mark_failed", self.config.max_lock_wait_ms, || {
                    discoveries::mark_failed(&self.db, discovery_id, &reason)
                })
                .await;
                if let Err(mark_err) = marked {
                    tracing::error!(discovery_id = %discovery_id, error = %mark_err, "Could not record failure");
                }

                DiscoveryOutcome::Failed(reason)
            }
        }
    }

    async fn try_process(&self, mut discovery: Discovery) -> ProcessingResult<DiscoveryOutcome> {
        // Phase 1: evidence and fingerprint
        let bundle = self.collect_evidence(&discovery).await?;
        let fingerprint = bundle.fingerprint();

        if self.is_unchanged(&discovery, &fingerprint) {
            discoveries::mark_processed(&self.db, discovery.id, discovery.mention_count).await?;
            tracing::debug!(discovery_id = %discovery.id, name = %discovery.name, "Evidence unchanged, skipping");
            return Ok(DiscoveryOutcome::Skipped);
        }

        let rejected_matches = self.rejection_constraints(&discovery);
        if !self.begin_enriching(&mut discovery, &fingerprint).await? {
            tracing::info!(discovery_id = %discovery.id, "Discovery promoted elsewhere, skipping");
            return Ok(DiscoveryOutcome::Skipped);
        }
        let (db_candidates, kb_candidates) = self.gather_candidates(&discovery).await;

        // Phase 2: verdict
        let request = self.build_request(&discovery, &bundle, db_candidates, kb_candidates, rejected_matches);
        let verdict = self.adjudicator.adjudicate(&request).await?;
        let verdict = self.post_process(&mut discovery, verdict).await;

        // Phase 3: resolution and outcome write
        self.resolve(discovery, &bundle, verdict).await
    }
}
