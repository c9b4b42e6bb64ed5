//! ruinmap-curator library interface
//!
//! Exposes the curation pipeline for the binary and for integration tests.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{ProcessingError, ProcessingResult};

use crate::config::CuratorConfig;
use crate::services::{
    Adjudicator, AnthropicClient, EraCutoffPolicy, IdentificationEngine, KnowledgeBase, LlmClient, Matcher,
    PromotionGate, SimilarityIndex, SqliteSimilarityIndex, WikidataClient,
};
use ruinmap_common::{Error, Result};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

/// Matcher and identification engine over one database, with their
/// collaborators constructed once and shared
pub struct Curator {
    pub db: SqlitePool,
    pub config: CuratorConfig,
    pub matcher: Matcher,
    pub engine: IdentificationEngine,
}

impl Curator {
    /// Assemble from explicit collaborators
    pub fn new(
        db: SqlitePool,
        config: CuratorConfig,
        index: Arc<dyn SimilarityIndex>,
        kb: Arc<dyn KnowledgeBase>,
        primary: Arc<dyn LlmClient>,
        reviewer: Arc<dyn LlmClient>,
    ) -> Self {
        let policy = Arc::new(EraCutoffPolicy::new(
            config.old_world_cutoff_year,
            config.americas_cutoff_year,
        ));
        let gate = PromotionGate::new(
            policy,
            config.promotion_threshold,
            &config.curation_source_id,
            config.duplicate_radius_degrees,
        );
        let engine = IdentificationEngine::new(
            db.clone(),
            index,
            kb,
            Adjudicator::new(primary, reviewer),
            gate,
            config.clone(),
        );
        let matcher = Matcher::new(db.clone(), config.matcher_batch_size);

        Self {
            db,
            config,
            matcher,
            engine,
        }
    }

    /// Assemble with the SQLite similarity index, Wikidata and the Anthropic API
    pub fn with_remote_services(db: SqlitePool, config: CuratorConfig, api_key: String) -> Result<Self> {
        let llm_timeout = Duration::from_secs(config.llm_timeout_secs);
        let primary = AnthropicClient::new(api_key.clone(), &config.primary_model, llm_timeout)
            .map_err(|e| Error::Config(format!("Language model client: {}", e)))?;
        let reviewer = AnthropicClient::new(api_key, &config.review_model, llm_timeout)
            .map_err(|e| Error::Config(format!("Language model client: {}", e)))?;
        let kb = WikidataClient::new(Duration::from_secs(config.kb_timeout_secs), config.kb_rate_limit_ms)
            .map_err(|e| Error::Config(format!("Knowledge base client: {}", e)))?;
        let index = SqliteSimilarityIndex::new(db.clone());

        tracing::info!(
            primary = %config.primary_model,
            review = %config.review_model,
            "Remote services configured"
        );

        Ok(Self::new(
            db,
            config,
            Arc::new(index),
            Arc::new(kb),
            Arc::new(primary),
            Arc::new(reviewer),
        ))
    }
}
