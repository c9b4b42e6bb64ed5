//! Configuration for ruinmap-curator
//!
//! Tuning comes from the `[curator]` table of the shared TOML file. The
//! language-model API key is resolved Database → ENV → TOML.

use ruinmap_common::config::TomlConfig;
use ruinmap_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use tracing::{info, warn};

/// Environment variable holding the language-model API key
pub const API_KEY_ENV: &str = "RUINMAP_ANTHROPIC_API_KEY";

/// `[curator]` table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CuratorConfig {
    /// Discoveries per identification cycle
    pub batch_size: i64,
    pub cycle_interval_secs: u64,
    /// Evidence items per Matcher pass
    pub matcher_batch_size: i64,
    pub similarity_threshold: f64,
    /// Stricter threshold for the re-search on a corrected name
    pub correction_similarity_threshold: f64,
    pub db_candidate_limit: usize,
    pub kb_candidate_limit: usize,
    pub max_facts: usize,
    pub max_media_contexts: usize,
    pub promotion_threshold: i64,
    pub duplicate_radius_degrees: f64,
    pub decision_log_limit: usize,
    pub curation_source_id: String,
    pub primary_model: String,
    pub review_model: String,
    pub llm_timeout_secs: u64,
    pub kb_timeout_secs: u64,
    pub kb_rate_limit_ms: u64,
    pub old_world_cutoff_year: i32,
    pub americas_cutoff_year: i32,
    /// Longest wait on a locked database before a write gives up
    pub max_lock_wait_ms: u64,
}

impl Default for CuratorConfig {
    fn default() -> Self {
        Self {
            batch_size: 20,
            cycle_interval_secs: 300,
            matcher_batch_size: 500,
            similarity_threshold: 0.35,
            correction_similarity_threshold: 0.6,
            db_candidate_limit: 10,
            kb_candidate_limit: 5,
            max_facts: 30,
            max_media_contexts: 5,
            promotion_threshold: 55,
            duplicate_radius_degrees: 0.5,
            decision_log_limit: 10,
            curation_source_id: "ruinmap_curated".to_string(),
            primary_model: "claude-3-5-haiku-latest".to_string(),
            review_model: "claude-sonnet-4-20250514".to_string(),
            llm_timeout_secs: 60,
            kb_timeout_secs: 30,
            kb_rate_limit_ms: 200,
            old_world_cutoff_year: 1500,
            americas_cutoff_year: 1600,
            max_lock_wait_ms: 5000,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct CuratorToml {
    #[serde(default)]
    curator: CuratorConfig,
}

/// Read the `[curator]` table; a missing file or table gives defaults
pub fn load_curator_config(path: &Path) -> Result<CuratorConfig> {
    if !path.exists() {
        return Ok(CuratorConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let parsed: CuratorToml = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;
    validate(&parsed.curator)?;
    Ok(parsed.curator)
}

fn validate(config: &CuratorConfig) -> Result<()> {
    if config.batch_size < 1 || config.matcher_batch_size < 1 {
        return Err(Error::Config("batch sizes must be at least 1".to_string()));
    }
    for (name, value) in [
        ("similarity_threshold", config.similarity_threshold),
        ("correction_similarity_threshold", config.correction_similarity_threshold),
    ] {
        if !(0.0..=1.0).contains(&value) {
            return Err(Error::Config(format!("{} must be within 0..=1, got {}", name, value)));
        }
    }
    if !(0..=100).contains(&config.promotion_threshold) {
        return Err(Error::Config(format!(
            "promotion_threshold must be within 0..=100, got {}",
            config.promotion_threshold
        )));
    }
    if config.curation_source_id.trim().is_empty() {
        return Err(Error::Config("curation_source_id must not be empty".to_string()));
    }
    Ok(())
}

/// Resolve the language-model API key.
///
/// **Priority:** Database → ENV → TOML. Several configured sources log a
/// warning; the highest one wins.
pub async fn resolve_anthropic_api_key(db: &Pool<Sqlite>, toml_config: &TomlConfig) -> Result<String> {
    let db_key = crate::db::settings::get_anthropic_api_key(db)
        .await?
        .filter(|k| is_valid_key(k));
    let env_key = std::env::var(API_KEY_ENV).ok().filter(|k| is_valid_key(k));
    let toml_key = toml_config
        .anthropic_api_key
        .clone()
        .filter(|k| is_valid_key(k));

    let sources: Vec<&str> = [
        db_key.as_ref().map(|_| "database"),
        env_key.as_ref().map(|_| "environment"),
        toml_key.as_ref().map(|_| "TOML"),
    ]
    .into_iter()
    .flatten()
    .collect();

    if sources.len() > 1 {
        warn!(
            "Anthropic API key found in multiple sources: {}. Using {} (highest priority).",
            sources.join(", "),
            sources[0]
        );
    }

    if let Some(key) = db_key {
        info!("Anthropic API key loaded from database");
        return Ok(key);
    }
    if let Some(key) = env_key {
        info!("Anthropic API key loaded from environment variable");
        return Ok(key);
    }
    if let Some(key) = toml_key {
        info!("Anthropic API key loaded from TOML config");
        return Ok(key);
    }

    Err(Error::Config(format!(
        "Anthropic API key not configured. Set one of:\n\
         1. Database: settings key 'anthropic_api_key'\n\
         2. Environment: {}=your-key\n\
         3. TOML config: anthropic_api_key = \"your-key\"",
        API_KEY_ENV
    )))
}

/// Non-empty, non-whitespace
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}
