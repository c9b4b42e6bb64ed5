//! Test Helper Utilities
//!
//! Temporary databases, seed data, and in-test fakes for the external
//! collaborators. Every fake counts its calls so tests can prove that a
//! run made none.

#![allow(dead_code)]

use async_trait::async_trait;
use ruinmap_common::names::normalize_name;
use ruinmap_curator::config::CuratorConfig;
use ruinmap_curator::db::{discoveries, evidence, sites};
use ruinmap_curator::models::{
    CanonicalSite, DbCandidate, Discovery, EvidenceItem, KbCandidate, MediaContext, Source,
};
use ruinmap_curator::services::{
    KbEntity, KbError, KnowledgeBase, LlmClient, LlmError, SimilarityIndex, SqliteSimilarityIndex,
};
use ruinmap_curator::Curator;
use sqlx::SqlitePool;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use uuid::Uuid;

pub const CURATION_SOURCE: &str = "ruinmap_curated";

/// Temporary database with the real schema and the curation source.
///
/// Returns (TempDir, SqlitePool); the TempDir must outlive the pool.
pub async fn create_test_db() -> (TempDir, SqlitePool) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test_ruinmap.db");
    let pool = ruinmap_curator::db::init_database_pool(&db_path, CURATION_SOURCE)
        .await
        .unwrap();
    (temp_dir, pool)
}

pub async fn seed_source(pool: &SqlitePool, id: &str, priority: i64, trusted: bool) {
    sites::upsert_source(
        pool,
        &Source {
            id: id.to_string(),
            name: format!("{} gazetteer", id),
            priority,
            trusted,
            is_curation: false,
        },
    )
    .await
    .unwrap();
}

pub async fn seed_site(pool: &SqlitePool, site: &CanonicalSite) {
    let mut conn = pool.acquire().await.unwrap();
    sites::insert_site(&mut conn, site).await.unwrap();
}

pub fn media(id: &str, title: &str) -> MediaContext {
    MediaContext {
        media_id: id.to_string(),
        title: Some(title.to_string()),
        description: None,
        tags: vec!["archaeology".to_string()],
    }
}

/// Raw evidence as the extraction collaborator stores it
pub async fn seed_evidence(pool: &SqlitePool, name: &str, fact: &str, media: Option<&MediaContext>) -> EvidenceItem {
    if let Some(media) = media {
        evidence::upsert_media(pool, media).await.unwrap();
    }
    let item = EvidenceItem::new(name, fact, media.map(|m| m.media_id.as_str()));
    evidence::insert_evidence(pool, &item).await.unwrap();
    item
}

/// Evidence filed straight under a Discovery, as the Matcher does for a
/// name no canonical record matched. Returns the Discovery id.
pub async fn file_mention(pool: &SqlitePool, name: &str, fact: &str, media: Option<&MediaContext>) -> Uuid {
    let item = seed_evidence(pool, name, fact, media).await;
    let discovery_id = discoveries::record_mention(pool, name).await.unwrap();
    evidence::mark_filed(pool, item.id, discovery_id).await.unwrap();
    discovery_id
}

pub async fn load_discovery(pool: &SqlitePool, id: Uuid) -> Discovery {
    discoveries::load_discovery(pool, id).await.unwrap().unwrap()
}

pub async fn count_curated_sites(pool: &SqlitePool, name: &str) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM sites WHERE source_id = ? AND name_normalized = ?")
        .bind(CURATION_SOURCE)
        .bind(normalize_name(name))
        .fetch_one(pool)
        .await
        .unwrap()
}

/// Knowledge base answering from fixed tables
#[derive(Default)]
pub struct FakeKnowledgeBase {
    searches: HashMap<String, Vec<KbCandidate>>,
    entities: HashMap<String, KbEntity>,
    country: Option<String>,
    unavailable: bool,
    calls: AtomicUsize,
}

impl FakeKnowledgeBase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call fails with a network error
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub fn with_search(mut self, name: &str, candidates: Vec<KbCandidate>) -> Self {
        self.searches.insert(normalize_name(name), candidates);
        self
    }

    pub fn with_entity(mut self, entity: KbEntity) -> Self {
        self.entities.insert(entity.id.clone(), entity);
        self
    }

    pub fn with_country(mut self, country: &str) -> Self {
        self.country = Some(country.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), KbError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable {
            return Err(KbError::Network("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl KnowledgeBase for FakeKnowledgeBase {
    async fn search(&self, name: &str, limit: usize) -> Result<Vec<KbCandidate>, KbError> {
        self.check()?;
        let mut found = self.searches.get(&normalize_name(name)).cloned().unwrap_or_default();
        found.truncate(limit);
        Ok(found)
    }

    async fn entity(&self, id: &str) -> Result<KbEntity, KbError> {
        self.check()?;
        self.entities
            .get(id)
            .cloned()
            .ok_or_else(|| KbError::NotFound(id.to_string()))
    }

    async fn country_at(&self, _lat: f64, _lon: f64) -> Result<Option<String>, KbError> {
        self.check()?;
        Ok(self.country.clone())
    }
}

pub fn kb_candidate(id: &str, label: &str, description: &str, has_page: bool) -> KbCandidate {
    KbCandidate {
        id: id.to_string(),
        label: label.to_string(),
        description: Some(description.to_string()),
        has_encyclopedia_page: has_page,
    }
}

/// Language model returning canned answers in order, recording prompts
pub struct ScriptedLlm {
    model: String,
    answers: Mutex<VecDeque<Result<String, LlmError>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new(model: &str, answers: Vec<&str>) -> Arc<Self> {
        Arc::new(Self {
            model: model.to_string(),
            answers: Mutex::new(answers.into_iter().map(|a| Ok(a.to_string())).collect()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn silent(model: &str) -> Arc<Self> {
        Self::new(model, vec![])
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompt(&self, index: usize) -> String {
        self.prompts.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn chat(&self, _system_prompt: &str, user_prompt: &str) -> Result<String, LlmError> {
        self.prompts.lock().unwrap().push(user_prompt.to_string());
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(LlmError::EmptyResponse))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// The SQLite index with a call counter
pub struct CountingIndex {
    inner: SqliteSimilarityIndex,
    calls: AtomicUsize,
}

impl CountingIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            inner: SqliteSimilarityIndex::new(pool),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SimilarityIndex for CountingIndex {
    async fn search(&self, name_normalized: &str, limit: usize, threshold: f64) -> ruinmap_common::Result<Vec<DbCandidate>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.search(name_normalized, limit, threshold).await
    }
}

/// Curator over a temporary database with fake collaborators
pub struct Harness {
    _dir: TempDir,
    pub pool: SqlitePool,
    pub curator: Curator,
    pub index: Arc<CountingIndex>,
    pub kb: Arc<FakeKnowledgeBase>,
    pub primary: Arc<ScriptedLlm>,
    pub reviewer: Arc<ScriptedLlm>,
}

impl Harness {
    pub async fn new(kb: FakeKnowledgeBase, primary: Vec<&str>, reviewer: Vec<&str>) -> Self {
        let (dir, pool) = create_test_db().await;
        Self::with_pool(dir, pool, kb, primary, reviewer)
    }

    pub fn with_pool(
        dir: TempDir,
        pool: SqlitePool,
        kb: FakeKnowledgeBase,
        primary: Vec<&str>,
        reviewer: Vec<&str>,
    ) -> Self {
        let index = Arc::new(CountingIndex::new(pool.clone()));
        let kb = Arc::new(kb);
        let primary = ScriptedLlm::new("primary-model", primary);
        let reviewer = ScriptedLlm::new("review-model", reviewer);
        let config = CuratorConfig {
            max_lock_wait_ms: 1000,
            ..CuratorConfig::default()
        };

        let curator = Curator::new(
            pool.clone(),
            config,
            index.clone(),
            kb.clone(),
            primary.clone(),
            reviewer.clone(),
        );

        Self {
            _dir: dir,
            pool,
            curator,
            index,
            kb,
            primary,
            reviewer,
        }
    }

    /// Calls made to any external collaborator so far
    pub fn external_calls(&self) -> usize {
        self.index.calls() + self.kb.calls() + self.primary.calls() + self.reviewer.calls()
    }
}
