//! Fuzzy candidate search over the canonical name index
//!
//! The engine only sees the [`SimilarityIndex`] trait. The SQLite adapter
//! scores every indexed name with Sørensen–Dice bigram similarity; the
//! threshold travels with each call and is never stored on the index.

use crate::db::sites;
use crate::models::DbCandidate;
use async_trait::async_trait;
use ruinmap_common::Result;
use sqlx::SqlitePool;
use std::collections::HashMap;
use uuid::Uuid;

#[async_trait]
pub trait SimilarityIndex: Send + Sync {
    /// Canonical records whose names score at least `threshold` against
    /// `name_normalized`, best first, at most `limit`
    async fn search(&self, name_normalized: &str, limit: usize, threshold: f64) -> Result<Vec<DbCandidate>>;
}

/// Similarity search against the `sites` + `site_names` tables.
///
/// Each search loads and scores the whole name index, so a call costs
/// O(N) in indexed names and the engine makes up to three per Discovery.
/// Fine for gazetteers of tens of thousands of names; larger datasets want
/// a trigram index behind the same trait.
pub struct SqliteSimilarityIndex {
    db: SqlitePool,
}

impl SqliteSimilarityIndex {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SimilarityIndex for SqliteSimilarityIndex {
    async fn search(&self, name_normalized: &str, limit: usize, threshold: f64) -> Result<Vec<DbCandidate>> {
        if name_normalized.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let index = sites::load_name_index(&self.db).await?;
        let ranked = rank(name_normalized, index.iter().map(|e| (e.site_id, e.name_normalized.as_str())), threshold);

        let mut conn = self.db.acquire().await?;
        let mut candidates = Vec::with_capacity(limit.min(ranked.len()));
        for (site_id, similarity) in ranked.into_iter().take(limit) {
            if let Some(site) = sites::load_site(&mut *conn, site_id).await? {
                candidates.push(DbCandidate {
                    id: site.id,
                    name: site.name,
                    country: site.country,
                    site_type: site.site_type,
                    similarity,
                });
            }
        }

        tracing::debug!(query = name_normalized, threshold, found = candidates.len(), "Similarity search");
        Ok(candidates)
    }
}

/// Best score per site, filtered by `threshold`, best first (ties by id)
fn rank<'a>(
    query: &str,
    names: impl Iterator<Item = (Uuid, &'a str)>,
    threshold: f64,
) -> Vec<(Uuid, f64)> {
    let mut best: HashMap<Uuid, f64> = HashMap::new();

    for (site_id, name) in names {
        // Whitespace is ignored by the bigram split, so spacing variants score 1.0
        let score = strsim::sorensen_dice(query, name);
        if score >= threshold {
            let entry = best.entry(site_id).or_insert(score);
            if score > *entry {
                *entry = score;
            }
        }
    }

    let mut ranked: Vec<(Uuid, f64)> = best.into_iter().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked
}
