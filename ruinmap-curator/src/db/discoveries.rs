//! Discovery persistence
//!
//! Every write refuses to touch a promoted row, so `promoted` stays final
//! even if a stale in-memory copy is saved.

use crate::db::sites::parse_uuid;
use crate::models::{DecisionLog, Discovery, DiscoveryStatus};
use chrono::{DateTime, Utc};
use ruinmap_common::names::normalize_name;
use ruinmap_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite, SqlitePool};
use uuid::Uuid;

const DISCOVERY_COLUMNS: &str = "id, name, name_normalized, mention_count, processed_mentions, \
     status, score, confirmed_name, lat, lon, country, site_type, period_name, period_start, \
     description, thumbnail_url, wikidata_id, wikipedia_url, site_id, evidence_hash, \
     decision_log, last_error, created_at, updated_at";

pub async fn insert_discovery<'e, E>(executor: E, discovery: &Discovery) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO discoveries (
            id, name, name_normalized, mention_count, processed_mentions, status, score,
            confirmed_name, lat, lon, country, site_type, period_name, period_start,
            description, thumbnail_url, wikidata_id, wikipedia_url, site_id, evidence_hash,
            decision_log, last_error, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(discovery.id.to_string())
    .bind(&discovery.name)
    .bind(&discovery.name_normalized)
    .bind(discovery.mention_count)
    .bind(discovery.processed_mentions)
    .bind(discovery.status.as_str())
    .bind(discovery.score)
    .bind(&discovery.confirmed_name)
    .bind(discovery.lat)
    .bind(discovery.lon)
    .bind(&discovery.country)
    .bind(&discovery.site_type)
    .bind(&discovery.period_name)
    .bind(discovery.period_start)
    .bind(&discovery.description)
    .bind(&discovery.thumbnail_url)
    .bind(&discovery.wikidata_id)
    .bind(&discovery.wikipedia_url)
    .bind(discovery.site_id.map(|id| id.to_string()))
    .bind(&discovery.evidence_hash)
    .bind(decision_log_json(&discovery.decisions)?)
    .bind(&discovery.last_error)
    .bind(discovery.created_at)
    .bind(discovery.updated_at)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn load_discovery<'e, E>(executor: E, id: Uuid) -> Result<Option<Discovery>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let query = format!("SELECT {} FROM discoveries WHERE id = ?", DISCOVERY_COLUMNS);
    let row = sqlx::query(&query)
        .bind(id.to_string())
        .fetch_optional(executor)
        .await?;

    row.map(|row| discovery_from_row(&row)).transpose()
}

pub async fn load_by_normalized_name<'e, E>(executor: E, name: &str) -> Result<Option<Discovery>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let query = format!("SELECT {} FROM discoveries WHERE name_normalized = ?", DISCOVERY_COLUMNS);
    let row = sqlx::query(&query)
        .bind(normalize_name(name))
        .fetch_optional(executor)
        .await?;

    row.map(|row| discovery_from_row(&row)).transpose()
}

/// Write back every mutable field.
///
/// Returns `false` when nothing was written because the row is already
/// promoted. The canonical link is never cleared or replaced once set.
pub async fn save_discovery<'e, E>(executor: E, discovery: &Discovery) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE discoveries SET
            status = ?, score = ?, processed_mentions = ?, confirmed_name = ?,
            lat = ?, lon = ?, country = ?, site_type = ?, period_name = ?, period_start = ?,
            description = ?, thumbnail_url = ?, wikidata_id = ?, wikipedia_url = ?,
            site_id = COALESCE(site_id, ?), evidence_hash = ?, decision_log = ?,
            last_error = ?, updated_at = ?
        WHERE id = ? AND status != 'promoted'
        "#,
    )
    .bind(discovery.status.as_str())
    .bind(discovery.score)
    .bind(discovery.processed_mentions)
    .bind(&discovery.confirmed_name)
    .bind(discovery.lat)
    .bind(discovery.lon)
    .bind(&discovery.country)
    .bind(&discovery.site_type)
    .bind(&discovery.period_name)
    .bind(discovery.period_start)
    .bind(&discovery.description)
    .bind(&discovery.thumbnail_url)
    .bind(&discovery.wikidata_id)
    .bind(&discovery.wikipedia_url)
    .bind(discovery.site_id.map(|id| id.to_string()))
    .bind(&discovery.evidence_hash)
    .bind(decision_log_json(&discovery.decisions)?)
    .bind(&discovery.last_error)
    .bind(Utc::now())
    .bind(discovery.id.to_string())
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// File one unmatched mention: create the Discovery or bump its mention count.
/// Returns the Discovery id.
pub async fn record_mention<'e, E>(executor: E, name: &str) -> Result<Uuid>
where
    E: Executor<'e, Database = Sqlite>,
{
    let fresh = Discovery::new(name);
    if fresh.name_normalized.is_empty() {
        return Err(Error::UnusableName(name.to_string()));
    }

    let id: String = sqlx::query_scalar(
        r#"
        INSERT INTO discoveries (
            id, name, name_normalized, mention_count, processed_mentions, status,
            decision_log, created_at, updated_at
        ) VALUES (?, ?, ?, 1, 0, 'pending', '[]', ?, ?)
        ON CONFLICT(name_normalized) DO UPDATE SET
            mention_count = mention_count + 1,
            updated_at = excluded.updated_at
        RETURNING id
        "#,
    )
    .bind(fresh.id.to_string())
    .bind(&fresh.name)
    .bind(&fresh.name_normalized)
    .bind(fresh.created_at)
    .bind(fresh.updated_at)
    .fetch_one(executor)
    .await?;

    parse_uuid(id)
}

/// Next drain batch, richest evidence first.
///
/// Unprocessed, curator-requeued and interrupted (`enriching`) Discoveries
/// are always eligible; settled ones only once new mentions arrived.
pub async fn select_batch<'e, E>(executor: E, limit: i64) -> Result<Vec<Discovery>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let query = format!(
        r#"
        SELECT {} FROM discoveries
        WHERE status IN ('pending', 'needs_review', 'enriching')
           OR (status IN ('matched', 'enriched', 'rejected', 'failed')
               AND mention_count > processed_mentions)
        ORDER BY mention_count DESC, created_at, id
        LIMIT ?
        "#,
        DISCOVERY_COLUMNS
    );
    let rows = sqlx::query(&query).bind(limit).fetch_all(executor).await?;
    rows.iter().map(discovery_from_row).collect()
}

/// Persist the processing marker before any external call
pub async fn mark_enriching<'e, E>(
    executor: E,
    id: Uuid,
    evidence_hash: &str,
    processed_mentions: i64,
) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE discoveries
        SET status = 'enriching', evidence_hash = ?, processed_mentions = ?,
            last_error = NULL, updated_at = ?
        WHERE id = ? AND status != 'promoted'
        "#,
    )
    .bind(evidence_hash)
    .bind(processed_mentions)
    .bind(Utc::now())
    .bind(id.to_string())
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Record the mention count seen by a run that changed nothing
pub async fn mark_processed<'e, E>(executor: E, id: Uuid, processed_mentions: i64) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("UPDATE discoveries SET processed_mentions = ? WHERE id = ? AND status != 'promoted'")
        .bind(processed_mentions)
        .bind(id.to_string())
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn mark_failed<'e, E>(executor: E, id: Uuid, reason: &str) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        UPDATE discoveries SET status = 'failed', last_error = ?, updated_at = ?
        WHERE id = ? AND status != 'promoted'
        "#,
    )
    .bind(reason)
    .bind(Utc::now())
    .bind(id.to_string())
    .execute(executor)
    .await?;
    Ok(())
}

/// Send a Discovery back for another identification pass.
///
/// Clears the stored fingerprint so the next cycle re-adjudicates even with
/// unchanged evidence. Returns `false` for a promoted Discovery and
/// [`Error::DiscoveryNotFound`] for an unknown id.
pub async fn requeue(pool: &SqlitePool, id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE discoveries SET status = 'needs_review', evidence_hash = NULL, updated_at = ?
        WHERE id = ? AND status != 'promoted'
        "#,
    )
    .bind(Utc::now())
    .bind(id.to_string())
    .execute(pool)
    .await?;
    if result.rows_affected() > 0 {
        return Ok(true);
    }

    let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM discoveries WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;
    match exists {
        Some(_) => Ok(false),
        None => Err(Error::DiscoveryNotFound(id)),
    }
}

/// Discovery count per status, for the CLI summary
pub async fn count_by_status<'e, E>(executor: E) -> Result<Vec<(DiscoveryStatus, i64)>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT status, COUNT(*) FROM discoveries GROUP BY status ORDER BY status")
            .fetch_all(executor)
            .await?;

    rows.into_iter()
        .map(|(status, count)| Ok((status.parse::<DiscoveryStatus>()?, count)))
        .collect()
}

fn decision_log_json(log: &DecisionLog) -> Result<String> {
    serde_json::to_string(log)
        .map_err(|e| Error::Internal(format!("Serialize decision log failed: {}", e)))
}

fn discovery_from_row(row: &SqliteRow) -> Result<Discovery> {
    let status: String = row.get("status");
    let site_id: Option<String> = row.get("site_id");
    let decision_log: String = row.get("decision_log");
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;

    Ok(Discovery {
        id: parse_uuid(row.get("id"))?,
        name: row.get("name"),
        name_normalized: row.get("name_normalized"),
        mention_count: row.get("mention_count"),
        processed_mentions: row.get("processed_mentions"),
        status: status.parse()?,
        score: row.get("score"),
        confirmed_name: row.get("confirmed_name"),
        lat: row.get("lat"),
        lon: row.get("lon"),
        country: row.get("country"),
        site_type: row.get("site_type"),
        period_name: row.get("period_name"),
        period_start: row.get("period_start"),
        description: row.get("description"),
        thumbnail_url: row.get("thumbnail_url"),
        wikidata_id: row.get("wikidata_id"),
        wikipedia_url: row.get("wikipedia_url"),
        site_id: site_id.map(parse_uuid).transpose()?,
        evidence_hash: row.get("evidence_hash"),
        // A corrupt log loses history, not the Discovery
        decisions: serde_json::from_str(&decision_log).unwrap_or_default(),
        last_error: row.get("last_error"),
        created_at,
        updated_at,
    })
}
