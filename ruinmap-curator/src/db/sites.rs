//! Canonical record, name index and source persistence

use crate::models::{CanonicalSite, Source};
use chrono::{DateTime, Utc};
use ruinmap_common::names::normalize_name;
use ruinmap_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite, SqliteConnection};
use uuid::Uuid;

const SITE_COLUMNS: &str = "id, source_id, name, name_normalized, lat, lon, country, site_type, \
     period_name, period_start, description, thumbnail_url, wikidata_id, wikipedia_url, \
     provenance, created_at";

/// Canonical record reached by a Matcher step, with its source priority
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourcedMatch {
    pub site_id: Uuid,
    pub priority: i64,
}

/// One entry of the name index
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedName {
    pub site_id: Uuid,
    pub name: String,
    pub name_normalized: String,
}

/// Insert or update a source
pub async fn upsert_source<'e, E>(executor: E, source: &Source) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO sources (id, name, priority, trusted, is_curation)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            priority = excluded.priority,
            trusted = excluded.trusted,
            is_curation = excluded.is_curation
        "#,
    )
    .bind(&source.id)
    .bind(&source.name)
    .bind(source.priority)
    .bind(source.trusted)
    .bind(source.is_curation)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn load_source<'e, E>(executor: E, id: &str) -> Result<Option<Source>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query("SELECT id, name, priority, trusted, is_curation FROM sources WHERE id = ?")
        .bind(id)
        .fetch_optional(executor)
        .await?;

    Ok(row.map(|row| Source {
        id: row.get("id"),
        name: row.get("name"),
        priority: row.get("priority"),
        trusted: row.get("trusted"),
        is_curation: row.get("is_curation"),
    }))
}

/// Insert a canonical record and its canonical name-index row
pub async fn insert_site(conn: &mut SqliteConnection, site: &CanonicalSite) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO sites (
            id, source_id, name, name_normalized, lat, lon, country, site_type,
            period_name, period_start, description, thumbnail_url, wikidata_id,
            wikipedia_url, provenance, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(site.id.to_string())
    .bind(&site.source_id)
    .bind(&site.name)
    .bind(&site.name_normalized)
    .bind(site.lat)
    .bind(site.lon)
    .bind(&site.country)
    .bind(&site.site_type)
    .bind(&site.period_name)
    .bind(site.period_start)
    .bind(&site.description)
    .bind(&site.thumbnail_url)
    .bind(&site.wikidata_id)
    .bind(&site.wikipedia_url)
    .bind(site.provenance.to_string())
    .bind(site.created_at)
    .execute(&mut *conn)
    .await?;

    add_site_name(&mut *conn, site.id, &site.name, "canonical").await?;
    Ok(())
}

/// Add a name-index row; a name already indexed for the site is ignored
pub async fn add_site_name<'e, E>(executor: E, site_id: Uuid, name: &str, kind: &str) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let normalized = normalize_name(name);
    if normalized.is_empty() {
        return Ok(false);
    }

    let result = sqlx::query(
        r#"
        INSERT INTO site_names (site_id, name, name_normalized, kind)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(site_id, name_normalized) DO NOTHING
        "#,
    )
    .bind(site_id.to_string())
    .bind(name.trim())
    .bind(&normalized)
    .bind(kind)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn load_site<'e, E>(executor: E, id: Uuid) -> Result<Option<CanonicalSite>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let query = format!("SELECT {} FROM sites WHERE id = ?", SITE_COLUMNS);
    let row = sqlx::query(&query)
        .bind(id.to_string())
        .fetch_optional(executor)
        .await?;

    row.map(|row| site_from_row(&row)).transpose()
}

/// Like [`load_site`], but a missing record is [`Error::SiteNotFound`]
pub async fn require_site<'e, E>(executor: E, id: Uuid) -> Result<CanonicalSite>
where
    E: Executor<'e, Database = Sqlite>,
{
    load_site(executor, id).await?.ok_or(Error::SiteNotFound(id))
}

/// Records of one source sharing a normalized name (duplicate suppression)
pub async fn find_in_source_by_name<'e, E>(
    executor: E,
    source_id: &str,
    name_normalized: &str,
) -> Result<Vec<CanonicalSite>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let query = format!(
        "SELECT {} FROM sites WHERE source_id = ? AND name_normalized = ? ORDER BY created_at",
        SITE_COLUMNS
    );
    let rows = sqlx::query(&query)
        .bind(source_id)
        .bind(name_normalized)
        .fetch_all(executor)
        .await?;

    rows.iter().map(site_from_row).collect()
}

/// Trusted-source records whose normalized name equals `name_normalized`
pub async fn exact_matches<'e, E>(executor: E, name_normalized: &str) -> Result<Vec<SourcedMatch>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        r#"
        SELECT s.id, src.priority
        FROM sites s JOIN sources src ON src.id = s.source_id
        WHERE src.trusted = 1 AND s.name_normalized = ?
        "#,
    )
    .bind(name_normalized)
    .fetch_all(executor)
    .await?;

    rows.iter().map(sourced_match_from_row).collect()
}

/// Trusted-source records equal to `spaceless` once their spaces are removed
pub async fn spaceless_matches<'e, E>(executor: E, spaceless: &str) -> Result<Vec<SourcedMatch>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        r#"
        SELECT s.id, src.priority
        FROM sites s JOIN sources src ON src.id = s.source_id
        WHERE src.trusted = 1 AND replace(s.name_normalized, ' ', '') = ?
        "#,
    )
    .bind(spaceless)
    .fetch_all(executor)
    .await?;

    rows.iter().map(sourced_match_from_row).collect()
}

/// Trusted-source records owning an indexed name equal to `name_normalized`
pub async fn alias_matches<'e, E>(executor: E, name_normalized: &str) -> Result<Vec<SourcedMatch>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        r#"
        SELECT DISTINCT s.id, src.priority
        FROM site_names n
        JOIN sites s ON s.id = n.site_id
        JOIN sources src ON src.id = s.source_id
        WHERE src.trusted = 1 AND n.name_normalized = ?
        "#,
    )
    .bind(name_normalized)
    .fetch_all(executor)
    .await?;

    rows.iter().map(sourced_match_from_row).collect()
}

/// Trusted-source records whose normalized name contains `needle` and is at
/// most `max_len` characters long
pub async fn substring_matches<'e, E>(
    executor: E,
    needle: &str,
    max_len: i64,
) -> Result<Vec<SourcedMatch>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        r#"
        SELECT s.id, src.priority
        FROM sites s JOIN sources src ON src.id = s.source_id
        WHERE src.trusted = 1
          AND instr(s.name_normalized, ?) > 0
          AND length(s.name_normalized) <= ?
        "#,
    )
    .bind(needle)
    .bind(max_len)
    .fetch_all(executor)
    .await?;

    rows.iter().map(sourced_match_from_row).collect()
}

/// Every canonical and alias name (input of the similarity index adapter)
pub async fn load_name_index<'e, E>(executor: E) -> Result<Vec<IndexedName>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        r#"
        SELECT id AS site_id, name, name_normalized FROM sites
        UNION
        SELECT site_id, name, name_normalized FROM site_names
        "#,
    )
    .fetch_all(executor)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(IndexedName {
                site_id: parse_uuid(row.get("site_id"))?,
                name: row.get("name"),
                name_normalized: row.get("name_normalized"),
            })
        })
        .collect()
}

fn sourced_match_from_row(row: &SqliteRow) -> Result<SourcedMatch> {
    Ok(SourcedMatch {
        site_id: parse_uuid(row.get("id"))?,
        priority: row.get("priority"),
    })
}

fn site_from_row(row: &SqliteRow) -> Result<CanonicalSite> {
    let provenance: String = row.get("provenance");
    let created_at: DateTime<Utc> = row.try_get("created_at")?;

    Ok(CanonicalSite {
        id: parse_uuid(row.get("id"))?,
        source_id: row.get("source_id"),
        name: row.get("name"),
        name_normalized: row.get("name_normalized"),
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
        provenance: serde_json::from_str(&provenance)
            .map_err(|e| Error::CorruptValue(format!("Bad provenance JSON: {}", e)))?,
        created_at,
    })
}

pub(crate) fn parse_uuid(value: String) -> Result<Uuid> {
    Uuid::parse_str(&value).map_err(|e| Error::CorruptValue(format!("Invalid UUID '{}': {}", value, e)))
}
