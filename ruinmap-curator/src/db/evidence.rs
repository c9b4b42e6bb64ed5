//! Evidence store access
//!
//! Evidence rows are produced upstream; this crate only reads them, sets
//! their canonical link, and marks which Discovery they were filed under.

use crate::db::sites::parse_uuid;
use crate::models::{EvidenceItem, MediaContext};
use chrono::Utc;
use ruinmap_common::names::fold_case;
use ruinmap_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite};
use uuid::Uuid;

const EVIDENCE_COLUMNS: &str =
    "id, media_id, timestamp_seconds, extracted_name, fact, site_id, discovery_id";

/// Insert or update a media record
pub async fn upsert_media<'e, E>(executor: E, media: &MediaContext) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let tags = serde_json::to_string(&media.tags).unwrap_or_else(|_| "[]".to_string());
    sqlx::query(
        r#"
        INSERT INTO media (id, title, description, tags) VALUES (?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            title = excluded.title,
            description = excluded.description,
            tags = excluded.tags
        "#,
    )
    .bind(&media.media_id)
    .bind(&media.title)
    .bind(&media.description)
    .bind(tags)
    .execute(executor)
    .await?;
    Ok(())
}

/// Store an evidence item (entry point for the extraction collaborator)
pub async fn insert_evidence<'e, E>(executor: E, item: &EvidenceItem) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO evidence (
            id, media_id, timestamp_seconds, extracted_name, name_folded, fact,
            site_id, discovery_id, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(item.id.to_string())
    .bind(&item.media_id)
    .bind(item.timestamp_seconds)
    .bind(&item.extracted_name)
    .bind(item.extracted_name.as_deref().map(fold_case))
    .bind(&item.fact)
    .bind(item.site_id.map(|id| id.to_string()))
    .bind(item.discovery_id.map(|id| id.to_string()))
    .bind(Utc::now())
    .execute(executor)
    .await?;
    Ok(())
}

/// Evidence with an extracted name, no canonical link, not yet filed or
/// set aside as unusable
pub async fn load_unresolved<'e, E>(executor: E, limit: i64) -> Result<Vec<EvidenceItem>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let query = format!(
        r#"
        SELECT {} FROM evidence
        WHERE extracted_name IS NOT NULL AND trim(extracted_name) != ''
          AND site_id IS NULL AND discovery_id IS NULL AND unusable = 0
        ORDER BY created_at, id
        LIMIT ?
        "#,
        EVIDENCE_COLUMNS
    );
    let rows = sqlx::query(&query).bind(limit).fetch_all(executor).await?;
    rows.iter().map(evidence_from_row).collect()
}

/// Every evidence item whose extracted name case-folds to `name_folded`
pub async fn load_for_folded_name<'e, E>(executor: E, name_folded: &str) -> Result<Vec<EvidenceItem>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let query = format!(
        "SELECT {} FROM evidence WHERE name_folded = ? ORDER BY created_at, id",
        EVIDENCE_COLUMNS
    );
    let rows = sqlx::query(&query).bind(name_folded).fetch_all(executor).await?;
    rows.iter().map(evidence_from_row).collect()
}

/// Media contexts of the evidence for `name_folded`, one per media
pub async fn load_media_for_folded_name<'e, E>(
    executor: E,
    name_folded: &str,
) -> Result<Vec<MediaContext>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        r#"
        SELECT DISTINCT m.id, m.title, m.description, m.tags
        FROM media m JOIN evidence e ON e.media_id = m.id
        WHERE e.name_folded = ?
        ORDER BY m.id
        "#,
    )
    .bind(name_folded)
    .fetch_all(executor)
    .await?;

    Ok(rows
        .iter()
        .map(|row| {
            let tags: String = row.get("tags");
            MediaContext {
                media_id: row.get("id"),
                title: row.get("title"),
                description: row.get("description"),
                tags: serde_json::from_str(&tags).unwrap_or_default(),
            }
        })
        .collect())
}

/// Set the canonical link of one evidence item
pub async fn link_to_site<'e, E>(executor: E, evidence_id: Uuid, site_id: Uuid) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("UPDATE evidence SET site_id = ? WHERE id = ? AND site_id IS NULL")
        .bind(site_id.to_string())
        .bind(evidence_id.to_string())
        .execute(executor)
        .await?;
    Ok(())
}

/// Link every still-unlinked evidence item for `name_folded`; returns rows linked
pub async fn link_unlinked_by_folded_name<'e, E>(
    executor: E,
    name_folded: &str,
    site_id: Uuid,
) -> Result<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("UPDATE evidence SET site_id = ? WHERE name_folded = ? AND site_id IS NULL")
        .bind(site_id.to_string())
        .bind(name_folded)
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}

/// Record the Discovery an unmatched evidence item was filed under
pub async fn mark_filed<'e, E>(executor: E, evidence_id: Uuid, discovery_id: Uuid) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("UPDATE evidence SET discovery_id = ? WHERE id = ?")
        .bind(discovery_id.to_string())
        .bind(evidence_id.to_string())
        .execute(executor)
        .await?;
    Ok(())
}

/// Set aside an item whose name cannot be matched or filed
pub async fn mark_unusable<'e, E>(executor: E, evidence_id: Uuid) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("UPDATE evidence SET unusable = 1 WHERE id = ?")
        .bind(evidence_id.to_string())
        .execute(executor)
        .await?;
    Ok(())
}

fn evidence_from_row(row: &SqliteRow) -> Result<EvidenceItem> {
    let site_id: Option<String> = row.get("site_id");
    let discovery_id: Option<String> = row.get("discovery_id");

    Ok(EvidenceItem {
        id: parse_uuid(row.get("id"))?,
        media_id: row.get("media_id"),
        timestamp_seconds: row.get("timestamp_seconds"),
        extracted_name: row.get("extracted_name"),
        fact: row.get("fact"),
        site_id: site_id.map(parse_uuid).transpose()?,
        discovery_id: discovery_id.map(parse_uuid).transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqlitePool;

    async fn setup_test_db() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        ruinmap_common::db::create_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_folded_lookup_is_case_insensitive_only() {
        let pool = setup_test_db().await;
        insert_evidence(&pool, &EvidenceItem::new("GÖBEKLI TEPE", "T-shaped pillars", None))
            .await
            .unwrap();
        insert_evidence(&pool, &EvidenceItem::new("Gobekli Tepe", "Pre-pottery Neolithic", None))
            .await
            .unwrap();

        let folded = load_for_folded_name(&pool, &fold_case("Göbekli Tepe")).await.unwrap();
        assert_eq!(folded.len(), 1);
        assert_eq!(folded[0].fact, "T-shaped pillars");
    }

    #[tokio::test]
    async fn test_media_deduplicated_per_name() {
        let pool = setup_test_db().await;
        upsert_media(
            &pool,
            &MediaContext {
                media_id: "vid-1".to_string(),
                title: Some("Lost cities".to_string()),
                description: None,
                tags: vec!["history".to_string()],
            },
        )
        .await
        .unwrap();
        for fact in ["one", "two"] {
            insert_evidence(&pool, &EvidenceItem::new("Knossos", fact, Some("vid-1")))
                .await
                .unwrap();
        }

        let media = load_media_for_folded_name(&pool, "knossos").await.unwrap();
        assert_eq!(media.len(), 1);
        assert_eq!(media[0].tags, vec!["history".to_string()]);
    }

    #[tokio::test]
    async fn test_unresolved_excludes_filed_items() {
        let pool = setup_test_db().await;
        let filed = EvidenceItem::new("Knossos", "Minoan", None);
        let open = EvidenceItem::new("Phaistos", "Disc", None);
        insert_evidence(&pool, &filed).await.unwrap();
        insert_evidence(&pool, &open).await.unwrap();
        insert_evidence(&pool, &EvidenceItem { extracted_name: None, ..EvidenceItem::new("", "no name", None) })
            .await
            .unwrap();

        // A discovery row is needed for the foreign key
        let discovery = crate::models::Discovery::new("Knossos");
        crate::db::discoveries::insert_discovery(&pool, &discovery).await.unwrap();
        mark_filed(&pool, filed.id, discovery.id).await.unwrap();

        let unresolved = load_unresolved(&pool, 10).await.unwrap();
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0].id, open.id);
    }

    #[tokio::test]
    async fn test_unresolved_excludes_unusable_items() {
        let pool = setup_test_db().await;
        let junk = EvidenceItem::new("--", "Dash", None);
        let open = EvidenceItem::new("Phaistos", "Disc", None);
        insert_evidence(&pool, &junk).await.unwrap();
        insert_evidence(&pool, &open).await.unwrap();

        mark_unusable(&pool, junk.id).await.unwrap();

        let unresolved = load_unresolved(&pool, 1).await.unwrap();
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0].id, open.id);
    }
}
