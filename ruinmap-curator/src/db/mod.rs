//! Database access for ruinmap-curator
//!
//! Shared SQLite database; the schema itself lives in `ruinmap_common::db`.

pub mod discoveries;
pub mod evidence;
pub mod settings;
pub mod sites;

use crate::models::Source;
use ruinmap_common::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Open the shared database and make sure the curation source exists
pub async fn init_database_pool(db_path: &Path, curation_source_id: &str) -> Result<SqlitePool> {
    let pool = ruinmap_common::db::init_database(db_path).await?;
    ensure_curation_source(&pool, curation_source_id).await?;
    Ok(pool)
}

/// Register the source that owns records created by promotion.
///
/// An existing row keeps its name and priority; only the flags are forced.
pub async fn ensure_curation_source(pool: &SqlitePool, id: &str) -> Result<()> {
    match sites::load_source(pool, id).await? {
        Some(mut source) => {
            if !(source.is_curation && source.trusted) {
                source.is_curation = true;
                source.trusted = true;
                sites::upsert_source(pool, &source).await?;
            }
        }
        None => {
            sites::upsert_source(
                pool,
                &Source {
                    id: id.to_string(),
                    name: "Curated from media mentions".to_string(),
                    priority: 50,
                    trusted: true,
                    is_curation: true,
                },
            )
            .await?;
            tracing::info!(source_id = id, "Registered curation source");
        }
    }
    Ok(())
}
