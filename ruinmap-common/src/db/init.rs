//! Database initialization
//!
//! Opens (creating if needed) the shared SQLite database and creates every
//! table idempotently.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Open the database at `db_path`, creating file and schema if missing
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Set per connection, not once on the pool
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create all tables and indexes (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_settings_table(pool).await?;
    create_sources_table(pool).await?;
    create_sites_table(pool).await?;
    create_site_names_table(pool).await?;
    create_media_table(pool).await?;
    create_discoveries_table(pool).await?;
    create_evidence_table(pool).await?;

    info!("Database schema ready");
    Ok(())
}

pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn create_sources_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sources (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            priority INTEGER NOT NULL DEFAULT 100,
            trusted INTEGER NOT NULL DEFAULT 1,
            is_curation INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn create_sites_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sites (
            id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL REFERENCES sources(id),
            name TEXT NOT NULL,
            name_normalized TEXT NOT NULL,
            lat REAL,
            lon REAL,
            country TEXT,
            site_type TEXT,
            period_name TEXT,
            period_start INTEGER,
            description TEXT,
            thumbnail_url TEXT,
            wikidata_id TEXT,
            wikipedia_url TEXT,
            provenance TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sites_name_normalized ON sites(name_normalized)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sites_source ON sites(source_id)")
        .execute(pool)
        .await?;
    Ok(())
}

/// Name index: one `canonical` row per site plus any number of `alias` rows
pub async fn create_site_names_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS site_names (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            site_id TEXT NOT NULL REFERENCES sites(id),
            name TEXT NOT NULL,
            name_normalized TEXT NOT NULL,
            kind TEXT NOT NULL DEFAULT 'alias',
            UNIQUE(site_id, name_normalized)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_site_names_normalized ON site_names(name_normalized)",
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn create_media_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS media (
            id TEXT PRIMARY KEY,
            title TEXT,
            description TEXT,
            tags TEXT NOT NULL DEFAULT '[]'
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn create_discoveries_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS discoveries (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            name_normalized TEXT NOT NULL UNIQUE,
            mention_count INTEGER NOT NULL DEFAULT 1,
            processed_mentions INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'pending',
            score INTEGER NOT NULL DEFAULT 0,
            confirmed_name TEXT,
            lat REAL,
            lon REAL,
            country TEXT,
            site_type TEXT,
            period_name TEXT,
            period_start INTEGER,
            description TEXT,
            thumbnail_url TEXT,
            wikidata_id TEXT,
            wikipedia_url TEXT,
            site_id TEXT REFERENCES sites(id),
            evidence_hash TEXT,
            decision_log TEXT NOT NULL DEFAULT '[]',
            last_error TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_discoveries_status ON discoveries(status)")
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn create_evidence_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS evidence (
            id TEXT PRIMARY KEY,
            media_id TEXT REFERENCES media(id),
            timestamp_seconds INTEGER,
            extracted_name TEXT,
            name_folded TEXT,
            fact TEXT NOT NULL,
            site_id TEXT REFERENCES sites(id),
            discovery_id TEXT REFERENCES discoveries(id),
            unusable INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_evidence_name_folded ON evidence(name_folded)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_evidence_unlinked ON evidence(site_id, discovery_id)")
        .execute(pool)
        .await?;
    Ok(())
}
