//! Settings database operations
//!
//! Key-value accessors over the `settings` table.

use chrono::{DateTime, Utc};
use sqlx::{Pool, Sqlite};
use ruinmap_common::{Error, Result};

const ANTHROPIC_API_KEY: &str = "anthropic_api_key";
const LAST_CYCLE_AT: &str = "last_identification_cycle_at";

/// Language-model API key stored in the database, if any
pub async fn get_anthropic_api_key(db: &Pool<Sqlite>) -> Result<Option<String>> {
    get_setting::<String>(db, ANTHROPIC_API_KEY).await
}

pub async fn set_anthropic_api_key(db: &Pool<Sqlite>, key: String) -> Result<()> {
    set_setting(db, ANTHROPIC_API_KEY, key).await
}

/// When the last identification cycle finished
pub async fn get_last_cycle_at(db: &Pool<Sqlite>) -> Result<Option<DateTime<Utc>>> {
    get_setting::<DateTime<Utc>>(db, LAST_CYCLE_AT).await
}

pub async fn set_last_cycle_at(db: &Pool<Sqlite>, at: DateTime<Utc>) -> Result<()> {
    set_setting(db, LAST_CYCLE_AT, at.to_rfc3339()).await
}

async fn get_setting<T>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await?;

    match row {
        Some((value,)) => value
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::Config(format!("Parse setting {} failed: {}", key, e))),
        None => Ok(None),
    }
}

async fn set_setting<T>(db: &Pool<Sqlite>, key: &str, value: T) -> Result<()>
where
    T: std::fmt::Display,
{
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db() -> Pool<Sqlite> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        ruinmap_common::db::init::create_settings_table(&pool)
            .await
            .unwrap();
        pool
    }

    #[tokio::test]
    async fn test_api_key_round_trip() {
        let db = setup_test_db().await;
        assert_eq!(get_anthropic_api_key(&db).await.unwrap(), None);

        set_anthropic_api_key(&db, "sk-one".to_string()).await.unwrap();
        set_anthropic_api_key(&db, "sk-two".to_string()).await.unwrap();
        assert_eq!(
            get_anthropic_api_key(&db).await.unwrap().as_deref(),
            Some("sk-two")
        );
    }

    #[tokio::test]
    async fn test_last_cycle_timestamp() {
        let db = setup_test_db().await;
        let at = Utc::now();
        set_last_cycle_at(&db, at).await.unwrap();

        let loaded = get_last_cycle_at(&db).await.unwrap().unwrap();
        assert_eq!(loaded.timestamp(), at.timestamp());
    }
}
