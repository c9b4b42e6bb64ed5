//! Database initialization: file creation, connection settings, constraints

use ruinmap_common::db::init_database;
use tempfile::TempDir;

#[tokio::test]
async fn test_database_created_when_missing() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("ruinmap.db");
    assert!(!db_path.exists());

    let result = init_database(&db_path).await;
    assert!(result.is_ok(), "Database initialization failed: {:?}", result.err());
    assert!(db_path.exists(), "Database file was not created");
}

#[tokio::test]
async fn test_every_pooled_connection_enforces_foreign_keys() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("ruinmap.db")).await.unwrap();

    // Hold several connections at once so more than one gets opened
    let mut held = Vec::new();
    for _ in 0..3 {
        held.push(pool.acquire().await.unwrap());
    }
    for conn in held.iter_mut() {
        let enabled: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
            .fetch_one(&mut **conn)
            .await
            .unwrap();
        assert_eq!(enabled, 1);
    }

    let mode: String = sqlx::query_scalar("PRAGMA journal_mode")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(mode.to_lowercase(), "wal");
}

#[tokio::test]
async fn test_site_requires_known_source() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("ruinmap.db")).await.unwrap();

    let orphan = sqlx::query(
        "INSERT INTO sites (id, source_id, name, name_normalized, created_at) VALUES ('s1', 'nowhere', 'Troy', 'troy', '2024-01-01T00:00:00Z')",
    )
    .execute(&pool)
    .await;
    assert!(orphan.is_err(), "Site with unknown source was accepted");

    sqlx::query("INSERT INTO sources (id, name, priority) VALUES ('pleiades', 'Pleiades', 10)")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query(
        "INSERT INTO sites (id, source_id, name, name_normalized, created_at) VALUES ('s1', 'pleiades', 'Troy', 'troy', '2024-01-01T00:00:00Z')",
    )
    .execute(&pool)
    .await
    .unwrap();
}

#[tokio::test]
async fn test_one_discovery_per_normalized_name() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("ruinmap.db")).await.unwrap();

    let insert = "INSERT INTO discoveries (id, name, name_normalized, created_at, updated_at) VALUES (?, ?, 'sayburc', '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')";
    sqlx::query(insert).bind("d1").bind("Sayburc").execute(&pool).await.unwrap();
    let duplicate = sqlx::query(insert).bind("d2").bind("SAYBURC").execute(&pool).await;
    assert!(duplicate.is_err());
}
