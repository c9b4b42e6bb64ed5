//! API key resolution priority: database, then environment, then TOML

mod helpers;

use helpers::create_test_db;
use ruinmap_common::config::TomlConfig;
use ruinmap_common::Error;
use ruinmap_curator::config::{load_curator_config, resolve_anthropic_api_key, API_KEY_ENV};
use ruinmap_curator::db::settings;
use serial_test::serial;

fn toml_with_key(key: Option<&str>) -> TomlConfig {
    TomlConfig {
        anthropic_api_key: key.map(str::to_string),
        ..TomlConfig::default()
    }
}

#[tokio::test]
#[serial]
async fn test_database_key_wins() {
    let (_dir, pool) = create_test_db().await;
    settings::set_anthropic_api_key(&pool, "db-key".to_string()).await.unwrap();
    std::env::set_var(API_KEY_ENV, "env-key");

    let key = resolve_anthropic_api_key(&pool, &toml_with_key(Some("toml-key"))).await.unwrap();
    assert_eq!(key, "db-key");

    std::env::remove_var(API_KEY_ENV);
}

#[tokio::test]
#[serial]
async fn test_environment_beats_toml() {
    let (_dir, pool) = create_test_db().await;
    std::env::set_var(API_KEY_ENV, "env-key");

    let key = resolve_anthropic_api_key(&pool, &toml_with_key(Some("toml-key"))).await.unwrap();
    assert_eq!(key, "env-key");

    std::env::remove_var(API_KEY_ENV);
}

#[tokio::test]
#[serial]
async fn test_toml_key_used_last() {
    let (_dir, pool) = create_test_db().await;
    std::env::remove_var(API_KEY_ENV);

    let key = resolve_anthropic_api_key(&pool, &toml_with_key(Some("toml-key"))).await.unwrap();
    assert_eq!(key, "toml-key");
}

#[tokio::test]
#[serial]
async fn test_blank_keys_are_ignored() {
    let (_dir, pool) = create_test_db().await;
    settings::set_anthropic_api_key(&pool, "   ".to_string()).await.unwrap();
    std::env::set_var(API_KEY_ENV, "");

    let result = resolve_anthropic_api_key(&pool, &toml_with_key(None)).await;
    assert!(matches!(result, Err(Error::Config(_))));

    std::env::remove_var(API_KEY_ENV);
}

#[test]
fn test_curator_table_read_from_shared_file() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
root_folder = "/srv/ruinmap"
anthropic_api_key = "toml-key"

[logging]
level = "debug"

[curator]
batch_size = 5
promotion_threshold = 70
primary_model = "small-model"
"#,
    )
    .unwrap();

    let config = load_curator_config(&path).unwrap();
    assert_eq!(config.batch_size, 5);
    assert_eq!(config.promotion_threshold, 70);
    assert_eq!(config.primary_model, "small-model");
    assert_eq!(config.decision_log_limit, 10);

    let shared = ruinmap_common::config::load_toml_config(&path).unwrap();
    assert_eq!(shared.logging.level, "debug");
    assert_eq!(shared.anthropic_api_key.as_deref(), Some("toml-key"));
}
