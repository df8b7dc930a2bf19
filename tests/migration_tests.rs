use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::SystemTime;

use atelier_storage::StorageError;
use atelier_storage::config::LocalConfig;
use atelier_storage::db::{
    DbAdapter, Migration, MigrationMode, MigrationRegistry, SqliteAdapter,
};

fn temp_database_url(tag: &str) -> String {
    let mut hasher = DefaultHasher::new();
    SystemTime::now().hash(&mut hasher);
    tag.hash(&mut hasher);
    let path = std::env::temp_dir().join(format!("test_{tag}_{}.sqlite", hasher.finish()));
    format!("sqlite:{}", path.to_str().unwrap())
}

fn migration(version: &str, name: &str, sql: &str) -> Migration {
    Migration {
        version: version.to_string(),
        name: name.to_string(),
        sql: sql.to_string(),
    }
}

fn sample_catalogue() -> Vec<Migration> {
    vec![
        migration(
            "20250101_000000",
            "one",
            "CREATE TABLE one (id TEXT PRIMARY KEY NOT NULL);",
        ),
        migration(
            "20250102_000000",
            "two",
            "CREATE TABLE two (id TEXT PRIMARY KEY NOT NULL);",
        ),
        migration(
            "20250103_000000",
            "three",
            "CREATE TABLE three (id TEXT PRIMARY KEY NOT NULL);",
        ),
    ]
}

#[test]
fn registry_rejects_unordered_catalogues() {
    let result = MigrationRegistry::new(vec![
        migration("20250102_000000", "late", "SELECT 1;"),
        migration("20250101_000000", "early", "SELECT 1;"),
    ]);
    assert!(matches!(result, Err(StorageError::Configuration(_))));

    let duplicate = MigrationRegistry::new(vec![
        migration("20250101_000000", "a", "SELECT 1;"),
        migration("20250101_000000", "b", "SELECT 1;"),
    ]);
    assert!(duplicate.is_err());
}

#[test]
fn pending_selection_is_the_strict_suffix() {
    let registry = MigrationRegistry::new(sample_catalogue()).unwrap();

    let versions = |current: Option<&str>| -> Vec<&str> {
        registry
            .pending_since(current)
            .iter()
            .map(|m| m.version.as_str())
            .collect()
    };

    assert_eq!(
        versions(None),
        vec!["20250101_000000", "20250102_000000", "20250103_000000"],
        "a fresh install applies the whole catalogue"
    );
    assert_eq!(
        versions(Some("20250101_000000")),
        vec!["20250102_000000", "20250103_000000"]
    );
    assert_eq!(versions(Some("20250102_000000")), vec!["20250103_000000"]);
    assert_eq!(versions(Some("20250103_000000")), Vec::<&str>::new());

    // A current version between catalogue entries still selects the strict
    // suffix, and anything past the end selects nothing.
    assert_eq!(
        versions(Some("20250101_120000")),
        vec!["20250102_000000", "20250103_000000"]
    );
    assert_eq!(versions(Some("99999999_000000")), Vec::<&str>::new());
}

#[tokio::test]
async fn runner_applies_and_tracks_in_order() {
    let config = LocalConfig {
        database_url: temp_database_url("runner"),
    };
    let adapter = SqliteAdapter::new(&config);
    adapter.initialize().await.unwrap();

    let registry = MigrationRegistry::new(sample_catalogue()).unwrap();
    let report = adapter.run_migrations(&registry).await.unwrap();
    assert_eq!(report.mode, MigrationMode::Direct);
    assert_eq!(
        report.applied,
        vec!["20250101_000000", "20250102_000000", "20250103_000000"]
    );

    let tracked = adapter.applied_migrations().await.unwrap();
    assert_eq!(tracked.len(), 3);
    assert_eq!(tracked[0].version, "20250101_000000");
    assert_eq!(tracked[0].name, "one");
    assert_eq!(tracked[2].version, "20250103_000000");

    // Second run has nothing left to do.
    let rerun = adapter.run_migrations(&registry).await.unwrap();
    assert!(rerun.applied.is_empty());
}

#[tokio::test]
async fn runner_picks_up_where_it_left_off() {
    let config = LocalConfig {
        database_url: temp_database_url("resume"),
    };
    let adapter = SqliteAdapter::new(&config);
    adapter.initialize().await.unwrap();

    let first_ship = MigrationRegistry::new(sample_catalogue()[..1].to_vec()).unwrap();
    adapter.run_migrations(&first_ship).await.unwrap();

    let second_ship = MigrationRegistry::new(sample_catalogue()).unwrap();
    let report = adapter.run_migrations(&second_ship).await.unwrap();
    assert_eq!(report.applied, vec!["20250102_000000", "20250103_000000"]);
}

#[tokio::test]
async fn failed_migration_halts_and_keeps_tracking_consistent() {
    let config = LocalConfig {
        database_url: temp_database_url("failure"),
    };
    let adapter = SqliteAdapter::new(&config);
    adapter.initialize().await.unwrap();

    let registry = MigrationRegistry::new(vec![
        migration(
            "20250101_000000",
            "good",
            "CREATE TABLE survivors (id TEXT PRIMARY KEY NOT NULL);",
        ),
        migration(
            "20250102_000000",
            "bad",
            "CREATE TABLE partial (id TEXT PRIMARY KEY NOT NULL); THIS IS NOT SQL;",
        ),
        migration(
            "20250103_000000",
            "never_reached",
            "CREATE TABLE unreachable (id TEXT PRIMARY KEY NOT NULL);",
        ),
    ])
    .unwrap();

    let result = adapter.run_migrations(&registry).await;
    match result {
        Err(StorageError::Migration { version, .. }) => {
            assert_eq!(version, "20250102_000000");
        }
        other => panic!("expected a migration error, got {other:?}"),
    }

    // Only the migration that committed is tracked.
    let tracked = adapter.applied_migrations().await.unwrap();
    assert_eq!(tracked.len(), 1);
    assert_eq!(tracked[0].version, "20250101_000000");

    // The failed migration's partial work was rolled back with it.
    assert!(adapter.query("SELECT * FROM survivors", &[]).await.is_ok());
    assert!(adapter.query("SELECT * FROM partial", &[]).await.is_err());
    assert!(adapter.query("SELECT * FROM unreachable", &[]).await.is_err());
}
