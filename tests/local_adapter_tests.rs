use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::SystemTime;

use atelier_storage::StorageError;
use atelier_storage::config::LocalConfig;
use atelier_storage::db::{
    DbAdapter, OrderBy, Routine, Row, SelectOptions, SqliteAdapter, TxCallback, catalog,
};
use serde_json::{Value, json};

fn temp_database_url(tag: &str) -> String {
    let mut hasher = DefaultHasher::new();
    SystemTime::now().hash(&mut hasher);
    tag.hash(&mut hasher);
    let path = std::env::temp_dir().join(format!("test_{tag}_{}.sqlite", hasher.finish()));
    format!("sqlite:{}", path.to_str().unwrap())
}

fn row(value: Value) -> Row {
    value.as_object().expect("row literal must be an object").clone()
}

async fn migrated_adapter(tag: &str) -> SqliteAdapter {
    let config = LocalConfig {
        database_url: temp_database_url(tag),
    };
    let adapter = SqliteAdapter::new(&config);
    adapter.initialize().await.unwrap();
    adapter
        .run_migrations(&catalog::default_registry())
        .await
        .unwrap();
    adapter
}

#[tokio::test]
async fn initialize_is_idempotent() {
    let adapter = migrated_adapter("init_twice").await;
    adapter.initialize().await.unwrap();

    let rows = adapter
        .select("projects", SelectOptions::default())
        .await
        .unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn insert_select_round_trip() {
    let adapter = migrated_adapter("round_trip").await;

    let inserted = adapter
        .insert_one(
            "projects",
            row(json!({ "name": "Atelier Docs", "domain": "docs.example.com" })),
        )
        .await
        .unwrap();

    // Generated defaults come back with the canonical row.
    let id = inserted.get("id").and_then(Value::as_str).unwrap();
    assert!(!id.is_empty(), "expected a generated id");
    assert!(inserted.get("created_at").and_then(Value::as_str).is_some());

    let found = adapter
        .select("projects", SelectOptions::filter("id", id))
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get("name"), Some(&json!("Atelier Docs")));
    assert_eq!(found[0].get("domain"), Some(&json!("docs.example.com")));
}

#[tokio::test]
async fn bulk_insert_returns_all_rows() {
    let adapter = migrated_adapter("bulk_insert").await;

    let written = adapter
        .insert(
            "projects",
            vec![
                row(json!({ "name": "alpha" })),
                row(json!({ "name": "beta" })),
                row(json!({ "name": "gamma" })),
            ],
        )
        .await
        .unwrap();
    assert_eq!(written.len(), 3);

    let ids: Vec<&str> = written
        .iter()
        .map(|r| r.get("id").and_then(Value::as_str).unwrap())
        .collect();
    assert_eq!(ids.len(), 3);
    assert_ne!(ids[0], ids[1]);
}

#[tokio::test]
async fn select_honors_order_limit_offset_and_projection() {
    let adapter = migrated_adapter("select_options").await;

    for name in ["carol", "alice", "bob"] {
        adapter
            .insert_one("projects", row(json!({ "name": name, "domain": "x.test" })))
            .await
            .unwrap();
    }

    let options = SelectOptions {
        order_by: vec![OrderBy::desc("name")],
        limit: Some(2),
        offset: Some(1),
        ..SelectOptions::default()
    };
    let page = adapter.select("projects", options).await.unwrap();
    let names: Vec<&str> = page
        .iter()
        .map(|r| r.get("name").and_then(Value::as_str).unwrap())
        .collect();
    assert_eq!(names, vec!["bob", "alice"]);

    let projected = adapter
        .select(
            "projects",
            SelectOptions {
                columns: Some(vec!["id".to_string(), "name".to_string()]),
                ..SelectOptions::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(projected.len(), 3);
    assert!(projected[0].get("domain").is_none());
}

#[tokio::test]
async fn update_returns_post_update_row() {
    let adapter = migrated_adapter("update").await;

    let inserted = adapter
        .insert_one("projects", row(json!({ "name": "before" })))
        .await
        .unwrap();
    let id = inserted.get("id").and_then(Value::as_str).unwrap();

    let updated = adapter
        .update("projects", id, row(json!({ "name": "after" })))
        .await
        .unwrap();
    assert_eq!(updated.get("name"), Some(&json!("after")));
    assert_eq!(updated.get("id"), inserted.get("id"));

    let missing = adapter
        .update("projects", "no-such-id", row(json!({ "name": "x" })))
        .await;
    assert!(missing.is_err(), "updating a missing row must fail");
}

#[tokio::test]
async fn delete_is_idempotent() {
    let adapter = migrated_adapter("delete").await;

    let inserted = adapter
        .insert_one("projects", row(json!({ "name": "doomed" })))
        .await
        .unwrap();
    let id = inserted.get("id").and_then(Value::as_str).unwrap().to_string();

    adapter.delete("projects", &id).await.unwrap();
    adapter.delete("projects", &id).await.unwrap();
    adapter.delete("projects", "never-existed").await.unwrap();

    let rows = adapter
        .select("projects", SelectOptions::filter("id", id.as_str()))
        .await
        .unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn raw_query_is_full_fidelity() {
    let adapter = migrated_adapter("raw_query").await;

    adapter
        .insert_one("projects", row(json!({ "name": "raw", "domain": "raw.test" })))
        .await
        .unwrap();

    let outcome = adapter
        .query(
            "SELECT name FROM projects WHERE domain = ?",
            &[json!("raw.test")],
        )
        .await
        .unwrap();
    assert!(!outcome.is_degraded());
    assert_eq!(outcome.value.len(), 1);
    assert_eq!(outcome.value[0].get("name"), Some(&json!("raw")));
}

#[tokio::test]
async fn transaction_rolls_back_on_error() {
    let adapter = migrated_adapter("tx_rollback").await;

    let first = row(json!({ "name": "tx-one" }));
    let second = row(json!({ "name": "tx-two" }));
    let callback: TxCallback = Box::new(move |tx| {
        Box::pin(async move {
            tx.insert_one("projects", first).await?;
            tx.insert_one("projects", second).await?;
            Err(StorageError::Configuration("forced failure".to_string()))
        })
    });

    let result = adapter.transaction(callback).await;
    assert!(result.is_err());

    let rows = adapter
        .select("projects", SelectOptions::default())
        .await
        .unwrap();
    assert!(rows.is_empty(), "rollback must leave neither row visible");
}

#[tokio::test]
async fn transaction_commits_on_success() {
    let adapter = migrated_adapter("tx_commit").await;

    let first = row(json!({ "name": "tx-one" }));
    let second = row(json!({ "name": "tx-two" }));
    let callback: TxCallback = Box::new(move |tx| {
        Box::pin(async move {
            tx.insert_one("projects", first).await?;
            let written = tx.insert_one("projects", second).await?;
            Ok(Value::Object(written))
        })
    });

    let outcome = adapter.transaction(callback).await.unwrap();
    assert!(!outcome.is_degraded(), "local transactions are atomic");

    let rows = adapter
        .select("projects", SelectOptions::default())
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
}

#[tokio::test]
async fn rpc_runs_registered_routines() {
    let config = LocalConfig {
        database_url: temp_database_url("rpc_custom"),
    };
    let mut routines = catalog::default_routines();
    routines.push(Routine {
        name: "projects_by_domain".to_string(),
        args: vec!["domain".to_string()],
        sql: "SELECT * FROM projects WHERE domain = ?1 ORDER BY name".to_string(),
    });
    let adapter = SqliteAdapter::with_routines(&config, routines);
    adapter.initialize().await.unwrap();
    adapter
        .run_migrations(&catalog::default_registry())
        .await
        .unwrap();

    adapter
        .insert_one("projects", row(json!({ "name": "b", "domain": "d.test" })))
        .await
        .unwrap();
    adapter
        .insert_one("projects", row(json!({ "name": "a", "domain": "d.test" })))
        .await
        .unwrap();

    let result = adapter
        .rpc("projects_by_domain", json!({ "domain": "d.test" }))
        .await
        .unwrap();
    let rows = result.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("name"), Some(&json!("a")));

    let unknown = adapter.rpc("no_such_routine", json!({})).await;
    assert!(unknown.is_err());
}

#[tokio::test]
async fn resolve_theme_tokens_prefers_nearest_definition() {
    let adapter = migrated_adapter("theme_tokens").await;

    let project = adapter
        .insert_one("projects", row(json!({ "name": "themed" })))
        .await
        .unwrap();
    let project_id = project.get("id").and_then(Value::as_str).unwrap().to_string();

    let parent = adapter
        .insert_one(
            "design_themes",
            row(json!({ "project_id": project_id, "name": "base" })),
        )
        .await
        .unwrap();
    let parent_id = parent.get("id").and_then(Value::as_str).unwrap().to_string();

    let child = adapter
        .insert_one(
            "design_themes",
            row(json!({
                "project_id": project_id,
                "name": "dark",
                "parent_theme_id": parent_id,
            })),
        )
        .await
        .unwrap();
    let child_id = child.get("id").and_then(Value::as_str).unwrap().to_string();

    for (theme_id, name, value) in [
        (&parent_id, "color.primary", "#102030"),
        (&parent_id, "color.accent", "#ff8800"),
        (&child_id, "color.primary", "#0a0a0a"),
    ] {
        adapter
            .insert_one(
                "design_tokens",
                row(json!({
                    "project_id": project_id,
                    "theme_id": theme_id,
                    "name": name,
                    "type": "color",
                    "value": value,
                })),
            )
            .await
            .unwrap();
    }

    let resolved = adapter
        .rpc("resolve_theme_tokens", json!({ "theme_id": child_id }))
        .await
        .unwrap();
    let tokens = resolved.as_array().unwrap();
    assert_eq!(tokens.len(), 2);

    let primary = tokens
        .iter()
        .find(|t| t.get("name") == Some(&json!("color.primary")))
        .unwrap();
    assert_eq!(primary.get("value"), Some(&json!("#0a0a0a")));
    assert_eq!(primary.get("is_inherited"), Some(&json!(0)));

    let accent = tokens
        .iter()
        .find(|t| t.get("name") == Some(&json!("color.accent")))
        .unwrap();
    assert_eq!(accent.get("value"), Some(&json!("#ff8800")));
    assert_eq!(accent.get("is_inherited"), Some(&json!(1)));
}

#[tokio::test]
async fn closed_adapter_rejects_calls() {
    let adapter = migrated_adapter("closed").await;
    adapter.close().await.unwrap();

    let result = adapter.select("projects", SelectOptions::default()).await;
    assert!(matches!(result, Err(StorageError::NotInitialized)));

    // initialize() is the one call that must still work.
    adapter.initialize().await.unwrap();
    adapter
        .select("projects", SelectOptions::default())
        .await
        .unwrap();
}
