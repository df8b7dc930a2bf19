//! Embedded-engine adapter.
//!
//! Runs only inside the process that owns the database file. Every other
//! process reaches this engine through the bridge proxy, never through a
//! second direct connection.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::Value;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::{Column, Row as _, SqlitePool, TypeInfo, ValueRef};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::LocalConfig;
use crate::db::adapter::{
    BackendKind, DbAdapter, Outcome, Row, SelectOptions, TxCallback,
};
use crate::db::ensure_ident;
use crate::db::migrations::{
    AppliedMigration, MigrationMode, MigrationRegistry, MigrationReport,
};
use crate::error::StorageError;

/// A named SQL routine reachable through `rpc`.
///
/// The embedded engine has no procedural DDL, so "server-side" routines are
/// registered here instead: `sql` references parameters positionally (`?1`,
/// `?2`, ...) and `args` names them in that order.
#[derive(Debug, Clone)]
pub struct Routine {
    pub name: String,
    pub args: Vec<String>,
    pub sql: String,
}

const MIGRATION_TABLE_DDL: &str = r"
CREATE TABLE IF NOT EXISTS _migrations (
    version TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
);
";

/// Direct adapter over the embedded SQLite engine.
pub struct SqliteAdapter {
    database_url: String,
    routines: HashMap<String, Routine>,
    pool: tokio::sync::RwLock<Option<SqlitePool>>,
    /// Serializes `transaction` calls; the pool holds a single connection, so
    /// whatever runs between BEGIN and COMMIT joins that transaction.
    tx_lock: tokio::sync::Mutex<()>,
}

impl SqliteAdapter {
    pub fn new(config: &LocalConfig) -> Self {
        Self::with_routines(config, crate::db::catalog::default_routines())
    }

    pub fn with_routines(config: &LocalConfig, routines: Vec<Routine>) -> Self {
        Self {
            database_url: config.database_url.clone(),
            routines: routines
                .into_iter()
                .map(|r| (r.name.clone(), r))
                .collect(),
            pool: tokio::sync::RwLock::new(None),
            tx_lock: tokio::sync::Mutex::new(()),
        }
    }

    async fn pool(&self) -> Result<SqlitePool, StorageError> {
        self.pool
            .read()
            .await
            .clone()
            .ok_or(StorageError::NotInitialized)
    }

    async fn fetch(
        pool: &SqlitePool,
        sql: &str,
        params: &[Value],
    ) -> Result<Vec<Row>, StorageError> {
        let mut query = sqlx::query(sql);
        for value in params {
            query = bind_value(query, value);
        }
        let rows = query
            .fetch_all(pool)
            .await
            .map_err(|e| StorageError::query(sql, e))?;
        rows.iter().map(row_to_json).collect()
    }

    async fn exec(pool: &SqlitePool, sql: &str) -> Result<(), StorageError> {
        sqlx::query(sql)
            .execute(pool)
            .await
            .map_err(|e| StorageError::query(sql, e))?;
        Ok(())
    }

    /// The tracking table, in application order.
    pub async fn applied_migrations(&self) -> Result<Vec<AppliedMigration>, StorageError> {
        let pool = self.pool().await?;
        let sql = "SELECT version, name, applied_at FROM _migrations ORDER BY rowid";
        let rows = sqlx::query(sql)
            .fetch_all(&pool)
            .await
            .map_err(|e| StorageError::query(sql, e))?;

        rows.into_iter()
            .map(|row| {
                let applied_at: String = row.try_get("applied_at")?;
                let applied_at = chrono::DateTime::parse_from_rfc3339(&applied_at)
                    .map_err(|e| StorageError::query(sql, e))?
                    .with_timezone(&chrono::Utc);
                Ok(AppliedMigration {
                    version: row.try_get("version")?,
                    name: row.try_get("name")?,
                    applied_at,
                })
            })
            .collect()
    }
}

#[async_trait]
impl DbAdapter for SqliteAdapter {
    async fn initialize(&self) -> Result<(), StorageError> {
        let mut slot = self.pool.write().await;
        if slot.is_some() {
            return Ok(());
        }

        let connect_opts = SqliteConnectOptions::from_str(&self.database_url)
            .map_err(|e| StorageError::Configuration(format!("invalid database url: {e}")))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5))
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        // One connection: the engine has a single true owner, and the
        // transaction contract relies on statement affinity to it.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_opts)
            .await
            .map_err(|e| StorageError::Configuration(format!("db connect failed: {e}")))?;

        Self::exec(&pool, MIGRATION_TABLE_DDL).await?;

        info!(database_url = %self.database_url, "sqlite adapter initialized");
        *slot = Some(pool);
        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        if let Some(pool) = self.pool.write().await.take() {
            pool.close().await;
            info!("sqlite adapter closed");
        }
        Ok(())
    }

    fn backend(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn query(
        &self,
        sql: &str,
        params: &[Value],
    ) -> Result<Outcome<Vec<Row>>, StorageError> {
        let pool = self.pool().await?;
        debug!(sql, params = params.len(), "local query");
        Ok(Outcome::full(Self::fetch(&pool, sql, params).await?))
    }

    async fn select(
        &self,
        table: &str,
        options: SelectOptions,
    ) -> Result<Vec<Row>, StorageError> {
        let pool = self.pool().await?;
        let table = ensure_ident(table)?;

        let columns = match &options.columns {
            None => "*".to_string(),
            Some(cols) => {
                let mut quoted = Vec::with_capacity(cols.len());
                for c in cols {
                    quoted.push(ensure_ident(c)?.to_string());
                }
                quoted.join(", ")
            }
        };

        let mut sql = format!("SELECT {columns} FROM {table}");
        let mut params: Vec<Value> = Vec::new();

        if !options.filters.is_empty() {
            let mut predicates = Vec::with_capacity(options.filters.len());
            for (column, value) in &options.filters {
                predicates.push(format!("{} = ?", ensure_ident(column)?));
                params.push(value.clone());
            }
            sql.push_str(" WHERE ");
            sql.push_str(&predicates.join(" AND "));
        }

        if !options.order_by.is_empty() {
            let mut clauses = Vec::with_capacity(options.order_by.len());
            for order in &options.order_by {
                let direction = if order.ascending { "ASC" } else { "DESC" };
                clauses.push(format!("{} {direction}", ensure_ident(&order.column)?));
            }
            sql.push_str(" ORDER BY ");
            sql.push_str(&clauses.join(", "));
        }

        match (options.limit, options.offset) {
            (Some(limit), Some(offset)) => {
                sql.push_str(" LIMIT ? OFFSET ?");
                params.push(Value::from(limit));
                params.push(Value::from(offset));
            }
            (Some(limit), None) => {
                sql.push_str(" LIMIT ?");
                params.push(Value::from(limit));
            }
            // SQLite only accepts OFFSET after LIMIT; -1 means unbounded.
            (None, Some(offset)) => {
                sql.push_str(" LIMIT -1 OFFSET ?");
                params.push(Value::from(offset));
            }
            (None, None) => {}
        }

        Self::fetch(&pool, &sql, &params).await
    }

    async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>, StorageError> {
        let pool = self.pool().await?;
        let table = ensure_ident(table)?;

        if rows.is_empty() {
            return Ok(Vec::new());
        }

        // The engine has no uuid-generating column default; primary keys are
        // generated here when the caller did not supply one.
        let mut rows = rows;
        for row in &mut rows {
            if !row.contains_key("id") {
                row.insert("id".to_string(), Value::String(Uuid::new_v4().to_string()));
            }
        }

        let columns: Vec<String> = rows[0].keys().cloned().collect();
        for column in &columns {
            ensure_ident(column)?;
        }

        let placeholders = format!(
            "({})",
            columns.iter().map(|_| "?").collect::<Vec<_>>().join(", ")
        );
        let values_clause = vec![placeholders; rows.len()].join(", ");
        let sql = format!(
            "INSERT INTO {table} ({}) VALUES {values_clause} RETURNING *",
            columns.join(", ")
        );

        let mut params: Vec<Value> = Vec::with_capacity(rows.len() * columns.len());
        for row in &rows {
            for column in &columns {
                params.push(row.get(column).cloned().unwrap_or(Value::Null));
            }
        }

        Self::fetch(&pool, &sql, &params).await
    }

    async fn update(&self, table: &str, id: &str, patch: Row) -> Result<Row, StorageError> {
        let pool = self.pool().await?;
        let table = ensure_ident(table)?;

        // An empty patch degenerates to a read of the current row.
        if patch.is_empty() {
            let sql = format!("SELECT * FROM {table} WHERE id = ?");
            let mut rows =
                Self::fetch(&pool, &sql, &[Value::String(id.to_string())]).await?;
            return rows
                .pop()
                .ok_or_else(|| StorageError::query(sql, format!("no row with id {id}")));
        }

        let mut assignments = Vec::with_capacity(patch.len());
        let mut params: Vec<Value> = Vec::with_capacity(patch.len() + 1);
        for (column, value) in &patch {
            assignments.push(format!("{} = ?", ensure_ident(column)?));
            params.push(value.clone());
        }
        params.push(Value::String(id.to_string()));

        let sql = format!(
            "UPDATE {table} SET {} WHERE id = ? RETURNING *",
            assignments.join(", ")
        );

        let mut updated = Self::fetch(&pool, &sql, &params).await?;
        updated
            .pop()
            .ok_or_else(|| StorageError::query(sql, format!("no row with id {id}")))
    }

    async fn delete(&self, table: &str, id: &str) -> Result<(), StorageError> {
        let pool = self.pool().await?;
        let table = ensure_ident(table)?;

        // Idempotent: zero affected rows is success.
        let sql = format!("DELETE FROM {table} WHERE id = ?");
        sqlx::query(&sql)
            .bind(id)
            .execute(&pool)
            .await
            .map_err(|e| StorageError::query(&sql, e))?;
        Ok(())
    }

    async fn rpc(&self, name: &str, params: Value) -> Result<Value, StorageError> {
        let pool = self.pool().await?;

        let routine = self
            .routines
            .get(name)
            .ok_or_else(|| StorageError::query(name, "unknown routine"))?;

        let args = match &params {
            Value::Null => serde_json::Map::new(),
            Value::Object(map) => map.clone(),
            other => {
                return Err(StorageError::query(
                    name,
                    format!("rpc params must be an object, got {other}"),
                ));
            }
        };

        let bound: Vec<Value> = routine
            .args
            .iter()
            .map(|arg| args.get(arg).cloned().unwrap_or(Value::Null))
            .collect();

        debug!(routine = %name, "local rpc");
        let rows = Self::fetch(&pool, &routine.sql, &bound).await?;
        Ok(Value::Array(rows.into_iter().map(Value::Object).collect()))
    }

    async fn transaction(&self, callback: TxCallback) -> Result<Outcome<Value>, StorageError> {
        // Not reentrant: a transaction callback must not open another
        // transaction on the same adapter.
        let _guard = self.tx_lock.lock().await;
        let pool = self.pool().await?;

        Self::exec(&pool, "BEGIN").await?;
        match callback(self as &dyn DbAdapter).await {
            Ok(value) => {
                Self::exec(&pool, "COMMIT").await?;
                Ok(Outcome::full(value))
            }
            Err(error) => {
                // Surface the callback's error even if the rollback itself
                // fails; the rollback failure is logged by the driver.
                let _ = Self::exec(&pool, "ROLLBACK").await;
                Err(error)
            }
        }
    }

    async fn run_migrations(
        &self,
        registry: &MigrationRegistry,
    ) -> Result<MigrationReport, StorageError> {
        let pool = self.pool().await?;

        // Newest applied row by insertion order, not max version string.
        let current: Option<String> =
            sqlx::query_scalar("SELECT version FROM _migrations ORDER BY rowid DESC LIMIT 1")
                .fetch_optional(&pool)
                .await?;

        let pending = registry.pending_since(current.as_deref());
        let mut applied = Vec::with_capacity(pending.len());

        for migration in pending {
            info!(version = %migration.version, name = %migration.name, "applying migration");

            // One transaction per migration: the tracking table only ever
            // reflects what actually committed.
            let _guard = self.tx_lock.lock().await;
            Self::exec(&pool, "BEGIN").await?;

            let result = async {
                sqlx::raw_sql(&migration.sql)
                    .execute(&pool)
                    .await
                    .map_err(|e| StorageError::migration(&migration.version, e))?;
                sqlx::query("INSERT INTO _migrations (version, name) VALUES (?, ?)")
                    .bind(&migration.version)
                    .bind(&migration.name)
                    .execute(&pool)
                    .await
                    .map_err(|e| StorageError::migration(&migration.version, e))?;
                Ok::<(), StorageError>(())
            }
            .await;

            match result {
                Ok(()) => {
                    Self::exec(&pool, "COMMIT").await?;
                    applied.push(migration.version.clone());
                }
                Err(error) => {
                    let _ = Self::exec(&pool, "ROLLBACK").await;
                    return Err(error);
                }
            }
        }

        Ok(MigrationReport {
            applied,
            mode: MigrationMode::Direct,
        })
    }
}

fn bind_value<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, SqliteArguments<'q>>,
    value: &Value,
) -> sqlx::query::Query<'q, sqlx::Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else if let Some(f) = n.as_f64() {
                query.bind(f)
            } else {
                query.bind(n.to_string())
            }
        }
        Value::String(s) => query.bind(s.clone()),
        // Arrays and objects travel as JSON text; the schema stores them in
        // TEXT columns.
        other => query.bind(other.to_string()),
    }
}

fn row_to_json(row: &SqliteRow) -> Result<Row, StorageError> {
    let mut out = Row::new();
    for column in row.columns() {
        let index = column.ordinal();
        let raw = row.try_get_raw(index)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            match raw.type_info().name() {
                "INTEGER" | "BOOLEAN" => Value::from(row.try_get::<i64, _>(index)?),
                "REAL" => Value::from(row.try_get::<f64, _>(index)?),
                "BLOB" => Value::String(BASE64.encode(row.try_get::<Vec<u8>, _>(index)?)),
                _ => Value::String(row.try_get::<String, _>(index)?),
            }
        };
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}
