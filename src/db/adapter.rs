//! The backend contract every adapter implements.
//!
//! Callers program against `dyn DbAdapter` and never learn which backend is
//! underneath, except through the typed `Fidelity` marker on the two
//! operations the cloud backend can only honor best-effort.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::migrations::{MigrationRegistry, MigrationReport};
use crate::error::StorageError;

/// One database row, as it travels through every backend and across the
/// bridge. Keys are column names.
pub type Row = serde_json::Map<String, Value>;

/// Which storage family serves an adapter's data.
///
/// The bridge proxy reports `Local`: its data lives in the host process's
/// embedded engine, one hop away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Local,
    Cloud,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Local => f.write_str("local"),
            BackendKind::Cloud => f.write_str("cloud"),
        }
    }
}

/// Ordering directive for `SelectOptions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBy {
    pub column: String,
    #[serde(default = "default_ascending")]
    pub ascending: bool,
}

impl OrderBy {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: true,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: false,
        }
    }
}

fn default_ascending() -> bool {
    true
}

/// Filtering/projection options for `select`.
///
/// `filters` is an equality conjunction (`a = x AND b = y`), not a general
/// expression language. Ordering across backends is only guaranteed when
/// `order_by` is given.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectOptions {
    /// Projected columns; `None` selects `*`.
    pub columns: Option<Vec<String>>,

    /// Equality predicates, ANDed together.
    #[serde(default)]
    pub filters: BTreeMap<String, Value>,

    #[serde(default)]
    pub order_by: Vec<OrderBy>,

    pub limit: Option<u32>,

    pub offset: Option<u32>,
}

impl SelectOptions {
    /// Shorthand for a single equality filter.
    pub fn filter(column: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut filters = BTreeMap::new();
        filters.insert(column.into(), value.into());
        Self {
            filters,
            ..Self::default()
        }
    }
}

/// Whether an operation ran with its full contract guarantee.
///
/// The cloud backend executes `query` and `transaction` best-effort; the
/// `Degraded` marker is how callers detect that programmatically instead of
/// scraping logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fidelity {
    Full,
    Degraded { reason: String },
}

/// An operation result tagged with the guarantee it ran under.
#[derive(Debug)]
pub struct Outcome<T> {
    pub value: T,
    pub fidelity: Fidelity,
}

impl<T> Outcome<T> {
    pub fn full(value: T) -> Self {
        Self {
            value,
            fidelity: Fidelity::Full,
        }
    }

    pub fn degraded(value: T, reason: impl Into<String>) -> Self {
        Self {
            value,
            fidelity: Fidelity::Degraded {
                reason: reason.into(),
            },
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self.fidelity, Fidelity::Degraded { .. })
    }
}

/// Transaction body. Receives a handle that behaves like the adapter itself;
/// on the local family every statement issued through it joins the open
/// transaction.
pub type TxCallback =
    Box<dyn for<'a> FnOnce(&'a dyn DbAdapter) -> BoxFuture<'a, Result<Value, StorageError>> + Send>;

/// The uniform storage contract.
///
/// All methods may suspend on disk or network IO. Calling any data method
/// before `initialize()` (or after `close()`) fails with `NotInitialized`.
#[async_trait]
pub trait DbAdapter: Send + Sync {
    /// Idempotent; a second call on an initialized adapter is a no-op.
    async fn initialize(&self) -> Result<(), StorageError>;

    /// Releases the underlying resources.
    async fn close(&self) -> Result<(), StorageError>;

    fn backend(&self) -> BackendKind;

    /// Arbitrary parameterized SQL. Native on the local family; on the cloud
    /// backend this goes through the server's `execute_sql` escape hatch and
    /// the outcome is marked `Degraded`.
    async fn query(
        &self,
        sql: &str,
        params: &[Value],
    ) -> Result<Outcome<Vec<Row>>, StorageError>;

    /// Equality-filtered read. Row sets are equal across backends for the
    /// same data and options.
    async fn select(&self, table: &str, options: SelectOptions)
    -> Result<Vec<Row>, StorageError>;

    /// Bulk insert in one round trip; returns the canonical written rows,
    /// including generated defaults.
    async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>, StorageError>;

    async fn insert_one(&self, table: &str, row: Row) -> Result<Row, StorageError> {
        let mut rows = self.insert(table, vec![row]).await?;
        rows.pop()
            .ok_or_else(|| StorageError::query(format!("INSERT INTO {table}"), "no row returned"))
    }

    /// Single-row update by primary key; returns the post-update row.
    async fn update(&self, table: &str, id: &str, patch: Row) -> Result<Row, StorageError>;

    /// Single-row delete by primary key. Deleting a missing id succeeds.
    async fn delete(&self, table: &str, id: &str) -> Result<(), StorageError>;

    /// Invokes a named server-side routine. The only fully portable way to
    /// run backend-specific logic.
    async fn rpc(&self, name: &str, params: Value) -> Result<Value, StorageError>;

    /// Runs `callback` against a handle that behaves like the adapter.
    /// Atomic (BEGIN/COMMIT/ROLLBACK) on the local family; best-effort and
    /// `Degraded` on cloud.
    async fn transaction(&self, callback: TxCallback) -> Result<Outcome<Value>, StorageError>;

    /// Applies all not-yet-applied migrations in ascending version order.
    async fn run_migrations(
        &self,
        registry: &MigrationRegistry,
    ) -> Result<MigrationReport, StorageError>;
}
