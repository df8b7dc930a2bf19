//! Storage backends behind one contract.
//!
//! Layout:
//! - `adapter.rs`: the `DbAdapter` contract and shared row/option types
//! - `local.rs`: direct embedded-engine adapter (host process only)
//! - `bridge.rs` / `proxy.rs`: the inter-process bridge and its adapter
//! - `cloud.rs`: REST-backed remote adapter
//! - `factory.rs`: backend selection and the memoized adapter slot
//! - `migrations.rs` / `catalog.rs`: versioned schema changes

pub mod adapter;
pub mod bridge;
pub mod catalog;
pub mod cloud;
pub mod factory;
pub mod local;
pub mod migrations;
pub mod proxy;

pub use adapter::{
    BackendKind, DbAdapter, Fidelity, OrderBy, Outcome, Row, SelectOptions, TxCallback,
};
pub use bridge::{
    BridgeReply, BridgeRequest, BridgeServer, BridgeTransport, ChannelTransport, HostInfo,
};
pub use cloud::CloudAdapter;
pub use factory::{AdapterFactory, EngineAccess};
pub use local::{Routine, SqliteAdapter};
pub use migrations::{
    AppliedMigration, Migration, MigrationMode, MigrationRegistry, MigrationReport,
};
pub use proxy::BridgeAdapter;

use crate::error::StorageError;

/// Validates a SQL/REST identifier (table, column, routine name). Values are
/// always bound; identifiers are the one thing that gets interpolated, so
/// they are restricted to `[A-Za-z_][A-Za-z0-9_]*`.
pub(crate) fn ensure_ident(name: &str) -> Result<&str, StorageError> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(name)
    } else {
        Err(StorageError::query(name, "invalid identifier"))
    }
}
