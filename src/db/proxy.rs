//! Proxy adapter for processes without direct engine access.
//!
//! Same surface as the embedded adapter; every method body is one forwarded
//! bridge call. The real engine setup happened in the host process before
//! this process could ask, so `initialize` only verifies the bridge answers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::db::adapter::{
    BackendKind, DbAdapter, Outcome, Row, SelectOptions, TxCallback,
};
use crate::db::bridge::{BridgeReply, BridgeRequest, BridgeTransport};
use crate::db::migrations::{MigrationMode, MigrationRegistry, MigrationReport};
use crate::error::StorageError;

pub struct BridgeAdapter {
    transport: Arc<dyn BridgeTransport>,
    ready: AtomicBool,
    /// Serializes this process's transactions so two callbacks cannot
    /// interleave their BEGIN/COMMIT brackets on the host connection.
    tx_lock: tokio::sync::Mutex<()>,
}

impl BridgeAdapter {
    pub fn new(transport: Arc<dyn BridgeTransport>) -> Self {
        Self {
            transport,
            ready: AtomicBool::new(false),
            tx_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn ensure_ready(&self) -> Result<(), StorageError> {
        if self.ready.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StorageError::NotInitialized)
        }
    }

    async fn call(&self, request: BridgeRequest) -> Result<BridgeReply, StorageError> {
        self.ensure_ready()?;
        self.transport.call(request).await
    }

    async fn forward_query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, StorageError> {
        match self
            .call(BridgeRequest::Query {
                sql: sql.to_string(),
                params: params.to_vec(),
            })
            .await?
        {
            BridgeReply::Rows(rows) => Ok(rows),
            other => Err(unexpected_reply("db:query", &other)),
        }
    }

    /// Host application version, over the `app:getVersion` channel. Display
    /// metadata, not part of the storage contract.
    pub async fn app_version(&self) -> Result<String, StorageError> {
        match self.call(BridgeRequest::AppVersion).await? {
            BridgeReply::Text(version) => Ok(version),
            other => Err(unexpected_reply("app:getVersion", &other)),
        }
    }

    /// Host data directory, over the `app:getUserDataPath` channel.
    pub async fn user_data_path(&self) -> Result<String, StorageError> {
        match self.call(BridgeRequest::UserDataPath).await? {
            BridgeReply::Text(path) => Ok(path),
            other => Err(unexpected_reply("app:getUserDataPath", &other)),
        }
    }
}

#[async_trait]
impl DbAdapter for BridgeAdapter {
    async fn initialize(&self) -> Result<(), StorageError> {
        if self.ready.load(Ordering::Acquire) {
            return Ok(());
        }
        // Handshake only; no engine setup happens from this side.
        match self.transport.call(BridgeRequest::AppVersion).await? {
            BridgeReply::Text(version) => {
                info!(host_version = %version, "bridge adapter connected");
                self.ready.store(true, Ordering::Release);
                Ok(())
            }
            other => Err(unexpected_reply("app:getVersion", &other)),
        }
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.ready.store(false, Ordering::Release);
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
        Ok(Outcome::full(self.forward_query(sql, params).await?))
    }

    async fn select(
        &self,
        table: &str,
        options: SelectOptions,
    ) -> Result<Vec<Row>, StorageError> {
        match self
            .call(BridgeRequest::Select {
                table: table.to_string(),
                options,
            })
            .await?
        {
            BridgeReply::Rows(rows) => Ok(rows),
            other => Err(unexpected_reply("db:select", &other)),
        }
    }

    async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>, StorageError> {
        match self
            .call(BridgeRequest::Insert {
                table: table.to_string(),
                rows,
            })
            .await?
        {
            BridgeReply::Rows(rows) => Ok(rows),
            other => Err(unexpected_reply("db:insert", &other)),
        }
    }

    async fn update(&self, table: &str, id: &str, patch: Row) -> Result<Row, StorageError> {
        match self
            .call(BridgeRequest::Update {
                table: table.to_string(),
                id: id.to_string(),
                patch,
            })
            .await?
        {
            BridgeReply::Row(row) => Ok(row),
            other => Err(unexpected_reply("db:update", &other)),
        }
    }

    async fn delete(&self, table: &str, id: &str) -> Result<(), StorageError> {
        match self
            .call(BridgeRequest::Delete {
                table: table.to_string(),
                id: id.to_string(),
            })
            .await?
        {
            BridgeReply::Unit => Ok(()),
            other => Err(unexpected_reply("db:delete", &other)),
        }
    }

    async fn rpc(&self, name: &str, params: Value) -> Result<Value, StorageError> {
        match self
            .call(BridgeRequest::Rpc {
                name: name.to_string(),
                params,
            })
            .await?
        {
            BridgeReply::Value(value) => Ok(value),
            other => Err(unexpected_reply("db:rpc", &other)),
        }
    }

    async fn transaction(&self, callback: TxCallback) -> Result<Outcome<Value>, StorageError> {
        let _guard = self.tx_lock.lock().await;
        self.forward_query("BEGIN", &[]).await?;
        match callback(self as &dyn DbAdapter).await {
            Ok(value) => {
                self.forward_query("COMMIT", &[]).await?;
                Ok(Outcome::full(value))
            }
            Err(error) => {
                let _ = self.forward_query("ROLLBACK", &[]).await;
                Err(error)
            }
        }
    }

    async fn run_migrations(
        &self,
        _registry: &MigrationRegistry,
    ) -> Result<MigrationReport, StorageError> {
        self.ensure_ready()?;
        // Deliberate no-op: the host applied migrations once at startup;
        // re-running them from a dependent process would race the owner.
        warn!("run_migrations called on the bridge proxy; migrations are host-managed, skipping");
        Ok(MigrationReport {
            applied: Vec::new(),
            mode: MigrationMode::HostManaged,
        })
    }
}

fn unexpected_reply(channel: &str, reply: &BridgeReply) -> StorageError {
    StorageError::BridgeUnavailable(format!(
        "unexpected reply on {channel}: {reply:?}"
    ))
}
