//! Inter-process bridge between the proxy adapter and the process that owns
//! the embedded engine.
//!
//! One typed request/response pair per contract method, plus two
//! host-metadata calls consumed for configuration display. The transport is
//! injected into the proxy; this module ships an in-process channel transport
//! whose serving loop answers requests one at a time, in arrival order.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::db::adapter::{DbAdapter, Row, SelectOptions};
use crate::error::StorageError;

/// One forwarded contract call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BridgeRequest {
    Query { sql: String, params: Vec<Value> },
    Select { table: String, options: SelectOptions },
    Insert { table: String, rows: Vec<Row> },
    Update { table: String, id: String, patch: Row },
    Delete { table: String, id: String },
    Rpc { name: String, params: Value },
    AppVersion,
    UserDataPath,
}

impl BridgeRequest {
    /// Channel name, for logs and transports that route by name.
    pub fn channel(&self) -> &'static str {
        match self {
            BridgeRequest::Query { .. } => "db:query",
            BridgeRequest::Select { .. } => "db:select",
            BridgeRequest::Insert { .. } => "db:insert",
            BridgeRequest::Update { .. } => "db:update",
            BridgeRequest::Delete { .. } => "db:delete",
            BridgeRequest::Rpc { .. } => "db:rpc",
            BridgeRequest::AppVersion => "app:getVersion",
            BridgeRequest::UserDataPath => "app:getUserDataPath",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum BridgeReply {
    Rows(Vec<Row>),
    Row(Row),
    Value(Value),
    Text(String),
    Unit,
}

/// The transport obligation: each call gets exactly one matching reply.
#[async_trait]
pub trait BridgeTransport: Send + Sync {
    async fn call(&self, request: BridgeRequest) -> Result<BridgeReply, StorageError>;
}

/// Metadata the host exposes over the `app:*` channels.
#[derive(Debug, Clone)]
pub struct HostInfo {
    pub app_version: String,
    pub user_data_path: PathBuf,
}

/// Host-side answerer: executes forwarded calls against the adapter that
/// actually owns the engine.
pub struct BridgeServer {
    adapter: Arc<dyn DbAdapter>,
    info: HostInfo,
}

impl BridgeServer {
    pub fn new(adapter: Arc<dyn DbAdapter>, info: HostInfo) -> Self {
        Self { adapter, info }
    }

    pub async fn handle(&self, request: BridgeRequest) -> Result<BridgeReply, StorageError> {
        debug!(channel = request.channel(), "bridge request");
        match request {
            BridgeRequest::Query { sql, params } => {
                let outcome = self.adapter.query(&sql, &params).await?;
                Ok(BridgeReply::Rows(outcome.value))
            }
            BridgeRequest::Select { table, options } => {
                Ok(BridgeReply::Rows(self.adapter.select(&table, options).await?))
            }
            BridgeRequest::Insert { table, rows } => {
                Ok(BridgeReply::Rows(self.adapter.insert(&table, rows).await?))
            }
            BridgeRequest::Update { table, id, patch } => {
                Ok(BridgeReply::Row(self.adapter.update(&table, &id, patch).await?))
            }
            BridgeRequest::Delete { table, id } => {
                self.adapter.delete(&table, &id).await?;
                Ok(BridgeReply::Unit)
            }
            BridgeRequest::Rpc { name, params } => {
                Ok(BridgeReply::Value(self.adapter.rpc(&name, params).await?))
            }
            BridgeRequest::AppVersion => Ok(BridgeReply::Text(self.info.app_version.clone())),
            BridgeRequest::UserDataPath => Ok(BridgeReply::Text(
                self.info.user_data_path.display().to_string(),
            )),
        }
    }

    /// Spawns the serving loop and returns the transport to hand to proxy
    /// adapters. Requests are answered strictly in arrival order; the loop
    /// ends when every transport clone is dropped.
    pub fn spawn(self) -> ChannelTransport {
        let (tx, mut rx) = mpsc::channel::<BridgeCall>(64);
        tokio::spawn(async move {
            while let Some((request, reply)) = rx.recv().await {
                let result = self.handle(request).await;
                let _ = reply.send(result);
            }
        });
        ChannelTransport { tx }
    }
}

type BridgeCall = (
    BridgeRequest,
    oneshot::Sender<Result<BridgeReply, StorageError>>,
);

/// In-process transport over a tokio channel. Cheap to clone; every clone
/// talks to the same serving loop.
#[derive(Clone)]
pub struct ChannelTransport {
    tx: mpsc::Sender<BridgeCall>,
}

#[async_trait]
impl BridgeTransport for ChannelTransport {
    async fn call(&self, request: BridgeRequest) -> Result<BridgeReply, StorageError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send((request, reply_tx))
            .await
            .map_err(|_| StorageError::BridgeUnavailable("bridge host is gone".to_string()))?;
        reply_rx.await.map_err(|_| {
            StorageError::BridgeUnavailable("bridge host dropped the reply".to_string())
        })?
    }
}
