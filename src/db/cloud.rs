//! Cloud adapter over a PostgREST-style REST surface.
//!
//! Row operations map onto the server's native filtering primitives. The two
//! contract members this backend cannot honor natively (`query`,
//! `transaction`) execute best-effort and come back marked
//! `Fidelity::Degraded`; schema changes are delegated to a server-side
//! routine because no client gets to run DDL here.

use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::CloudConfig;
use crate::db::adapter::{
    BackendKind, DbAdapter, Outcome, Row, SelectOptions, TxCallback,
};
use crate::db::ensure_ident;
use crate::db::migrations::{MigrationMode, MigrationRegistry, MigrationReport};
use crate::error::{IsRetryable, StorageError};

const DEGRADED_QUERY: &str =
    "raw SQL is not natively supported on the cloud backend; delegated to the execute_sql routine";
const DEGRADED_TRANSACTION: &str =
    "transactions are not atomic on the cloud backend; executed without rollback";

#[derive(Clone)]
struct CloudState {
    client: reqwest::Client,
    base: Url,
}

pub struct CloudAdapter {
    config: CloudConfig,
    retry_policy: ExponentialBuilder,
    state: tokio::sync::RwLock<Option<CloudState>>,
}

impl CloudAdapter {
    pub fn new(config: CloudConfig) -> Self {
        let retry_policy = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(300))
            .with_max_times(2)
            .with_jitter();
        Self {
            config,
            retry_policy,
            state: tokio::sync::RwLock::new(None),
        }
    }

    async fn state(&self) -> Result<CloudState, StorageError> {
        self.state
            .read()
            .await
            .clone()
            .ok_or(StorageError::NotInitialized)
    }

    fn table_url(state: &CloudState, table: &str) -> Result<Url, StorageError> {
        Ok(state.base.join(&format!("rest/v1/{}", ensure_ident(table)?))?)
    }

    fn rpc_url(state: &CloudState, name: &str) -> Result<Url, StorageError> {
        Ok(state.base.join(&format!("rest/v1/rpc/{}", ensure_ident(name)?))?)
    }

    /// Renders an equality filter the way the server's query grammar wants it.
    fn filter_value(value: &Value) -> String {
        match value {
            Value::Null => "is.null".to_string(),
            Value::String(s) => format!("eq.{s}"),
            other => format!("eq.{other}"),
        }
    }

    async fn check(
        response: reqwest::Response,
        statement: &str,
    ) -> Result<reqwest::Response, StorageError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(StorageError::Query {
            statement: statement.to_string(),
            message: format!("{status}: {body}"),
        })
    }
}

#[async_trait]
impl DbAdapter for CloudAdapter {
    async fn initialize(&self) -> Result<(), StorageError> {
        let mut slot = self.state.write().await;
        if slot.is_some() {
            return Ok(());
        }

        if self.config.url.trim().is_empty() {
            return Err(StorageError::Configuration(
                "cloud.url is required for the cloud backend".to_string(),
            ));
        }
        if self.config.api_key.trim().is_empty() {
            return Err(StorageError::Configuration(
                "cloud.api_key is required for the cloud backend".to_string(),
            ));
        }

        let base = Url::parse(&self.config.url)
            .map_err(|e| StorageError::Configuration(format!("invalid cloud.url: {e}")))?;

        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&self.config.api_key)
            .map_err(|e| StorageError::Configuration(format!("invalid cloud.api_key: {e}")))?;
        headers.insert("apikey", key);
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.config.api_key))
            .map_err(|e| StorageError::Configuration(format!("invalid cloud.api_key: {e}")))?;
        headers.insert(AUTHORIZATION, bearer);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(self.config.request_timeout_secs))
            .build()?;

        // Handshake: the endpoint must be reachable. Any HTTP answer counts;
        // auth problems surface on the first real operation.
        let probe = base.join("rest/v1/")?;
        client.head(probe.clone()).send().await?;

        info!(url = %base, "cloud adapter initialized");
        *slot = Some(CloudState { client, base });
        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        if self.state.write().await.take().is_some() {
            info!("cloud adapter closed");
        }
        Ok(())
    }

    fn backend(&self) -> BackendKind {
        BackendKind::Cloud
    }

    async fn query(
        &self,
        sql: &str,
        params: &[Value],
    ) -> Result<Outcome<Vec<Row>>, StorageError> {
        self.state().await?;
        warn!(sql, "{DEGRADED_QUERY}");

        let result = self
            .rpc("execute_sql", json!({ "query": sql, "params": params }))
            .await?;

        let rows = match result {
            Value::Null => Vec::new(),
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::Object(row) => Ok(row),
                    other => Err(StorageError::query(
                        sql,
                        format!("execute_sql returned a non-row value: {other}"),
                    )),
                })
                .collect::<Result<Vec<Row>, StorageError>>()?,
            other => {
                return Err(StorageError::query(
                    sql,
                    format!("execute_sql returned a non-array result: {other}"),
                ));
            }
        };

        Ok(Outcome::degraded(rows, DEGRADED_QUERY))
    }

    async fn select(
        &self,
        table: &str,
        options: SelectOptions,
    ) -> Result<Vec<Row>, StorageError> {
        let state = self.state().await?;
        let mut url = Self::table_url(&state, table)?;

        {
            let mut pairs = url.query_pairs_mut();
            if let Some(columns) = &options.columns {
                pairs.append_pair("select", &columns.join(","));
            }
            for (column, value) in &options.filters {
                pairs.append_pair(column, &Self::filter_value(value));
            }
            if !options.order_by.is_empty() {
                let order = options
                    .order_by
                    .iter()
                    .map(|o| {
                        format!("{}.{}", o.column, if o.ascending { "asc" } else { "desc" })
                    })
                    .collect::<Vec<_>>()
                    .join(",");
                pairs.append_pair("order", &order);
            }
            if let Some(limit) = options.limit {
                pairs.append_pair("limit", &limit.to_string());
            }
            if let Some(offset) = options.offset {
                pairs.append_pair("offset", &offset.to_string());
            }
        }

        let statement = format!("GET {url}");
        debug!(%statement, "cloud select");

        let op = || {
            let client = state.client.clone();
            let url = url.clone();
            let statement = statement.clone();
            async move {
                let response = client.get(url).send().await?;
                let rows: Vec<Row> = Self::check(response, &statement).await?.json().await?;
                Ok::<_, StorageError>(rows)
            }
        };

        op.retry(&self.retry_policy)
            .when(|err: &StorageError| err.is_retryable())
            .notify(|err, dur| warn!(error = %err, "cloud select failed, retrying in {dur:?}"))
            .await
    }

    async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>, StorageError> {
        let state = self.state().await?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let url = Self::table_url(&state, table)?;
        let statement = format!("POST {url}");

        let response = state
            .client
            .post(url)
            .header("Prefer", "return=representation")
            .json(&rows)
            .send()
            .await?;
        Ok(Self::check(response, &statement).await?.json().await?)
    }

    async fn update(&self, table: &str, id: &str, patch: Row) -> Result<Row, StorageError> {
        let state = self.state().await?;
        let mut url = Self::table_url(&state, table)?;
        url.query_pairs_mut().append_pair("id", &format!("eq.{id}"));
        let statement = format!("PATCH {url}");

        let response = state
            .client
            .patch(url)
            .header("Prefer", "return=representation")
            .json(&patch)
            .send()
            .await?;
        let mut updated: Vec<Row> = Self::check(response, &statement).await?.json().await?;
        updated
            .pop()
            .ok_or_else(|| StorageError::query(statement, format!("no row with id {id}")))
    }

    async fn delete(&self, table: &str, id: &str) -> Result<(), StorageError> {
        let state = self.state().await?;
        let mut url = Self::table_url(&state, table)?;
        url.query_pairs_mut().append_pair("id", &format!("eq.{id}"));
        let statement = format!("DELETE {url}");

        // The server deletes whatever matches; a missing id matches nothing
        // and that is success.
        let response = state.client.delete(url).send().await?;
        Self::check(response, &statement).await?;
        Ok(())
    }

    async fn rpc(&self, name: &str, params: Value) -> Result<Value, StorageError> {
        let state = self.state().await?;
        let url = Self::rpc_url(&state, name)?;
        let statement = format!("POST {url}");
        debug!(routine = %name, "cloud rpc");

        let body = if params.is_null() { json!({}) } else { params };
        let response = state.client.post(url).json(&body).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(StorageError::Unsupported {
                backend: BackendKind::Cloud,
                operation: "rpc",
                detail: format!("server does not expose a {name} routine"),
            });
        }

        let response = Self::check(response, &statement).await?;
        if response.content_length() == Some(0) {
            return Ok(Value::Null);
        }
        Ok(response.json().await?)
    }

    async fn transaction(&self, callback: TxCallback) -> Result<Outcome<Value>, StorageError> {
        self.state().await?;
        // The signal comes first so operators can correlate any partial
        // writes that follow.
        warn!("{DEGRADED_TRANSACTION}");
        let value = callback(self as &dyn DbAdapter).await?;
        Ok(Outcome::degraded(value, DEGRADED_TRANSACTION))
    }

    async fn run_migrations(
        &self,
        registry: &MigrationRegistry,
    ) -> Result<MigrationReport, StorageError> {
        self.state().await?;

        // No direct DDL from here. The server's apply_migration routine owns
        // dedup and ordering; every catalogue entry is offered.
        let mut applied = Vec::with_capacity(registry.len());
        for migration in registry.all() {
            info!(version = %migration.version, name = %migration.name, "delegating migration");
            self.rpc(
                "apply_migration",
                json!({
                    "version": migration.version,
                    "name": migration.name,
                    "sql": migration.sql,
                }),
            )
            .await
            .map_err(|e| StorageError::migration(&migration.version, e))?;
            applied.push(migration.version.clone());
        }

        Ok(MigrationReport {
            applied,
            mode: MigrationMode::Delegated,
        })
    }
}
