//! Pooled statement execution.

use std::time::Duration;

use deadpool_postgres::{Config as PoolConfig, ManagerConfig, Pool, RecyclingMethod, Runtime};
use qd_domain::config::DatabaseConfig;
use qd_domain::error::{Error, Result};
use qd_domain::query::{ColumnMeta, QueryParams, QueryRequest, QueryResult, Scalar};
use tokio_postgres::{GenericClient, NoTls};

use crate::convert::{row_to_json, scalar_to_param, PgParam};
use crate::placeholders::{bind_named, rewrite_named};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Executor trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Connection pool occupancy, reported by `/health`.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct PoolStats {
    pub max_size: usize,
    pub size: usize,
    pub available: usize,
}

/// Runs one statement and returns its rows.
///
/// Implementations do not filter statements; callers run a
/// [`QueryGuard`](crate::QueryGuard) first.
#[async_trait::async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, request: &QueryRequest) -> Result<QueryResult>;

    fn pool_stats(&self) -> Option<PoolStats> {
        None
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PostgreSQL
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct PgExecutor {
    pool: Pool,
    read_only: bool,
}

impl PgExecutor {
    /// Build a pool from config. Connections are opened lazily.
    pub fn from_config(cfg: &DatabaseConfig) -> Result<Self> {
        let url = cfg.resolve_url().ok_or_else(|| {
            Error::Config(format!(
                "no database URL: set database.url or the {} environment variable",
                cfg.url_env
            ))
        })?;

        let timeout = Duration::from_millis(cfg.connect_timeout_ms);
        let mut pool_cfg = PoolConfig::new();
        pool_cfg.url = Some(url);
        pool_cfg.connect_timeout = Some(timeout);
        pool_cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        let mut limits = deadpool_postgres::PoolConfig::new(cfg.pool_size);
        limits.timeouts.wait = Some(timeout);
        limits.timeouts.create = Some(timeout);
        pool_cfg.pool = Some(limits);

        let pool = pool_cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| Error::Config(format!("failed to create database pool: {e}")))?;

        tracing::info!(
            pool_size = cfg.pool_size,
            read_only = cfg.read_only_transactions,
            "database pool created"
        );
        Ok(Self::new(pool, cfg.read_only_transactions))
    }

    pub fn new(pool: Pool, read_only: bool) -> Self {
        Self { pool, read_only }
    }
}

#[async_trait::async_trait]
impl QueryExecutor for PgExecutor {
    async fn execute(&self, request: &QueryRequest) -> Result<QueryResult> {
        let (sql, values) = prepare_binding(request)?;

        tracing::debug!(sql = %sql, params = values.len(), "executing statement");

        // Checked out for this statement only; dropping the object returns
        // it to the pool on every path, and an unfinished transaction
        // rolls back on drop.
        let mut client = self
            .pool
            .get()
            .await
            .map_err(|e| Error::database(&request.statement, format!("no connection: {e}")))?;

        if self.read_only {
            let txn = client
                .build_transaction()
                .read_only(true)
                .start()
                .await
                .map_err(|e| Error::database(&request.statement, describe_pg_error(&e)))?;
            let pg_txn: &tokio_postgres::Transaction<'_> = &txn;
            let result = run_statement(pg_txn, &request.statement, &sql, &values).await?;
            txn.commit()
                .await
                .map_err(|e| Error::database(&request.statement, describe_pg_error(&e)))?;
            Ok(result)
        } else {
            let pg_client: &tokio_postgres::Client = &client;
            run_statement(pg_client, &request.statement, &sql, &values).await
        }
    }

    fn pool_stats(&self) -> Option<PoolStats> {
        let status = self.pool.status();
        Some(PoolStats {
            max_size: status.max_size,
            size: status.size,
            available: status.available,
        })
    }
}

/// Rewrite named placeholders and resolve the values to bind, in marker
/// order.
pub fn prepare_binding(request: &QueryRequest) -> Result<(String, Vec<&Scalar>)> {
    match &request.params {
        QueryParams::Named(params) => {
            let rewritten = rewrite_named(&request.statement);
            let values = bind_named(&rewritten.names, params)?;
            Ok((rewritten.sql, values))
        }
        QueryParams::Positional(values) => Ok((request.statement.clone(), values.iter().collect())),
    }
}

async fn run_statement<C: GenericClient>(
    client: &C,
    original: &str,
    sql: &str,
    values: &[&Scalar],
) -> Result<QueryResult> {
    let stmt = client
        .prepare(sql)
        .await
        .map_err(|e| Error::database(original, describe_pg_error(&e)))?;

    let expected = stmt.params().len();
    if expected != values.len() {
        return Err(Error::Validation(format!(
            "statement expects {expected} parameter(s), got {}",
            values.len()
        )));
    }

    let params: Vec<PgParam> = stmt
        .params()
        .iter()
        .zip(values)
        .enumerate()
        .map(|(i, (ty, value))| scalar_to_param(value, ty, i + 1))
        .collect::<Result<_>>()?;
    let refs: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> =
        params.iter().map(PgParam::as_tosql).collect();

    let rows = client
        .query(&stmt, &refs)
        .await
        .map_err(|e| Error::database(original, describe_pg_error(&e)))?;

    let columns = stmt
        .columns()
        .iter()
        .map(|c| ColumnMeta {
            name: c.name().to_string(),
            type_name: c.type_().name().to_string(),
        })
        .collect();
    let rows: Vec<_> = rows.iter().map(row_to_json).collect();

    Ok(QueryResult {
        columns,
        row_count: rows.len(),
        rows,
        truncated: false,
    })
}

/// Server-side message, detail, and hint when available, else the
/// driver's own description.
fn describe_pg_error(e: &tokio_postgres::Error) -> String {
    match e.as_db_error() {
        Some(db) => {
            let mut msg = format!("{}: {}", db.severity(), db.message());
            if let Some(detail) = db.detail() {
                msg.push_str(&format!(" ({detail})"));
            }
            if let Some(hint) = db.hint() {
                msg.push_str(&format!(" hint: {hint}"));
            }
            msg
        }
        None => e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn named_binding_follows_markers() {
        let mut params = BTreeMap::new();
        params.insert("status".to_string(), Scalar::Text("pending".into()));
        params.insert("limit".to_string(), Scalar::Int(5));
        let request = QueryRequest::named(
            "SELECT * FROM deliveries WHERE status = :status LIMIT :limit",
            params,
        );

        let (sql, values) = prepare_binding(&request).unwrap();
        assert_eq!(sql, "SELECT * FROM deliveries WHERE status = $1 LIMIT $2");
        assert_eq!(values, vec![&Scalar::Text("pending".into()), &Scalar::Int(5)]);
    }

    #[test]
    fn positional_passes_through() {
        let request = QueryRequest::positional(
            "SELECT * FROM drivers WHERE status = $1",
            vec![Scalar::Text("available".into())],
        );
        let (sql, values) = prepare_binding(&request).unwrap();
        assert_eq!(sql, request.statement);
        assert_eq!(values.len(), 1);
    }

    #[test]
    fn missing_url_is_config_error() {
        let cfg = DatabaseConfig {
            url: None,
            url_env: "QD_TEST_NO_SUCH_DATABASE_URL".into(),
            ..Default::default()
        };
        let err = PgExecutor::from_config(&cfg).err().unwrap();
        assert!(matches!(err, Error::Config(_)));
    }
}
