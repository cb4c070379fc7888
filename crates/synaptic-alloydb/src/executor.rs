//! The relational execution handle the vector store and chat history run
//! their statements through.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use pgvector::Vector;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, PgPool, Postgres, Row, TypeInfo, ValueRef};

use crate::DbError;

/// A bound parameter or a decoded column value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Uuid(uuid::Uuid),
    Json(Value),
    Vector(Vec<f32>),
    TextArray(Vec<String>),
}

impl SqlValue {
    /// Convert a JSON metadata value into the parameter bound for a
    /// dedicated metadata column.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => SqlValue::Int(i),
                None => SqlValue::Float(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => SqlValue::Text(s),
            other => SqlValue::Json(other),
        }
    }

    /// Convert a decoded column value back into JSON for document metadata.
    pub fn into_json(self) -> Value {
        match self {
            SqlValue::Null => Value::Null,
            SqlValue::Bool(b) => Value::Bool(b),
            SqlValue::Int(i) => Value::from(i),
            SqlValue::Float(f) => serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            SqlValue::Text(s) => Value::String(s),
            SqlValue::Uuid(u) => Value::String(u.to_string()),
            SqlValue::Json(v) => v,
            SqlValue::Vector(v) => Value::from(v),
            SqlValue::TextArray(v) => Value::from(v),
        }
    }
}

/// SQL text plus positional (`$1`, `$2`, ...) parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn bind(mut self, value: SqlValue) -> Self {
        self.params.push(value);
        self
    }
}

/// One result row: column names in select order with their values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlRow {
    columns: Vec<(String, SqlValue)>,
}

impl SqlRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: SqlValue) -> Self {
        self.push(name, value);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, value: SqlValue) {
        self.columns.push((name.into(), value));
    }

    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Remove and return a column value.
    pub fn take(&mut self, name: &str) -> Option<SqlValue> {
        let pos = self.columns.iter().position(|(n, _)| n == name)?;
        Some(self.columns.remove(pos).1)
    }

    pub fn columns(&self) -> &[(String, SqlValue)] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// An already-connected handle to a PostgreSQL-compatible database.
///
/// Implementations must be safe to share between tasks; pooling and
/// authentication are their concern.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Execute one statement, returning the number of affected rows.
    async fn execute(&self, statement: &Statement) -> Result<u64, DbError>;

    /// Execute statements as one unit: either all take effect or none do.
    async fn execute_batch(&self, statements: &[Statement]) -> Result<(), DbError>;

    /// Run a query and decode every row.
    async fn fetch_all(&self, statement: &Statement) -> Result<Vec<SqlRow>, DbError>;
}

/// [`SqlExecutor`] over a sqlx PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PgExecutor {
    pool: PgPool,
    statement_timeout: Option<Duration>,
}

impl PgExecutor {
    /// Wrap an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            statement_timeout: None,
        }
    }

    /// Connect a small pool to `url`.
    pub async fn connect(url: &str) -> Result<Self, DbError> {
        let pool = PgPoolOptions::new().max_connections(5).connect(url).await?;
        Ok(Self::new(pool))
    }

    /// Abort any statement (or batch) that runs longer than `timeout`.
    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = Some(timeout);
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn timed<T, F>(&self, fut: F) -> Result<T, DbError>
    where
        F: Future<Output = Result<T, sqlx::Error>> + Send,
    {
        match self.statement_timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| DbError::Timeout(limit))?
                .map_err(DbError::from),
            None => fut.await.map_err(DbError::from),
        }
    }
}

fn bind_params<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &[SqlValue],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            SqlValue::Null => query.bind(Option::<String>::None),
            SqlValue::Bool(b) => query.bind(*b),
            SqlValue::Int(i) => query.bind(*i),
            SqlValue::Float(f) => query.bind(*f),
            SqlValue::Text(s) => query.bind(s.clone()),
            SqlValue::Uuid(u) => query.bind(*u),
            SqlValue::Json(v) => query.bind(v.clone()),
            SqlValue::Vector(v) => query.bind(Vector::from(v.clone())),
            SqlValue::TextArray(v) => query.bind(v.clone()),
        };
    }
    query
}

fn decode_pg_row(row: &PgRow) -> Result<SqlRow, DbError> {
    let mut out = SqlRow::new();
    for (i, col) in row.columns().iter().enumerate() {
        let name = col.name();
        if row.try_get_raw(i)?.is_null() {
            out.push(name, SqlValue::Null);
            continue;
        }
        let type_name = col.type_info().name();
        let value = match type_name {
            "BOOL" => SqlValue::Bool(row.try_get::<bool, _>(i)?),
            "INT2" => SqlValue::Int(row.try_get::<i16, _>(i)?.into()),
            "INT4" => SqlValue::Int(row.try_get::<i32, _>(i)?.into()),
            "INT8" => SqlValue::Int(row.try_get::<i64, _>(i)?),
            "FLOAT4" => SqlValue::Float(row.try_get::<f32, _>(i)?.into()),
            "FLOAT8" => SqlValue::Float(row.try_get::<f64, _>(i)?),
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => SqlValue::Text(row.try_get::<String, _>(i)?),
            "UUID" => SqlValue::Uuid(row.try_get::<uuid::Uuid, _>(i)?),
            "JSON" | "JSONB" => SqlValue::Json(row.try_get::<Value, _>(i)?),
            "TEXT[]" | "VARCHAR[]" => SqlValue::TextArray(row.try_get::<Vec<String>, _>(i)?),
            t if t.eq_ignore_ascii_case("vector") => {
                SqlValue::Vector(row.try_get::<Vector, _>(i)?.to_vec())
            }
            other => {
                return Err(DbError::Rejected {
                    code: None,
                    message: format!("column '{name}' has unsupported type {other}"),
                })
            }
        };
        out.push(name, value);
    }
    Ok(out)
}

#[async_trait]
impl SqlExecutor for PgExecutor {
    async fn execute(&self, statement: &Statement) -> Result<u64, DbError> {
        tracing::debug!(sql = %statement.sql, params = statement.params.len(), "execute");
        let query = bind_params(sqlx::query(&statement.sql), &statement.params);
        let result = self.timed(query.execute(&self.pool)).await?;
        Ok(result.rows_affected())
    }

    async fn execute_batch(&self, statements: &[Statement]) -> Result<(), DbError> {
        tracing::debug!(statements = statements.len(), "execute batch");
        let pool = &self.pool;
        self.timed(async move {
            let mut tx = pool.begin().await?;
            for statement in statements {
                tracing::debug!(sql = %statement.sql, params = statement.params.len(), "batch statement");
                bind_params(sqlx::query(&statement.sql), &statement.params)
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit().await
        })
        .await
    }

    async fn fetch_all(&self, statement: &Statement) -> Result<Vec<SqlRow>, DbError> {
        tracing::debug!(sql = %statement.sql, params = statement.params.len(), "fetch");
        let query = bind_params(sqlx::query(&statement.sql), &statement.params);
        let rows = self.timed(query.fetch_all(&self.pool)).await?;
        rows.iter().map(decode_pg_row).collect()
    }
}
