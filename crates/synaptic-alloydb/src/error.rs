use std::time::Duration;

use synaptic_core::SynapticError;
use thiserror::Error;

/// SQLSTATE `duplicate_table`; raised by `CREATE INDEX` on an existing name.
pub const DUPLICATE_RELATION: &str = "42P07";
/// SQLSTATE `undefined_table`.
pub const UNDEFINED_RELATION: &str = "42P01";
/// SQLSTATE `undefined_object`.
pub const UNDEFINED_OBJECT: &str = "42704";

/// Failure reported by a [`SqlExecutor`](crate::SqlExecutor).
#[derive(Debug, Error)]
pub enum DbError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("statement timed out after {0:?}")]
    Timeout(Duration),
    /// A backend other than sqlx rejected the statement.
    #[error("{message} (SQLSTATE {})", code.as_deref().unwrap_or("unknown"))]
    Rejected {
        code: Option<String>,
        message: String,
    },
}

impl DbError {
    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        DbError::Rejected {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// The SQLSTATE of the failure, when the database reported one.
    pub fn code(&self) -> Option<String> {
        match self {
            DbError::Sqlx(e) => e
                .as_database_error()
                .and_then(|db| db.code())
                .map(|c| c.into_owned()),
            DbError::Timeout(_) => None,
            DbError::Rejected { code, .. } => code.clone(),
        }
    }
}

/// Errors raised by the AlloyDB / Cloud SQL integration.
#[derive(Debug, Error)]
pub enum AlloyDbError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid {kind} identifier '{name}': {reason}")]
    InvalidIdentifier {
        kind: &'static str,
        name: String,
        reason: String,
    },

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("embedder returned {actual} vectors for {expected} texts")]
    EmbeddingCountMismatch { expected: usize, actual: usize },

    #[error("failed to insert {rows} rows into {table}")]
    InsertBatchFailed {
        table: String,
        rows: usize,
        #[source]
        source: DbError,
    },

    #[error("failed to decode metadata column '{column}': {reason}")]
    MetadataDecode { column: String, reason: String },

    #[error("failed to decode result column '{column}': {reason}")]
    ResultDecode { column: String, reason: String },

    #[error("invalid options for {index_type} index: {reason}")]
    InvalidIndexOptions { index_type: String, reason: String },

    #[error("index '{name}' already exists")]
    IndexAlreadyExists {
        name: String,
        #[source]
        source: DbError,
    },

    #[error("{operation} is destructive and requires overwrite to be enabled")]
    OverwriteRequired { operation: &'static str },

    #[error("index '{name}' does not exist")]
    IndexNotFound {
        name: String,
        #[source]
        source: DbError,
    },

    #[error("table '{schema}.{table}' does not exist")]
    TableNotFound { schema: String, table: String },

    #[error("column '{column}' is missing in table '{table}'")]
    ColumnNotFound { table: String, column: String },

    #[error("unsupported message type '{0}'")]
    UnsupportedMessageType(String),

    #[error("{operation} failed on {target}")]
    Database {
        operation: &'static str,
        target: String,
        #[source]
        source: DbError,
    },
}

impl AlloyDbError {
    pub(crate) fn database(operation: &'static str, target: impl Into<String>, source: DbError) -> Self {
        AlloyDbError::Database {
            operation,
            target: target.into(),
            source,
        }
    }

    fn is_timeout(&self) -> bool {
        let source = match self {
            AlloyDbError::InsertBatchFailed { source, .. }
            | AlloyDbError::IndexAlreadyExists { source, .. }
            | AlloyDbError::IndexNotFound { source, .. }
            | AlloyDbError::Database { source, .. } => source,
            _ => return false,
        };
        matches!(source, DbError::Timeout(_))
    }
}

/// Render an error with its whole `source()` chain.
///
/// Some errors (sqlx's among them) already print their source; text that
/// is already in the output is not repeated.
fn render_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut cur = err.source();
    while let Some(e) = cur {
        let text = e.to_string();
        if !out.contains(&text) {
            out.push_str(": ");
            out.push_str(&text);
        }
        cur = e.source();
    }
    out
}

impl From<AlloyDbError> for SynapticError {
    fn from(err: AlloyDbError) -> Self {
        let msg = render_chain(&err);
        if err.is_timeout() {
            return SynapticError::Timeout(msg);
        }
        match err {
            AlloyDbError::Config(_) | AlloyDbError::InvalidIdentifier { .. } => {
                SynapticError::Config(msg)
            }
            AlloyDbError::Embedding(_) | AlloyDbError::EmbeddingCountMismatch { .. } => {
                SynapticError::Embedding(msg)
            }
            AlloyDbError::TableNotFound { .. }
            | AlloyDbError::ColumnNotFound { .. }
            | AlloyDbError::UnsupportedMessageType(_) => SynapticError::Memory(msg),
            _ => SynapticError::VectorStore(msg),
        }
    }
}
