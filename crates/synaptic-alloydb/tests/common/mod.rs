//! In-memory stand-in for a PostgreSQL database.
//!
//! `RecordingExecutor` logs every statement it receives and interprets the
//! small SQL dialect the vector store and chat history emit, so tests can
//! check both the statements sent and their observable effect.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use synaptic_alloydb::{
    DbError, Embeddings, SqlExecutor, SqlRow, SqlValue, Statement, DUPLICATE_RELATION,
    UNDEFINED_RELATION,
};
use synaptic_core::SynapticError;

pub const CHAT_COLUMNS: [&str; 5] = ["id", "session_id", "data", "type", "timestamp"];

// ---------------------------------------------------------------------------
// RecordingExecutor
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct State {
    log: Vec<String>,
    tables: HashMap<String, Vec<SqlRow>>,
    indexes: HashSet<String>,
    next_serial: i64,
}

pub struct RecordingExecutor {
    state: Mutex<State>,
    fail_batches: bool,
    fail_index_creation: AtomicBool,
    catalog_columns: Vec<String>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::with_catalog_columns(&CHAT_COLUMNS)
    }

    /// Columns reported by `information_schema.columns`; empty means the
    /// table does not exist.
    pub fn with_catalog_columns(columns: &[&str]) -> Self {
        Self {
            state: Mutex::new(State::default()),
            fail_batches: false,
            fail_index_creation: AtomicBool::new(false),
            catalog_columns: columns.iter().map(|c| c.to_string()).collect(),
        }
    }

    /// An executor whose batches always fail without applying anything.
    pub fn failing_batches() -> Self {
        Self {
            fail_batches: true,
            ..Self::new()
        }
    }

    /// Make every later `CREATE INDEX` fail, as a build error would.
    pub fn fail_index_creation(&self) {
        self.fail_index_creation.store(true, Ordering::SeqCst);
    }

    pub fn log(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn statements_starting_with(&self, prefix: &str) -> Vec<String> {
        self.log()
            .into_iter()
            .filter(|sql| sql.starts_with(prefix))
            .collect()
    }

    pub fn rows(&self, table: &str) -> Vec<SqlRow> {
        self.state
            .lock()
            .unwrap()
            .tables
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn has_index(&self, name: &str) -> bool {
        self.state.lock().unwrap().indexes.contains(name)
    }

    fn apply(&self, state: &mut State, statement: &Statement) -> Result<u64, DbError> {
        let sql = statement.sql.as_str();
        if let Some(rest) = sql.strip_prefix("CREATE INDEX ") {
            if self.fail_index_creation.load(Ordering::SeqCst) {
                return Err(DbError::rejected("54000", "memory required is too large"));
            }
            let rest = rest.strip_prefix("CONCURRENTLY ").unwrap_or(rest);
            let name = quoted_parts(rest)[0].clone();
            if !state.indexes.insert(name.clone()) {
                return Err(DbError::rejected(
                    DUPLICATE_RELATION,
                    format!("relation \"{name}\" already exists"),
                ));
            }
            Ok(0)
        } else if let Some(rest) = sql.strip_prefix("DROP INDEX IF EXISTS ") {
            let name = quoted_parts(rest).pop().unwrap();
            Ok(state.indexes.remove(&name) as u64)
        } else if let Some(rest) = sql.strip_prefix("REINDEX INDEX ") {
            let name = quoted_parts(rest).pop().unwrap();
            if state.indexes.contains(&name) {
                Ok(0)
            } else {
                Err(DbError::rejected(
                    UNDEFINED_RELATION,
                    format!("relation \"{name}\" does not exist"),
                ))
            }
        } else if sql.starts_with("INSERT INTO ") {
            Self::insert(state, statement);
            Ok(1)
        } else if let Some(rest) = sql.strip_prefix("DELETE FROM ") {
            let (table, predicate) = rest.split_once(" WHERE ").unwrap();
            let rows = state.tables.entry(table.to_string()).or_default();
            let before = rows.len();
            match &statement.params[0] {
                SqlValue::TextArray(ids) => rows.retain(|row| {
                    let id = row_id_text(row, predicate);
                    !ids.contains(&id)
                }),
                SqlValue::Text(session) => {
                    rows.retain(|row| row.get("session_id") != Some(&SqlValue::Text(session.clone())))
                }
                other => panic!("unexpected delete parameter {other:?}"),
            }
            Ok((before - rows.len()) as u64)
        } else {
            Ok(0)
        }
    }

    fn insert(state: &mut State, statement: &Statement) {
        let rest = statement.sql.strip_prefix("INSERT INTO ").unwrap();
        let (table, rest) = rest.split_once(" (").unwrap();
        let (columns, values) = rest.split_once(") VALUES (").unwrap();
        let values = values.strip_suffix(')').unwrap();

        let mut row = SqlRow::new();
        if !columns.starts_with('"') {
            state.next_serial += 1;
            row.push("id", SqlValue::Int(state.next_serial));
        }
        for (column, value) in columns.split(", ").zip(values.split(", ")) {
            let column = column.trim_matches('"');
            let value = if value == "NULL" {
                SqlValue::Null
            } else {
                let n: usize = value
                    .trim_start_matches('$')
                    .trim_end_matches("::vector")
                    .parse()
                    .unwrap();
                statement.params[n - 1].clone()
            };
            row.push(column, value);
        }
        state.tables.entry(table.to_string()).or_default().push(row);
    }

    fn select(&self, statement: &Statement) -> Vec<SqlRow> {
        let sql = statement.sql.as_str();
        let state = self.state.lock().unwrap();

        if sql.contains("FROM pg_indexes") {
            let SqlValue::Text(name) = &statement.params[2] else {
                panic!("index name must be text");
            };
            return if state.indexes.contains(name) {
                vec![SqlRow::new().with("indexname", SqlValue::Text(name.clone()))]
            } else {
                Vec::new()
            };
        }

        if sql.contains("information_schema.columns") {
            return self
                .catalog_columns
                .iter()
                .map(|c| SqlRow::new().with("column_name", SqlValue::Text(c.clone())))
                .collect();
        }

        let (_, rest) = sql.split_once(" FROM ").unwrap();
        let (table, rest) = rest.split_once(" WHERE ").unwrap();
        let rows = state.tables.get(table).cloned().unwrap_or_default();

        if sql.contains(" AS distance ") {
            return similarity(rows, rest, &statement.params);
        }

        // Chat history: rows of one session in id order.
        rows.into_iter()
            .filter(|row| row.get("session_id") == Some(&statement.params[0]))
            .collect()
    }
}

#[async_trait]
impl SqlExecutor for RecordingExecutor {
    async fn execute(&self, statement: &Statement) -> Result<u64, DbError> {
        let mut state = self.state.lock().unwrap();
        state.log.push(statement.sql.clone());
        self.apply(&mut state, statement)
    }

    async fn execute_batch(&self, statements: &[Statement]) -> Result<(), DbError> {
        let mut state = self.state.lock().unwrap();
        state.log.extend(statements.iter().map(|s| s.sql.clone()));
        if self.fail_batches {
            return Err(DbError::rejected("23505", "duplicate key value violates unique constraint"));
        }
        // All or nothing, like a transaction.
        let mut staged = state.clone();
        for statement in statements {
            self.apply(&mut staged, statement)?;
        }
        *state = staged;
        Ok(())
    }

    async fn fetch_all(&self, statement: &Statement) -> Result<Vec<SqlRow>, DbError> {
        self.state.lock().unwrap().log.push(statement.sql.clone());
        Ok(self.select(statement))
    }
}

/// Split `"a"."b"` style text into its quoted parts.
fn quoted_parts(text: &str) -> Vec<String> {
    text.split('"')
        .enumerate()
        .filter(|(i, _)| i % 2 == 1)
        .map(|(_, part)| part.to_string())
        .collect()
}

fn row_id_text(row: &SqlRow, predicate: &str) -> String {
    let column = quoted_parts(predicate).remove(0);
    match row.get(&column) {
        Some(SqlValue::Text(s)) => s.clone(),
        Some(SqlValue::Uuid(u)) => u.to_string(),
        other => panic!("unexpected id {other:?}"),
    }
}

/// Evaluate `<filter> ORDER BY "col" <op> $1::vector LIMIT $2`.
fn similarity(rows: Vec<SqlRow>, rest: &str, params: &[SqlValue]) -> Vec<SqlRow> {
    let (filter, order) = rest.split_once(" ORDER BY ").unwrap();
    let mut order_parts = order.split(' ');
    let column = order_parts.next().unwrap().trim_matches('"').to_string();
    let operator = order_parts.next().unwrap().to_string();

    let SqlValue::Text(query) = &params[0] else {
        panic!("query vector must be a text literal");
    };
    let query = parse_vector(query);
    let SqlValue::Int(limit) = params[1] else {
        panic!("limit must be an integer");
    };

    let mut scored: Vec<(f64, SqlRow)> = rows
        .into_iter()
        .filter(|row| matches_filter(row, filter))
        .map(|row| {
            let Some(SqlValue::Text(stored)) = row.get(&column) else {
                panic!("embedding must be stored as a text literal");
            };
            let distance = distance(&operator, &parse_vector(stored), &query);
            (distance, row)
        })
        .collect();
    scored.sort_by(|a, b| a.0.total_cmp(&b.0));

    scored
        .into_iter()
        .take(limit as usize)
        .map(|(distance, mut row)| {
            row.push("distance", SqlValue::Float(distance));
            row
        })
        .collect()
}

/// Supports `TRUE` and `"col" = 'value'`.
fn matches_filter(row: &SqlRow, filter: &str) -> bool {
    if filter == "TRUE" {
        return true;
    }
    let (column, value) = filter.split_once(" = ").unwrap();
    let column = column.trim_matches('"');
    let value = value.trim_matches('\'');
    row.get(column) == Some(&SqlValue::Text(value.to_string()))
}

fn parse_vector(literal: &str) -> Vec<f64> {
    literal
        .trim_matches(|c| c == '[' || c == ']')
        .split(',')
        .map(|v| v.parse().unwrap())
        .collect()
}

fn distance(operator: &str, a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    match operator {
        "<->" => a
            .iter()
            .zip(b)
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f64>()
            .sqrt(),
        "<=>" => {
            let na = a.iter().map(|x| x * x).sum::<f64>().sqrt();
            let nb = b.iter().map(|x| x * x).sum::<f64>().sqrt();
            1.0 - dot / (na * nb)
        }
        "<#>" => -dot,
        other => panic!("unknown operator {other}"),
    }
}

// ---------------------------------------------------------------------------
// Fake embeddings
// ---------------------------------------------------------------------------

/// Embeds text by keyword presence, so related texts land close together.
pub struct KeywordEmbeddings;

pub const KEYWORDS: [&str; 3] = ["rust", "python", "go"];

pub fn keyword_vector(text: &str) -> Vec<f32> {
    let text = text.to_lowercase();
    let mut vector: Vec<f32> = KEYWORDS
        .iter()
        .map(|k| if text.contains(k) { 1.0 } else { 0.0 })
        .collect();
    vector.push(0.1);
    vector
}

#[async_trait]
impl Embeddings for KeywordEmbeddings {
    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, SynapticError> {
        Ok(texts.iter().map(|t| keyword_vector(t)).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, SynapticError> {
        Ok(keyword_vector(text))
    }
}

/// Returns one vector fewer than asked for.
pub struct ShortEmbeddings;

#[async_trait]
impl Embeddings for ShortEmbeddings {
    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, SynapticError> {
        Ok(texts.iter().skip(1).map(|t| keyword_vector(t)).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, SynapticError> {
        Ok(keyword_vector(text))
    }
}

/// Always fails.
pub struct BrokenEmbeddings;

#[async_trait]
impl Embeddings for BrokenEmbeddings {
    async fn embed_documents(&self, _texts: &[&str]) -> Result<Vec<Vec<f32>>, SynapticError> {
        Err(SynapticError::Embedding("model unavailable".to_string()))
    }

    async fn embed_query(&self, _text: &str) -> Result<Vec<f32>, SynapticError> {
        Err(SynapticError::Embedding("model unavailable".to_string()))
    }
}
