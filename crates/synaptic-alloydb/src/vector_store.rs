use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use synaptic_core::{Document, Embeddings, SynapticError, VectorStore};
use uuid::Uuid;

use crate::error::{DUPLICATE_RELATION, UNDEFINED_OBJECT, UNDEFINED_RELATION};
use crate::identifier::{qualified, quote, validate_identifier};
use crate::index::DEFAULT_INDEX_NAME_SUFFIX;
use crate::{AlloyDbError, DistanceStrategy, IndexSpec, IndexType, SqlExecutor, SqlRow, SqlValue, Statement};

pub const DEFAULT_SCHEMA_NAME: &str = "public";
pub const DEFAULT_ID_COLUMN: &str = "langchain_id";
pub const DEFAULT_CONTENT_COLUMN: &str = "content";
pub const DEFAULT_EMBEDDING_COLUMN: &str = "embedding";
pub const DEFAULT_METADATA_JSON_COLUMN: &str = "langchain_metadata";
pub const DEFAULT_K: usize = 4;

/// Alias of the computed distance in search queries.
const DISTANCE_COLUMN: &str = "distance";

// ---------------------------------------------------------------------------
// VectorStoreConfig
// ---------------------------------------------------------------------------

/// Table layout and search defaults of an [`AlloyDbVectorStore`].
///
/// Built and validated by [`AlloyDbVectorStoreBuilder`]; read-only
/// afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorStoreConfig {
    pub table_name: String,
    pub schema_name: String,
    pub id_column: String,
    pub content_column: String,
    pub embedding_column: String,
    /// JSON column for metadata not stored in `metadata_columns`. `None`
    /// drops such metadata.
    pub metadata_json_column: Option<String>,
    /// Metadata keys stored in dedicated columns, in column order.
    pub metadata_columns: Vec<String>,
    /// Default number of search results.
    pub k: usize,
    pub distance_strategy: DistanceStrategy,
    /// Allow destructive operations (dropping or replacing indexes).
    pub overwrite: bool,
}

impl VectorStoreConfig {
    fn new(table_name: String) -> Self {
        Self {
            table_name,
            schema_name: DEFAULT_SCHEMA_NAME.to_string(),
            id_column: DEFAULT_ID_COLUMN.to_string(),
            content_column: DEFAULT_CONTENT_COLUMN.to_string(),
            embedding_column: DEFAULT_EMBEDDING_COLUMN.to_string(),
            metadata_json_column: Some(DEFAULT_METADATA_JSON_COLUMN.to_string()),
            metadata_columns: Vec::new(),
            k: DEFAULT_K,
            distance_strategy: DistanceStrategy::default(),
            overwrite: false,
        }
    }

    fn validate(&self) -> Result<(), AlloyDbError> {
        if self.table_name.is_empty() {
            return Err(AlloyDbError::Config("missing vector store table name".to_string()));
        }
        if self.k == 0 {
            return Err(AlloyDbError::Config("k must be > 0".to_string()));
        }
        validate_identifier("schema", &self.schema_name)?;
        validate_identifier("table", &self.table_name)?;
        validate_identifier("index", &self.default_index_name())?;

        let mut seen = HashSet::new();
        for column in self.all_columns() {
            validate_identifier("column", column)?;
            if !seen.insert(column) {
                return Err(AlloyDbError::Config(format!(
                    "column '{column}' is configured more than once"
                )));
            }
        }
        if self.metadata_columns.iter().any(|c| c == DISTANCE_COLUMN) {
            return Err(AlloyDbError::Config(format!(
                "metadata column name '{DISTANCE_COLUMN}' is reserved for search scores"
            )));
        }
        Ok(())
    }

    fn all_columns(&self) -> impl Iterator<Item = &str> {
        [
            self.id_column.as_str(),
            self.content_column.as_str(),
            self.embedding_column.as_str(),
        ]
        .into_iter()
        .chain(self.metadata_json_column.as_deref())
        .chain(self.metadata_columns.iter().map(String::as_str))
    }

    /// `"schema"."table"`.
    pub fn qualified_table(&self) -> String {
        qualified(&self.schema_name, &self.table_name)
    }

    /// The index name used when none is given: `<table>langchainvectorindex`.
    pub fn default_index_name(&self) -> String {
        format!("{}{DEFAULT_INDEX_NAME_SUFFIX}", self.table_name)
    }

    fn target(&self) -> String {
        format!("{}.{}", self.schema_name, self.table_name)
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Validated builder for [`AlloyDbVectorStore`].
pub struct AlloyDbVectorStoreBuilder {
    executor: Arc<dyn SqlExecutor>,
    embedder: Arc<dyn Embeddings>,
    config: VectorStoreConfig,
}

impl AlloyDbVectorStoreBuilder {
    pub fn with_schema_name(mut self, schema_name: impl Into<String>) -> Self {
        self.config.schema_name = schema_name.into();
        self
    }

    pub fn with_id_column(mut self, column: impl Into<String>) -> Self {
        self.config.id_column = column.into();
        self
    }

    pub fn with_content_column(mut self, column: impl Into<String>) -> Self {
        self.config.content_column = column.into();
        self
    }

    pub fn with_embedding_column(mut self, column: impl Into<String>) -> Self {
        self.config.embedding_column = column.into();
        self
    }

    /// Set the JSON metadata column; `None` disables it.
    pub fn with_metadata_json_column(mut self, column: Option<String>) -> Self {
        self.config.metadata_json_column = column;
        self
    }

    pub fn with_metadata_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.metadata_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.config.k = k;
        self
    }

    pub fn with_distance_strategy(mut self, distance_strategy: DistanceStrategy) -> Self {
        self.config.distance_strategy = distance_strategy;
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.config.overwrite = overwrite;
        self
    }

    /// Validate the configuration and create the store.
    pub fn build(self) -> Result<AlloyDbVectorStore, AlloyDbError> {
        self.config.validate()?;
        Ok(AlloyDbVectorStore {
            executor: self.executor,
            embedder: self.embedder,
            config: self.config,
        })
    }
}

// ---------------------------------------------------------------------------
// SearchOptions
// ---------------------------------------------------------------------------

/// Per-query search options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchOptions {
    /// Number of results; the store's `k` when `None` or zero.
    pub k: Option<usize>,
    /// Raw SQL predicate applied as the `WHERE` clause.
    pub filter: Option<String>,
}

impl SearchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = Some(k);
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }
}

// ---------------------------------------------------------------------------
// AlloyDbVectorStore
// ---------------------------------------------------------------------------

/// A vector store backed by an AlloyDB or Cloud SQL for PostgreSQL table
/// with the `vector` extension.
///
/// Each document is one row: an id, its content, its embedding, optional
/// dedicated metadata columns and a JSON column for the remaining
/// metadata. Use [`init_vectorstore_table`](crate::init_vectorstore_table)
/// to create a matching table.
///
/// The store holds no mutable state and may be shared between tasks.
/// Results with equal distance come back in whatever order the database
/// produces them; no secondary sort key is applied.
pub struct AlloyDbVectorStore {
    executor: Arc<dyn SqlExecutor>,
    embedder: Arc<dyn Embeddings>,
    config: VectorStoreConfig,
}

impl AlloyDbVectorStore {
    /// Start building a store over `table_name`.
    pub fn builder(
        executor: Arc<dyn SqlExecutor>,
        embedder: Arc<dyn Embeddings>,
        table_name: impl Into<String>,
    ) -> AlloyDbVectorStoreBuilder {
        AlloyDbVectorStoreBuilder {
            executor,
            embedder,
            config: VectorStoreConfig::new(table_name.into()),
        }
    }

    pub fn config(&self) -> &VectorStoreConfig {
        &self.config
    }

    pub fn executor(&self) -> &Arc<dyn SqlExecutor> {
        &self.executor
    }

    // -- Ingestion -----------------------------------------------------------

    /// Embed and insert documents with the store's embedder, returning
    /// their ids in input order.
    pub async fn add(&self, docs: Vec<Document>) -> Result<Vec<String>, AlloyDbError> {
        self.add_with(docs, self.embedder.as_ref()).await
    }

    /// Embed and insert documents as one batch.
    ///
    /// A document's id is `metadata["id"]` when that is a string, else its
    /// own non-empty `id`, else a fresh UUID.
    pub async fn add_with(
        &self,
        docs: Vec<Document>,
        embeddings: &dyn Embeddings,
    ) -> Result<Vec<String>, AlloyDbError> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }

        let texts: Vec<&str> = docs.iter().map(|d| d.content.as_str()).collect();
        let vectors = embeddings
            .embed_documents(&texts)
            .await
            .map_err(|e| AlloyDbError::Embedding(e.to_string()))?;
        if vectors.len() != docs.len() {
            return Err(AlloyDbError::EmbeddingCountMismatch {
                expected: docs.len(),
                actual: vectors.len(),
            });
        }

        let mut ids = Vec::with_capacity(docs.len());
        let mut statements = Vec::with_capacity(docs.len());
        for (doc, vector) in docs.into_iter().zip(vectors) {
            let id = resolve_id(&doc);
            statements.push(self.insert_statement(&id, doc.content, &vector, doc.metadata)?);
            ids.push(id);
        }

        tracing::debug!(table = %self.config.target(), rows = statements.len(), "inserting documents");
        self.executor
            .execute_batch(&statements)
            .await
            .map_err(|source| AlloyDbError::InsertBatchFailed {
                table: self.config.target(),
                rows: statements.len(),
                source,
            })?;
        Ok(ids)
    }

    fn insert_statement(
        &self,
        id: &str,
        content: String,
        vector: &[f32],
        mut metadata: BTreeMap<String, Value>,
    ) -> Result<Statement, AlloyDbError> {
        let cfg = &self.config;
        let mut columns = vec![
            quote(&cfg.id_column),
            quote(&cfg.content_column),
            quote(&cfg.embedding_column),
        ];
        let mut values = vec!["$1".to_string(), "$2".to_string(), "$3::vector".to_string()];
        let id_param = match Uuid::parse_str(id) {
            Ok(uuid) => SqlValue::Uuid(uuid),
            Err(_) => SqlValue::Text(id.to_string()),
        };
        let mut statement = Statement::new(String::new())
            .bind(id_param)
            .bind(SqlValue::Text(content))
            .bind(SqlValue::Text(vector_literal(vector)?));

        for column in &cfg.metadata_columns {
            columns.push(quote(column));
            // An untyped NULL literal fits any column type; a bound NULL does not.
            match metadata.remove(column) {
                None | Some(Value::Null) => values.push("NULL".to_string()),
                Some(value) => {
                    statement = statement.bind(SqlValue::from_json(value));
                    values.push(format!("${}", statement.params.len()));
                }
            }
        }

        if let Some(json_column) = &cfg.metadata_json_column {
            columns.push(quote(json_column));
            let residual = Value::Object(metadata.into_iter().collect());
            statement = statement.bind(SqlValue::Json(residual));
            values.push(format!("${}", statement.params.len()));
        }

        statement.sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            cfg.qualified_table(),
            columns.join(", "),
            values.join(", ")
        );
        Ok(statement)
    }

    /// Delete documents by id. Deleting nothing is a no-op.
    pub async fn delete_ids(&self, ids: &[&str]) -> Result<(), AlloyDbError> {
        if ids.is_empty() {
            return Ok(());
        }
        let sql = format!(
            "DELETE FROM {} WHERE {}::text = ANY($1)",
            self.config.qualified_table(),
            quote(&self.config.id_column),
        );
        let statement =
            Statement::new(sql).bind(SqlValue::TextArray(ids.iter().map(|s| s.to_string()).collect()));
        self.executor
            .execute(&statement)
            .await
            .map_err(|e| AlloyDbError::database("delete documents", self.config.target(), e))?;
        Ok(())
    }

    // -- Search --------------------------------------------------------------

    /// Embed `query` with the store's embedder and return the nearest
    /// documents, nearest first, each with its distance as `score`.
    pub async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<Document>, AlloyDbError> {
        self.search_with(query, options, self.embedder.as_ref()).await
    }

    async fn search_with(
        &self,
        query: &str,
        options: &SearchOptions,
        embeddings: &dyn Embeddings,
    ) -> Result<Vec<Document>, AlloyDbError> {
        let vector = embeddings
            .embed_query(query)
            .await
            .map_err(|e| AlloyDbError::Embedding(e.to_string()))?;
        self.search_by_vector(&vector, options).await
    }

    /// Return the documents nearest to a precomputed embedding.
    pub async fn search_by_vector(
        &self,
        embedding: &[f32],
        options: &SearchOptions,
    ) -> Result<Vec<Document>, AlloyDbError> {
        let statement = self.search_statement(embedding, options)?;
        let rows = self
            .executor
            .fetch_all(&statement)
            .await
            .map_err(|e| AlloyDbError::database("similarity search", self.config.target(), e))?;
        tracing::debug!(table = %self.config.target(), rows = rows.len(), "similarity search");
        rows.into_iter().map(|row| self.decode_row(row)).collect()
    }

    fn search_statement(
        &self,
        embedding: &[f32],
        options: &SearchOptions,
    ) -> Result<Statement, AlloyDbError> {
        let cfg = &self.config;
        let k = match options.k {
            Some(k) if k > 0 => k,
            _ => cfg.k,
        };
        let limit = i64::try_from(k)
            .map_err(|_| AlloyDbError::Config(format!("k = {k} is out of range")))?;

        let mut columns = vec![format!(
            "{id}::text AS {id}",
            id = quote(&cfg.id_column)
        )];
        columns.extend(
            cfg.metadata_columns
                .iter()
                .map(|c| format!("to_jsonb({col}) AS {col}", col = quote(c))),
        );
        columns.push(quote(&cfg.content_column));
        columns.push(quote(&cfg.embedding_column));
        if let Some(json_column) = &cfg.metadata_json_column {
            columns.push(quote(json_column));
        }

        let distance = format!(
            "{} {} $1::vector",
            quote(&cfg.embedding_column),
            cfg.distance_strategy.operator()
        );
        let filter = options.filter.as_deref().unwrap_or("TRUE");
        let sql = format!(
            "SELECT {columns}, {distance} AS {DISTANCE_COLUMN} FROM {table} WHERE {filter} ORDER BY {distance} LIMIT $2",
            columns = columns.join(", "),
            table = cfg.qualified_table(),
        );

        Ok(Statement::new(sql)
            .bind(SqlValue::Text(vector_literal(embedding)?))
            .bind(SqlValue::Int(limit)))
    }

    fn decode_row(&self, mut row: SqlRow) -> Result<Document, AlloyDbError> {
        let cfg = &self.config;

        let content = match row.take(&cfg.content_column) {
            Some(SqlValue::Text(s)) => s,
            Some(SqlValue::Null) => String::new(),
            other => return Err(unexpected(&cfg.content_column, "text", other)),
        };

        let score = match row.take(DISTANCE_COLUMN) {
            Some(SqlValue::Float(f)) => f as f32,
            other => return Err(unexpected(DISTANCE_COLUMN, "float", other)),
        };

        let id = match row.take(&cfg.id_column) {
            Some(SqlValue::Text(s)) => s,
            Some(SqlValue::Uuid(u)) => u.to_string(),
            Some(SqlValue::Int(i)) => i.to_string(),
            other => return Err(unexpected(&cfg.id_column, "text", other)),
        };

        let mut metadata = match &cfg.metadata_json_column {
            Some(column) => decode_metadata_json(column, row.take(column))?,
            None => BTreeMap::new(),
        };
        for column in &cfg.metadata_columns {
            match row.take(column) {
                None | Some(SqlValue::Null) => {}
                Some(value) => {
                    metadata.insert(column.clone(), value.into_json());
                }
            }
        }

        Ok(Document {
            id,
            content,
            metadata,
            score: Some(score),
        })
    }

    // -- Index lifecycle -----------------------------------------------------

    fn index_name(&self, name: Option<&str>) -> Result<String, AlloyDbError> {
        let name = match name {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => self.config.default_index_name(),
        };
        validate_identifier("index", &name)?;
        Ok(name)
    }

    fn allows_overwrite(&self, overwrite: bool) -> bool {
        overwrite || self.config.overwrite
    }

    /// Create an index on the embedding column.
    ///
    /// The name is `name`, else `index.name`, else the default index name.
    /// An [`IndexType::ExactNearestNeighbor`] spec drops the index instead;
    /// asking for no index counts as consent, so `overwrite` is not checked.
    ///
    /// With `overwrite` an existing index of the same name is replaced; the
    /// store-level overwrite setting does not apply here. Without it,
    /// creating the index again fails with [`AlloyDbError::IndexAlreadyExists`].
    /// A plain replacement drops and creates in one transaction, so a failed
    /// create keeps the old index. `CONCURRENTLY` cannot run inside a
    /// transaction: a concurrent replacement drops first and leaves no index
    /// behind if the create then fails.
    pub async fn apply_vector_index(
        &self,
        index: &IndexSpec,
        name: Option<&str>,
        concurrently: bool,
        overwrite: bool,
    ) -> Result<(), AlloyDbError> {
        let name = self.index_name(name.or(index.name.as_deref()))?;
        if index.index_type == IndexType::ExactNearestNeighbor {
            return self.drop_vector_index(Some(&name), true).await;
        }

        let params = index.options_clause()?;
        let Some(method) = index.index_type.access_method() else {
            return Err(AlloyDbError::InvalidIndexOptions {
                index_type: index.index_type.to_string(),
                reason: "index type has no access method".to_string(),
            });
        };

        if let Some(extension) = index.index_type.required_extension() {
            let sql = format!("CREATE EXTENSION IF NOT EXISTS {extension}");
            self.executor
                .execute(&Statement::new(sql))
                .await
                .map_err(|e| AlloyDbError::database("enable extension", extension, e))?;
        }

        let mut sql = format!(
            "CREATE INDEX {concurrently}{index} ON {table} USING {method} ({column} {opclass}) WITH {params}",
            concurrently = if concurrently { "CONCURRENTLY " } else { "" },
            index = quote(&name),
            table = self.config.qualified_table(),
            column = quote(&self.config.embedding_column),
            opclass = index.distance_strategy.search_function(),
        );
        if let Some(predicate) = &index.partial_index_predicate {
            sql.push_str(" WHERE ");
            sql.push_str(predicate);
        }
        let create = Statement::new(sql);

        tracing::info!(index = %name, table = %self.config.target(), index_type = %index.index_type, replace = overwrite, "creating vector index");
        let result = match (overwrite, concurrently) {
            (false, _) => self.executor.execute(&create).await.map(|_| ()),
            (true, false) => {
                self.executor
                    .execute_batch(&[self.drop_statement(&name), create])
                    .await
            }
            (true, true) => {
                self.drop_vector_index(Some(&name), true).await?;
                self.executor.execute(&create).await.map(|_| ())
            }
        };
        result.map_err(|source| match source.code().as_deref() {
            Some(DUPLICATE_RELATION) => AlloyDbError::IndexAlreadyExists {
                name: name.clone(),
                source,
            },
            _ => AlloyDbError::database("create index", name.clone(), source),
        })
    }

    fn drop_statement(&self, name: &str) -> Statement {
        Statement::new(format!(
            "DROP INDEX IF EXISTS {}",
            qualified(&self.config.schema_name, name)
        ))
    }

    /// Drop an index if it exists. Refused with
    /// [`AlloyDbError::OverwriteRequired`] unless `overwrite` is passed or
    /// the store was built with overwrite enabled.
    pub async fn drop_vector_index(
        &self,
        name: Option<&str>,
        overwrite: bool,
    ) -> Result<(), AlloyDbError> {
        let name = self.index_name(name)?;
        if !self.allows_overwrite(overwrite) {
            tracing::warn!(index = %name, "refusing to drop vector index without overwrite");
            return Err(AlloyDbError::OverwriteRequired {
                operation: "dropping a vector index",
            });
        }

        tracing::info!(index = %name, "dropping vector index");
        self.executor
            .execute(&self.drop_statement(&name))
            .await
            .map_err(|e| AlloyDbError::database("drop index", name, e))?;
        Ok(())
    }

    /// Rebuild an index.
    pub async fn reindex(&self, name: Option<&str>) -> Result<(), AlloyDbError> {
        let name = self.index_name(name)?;
        let sql = format!(
            "REINDEX INDEX {}",
            qualified(&self.config.schema_name, &name)
        );
        tracing::info!(index = %name, "reindexing vector index");
        self.executor
            .execute(&Statement::new(sql))
            .await
            .map_err(|source| match source.code().as_deref() {
                Some(UNDEFINED_RELATION) | Some(UNDEFINED_OBJECT) => AlloyDbError::IndexNotFound {
                    name: name.clone(),
                    source,
                },
                _ => AlloyDbError::database("reindex", name.clone(), source),
            })?;
        Ok(())
    }

    /// Whether an index of this name exists on the store's table.
    pub async fn is_valid_index(&self, name: Option<&str>) -> Result<bool, AlloyDbError> {
        let name = self.index_name(name)?;
        let statement = Statement::new(
            "SELECT indexname FROM pg_indexes WHERE tablename = $1 AND schemaname = $2 AND indexname = $3",
        )
        .bind(SqlValue::Text(self.config.table_name.clone()))
        .bind(SqlValue::Text(self.config.schema_name.clone()))
        .bind(SqlValue::Text(name.clone()));
        let rows = self
            .executor
            .fetch_all(&statement)
            .await
            .map_err(|e| AlloyDbError::database("look up index", name, e))?;
        Ok(!rows.is_empty())
    }
}

// ---------------------------------------------------------------------------
// VectorStore implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl VectorStore for AlloyDbVectorStore {
    async fn add_documents(
        &self,
        docs: Vec<Document>,
        embeddings: &dyn Embeddings,
    ) -> Result<Vec<String>, SynapticError> {
        Ok(self.add_with(docs, embeddings).await?)
    }

    async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        embeddings: &dyn Embeddings,
    ) -> Result<Vec<Document>, SynapticError> {
        Ok(self.search_with(query, &trait_options(k), embeddings).await?)
    }

    async fn similarity_search_with_score(
        &self,
        query: &str,
        k: usize,
        embeddings: &dyn Embeddings,
    ) -> Result<Vec<(Document, f32)>, SynapticError> {
        let docs = self.search_with(query, &trait_options(k), embeddings).await?;
        Ok(docs
            .into_iter()
            .map(|d| {
                let score = d.score.unwrap_or_default();
                (d, score)
            })
            .collect())
    }

    async fn similarity_search_by_vector(
        &self,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<Document>, SynapticError> {
        Ok(self.search_by_vector(embedding, &trait_options(k)).await?)
    }

    async fn delete(&self, ids: &[&str]) -> Result<(), SynapticError> {
        Ok(self.delete_ids(ids).await?)
    }
}

/// `k == 0` means "use the configured k".
fn trait_options(k: usize) -> SearchOptions {
    SearchOptions {
        k: (k > 0).then_some(k),
        filter: None,
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn resolve_id(doc: &Document) -> String {
    match doc.metadata.get("id") {
        Some(Value::String(id)) => id.clone(),
        _ if !doc.id.is_empty() => doc.id.clone(),
        _ => Uuid::new_v4().to_string(),
    }
}

/// Format an embedding as a pgvector literal, e.g. `[0.1,-2,3.5]`.
///
/// Components are written in plain decimal notation.
pub fn vector_literal(vector: &[f32]) -> Result<String, AlloyDbError> {
    if vector.is_empty() {
        return Err(AlloyDbError::Embedding("embedding vector is empty".to_string()));
    }
    let mut out = String::with_capacity(vector.len() * 10 + 2);
    out.push('[');
    for (i, v) in vector.iter().enumerate() {
        if !v.is_finite() {
            return Err(AlloyDbError::Embedding(format!(
                "embedding component {i} is not finite: {v}"
            )));
        }
        if i > 0 {
            out.push(',');
        }
        out.push_str(&v.to_string());
    }
    out.push(']');
    Ok(out)
}

fn decode_metadata_json(
    column: &str,
    value: Option<SqlValue>,
) -> Result<BTreeMap<String, Value>, AlloyDbError> {
    let json = match value {
        None | Some(SqlValue::Null) => return Ok(BTreeMap::new()),
        Some(SqlValue::Json(v)) => v,
        Some(SqlValue::Text(s)) => {
            serde_json::from_str(&s).map_err(|e| AlloyDbError::MetadataDecode {
                column: column.to_string(),
                reason: e.to_string(),
            })?
        }
        Some(other) => {
            return Err(AlloyDbError::MetadataDecode {
                column: column.to_string(),
                reason: format!("expected JSON, got {other:?}"),
            })
        }
    };
    match json {
        Value::Object(map) => Ok(map.into_iter().collect()),
        other => Err(AlloyDbError::MetadataDecode {
            column: column.to_string(),
            reason: format!("expected a JSON object, got {other}"),
        }),
    }
}

fn unexpected(column: &str, expected: &str, got: Option<SqlValue>) -> AlloyDbError {
    AlloyDbError::ResultDecode {
        column: column.to_string(),
        reason: match got {
            Some(v) => format!("expected {expected}, got {v:?}"),
            None => "column missing from result".to_string(),
        },
    }
}
