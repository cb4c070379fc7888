//! Table initialization for the vector store and chat history.

use crate::identifier::{qualified, quote, validate_data_type, validate_identifier};
use crate::{AlloyDbError, SqlExecutor, Statement};

/// A column definition used when creating a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable,
        }
    }

    fn validate(&self) -> Result<(), AlloyDbError> {
        validate_identifier("column", &self.name)?;
        validate_data_type(&self.data_type)
    }

    fn definition(&self) -> String {
        let null = if self.nullable { "" } else { " NOT NULL" };
        format!("{} {}{}", quote(&self.name), self.data_type, null)
    }
}

/// Layout of a vector store table created by [`init_vectorstore_table`].
#[derive(Debug, Clone)]
pub struct VectorStoreTableConfig {
    pub table_name: String,
    pub vector_size: u32,
    pub schema_name: String,
    pub content_column: String,
    pub embedding_column: String,
    pub metadata_json_column: String,
    pub id_column: Column,
    pub metadata_columns: Vec<Column>,
    /// Drop an existing table of the same name first.
    pub overwrite_existing: bool,
    /// Create the JSON column holding metadata not covered by
    /// `metadata_columns`.
    pub store_metadata: bool,
}

impl VectorStoreTableConfig {
    pub fn new(table_name: impl Into<String>, vector_size: u32) -> Self {
        Self {
            table_name: table_name.into(),
            vector_size,
            schema_name: "public".to_string(),
            content_column: "content".to_string(),
            embedding_column: "embedding".to_string(),
            metadata_json_column: "langchain_metadata".to_string(),
            id_column: Column::new("langchain_id", "UUID", false),
            metadata_columns: Vec::new(),
            overwrite_existing: false,
            store_metadata: true,
        }
    }

    pub fn with_schema_name(mut self, schema_name: impl Into<String>) -> Self {
        self.schema_name = schema_name.into();
        self
    }

    pub fn with_content_column(mut self, column: impl Into<String>) -> Self {
        self.content_column = column.into();
        self
    }

    pub fn with_embedding_column(mut self, column: impl Into<String>) -> Self {
        self.embedding_column = column.into();
        self
    }

    pub fn with_metadata_json_column(mut self, column: impl Into<String>) -> Self {
        self.metadata_json_column = column.into();
        self
    }

    pub fn with_id_column(mut self, column: Column) -> Self {
        self.id_column = column;
        self
    }

    pub fn with_metadata_columns(mut self, columns: Vec<Column>) -> Self {
        self.metadata_columns = columns;
        self
    }

    pub fn with_overwrite_existing(mut self, overwrite: bool) -> Self {
        self.overwrite_existing = overwrite;
        self
    }

    pub fn with_store_metadata(mut self, store_metadata: bool) -> Self {
        self.store_metadata = store_metadata;
        self
    }

    /// The statements [`init_vectorstore_table`] runs, in order.
    pub fn statements(&self) -> Result<Vec<Statement>, AlloyDbError> {
        validate_identifier("schema", &self.schema_name)?;
        validate_identifier("table", &self.table_name)?;
        validate_identifier("column", &self.content_column)?;
        validate_identifier("column", &self.embedding_column)?;
        self.id_column.validate()?;
        for column in &self.metadata_columns {
            column.validate()?;
        }
        if self.store_metadata {
            validate_identifier("column", &self.metadata_json_column)?;
        }
        if self.vector_size == 0 {
            return Err(AlloyDbError::Config("vector_size must be > 0".to_string()));
        }

        let table = qualified(&self.schema_name, &self.table_name);
        let mut statements = vec![Statement::new("CREATE EXTENSION IF NOT EXISTS vector")];
        if self.overwrite_existing {
            statements.push(Statement::new(format!("DROP TABLE IF EXISTS {table}")));
        }

        let mut columns = vec![
            format!(
                "{} {} PRIMARY KEY",
                quote(&self.id_column.name),
                self.id_column.data_type
            ),
            format!("{} TEXT NOT NULL", quote(&self.content_column)),
            format!(
                "{} vector({}) NOT NULL",
                quote(&self.embedding_column),
                self.vector_size
            ),
        ];
        columns.extend(self.metadata_columns.iter().map(Column::definition));
        if self.store_metadata {
            columns.push(format!("{} JSON", quote(&self.metadata_json_column)));
        }
        statements.push(Statement::new(format!(
            "CREATE TABLE {table} ({})",
            columns.join(", ")
        )));
        Ok(statements)
    }
}

/// Create the vector extension and a table laid out for
/// [`AlloyDbVectorStore`](crate::AlloyDbVectorStore).
///
/// Fails if the table already exists unless `overwrite_existing` is set.
pub async fn init_vectorstore_table(
    executor: &dyn SqlExecutor,
    config: &VectorStoreTableConfig,
) -> Result<(), AlloyDbError> {
    let statements = config.statements()?;
    let target = format!("{}.{}", config.schema_name, config.table_name);
    tracing::info!(table = %target, dims = config.vector_size, "initializing vector store table");
    executor
        .execute_batch(&statements)
        .await
        .map_err(|e| AlloyDbError::database("create vector store table", target, e))
}

/// Location of a chat history table.
#[derive(Debug, Clone)]
pub struct ChatHistoryConfig {
    pub table_name: String,
    pub schema_name: String,
    /// Allow `clear` and `set_messages`.
    pub overwrite: bool,
}

impl ChatHistoryConfig {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            schema_name: "public".to_string(),
            overwrite: false,
        }
    }

    pub fn with_schema_name(mut self, schema_name: impl Into<String>) -> Self {
        self.schema_name = schema_name.into();
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), AlloyDbError> {
        validate_identifier("schema", &self.schema_name)?;
        validate_identifier("table", &self.table_name)
    }

    pub(crate) fn qualified_table(&self) -> String {
        qualified(&self.schema_name, &self.table_name)
    }
}

/// Create a chat history table if it does not exist.
pub async fn init_chat_history_table(
    executor: &dyn SqlExecutor,
    config: &ChatHistoryConfig,
) -> Result<(), AlloyDbError> {
    config.validate()?;
    let sql = format!(
        r#"CREATE TABLE IF NOT EXISTS {table} (
            id SERIAL PRIMARY KEY,
            session_id TEXT NOT NULL,
            data JSONB NOT NULL,
            type TEXT NOT NULL,
            timestamp TIMESTAMPTZ NOT NULL DEFAULT now()
        )"#,
        table = config.qualified_table(),
    );
    tracing::info!(table = %config.table_name, schema = %config.schema_name, "initializing chat history table");
    executor
        .execute(&Statement::new(sql))
        .await
        .map(|_| ())
        .map_err(|e| AlloyDbError::database("create chat history table", config.table_name.clone(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout() {
        let stmts = VectorStoreTableConfig::new("docs", 768).statements().unwrap();
        assert_eq!(stmts.len(), 2);
        assert_eq!(stmts[0].sql, "CREATE EXTENSION IF NOT EXISTS vector");
        assert_eq!(
            stmts[1].sql,
            "CREATE TABLE \"public\".\"docs\" (\"langchain_id\" UUID PRIMARY KEY, \
             \"content\" TEXT NOT NULL, \"embedding\" vector(768) NOT NULL, \
             \"langchain_metadata\" JSON)"
        );
    }

    #[test]
    fn metadata_columns_and_overwrite() {
        let stmts = VectorStoreTableConfig::new("docs", 3)
            .with_schema_name("rag")
            .with_metadata_columns(vec![
                Column::new("region", "TEXT", true),
                Column::new("page", "INTEGER", false),
            ])
            .with_overwrite_existing(true)
            .with_store_metadata(false)
            .statements()
            .unwrap();
        assert_eq!(stmts.len(), 3);
        assert_eq!(stmts[1].sql, "DROP TABLE IF EXISTS \"rag\".\"docs\"");
        assert!(stmts[2].sql.contains("\"region\" TEXT, \"page\" INTEGER NOT NULL)"));
        assert!(!stmts[2].sql.contains("langchain_metadata"));
    }

    #[test]
    fn rejects_bad_layouts() {
        assert!(VectorStoreTableConfig::new("docs", 0).statements().is_err());
        assert!(VectorStoreTableConfig::new("docs;--", 3).statements().is_err());
        assert!(VectorStoreTableConfig::new("docs", 3)
            .with_metadata_columns(vec![Column::new("page", "INT); DROP TABLE x", true)])
            .statements()
            .is_err());
    }

    #[test]
    fn chat_history_config_validation() {
        assert!(ChatHistoryConfig::new("history").validate().is_ok());
        assert!(ChatHistoryConfig::new("history").with_schema_name("a b").validate().is_err());
        assert_eq!(
            ChatHistoryConfig::new("history").qualified_table(),
            "\"public\".\"history\""
        );
    }
}
