use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use synaptic_core::{MemoryStore, Message, SynapticError};

use crate::{AlloyDbError, ChatHistoryConfig, SqlExecutor, SqlRow, SqlValue, Statement};

const REQUIRED_COLUMNS: [&str; 4] = ["id", "session_id", "data", "type"];

/// Chat message history stored in a PostgreSQL table, one row per message.
///
/// The table needs the columns `id` (ordering), `session_id`, `data`
/// (JSON-encoded content) and `type` (`human`, `ai` or `system`); see
/// [`init_chat_history_table`](crate::init_chat_history_table).
pub struct AlloyDbChatMessageHistory {
    executor: Arc<dyn SqlExecutor>,
    config: ChatHistoryConfig,
}

impl AlloyDbChatMessageHistory {
    /// Create a history over an existing table, checking its columns.
    pub async fn new(
        executor: Arc<dyn SqlExecutor>,
        config: ChatHistoryConfig,
    ) -> Result<Self, AlloyDbError> {
        config.validate()?;
        let history = Self { executor, config };
        history.validate_table().await?;
        Ok(history)
    }

    pub fn config(&self) -> &ChatHistoryConfig {
        &self.config
    }

    async fn validate_table(&self) -> Result<(), AlloyDbError> {
        let statement = Statement::new(
            "SELECT column_name FROM information_schema.columns WHERE table_schema = $1 AND table_name = $2",
        )
        .bind(SqlValue::Text(self.config.schema_name.clone()))
        .bind(SqlValue::Text(self.config.table_name.clone()));
        let rows = self
            .executor
            .fetch_all(&statement)
            .await
            .map_err(|e| AlloyDbError::database("validate table", self.config.table_name.clone(), e))?;
        if rows.is_empty() {
            return Err(AlloyDbError::TableNotFound {
                schema: self.config.schema_name.clone(),
                table: self.config.table_name.clone(),
            });
        }

        let present: Vec<&str> = rows
            .iter()
            .filter_map(|row| match row.get("column_name") {
                Some(SqlValue::Text(name)) => Some(name.as_str()),
                _ => None,
            })
            .collect();
        if let Some(missing) = REQUIRED_COLUMNS.iter().find(|c| !present.contains(*c)) {
            return Err(AlloyDbError::ColumnNotFound {
                table: self.config.table_name.clone(),
                column: missing.to_string(),
            });
        }
        Ok(())
    }

    fn insert_statement(&self, session_id: &str, message: &Message) -> Statement {
        Statement::new(format!(
            "INSERT INTO {} (session_id, data, type) VALUES ($1, $2, $3)",
            self.config.qualified_table()
        ))
        .bind(SqlValue::Text(session_id.to_string()))
        .bind(SqlValue::Json(Value::String(message.content().to_string())))
        .bind(SqlValue::Text(message_type(message).to_string()))
    }

    fn clear_statement(&self, session_id: &str) -> Statement {
        Statement::new(format!(
            "DELETE FROM {} WHERE session_id = $1",
            self.config.qualified_table()
        ))
        .bind(SqlValue::Text(session_id.to_string()))
    }

    pub async fn add_message(&self, session_id: &str, message: &Message) -> Result<(), AlloyDbError> {
        check_session(session_id)?;
        let statement = self.insert_statement(session_id, message);
        self.executor
            .execute(&statement)
            .await
            .map_err(|e| AlloyDbError::database("add message", session_id, e))?;
        Ok(())
    }

    /// Append several messages as one batch.
    pub async fn add_messages(&self, session_id: &str, messages: &[Message]) -> Result<(), AlloyDbError> {
        check_session(session_id)?;
        let statements: Vec<Statement> = messages
            .iter()
            .map(|m| self.insert_statement(session_id, m))
            .collect();
        self.executor
            .execute_batch(&statements)
            .await
            .map_err(|e| AlloyDbError::database("add messages", session_id, e))
    }

    /// All messages of a session in insertion order.
    pub async fn messages(&self, session_id: &str) -> Result<Vec<Message>, AlloyDbError> {
        check_session(session_id)?;
        let statement = Statement::new(format!(
            "SELECT id, session_id, data, type FROM {} WHERE session_id = $1 ORDER BY id",
            self.config.qualified_table()
        ))
        .bind(SqlValue::Text(session_id.to_string()));
        let rows = self
            .executor
            .fetch_all(&statement)
            .await
            .map_err(|e| AlloyDbError::database("load messages", session_id, e))?;
        rows.into_iter().map(decode_message).collect()
    }

    /// Delete every message of a session. Requires overwrite.
    pub async fn clear(&self, session_id: &str) -> Result<(), AlloyDbError> {
        check_session(session_id)?;
        self.require_overwrite("clearing chat history")?;
        self.executor
            .execute(&self.clear_statement(session_id))
            .await
            .map_err(|e| AlloyDbError::database("clear session", session_id, e))?;
        Ok(())
    }

    /// Replace a session's messages in one batch. Requires overwrite.
    pub async fn set_messages(&self, session_id: &str, messages: &[Message]) -> Result<(), AlloyDbError> {
        check_session(session_id)?;
        self.require_overwrite("replacing chat history")?;
        let mut statements = vec![self.clear_statement(session_id)];
        statements.extend(messages.iter().map(|m| self.insert_statement(session_id, m)));
        self.executor
            .execute_batch(&statements)
            .await
            .map_err(|e| AlloyDbError::database("set messages", session_id, e))
    }

    fn require_overwrite(&self, operation: &'static str) -> Result<(), AlloyDbError> {
        if self.config.overwrite {
            Ok(())
        } else {
            tracing::warn!(table = %self.config.table_name, "{operation} refused without overwrite");
            Err(AlloyDbError::OverwriteRequired { operation })
        }
    }
}

#[async_trait]
impl MemoryStore for AlloyDbChatMessageHistory {
    async fn append(&self, session_id: &str, message: Message) -> Result<(), SynapticError> {
        Ok(self.add_message(session_id, &message).await?)
    }

    async fn load(&self, session_id: &str) -> Result<Vec<Message>, SynapticError> {
        Ok(self.messages(session_id).await?)
    }

    async fn clear(&self, session_id: &str) -> Result<(), SynapticError> {
        Ok(AlloyDbChatMessageHistory::clear(self, session_id).await?)
    }
}

fn check_session(session_id: &str) -> Result<(), AlloyDbError> {
    if session_id.is_empty() {
        Err(AlloyDbError::Config("session ID must be provided".to_string()))
    } else {
        Ok(())
    }
}

fn message_type(message: &Message) -> &'static str {
    match message {
        Message::Human { .. } => "human",
        Message::AI { .. } => "ai",
        Message::System { .. } => "system",
    }
}

fn decode_message(mut row: SqlRow) -> Result<Message, AlloyDbError> {
    let content = match row.take("data") {
        Some(SqlValue::Json(Value::String(s))) => s,
        Some(SqlValue::Text(s)) => {
            serde_json::from_str::<String>(&s).map_err(|e| AlloyDbError::MetadataDecode {
                column: "data".to_string(),
                reason: e.to_string(),
            })?
        }
        other => {
            return Err(AlloyDbError::MetadataDecode {
                column: "data".to_string(),
                reason: format!("expected a JSON string, got {other:?}"),
            })
        }
    };
    match row.take("type") {
        Some(SqlValue::Text(t)) => match t.as_str() {
            "human" => Ok(Message::human(content)),
            "ai" => Ok(Message::ai(content)),
            "system" => Ok(Message::system(content)),
            _ => Err(AlloyDbError::UnsupportedMessageType(t)),
        },
        other => Err(AlloyDbError::ResultDecode {
            column: "type".to_string(),
            reason: format!("expected text, got {other:?}"),
        }),
    }
}
