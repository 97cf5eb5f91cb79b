//! SQLite-backed command store.
//!
//! One row per buffered command. Timestamps are stored as fixed-width RFC 3339
//! UTC strings (microsecond precision, `Z` suffix) so lexical order equals
//! chronological order and range predicates work on the text column.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use gamelink_domain::{BufferedCommand, CommandStatus, MessageId, ServerId};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::infrastructure::ports::{ClockPort, CommandOutcome, CommandStore, RepoError};

const SELECT_COLUMNS: &str = "id, server_id, message_type, payload, created_at, sent_at, \
                              status, response_payload, error_message";

pub(crate) fn encode_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_time(raw: &str) -> Result<DateTime<Utc>, RepoError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepoError::serialization(format!("Invalid datetime '{raw}': {e}")))
}

/// SQLite implementation of [`CommandStore`].
pub struct SqliteCommandStore {
    pool: SqlitePool,
    clock: Arc<dyn ClockPort>,
}

impl SqliteCommandStore {
    pub async fn new(db_path: &str, clock: Arc<dyn ClockPort>) -> Result<Self, RepoError> {
        let pool = SqlitePool::connect(&format!("sqlite:{}?mode=rwc", db_path))
            .await
            .map_err(|e| RepoError::database("connect", e))?;
        Self::with_pool(pool, clock).await
    }

    /// Use an existing pool, creating the schema if needed.
    pub async fn with_pool(pool: SqlitePool, clock: Arc<dyn ClockPort>) -> Result<Self, RepoError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS buffered_commands (
                id TEXT PRIMARY KEY,
                server_id TEXT NOT NULL,
                message_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL,
                sent_at TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                response_payload TEXT,
                error_message TEXT,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| RepoError::database("create_schema", e))?;

        // Pending backlog scan per target, FIFO
        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_buffered_commands_backlog
            ON buffered_commands(server_id, status, created_at)
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| RepoError::database("create_schema", e))?;

        // Cleanup sweep and stale scan
        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_buffered_commands_status
            ON buffered_commands(status, created_at)
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| RepoError::database("create_schema", e))?;

        Ok(Self { pool, clock })
    }

    fn row_to_command(row: SqliteRow) -> Result<BufferedCommand, RepoError> {
        let id: String = row.get("id");
        let server_id: String = row.get("server_id");
        let status: String = row.get("status");
        let created_at: String = row.get("created_at");
        let sent_at: Option<String> = row.get("sent_at");

        Ok(BufferedCommand {
            id: MessageId::from_str(&id)
                .map_err(|e| RepoError::serialization(format!("Invalid command id: {e}")))?,
            server_id: ServerId::from_str(&server_id)
                .map_err(|e| RepoError::serialization(format!("Invalid server id: {e}")))?,
            message_type: row.get("message_type"),
            payload: row.get("payload"),
            created_at: decode_time(&created_at)?,
            sent_at: sent_at.as_deref().map(decode_time).transpose()?,
            status: CommandStatus::from_str(&status).map_err(RepoError::serialization)?,
            response_payload: row.get("response_payload"),
            error_message: row.get("error_message"),
        })
    }
}

#[async_trait]
impl CommandStore for SqliteCommandStore {
    async fn insert(&self, command: &BufferedCommand) -> Result<(), RepoError> {
        sqlx::query(
            r#"
            INSERT INTO buffered_commands
            (id, server_id, message_type, payload, created_at, sent_at, status,
             response_payload, error_message, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(command.id.to_string())
        .bind(command.server_id.to_string())
        .bind(&command.message_type)
        .bind(&command.payload)
        .bind(encode_time(command.created_at))
        .bind(command.sent_at.map(encode_time))
        .bind(command.status.as_str())
        .bind(&command.response_payload)
        .bind(&command.error_message)
        .bind(encode_time(self.clock.now()))
        .execute(&self.pool)
        .await
        .map_err(|e| RepoError::database("insert", e))?;

        Ok(())
    }

    async fn get(&self, id: MessageId) -> Result<Option<BufferedCommand>, RepoError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM buffered_commands WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepoError::database("get", e))?;

        row.map(Self::row_to_command).transpose()
    }

    async fn list_pending(&self, server_id: ServerId) -> Result<Vec<BufferedCommand>, RepoError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {SELECT_COLUMNS} FROM buffered_commands
            WHERE server_id = ? AND status = 'pending'
            ORDER BY created_at ASC, rowid ASC
            "#
        ))
        .bind(server_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepoError::database("list_pending", e))?;

        rows.into_iter().map(Self::row_to_command).collect()
    }

    async fn mark_sent(&self, id: MessageId, at: DateTime<Utc>) -> Result<bool, RepoError> {
        let result = sqlx::query(
            r#"
            UPDATE buffered_commands
            SET status = 'sent', sent_at = ?, updated_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(encode_time(at))
        .bind(encode_time(self.clock.now()))
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| RepoError::database("mark_sent", e))?;

        Ok(result.rows_affected() == 1)
    }

    async fn record_response(
        &self,
        id: MessageId,
        outcome: CommandOutcome,
    ) -> Result<bool, RepoError> {
        let status = if outcome.success {
            CommandStatus::Completed
        } else {
            CommandStatus::Failed
        };

        let result = sqlx::query(
            r#"
            UPDATE buffered_commands
            SET status = ?, response_payload = ?, error_message = ?, updated_at = ?
            WHERE id = ? AND status = 'sent'
            "#,
        )
        .bind(status.as_str())
        .bind(outcome.response)
        .bind(outcome.error)
        .bind(encode_time(self.clock.now()))
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| RepoError::database("record_response", e))?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_failed(&self, id: MessageId, error: String) -> Result<bool, RepoError> {
        let result = sqlx::query(
            r#"
            UPDATE buffered_commands
            SET status = 'failed', error_message = ?, updated_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(error)
        .bind(encode_time(self.clock.now()))
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| RepoError::database("mark_failed", e))?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete(&self, id: MessageId) -> Result<bool, RepoError> {
        let result = sqlx::query("DELETE FROM buffered_commands WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| RepoError::database("delete", e))?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<usize, RepoError> {
        let result = sqlx::query(
            r#"
            DELETE FROM buffered_commands
            WHERE status IN ('completed', 'failed')
            AND created_at < ?
            "#,
        )
        .bind(encode_time(cutoff))
        .execute(&self.pool)
        .await
        .map_err(|e| RepoError::database("cleanup", e))?;

        Ok(result.rows_affected() as usize)
    }

    async fn list_sent_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<BufferedCommand>, RepoError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {SELECT_COLUMNS} FROM buffered_commands
            WHERE status = 'sent' AND sent_at < ?
            ORDER BY sent_at ASC
            "#
        ))
        .bind(encode_time(cutoff))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepoError::database("list_sent_before", e))?;

        rows.into_iter().map(Self::row_to_command).collect()
    }
}
