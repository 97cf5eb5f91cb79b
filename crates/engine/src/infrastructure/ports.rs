//! Port traits for the Engine's external dependencies.
//!
//! Use cases depend on these traits, never on sqlx or the token table
//! directly, so they can be exercised against mocks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gamelink_domain::{BufferedCommand, MessageId, ServerId};

pub use gamelink_shared::ClockPort;

// =============================================================================
// Errors
// =============================================================================

/// Repository operation errors with context for debugging.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    /// Database operation failed - includes operation name for tracing.
    #[error("Database error in {operation}: {message}")]
    Database {
        operation: &'static str,
        message: String,
    },

    /// A stored column could not be mapped back to its domain type.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl RepoError {
    pub fn database(operation: &'static str, message: impl ToString) -> Self {
        Self::Database {
            operation,
            message: message.to_string(),
        }
    }

    pub fn serialization(message: impl ToString) -> Self {
        Self::Serialization(message.to_string())
    }
}

/// Failures of the token exchange and hub authorization.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Access key rejected")]
    InvalidAccessKey,
    #[error("Bearer token is not recognized")]
    InvalidToken,
    #[error("Bearer token has expired")]
    TokenExpired,
}

// =============================================================================
// Command store
// =============================================================================

/// Outcome reported for a `Sent` command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutcome {
    pub success: bool,
    pub response: Option<String>,
    pub error: Option<String>,
}

/// Persistence for buffered commands.
///
/// Every status change is a single conditional row update keyed on the
/// expected current status. The `bool` results report whether the row moved;
/// `false` means it was missing or already past that state, and is never an
/// error.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandStore: Send + Sync {
    async fn insert(&self, command: &BufferedCommand) -> Result<(), RepoError>;

    async fn get(&self, id: MessageId) -> Result<Option<BufferedCommand>, RepoError>;

    /// `Pending` rows for `server_id`, oldest first.
    async fn list_pending(&self, server_id: ServerId) -> Result<Vec<BufferedCommand>, RepoError>;

    /// `Pending -> Sent`, stamping `sent_at`.
    async fn mark_sent(&self, id: MessageId, at: DateTime<Utc>) -> Result<bool, RepoError>;

    /// `Sent -> Completed | Failed`.
    async fn record_response(
        &self,
        id: MessageId,
        outcome: CommandOutcome,
    ) -> Result<bool, RepoError>;

    /// `Pending -> Failed` for rows that cannot be published at all.
    async fn mark_failed(&self, id: MessageId, error: String) -> Result<bool, RepoError>;

    async fn delete(&self, id: MessageId) -> Result<bool, RepoError>;

    /// Remove `Completed`/`Failed` rows created before `cutoff`.
    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<usize, RepoError>;

    /// `Sent` rows whose `sent_at` is before `cutoff`.
    async fn list_sent_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<BufferedCommand>, RepoError>;
}

// =============================================================================
// Token issuance
// =============================================================================

/// Bearer credential handed out by the token exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[cfg_attr(test, mockall::automock)]
pub trait TokenIssuer: Send + Sync {
    /// Trade a long-lived access key for a short-lived bearer token.
    fn issue(&self, access_key: &str) -> Result<IssuedToken, AuthError>;

    fn validate(&self, bearer: &str) -> Result<(), AuthError>;
}
