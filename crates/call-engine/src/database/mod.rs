//! # Call Store (Persistence Gateway)
//!
//! The tracker persists calls through the [`CallStore`] trait. Each trait
//! method is one atomic unit of work: implementations run every statement of
//! a method inside a single transaction, so a crash can no longer leave a
//! call row without its current-call row.
//!
//! | Method | Statements |
//! |---|---|
//! | [`CallStore::open_call`] | insert call (Ringing), insert current call (Dialing) |
//! | [`CallStore::start_call`] | call to Active with start time and wait, current call to Link |
//! | [`CallStore::resume_transferred_call`] | call back to Active with transfer mark, insert current call |
//! | [`CallStore::end_call`] | read status, close the call, delete current call |
//!
//! The two lookups, [`CallStore::lookup_active_agent_id`] and
//! [`CallStore::active_agent_numbers`], read the agent table only.
//!
//! Durations are always computed by the store from its own timestamps.
//!
//! Two implementations ship with the crate: [`MySqlCallStore`] for the
//! production call-center schema and [`MemoryCallStore`] for tests and dry
//! runs.

pub mod memory;
pub mod mysql;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use memory::MemoryCallStore;
pub use mysql::MySqlCallStore;

/// Result alias for store operations
pub type DbResult<T> = std::result::Result<T, DatabaseError>;

/// Persisted call status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallStatus {
    Ringing,
    Active,
    /// Ended after being answered (`Finalizada`)
    Finalized,
    /// Ended without being answered (`Sin respuesta`)
    Unanswered,
    /// Any value written by other tools
    Other(String),
}

impl CallStatus {
    /// Column value
    pub fn as_str(&self) -> &str {
        match self {
            CallStatus::Ringing => "Ringing",
            CallStatus::Active => "Active",
            CallStatus::Finalized => "Finalizada",
            CallStatus::Unanswered => "Sin respuesta",
            CallStatus::Other(value) => value,
        }
    }

    /// Parse a column value, ignoring case
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "ringing" => CallStatus::Ringing,
            "active" => CallStatus::Active,
            "finalizada" => CallStatus::Finalized,
            "sin respuesta" => CallStatus::Unanswered,
            _ => CallStatus::Other(value.to_string()),
        }
    }

    /// Whether the call has ended at least once
    pub fn is_ended(&self) -> bool {
        matches!(self, CallStatus::Finalized | CallStatus::Unanswered)
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tag on the current-call row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CurrentCallEvent {
    Dialing,
    Link,
}

impl CurrentCallEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            CurrentCallEvent::Dialing => "Dialing",
            CurrentCallEvent::Link => "Link",
        }
    }
}

/// Everything needed to open a call record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCall {
    /// Conversation-level id, stored in the `uniqueid` columns
    pub linked_id: String,
    pub caller_number: String,
    pub agent_id: i64,
    /// Channel of the originating leg
    pub channel: String,
    /// Dialled extension for internal calls, `-` otherwise
    pub channel_client: String,
    pub queue: String,
    pub campaign_id: i64,
}

/// A new leg for a call that had already ended once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferLeg {
    pub linked_id: String,
    /// Number the call was transferred to
    pub transfer: String,
    pub channel: String,
    pub channel_client: String,
    pub queue: String,
}

/// What [`CallStore::end_call`] did to the call row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    /// Active call closed as `Finalizada` with talk time
    Finalized,
    /// Ringing call closed as `Sin respuesta` with wait time
    Unanswered,
    /// Status left as it was; only the current-call row was removed
    Unchanged(CallStatus),
}

/// Persistence gateway used by the call tracker
#[async_trait]
pub trait CallStore: Send + Sync {
    /// Id of the active agent registered with this number
    async fn lookup_active_agent_id(&self, caller_number: &str) -> DbResult<Option<i64>>;

    /// Numbers of all active agents, ascending
    async fn active_agent_numbers(&self) -> DbResult<Vec<String>>;

    /// Current status of the call, [`DatabaseError::NotFound`] if absent
    async fn read_call_status(&self, linked_id: &str) -> DbResult<CallStatus>;

    /// Insert the call (Ringing) and its current-call row (Dialing)
    async fn open_call(&self, call: &NewCall) -> DbResult<()>;

    /// First bridge: call to Active, stamp start time and wait, tag Link
    async fn start_call(&self, linked_id: &str) -> DbResult<()>;

    /// Re-bridge after an end: call to Active with transfer mark plus a new current-call row
    async fn resume_transferred_call(&self, leg: &TransferLeg) -> DbResult<()>;

    /// Close the call according to its status and delete the current-call row
    async fn end_call(&self, linked_id: &str) -> DbResult<CallOutcome>;
}

/// Database error types
#[derive(thiserror::Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Query execution error: {0}")]
    Query(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Database operation timed out after {0} ms")]
    Timeout(u64),

    #[error("Database unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DatabaseError::NotFound(err.to_string()),
            sqlx::Error::Database(_) => DatabaseError::Query(err.to_string()),
            sqlx::Error::Io(_) | sqlx::Error::Tls(_) => DatabaseError::Connection(err.to_string()),
            sqlx::Error::Configuration(_) => DatabaseError::Connection(err.to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                DatabaseError::Unavailable(err.to_string())
            }
            _ => DatabaseError::Query(err.to_string()),
        }
    }
}
