//! Persistence contracts for the controller.
//!
//! Services depend on these traits only; [`sqlite::SqliteStore`] implements
//! all of them. Methods are synchronous — SQLite work is short and runs
//! under a connection lock.

mod sqlite;

pub use sqlite::SqliteStore;

use crate::domain::{
    Agent, AgentStatus, AgentTask, Check, CheckResult, CheckStatus, CheckType,
};
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("migration failed: {0}")]
    Migration(String),
    #[error("row encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("not found")]
    NotFound,
    #[error("agent token already registered")]
    DuplicateToken,
}

pub trait CheckStore: Send + Sync {
    /// Assign an id and timestamps, persist the check.
    fn create(&self, check: &mut Check) -> Result<(), StoreError>;
    fn get_by_id(&self, id: &str) -> Result<Option<Check>, StoreError>;
    fn update_status(&self, id: &str, status: CheckStatus) -> Result<(), StoreError>;
    /// Newest first. Callers are expected to clamp `limit`/`offset`.
    fn list(&self, limit: i64, offset: i64) -> Result<Vec<Check>, StoreError>;
    fn count_by_status(&self, status: CheckStatus) -> Result<i64, StoreError>;
}

pub trait AgentStore: Send + Sync {
    /// Assign an id and `created_at`, persist with status offline.
    /// Fails with [`StoreError::DuplicateToken`] when the token is taken.
    fn create(&self, agent: &mut Agent) -> Result<(), StoreError>;
    fn get_by_token(&self, token: &str) -> Result<Option<Agent>, StoreError>;
    fn get_by_id(&self, id: &str) -> Result<Option<Agent>, StoreError>;
    /// Set `last_heartbeat = now` and status online.
    fn update_heartbeat(&self, id: &str) -> Result<(), StoreError>;
    fn update_status(&self, id: &str, status: AgentStatus) -> Result<(), StoreError>;
    fn update_capabilities(&self, id: &str, capabilities: &[CheckType]) -> Result<(), StoreError>;
    /// Agents currently marked online, most recent heartbeat first.
    fn list_online(&self) -> Result<Vec<Agent>, StoreError>;
}

pub trait ResultStore: Send + Sync {
    fn create(&self, result: &mut CheckResult) -> Result<(), StoreError>;
    fn get_by_check_id(&self, check_id: &str) -> Result<Vec<CheckResult>, StoreError>;
    fn get_by_agent_id(&self, agent_id: &str, limit: i64) -> Result<Vec<CheckResult>, StoreError>;
    fn get_latest_by_check_id(
        &self,
        check_id: &str,
        limit: i64,
    ) -> Result<Vec<CheckResult>, StoreError>;
    fn delete_old_results(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError>;
}

pub trait AgentTaskStore: Send + Sync {
    fn create_task(&self, task: &mut AgentTask) -> Result<(), StoreError>;
    /// In-flight rows still `processing` whose `taken_at` predates
    /// `now - timeout`, oldest first.
    fn stuck_tasks(&self, timeout: Duration) -> Result<Vec<AgentTask>, StoreError>;
    fn delete_task(&self, agent_id: &str, check_id: &str) -> Result<(), StoreError>;
    fn delete_tasks_by_agent(&self, agent_id: &str) -> Result<(), StoreError>;
    fn count_processing(&self) -> Result<i64, StoreError>;
}
