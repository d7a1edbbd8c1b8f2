//! SQLite-backed implementation of the store contracts.

use super::{
    AgentStore, AgentTaskStore, CheckStore, ResultStore, StoreError,
};
use crate::domain::{
    Agent, AgentStatus, AgentTask, AgentTaskStatus, Check, CheckResult, CheckStatus, CheckType,
};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, Result as SqlResult, Row};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Thread-safe store over a single SQLite connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// In-memory database, used by tests and throwaway setups.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(include_str!("../../migrations/001_init.sql"))
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        Ok(())
    }
}

impl CheckStore for SqliteStore {
    fn create(&self, check: &mut Check) -> Result<(), StoreError> {
        if check.id.is_empty() {
            check.id = Uuid::new_v4().to_string();
        }
        let now = Utc::now();
        check.created_at = now;
        check.updated_at = now;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO checks (id, type, target, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                check.id,
                check.check_type.as_str(),
                check.target,
                check.status.as_str(),
                fmt_time(check.created_at),
                fmt_time(check.updated_at),
            ],
        )?;
        Ok(())
    }

    fn get_by_id(&self, id: &str) -> Result<Option<Check>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, type, target, status, created_at, updated_at FROM checks WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], row_to_check)?;
        match rows.next() {
            Some(check) => Ok(Some(check?)),
            None => Ok(None),
        }
    }

    fn update_status(&self, id: &str, status: CheckStatus) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE checks SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), fmt_time(Utc::now()), id],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    fn list(&self, limit: i64, offset: i64) -> Result<Vec<Check>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, type, target, status, created_at, updated_at FROM checks
             ORDER BY created_at DESC LIMIT ?1 OFFSET ?2",
        )?;
        let checks = stmt
            .query_map(params![limit, offset], row_to_check)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(checks)
    }

    fn count_by_status(&self, status: CheckStatus) -> Result<i64, StoreError> {
        let conn = self.conn.lock().unwrap();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM checks WHERE status = ?1",
            params![status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

impl AgentStore for SqliteStore {
    fn create(&self, agent: &mut Agent) -> Result<(), StoreError> {
        if agent.id.is_empty() {
            agent.id = Uuid::new_v4().to_string();
        }
        agent.created_at = Utc::now();
        agent.status = AgentStatus::Offline;

        let capabilities = serde_json::to_string(&agent.capabilities)?;
        let conn = self.conn.lock().unwrap();
        let inserted = conn.execute(
            "INSERT INTO agents (id, name, token, location, status, capabilities, last_heartbeat, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                agent.id,
                agent.name,
                agent.token,
                agent.location,
                agent.status.as_str(),
                capabilities,
                fmt_time(agent.last_heartbeat),
                fmt_time(agent.created_at),
            ],
        );

        match inserted {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::DuplicateToken)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn get_by_token(&self, token: &str) -> Result<Option<Agent>, StoreError> {
        self.get_agent_where("token = ?1", token)
    }

    fn get_by_id(&self, id: &str) -> Result<Option<Agent>, StoreError> {
        self.get_agent_where("id = ?1", id)
    }

    fn update_heartbeat(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE agents SET last_heartbeat = ?1, status = 'online' WHERE id = ?2",
            params![fmt_time(Utc::now()), id],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    fn update_status(&self, id: &str, status: AgentStatus) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE agents SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    fn update_capabilities(&self, id: &str, capabilities: &[CheckType]) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(capabilities)?;
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE agents SET capabilities = ?1 WHERE id = ?2",
            params![encoded, id],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    fn list_online(&self) -> Result<Vec<Agent>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, token, location, status, capabilities, last_heartbeat, created_at
             FROM agents WHERE status = 'online' ORDER BY last_heartbeat DESC",
        )?;
        let agents = stmt
            .query_map([], row_to_agent)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(agents)
    }
}

impl SqliteStore {
    fn get_agent_where(&self, clause: &str, value: &str) -> Result<Option<Agent>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let query = format!(
            "SELECT id, name, token, location, status, capabilities, last_heartbeat, created_at
             FROM agents WHERE {clause}"
        );
        let mut stmt = conn.prepare(&query)?;
        let mut rows = stmt.query_map(params![value], row_to_agent)?;
        match rows.next() {
            Some(agent) => Ok(Some(agent?)),
            None => Ok(None),
        }
    }
}

impl ResultStore for SqliteStore {
    fn create(&self, result: &mut CheckResult) -> Result<(), StoreError> {
        if result.id.is_empty() {
            result.id = Uuid::new_v4().to_string();
        }
        result.created_at = Utc::now();

        let data = serde_json::to_string(&result.data)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO check_results (id, check_id, agent_id, success, data, error, duration, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                result.id,
                result.check_id,
                result.agent_id,
                result.success,
                data,
                result.error,
                result.duration,
                fmt_time(result.created_at),
            ],
        )?;
        Ok(())
    }

    fn get_by_check_id(&self, check_id: &str) -> Result<Vec<CheckResult>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, check_id, agent_id, success, data, error, duration, created_at
             FROM check_results WHERE check_id = ?1 ORDER BY created_at ASC",
        )?;
        let results = stmt
            .query_map(params![check_id], row_to_result)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(results)
    }

    fn get_by_agent_id(&self, agent_id: &str, limit: i64) -> Result<Vec<CheckResult>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, check_id, agent_id, success, data, error, duration, created_at
             FROM check_results WHERE agent_id = ?1 ORDER BY created_at DESC LIMIT ?2",
        )?;
        let results = stmt
            .query_map(params![agent_id, limit], row_to_result)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(results)
    }

    fn get_latest_by_check_id(
        &self,
        check_id: &str,
        limit: i64,
    ) -> Result<Vec<CheckResult>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, check_id, agent_id, success, data, error, duration, created_at
             FROM check_results WHERE check_id = ?1 ORDER BY created_at DESC LIMIT ?2",
        )?;
        let results = stmt
            .query_map(params![check_id, limit], row_to_result)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(results)
    }

    fn delete_old_results(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM check_results WHERE created_at < ?1",
            params![fmt_time(older_than)],
        )?;
        Ok(deleted as u64)
    }
}

impl AgentTaskStore for SqliteStore {
    fn create_task(&self, task: &mut AgentTask) -> Result<(), StoreError> {
        if task.id.is_empty() {
            task.id = Uuid::new_v4().to_string();
        }
        task.created_at = Utc::now();

        let data = serde_json::to_string(&task.task_data)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO agent_tasks (id, agent_id, check_id, task_data, taken_at, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                task.id,
                task.agent_id,
                task.check_id,
                data,
                fmt_time(task.taken_at),
                task.status.as_str(),
                fmt_time(task.created_at),
            ],
        )?;
        Ok(())
    }

    fn stuck_tasks(&self, timeout: Duration) -> Result<Vec<AgentTask>, StoreError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::zero());
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, agent_id, check_id, task_data, taken_at, status, created_at
             FROM agent_tasks WHERE taken_at < ?1 AND status = 'processing'
             ORDER BY taken_at ASC",
        )?;
        let tasks = stmt
            .query_map(params![fmt_time(cutoff)], row_to_agent_task)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(tasks)
    }

    fn delete_task(&self, agent_id: &str, check_id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM agent_tasks WHERE agent_id = ?1 AND check_id = ?2",
            params![agent_id, check_id],
        )?;
        if deleted == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    fn delete_tasks_by_agent(&self, agent_id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM agent_tasks WHERE agent_id = ?1",
            params![agent_id],
        )?;
        Ok(())
    }

    fn count_processing(&self) -> Result<i64, StoreError> {
        let conn = self.conn.lock().unwrap();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM agent_tasks WHERE status = 'processing'",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn fmt_time(dt: DateTime<Utc>) -> String {
    // Fixed-width micros keep lexicographic order chronological.
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_check(row: &Row<'_>) -> SqlResult<Check> {
    let check_type: String = row.get(1)?;
    let status: String = row.get(3)?;
    let created_at: String = row.get(4)?;
    let updated_at: String = row.get(5)?;
    Ok(Check {
        id: row.get(0)?,
        check_type: CheckType::from_str(&check_type).unwrap_or(CheckType::Http),
        target: row.get(2)?,
        status: CheckStatus::from_str(&status).unwrap_or(CheckStatus::Pending),
        created_at: parse_time(&created_at),
        updated_at: parse_time(&updated_at),
    })
}

fn row_to_agent(row: &Row<'_>) -> SqlResult<Agent> {
    let status: String = row.get(4)?;
    let capabilities: String = row.get(5)?;
    let last_heartbeat: String = row.get(6)?;
    let created_at: String = row.get(7)?;
    Ok(Agent {
        id: row.get(0)?,
        name: row.get(1)?,
        token: row.get(2)?,
        location: row.get(3)?,
        status: AgentStatus::from_str(&status).unwrap_or(AgentStatus::Offline),
        capabilities: serde_json::from_str(&capabilities).unwrap_or_default(),
        last_heartbeat: parse_time(&last_heartbeat),
        created_at: parse_time(&created_at),
    })
}

fn row_to_result(row: &Row<'_>) -> SqlResult<CheckResult> {
    let data: String = row.get(4)?;
    let created_at: String = row.get(7)?;
    Ok(CheckResult {
        id: row.get(0)?,
        check_id: row.get(1)?,
        agent_id: row.get(2)?,
        success: row.get(3)?,
        data: serde_json::from_str(&data).unwrap_or_default(),
        error: row.get(5)?,
        duration: row.get(6)?,
        created_at: parse_time(&created_at),
    })
}

fn row_to_agent_task(row: &Row<'_>) -> SqlResult<AgentTask> {
    let data: String = row.get(3)?;
    let taken_at: String = row.get(4)?;
    let status: String = row.get(5)?;
    let created_at: String = row.get(6)?;
    Ok(AgentTask {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        check_id: row.get(2)?,
        task_data: serde_json::from_str(&data).unwrap_or(serde_json::Value::Null),
        taken_at: parse_time(&taken_at),
        status: AgentTaskStatus::from_str(&status).unwrap_or(AgentTaskStatus::Processing),
        created_at: parse_time(&created_at),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::NamedTempFile;

    fn sample_agent(name: &str, token: &str) -> Agent {
        Agent {
            id: String::new(),
            name: name.to_string(),
            token: token.to_string(),
            location: "eu-west".to_string(),
            status: AgentStatus::Offline,
            capabilities: vec![CheckType::Http, CheckType::Ping],
            last_heartbeat: Utc::now(),
            created_at: Utc::now(),
        }
    }

    fn sample_check() -> Check {
        Check {
            id: String::new(),
            check_type: CheckType::Http,
            target: "http://example.org".to_string(),
            status: CheckStatus::Pending,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn check_crud_and_listing() {
        let tmp = NamedTempFile::new().unwrap();
        let store = SqliteStore::new(tmp.path()).unwrap();

        let mut first = sample_check();
        CheckStore::create(&store, &mut first).unwrap();
        assert!(!first.id.is_empty());

        let mut second = sample_check();
        CheckStore::create(&store, &mut second).unwrap();

        let fetched = CheckStore::get_by_id(&store, &first.id).unwrap().unwrap();
        assert_eq!(fetched.target, "http://example.org");
        assert_eq!(fetched.status, CheckStatus::Pending);

        CheckStore::update_status(&store, &first.id, CheckStatus::Running).unwrap();
        let fetched = CheckStore::get_by_id(&store, &first.id).unwrap().unwrap();
        assert_eq!(fetched.status, CheckStatus::Running);

        let listed = store.list(50, 0).unwrap();
        assert_eq!(listed.len(), 2);

        assert_eq!(store.count_by_status(CheckStatus::Running).unwrap(), 1);
        assert_eq!(store.count_by_status(CheckStatus::Pending).unwrap(), 1);
        assert_eq!(store.count_by_status(CheckStatus::Completed).unwrap(), 0);
    }

    #[test]
    fn missing_check_is_none_and_update_errors() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(CheckStore::get_by_id(&store, "nope").unwrap().is_none());
        assert!(matches!(
            CheckStore::update_status(&store, "nope", CheckStatus::Failed),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn duplicate_agent_token_is_rejected() {
        let store = SqliteStore::in_memory().unwrap();

        let mut first = sample_agent("a1", "shared-token");
        AgentStore::create(&store, &mut first).unwrap();

        let mut second = sample_agent("a2", "shared-token");
        assert!(matches!(
            AgentStore::create(&store, &mut second),
            Err(StoreError::DuplicateToken)
        ));
    }

    #[test]
    fn heartbeat_brings_agent_online_and_is_monotonic() {
        let store = SqliteStore::in_memory().unwrap();
        let mut agent = sample_agent("a1", "tok-1");
        AgentStore::create(&store, &mut agent).unwrap();

        // Created offline.
        let fetched = AgentStore::get_by_id(&store, &agent.id).unwrap().unwrap();
        assert_eq!(fetched.status, AgentStatus::Offline);
        assert!(store.list_online().unwrap().is_empty());

        store.update_heartbeat(&agent.id).unwrap();
        let first = AgentStore::get_by_id(&store, &agent.id).unwrap().unwrap();
        assert_eq!(first.status, AgentStatus::Online);

        store.update_heartbeat(&agent.id).unwrap();
        let second = AgentStore::get_by_id(&store, &agent.id).unwrap().unwrap();
        assert!(second.last_heartbeat >= first.last_heartbeat);

        assert_eq!(store.list_online().unwrap().len(), 1);

        assert!(matches!(
            store.update_heartbeat("ghost"),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn token_lookup_and_capability_update() {
        let store = SqliteStore::in_memory().unwrap();
        let mut agent = sample_agent("a1", "tok-lookup");
        AgentStore::create(&store, &mut agent).unwrap();

        let by_token = store.get_by_token("tok-lookup").unwrap().unwrap();
        assert_eq!(by_token.id, agent.id);
        assert!(store.get_by_token("wrong").unwrap().is_none());

        store
            .update_capabilities(&agent.id, &[CheckType::Dns, CheckType::Tcp])
            .unwrap();
        let updated = AgentStore::get_by_id(&store, &agent.id).unwrap().unwrap();
        assert_eq!(updated.capabilities, vec![CheckType::Dns, CheckType::Tcp]);
    }

    #[test]
    fn results_round_trip_with_data() {
        let store = SqliteStore::in_memory().unwrap();

        let mut check = sample_check();
        CheckStore::create(&store, &mut check).unwrap();
        let mut agent = sample_agent("a1", "tok-r");
        AgentStore::create(&store, &mut agent).unwrap();

        let mut result = CheckResult {
            id: String::new(),
            check_id: check.id.clone(),
            agent_id: agent.id.clone(),
            success: true,
            data: json!({"status_code": 200}).as_object().unwrap().clone(),
            error: String::new(),
            duration: 0.42,
            created_at: Utc::now(),
        };
        ResultStore::create(&store, &mut result).unwrap();

        let by_check = store.get_by_check_id(&check.id).unwrap();
        assert_eq!(by_check.len(), 1);
        assert_eq!(by_check[0].data["status_code"], json!(200));
        assert_eq!(by_check[0].duration, 0.42);

        let by_agent = store.get_by_agent_id(&agent.id, 100).unwrap();
        assert_eq!(by_agent.len(), 1);

        let deleted = store
            .delete_old_results(Utc::now() + chrono::Duration::seconds(1))
            .unwrap();
        assert_eq!(deleted, 1);
    }

    #[test]
    fn stuck_task_scan_honors_cutoff_and_status() {
        let store = SqliteStore::in_memory().unwrap();

        let mut old_task = AgentTask {
            id: String::new(),
            agent_id: "a1".into(),
            check_id: "c1".into(),
            task_data: json!({"check_id": "c1"}),
            taken_at: Utc::now() - chrono::Duration::minutes(20),
            status: AgentTaskStatus::Processing,
            created_at: Utc::now(),
        };
        store.create_task(&mut old_task).unwrap();

        let mut fresh_task = AgentTask {
            id: String::new(),
            agent_id: "a2".into(),
            check_id: "c2".into(),
            task_data: json!({"check_id": "c2"}),
            taken_at: Utc::now(),
            status: AgentTaskStatus::Processing,
            created_at: Utc::now(),
        };
        store.create_task(&mut fresh_task).unwrap();

        let stuck = store.stuck_tasks(Duration::from_secs(600)).unwrap();
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].check_id, "c1");

        assert_eq!(store.count_processing().unwrap(), 2);

        store.delete_task("a1", "c1").unwrap();
        assert!(matches!(
            store.delete_task("a1", "c1"),
            Err(StoreError::NotFound)
        ));
        assert_eq!(store.count_processing().unwrap(), 1);
    }
}
