//! Check lifecycle service: creation with fan-out, guarded status
//! transitions, listing, and aggregation.

use crate::broker::{Broker, CHECK_TASKS_QUEUE};
use crate::domain::{
    validate_target, Check, CheckResult, CheckStatus, CheckType, TaskPayload,
};
use crate::error::{Error, Result};
use crate::store::{AgentStore, CheckStore, ResultStore};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

const DEFAULT_LIST_LIMIT: i64 = 50;
const MAX_LIST_LIMIT: i64 = 100;

#[derive(Debug, Serialize)]
pub struct CheckStats {
    pub total_results: usize,
    pub successful: usize,
    pub failed: usize,
    /// Mean result duration in seconds.
    pub average_time: f64,
    /// Result count per agent id.
    pub agent_results: HashMap<String, usize>,
}

pub struct CheckService {
    checks: Arc<dyn CheckStore>,
    agents: Arc<dyn AgentStore>,
    results: Arc<dyn ResultStore>,
    broker: Arc<Broker>,
}

impl CheckService {
    pub fn new(
        checks: Arc<dyn CheckStore>,
        agents: Arc<dyn AgentStore>,
        results: Arc<dyn ResultStore>,
        broker: Arc<Broker>,
    ) -> Self {
        Self {
            checks,
            agents,
            results,
            broker,
        }
    }

    /// Create a check and push one task copy per online agent onto the
    /// broker. Fan-out ignores capabilities; the gate runs at pop time.
    pub async fn create_check(&self, check_type: &str, target: &str) -> Result<Check> {
        let check_type = CheckType::from_str(check_type).map_err(|()| {
            Error::Validation(format!("invalid check type: {check_type}"))
        })?;
        if !validate_target(target) {
            return Err(Error::Validation(format!("invalid target: {target}")));
        }

        let mut check = Check {
            id: String::new(),
            check_type,
            target: target.to_string(),
            status: CheckStatus::Pending,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        self.checks.create(&mut check)?;

        let agents = self.agents.list_online()?;
        if agents.is_empty() {
            tracing::warn!(check_id = %check.id, "no online agents available for check");
            return Err(Error::NoOnlineAgents);
        }

        let payload = TaskPayload {
            check_id: check.id.clone(),
            check_type,
            target: target.to_string(),
            options: None,
            created_at: Utc::now(),
        };
        let encoded = serde_json::to_vec(&payload)
            .map_err(|e| Error::Internal(format!("failed to encode task payload: {e}")))?;

        let mut pushed = 0usize;
        for _ in &agents {
            self.broker.push(CHECK_TASKS_QUEUE, encoded.clone()).await;
            pushed += 1;
        }
        if pushed == 0 {
            return Err(Error::Internal(
                "failed to distribute task to any agent".into(),
            ));
        }

        tracing::info!(
            check_id = %check.id,
            check_type = %check_type,
            target,
            agents = agents.len(),
            pushed,
            "check created and queued"
        );
        Ok(check)
    }

    pub fn get_check(&self, id: &str) -> Result<Option<(Check, Vec<CheckResult>)>> {
        let Some(check) = self.checks.get_by_id(id)? else {
            return Ok(None);
        };
        let results = self.results.get_by_check_id(id)?;
        Ok(Some((check, results)))
    }

    /// Transition a check's status, rejecting moves the state machine
    /// does not allow.
    pub fn update_status(&self, id: &str, to: CheckStatus) -> Result<()> {
        let check = self
            .checks
            .get_by_id(id)?
            .ok_or_else(|| Error::not_found("check", id))?;

        if !check.status.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                from: check.status,
                to,
            });
        }

        self.checks.update_status(id, to)?;
        tracing::info!(check_id = %id, from = %check.status, to = %to, "check status updated");
        Ok(())
    }

    /// List checks newest first; limit clamps to `[1, 100]` (default 50)
    /// and negative offsets clamp to zero.
    pub fn list_checks(&self, limit: i64, offset: i64) -> Result<Vec<Check>> {
        let limit = if limit <= 0 {
            DEFAULT_LIST_LIMIT
        } else {
            limit.min(MAX_LIST_LIMIT)
        };
        let offset = offset.max(0);
        Ok(self.checks.list(limit, offset)?)
    }

    pub fn stats(&self, check_id: &str) -> Result<CheckStats> {
        if self.checks.get_by_id(check_id)?.is_none() {
            return Err(Error::not_found("check", check_id));
        }

        let results = self.results.get_by_check_id(check_id)?;
        let mut stats = CheckStats {
            total_results: results.len(),
            successful: 0,
            failed: 0,
            average_time: 0.0,
            agent_results: HashMap::new(),
        };

        let mut total_time = 0.0;
        for result in &results {
            if result.success {
                stats.successful += 1;
            } else {
                stats.failed += 1;
            }
            total_time += result.duration;
            *stats.agent_results.entry(result.agent_id.clone()).or_insert(0) += 1;
        }
        if !results.is_empty() {
            stats.average_time = total_time / results.len() as f64;
        }

        Ok(stats)
    }

    /// Completion rule, run after each result ingest: when every currently
    /// online agent has answered, the check is complete; otherwise make
    /// sure it is marked running.
    pub fn reevaluate_completion(&self, check_id: &str) -> Result<()> {
        let check = self
            .checks
            .get_by_id(check_id)?
            .ok_or_else(|| Error::not_found("check", check_id))?;

        if matches!(check.status, CheckStatus::Completed | CheckStatus::Failed) {
            return Ok(());
        }

        let results = self.results.get_by_check_id(check_id)?;
        let online = self.agents.list_online()?;

        if results.len() >= online.len() {
            if check.status == CheckStatus::Pending {
                self.checks.update_status(check_id, CheckStatus::Running)?;
            }
            self.checks.update_status(check_id, CheckStatus::Completed)?;
            tracing::info!(
                check_id,
                results = results.len(),
                agents = online.len(),
                "check completed by all agents"
            );
        } else if check.status == CheckStatus::Pending {
            self.checks.update_status(check_id, CheckStatus::Running)?;
            tracing::debug!(
                check_id,
                results = results.len(),
                agents = online.len(),
                "check still in progress"
            );
        }
        Ok(())
    }
}
