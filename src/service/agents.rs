//! Agent registry service: registration, authentication, liveness.

use crate::domain::{Agent, AgentStatus, CheckResult, CheckType, RegisterRequest};
use crate::error::{Error, Result};
use crate::store::{AgentStore, ResultStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Capabilities granted when a registration carries none.
const DEFAULT_CAPABILITIES: [CheckType; 5] = [
    CheckType::Http,
    CheckType::Https,
    CheckType::Ping,
    CheckType::Dns,
    CheckType::Tcp,
];

#[derive(Debug, Serialize)]
pub struct AgentStats {
    pub agent: Agent,
    pub total_checks: usize,
    pub success_rate: f64,
    pub last_activity: DateTime<Utc>,
    /// Seconds since the agent registered.
    pub uptime: i64,
    pub recent_results: Vec<CheckResult>,
}

pub struct AgentService {
    agents: Arc<dyn AgentStore>,
    results: Arc<dyn ResultStore>,
}

impl AgentService {
    pub fn new(agents: Arc<dyn AgentStore>, results: Arc<dyn ResultStore>) -> Self {
        Self { agents, results }
    }

    /// Register a new agent: validate the descriptor, mint a token, persist
    /// with status offline. Returns the agent and its bearer token.
    pub fn register(&self, req: &RegisterRequest) -> Result<(Agent, String)> {
        if req.name.is_empty() {
            return Err(Error::Validation("agent name is required".into()));
        }
        if req.location.is_empty() {
            return Err(Error::Validation("agent location is required".into()));
        }

        let mut capabilities = Vec::with_capacity(req.capabilities.len());
        for capability in &req.capabilities {
            match CheckType::from_str(capability) {
                Ok(ct) => capabilities.push(ct),
                Err(()) => {
                    return Err(Error::Validation(format!(
                        "invalid capability: {capability}"
                    )))
                }
            }
        }
        if capabilities.is_empty() {
            capabilities = DEFAULT_CAPABILITIES.to_vec();
        }

        let token = Uuid::new_v4().to_string();
        let mut agent = Agent {
            id: String::new(),
            name: req.name.clone(),
            token: token.clone(),
            location: req.location.clone(),
            status: AgentStatus::Offline,
            capabilities,
            last_heartbeat: Utc::now(),
            created_at: Utc::now(),
        };

        self.agents.create(&mut agent)?;

        tracing::info!(
            agent_id = %agent.id,
            name = %agent.name,
            location = %agent.location,
            capabilities = agent.capabilities.len(),
            "agent registered"
        );
        Ok((agent, token))
    }

    /// Resolve a bearer token to its agent. `None` means the token is
    /// unknown; callers turn that into 401.
    pub fn authenticate(&self, token: &str) -> Result<Option<Agent>> {
        if token.is_empty() {
            return Err(Error::Validation("token is required".into()));
        }
        Ok(self.agents.get_by_token(token)?)
    }

    pub fn update_heartbeat(&self, agent_id: &str, load: i64) -> Result<()> {
        if agent_id.is_empty() {
            return Err(Error::Validation("agent ID is required".into()));
        }

        if self.agents.get_by_id(agent_id)?.is_none() {
            return Err(Error::not_found("agent", agent_id));
        }

        self.agents.update_heartbeat(agent_id)?;
        tracing::debug!(agent_id, load, "agent heartbeat updated");
        Ok(())
    }

    pub fn update_status(&self, agent_id: &str, status: AgentStatus) -> Result<()> {
        if agent_id.is_empty() {
            return Err(Error::Validation("agent ID is required".into()));
        }
        if self.agents.get_by_id(agent_id)?.is_none() {
            return Err(Error::not_found("agent", agent_id));
        }
        self.agents.update_status(agent_id, status)?;
        tracing::info!(agent_id, status = %status, "agent status updated");
        Ok(())
    }

    pub fn update_capabilities(&self, agent_id: &str, capabilities: &[String]) -> Result<()> {
        if agent_id.is_empty() {
            return Err(Error::Validation("agent ID is required".into()));
        }

        let mut parsed = Vec::with_capacity(capabilities.len());
        for capability in capabilities {
            match CheckType::from_str(capability) {
                Ok(ct) => parsed.push(ct),
                Err(()) => {
                    return Err(Error::Validation(format!(
                        "invalid capability: {capability}"
                    )))
                }
            }
        }

        if self.agents.get_by_id(agent_id)?.is_none() {
            return Err(Error::not_found("agent", agent_id));
        }
        self.agents.update_capabilities(agent_id, &parsed)?;
        tracing::info!(agent_id, capabilities = parsed.len(), "agent capabilities updated");
        Ok(())
    }

    pub fn list_online(&self) -> Result<Vec<Agent>> {
        Ok(self.agents.list_online()?)
    }

    pub fn get(&self, agent_id: &str) -> Result<Option<Agent>> {
        if agent_id.is_empty() {
            return Err(Error::Validation("agent ID is required".into()));
        }
        Ok(self.agents.get_by_id(agent_id)?)
    }

    pub fn stats(&self, agent_id: &str) -> Result<AgentStats> {
        let agent = self
            .agents
            .get_by_id(agent_id)?
            .ok_or_else(|| Error::not_found("agent", agent_id))?;

        let recent_results = self.results.get_by_agent_id(agent_id, 100)?;
        let successful = recent_results.iter().filter(|r| r.success).count();
        let success_rate = if recent_results.is_empty() {
            0.0
        } else {
            successful as f64 / recent_results.len() as f64
        };

        Ok(AgentStats {
            total_checks: recent_results.len(),
            success_rate,
            last_activity: agent.last_heartbeat,
            uptime: (Utc::now() - agent.created_at).num_seconds(),
            recent_results,
            agent,
        })
    }

    /// Mark agents whose heartbeat is older than `timeout` as offline.
    /// Best-effort per agent: one failure does not abort the batch.
    pub fn cleanup_inactive_agents(&self, timeout: Duration) -> Result<usize> {
        let agents = self.agents.list_online()?;
        let now = Utc::now();
        let timeout = chrono::Duration::from_std(timeout)
            .map_err(|e| Error::Internal(format!("invalid heartbeat timeout: {e}")))?;

        let mut swept = 0;
        for agent in agents {
            if now - agent.last_heartbeat <= timeout {
                continue;
            }
            match self.agents.update_status(&agent.id, AgentStatus::Offline) {
                Ok(()) => {
                    swept += 1;
                    tracing::info!(
                        agent_id = %agent.id,
                        name = %agent.name,
                        last_heartbeat = %agent.last_heartbeat,
                        "marked inactive agent offline"
                    );
                }
                Err(e) => {
                    tracing::error!(agent_id = %agent.id, error = %e, "failed to mark agent offline");
                }
            }
        }
        Ok(swept)
    }
}
