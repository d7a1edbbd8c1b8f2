//! Shared domain types for checks, agents, results, and queue payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// The kind of probe a check requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckType {
    Http,
    Https,
    Ping,
    Tcp,
    Dns,
    Traceroute,
}

impl CheckType {
    pub const ALL: [CheckType; 6] = [
        CheckType::Http,
        CheckType::Https,
        CheckType::Ping,
        CheckType::Tcp,
        CheckType::Dns,
        CheckType::Traceroute,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckType::Http => "http",
            CheckType::Https => "https",
            CheckType::Ping => "ping",
            CheckType::Tcp => "tcp",
            CheckType::Dns => "dns",
            CheckType::Traceroute => "traceroute",
        }
    }
}

impl fmt::Display for CheckType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http" => Ok(CheckType::Http),
            "https" => Ok(CheckType::Https),
            "ping" => Ok(CheckType::Ping),
            "tcp" => Ok(CheckType::Tcp),
            "dns" => Ok(CheckType::Dns),
            "traceroute" => Ok(CheckType::Traceroute),
            _ => Err(()),
        }
    }
}

/// Lifecycle state of a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Pending => "pending",
            CheckStatus::Running => "running",
            CheckStatus::Completed => "completed",
            CheckStatus::Failed => "failed",
        }
    }

    /// Allowed transitions: pending may start running or fail outright,
    /// running may complete or fail, and the terminal states stay put.
    pub fn can_transition_to(&self, to: CheckStatus) -> bool {
        matches!(
            (self, to),
            (CheckStatus::Pending, CheckStatus::Running)
                | (CheckStatus::Pending, CheckStatus::Failed)
                | (CheckStatus::Running, CheckStatus::Completed)
                | (CheckStatus::Running, CheckStatus::Failed)
        )
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CheckStatus::Pending),
            "running" => Ok(CheckStatus::Running),
            "completed" => Ok(CheckStatus::Completed),
            "failed" => Ok(CheckStatus::Failed),
            _ => Err(()),
        }
    }
}

/// A single probe request, fanned out to every online agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Check {
    pub id: String,
    #[serde(rename = "type")]
    pub check_type: CheckType,
    pub target: String,
    pub status: CheckStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One agent's outcome for one check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub id: String,
    pub check_id: String,
    pub agent_id: String,
    pub success: bool,
    pub data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    /// Wall-clock execution time in seconds.
    pub duration: f64,
    pub created_at: DateTime<Utc>,
}

/// Availability state of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Online,
    Offline,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Online => "online",
            AgentStatus::Offline => "offline",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(AgentStatus::Online),
            "offline" => Ok(AgentStatus::Offline),
            _ => Err(()),
        }
    }
}

/// A probe vantage point. The token is the agent's bearer credential and
/// never leaves the controller in API responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing, default)]
    pub token: String,
    pub location: String,
    pub status: AgentStatus,
    pub capabilities: Vec<CheckType>,
    pub last_heartbeat: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Agent {
    pub fn is_capable(&self, check_type: CheckType) -> bool {
        self.capabilities.contains(&check_type)
    }
}

/// Processing state of an in-flight agent task row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentTaskStatus {
    Processing,
    Completed,
    Failed,
}

impl AgentTaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentTaskStatus::Processing => "processing",
            AgentTaskStatus::Completed => "completed",
            AgentTaskStatus::Failed => "failed",
        }
    }
}

impl FromStr for AgentTaskStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(AgentTaskStatus::Processing),
            "completed" => Ok(AgentTaskStatus::Completed),
            "failed" => Ok(AgentTaskStatus::Failed),
            _ => Err(()),
        }
    }
}

/// Bookkeeping row for a task delivered to an agent but not yet resolved.
/// `task_data` holds the serialized payload so the reaper can requeue it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTask {
    pub id: String,
    pub agent_id: String,
    pub check_id: String,
    pub task_data: Value,
    pub taken_at: DateTime<Utc>,
    pub status: AgentTaskStatus,
    pub created_at: DateTime<Utc>,
}

/// The unit the broker transports: one copy per eligible agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPayload {
    pub check_id: String,
    #[serde(rename = "type")]
    pub check_type: CheckType,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Map<String, Value>>,
    pub created_at: DateTime<Utc>,
}

impl Default for TaskPayload {
    fn default() -> Self {
        Self {
            check_id: String::new(),
            check_type: CheckType::Http,
            target: String::new(),
            options: None,
            created_at: Utc::now(),
        }
    }
}

/// Progress report published on the `task_progress` channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskProgress {
    pub check_id: String,
    pub agent_id: String,
    pub stage: String,
    /// Fraction complete in `[0, 1]`.
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
    pub timestamp: DateTime<Utc>,
}

/// Notification published on the `check_results` channel after result ingest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultNotification {
    pub check_id: String,
    pub agent_id: String,
    pub success: bool,
    pub duration: f64,
    pub timestamp: DateTime<Utc>,
}

/// Environment-derived description of the machine an agent runs on.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentMetadata {
    pub ip_address: String,
    pub hostname: String,
    pub os: String,
    pub arch: String,
    pub cpu_count: u32,
    pub memory_mb: u64,
    pub runtime_version: String,
}

/// Registration body sent by an agent on startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub location: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<AgentMetadata>,
}

/// Returns true when `value` names a known check type.
pub fn validate_check_type(value: &str) -> bool {
    CheckType::from_str(value).is_ok()
}

/// Target validation: accept the empty placeholder, `host:port`, absolute
/// `http(s)` URLs, and bare hostnames. Anything carrying an unknown scheme
/// is rejected.
pub fn validate_target(target: &str) -> bool {
    if target.is_empty() {
        return true;
    }

    if split_host_port(target).is_some() {
        return true;
    }

    if let Some((scheme, rest)) = target.split_once("://") {
        return matches!(scheme, "http" | "https") && !rest.is_empty();
    }

    true
}

/// Split `host:port` into its parts, requiring a non-empty host and a valid
/// port number. Returns `None` for anything else.
pub fn split_host_port(target: &str) -> Option<(&str, u16)> {
    let (host, port) = target.rsplit_once(':')?;
    if host.is_empty() || host.contains("://") || host.contains('/') {
        return None;
    }
    let port: u16 = port.parse().ok()?;
    Some((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_type_round_trips_through_strings() {
        for ct in CheckType::ALL {
            assert_eq!(CheckType::from_str(ct.as_str()), Ok(ct));
        }
        assert!(CheckType::from_str("icmp").is_err());
    }

    #[test]
    fn status_transitions_follow_the_graph() {
        assert!(CheckStatus::Pending.can_transition_to(CheckStatus::Running));
        assert!(CheckStatus::Pending.can_transition_to(CheckStatus::Failed));
        assert!(CheckStatus::Running.can_transition_to(CheckStatus::Completed));
        assert!(CheckStatus::Running.can_transition_to(CheckStatus::Failed));

        assert!(!CheckStatus::Pending.can_transition_to(CheckStatus::Completed));
        assert!(!CheckStatus::Completed.can_transition_to(CheckStatus::Running));
        assert!(!CheckStatus::Failed.can_transition_to(CheckStatus::Pending));
        assert!(!CheckStatus::Running.can_transition_to(CheckStatus::Pending));
    }

    #[test]
    fn target_validation_accepts_the_documented_shapes() {
        assert!(validate_target(""));
        assert!(validate_target("192.168.1.1:8080"));
        assert!(validate_target("example.com:443"));
        assert!(validate_target("http://api.example.com"));
        assert!(validate_target("https://api.example.com/path"));
        assert!(validate_target("google.com"));

        assert!(!validate_target("ftp://example.com"));
        assert!(!validate_target("redis://localhost"));
        assert!(!validate_target("http://"));
    }

    #[test]
    fn host_port_split_rejects_urls_and_bad_ports() {
        assert_eq!(split_host_port("example.com:80"), Some(("example.com", 80)));
        assert!(split_host_port("example.com").is_none());
        assert!(split_host_port("http://example.com:80").is_none());
        assert!(split_host_port("example.com:notaport").is_none());
        assert!(split_host_port(":80").is_none());
    }

    #[test]
    fn task_payload_encode_decode_is_identity() {
        let payload = TaskPayload {
            check_id: "chk-1".into(),
            check_type: CheckType::Http,
            target: "http://example.org".into(),
            options: None,
            created_at: Utc::now(),
        };

        let bytes = serde_json::to_vec(&payload).unwrap();
        let decoded: TaskPayload = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded.check_id, payload.check_id);
        assert_eq!(decoded.check_type, payload.check_type);
        assert_eq!(decoded.target, payload.target);
        assert_eq!(decoded.created_at, payload.created_at);
    }

    #[test]
    fn agent_token_is_not_serialized() {
        let agent = Agent {
            id: "a1".into(),
            name: "probe-eu".into(),
            token: "secret".into(),
            location: "eu-west".into(),
            status: AgentStatus::Online,
            capabilities: vec![CheckType::Http],
            last_heartbeat: Utc::now(),
            created_at: Utc::now(),
        };

        let json = serde_json::to_string(&agent).unwrap();
        assert!(!json.contains("secret"));
        assert!(!json.contains("token"));
    }
}
