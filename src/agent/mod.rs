//! Agent-side components: API client, circuit breaker, and control loop.

mod breaker;
mod client;
mod control;

pub use breaker::{BreakerState, CircuitBreaker, CircuitOpen};
pub use client::{ApiClient, ClientError, ResultSubmission};
pub use control::AgentController;

use crate::config::AgentConfig;
use crate::domain::{AgentMetadata, RegisterRequest};

/// Check types this agent can execute, advertised at registration.
const AGENT_CAPABILITIES: [&str; 5] = ["http", "https", "ping", "dns", "tcp"];

/// Build the registration descriptor from configuration and environment.
pub fn build_descriptor(cfg: &AgentConfig) -> RegisterRequest {
    let hostname = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("HOST"))
        .unwrap_or_else(|_| "unknown".to_string());
    let cpu_count = std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1);

    RegisterRequest {
        name: cfg.name.clone(),
        location: cfg.location.clone(),
        capabilities: AGENT_CAPABILITIES.iter().map(|s| s.to_string()).collect(),
        metadata: Some(AgentMetadata {
            ip_address: cfg.ip_address.clone(),
            hostname,
            os: cfg.os.clone(),
            arch: cfg.arch.clone(),
            cpu_count,
            memory_mb: 0,
            runtime_version: format!("rust/{}", env!("CARGO_PKG_VERSION")),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_carries_config_and_capabilities() {
        let mut cfg = AgentConfig::from_env();
        cfg.name = "probe-test".into();
        cfg.location = "eu-central".into();

        let descriptor = build_descriptor(&cfg);
        assert_eq!(descriptor.name, "probe-test");
        assert_eq!(descriptor.location, "eu-central");
        assert_eq!(descriptor.capabilities.len(), 5);
        assert!(descriptor.capabilities.contains(&"ping".to_string()));
        let metadata = descriptor.metadata.unwrap();
        assert!(metadata.cpu_count >= 1);
        assert!(!metadata.os.is_empty());
    }
}
