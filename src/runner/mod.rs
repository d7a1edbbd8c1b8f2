//! Probe runners.
//!
//! Each runner executes a single probe against a target and returns a
//! measurement mapping. Runners are stateless and safe to call concurrently;
//! cancellation propagates by dropping the returned future.

mod dns;
mod http;
pub mod options;
mod ping;
mod tcp;

pub use dns::DnsRunner;
pub use http::HttpRunner;
pub use ping::PingRunner;
pub use tcp::TcpRunner;

use crate::domain::CheckType;
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;

/// Probe-specific measurements keyed by field name.
pub type Measurement = Map<String, Value>;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("invalid target: {0}")]
    InvalidTarget(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("DNS error: {0}")]
    Dns(String),
    #[error("unknown check type: {0}")]
    UnknownType(String),
}

/// Static mapping from check type to runner. `http` and `https` share the
/// HTTP runner.
pub struct RunnerSet {
    http: HttpRunner,
    ping: PingRunner,
    dns: DnsRunner,
    tcp: TcpRunner,
}

impl RunnerSet {
    pub fn new() -> Self {
        Self {
            http: HttpRunner::new(),
            ping: PingRunner::new(),
            dns: DnsRunner::new(),
            tcp: TcpRunner::new(),
        }
    }

    /// Execute the probe for `check_type` against `target`.
    pub async fn execute(
        &self,
        check_type: CheckType,
        target: &str,
        options: &Measurement,
    ) -> Result<Measurement, RunnerError> {
        match check_type {
            CheckType::Http | CheckType::Https => self.http.execute(target, options).await,
            CheckType::Ping => self.ping.execute(target, options).await,
            CheckType::Dns => self.dns.execute(target, options).await,
            CheckType::Tcp => self.tcp.execute(target, options).await,
            CheckType::Traceroute => {
                Err(RunnerError::UnknownType(check_type.as_str().to_string()))
            }
        }
    }
}

impl Default for RunnerSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn traceroute_has_no_runner() {
        let runners = RunnerSet::new();
        let err = runners
            .execute(CheckType::Traceroute, "example.com", &Measurement::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::UnknownType(_)));
    }
}
