//! TCP-ping probe runner.
//!
//! A "ping" here is a TCP connect-and-close against `host:port`, measuring
//! wall-clock time until the connect returns. This deliberately avoids ICMP
//! so agents need no raw-socket privileges.

use super::options::{duration_option, int_option};
use super::{Measurement, RunnerError};
use crate::domain::split_host_port;
use serde_json::json;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;

const DEFAULT_COUNT: i64 = 4;
const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_PORT: u16 = 80;
const INTER_ATTEMPT_DELAY: Duration = Duration::from_secs(1);

pub struct PingRunner;

impl PingRunner {
    pub fn new() -> Self {
        Self
    }

    pub async fn execute(
        &self,
        target: &str,
        options: &Measurement,
    ) -> Result<Measurement, RunnerError> {
        if target.is_empty() {
            return Err(RunnerError::InvalidTarget("empty target".into()));
        }

        let (host, port) = match split_host_port(target) {
            Some((host, port)) => (host.to_string(), port),
            None => (target.to_string(), DEFAULT_PORT),
        };

        let count = int_option(options, "count", DEFAULT_COUNT).max(1) as u32;
        let timeout = duration_option(options, "timeout", DEFAULT_ATTEMPT_TIMEOUT);
        let address = format!("{host}:{port}");

        let mut rtts_ms: Vec<f64> = Vec::with_capacity(count as usize);
        for attempt in 0..count {
            if attempt > 0 {
                tokio::time::sleep(INTER_ATTEMPT_DELAY).await;
            }

            let start = Instant::now();
            match tokio::time::timeout(timeout, TcpStream::connect(&address)).await {
                Ok(Ok(stream)) => {
                    rtts_ms.push(start.elapsed().as_secs_f64() * 1000.0);
                    drop(stream);
                }
                Ok(Err(e)) => {
                    tracing::debug!(target = %address, attempt, error = %e, "ping attempt failed");
                }
                Err(_) => {
                    tracing::debug!(target = %address, attempt, "ping attempt timed out");
                }
            }
        }

        let received = rtts_ms.len() as u32;
        if received == 0 {
            return Err(RunnerError::Network(format!(
                "all {count} connection attempts to {address} failed"
            )));
        }

        let min = rtts_ms.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = rtts_ms.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let avg = rtts_ms.iter().sum::<f64>() / received as f64;
        let loss = 100.0 * f64::from(count - received) / f64::from(count);

        let mut result = Measurement::new();
        result.insert("packets_sent".into(), json!(count));
        result.insert("packets_received".into(), json!(received));
        result.insert("packet_loss".into(), json!(loss));
        result.insert("min_rtt".into(), json!(min));
        result.insert("max_rtt".into(), json!(max));
        result.insert("avg_rtt".into(), json!(avg));
        Ok(result)
    }
}

impl Default for PingRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn pings_a_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept connections so the probe's connect succeeds.
        tokio::spawn(async move {
            loop {
                let _ = listener.accept().await;
            }
        });

        let runner = PingRunner::new();
        let mut options = Measurement::new();
        options.insert("count".into(), json!(2));
        options.insert("timeout".into(), json!(2.0));

        let result = runner
            .execute(&format!("127.0.0.1:{}", addr.port()), &options)
            .await
            .unwrap();

        assert_eq!(result["packets_sent"], json!(2));
        assert_eq!(result["packets_received"], json!(2));
        assert_eq!(result["packet_loss"], json!(0.0));
        assert!(result["avg_rtt"].as_f64().unwrap() >= 0.0);
    }

    #[tokio::test]
    async fn fails_only_when_every_attempt_fails() {
        let runner = PingRunner::new();
        let mut options = Measurement::new();
        options.insert("count".into(), json!(1));
        options.insert("timeout".into(), json!(0.5));

        // Port 1 on localhost refuses immediately.
        let err = runner.execute("127.0.0.1:1", &options).await.unwrap_err();
        assert!(matches!(err, RunnerError::Network(_)));
    }
}
