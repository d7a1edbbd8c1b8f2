//! TCP connect probe runner.
//!
//! Reports reachability rather than failing: connection refusals and
//! timeouts come back as a measurement with `port_open = false`.

use super::options::{bool_option, duration_option, port_option};
use super::{Measurement, RunnerError};
use serde_json::json;
use std::io::ErrorKind;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_PORT: u16 = 80;
const BANNER_TIMEOUT: Duration = Duration::from_secs(2);
const BANNER_LIMIT: usize = 1024;

pub struct TcpRunner;

impl TcpRunner {
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

        let (host, target_port) = parse_target(target);
        let port = port_option(options, "port")
            .or(target_port)
            .unwrap_or_else(|| default_port(target));
        let timeout = duration_option(options, "timeout", DEFAULT_TIMEOUT);
        let address = format!("{host}:{port}");

        let mut result = Measurement::new();
        result.insert("target".into(), json!(target));
        result.insert("host".into(), json!(host));
        result.insert("port".into(), json!(port));
        result.insert("address".into(), json!(address));

        let start = Instant::now();
        let connected = tokio::time::timeout(timeout, TcpStream::connect(&address)).await;
        let connect_time = start.elapsed();
        result.insert(
            "connect_time".into(),
            json!(connect_time.as_millis() as u64),
        );

        let mut stream = match connected {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                result.insert("port_open".into(), json!(false));
                result.insert("error".into(), json!(e.to_string()));
                result.insert("timeout".into(), json!(false));
                result.insert("temporary".into(), json!(is_temporary(e.kind())));
                return Ok(result);
            }
            Err(_) => {
                result.insert("port_open".into(), json!(false));
                result.insert(
                    "error".into(),
                    json!(format!("connect to {address} timed out")),
                );
                result.insert("timeout".into(), json!(true));
                result.insert("temporary".into(), json!(true));
                return Ok(result);
            }
        };

        result.insert("port_open".into(), json!(true));
        if let Ok(local) = stream.local_addr() {
            result.insert("local_address".into(), json!(local.to_string()));
        }
        if let Ok(remote) = stream.peer_addr() {
            result.insert("remote_address".into(), json!(remote.to_string()));
        }

        if bool_option(options, "banner_grab", false) {
            match grab_banner(&mut stream).await {
                Ok(banner) if !banner.is_empty() => {
                    result.insert("banner".into(), json!(banner));
                    result.insert("banner_grabbed".into(), json!(true));
                }
                Ok(_) => {
                    result.insert("banner_grabbed".into(), json!(false));
                }
                Err(e) => {
                    result.insert("banner_grabbed".into(), json!(false));
                    result.insert("banner_error".into(), json!(e));
                }
            }
        }

        Ok(result)
    }
}

impl Default for TcpRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// Attempt a short read after connect; many services greet first.
async fn grab_banner(stream: &mut TcpStream) -> Result<String, String> {
    let mut buffer = [0u8; BANNER_LIMIT];
    match tokio::time::timeout(BANNER_TIMEOUT, stream.read(&mut buffer)).await {
        Ok(Ok(n)) => Ok(String::from_utf8_lossy(&buffer[..n]).into_owned()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err("banner read timed out".to_string()),
    }
}

/// Split the target into host and optional explicit port, tolerating a
/// scheme prefix ("https://example.com" probes example.com).
fn parse_target(target: &str) -> (String, Option<u16>) {
    let rest = match target.split_once("://") {
        Some((_, rest)) => rest,
        None => target,
    };
    let rest = rest.split('/').next().unwrap_or(rest);

    match rest.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => match port.parse::<u16>() {
            Ok(port) => (host.to_string(), Some(port)),
            Err(_) => (rest.to_string(), None),
        },
        _ => (rest.to_string(), None),
    }
}

/// Scheme-prefix heuristic used when neither the options nor the target
/// carry a port.
fn default_port(target: &str) -> u16 {
    const PREFIXES: &[(&str, u16)] = &[
        ("https", 443),
        ("http", 80),
        ("ftp", 21),
        ("ssh", 22),
        ("smtp", 25),
        ("pop3", 110),
        ("imap", 143),
        ("mysql", 3306),
        ("postgres", 5432),
        ("redis", 6379),
    ];

    for (prefix, port) in PREFIXES {
        if target.starts_with(prefix) {
            return *port;
        }
    }
    DEFAULT_PORT
}

fn is_temporary(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::TimedOut
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
    )
}
