//! DNS probe runner.
//!
//! Sends a single query to the configured resolver and reports the full
//! response: formatted records, section counts, response time, and the
//! minimum answer TTL.

use super::options::{duration_option, string_option};
use super::{Measurement, RunnerError};
use hickory_client::client::{AsyncClient, ClientHandle};
use hickory_client::udp::UdpClientStream;
use hickory_proto::op::ResponseCode;
use hickory_proto::rr::{DNSClass, Name, RecordType};
use serde_json::json;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;

const DEFAULT_SERVER: &str = "8.8.8.8:53";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct DnsRunner;

impl DnsRunner {
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

        let record_type_name = string_option(options, "record_type", "A");
        let record_type = parse_record_type(&record_type_name);
        let server = string_option(options, "server", DEFAULT_SERVER);
        let timeout = duration_option(options, "timeout", DEFAULT_TIMEOUT);

        let server_addr = resolve_server(&server).await?;

        let mut name = Name::from_utf8(target)
            .map_err(|e| RunnerError::InvalidTarget(format!("{target}: {e}")))?;
        name.set_fqdn(true);

        let stream = UdpClientStream::<UdpSocket>::with_timeout(server_addr, timeout);
        let (mut client, background) = AsyncClient::connect(stream)
            .await
            .map_err(|e| RunnerError::Network(e.to_string()))?;
        let background = tokio::spawn(background);

        let start = Instant::now();
        let response = client
            .query(name, DNSClass::IN, record_type)
            .await
            .map_err(|e| match e.kind() {
                hickory_client::error::ClientErrorKind::Timeout => RunnerError::Timeout(timeout),
                _ => RunnerError::Network(e.to_string()),
            });
        let response_time = start.elapsed();
        background.abort();
        let response = response?;

        let code = response.response_code();
        if code != ResponseCode::NoError {
            return Err(RunnerError::Dns(format!("{code:?}")));
        }

        let records: Vec<String> = response.answers().iter().map(|r| r.to_string()).collect();
        let min_ttl = response.answers().iter().map(|r| r.ttl()).min();

        let mut result = Measurement::new();
        result.insert("records".into(), json!(records));
        result.insert("server".into(), json!(server));
        result.insert(
            "response_time".into(),
            json!(response_time.as_millis() as u64),
        );
        result.insert("answer_count".into(), json!(response.answers().len()));
        result.insert(
            "authority_count".into(),
            json!(response.name_servers().len()),
        );
        result.insert(
            "additional_count".into(),
            json!(response.additionals().len()),
        );
        result.insert("record_type".into(), json!(record_type_to_str(record_type)));
        if let Some(ttl) = min_ttl {
            if ttl > 0 {
                result.insert("ttl".into(), json!(ttl));
            }
        }
        Ok(result)
    }
}

impl Default for DnsRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// Unknown record types fall back to `A`.
fn parse_record_type(name: &str) -> RecordType {
    match name {
        "A" => RecordType::A,
        "AAAA" => RecordType::AAAA,
        "MX" => RecordType::MX,
        "NS" => RecordType::NS,
        "TXT" => RecordType::TXT,
        "CNAME" => RecordType::CNAME,
        "SOA" => RecordType::SOA,
        "PTR" => RecordType::PTR,
        "SRV" => RecordType::SRV,
        _ => RecordType::A,
    }
}

fn record_type_to_str(rt: RecordType) -> &'static str {
    match rt {
        RecordType::AAAA => "AAAA",
        RecordType::MX => "MX",
        RecordType::NS => "NS",
        RecordType::TXT => "TXT",
        RecordType::CNAME => "CNAME",
        RecordType::SOA => "SOA",
        RecordType::PTR => "PTR",
        RecordType::SRV => "SRV",
        _ => "A",
    }
}

/// Resolve the `host:port` resolver address; a bare host gets port 53.
async fn resolve_server(server: &str) -> Result<SocketAddr, RunnerError> {
    let server = if server.contains(':') {
        server.to_string()
    } else {
        format!("{server}:53")
    };

    if let Ok(addr) = server.parse::<SocketAddr>() {
        return Ok(addr);
    }

    let addr = tokio::net::lookup_host(&server)
        .await
        .map_err(|e| RunnerError::Network(format!("failed to resolve DNS server {server}: {e}")))?
        .next()
        .ok_or_else(|| RunnerError::Network(format!("no address for DNS server {server}")));
    addr
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_record_type_falls_back_to_a() {
        assert_eq!(parse_record_type("A"), RecordType::A);
        assert_eq!(parse_record_type("SRV"), RecordType::SRV);
        assert_eq!(parse_record_type("GIBBERISH"), RecordType::A);
        assert_eq!(parse_record_type(""), RecordType::A);
    }

    #[tokio::test]
    async fn bare_server_gets_default_port() {
        let addr = resolve_server("8.8.8.8").await.unwrap();
        assert_eq!(addr.port(), 53);
    }

    #[tokio::test]
    async fn unresponsive_server_times_out() {
        let runner = DnsRunner::new();
        let mut options = Measurement::new();
        // Nothing listens on this port; the query must time out.
        options.insert("server".into(), json!("127.0.0.1:59531"));
        options.insert("timeout".into(), json!(0.5));

        let err = runner.execute("example.com", &options).await.unwrap_err();
        assert!(matches!(
            err,
            RunnerError::Timeout(_) | RunnerError::Network(_)
        ));
    }
}
