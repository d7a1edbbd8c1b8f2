//! HTTP(S) probe runner.

use super::options::{bool_option, duration_option, headers_option, string_option};
use super::{Measurement, RunnerError};
use chrono::{DateTime, Utc};
use reqwest::header::CONTENT_LENGTH;
use reqwest::{redirect, Method, Url};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use x509_parser::prelude::{FromDer, GeneralName, X509Certificate};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_REDIRECTS: usize = 10;
const BODY_PREVIEW_LIMIT: usize = 4096;
const USER_AGENT: &str = "NetScan-Agent/1.0";

pub struct HttpRunner;

impl HttpRunner {
    pub fn new() -> Self {
        Self
    }

    pub async fn execute(
        &self,
        target: &str,
        options: &Measurement,
    ) -> Result<Measurement, RunnerError> {
        let url = normalize_url(target)?;

        let method = string_option(options, "method", "GET");
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| RunnerError::InvalidTarget(format!("invalid method: {method}")))?;
        let headers = headers_option(options);
        let follow_redirects = bool_option(options, "follow_redirects", true);
        let verify_ssl = bool_option(options, "verify_ssl", true);
        let timeout = duration_option(options, "timeout", DEFAULT_TIMEOUT);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(if follow_redirects {
                redirect::Policy::limited(MAX_REDIRECTS)
            } else {
                redirect::Policy::none()
            })
            .min_tls_version(reqwest::tls::Version::TLS_1_2)
            .danger_accept_invalid_certs(!verify_ssl)
            .tls_info(true)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| RunnerError::Network(e.to_string()))?;

        let mut request = client.request(method, url.clone());
        for (name, value) in headers {
            request = request.header(name, value);
        }

        let start = Instant::now();
        let mut response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                RunnerError::Timeout(timeout)
            } else {
                RunnerError::Network(e.to_string())
            }
        })?;
        let response_time = start.elapsed();

        let mut result = Measurement::new();
        let status = response.status();
        result.insert("status_code".into(), json!(status.as_u16()));
        result.insert(
            "status".into(),
            json!(format!(
                "{} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("")
            )),
        );

        let mut header_map = Measurement::new();
        for name in response.headers().keys() {
            if let Some(value) = response.headers().get(name) {
                if let Ok(value) = value.to_str() {
                    header_map.insert(name.to_string(), json!(value));
                }
            }
        }
        result.insert("headers".into(), Value::Object(header_map));
        result.insert(
            "response_time".into(),
            json!(response_time.as_millis() as u64),
        );
        result.insert("url".into(), json!(url.to_string()));
        result.insert("proto".into(), json!(format!("{:?}", response.version())));

        let content_length = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(-1);
        result.insert("content_length".into(), json!(content_length));

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        result.insert("content_type".into(), json!(content_type));

        let final_url = response.url().clone();
        if final_url != url {
            result.insert("final_url".into(), json!(final_url.to_string()));
            result.insert("redirected".into(), json!(true));
        }

        if final_url.scheme() == "https" {
            if let Some(ssl) = collect_ssl_info(&response) {
                result.insert("ssl".into(), Value::Object(ssl));
            }
        }

        match read_body_preview(&mut response).await {
            Ok(preview) => {
                result.insert("body_preview".into(), json!(preview));
            }
            Err(e) => {
                result.insert("body_error".into(), json!(e.to_string()));
            }
        }

        Ok(result)
    }
}

impl Default for HttpRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// Prefix `http://` when the target is not already an absolute http(s) URL.
fn normalize_url(target: &str) -> Result<Url, RunnerError> {
    if let Ok(url) = Url::parse(target) {
        if matches!(url.scheme(), "http" | "https") {
            return Ok(url);
        }
    }
    Url::parse(&format!("http://{target}"))
        .map_err(|_| RunnerError::InvalidTarget(target.to_string()))
}

/// Read up to the preview limit from the response body, then stop.
async fn read_body_preview(response: &mut reqwest::Response) -> Result<String, reqwest::Error> {
    let mut preview = Vec::with_capacity(1024);
    while preview.len() < BODY_PREVIEW_LIMIT {
        match response.chunk().await? {
            Some(chunk) => {
                let remaining = BODY_PREVIEW_LIMIT - preview.len();
                preview.extend_from_slice(&chunk[..chunk.len().min(remaining)]);
            }
            None => break,
        }
    }
    Ok(String::from_utf8_lossy(&preview).into_owned())
}

/// Certificate-derived fields for the `ssl` mapping. The HTTP client exposes
/// the peer certificate DER only, so negotiated protocol and cipher suite
/// are not reported.
fn collect_ssl_info(response: &reqwest::Response) -> Option<Measurement> {
    let tls = response.extensions().get::<reqwest::tls::TlsInfo>()?;
    let der = tls.peer_certificate()?;
    let (_, cert) = X509Certificate::from_der(der).ok()?;

    let not_before = cert.validity().not_before.timestamp();
    let not_after = cert.validity().not_after.timestamp();
    let now = Utc::now().timestamp();

    let mut ssl = Measurement::new();
    ssl.insert("valid".into(), json!(now < not_after));
    ssl.insert("expires_at".into(), json!(rfc3339(not_after)));
    ssl.insert("issued_at".into(), json!(rfc3339(not_before)));
    ssl.insert("issuer".into(), json!(cert.issuer().to_string()));
    ssl.insert("subject".into(), json!(cert.subject().to_string()));

    let dns_names: Vec<String> = cert
        .subject_alternative_name()
        .ok()
        .flatten()
        .map(|ext| {
            ext.value
                .general_names
                .iter()
                .filter_map(|name| match name {
                    GeneralName::DNSName(dns) => Some(dns.to_string()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();
    ssl.insert("dns_names".into(), json!(dns_names));

    ssl.insert(
        "signature_algorithm".into(),
        json!(cert.signature_algorithm.algorithm.to_id_string()),
    );
    ssl.insert(
        "public_key_algorithm".into(),
        json!(cert.public_key().algorithm.algorithm.to_id_string()),
    );
    ssl.insert("version".into(), json!(cert.version.0 + 1));

    Some(ssl)
}

fn rfc3339(timestamp: i64) -> String {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}
