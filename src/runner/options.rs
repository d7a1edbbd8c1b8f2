//! Tolerant accessors for the free-form task options map.
//!
//! Options travel as JSON, so numbers may arrive as floats or integers and
//! durations as float seconds or a string form ("5s", "500ms").

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;

pub fn string_option(options: &Map<String, Value>, key: &str, default: &str) -> String {
    match options.get(key) {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        _ => default.to_string(),
    }
}

pub fn bool_option(options: &Map<String, Value>, key: &str, default: bool) -> bool {
    match options.get(key) {
        Some(Value::Bool(b)) => *b,
        _ => default,
    }
}

pub fn int_option(options: &Map<String, Value>, key: &str, default: i64) -> i64 {
    match options.get(key) {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(default),
        _ => default,
    }
}

pub fn duration_option(options: &Map<String, Value>, key: &str, default: Duration) -> Duration {
    match options.get(key) {
        Some(Value::Number(n)) => n
            .as_f64()
            .filter(|secs| *secs > 0.0)
            .map(Duration::from_secs_f64)
            .unwrap_or(default),
        Some(Value::String(s)) => parse_duration(s).unwrap_or(default),
        _ => default,
    }
}

pub fn headers_option(options: &Map<String, Value>) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    if let Some(Value::Object(map)) = options.get("headers") {
        for (key, value) in map {
            if let Value::String(s) = value {
                headers.insert(key.clone(), s.clone());
            }
        }
    }
    headers
}

/// Port numbers may be JSON numbers or numeric strings.
pub fn port_option(options: &Map<String, Value>, key: &str) -> Option<u16> {
    match options.get(key)? {
        Value::Number(n) => {
            let p = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            u16::try_from(p).ok().filter(|p| *p > 0)
        }
        Value::String(s) => s.parse::<u16>().ok().filter(|p| *p > 0),
        _ => None,
    }
}

/// Parse "300ms" / "5s" / "2m" / "1h" duration strings.
fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    let (value, unit) = s.split_at(s.find(|c: char| c.is_ascii_alphabetic())?);
    let value: f64 = value.parse().ok()?;
    if value < 0.0 {
        return None;
    }
    let secs = match unit {
        "ms" => value / 1000.0,
        "s" => value,
        "m" => value * 60.0,
        "h" => value * 3600.0,
        _ => return None,
    };
    Some(Duration::from_secs_f64(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn opts(v: Value) -> Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn numbers_arrive_as_floats_or_ints() {
        let o = opts(json!({"count": 7.0, "port": 443}));
        assert_eq!(int_option(&o, "count", 4), 7);
        assert_eq!(int_option(&o, "port", 80), 443);
        assert_eq!(int_option(&o, "missing", 4), 4);
    }

    #[test]
    fn durations_accept_float_seconds_and_strings() {
        let o = opts(json!({"timeout": 2.5, "read_timeout": "300ms", "long": "2m"}));
        let default = Duration::from_secs(10);
        assert_eq!(
            duration_option(&o, "timeout", default),
            Duration::from_secs_f64(2.5)
        );
        assert_eq!(
            duration_option(&o, "read_timeout", default),
            Duration::from_millis(300)
        );
        assert_eq!(duration_option(&o, "long", default), Duration::from_secs(120));
        assert_eq!(duration_option(&o, "missing", default), default);
        // Garbage strings fall back to the default.
        assert_eq!(
            duration_option(&opts(json!({"timeout": "soon"})), "timeout", default),
            default
        );
    }

    #[test]
    fn headers_keep_only_string_values() {
        let o = opts(json!({"headers": {"X-Probe": "netscan", "X-Num": 1}}));
        let headers = headers_option(&o);
        assert_eq!(headers.get("X-Probe").map(String::as_str), Some("netscan"));
        assert!(!headers.contains_key("X-Num"));
    }

    #[test]
    fn ports_parse_from_numbers_and_strings() {
        let o = opts(json!({"a": 8080.0, "b": "22", "c": 0, "d": 70000}));
        assert_eq!(port_option(&o, "a"), Some(8080));
        assert_eq!(port_option(&o, "b"), Some(22));
        assert_eq!(port_option(&o, "c"), None);
        assert_eq!(port_option(&o, "d"), None);
    }
}
