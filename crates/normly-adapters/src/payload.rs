//! Decoding of opaque webhook bodies and location of the interesting sub-value.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{json, Value};
use tracing::debug;

/// Locations probed, in order, for the value that carries the results.
/// The empty path is the decoded document itself.
pub const CANDIDATE_PATHS: &[&[&str]] = &[
    &["fields", "body"],
    &["data"],
    &["body"],
    &["output"],
    &["result"],
    &[],
];

/// An object holding any of these keys is taken as the result container.
pub const LIST_BEARING_KEYS: &[&str] = &["campaign_ideas", "idea_1", "ideas"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeRoute {
    Strict,
    Scavenged,
    WrappedRaw,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPayload {
    pub value: Value,
    pub route: DecodeRoute,
}

fn json_span_re() -> &'static Regex {
    static JSON_SPAN_RE: OnceLock<Regex> = OnceLock::new();
    JSON_SPAN_RE.get_or_init(|| Regex::new(r"(?s)(\{.*\}|\[.*\])").expect("valid json span regex"))
}

pub fn strip_code_fences(text: &str) -> String {
    text.replace("```json", "").replace("```", "").trim().to_string()
}

/// JavaScript-style truthiness: null, false, zero and "" are absent.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Strict parse, then the first bracketed span with code fences removed,
/// then `{ "body": raw }`. Never fails.
pub fn decode_payload(raw: &str) -> DecodedPayload {
    if let Ok(value) = serde_json::from_str::<Value>(raw) {
        return DecodedPayload {
            value,
            route: DecodeRoute::Strict,
        };
    }

    if let Some(span) = json_span_re().find(raw) {
        match serde_json::from_str::<Value>(&strip_code_fences(span.as_str())) {
            Ok(value) => {
                debug!(span_len = span.len(), "scavenged json span from prose");
                return DecodedPayload {
                    value,
                    route: DecodeRoute::Scavenged,
                };
            }
            Err(err) => debug!(error = %err, "scavenged span is not valid json"),
        }
    }

    debug!(raw_len = raw.len(), "wrapping raw text as body");
    DecodedPayload {
        value: json!({ "body": raw }),
        route: DecodeRoute::WrappedRaw,
    }
}

fn lookup<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut current = value;
    for segment in path {
        current = current.get(*segment)?;
    }
    Some(current)
}

/// Walk [`CANDIDATE_PATHS`] and return the first usable sub-value, or the
/// decoded document itself when none qualifies.
pub fn resolve_candidate(decoded: &Value) -> Value {
    for path in CANDIDATE_PATHS {
        let Some(candidate) = lookup(decoded, path) else {
            continue;
        };
        if !is_truthy(candidate) {
            continue;
        }

        match candidate {
            Value::String(text) if text.contains('{') || text.contains('[') => {
                if let Ok(parsed) = serde_json::from_str::<Value>(&strip_code_fences(text)) {
                    debug!(path = %path.join("."), "parsed stringified candidate");
                    return parsed;
                }
            }
            Value::Array(items) if !items.is_empty() => return candidate.clone(),
            Value::Object(map)
                if LIST_BEARING_KEYS
                    .iter()
                    .any(|key| map.get(*key).is_some_and(is_truthy)) =>
            {
                return candidate.clone();
            }
            _ => {}
        }
    }
    decoded.clone()
}
