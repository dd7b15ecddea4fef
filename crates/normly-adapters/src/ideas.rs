//! Idea normalization and extraction from loosely shaped webhook payloads.

use normly_core::IdeaRecord;
use serde_json::{Map, Value};
use tracing::debug;

use crate::payload::{decode_payload, is_truthy, resolve_candidate, DecodeRoute};

/// Keys that name an idea, most specific first.
pub const NAME_KEYS: &[&str] = &[
    "idea_name",
    "title",
    "name",
    "concept",
    "campaign_name",
    "header",
    "heading",
];

/// Keys that describe an idea, most specific first.
pub const DESCRIPTION_KEYS: &[&str] = &[
    "one_liner",
    "description",
    "summary",
    "text",
    "content",
    "body",
    "bio",
    "message",
];

pub const CHANNEL_KEYS: &[&str] = &["primary_channels", "channels", "platforms", "media"];

/// Keys probed for an idea list on an object, in priority order.
pub const ARRAY_KEYS: &[&str] = &[
    "campaign_ideas",
    "ideas",
    "body",
    "output",
    "results",
    "data",
    "suggestions",
];

/// Outbound request field that never counts towards echo detection.
pub const REQUEST_ID_KEY: &str = "requestId";

pub const ONE_LINER_CAP: usize = 500;
pub const RAW_FALLBACK_CAP: usize = 600;
pub const MIN_STRING_IDEA_CHARS: usize = 10;
pub const RAW_FALLBACK_MIN_CHARS: usize = 15;
const MAX_DEPTH: usize = 32;

const STRING_IDEA_NAME: &str = "Strategic Insight";
const DEFAULT_IDEA_NAME: &str = "Recommended Strategy";
const DEFAULT_ONE_LINER: &str = "Detailed strategy outlined in the generated response.";
const RAW_FALLBACK_NAME: &str = "AI Direct Response";

pub fn truncate_with_ellipsis(text: &str, cap: usize) -> String {
    if text.chars().count() <= cap {
        return text.to_string();
    }
    let mut out = text.chars().take(cap).collect::<String>();
    out.push_str("...");
    out
}

/// Render a loose JSON value as display text.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(value_to_text).collect::<Vec<_>>().join(","),
        other => other.to_string(),
    }
}

fn first_present<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| map.get(*key))
        .find(|value| is_truthy(value))
}

fn channels_from(value: Option<&Value>) -> Vec<String> {
    let channels = match value {
        Some(Value::Array(items)) => items
            .iter()
            .map(value_to_text)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>(),
        Some(scalar) => vec![value_to_text(scalar)],
        None => Vec::new(),
    };
    if channels.is_empty() {
        vec!["Multi-Channel".to_string()]
    } else {
        channels
    }
}

/// Convert one list item into an idea, or drop it.
///
/// Strings need at least ten characters once JSON punctuation is stripped.
/// Objects need a name-like or description-like key.
pub fn normalize_idea(item: &Value) -> Option<IdeaRecord> {
    match item {
        Value::String(text) => {
            let clean = text
                .chars()
                .filter(|c| !matches!(c, '"' | '{' | '}' | '[' | ']'))
                .collect::<String>();
            let clean = clean.trim();
            if clean.chars().count() < MIN_STRING_IDEA_CHARS {
                return None;
            }
            Some(IdeaRecord {
                name: STRING_IDEA_NAME.to_string(),
                one_liner: truncate_with_ellipsis(clean, ONE_LINER_CAP),
                channels: vec!["Direct Message".to_string()],
                is_raw: false,
            })
        }
        Value::Object(map) => {
            let name = first_present(map, NAME_KEYS);
            let description = first_present(map, DESCRIPTION_KEYS);
            if name.is_none() && description.is_none() {
                return None;
            }

            let name = name
                .map(value_to_text)
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_IDEA_NAME.to_string());
            let one_liner = description
                .map(value_to_text)
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_ONE_LINER.to_string());

            Some(IdeaRecord {
                name,
                one_liner: truncate_with_ellipsis(&one_liner, ONE_LINER_CAP),
                channels: channels_from(first_present(map, CHANNEL_KEYS)),
                is_raw: false,
            })
        }
        _ => None,
    }
}

fn normalize_all<'a>(items: impl IntoIterator<Item = &'a Value>) -> Vec<IdeaRecord> {
    items.into_iter().filter_map(normalize_idea).collect()
}

/// Find the idea list inside a resolved value: direct list, known array keys,
/// object values, then depth-first descent.
pub fn extract_idea_list(value: &Value) -> Vec<IdeaRecord> {
    extract_at_depth(value, 0)
}

fn extract_at_depth(value: &Value, depth: usize) -> Vec<IdeaRecord> {
    if depth > MAX_DEPTH || !is_truthy(value) {
        return Vec::new();
    }

    let children: Vec<&Value> = match value {
        Value::Array(items) => {
            let normalized = normalize_all(items);
            if !normalized.is_empty() {
                return normalized;
            }
            items.iter().collect()
        }
        Value::Object(map) => {
            for key in ARRAY_KEYS {
                if let Some(Value::Array(items)) = map.get(*key) {
                    let normalized = normalize_all(items);
                    if !normalized.is_empty() {
                        return normalized;
                    }
                }
            }

            let normalized = normalize_all(map.values().filter(|v| v.is_object()));
            if !normalized.is_empty() {
                return normalized;
            }
            map.values().collect()
        }
        _ => return Vec::new(),
    };

    for child in children.into_iter().filter(|v| v.is_array() || v.is_object()) {
        let deep = extract_at_depth(child, depth + 1);
        if !deep.is_empty() {
            return deep;
        }
    }
    Vec::new()
}

/// Single safety record for responses that carry text but no structure.
pub fn raw_fallback(raw: &str) -> Option<IdeaRecord> {
    let meaningful = raw
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '"' | '{' | '}' | '[' | ']'))
        .count();
    if meaningful <= RAW_FALLBACK_MIN_CHARS {
        return None;
    }
    Some(IdeaRecord {
        name: RAW_FALLBACK_NAME.to_string(),
        one_liner: truncate_with_ellipsis(raw.trim(), RAW_FALLBACK_CAP),
        channels: vec!["AI Output".to_string()],
        is_raw: true,
    })
}

/// Every intermediate stage of an idea extraction, kept for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct IdeaExtraction {
    pub decoded: Value,
    pub route: DecodeRoute,
    pub resolved: Value,
    pub ideas: Vec<IdeaRecord>,
}

impl IdeaExtraction {
    pub fn has_structured_ideas(&self) -> bool {
        self.ideas.iter().any(|idea| !idea.is_raw)
    }
}

pub fn analyze_ideas(raw: &str) -> IdeaExtraction {
    let decoded = decode_payload(raw);
    let resolved = resolve_candidate(&decoded.value);
    let mut ideas = extract_idea_list(&resolved);
    if ideas.is_empty() {
        if let Some(fallback) = raw_fallback(raw) {
            debug!(raw_len = raw.len(), "no structured ideas; using raw fallback");
            ideas.push(fallback);
        }
    }
    IdeaExtraction {
        decoded: decoded.value,
        route: decoded.route,
        resolved,
        ideas,
    }
}

/// Ideas from an arbitrary response body. Never fails; may be empty.
pub fn extract_ideas(raw: &str) -> Vec<IdeaRecord> {
    analyze_ideas(raw).ideas
}

/// Whether `resolved` (or an object directly inside it) carries top-level
/// keys of the outbound `request`. A diagnostic hint only.
pub fn looks_like_echo(resolved: &Value, request: &Value) -> bool {
    let Some(request) = request.as_object() else {
        return false;
    };
    let shares_request_keys = |candidate: &Map<String, Value>| {
        request
            .keys()
            .filter(|key| key.as_str() != REQUEST_ID_KEY)
            .any(|key| candidate.contains_key(key))
    };
    match resolved {
        Value::Object(map) => {
            shares_request_keys(map)
                || map
                    .values()
                    .filter_map(Value::as_object)
                    .any(shares_request_keys)
        }
        _ => false,
    }
}
