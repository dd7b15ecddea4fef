//! Image and asset URL collection from arbitrary decoded payloads.

use std::sync::OnceLock;

use normly_core::AssetUrls;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::payload::decode_payload;

pub const IMAGE_EXTENSIONS: &[&str] = &["jpeg", "jpg", "gif", "png", "webp", "svg"];

/// Substrings that mark an image host or storage bucket.
pub const KNOWN_ASSET_HOSTS: &[&str] = &[
    "googleusercontent",
    "firebasestorage",
    "s3.amazonaws.com",
    "pucho.ai",
];

pub const BLOB_PREFIX: &str = "blob:";
const MAX_DEPTH: usize = 64;

fn extension_re() -> &'static Regex {
    static EXTENSION_RE: OnceLock<Regex> = OnceLock::new();
    EXTENSION_RE.get_or_init(|| {
        Regex::new(r"(?i)\.(jpeg|jpg|gif|png|webp|svg)").expect("valid image extension regex")
    })
}

/// Embedded URL scanner. Alternatives are tried left to right at each
/// position:
/// - `extension`: an http(s) URL ending in an image extension, optional query
/// - `data_uri`: an inline `data:image/<type>;base64,` payload
/// - `known_host`: an http(s) URL on one of the known asset hosts
fn embedded_url_re() -> &'static Regex {
    static EMBEDDED_RE: OnceLock<Regex> = OnceLock::new();
    EMBEDDED_RE.get_or_init(|| {
        Regex::new(concat!(
            r#"(?i)"#,
            r#"(?P<extension>https?://[^\s"'<>]+?\.(?:jpeg|jpg|gif|png|webp|svg)(?:\?[^\s"'<>]*)?)"#,
            r#"|(?P<data_uri>data:image/[a-z]+;base64,[^\s"'<>]+)"#,
            r#"|(?P<known_host>https?://pucho\.ai/[^\s"'<>]+"#,
            r#"|https?://[^\s"'<>]*(?:googleusercontent|firebasestorage|s3\.amazonaws\.com)[^\s"'<>]*)"#,
        ))
        .expect("valid embedded url regex")
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetMatchKind {
    Extension,
    DataUri,
    KnownHost,
}

/// Whether a trimmed string is itself an asset reference.
pub fn is_likely_asset_url(candidate: &str) -> bool {
    if candidate.starts_with(BLOB_PREFIX) {
        return true;
    }
    let looks_addressable = candidate.starts_with("http") || candidate.starts_with("data:image");
    looks_addressable
        && (extension_re().is_match(candidate)
            || KNOWN_ASSET_HOSTS.iter().any(|host| candidate.contains(host)))
}

/// Every non-overlapping embedded URL in `text`, tagged with the alternative
/// that matched.
pub fn scan_embedded_urls(text: &str) -> Vec<(AssetMatchKind, String)> {
    embedded_url_re()
        .captures_iter(text)
        .filter_map(|caps| {
            let kind = if caps.name("extension").is_some() {
                AssetMatchKind::Extension
            } else if caps.name("data_uri").is_some() {
                AssetMatchKind::DataUri
            } else {
                AssetMatchKind::KnownHost
            };
            caps.get(0).map(|m| (kind, m.as_str().to_string()))
        })
        .collect()
}

fn collect_string(text: &str, found: &mut AssetUrls) {
    let clean = text.trim();
    if is_likely_asset_url(clean) && found.insert(clean) {
        return;
    }
    for (_, url) in scan_embedded_urls(clean) {
        found.insert(&url);
    }
}

fn collect(value: &Value, depth: usize, found: &mut AssetUrls) {
    if depth > MAX_DEPTH {
        return;
    }
    match value {
        Value::String(text) => collect_string(text, found),
        Value::Array(items) => items.iter().for_each(|item| collect(item, depth + 1, found)),
        Value::Object(map) => map.values().for_each(|item| collect(item, depth + 1, found)),
        _ => {}
    }
}

/// Walk any decoded value and return the asset URLs in discovery order.
pub fn extract_urls(value: &Value) -> Vec<String> {
    let mut found = AssetUrls::new();
    collect(value, 0, &mut found);
    debug!(count = found.len(), "collected asset urls");
    found.into_vec()
}

/// Decode a raw response body, then collect its asset URLs.
pub fn extract_asset_urls(raw: &str) -> Vec<String> {
    extract_urls(&decode_payload(raw).value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_image_field_is_collected() {
        let value = json!({"image": "https://cdn.example.com/x.png"});
        assert_eq!(extract_urls(&value), vec!["https://cdn.example.com/x.png"]);
    }

    #[test]
    fn discovery_order_is_kept_and_duplicates_dropped() {
        let value = json!({
            "hero": "https://cdn.example.com/a.jpg",
            "gallery": [
                "https://cdn.example.com/b.webp",
                "https://cdn.example.com/a.jpg",
                {"thumb": "https://cdn.example.com/c.GIF"}
            ]
        });
        assert_eq!(
            extract_urls(&value),
            vec![
                "https://cdn.example.com/a.jpg",
                "https://cdn.example.com/b.webp",
                "https://cdn.example.com/c.GIF",
            ]
        );
    }

    #[test]
    fn whole_strings_are_trimmed_before_matching() {
        let value = json!(["  https://lh3.googleusercontent.com/abc123  "]);
        assert_eq!(extract_urls(&value), vec!["https://lh3.googleusercontent.com/abc123"]);
    }

    #[test]
    fn blob_references_are_accepted_whole() {
        assert!(is_likely_asset_url("blob:http://localhost:3000/9f1c"));
        assert!(!is_likely_asset_url("ftp://files.test/x.png"));
        assert!(!is_likely_asset_url("https://example.com/page.html"));
        assert!(is_likely_asset_url("https://bucket.s3.amazonaws.com/render"));
    }

    #[test]
    fn extension_alternative_matches_inside_prose() {
        let found = scan_embedded_urls("Your render: https://cdn.test/out/final.PNG?size=2 enjoy");
        assert_eq!(
            found,
            vec![(AssetMatchKind::Extension, "https://cdn.test/out/final.PNG?size=2".to_string())]
        );
    }

    #[test]
    fn data_uri_alternative_matches_inline_payloads() {
        let found = scan_embedded_urls("preview=data:image/png;base64,iVBORw0KGgo= done");
        assert_eq!(
            found,
            vec![(AssetMatchKind::DataUri, "data:image/png;base64,iVBORw0KGgo=".to_string())]
        );
    }

    #[test]
    fn known_host_alternative_matches_extensionless_links() {
        let found = scan_embedded_urls(
            "see https://pucho.ai/renders/42 and https://firebasestorage.googleapis.com/v0/b/o?alt=media",
        );
        assert_eq!(
            found,
            vec![
                (AssetMatchKind::KnownHost, "https://pucho.ai/renders/42".to_string()),
                (
                    AssetMatchKind::KnownHost,
                    "https://firebasestorage.googleapis.com/v0/b/o?alt=media".to_string()
                ),
            ]
        );
    }

    #[test]
    fn unrelated_links_are_ignored() {
        assert!(scan_embedded_urls("docs at https://example.com/guide and more").is_empty());
        assert!(extract_urls(&json!({"link": "https://example.com/guide", "n": 4})).is_empty());
    }

    #[test]
    fn multiple_urls_in_one_string_are_all_found() {
        let value = json!({
            "output": "First https://cdn.test/1.jpg then https://cdn.test/2.jpg, and again https://cdn.test/1.jpg"
        });
        assert_eq!(
            extract_urls(&value),
            vec!["https://cdn.test/1.jpg", "https://cdn.test/2.jpg"]
        );
    }

    #[test]
    fn raw_bodies_are_decoded_first() {
        let raw = "Done! ```json\n{\"images\": [\"https://cdn.test/a.svg\"]}\n```";
        assert_eq!(extract_asset_urls(raw), vec!["https://cdn.test/a.svg"]);
        assert_eq!(
            extract_asset_urls("Here it is: https://cdn.test/b.jpeg"),
            vec!["https://cdn.test/b.jpeg"]
        );
        assert!(extract_asset_urls("").is_empty());
    }
}
