//! Spreadsheet link rewriting into CSV export URLs.

use std::sync::OnceLock;

use regex::Regex;

fn gid_re() -> &'static Regex {
    static GID_RE: OnceLock<Regex> = OnceLock::new();
    GID_RE.get_or_init(|| Regex::new(r"gid=([0-9]+)").expect("valid gid regex"))
}

fn published_base_re() -> &'static Regex {
    static PUBLISHED_RE: OnceLock<Regex> = OnceLock::new();
    PUBLISHED_RE.get_or_init(|| {
        Regex::new(r"^(https://docs\.google\.com/spreadsheets/d/e/[a-zA-Z0-9_-]+)")
            .expect("valid published sheet regex")
    })
}

fn editor_base_re() -> &'static Regex {
    static EDITOR_RE: OnceLock<Regex> = OnceLock::new();
    EDITOR_RE.get_or_init(|| {
        Regex::new(r"^(https://docs\.google\.com/spreadsheets/d/[a-zA-Z0-9_-]+)")
            .expect("valid editor sheet regex")
    })
}

pub fn is_csv_export_url(url: &str) -> bool {
    url.contains("/export?format=csv") || url.contains("output=csv")
}

/// Rewrite a user-supplied sheet link into its CSV export form.
///
/// CSV links pass through unchanged, as does anything unrecognized. The
/// `gid` tab selector is preserved and defaults to `0`.
pub fn to_csv_export_url(url: &str) -> Option<String> {
    let url = url.trim();
    if url.is_empty() {
        return None;
    }
    if is_csv_export_url(url) {
        return Some(url.to_string());
    }

    let gid = gid_re()
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or("0");

    if url.contains("/d/e/") {
        if let Some(base) = published_base_re().captures(url).and_then(|caps| caps.get(1)) {
            return Some(format!("{}/pub?output=csv&gid={gid}", base.as_str()));
        }
    }

    if let Some(base) = editor_base_re().captures(url).and_then(|caps| caps.get(1)) {
        return Some(format!("{}/export?format=csv&gid={gid}", base.as_str()));
    }

    Some(url.to_string())
}

/// Append `_cb=<stamp>` so intermediary caches serve a fresh export.
pub fn with_cache_buster(url: &str, stamp_millis: i64) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}_cb={stamp_millis}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_links_pass_through() {
        let export = "https://docs.google.com/spreadsheets/d/abc/export?format=csv&gid=7";
        let published = "https://docs.google.com/spreadsheets/d/e/2PACX-xyz/pub?output=csv";
        assert_eq!(to_csv_export_url(export).as_deref(), Some(export));
        assert_eq!(to_csv_export_url(published).as_deref(), Some(published));
    }

    #[test]
    fn editor_links_keep_their_tab() {
        let url = "https://docs.google.com/spreadsheets/d/1pY9Wt_CSu6-A3/edit?gid=113319197#gid=113319197";
        assert_eq!(
            to_csv_export_url(url).as_deref(),
            Some("https://docs.google.com/spreadsheets/d/1pY9Wt_CSu6-A3/export?format=csv&gid=113319197")
        );
    }

    #[test]
    fn editor_links_default_to_first_tab() {
        let url = "https://docs.google.com/spreadsheets/d/abc123/edit";
        assert_eq!(
            to_csv_export_url(url).as_deref(),
            Some("https://docs.google.com/spreadsheets/d/abc123/export?format=csv&gid=0")
        );
    }

    #[test]
    fn published_links_use_pub_endpoint() {
        let url = "https://docs.google.com/spreadsheets/d/e/2PACX-1vQ_x/pubhtml?gid=42&single=true";
        assert_eq!(
            to_csv_export_url(url).as_deref(),
            Some("https://docs.google.com/spreadsheets/d/e/2PACX-1vQ_x/pub?output=csv&gid=42")
        );
    }

    #[test]
    fn unknown_links_are_returned_unchanged_and_blank_is_none() {
        assert_eq!(
            to_csv_export_url("https://example.com/data.csv").as_deref(),
            Some("https://example.com/data.csv")
        );
        assert_eq!(to_csv_export_url("   "), None);
    }

    #[test]
    fn cache_buster_picks_the_right_separator() {
        assert_eq!(with_cache_buster("https://x.test/a", 5), "https://x.test/a?_cb=5");
        assert_eq!(
            with_cache_buster("https://x.test/a?gid=0", 5),
            "https://x.test/a?gid=0&_cb=5"
        );
    }
}
