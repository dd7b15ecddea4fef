//! Source adapter contracts + the normalization pipeline behind them.

pub mod assets;
pub mod ideas;
pub mod payload;
pub mod sheet_url;
pub mod tabular;

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use normly_core::CanonicalRecord;
use normly_storage::{FetchError, TextFetcher};
use thiserror::Error;
use tracing::{debug, warn};

pub use assets::{extract_asset_urls, extract_urls};
pub use ideas::{analyze_ideas, extract_ideas, looks_like_echo, IdeaExtraction};
pub use payload::{decode_payload, resolve_candidate, DecodeRoute, DecodedPayload};
pub use sheet_url::{to_csv_export_url, with_cache_buster};
pub use tabular::{map_csv_text, map_rows};

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("not a usable sheet url: {0:?}")]
    InvalidSourceUrl(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

impl AdapterError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, AdapterError::Fetch(err) if err.is_timeout())
    }
}

/// A source of tabular records: fetch raw text, then parse it.
///
/// Parsing never fails; malformed input degrades to fewer (or zero) records.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_id(&self) -> &str;

    async fn fetch_raw(
        &self,
        http: &dyn TextFetcher,
        url: &str,
        timeout: Duration,
    ) -> Result<String, AdapterError>;

    fn parse(&self, raw: &str) -> Vec<CanonicalRecord>;
}

/// Spreadsheet exported as CSV.
#[derive(Debug, Clone)]
pub struct SheetAdapter {
    source_id: String,
}

impl SheetAdapter {
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
        }
    }
}

#[async_trait]
impl SourceAdapter for SheetAdapter {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn fetch_raw(
        &self,
        http: &dyn TextFetcher,
        url: &str,
        timeout: Duration,
    ) -> Result<String, AdapterError> {
        let export_url =
            to_csv_export_url(url).ok_or_else(|| AdapterError::InvalidSourceUrl(url.to_string()))?;
        let busted = with_cache_buster(&export_url, Utc::now().timestamp_millis());
        debug!(source_id = %self.source_id, url = %busted, "fetching sheet export");
        Ok(http.get_text(&busted, timeout).await?)
    }

    fn parse(&self, raw: &str) -> Vec<CanonicalRecord> {
        map_csv_text(raw)
    }
}

pub fn adapter_for_source(source_id: &str) -> Box<dyn SourceAdapter> {
    Box::new(SheetAdapter::new(source_id))
}

/// Fetch and map a sheet in one step.
///
/// Never fails: any fetch error yields the single access-guidance record.
pub async fn fetch_sheet_records(
    http: &dyn TextFetcher,
    url: &str,
    timeout: Duration,
) -> Vec<CanonicalRecord> {
    let adapter = SheetAdapter::new("adhoc");
    match adapter.fetch_raw(http, url, timeout).await {
        Ok(raw) => adapter.parse(&raw),
        Err(err) => {
            warn!(error = %err, "sheet fetch failed; returning access guidance");
            vec![CanonicalRecord::access_guidance()]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingFetcher {
        body: Option<String>,
        requested: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TextFetcher for RecordingFetcher {
        async fn get_text(&self, url: &str, timeout: Duration) -> Result<String, FetchError> {
            self.requested.lock().unwrap().push(url.to_string());
            self.body.clone().ok_or(FetchError::Timeout {
                url: url.to_string(),
                after: timeout,
            })
        }

        async fn post_json(
            &self,
            url: &str,
            _body: &serde_json::Value,
            _timeout: Duration,
        ) -> Result<String, FetchError> {
            Err(FetchError::HttpStatus {
                status: 405,
                url: url.to_string(),
            })
        }
    }

    #[tokio::test]
    async fn sheet_adapter_rewrites_and_busts_cache() {
        let fetcher = RecordingFetcher {
            body: Some("Client,Phone\nAcme,123".to_string()),
            ..Default::default()
        };
        let adapter = SheetAdapter::new("customers");
        let raw = adapter
            .fetch_raw(
                &fetcher,
                "https://docs.google.com/spreadsheets/d/abc/edit?gid=5",
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        let requested = fetcher.requested.lock().unwrap().clone();
        assert_eq!(requested.len(), 1);
        assert!(requested[0]
            .starts_with("https://docs.google.com/spreadsheets/d/abc/export?format=csv&gid=5&_cb="));
        assert_eq!(adapter.parse(&raw)[0].customer, "Acme");
        assert_eq!(adapter.source_id(), "customers");
    }

    #[tokio::test]
    async fn blank_url_is_rejected_before_fetching() {
        let fetcher = RecordingFetcher::default();
        let err = SheetAdapter::new("tasks")
            .fetch_raw(&fetcher, "  ", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::InvalidSourceUrl(_)));
        assert!(fetcher.requested.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn fetch_failures_degrade_to_access_guidance() {
        let fetcher = RecordingFetcher::default();
        let records =
            fetch_sheet_records(&fetcher, "https://x.test/sheet.csv", Duration::from_millis(5)).await;
        assert_eq!(records, vec![CanonicalRecord::access_guidance()]);
    }

    #[test]
    fn timeout_is_visible_through_adapter_error() {
        let err = AdapterError::from(FetchError::Timeout {
            url: "u".into(),
            after: Duration::from_secs(1),
        });
        assert!(err.is_timeout());
        assert!(!AdapterError::InvalidSourceUrl(String::new()).is_timeout());
    }
}
