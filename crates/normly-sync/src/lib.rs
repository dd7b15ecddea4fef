//! Sheet sync orchestration + webhook generation client.

pub mod generation;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use normly_adapters::{adapter_for_source, AdapterError, SourceAdapter};
use normly_core::CanonicalRecord;
use normly_storage::{
    BackoffPolicy, FetchError, HttpClientConfig, HttpFetcher, SettingsStore, TextFetcher,
    SHEET_URL_KEY,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::sync::{watch, RwLock};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

pub use generation::{
    GenerationClient, GenerationFailure, GenerationKind, GenerationOutput, GenerationReport,
    WebhookConfig,
};

pub const DEFAULT_SHEET_URL: &str = "https://docs.google.com/spreadsheets/d/1pY9WtCSu6_A3YsZ31MgcbWj3Q2Ea8AO33Ztr8MVedAg/edit?gid=113319197#gid=113319197";

/// Source whose URL follows the last sheet synced by hand.
pub const TASKS_SOURCE_ID: &str = "tasks";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRegistry {
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub source_id: String,
    pub display_name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub sheet_url: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self {
            sources: vec![
                SourceConfig {
                    source_id: "customers".to_string(),
                    display_name: "Customers".to_string(),
                    enabled: true,
                    sheet_url: Some(DEFAULT_SHEET_URL.replace("113319197", "0")),
                },
                SourceConfig {
                    source_id: TASKS_SOURCE_ID.to_string(),
                    display_name: "Call tasks".to_string(),
                    enabled: true,
                    sheet_url: Some(DEFAULT_SHEET_URL.to_string()),
                },
            ],
        }
    }
}

impl SourceRegistry {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("parsing source registry yaml")
    }

    /// Read the registry file, falling back to the built-in sources when it
    /// does not exist.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !fs::try_exists(path).await.unwrap_or(false) {
            warn!(path = %path.display(), "source registry missing; using built-in sources");
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn enabled(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }
}

pub(crate) fn env_secs(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub sources_file: PathBuf,
    pub settings_path: PathBuf,
    pub poll_interval: Duration,
    pub sheet_timeout: Duration,
    pub user_agent: String,
    pub http_max_retries: usize,
    pub webhooks: WebhookConfig,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self {
            sources_file: std::env::var("NORMLY_SOURCES_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./sources.yaml")),
            settings_path: std::env::var("NORMLY_SETTINGS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./.normly/settings.json")),
            poll_interval: env_secs("NORMLY_POLL_INTERVAL_SECS")
                .unwrap_or(Duration::from_secs(60)),
            sheet_timeout: env_secs("NORMLY_SHEET_TIMEOUT_SECS").unwrap_or(Duration::from_secs(20)),
            user_agent: std::env::var("NORMLY_USER_AGENT")
                .unwrap_or_else(|_| "normly/0.1".to_string()),
            http_max_retries: std::env::var("NORMLY_HTTP_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1),
            webhooks: WebhookConfig::from_env(),
        }
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            user_agent: Some(self.user_agent.clone()),
            backoff: BackoffPolicy {
                max_retries: self.http_max_retries,
                ..Default::default()
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("unknown source {0:?}")]
    UnknownSource(String),
    #[error("source {0:?} is registered twice")]
    DuplicateSource(String),
}

/// Why a sync cycle did not publish. Previous records stay in place.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncFailure {
    #[error("sheet fetch timed out after {after:?}")]
    Timeout { after: Duration },
    #[error("sheet fetch returned http {status}")]
    HttpStatus { status: u16 },
    #[error("sheet fetch failed: {message}")]
    Network { message: String },
    #[error("no sheet url configured")]
    NoSheetUrl,
    #[error("unusable sheet url {url:?}")]
    InvalidUrl { url: String },
}

impl SyncFailure {
    fn from_adapter(err: AdapterError, after: Duration) -> Self {
        match err {
            AdapterError::InvalidSourceUrl(url) => SyncFailure::InvalidUrl { url },
            AdapterError::Fetch(FetchError::Timeout { .. }) => SyncFailure::Timeout { after },
            AdapterError::Fetch(FetchError::HttpStatus { status, .. }) => {
                SyncFailure::HttpStatus { status }
            }
            AdapterError::Fetch(FetchError::Request(err)) => SyncFailure::Network {
                message: err.to_string(),
            },
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            SyncFailure::Timeout { after } => format!(
                "The sheet did not answer within {}s. Check your connection and try again.",
                after.as_secs()
            ),
            SyncFailure::HttpStatus { status } if matches!(*status, 401 | 403 | 404) => format!(
                "Access denied (HTTP {status}). Publish the sheet via File > Share > Publish to web and pick CSV."
            ),
            SyncFailure::HttpStatus { status } => format!("The sheet server returned HTTP {status}."),
            SyncFailure::Network { message } => format!("Could not reach the sheet: {message}"),
            SyncFailure::NoSheetUrl => "No sheet URL is configured for this source.".to_string(),
            SyncFailure::InvalidUrl { url } => format!("{url:?} is not a usable sheet link."),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Replaced { count: usize },
    Empty,
    Skipped,
    Failed(SyncFailure),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    Timer,
    Manual,
}

impl SyncTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncTrigger::Timer => "timer",
            SyncTrigger::Manual => "manual",
        }
    }
}

/// What readers of a source see. Always replaced whole.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceSnapshot {
    pub records: Vec<CanonicalRecord>,
    pub synced_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub diagnostic: Option<CanonicalRecord>,
}

impl SourceSnapshot {
    pub fn loading() -> Self {
        Self {
            records: vec![CanonicalRecord::loading_placeholder()],
            synced_at: None,
            last_error: None,
            diagnostic: None,
        }
    }
}

struct SourceSlot {
    adapter: Box<dyn SourceAdapter>,
    enabled: bool,
    sheet_url: RwLock<Option<String>>,
    in_flight: AtomicBool,
    published: watch::Sender<Arc<SourceSnapshot>>,
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SyncOrchestrator {
    fetcher: Arc<dyn TextFetcher>,
    slots: BTreeMap<String, SourceSlot>,
    fetch_timeout: Duration,
    settings: Option<SettingsStore>,
}

impl SyncOrchestrator {
    pub fn new(
        fetcher: Arc<dyn TextFetcher>,
        sources: Vec<SourceConfig>,
        fetch_timeout: Duration,
    ) -> Result<Self, SyncError> {
        let mut slots = BTreeMap::new();
        for source in sources {
            if slots.contains_key(&source.source_id) {
                return Err(SyncError::DuplicateSource(source.source_id));
            }
            let (published, _) = watch::channel(Arc::new(SourceSnapshot::loading()));
            slots.insert(
                source.source_id.clone(),
                SourceSlot {
                    adapter: adapter_for_source(&source.source_id),
                    enabled: source.enabled,
                    sheet_url: RwLock::new(source.sheet_url),
                    in_flight: AtomicBool::new(false),
                    published,
                },
            );
        }
        Ok(Self {
            fetcher,
            slots,
            fetch_timeout,
            settings: None,
        })
    }

    pub fn with_settings(mut self, settings: SettingsStore) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Point the tasks source at the last sheet synced by hand, if any. An
    /// unreadable settings file leaves the configured URL in place.
    pub async fn restore_persisted_url(&self) -> Option<String> {
        let settings = self.settings.as_ref()?;
        let url = match settings.get(SHEET_URL_KEY).await {
            Ok(url) => url?,
            Err(err) => {
                warn!(error = %err, "could not read persisted sheet url; using configured url");
                return None;
            }
        };
        if let Some(slot) = self.slots.get(TASKS_SOURCE_ID) {
            info!(url = %url, "restoring persisted sheet url");
            *slot.sheet_url.write().await = Some(url.clone());
        }
        Some(url)
    }

    pub fn enabled_source_ids(&self) -> Vec<String> {
        self.slots
            .iter()
            .filter(|(_, slot)| slot.enabled)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub async fn sheet_url(&self, source_id: &str) -> Result<Option<String>, SyncError> {
        Ok(self.slot(source_id)?.sheet_url.read().await.clone())
    }

    pub fn subscribe(
        &self,
        source_id: &str,
    ) -> Result<watch::Receiver<Arc<SourceSnapshot>>, SyncError> {
        Ok(self.slot(source_id)?.published.subscribe())
    }

    pub fn snapshot(&self, source_id: &str) -> Result<Arc<SourceSnapshot>, SyncError> {
        Ok(self.slot(source_id)?.published.borrow().clone())
    }

    /// Timer-driven cycle against the source's configured URL.
    pub async fn poll(&self, source_id: &str) -> Result<SyncOutcome, SyncError> {
        self.run_cycle(source_id, None, SyncTrigger::Timer).await
    }

    /// Manual cycle. A successful sync with `url_override` also becomes the
    /// source's URL for later polls.
    pub async fn sync_now(
        &self,
        source_id: &str,
        url_override: Option<&str>,
    ) -> Result<SyncOutcome, SyncError> {
        self.run_cycle(source_id, url_override, SyncTrigger::Manual).await
    }

    fn slot(&self, source_id: &str) -> Result<&SourceSlot, SyncError> {
        self.slots
            .get(source_id)
            .ok_or_else(|| SyncError::UnknownSource(source_id.to_string()))
    }

    async fn run_cycle(
        &self,
        source_id: &str,
        url_override: Option<&str>,
        trigger: SyncTrigger,
    ) -> Result<SyncOutcome, SyncError> {
        let slot = self.slot(source_id)?;
        let Some(_guard) = InFlightGuard::acquire(&slot.in_flight) else {
            debug!(source_id, trigger = trigger.as_str(), "sync already in flight; skipping");
            return Ok(SyncOutcome::Skipped);
        };

        let run_id = Uuid::new_v4();
        let span = info_span!("source_sync", source_id, %run_id, trigger = trigger.as_str());
        Ok(self.fetch_and_publish(slot, url_override).instrument(span).await)
    }

    async fn fetch_and_publish(&self, slot: &SourceSlot, url_override: Option<&str>) -> SyncOutcome {
        let url = match url_override {
            Some(url) => Some(url.trim().to_string()),
            None => slot.sheet_url.read().await.clone(),
        };
        let Some(url) = url.filter(|u| !u.trim().is_empty()) else {
            return publish_failure(slot, SyncFailure::NoSheetUrl);
        };

        let fetched = tokio::time::timeout(
            self.fetch_timeout,
            slot.adapter.fetch_raw(self.fetcher.as_ref(), &url, self.fetch_timeout),
        )
        .await;
        let raw = match fetched {
            Err(_) => {
                return publish_failure(
                    slot,
                    SyncFailure::Timeout {
                        after: self.fetch_timeout,
                    },
                )
            }
            Ok(Err(err)) => {
                return publish_failure(slot, SyncFailure::from_adapter(err, self.fetch_timeout))
            }
            Ok(Ok(raw)) => raw,
        };

        let records = slot.adapter.parse(&raw);
        if records.is_empty() {
            info!(bytes = raw.len(), "sheet produced no records; keeping current snapshot");
            return SyncOutcome::Empty;
        }

        let count = records.len();
        slot.published.send_replace(Arc::new(SourceSnapshot {
            records,
            synced_at: Some(Utc::now()),
            last_error: None,
            diagnostic: None,
        }));
        info!(count, "published records");

        if url_override.is_some() {
            *slot.sheet_url.write().await = Some(url.clone());
            if slot.adapter.source_id() == TASKS_SOURCE_ID {
                self.persist_sheet_url(&url).await;
            }
        }
        SyncOutcome::Replaced { count }
    }

    async fn persist_sheet_url(&self, url: &str) {
        let Some(settings) = &self.settings else {
            return;
        };
        if let Err(err) = settings.put(SHEET_URL_KEY, url).await {
            warn!(error = %err, "could not persist sheet url");
        }
    }

    /// Register one repeated job per enabled source and start the scheduler.
    pub async fn start_polling(self: &Arc<Self>, interval: Duration) -> Result<JobScheduler> {
        let sched = JobScheduler::new().await.context("creating scheduler")?;
        for source_id in self.enabled_source_ids() {
            let orchestrator = Arc::clone(self);
            let job_source_id = source_id.clone();
            let job = Job::new_repeated_async(interval, move |_uuid, _lock| {
                let orchestrator = Arc::clone(&orchestrator);
                let source_id = job_source_id.clone();
                Box::pin(async move {
                    match orchestrator.poll(&source_id).await {
                        Ok(outcome) => debug!(source_id = %source_id, ?outcome, "poll finished"),
                        Err(err) => warn!(source_id = %source_id, error = %err, "poll rejected"),
                    }
                })
            })
            .with_context(|| format!("creating polling job for {source_id}"))?;
            sched.add(job).await.context("adding polling job")?;
        }
        sched.start().await.context("starting scheduler")?;
        Ok(sched)
    }
}

fn publish_failure(slot: &SourceSlot, failure: SyncFailure) -> SyncOutcome {
    warn!(error = %failure, "sync failed; keeping previous records");
    let message = failure.user_message();
    slot.published.send_modify(|current| {
        let mut next = SourceSnapshot::clone(&**current);
        next.last_error = Some(message);
        next.diagnostic = Some(CanonicalRecord::access_guidance());
        *current = Arc::new(next);
    });
    SyncOutcome::Failed(failure)
}

/// Orchestrator wired to the real HTTP client, the registry file and the
/// settings store named by `config`.
pub async fn orchestrator_from_config(config: &SyncConfig) -> Result<SyncOrchestrator> {
    let registry = SourceRegistry::load(&config.sources_file).await?;
    let fetcher = Arc::new(HttpFetcher::new(config.http_client_config())?);
    let orchestrator = SyncOrchestrator::new(fetcher, registry.sources, config.sheet_timeout)?
        .with_settings(SettingsStore::new(config.settings_path.clone()));
    orchestrator.restore_persisted_url().await;
    Ok(orchestrator)
}

pub async fn run_sync_once_from_env(
    source_id: &str,
    url_override: Option<&str>,
) -> Result<(SyncOutcome, Arc<SourceSnapshot>)> {
    let config = SyncConfig::from_env();
    let orchestrator = orchestrator_from_config(&config).await?;
    let outcome = orchestrator.sync_now(source_id, url_override).await?;
    let snapshot = orchestrator.snapshot(source_id)?;
    Ok((outcome, snapshot))
}
