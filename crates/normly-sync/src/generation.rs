//! Webhook-backed generation: campaign ideas plus concept and studio renders.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use normly_adapters::{analyze_ideas, extract_asset_urls, looks_like_echo};
use normly_core::IdeaRecord;
use normly_storage::{FetchError, TextFetcher};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, info_span, warn, Instrument};

pub const REQUEST_ID_FIELD: &str = "requestId";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GenerationKind {
    Ideas,
    Concept,
    Studio,
}

impl GenerationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationKind::Ideas => "ideas",
            GenerationKind::Concept => "concept",
            GenerationKind::Studio => "studio",
        }
    }

    pub fn request_prefix(&self) -> &'static str {
        match self {
            GenerationKind::Ideas => "REQ",
            GenerationKind::Concept => "LAB",
            GenerationKind::Studio => "STUDIO",
        }
    }

    /// Metadata calls answer quickly; render calls may take minutes.
    pub fn is_metadata(&self) -> bool {
        matches!(self, GenerationKind::Ideas)
    }
}

pub fn request_id(kind: GenerationKind, unix_millis: i64) -> String {
    format!("{}_{unix_millis}", kind.request_prefix())
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub ideas_url: Option<String>,
    pub concept_url: Option<String>,
    pub studio_url: Option<String>,
    pub metadata_timeout: Duration,
    pub generation_timeout: Duration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            ideas_url: None,
            concept_url: None,
            studio_url: None,
            metadata_timeout: Duration::from_secs(15),
            generation_timeout: Duration::from_secs(240),
        }
    }
}

impl WebhookConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            ideas_url: non_empty_env("NORMLY_IDEAS_WEBHOOK"),
            concept_url: non_empty_env("NORMLY_CONCEPT_WEBHOOK"),
            studio_url: non_empty_env("NORMLY_STUDIO_WEBHOOK"),
            metadata_timeout: crate::env_secs("NORMLY_METADATA_TIMEOUT_SECS")
                .unwrap_or(defaults.metadata_timeout),
            generation_timeout: crate::env_secs("NORMLY_GENERATION_TIMEOUT_SECS")
                .unwrap_or(defaults.generation_timeout),
        }
    }

    pub fn endpoint(&self, kind: GenerationKind) -> Option<&str> {
        match kind {
            GenerationKind::Ideas => self.ideas_url.as_deref(),
            GenerationKind::Concept => self.concept_url.as_deref(),
            GenerationKind::Studio => self.studio_url.as_deref(),
        }
    }

    pub fn timeout_for(&self, kind: GenerationKind) -> Duration {
        if kind.is_metadata() {
            self.metadata_timeout
        } else {
            self.generation_timeout
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationFailure {
    #[error("no webhook configured for {}", .0.as_str())]
    NotConfigured(GenerationKind),
    #[error("request payload is not a json object")]
    InvalidRequest,
    #[error("{} webhook timed out after {after:?}", .kind.as_str())]
    Timeout { kind: GenerationKind, after: Duration },
    #[error("webhook returned http {status}")]
    ServerError { status: u16 },
    #[error("webhook unreachable: {message}")]
    Network { message: String },
    #[error("{} webhook returned nothing usable", .kind.as_str())]
    NoResults { kind: GenerationKind, raw: String },
    #[error("webhook echoed the request payload")]
    EchoedRequest { raw: String },
}

impl GenerationFailure {
    fn from_fetch(kind: GenerationKind, after: Duration, err: FetchError) -> Self {
        match err {
            FetchError::Timeout { .. } => GenerationFailure::Timeout { kind, after },
            FetchError::HttpStatus { status, .. } => GenerationFailure::ServerError { status },
            FetchError::Request(err) => GenerationFailure::Network {
                message: err.to_string(),
            },
        }
    }

    /// Short, specific text for the person who pressed the button.
    pub fn user_message(&self) -> String {
        match self {
            GenerationFailure::NotConfigured(kind) => {
                format!("No webhook URL is configured for {}.", kind.as_str())
            }
            GenerationFailure::InvalidRequest => {
                "The request payload must be a JSON object.".to_string()
            }
            GenerationFailure::Timeout { kind, after } if kind.is_metadata() => format!(
                "Request timed out ({}s). The studio might be slow or the webhook is inactive.",
                after.as_secs()
            ),
            GenerationFailure::Timeout { after, .. } => format!(
                "Request timed out ({} mins). The studio did not respond in time.",
                after.as_secs() / 60
            ),
            GenerationFailure::ServerError { status } => format!("Server error: {status}"),
            GenerationFailure::Network { message } => format!("Network error: {message}"),
            GenerationFailure::NoResults { kind, .. } if kind.is_metadata() => {
                "Received an empty response. Make sure the webhook responds with the generated output."
                    .to_string()
            }
            GenerationFailure::NoResults { .. } => {
                "Response received but no image URLs were found. Check the flow output.".to_string()
            }
            GenerationFailure::EchoedRequest { .. } => {
                "The webhook is sending back your input. Map its response to the generation step instead of the trigger."
                    .to_string()
            }
        }
    }

    /// Raw response body kept for a diagnostic dump, when there was one.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            GenerationFailure::NoResults { raw, .. } | GenerationFailure::EchoedRequest { raw } => {
                Some(raw)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutput {
    Ideas(Vec<IdeaRecord>),
    Assets(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationReport {
    pub kind: GenerationKind,
    pub request_id: String,
    pub output: GenerationOutput,
    pub raw: String,
}

pub struct GenerationClient {
    fetcher: Arc<dyn TextFetcher>,
    config: WebhookConfig,
}

impl GenerationClient {
    pub fn new(fetcher: Arc<dyn TextFetcher>, config: WebhookConfig) -> Self {
        Self { fetcher, config }
    }

    pub async fn generate_ideas(&self, request: Value) -> Result<GenerationReport, GenerationFailure> {
        self.generate(GenerationKind::Ideas, request).await
    }

    /// Post `request` (a JSON object) to the webhook for `kind` and
    /// normalize whatever comes back.
    pub async fn generate(
        &self,
        kind: GenerationKind,
        request: Value,
    ) -> Result<GenerationReport, GenerationFailure> {
        let endpoint = self
            .config
            .endpoint(kind)
            .ok_or(GenerationFailure::NotConfigured(kind))?
            .to_string();
        let Value::Object(mut body) = request else {
            return Err(GenerationFailure::InvalidRequest);
        };
        let request_id = request_id(kind, Utc::now().timestamp_millis());
        body.insert(REQUEST_ID_FIELD.to_string(), Value::String(request_id.clone()));
        let request = Value::Object(body);
        let timeout = self.config.timeout_for(kind);

        let span = info_span!("webhook_generation", kind = kind.as_str(), request_id = %request_id);
        async move {
            let raw = match tokio::time::timeout(
                timeout,
                self.fetcher.post_json(&endpoint, &request, timeout),
            )
            .await
            {
                Err(_) => return Err(GenerationFailure::Timeout { kind, after: timeout }),
                Ok(Err(err)) => {
                    warn!(error = %err, "webhook call failed");
                    return Err(GenerationFailure::from_fetch(kind, timeout, err));
                }
                Ok(Ok(raw)) => raw,
            };

            let output = if kind.is_metadata() {
                interpret_ideas(&raw, &request)?
            } else {
                let urls = extract_asset_urls(&raw);
                if urls.is_empty() {
                    return Err(GenerationFailure::NoResults { kind, raw });
                }
                GenerationOutput::Assets(urls)
            };
            info!(raw_len = raw.len(), "webhook generation finished");
            Ok(GenerationReport {
                kind,
                request_id,
                output,
                raw,
            })
        }
        .instrument(span)
        .await
    }
}

fn interpret_ideas(raw: &str, request: &Value) -> Result<GenerationOutput, GenerationFailure> {
    let analysis = analyze_ideas(raw);
    if !analysis.has_structured_ideas() && looks_like_echo(&analysis.resolved, request) {
        return Err(GenerationFailure::EchoedRequest {
            raw: raw.to_string(),
        });
    }
    if analysis.ideas.is_empty() {
        return Err(GenerationFailure::NoResults {
            kind: GenerationKind::Ideas,
            raw: raw.to_string(),
        });
    }
    Ok(GenerationOutput::Ideas(analysis.ideas))
}
