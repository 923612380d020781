//! The ordered fallback chain used to find a session's captions.
//!
//! Panopto exposes no single stable way to download captions across versions and
//! deployments, so [`PanoptoClient::captions`] walks a list of [`CaptionStrategy`]s,
//! most reliable and cheapest first, and stops at the first one that produces text:
//!
//! 1. [`ApiEndpoints`]: REST endpoints that serve captions or transcripts directly.
//! 2. [`LegacyDownload`]: the session's `CaptionDownloadUrl`, which only accepts the
//!    legacy forms-authentication cookie.
//! 3. [`EmbeddedTranscript`]: long-form text already present in the session metadata.

use crate::captions::normalize;
use crate::panopto_api::client::PanoptoClient;
use crate::panopto_api::legacy::{LEGACY_AUTH_COOKIE, extract_cookie};
use crate::panopto_api::sessions::Session;
use async_trait::async_trait;
use http::{Method, StatusCode};
use oauth2::AccessToken;
use serde_json::json;
use std::fmt;

/// Embedded metadata text must be longer than this (after trimming) to count as captions.
pub const MIN_EMBEDDED_TRANSCRIPT_CHARS: usize = 50;

/// Metadata fields that may hold a transcript, most specific first.
const TRANSCRIPT_FIELDS: &[&str] = &["Transcript", "CaptionText", "Content", "Description", "Summary"];

const LEGACY_LANGUAGES: &[&str] = &["English", "en", "en-US", "en_US"];

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";
const BROWSER_ACCEPT: &str =
    "text/plain,text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// The result of one retrieval attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrievalOutcome {
    /// Usable caption text.
    Success(String),
    /// The server answered successfully but with nothing usable.
    EmptyResponse,
    /// Network error, 5xx, or rate limiting.
    TransientFailure(String),
    /// Any other 4xx, or a precondition for the attempt was missing.
    PermanentFailure(String),
}

impl RetrievalOutcome {
    /// Classifies a response by status, reading the body of successful ones.
    pub async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status();
        if status.is_success() {
            match response.text().await {
                Ok(body) if !body.trim().is_empty() => RetrievalOutcome::Success(body),
                Ok(_) => RetrievalOutcome::EmptyResponse,
                Err(e) => RetrievalOutcome::TransientFailure(format!("read response body: {e}")),
            }
        } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            RetrievalOutcome::TransientFailure(format!("status {status}"))
        } else {
            RetrievalOutcome::PermanentFailure(format!("status {status}"))
        }
    }

    pub fn from_send_error(e: &reqwest::Error) -> Self {
        RetrievalOutcome::TransientFailure(format!("request failed: {e}"))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RetrievalOutcome::Success(_))
    }

    /// Runs raw caption payloads through [`normalize`]; text that normalizes to nothing
    /// becomes [`RetrievalOutcome::EmptyResponse`].
    fn normalized(self) -> Self {
        match self {
            RetrievalOutcome::Success(raw) => {
                let text = normalize(&raw);
                if text.trim().is_empty() {
                    RetrievalOutcome::EmptyResponse
                } else {
                    RetrievalOutcome::Success(text)
                }
            }
            other => other,
        }
    }
}

impl fmt::Display for RetrievalOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetrievalOutcome::Success(text) => write!(f, "success ({} chars)", text.len()),
            RetrievalOutcome::EmptyResponse => f.write_str("empty response"),
            RetrievalOutcome::TransientFailure(reason) => write!(f, "transient failure: {reason}"),
            RetrievalOutcome::PermanentFailure(reason) => write!(f, "permanent failure: {reason}"),
        }
    }
}

/// Everything a strategy may use for one retrieval.
#[derive(Debug)]
pub struct RetrievalContext<'a> {
    pub client: &'a PanoptoClient,
    pub session_id: &'a str,
    /// Session metadata, if it could be fetched.
    pub session: Option<&'a Session>,
    /// A bearer token valid for at least the configured safety buffer.
    pub bearer: &'a AccessToken,
}

/// One way of retrieving a session's captions.
#[async_trait]
pub trait CaptionStrategy: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    async fn attempt(&self, ctx: &RetrievalContext<'_>) -> RetrievalOutcome;
}

/// The default chain, in priority order.
pub fn default_strategies() -> Vec<Box<dyn CaptionStrategy>> {
    vec![
        Box::new(ApiEndpoints),
        Box::new(LegacyDownload),
        Box::new(EmbeddedTranscript::default()),
    ]
}

/// Probes the REST API for a caption or transcript endpoint.
///
/// Each endpoint is tried with GET; a `405 Method Not Allowed` switches to POST with a
/// series of request bodies. A 429 on any call is retried once after a pause.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiEndpoints;

impl ApiEndpoints {
    fn endpoints(ctx: &RetrievalContext<'_>) -> Vec<String> {
        let config = ctx.client.config();
        let v1 = config.api_base();
        let v2 = config.api_base_for_version(2);
        let id = ctx.session_id;
        vec![
            format!("{v1}/sessions/{id}/captions"),
            format!("{v1}/sessions/{id}/transcript"),
            format!("{v1}/sessions/{id}/transcripts"),
            format!("{v1}/sessions/{id}/captions/download"),
            format!("{v1}/sessions/{id}/transcript/download"),
            format!("{v2}/sessions/{id}/captions"),
            format!("{v2}/sessions/{id}/transcript"),
        ]
    }

    fn post_bodies() -> [serde_json::Value; 6] {
        [
            json!({}),
            json!({ "format": "srt" }),
            json!({ "format": "vtt" }),
            json!({ "language": "en" }),
            json!({ "includeTimestamps": false }),
            json!({ "format": "srt", "language": "en", "includeTimestamps": false }),
        ]
    }

    async fn try_endpoint(ctx: &RetrievalContext<'_>, url: &str) -> RetrievalOutcome {
        let client = ctx.client;
        let request = client.authenticated(Method::GET, url, ctx.bearer);
        let response = match client.send_with_rate_limit_retry(request).await {
            Ok(response) => response,
            Err(e) => return RetrievalOutcome::from_send_error(&e),
        };
        tracing::debug!(url, status = %response.status(), "GET caption endpoint");
        if response.status() != StatusCode::METHOD_NOT_ALLOWED {
            return RetrievalOutcome::from_response(response).await.normalized();
        }

        let mut last = RetrievalOutcome::PermanentFailure("status 405 Method Not Allowed".into());
        for body in Self::post_bodies() {
            let request = client.authenticated(Method::POST, url, ctx.bearer).json(&body);
            let outcome = match client.send_with_rate_limit_retry(request).await {
                Ok(response) => {
                    tracing::debug!(url, %body, status = %response.status(), "POST caption endpoint");
                    RetrievalOutcome::from_response(response).await.normalized()
                }
                Err(e) => RetrievalOutcome::from_send_error(&e),
            };
            if outcome.is_success() {
                return outcome;
            }
            last = outcome;
        }
        last
    }
}

#[async_trait]
impl CaptionStrategy for ApiEndpoints {
    fn name(&self) -> &'static str {
        "api-endpoints"
    }

    async fn attempt(&self, ctx: &RetrievalContext<'_>) -> RetrievalOutcome {
        let mut last = RetrievalOutcome::EmptyResponse;
        for url in Self::endpoints(ctx) {
            let outcome = Self::try_endpoint(ctx, &url).await;
            if outcome.is_success() {
                tracing::info!(%url, "retrieved captions from API endpoint");
                return outcome;
            }
            tracing::debug!(%url, %outcome, "caption endpoint came up empty");
            last = outcome;
        }
        last
    }
}

/// Downloads from the session's `CaptionDownloadUrl` using the legacy auth cookie.
///
/// The cookie comes from `auth/legacyLogin` and is only sent to the configured
/// server's host. Requests escalate from plain GET/POST to browser-like headers and
/// explicit language parameters while responses stay empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyDownload;

#[derive(Debug)]
struct LegacyAttempt {
    method: Method,
    url: String,
    browser_headers: bool,
}

impl LegacyDownload {
    fn attempts(download_url: &str) -> Vec<LegacyAttempt> {
        let separator = if download_url.contains('?') { '&' } else { '?' };
        let with_language = |lang: &str| format!("{download_url}{separator}language={lang}");

        let mut attempts = vec![
            LegacyAttempt {
                method: Method::GET,
                url: download_url.to_string(),
                browser_headers: false,
            },
            LegacyAttempt {
                method: Method::POST,
                url: download_url.to_string(),
                browser_headers: false,
            },
            LegacyAttempt {
                method: Method::GET,
                url: download_url.to_string(),
                browser_headers: true,
            },
        ];
        if !download_url.contains("language=") {
            attempts.push(LegacyAttempt {
                method: Method::GET,
                url: with_language("English_USA"),
                browser_headers: true,
            });
        }
        attempts.extend(LEGACY_LANGUAGES.iter().map(|lang| LegacyAttempt {
            method: Method::GET,
            url: with_language(lang),
            browser_headers: true,
        }));
        attempts
    }

    async fn legacy_cookie(ctx: &RetrievalContext<'_>) -> Result<String, RetrievalOutcome> {
        let client = ctx.client;
        let url = format!("{}/auth/legacyLogin", client.config().api_base());
        let response = client
            .authenticated(Method::GET, &url, ctx.bearer)
            .send()
            .await
            .map_err(|e| RetrievalOutcome::from_send_error(&e))?;
        tracing::debug!(status = %response.status(), "legacy login");
        if !response.status().is_success() {
            return Err(RetrievalOutcome::from_response(response).await);
        }
        extract_cookie(response.headers(), LEGACY_AUTH_COOKIE).ok_or_else(|| {
            RetrievalOutcome::PermanentFailure(format!(
                "legacy login response carried no {LEGACY_AUTH_COOKIE} cookie"
            ))
        })
    }
}

#[async_trait]
impl CaptionStrategy for LegacyDownload {
    fn name(&self) -> &'static str {
        "legacy-download"
    }

    async fn attempt(&self, ctx: &RetrievalContext<'_>) -> RetrievalOutcome {
        let Some(download_url) = ctx.session.and_then(|s| s.urls.caption_download_url.as_deref())
        else {
            return RetrievalOutcome::PermanentFailure(
                "session metadata has no caption download URL".into(),
            );
        };

        let cookie = match Self::legacy_cookie(ctx).await {
            Ok(cookie) => cookie,
            Err(outcome) => {
                tracing::warn!(%outcome, "could not obtain legacy authentication cookie");
                return outcome;
            }
        };
        let http = match ctx.client.legacy_http_client(&cookie) {
            Ok(http) => http,
            Err(e) => {
                return RetrievalOutcome::PermanentFailure(format!(
                    "build legacy download client: {e}"
                ));
            }
        };
        let referer = ctx.client.config().viewer_url(ctx.session_id);

        let mut last = RetrievalOutcome::EmptyResponse;
        for attempt in Self::attempts(download_url) {
            let mut request = http.request(attempt.method.clone(), &attempt.url);
            if attempt.browser_headers {
                request = request
                    .header(http::header::USER_AGENT, BROWSER_USER_AGENT)
                    .header(http::header::ACCEPT, BROWSER_ACCEPT)
                    .header(http::header::ACCEPT_LANGUAGE, "en-US,en;q=0.5")
                    .header(http::header::REFERER, referer.as_str());
            }
            let outcome = match request.send().await {
                Ok(response) => RetrievalOutcome::from_response(response).await.normalized(),
                Err(e) => RetrievalOutcome::from_send_error(&e),
            };
            tracing::debug!(
                method = %attempt.method,
                url = %attempt.url,
                browser_headers = attempt.browser_headers,
                %outcome,
                "legacy caption download"
            );
            if outcome.is_success() {
                return outcome;
            }
            last = outcome;
        }
        last
    }
}

/// Accepts long-form text already embedded in the session metadata.
///
/// Only text whose trimmed length exceeds [`MIN_EMBEDDED_TRANSCRIPT_CHARS`] counts;
/// shorter fields are treated as noise. Accepted text is returned trimmed but
/// otherwise as stored.
#[derive(Debug, Clone, Copy)]
pub struct EmbeddedTranscript {
    min_chars: usize,
}

impl Default for EmbeddedTranscript {
    fn default() -> Self {
        Self {
            min_chars: MIN_EMBEDDED_TRANSCRIPT_CHARS,
        }
    }
}

impl EmbeddedTranscript {
    /// Picks the first sufficiently long transcript-like text in `session`.
    pub fn select(&self, session: &Session) -> Option<String> {
        let captions = embedded_captions(session);
        let fields = TRANSCRIPT_FIELDS
            .iter()
            .filter_map(|field| session.text_field(field).map(|text| (*field, text)));

        captions
            .as_deref()
            .map(|text| ("Captions", text))
            .into_iter()
            .chain(fields)
            .find_map(|(field, text)| {
                let text = text.trim();
                if text.chars().count() > self.min_chars {
                    tracing::info!(field, "using transcript embedded in session metadata");
                    Some(text.to_string())
                } else {
                    tracing::debug!(field, chars = text.chars().count(), "embedded text too short");
                    None
                }
            })
    }
}

/// Joins the `Text` of an embedded `Captions` array (or single object).
fn embedded_captions(session: &Session) -> Option<String> {
    fn text_of(caption: &serde_json::Value) -> Option<&str> {
        caption.get("Text").and_then(serde_json::Value::as_str)
    }

    match session.extra.get("Captions")? {
        serde_json::Value::Array(items) => {
            let joined = items.iter().filter_map(text_of).collect::<Vec<_>>().join(" ");
            Some(joined)
        }
        object @ serde_json::Value::Object(_) => text_of(object).map(str::to_string),
        _ => None,
    }
}

#[async_trait]
impl CaptionStrategy for EmbeddedTranscript {
    fn name(&self) -> &'static str {
        "embedded-transcript"
    }

    async fn attempt(&self, ctx: &RetrievalContext<'_>) -> RetrievalOutcome {
        let Some(session) = ctx.session else {
            return RetrievalOutcome::PermanentFailure("no session metadata available".into());
        };
        match self.select(session) {
            Some(text) => RetrievalOutcome::Success(text),
            None => RetrievalOutcome::EmptyResponse,
        }
    }
}
