use crate::config::PanoptoConfig;
use crate::error::AuthError;
use crate::oauth::{FileTokenStore, OAuthManager};
use crate::panopto_api::legacy::LEGACY_AUTH_COOKIE;
use crate::panopto_api::sessions::Session;
use crate::panopto_api::strategies::{
    CaptionStrategy, RetrievalContext, RetrievalOutcome, default_strategies,
};
use eyre::Context;
use http::{Method, StatusCode};
use oauth2::AccessToken;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::instrument;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Authenticated access to a Panopto server's REST API.
///
/// Cloning is cheap; clones share the same [`OAuthManager`], so concurrent requests
/// never race to refresh or re-authorize.
#[derive(Debug, Clone)]
pub struct PanoptoClient {
    config: Arc<PanoptoConfig>,
    oauth: Arc<Mutex<OAuthManager>>,
    http: reqwest::Client,
    prefer_unattended: bool,
    strategies: Arc<Vec<Box<dyn CaptionStrategy>>>,
}

impl PanoptoClient {
    pub fn new(config: PanoptoConfig, oauth: OAuthManager) -> eyre::Result<Self> {
        let http = reqwest::ClientBuilder::new()
            .danger_accept_invalid_certs(!config.verify_tls)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("build HTTP client")?;
        Ok(Self {
            config: Arc::new(config),
            oauth: Arc::new(Mutex::new(oauth)),
            http,
            prefer_unattended: false,
            strategies: Arc::new(default_strategies()),
        })
    }

    /// Builds a client whose credentials persist to [`PanoptoConfig::token_file`].
    pub fn from_config(config: PanoptoConfig) -> eyre::Result<Self> {
        let store = Arc::new(FileTokenStore::new(config.token_file.clone()));
        let oauth = OAuthManager::new(&config, store)?;
        Self::new(config, oauth)
    }

    /// Try the client-credentials grant before falling back to interactive authorization.
    pub fn with_unattended(mut self, prefer_unattended: bool) -> Self {
        self.prefer_unattended = prefer_unattended;
        self
    }

    /// Replaces the caption retrieval chain.
    pub fn with_strategies(mut self, strategies: Vec<Box<dyn CaptionStrategy>>) -> Self {
        self.strategies = Arc::new(strategies);
        self
    }

    pub fn config(&self) -> &PanoptoConfig {
        &self.config
    }

    pub fn oauth(&self) -> &Arc<Mutex<OAuthManager>> {
        &self.oauth
    }

    /// A bearer token valid for at least the configured safety buffer.
    pub async fn access_token(&self) -> Result<AccessToken, AuthError> {
        self.oauth
            .lock()
            .await
            .acquire_token(self.prefer_unattended)
            .await
    }

    /// A request carrying `bearer` in the `Authorization` header.
    pub fn authenticated(
        &self,
        method: Method,
        url: &str,
        bearer: &AccessToken,
    ) -> reqwest::RequestBuilder {
        self.http.request(method, url).bearer_auth(bearer.secret())
    }

    /// Sends `request`, retrying exactly once after a pause if it was rate limited.
    pub async fn send_with_rate_limit_retry(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let retry = request.try_clone();
        let response = request.send().await?;
        if response.status() != StatusCode::TOO_MANY_REQUESTS {
            return Ok(response);
        }
        let Some(retry) = retry else {
            return Ok(response);
        };
        tracing::warn!(
            url = %response.url(),
            backoff = ?self.config.rate_limit_backoff,
            "rate limited, retrying once"
        );
        tokio::time::sleep(self.config.rate_limit_backoff).await;
        retry.send().await
    }

    /// Fetches a session's metadata.
    ///
    /// Returns `Ok(None)` if the server would not provide it; only failing to
    /// authenticate is an error.
    #[instrument(skip(self))]
    pub async fn session_info(&self, session_id: &str) -> Result<Option<Session>, AuthError> {
        let bearer = self.access_token().await?;
        Ok(self.fetch_session(&bearer, session_id).await)
    }

    /// Retrieves a session's captions as normalized prose.
    ///
    /// The configured strategies run in order and the first usable text wins. Returns
    /// `Ok(None)` if every strategy came up empty; only failing to authenticate is an
    /// error.
    #[instrument(skip(self))]
    pub async fn captions(&self, session_id: &str) -> Result<Option<String>, AuthError> {
        let bearer = self.access_token().await?;

        let session = self.fetch_session(&bearer, session_id).await;
        if let Some(name) = session.as_ref().and_then(|s| s.name.as_deref()) {
            tracing::info!(name, "found session");
        }

        let ctx = RetrievalContext {
            client: self,
            session_id,
            session: session.as_ref(),
            bearer: &bearer,
        };
        for strategy in self.strategies.iter() {
            tracing::debug!(strategy = strategy.name(), "trying caption strategy");
            match strategy.attempt(&ctx).await {
                RetrievalOutcome::Success(text) => {
                    tracing::info!(
                        strategy = strategy.name(),
                        chars = text.len(),
                        "retrieved captions"
                    );
                    return Ok(Some(text));
                }
                outcome => {
                    tracing::info!(strategy = strategy.name(), %outcome, "no captions from strategy");
                }
            }
        }

        tracing::warn!("all caption retrieval strategies failed");
        Ok(None)
    }

    async fn fetch_session(&self, bearer: &AccessToken, session_id: &str) -> Option<Session> {
        let url = format!("{}/sessions/{session_id}", self.config.api_base());
        let request = self
            .authenticated(Method::GET, &url, bearer)
            .header(http::header::ACCEPT, "application/json");
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("failed to fetch session metadata: {e}");
                return None;
            }
        };
        let status = response.status();
        if !status.is_success() {
            tracing::warn!(%status, "session metadata unavailable");
            return None;
        }
        match response.json::<Session>().await {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::warn!("failed to parse session metadata: {e}");
                None
            }
        }
    }

    /// A client that presents the legacy auth cookie to the configured server only.
    pub(crate) fn legacy_http_client(
        &self,
        cookie: &str,
    ) -> Result<reqwest::Client, reqwest::Error> {
        let jar = reqwest::cookie::Jar::default();
        jar.add_cookie_str(
            &format!("{LEGACY_AUTH_COOKIE}={cookie}; Path=/"),
            &self.config.base_url,
        );
        reqwest::ClientBuilder::new()
            .cookie_provider(Arc::new(jar))
            .danger_accept_invalid_certs(!self.config.verify_tls)
            .timeout(REQUEST_TIMEOUT)
            .build()
    }
}
