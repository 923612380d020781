//! OAuth 2.0 token management for the Panopto REST API.
//!
//! [`OAuthManager`] owns the one mutable piece of state in this crate: the
//! [`CredentialRecord`]. It hands out access tokens, renewing or re-acquiring them as
//! needed, and writes every change through to a [`TokenStore`] before returning.
//!
//! Acquisition tries, in order:
//!
//! 1. the cached access token, if it is valid for longer than the safety buffer;
//! 2. the refresh grant, if a refresh token is cached;
//! 3. the client-credentials grant, if the caller prefers unattended operation;
//! 4. the interactive authorization-code flow, which waits for a browser redirect
//!    on a local [`CallbackListener`].

use crate::config::PanoptoConfig;
use crate::error::{AuthError, AuthErrorKind, Grant};
use eyre::Context;
use oauth2::basic::{
    BasicErrorResponse, BasicRevocationErrorResponse, BasicTokenIntrospectionResponse,
};
use oauth2::{
    AccessToken, AuthType, AuthUrl, Client, ClientId, ClientSecret, CsrfToken, EndpointNotSet,
    EndpointSet, RefreshToken, Scope, StandardRevocableToken, TokenResponse, TokenUrl,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

pub mod callback;
pub mod prompt;
pub mod store;
pub mod token;

pub use callback::CallbackListener;
pub use prompt::{AuthorizationPrompt, TerminalPrompt};
pub use store::{FileTokenStore, MemoryTokenStore, TokenStore};
pub use token::{CredentialRecord, PanoptoTokenResponse};

use token::now_epoch_seconds;

const OAUTH_DONE: &str = include_str!("../../oauth_success.html");

type PanoptoOAuthClient<HasAuthUrl = EndpointSet, HasTokenUrl = EndpointSet> = Client<
    BasicErrorResponse,
    PanoptoTokenResponse,
    BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    BasicRevocationErrorResponse,
    HasAuthUrl,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    HasTokenUrl,
>;

/// A point-in-time view of the cached credentials, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenStatus {
    pub has_access_token: bool,
    pub has_refresh_token: bool,
    pub expires_at: Option<i64>,
    pub is_valid: bool,
    pub store_exists: bool,
    pub seconds_until_expiry: Option<i64>,
}

/// Obtains and maintains OAuth2 credentials for one client against one Panopto server.
///
/// Not internally synchronized: callers sharing a manager must serialize calls to
/// [`Self::acquire_token`], for example behind a mutex.
#[derive(Debug)]
pub struct OAuthManager {
    config: PanoptoConfig,
    auth_url: AuthUrl,
    token_url: TokenUrl,
    store: Arc<dyn TokenStore>,
    prompt: Arc<dyn AuthorizationPrompt>,
    record: Option<CredentialRecord>,
    http: reqwest::Client,
}

impl OAuthManager {
    /// Creates a manager, loading any previously persisted credentials.
    ///
    /// A stored record that is malformed, or that belongs to a different client or
    /// server, is deleted from `store` rather than ignored.
    pub fn new(config: &PanoptoConfig, store: Arc<dyn TokenStore>) -> eyre::Result<Self> {
        let auth_url = AuthUrl::new(config.authorize_url()).context("construct authorize url")?;
        let token_url = TokenUrl::new(config.token_url()).context("construct token url")?;
        let http = reqwest::ClientBuilder::new()
            // SSRF no thank you.
            .redirect(reqwest::redirect::Policy::none())
            .danger_accept_invalid_certs(!config.verify_tls)
            .timeout(Duration::from_secs(30))
            .build()
            .context("build HTTP client for token requests")?;

        let record = load_record(store.as_ref(), &config.client_id, &config.server());
        Ok(Self {
            config: config.clone(),
            auth_url,
            token_url,
            prompt: Arc::new(TerminalPrompt::new(config.open_browser)),
            store,
            record,
            http,
        })
    }

    /// Replaces how the authorization URL is shown during the interactive flow.
    pub fn with_prompt(mut self, prompt: Arc<dyn AuthorizationPrompt>) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn record(&self) -> Option<&CredentialRecord> {
        self.record.as_ref()
    }

    /// Returns an access token that stays valid for at least the configured safety buffer.
    ///
    /// Each step below only runs if the ones before it did not produce a token:
    ///
    /// 1. A still-valid cached token is returned without any network traffic.
    /// 2. A cached refresh token is exchanged. If that fails, all cached credentials are
    ///    discarded.
    /// 3. With `prefer_unattended`, the client-credentials grant is tried. Failure falls
    ///    through to step 4.
    /// 4. The interactive authorization-code flow runs. This needs an operator and may
    ///    wait up to the configured callback timeout.
    ///
    /// Every successful acquisition is persisted before returning. An error from step 4
    /// is returned to the caller; nothing is retried beyond this ladder.
    #[instrument(skip(self))]
    pub async fn acquire_token(&mut self, prefer_unattended: bool) -> Result<AccessToken, AuthError> {
        if let Some(token) = self.valid_access_token() {
            tracing::debug!("using existing valid access token");
            return Ok(token);
        }

        if self.refresh_token().is_some() {
            tracing::info!("attempting to refresh access token");
            match self.refresh().await {
                Ok(token) => return Ok(token),
                Err(e) => {
                    tracing::warn!("token refresh failed, will need to re-authorize: {e}");
                    self.clear();
                }
            }
        } else if self.record.as_ref().is_some_and(|r| r.access_token.is_some()) {
            tracing::warn!(
                "access token expired and no refresh token is available; \
                re-authorization is required"
            );
        }

        if prefer_unattended {
            tracing::info!("attempting unattended authentication via client credentials");
            match self.client_credentials().await {
                Ok(token) => return Ok(token),
                Err(e) => {
                    tracing::warn!(
                        "client credentials failed, falling back to interactive authorization: {e}"
                    );
                }
            }
        }

        tracing::info!("starting interactive authorization flow");
        self.authorize_interactively().await
    }

    /// Discards all cached credentials, in memory and in storage.
    pub fn clear_stored_tokens(&mut self) {
        tracing::info!("clearing stored tokens");
        self.clear();
    }

    pub fn status(&self) -> TokenStatus {
        let now = now_epoch_seconds();
        let record = self.record.as_ref();
        let expires_at = record.and_then(|r| r.expires_at);
        TokenStatus {
            has_access_token: record.is_some_and(|r| r.access_token.is_some()),
            has_refresh_token: record.is_some_and(|r| r.refresh_token.is_some()),
            expires_at,
            is_valid: record.is_some_and(|r| r.is_valid_at(now, self.config.safety_buffer)),
            store_exists: self.store.exists(),
            seconds_until_expiry: expires_at.map(|e| e - now),
        }
    }

    /// How long until the cached access token expires, zero if it already has.
    pub fn time_remaining(&self) -> Option<Duration> {
        self.record
            .as_ref()?
            .seconds_until_expiry(now_epoch_seconds())
            .map(Duration::from_secs)
    }

    /// Whether the cached credentials can keep working without an operator, and why.
    pub fn unattended_readiness(&self) -> (bool, String) {
        if !self.store.exists() {
            return (false, "no saved tokens found".to_string());
        }
        let Some(record) = self.record.as_ref().filter(|r| r.access_token.is_some()) else {
            return (false, "no access token available".to_string());
        };
        if record.refresh_token.is_some() {
            return (
                true,
                "has refresh token, suitable for long-term unattended use".to_string(),
            );
        }
        let Some(remaining) = self.time_remaining() else {
            return (false, "token expiry unknown".to_string());
        };
        let hours = remaining.as_secs_f64() / 3600.0;
        if hours < 1.0 {
            (
                false,
                format!("token expires in {hours:.1} hours and no refresh token is available"),
            )
        } else if hours < 24.0 {
            (
                false,
                format!(
                    "token expires in {hours:.1} hours; without a refresh token, \
                    run more frequently than that"
                ),
            )
        } else {
            (true, format!("token valid for {hours:.1} hours (no refresh token)"))
        }
    }

    fn valid_access_token(&self) -> Option<AccessToken> {
        let record = self.record.as_ref()?;
        if !record.is_valid_at(now_epoch_seconds(), self.config.safety_buffer) {
            return None;
        }
        record.access_token.clone().map(AccessToken::new)
    }

    fn refresh_token(&self) -> Option<RefreshToken> {
        self.record
            .as_ref()?
            .refresh_token
            .clone()
            .map(RefreshToken::new)
    }

    fn oauth_client(&self) -> PanoptoOAuthClient {
        PanoptoOAuthClient::<EndpointNotSet, EndpointNotSet>::new(ClientId::new(
            self.config.client_id.clone(),
        ))
            .set_client_secret(ClientSecret::new(self.config.client_secret.clone()))
            .set_auth_uri(self.auth_url.clone())
            .set_token_uri(self.token_url.clone())
            .set_auth_type(AuthType::RequestBody)
    }

    async fn refresh(&mut self) -> Result<AccessToken, AuthError> {
        let Some(refresh_token) = self.refresh_token() else {
            return Err(AuthError::new(
                AuthErrorKind::ServerRejected,
                Grant::RefreshToken,
                "no refresh token available",
            ));
        };
        let token = self
            .oauth_client()
            .exchange_refresh_token(&refresh_token)
            .request_async(&self.http)
            .await
            .map_err(|e| AuthError::from_token_request(Grant::RefreshToken, e))?;
        tracing::info!("successfully refreshed access token");
        Ok(self.absorb(&token, true))
    }

    async fn client_credentials(&mut self) -> Result<AccessToken, AuthError> {
        let token = self
            .oauth_client()
            .exchange_client_credentials()
            .add_scope(Scope::new(self.config.scope.clone()))
            .request_async(&self.http)
            .await
            .map_err(|e| AuthError::from_token_request(Grant::ClientCredentials, e))?;
        tracing::info!(
            expires_in = ?token.expires_in(),
            has_refresh_token = token.refresh_token().is_some(),
            "obtained access token via client credentials"
        );
        Ok(self.absorb(&token, false))
    }

    async fn authorize_interactively(&mut self) -> Result<AccessToken, AuthError> {
        let csrf = CsrfToken::new_random();
        let mut listener = CallbackListener::bind(
            self.config.redirect_port,
            &self.config.redirect_path,
            csrf.clone(),
            OAUTH_DONE,
        )
        .await
        .map_err(|e| {
            AuthError::new(AuthErrorKind::Network, Grant::AuthorizationCode, format!("{e:#}"))
        })?;

        let redirect_url = listener.redirect_url().clone();
        let client = self.oauth_client().set_redirect_uri(redirect_url.clone());
        let (authorize_url, _csrf) = client
            // the state is only ever used for this one attempt
            .authorize_url(move || csrf)
            .add_scope(Scope::new(self.config.scope.clone()))
            .url();

        self.prompt.present(&authorize_url, redirect_url.as_str());
        let code = listener.wait(self.config.callback_timeout).await?;

        let token = client
            .exchange_code(code)
            .request_async(&self.http)
            .await
            .map_err(|e| AuthError::from_token_request(Grant::AuthorizationCode, e))?;
        tracing::info!("successfully obtained access token");
        Ok(self.absorb(&token, false))
    }

    /// Folds a token response into the cached record and persists it.
    fn absorb(&mut self, token: &PanoptoTokenResponse, keep_refresh_token: bool) -> AccessToken {
        let now = now_epoch_seconds();
        let record = self.record.get_or_insert_with(|| {
            CredentialRecord::new(self.config.client_id.clone(), self.config.server())
        });
        record.absorb(token, now, keep_refresh_token);
        record.saved_at = Some(now);
        match self.store.save(record) {
            Ok(()) => tracing::debug!("saved tokens"),
            Err(e) => tracing::error!("failed to save tokens: {e:#}"),
        }
        token.access_token().clone()
    }

    fn clear(&mut self) {
        self.record = None;
        if let Err(e) = self.store.clear() {
            tracing::warn!("failed to clear saved tokens: {e:#}");
        }
    }
}

/// Loads the stored record, deleting it if it is unusable for this client and server.
fn load_record(store: &dyn TokenStore, client_id: &str, server: &str) -> Option<CredentialRecord> {
    match store.load() {
        Ok(None) => {
            tracing::info!("no saved tokens found");
            None
        }
        Ok(Some(record)) if record.belongs_to(client_id, server) => {
            tracing::info!("loaded saved tokens");
            Some(record)
        }
        Ok(Some(_)) => {
            tracing::info!("saved tokens are for a different client or server, discarding");
            discard(store);
            None
        }
        Err(e) => {
            tracing::warn!("failed to load saved tokens, discarding: {e:#}");
            discard(store);
            None
        }
    }
}

fn discard(store: &dyn TokenStore) {
    if let Err(e) = store.clear() {
        tracing::warn!("failed to remove unusable saved tokens: {e:#}");
    }
}
