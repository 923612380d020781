//! The persisted credential record and its validity rules.

use oauth2::basic::BasicTokenType;
use oauth2::{AccessToken, RefreshToken, Scope, TokenResponse, helpers};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lifetime assumed for an access token whose response carries no `expires_in`.
pub(crate) const DEFAULT_EXPIRES_IN: Duration = Duration::from_secs(3600);

/// Seconds since the Unix epoch, now.
pub(crate) fn now_epoch_seconds() -> i64 {
    jiff::Timestamp::now().as_second()
}

/// A token endpoint response as Panopto sends it.
///
/// Like the standard RFC 6749 response, except that `token_type` may be omitted, in
/// which case the token is a bearer token.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PanoptoTokenResponse {
    access_token: AccessToken,
    #[serde(
        default = "bearer",
        deserialize_with = "helpers::deserialize_untagged_enum_case_insensitive"
    )]
    token_type: BasicTokenType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<RefreshToken>,
    #[serde(
        rename = "scope",
        default,
        deserialize_with = "helpers::deserialize_space_delimited_vec",
        serialize_with = "helpers::serialize_space_delimited_vec",
        skip_serializing_if = "Option::is_none"
    )]
    scopes: Option<Vec<Scope>>,
}

fn bearer() -> BasicTokenType {
    BasicTokenType::Bearer
}

impl TokenResponse for PanoptoTokenResponse {
    type TokenType = BasicTokenType;

    fn access_token(&self) -> &AccessToken {
        &self.access_token
    }

    fn token_type(&self) -> &BasicTokenType {
        &self.token_type
    }

    fn expires_in(&self) -> Option<Duration> {
        self.expires_in.map(Duration::from_secs)
    }

    fn refresh_token(&self) -> Option<&RefreshToken> {
        self.refresh_token.as_ref()
    }

    fn scopes(&self) -> Option<&Vec<Scope>> {
        self.scopes.as_ref()
    }
}

/// OAuth2 credentials for one client against one server.
///
/// `client_id` and `server` identify who the tokens belong to; a record loaded from
/// storage is only trusted when both match the current configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub client_id: String,
    pub server: String,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// When the access token expires, in seconds since the Unix epoch.
    #[serde(default)]
    pub expires_at: Option<i64>,
    /// When this record was last written, in seconds since the Unix epoch.
    #[serde(default)]
    pub saved_at: Option<i64>,
}

impl CredentialRecord {
    pub fn new(client_id: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            server: server.into(),
            access_token: None,
            refresh_token: None,
            expires_at: None,
            saved_at: None,
        }
    }

    pub fn belongs_to(&self, client_id: &str, server: &str) -> bool {
        self.client_id == client_id && self.server == server
    }

    /// Whether the access token can be handed out at `now` without risking expiry mid-request.
    ///
    /// Requires an access token and an expiry, and `now` must be strictly earlier than
    /// the expiry minus `buffer`.
    pub fn is_valid_at(&self, now: i64, buffer: Duration) -> bool {
        let (Some(_), Some(expires_at)) = (&self.access_token, self.expires_at) else {
            return false;
        };
        let buffer = i64::try_from(buffer.as_secs()).unwrap_or(i64::MAX);
        now < expires_at.saturating_sub(buffer)
    }

    /// Seconds until the access token expires, clamped at zero.
    pub fn seconds_until_expiry(&self, now: i64) -> Option<u64> {
        self.expires_at
            .map(|expires_at| u64::try_from(expires_at.saturating_sub(now)).unwrap_or(0))
    }

    /// Applies a token endpoint response to this record in place.
    ///
    /// When `keep_refresh_token` is set and the response carries no refresh token, the
    /// existing one is kept. Refresh responses commonly omit it.
    pub(crate) fn absorb(
        &mut self,
        token: &PanoptoTokenResponse,
        now: i64,
        keep_refresh_token: bool,
    ) {
        self.access_token = Some(token.access_token().secret().clone());
        match token.refresh_token() {
            Some(refresh) => self.refresh_token = Some(refresh.secret().clone()),
            None if keep_refresh_token => {
                tracing::trace!("token response lacks refresh token, preserving previous one");
            }
            None => self.refresh_token = None,
        }
        let expires_in = token.expires_in().unwrap_or(DEFAULT_EXPIRES_IN);
        let expires_in = i64::try_from(expires_in.as_secs()).unwrap_or(i64::MAX);
        self.expires_at = Some(now.saturating_add(expires_in));
    }
}
