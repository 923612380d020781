//! Connection settings for a Panopto server and its OAuth2 client.

use eyre::Context;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Default location of the persisted credential record, relative to the working directory.
pub const DEFAULT_TOKEN_FILE: &str = ".panopto_tokens.json";

/// Everything needed to authenticate against and talk to one Panopto deployment.
///
/// Endpoint URLs are derived from [`Self::base_url`]; the remaining fields carry
/// defaults suitable for an interactive command-line user.
#[derive(Debug, Clone)]
pub struct PanoptoConfig {
    /// Root of the deployment, e.g. `https://example.hosted.panopto.com`.
    pub base_url: Url,
    pub client_id: String,
    pub client_secret: String,
    /// Where the credential record is persisted.
    pub token_file: PathBuf,
    /// Local port the authorization redirect is received on. `0` picks a free port.
    pub redirect_port: u16,
    pub redirect_path: String,
    pub scope: String,
    /// How long the interactive flow waits for the browser redirect.
    pub callback_timeout: Duration,
    /// Tokens expiring within this window are treated as already expired.
    pub safety_buffer: Duration,
    /// Pause before the single retry of a rate-limited request.
    pub rate_limit_backoff: Duration,
    pub verify_tls: bool,
    /// Whether the interactive flow should also try to open the user's browser.
    pub open_browser: bool,
}

impl PanoptoConfig {
    pub fn new(base_url: Url, client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            base_url,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token_file: PathBuf::from(DEFAULT_TOKEN_FILE),
            redirect_port: 8081,
            redirect_path: "/callback".to_string(),
            scope: "api".to_string(),
            callback_timeout: Duration::from_secs(300),
            safety_buffer: Duration::from_secs(300),
            rate_limit_backoff: Duration::from_secs(2),
            verify_tls: true,
            open_browser: true,
        }
    }

    /// Reads the configuration from `PANOPTO_*` environment variables.
    ///
    /// `PANOPTO_CLIENT_ID`, `PANOPTO_CLIENT_SECRET`, and `PANOPTO_BASE_URL` are required.
    /// `PANOPTO_TOKEN_FILE` and `PANOPTO_VERIFY_SSL` are optional.
    pub fn from_env() -> eyre::Result<Self> {
        let base_url = required_env("PANOPTO_BASE_URL")?;
        let base_url = Url::parse(&base_url)
            .with_context(|| format!("parse PANOPTO_BASE_URL {base_url:?}"))?;
        let mut config = Self::new(
            base_url,
            required_env("PANOPTO_CLIENT_ID")?,
            required_env("PANOPTO_CLIENT_SECRET")?,
        );
        if let Ok(path) = std::env::var("PANOPTO_TOKEN_FILE") {
            config.token_file = PathBuf::from(path);
        }
        if let Ok(verify) = std::env::var("PANOPTO_VERIFY_SSL") {
            config.verify_tls = !matches!(
                verify.trim().to_ascii_lowercase().as_str(),
                "0" | "false" | "no" | "off"
            );
        }
        Ok(config)
    }

    /// The server identity that a persisted credential record is keyed on.
    ///
    /// This is the host (and port, if non-default) of [`Self::base_url`].
    pub fn server(&self) -> String {
        let host = self.base_url.host_str().unwrap_or_default();
        match self.base_url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }

    pub fn authorize_url(&self) -> String {
        format!("{}/Panopto/oauth2/connect/authorize", self.root())
    }

    pub fn token_url(&self) -> String {
        format!("{}/Panopto/oauth2/connect/token", self.root())
    }

    /// Base of the v1 REST API, e.g. `https://host/Panopto/api/v1`.
    pub fn api_base(&self) -> String {
        self.api_base_for_version(1)
    }

    pub(crate) fn api_base_for_version(&self, version: u8) -> String {
        format!("{}/Panopto/api/v{version}", self.root())
    }

    /// The page a browser would view the session on; used as a `Referer`.
    pub(crate) fn viewer_url(&self, session_id: &str) -> String {
        format!("{}/Panopto/Pages/Viewer.aspx?id={session_id}", self.root())
    }

    fn root(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }
}

fn required_env(key: &str) -> eyre::Result<String> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => eyre::bail!("required environment variable {key} is not set"),
    }
}
