//! Presenting the authorization URL to whoever is operating the program.

use std::fmt;
use url::Url;

/// Shows the operator where to go to approve access.
///
/// Called once per interactive authorization attempt, after the redirect listener is
/// already accepting connections.
pub trait AuthorizationPrompt: Send + Sync + fmt::Debug {
    fn present(&self, authorize_url: &Url, redirect_url: &str);
}

/// Prints instructions to stderr and optionally opens the default browser.
#[derive(Debug, Clone)]
pub struct TerminalPrompt {
    open_browser: bool,
}

impl TerminalPrompt {
    pub fn new(open_browser: bool) -> Self {
        Self { open_browser }
    }
}

impl AuthorizationPrompt for TerminalPrompt {
    fn present(&self, authorize_url: &Url, redirect_url: &str) {
        tracing::info!(url = %authorize_url, "asking user to follow OAuth flow");
        eprintln!();
        eprintln!("Please authorize the application:");
        eprintln!("1. Open this URL in your browser: {authorize_url}");
        eprintln!("2. Log in with your Panopto credentials");
        eprintln!("3. Authorize the application");
        eprintln!("4. You'll be redirected to {redirect_url}");
        eprintln!();

        if self.open_browser {
            if let Err(e) = webbrowser::open(authorize_url.as_str()) {
                tracing::warn!("could not open browser, open the URL manually: {e}");
            }
        }
    }
}
