//! Fatal authentication errors surfaced by [`crate::oauth::OAuthManager`].

use oauth2::basic::BasicErrorResponse;
use oauth2::{HttpClientError, RequestTokenError};
use std::fmt;

/// The OAuth2 grant that was being exercised when an [`AuthError`] occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grant {
    AuthorizationCode,
    RefreshToken,
    ClientCredentials,
}

impl fmt::Display for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Grant::AuthorizationCode => "authorization_code",
            Grant::RefreshToken => "refresh_token",
            Grant::ClientCredentials => "client_credentials",
        })
    }
}

/// Why token acquisition failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthErrorKind {
    #[error("network error")]
    Network,
    #[error("rejected by server")]
    ServerRejected,
    #[error("timed out waiting for authorization")]
    Timeout,
    #[error("malformed token response")]
    MalformedResponse,
}

impl AuthErrorKind {
    /// Process exit code a command-line caller should use for this kind of failure.
    ///
    /// Code 2 is reserved for "no content".
    pub fn exit_code(self) -> i32 {
        match self {
            AuthErrorKind::Network => 3,
            AuthErrorKind::ServerRejected => 4,
            AuthErrorKind::Timeout => 5,
            AuthErrorKind::MalformedResponse => 6,
        }
    }
}

/// A failure to obtain an access token. Fatal to the current operation.
#[derive(Debug, thiserror::Error)]
#[error("{kind} during {grant} grant: {detail}")]
pub struct AuthError {
    kind: AuthErrorKind,
    grant: Grant,
    detail: String,
}

impl AuthError {
    pub(crate) fn new(kind: AuthErrorKind, grant: Grant, detail: impl Into<String>) -> Self {
        Self {
            kind,
            grant,
            detail: detail.into(),
        }
    }

    pub fn kind(&self) -> AuthErrorKind {
        self.kind
    }

    pub fn grant(&self) -> Grant {
        self.grant
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }

    /// Classifies an error from the token endpoint.
    pub(crate) fn from_token_request(
        grant: Grant,
        e: RequestTokenError<HttpClientError<reqwest::Error>, BasicErrorResponse>,
    ) -> Self {
        match e {
            RequestTokenError::ServerResponse(resp) => {
                let mut detail = resp.error().to_string();
                if let Some(description) = resp.error_description() {
                    detail.push_str(": ");
                    detail.push_str(description);
                }
                Self::new(AuthErrorKind::ServerRejected, grant, detail)
            }
            RequestTokenError::Request(e) => Self::new(AuthErrorKind::Network, grant, e.to_string()),
            RequestTokenError::Parse(e, _body) => {
                Self::new(AuthErrorKind::MalformedResponse, grant, e.to_string())
            }
            // wrong content type or an empty body
            RequestTokenError::Other(reason) => {
                Self::new(AuthErrorKind::MalformedResponse, grant, reason)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct_and_avoid_no_content() {
        let kinds = [
            AuthErrorKind::Network,
            AuthErrorKind::ServerRejected,
            AuthErrorKind::Timeout,
            AuthErrorKind::MalformedResponse,
        ];
        let mut codes: Vec<_> = kinds.iter().map(|k| k.exit_code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), kinds.len());
        assert!(!codes.contains(&0));
        assert!(!codes.contains(&2));
    }

    #[test]
    fn uninterpretable_token_responses_are_malformed() {
        let e = AuthError::from_token_request(
            Grant::ClientCredentials,
            RequestTokenError::Other("server returned empty response body".to_string()),
        );
        assert_eq!(e.kind(), AuthErrorKind::MalformedResponse);
        assert_eq!(e.grant(), Grant::ClientCredentials);
        assert_eq!(e.detail(), "server returned empty response body");
    }

    #[test]
    fn display_names_kind_and_grant() {
        let e = AuthError::new(AuthErrorKind::Timeout, Grant::AuthorizationCode, "no callback");
        assert_eq!(
            e.to_string(),
            "timed out waiting for authorization during authorization_code grant: no callback"
        );
    }
}
