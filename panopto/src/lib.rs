pub mod captions;
pub mod config;
pub mod error;
pub mod oauth;
pub mod panopto_api;

pub use config::PanoptoConfig;
pub use error::{AuthError, AuthErrorKind, Grant};
pub use oauth::OAuthManager;
pub use panopto_api::PanoptoClient;
