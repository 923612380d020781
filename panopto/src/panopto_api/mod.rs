//! Panopto REST API client.
//!
//! [`PanoptoClient`] wraps an [`OAuthManager`](crate::oauth::OAuthManager) and issues
//! authenticated requests against a deployment's `/Panopto/api/v1` surface.
//!
//! # Retrieving captions
//!
//! Caption availability differs between deployments and API versions, so
//! [`PanoptoClient::captions`] tries several approaches in order (see [`strategies`]).
//! Whatever the source, returned text has been normalized to plain prose by
//! [`crate::captions::normalize`], except text taken verbatim from session metadata.

pub mod client;
pub mod legacy;
pub mod sessions;
pub mod strategies;

pub use client::PanoptoClient;
pub use sessions::{Session, SessionUrls};
pub use strategies::{
    ApiEndpoints, CaptionStrategy, EmbeddedTranscript, LegacyDownload, RetrievalContext,
    RetrievalOutcome, default_strategies,
};
