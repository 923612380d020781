//! Panopto session metadata types.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A recorded Panopto session, as returned by `GET /sessions/{id}`.
///
/// Only the fields this crate reads are typed; everything else the server sends is
/// kept in [`Self::extra`] so embedded transcript fields can still be inspected.
///
/// See: <https://support.panopto.com/resource/APIDocumentation/Help/html/>
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Session {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Length of the recording, in seconds.
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub description: Option<String>,
    /// When recording started, in ISO 8601 format.
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub urls: SessionUrls,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Links associated with a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SessionUrls {
    #[serde(default)]
    pub viewer_url: Option<String>,
    /// Legacy endpoint serving the caption file; requires the legacy auth cookie.
    #[serde(default)]
    pub caption_download_url: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Session {
    /// Whether recording started less than `window` ago.
    ///
    /// Captions for very recent sessions are often still being processed. Returns
    /// `false` if the start time is missing or unparseable.
    pub fn recorded_within(&self, window: Duration) -> bool {
        let Some(start) = self
            .start_time
            .as_deref()
            .and_then(|s| s.parse::<jiff::Timestamp>().ok())
        else {
            return false;
        };
        let Ok(window) = jiff::SignedDuration::try_from(window) else {
            return false;
        };
        let age = jiff::Timestamp::now().duration_since(start);
        age < window
    }

    /// A top-level string field by its wire name.
    pub(crate) fn text_field(&self, name: &str) -> Option<&str> {
        match name {
            "Name" => self.name.as_deref(),
            "Description" => self.description.as_deref(),
            _ => self.extra.get(name).and_then(serde_json::Value::as_str),
        }
    }
}
