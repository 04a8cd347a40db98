//! URL mirror preview
//!
//! Renders the URL a backend would see for a tap, from the mirror settings
//! the front end edits. Nothing here talks to the tag.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::types::Uid;

/// URL mirror settings, field names as in the front end payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MirrorSettings {
    /// Whether mirroring is switched on
    pub enabled: bool,
    /// URL the query parameters are appended to
    pub base_url: String,
    /// Path template with `{uid}` and `{counter}` placeholders
    pub dynamic_url: String,
    /// Append `uid=`
    #[serde(rename = "includeUID")]
    pub include_uid: bool,
    /// Append `counter=`
    pub include_counter: bool,
    /// Append `timestamp=`
    pub include_timestamp: bool,
    /// Raw `k=v&k=v` string appended last
    pub custom_parameters: String,
    /// Backend cache lifetime in seconds
    #[serde(rename = "cacheTTL")]
    pub cache_ttl: u32,
    /// Backend served over TLS
    #[serde(rename = "enableSSL")]
    pub enable_ssl: bool,
}

impl Default for MirrorSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "https://api.example.com/tag".into(),
            dynamic_url: "https://api.example.com/tag/{uid}/{counter}".into(),
            include_uid: true,
            include_counter: true,
            include_timestamp: false,
            custom_parameters: String::new(),
            cache_ttl: 3600,
            enable_ssl: true,
        }
    }
}

fn append(url: &mut String, parameter: impl std::fmt::Display) {
    let separator = if url.contains('?') { '&' } else { '?' };
    let _ = write!(url, "{separator}{parameter}");
}

impl MirrorSettings {
    /// Query-string preview for a tap of `uid` at `counter`
    ///
    /// `timestamp` is milliseconds since the epoch and only used when
    /// [`Self::include_timestamp`] is set.
    pub fn preview(&self, uid: &Uid, counter: u32, timestamp: u64) -> String {
        let mut url = self.base_url.clone();
        if self.include_uid {
            append(&mut url, format_args!("uid={}", uid.to_hex()));
        }
        if self.include_counter {
            append(&mut url, format_args!("counter={counter}"));
        }
        if self.include_timestamp {
            append(&mut url, format_args!("timestamp={timestamp}"));
        }
        if !self.custom_parameters.is_empty() {
            append(&mut url, &self.custom_parameters);
        }
        url
    }

    /// Dynamic URL with its placeholders filled in
    pub fn render_dynamic(&self, uid: &Uid, counter: u32) -> String {
        self.dynamic_url
            .replace("{uid}", &uid.to_hex())
            .replace("{counter}", &counter.to_string())
    }
}
