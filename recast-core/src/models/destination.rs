use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Number of characters in a generated destination id.
const GENERATED_ID_LEN: usize = 12;

/// Placeholder returned wherever a stream key must not leave the process.
pub const MASKED_KEY: &str = "********";

/// One outbound relay target (a streaming platform).
///
/// `id` is the only stable handle: two destinations may share a `name`
/// (e.g. two `twitch` accounts) and even the same `(url, stream_key)` pair.
/// The canonical on-disk keys are snake_case; camelCase spellings are
/// accepted on input.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Destination {
    /// Stable opaque id, unique per process. Generated when absent.
    pub id: String,

    /// Short logical platform name (e.g. `twitch`). Not unique.
    pub name: String,

    #[serde(
        rename = "display_name",
        alias = "displayName",
        skip_serializing_if = "Option::is_none"
    )]
    pub display_name: Option<String>,

    /// Base publish URL. Scheme must be `rtmp://` or `rtmps://`.
    #[serde(rename = "rtmp_url", alias = "rtmpUrl", alias = "url")]
    pub url: String,

    #[serde(rename = "stream_key", alias = "streamKey")]
    pub stream_key: String,

    pub enabled: bool,

    /// Opaque platform hints. Ignored by the relay core, round-tripped
    /// through config load/save and the API.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Default for Destination {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            display_name: None,
            url: String::new(),
            stream_key: String::new(),
            enabled: true,
            metadata: BTreeMap::new(),
        }
    }
}

impl Destination {
    /// Fill in a generated id when the configured one is empty.
    pub fn ensure_id(&mut self) {
        if self.id.is_empty() {
            self.id = nanoid::nanoid!(GENERATED_ID_LEN);
        }
    }

    /// A destination is usable when both the URL and the key are present.
    /// Entries failing this are silently filtered at config load.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        !self.url.trim().is_empty() && !self.stream_key.trim().is_empty()
    }

    #[must_use]
    pub fn has_supported_scheme(&self) -> bool {
        self.url.starts_with("rtmp://") || self.url.starts_with("rtmps://")
    }

    /// Copy with the stream key replaced by [`MASKED_KEY`], for API output.
    #[must_use]
    pub fn masked(&self) -> Self {
        let mut copy = self.clone();
        if !copy.stream_key.is_empty() {
            copy.stream_key = MASKED_KEY.to_string();
        }
        copy
    }

    /// Human label: the display name when set, the logical name otherwise.
    #[must_use]
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }
}

impl std::fmt::Debug for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Destination")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("display_name", &self.display_name)
            .field("url", &self.url)
            .field("stream_key", &"<redacted>")
            .field("enabled", &self.enabled)
            .finish()
    }
}
