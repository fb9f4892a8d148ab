use serde::{Deserialize, Serialize};

/// One parsed transcoder progress snapshot.
///
/// Every numeric field is optional because ffmpeg emits partial lines
/// (audio-only streams have no `frame=`, some builds omit `speed=`).
/// Wire form is camelCase to match the control-plane JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamStats {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<f64>,

    /// Muxed output size in KiB.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_kb: Option<u64>,

    /// Stream time converted to seconds (`H*3600 + M*60 + S`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_seconds: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitrate_kbps: Option<f64>,

    /// Realtime factor, `1.0` = keeping up with the wall clock.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,
}

impl StreamStats {
    /// True when no field at all was recognized.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
