// Persisted configuration: schema in this file, disk store in `store`.

mod store;

pub use store::{ConfigStore, WatchHandle, CACHE_TTL, WATCH_INTERVAL};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::FieldError;
use crate::models::Destination;

/// Root of the persisted YAML document.
///
/// Every section carries `#[serde(default)]` so an absent file, or a file
/// with missing keys, merges against the built-in defaults. Canonical keys
/// are snake_case; camelCase spellings are accepted on input.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub version: String,

    #[serde(rename = "stream_manager", alias = "streamManager")]
    pub stream_manager: StreamManagerConfig,

    pub ui: UiConfig,

    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1".to_string(),
            stream_manager: StreamManagerConfig::default(),
            ui: UiConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamManagerConfig {
    /// Reserved broadcaster-side remote control endpoint. Parsed and
    /// round-tripped, unused by the relay core.
    pub obs: ObsConfig,

    #[serde(rename = "rtmp_server", alias = "rtmpServer")]
    pub rtmp_server: RtmpServerConfig,

    #[serde(rename = "auto_reconnect", alias = "autoReconnect")]
    pub auto_reconnect: bool,

    /// Seconds. Reserved for a higher-level reconnection policy.
    #[serde(rename = "reconnect_delay", alias = "reconnectDelay")]
    pub reconnect_delay: u64,

    #[serde(rename = "max_reconnect_attempts", alias = "maxReconnectAttempts")]
    pub max_reconnect_attempts: u32,

    pub platforms: Vec<Destination>,
}

impl Default for StreamManagerConfig {
    fn default() -> Self {
        Self {
            obs: ObsConfig::default(),
            rtmp_server: RtmpServerConfig::default(),
            auto_reconnect: true,
            reconnect_delay: 5,
            max_reconnect_attempts: 10,
            platforms: Vec::new(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ObsConfig {
    pub host: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl Default for ObsConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4455,
            password: None,
        }
    }
}

impl std::fmt::Debug for ObsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObsConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RtmpServerConfig {
    pub host: String,
    pub port: u16,

    #[serde(rename = "app_name", alias = "appName", alias = "app")]
    pub app_name: String,

    /// Shared ingest key. Empty disables the pre-publish check.
    #[serde(rename = "stream_key", alias = "streamKey")]
    pub stream_key: String,

    pub enabled: bool,
}

impl Default for RtmpServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 1935,
            app_name: "live".to_string(),
            stream_key: "stream".to_string(),
            enabled: true,
        }
    }
}

impl std::fmt::Debug for RtmpServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtmpServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("app_name", &self.app_name)
            .field("stream_key", &"<redacted>")
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl RtmpServerConfig {
    /// The `(host, port, app, key)` tuple. The ingest listener is restarted
    /// only when this tuple changes.
    #[must_use]
    pub fn endpoint_tuple(&self) -> (&str, u16, &str, &str) {
        (&self.host, self.port, &self.app_name, &self.stream_key)
    }

    /// Configured publish path, `/app/stream_key`.
    #[must_use]
    pub fn stream_path(&self) -> String {
        format!("/{}/{}", self.app_name, self.stream_key)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UiConfig {
    pub host: String,
    pub port: u16,
    pub debug: bool,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            debug: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `pretty` or `json`.
    pub format: String,
    #[serde(
        rename = "file_path",
        alias = "filePath",
        skip_serializing_if = "Option::is_none"
    )]
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("version", &self.version)
            .field("stream_manager", &"<see sections>")
            .field("rtmp_server", &self.stream_manager.rtmp_server)
            .field("obs", &self.stream_manager.obs)
            .field("platforms", &self.stream_manager.platforms.len())
            .field("ui", &self.ui)
            .field("logging", &self.logging)
            .finish()
    }
}

impl Config {
    /// Schema validation. Collects every violation instead of failing fast.
    pub fn validate(&self) -> std::result::Result<(), Vec<FieldError>> {
        let mut fields = Vec::new();

        if self.ui.port == 0 {
            fields.push(FieldError::new("ui.port", "must be non-zero"));
        }
        if self.stream_manager.rtmp_server.port == 0 {
            fields.push(FieldError::new(
                "stream_manager.rtmp_server.port",
                "must be non-zero",
            ));
        }
        if self.stream_manager.rtmp_server.app_name.trim().is_empty() {
            fields.push(FieldError::new(
                "stream_manager.rtmp_server.app_name",
                "must not be empty",
            ));
        }

        let mut seen_ids = std::collections::HashSet::new();
        for (i, platform) in self.stream_manager.platforms.iter().enumerate() {
            if platform.is_usable() && !platform.has_supported_scheme() {
                fields.push(FieldError::new(
                    format!("stream_manager.platforms[{i}].rtmp_url"),
                    "scheme must be rtmp:// or rtmps://",
                ));
            }
            if !platform.id.is_empty() && !seen_ids.insert(platform.id.as_str()) {
                fields.push(FieldError::new(
                    format!("stream_manager.platforms[{i}].id"),
                    format!("duplicate id '{}'", platform.id),
                ));
            }
        }

        if fields.is_empty() {
            Ok(())
        } else {
            Err(fields)
        }
    }

    /// Post-load normalization: drop unusable destinations, fill ids.
    /// Returns the number of filtered entries.
    pub fn normalize(&mut self) -> usize {
        let before = self.stream_manager.platforms.len();
        self.stream_manager.platforms.retain(|p| {
            if p.is_usable() {
                true
            } else {
                warn!(name = %p.name, "dropping destination without url or stream key");
                false
            }
        });
        for platform in &mut self.stream_manager.platforms {
            platform.ensure_id();
        }
        before - self.stream_manager.platforms.len()
    }

    /// Environment overrides applied after parsing, before caching.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("OBS_HOST") {
            self.stream_manager.obs.host = v;
        }
        if let Ok(v) = std::env::var("OBS_PORT") {
            match v.parse() {
                Ok(port) => self.stream_manager.obs.port = port,
                Err(_) => warn!(value = %v, "ignoring unparsable OBS_PORT"),
            }
        }
        if let Ok(v) = std::env::var("OBS_PASSWORD") {
            self.stream_manager.obs.password = Some(v);
        }
        if let Ok(v) = std::env::var("UI_HOST") {
            self.ui.host = v;
        }
        if let Ok(v) = std::env::var("UI_PORT") {
            match v.parse() {
                Ok(port) => self.ui.port = port,
                Err(_) => warn!(value = %v, "ignoring unparsable UI_PORT"),
            }
        }
        if let Ok(v) = std::env::var("UI_DEBUG") {
            self.ui.debug = matches!(v.as_str(), "1" | "true" | "yes");
        }
    }

    /// Look up a destination by id.
    #[must_use]
    pub fn destination(&self, id: &str) -> Option<&Destination> {
        self.stream_manager.platforms.iter().find(|p| p.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn camel_case_document_parses() {
        let yaml = r"
version: '1'
streamManager:
  rtmpServer:
    host: 0.0.0.0
    port: 1935
    appName: live
    streamKey: obs
  autoReconnect: false
  platforms: []
ui:
  host: 127.0.0.1
  port: 9000
";
        let cfg: Config = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(cfg.stream_manager.rtmp_server.stream_key, "obs");
        assert!(!cfg.stream_manager.auto_reconnect);
        assert_eq!(cfg.ui.port, 9000);
    }

    #[test]
    fn normalize_filters_unusable_and_fills_ids() {
        let mut cfg = Config::default();
        cfg.stream_manager.platforms = vec![
            Destination {
                name: "ok".into(),
                url: "rtmp://a".into(),
                stream_key: "k".into(),
                ..Destination::default()
            },
            Destination {
                name: "missing-key".into(),
                url: "rtmp://b".into(),
                ..Destination::default()
            },
        ];
        let dropped = cfg.normalize();
        assert_eq!(dropped, 1);
        assert_eq!(cfg.stream_manager.platforms.len(), 1);
        assert!(!cfg.stream_manager.platforms[0].id.is_empty());
    }

    #[test]
    fn duplicate_ids_fail_validation() {
        let mut cfg = Config::default();
        let dest = Destination {
            id: "same".into(),
            name: "a".into(),
            url: "rtmp://a".into(),
            stream_key: "k".into(),
            ..Destination::default()
        };
        cfg.stream_manager.platforms = vec![dest.clone(), dest];
        let errors = cfg.validate().expect_err("should fail");
        assert!(errors.iter().any(|f| f.message.contains("duplicate")));
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let mut cfg = Config::default();
        cfg.stream_manager.rtmp_server.stream_key = "supersecret".into();
        cfg.stream_manager.obs.password = Some("hunter2".into());
        let debug = format!("{cfg:?}");
        assert!(!debug.contains("supersecret"));
        assert!(!debug.contains("hunter2"));
    }
}
