//! Logging setup and log-hygiene helpers.
//!
//! The global subscriber is built once at startup from the `logging`
//! config section. Anything that puts a publish URL into a log field
//! goes through [`redact_stream_key`] first: stream keys are
//! credentials, and a journal that leaks them defeats the masking the
//! API does everywhere else.

use std::sync::Arc;

use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

use crate::config::LoggingConfig;

/// Install the global subscriber.
///
/// `RUST_LOG` overrides the configured level when set. `format: json`
/// selects machine-readable output; anything else is human-readable.
/// With `file_path` set, output appends to that file with ANSI disabled.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let directive = level_directive(&config.level)?;
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    let file = match &config.file_path {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            Some(Arc::new(file))
        }
        None => None,
    };

    let json = config.format.eq_ignore_ascii_case("json");
    let layer = match (json, file) {
        (true, Some(file)) => fmt::layer()
            .json()
            .with_target(true)
            .with_writer(file)
            .boxed(),
        (true, None) => fmt::layer().json().with_target(true).boxed(),
        (false, Some(file)) => fmt::layer()
            .with_target(true)
            .with_ansi(false)
            .with_writer(file)
            .boxed(),
        (false, None) => fmt::layer().with_target(true).boxed(),
    };

    tracing_subscriber::registry().with(filter).with(layer).init();
    Ok(())
}

/// Map a configured level name onto a filter directive.
fn level_directive(level: &str) -> anyhow::Result<&'static str> {
    Ok(match level.trim().to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "info" => "info",
        "warn" | "warning" => "warn",
        "error" => "error",
        other => anyhow::bail!(
            "unknown log level '{other}' (expected trace, debug, info, warn, or error)"
        ),
    })
}

/// Mask the stream key in a publish URL before it reaches a log field.
///
/// The key is the final path segment of an `rtmp://` / `rtmps://`
/// target; everything after the last slash is replaced. A URL with no
/// path (bare host) is returned unchanged.
#[must_use]
pub fn redact_stream_key(url: &str) -> String {
    match url.rsplit_once('/') {
        Some((base, key)) if !key.is_empty() && base.contains("://") => {
            format!("{base}/****")
        }
        _ => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_directives_cover_aliases() {
        assert_eq!(level_directive("WARN").expect("warn"), "warn");
        assert_eq!(level_directive("warning").expect("warning"), "warn");
        assert_eq!(level_directive(" info ").expect("padded"), "info");
        assert!(level_directive("loud").is_err());
    }

    #[test]
    fn stream_keys_never_reach_log_fields() {
        assert_eq!(
            redact_stream_key("rtmp://live.twitch.tv/app/sk_secret"),
            "rtmp://live.twitch.tv/app/****"
        );
        assert_eq!(
            redact_stream_key("rtmps://gw.example.com/app/sk_secret"),
            "rtmps://gw.example.com/app/****"
        );
    }

    #[test]
    fn urls_without_a_path_are_left_alone() {
        assert_eq!(redact_stream_key("rtmp://host"), "rtmp://host");
        assert_eq!(redact_stream_key("rtmp://host/"), "rtmp://host/");
        assert_eq!(redact_stream_key("not a url"), "not a url");
    }
}
