//! Transcoder invocation for one destination: stream-copy from the
//! loopback ingest to the destination publish URL, FLV-muxed, no
//! re-encode.

use recast_core::models::Destination;

/// Protocols the transcoder may touch for RTMPS outputs.
pub const RTMPS_PROTOCOL_WHITELIST: &str = "rtmp,rtmps,file,http,https,tcp,tls";

/// CPU bound for a copy-only child.
const THREAD_CAP: &str = "2";

/// Bounded reconnect delay for RTMPS outputs, seconds.
const RECONNECT_DELAY_MAX: &str = "2";

/// Output buffer for RTMPS gateways.
const OUTPUT_BUFSIZE: &str = "384k";

/// Compose the destination publish URL from the configured base URL and
/// stream key.
///
/// `rtmp://` bases get the key appended as the final path segment.
/// `rtmps://` gateways expect the application path `app` before the key:
/// a base already ending in `/app` (or `/app/`) keeps it, anything else
/// gets `/app` inserted.
#[must_use]
pub fn compose_output_url(url: &str, stream_key: &str) -> String {
    if url.starts_with("rtmps://") {
        if url.ends_with("/app") {
            format!("{url}/{stream_key}")
        } else if url.ends_with("/app/") {
            format!("{url}{stream_key}")
        } else {
            format!("{}/app/{}", url.trim_end_matches('/'), stream_key)
        }
    } else {
        format!("{}/{}", url.trim_end_matches('/'), stream_key)
    }
}

/// Build the full transcoder argv (without the binary name).
///
/// The statistics lines the telemetry parser feeds on are emitted at the
/// `info` log level, so verbosity must not go below that.
#[must_use]
pub fn build_args(input_url: &str, destination: &Destination) -> Vec<String> {
    let output_url = compose_output_url(&destination.url, &destination.stream_key);
    let rtmps = destination.url.starts_with("rtmps://");

    let mut args: Vec<String> = vec!["-hide_banner".into(), "-loglevel".into(), "info".into()];

    if rtmps {
        args.extend([
            "-protocol_whitelist".into(),
            RTMPS_PROTOCOL_WHITELIST.into(),
            "-reconnect_at_eof".into(),
            "1".into(),
            "-reconnect_delay_max".into(),
            RECONNECT_DELAY_MAX.into(),
        ]);
    }

    args.extend(["-i".into(), input_url.into()]);
    args.extend(["-c".into(), "copy".into()]);
    args.extend(["-threads".into(), THREAD_CAP.into()]);
    args.extend(["-f".into(), "flv".into()]);

    if rtmps {
        args.extend(["-bufsize".into(), OUTPUT_BUFSIZE.into()]);
    }

    args.push(output_url);
    args
}
