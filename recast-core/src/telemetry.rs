//! Parser for transcoder diagnostic output.
//!
//! ffmpeg reports progress on stderr as a fused one-line snapshot
//! (`frame= ... fps= ... time= ... bitrate= ... speed= ...`). This module
//! turns one such line into a [`StreamStats`], falling back to
//! field-by-field extraction for partial lines (audio-only streams, header
//! lines carrying the resolution or codec). Pure functions, no I/O.

use std::sync::LazyLock;

use regex::Regex;

use crate::models::StreamStats;

mod patterns {
    use super::{LazyLock, Regex};

    /// The fused progress line, all fields in emit order.
    pub static PROGRESS: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r"frame=\s*(\d+)\s+fps=\s*([\d.]+)\s+q=\s*(-?[\d.]+)\s+L?size=\s*(\d+)\s*[kK]i?B\s+time=\s*(\d+):(\d{2}):(\d{2}(?:\.\d+)?)\s+bitrate=\s*([\d.]+)\s*kbits/s.*?speed=\s*([\d.]+)x",
        )
        .expect("progress regex")
    });

    pub static FRAME: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"frame=\s*(\d+)").expect("frame regex"));

    pub static FPS: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"fps=\s*([\d.]+)").expect("fps regex"));

    pub static QUALITY: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"q=\s*(-?[\d.]+)").expect("q regex"));

    pub static SIZE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"L?size=\s*(\d+)\s*[kK]i?B").expect("size regex"));

    pub static TIME: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"time=\s*(\d+):(\d{2}):(\d{2}(?:\.\d+)?)").expect("time regex")
    });

    pub static BITRATE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"bitrate=\s*([\d.]+)\s*kbits/s").expect("bitrate regex"));

    pub static SPEED: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"speed=\s*([\d.]+)x").expect("speed regex"));

    pub static RESOLUTION: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\b(\d{2,5}x\d{2,5})\b").expect("resolution regex"));

    pub static CODEC: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?:Video|Audio):\s*(\w+)").expect("codec regex"));
}

/// Parse one stderr line. Returns `None` when no field is recognized.
#[must_use]
pub fn parse_line(line: &str) -> Option<StreamStats> {
    if let Some(caps) = patterns::PROGRESS.captures(line) {
        return Some(StreamStats {
            frame: caps[1].parse().ok(),
            fps: caps[2].parse().ok(),
            quality: caps[3].parse().ok(),
            size_kb: caps[4].parse().ok(),
            time_seconds: hms_to_seconds(&caps[5], &caps[6], &caps[7]),
            bitrate_kbps: caps[8].parse().ok(),
            speed: caps[9].parse().ok(),
            resolution: None,
            codec: None,
        });
    }

    let stats = StreamStats {
        frame: capture_parse(&patterns::FRAME, line),
        fps: capture_parse(&patterns::FPS, line),
        quality: capture_parse(&patterns::QUALITY, line),
        size_kb: capture_parse(&patterns::SIZE, line),
        time_seconds: patterns::TIME
            .captures(line)
            .and_then(|c| hms_to_seconds(&c[1], &c[2], &c[3])),
        bitrate_kbps: capture_parse(&patterns::BITRATE, line),
        speed: capture_parse(&patterns::SPEED, line),
        resolution: patterns::RESOLUTION
            .captures(line)
            .map(|c| c[1].to_string()),
        codec: patterns::CODEC.captures(line).map(|c| c[1].to_string()),
    };

    if stats.is_empty() {
        None
    } else {
        Some(stats)
    }
}

/// Last sample in the sequence.
#[must_use]
pub fn latest(samples: &[StreamStats]) -> Option<StreamStats> {
    samples.last().cloned()
}

/// Arithmetic mean over the rate fields (fps, bitrate, speed); the
/// monotonic fields (frame, time, size) and the descriptive ones
/// (resolution, codec) are carried forward from the latest sample.
#[must_use]
pub fn mean(samples: &[StreamStats]) -> Option<StreamStats> {
    let mut out = latest(samples)?;
    out.fps = mean_of(samples, |s| s.fps);
    out.bitrate_kbps = mean_of(samples, |s| s.bitrate_kbps);
    out.speed = mean_of(samples, |s| s.speed);
    Some(out)
}

fn mean_of(samples: &[StreamStats], field: impl Fn(&StreamStats) -> Option<f64>) -> Option<f64> {
    let values: Vec<f64> = samples.iter().filter_map(field).collect();
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn capture_parse<T: std::str::FromStr>(re: &Regex, line: &str) -> Option<T> {
    re.captures(line).and_then(|c| c[1].parse().ok())
}

fn hms_to_seconds(h: &str, m: &str, s: &str) -> Option<f64> {
    let hours: f64 = h.parse().ok()?;
    let minutes: f64 = m.parse().ok()?;
    let seconds: f64 = s.parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FUSED: &str =
        "frame=  930 fps= 31 q=-1.0 size=    4523kB time=00:00:31.02 bitrate=1194.3kbits/s speed=1.03x";

    #[test]
    fn fused_line_parses_every_field() {
        let stats = parse_line(FUSED).expect("stats");
        assert_eq!(stats.frame, Some(930));
        assert_eq!(stats.fps, Some(31.0));
        assert_eq!(stats.quality, Some(-1.0));
        assert_eq!(stats.size_kb, Some(4523));
        assert_eq!(stats.time_seconds, Some(31.02));
        assert_eq!(stats.bitrate_kbps, Some(1194.3));
        assert_eq!(stats.speed, Some(1.03));
    }

    #[test]
    fn time_formula_is_h3600_m60_s() {
        let stats = parse_line("time=01:02:03.50").expect("stats");
        assert_eq!(stats.time_seconds, Some(3600.0 + 120.0 + 3.5));
    }

    #[test]
    fn partial_line_falls_back_to_individual_fields() {
        let stats = parse_line("size=     512kB time=00:00:10.00 bitrate= 419.4kbits/s")
            .expect("stats");
        assert_eq!(stats.frame, None);
        assert_eq!(stats.size_kb, Some(512));
        assert_eq!(stats.bitrate_kbps, Some(419.4));
    }

    #[test]
    fn stream_header_yields_resolution_and_codec() {
        let line = "  Stream #0:0: Video: h264 (High), yuv420p(progressive), 1920x1080, 30 fps";
        let stats = parse_line(line).expect("stats");
        assert_eq!(stats.resolution.as_deref(), Some("1920x1080"));
        assert_eq!(stats.codec.as_deref(), Some("h264"));
    }

    #[test]
    fn unrelated_line_returns_none() {
        assert!(parse_line("Press [q] to stop, [?] for help").is_none());
        assert!(parse_line("").is_none());
    }

    #[test]
    fn times_are_never_negative() {
        for line in [FUSED, "time=00:00:00.00", "time=99:59:59.99"] {
            if let Some(stats) = parse_line(line) {
                if let Some(t) = stats.time_seconds {
                    assert!(t >= 0.0);
                }
            }
        }
    }

    #[test]
    fn mean_averages_rates_and_carries_latest() {
        let a = parse_line("frame= 10 fps= 20 q=-1.0 size= 100kB time=00:00:01.00 bitrate=1000.0kbits/s speed=1.00x").expect("a");
        let b = parse_line("frame= 20 fps= 40 q=-1.0 size= 200kB time=00:00:02.00 bitrate=3000.0kbits/s speed=1.50x").expect("b");
        let avg = mean(&[a, b]).expect("mean");
        assert_eq!(avg.fps, Some(30.0));
        assert_eq!(avg.bitrate_kbps, Some(2000.0));
        assert_eq!(avg.speed, Some(1.25));
        // Carried forward, not averaged.
        assert_eq!(avg.frame, Some(20));
        assert_eq!(avg.time_seconds, Some(2.0));
        assert_eq!(avg.size_kb, Some(200));
    }

    #[test]
    fn latest_is_last_in_sequence() {
        let a = parse_line("frame= 10").expect("a");
        let b = parse_line("frame= 20").expect("b");
        assert_eq!(latest(&[a, b]).and_then(|s| s.frame), Some(20));
        assert!(latest(&[]).is_none());
    }
}
