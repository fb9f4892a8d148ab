//! Startup availability probes.
//!
//! Before the listeners activate, every port we are about to claim is
//! checked with a transient bind, and the external transcoder binary is
//! looked up on PATH. Ports in use are fatal; a missing transcoder is only
//! a warning here (it becomes fatal on the first relay start).

use std::path::PathBuf;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{Error, Result};

/// Name of the external stream-copy transcoder.
pub const TRANSCODER_BIN: &str = "ffmpeg";

/// Upper bound for one bind probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Outcome of the startup probe.
#[derive(Debug)]
pub struct PreflightReport {
    /// Ports verified free at probe time.
    pub ports: Vec<u16>,
    /// Absolute path of the transcoder, when found.
    pub transcoder: Option<PathBuf>,
}

/// Probe every listen port and the transcoder binary.
///
/// # Errors
///
/// [`Error::PortUnavailable`] listing every port that failed to bind.
pub async fn run(cfg: &Config) -> Result<PreflightReport> {
    let mut targets = vec![(cfg.ui.host.clone(), cfg.ui.port)];
    if cfg.stream_manager.rtmp_server.enabled {
        targets.push((
            cfg.stream_manager.rtmp_server.host.clone(),
            cfg.stream_manager.rtmp_server.port,
        ));
    }

    check_ports(&targets).await?;

    let transcoder = match find_transcoder() {
        Ok(path) => {
            info!(path = %path.display(), "transcoder found");
            Some(path)
        }
        Err(_) => {
            warn!(
                binary = TRANSCODER_BIN,
                "transcoder not found on PATH; relay starts will fail until it is installed"
            );
            None
        }
    };

    Ok(PreflightReport {
        ports: targets.into_iter().map(|(_, p)| p).collect(),
        transcoder,
    })
}

/// Attempt a transient bind on each `(host, port)` and release it.
/// All offenders are collected into a single error.
pub async fn check_ports(targets: &[(String, u16)]) -> Result<()> {
    let mut in_use = Vec::new();
    for (host, port) in targets {
        let addr = format!("{host}:{port}");
        let bound = tokio::time::timeout(PROBE_TIMEOUT, TcpListener::bind(&addr)).await;
        match bound {
            Ok(Ok(listener)) => drop(listener),
            Ok(Err(e)) => {
                warn!(addr = %addr, error = %e, "port probe failed");
                in_use.push(*port);
            }
            Err(_) => {
                warn!(addr = %addr, "port probe timed out");
                in_use.push(*port);
            }
        }
    }

    if in_use.is_empty() {
        Ok(())
    } else {
        Err(Error::PortUnavailable { ports: in_use })
    }
}

/// Locate the transcoder on PATH.
///
/// # Errors
///
/// [`Error::TranscoderMissing`] with installation guidance.
pub fn find_transcoder() -> Result<PathBuf> {
    which::which(TRANSCODER_BIN).map_err(|_| Error::TranscoderMissing)
}
