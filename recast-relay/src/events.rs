use recast_core::models::StreamStats;

/// Severity carried on relay log events, mirrored into the control-plane
/// log stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Events the supervisor broadcasts to whoever listens (the telemetry
/// bus). Slow listeners lag and skip; the supervisor never blocks on them.
#[derive(Debug, Clone)]
pub enum RelayEvent {
    /// Some destination's projected status changed; listeners should
    /// re-read the snapshot.
    StatusChanged,

    /// Fresh parsed statistics for one destination.
    Stats {
        destination_id: String,
        stats: StreamStats,
    },

    /// Structured log line for the control plane.
    Log {
        level: LogLevel,
        message: String,
        destination_id: Option<String>,
    },
}
