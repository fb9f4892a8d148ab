use serde::{Deserialize, Serialize};

/// Publish state of the single ingest listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestStatus {
    Idle,
    Connecting,
    Streaming,
}

impl IngestStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
        }
    }
}

/// The two independent flags the supervisor keeps per relay session.
///
/// `connected` means the child reached the destination endpoint;
/// `streaming` means media is flowing. The supervisor owns these; they
/// are never derived from the child's exit state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFlags {
    pub connected: bool,
    pub streaming: bool,
}

impl SessionFlags {
    /// Collapse the flags into the reported per-destination state.
    ///
    /// Both flags cleared wins over a still-exiting child, so a stopped
    /// destination reads `idle` immediately.
    #[must_use]
    pub fn project(self, child_alive: bool) -> DestinationState {
        if !self.streaming && !self.connected {
            DestinationState::Idle
        } else if child_alive && self.streaming {
            DestinationState::Streaming
        } else if child_alive && self.connected {
            DestinationState::Connected
        } else {
            DestinationState::Idle
        }
    }
}

/// Reported state of one destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestinationState {
    Streaming,
    Connected,
    Idle,
}

impl DestinationState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Streaming => "streaming",
            Self::Connected => "connected",
            Self::Idle => "idle",
        }
    }
}

/// Per-destination projection returned by the supervisor snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationStatus {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub status: DestinationState,
    pub connected: bool,
    pub streaming: bool,
    pub enabled: bool,
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleared_flags_project_idle_even_with_live_child() {
        let flags = SessionFlags::default();
        assert_eq!(flags.project(true), DestinationState::Idle);
    }

    #[test]
    fn streaming_needs_a_live_child() {
        let flags = SessionFlags {
            connected: true,
            streaming: true,
        };
        assert_eq!(flags.project(true), DestinationState::Streaming);
        assert_eq!(flags.project(false), DestinationState::Idle);
    }

    #[test]
    fn connected_without_streaming() {
        let flags = SessionFlags {
            connected: true,
            streaming: false,
        };
        assert_eq!(flags.project(true), DestinationState::Connected);
    }
}
