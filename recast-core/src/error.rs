use thiserror::Error;

/// A single field that failed schema validation.
///
/// Collected into [`Error::ConfigInvalid`] and surfaced verbatim to API
/// clients so operators can see every offending field at once.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid configuration: {}", format_fields(.fields))]
    ConfigInvalid { fields: Vec<FieldError> },

    #[error("Ports already in use: {}", format_ports(.ports))]
    PortUnavailable { ports: Vec<u16> },

    #[error("Invalid lifecycle transition for module '{module}': {from} -> {to}")]
    StateMismatch {
        module: String,
        from: &'static str,
        to: &'static str,
    },

    #[error("ffmpeg binary not found on PATH. Install ffmpeg (https://ffmpeg.org/download.html) and ensure it is reachable from this process")]
    TranscoderMissing,

    #[error("Relay child for destination '{destination_id}' exited with {}", format_exit(*.code))]
    ChildExit {
        destination_id: String,
        code: Option<i32>,
    },

    #[error("Publish rejected: stream key mismatch on path '{path}'")]
    IngestRejected { path: String },

    #[error("Destination '{0}' is disabled")]
    DestinationDisabled(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Single-field convenience constructor for [`Error::ConfigInvalid`].
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ConfigInvalid {
            fields: vec![FieldError::new(field, message)],
        }
    }
}

fn format_ports(ports: &[u16]) -> String {
    ports
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn format_exit(code: Option<i32>) -> String {
    code.map_or_else(|| "signal".to_string(), |c| format!("code {c}"))
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_unavailable_lists_every_offender() {
        let err = Error::PortUnavailable {
            ports: vec![1935, 8080],
        };
        let msg = err.to_string();
        assert!(msg.contains("1935"));
        assert!(msg.contains("8080"));
    }

    #[test]
    fn config_invalid_lists_every_field() {
        let err = Error::ConfigInvalid {
            fields: vec![
                FieldError::new("ui.port", "must be non-zero"),
                FieldError::new("platforms[0].rtmp_url", "unsupported scheme"),
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("ui.port"));
        assert!(msg.contains("platforms[0].rtmp_url"));
    }
}
