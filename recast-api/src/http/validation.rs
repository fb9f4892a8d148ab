//! Input validation for control-plane path parameters and bodies.

use std::sync::LazyLock;

use regex::Regex;

use crate::http::error::AppError;

/// Maximum lengths for path parameters.
pub mod limits {
    /// Maximum destination id length.
    pub const DESTINATION_ID_MAX: usize = 100;
}

mod patterns {
    use super::{LazyLock, Regex};

    /// Valid destination id: alphanumeric, underscores, hyphens.
    pub static DESTINATION_ID: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^[A-Za-z0-9_-]{1,100}$").expect("Invalid destination id regex")
    });
}

/// Validate the `:id` path parameter before it reaches the supervisor.
pub fn validate_destination_id(id: &str) -> Result<(), AppError> {
    if patterns::DESTINATION_ID.is_match(id) {
        Ok(())
    } else {
        Err(AppError::bad_request(format!(
            "Invalid destination id (1-{} characters, [A-Za-z0-9_-] only)",
            limits::DESTINATION_ID_MAX
        )))
    }
}
