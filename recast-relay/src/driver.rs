//! Destination driver seam.
//!
//! Platforms share one narrow interface: validate a destination at
//! configure time and report which platform they serve. Session state is
//! owned by the supervisor alone; a driver is never consulted for flags.

use recast_core::error::{Error, Result};
use recast_core::models::Destination;

pub trait DestinationDriver: Send + Sync {
    /// Platform `name` this driver serves; `"*"` matches any.
    fn platform(&self) -> &str;

    /// Platform-specific validation of a destination entry.
    fn configure(&self, destination: &Destination) -> Result<()>;
}

/// Catch-all driver: checks the publish scheme and nothing else.
pub struct GenericDriver;

/// Drivers are stateless; lifecycle participation is for ordering only.
#[async_trait::async_trait]
impl recast_core::registry::Module for GenericDriver {}

impl DestinationDriver for GenericDriver {
    fn platform(&self) -> &str {
        "*"
    }

    fn configure(&self, destination: &Destination) -> Result<()> {
        if destination.has_supported_scheme() {
            Ok(())
        } else {
            Err(Error::invalid_field(
                "rtmp_url",
                format!("unsupported scheme in '{}'", destination.url),
            ))
        }
    }
}
