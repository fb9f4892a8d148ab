//! Core types of the recast fan-out relay: configuration schema + store,
//! the module registry and lifecycle machine, the shared data model, the
//! transcoder telemetry parser, and startup preflight probes.

pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod preflight;
pub mod registry;
pub mod telemetry;

pub use config::{Config, ConfigStore};
pub use error::{Error, FieldError, Result};
pub use models::{Destination, DestinationState, DestinationStatus, IngestStatus, SessionFlags, StreamStats};
pub use registry::{Module, ModuleRegistry, ModuleSpec, ModuleState};
