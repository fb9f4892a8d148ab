//! Relay supervision: per-destination stream-copy children, their
//! lifecycle, and the event stream the control plane observes.

pub mod command;
mod driver;
mod events;
mod session;
mod supervisor;

pub use driver::{DestinationDriver, GenericDriver};
pub use events::{LogLevel, RelayEvent};
pub use session::RelaySession;
pub use supervisor::RelaySupervisor;
