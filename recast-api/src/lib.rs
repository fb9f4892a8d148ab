//! Control plane of the fan-out relay: REST surface under `/api`, health
//! probe, and the WebSocket telemetry bus at `/ws`.

pub mod http;
pub mod ws;

pub use http::{create_router, AppState};
pub use ws::TelemetryHub;
