//! RTMP ingest: accepts the single inbound publish, enforces the stream
//! key, and replays the coded stream to relay children over loopback.

mod bus;
mod connection;
mod server;
mod service;

pub use bus::{MediaBus, MediaMessage, PlayerFeed};
pub use server::IngestServer;
pub use service::{loopback_host, IngestService, StatusCallback, SubscriptionId};
