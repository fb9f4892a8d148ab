//! Publish-state bookkeeping and subscriber notification for the ingest.
//!
//! The server sessions call the lifecycle hooks; everyone else reads the
//! state through snapshots or registers a status callback. Callbacks run
//! serially on the caller's task and must not block.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{info, warn};

use recast_core::config::RtmpServerConfig;
use recast_core::error::{Error, Result};
use recast_core::models::IngestStatus;

pub type SubscriptionId = u64;
pub type StatusCallback = Box<dyn Fn(IngestStatus) + Send + Sync>;

struct PublishState {
    status: IngestStatus,
    actual_path: Option<String>,
}

/// Ingest-facing state of the single publish session.
pub struct IngestService {
    config: RwLock<RtmpServerConfig>,
    state: RwLock<PublishState>,
    subscribers: DashMap<SubscriptionId, StatusCallback>,
    next_subscription: AtomicU64,
}

impl IngestService {
    #[must_use]
    pub fn new(config: RtmpServerConfig) -> Self {
        Self {
            config: RwLock::new(config),
            state: RwLock::new(PublishState {
                status: IngestStatus::Idle,
                actual_path: None,
            }),
            subscribers: DashMap::new(),
            next_subscription: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub fn config(&self) -> RtmpServerConfig {
        self.config.read().clone()
    }

    /// Swap the listener configuration (used by config hot-apply). Resets
    /// the publish state; the server rebinds separately.
    pub fn reconfigure(&self, config: RtmpServerConfig) {
        *self.config.write() = config;
        self.reset_state();
    }

    /// Back to `Idle` with no observed path (listener going down).
    pub fn reset_state(&self) {
        let mut state = self.state.write();
        state.status = IngestStatus::Idle;
        state.actual_path = None;
    }

    #[must_use]
    pub fn status(&self) -> IngestStatus {
        self.state.read().status
    }

    #[must_use]
    pub fn actual_path(&self) -> Option<String> {
        self.state.read().actual_path.clone()
    }

    /// The publish path the relay children should read: the observed path
    /// when a publisher is live, the configured `/app/stream_key` otherwise.
    #[must_use]
    pub fn stream_path(&self) -> String {
        self.state
            .read()
            .actual_path
            .clone()
            .unwrap_or_else(|| self.config.read().stream_path())
    }

    /// Full ingest URL with the wildcard host rewritten to loopback, for
    /// humans and for the relay children's input side alike.
    #[must_use]
    pub fn surfaced_url(&self) -> String {
        let (host, port) = {
            let config = self.config.read();
            (loopback_host(&config.host).to_string(), config.port)
        };
        format!("rtmp://{host}:{port}{}", self.stream_path())
    }

    /// Register a status callback. Invoked serially; must not block.
    pub fn subscribe(&self, callback: StatusCallback) -> SubscriptionId {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.subscribers.insert(id, callback);
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.remove(&id).is_some()
    }

    /// Handshake observed. Log only.
    pub fn on_pre_connect(&self, peer: &str) {
        info!(peer, "ingest connection");
    }

    /// Gate an inbound publish. The trailing path segment must equal the
    /// configured stream key (an empty configured key disables the check).
    /// Moves the state to `Connecting` on success.
    pub fn on_pre_publish(&self, app_name: &str, stream_name: &str) -> Result<()> {
        let configured = self.config.read().stream_key.clone();
        // Keys may arrive with RTMP query arguments attached.
        let presented = stream_name.split('?').next().unwrap_or(stream_name);

        if !configured.is_empty() && presented != configured {
            let path = format!("/{app_name}/{presented}");
            warn!(path = %path, "publish rejected: stream key mismatch");
            return Err(Error::IngestRejected { path });
        }

        self.state.write().status = IngestStatus::Connecting;
        Ok(())
    }

    /// Publish accepted: record the observed path, go `Streaming`, notify.
    pub fn on_post_publish(&self, app_name: &str, stream_name: &str) {
        let path = format!("/{app_name}/{stream_name}");
        {
            let mut state = self.state.write();
            state.status = IngestStatus::Streaming;
            state.actual_path = Some(path.clone());
        }
        info!(path = %path, "publish started");
        self.notify(IngestStatus::Streaming);
    }

    /// Publish ended: clear the path, go `Idle`, notify.
    pub fn on_done_publish(&self) {
        {
            let mut state = self.state.write();
            state.status = IngestStatus::Idle;
            state.actual_path = None;
        }
        info!("publish ended");
        self.notify(IngestStatus::Idle);
    }

    fn notify(&self, status: IngestStatus) {
        for entry in &self.subscribers {
            (entry.value())(status);
        }
    }
}

/// `0.0.0.0` binds every interface but is not a dialable address; surfaced
/// URLs point at loopback instead. A deliberately bound specific address
/// is surfaced unchanged.
#[must_use]
pub fn loopback_host(host: &str) -> &str {
    if host == "0.0.0.0" {
        "localhost"
    } else {
        host
    }
}
