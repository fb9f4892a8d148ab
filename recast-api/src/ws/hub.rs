//! The telemetry hub: owns the WebSocket client table and everything that
//! flows out over it.
//!
//! Outbound traffic goes through a process-global queue drained by a
//! 50 ms batch timer, at most ten envelopes per tick. Statistics take a
//! debounced side path: the per-destination latest snapshot is stored, the
//! destination id lands in a changed-set, and one 100 ms timer flushes an
//! envelope carrying only the destinations that actually changed.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::Message;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use recast_core::error::Result;
use recast_core::models::StreamStats;
use recast_core::registry::Module;
use recast_ingest::IngestService;
use recast_relay::{RelayEvent, RelaySupervisor};

/// Batch timer period.
pub const BATCH_INTERVAL: Duration = Duration::from_millis(50);

/// Maximum envelopes delivered per batch tick.
pub const BATCH_MAX_MESSAGES: usize = 10;

/// Statistics debounce window.
pub const STATS_DEBOUNCE: Duration = Duration::from_millis(100);

/// Wire envelope. Everything the bus emits has this shape.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: serde_json::Value,
    /// Milliseconds since the epoch.
    pub timestamp: i64,
}

impl Envelope {
    #[must_use]
    pub fn new(kind: &str, data: serde_json::Value) -> Self {
        Self {
            kind: kind.to_string(),
            data,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

type ClientSender = mpsc::UnboundedSender<Message>;

pub struct TelemetryHub {
    supervisor: Arc<RelaySupervisor>,
    ingest: Arc<IngestService>,

    clients: DashMap<String, ClientSender>,

    queue_tx: mpsc::UnboundedSender<Envelope>,
    /// Taken by the batch task on activation.
    queue_rx: Mutex<Option<mpsc::UnboundedReceiver<Envelope>>>,

    latest_stats: DashMap<String, StreamStats>,
    changed: Mutex<HashSet<String>>,
    debounce_pending: AtomicBool,

    tasks: Mutex<Vec<JoinHandle<()>>>,
    ingest_subscription: Mutex<Option<recast_ingest::SubscriptionId>>,
}

impl TelemetryHub {
    #[must_use]
    pub fn new(supervisor: Arc<RelaySupervisor>, ingest: Arc<IngestService>) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            supervisor,
            ingest,
            clients: DashMap::new(),
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            latest_stats: DashMap::new(),
            changed: Mutex::new(HashSet::new()),
            debounce_pending: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
            ingest_subscription: Mutex::new(None),
        }
    }

    /// Register a connection and greet it with its server-assigned id.
    pub fn register_client(&self, client_id: String, sender: ClientSender) {
        let hello = Envelope::new("connected", json!({ "clientId": client_id }));
        let _ = sender.send(to_message(&hello));
        self.clients.insert(client_id, sender);
    }

    pub fn unregister_client(&self, client_id: &str) {
        self.clients.remove(client_id);
    }

    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Direct per-client reply (heartbeats, acks); bypasses the batch
    /// queue.
    pub fn send_to(&self, client_id: &str, envelope: &Envelope) {
        if let Some(sender) = self.clients.get(client_id) {
            if sender.send(to_message(envelope)).is_err() {
                drop(sender);
                self.clients.remove(client_id);
            }
        }
    }

    /// Enqueue an envelope for the next batch ticks.
    pub fn enqueue(&self, envelope: Envelope) {
        let _ = self.queue_tx.send(envelope);
    }

    /// Compose and enqueue the full status envelope (per-destination
    /// projection plus ingest info).
    pub fn broadcast_status(&self) {
        let data = json!({
            "ingest": {
                "status": self.ingest.status(),
                "actualPath": self.ingest.actual_path(),
                "url": self.ingest.surfaced_url(),
            },
            "destinations": self.supervisor.status_snapshot(),
        });
        self.enqueue(Envelope::new("status", data));
    }

    /// Enqueue a structured log envelope.
    pub fn broadcast_log(&self, level: &str, message: &str, platform_id: Option<&str>) {
        let data = json!({
            "level": level,
            "message": message,
            "source": "relay",
            "platformId": platform_id,
            "timestamp": chrono::Utc::now().timestamp_millis(),
        });
        self.enqueue(Envelope::new("log", data));
    }

    /// Store a destination's latest stats and schedule the debounced
    /// statistics flush.
    pub fn record_stats(self: &Arc<Self>, destination_id: &str, stats: StreamStats) {
        self.latest_stats.insert(destination_id.to_string(), stats);
        self.changed.lock().insert(destination_id.to_string());

        if !self.debounce_pending.swap(true, Ordering::SeqCst) {
            let hub = Arc::clone(self);
            // Short-lived; a flush after shutdown lands in a closed queue.
            tokio::spawn(async move {
                tokio::time::sleep(STATS_DEBOUNCE).await;
                hub.debounce_pending.store(false, Ordering::SeqCst);
                hub.flush_changed_stats();
            });
        }
    }

    /// Forget a destination's stats (session ended).
    pub fn clear_stats(&self, destination_id: &str) {
        self.latest_stats.remove(destination_id);
        self.changed.lock().remove(destination_id);
    }

    /// Emit one statistics envelope carrying only the destinations whose
    /// stats changed since the previous emission, then clear the set.
    pub(crate) fn flush_changed_stats(&self) {
        let changed: Vec<String> = self.changed.lock().drain().collect();
        if changed.is_empty() {
            return;
        }

        let mut entries = Vec::with_capacity(changed.len());
        for id in changed {
            if let Some(stats) = self.latest_stats.get(&id) {
                if let Ok(serde_json::Value::Object(mut map)) = serde_json::to_value(stats.value())
                {
                    map.insert("destinationId".to_string(), json!(id));
                    entries.push(serde_json::Value::Object(map));
                }
            }
        }

        if !entries.is_empty() {
            self.enqueue(Envelope::new("statistics", serde_json::Value::Array(entries)));
        }
    }

    /// Start the batch drain task and wire the supervisor/ingest event
    /// sources. Idempotent while running.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }

        let Some(queue_rx) = self.queue_rx.lock().take() else {
            return;
        };
        tasks.push(tokio::spawn(batch_loop(Arc::clone(self), queue_rx)));
        tasks.push(tokio::spawn(relay_event_loop(
            Arc::clone(self),
            self.supervisor.subscribe_events(),
        )));
        drop(tasks);

        let hub = Arc::clone(self);
        let subscription = self.ingest.subscribe(Box::new(move |_status| {
            hub.broadcast_status();
        }));
        *self.ingest_subscription.lock() = Some(subscription);
    }

    pub fn stop(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        if let Some(subscription) = self.ingest_subscription.lock().take() {
            self.ingest.unsubscribe(subscription);
        }
        self.clients.clear();
    }

    /// Serialize once, fan out to every client; a client whose channel is
    /// gone is dropped from the table.
    fn deliver(&self, envelope: &Envelope) {
        let message = to_message(envelope);
        let mut dead = Vec::new();
        for entry in &self.clients {
            if entry.value().send(message.clone()).is_err() {
                dead.push(entry.key().clone());
            }
        }
        for client_id in dead {
            debug!(client_id = %client_id, "dropping dead websocket client");
            self.clients.remove(&client_id);
        }
    }
}

fn to_message(envelope: &Envelope) -> Message {
    match serde_json::to_string(envelope) {
        Ok(text) => Message::Text(text.into()),
        Err(e) => {
            warn!(error = %e, "failed to serialize envelope");
            Message::Text("{}".into())
        }
    }
}

/// Drain the global queue on the batch cadence.
async fn batch_loop(hub: Arc<TelemetryHub>, mut queue_rx: mpsc::UnboundedReceiver<Envelope>) {
    let mut ticker = tokio::time::interval(BATCH_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        for _ in 0..BATCH_MAX_MESSAGES {
            match queue_rx.try_recv() {
                Ok(envelope) => hub.deliver(&envelope),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => return,
            }
        }
    }
}

/// Translate supervisor events into bus traffic.
async fn relay_event_loop(
    hub: Arc<TelemetryHub>,
    mut events: tokio::sync::broadcast::Receiver<RelayEvent>,
) {
    loop {
        match events.recv().await {
            Ok(RelayEvent::StatusChanged) => hub.broadcast_status(),
            Ok(RelayEvent::Stats {
                destination_id,
                stats,
            }) => hub.record_stats(&destination_id, stats),
            Ok(RelayEvent::Log {
                level,
                message,
                destination_id,
            }) => hub.broadcast_log(level.as_str(), &message, destination_id.as_deref()),
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "telemetry hub lagged behind relay events");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[async_trait]
impl Module for TelemetryHub {
    async fn activate(&self) -> Result<()> {
        // `start` needs the Arc; the registry hands modules out as Arcs,
        // so the binary calls `start` right after activation instead.
        Ok(())
    }

    async fn deactivate(&self) -> Result<()> {
        self.stop();
        Ok(())
    }
}
