//! The relay supervisor: one stream-copy child per started destination.
//!
//! All session state is keyed by destination id: two destinations
//! sharing a platform name never share a session, a child, or reported
//! state. `stop` removes the session from the table before the child is
//! signaled, so status queries reflect operator intent regardless of how
//! long the child takes to die.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};

use recast_core::error::{Error, Result};
use recast_core::logging;
use recast_core::models::{Destination, DestinationStatus, StreamStats};
use recast_core::preflight;
use recast_core::registry::Module;
use recast_core::telemetry;
use recast_ingest::IngestService;

use crate::command;
use crate::driver::DestinationDriver;
use crate::events::{LogLevel, RelayEvent};
use crate::session::RelaySession;

/// stdio accumulator reset threshold. Bytes are counted, never buffered.
const BYTE_COUNTER_RESET: u64 = 1024 * 1024;

/// Capacity of the event fan-out channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Default)]
struct DestinationTable {
    order: Vec<Destination>,
    index_by_id: HashMap<String, usize>,
    /// First destination carrying each platform name, for by-name lookup.
    index_by_name: HashMap<String, usize>,
}

impl DestinationTable {
    fn rebuild(destinations: Vec<Destination>) -> Self {
        let mut table = Self {
            order: destinations,
            ..Self::default()
        };
        for (idx, dest) in table.order.iter().enumerate() {
            table.index_by_id.insert(dest.id.clone(), idx);
            table.index_by_name.entry(dest.name.clone()).or_insert(idx);
        }
        table
    }

    fn lookup(&self, id_or_name: &str) -> Option<&Destination> {
        self.index_by_id
            .get(id_or_name)
            .or_else(|| self.index_by_name.get(id_or_name))
            .map(|&idx| &self.order[idx])
    }
}

pub struct RelaySupervisor {
    ingest: Arc<IngestService>,
    destinations: RwLock<DestinationTable>,
    sessions: Arc<DashMap<String, Arc<RelaySession>>>,
    events: broadcast::Sender<RelayEvent>,
    drivers: RwLock<Vec<Arc<dyn DestinationDriver>>>,
    /// Resolved transcoder path; when unset, PATH is searched per start.
    transcoder: RwLock<Option<PathBuf>>,
}

impl RelaySupervisor {
    #[must_use]
    pub fn new(ingest: Arc<IngestService>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            ingest,
            destinations: RwLock::new(DestinationTable::default()),
            sessions: Arc::new(DashMap::new()),
            events,
            drivers: RwLock::new(Vec::new()),
            transcoder: RwLock::new(None),
        }
    }

    /// Install the destination drivers (resolved from the registry).
    pub fn set_drivers(&self, drivers: Vec<Arc<dyn DestinationDriver>>) {
        *self.drivers.write() = drivers;
    }

    /// Pin the transcoder binary (preflight result or a test stub).
    pub fn set_transcoder_path(&self, path: PathBuf) {
        *self.transcoder.write() = Some(path);
    }

    /// Subscribe to status/stats/log events.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<RelayEvent> {
        self.events.subscribe()
    }

    /// Replace the destination set. Running sessions whose destination
    /// disappeared keep running until stopped; they simply no longer
    /// appear in snapshots.
    pub fn configure(&self, destinations: Vec<Destination>) {
        let drivers = self.drivers.read();
        for dest in &destinations {
            let driver = drivers
                .iter()
                .find(|d| d.platform() == dest.name)
                .or_else(|| drivers.iter().find(|d| d.platform() == "*"));
            if let Some(driver) = driver {
                if let Err(e) = driver.configure(dest) {
                    warn!(id = %dest.id, name = %dest.name, error = %e, "destination failed driver validation");
                }
            }
        }
        drop(drivers);

        let count = destinations.len();
        *self.destinations.write() = DestinationTable::rebuild(destinations);
        info!(destinations = count, "relay destinations configured");
    }

    /// All configured destinations, in order.
    #[must_use]
    pub fn destinations(&self) -> Vec<Destination> {
        self.destinations.read().order.clone()
    }

    /// Start relaying to one destination. Idempotent while a session for
    /// that id exists.
    pub async fn start(&self, id_or_name: &str) -> Result<()> {
        let dest = self
            .destinations
            .read()
            .lookup(id_or_name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("destination '{id_or_name}'")))?;

        if self.sessions.contains_key(&dest.id) {
            debug!(id = %dest.id, "relay already running");
            return Ok(());
        }
        if !dest.enabled {
            return Err(Error::DestinationDisabled(dest.id));
        }

        let transcoder = self.transcoder_path()?;
        let input_url = self.ingest.surfaced_url();
        let args = command::build_args(&input_url, &dest);
        let output_url = command::compose_output_url(&dest.url, &dest.stream_key);
        debug!(
            id = %dest.id,
            transcoder = %transcoder.display(),
            output = %logging::redact_stream_key(&output_url),
            "spawning relay child"
        );

        let mut child = Command::new(&transcoder)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Internal(format!("failed to spawn transcoder: {e}")))?;

        let session = Arc::new(RelaySession::new(dest.id.clone(), child.id()));
        self.sessions.insert(dest.id.clone(), Arc::clone(&session));

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(count_stream(stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(stderr_pump(
                stderr,
                Arc::clone(&session),
                self.events.clone(),
            ));
        }
        tokio::spawn(monitor_child(
            child,
            session,
            Arc::clone(&self.sessions),
            self.events.clone(),
        ));

        info!(id = %dest.id, name = %dest.name, "relay started");
        self.emit_log(LogLevel::Info, format!("relay started for {}", dest.label()), Some(dest.id));
        self.emit_status_changed();
        Ok(())
    }

    /// Stop relaying to one destination. Safe for an already-stopped one.
    pub fn stop(&self, id_or_name: &str) -> Result<()> {
        let dest = self
            .destinations
            .read()
            .lookup(id_or_name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("destination '{id_or_name}'")))?;

        // The session leaves the table before the child is signaled so a
        // concurrent snapshot already reads idle.
        if let Some((_, session)) = self.sessions.remove(&dest.id) {
            session.mark_stopping();
            session.signal_terminate();
            session.clear_stats();
            info!(id = %dest.id, "relay stopped");
            self.emit_log(LogLevel::Info, format!("relay stopped for {}", dest.label()), Some(dest.id.clone()));
        } else {
            debug!(id = %dest.id, "relay already stopped");
        }

        self.emit_status_changed();
        Ok(())
    }

    /// Start every enabled destination; failures are logged and skipped.
    /// Returns how many sessions are running afterwards.
    pub async fn start_all(&self) -> usize {
        let destinations = self.destinations();
        for dest in destinations.iter().filter(|d| d.enabled) {
            if let Err(e) = self.start(&dest.id).await {
                warn!(id = %dest.id, error = %e, "failed to start relay");
                self.emit_log(
                    LogLevel::Error,
                    format!("failed to start relay for {}: {e}", dest.label()),
                    Some(dest.id.clone()),
                );
            }
        }
        self.sessions.len()
    }

    /// Stop every running session, including ones whose destination was
    /// removed by a configure since they started.
    pub fn stop_all(&self) {
        let running: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for id in running {
            if let Some((_, session)) = self.sessions.remove(&id) {
                session.mark_stopping();
                session.signal_terminate();
                session.clear_stats();
                info!(id = %id, "relay stopped");
            }
        }
        self.emit_status_changed();
    }

    /// Projected status of every configured destination, in order.
    #[must_use]
    pub fn status_snapshot(&self) -> Vec<DestinationStatus> {
        self.destinations
            .read()
            .order
            .iter()
            .map(|dest| {
                let (flags, alive) = self
                    .sessions
                    .get(&dest.id)
                    .map_or((recast_core::models::SessionFlags::default(), false), |s| {
                        (s.flags(), s.is_alive())
                    });
                DestinationStatus {
                    id: dest.id.clone(),
                    name: dest.name.clone(),
                    display_name: dest.display_name.clone(),
                    status: flags.project(alive),
                    connected: flags.connected,
                    streaming: flags.streaming,
                    enabled: dest.enabled,
                    url: dest.url.clone(),
                }
            })
            .collect()
    }

    /// Latest stats per running destination.
    #[must_use]
    pub fn stats_snapshot(&self) -> Vec<(String, StreamStats)> {
        self.sessions
            .iter()
            .filter_map(|entry| {
                entry
                    .value()
                    .latest_stats()
                    .map(|stats| (entry.key().clone(), stats))
            })
            .collect()
    }

    /// Ids of the currently running sessions.
    #[must_use]
    pub fn running(&self) -> Vec<String> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    fn transcoder_path(&self) -> Result<PathBuf> {
        if let Some(path) = self.transcoder.read().clone() {
            return Ok(path);
        }
        let path = preflight::find_transcoder()?;
        *self.transcoder.write() = Some(path.clone());
        Ok(path)
    }

    fn emit_status_changed(&self) {
        let _ = self.events.send(RelayEvent::StatusChanged);
    }

    fn emit_log(&self, level: LogLevel, message: String, destination_id: Option<String>) {
        let _ = self.events.send(RelayEvent::Log {
            level,
            message,
            destination_id,
        });
    }
}

#[async_trait]
impl Module for RelaySupervisor {
    async fn deactivate(&self) -> Result<()> {
        self.stop_all();
        Ok(())
    }
}

/// Drain a stdio stream, counting bytes only. The accumulator resets at
/// 1 MiB; nothing is retained.
async fn count_stream(mut stream: tokio::process::ChildStdout) {
    let mut buf = [0u8; 8192];
    let mut counter: u64 = 0;
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                counter += n as u64;
                if counter > BYTE_COUNTER_RESET {
                    counter = 0;
                }
            }
        }
    }
}

/// Read stderr line by line, feeding the telemetry parser. The same
/// 1 MiB counter discipline applies; raw lines are dropped after parsing.
async fn stderr_pump(
    stderr: tokio::process::ChildStderr,
    session: Arc<RelaySession>,
    events: broadcast::Sender<RelayEvent>,
) {
    let mut lines = BufReader::new(stderr).lines();
    let mut counter: u64 = 0;
    while let Ok(Some(line)) = lines.next_line().await {
        counter += line.len() as u64 + 1;
        if counter > BYTE_COUNTER_RESET {
            counter = 0;
        }

        if let Some(parsed) = telemetry::parse_line(&line) {
            session.record_stats(&parsed);
            if let Some(merged) = session.latest_stats() {
                let _ = events.send(RelayEvent::Stats {
                    destination_id: session.destination_id().to_string(),
                    stats: merged,
                });
            }
        } else {
            trace!(destination_id = %session.destination_id(), line = %line, "transcoder");
        }
    }
}

/// Wait for the child to exit and reconcile the session table. A clean
/// exit after an operator stop is routine; anything else is an error.
async fn monitor_child(
    mut child: Child,
    session: Arc<RelaySession>,
    sessions: Arc<DashMap<String, Arc<RelaySession>>>,
    events: broadcast::Sender<RelayEvent>,
) {
    let wait_result = child.wait().await;
    session.mark_exited();
    let stopped = session.stop_requested();
    let destination_id = session.destination_id().to_string();

    // Only remove the table entry if it is still this session; a restart
    // may already have replaced it.
    sessions.remove_if(&destination_id, |_, current| Arc::ptr_eq(current, &session));
    session.clear_stats();

    match wait_result {
        Ok(status) if status.success() && stopped => {
            info!(destination_id = %destination_id, "relay child exited cleanly");
            let _ = events.send(RelayEvent::Log {
                level: LogLevel::Info,
                message: "relay child exited cleanly".to_string(),
                destination_id: Some(destination_id.clone()),
            });
        }
        Ok(status) => {
            let code = status.code();
            let err = Error::ChildExit {
                destination_id: destination_id.clone(),
                code,
            };
            error!(destination_id = %destination_id, code = ?code, "relay child exited");
            let _ = events.send(RelayEvent::Log {
                level: LogLevel::Error,
                message: err.to_string(),
                destination_id: Some(destination_id.clone()),
            });
        }
        Err(e) => {
            error!(destination_id = %destination_id, error = %e, "failed to reap relay child");
        }
    }

    let _ = events.send(RelayEvent::StatusChanged);
}
