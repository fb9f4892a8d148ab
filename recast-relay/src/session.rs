//! Per-destination relay session record.
//!
//! The supervisor owns the table of these; each session's child process is
//! owned by its monitor task. The session itself only tracks the flags,
//! the latest stats snapshot, and enough identity to signal the child.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use recast_core::models::{SessionFlags, StreamStats};

pub struct RelaySession {
    destination_id: String,
    pid: Option<u32>,
    flags: RwLock<SessionFlags>,
    latest_stats: Mutex<Option<StreamStats>>,
    alive: AtomicBool,
    stop_requested: AtomicBool,
}

impl RelaySession {
    pub(crate) fn new(destination_id: String, pid: Option<u32>) -> Self {
        Self {
            destination_id,
            pid,
            flags: RwLock::new(SessionFlags {
                connected: true,
                streaming: false,
            }),
            latest_stats: Mutex::new(None),
            alive: AtomicBool::new(true),
            stop_requested: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn destination_id(&self) -> &str {
        &self.destination_id
    }

    #[must_use]
    pub fn flags(&self) -> SessionFlags {
        *self.flags.read()
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn latest_stats(&self) -> Option<StreamStats> {
        self.latest_stats.lock().clone()
    }

    /// Merge a freshly parsed snapshot over the retained one. Fields the
    /// new line did not carry (resolution, codec arrive once in the
    /// stream header) stay from the previous snapshot; only the latest
    /// value of each field is ever kept.
    pub(crate) fn record_stats(&self, incoming: &StreamStats) {
        let mut guard = self.latest_stats.lock();
        let merged = match guard.take() {
            Some(mut current) => {
                macro_rules! take_new {
                    ($field:ident) => {
                        if incoming.$field.is_some() {
                            current.$field = incoming.$field.clone();
                        }
                    };
                }
                take_new!(frame);
                take_new!(fps);
                take_new!(quality);
                take_new!(size_kb);
                take_new!(time_seconds);
                take_new!(bitrate_kbps);
                take_new!(speed);
                take_new!(resolution);
                take_new!(codec);
                current
            }
            None => incoming.clone(),
        };
        *guard = Some(merged);
        drop(guard);

        // Progress on the line means media is flowing.
        if incoming.frame.is_some()
            || incoming.bitrate_kbps.is_some()
            || incoming.time_seconds.is_some()
        {
            self.flags.write().streaming = true;
        }
    }

    pub(crate) fn clear_stats(&self) {
        *self.latest_stats.lock() = None;
    }

    /// An operator stop: flags drop to idle immediately, before the child
    /// is signaled, so every subsequent snapshot reads `idle`.
    pub(crate) fn mark_stopping(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        *self.flags.write() = SessionFlags::default();
    }

    #[must_use]
    pub(crate) fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_exited(&self) {
        self.alive.store(false, Ordering::SeqCst);
        *self.flags.write() = SessionFlags::default();
    }

    /// Ask the child to terminate. Fire-and-forget; the monitor task
    /// observes the actual exit.
    pub(crate) fn signal_terminate(&self) {
        let Some(pid) = self.pid else {
            return;
        };
        #[allow(clippy::cast_possible_wrap)]
        let pid = nix::unistd::Pid::from_raw(pid as i32);
        match nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM) {
            Ok(()) => debug!(destination_id = %self.destination_id, "SIGTERM sent to relay child"),
            Err(e) => debug!(
                destination_id = %self.destination_id,
                error = %e,
                "relay child already gone"
            ),
        }
    }
}
