//! In-process media routing between the single publisher and the relay
//! children playing the stream back over loopback.
//!
//! One channel per published path. The publisher side pushes coded frames
//! as-is; each player gets a broadcast receiver plus the cached sequence
//! headers and metadata so a child joining mid-publish can start decoding
//! at the next keyframe.

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use rml_rtmp::sessions::StreamMetadata;
use rml_rtmp::time::RtmpTimestamp;
use tokio::sync::broadcast;
use tracing::debug;

use recast_core::error::{Error, Result};

/// Capacity of each per-stream broadcast channel. A lagging player skips
/// ahead (frames for it are dropped) instead of stalling the publisher.
const CHANNEL_CAPACITY: usize = 512;

/// One coded media message, forwarded without inspection.
#[derive(Debug, Clone)]
pub enum MediaMessage {
    Metadata(StreamMetadata),
    Audio { data: Bytes, timestamp: RtmpTimestamp },
    Video { data: Bytes, timestamp: RtmpTimestamp },
}

/// Cached stream preamble replayed to late joiners.
#[derive(Default, Clone)]
struct Preamble {
    metadata: Option<StreamMetadata>,
    video_sequence_header: Option<Bytes>,
    audio_sequence_header: Option<Bytes>,
}

struct StreamChannel {
    sender: broadcast::Sender<MediaMessage>,
    preamble: RwLock<Preamble>,
}

/// Handed to a player connection on subscribe.
pub struct PlayerFeed {
    pub receiver: broadcast::Receiver<MediaMessage>,
    pub metadata: Option<StreamMetadata>,
    pub video_sequence_header: Option<Bytes>,
    pub audio_sequence_header: Option<Bytes>,
}

/// Media routing table keyed by publish path (`/app/stream`).
#[derive(Default)]
pub struct MediaBus {
    streams: DashMap<String, StreamChannel>,
}

impl MediaBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a path for publishing. Only one publisher may hold a path.
    pub fn publish(&self, path: &str) -> Result<()> {
        use dashmap::mapref::entry::Entry;
        match self.streams.entry(path.to_string()) {
            Entry::Occupied(_) => Err(Error::AlreadyExists(format!("publisher on '{path}'"))),
            Entry::Vacant(slot) => {
                let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
                slot.insert(StreamChannel {
                    sender,
                    preamble: RwLock::new(Preamble::default()),
                });
                debug!(path, "publish channel opened");
                Ok(())
            }
        }
    }

    /// Release a path. Safe to call for an unknown path.
    pub fn unpublish(&self, path: &str) {
        if self.streams.remove(path).is_some() {
            debug!(path, "publish channel closed");
        }
    }

    /// Drop every channel (listener restart).
    pub fn clear(&self) {
        self.streams.clear();
    }

    #[must_use]
    pub fn is_published(&self, path: &str) -> bool {
        self.streams.contains_key(path)
    }

    /// Subscribe a player to a published path.
    pub fn play(&self, path: &str) -> Result<PlayerFeed> {
        let channel = self
            .streams
            .get(path)
            .ok_or_else(|| Error::NotFound(format!("no publisher on '{path}'")))?;
        let preamble = channel.preamble.read().clone();
        Ok(PlayerFeed {
            receiver: channel.sender.subscribe(),
            metadata: preamble.metadata,
            video_sequence_header: preamble.video_sequence_header,
            audio_sequence_header: preamble.audio_sequence_header,
        })
    }

    /// Forward one message from the publisher to every player.
    pub fn broadcast(&self, path: &str, message: MediaMessage) {
        let Some(channel) = self.streams.get(path) else {
            return;
        };

        match &message {
            MediaMessage::Metadata(metadata) => {
                channel.preamble.write().metadata = Some(metadata.clone());
            }
            MediaMessage::Video { data, .. } if is_video_sequence_header(data) => {
                channel.preamble.write().video_sequence_header = Some(data.clone());
            }
            MediaMessage::Audio { data, .. } if is_audio_sequence_header(data) => {
                channel.preamble.write().audio_sequence_header = Some(data.clone());
            }
            _ => {}
        }

        // Send errors only mean there is no player right now.
        let _ = channel.sender.send(message);
    }
}

/// AVC sequence header: keyframe + AVC codec id in the first byte, packet
/// type 0 in the second.
fn is_video_sequence_header(data: &Bytes) -> bool {
    data.len() >= 2 && data[0] == 0x17 && data[1] == 0x00
}

/// AAC sequence header: AAC codec id nibble, packet type 0.
fn is_audio_sequence_header(data: &Bytes) -> bool {
    data.len() >= 2 && (data[0] >> 4) == 0x0a && data[1] == 0x00
}
