//! One task per accepted TCP connection: drives the RTMP handshake and
//! session state machine, enforces the publish key, and wires the
//! connection to the media bus as either the publisher or a player.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;

use rml_rtmp::chunk_io::Packet;
use rml_rtmp::handshake::{Handshake, HandshakeProcessResult, PeerType};
use rml_rtmp::sessions::{
    ServerSession, ServerSessionConfig, ServerSessionEvent, ServerSessionResult,
};
use rml_rtmp::time::RtmpTimestamp;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use recast_core::error::{Error, Result};

use crate::bus::{MediaBus, MediaMessage};
use crate::service::IngestService;

const READ_BUFFER_SIZE: usize = 4096;

enum Role {
    Pending,
    Publisher { path: String },
    Player { path: String, stream_id: u32 },
}

pub(crate) struct Connection {
    service: Arc<IngestService>,
    bus: Arc<MediaBus>,
    peer: SocketAddr,
    role: Role,
    feed: Option<broadcast::Receiver<MediaMessage>>,
}

impl Connection {
    pub(crate) fn new(service: Arc<IngestService>, bus: Arc<MediaBus>, peer: SocketAddr) -> Self {
        Self {
            service,
            bus,
            peer,
            role: Role::Pending,
            feed: None,
        }
    }

    /// Drive the connection until the socket closes or the protocol
    /// fails. Whatever the connection held (the publish slot) is released
    /// on the way out.
    pub(crate) async fn run(mut self, mut socket: TcpStream) -> Result<()> {
        let result = self.drive(&mut socket).await;
        self.cleanup();
        result
    }

    async fn drive(&mut self, socket: &mut TcpStream) -> Result<()> {
        self.service.on_pre_connect(&self.peer.to_string());

        let remaining = handshake(socket).await?;

        let config = ServerSessionConfig::new();
        let (mut session, initial_results) = ServerSession::new(config)
            .map_err(|e| Error::Internal(format!("rtmp session setup: {e:?}")))?;

        self.process_results(&mut session, socket, initial_results)
            .await?;
        if !remaining.is_empty() {
            let results = session
                .handle_input(&remaining)
                .map_err(|e| Error::Internal(format!("rtmp input: {e:?}")))?;
            self.process_results(&mut session, socket, results).await?;
        }

        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            tokio::select! {
                read = socket.read(&mut buf) => {
                    let n = read?;
                    if n == 0 {
                        break;
                    }
                    let results = session
                        .handle_input(&buf[..n])
                        .map_err(|e| Error::Internal(format!("rtmp input: {e:?}")))?;
                    self.process_results(&mut session, socket, results).await?;
                }
                message = recv_feed(&mut self.feed) => {
                    match message {
                        Ok(media) => {
                            self.forward_to_player(&mut session, socket, media).await?;
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            trace!(peer = %self.peer, skipped, "player lagging, frames dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            // Publisher went away; the player connection ends.
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Drain session results: write outbound packets, dispatch events.
    /// Event handling may enqueue further results (accept responses,
    /// preamble packets), processed in order.
    async fn process_results(
        &mut self,
        session: &mut ServerSession,
        socket: &mut TcpStream,
        results: Vec<ServerSessionResult>,
    ) -> Result<()> {
        let mut queue: VecDeque<ServerSessionResult> = results.into();
        while let Some(result) = queue.pop_front() {
            match result {
                ServerSessionResult::OutboundResponse(packet) => {
                    socket.write_all(&packet.bytes).await?;
                }
                ServerSessionResult::RaisedEvent(event) => {
                    let (more, outbound) = self.handle_event(session, event)?;
                    for packet in outbound {
                        socket.write_all(&packet.bytes).await?;
                    }
                    queue.extend(more);
                }
                ServerSessionResult::UnhandleableMessageReceived(_) => {}
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_lines)]
    fn handle_event(
        &mut self,
        session: &mut ServerSession,
        event: ServerSessionEvent,
    ) -> Result<(Vec<ServerSessionResult>, Vec<Packet>)> {
        match event {
            ServerSessionEvent::ConnectionRequested {
                request_id,
                app_name,
            } => {
                debug!(peer = %self.peer, app = %app_name, "connect request");
                let results = session
                    .accept_request(request_id)
                    .map_err(|e| Error::Internal(format!("accept connect: {e:?}")))?;
                Ok((results, Vec::new()))
            }

            ServerSessionEvent::PublishStreamRequested {
                request_id,
                app_name,
                stream_key,
                mode: _,
            } => {
                self.service.on_pre_publish(&app_name, &stream_key)?;

                let presented = stream_key.split('?').next().unwrap_or(&stream_key);
                let path = format!("/{app_name}/{presented}");
                self.bus.publish(&path).map_err(|e| {
                    warn!(path = %path, "second publisher refused");
                    e
                })?;

                let results = match session.accept_request(request_id) {
                    Ok(results) => results,
                    Err(e) => {
                        self.bus.unpublish(&path);
                        return Err(Error::Internal(format!("accept publish: {e:?}")));
                    }
                };
                self.role = Role::Publisher { path };
                self.service.on_post_publish(&app_name, presented);
                Ok((results, Vec::new()))
            }

            ServerSessionEvent::PublishStreamFinished { .. } => {
                let published = match &self.role {
                    Role::Publisher { path } => Some(path.clone()),
                    _ => None,
                };
                if let Some(path) = published {
                    self.bus.unpublish(&path);
                    self.service.on_done_publish();
                    self.role = Role::Pending;
                }
                Ok((Vec::new(), Vec::new()))
            }

            ServerSessionEvent::PlayStreamRequested {
                request_id,
                app_name,
                stream_key,
                stream_id,
                ..
            } => {
                let path = format!("/{app_name}/{stream_key}");
                let feed = self.bus.play(&path)?;

                let results = session
                    .accept_request(request_id)
                    .map_err(|e| Error::Internal(format!("accept play: {e:?}")))?;

                // Replay the stream preamble so a late joiner can start
                // decoding at the next keyframe.
                let mut outbound = Vec::new();
                if let Some(metadata) = &feed.metadata {
                    let packet = session
                        .send_metadata(stream_id, metadata)
                        .map_err(|e| Error::Internal(format!("send metadata: {e:?}")))?;
                    outbound.push(packet);
                }
                if let Some(header) = feed.video_sequence_header.clone() {
                    let packet = session
                        .send_video_data(stream_id, header, RtmpTimestamp::new(0), false)
                        .map_err(|e| Error::Internal(format!("send video header: {e:?}")))?;
                    outbound.push(packet);
                }
                if let Some(header) = feed.audio_sequence_header.clone() {
                    let packet = session
                        .send_audio_data(stream_id, header, RtmpTimestamp::new(0), false)
                        .map_err(|e| Error::Internal(format!("send audio header: {e:?}")))?;
                    outbound.push(packet);
                }

                debug!(peer = %self.peer, path = %path, "player attached");
                self.feed = Some(feed.receiver);
                self.role = Role::Player { path, stream_id };
                Ok((results, outbound))
            }

            ServerSessionEvent::PlayStreamFinished { .. } => {
                if matches!(self.role, Role::Player { .. }) {
                    self.feed = None;
                    self.role = Role::Pending;
                }
                Ok((Vec::new(), Vec::new()))
            }

            ServerSessionEvent::StreamMetadataChanged { metadata, .. } => {
                if let Role::Publisher { path } = &self.role {
                    self.bus.broadcast(path, MediaMessage::Metadata(metadata));
                }
                Ok((Vec::new(), Vec::new()))
            }

            ServerSessionEvent::AudioDataReceived {
                data, timestamp, ..
            } => {
                if let Role::Publisher { path } = &self.role {
                    self.bus
                        .broadcast(path, MediaMessage::Audio { data, timestamp });
                }
                Ok((Vec::new(), Vec::new()))
            }

            ServerSessionEvent::VideoDataReceived {
                data, timestamp, ..
            } => {
                if let Role::Publisher { path } = &self.role {
                    self.bus
                        .broadcast(path, MediaMessage::Video { data, timestamp });
                }
                Ok((Vec::new(), Vec::new()))
            }

            other => {
                trace!(peer = %self.peer, event = ?other, "unhandled rtmp event");
                Ok((Vec::new(), Vec::new()))
            }
        }
    }

    async fn forward_to_player(
        &mut self,
        session: &mut ServerSession,
        socket: &mut TcpStream,
        media: MediaMessage,
    ) -> Result<()> {
        let Role::Player { stream_id, .. } = self.role else {
            return Ok(());
        };

        let packet = match media {
            MediaMessage::Metadata(metadata) => session
                .send_metadata(stream_id, &metadata)
                .map_err(|e| Error::Internal(format!("send metadata: {e:?}")))?,
            MediaMessage::Audio { data, timestamp } => session
                .send_audio_data(stream_id, data, timestamp, true)
                .map_err(|e| Error::Internal(format!("send audio: {e:?}")))?,
            MediaMessage::Video { data, timestamp } => session
                .send_video_data(stream_id, data, timestamp, true)
                .map_err(|e| Error::Internal(format!("send video: {e:?}")))?,
        };
        socket.write_all(&packet.bytes).await?;
        Ok(())
    }

    /// Socket gone: release whatever this connection held.
    fn cleanup(&mut self) {
        let published = match &self.role {
            Role::Publisher { path } => Some(path.clone()),
            _ => None,
        };
        if let Some(path) = published {
            self.bus.unpublish(&path);
            self.service.on_done_publish();
            self.role = Role::Pending;
        }
    }
}

/// Run the server side of the RTMP handshake, returning any bytes that
/// arrived beyond it.
async fn handshake(socket: &mut TcpStream) -> Result<Vec<u8>> {
    let mut handshake = Handshake::new(PeerType::Server);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = socket.read(&mut buf).await?;
        if n == 0 {
            return Err(Error::Internal("connection closed during handshake".into()));
        }
        match handshake.process_bytes(&buf[..n]) {
            Ok(HandshakeProcessResult::InProgress { response_bytes }) => {
                if !response_bytes.is_empty() {
                    socket.write_all(&response_bytes).await?;
                }
            }
            Ok(HandshakeProcessResult::Completed {
                response_bytes,
                remaining_bytes,
            }) => {
                if !response_bytes.is_empty() {
                    socket.write_all(&response_bytes).await?;
                }
                return Ok(remaining_bytes);
            }
            Err(e) => {
                return Err(Error::Internal(format!("rtmp handshake: {e:?}")));
            }
        }
    }
}

/// Select arm for the player feed: pends forever until this connection
/// becomes a player.
async fn recv_feed(
    feed: &mut Option<broadcast::Receiver<MediaMessage>>,
) -> std::result::Result<MediaMessage, broadcast::error::RecvError> {
    match feed {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}
