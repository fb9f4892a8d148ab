//! The ingest TCP acceptor.
//!
//! Binds the configured `(host, port)`, caps concurrent connections, and
//! spawns one [`Connection`] task per accepted socket. Media fan-out and
//! publish-state live in [`MediaBus`] / [`IngestService`]; this type only
//! owns the listener.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use recast_core::config::RtmpServerConfig;
use recast_core::error::Result;
use recast_core::registry::Module;

use crate::bus::MediaBus;
use crate::connection::Connection;
use crate::service::IngestService;

/// Default cap on concurrent ingest connections.
const DEFAULT_MAX_CONNECTIONS: usize = 256;

pub struct IngestServer {
    service: Arc<IngestService>,
    bus: Arc<MediaBus>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    max_connections: usize,
}

impl IngestServer {
    #[must_use]
    pub fn new(service: Arc<IngestService>, bus: Arc<MediaBus>) -> Self {
        Self {
            service,
            bus,
            accept_task: Mutex::new(None),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }

    #[must_use]
    pub fn service(&self) -> Arc<IngestService> {
        Arc::clone(&self.service)
    }

    #[must_use]
    pub fn bus(&self) -> Arc<MediaBus> {
        Arc::clone(&self.bus)
    }

    /// Bind and start accepting. Calling on a running server is a no-op.
    /// A bind failure (port in use) is returned to the caller.
    pub async fn start(&self) -> Result<()> {
        {
            let guard = self.accept_task.lock();
            if guard.as_ref().is_some_and(|t| !t.is_finished()) {
                debug!("ingest already running");
                return Ok(());
            }
        }

        let config = self.service.config();
        if !config.enabled {
            info!("ingest disabled by configuration");
            return Ok(());
        }

        let addr = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&addr).await?;
        info!(
            url = %self.service.surfaced_url(),
            max_connections = self.max_connections,
            "RTMP ingest listening"
        );

        let service = Arc::clone(&self.service);
        let bus = Arc::clone(&self.bus);
        let max_connections = self.max_connections;
        let task = tokio::spawn(async move {
            let active = Arc::new(AtomicUsize::new(0));
            loop {
                match listener.accept().await {
                    Ok((socket, peer)) => {
                        let current = active.load(Ordering::Relaxed);
                        if current >= max_connections {
                            warn!(
                                peer = %peer,
                                current,
                                max_connections,
                                "ingest connection rejected: at capacity"
                            );
                            drop(socket);
                            continue;
                        }
                        let _ = socket.set_nodelay(true);

                        active.fetch_add(1, Ordering::Relaxed);
                        let counter = Arc::clone(&active);
                        let connection =
                            Connection::new(Arc::clone(&service), Arc::clone(&bus), peer);
                        tokio::spawn(async move {
                            if let Err(e) = connection.run(socket).await {
                                debug!(peer = %peer, error = %e, "ingest session ended");
                            }
                            counter.fetch_sub(1, Ordering::Relaxed);
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "ingest accept failed");
                    }
                }
            }
        });

        *self.accept_task.lock() = Some(task);
        Ok(())
    }

    /// Stop accepting and drop every routed stream. Safe when not running.
    pub fn shutdown(&self) {
        if let Some(task) = self.accept_task.lock().take() {
            task.abort();
            info!("ingest listener stopped");
        }
        self.bus.clear();
        self.service.reset_state();
    }

    /// Apply a new listener configuration: tear down, swap, rebind.
    pub async fn restart(&self, config: RtmpServerConfig) -> Result<()> {
        self.shutdown();
        self.service.reconfigure(config);
        self.start().await
    }
}

#[async_trait]
impl Module for IngestServer {
    async fn activate(&self) -> Result<()> {
        self.start().await
    }

    async fn deactivate(&self) -> Result<()> {
        self.shutdown();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_on(port: u16) -> IngestServer {
        let config = RtmpServerConfig {
            host: "127.0.0.1".into(),
            port,
            app_name: "live".into(),
            stream_key: "obs".into(),
            enabled: true,
        };
        IngestServer::new(
            Arc::new(IngestService::new(config)),
            Arc::new(MediaBus::new()),
        )
    }

    #[tokio::test]
    async fn repeat_start_is_a_noop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        let server = server_on(port);
        server.start().await.expect("first start");
        server.start().await.expect("second start is a no-op");
        server.shutdown();
    }

    #[tokio::test]
    async fn bind_failure_is_surfaced() {
        let holder = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = holder.local_addr().expect("addr").port();

        let server = server_on(port);
        assert!(server.start().await.is_err());
    }

    #[tokio::test]
    async fn disabled_ingest_does_not_bind() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();

        // The port is still held, but a disabled ingest never binds.
        let config = RtmpServerConfig {
            host: "127.0.0.1".into(),
            port,
            enabled: false,
            ..RtmpServerConfig::default()
        };
        let server = IngestServer::new(
            Arc::new(IngestService::new(config)),
            Arc::new(MediaBus::new()),
        );
        server.start().await.expect("no bind attempted");
    }
}
