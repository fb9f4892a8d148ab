//! Server lifecycle management.
//!
//! Wires the module graph into the registry, serves the control plane,
//! and drives startup/shutdown: modules activate in registration order,
//! deactivate in reverse, and the HTTP listener is the last thing to go
//! down so operators can watch the teardown.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use recast_api::{create_router, AppState, TelemetryHub};
use recast_core::config::Config;
use recast_core::registry::{ModuleRegistry, ModuleSpec};
use recast_core::{ConfigStore, Result};
use recast_ingest::{IngestServer, IngestService, MediaBus};
use recast_relay::{GenericDriver, RelaySupervisor};

pub struct RecastServer {
    config: Config,
    store: Arc<ConfigStore>,
    registry: ModuleRegistry,
    state: AppState,
    hub: Arc<TelemetryHub>,
}

impl RecastServer {
    /// Construct the component graph and register it, dependency order.
    pub fn new(store: Arc<ConfigStore>, config: Config) -> Result<Self> {
        let ingest_service = Arc::new(IngestService::new(
            config.stream_manager.rtmp_server.clone(),
        ));
        let ingest_server = Arc::new(IngestServer::new(
            Arc::clone(&ingest_service),
            Arc::new(MediaBus::new()),
        ));

        let driver = Arc::new(GenericDriver);
        let supervisor = Arc::new(RelaySupervisor::new(Arc::clone(&ingest_service)));
        supervisor.set_drivers(vec![Arc::clone(&driver) as _]);
        supervisor.configure(config.stream_manager.platforms.clone());

        let hub = Arc::new(TelemetryHub::new(
            Arc::clone(&supervisor),
            Arc::clone(&ingest_service),
        ));

        let registry = ModuleRegistry::new();
        {
            let store = Arc::clone(&store);
            registry.register(
                ModuleSpec::new("config-store").exports(&["config"]),
                Box::new(move || Ok(Arc::clone(&store) as _)),
            )?;
        }
        {
            let ingest_server = Arc::clone(&ingest_server);
            registry.register(
                ModuleSpec::new("ingest").depends_on(&["config"]).exports(&["ingest"]),
                Box::new(move || Ok(Arc::clone(&ingest_server) as _)),
            )?;
        }
        registry.register(
            ModuleSpec::new("driver-generic").exports(&["destination-driver"]),
            Box::new(move || Ok(Arc::clone(&driver) as _)),
        )?;
        {
            let supervisor = Arc::clone(&supervisor);
            registry.register(
                ModuleSpec::new("relay-supervisor")
                    .depends_on(&["config", "ingest", "destination-driver"])
                    .exports(&["relay"]),
                Box::new(move || Ok(Arc::clone(&supervisor) as _)),
            )?;
        }
        {
            let hub = Arc::clone(&hub);
            registry.register(
                ModuleSpec::new("telemetry-bus")
                    .depends_on(&["ingest", "relay"])
                    .exports(&["telemetry"]),
                Box::new(move || Ok(Arc::clone(&hub) as _)),
            )?;
        }

        let state = AppState::new(
            Arc::clone(&store),
            supervisor,
            ingest_server,
            Arc::clone(&hub),
        );

        Ok(Self {
            config,
            store,
            registry,
            state,
            hub,
        })
    }

    /// Pin the transcoder binary found by preflight so relay starts skip
    /// the PATH search.
    pub fn pin_transcoder(&self, path: std::path::PathBuf) {
        self.state.supervisor.set_transcoder_path(path);
    }

    /// Start everything and block until a shutdown signal.
    pub async fn start(self) -> Result<()> {
        // Modules come up in dependency order; the first failure aborts.
        self.registry.initialize_all().await?;
        self.registry.activate_all().await?;
        self.hub.start();

        // Control plane, last up and last down.
        let addr = format!("{}:{}", self.config.ui.host, self.config.ui.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!(addr = %addr, "control plane listening");

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let router = create_router(self.state.clone());
        let http_handle: JoinHandle<()> = tokio::spawn(async move {
            let serve = axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });
            if let Err(e) = serve.await {
                error!(error = %e, "control plane server failed");
            }
        });

        // Hot-reload: the watcher hands fresh configs to an apply task.
        let (reload_tx, reload_rx) = mpsc::unbounded_channel();
        let _watch_handle = self.store.watch(move |config| {
            let _ = reload_tx.send(config);
        });
        let apply_handle = tokio::spawn(apply_config_changes(self.state.clone(), reload_rx));

        info!("recast started");
        shutdown_signal().await;
        info!("shutdown signal received, stopping");

        // Reverse teardown: bus, supervisor (children signaled), ingest.
        apply_handle.abort();
        for (module, error) in self.registry.deactivate_all().await {
            warn!(module = %module, error = %error, "deactivation failed");
        }

        // HTTP goes down only after every module reported deactivated.
        let _ = shutdown_tx.send(true);
        if let Err(e) = http_handle.await {
            if !e.is_cancelled() {
                warn!(error = %e, "control plane task failed during shutdown");
            }
        }

        for (module, error) in self.registry.destroy_all().await {
            warn!(module = %module, error = %error, "destroy failed");
        }

        info!("recast stopped");
        Ok(())
    }
}

/// Apply a reloaded configuration: destinations flow to the supervisor,
/// caches drop, and the ingest listener rebinds only when its endpoint
/// tuple changed.
async fn apply_config_changes(
    state: AppState,
    mut reload_rx: mpsc::UnboundedReceiver<Config>,
) {
    while let Some(config) = reload_rx.recv().await {
        info!("applying reloaded configuration");
        state
            .supervisor
            .configure(config.stream_manager.platforms.clone());
        state.platforms_cache.invalidate();

        let current = state.ingest.config();
        let next = &config.stream_manager.rtmp_server;
        if current.endpoint_tuple() != next.endpoint_tuple() {
            info!("ingest endpoint changed on disk, restarting listener");
            if let Err(e) = state.ingest_server.restart(next.clone()).await {
                error!(error = %e, "failed to restart ingest after reload");
            }
        }

        state.hub.broadcast_status();
    }
}

/// Graceful on SIGINT and, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => error!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
