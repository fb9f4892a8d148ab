mod server;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};

use recast_core::{logging, preflight, ConfigStore, Error};

use server::RecastServer;

/// Live-video fan-out relay: one RTMP ingest, many destinations.
#[derive(Debug, Parser)]
#[command(name = "recast", version, about)]
struct Cli {
    /// Path to the YAML configuration file. Created on first save.
    #[arg(long, short, env = "CONFIG_PATH", default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // 1. Load configuration (defaults when the file is absent).
    let store = Arc::new(ConfigStore::new(&cli.config));
    let config = match store.load().await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("fatal: failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    // 2. Initialize logging.
    if let Err(e) = logging::init_logging(&config.logging) {
        eprintln!("fatal: failed to initialize logging: {e}");
        std::process::exit(1);
    }
    info!(config = %cli.config.display(), "recast starting");

    // 3. Preflight: listen ports are fatal, a missing transcoder is not.
    let report = match preflight::run(&config).await {
        Ok(report) => report,
        Err(e @ Error::PortUnavailable { .. }) => {
            error!("{e}");
            std::process::exit(1);
        }
        Err(e) => {
            error!(error = %e, "preflight failed");
            std::process::exit(1);
        }
    };

    // 4. Build the component graph.
    let server = match RecastServer::new(Arc::clone(&store), config) {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "failed to assemble server");
            std::process::exit(1);
        }
    };
    if let Some(transcoder) = report.transcoder {
        server.pin_transcoder(transcoder);
    } else {
        warn!("relay starts will fail until ffmpeg is installed");
    }

    // 5. Run until a shutdown signal.
    if let Err(e) = server.start().await {
        error!(error = %e, "server failed");
        std::process::exit(1);
    }
}
