//! # TRMNL BYOS Server
//!
//! Backend for TRMNL e-ink terminals running in "bring your own server"
//! mode. Devices poll `/api/setup` and `/api/display`, push telemetry to
//! `/api/log`, and download the image an operator uploaded for them.
//!
//! ## Functionality:
//! - **Screen Registry**: In-memory device state, keyed by lower-cased id.
//! - **Image Hosting**: One image per screen under the data root, served at
//!   `/screens/{id}.jpg|png`.
//! - **Absolute URLs**: Display responses point back at the host the device
//!   used to reach the server.
//! - **Logging**: `tracing` to the console and to a daily rotating JSON file.
//! - **Graceful Shutdown**: `tokio-graceful` with a 10 second limit.
//! - **Configuration**: Defaults, `server_trmnl.conf`, environment
//!   (`TRMNL_*`, `.env`) and CLI flags, in increasing precedence.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_graceful::{Shutdown, ShutdownGuard};
use tracing::{error, info, warn};

use lib_trmnl::server::{self, AppState};

mod trmnl_logic;
use trmnl_logic::config::{self, Settings};
use trmnl_logic::{logger, tls};

#[tokio::main]
async fn main() -> Result<()> {
    let (config, config_warning) = config::load_config();
    let settings = config.resolve();

    // The guard must live until main returns so buffered log lines are flushed.
    let _log_guard = logger::setup_logging(&settings.log_dir, &settings.log_level)?;
    if let Some(message) = config_warning {
        warn!("{}", message);
    }
    info!(?settings, "Configuration loaded");

    let state = AppState::open(&settings.server).await.with_context(|| {
        format!(
            "Failed to open data root {}",
            settings.server.data_root.display()
        )
    })?;

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    let shutdown: Shutdown = Shutdown::default();
    shutdown.spawn_task_fn(move |guard| run_server(settings, listener, state, guard));

    match shutdown.shutdown_with_limit(Duration::from_secs(10)).await {
        Ok(elapsed) => {
            info!(
                "shutdown: gracefully {}s after shutdown signal received",
                elapsed.as_secs_f64()
            );
        }
        Err(e) => {
            info!("shutdown: forcefully due to timeout: {}", e);
        }
    }

    info!("Bye!");
    Ok(())
}

/// Runs the HTTP or HTTPS listener until the shutdown guard is cancelled.
async fn run_server(settings: Settings, listener: TcpListener, state: AppState, guard: ShutdownGuard) {
    let result = match &settings.tls {
        Some(paths) => tls::serve_tls(listener, paths, state, guard).await,
        None => {
            let shutdown_guard = guard.clone();
            server::serve(listener, state, async move {
                shutdown_guard.cancelled().await;
                info!("Signal received: initiate graceful shutdown");
            })
            .await
            .map_err(anyhow::Error::from)
        }
    };

    if let Err(e) = result {
        error!("Server stopped with error: {:#}", e);
    }
}
