use anyhow::{Context, Result};
use axum_server::Handle;
use axum_server::tls_rustls::RustlsConfig;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_graceful::ShutdownGuard;
use tracing::info;

use lib_trmnl::server::{AppState, router};

use crate::trmnl_logic::config::TlsPaths;

/// Serves the router over HTTPS on an already bound listener until the
/// shutdown guard is cancelled.
pub async fn serve_tls(
    listener: TcpListener,
    paths: &TlsPaths,
    state: AppState,
    guard: ShutdownGuard,
) -> Result<()> {
    // Rustls 0.23+ requires an explicit crypto provider. A second install
    // attempt fails harmlessly.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let tls_config = RustlsConfig::from_pem_file(&paths.cert_path, &paths.key_path)
        .await
        .with_context(|| {
            format!(
                "Failed to load TLS configuration from {} / {}",
                paths.cert_path.display(),
                paths.key_path.display()
            )
        })?;

    let addr = listener.local_addr()?;
    let std_listener = listener.into_std()?;

    let handle = Handle::new();
    let shutdown_handle = handle.clone();
    tokio::spawn(async move {
        guard.cancelled().await;
        info!("HTTPS server shutting down.");
        shutdown_handle.graceful_shutdown(Some(Duration::from_secs(5)));
    });

    info!("HTTPS server listening on https://{}", addr);
    axum_server::from_tcp_rustls(std_listener, tls_config)
        .handle(handle)
        .serve(router(state).into_make_service())
        .await?;
    Ok(())
}
