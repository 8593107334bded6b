//! # HTTP Boundary
//!
//! The axum surface of the BYOS backend.
//!
//! | Method & Path | Purpose |
//! |---|---|
//! | `GET /` | Health marker |
//! | `GET /api/setup` | Device registration |
//! | `GET /api/display` | Image URL and refresh metadata |
//! | `POST /api/log` (`/api/logs`) | Device telemetry |
//! | `POST /api/screens/{id}/image` | Operator image upload |
//! | `GET /screens/{id}.jpg` / `.png` | Image download |

pub mod error;
pub mod handlers;
pub mod middleware;

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tracing::info;

use crate::error::Result;
use crate::image_store::ImageStore;
use crate::registry::ScreenRegistry;
use crate::responder::{Responder, DEFAULT_FIRMWARE_PATH};
use crate::telemetry::{TelemetrySink, TracingSink};

pub use error::AppError;

/// Default request body limit for uploads (10 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Settings the HTTP boundary needs from process configuration.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub data_root: PathBuf,
    pub firmware_path: String,
    pub max_upload_bytes: usize,
    /// Whether the listener terminates TLS; picks the default URL scheme.
    pub tls: bool,
    /// Authority used for absolute URLs when a request carries no `Host`.
    pub fallback_authority: String,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("/data"),
            firmware_path: DEFAULT_FIRMWARE_PATH.to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            tls: false,
            fallback_authority: "localhost".to_string(),
        }
    }
}

/// # Application State
///
/// Shared by every handler. Cloning is cheap; all components sit behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ScreenRegistry>,
    pub store: Arc<ImageStore>,
    pub responder: Responder,
    pub telemetry: Arc<dyn TelemetrySink>,
    pub tls: bool,
    pub fallback_authority: String,
    pub max_upload_bytes: usize,
}

impl AppState {
    /// Opens the image store under `options.data_root` and wires a fresh
    /// registry, responder and the tracing telemetry sink around it.
    pub async fn open(options: &ServerOptions) -> Result<Self> {
        let registry = Arc::new(ScreenRegistry::new());
        let store = Arc::new(ImageStore::open(&options.data_root).await?);
        let responder =
            Responder::new(Arc::clone(&registry)).with_firmware_path(options.firmware_path.as_str());

        Ok(Self {
            registry,
            store,
            responder,
            telemetry: Arc::new(TracingSink),
            tls: options.tls,
            fallback_authority: options.fallback_authority.clone(),
            max_upload_bytes: options.max_upload_bytes,
        })
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }
}

/// Builds the application router with request logging and the upload limit.
pub fn router(state: AppState) -> Router {
    let body_limit = DefaultBodyLimit::max(state.max_upload_bytes);

    Router::new()
        .route("/", get(handlers::health))
        .route("/api/setup", get(handlers::setup))
        .route("/api/display", get(handlers::display))
        .route("/api/log", post(handlers::log))
        .route("/api/logs", post(handlers::log))
        .route("/api/screens/{id}/image", post(handlers::upload_image))
        .route("/screens/{file}", get(handlers::serve_image))
        .layer(body_limit)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::log_requests,
        ))
        .with_state(state)
}

/// Serves the router on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!("HTTP server listening on http://{}", addr);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
