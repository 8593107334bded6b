//! # lib_trmnl
//!
//! The device-state and image-serving core of a TRMNL BYOS backend.
//! E-ink terminals poll this service for setup information and for the
//! image they should render; an operator uploads the images.
//!
//! ## Modules:
//! - **`registry`**: In-memory map from screen id to `ScreenRecord`.
//! - **`image_store`**: One image file per screen id under a data root,
//!   with content-type driven extension selection and stale-file cleanup.
//! - **`responder`**: Builds the `/api/setup` and `/api/display` payloads.
//! - **`telemetry`**: Device log batches forwarded to a logging sink.
//! - **`server`** (feature `server`): The axum HTTP boundary.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

pub mod error;
pub mod image_store;
pub mod registry;
pub mod responder;
pub mod telemetry;

#[cfg(feature = "server")]
pub mod server;

// Re-export the primary types
pub use error::{Result, TrmnlError};
pub use image_store::{ImageFormat, ImageStore, StoredImage, StoredUpload};
pub use registry::{normalize_screen_id, ScreenRecord, ScreenRegistry};
pub use responder::{
    parse_refresh_rate, DisplayRequest, DisplayResponse, RequestOrigin, Responder, SetupRequest,
    SetupResponse,
};
pub use telemetry::{LogBatch, LogEntry, TelemetrySink, TracingSink};

/// Service name reported by the health endpoint.
pub const SERVICE_NAME: &str = "trmnl-byod-rust";
