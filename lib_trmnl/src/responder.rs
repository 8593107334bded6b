//! # Setup/Display Responder
//!
//! Builds the device-facing payloads for `GET /api/setup` and
//! `GET /api/display` from registry state. Never fails: missing headers and
//! unparseable values fall back to documented defaults.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::image_store::{image_url_path, ImageFormat};
use crate::registry::{normalize_screen_id, ScreenRecord, ScreenRegistry};

/// Value used for any absent device header.
pub const UNKNOWN: &str = "unknown";
/// Refresh rate returned when the device sends none (or garbage).
pub const DEFAULT_REFRESH_RATE: i32 = 100;
/// Firmware version advertised to devices.
pub const FIRMWARE_VERSION: &str = "1.0.0";
/// Static firmware download path, made absolute per request.
pub const DEFAULT_FIRMWARE_PATH: &str = "/firmware/latest.bin";
pub const SETUP_MESSAGE: &str = "Welcome to TRMNL BYOS";

/// Parses a `REFRESH_RATE` header value, defaulting to `DEFAULT_REFRESH_RATE`.
pub fn parse_refresh_rate(header: Option<&str>) -> i32 {
    header
        .and_then(|value| value.trim().parse::<i32>().ok())
        .unwrap_or(DEFAULT_REFRESH_RATE)
}

/// Scheme and authority of the incoming request, used to make URLs absolute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOrigin {
    pub scheme: String,
    /// `host[:port]`
    pub authority: String,
}

impl RequestOrigin {
    pub fn new(scheme: impl Into<String>, authority: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            authority: authority.into(),
        }
    }

    /// Prefixes `path` (which must start with `/`) with this origin.
    pub fn absolute(&self, path: &str) -> String {
        format!("{}://{}{}", self.scheme, self.authority, path)
    }
}

/// Headers of a setup request.
#[derive(Debug, Clone, Default)]
pub struct SetupRequest {
    pub device_id: Option<String>,
    pub model: Option<String>,
    pub firmware: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupResponse {
    /// The device id exactly as sent.
    pub api_key: String,
    /// Upper-cased screen id.
    pub friendly_id: String,
    /// Relative image URL; always guesses `.jpg`.
    pub image_url: String,
    pub message: String,
}

/// Headers of a display poll.
#[derive(Debug, Clone, Default)]
pub struct DisplayRequest {
    pub device_id: Option<String>,
    pub refresh_rate: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayResponse {
    pub filename: String,
    pub firmware_url: String,
    pub firmware_version: String,
    pub image_url: String,
    pub image_url_timeout: u32,
    pub refresh_rate: i32,
    pub reset_firmware: bool,
    pub special_function: String,
    pub update_firmware: bool,
}

/// # Responder
///
/// Holds a handle to the shared registry plus the static firmware path.
#[derive(Debug, Clone)]
pub struct Responder {
    registry: Arc<ScreenRegistry>,
    firmware_path: String,
}

impl Responder {
    pub fn new(registry: Arc<ScreenRegistry>) -> Self {
        Self {
            registry,
            firmware_path: DEFAULT_FIRMWARE_PATH.to_string(),
        }
    }

    pub fn with_firmware_path(mut self, firmware_path: impl Into<String>) -> Self {
        self.firmware_path = firmware_path.into();
        self
    }

    pub fn registry(&self) -> &Arc<ScreenRegistry> {
        &self.registry
    }

    /// Registers the device if unseen and returns its setup payload.
    pub async fn setup(&self, request: &SetupRequest) -> SetupResponse {
        let device_id = request.device_id.as_deref().unwrap_or(UNKNOWN);
        let model = request.model.as_deref().unwrap_or(UNKNOWN);
        let firmware = request.firmware.as_deref().unwrap_or(UNKNOWN);

        let record = self
            .registry
            .get_or_create_with(device_id, |screen_id| {
                ScreenRecord::new(screen_id)
                    .with_description(format!("Model {}, Firmware {}", model, firmware))
            })
            .await;
        debug!(device_id, screen_id = %record.id, "Setup");

        SetupResponse {
            api_key: device_id.to_string(),
            friendly_id: record.id.to_uppercase(),
            image_url: image_url_path(&record.id, ImageFormat::Jpeg),
            message: SETUP_MESSAGE.to_string(),
        }
    }

    /// Returns the display payload for a polling device, with URLs made
    /// absolute against `origin`.
    pub async fn display(&self, request: &DisplayRequest, origin: &RequestOrigin) -> DisplayResponse {
        let device_id = request.device_id.as_deref().unwrap_or(UNKNOWN);
        let screen_id = normalize_screen_id(device_id);
        let record = self.registry.get_or_create(&screen_id).await;

        let image_path = record
            .image_path
            .unwrap_or_else(|| image_url_path(&screen_id, ImageFormat::Jpeg));
        let filename = image_path
            .rsplit('/')
            .next()
            .unwrap_or(image_path.as_str())
            .to_string();
        let refresh_rate = parse_refresh_rate(request.refresh_rate.as_deref());
        debug!(device_id, %screen_id, %image_path, refresh_rate, "Display poll");

        DisplayResponse {
            filename,
            firmware_url: origin.absolute(&self.firmware_path),
            firmware_version: FIRMWARE_VERSION.to_string(),
            image_url: origin.absolute(&image_path),
            image_url_timeout: 0,
            refresh_rate,
            reset_firmware: false,
            special_function: "none".to_string(),
            update_firmware: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn responder() -> Responder {
        Responder::new(Arc::new(ScreenRegistry::new()))
    }

    fn origin() -> RequestOrigin {
        RequestOrigin::new("http", "localhost:2300")
    }

    #[test]
    fn test_parse_refresh_rate() {
        assert_eq!(parse_refresh_rate(None), 100);
        assert_eq!(parse_refresh_rate(Some("900")), 900);
        assert_eq!(parse_refresh_rate(Some(" 60 ")), 60);
        assert_eq!(parse_refresh_rate(Some("fast")), 100);
        assert_eq!(parse_refresh_rate(Some("")), 100);
        assert_eq!(parse_refresh_rate(Some("99999999999")), 100);
    }

    #[tokio::test]
    async fn test_setup_echoes_and_normalizes() {
        let responder = responder();
        let response = responder
            .setup(&SetupRequest {
                device_id: Some("Aa:Bb:Cc".to_string()),
                model: Some("og".to_string()),
                firmware: Some("1.5.2".to_string()),
            })
            .await;

        assert_eq!(response.api_key, "Aa:Bb:Cc");
        assert_eq!(response.friendly_id, "AA:BB:CC");
        assert_eq!(response.image_url, "/screens/aa:bb:cc.jpg");
        assert!(response.message.contains("TRMNL"));

        let record = responder.registry().get("aa:bb:cc").await.unwrap();
        assert_eq!(record.description.as_deref(), Some("Model og, Firmware 1.5.2"));
    }

    #[tokio::test]
    async fn test_setup_defaults_missing_headers() {
        let responder = responder();
        let response = responder.setup(&SetupRequest::default()).await;

        assert_eq!(response.api_key, "unknown");
        assert_eq!(response.friendly_id, "UNKNOWN");
        let record = responder.registry().get("unknown").await.unwrap();
        assert_eq!(
            record.description.as_deref(),
            Some("Model unknown, Firmware unknown")
        );
    }

    #[tokio::test]
    async fn test_setup_is_case_insensitive() {
        let responder = responder();
        let upper = SetupRequest {
            device_id: Some("AA:BB".to_string()),
            ..Default::default()
        };
        let lower = SetupRequest {
            device_id: Some("aa:bb".to_string()),
            ..Default::default()
        };
        let a = responder.setup(&upper).await;
        let b = responder.setup(&lower).await;

        assert_eq!(a.friendly_id, b.friendly_id);
        assert_eq!(responder.registry().len().await, 1);
    }

    #[tokio::test]
    async fn test_display_before_upload_uses_jpg_guess() {
        let responder = responder();
        let response = responder
            .display(
                &DisplayRequest {
                    device_id: Some("AA:BB:CC".to_string()),
                    refresh_rate: None,
                },
                &origin(),
            )
            .await;

        assert_eq!(response.filename, "aa:bb:cc.jpg");
        assert_eq!(response.image_url, "http://localhost:2300/screens/aa:bb:cc.jpg");
        assert_eq!(
            response.firmware_url,
            "http://localhost:2300/firmware/latest.bin"
        );
        assert_eq!(response.refresh_rate, 100);
        assert_eq!(response.firmware_version, "1.0.0");
        assert_eq!(response.image_url_timeout, 0);
        assert_eq!(response.special_function, "none");
        assert!(!response.reset_firmware);
        assert!(!response.update_firmware);
        assert!(responder.registry().get("aa:bb:cc").await.is_some());
    }

    #[tokio::test]
    async fn test_display_uses_registered_image_path() {
        let responder = responder().with_firmware_path("/fw/trmnl.bin");
        responder
            .registry()
            .update("dev", |old| old.with_image("/screens/dev.png", Utc::now()))
            .await;

        let response = responder
            .display(
                &DisplayRequest {
                    device_id: Some("DEV".to_string()),
                    refresh_rate: Some("1800".to_string()),
                },
                &RequestOrigin::new("https", "byos.example.com"),
            )
            .await;

        assert_eq!(response.filename, "dev.png");
        assert_eq!(response.image_url, "https://byos.example.com/screens/dev.png");
        assert_eq!(response.firmware_url, "https://byos.example.com/fw/trmnl.bin");
        assert_eq!(response.refresh_rate, 1800);
    }

    #[test]
    fn test_display_response_field_names() {
        let response = DisplayResponse {
            filename: "a.jpg".to_string(),
            firmware_url: "http://h/firmware/latest.bin".to_string(),
            firmware_version: FIRMWARE_VERSION.to_string(),
            image_url: "http://h/screens/a.jpg".to_string(),
            image_url_timeout: 0,
            refresh_rate: 100,
            reset_firmware: false,
            special_function: "none".to_string(),
            update_firmware: false,
        };
        let json = serde_json::to_value(&response).unwrap();
        for key in [
            "filename",
            "firmware_url",
            "firmware_version",
            "image_url",
            "image_url_timeout",
            "refresh_rate",
            "reset_firmware",
            "special_function",
            "update_firmware",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
    }
}
