//! # Telemetry Sink
//!
//! Device log batches (`POST /api/log`) are parsed leniently and handed to a
//! `TelemetrySink`. Nothing here can fail: a field of the wrong type is
//! dropped, not rejected, and an unreadable body yields an empty batch.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

/// LiPo battery minimum voltage (0%)
pub const BATTERY_MIN_MV: u32 = 3000;
/// LiPo battery maximum voltage (100%)
pub const BATTERY_MAX_MV: u32 = 4200;

/// Converts a battery voltage in volts to a 0-100 charge estimate.
pub fn battery_percentage(volts: f64) -> u8 {
    if !volts.is_finite() {
        return 0;
    }
    let mv = (volts * 1000.0).round();
    if mv <= f64::from(BATTERY_MIN_MV) {
        0
    } else if mv >= f64::from(BATTERY_MAX_MV) {
        100
    } else {
        ((mv - f64::from(BATTERY_MIN_MV)) * 100.0 / f64::from(BATTERY_MAX_MV - BATTERY_MIN_MV))
            as u8
    }
}

/// One firmware log record. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogEntry {
    pub id: Option<i64>,
    pub message: Option<String>,
    pub wifi_status: Option<String>,
    pub created_at: Option<i64>,
    pub sleep_duration: Option<i64>,
    pub refresh_rate: Option<i64>,
    pub free_heap_size: Option<i64>,
    pub max_alloc_size: Option<i64>,
    pub source_path: Option<String>,
    pub wake_reason: Option<String>,
    pub firmware_version: Option<String>,
    pub retry: Option<i64>,
    pub battery_voltage: Option<f64>,
    pub source_line: Option<i64>,
    pub special_function: Option<String>,
    pub wifi_signal: Option<i64>,
}

fn field_i64(value: &Value, key: &str) -> Option<i64> {
    match value.get(key)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn field_f64(value: &Value, key: &str) -> Option<f64> {
    match value.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn field_string(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

impl LogEntry {
    /// Builds an entry from arbitrary JSON, keeping only fields that can be
    /// read as their expected type.
    pub fn from_value(value: &Value) -> Self {
        if let Ok(entry) = serde_json::from_value::<LogEntry>(value.clone()) {
            return entry;
        }
        Self {
            id: field_i64(value, "id"),
            message: field_string(value, "message"),
            wifi_status: field_string(value, "wifi_status"),
            created_at: field_i64(value, "created_at"),
            sleep_duration: field_i64(value, "sleep_duration"),
            refresh_rate: field_i64(value, "refresh_rate"),
            free_heap_size: field_i64(value, "free_heap_size"),
            max_alloc_size: field_i64(value, "max_alloc_size"),
            source_path: field_string(value, "source_path"),
            wake_reason: field_string(value, "wake_reason"),
            firmware_version: field_string(value, "firmware_version"),
            retry: field_i64(value, "retry"),
            battery_voltage: field_f64(value, "battery_voltage"),
            source_line: field_i64(value, "source_line"),
            special_function: field_string(value, "special_function"),
            wifi_signal: field_i64(value, "wifi_signal"),
        }
    }
}

/// Request body of `POST /api/log`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogBatch {
    #[serde(default)]
    pub logs: Vec<LogEntry>,
}

impl LogBatch {
    /// Parses a request body without ever failing.
    ///
    /// Accepts `{"logs": [...]}`, a bare array of entries, or a single entry
    /// object. Anything else is an empty batch.
    pub fn parse_lenient(body: &[u8]) -> Self {
        let value: Value = match serde_json::from_slice(body) {
            Ok(value) => value,
            Err(e) => {
                if !body.is_empty() {
                    warn!("Unreadable log batch ({} bytes): {}", body.len(), e);
                }
                return Self::default();
            }
        };

        let entries = match &value {
            Value::Object(map) => match map.get("logs") {
                Some(Value::Array(items)) => items.iter().map(LogEntry::from_value).collect(),
                Some(_) => Vec::new(),
                None => vec![LogEntry::from_value(&value)],
            },
            Value::Array(items) => items.iter().map(LogEntry::from_value).collect(),
            _ => Vec::new(),
        };
        Self { logs: entries }
    }
}

/// Destination for device telemetry.
pub trait TelemetrySink: Send + Sync {
    /// Records a batch. Must not fail.
    fn record(&self, device_id: Option<&str>, entries: &[LogEntry]);
}

/// Default sink: one `tracing` event per entry under the `trmnl::device` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn record(&self, device_id: Option<&str>, entries: &[LogEntry]) {
        let device = device_id.unwrap_or(crate::responder::UNKNOWN);
        for entry in entries {
            info!(
                target: "trmnl::device",
                device,
                log_id = entry.id,
                created_at = entry.created_at,
                firmware_version = entry.firmware_version.as_deref(),
                wake_reason = entry.wake_reason.as_deref(),
                wifi_status = entry.wifi_status.as_deref(),
                wifi_signal = entry.wifi_signal,
                battery_voltage = entry.battery_voltage,
                battery_percent = entry.battery_voltage.map(battery_percentage),
                free_heap_size = entry.free_heap_size,
                refresh_rate = entry.refresh_rate,
                source = ?entry.source_path.as_deref().zip(entry.source_line),
                "{}",
                entry.message.as_deref().unwrap_or_default()
            );
        }
    }
}
