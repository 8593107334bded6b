use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use lib_trmnl::responder::DEFAULT_FIRMWARE_PATH;
use lib_trmnl::server::{ServerOptions, DEFAULT_MAX_UPLOAD_BYTES};

const DEFAULT_CONFIG_FILE: &str = "server_trmnl.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "TRMNL BYOS backend: device setup, display polling and image hosting", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "TRMNL_PORT", help = "Port to listen on for device and operator requests.")]
    pub port: Option<u16>,

    #[clap(long, env = "TRMNL_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "TRMNL_DATA_ROOT", help = "Directory holding one image file per screen.")]
    pub data_root: Option<PathBuf>,

    #[clap(long, env = "TRMNL_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "TRMNL_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "TRMNL_FIRMWARE_PATH", help = "Path of the firmware image advertised to devices.")]
    pub firmware_path: Option<String>,

    #[clap(long, env = "TRMNL_MAX_UPLOAD_BYTES", help = "Maximum accepted image upload size in bytes.")]
    pub max_upload_bytes: Option<usize>,

    #[clap(long, env = "TRMNL_TLS_CERT_PATH", help = "Path to the TLS certificate file.")]
    pub tls_cert_path: Option<PathBuf>,

    #[clap(long, env = "TRMNL_TLS_KEY_PATH", help = "Path to the TLS private key file.")]
    pub tls_key_path: Option<PathBuf>,
}

/// TLS certificate and key locations.
#[derive(Debug, Clone, PartialEq)]
pub struct TlsPaths {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Fully resolved process settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub tls: Option<TlsPaths>,
    pub server: ServerOptions,
}

impl Config {
    /// Built-in defaults, lowest precedence.
    pub fn defaults() -> Config {
        Config {
            port: Some(2300),
            data_root: Some(PathBuf::from("/data")),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            firmware_path: Some(DEFAULT_FIRMWARE_PATH.to_string()),
            max_upload_bytes: Some(DEFAULT_MAX_UPLOAD_BYTES),
            ..Default::default()
        }
    }

    // Merge two Config structs, where 'other' overrides 'self' for Some values
    pub fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            data_root: other.data_root.or(self.data_root),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            firmware_path: other.firmware_path.or(self.firmware_path),
            max_upload_bytes: other.max_upload_bytes.or(self.max_upload_bytes),
            tls_cert_path: other.tls_cert_path.or(self.tls_cert_path),
            tls_key_path: other.tls_key_path.or(self.tls_key_path),
        }
    }

    /// Fills anything still unset from `defaults()` and produces concrete settings.
    pub fn resolve(self) -> Settings {
        let merged = Config::defaults().merge(self);
        let port = merged.port.unwrap_or(2300);
        let tls = match (merged.tls_cert_path, merged.tls_key_path) {
            (Some(cert_path), Some(key_path)) => Some(TlsPaths {
                cert_path,
                key_path,
            }),
            _ => None,
        };

        Settings {
            port,
            log_dir: merged.log_dir.unwrap_or_else(|| PathBuf::from("./logs")),
            log_level: merged.log_level.unwrap_or_else(|| "info".to_string()),
            server: ServerOptions {
                data_root: merged.data_root.unwrap_or_else(|| PathBuf::from("/data")),
                firmware_path: merged
                    .firmware_path
                    .unwrap_or_else(|| DEFAULT_FIRMWARE_PATH.to_string()),
                max_upload_bytes: merged.max_upload_bytes.unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
                tls: tls.is_some(),
                fallback_authority: format!("localhost:{}", port),
            },
            tls,
        }
    }
}

/// Reads a JSON config file. `Err` carries a message to log once logging is up.
fn read_config_file(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let config_str = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config file {}: {}", path.display(), e))?;
    serde_json::from_str::<Config>(&config_str)
        .map(Some)
        .map_err(|e| format!("Failed to parse config file {}: {}", path.display(), e))
}

/// Layers defaults, the JSON config file and the parsed CLI/environment.
///
/// Returns the merged config and an optional warning about the config file.
pub fn load_config_from(cli_args: Config) -> (Config, Option<String>) {
    // 1. Load defaults
    let mut current_config = Config::defaults();

    // 2. Load from config file if present; the CLI may point elsewhere.
    let config_file_path = cli_args
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let warning = match read_config_file(&config_file_path) {
        Ok(Some(file_config)) => {
            current_config = current_config.merge(file_config);
            None
        }
        Ok(None) => None,
        Err(message) => Some(message),
    };

    // 3. CLI args (which include env vars) override the file.
    current_config = current_config.merge(cli_args);
    (current_config, warning)
}

/// Loads `.env` files, then the full configuration stack.
pub fn load_config() -> (Config, Option<String>) {
    let dotenv_os: &str = if cfg!(target_os = "windows") {
        ".env.windows"
    } else {
        ".env.linux"
    };
    dotenvy::dotenv().ok();
    dotenvy::from_filename(dotenv_os).ok();

    load_config_from(Config::parse())
}
