//! Helpers shared by the end-to-end tests: a real server on an ephemeral
//! port with its data root in a temporary directory.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use lib_trmnl::server::{self, AppState, ServerOptions};
use lib_trmnl::telemetry::{LogEntry, TelemetrySink};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Smallest useful JPEG: SOI, a JFIF APP0 segment, EOI.
pub const TINY_JPEG: &[u8] = &[
    0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00, 0x01, 0x01, 0x00, 0x00,
    0x01, 0x00, 0x01, 0x00, 0x00, 0xFF, 0xD9,
];

/// PNG signature followed by an empty IEND chunk.
pub const TINY_PNG: &[u8] = &[
    0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x00, b'I', b'E', b'N',
    b'D', 0xAE, 0x42, 0x60, 0x82,
];

/// Telemetry sink that keeps every entry it receives.
#[derive(Default)]
pub struct CapturingSink {
    pub records: Mutex<Vec<(Option<String>, LogEntry)>>,
}

impl CapturingSink {
    pub fn entries(&self) -> Vec<(Option<String>, LogEntry)> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl TelemetrySink for CapturingSink {
    fn record(&self, device_id: Option<&str>, entries: &[LogEntry]) {
        if let Ok(mut records) = self.records.lock() {
            for entry in entries {
                records.push((device_id.map(str::to_string), entry.clone()));
            }
        }
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    pub telemetry: Arc<CapturingSink>,
    pub data_dir: TempDir,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<std::io::Result<()>>>,
}

impl TestServer {
    /// Binds 127.0.0.1:0 and serves the full router in a background task.
    pub async fn start() -> std::io::Result<TestServer> {
        let data_dir = tempfile::tempdir()?;
        let options = ServerOptions {
            data_root: data_dir.path().join("screens"),
            ..Default::default()
        };
        let telemetry = Arc::new(CapturingSink::default());
        let state = AppState::open(&options)
            .await
            .map_err(std::io::Error::other)?
            .with_telemetry(telemetry.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (tx, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(server::serve(listener, state.clone(), async move {
            let _ = rx.await;
        }));

        Ok(TestServer {
            addr,
            state,
            telemetry,
            data_dir,
            shutdown: Some(tx),
            task: Some(task),
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Signals graceful shutdown and waits for the server task.
    pub async fn stop(mut self) -> std::io::Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.take() {
            Some(task) => task.await.map_err(std::io::Error::other)?,
            None => Ok(()),
        }
    }
}
