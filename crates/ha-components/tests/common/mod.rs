//! Common test utilities for the integration tests
//!
//! A fake apcupsd NIS on a loopback port and a small test host wiring
//! config entries, config flows and the apcupsd integration together.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use ha_components::apcupsd::{nis_client_factory, ApcUpsdIntegration};
use ha_config_entries::{ConfigEntries, FlowManager, FlowResult, Storage};
use serde_json::Value;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const UPS_STATUS: &str = "APC      : 001,036,0879\n\
                              DATE     : 2022-01-03 12:00:00 +0100\n\
                              HOSTNAME : nas\n\
                              MODEL    : Back-UPS ES 600\n\
                              STATUS   : ONLINE\n\
                              LINEV    : 230.0 Volts\n\
                              LOADPCT  : 14.0 Percent\n\
                              BCHARGE  : 100.0 Percent\n\
                              TIMELEFT : 41.5 Minutes\n\
                              STATFLAG : 0x05000008\n\
                              SERIALNO : AB1234\n\
                              END APC  : 2022-01-03 12:00:05 +0100\n";

/// Log output for failing tests, `RUST_LOG` filtered
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Fake apcupsd NIS.
///
/// Answers every `status` request with the current status text, or hangs
/// up without answering while the status is `None`.
pub struct FakeNis {
    pub port: u16,
    status: Arc<Mutex<Option<String>>>,
    requests: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl FakeNis {
    pub async fn start(status: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let status = Arc::new(Mutex::new(Some(status.to_string())));
        let requests = Arc::new(AtomicUsize::new(0));

        let served = status.clone();
        let counter = requests.clone();
        let task = tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let served = served.clone();
                let counter = counter.clone();
                tokio::spawn(async move {
                    let Ok(len) = socket.read_u16().await else {
                        return;
                    };
                    let mut command = vec![0u8; len as usize];
                    if socket.read_exact(&mut command).await.is_err() || command != b"status" {
                        return;
                    }
                    counter.fetch_add(1, Ordering::SeqCst);

                    let raw = served.lock().unwrap().clone();
                    let Some(raw) = raw else {
                        return;
                    };
                    for line in raw.split_inclusive('\n') {
                        let _ = socket.write_u16(line.len() as u16).await;
                        let _ = socket.write_all(line.as_bytes()).await;
                    }
                    let _ = socket.write_u16(0).await;
                });
            }
        });

        Self {
            port,
            status,
            requests,
            task,
        }
    }

    pub fn set_status(&self, status: Option<&str>) {
        *self.status.lock().unwrap() = status.map(str::to_string);
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl Drop for FakeNis {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Config entries, flows and the apcupsd integration on a temp directory
pub struct TestHass {
    pub dir: TempDir,
    pub entries: Arc<ConfigEntries>,
    pub flows: FlowManager,
    pub apcupsd: Arc<ApcUpsdIntegration>,
}

impl TestHass {
    pub fn new() -> Self {
        init_tracing();
        let dir = TempDir::new().unwrap();
        Self::in_dir(dir)
    }

    /// Fresh host over an existing config directory
    pub fn in_dir(dir: TempDir) -> Self {
        let entries = Arc::new(ConfigEntries::new(Arc::new(Storage::new(dir.path()))));
        let flows = FlowManager::new(entries.clone());
        let apcupsd = Arc::new(ApcUpsdIntegration::new(nis_client_factory()));
        apcupsd.register(&entries, &flows);

        Self {
            dir,
            entries,
            flows,
            apcupsd,
        }
    }

    /// Run the apcupsd flow to the end with the given answers
    pub async fn configure_apcupsd(&self, port: u16, sensors: Value) -> FlowResult {
        let form = self.flows.start_flow("apcupsd").await.unwrap();
        let select = self
            .flows
            .progress_flow(
                &form.flow_id,
                Some(serde_json::json!({"host": "127.0.0.1", "port": port})),
            )
            .await
            .unwrap();
        assert_eq!(select.step_id.as_deref(), Some("sensor_select"));

        self.flows
            .progress_flow(&form.flow_id, Some(serde_json::json!({ "sensors": sensors })))
            .await
            .unwrap()
    }
}
