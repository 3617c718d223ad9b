//! apcupsd Network Information Server client
//!
//! The NIS speaks a tiny framed protocol over TCP. Every message in either
//! direction is a 2-byte big-endian length followed by that many bytes. The
//! client sends the `status` command; the server answers with one record per
//! status line (`KEY      : value\n`) and ends with a zero-length record.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use super::constants::DEFAULT_TIMEOUT;

const CMD_STATUS: &[u8] = b"status";

/// Parsed status fields in the order the daemon reported them
pub type StatusSnapshot = IndexMap<String, String>;

/// Errors talking to the NIS
#[derive(Debug, Error)]
pub enum NisError {
    #[error("Connection error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Malformed status response: {0}")]
    Malformed(String),

    #[error("Status response contained no fields")]
    EmptyStatus,
}

pub type NisResult<T> = Result<T, NisError>;

/// Anything that can produce a status snapshot
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch_status(&self) -> NisResult<StatusSnapshot>;
}

/// Builds a status source for a host and port
pub type StatusSourceFactory = Arc<dyn Fn(&str, u16) -> Arc<dyn StatusSource> + Send + Sync>;

/// Factory producing real [`NisClient`]s
pub fn nis_client_factory() -> StatusSourceFactory {
    Arc::new(|host: &str, port: u16| Arc::new(NisClient::new(host, port)) as Arc<dyn StatusSource>)
}

/// NIS client for one daemon
#[derive(Debug, Clone)]
pub struct NisClient {
    host: String,
    port: u16,
    timeout: Duration,
}

impl NisClient {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fetch the raw status text
    pub async fn get(&self) -> NisResult<String> {
        timeout(self.timeout, self.request(CMD_STATUS))
            .await
            .map_err(|_| NisError::Timeout(self.timeout))?
    }

    /// Fetch and parse the status
    pub async fn status(&self) -> NisResult<StatusSnapshot> {
        parse(&self.get().await?)
    }

    async fn request(&self, command: &[u8]) -> NisResult<String> {
        let mut stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        debug!(host = %self.host, port = self.port, "Connected to NIS");

        let len = u16::try_from(command.len())
            .map_err(|_| NisError::Malformed("command too long".into()))?;
        let mut frame = Vec::with_capacity(command.len() + 2);
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(command);
        stream.write_all(&frame).await?;

        let mut raw = String::new();
        loop {
            let len = match stream.read_u16().await {
                Ok(len) => len,
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Err(NisError::Malformed(
                        "connection closed before end of status".into(),
                    ))
                }
                Err(e) => return Err(e.into()),
            };
            if len == 0 {
                break;
            }

            let mut record = vec![0u8; usize::from(len)];
            stream.read_exact(&mut record).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    NisError::Malformed(format!("truncated record, expected {} bytes", len))
                } else {
                    NisError::Io(e)
                }
            })?;
            let line = std::str::from_utf8(&record)
                .map_err(|e| NisError::Malformed(format!("record is not UTF-8: {}", e)))?;
            raw.push_str(line);
        }

        debug!(host = %self.host, bytes = raw.len(), "Received NIS status");
        Ok(raw)
    }
}

#[async_trait]
impl StatusSource for NisClient {
    async fn fetch_status(&self) -> NisResult<StatusSnapshot> {
        self.status().await
    }
}

/// Parse raw status text into ordered fields.
///
/// Each line is split on its first `:`; key and value are trimmed. Blank
/// lines are skipped.
pub fn parse(raw: &str) -> NisResult<StatusSnapshot> {
    let mut status = StatusSnapshot::new();

    for line in raw.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| NisError::Malformed(format!("line without separator: {:?}", line)))?;
        status.insert(key.trim().to_string(), value.trim().to_string());
    }

    if status.is_empty() {
        return Err(NisError::EmptyStatus);
    }
    Ok(status)
}
