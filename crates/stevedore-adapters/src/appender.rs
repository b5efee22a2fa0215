//! Log sinks for scraped entries.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::entry::Entry;

const LOGSTASH_VERSION: u64 = 1;

/// Delivers service log entries to their destination.
#[async_trait]
pub trait Appender: Send {
    /// Consumes the entry channel until it closes.
    async fn append(self: Box<Self>, entries: mpsc::Receiver<Entry>);
}

/// Transport protocol for the Logstash endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogstashProtocol {
    Tcp,
    Udp,
}

/// Connection settings for [`LogstashAppender`], read from the
/// `STEVEDORE_SERVICELOG_LOGSTASH_*` environment variables.
#[derive(Debug, Clone)]
pub struct LogstashConfig {
    pub protocol: LogstashProtocol,
    pub address: String,
    /// Maximum entries per second; excess lines are discarded.
    pub rate_limit: Option<u32>,
    /// Maximum size of a single serialized entry; larger lines are discarded.
    pub size_limit: Option<usize>,
}

impl LogstashConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let protocol = match std::env::var("STEVEDORE_SERVICELOG_LOGSTASH_PROTOCOL")
            .unwrap_or_default()
            .to_ascii_lowercase()
            .as_str()
        {
            "tcp" => LogstashProtocol::Tcp,
            "udp" => LogstashProtocol::Udp,
            other => anyhow::bail!("unsupported logstash protocol {other:?}"),
        };
        let address = std::env::var("STEVEDORE_SERVICELOG_LOGSTASH_ADDRESS")
            .ok()
            .filter(|value| !value.is_empty())
            .ok_or_else(|| anyhow::anyhow!("missing logstash address"))?;
        Ok(Self {
            protocol,
            address,
            rate_limit: None,
            size_limit: None,
        })
    }
}

enum Connection {
    Tcp(TcpStream),
    Udp(UdpSocket),
}

impl Connection {
    async fn write(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        match self {
            Connection::Tcp(stream) => stream.write_all(bytes).await,
            Connection::Udp(socket) => socket.send(bytes).await.map(|_| ()),
        }
    }
}

/// Appender sending one JSON document per line to Logstash.
pub struct LogstashAppender {
    connection: Connection,
    rate_limit: Option<u32>,
    size_limit: Option<usize>,
}

impl LogstashAppender {
    /// Establishes the connection described by `config`.
    pub async fn connect(config: &LogstashConfig) -> anyhow::Result<Self> {
        let connection = match config.protocol {
            LogstashProtocol::Tcp => Connection::Tcp(TcpStream::connect(&config.address).await?),
            LogstashProtocol::Udp => {
                let socket = UdpSocket::bind("0.0.0.0:0").await?;
                socket.connect(&config.address).await?;
                Connection::Udp(socket)
            }
        };
        Ok(Self {
            connection,
            rate_limit: config.rate_limit,
            size_limit: config.size_limit,
        })
    }

    /// Maps a scraped entry to the Logstash document layout: `time` becomes
    /// `@timestamp`, `msg` becomes `message`, everything else passes through.
    fn format_entry(entry: &Entry) -> Entry {
        let mut formatted = Entry::new();
        if let Some(time) = entry.get("time") {
            formatted.insert("@timestamp".into(), time.clone());
        }
        formatted.insert("@version".into(), Value::from(LOGSTASH_VERSION));
        if let Some(message) = entry.get("msg") {
            formatted.insert("message".into(), message.clone());
        }
        for (key, value) in entry {
            if key == "msg" || key == "time" {
                continue;
            }
            formatted.insert(key.clone(), value.clone());
        }
        formatted
    }
}

#[async_trait]
impl Appender for LogstashAppender {
    async fn append(mut self: Box<Self>, mut entries: mpsc::Receiver<Entry>) {
        let mut window_start = Instant::now();
        let mut window_count = 0u32;

        while let Some(entry) = entries.recv().await {
            if let Some(limit) = self.rate_limit {
                if window_start.elapsed() >= Duration::from_secs(1) {
                    window_start = Instant::now();
                    window_count = 0;
                }
                window_count += 1;
                if window_count > limit {
                    debug!("Rate limit exceeded, discarding log entry");
                    continue;
                }
            }

            let formatted = Self::format_entry(&entry);
            let mut bytes = match serde_json::to_vec(&formatted) {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(error = %err, "Unable to marshal log entry");
                    continue;
                }
            };
            // Logstash reads line by line.
            bytes.push(b'\n');

            if let Some(limit) = self.size_limit {
                if bytes.len() > limit {
                    debug!(size = bytes.len(), "Size limit exceeded, discarding log entry");
                    continue;
                }
            }

            debug!(entry = %String::from_utf8_lossy(&bytes).trim_end(), "Sending log entry to Logstash");
            if let Err(err) = self.connection.write(&bytes).await {
                warn!(error = %err, "Error appending logs");
            }
        }
    }
}
