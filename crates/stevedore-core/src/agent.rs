//! HTTP link to the cluster agent.
//!
//! One client serves both directions of the protocol: SUBSCRIBE opens the
//! long-lived event stream, UPDATE delivers one status report per call.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use stevedore_proto::{recordio, AgentEvent, Call, StatusUpdate};
use tracing::debug;

use crate::config::{AgentSettings, Config};
use crate::error::Result;
use crate::state::UpdateTransport;

/// Client for the agent's executor endpoint.
pub struct AgentClient {
    http: reqwest::Client,
    endpoint: String,
    settings: AgentSettings,
    http_timeout: Duration,
}

impl AgentClient {
    pub fn new(config: &Config) -> Result<Self> {
        // Only the connect phase gets a global bound: a whole-request timeout
        // would sever the long-lived subscribe stream.
        let http = reqwest::Client::builder()
            .connect_timeout(config.http_timeout)
            .build()?;
        Ok(Self {
            http,
            endpoint: format!("http://{}{}", config.agent.endpoint, config.api_path),
            settings: config.agent.clone(),
            http_timeout: config.http_timeout,
        })
    }

    /// Opens the subscribe stream, replaying unacknowledged updates so the
    /// agent can dedupe by UUID.
    pub async fn subscribe(&self, unacknowledged: Vec<StatusUpdate>) -> Result<EventStream> {
        let call = Call::Subscribe {
            executor_id: self.settings.executor_id.clone(),
            framework_id: self.settings.framework_id.clone(),
            unacknowledged_updates: unacknowledged,
        };
        debug!(endpoint = %self.endpoint, "Subscribing to agent");
        let response = self
            .http
            .post(&self.endpoint)
            .json(&call)
            .send()
            .await?
            .error_for_status()?;
        Ok(EventStream::new(Box::pin(response.bytes_stream())))
    }

    /// Delivers one status update; the response body is ignored.
    pub async fn update(&self, status: &StatusUpdate) -> Result<()> {
        let call = Call::Update {
            status: status.clone(),
        };
        self.http
            .post(&self.endpoint)
            .timeout(self.http_timeout)
            .json(&call)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl UpdateTransport for AgentClient {
    async fn send_update(&self, update: &StatusUpdate) -> Result<()> {
        self.update(update).await
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Decoded view over the subscribe response body.
pub struct EventStream {
    bytes: ByteStream,
    decoder: recordio::Decoder,
}

impl EventStream {
    fn new(bytes: ByteStream) -> Self {
        Self {
            bytes,
            decoder: recordio::Decoder::new(),
        }
    }

    /// Returns the next agent event, or `None` on a graceful end of stream.
    pub async fn next_event(&mut self) -> Result<Option<AgentEvent>> {
        loop {
            if let Some(record) = self.decoder.next_record()? {
                let event: AgentEvent =
                    serde_json::from_slice(&record).map_err(stevedore_proto::Error::from)?;
                return Ok(Some(event));
            }
            match self.bytes.next().await {
                Some(Ok(chunk)) => self.decoder.feed(&chunk),
                Some(Err(err)) => return Err(err.into()),
                None => return Ok(None),
            }
        }
    }
}
