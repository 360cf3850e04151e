//! reqwest implementations of the service boundaries.
//!
//! All three services POST a JSON body. The plan response is passed on as
//! raw chunks; the execution response is newline-delimited JSON packets.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response};

use crate::core::packet::AgentPacket;
use crate::orchestration::service::{
    ByteStream, ExecuteRequest, ExecutionService, PacketStream, PlanRequest, PlanningService,
    ResultRecord, ResultSink,
};
use crate::util::truncate;
use crate::{zlog_debug, zlog_warn, Error, Result};

pub fn build_client(timeout: Duration) -> Result<Client> {
    Ok(Client::builder().timeout(timeout).build()?)
}

/// Turn a non-2xx response into `Error::HttpStatus`, body text verbatim.
async fn check_status(response: Response, context: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let text = if body.trim().is_empty() {
        status.canonical_reason().unwrap_or_default().to_string()
    } else {
        body
    };
    Err(Error::HttpStatus {
        context: context.to_string(),
        status: status.as_u16(),
        text,
    })
}

/// One line of an execution stream. Blank lines yield `None`.
fn decode_packet_line(line: &[u8]) -> Option<AgentPacket> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    let text = text.strip_prefix("data:").map(str::trim).unwrap_or(text);
    if text.is_empty() {
        return None;
    }
    match serde_json::from_str(text) {
        Ok(packet) => Some(packet),
        Err(e) => {
            zlog_warn!("Skipping undecodable packet {:?}: {}", truncate(text, 80), e);
            None
        }
    }
}

pub struct HttpPlanningService {
    client: Client,
    url: String,
}

impl HttpPlanningService {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl PlanningService for HttpPlanningService {
    async fn plan(&self, request: &PlanRequest) -> Result<ByteStream> {
        zlog_debug!("POST {} (plan {})", self.url, request.execution_id);
        let response = self.client.post(&self.url).json(request).send().await?;
        let response = check_status(response, "Error fetching plan").await?;
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(Error::from));
        Ok(Box::pin(stream))
    }
}

pub struct HttpExecutionService {
    client: Client,
    url: String,
}

impl HttpExecutionService {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl ExecutionService for HttpExecutionService {
    async fn execute(&self, request: &ExecuteRequest) -> Result<PacketStream> {
        zlog_debug!("POST {} (task {})", self.url, request.task.id);
        let response = self.client.post(&self.url).json(request).send().await?;
        let context = format!("Error executing task {}", request.task.id);
        let response = check_status(response, &context).await?;
        let mut bytes = response.bytes_stream();

        let stream = async_stream::try_stream! {
            let mut pending: Vec<u8> = Vec::new();
            while let Some(chunk) = bytes.next().await {
                pending.extend_from_slice(&chunk?);
                while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = pending.drain(..=pos).collect();
                    if let Some(packet) = decode_packet_line(&line) {
                        yield packet;
                    }
                }
            }
            if let Some(packet) = decode_packet_line(&pending) {
                yield packet;
            }
        };
        Ok(Box::pin(stream))
    }
}

pub struct HttpResultSink {
    client: Client,
    url: String,
}

impl HttpResultSink {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl ResultSink for HttpResultSink {
    async fn save(&self, record: &ResultRecord) -> Result<()> {
        let response = self.client.post(&self.url).json(record).send().await?;
        check_status(response, "Error saving result").await?;
        Ok(())
    }
}
