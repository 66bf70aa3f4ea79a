//! HTTP Probe Client
//!
//! Queries a node's topology endpoint over HTTP. Every failure mode
//! (refused connection, timeout, error status, malformed body) is returned as
//! a [`ProbeResult::Failure`] for that target.

use crate::domain::ports::Prober;
use crate::error::{Error, Result};
use crate::probe::types::{ProbeFailure, ProbeResult, ProbeTarget, TopologyReply};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the HTTP probe client
#[derive(Debug, Clone)]
pub struct ProbeClientConfig {
    /// Upper bound on one probe, connect to decoded body
    pub timeout: Duration,
    /// Upper bound on establishing the connection
    pub connect_timeout: Duration,
    /// Largest reply body accepted
    pub max_body_bytes: usize,
}

impl Default for ProbeClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(1),
            max_body_bytes: 4 * 1024 * 1024, // 4MB
        }
    }
}

// =============================================================================
// HTTP Probe Client
// =============================================================================

/// Prober that speaks HTTP to each node's topology endpoint
pub struct HttpProbeClient {
    config: ProbeClientConfig,
    client: reqwest::Client,
}

impl HttpProbeClient {
    pub fn new(config: ProbeClientConfig) -> Result<Self> {
        // No idle pooling: each probe opens and closes its own connection.
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(0)
            .build()
            .map_err(Error::Http)?;

        Ok(Self { config, client })
    }

    async fn fetch(
        &self,
        target: &ProbeTarget,
    ) -> std::result::Result<TopologyReply, ProbeFailure> {
        let url = reqwest::Url::parse(&target.url())
            .map_err(|e| ProbeFailure::InvalidTarget(format!("{}: {}", target.url(), e)))?;

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProbeFailure::Status {
                code: status.as_u16(),
            });
        }

        let limit = self.config.max_body_bytes;
        if let Some(len) = response.content_length() {
            if len as usize > limit {
                return Err(oversized(len as usize, limit));
            }
        }

        // Chunked replies carry no length, so the limit is enforced per chunk
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| self.classify(e))? {
            if body.len() + chunk.len() > limit {
                return Err(oversized(body.len() + chunk.len(), limit));
            }
            body.extend_from_slice(&chunk);
        }

        TopologyReply::decode(&body)
    }

    fn classify(&self, e: reqwest::Error) -> ProbeFailure {
        if e.is_timeout() {
            ProbeFailure::timeout(self.config.timeout)
        } else if e.is_connect() {
            ProbeFailure::Connect(e.to_string())
        } else if e.is_decode() || e.is_body() {
            ProbeFailure::Malformed(e.to_string())
        } else {
            ProbeFailure::Connect(e.to_string())
        }
    }
}

fn oversized(seen: usize, limit: usize) -> ProbeFailure {
    ProbeFailure::Malformed(format!(
        "reply of at least {} bytes exceeds limit of {}",
        seen, limit
    ))
}

#[async_trait]
impl Prober for HttpProbeClient {
    async fn probe(&self, target: &ProbeTarget) -> ProbeResult {
        debug!(target = %target, url = %target.url(), "probing");

        // reqwest enforces the timeout too; this bounds anything outside it
        let outcome = tokio::time::timeout(self.config.timeout, self.fetch(target))
            .await
            .unwrap_or_else(|_| Err(ProbeFailure::timeout(self.config.timeout)));

        match outcome {
            Ok(reply) => {
                debug!(
                    target = %target,
                    server = %reply.server.name,
                    children = reply.data.children.len(),
                    "probe succeeded"
                );
                ProbeResult::from_reply(target.clone(), reply)
            }
            Err(cause) => {
                warn!(target = %target, %cause, "probe failed");
                ProbeResult::failure(target.clone(), cause)
            }
        }
    }

    fn transport(&self) -> &'static str {
        "http"
    }
}
