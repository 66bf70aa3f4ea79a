//! Probe types
//!
//! Targets, results and the reply schema returned by a node's topology
//! endpoint.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default path of the leafnode status endpoint
pub const DEFAULT_TOPOLOGY_QUERY: &str = "leafz";

// =============================================================================
// Probe Target
// =============================================================================

/// One remote node and the query to send it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProbeTarget {
    /// Base URL of the node, e.g. `http://nats-1:8222`
    pub address: String,
    /// Path of the topology endpoint on that node
    pub query: String,
}

impl ProbeTarget {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            query: DEFAULT_TOPOLOGY_QUERY.to_string(),
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    /// Full URL the probe requests
    pub fn url(&self) -> String {
        format!(
            "{}/{}",
            self.address.trim_end_matches('/'),
            self.query.trim_start_matches('/')
        )
    }
}

impl std::fmt::Display for ProbeTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.address)
    }
}

// =============================================================================
// Reply Schema
// =============================================================================

/// Identity of the server that answered a probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerIdentity {
    pub name: String,
    #[serde(default)]
    pub id: String,
}

/// A child node as advertised by its parent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    #[serde(alias = "ip")]
    pub address: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtt: Option<String>,
    #[serde(
        default,
        alias = "subscriptions",
        skip_serializing_if = "Option::is_none"
    )]
    pub subscription_count: Option<u64>,
}

/// `data` section of a topology reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyData {
    #[serde(default, alias = "leafs")]
    pub children: Vec<ChildDescriptor>,
}

/// Full reply from a node's topology endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyReply {
    pub server: ServerIdentity,
    pub data: TopologyData,
}

/// Body of the HTTP monitoring `/leafz` endpoint, which carries the server
/// identity at the top level instead of in a `server` section
#[derive(Debug, Deserialize)]
struct MonitoringLeafz {
    server_id: String,
    #[serde(default)]
    server_name: Option<String>,
    #[serde(default)]
    leafs: Vec<ChildDescriptor>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireReply {
    Envelope(TopologyReply),
    Monitoring(MonitoringLeafz),
}

impl From<WireReply> for TopologyReply {
    fn from(wire: WireReply) -> Self {
        match wire {
            WireReply::Envelope(reply) => reply,
            WireReply::Monitoring(leafz) => {
                let name = leafz
                    .server_name
                    .filter(|n| !n.trim().is_empty())
                    .unwrap_or_else(|| leafz.server_id.clone());
                TopologyReply {
                    server: ServerIdentity {
                        name,
                        id: leafz.server_id,
                    },
                    data: TopologyData {
                        children: leafz.leafs,
                    },
                }
            }
        }
    }
}

impl TopologyReply {
    /// Decode and sanity-check a reply body. Accepts the `{server, data}`
    /// envelope as well as the bare monitoring `/leafz` body.
    pub fn decode(body: &[u8]) -> Result<Self, ProbeFailure> {
        let wire: WireReply = serde_json::from_slice(body).map_err(|_| {
            ProbeFailure::Malformed(
                "body is neither a {server, data} reply nor a leafz document".into(),
            )
        })?;
        let reply = TopologyReply::from(wire);

        if reply.server.name.trim().is_empty() {
            return Err(ProbeFailure::Malformed("server name is empty".into()));
        }
        if let Some(child) = reply
            .data
            .children
            .iter()
            .find(|c| c.name.trim().is_empty())
        {
            return Err(ProbeFailure::Malformed(format!(
                "child at {}:{} has no name",
                child.address, child.port
            )));
        }
        Ok(reply)
    }
}

// =============================================================================
// Probe Result
// =============================================================================

/// Why a probe produced no topology
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum ProbeFailure {
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("unexpected HTTP status {code}")]
    Status { code: u16 },

    #[error("malformed reply: {0}")]
    Malformed(String),

    #[error("round deadline exceeded")]
    DeadlineExceeded,

    #[error("probe task aborted: {0}")]
    TaskAborted(String),
}

impl ProbeFailure {
    pub fn timeout(after: Duration) -> Self {
        ProbeFailure::Timeout {
            after_ms: after.as_millis() as u64,
        }
    }
}

/// Outcome of probing one target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeResult {
    Success {
        target: ProbeTarget,
        server: ServerIdentity,
        children: Vec<ChildDescriptor>,
    },
    Failure {
        target: ProbeTarget,
        cause: ProbeFailure,
    },
}

impl ProbeResult {
    pub fn from_reply(target: ProbeTarget, reply: TopologyReply) -> Self {
        ProbeResult::Success {
            target,
            server: reply.server,
            children: reply.data.children,
        }
    }

    pub fn failure(target: ProbeTarget, cause: ProbeFailure) -> Self {
        ProbeResult::Failure { target, cause }
    }

    pub fn target(&self) -> &ProbeTarget {
        match self {
            ProbeResult::Success { target, .. } | ProbeResult::Failure { target, .. } => target,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ProbeResult::Success { .. })
    }
}
