//! Configuration
//!
//! The topology service reads its target list from a YAML file:
//!
//! ```yaml
//! servers:
//!   - http://nats-1:8222
//!   - nats-2:8222
//! probe_timeout_ms: 2000
//! round_deadline_ms: 5000
//! ```
//!
//! Command-line flags override whatever the file sets.

use crate::error::{Error, Result};
use crate::probe::{ProbeTarget, DEFAULT_TOPOLOGY_QUERY};
use crate::topology::DEFAULT_CONTROL_PORT;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

// =============================================================================
// Topology Configuration
// =============================================================================

/// Targets and timing for topology rounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    /// Monitoring addresses of the servers to probe
    pub servers: Vec<String>,
    /// Endpoint path queried on every server
    pub query: String,
    /// Per-probe timeout
    pub probe_timeout_ms: u64,
    /// Optional bound on a whole round
    pub round_deadline_ms: Option<u64>,
    /// Port reported for master nodes
    pub control_port: u16,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            query: DEFAULT_TOPOLOGY_QUERY.to_string(),
            probe_timeout_ms: 2000,
            round_deadline_ms: None,
            control_port: DEFAULT_CONTROL_PORT,
        }
    }
}

impl TopologyConfig {
    /// Load and validate a YAML config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let config = Self::read(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a YAML config file without validating it, so overrides can be
    /// applied first
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| Error::ConfigFile {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_yaml(&raw)
    }

    /// Parse YAML and normalise server addresses; does not validate
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let mut config: TopologyConfig = serde_yaml::from_str(raw)?;
        config.normalise();
        Ok(config)
    }

    /// Trim entries and give bare `host:port` addresses an `http://` scheme
    pub fn normalise(&mut self) {
        for server in &mut self.servers {
            let trimmed = server.trim();
            *server = if trimmed.is_empty() || trimmed.contains("://") {
                trimmed.to_string()
            } else {
                format!("http://{}", trimmed)
            };
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.servers.is_empty() {
            return Err(Error::Configuration("no servers configured".into()));
        }
        for server in &self.servers {
            let url = reqwest::Url::parse(server).map_err(|_| Error::InvalidAddress {
                address: server.clone(),
            })?;
            if url.host_str().map_or(true, str::is_empty) {
                return Err(Error::InvalidAddress {
                    address: server.clone(),
                });
            }
            // Probes are HTTP requests against the monitoring port
            if !matches!(url.scheme(), "http" | "https") {
                return Err(Error::Configuration(format!(
                    "{} uses scheme {}; list the server's http monitoring address instead",
                    server,
                    url.scheme()
                )));
            }
        }
        if self.query.trim().is_empty() {
            return Err(Error::Configuration("query must not be empty".into()));
        }
        if self.probe_timeout_ms == 0 {
            return Err(Error::Configuration("probe_timeout_ms must be positive".into()));
        }
        if self.round_deadline_ms == Some(0) {
            return Err(Error::Configuration("round_deadline_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn round_deadline(&self) -> Option<Duration> {
        self.round_deadline_ms.map(Duration::from_millis)
    }

    /// One probe target per configured server
    pub fn targets(&self) -> Vec<ProbeTarget> {
        self.servers
            .iter()
            .map(|s| ProbeTarget::new(s.clone()).with_query(self.query.clone()))
            .collect()
    }
}

// =============================================================================
// API Server Configuration
// =============================================================================

/// Bind addresses for the REST and health servers
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// REST API bind address
    pub rest_addr: SocketAddr,
    /// Health server bind address
    pub health_addr: SocketAddr,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            rest_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            health_addr: SocketAddr::from(([0, 0, 0, 0], 8081)),
        }
    }
}
