//! Topology graph
//!
//! The assembled view of which nodes hang off which server. Serialises to
//! `{"nodes":[{"name","type","info":{"id","ip","port"}}],"edges":[{"source","target"}]}`.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Role of a node in the topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// A server that answered a probe
    Master,
    /// A child reported by a master
    Node,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::Master => write!(f, "master"),
            NodeRole::Node => write!(f, "node"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRecord {
    pub name: String,
    #[serde(rename = "type")]
    pub role: NodeRole,
    pub info: NodeInfo,
}

impl NodeRecord {
    /// Ordering used to pick one record when several share a name:
    /// masters first, then the smallest info.
    pub(crate) fn precedes(&self, other: &NodeRecord) -> bool {
        (self.role, &self.info) < (other.role, &other.info)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
}

/// Nodes unique by name plus parent→child edges in fold order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Graph {
    pub nodes: Vec<NodeRecord>,
    pub edges: Vec<Edge>,
}

impl Graph {
    pub fn node(&self, name: &str) -> Option<&NodeRecord> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Node records as a set, ignoring output order
    pub fn node_set(&self) -> BTreeSet<(String, NodeRole, NodeInfo)> {
        self.nodes
            .iter()
            .map(|n| (n.name.clone(), n.role, n.info.clone()))
            .collect()
    }

    /// Edges with multiplicity, ignoring output order
    pub fn edge_counts(&self) -> BTreeMap<Edge, usize> {
        let mut counts = BTreeMap::new();
        for edge in &self.edges {
            *counts.entry(edge.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Check that names are unique and every edge endpoint is a node
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::with_capacity(self.nodes.len());
        for node in &self.nodes {
            if !names.insert(node.name.as_str()) {
                return Err(Error::GraphInvariant(format!("duplicate node {}", node.name)));
            }
        }
        for edge in &self.edges {
            for end in [&edge.source, &edge.target] {
                if !names.contains(end.as_str()) {
                    return Err(Error::GraphInvariant(format!(
                        "edge {} -> {} references unknown node {}",
                        edge.source, edge.target, end
                    )));
                }
            }
        }
        Ok(())
    }
}
