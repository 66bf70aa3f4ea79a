//! Topology Assembler
//!
//! Folds a round of probe results into a [`Graph`]. Assembly is sequential
//! and pure: the same multiset of results always produces the same node and
//! edge sets, whatever order the results arrived in.

use crate::probe::ProbeResult;
use crate::topology::graph::{Edge, Graph, NodeInfo, NodeRecord, NodeRole};
use indexmap::map::Entry;
use indexmap::IndexMap;
use tracing::debug;

/// Port stamped on master nodes when nothing else is configured
pub const DEFAULT_CONTROL_PORT: u16 = 4222;

/// Configuration for the assembler
#[derive(Debug, Clone)]
pub struct AssemblerConfig {
    /// Well-known client port reported for every master
    pub control_port: u16,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            control_port: DEFAULT_CONTROL_PORT,
        }
    }
}

/// Builds the topology graph from probe results
#[derive(Debug, Clone, Default)]
pub struct TopologyAssembler {
    config: AssemblerConfig,
}

impl TopologyAssembler {
    pub fn new(config: AssemblerConfig) -> Self {
        Self { config }
    }

    /// Fold results into a graph. Failures contribute nothing.
    pub fn assemble(&self, results: &[ProbeResult]) -> Graph {
        let mut nodes: IndexMap<String, NodeRecord> = IndexMap::new();
        let mut edges = Vec::new();

        for result in results {
            let (server, children) = match result {
                ProbeResult::Success {
                    server, children, ..
                } => (server, children),
                ProbeResult::Failure { .. } => continue,
            };

            merge(
                &mut nodes,
                NodeRecord {
                    name: server.name.clone(),
                    role: NodeRole::Master,
                    info: NodeInfo {
                        id: Some(server.id.clone()).filter(|id| !id.is_empty()),
                        ip: None,
                        port: self.config.control_port,
                    },
                },
            );

            for child in children {
                merge(
                    &mut nodes,
                    NodeRecord {
                        name: child.name.clone(),
                        role: NodeRole::Node,
                        info: NodeInfo {
                            id: None,
                            ip: Some(child.address.clone()),
                            port: child.port,
                        },
                    },
                );
                edges.push(Edge {
                    source: server.name.clone(),
                    target: child.name.clone(),
                });
            }
        }

        debug!(
            results = results.len(),
            nodes = nodes.len(),
            edges = edges.len(),
            "topology assembled"
        );

        Graph {
            nodes: nodes.into_values().collect(),
            edges,
        }
    }
}

/// Keep first-appearance position, but the preferred record's contents
fn merge(nodes: &mut IndexMap<String, NodeRecord>, candidate: NodeRecord) {
    match nodes.entry(candidate.name.clone()) {
        Entry::Vacant(slot) => {
            slot.insert(candidate);
        }
        Entry::Occupied(mut slot) => {
            if candidate.precedes(slot.get()) {
                slot.insert(candidate);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{ChildDescriptor, ProbeFailure, ProbeTarget, ServerIdentity};
    use rand::seq::SliceRandom;

    fn success(address: &str, server: &str, children: &[(&str, &str, u16)]) -> ProbeResult {
        ProbeResult::Success {
            target: ProbeTarget::new(address),
            server: ServerIdentity {
                name: server.to_string(),
                id: format!("ID-{}", server),
            },
            children: children
                .iter()
                .map(|(name, ip, port)| ChildDescriptor {
                    name: name.to_string(),
                    account: None,
                    address: ip.to_string(),
                    port: *port,
                    rtt: None,
                    subscription_count: None,
                })
                .collect(),
        }
    }

    #[test]
    fn test_end_to_end_round() {
        let results = vec![
            success("a", "A", &[("x", "10.0.0.1", 7422), ("y", "10.0.0.2", 7422)]),
            ProbeResult::failure(ProbeTarget::new("b"), ProbeFailure::Timeout { after_ms: 2000 }),
            success("c", "C", &[]),
        ];

        let graph = TopologyAssembler::default().assemble(&results);
        assert_eq!(graph.nodes.len(), 4);
        assert_eq!(graph.edges.len(), 2);
        assert!(graph.validate().is_ok());

        let a = graph.node("A").unwrap();
        assert_eq!(a.role, NodeRole::Master);
        assert_eq!(a.info.port, DEFAULT_CONTROL_PORT);
        assert_eq!(a.info.id.as_deref(), Some("ID-A"));

        let x = graph.node("x").unwrap();
        assert_eq!(x.role, NodeRole::Node);
        assert_eq!(x.info.ip.as_deref(), Some("10.0.0.1"));
        assert_eq!(graph.node("C").unwrap().role, NodeRole::Master);

        assert_eq!(
            graph.edges,
            vec![
                Edge {
                    source: "A".into(),
                    target: "x".into()
                },
                Edge {
                    source: "A".into(),
                    target: "y".into()
                },
            ]
        );
    }

    #[test]
    fn test_all_failures_yield_empty_graph() {
        let results = vec![
            ProbeResult::failure(ProbeTarget::new("a"), ProbeFailure::DeadlineExceeded),
            ProbeResult::failure(ProbeTarget::new("b"), ProbeFailure::Connect("refused".into())),
        ];
        assert_eq!(TopologyAssembler::default().assemble(&results), Graph::default());
    }

    #[test]
    fn test_shuffle_invariance() {
        // Overlapping names: hubs list each other and share children.
        let results = vec![
            success("a", "hub-a", &[("hub-b", "10.0.0.2", 7422), ("edge", "10.0.1.1", 7422)]),
            success("b", "hub-b", &[("edge", "10.0.1.1", 7423), ("solo", "10.0.2.1", 7422)]),
            success("c", "hub-c", &[("edge", "10.0.0.9", 7422)]),
            ProbeResult::failure(ProbeTarget::new("d"), ProbeFailure::Malformed("bad".into())),
            success("e", "hub-e", &[]),
        ];
        let assembler = TopologyAssembler::default();
        let expected = assembler.assemble(&results);

        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let mut shuffled = results.clone();
            shuffled.shuffle(&mut rng);
            let graph = assembler.assemble(&shuffled);
            assert_eq!(graph.node_set(), expected.node_set());
            assert_eq!(graph.edge_counts(), expected.edge_counts());
            assert!(graph.validate().is_ok());
        }

        // hub-b appears as both master and child; the master record wins
        let hub_b = expected.node("hub-b").unwrap();
        assert_eq!(hub_b.role, NodeRole::Master);
        // edge appears three times as a child; the smallest info wins
        let edge = expected.node("edge").unwrap();
        assert_eq!(edge.info.ip.as_deref(), Some("10.0.0.9"));
    }

    #[test]
    fn test_duplicate_child_names_keep_every_edge() {
        let results = vec![success(
            "a",
            "hub",
            &[("twin", "10.0.0.1", 7422), ("twin", "10.0.0.2", 7422)],
        )];
        let graph = TopologyAssembler::default().assemble(&results);
        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.edges.len(), 2);
    }

    #[test]
    fn test_custom_control_port_and_missing_id() {
        let mut result = success("a", "hub", &[]);
        if let ProbeResult::Success { server, .. } = &mut result {
            server.id.clear();
        }
        let graph =
            TopologyAssembler::new(AssemblerConfig { control_port: 5222 }).assemble(&[result]);
        let hub = graph.node("hub").unwrap();
        assert_eq!(hub.info.port, 5222);
        assert_eq!(hub.info.id, None);
    }
}
