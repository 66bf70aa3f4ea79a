//! Domain Ports - Core trait definitions
//!
//! These traits define the boundaries between the topology logic and the
//! network. Adapters implement them to provide concrete transports.

use crate::probe::{ProbeResult, ProbeTarget};
use async_trait::async_trait;

// =============================================================================
// Probe Port
// =============================================================================

/// Issues one topology query to one remote node.
///
/// Implementations must absorb every failure into [`ProbeResult::Failure`];
/// a single bad node never aborts a round.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Query `target` and return its topology or the reason it has none
    async fn probe(&self, target: &ProbeTarget) -> ProbeResult;

    /// Name of the transport, for logs
    fn transport(&self) -> &'static str;
}
