//! API Server
//!
//! Runs the REST server until shutdown is signalled.

use crate::config::ApiServerConfig;
use crate::error::{Error, Result};
use crate::keyed::{AccountLedger, ProjectCounters};
use crate::metrics::Metrics;
use crate::topology::TopologyService;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info};

use super::rest::RestRouter;

// =============================================================================
// API Server
// =============================================================================

/// REST API server over the topology service and keyed state
pub struct ApiServer {
    config: ApiServerConfig,
    topology: Arc<TopologyService>,
    ledger: Arc<AccountLedger>,
    counters: Arc<ProjectCounters>,
    metrics: Arc<Metrics>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ApiServer {
    /// Create a new API server
    pub fn new(
        config: ApiServerConfig,
        topology: Arc<TopologyService>,
        ledger: Arc<AccountLedger>,
        counters: Arc<ProjectCounters>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            topology,
            ledger,
            counters,
            metrics,
            shutdown_tx,
        }
    }

    fn router(&self) -> axum::Router {
        RestRouter::new(
            self.topology.clone(),
            self.ledger.clone(),
            self.counters.clone(),
            self.metrics.clone(),
        )
        .build()
    }

    /// Serve on a listener bound to [`ApiServer::rest_addr`] until
    /// [`ApiServer::shutdown`]
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let addr = listener.local_addr()?;
        info!(
            addr = %addr,
            targets = self.topology.targets().len(),
            "REST API listening"
        );

        let handle = tokio::spawn(run_rest_server(
            listener,
            self.router(),
            self.shutdown_tx.subscribe(),
        ));

        match handle.await {
            Ok(result) => result,
            Err(e) => {
                error!("REST server task failed: {:?}", e);
                Err(Error::Internal(format!("REST server task failed: {}", e)))
            }
        }
    }

    /// Trigger graceful shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Configured REST bind address
    pub fn rest_addr(&self) -> SocketAddr {
        self.config.rest_addr
    }
}

/// Run the REST API server
async fn run_rest_server(
    listener: TcpListener,
    app: axum::Router,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("REST server shutting down");
        })
        .await
        .map_err(|e| Error::Internal(format!("REST server error: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fanout::FanOutConfig;
    use crate::probe::ProbeTarget;
    use crate::testing::ScriptedProber;
    use crate::topology::AssemblerConfig;
    use std::time::Duration;

    #[tokio::test]
    async fn test_serve_and_shutdown() {
        let topology = TopologyService::new(
            vec![ProbeTarget::new("a")],
            Arc::new(ScriptedProber::new().reply("a", "hub", vec![])),
            FanOutConfig::default(),
            AssemblerConfig::default(),
        );
        let server = Arc::new(ApiServer::new(
            ApiServerConfig::default(),
            Arc::new(topology),
            Arc::new(AccountLedger::new()),
            Arc::new(ProjectCounters::new()),
            Arc::new(Metrics::new().unwrap()),
        ));

        assert_eq!(server.rest_addr().port(), 8080);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let running = {
            let server = server.clone();
            tokio::spawn(async move { server.serve(listener).await })
        };

        let url = format!("http://{}/api/v1/nats/network", addr);
        let mut graph = None;
        for _ in 0..50 {
            if let Ok(response) = reqwest::get(&url).await {
                graph = Some(response.json::<serde_json::Value>().await.unwrap());
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let graph = graph.expect("server never answered");
        assert_eq!(graph["nodes"][0]["name"], "hub");

        server.shutdown();
        let result = tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
