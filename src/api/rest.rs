//! REST API Handlers
//!
//! Topology, account ledger and project counter endpoints.

use crate::error::{Error, ErrorClass};
use crate::keyed::{AccountLedger, ProjectCounters, TransferOutcome};
use crate::metrics::Metrics;
use crate::topology::TopologyService;
use axum::{
    extract::{Json, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

// =============================================================================
// Request/Response Types
// =============================================================================

/// Open account request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenAccountRequest {
    pub account_id: String,
    #[serde(default)]
    pub initial_balance: u64,
}

/// Deposit or withdrawal request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmountRequest {
    pub amount: u64,
}

/// Account balance response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountResponse {
    pub account_id: String,
    pub balance: u64,
}

/// Transfer response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferResponse {
    pub account_id: String,
    #[serde(flatten)]
    pub outcome: TransferOutcome,
}

/// Project counter response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectCountResponse {
    pub project: String,
    pub count: u64,
}

/// All project counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectsResponse {
    pub projects: BTreeMap<String, u64>,
    pub total: u64,
}

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiErrorResponse {
    fn from_error(e: &Error) -> (StatusCode, Self) {
        let (status, code) = match e {
            Error::AccountNotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            Error::AccountAlreadyExists { .. } => (StatusCode::CONFLICT, "already_exists"),
            Error::InvalidAmount { .. } => (StatusCode::BAD_REQUEST, "invalid_amount"),
            _ => match e.class() {
                ErrorClass::Transient => (StatusCode::BAD_GATEWAY, "upstream_error"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            },
        };
        (
            status,
            Self {
                error: code.into(),
                message: e.to_string(),
                details: None,
            },
        )
    }
}

fn error_response(e: Error) -> Response {
    let (status, body) = ApiErrorResponse::from_error(&e);
    if status.is_server_error() {
        error!(error = %e, "request failed");
    }
    (status, Json(body)).into_response()
}

// =============================================================================
// REST Router
// =============================================================================

/// REST API router builder
pub struct RestRouter {
    topology: Arc<TopologyService>,
    ledger: Arc<AccountLedger>,
    counters: Arc<ProjectCounters>,
    metrics: Arc<Metrics>,
}

impl RestRouter {
    /// Create a new REST router
    pub fn new(
        topology: Arc<TopologyService>,
        ledger: Arc<AccountLedger>,
        counters: Arc<ProjectCounters>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            topology,
            ledger,
            counters,
            metrics,
        }
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = AppState {
            topology: self.topology,
            ledger: self.ledger,
            counters: self.counters,
            metrics: self.metrics,
        };

        Router::new()
            // Topology endpoints
            .route("/api/v1/nats/network", get(get_network))
            .route("/api/v1/topology", get(get_topology))
            .route("/api/v1/targets", get(list_targets))
            // Account endpoints
            .route("/api/v1/accounts", post(open_account))
            .route("/api/v1/accounts/:id", get(get_account))
            .route("/api/v1/accounts/:id/deposit", post(deposit))
            .route("/api/v1/accounts/:id/withdraw", post(withdraw))
            // Project endpoints
            .route("/api/v1/projects", get(list_projects))
            .route("/api/v1/projects/:name/increment", post(increment_project))
            // Operational endpoints
            .route("/health", get(health_check))
            .route("/metrics", get(render_metrics))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    topology: Arc<TopologyService>,
    ledger: Arc<AccountLedger>,
    counters: Arc<ProjectCounters>,
    metrics: Arc<Metrics>,
}

// =============================================================================
// Topology Handlers
// =============================================================================

/// Graph only
async fn get_network(State(state): State<AppState>) -> impl IntoResponse {
    match state.topology.fetch().await {
        Ok(snapshot) => (StatusCode::OK, Json(snapshot.graph)).into_response(),
        Err(e) => error_response(e),
    }
}

/// Graph plus per-round failure report
async fn get_topology(State(state): State<AppState>) -> impl IntoResponse {
    match state.topology.fetch().await {
        Ok(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn list_targets(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.topology.target_health()))
}

// =============================================================================
// Account Handlers
// =============================================================================

async fn open_account(
    State(state): State<AppState>,
    Json(request): Json<OpenAccountRequest>,
) -> impl IntoResponse {
    if request.account_id.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiErrorResponse {
                error: "invalid_account_id".into(),
                message: "accountId must not be empty".into(),
                details: None,
            }),
        )
            .into_response();
    }

    match state
        .ledger
        .open_account(&request.account_id, request.initial_balance)
    {
        Ok(()) => {
            info!(account = %request.account_id, "account opened via API");
            (
                StatusCode::CREATED,
                Json(AccountResponse {
                    account_id: request.account_id,
                    balance: request.initial_balance,
                }),
            )
                .into_response()
        }
        Err(e) => error_response(e),
    }
}

async fn get_account(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.ledger.balance(&id).await {
        Ok(balance) => (
            StatusCode::OK,
            Json(AccountResponse {
                account_id: id,
                balance,
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

async fn deposit(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<AmountRequest>,
) -> impl IntoResponse {
    transfer_response(id.clone(), state.ledger.deposit(&id, request.amount).await)
}

async fn withdraw(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<AmountRequest>,
) -> impl IntoResponse {
    transfer_response(id.clone(), state.ledger.withdraw(&id, request.amount).await)
}

/// A declined transfer is a normal result: 200 with `status: "declined"`
fn transfer_response(
    account_id: String,
    result: crate::error::Result<TransferOutcome>,
) -> Response {
    match result {
        Ok(outcome) => {
            if !outcome.is_applied() {
                info!(account = %account_id, "transfer declined");
            }
            (StatusCode::OK, Json(TransferResponse { account_id, outcome })).into_response()
        }
        Err(e) => error_response(e),
    }
}

// =============================================================================
// Project Handlers
// =============================================================================

async fn increment_project(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    let count = state.counters.increment(&name).await;
    (StatusCode::OK, Json(ProjectCountResponse { project: name, count }))
}

async fn list_projects(State(state): State<AppState>) -> impl IntoResponse {
    let projects = state.counters.snapshot().await;
    let total = projects.values().sum();
    (StatusCode::OK, Json(ProjectsResponse { projects, total }))
}

// =============================================================================
// Operational Handlers
// =============================================================================

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn render_metrics(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics.render() {
        Ok((content_type, body)) => {
            (StatusCode::OK, [(header::CONTENT_TYPE, content_type)], body).into_response()
        }
        Err(e) => error_response(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fanout::FanOutConfig;
    use crate::probe::ProbeTarget;
    use crate::testing::ScriptedProber;
    use crate::topology::AssemblerConfig;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn router() -> Router {
        let prober = ScriptedProber::new().reply(
            "a",
            "hub",
            vec![("leaf-1", "10.0.0.1", 7422), ("leaf-2", "10.0.0.2", 7422)],
        );
        let topology = TopologyService::new(
            vec![ProbeTarget::new("a"), ProbeTarget::new("b")],
            Arc::new(prober),
            FanOutConfig::default(),
            AssemblerConfig::default(),
        );
        let metrics = Arc::new(Metrics::new().unwrap());
        let ledger = AccountLedger::new().with_metrics(metrics.clone());
        ledger.open_account("User1", 100).unwrap();

        RestRouter::new(
            Arc::new(topology),
            Arc::new(ledger),
            Arc::new(ProjectCounters::new()),
            metrics,
        )
        .build()
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_network_returns_graph() {
        let request = Request::get("/api/v1/nats/network")
            .body(Body::empty())
            .unwrap();
        let (status, json) = send(router(), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["nodes"].as_array().unwrap().len(), 3);
        assert_eq!(json["edges"].as_array().unwrap().len(), 2);
        assert_eq!(json["nodes"][0]["type"], "master");
        assert_eq!(json["nodes"][0]["info"]["port"], 4222);
    }

    #[tokio::test]
    async fn test_topology_reports_failed_targets() {
        let request = Request::get("/api/v1/topology").body(Body::empty()).unwrap();
        let (status, json) = send(router(), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["probed"], 2);
        assert_eq!(json["succeeded"], 1);
        assert_eq!(json["failedTargets"][0]["address"], "b");
    }

    #[tokio::test]
    async fn test_account_flow() {
        let app = router();

        let deposit = post_json(
            "/api/v1/accounts/User1/deposit",
            serde_json::json!({"amount": 50}),
        );
        let (status, json) = send(app.clone(), deposit).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "applied");
        assert_eq!(json["balance"], 150);

        let withdraw = post_json(
            "/api/v1/accounts/User1/withdraw",
            serde_json::json!({"amount": 500}),
        );
        let (status, json) = send(app.clone(), withdraw).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "declined");
        assert_eq!(json["balance"], 150);

        let request = Request::get("/api/v1/accounts/User1").body(Body::empty()).unwrap();
        let (_, json) = send(app, request).await;
        assert_eq!(json["balance"], 150);
    }

    #[tokio::test]
    async fn test_account_errors() {
        let app = router();

        let request = Request::get("/api/v1/accounts/nobody")
            .body(Body::empty())
            .unwrap();
        let (status, json) = send(app.clone(), request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], "not_found");

        let (status, _) = send(
            app.clone(),
            post_json(
                "/api/v1/accounts",
                serde_json::json!({"accountId": "User1", "initialBalance": 5}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let zero = post_json(
            "/api/v1/accounts/User1/deposit",
            serde_json::json!({"amount": 0}),
        );
        let (status, json) = send(app, zero).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "invalid_amount");
    }

    #[tokio::test]
    async fn test_projects() {
        let app = router();
        for _ in 0..3 {
            let request = Request::post("/api/v1/projects/alpha/increment")
                .body(Body::empty())
                .unwrap();
            send(app.clone(), request).await;
        }
        let request = Request::get("/api/v1/projects").body(Body::empty()).unwrap();
        let (status, json) = send(app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["projects"]["alpha"], 3);
        assert_eq!(json["total"], 3);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let app = router();
        let deposit = post_json(
            "/api/v1/accounts/User1/deposit",
            serde_json::json!({"amount": 1}),
        );
        send(app.clone(), deposit).await;

        let response = app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(body.contains(
            "leaf_topology_mutations_total{operation=\"deposit\",outcome=\"applied\"} 1"
        ));
    }
}
