use crate::daemon::LeaseDaemon;
use crate::replicator::Replicator;
use crate::types::*;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub fn create_router(daemon: Arc<LeaseDaemon>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(get_status))
        .route("/servers", get(list_servers))
        .route("/leases", get(list_leases))
        .route("/leases/claim", post(claim_lease))
        .route("/leases/extend", post(extend_lease))
        .route("/leases/revoke", post(revoke_lease))
        .with_state(daemon)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn get_status(State(daemon): State<Arc<LeaseDaemon>>) -> impl IntoResponse {
    Json(daemon.node().status())
}

async fn list_servers(State(daemon): State<Arc<LeaseDaemon>>) -> impl IntoResponse {
    Json(daemon.node().servers())
}

#[derive(Serialize)]
struct LeaseView {
    #[serde(flatten)]
    key: LeaseKey,
    holder: String,
    start: chrono::DateTime<chrono::Utc>,
    expiry: Option<chrono::DateTime<chrono::Utc>>,
}

async fn list_leases(State(daemon): State<Arc<LeaseDaemon>>) -> impl IntoResponse {
    let leases: Vec<LeaseView> = daemon
        .node()
        .leases()
        .into_iter()
        .map(|(key, info)| LeaseView {
            expiry: info.expiry(),
            key,
            holder: info.holder,
            start: info.start,
        })
        .collect();
    Json(leases)
}

#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    #[serde(flatten)]
    pub key: LeaseKey,
    pub holder: String,
    pub duration_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct RevokeRequest {
    #[serde(flatten)]
    pub key: LeaseKey,
    pub holder: String,
}

async fn claim_lease(
    State(daemon): State<Arc<LeaseDaemon>>,
    Json(req): Json<ClaimRequest>,
) -> Response {
    if req.holder.is_empty() {
        return bad_request("holder must not be empty");
    }
    submit(
        &daemon,
        LeaseCommand::Claim {
            key: req.key,
            holder: req.holder,
            duration: Duration::from_secs(req.duration_secs),
        },
    )
    .await
}

async fn extend_lease(
    State(daemon): State<Arc<LeaseDaemon>>,
    Json(req): Json<ClaimRequest>,
) -> Response {
    if req.holder.is_empty() {
        return bad_request("holder must not be empty");
    }
    submit(
        &daemon,
        LeaseCommand::Extend {
            key: req.key,
            holder: req.holder,
            duration: Duration::from_secs(req.duration_secs),
        },
    )
    .await
}

async fn revoke_lease(
    State(daemon): State<Arc<LeaseDaemon>>,
    Json(req): Json<RevokeRequest>,
) -> Response {
    submit(
        &daemon,
        LeaseCommand::Revoke {
            key: req.key,
            holder: req.holder,
        },
    )
    .await
}

async fn submit(daemon: &LeaseDaemon, command: LeaseCommand) -> Response {
    let key = command.key().clone();
    match daemon.node().propose(command).await {
        Ok(LeaseResponse::Applied) => (
            StatusCode::OK,
            Json(serde_json::json!({ "status": "applied", "lease": key.to_string() })),
        )
            .into_response(),
        Ok(LeaseResponse::Rejected(e)) => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "error": e.to_string(),
                "leader_id": daemon.node().leader_id(),
            })),
        )
            .into_response(),
    }
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": message })),
    )
        .into_response()
}
