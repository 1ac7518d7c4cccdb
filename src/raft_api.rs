//! Inbound raft RPC. Mirrors the paths `HttpNetwork` posts to.

use crate::replicator::storage::TypeConfig;
use crate::replicator::RaftNode;
use crate::types::NodeId;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use openraft::raft::{AppendEntriesRequest, InstallSnapshotRequest, VoteRequest};
use serde::Serialize;
use std::fmt::Display;
use std::sync::Arc;
use tracing::debug;

pub fn create_raft_router(node: Arc<RaftNode>) -> Router {
    Router::new()
        .route("/raft/vote", post(handle_vote))
        .route("/raft/append_entries", post(handle_append_entries))
        .route("/raft/install_snapshot", post(handle_install_snapshot))
        .with_state(node)
}

fn reply<T: Serialize, E: Display>(rpc: &str, result: Result<T, E>) -> Response {
    match result {
        Ok(resp) => (StatusCode::OK, Json(resp)).into_response(),
        Err(e) => {
            debug!("Raft {} rejected: {}", rpc, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

async fn handle_vote(
    State(node): State<Arc<RaftNode>>,
    Json(req): Json<VoteRequest<NodeId>>,
) -> Response {
    reply("vote", node.raft().vote(req).await)
}

async fn handle_append_entries(
    State(node): State<Arc<RaftNode>>,
    Json(req): Json<AppendEntriesRequest<TypeConfig>>,
) -> Response {
    reply("append_entries", node.raft().append_entries(req).await)
}

async fn handle_install_snapshot(
    State(node): State<Arc<RaftNode>>,
    Json(req): Json<InstallSnapshotRequest<TypeConfig>>,
) -> Response {
    reply("install_snapshot", node.raft().install_snapshot(req).await)
}
