//! Management HTTP API (section 6.4) and the HTTP-facing convergence-layer
//! ingress routes it shares a server with (section 4.6.3/4.6.4: `/push`,
//! `/status/bundles`, `/download`). Errors are reported the legacy way this
//! family of agents uses: a `200 OK` body prefixed `Error: ...`, except
//! `DELETE /bundles/<id>` which uses native status codes.

use crate::api::node::DtnNode;
use crate::bpv7::bundle::{decode, encode};
use crate::bpv7::EndpointId;
use crate::consts::DEFAULT_LIFETIME_SECS;
use crate::peer::PeerKind;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use axum::body::Bytes;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
struct AppState {
    core: Arc<DtnNode>,
    started_at: Instant,
}

pub fn build_router(core: Arc<DtnNode>) -> Router {
    let state = AppState {
        core,
        started_at: Instant::now(),
    };
    Router::new()
        .route("/", get(landing))
        .route("/test", get(test_route))
        .route("/status", get(status))
        .route("/stats", get(stats))
        .route("/bundles", get(list_bundles))
        .route("/bundles/{id}", delete(delete_bundle))
        .route("/peers", get(list_peers))
        .route("/register", get(register_endpoint))
        .route("/unregister", get(unregister_endpoint))
        .route("/send", post(send_bundle))
        .route("/endpoint", get(poll_endpoint))
        .route("/push", post(push_bundle))
        .route("/status/bundles", get(status_bundles))
        .route("/download", get(download_bundle))
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(core: Arc<DtnNode>, port: u16) -> anyhow::Result<()> {
    let app = build_router(core);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    log::info!("management API listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn landing() -> Html<&'static str> {
    Html(
        "<html><body><h1>dtnagent</h1><ul>\
         <li><a href=\"/status\">/status</a></li>\
         <li><a href=\"/stats\">/stats</a></li>\
         <li><a href=\"/bundles\">/bundles</a></li>\
         <li><a href=\"/peers\">/peers</a></li>\
         </ul></body></html>",
    )
}

async fn test_route() -> &'static str {
    "Test route working"
}

async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let snapshot = state.core.stats_snapshot().await;
    Json(serde_json::json!({
        "nodeId": state.core.node_id.description(),
        "uptime": state.started_at.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
        "statistics": {
            "incoming": snapshot.incoming,
            "outgoing": snapshot.outgoing,
            "delivered": snapshot.delivered,
            "stored": snapshot.stored,
        },
    }))
}

async fn stats(State(state): State<AppState>) -> Json<crate::stats::StatsSnapshot> {
    Json(state.core.stats_snapshot().await)
}

async fn list_bundles(State(state): State<AppState>) -> Json<serde_json::Value> {
    let ids = state.core.store.all_ids().await.unwrap_or_default();
    Json(serde_json::json!({"count": ids.len(), "bundles": ids}))
}

async fn delete_bundle(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    match state.core.store.remove(&id).await {
        Ok(()) => StatusCode::OK,
        Err(_) => StatusCode::NOT_FOUND,
    }
}

async fn list_peers(State(state): State<AppState>) -> Json<serde_json::Value> {
    let peers: Vec<serde_json::Value> = state
        .core
        .peer_manager
        .get_all()
        .into_iter()
        .map(|p| {
            serde_json::json!({
                "eid": p.eid.description(),
                "type": match p.kind {
                    PeerKind::Static => "static",
                    PeerKind::Dynamic => "dynamic",
                },
                "lastContact": p.last_contact_secs,
                "services": p.services,
            })
        })
        .collect();
    Json(serde_json::json!({"count": peers.len(), "peers": peers}))
}

#[derive(Deserialize)]
struct EndpointQuery {
    endpoint: String,
}

async fn register_endpoint(State(state): State<AppState>, Query(q): Query<EndpointQuery>) -> String {
    match EndpointId::parse(&q.endpoint) {
        Ok(eid) => {
            state.core.register_endpoint(eid).await;
            format!("registered {}", q.endpoint)
        }
        Err(e) => format!("Error: {e}"),
    }
}

async fn unregister_endpoint(State(state): State<AppState>, Query(q): Query<EndpointQuery>) -> String {
    match EndpointId::parse(&q.endpoint) {
        Ok(eid) => {
            state.core.unregister_endpoint(&eid).await;
            format!("unregistered {}", q.endpoint)
        }
        Err(e) => format!("Error: {e}"),
    }
}

#[derive(Deserialize)]
struct SendQuery {
    dst: String,
    src: Option<String>,
    /// Milliseconds, matching what callers of this route send; bundles
    /// themselves track lifetime in seconds (converted below).
    lifetime: Option<u64>,
}

async fn send_bundle(State(state): State<AppState>, Query(q): Query<SendQuery>, body: Bytes) -> String {
    let destination = match EndpointId::parse(&q.dst) {
        Ok(eid) => eid,
        Err(e) => return format!("Error: {e}"),
    };
    let source = match q.src {
        Some(s) => match EndpointId::parse(&s) {
            Ok(eid) => Some(eid),
            Err(e) => return format!("Error: {e}"),
        },
        None => None,
    };
    let lifetime_secs = q.lifetime.unwrap_or(DEFAULT_LIFETIME_SECS * 1000) / 1000;
    match state
        .core
        .submit_bundle(destination, source, body.to_vec(), lifetime_secs)
        .await
    {
        Ok(id) => id,
        Err(e) => format!("Error: {e}"),
    }
}

async fn poll_endpoint(State(state): State<AppState>, Query(q): Query<EndpointQuery>) -> String {
    let eid = match EndpointId::parse(&q.endpoint) {
        Ok(eid) => eid,
        Err(e) => return format!("Error: {e}"),
    };
    match state.core.application_agent.take_pending(&eid) {
        Some(bundle) => match encode(&bundle) {
            Ok(bytes) => BASE64.encode(bytes),
            Err(e) => format!("Error: {e}"),
        },
        None => "Nothing to receive".to_string(),
    }
}

async fn push_bundle(State(state): State<AppState>, body: Bytes) -> StatusCode {
    match decode(&body) {
        Ok(bundle) => {
            let _ = state.core.processor.receive(&state.core, bundle).await;
            StatusCode::OK
        }
        Err(_) => StatusCode::BAD_REQUEST,
    }
}

async fn status_bundles(State(state): State<AppState>) -> Json<serde_json::Value> {
    let ids = state.core.store.all_ids().await.unwrap_or_default();
    Json(serde_json::json!({"bundles": ids}))
}

#[derive(Deserialize)]
struct DownloadQuery {
    bundle: String,
}

async fn download_bundle(State(state): State<AppState>, Query(q): Query<DownloadQuery>) -> impl IntoResponse {
    match state.core.store.get_bundle(&q.bundle).await {
        Ok(Some(bundle)) => match encode(&bundle) {
            Ok(bytes) => (StatusCode::OK, bytes).into_response(),
            Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        },
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn test_core() -> Arc<DtnNode> {
        DtnNode::new(NodeConfig::for_tests(EndpointId::from("dtn://n1")))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_test_route_returns_ready_marker() {
        let app = build_router(test_core().await);
        let response = app
            .oneshot(Request::builder().uri("/test").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_delete_missing_bundle_is_not_found() {
        let app = build_router(test_core().await);
        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/bundles/nonexistent")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_send_then_endpoint_round_trips_payload() {
        let core = test_core().await;
        core.register_endpoint(EndpointId::from("dtn://n1/echo")).await;
        let app = build_router(core);

        let send = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/send?dst=dtn://n1/echo&src=dtn://n1/ping")
                    .body(Body::from("hello"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(send.status(), StatusCode::OK);

        let poll = app
            .oneshot(
                Request::builder()
                    .uri("/endpoint?endpoint=dtn://n1/echo")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(poll.into_body(), usize::MAX).await.unwrap();
        let decoded = BASE64.decode(bytes).unwrap();
        let bundle = decode(&decoded).unwrap();
        assert_eq!(bundle.payload(), b"hello");
    }
}
