// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! HTTP/WebSocket surface (spec §6): the `axum::Router` a host binds to a
//! listener, plus [`serve`], a small convenience that also spawns the two
//! background loops every running gateway needs alongside it —
//! [`crate::run_broadcast_task`] and [`gsv_scheduler::AlarmOrchestrator::run_forever`]
//! built from [`crate::alarm_participants::build_participants`].
//!
//! Wiring a listener address, TLS, and CLI flags onto this is left to
//! whatever embeds the crate, the same boundary the teacher's own
//! `sven-gateway::gateway::run` draws between `crate::http::serve` and the
//! surrounding process.

pub mod auth;
pub mod fs_blob;
pub mod media;
pub mod rate_limit;
pub mod ws;

use crate::state::GatewayState;
use axum::http::{HeaderName, HeaderValue, Request};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer};
use tower_http::set_header::SetResponseHeaderLayer;

#[derive(Clone, Default)]
struct MakeRequestUuid;

impl MakeRequestId for MakeRequestUuid {
    fn make_request_id<B>(&mut self, _req: &Request<B>) -> Option<RequestId> {
        let id = HeaderValue::from_str(&uuid::Uuid::new_v4().to_string()).ok()?;
        Some(RequestId::new(id))
    }
}

/// Ambient HTTP hygiene carried from the teacher's `sven-gateway`/`sven-node`
/// stack (SPEC_FULL.md §6 expansion): a request id on every response plus a
/// minimal set of security headers. Not a spec-mandated feature — just the
/// same `tower-http` layering the teacher applies to any HTTP surface it
/// exposes.
pub fn router(state: Arc<GatewayState>) -> Router {
    let request_id_header = HeaderName::from_static("x-request-id");
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws::ws_handler))
        .route("/fs/*r2_key", get(fs_blob::get_blob).put(fs_blob::put_blob))
        .route("/media/:key", get(media::get_media))
        .layer(SetResponseHeaderLayer::if_not_present(HeaderName::from_static("x-content-type-options"), HeaderValue::from_static("nosniff")))
        .layer(SetResponseHeaderLayer::if_not_present(HeaderName::from_static("x-frame-options"), HeaderValue::from_static("DENY")))
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

/// Binds `router(state)` to `addr`, spawns the broadcast and alarm loops,
/// and serves until the process is killed. Blocks.
pub async fn serve(addr: std::net::SocketAddr, state: Arc<GatewayState>, events: tokio::sync::mpsc::UnboundedReceiver<(String, gsv_session::ChatEvent)>) -> anyhow::Result<()> {
    tokio::spawn(crate::run_broadcast_task(state.clone(), events));

    let orchestrator = gsv_scheduler::AlarmOrchestrator::new(crate::alarm_participants::build_participants(state.clone()));
    tokio::spawn(async move {
        loop {
            if let Err(e) = orchestrator.run_forever(|| chrono::Utc::now().timestamp_millis()).await {
                tracing::warn!(error = %e, "alarm orchestrator loop exited with an error");
            }
            tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
        }
    });

    tracing::info!(%addr, "gateway HTTP/WS listening");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, router(state).into_make_service_with_connect_info::<std::net::SocketAddr>()).await?;
    Ok(())
}
