// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Surface RPCs (`surface.open/close/update/focus/list`) — thin wrappers
//! over [`crate::surface::SurfaceRegistry`] that also broadcast the change
//! to every connected client so surfaces stay replicated (spec §3).

use crate::connection::{ConnCtx, Outbound};
use crate::dispatcher::{HandlerOutcome, HandlerResult};
use crate::handlers::parse_params;
use crate::state::GatewayState;
use crate::surface::{Rect, SurfaceKind, SurfaceState};
use gsv_protocol::Frame;
use serde::Deserialize;
use serde_json::{json, Value};

/// Replicates a surface change to every other connected client (spec §3:
/// "Broadcast-replicated to all clients except the originator").
fn broadcast(state: &GatewayState, originator_client_id: &str, event: &str, surface: &crate::surface::Surface) {
    state.connections.broadcast_to_clients_except(originator_client_id, Frame::evt(event, Some(serde_json::to_value(surface).unwrap_or(Value::Null))));
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenParams {
    #[serde(default)]
    surface_id: Option<String>,
    kind: SurfaceKind,
    label: String,
    content_ref: String,
    #[serde(default)]
    target_client_id: Option<String>,
    #[serde(default)]
    rect: Option<Rect>,
    #[serde(default)]
    z_index: Option<i32>,
}

pub async fn surface_open(state: &GatewayState, ctx: &ConnCtx, params: Option<Value>, now_ms: i64) -> HandlerResult {
    let p: OpenParams = parse_params(params)?;
    let surface_id = p.surface_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let target = p.target_client_id.unwrap_or_else(|| ctx.peer_id.clone());
    let surface = state.surfaces.open(surface_id, p.kind, p.label, p.content_ref, target, Some(ctx.peer_id.clone()), p.rect, p.z_index, now_ms);
    broadcast(state, &ctx.peer_id, "surface.open", &surface);
    Ok(HandlerOutcome::Ok(serde_json::to_value(surface).unwrap()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SurfaceIdParams {
    surface_id: String,
}

pub async fn surface_close(state: &GatewayState, ctx: &ConnCtx, params: Option<Value>) -> HandlerResult {
    let p: SurfaceIdParams = parse_params(params)?;
    let surface = state.surfaces.close(&p.surface_id)?;
    broadcast(state, &ctx.peer_id, "surface.close", &surface);
    Ok(HandlerOutcome::Ok(serde_json::to_value(surface).unwrap()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateParams {
    surface_id: String,
    #[serde(default)]
    rect: Option<Rect>,
    #[serde(default)]
    z_index: Option<i32>,
    #[serde(default)]
    state: Option<SurfaceState>,
}

pub async fn surface_update(state: &GatewayState, ctx: &ConnCtx, params: Option<Value>, now_ms: i64) -> HandlerResult {
    let p: UpdateParams = parse_params(params)?;
    let surface = state.surfaces.update(&p.surface_id, p.rect, p.z_index, p.state, now_ms)?;
    broadcast(state, &ctx.peer_id, "surface.update", &surface);
    Ok(HandlerOutcome::Ok(serde_json::to_value(surface).unwrap()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FocusParams {
    surface_id: String,
    #[serde(default)]
    z_index: Option<i32>,
}

pub async fn surface_focus(state: &GatewayState, ctx: &ConnCtx, params: Option<Value>, now_ms: i64) -> HandlerResult {
    let p: FocusParams = parse_params(params)?;
    let z_index = p.z_index.unwrap_or(i32::MAX);
    let surface = state.surfaces.focus(&p.surface_id, z_index, now_ms)?;
    broadcast(state, &ctx.peer_id, "surface.focus", &surface);
    Ok(HandlerOutcome::Ok(serde_json::to_value(surface).unwrap()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListParams {
    #[serde(default)]
    target_client_id: Option<String>,
}

pub async fn surface_list(state: &GatewayState, _ctx: &ConnCtx, params: Option<Value>) -> HandlerResult {
    let p: ListParams = parse_params(params)?;
    let surfaces = state.surfaces.list(p.target_client_id.as_deref());
    Ok(HandlerOutcome::Ok(json!({ "surfaces": surfaces })))
}
