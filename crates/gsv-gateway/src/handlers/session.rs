// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Session introspection/control (`session.get/patch/stats/reset/history/
//! preview/compact`, `sessions.list`) — thin pass-throughs to
//! [`gsv_session::SessionBridge`] plus the discovery-only session registry.

use crate::connection::ConnCtx;
use crate::dispatcher::{HandlerOutcome, HandlerResult};
use crate::handlers::parse_params;
use crate::state::GatewayState;
use gsv_protocol::GatewayError;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
struct KeyParams {
    #[serde(default, rename = "sessionKey")]
    session_key: Option<String>,
}

fn resolve_key(state: &GatewayState, key: Option<String>) -> String {
    state.canonicalize_session_key(key.as_deref().unwrap_or(&state.main_key()))
}

pub async fn session_get(state: &GatewayState, _ctx: &ConnCtx, params: Option<Value>) -> HandlerResult {
    let p: KeyParams = parse_params(params)?;
    let key = resolve_key(state, p.session_key);
    let value = state.session_bridge.get(&key).await.map_err(|e| GatewayError::Internal(e.to_string()))?;
    Ok(HandlerOutcome::Ok(value))
}

pub async fn session_stats(state: &GatewayState, _ctx: &ConnCtx, params: Option<Value>) -> HandlerResult {
    let p: KeyParams = parse_params(params)?;
    let key = resolve_key(state, p.session_key);
    let value = state.session_bridge.stats(&key).await.map_err(|e| GatewayError::Internal(e.to_string()))?;
    Ok(HandlerOutcome::Ok(value))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PatchParams {
    #[serde(default)]
    session_key: Option<String>,
    patch: Value,
}

pub async fn session_patch(state: &GatewayState, _ctx: &ConnCtx, params: Option<Value>) -> HandlerResult {
    let p: PatchParams = parse_params(params)?;
    let key = resolve_key(state, p.session_key);
    let value = state.session_bridge.patch(&key, p.patch).await.map_err(|e| GatewayError::Internal(e.to_string()))?;
    Ok(HandlerOutcome::Ok(value))
}

pub async fn session_reset(state: &GatewayState, _ctx: &ConnCtx, params: Option<Value>) -> HandlerResult {
    let p: KeyParams = parse_params(params)?;
    let key = resolve_key(state, p.session_key);
    state.session_bridge.reset(&key).await.map_err(|e| GatewayError::Internal(e.to_string()))?;
    Ok(HandlerOutcome::Ok(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryParams {
    #[serde(default)]
    session_key: Option<String>,
    #[serde(default)]
    limit: Option<u32>,
}

pub async fn session_history(state: &GatewayState, _ctx: &ConnCtx, params: Option<Value>) -> HandlerResult {
    let p: HistoryParams = parse_params(params)?;
    let key = resolve_key(state, p.session_key);
    let history = state.session_bridge.history(&key, p.limit).await.map_err(|e| GatewayError::Internal(e.to_string()))?;
    Ok(HandlerOutcome::Ok(json!({ "history": history })))
}

pub async fn session_preview(state: &GatewayState, _ctx: &ConnCtx, params: Option<Value>) -> HandlerResult {
    let p: HistoryParams = parse_params(params)?;
    let key = resolve_key(state, p.session_key);
    let preview = state.session_bridge.preview(&key, p.limit).await.map_err(|e| GatewayError::Internal(e.to_string()))?;
    Ok(HandlerOutcome::Ok(json!({ "preview": preview })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompactParams {
    #[serde(default)]
    session_key: Option<String>,
    #[serde(default)]
    keep_last_n: Option<u32>,
}

pub async fn session_compact(state: &GatewayState, _ctx: &ConnCtx, params: Option<Value>) -> HandlerResult {
    let p: CompactParams = parse_params(params)?;
    let key = resolve_key(state, p.session_key);
    state.session_bridge.compact(&key, p.keep_last_n).await.map_err(|e| GatewayError::Internal(e.to_string()))?;
    Ok(HandlerOutcome::Ok(json!({ "ok": true })))
}

pub async fn sessions_list(state: &GatewayState, _ctx: &ConnCtx, _params: Option<Value>) -> HandlerResult {
    let entries = state.sessions.list().await?;
    Ok(HandlerOutcome::Ok(json!({ "sessions": entries })))
}
