// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Lighter handler groups out of this crate's core scope (spec §1 "out of
//! scope: ... UI rendering"): skills status passthrough, a workspace
//! file-tree view scoped to the configured base directory, `fs.authorize`
//! minting short-lived blob tokens, and the canvas surface — stubbed to
//! `501 Not Implemented` per the spec's own Open Question ("canvas was a
//! half-built surface in the source; defer it rather than guess its
//! shape").

use crate::connection::ConnCtx;
use crate::dispatcher::{HandlerOutcome, HandlerResult};
use crate::handlers::parse_params;
use crate::state::GatewayState;
use gsv_protocol::GatewayError;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Component, Path, PathBuf};

pub async fn skills_status(state: &GatewayState, _ctx: &ConnCtx, _params: Option<Value>) -> HandlerResult {
    let value = state.config.get_path("skills").unwrap_or(json!({}));
    Ok(HandlerOutcome::Ok(value))
}

pub async fn skills_update(state: &GatewayState, _ctx: &ConnCtx, params: Option<Value>) -> HandlerResult {
    #[derive(Debug, Deserialize)]
    struct P {
        patch: Value,
    }
    let p: P = parse_params(params)?;
    state.config.set_path("skills", p.patch);
    Ok(HandlerOutcome::Ok(json!({ "ok": true })))
}

fn workspace_root(state: &GatewayState) -> PathBuf {
    state.config.get_path("workspace.root").and_then(|v| v.as_str().map(PathBuf::from)).unwrap_or_else(|| PathBuf::from("."))
}

/// Rejects any path escaping the workspace root via `..`/absolute
/// components — the same traversal guard the blob/fs HTTP surface uses
/// (spec §6 "path-traversal rejection").
fn resolve_relative(root: &Path, relative: &str) -> Result<PathBuf, GatewayError> {
    let candidate = Path::new(relative);
    if candidate.components().any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_))) {
        return Err(GatewayError::Forbidden("path escapes workspace root".into()));
    }
    Ok(root.join(candidate))
}

#[derive(Debug, Deserialize)]
struct PathParams {
    #[serde(default)]
    path: Option<String>,
}

pub async fn workspace_list(state: &GatewayState, _ctx: &ConnCtx, params: Option<Value>) -> HandlerResult {
    let p: PathParams = parse_params(params)?;
    let root = workspace_root(state);
    let dir = resolve_relative(&root, p.path.as_deref().unwrap_or(""))?;
    let mut entries = Vec::new();
    let mut rd = tokio::fs::read_dir(&dir).await.map_err(|e| GatewayError::NotFound(e.to_string()))?;
    while let Some(entry) = rd.next_entry().await.map_err(|e| GatewayError::Internal(e.to_string()))? {
        let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
        entries.push(json!({ "name": entry.file_name().to_string_lossy(), "isDir": is_dir }));
    }
    Ok(HandlerOutcome::Ok(json!({ "entries": entries })))
}

pub async fn workspace_read(state: &GatewayState, _ctx: &ConnCtx, params: Option<Value>) -> HandlerResult {
    let p: PathParams = parse_params(params)?;
    let root = workspace_root(state);
    let path = resolve_relative(&root, p.path.as_deref().unwrap_or(""))?;
    let bytes = tokio::fs::read(&path).await.map_err(|e| GatewayError::NotFound(e.to_string()))?;
    Ok(HandlerOutcome::Ok(json!({ "contentBase64": base64_encode(&bytes) })))
}

#[derive(Debug, Deserialize)]
struct WriteParams {
    path: String,
    #[serde(rename = "contentBase64")]
    content_base64: String,
}

pub async fn workspace_write(state: &GatewayState, _ctx: &ConnCtx, params: Option<Value>) -> HandlerResult {
    let p: WriteParams = parse_params(params)?;
    let root = workspace_root(state);
    let path = resolve_relative(&root, &p.path)?;
    let bytes = base64_decode(&p.content_base64).map_err(|e| GatewayError::BadParams(e))?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| GatewayError::Internal(e.to_string()))?;
    }
    tokio::fs::write(&path, bytes).await.map_err(|e| GatewayError::Internal(e.to_string()))?;
    Ok(HandlerOutcome::Ok(json!({ "ok": true })))
}

pub async fn workspace_delete(state: &GatewayState, _ctx: &ConnCtx, params: Option<Value>) -> HandlerResult {
    let p: PathParams = parse_params(params)?;
    let root = workspace_root(state);
    let path = resolve_relative(&root, p.path.as_deref().unwrap_or(""))?;
    tokio::fs::remove_file(&path).await.map_err(|e| GatewayError::NotFound(e.to_string()))?;
    Ok(HandlerOutcome::Ok(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FsAuthorizeParams {
    r2_key: String,
    #[serde(default)]
    ttl_seconds: Option<u32>,
}

/// `fs.authorize`: mints the bearer token the `GET|PUT /fs/{r2-key}` HTTP
/// route checks (spec §6). The token itself is a signed opaque string the
/// `http::fs_blob` module verifies; this handler only records the grant.
pub async fn fs_authorize(_state: &GatewayState, _ctx: &ConnCtx, params: Option<Value>, now_ms: i64) -> HandlerResult {
    let p: FsAuthorizeParams = parse_params(params)?;
    let ttl_ms = (p.ttl_seconds.unwrap_or(300) as i64) * 1000;
    let token = crate::http::auth::mint_fs_token(&p.r2_key, now_ms + ttl_ms);
    Ok(HandlerOutcome::Ok(json!({ "token": token, "expiresAtMs": now_ms + ttl_ms })))
}

/// Every `canvas.*` method is registered (so it participates in dispatch
/// and shows up in `hello-ok`'s feature list) but answers `501` — the spec
/// defers its shape rather than guessing it from a half-built source
/// feature.
pub async fn canvas_not_implemented(_state: &GatewayState, _ctx: &ConnCtx, _params: Option<Value>) -> HandlerResult {
    Err(GatewayError::NotImplemented)
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn base64_decode(s: &str) -> Result<Vec<u8>, String> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(s).map_err(|e| e.to_string())
}
