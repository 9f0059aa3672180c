// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! `GET|PUT /fs/{r2-key}` — authorized blob access (spec §6).
//!
//! A Bearer token minted by `fs.authorize` (see [`super::auth`]) scopes the
//! caller to exactly one key. Path traversal in the key itself is rejected
//! the same way `handlers::misc::resolve_relative` rejects it for the
//! workspace-file RPCs; the two guards are independent because this one
//! runs outside the dispatcher, against a raw URL path segment.

use crate::state::GatewayState;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use std::sync::Arc;

/// `PUT` bodies over this size are rejected with 413 (spec §6).
const MAX_PUT_BYTES: usize = 50 * 1024 * 1024;

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?.strip_prefix("Bearer ")
}

fn rejects_traversal(key: &str) -> bool {
    key.split('/').any(|segment| segment == ".." || segment.is_empty())
}

pub async fn get_blob(State(state): State<Arc<GatewayState>>, Path(r2_key): Path<String>, headers: HeaderMap) -> Response {
    if rejects_traversal(&r2_key) {
        return (StatusCode::BAD_REQUEST, "invalid key").into_response();
    }
    let now_ms = chrono::Utc::now().timestamp_millis();
    let Some(token) = bearer_token(&headers) else { return StatusCode::UNAUTHORIZED.into_response() };
    if !super::auth::verify_fs_token(token, &r2_key, now_ms) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    match state.transfers.blob_store.get(&r2_key).await {
        Ok(bytes) => bytes.into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

pub async fn put_blob(State(state): State<Arc<GatewayState>>, Path(r2_key): Path<String>, headers: HeaderMap, body: Bytes) -> Response {
    if rejects_traversal(&r2_key) {
        return (StatusCode::BAD_REQUEST, "invalid key").into_response();
    }
    let now_ms = chrono::Utc::now().timestamp_millis();
    let Some(token) = bearer_token(&headers) else { return StatusCode::UNAUTHORIZED.into_response() };
    if !super::auth::verify_fs_token(token, &r2_key, now_ms) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if body.len() > MAX_PUT_BYTES {
        return StatusCode::PAYLOAD_TOO_LARGE.into_response();
    }

    if let Err(e) = state.transfers.blob_store.put(&r2_key, &body).await {
        tracing::warn!(error = %e, r2_key, "blob put failed");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    if let Some(meta) = parse_r2_meta(&headers) {
        let _ = state.transfers.blob_store.put_meta(&r2_key, meta).await;
    }

    StatusCode::OK.into_response()
}

/// `X-R2-Meta`: a JSON object of string values. Malformed JSON (or a
/// non-object) is ignored rather than rejected — spec §6 "malformed
/// ignored".
fn parse_r2_meta(headers: &HeaderMap) -> Option<HashMap<String, String>> {
    let raw = headers.get("X-R2-Meta")?.to_str().ok()?;
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    let obj = value.as_object()?;
    Some(obj.iter().filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string()))).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_parent_dir_segments() {
        assert!(rejects_traversal("a/../b"));
        assert!(rejects_traversal("../b"));
        assert!(!rejects_traversal("a/b/c.txt"));
    }

    #[test]
    fn r2_meta_header_with_malformed_json_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert("X-R2-Meta", "not json".parse().unwrap());
        assert!(parse_r2_meta(&headers).is_none());
    }

    #[test]
    fn r2_meta_header_parses_a_string_object() {
        let mut headers = HeaderMap::new();
        headers.insert("X-R2-Meta", r#"{"mime":"text/plain"}"#.parse().unwrap());
        let meta = parse_r2_meta(&headers).unwrap();
        assert_eq!(meta.get("mime").map(String::as_str), Some("text/plain"));
    }
}
