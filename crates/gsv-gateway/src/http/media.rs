// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! `GET /media/{uuid.ext}` — legacy unauthenticated media route (spec §6).
//!
//! No bearer token; the only gate is an `expiresAt` custom metadata value
//! (milliseconds since epoch) set when the blob was written. Past it, the
//! route answers 410 Gone rather than serving stale shared links.

use crate::state::GatewayState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

pub async fn get_media(State(state): State<Arc<GatewayState>>, Path(key): Path<String>) -> Response {
    let meta = state.transfers.blob_store.meta(&key).await.unwrap_or_default();
    if let Some(expires_at_ms) = meta.get("expiresAt").and_then(|s| s.parse::<i64>().ok()) {
        let now_ms = chrono::Utc::now().timestamp_millis();
        if now_ms >= expires_at_ms {
            return StatusCode::GONE.into_response();
        }
    }

    match state.transfers.blob_store.get(&key).await {
        Ok(bytes) => bytes.into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}
