// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! `config.get`/`config.set` (spec §4.11): dot-path reads against the
//! redacted snapshot, deep-merged writes against the live tree.

use crate::connection::ConnCtx;
use crate::dispatcher::{HandlerOutcome, HandlerResult};
use crate::handlers::parse_params;
use crate::state::GatewayState;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
struct GetParams {
    #[serde(default)]
    path: Option<String>,
}

pub async fn config_get(state: &GatewayState, _ctx: &ConnCtx, params: Option<Value>) -> HandlerResult {
    let p: GetParams = parse_params(params)?;
    let safe = state.config.safe_snapshot();
    let value = match &p.path {
        Some(path) => path.split('.').try_fold(&safe, |node, seg| node.get(seg)).cloned().unwrap_or(Value::Null),
        None => safe,
    };
    Ok(HandlerOutcome::Ok(json!({ "value": value })))
}

#[derive(Debug, Deserialize)]
struct SetParams {
    path: String,
    value: Value,
}

pub async fn config_set(state: &GatewayState, _ctx: &ConnCtx, params: Option<Value>) -> HandlerResult {
    let p: SetParams = parse_params(params)?;
    state.config.set_path(&p.path, p.value);
    Ok(HandlerOutcome::Ok(json!({ "ok": true })))
}
