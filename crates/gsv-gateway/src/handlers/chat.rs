// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! `chat.send` (spec §4.6): hands a user turn to the session bridge with a
//! fresh `runId` and a deep-copied tool/node snapshot.

use crate::connection::ConnCtx;
use crate::dispatcher::{HandlerOutcome, HandlerResult};
use crate::handlers::parse_params;
use crate::state::GatewayState;
use gsv_protocol::GatewayError;
use gsv_session::{SessionSnapshot, UserMessage};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatSendParams {
    #[serde(default)]
    session_key: Option<String>,
    message: UserMessage,
    #[serde(default)]
    idempotency_key: Option<String>,
}

pub async fn chat_send(state: &GatewayState, _ctx: &ConnCtx, params: Option<Value>) -> HandlerResult {
    let p: ChatSendParams = parse_params(params)?;
    let session_key = state.canonicalize_session_key(p.session_key.as_deref().unwrap_or(&state.main_key()));

    let tools = state.nodes.all_tools().await?;
    let nodes = state.nodes.list().await?;
    let snapshot = SessionSnapshot { tools, runtime_nodes: nodes.into_iter().map(|n| serde_json::to_value(n).unwrap_or(Value::Null)).collect() };

    let run_id = uuid::Uuid::new_v4().to_string();
    let outcome = state
        .session_bridge
        .chat_send(&session_key, p.message, &run_id, snapshot, p.idempotency_key.as_deref(), None)
        .await
        .map_err(|e| GatewayError::Internal(e.to_string()))?;

    Ok(HandlerOutcome::Ok(json!({ "ok": outcome.ok, "runId": outcome.run_id, "queued": outcome.queued })))
}
