// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Tool lifecycle handlers (spec §4.3-§4.4, §4.7): `tools.list`,
//! `tool.request`/`tool.invoke` (dispatch a call), `tool.result` (a node's
//! answer), the async-exec probe/event pair, and `node.forget`.

use crate::async_exec::{NodeExecEvent, RegisterOutcome};
use crate::connection::{ConnCtx, Outbound};
use crate::dispatcher::{HandlerOutcome, HandlerResult};
use crate::handlers::parse_params;
use crate::node_service::ToolTarget;
use crate::pending_ops::{ConsumeOutcome, PendingRoute};
use crate::state::GatewayState;
use gsv_protocol::{Frame, GatewayError};
use serde::Deserialize;
use serde_json::{json, Value};

/// Deep-copied tools + runtime-nodes snapshot folded into every
/// `ingestAsyncExecCompletion` delivery (spec §4.6/§4.7), mirroring the
/// snapshot `chat.send` already takes at dispatch time.
async fn inventory_snapshot(state: &GatewayState) -> Result<gsv_session::SessionSnapshot, GatewayError> {
    let tools = state.nodes.all_tools().await?;
    let nodes = state.nodes.list().await?;
    Ok(gsv_session::SessionSnapshot {
        tools,
        runtime_nodes: nodes.into_iter().map(|n| serde_json::to_value(n).unwrap_or(Value::Null)).collect(),
    })
}

pub async fn tools_list(state: &GatewayState, _ctx: &ConnCtx, _params: Option<Value>) -> HandlerResult {
    let tools = state.nodes.all_tools().await?;
    Ok(HandlerOutcome::Ok(json!({ "tools": tools })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvokeParams {
    tool: String,
    #[serde(default)]
    arguments: Value,
    #[serde(default)]
    call_id: Option<String>,
    #[serde(default)]
    session_key: Option<String>,
}

/// Shared body for `tool.request` (an active session's tool-use turn) and
/// `tool.invoke` (a client invoking a tool ad hoc, outside any session).
/// Both resolve to the same dispatch: native tools run inline, node tools
/// are sent as a `tool.invoke` event and the reply deferred until the
/// node's `tool.result` arrives (spec §4.2 `DEFER_RESPONSE`).
async fn dispatch_tool_call(state: &GatewayState, ctx: &ConnCtx, req_id: &str, now_ms: i64, params: Option<Value>) -> HandlerResult {
    let p: InvokeParams = parse_params(params)?;
    let call_id = p.call_id.unwrap_or_else(|| req_id.to_string());
    let target = state.nodes.resolve(&p.tool).await?;

    match target {
        ToolTarget::Native { tool_name } => crate::native_tools::invoke(state, ctx, &tool_name, p.arguments, now_ms).await,
        ToolTarget::Node { node_id, tool_name } => {
            let sender = state.connections.sender_for_node(&node_id).ok_or_else(|| GatewayError::DownstreamUnavailable(format!("node {node_id} not connected")))?;

            let route = match &p.session_key {
                Some(session_key) => PendingRoute::Session { session_key: state.canonicalize_session_key(session_key) },
                None => PendingRoute::Client { client_id: ctx.peer_id.clone(), request_id: req_id.to_string() },
            };
            state.pending_tools.insert(call_id.clone(), node_id.clone(), route, state.tool_timeout_ms(), now_ms);

            let evt = Frame::evt("tool.invoke", Some(json!({ "callId": call_id, "tool": tool_name, "arguments": p.arguments })));
            sender.send(Outbound::Frame(evt)).map_err(|_| GatewayError::DownstreamUnavailable(format!("node {node_id} outbound queue closed")))?;
            Ok(HandlerOutcome::Deferred)
        }
    }
}

pub async fn tool_request(state: &GatewayState, ctx: &ConnCtx, req_id: &str, params: Option<Value>, now_ms: i64) -> HandlerResult {
    dispatch_tool_call(state, ctx, req_id, now_ms, params).await
}

pub async fn tool_invoke(state: &GatewayState, ctx: &ConnCtx, req_id: &str, params: Option<Value>, now_ms: i64) -> HandlerResult {
    dispatch_tool_call(state, ctx, req_id, now_ms, params).await
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolResultParams {
    call_id: String,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

/// `tool.result` (node-only): at-most-once consume (P1), authorized-node
/// check (P2), then routed either back into the waiting session or
/// straight to the client that issued the direct `tool.invoke`.
///
/// A result carrying `{"status": "running", "sessionId": ...}` (spec §4.7
/// step 8) starts the async-exec pipeline tracking that session for a
/// later `node.exec.event` rather than resolving the call now.
pub async fn tool_result(state: &GatewayState, ctx: &ConnCtx, params: Option<Value>, now_ms: i64) -> HandlerResult {
    let p: ToolResultParams = parse_params(params)?;
    let op = match state.pending_tools.consume(&p.call_id, &ctx.peer_id) {
        ConsumeOutcome::Ok(op) => op,
        ConsumeOutcome::NotFound => return Err(GatewayError::NotFound(format!("no pending tool call {}", p.call_id))),
        ConsumeOutcome::WrongNode => return Err(GatewayError::Forbidden(format!("tool call {} is not routed to this node", p.call_id))),
    };

    if let Some(running_session_id) = p.result.as_ref().and_then(|r| {
        let is_running = r.get("status").and_then(Value::as_str) == Some("running");
        is_running.then(|| r.get("sessionId").and_then(Value::as_str)).flatten()
    }) {
        let session_key = match &op.route {
            PendingRoute::Session { session_key } => session_key.clone(),
            PendingRoute::Client { .. } => state.canonicalize_session_key(running_session_id),
        };
        state.async_exec.register_running(&ctx.peer_id, running_session_id, &session_key, &p.call_id, now_ms);
    }

    match op.route {
        PendingRoute::Session { session_key } => {
            state.session_bridge.tool_result(&session_key, &p.call_id, p.result, p.error).await.map_err(|e| GatewayError::Internal(e.to_string()))?;
        }
        PendingRoute::Client { client_id, request_id } => {
            if let Some(sender) = state.connections.sender_for_client(&client_id) {
                let _ = sender.send(Outbound::Frame(Frame::ok_res(request_id, Some(json!({ "result": p.result, "error": p.error })))));
            }
        }
    }

    Ok(HandlerOutcome::Ok(json!({ "accepted": true })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProbeResultParams {
    probe_id: String,
    #[serde(default)]
    found: Vec<String>,
}

pub async fn node_probe_result(state: &GatewayState, _ctx: &ConnCtx, params: Option<Value>) -> HandlerResult {
    let p: ProbeResultParams = parse_params(params)?;
    let record = state.nodes.complete_probe(&p.probe_id);
    Ok(HandlerOutcome::Ok(json!({ "accepted": record.is_some(), "found": p.found })))
}

/// `node.exec.event` (node-only, spec §4.7): feeds the async-exec pipeline
/// and, on the terminal event, attempts immediate delivery to the session
/// bridge; the alarm orchestrator's async-exec participant retries any
/// delivery that fails here.
pub async fn node_exec_event(state: &GatewayState, ctx: &ConnCtx, params: Option<Value>, now_ms: i64) -> HandlerResult {
    let event: NodeExecEvent = parse_params(params)?;
    if event.node_id != ctx.peer_id {
        return Err(GatewayError::Forbidden("node.exec.event node_id must match the connection's own nodeId".into()));
    }

    match state.async_exec.on_event(event, now_ms) {
        RegisterOutcome::Queued(envelope) => {
            let snapshot = inventory_snapshot(state).await?;
            let completion = json!({
                "eventId": envelope.event_id,
                "callId": envelope.call_id,
                "event": envelope.event,
                "tools": snapshot.tools,
                "runtimeNodes": snapshot.runtime_nodes,
            });
            match state.session_bridge.ingest_async_exec_completion(&envelope.session_key, completion).await {
                Ok(()) => state.async_exec.mark_delivered(&envelope.event_id, now_ms),
                Err(e) => state.async_exec.mark_failed(&envelope.event_id, e.to_string(), now_ms),
            }
            Ok(HandlerOutcome::Ok(json!({ "accepted": true })))
        }
        RegisterOutcome::AckDrop | RegisterOutcome::Touched | RegisterOutcome::DroppedNoPendingSession => {
            Ok(HandlerOutcome::Ok(json!({ "accepted": true })))
        }
    }
}

#[derive(Debug, Deserialize)]
struct NodeForgetParams {
    #[serde(rename = "nodeId")]
    node_id: String,
}

/// `node.forget` (client-only): removes a node's catalog entry entirely,
/// e.g. after the user retires a machine. Rejected with 409 while the node
/// is still connected (spec §6/§7) — the user must disconnect it first,
/// since forgetting a live node would leave its socket in the registry with
/// no corresponding catalog entry.
pub async fn node_forget(state: &GatewayState, _ctx: &ConnCtx, params: Option<Value>) -> HandlerResult {
    let p: NodeForgetParams = parse_params(params)?;
    if state.connections.is_node_connected(&p.node_id) {
        return Err(GatewayError::Conflict("node.forget while connected".into()));
    }
    state.nodes.unregister_node(&p.node_id).await?;
    Ok(HandlerOutcome::Ok(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogsGetParams {
    #[serde(default)]
    node_id: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    lines: Option<u32>,
}

const LOGS_DEFAULT_LINES: u32 = 100;
const LOGS_MAX_LINES: u32 = 5000;

/// `logs.get` (client-only): routed to the target node exactly like a tool
/// call, through the separate `pending_logs` table so a slow log fetch
/// never collides with an in-flight tool call sharing the same `callId`
/// namespace. `nodeId` is optional when exactly one node is connected —
/// otherwise the caller must disambiguate (spec §4.3).
pub async fn logs_get(state: &GatewayState, ctx: &ConnCtx, req_id: &str, params: Option<Value>, now_ms: i64) -> HandlerResult {
    let p: LogsGetParams = parse_params(params)?;
    let node_id = match p.node_id {
        Some(id) => id,
        None => {
            let mut connected = state.connections.connected_node_ids();
            match connected.len() {
                1 => connected.remove(0),
                0 => return Err(GatewayError::BadParams("no nodes connected; nodeId is required".into())),
                _ => return Err(GatewayError::BadParams("multiple nodes connected; nodeId is required".into())),
            }
        }
    };
    let lines = p.lines.unwrap_or(LOGS_DEFAULT_LINES).clamp(1, LOGS_MAX_LINES);
    let sender = state.connections.sender_for_node(&node_id).ok_or_else(|| GatewayError::DownstreamUnavailable(format!("node {node_id} not connected")))?;

    let call_id = req_id.to_string();
    state.pending_logs.insert(call_id.clone(), node_id.clone(), PendingRoute::Client { client_id: ctx.peer_id.clone(), request_id: req_id.to_string() }, state.log_timeout_ms(), now_ms);

    let evt = Frame::evt("logs.get", Some(json!({ "callId": call_id, "sessionId": p.session_id, "lines": lines })));
    sender.send(Outbound::Frame(evt)).map_err(|_| GatewayError::DownstreamUnavailable(format!("node {node_id} outbound queue closed")))?;
    Ok(HandlerOutcome::Deferred)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogsResultParams {
    call_id: String,
    #[serde(default)]
    lines: Vec<String>,
    #[serde(default)]
    error: Option<Value>,
}

pub async fn logs_result(state: &GatewayState, ctx: &ConnCtx, params: Option<Value>) -> HandlerResult {
    let p: LogsResultParams = parse_params(params)?;
    let op = match state.pending_logs.consume(&p.call_id, &ctx.peer_id) {
        ConsumeOutcome::Ok(op) => op,
        ConsumeOutcome::NotFound => return Err(GatewayError::NotFound(format!("no pending logs call {}", p.call_id))),
        ConsumeOutcome::WrongNode => return Err(GatewayError::Forbidden(format!("logs call {} is not routed to this node", p.call_id))),
    };
    if let PendingRoute::Client { client_id, request_id } = op.route {
        if let Some(sender) = state.connections.sender_for_client(&client_id) {
            let _ = sender.send(Outbound::Frame(Frame::ok_res(request_id, Some(json!({ "lines": p.lines, "error": p.error })))));
        }
    }
    Ok(HandlerOutcome::Ok(json!({ "accepted": true })))
}
