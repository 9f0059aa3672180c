// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Transfer RPCs (`transfer.meta/accept/complete/done`, spec §4.8). The
//! opening `transferRequest` step is not a wire method — see
//! [`request_transfer`] below for where it is actually invoked from.

use crate::connection::{ConnCtx, Outbound};
use crate::dispatcher::{HandlerOutcome, HandlerResult};
use crate::handlers::parse_params;
use crate::pending_ops::PendingRoute;
use crate::state::GatewayState;
use crate::transfer::TransferEndpoint;
use gsv_protocol::{Frame, GatewayError};
use serde::Deserialize;
use serde_json::{json, Value};

/// `transferRequest`: the spec describes this as the call that opens a
/// transfer, but it carries no entry in [`gsv_protocol::methods::ALL`] —
/// there is no client-facing RPC named `transfer.request`. It is instead
/// invoked internally, from the tool-dispatch path, whenever a tool result
/// declares a blob the other endpoint should pull (e.g. a node tool
/// returning a large file reference to hand to another node or to the
/// gateway's own blob store). Kept as a plain function here rather than a
/// registered method so callers inside [`crate::handlers::tools`] can open
/// a transfer as a side effect of resolving a tool result.
pub async fn request_transfer(
    state: &GatewayState,
    call_id: String,
    session_key: String,
    source: TransferEndpoint,
    destination: TransferEndpoint,
) -> Result<crate::transfer::Transfer, GatewayError> {
    let transfer = state.transfers.request(call_id, session_key, source.clone(), destination.clone())?;
    if let Some(sender) = state.connections.sender_for_node(&source.node) {
        let _ = sender.send(Outbound::Frame(Frame::evt("transfer.start", Some(json!({ "transferId": transfer.transfer_id, "path": source.path })))));
    }
    Ok(transfer)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetaParams {
    transfer_id: u64,
    size: u64,
    mime: String,
}

pub async fn transfer_meta(state: &GatewayState, _ctx: &ConnCtx, params: Option<Value>) -> HandlerResult {
    let p: MetaParams = parse_params(params)?;
    let transfer = state.transfers.on_meta(p.transfer_id, p.size, p.mime)?;
    notify_destination(state, &transfer, "transfer.meta");
    Ok(HandlerOutcome::Ok(json!({ "transferId": transfer.transfer_id, "state": "accept-wait" })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferIdParams {
    transfer_id: u64,
}

pub async fn transfer_accept(state: &GatewayState, _ctx: &ConnCtx, params: Option<Value>) -> HandlerResult {
    let p: TransferIdParams = parse_params(params)?;
    let transfer = state.transfers.on_accept(p.transfer_id)?;
    notify_source(state, &transfer, "transfer.accept");
    Ok(HandlerOutcome::Ok(json!({ "transferId": transfer.transfer_id, "state": "streaming" })))
}

pub async fn transfer_complete(state: &GatewayState, _ctx: &ConnCtx, params: Option<Value>) -> HandlerResult {
    let p: TransferIdParams = parse_params(params)?;
    let transfer = state.transfers.on_complete(p.transfer_id)?;
    if transfer.destination.is_gateway() {
        let bytes = state.transfers.take_gsv_buffer(transfer.transfer_id);
        state.transfers.blob_store.put(&transfer.destination.path, &bytes).await?;
    }
    notify_destination(state, &transfer, "transfer.complete");
    Ok(HandlerOutcome::Ok(json!({ "transferId": transfer.transfer_id, "state": "completing" })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DoneParams {
    transfer_id: u64,
    #[serde(default)]
    bytes_transferred: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

/// `transfer.done`: the terminal transition. On success, resolves the
/// pending `tool.result` the transfer was opened for; on error, fails the
/// session's pending call instead (spec §4.8 "any error, disconnect ...
/// fails the transfer").
pub async fn transfer_done(state: &GatewayState, _ctx: &ConnCtx, params: Option<Value>) -> HandlerResult {
    let p: DoneParams = parse_params(params)?;

    if let Some(err) = p.error {
        let Some(transfer) = state.transfers.fail(p.transfer_id) else {
            return Err(GatewayError::NotFound(format!("transfer {}", p.transfer_id)));
        };
        resolve_pending(state, &transfer.call_id, None, Some(json!({ "message": err }))).await;
        return Ok(HandlerOutcome::Ok(json!({ "transferId": p.transfer_id, "state": "failed" })));
    }

    let transfer = state.transfers.finish(p.transfer_id, p.bytes_transferred)?;
    let result = json!({
        "transferId": transfer.transfer_id,
        "bytesTransferred": transfer.bytes_transferred,
        "source": { "node": transfer.source.node, "path": transfer.source.path },
        "destination": { "node": transfer.destination.node, "path": transfer.destination.path },
        "mime": transfer.mime,
    });
    resolve_pending(state, &transfer.call_id, Some(result), None).await;
    Ok(HandlerOutcome::Ok(json!({ "transferId": p.transfer_id, "state": "done" })))
}

async fn resolve_pending(state: &GatewayState, call_id: &str, result: Option<Value>, error: Option<Value>) {
    if let Some(op) = state.pending_tools.peek(call_id) {
        match op.route {
            PendingRoute::Session { session_key } => {
                let _ = state.session_bridge.tool_result(&session_key, call_id, result, error).await;
            }
            PendingRoute::Client { client_id, request_id } => {
                if let Some(sender) = state.connections.sender_for_client(&client_id) {
                    let _ = sender.send(Outbound::Frame(Frame::ok_res(request_id, Some(json!({ "result": result, "error": error })))));
                }
            }
        }
    }
}

fn notify_destination(state: &GatewayState, transfer: &crate::transfer::Transfer, event: &str) {
    if let Some(sender) = state.connections.sender_for_node(&transfer.destination.node) {
        let _ = sender.send(Outbound::Frame(Frame::evt(event, Some(json!({ "transferId": transfer.transfer_id })))));
    }
}

fn notify_source(state: &GatewayState, transfer: &crate::transfer::Transfer, event: &str) {
    if let Some(sender) = state.connections.sender_for_node(&transfer.source.node) {
        let _ = sender.send(Outbound::Frame(Frame::evt(event, Some(json!({ "transferId": transfer.transfer_id })))));
    }
}
