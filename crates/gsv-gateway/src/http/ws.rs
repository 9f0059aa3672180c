// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! `GET /ws` — the WebSocket accept loop (spec §4.1/§4.2/§6).
//!
//! A single task owns the read half of the socket and drives the
//! connect-then-dispatch state machine; a second task owns the write half
//! and drains the connection's [`Outbound`] queue, so any other part of
//! the gateway (the broadcast task, a node-probe alarm, another
//! connection's tool-invoke) can reach this socket without touching it
//! directly — the same split the teacher's `sven-gateway` WebSocket bridge
//! uses between its `AgentHandle` event subscription and the
//! `ControlCommand` send path, generalized from one fixed protocol to the
//! dispatcher's full method table.

use crate::connection::{ConnCtx, Outbound};
use crate::dispatcher;
use crate::state::GatewayState;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use gsv_protocol::{ConnectParams, ConnectionMode, Frame, GatewayError};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<GatewayState>>, ConnectInfo(peer): ConnectInfo<SocketAddr>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, peer))
}

async fn handle_socket(socket: WebSocket, state: Arc<GatewayState>, peer: SocketAddr) {
    let connection_id = uuid::Uuid::new_v4().to_string();
    let (sink, mut stream) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(write_loop(sink, rx));

    let mut ctx: Option<ConnCtx> = None;

    while let Some(msg) = stream.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(connection_id = %connection_id, error = %e, "websocket recv error");
                break;
            }
        };

        match msg {
            Message::Text(text) => {
                if !handle_text(&state, &connection_id, &tx, &mut ctx, &text, peer.ip()).await {
                    break;
                }
            }
            Message::Binary(bytes) => handle_binary(&state, &ctx, &bytes),
            Message::Ping(payload) => {
                let _ = tx.send(Outbound::Pong(payload));
            }
            Message::Pong(_) => {}
            Message::Close(_) => break,
        }
    }

    cleanup(&state, &connection_id, ctx.as_ref()).await;
}

/// Returns `false` when the socket should be closed (a fatal `connect`
/// failure, i.e. unauthorized — spec §7 "401 closes 4001").
async fn handle_text(state: &Arc<GatewayState>, connection_id: &str, tx: &mpsc::UnboundedSender<Outbound>, ctx: &mut Option<ConnCtx>, text: &str, peer_ip: std::net::IpAddr) -> bool {
    let frame: Frame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!(connection_id, error = %e, "malformed frame");
            return true;
        }
    };

    let Some((req_id, method, params)) = frame.as_req() else {
        tracing::warn!(connection_id, "ignoring non-request frame from peer");
        return true;
    };

    let now_ms = chrono::Utc::now().timestamp_millis();

    if ctx.is_none() {
        if method != gsv_protocol::methods::CONNECT {
            let _ = tx.send(Outbound::Frame(Frame::err_res(req_id, GatewayError::NotConnected.into())));
            return true;
        }
        let parsed: ConnectParams = match params.cloned().map(serde_json::from_value).transpose() {
            Ok(Some(p)) => p,
            Ok(None) => {
                let _ = tx.send(Outbound::Frame(Frame::err_res(req_id, GatewayError::BadParams("missing connect params".into()).into())));
                return true;
            }
            Err(e) => {
                let _ = tx.send(Outbound::Frame(Frame::err_res(req_id, GatewayError::BadParams(e.to_string()).into())));
                return true;
            }
        };

        match crate::handlers::connect::handle(state, connection_id, tx.clone(), parsed, now_ms).await {
            Ok(outcome) => {
                let hello = serde_json::to_value(&outcome.hello).unwrap_or_default();
                let _ = tx.send(Outbound::Frame(Frame::ok_res(req_id, Some(hello))));
                *ctx = Some(outcome.ctx);
            }
            Err(GatewayError::Unauthorized) => {
                if !state.auth_failures.record_failure(peer_ip) {
                    tracing::warn!(%peer_ip, "connect rejected: too many failed auth attempts from this address");
                }
                let _ = tx.send(Outbound::Frame(Frame::err_res(req_id, GatewayError::Unauthorized.into())));
                let _ = tx.send(Outbound::Close { code: 4001, reason: "unauthorized".into() });
                return false;
            }
            Err(e) => {
                let _ = tx.send(Outbound::Frame(Frame::err_res(req_id, e.into())));
            }
        }
        return true;
    }

    let current = ctx.as_ref().expect("checked above");
    if let Err(rejection) = dispatcher::precheck(method, req_id, true, Some(current.mode)) {
        let _ = tx.send(Outbound::Frame(rejection));
        return true;
    }

    let outcome = dispatcher::dispatch(state, current, req_id, method, params.cloned(), now_ms).await;
    if let Some(reply) = dispatcher::outcome_to_frame(req_id, outcome) {
        let _ = tx.send(Outbound::Frame(reply));
    }
    true
}

/// `[4-byte LE transferId][chunk bytes]` (spec §6), only meaningful while
/// the referenced transfer is in `streaming` state. Bytes are forwarded
/// verbatim to a node destination, or accumulated for a later
/// `transfer.complete` write when the destination is the gateway's own
/// blob store.
fn handle_binary(state: &Arc<GatewayState>, ctx: &Option<ConnCtx>, bytes: &[u8]) {
    if ctx.is_none() || bytes.len() < 4 {
        return;
    }
    let transfer_id = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as u64;
    let payload = &bytes[4..];

    let Some(transfer) = state.transfers.get(transfer_id) else {
        tracing::warn!(transfer_id, "binary chunk for unknown transfer");
        return;
    };

    if let Err(e) = state.transfers.on_chunk(transfer_id, payload.len() as u64) {
        tracing::warn!(transfer_id, error = %e, "binary chunk rejected");
        return;
    }

    if transfer.destination.is_gateway() {
        state.transfers.append_gsv_chunk(transfer_id, payload);
    } else if let Some(sender) = state.connections.sender_for_node(&transfer.destination.node) {
        let _ = sender.send(Outbound::Binary(bytes.to_vec()));
    }
}

/// Disconnect cleanup (spec §3, §4.3, §4.4): evicts the stale connection
/// (P5 is already enforced by [`ConnectionRegistry::remove_if_current`]),
/// drops any pending tool/log calls a departing client was waiting on, and
/// for a departing node marks its catalog entry offline (never deletes it —
/// that's `node.forget`'s job) and fails every log call still pending
/// against it with a 503 to the client that asked (spec scenario 5; tool
/// calls are left for the TTL sweep since a session-routed result may still
/// be worth the node's own retry).
async fn cleanup(state: &Arc<GatewayState>, connection_id: &str, ctx: Option<&ConnCtx>) {
    state.connections.remove_if_current(connection_id);
    let Some(ctx) = ctx else { return };
    match ctx.mode {
        ConnectionMode::Client => {
            state.pending_tools.evict_client(&ctx.peer_id);
            state.pending_logs.evict_client(&ctx.peer_id);
        }
        ConnectionMode::Node => {
            let now_ms = chrono::Utc::now().timestamp_millis();
            if let Err(e) = state.nodes.mark_offline(&ctx.peer_id, now_ms).await {
                tracing::warn!(node_id = %ctx.peer_id, error = %e, "failed to mark node offline on disconnect");
            }
            fail_pending_logs_for_node(state, &ctx.peer_id);
        }
        ConnectionMode::Channel => {}
    }
}

/// Fails every log call still pending against a node whose socket just
/// closed (spec §4.4 node-failed log sweep), removing them from the table
/// and sending each waiting client a 503 `res`.
fn fail_pending_logs_for_node(state: &Arc<GatewayState>, node_id: &str) {
    for op in state.pending_logs.pending_for_node(node_id) {
        if !matches!(state.pending_logs.consume(&op.call_id, node_id), crate::pending_ops::ConsumeOutcome::Ok(_)) {
            continue;
        }
        if let crate::pending_ops::PendingRoute::Client { client_id, request_id } = op.route {
            if let Some(sender) = state.connections.sender_for_client(&client_id) {
                let err = GatewayError::DownstreamUnavailable(format!("node {node_id} disconnected"));
                let _ = sender.send(Outbound::Frame(Frame::err_res(request_id, err.into())));
            }
        }
    }
}

async fn write_loop(mut sink: futures::stream::SplitSink<WebSocket, Message>, mut rx: mpsc::UnboundedReceiver<Outbound>) {
    while let Some(out) = rx.recv().await {
        let msg = match out {
            Outbound::Frame(frame) => match serde_json::to_string(&frame) {
                Ok(s) => Message::Text(s),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to serialize outbound frame");
                    continue;
                }
            },
            Outbound::Binary(bytes) => Message::Binary(bytes),
            Outbound::Pong(payload) => Message::Pong(payload),
            Outbound::Close { code, reason } => {
                let _ = sink.send(Message::Close(Some(CloseFrame { code, reason: reason.into() }))).await;
                break;
            }
        };
        if sink.send(msg).await.is_err() {
            break;
        }
    }
}
