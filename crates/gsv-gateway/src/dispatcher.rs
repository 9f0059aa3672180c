// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The RPC dispatcher (spec §4.2): a method registry mapping
//! `method → {allowDisconnected?, allowedModes?}` plus the algorithm that
//! enforces connection state and mode before invoking a handler.
//!
//! Handlers themselves live in [`crate::handlers`]; this module only owns
//! the registry metadata and the dispatch algorithm described in the spec
//! ("Dispatch algorithm" under §4.2), including the `DEFER_RESPONSE`
//! sentinel (here, [`HandlerOutcome::Deferred`]) for handlers that arrange
//! their own asynchronous reply through another code path.

use gsv_protocol::{methods, ConnectionMode, ErrorPayload, Frame, GatewayError};
use serde_json::Value;

/// What a connection is currently allowed to call. A frame's `req.method`
/// is looked up here before the handler runs.
pub struct MethodMeta {
    /// Methods usable before the handshake (`connect` itself; nothing
    /// else, per spec step 2).
    pub allow_disconnected: bool,
    /// `None` means "any connected mode may call this". `Some(modes)`
    /// restricts it (§4.2 step 5).
    pub allowed_modes: Option<&'static [ConnectionMode]>,
}

const NODE_ONLY: &[ConnectionMode] = &[ConnectionMode::Node];
const CLIENT_ONLY: &[ConnectionMode] = &[ConnectionMode::Client];
const CHANNEL_ONLY: &[ConnectionMode] = &[ConnectionMode::Channel];

pub fn method_meta(method: &str) -> Option<MethodMeta> {
    use methods::*;

    let allowed_modes = match method {
        CONNECT => None,
        TOOL_RESULT | NODE_PROBE_RESULT | NODE_EXEC_EVENT | LOGS_RESULT => Some(NODE_ONLY),
        TOOL_INVOKE | LOGS_GET | NODE_FORGET | TOOL_REQUEST => Some(CLIENT_ONLY),
        CHANNEL_INBOUND => Some(CHANNEL_ONLY),
        TRANSFER_META | TRANSFER_ACCEPT | TRANSFER_COMPLETE | TRANSFER_DONE => None, // either endpoint may be a node or a client-side surrogate
        _ if ALL.contains(&method) => None,
        _ => return None,
    };

    Some(MethodMeta { allow_disconnected: method == CONNECT, allowed_modes })
}

#[derive(Debug)]
pub enum HandlerOutcome {
    Ok(Value),
    /// `DEFER_RESPONSE`: the handler has arranged an asynchronous reply
    /// through another code path (e.g. a pending tool call); the
    /// dispatcher must send nothing now.
    Deferred,
}

pub type HandlerResult = Result<HandlerOutcome, GatewayError>;

/// Validates a request frame against the registry before any handler
/// runs. Returns the `res` frame to send immediately on a registry-level
/// rejection (unknown method, not connected, wrong mode), or `Ok(None)`
/// when dispatch should proceed to the handler.
pub fn precheck(method: &str, req_id: &str, is_connected: bool, mode: Option<ConnectionMode>) -> Result<(), Frame> {
    let Some(meta) = method_meta(method) else {
        return Err(Frame::err_res(req_id, ErrorPayload::from(GatewayError::NotFound(format!("unknown method {method}")))));
    };

    if !is_connected && !meta.allow_disconnected {
        return Err(Frame::err_res(req_id, ErrorPayload::from(GatewayError::NotConnected)));
    }

    if let Some(allowed) = meta.allowed_modes {
        match mode {
            Some(m) if allowed.contains(&m) => {}
            _ => return Err(Frame::err_res(req_id, ErrorPayload::from(GatewayError::Forbidden(format!("{method} is not allowed for this connection's mode"))))),
        }
    }

    Ok(())
}

/// Converts a handler's outcome (or error) into the `res` frame to send,
/// or `None` when the handler deferred its own reply.
pub fn outcome_to_frame(req_id: &str, outcome: HandlerResult) -> Option<Frame> {
    match outcome {
        Ok(HandlerOutcome::Ok(payload)) => Some(Frame::ok_res(req_id, Some(payload))),
        Ok(HandlerOutcome::Deferred) => None,
        Err(err) => Some(Frame::err_res(req_id, ErrorPayload::from(err))),
    }
}

/// Routes a precheck'd frame to its handler (spec §4.2 step 6). Callers run
/// [`precheck`] first; `dispatch` assumes the method is registered and the
/// connection's mode/state already satisfy it — `connect` itself is never
/// passed here, since [`crate::handlers::connect::handle`] runs directly off
/// the WebSocket loop before a [`crate::connection::ConnCtx`] exists.
pub async fn dispatch(
    state: &crate::state::GatewayState,
    ctx: &crate::connection::ConnCtx,
    req_id: &str,
    method: &str,
    params: Option<Value>,
    now_ms: i64,
) -> HandlerResult {
    use crate::handlers::{channels, chat, config, misc, scheduler, session, surface, tools, transfer};
    use methods::*;

    match method {
        TOOLS_LIST => tools::tools_list(state, ctx, params).await,
        TOOL_REQUEST => tools::tool_request(state, ctx, req_id, params, now_ms).await,
        TOOL_INVOKE => tools::tool_invoke(state, ctx, req_id, params, now_ms).await,
        TOOL_RESULT => tools::tool_result(state, ctx, params, now_ms).await,
        NODE_PROBE_RESULT => tools::node_probe_result(state, ctx, params).await,
        NODE_EXEC_EVENT => tools::node_exec_event(state, ctx, params, now_ms).await,
        NODE_FORGET => tools::node_forget(state, ctx, params).await,
        LOGS_GET => tools::logs_get(state, ctx, req_id, params, now_ms).await,
        LOGS_RESULT => tools::logs_result(state, ctx, params).await,

        CHAT_SEND => chat::chat_send(state, ctx, params).await,

        CONFIG_GET => config::config_get(state, ctx, params).await,
        CONFIG_SET => config::config_set(state, ctx, params).await,

        SESSION_GET => session::session_get(state, ctx, params).await,
        SESSION_PATCH => session::session_patch(state, ctx, params).await,
        SESSION_STATS => session::session_stats(state, ctx, params).await,
        SESSION_RESET => session::session_reset(state, ctx, params).await,
        SESSION_HISTORY => session::session_history(state, ctx, params).await,
        SESSION_PREVIEW => session::session_preview(state, ctx, params).await,
        SESSION_COMPACT => session::session_compact(state, ctx, params).await,
        SESSIONS_LIST => session::sessions_list(state, ctx, params).await,

        HEARTBEAT_STATUS => scheduler::heartbeat_status(state, ctx, params).await,
        HEARTBEAT_START => scheduler::heartbeat_start(state, ctx, params).await,
        HEARTBEAT_TRIGGER => scheduler::heartbeat_trigger(state, ctx, params, now_ms).await,

        CRON_STATUS => scheduler::cron_status(state, ctx, params).await,
        CRON_LIST => scheduler::cron_list(state, ctx, params).await,
        CRON_ADD => scheduler::cron_add(state, ctx, params, now_ms).await,
        CRON_UPDATE => scheduler::cron_update(state, ctx, params).await,
        CRON_REMOVE => scheduler::cron_remove(state, ctx, params).await,
        CRON_RUN => scheduler::cron_run(state, ctx, params, now_ms).await,
        CRON_RUNS => scheduler::cron_runs(state, ctx, params).await,

        SURFACE_OPEN => surface::surface_open(state, ctx, params, now_ms).await,
        SURFACE_CLOSE => surface::surface_close(state, ctx, params).await,
        SURFACE_UPDATE => surface::surface_update(state, ctx, params, now_ms).await,
        SURFACE_FOCUS => surface::surface_focus(state, ctx, params, now_ms).await,
        SURFACE_LIST => surface::surface_list(state, ctx, params).await,

        TRANSFER_META => transfer::transfer_meta(state, ctx, params).await,
        TRANSFER_ACCEPT => transfer::transfer_accept(state, ctx, params).await,
        TRANSFER_COMPLETE => transfer::transfer_complete(state, ctx, params).await,
        TRANSFER_DONE => transfer::transfer_done(state, ctx, params).await,

        CHANNEL_INBOUND => channels::channel_inbound(state, ctx, params, now_ms).await,
        CHANNEL_START => channels::channel_start(state, ctx, params).await,
        CHANNEL_STOP => channels::channel_stop(state, ctx, params).await,
        CHANNEL_STATUS => channels::channel_status(state, ctx, params).await,
        CHANNEL_LOGIN => channels::channel_login(state, ctx, params, now_ms).await,
        CHANNEL_LOGOUT => channels::channel_logout(state, ctx, params, now_ms).await,
        CHANNELS_LIST => channels::channels_list(state, ctx, params).await,

        SKILLS_STATUS => misc::skills_status(state, ctx, params).await,
        SKILLS_UPDATE => misc::skills_update(state, ctx, params).await,
        WORKSPACE_LIST => misc::workspace_list(state, ctx, params).await,
        WORKSPACE_READ => misc::workspace_read(state, ctx, params).await,
        WORKSPACE_WRITE => misc::workspace_write(state, ctx, params).await,
        WORKSPACE_DELETE => misc::workspace_delete(state, ctx, params).await,
        FS_AUTHORIZE => misc::fs_authorize(state, ctx, params, now_ms).await,

        CANVAS_LIST | CANVAS_GET | CANVAS_CREATE | CANVAS_UPSERT | CANVAS_PATCH | CANVAS_DELETE | CANVAS_OPEN | CANVAS_CLOSE | CANVAS_ACTION => {
            misc::canvas_not_implemented(state, ctx, params).await
        }

        // `connect` never reaches here (see the doc comment above); any
        // other unrecognized method would already have been rejected by
        // `precheck`, so this only guards against calling `dispatch`
        // without it.
        other => Err(GatewayError::NotFound(format!("unknown method {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_method_is_rejected_before_any_handler_runs() {
        let err = precheck("not.a.method", "r1", true, Some(ConnectionMode::Client)).unwrap_err();
        match err {
            Frame::Res { ok, error, .. } => {
                assert!(!ok);
                assert_eq!(error.unwrap().code, 404);
            }
            _ => panic!("expected res"),
        }
    }

    #[test]
    fn disconnected_socket_may_only_call_connect() {
        assert!(precheck(methods::CONNECT, "r1", false, None).is_ok());
        let err = precheck(methods::TOOLS_LIST, "r1", false, None).unwrap_err();
        match err {
            Frame::Res { error, .. } => assert_eq!(error.unwrap().code, 101),
            _ => panic!(),
        }
    }

    #[test]
    fn node_only_method_rejects_a_client_mode() {
        let err = precheck(methods::TOOL_RESULT, "r1", true, Some(ConnectionMode::Client)).unwrap_err();
        match err {
            Frame::Res { error, .. } => assert_eq!(error.unwrap().code, 403),
            _ => panic!(),
        }
        assert!(precheck(methods::TOOL_RESULT, "r1", true, Some(ConnectionMode::Node)).is_ok());
    }

    #[test]
    fn client_only_method_rejects_a_node_mode() {
        let err = precheck(methods::TOOL_INVOKE, "r1", true, Some(ConnectionMode::Node)).unwrap_err();
        match err {
            Frame::Res { error, .. } => assert_eq!(error.unwrap().code, 403),
            _ => panic!(),
        }
    }

    #[test]
    fn connect_is_re_entrant_for_an_already_connected_socket() {
        assert!(precheck(methods::CONNECT, "r1", true, Some(ConnectionMode::Client)).is_ok());
    }
}
