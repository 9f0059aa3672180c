// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Channel RPCs (spec §4.5): `channel.inbound/start/stop/status/login/
//! logout`, `channels.list`.

use crate::connection::ConnCtx;
use crate::dispatcher::{HandlerOutcome, HandlerResult};
use crate::handlers::parse_params;
use crate::registries::ChannelStatusRecord;
use crate::state::GatewayState;
use gsv_channels::{dispatch_inbound, InboundDispatch, InboundMessage};
use gsv_protocol::GatewayError;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InboundParams {
    channel: String,
    #[serde(default = "default_account")]
    account_id: String,
    inbound: InboundMessage,
    #[serde(default)]
    is_main_dm_scope: bool,
}

fn default_account() -> String {
    "default".to_string()
}

/// `channel.inbound` (channel-mode only): canonicalizes the session key,
/// short-circuits slash commands, and otherwise forwards the turn to the
/// session bridge exactly as `chat.send` would (spec §4.5 steps 1-4).
pub async fn channel_inbound(state: &GatewayState, _ctx: &ConnCtx, params: Option<Value>, now_ms: i64) -> HandlerResult {
    let p: InboundParams = parse_params(params)?;
    state.channel_registry.record_message(&p.channel, &p.account_id, now_ms).await?;

    let agent_id = state.default_agent_id();
    let main_key = state.main_key();
    let dispatch = dispatch_inbound(&p.channel, &p.account_id, &agent_id, &main_key, p.is_main_dm_scope, p.inbound);

    match dispatch {
        InboundDispatch::SlashCommand { session_key, command } => Ok(HandlerOutcome::Ok(json!({ "sessionKey": session_key, "slashCommand": format!("{command:?}") }))),
        InboundDispatch::Chat { session_key, message, channel_context } => {
            let tools = state.nodes.all_tools().await?;
            let snapshot = gsv_session::SessionSnapshot { tools, runtime_nodes: vec![] };
            let run_id = uuid::Uuid::new_v4().to_string();
            let outcome = state
                .session_bridge
                .chat_send(&session_key, message, &run_id, snapshot, None, Some(channel_context))
                .await
                .map_err(|e| GatewayError::Internal(e.to_string()))?;
            Ok(HandlerOutcome::Ok(json!({ "ok": outcome.ok, "runId": outcome.run_id, "sessionKey": session_key })))
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelAccountParams {
    channel: String,
    #[serde(default = "default_account")]
    account_id: String,
}

pub async fn channel_start(state: &GatewayState, _ctx: &ConnCtx, params: Option<Value>) -> HandlerResult {
    let p: ChannelAccountParams = parse_params(params)?;
    let worker = state.channel_worker(&p.channel, &p.account_id).ok_or_else(|| GatewayError::NotFound(format!("no worker registered for channel {}", p.channel)))?;
    worker.start(&p.account_id).await.map_err(|e| GatewayError::Internal(e.to_string()))?;
    Ok(HandlerOutcome::Ok(json!({ "ok": true })))
}

pub async fn channel_stop(state: &GatewayState, _ctx: &ConnCtx, params: Option<Value>) -> HandlerResult {
    let p: ChannelAccountParams = parse_params(params)?;
    let worker = state.channel_worker(&p.channel, &p.account_id).ok_or_else(|| GatewayError::NotFound(format!("no worker registered for channel {}", p.channel)))?;
    worker.stop(&p.account_id).await.map_err(|e| GatewayError::Internal(e.to_string()))?;
    Ok(HandlerOutcome::Ok(json!({ "ok": true })))
}

pub async fn channel_status(state: &GatewayState, _ctx: &ConnCtx, params: Option<Value>) -> HandlerResult {
    let p: ChannelAccountParams = parse_params(params)?;
    let record = state.channel_registry.get(&p.channel, &p.account_id).await?;
    Ok(HandlerOutcome::Ok(json!({ "status": record })))
}

pub async fn channel_login(state: &GatewayState, _ctx: &ConnCtx, params: Option<Value>, now_ms: i64) -> HandlerResult {
    let p: ChannelAccountParams = parse_params(params)?;
    let worker = state.channel_worker(&p.channel, &p.account_id).ok_or_else(|| GatewayError::NotFound(format!("no worker registered for channel {}", p.channel)))?;
    worker.login(&p.account_id).await.map_err(|e| GatewayError::Internal(e.to_string()))?;
    state
        .channel_registry
        .set_status(&p.channel, &p.account_id, ChannelStatusRecord { connected: true, authenticated: true, mode: None, last_activity_ms: Some(now_ms), error: None }, now_ms)
        .await?;
    Ok(HandlerOutcome::Ok(json!({ "ok": true })))
}

pub async fn channel_logout(state: &GatewayState, _ctx: &ConnCtx, params: Option<Value>, now_ms: i64) -> HandlerResult {
    let p: ChannelAccountParams = parse_params(params)?;
    let worker = state.channel_worker(&p.channel, &p.account_id).ok_or_else(|| GatewayError::NotFound(format!("no worker registered for channel {}", p.channel)))?;
    worker.logout(&p.account_id).await.map_err(|e| GatewayError::Internal(e.to_string()))?;
    state
        .channel_registry
        .set_status(&p.channel, &p.account_id, ChannelStatusRecord { connected: false, authenticated: false, mode: None, last_activity_ms: Some(now_ms), error: None }, now_ms)
        .await?;
    Ok(HandlerOutcome::Ok(json!({ "ok": true })))
}

pub async fn channels_list(state: &GatewayState, _ctx: &ConnCtx, _params: Option<Value>) -> HandlerResult {
    let channels = state.channel_registry.list().await?;
    Ok(HandlerOutcome::Ok(json!({ "channels": channels })))
}
