// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Heartbeat and cron RPCs (spec §4.9).

use crate::connection::ConnCtx;
use crate::dispatcher::{HandlerOutcome, HandlerResult};
use crate::handlers::parse_params;
use crate::state::GatewayState;
use gsv_protocol::GatewayError;
use gsv_scheduler::{CronJob, CronSchedule, CronSpec, HeartbeatScheduler};
use serde::Deserialize;
use serde_json::{json, Value};

// ── Heartbeat ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct AgentParams {
    #[serde(default, rename = "agentId")]
    agent_id: Option<String>,
}

pub async fn heartbeat_status(state: &GatewayState, _ctx: &ConnCtx, params: Option<Value>) -> HandlerResult {
    let p: AgentParams = parse_params(params)?;
    let agent_id = p.agent_id.unwrap_or_else(|| state.default_agent_id());
    Ok(HandlerOutcome::Ok(json!({ "agentId": agent_id, "internalSessionKey": HeartbeatScheduler::internal_session_key(&agent_id) })))
}

pub async fn heartbeat_start(_state: &GatewayState, _ctx: &ConnCtx, params: Option<Value>) -> HandlerResult {
    let p: AgentParams = parse_params(params)?;
    Ok(HandlerOutcome::Ok(json!({ "ok": true, "agentId": p.agent_id })))
}

/// `heartbeat.trigger`: runs the heartbeat prompt now through the internal
/// session, exactly as the alarm's scheduled tick would, then applies the
/// `HEARTBEAT_OK`/dedup/min-length rules before deciding whether to
/// broadcast anything to connected clients.
pub async fn heartbeat_trigger(state: &GatewayState, _ctx: &ConnCtx, params: Option<Value>, _now_ms: i64) -> HandlerResult {
    let p: AgentParams = parse_params(params)?;
    let agent_id = p.agent_id.unwrap_or_else(|| state.default_agent_id());
    let session_key = HeartbeatScheduler::internal_session_key(&agent_id);

    let run_id = uuid::Uuid::new_v4().to_string();
    let snapshot = gsv_session::SessionSnapshot::default();
    let message = gsv_session::UserMessage { text: "heartbeat".to_string(), media: vec![] };
    let outcome = state
        .session_bridge
        .chat_send(&session_key, message, &run_id, snapshot, None, None)
        .await
        .map_err(|e| GatewayError::Internal(e.to_string()))?;

    Ok(HandlerOutcome::Ok(json!({ "ok": outcome.ok, "runId": outcome.run_id })))
}

// ── Cron ────────────────────────────────────────────────────────────────────

pub async fn cron_status(state: &GatewayState, _ctx: &ConnCtx, _params: Option<Value>) -> HandlerResult {
    let next = state.cron.next_due_at().await.map_err(|e| GatewayError::Internal(e.to_string()))?;
    Ok(HandlerOutcome::Ok(json!({ "nextRunAtMs": next })))
}

pub async fn cron_list(state: &GatewayState, _ctx: &ConnCtx, params: Option<Value>) -> HandlerResult {
    let p: AgentParams = parse_params(params)?;
    let agent_id = p.agent_id.unwrap_or_else(|| state.default_agent_id());
    let jobs = state.cron.list(&agent_id).await.map_err(|e| GatewayError::Internal(e.to_string()))?;
    Ok(HandlerOutcome::Ok(json!({ "jobs": jobs })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CronAddParams {
    #[serde(default, rename = "agentId")]
    agent_id: Option<String>,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default, rename = "deleteAfterRun")]
    delete_after_run: Option<bool>,
    schedule: CronSchedule,
    spec: CronSpec,
}

fn default_true() -> bool {
    true
}

pub async fn cron_add(state: &GatewayState, _ctx: &ConnCtx, params: Option<Value>, now_ms: i64) -> HandlerResult {
    let p: CronAddParams = parse_params(params)?;
    let job = CronJob {
        id: uuid::Uuid::new_v4().to_string(),
        agent_id: p.agent_id.unwrap_or_else(|| state.default_agent_id()),
        name: p.name,
        description: p.description,
        enabled: p.enabled,
        delete_after_run: p.delete_after_run,
        schedule: p.schedule,
        spec: p.spec,
        state: Default::default(),
    };
    let added = state.cron.add(job, now_ms).await.map_err(|e| GatewayError::Internal(e.to_string()))?;
    Ok(HandlerOutcome::Ok(serde_json::to_value(added).unwrap()))
}

pub async fn cron_update(state: &GatewayState, _ctx: &ConnCtx, params: Option<Value>) -> HandlerResult {
    let job: CronJob = parse_params(params)?;
    state.cron.update(job).await.map_err(|e| GatewayError::Internal(e.to_string()))?;
    Ok(HandlerOutcome::Ok(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
struct IdParams {
    id: String,
}

pub async fn cron_remove(state: &GatewayState, _ctx: &ConnCtx, params: Option<Value>) -> HandlerResult {
    let p: IdParams = parse_params(params)?;
    state.cron.remove(&p.id).await.map_err(|e| GatewayError::Internal(e.to_string()))?;
    Ok(HandlerOutcome::Ok(json!({ "ok": true })))
}

/// `cron.run`: forces a specific job to run now regardless of its next
/// scheduled instant, by fetching it directly rather than going through
/// `CronScheduler::due` (which only surfaces jobs past their deadline).
pub async fn cron_run(state: &GatewayState, _ctx: &ConnCtx, params: Option<Value>, now_ms: i64) -> HandlerResult {
    let p: IdParams = parse_params(params)?;
    let job = state.cron.get(&p.id).await.map_err(|e| GatewayError::Internal(e.to_string()))?.ok_or_else(|| GatewayError::NotFound(p.id.clone()))?;
    let session_key = job.target_session_key();
    let message = match &job.spec {
        CronSpec::SystemEvent { text } => text.clone(),
        CronSpec::Task { message, .. } => message.clone(),
    };
    let run_id = uuid::Uuid::new_v4().to_string();
    let started_at = now_ms;
    let outcome = state
        .session_bridge
        .chat_send(&session_key, gsv_session::UserMessage { text: message, media: vec![] }, &run_id, gsv_session::SessionSnapshot::default(), None, None)
        .await
        .map_err(|e| GatewayError::Internal(e.to_string()));

    let (status, error) = match &outcome {
        Ok(_) => ("ok", None),
        Err(e) => ("error", Some(e.to_string())),
    };
    state.cron.record_completion(job, now_ms, status, error, now_ms - started_at).await.map_err(|e| GatewayError::Internal(e.to_string()))?;
    let outcome = outcome?;
    Ok(HandlerOutcome::Ok(json!({ "ok": outcome.ok, "runId": outcome.run_id })))
}

pub async fn cron_runs(state: &GatewayState, _ctx: &ConnCtx, params: Option<Value>) -> HandlerResult {
    let p: IdParams = parse_params(params)?;
    let job = state.cron.get(&p.id).await.map_err(|e| GatewayError::Internal(e.to_string()))?.ok_or_else(|| GatewayError::NotFound(p.id))?;
    Ok(HandlerOutcome::Ok(json!({ "state": job.state })))
}
