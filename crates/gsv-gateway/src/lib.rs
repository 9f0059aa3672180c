// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Connection registry, RPC dispatcher, node service, transfer state
//! machine, and HTTP/WS surface for the agent gateway.
//!
//! This crate is the complete implementation; wiring it into a running
//! binary (listener address, TLS, CLI flags) is left to whatever embeds
//! it — see [`http::router`] and [`run_broadcast_task`] for the two pieces
//! a host needs to call.

pub mod alarm_participants;
pub mod async_exec;
pub mod connection;
pub mod dispatcher;
pub mod handlers;
pub mod http;
pub mod native_tools;
pub mod node_service;
pub mod pending_ops;
pub mod registries;
pub mod state;
pub mod surface;
pub mod transfer;

pub use state::GatewayState;

use gsv_channels::deliver_outbound;
use std::sync::Arc;

/// `agent:{agentId}:heartbeat:system:internal` → `agentId`, the inverse of
/// [`gsv_scheduler::HeartbeatScheduler::internal_session_key`].
fn heartbeat_agent_id(session_key: &str) -> Option<&str> {
    session_key.strip_prefix("agent:")?.strip_suffix(":heartbeat:system:internal")
}

/// Applies the `HEARTBEAT_OK`/length/dedup rules to a heartbeat tick's
/// final response and, if it survives, delivers it to the agent's
/// last-active channel context (falling back to a plain client broadcast
/// when there is none) — spec §4.9 "Otherwise deliver to the last-active
/// channel context, or to the configured target."
async fn handle_heartbeat_event(state: &state::GatewayState, agent_id: &str, event: &gsv_session::ChatEvent) {
    if event.state != gsv_session::ChatEventState::Final {
        return;
    }
    let raw = event.text.as_deref().unwrap_or_default();
    let now_ms = chrono::Utc::now().timestamp_millis();
    let gsv_scheduler::HeartbeatOutcome::Deliver(text) = state.heartbeat.evaluate(agent_id, raw, now_ms) else {
        return;
    };

    match state.last_active.get(agent_id).await {
        Ok(Some(ctx)) => {
            if let Some(worker) = state.channel_worker(&ctx.channel, &ctx.account_id) {
                let peer_id = ctx.peer.get("id").and_then(serde_json::Value::as_str).unwrap_or_default().to_string();
                if let Err(e) = worker.send(&ctx.account_id, &peer_id, &text).await {
                    tracing::warn!(error = %e, agent_id, "heartbeat channel delivery failed");
                }
                return;
            }
        }
        Ok(None) => {}
        Err(e) => tracing::warn!(error = %e, agent_id, "failed to look up last-active context for heartbeat delivery"),
    }

    let payload = serde_json::json!({ "agentId": agent_id, "text": text });
    state.connections.broadcast_to_clients(gsv_protocol::Frame::evt("heartbeat.delivered", Some(payload)));
}

/// Drains the session bridge's `(sessionKey, ChatEvent)` stream and routes
/// each event the way spec §4.5/§4.6 describes: a channel-originated turn
/// goes through [`deliver_outbound`] to the channel worker that owns its
/// `(channel, accountId)`; a heartbeat tick's response goes through
/// [`handle_heartbeat_event`]; everything else (an interactive `chat.send`)
/// broadcasts the corresponding `chat.partial`/`chat.final`/`chat.error`
/// event to every connected client.
///
/// Runs forever; the caller spawns it once per gateway instance alongside
/// [`gsv_scheduler::AlarmOrchestrator::run_forever`].
pub async fn run_broadcast_task(state: Arc<state::GatewayState>, mut events: tokio::sync::mpsc::UnboundedReceiver<(String, gsv_session::ChatEvent)>) {
    use gsv_channels::OutboundDelivery;
    use gsv_protocol::Frame;

    while let Some((session_key, event)) = events.recv().await {
        if let Some(agent_id) = heartbeat_agent_id(&session_key) {
            handle_heartbeat_event(&state, agent_id, &event).await;
            continue;
        }

        let event_name = match event.state {
            gsv_session::ChatEventState::Partial => "chat.partial",
            gsv_session::ChatEventState::Final => "chat.final",
            gsv_session::ChatEventState::Error => "chat.error",
        };

        match deliver_outbound(&event) {
            Some(delivery) => {
                let Some(ctx) = &event.channel_context else { continue };
                let Some(worker) = state.channel_worker(&ctx.channel, &ctx.account_id) else {
                    tracing::warn!(channel = %ctx.channel, account_id = %ctx.account_id, "no worker registered for channel delivery");
                    continue;
                };
                let peer_id = ctx.peer.get("id").and_then(serde_json::Value::as_str).unwrap_or_default().to_string();
                match delivery {
                    OutboundDelivery::TypingChunk(text) | OutboundDelivery::Final(text) => {
                        if let Err(e) = worker.send(&ctx.account_id, &peer_id, &text).await {
                            tracing::warn!(error = %e, channel = %ctx.channel, "channel delivery failed");
                        }
                    }
                    OutboundDelivery::Suppressed => {}
                }
            }
            None => {
                let payload = serde_json::json!({ "runId": event.run_id, "text": event.text });
                state.connections.broadcast_to_clients(Frame::evt(event_name, Some(payload)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::InMemoryBlobStore;
    use gsv_config::ConfigStore;
    use gsv_persist::{CronStore, InMemoryKvStore, KvStore};
    use gsv_session::{ChatEvent, ChatEventState, LoopbackSessionBridge};
    use serde_json::json;

    fn test_state() -> state::GatewayState {
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        let cron_store = Arc::new(CronStore::open_in_memory().unwrap());
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        state::GatewayState::new(
            "0.1.0".into(),
            kv,
            cron_store,
            Arc::new(InMemoryBlobStore::new()),
            Arc::new(LoopbackSessionBridge::new(tx)),
            ConfigStore::new(json!({"session": {"mainKey": "agent:main", "defaultAgentId": "main"}})),
        )
    }

    #[test]
    fn heartbeat_agent_id_parses_the_internal_session_key() {
        assert_eq!(heartbeat_agent_id("agent:main:heartbeat:system:internal"), Some("main"));
        assert_eq!(heartbeat_agent_id("agent:main"), None);
        assert_eq!(heartbeat_agent_id("whatsapp:dm:+1"), None);
    }

    #[tokio::test]
    async fn a_short_heartbeat_response_is_not_broadcast() {
        let state = test_state();
        let event = ChatEvent { run_id: "r1".into(), state: ChatEventState::Final, text: Some("HEARTBEAT_OK".into()), channel_context: None };
        handle_heartbeat_event(&state, "main", &event).await;
        // No last-active context and nothing delivered; evaluate() suppressed it before any send was attempted.
        assert!(state.last_active.get("main").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn a_deliverable_heartbeat_with_no_last_active_context_broadcasts_to_clients() {
        let state = test_state();
        let long_text = "x".repeat(400);
        let event = ChatEvent { run_id: "r1".into(), state: ChatEventState::Final, text: Some(long_text.clone()), channel_context: None };
        handle_heartbeat_event(&state, "main", &event).await;
        // Second identical delivery within 24h is deduped.
        let outcome = state.heartbeat.evaluate("main", &long_text, 1000);
        assert_eq!(outcome, gsv_scheduler::HeartbeatOutcome::Suppressed);
    }
}
