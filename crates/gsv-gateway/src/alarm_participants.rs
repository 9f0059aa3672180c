// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Concrete [`AlarmParticipant`] implementations (spec §4.10): every
//! scheduled-work source the gateway owns registers one of these with the
//! shared [`gsv_scheduler::AlarmOrchestrator`] so a single sleep/wake loop
//! drives pending-op TTLs, async-exec retries, node probes, cron, and
//! heartbeats instead of each subsystem running its own timer task.

use crate::state::GatewayState;
use async_trait::async_trait;
use chrono::{TimeZone, Timelike, Utc};
use gsv_scheduler::{AlarmParticipant, RunMode};
use std::sync::Arc;

/// Which of [`GatewayState`]'s two pending-op tables this instance sweeps —
/// the store itself has no notion of which RPC family it belongs to.
#[derive(Clone, Copy)]
pub enum PendingOpsTable {
    Tools,
    Logs,
}

/// Sweeps expired `tool.call`/`logs.request` round trips (spec §4.4). Two
/// instances are registered, one per table.
pub struct PendingOpsAlarm {
    table: PendingOpsTable,
    state: Arc<GatewayState>,
}

impl PendingOpsAlarm {
    pub fn new(table: PendingOpsTable, state: Arc<GatewayState>) -> Self {
        Self { table, state }
    }

    fn store(&self) -> &crate::pending_ops::PendingOpsStore {
        match self.table {
            PendingOpsTable::Tools => &self.state.pending_tools,
            PendingOpsTable::Logs => &self.state.pending_logs,
        }
    }
}

#[async_trait]
impl AlarmParticipant for PendingOpsAlarm {
    async fn next_due_ms(&self) -> anyhow::Result<Option<i64>> {
        Ok(self.store().earliest_deadline_ms())
    }

    async fn run(&self, now_ms: i64) -> anyhow::Result<()> {
        for op in self.store().sweep_expired(now_ms) {
            tracing::info!(participant = self.name(), call_id = %op.call_id, node_id = %op.node_id, "pending op expired");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        match self.table {
            PendingOpsTable::Tools => "pending_tools",
            PendingOpsTable::Logs => "pending_logs",
        }
    }
}

/// Drains due async-exec deliveries, retrying on failure with the
/// pipeline's own backoff, and GCs expired queue/dedup entries (§4.7).
pub struct AsyncExecAlarm {
    state: Arc<GatewayState>,
}

impl AsyncExecAlarm {
    pub fn new(state: Arc<GatewayState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl AlarmParticipant for AsyncExecAlarm {
    async fn next_due_ms(&self) -> anyhow::Result<Option<i64>> {
        Ok(self.state.async_exec.earliest_deadline_ms())
    }

    async fn run(&self, now_ms: i64) -> anyhow::Result<()> {
        for envelope in self.state.async_exec.due_envelopes(now_ms) {
            let tools = self.state.nodes.all_tools().await?;
            let nodes = self.state.nodes.list().await?;
            let completion = serde_json::json!({
                "eventId": envelope.event_id,
                "callId": envelope.call_id,
                "event": envelope.event,
                "tools": tools,
                "runtimeNodes": nodes.into_iter().map(|n| serde_json::to_value(n).unwrap_or(serde_json::Value::Null)).collect::<Vec<_>>(),
            });
            match self.state.session_bridge.ingest_async_exec_completion(&envelope.session_key, completion).await {
                Ok(()) => self.state.async_exec.mark_delivered(&envelope.event_id, now_ms),
                Err(e) => {
                    tracing::warn!(event_id = %envelope.event_id, error = %e, "async-exec delivery failed, will retry");
                    self.state.async_exec.mark_failed(&envelope.event_id, e.to_string(), now_ms);
                }
            }
        }
        for expired in self.state.async_exec.sweep_expired(now_ms) {
            tracing::warn!(event_id = %expired.event_id, attempts = expired.attempts, "async-exec delivery abandoned after TTL");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "async_exec"
    }
}

/// Retries or gives up on node probes the node never answered (§4.3).
pub struct NodeProbeAlarm {
    state: Arc<GatewayState>,
}

impl NodeProbeAlarm {
    pub fn new(state: Arc<GatewayState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl AlarmParticipant for NodeProbeAlarm {
    async fn next_due_ms(&self) -> anyhow::Result<Option<i64>> {
        Ok(self.state.nodes.earliest_probe_deadline_ms())
    }

    async fn run(&self, now_ms: i64) -> anyhow::Result<()> {
        for probe_id in self.state.nodes.sweep_expired_probes(now_ms) {
            tracing::warn!(probe_id = %probe_id, "node probe timed out with no answer");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "node_probe"
    }
}

/// Runs every cron job past its `nextRunAtMs`, mirroring
/// [`crate::handlers::scheduler::cron_run`]'s dispatch-then-record shape
/// but driven by the alarm frontier instead of an explicit `cron.run` RPC.
pub struct CronAlarm {
    state: Arc<GatewayState>,
}

impl CronAlarm {
    pub fn new(state: Arc<GatewayState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl AlarmParticipant for CronAlarm {
    async fn next_due_ms(&self) -> anyhow::Result<Option<i64>> {
        Ok(self.state.cron.next_due_at().await?)
    }

    async fn run(&self, now_ms: i64) -> anyhow::Result<()> {
        let due = self.state.cron.due(now_ms, RunMode::Due).await?;
        for job in due {
            let session_key = job.target_session_key();
            let message = match &job.spec {
                gsv_scheduler::CronSpec::SystemEvent { text } => text.clone(),
                gsv_scheduler::CronSpec::Task { message, .. } => message.clone(),
            };
            let run_id = uuid::Uuid::new_v4().to_string();
            let started_at = now_ms;
            let outcome = self
                .state
                .session_bridge
                .chat_send(&session_key, gsv_session::UserMessage { text: message, media: vec![] }, &run_id, gsv_session::SessionSnapshot::default(), None, None)
                .await;

            let (status, error) = match &outcome {
                Ok(_) => ("ok", None),
                Err(e) => ("error", Some(e.to_string())),
            };
            let job_id = job.id.clone();
            if let Err(e) = self.state.cron.record_completion(job, now_ms, status, error, now_ms - started_at).await {
                tracing::warn!(job_id = %job_id, error = %e, "failed to record cron completion");
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "cron"
    }
}

/// Per-agent heartbeat ticks (§4.9), gated by `config.agents.{defaultHeartbeat,
/// <agentId>.heartbeat}.{every,activeHours}` and a "session busy" probe. The
/// tick itself only opens the turn — [`crate::run_broadcast_task`] applies
/// the `HEARTBEAT_OK`/length/dedup rules and decides where to deliver once
/// the internal session's final response comes back.
pub struct HeartbeatAlarm {
    state: Arc<GatewayState>,
    next_tick: std::sync::Mutex<std::collections::HashMap<String, i64>>,
}

const DEFAULT_HEARTBEAT_EVERY_MS: i64 = 60 * 60 * 1000;

impl HeartbeatAlarm {
    pub fn new(state: Arc<GatewayState>) -> Self {
        Self { state, next_tick: std::sync::Mutex::new(std::collections::HashMap::new()) }
    }

    fn agent_ids(&self) -> Vec<String> {
        match self.state.config.get_path("agents.list") {
            Some(serde_json::Value::Array(items)) if !items.is_empty() => {
                items.into_iter().filter_map(|v| v.as_str().map(str::to_string)).collect()
            }
            _ => vec![self.state.default_agent_id()],
        }
    }

    fn every_ms(&self, agent_id: &str) -> i64 {
        self.state
            .config
            .get_path(&format!("agents.{agent_id}.heartbeat.every"))
            .and_then(|v| v.as_i64())
            .or_else(|| self.state.config.get_path("agents.defaultHeartbeat.every").and_then(|v| v.as_i64()))
            .unwrap_or(DEFAULT_HEARTBEAT_EVERY_MS)
    }

    fn active_hours(&self, agent_id: &str) -> Option<String> {
        self.state
            .config
            .get_path(&format!("agents.{agent_id}.heartbeat.activeHours"))
            .or_else(|| self.state.config.get_path("agents.defaultHeartbeat.activeHours"))
            .and_then(|v| v.as_str().map(str::to_string))
    }

    /// Parses `"HH:MM-HH:MM"` in the configured `userTimezone` (UTC if
    /// unset) and reports whether `now_ms` falls inside the window. Any
    /// malformed spec is treated as "always active" rather than rejected —
    /// heartbeats degrading to unconditional is safer than a silent stall.
    fn within_active_hours(&self, spec: &str, now_ms: i64) -> bool {
        let Some((start, end)) = spec.split_once('-') else { return true };
        let Some((sh, sm)) = parse_hh_mm(start) else { return true };
        let Some((eh, em)) = parse_hh_mm(end) else { return true };

        let tz_name = self.state.config.get_path("userTimezone").and_then(|v| v.as_str().map(str::to_string)).unwrap_or_else(|| "UTC".to_string());
        let tz: chrono_tz::Tz = tz_name.parse().unwrap_or(chrono_tz::UTC);
        let Some(local) = Utc.timestamp_millis_opt(now_ms).single().map(|t| t.with_timezone(&tz)) else { return true };

        let minute_of_day = local.hour() * 60 + local.minute();
        let start_min = sh * 60 + sm;
        let end_min = eh * 60 + em;
        if start_min <= end_min {
            minute_of_day >= start_min && minute_of_day < end_min
        } else {
            // Window wraps past midnight, e.g. "22:00-06:00".
            minute_of_day >= start_min || minute_of_day < end_min
        }
    }

    async fn is_busy(&self, session_key: &str) -> bool {
        match self.state.session_bridge.stats(session_key).await {
            Ok(value) => value.get("busy").and_then(serde_json::Value::as_bool).unwrap_or(false),
            Err(_) => false,
        }
    }
}

fn parse_hh_mm(s: &str) -> Option<(u32, u32)> {
    let (h, m) = s.trim().split_once(':')?;
    Some((h.parse().ok()?, m.parse().ok()?))
}

#[async_trait]
impl AlarmParticipant for HeartbeatAlarm {
    async fn next_due_ms(&self) -> anyhow::Result<Option<i64>> {
        let mut ticks = self.next_tick.lock().unwrap();
        for agent_id in self.agent_ids() {
            ticks.entry(agent_id.clone()).or_insert_with(|| Utc::now().timestamp_millis() + self.every_ms(&agent_id));
        }
        Ok(ticks.values().copied().min())
    }

    async fn run(&self, now_ms: i64) -> anyhow::Result<()> {
        let due_agents: Vec<String> = {
            let ticks = self.next_tick.lock().unwrap();
            ticks.iter().filter(|(_, due)| **due <= now_ms).map(|(agent, _)| agent.clone()).collect()
        };

        for agent_id in due_agents {
            if let Some(spec) = self.active_hours(&agent_id) {
                if !self.within_active_hours(&spec, now_ms) {
                    self.next_tick.lock().unwrap().insert(agent_id.clone(), now_ms + self.every_ms(&agent_id));
                    continue;
                }
            }

            let session_key = gsv_scheduler::HeartbeatScheduler::internal_session_key(&agent_id);
            if self.is_busy(&session_key).await {
                // Re-probe shortly rather than waiting a full interval.
                self.next_tick.lock().unwrap().insert(agent_id.clone(), now_ms + 60_000);
                continue;
            }

            let prompt = self
                .state
                .config
                .get_path(&format!("agents.{agent_id}.heartbeat.prompt"))
                .or_else(|| self.state.config.get_path("agents.defaultHeartbeat.prompt"))
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_else(|| "heartbeat".to_string());

            let run_id = uuid::Uuid::new_v4().to_string();
            if let Err(e) = self
                .state
                .session_bridge
                .chat_send(&session_key, gsv_session::UserMessage { text: prompt, media: vec![] }, &run_id, gsv_session::SessionSnapshot::default(), None, None)
                .await
            {
                tracing::warn!(agent_id = %agent_id, error = %e, "heartbeat tick failed to dispatch");
            }

            self.next_tick.lock().unwrap().insert(agent_id.clone(), now_ms + self.every_ms(&agent_id));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "heartbeat"
    }
}

/// Builds the full participant list for a running gateway (§4.10): pending
/// tool/log op TTLs, async-exec retry/GC, node probe retry/GC, cron, and
/// heartbeat.
pub fn build_participants(state: Arc<GatewayState>) -> Vec<Arc<dyn AlarmParticipant>> {
    vec![
        Arc::new(PendingOpsAlarm::new(PendingOpsTable::Tools, state.clone())),
        Arc::new(PendingOpsAlarm::new(PendingOpsTable::Logs, state.clone())),
        Arc::new(AsyncExecAlarm::new(state.clone())),
        Arc::new(NodeProbeAlarm::new(state.clone())),
        Arc::new(CronAlarm::new(state.clone())),
        Arc::new(HeartbeatAlarm::new(state)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::InMemoryBlobStore;
    use gsv_config::ConfigStore;
    use gsv_persist::{CronStore, InMemoryKvStore, KvStore};
    use gsv_session::LoopbackSessionBridge;
    use serde_json::json;

    fn test_state(config: serde_json::Value) -> Arc<GatewayState> {
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        let cron_store = Arc::new(CronStore::open_in_memory().unwrap());
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        Arc::new(GatewayState::new(
            "0.1.0".into(),
            kv,
            cron_store,
            Arc::new(InMemoryBlobStore::new()),
            Arc::new(LoopbackSessionBridge::new(tx)),
            ConfigStore::new(config),
        ))
    }

    #[tokio::test]
    async fn heartbeat_alarm_schedules_every_configured_agent_on_first_poll() {
        let state = test_state(json!({
            "session": {"mainKey": "agent:main", "defaultAgentId": "main"},
            "agents": {"list": ["main", "helper"], "defaultHeartbeat": {"every": 1000}},
        }));
        let alarm = HeartbeatAlarm::new(state);
        let due = alarm.next_due_ms().await.unwrap();
        assert!(due.is_some());
        assert_eq!(alarm.next_tick.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn heartbeat_alarm_fires_a_chat_send_when_due() {
        let state = test_state(json!({
            "session": {"mainKey": "agent:main", "defaultAgentId": "main"},
            "agents": {"list": ["main"], "defaultHeartbeat": {"every": 1000}},
        }));
        let alarm = HeartbeatAlarm::new(state);
        alarm.next_tick.lock().unwrap().insert("main".to_string(), 0);
        alarm.run(500).await.unwrap();
        // Rescheduled for the next interval after firing.
        assert_eq!(*alarm.next_tick.lock().unwrap().get("main").unwrap(), 500 + 1000);
    }

    #[test]
    fn active_hours_window_excludes_outside_hours() {
        let state = test_state(json!({"session": {"mainKey": "agent:main", "defaultAgentId": "main"}, "userTimezone": "UTC"}));
        let alarm = HeartbeatAlarm::new(state);
        // 1970-01-01T03:00:00Z is 10_800_000 ms since epoch.
        assert!(!alarm.within_active_hours("09:00-18:00", 10_800_000));
        assert!(alarm.within_active_hours("09:00-18:00", 10 * 60 * 60 * 1000));
    }

    #[tokio::test]
    async fn pending_ops_alarm_reports_the_stores_earliest_deadline() {
        let state = test_state(json!({"session": {"mainKey": "agent:main", "defaultAgentId": "main"}}));
        state.pending_tools.insert("c1".into(), "n1".into(), crate::pending_ops::PendingRoute::Session { session_key: "agent:main".into() }, 60_000, 1000);
        let alarm = PendingOpsAlarm::new(PendingOpsTable::Tools, state);
        assert!(alarm.next_due_ms().await.unwrap().is_some());
    }
}
