// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! `GatewayState` assembles every subsystem the dispatcher and HTTP surface
//! share (spec §5: "shared resources ... all read-write only from the
//! gateway instance").
//!
//! Concurrency note (diverging from a literal reading of "single-writer
//! event loop"): rather than one `mpsc`-fed actor task per gateway
//! instance, each subsystem below guards its own state behind a narrow
//! `Mutex`/`RwLock` (see [`crate::connection::ConnectionRegistry`],
//! [`crate::pending_ops::PendingOpsStore`], ...). Spec §5 explicitly
//! permits this: "Implementations may run the loop as one OS thread
//! (cooperative async) or as a pool with an explicit per-instance lock —
//! externally indistinguishable because no two events for the same
//! gateway instance execute simultaneously." Each lock is held only for
//! the plain-data mutation it guards, never across an `.await`, so the
//! externally-observable ordering guarantees (per-socket FIFO, at-most-once
//! consume) hold exactly as they would under a single mailbox task. This
//! is considerably less code than reimplementing the teacher's
//! `AgentHandle`/`ControlService` mailbox (`crates/sven-node/src/control/
//! service.rs`) once per RPC method group.

use crate::async_exec::AsyncExecPipeline;
use crate::connection::ConnectionRegistry;
use crate::http::rate_limit::AuthFailureLimiter;
use crate::node_service::NodeService;
use crate::pending_ops::PendingOpsStore;
use crate::registries::{ChannelRegistry, LastActiveRegistry, SessionRegistry};
use crate::surface::SurfaceRegistry;
use crate::transfer::{BlobStore, TransferTable};
use gsv_channels::ChannelWorker;
use gsv_config::ConfigStore;
use gsv_persist::{CronStore, KvStore};
use gsv_scheduler::{CronScheduler, HeartbeatScheduler};
use gsv_session::SessionBridge;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub struct GatewayState {
    pub server_version: String,
    pub connections: ConnectionRegistry,
    pub nodes: NodeService,
    pub pending_tools: PendingOpsStore,
    pub pending_logs: PendingOpsStore,
    pub async_exec: AsyncExecPipeline,
    pub transfers: TransferTable,
    pub surfaces: SurfaceRegistry,
    pub sessions: SessionRegistry,
    pub channel_registry: ChannelRegistry,
    pub last_active: LastActiveRegistry,
    pub config: ConfigStore,
    pub session_bridge: Arc<dyn SessionBridge>,
    pub cron: CronScheduler,
    pub heartbeat: HeartbeatScheduler,
    pub channel_workers: Mutex<HashMap<(String, String), Arc<dyn ChannelWorker>>>,
    pub auth_failures: AuthFailureLimiter,
}

impl GatewayState {
    pub fn new(
        server_version: String,
        kv: Arc<dyn KvStore>,
        cron_store: Arc<CronStore>,
        blob_store: Arc<dyn BlobStore>,
        session_bridge: Arc<dyn SessionBridge>,
        config: ConfigStore,
    ) -> Self {
        Self {
            server_version,
            connections: ConnectionRegistry::new(),
            nodes: NodeService::new(kv.clone(), crate::native_tools::definitions()),
            pending_tools: PendingOpsStore::new(),
            pending_logs: PendingOpsStore::new(),
            async_exec: AsyncExecPipeline::new(),
            transfers: TransferTable::new(blob_store),
            surfaces: SurfaceRegistry::new(),
            sessions: SessionRegistry::new(kv.clone()),
            channel_registry: ChannelRegistry::new(kv.clone()),
            last_active: LastActiveRegistry::new(kv),
            config,
            session_bridge,
            cron: CronScheduler::new(cron_store),
            heartbeat: HeartbeatScheduler::new(),
            channel_workers: Mutex::new(HashMap::new()),
            auth_failures: AuthFailureLimiter::default(),
        }
    }

    pub fn default_agent_id(&self) -> String {
        self.config.get_path("session.defaultAgentId").and_then(|v| v.as_str().map(str::to_string)).unwrap_or_else(|| "main".to_string())
    }

    pub fn main_key(&self) -> String {
        self.config.get_path("session.mainKey").and_then(|v| v.as_str().map(str::to_string)).unwrap_or_else(|| "agent:main".to_string())
    }

    pub fn canonicalize_session_key(&self, input: &str) -> String {
        gsv_config::canonicalize_session_key(input, &self.main_key(), &self.default_agent_id())
    }

    pub fn tool_timeout_ms(&self) -> i64 {
        self.config.get_path("timeouts.toolMs").and_then(|v| v.as_i64()).unwrap_or(60_000).clamp(1_000, 120_000)
    }

    pub fn log_timeout_ms(&self) -> i64 {
        self.config.get_path("timeouts.logsMs").and_then(|v| v.as_i64()).unwrap_or(20_000).clamp(1_000, 120_000)
    }

    pub fn register_channel_worker(&self, channel: &str, account_id: &str, worker: Arc<dyn ChannelWorker>) {
        self.channel_workers.lock().unwrap().insert((channel.to_string(), account_id.to_string()), worker);
    }

    pub fn channel_worker(&self, channel: &str, account_id: &str) -> Option<Arc<dyn ChannelWorker>> {
        self.channel_workers.lock().unwrap().get(&(channel.to_string(), account_id.to_string())).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::InMemoryBlobStore;
    use gsv_persist::InMemoryKvStore;
    use gsv_session::LoopbackSessionBridge;
    use serde_json::json;

    fn test_state() -> GatewayState {
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        let cron_store = Arc::new(CronStore::open_in_memory().unwrap());
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        GatewayState::new(
            "0.1.0".into(),
            kv,
            cron_store,
            Arc::new(InMemoryBlobStore::new()),
            Arc::new(LoopbackSessionBridge::new(tx)),
            ConfigStore::new(json!({"session": {"mainKey": "agent:main", "defaultAgentId": "main"}})),
        )
    }

    #[test]
    fn canonicalization_is_wired_to_the_config_defaults() {
        let state = test_state();
        assert_eq!(state.canonicalize_session_key("agent:main"), "agent:main");
        assert_eq!(state.canonicalize_session_key("whatsapp:dm:+1"), "agent:main:whatsapp:dm:+1");
    }

    #[test]
    fn tool_timeout_defaults_and_clamps() {
        let state = test_state();
        assert_eq!(state.tool_timeout_ms(), 60_000);
    }

    #[test]
    fn log_timeout_defaults_and_clamps() {
        let state = test_state();
        assert_eq!(state.log_timeout_ms(), 20_000);
    }
}
