// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Node runtime registry, tool catalog and `nodeId__toolName` resolution
//! (spec §4.3 — the largest single module share of the gateway).

use gsv_persist::{KvStore, TypedStore};
use gsv_protocol::{Capability, GatewayError, NodeRuntimeInfo, ToolDefinition};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Native tools are always resolvable without a connected node (spec §4.3,
/// "Native tool precedence").
pub const NATIVE_TOOL_PREFIX: &str = "gsv__";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeCatalogEntry {
    pub node_id: String,
    pub runtime: NodeRuntimeInfo,
    pub tools: Vec<ToolDefinition>,
    pub registered_at_ms: i64,
    pub last_seen_ms: i64,
    /// Presence bit (spec §3): forced `false` on disconnect, `true` on a
    /// fresh `connect`. The catalog entry itself is never deleted by a
    /// disconnect — only an explicit `node.forget` removes it.
    pub online: bool,
    pub first_seen_ms: i64,
    pub last_connected_ms: i64,
    pub last_disconnected_ms: Option<i64>,
    pub client_platform: String,
    pub client_version: String,
}

/// A resolved target for a `tool.call`: either one of the gateway's own
/// native tools, or a specific tool on a specific connected node.
#[derive(Debug, Clone)]
pub enum ToolTarget {
    Native { tool_name: String },
    Node { node_id: String, tool_name: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeRecord {
    pub probe_id: String,
    pub node_id: String,
    pub agent_id: String,
    pub bins: Vec<String>,
    pub attempts: u32,
    pub created_at_ms: i64,
    pub expires_at_ms: i64,
}

pub struct NodeService {
    catalog: TypedStore<NodeCatalogEntry>,
    probes: Mutex<HashMap<String, ProbeRecord>>,
    native_tools: Vec<ToolDefinition>,
}

const PROBE_MAX_ATTEMPTS: u32 = 2;
const PROBE_TTL_MS: i64 = 10 * 60 * 1000;

impl NodeService {
    pub fn new(backend: Arc<dyn KvStore>, native_tools: Vec<ToolDefinition>) -> Self {
        Self {
            catalog: TypedStore::new(backend, "nodeCatalog"),
            probes: Mutex::new(HashMap::new()),
            native_tools,
        }
    }

    /// Validates capability closure (P10): every capability any tool
    /// declares must also appear in the node's `host_capabilities`.
    pub fn validate_capability_closure(runtime: &NodeRuntimeInfo) -> Result<(), GatewayError> {
        let host: std::collections::HashSet<&Capability> = runtime.host_capabilities.iter().collect();
        for (tool_name, caps) in &runtime.tool_capabilities {
            for cap in caps {
                if !host.contains(cap) {
                    return Err(GatewayError::BadParams(format!(
                        "tool {tool_name} declares capability {cap:?} not covered by host_capabilities"
                    )));
                }
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn register_node(
        &self,
        node_id: &str,
        runtime: NodeRuntimeInfo,
        tools: Vec<ToolDefinition>,
        client_platform: String,
        client_version: String,
        now_ms: i64,
    ) -> Result<(), GatewayError> {
        Self::validate_capability_closure(&runtime)?;
        let existing = self.catalog.get(node_id).await.map_err(|e| GatewayError::Internal(e.to_string()))?;
        let (registered_at_ms, first_seen_ms) = match &existing {
            Some(existing) => (existing.registered_at_ms, existing.first_seen_ms),
            None => (now_ms, now_ms),
        };
        let entry = NodeCatalogEntry {
            node_id: node_id.to_string(),
            runtime,
            tools,
            registered_at_ms,
            last_seen_ms: now_ms,
            online: true,
            first_seen_ms,
            last_connected_ms: now_ms,
            last_disconnected_ms: existing.and_then(|e| e.last_disconnected_ms),
            client_platform,
            client_version,
        };
        self.catalog
            .put(node_id, &entry)
            .await
            .map_err(|e| GatewayError::Internal(e.to_string()))
    }

    pub async fn touch_last_seen(&self, node_id: &str, now_ms: i64) -> Result<(), GatewayError> {
        if let Some(mut entry) = self.catalog.get(node_id).await.map_err(|e| GatewayError::Internal(e.to_string()))? {
            entry.last_seen_ms = now_ms;
            self.catalog.put(node_id, &entry).await.map_err(|e| GatewayError::Internal(e.to_string()))?;
        }
        Ok(())
    }

    /// Marks a node's catalog entry offline without deleting it (spec §3:
    /// entries are "preserved across disconnects ... until an explicit
    /// `node.forget`"). A no-op if the node was never registered.
    pub async fn mark_offline(&self, node_id: &str, now_ms: i64) -> Result<(), GatewayError> {
        if let Some(mut entry) = self.catalog.get(node_id).await.map_err(|e| GatewayError::Internal(e.to_string()))? {
            entry.online = false;
            entry.last_disconnected_ms = Some(now_ms);
            self.catalog.put(node_id, &entry).await.map_err(|e| GatewayError::Internal(e.to_string()))?;
        }
        Ok(())
    }

    /// Hard delete, used only by an explicit `node.forget` against an
    /// offline node — a disconnect must call [`Self::mark_offline`] instead.
    pub async fn unregister_node(&self, node_id: &str) -> Result<(), GatewayError> {
        self.catalog.delete(node_id).await.map_err(|e| GatewayError::Internal(e.to_string()))
    }

    pub async fn get(&self, node_id: &str) -> Result<Option<NodeCatalogEntry>, GatewayError> {
        self.catalog.get(node_id).await.map_err(|e| GatewayError::Internal(e.to_string()))
    }

    pub async fn list(&self) -> Result<Vec<NodeCatalogEntry>, GatewayError> {
        let snapshot = self.catalog.snapshot().await.map_err(|e| GatewayError::Internal(e.to_string()))?;
        Ok(snapshot.into_iter().map(|(_, entry)| entry).collect())
    }

    pub fn native_tools(&self) -> &[ToolDefinition] {
        &self.native_tools
    }

    pub async fn all_tools(&self) -> Result<Vec<ToolDefinition>, GatewayError> {
        let mut out = self.native_tools.clone();
        for node in self.list().await? {
            out.extend(namespaced(&node.node_id, &node.tools));
        }
        Ok(out)
    }

    /// Resolves a possibly-namespaced tool name against the native tool
    /// list first, then against connected nodes (spec §4.3 "Native tool
    /// precedence": a native tool named `gsv__ping` always wins over a node
    /// tool that happens to register the same bare name).
    pub async fn resolve(&self, name: &str) -> Result<ToolTarget, GatewayError> {
        if name.starts_with(NATIVE_TOOL_PREFIX) && self.native_tools.iter().any(|t| t.name == name) {
            return Ok(ToolTarget::Native { tool_name: name.to_string() });
        }

        if let Some((node_id, tool_name)) = name.split_once("__") {
            if let Some(entry) = self.get(node_id).await? {
                if entry.tools.iter().any(|t| t.name == tool_name) {
                    return Ok(ToolTarget::Node { node_id: node_id.to_string(), tool_name: tool_name.to_string() });
                }
            }
            return Err(GatewayError::NotFound(format!("no tool {tool_name} on node {node_id}")));
        }

        Err(GatewayError::NotFound(format!("tool {name} not found (expected nodeId__toolName)")))
    }

    pub fn start_probe(&self, probe_id: String, node_id: String, agent_id: String, bins: Vec<String>, now_ms: i64) -> ProbeRecord {
        let record = ProbeRecord {
            probe_id: probe_id.clone(),
            node_id,
            agent_id,
            bins,
            attempts: 1,
            created_at_ms: now_ms,
            expires_at_ms: now_ms + PROBE_TTL_MS,
        };
        self.probes.lock().unwrap().insert(probe_id, record.clone());
        record
    }

    pub fn retry_probe(&self, probe_id: &str) -> Option<ProbeRecord> {
        let mut probes = self.probes.lock().unwrap();
        let record = probes.get_mut(probe_id)?;
        if record.attempts >= PROBE_MAX_ATTEMPTS {
            return None;
        }
        record.attempts += 1;
        Some(record.clone())
    }

    pub fn complete_probe(&self, probe_id: &str) -> Option<ProbeRecord> {
        self.probes.lock().unwrap().remove(probe_id)
    }

    /// GC sweep for probes that never got an answer and outlived their TTL.
    /// Returns the swept probe ids so a caller can log / mark them failed.
    pub fn sweep_expired_probes(&self, now_ms: i64) -> Vec<String> {
        let mut probes = self.probes.lock().unwrap();
        let expired: Vec<String> = probes
            .values()
            .filter(|p| p.expires_at_ms <= now_ms)
            .map(|p| p.probe_id.clone())
            .collect();
        for id in &expired {
            probes.remove(id);
        }
        expired
    }

    pub fn earliest_probe_deadline_ms(&self) -> Option<i64> {
        self.probes.lock().unwrap().values().map(|p| p.expires_at_ms).min()
    }
}

fn namespaced(node_id: &str, tools: &[ToolDefinition]) -> Vec<ToolDefinition> {
    tools
        .iter()
        .map(|t| ToolDefinition {
            name: format!("{node_id}__{}", t.name),
            description: t.description.clone(),
            input_schema: t.input_schema.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use gsv_persist::InMemoryKvStore;
    use serde_json::json;

    fn runtime(host_caps: Vec<Capability>) -> NodeRuntimeInfo {
        NodeRuntimeInfo {
            host_capabilities: host_caps,
            tool_capabilities: HashMap::new(),
            host_os: Some("linux".into()),
            host_env: None,
        }
    }

    fn tool(name: &str) -> ToolDefinition {
        ToolDefinition { name: name.into(), description: "d".into(), input_schema: json!({}) }
    }

    #[tokio::test]
    async fn native_tool_wins_over_a_node_tool_with_the_same_namespaced_name() {
        let backend = Arc::new(InMemoryKvStore::new());
        let native = vec![tool("gsv__ping")];
        let svc = NodeService::new(backend, native);
        svc.register_node("gsv__ping", runtime(vec![]), vec![tool("ping")], "linux".into(), "1.0".into(), 0).await.unwrap();

        let target = svc.resolve("gsv__ping").await.unwrap();
        matches!(target, ToolTarget::Native { .. });
    }

    #[tokio::test]
    async fn resolves_a_namespaced_node_tool() {
        let backend = Arc::new(InMemoryKvStore::new());
        let svc = NodeService::new(backend, vec![]);
        svc.register_node("n1", runtime(vec![]), vec![tool("shell")], "linux".into(), "1.0".into(), 0).await.unwrap();

        let target = svc.resolve("n1__shell").await.unwrap();
        match target {
            ToolTarget::Node { node_id, tool_name } => {
                assert_eq!(node_id, "n1");
                assert_eq!(tool_name, "shell");
            }
            _ => panic!("expected node target"),
        }
    }

    #[tokio::test]
    async fn rejects_tool_capability_not_covered_by_host_capabilities() {
        let backend = Arc::new(InMemoryKvStore::new());
        let svc = NodeService::new(backend, vec![]);
        let mut rt = runtime(vec![Capability::FsRead]);
        rt.tool_capabilities.insert("shell".into(), vec![Capability::ShellExec]);
        let err = svc.register_node("n1", rt, vec![], "linux".into(), "1.0".into(), 0).await.unwrap_err();
        assert!(matches!(err, GatewayError::BadParams(_)));
    }

    #[tokio::test]
    async fn mark_offline_retains_the_entry_and_reconnect_preserves_first_seen() {
        let backend = Arc::new(InMemoryKvStore::new());
        let svc = NodeService::new(backend, vec![]);
        svc.register_node("n1", runtime(vec![]), vec![tool("shell")], "linux".into(), "1.0".into(), 0).await.unwrap();

        svc.mark_offline("n1", 1000).await.unwrap();
        let entry = svc.get("n1").await.unwrap().unwrap();
        assert!(!entry.online);
        assert_eq!(entry.last_disconnected_ms, Some(1000));
        assert_eq!(entry.first_seen_ms, 0);

        svc.register_node("n1", runtime(vec![]), vec![tool("shell")], "linux".into(), "1.1".into(), 2000).await.unwrap();
        let entry = svc.get("n1").await.unwrap().unwrap();
        assert!(entry.online);
        assert_eq!(entry.first_seen_ms, 0);
        assert_eq!(entry.last_connected_ms, 2000);
        assert_eq!(entry.last_disconnected_ms, Some(1000));
    }

    #[tokio::test]
    async fn mark_offline_on_an_unknown_node_is_a_no_op() {
        let backend = Arc::new(InMemoryKvStore::new());
        let svc = NodeService::new(backend, vec![]);
        svc.mark_offline("ghost", 0).await.unwrap();
        assert!(svc.get("ghost").await.unwrap().is_none());
    }

    #[test]
    fn probe_retry_is_capped_at_two_attempts() {
        let backend = Arc::new(InMemoryKvStore::new());
        let svc = NodeService::new(backend, vec![]);
        svc.start_probe("p1".into(), "n1".into(), "a1".into(), vec!["bash".into()], 0);
        assert!(svc.retry_probe("p1").is_some());
        assert!(svc.retry_probe("p1").is_none());
    }

    #[test]
    fn sweep_expired_probes_removes_past_deadline_entries() {
        let backend = Arc::new(InMemoryKvStore::new());
        let svc = NodeService::new(backend, vec![]);
        svc.start_probe("p1".into(), "n1".into(), "a1".into(), vec![], 0);
        let expired = svc.sweep_expired_probes(PROBE_TTL_MS + 1);
        assert_eq!(expired, vec!["p1".to_string()]);
        assert!(svc.complete_probe("p1").is_none());
    }
}
