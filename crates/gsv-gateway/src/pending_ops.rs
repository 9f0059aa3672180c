// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Pending-operations store (spec §4.4): tracks in-flight `tool.call` and
//! `logs.request` round trips so a node's eventual `tool.result` /
//! `logs.result` can be routed back to whichever session or client opened
//! it, exactly once (P1).
//!
//! The table is a plain `Mutex`-guarded map: a `consume` is a single
//! critical section doing lookup-and-remove together, so two concurrent
//! deliveries for the same `callId` can never both succeed — the second
//! finds nothing and is dropped as a late/duplicate reply.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// Where a resolved `tool.call` / `logs.request` result should be delivered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PendingRoute {
    /// Routed back into a running agent session (a `chat.send` triggered
    /// tool use).
    Session { session_key: String },
    /// Routed back to the client connection that issued the RPC directly
    /// (a `tool.call` invoked straight off a client connection).
    Client { client_id: String, request_id: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingOperation {
    pub call_id: String,
    pub node_id: String,
    pub route: PendingRoute,
    pub created_at_ms: i64,
    pub expires_at_ms: i64,
}

/// Default TTL for calls that don't thread a config-derived timeout through
/// (only used by this module's own tests).
#[cfg(test)]
const DEFAULT_TTL_MS: i64 = 5 * 60 * 1000;

/// Outcome of an authorized at-most-once consume attempt (P1/P2).
#[derive(Debug)]
pub enum ConsumeOutcome {
    Ok(PendingOperation),
    /// No pending op under this `callId` — already consumed, expired, or
    /// never existed. Maps to 404.
    NotFound,
    /// A pending op exists under this `callId` but the caller isn't the
    /// node it was routed to. Maps to 403; the op is left in place so the
    /// legitimate node's reply still has a chance to land.
    WrongNode,
}

#[derive(Default)]
pub struct PendingOpsStore {
    ops: Mutex<HashMap<String, PendingOperation>>,
}

impl PendingOpsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, call_id: String, node_id: String, route: PendingRoute, ttl_ms: i64, now_ms: i64) {
        let op = PendingOperation { call_id: call_id.clone(), node_id, route, created_at_ms: now_ms, expires_at_ms: now_ms + ttl_ms };
        self.ops.lock().unwrap().insert(call_id, op);
    }

    /// At-most-once consume: the first caller to observe a given `callId`
    /// removes it and gets `Ok`; every later caller (retransmit, race) gets
    /// `NotFound`; a caller claiming a `callId` routed to a different node
    /// gets `WrongNode` without consuming it (P1, P2).
    pub fn consume(&self, call_id: &str, claimed_node_id: &str) -> ConsumeOutcome {
        let mut ops = self.ops.lock().unwrap();
        let Some(op) = ops.get(call_id) else {
            return ConsumeOutcome::NotFound;
        };
        if op.node_id != claimed_node_id {
            return ConsumeOutcome::WrongNode;
        }
        match ops.remove(call_id) {
            Some(op) => ConsumeOutcome::Ok(op),
            None => ConsumeOutcome::NotFound,
        }
    }

    pub fn peek(&self, call_id: &str) -> Option<PendingOperation> {
        self.ops.lock().unwrap().get(call_id).cloned()
    }

    pub fn sweep_expired(&self, now_ms: i64) -> Vec<PendingOperation> {
        let mut ops = self.ops.lock().unwrap();
        let expired_ids: Vec<String> = ops.values().filter(|o| o.expires_at_ms <= now_ms).map(|o| o.call_id.clone()).collect();
        expired_ids.iter().filter_map(|id| ops.remove(id)).collect()
    }

    pub fn earliest_deadline_ms(&self) -> Option<i64> {
        self.ops.lock().unwrap().values().map(|o| o.expires_at_ms).min()
    }

    pub fn pending_for_node(&self, node_id: &str) -> Vec<PendingOperation> {
        self.ops.lock().unwrap().values().filter(|o| o.node_id == node_id).cloned().collect()
    }

    /// Removes every pending op routed back to `client_id` directly,
    /// returning them so the caller can fail them out to whoever is still
    /// listening (spec §4.4 "Client eviction": a disconnecting client can
    /// never collect a reply, so its pending calls must not linger until
    /// TTL). Session-routed ops are untouched — the session itself outlives
    /// the client socket.
    pub fn evict_client(&self, client_id: &str) -> Vec<PendingOperation> {
        let mut ops = self.ops.lock().unwrap();
        let dead_ids: Vec<String> = ops
            .values()
            .filter(|o| matches!(&o.route, PendingRoute::Client { client_id: c, .. } if c == client_id))
            .map(|o| o.call_id.clone())
            .collect();
        dead_ids.iter().filter_map(|id| ops.remove(id)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consume_is_at_most_once() {
        let store = PendingOpsStore::new();
        store.insert("call-1".into(), "node-1".into(), PendingRoute::Session { session_key: "agent:a".into() }, DEFAULT_TTL_MS, 0);

        assert!(matches!(store.consume("call-1", "node-1"), ConsumeOutcome::Ok(_)));
        assert!(matches!(store.consume("call-1", "node-1"), ConsumeOutcome::NotFound));
    }

    #[test]
    fn consume_rejects_a_result_claiming_the_wrong_node() {
        let store = PendingOpsStore::new();
        store.insert("call-1".into(), "node-1".into(), PendingRoute::Session { session_key: "agent:a".into() }, DEFAULT_TTL_MS, 0);

        assert!(matches!(store.consume("call-1", "node-attacker"), ConsumeOutcome::WrongNode));
        // The real node can still claim it afterwards.
        assert!(matches!(store.consume("call-1", "node-1"), ConsumeOutcome::Ok(_)));
    }

    #[test]
    fn sweep_expired_drops_stale_entries_and_leaves_fresh_ones() {
        let store = PendingOpsStore::new();
        store.insert("old".into(), "node-1".into(), PendingRoute::Session { session_key: "a".into() }, DEFAULT_TTL_MS, 0);
        store.insert("fresh".into(), "node-1".into(), PendingRoute::Session { session_key: "a".into() }, DEFAULT_TTL_MS, 1_000_000);

        let swept = store.sweep_expired(DEFAULT_TTL_MS + 1);
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].call_id, "old");
        assert!(store.peek("fresh").is_some());
    }

    #[test]
    fn evict_client_only_removes_that_clients_direct_routes() {
        let store = PendingOpsStore::new();
        store.insert("direct".into(), "node-1".into(), PendingRoute::Client { client_id: "c1".into(), request_id: "r1".into() }, DEFAULT_TTL_MS, 0);
        store.insert("other-client".into(), "node-1".into(), PendingRoute::Client { client_id: "c2".into(), request_id: "r2".into() }, DEFAULT_TTL_MS, 0);
        store.insert("session-routed".into(), "node-1".into(), PendingRoute::Session { session_key: "agent:main".into() }, DEFAULT_TTL_MS, 0);

        let evicted = store.evict_client("c1");
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].call_id, "direct");
        assert!(store.peek("other-client").is_some());
        assert!(store.peek("session-routed").is_some());
    }

    #[test]
    fn pending_for_node_returns_only_that_nodes_entries() {
        let store = PendingOpsStore::new();
        store.insert("a".into(), "node-1".into(), PendingRoute::Client { client_id: "c1".into(), request_id: "r1".into() }, DEFAULT_TTL_MS, 0);
        store.insert("b".into(), "node-2".into(), PendingRoute::Client { client_id: "c2".into(), request_id: "r2".into() }, DEFAULT_TTL_MS, 0);

        let pending = store.pending_for_node("node-1");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].call_id, "a");
    }
}
