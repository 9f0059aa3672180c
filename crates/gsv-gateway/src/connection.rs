// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Connection registry (§3 "Connection", invariant P5).
//!
//! Three disjoint id spaces — `clientId`, `nodeId`, `channelKey` — each map
//! to at most one live connection. Registering a new socket under a key
//! already in use atomically replaces the old one: the old socket is handed
//! a close frame (status 1000 "Replaced") over its own outbound queue and
//! dropped from every map in the same critical section, so a close event
//! that arrives later for the replaced socket finds its connection id no
//! longer the current occupant of the key and is ignored (P5).

use gsv_protocol::{ConnectionMode, Frame};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Sent down a connection's private outbound queue. A write task owns the
/// other end and drains it into the socket so a slow peer never blocks the
/// dispatch loop (spec §4.1 expansion).
#[derive(Debug, Clone)]
pub enum Outbound {
    Frame(Frame),
    /// A raw `[4-byte LE transferId][chunk bytes]` transfer chunk, forwarded
    /// byte-for-byte to the other endpoint's socket (spec §4.8).
    Binary(Vec<u8>),
    /// Echoes a client-initiated WebSocket ping.
    Pong(Vec<u8>),
    Close { code: u16, reason: String },
}

/// The resolved identity of one connection, threaded through dispatch
/// after a successful `connect` handshake.
#[derive(Debug, Clone)]
pub struct ConnCtx {
    pub connection_id: String,
    pub mode: ConnectionMode,
    pub peer_id: String,
    pub account_id: Option<String>,
}

pub struct ConnectionEntry {
    pub connection_id: String,
    pub mode: ConnectionMode,
    pub client_id: Option<String>,
    pub node_id: Option<String>,
    pub channel_key: Option<String>,
    pub account_id: Option<String>,
    pub client_version: String,
    pub client_platform: String,
    pub sender: mpsc::UnboundedSender<Outbound>,
}

#[derive(Default)]
struct Inner {
    connections: HashMap<String, ConnectionEntry>,
    by_client: HashMap<String, String>,
    by_node: HashMap<String, String>,
    by_channel: HashMap<String, String>,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    inner: Mutex<Inner>,
}

/// The disjoint key space a connection may occupy (spec §3 invariant: "no
/// two live connections share the same `clientId`, `nodeId`, or
/// `channelKey`").
pub enum PeerKey {
    Client(String),
    Node(String),
    Channel(String),
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `entry` under `key`, closing and evicting whatever
    /// connection previously held that key. Returns the outbound sender of
    /// the previous holder (if any) so the caller can observe the replace
    /// but does not itself send anything — insertion already queued the
    /// close frame on that sender.
    pub fn register(&self, key: PeerKey, mut entry: ConnectionEntry) {
        let mut inner = self.inner.lock().unwrap();
        let (index, index_key) = match &key {
            PeerKey::Client(id) => (&mut inner.by_client, id.clone()),
            PeerKey::Node(id) => (&mut inner.by_node, id.clone()),
            PeerKey::Channel(id) => (&mut inner.by_channel, id.clone()),
        };

        match &key {
            PeerKey::Client(id) => entry.client_id = Some(id.clone()),
            PeerKey::Node(id) => entry.node_id = Some(id.clone()),
            PeerKey::Channel(id) => entry.channel_key = Some(id.clone()),
        }

        if let Some(old_connection_id) = index.insert(index_key, entry.connection_id.clone()) {
            if let Some(old) = inner.connections.remove(&old_connection_id) {
                let _ = old.sender.send(Outbound::Close { code: 1000, reason: "Replaced".into() });
                tracing::info!(
                    old_connection = %old_connection_id,
                    new_connection = %entry.connection_id,
                    "connection replaced"
                );
            }
        }

        inner.connections.insert(entry.connection_id.clone(), entry);
    }

    /// Removes `connection_id` from every map **only if it is still the
    /// current occupant** of its key — a stale close event for an already
    /// -replaced socket is a no-op (P5).
    pub fn remove_if_current(&self, connection_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        let Some(entry) = inner.connections.get(connection_id) else { return };

        let still_current = match (&entry.client_id, &entry.node_id, &entry.channel_key) {
            (Some(id), _, _) => inner.by_client.get(id).map(String::as_str) == Some(connection_id),
            (_, Some(id), _) => inner.by_node.get(id).map(String::as_str) == Some(connection_id),
            (_, _, Some(id)) => inner.by_channel.get(id).map(String::as_str) == Some(connection_id),
            _ => true,
        };
        if !still_current {
            return;
        }

        if let Some(id) = &entry.client_id {
            inner.by_client.remove(id);
        }
        if let Some(id) = &entry.node_id {
            inner.by_node.remove(id);
        }
        if let Some(id) = &entry.channel_key {
            inner.by_channel.remove(id);
        }
        inner.connections.remove(connection_id);
    }

    pub fn sender_for_node(&self, node_id: &str) -> Option<mpsc::UnboundedSender<Outbound>> {
        let inner = self.inner.lock().unwrap();
        let cid = inner.by_node.get(node_id)?;
        inner.connections.get(cid).map(|e| e.sender.clone())
    }

    pub fn sender_for_client(&self, client_id: &str) -> Option<mpsc::UnboundedSender<Outbound>> {
        let inner = self.inner.lock().unwrap();
        let cid = inner.by_client.get(client_id)?;
        inner.connections.get(cid).map(|e| e.sender.clone())
    }

    pub fn sender_for_channel(&self, channel_key: &str) -> Option<mpsc::UnboundedSender<Outbound>> {
        let inner = self.inner.lock().unwrap();
        let cid = inner.by_channel.get(channel_key)?;
        inner.connections.get(cid).map(|e| e.sender.clone())
    }

    pub fn is_node_connected(&self, node_id: &str) -> bool {
        self.sender_for_node(node_id).is_some()
    }

    pub fn connected_node_ids(&self) -> Vec<String> {
        self.inner.lock().unwrap().by_node.keys().cloned().collect()
    }

    pub fn connected_client_ids(&self) -> Vec<String> {
        self.inner.lock().unwrap().by_client.keys().cloned().collect()
    }

    /// The node owning a socket, for authorizing `tool.result`/`logs.result`
    /// deliveries against the `nodeId` a connection claims to be (P2).
    pub fn node_id_for_connection(&self, connection_id: &str) -> Option<String> {
        self.inner.lock().unwrap().connections.get(connection_id)?.node_id.clone()
    }

    pub fn client_id_for_connection(&self, connection_id: &str) -> Option<String> {
        self.inner.lock().unwrap().connections.get(connection_id)?.client_id.clone()
    }

    pub fn broadcast_to_clients(&self, payload: Frame) {
        let inner = self.inner.lock().unwrap();
        for cid in inner.by_client.values() {
            if let Some(entry) = inner.connections.get(cid) {
                let _ = entry.sender.send(Outbound::Frame(payload.clone()));
            }
        }
    }

    pub fn broadcast_to_clients_except(&self, originator_client_id: &str, payload: Frame) {
        let inner = self.inner.lock().unwrap();
        for (client_id, cid) in inner.by_client.iter() {
            if client_id == originator_client_id {
                continue;
            }
            if let Some(entry) = inner.connections.get(cid) {
                let _ = entry.sender.send(Outbound::Frame(payload.clone()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(connection_id: &str) -> (ConnectionEntry, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            ConnectionEntry {
                connection_id: connection_id.to_string(),
                mode: ConnectionMode::Node,
                client_id: None,
                node_id: None,
                channel_key: None,
                account_id: None,
                client_version: "1.0".into(),
                client_platform: "linux".into(),
                sender: tx,
            },
            rx,
        )
    }

    #[test]
    fn registering_a_second_node_socket_replaces_and_closes_the_first() {
        let registry = ConnectionRegistry::new();
        let (e1, mut rx1) = entry("c1");
        registry.register(PeerKey::Node("n1".into()), e1);

        let (e2, _rx2) = entry("c2");
        registry.register(PeerKey::Node("n1".into()), e2);

        let msg = rx1.try_recv().unwrap();
        match msg {
            Outbound::Close { code, reason } => {
                assert_eq!(code, 1000);
                assert_eq!(reason, "Replaced");
            }
            _ => panic!("expected close"),
        }
        assert!(registry.is_node_connected("n1"));
        // the live sender now belongs to c2, not c1.
        assert!(registry.sender_for_node("n1").is_some());
    }

    #[test]
    fn stale_close_for_a_replaced_socket_is_a_no_op() {
        let registry = ConnectionRegistry::new();
        let (e1, _rx1) = entry("c1");
        registry.register(PeerKey::Node("n1".into()), e1);
        let (e2, _rx2) = entry("c2");
        registry.register(PeerKey::Node("n1".into()), e2);

        // c1's close event arrives late.
        registry.remove_if_current("c1");

        // n1 must still resolve to c2's connection.
        assert!(registry.is_node_connected("n1"));
    }

    #[test]
    fn remove_if_current_evicts_the_live_occupant() {
        let registry = ConnectionRegistry::new();
        let (e1, _rx1) = entry("c1");
        registry.register(PeerKey::Node("n1".into()), e1);
        registry.remove_if_current("c1");
        assert!(!registry.is_node_connected("n1"));
    }
}
