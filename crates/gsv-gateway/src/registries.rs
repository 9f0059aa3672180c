// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Discovery-only indices (spec §3): session registry, channel registry,
//! and last-active context. None of these own session state — the
//! external session actor does — they only let the gateway answer "what
//! exists" and "where should a proactive message go".

use gsv_persist::{KvStore, TypedStore};
use gsv_protocol::GatewayError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRegistryEntry {
    pub session_key: String,
    pub created_at_ms: i64,
    pub last_active_at_ms: i64,
    pub label: Option<String>,
}

pub struct SessionRegistry {
    store: TypedStore<SessionRegistryEntry>,
}

impl SessionRegistry {
    pub fn new(backend: Arc<dyn KvStore>) -> Self {
        Self { store: TypedStore::new(backend, "sessionRegistry") }
    }

    pub async fn touch(&self, session_key: &str, now_ms: i64) -> Result<(), GatewayError> {
        let entry = match self.store.get(session_key).await.map_err(|e| GatewayError::Internal(e.to_string()))? {
            Some(mut existing) => {
                existing.last_active_at_ms = now_ms;
                existing
            }
            None => SessionRegistryEntry { session_key: session_key.to_string(), created_at_ms: now_ms, last_active_at_ms: now_ms, label: None },
        };
        self.store.put(session_key, &entry).await.map_err(|e| GatewayError::Internal(e.to_string()))
    }

    pub async fn list(&self) -> Result<Vec<SessionRegistryEntry>, GatewayError> {
        let snapshot = self.store.snapshot().await.map_err(|e| GatewayError::Internal(e.to_string()))?;
        Ok(snapshot.into_iter().map(|(_, entry)| entry).collect())
    }

    pub async fn get(&self, session_key: &str) -> Result<Option<SessionRegistryEntry>, GatewayError> {
        self.store.get(session_key).await.map_err(|e| GatewayError::Internal(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelMode {
    Qr,
    Pairing,
    Token,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStatusRecord {
    pub connected: bool,
    pub authenticated: bool,
    pub mode: Option<ChannelMode>,
    pub last_activity_ms: Option<i64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelRegistryEntry {
    pub channel: String,
    pub account_id: String,
    pub connected_at_ms: i64,
    pub last_message_at_ms: Option<i64>,
    pub status: ChannelStatusRecord,
}

fn channel_key(channel: &str, account_id: &str) -> String {
    format!("{channel}:{account_id}")
}

pub struct ChannelRegistry {
    store: TypedStore<ChannelRegistryEntry>,
}

impl ChannelRegistry {
    pub fn new(backend: Arc<dyn KvStore>) -> Self {
        Self { store: TypedStore::new(backend, "channelRegistry") }
    }

    pub async fn record_message(&self, channel: &str, account_id: &str, now_ms: i64) -> Result<(), GatewayError> {
        let key = channel_key(channel, account_id);
        let entry = match self.store.get(&key).await.map_err(|e| GatewayError::Internal(e.to_string()))? {
            Some(mut existing) => {
                existing.last_message_at_ms = Some(now_ms);
                existing
            }
            None => ChannelRegistryEntry {
                channel: channel.to_string(),
                account_id: account_id.to_string(),
                connected_at_ms: now_ms,
                last_message_at_ms: Some(now_ms),
                status: ChannelStatusRecord::default(),
            },
        };
        self.store.put(&key, &entry).await.map_err(|e| GatewayError::Internal(e.to_string()))
    }

    pub async fn set_status(&self, channel: &str, account_id: &str, status: ChannelStatusRecord, now_ms: i64) -> Result<(), GatewayError> {
        let key = channel_key(channel, account_id);
        let mut entry = self.store.get(&key).await.map_err(|e| GatewayError::Internal(e.to_string()))?.unwrap_or(ChannelRegistryEntry {
            channel: channel.to_string(),
            account_id: account_id.to_string(),
            connected_at_ms: now_ms,
            last_message_at_ms: None,
            status: ChannelStatusRecord::default(),
        });
        entry.status = status;
        self.store.put(&key, &entry).await.map_err(|e| GatewayError::Internal(e.to_string()))
    }

    pub async fn get(&self, channel: &str, account_id: &str) -> Result<Option<ChannelRegistryEntry>, GatewayError> {
        self.store.get(&channel_key(channel, account_id)).await.map_err(|e| GatewayError::Internal(e.to_string()))
    }

    pub async fn list(&self) -> Result<Vec<ChannelRegistryEntry>, GatewayError> {
        let snapshot = self.store.snapshot().await.map_err(|e| GatewayError::Internal(e.to_string()))?;
        Ok(snapshot.into_iter().map(|(_, entry)| entry).collect())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastActiveContext {
    pub channel: String,
    pub account_id: String,
    pub peer: gsv_channels::Peer,
    pub session_key: String,
    pub timestamp_ms: i64,
}

pub struct LastActiveRegistry {
    store: TypedStore<LastActiveContext>,
}

impl LastActiveRegistry {
    pub fn new(backend: Arc<dyn KvStore>) -> Self {
        Self { store: TypedStore::new(backend, "lastActiveContext") }
    }

    pub async fn record(&self, agent_id: &str, context: LastActiveContext) -> Result<(), GatewayError> {
        self.store.put(agent_id, &context).await.map_err(|e| GatewayError::Internal(e.to_string()))
    }

    pub async fn get(&self, agent_id: &str) -> Result<Option<LastActiveContext>, GatewayError> {
        self.store.get(agent_id).await.map_err(|e| GatewayError::Internal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gsv_persist::InMemoryKvStore;

    #[tokio::test]
    async fn session_registry_touch_creates_then_updates() {
        let backend = Arc::new(InMemoryKvStore::new());
        let registry = SessionRegistry::new(backend);
        registry.touch("agent:main", 0).await.unwrap();
        registry.touch("agent:main", 100).await.unwrap();
        let entry = registry.get("agent:main").await.unwrap().unwrap();
        assert_eq!(entry.created_at_ms, 0);
        assert_eq!(entry.last_active_at_ms, 100);
    }

    #[tokio::test]
    async fn channel_registry_tracks_status_and_last_message() {
        let backend = Arc::new(InMemoryKvStore::new());
        let registry = ChannelRegistry::new(backend);
        registry.record_message("whatsapp", "default", 10).await.unwrap();
        registry
            .set_status("whatsapp", "default", ChannelStatusRecord { connected: true, authenticated: true, mode: Some(ChannelMode::Qr), last_activity_ms: Some(10), error: None }, 10)
            .await
            .unwrap();
        let entry = registry.get("whatsapp", "default").await.unwrap().unwrap();
        assert!(entry.status.connected);
        assert_eq!(entry.last_message_at_ms, Some(10));
    }
}
