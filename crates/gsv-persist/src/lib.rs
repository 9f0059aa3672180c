// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Persistence adapter for the gateway (spec §4.12).
//!
//! Every durable component (tool registry, pending-ops store, transfer
//! table, cron jobs, ...) is a keyed map with single-writer semantics: every
//! mutation is written through synchronously and every read is served from
//! the backing store (or an in-memory cache layered on top of it).
//! [`KvStore`] is the narrow interface that makes this swappable between a
//! cold-start-only in-memory map and a SQLite-backed one.
//!
//! [`TypedStore`] wraps a [`KvStore`] with a single logical prefix and
//! (de)serializes a concrete `T`, so callers never see raw JSON. Its
//! [`TypedStore::snapshot`] always returns owned, plain data — never a
//! handle into the backing map — per the "no proxy leakage" guidance in
//! spec §9.

mod cron_store;
mod memory;
mod sqlite;

pub use cron_store::{CronRow, CronStore};
pub use memory::InMemoryKvStore;
pub use sqlite::SqliteKvStore;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;

/// A keyed, single-writer persistence backend.
///
/// `prefix` namespaces unrelated logical stores sharing one backend (e.g.
/// `toolRegistry:` vs `pendingOperations:`), matching the persisted-layout
/// prefixes enumerated in spec §6.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, prefix: &str, key: &str) -> anyhow::Result<Option<Value>>;
    async fn put(&self, prefix: &str, key: &str, value: Value) -> anyhow::Result<()>;
    async fn delete(&self, prefix: &str, key: &str) -> anyhow::Result<()>;
    /// All `(key, value)` pairs under `prefix`, in unspecified order.
    async fn list(&self, prefix: &str) -> anyhow::Result<Vec<(String, Value)>>;
}

/// A `KvStore` view scoped to one prefix and one value type.
///
/// This is the "persisted object" re-architecture target from spec §9:
/// a typed `get/put/delete/list` surface with a `snapshot()` that always
/// hands back plain owned data, never a live reference into the store.
#[derive(Clone)]
pub struct TypedStore<T> {
    backend: Arc<dyn KvStore>,
    prefix: String,
    _marker: PhantomData<T>,
}

impl<T: Serialize + DeserializeOwned + Clone + Send + Sync> TypedStore<T> {
    pub fn new(backend: Arc<dyn KvStore>, prefix: impl Into<String>) -> Self {
        Self { backend, prefix: prefix.into(), _marker: PhantomData }
    }

    pub async fn get(&self, key: &str) -> anyhow::Result<Option<T>> {
        match self.backend.get(&self.prefix, key).await? {
            Some(v) => Ok(Some(serde_json::from_value(v)?)),
            None => Ok(None),
        }
    }

    pub async fn put(&self, key: &str, value: &T) -> anyhow::Result<()> {
        self.backend.put(&self.prefix, key, serde_json::to_value(value)?).await
    }

    pub async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.backend.delete(&self.prefix, key).await
    }

    /// A deep-copied, point-in-time view of every `(key, value)` under this
    /// store's prefix. Mutating the returned `Vec` never affects the store.
    pub async fn snapshot(&self) -> anyhow::Result<Vec<(String, T)>> {
        let raw = self.backend.list(&self.prefix).await?;
        raw.into_iter()
            .map(|(k, v)| Ok((k, serde_json::from_value(v)?)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Widget {
        name: String,
        count: u32,
    }

    #[tokio::test]
    async fn typed_store_round_trips_through_memory_backend() {
        let backend: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        let store: TypedStore<Widget> = TypedStore::new(backend, "widgets:");

        store.put("a", &Widget { name: "foo".into(), count: 1 }).await.unwrap();
        let got = store.get("a").await.unwrap().unwrap();
        assert_eq!(got, Widget { name: "foo".into(), count: 1 });
    }

    #[tokio::test]
    async fn snapshot_is_a_plain_deep_copy() {
        let backend: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        let store: TypedStore<Widget> = TypedStore::new(backend, "widgets:");
        store.put("a", &Widget { name: "foo".into(), count: 1 }).await.unwrap();

        let mut snap = store.snapshot().await.unwrap();
        snap[0].1.count = 999;

        // Mutating the snapshot must not leak back into the store.
        let still_there = store.get("a").await.unwrap().unwrap();
        assert_eq!(still_there.count, 1);
    }

    #[tokio::test]
    async fn delete_removes_key() {
        let backend: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        let store: TypedStore<Widget> = TypedStore::new(backend, "widgets:");
        store.put("a", &Widget { name: "foo".into(), count: 1 }).await.unwrap();
        store.delete("a").await.unwrap();
        assert!(store.get("a").await.unwrap().is_none());
    }
}
