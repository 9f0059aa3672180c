// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! In-process backing store. Used for tests and for any deployment that
//! accepts losing gateway state on restart (spec §4.12 "Required primitives").

use crate::KvStore;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct InMemoryKvStore {
    // Outer key is the namespace prefix, inner key is the caller's key.
    data: Mutex<HashMap<String, HashMap<String, Value>>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, prefix: &str, key: &str) -> anyhow::Result<Option<Value>> {
        let data = self.data.lock().unwrap();
        Ok(data.get(prefix).and_then(|m| m.get(key)).cloned())
    }

    async fn put(&self, prefix: &str, key: &str, value: Value) -> anyhow::Result<()> {
        let mut data = self.data.lock().unwrap();
        data.entry(prefix.to_string()).or_default().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, prefix: &str, key: &str) -> anyhow::Result<()> {
        let mut data = self.data.lock().unwrap();
        if let Some(m) = data.get_mut(prefix) {
            m.remove(key);
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> anyhow::Result<Vec<(String, Value)>> {
        let data = self.data.lock().unwrap();
        Ok(data
            .get(prefix)
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn separate_prefixes_do_not_collide() {
        let store = InMemoryKvStore::new();
        store.put("a:", "k", Value::from(1)).await.unwrap();
        store.put("b:", "k", Value::from(2)).await.unwrap();
        assert_eq!(store.get("a:", "k").await.unwrap(), Some(Value::from(1)));
        assert_eq!(store.get("b:", "k").await.unwrap(), Some(Value::from(2)));
    }

    #[tokio::test]
    async fn list_returns_empty_for_unknown_prefix() {
        let store = InMemoryKvStore::new();
        assert!(store.list("nope:").await.unwrap().is_empty());
    }
}
