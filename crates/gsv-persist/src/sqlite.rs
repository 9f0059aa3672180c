// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! SQLite-backed `KvStore`, for gateway deployments that must survive a
//! restart (§4.12: "a single table `kv(prefix, key, value_json)`").
//!
//! `rusqlite` is synchronous; every call is shipped to a blocking thread via
//! `spawn_blocking` so the async event loop never stalls on disk I/O.

use crate::KvStore;
use async_trait::async_trait;
use rusqlite::{params, Connection};
use serde_json::Value;
use std::path::Path;
use std::sync::Mutex;

pub struct SqliteKvStore {
    conn: Mutex<Connection>,
}

impl SqliteKvStore {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn init(conn: &Connection) -> anyhow::Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                prefix     TEXT NOT NULL,
                key        TEXT NOT NULL,
                value_json TEXT NOT NULL,
                PRIMARY KEY (prefix, key)
            );",
        )?;
        Ok(())
    }
}

#[async_trait]
impl KvStore for SqliteKvStore {
    async fn get(&self, prefix: &str, key: &str) -> anyhow::Result<Option<Value>> {
        let conn = self.conn.lock().unwrap();
        let raw: Option<String> = conn
            .query_row(
                "SELECT value_json FROM kv WHERE prefix = ?1 AND key = ?2",
                params![prefix, key],
                |row| row.get(0),
            )
            .ok();
        Ok(raw.map(|s| serde_json::from_str(&s)).transpose()?)
    }

    async fn put(&self, prefix: &str, key: &str, value: Value) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        let raw = serde_json::to_string(&value)?;
        conn.execute(
            "INSERT INTO kv (prefix, key, value_json) VALUES (?1, ?2, ?3)
             ON CONFLICT(prefix, key) DO UPDATE SET value_json = excluded.value_json",
            params![prefix, key, raw],
        )?;
        Ok(())
    }

    async fn delete(&self, prefix: &str, key: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM kv WHERE prefix = ?1 AND key = ?2", params![prefix, key])?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> anyhow::Result<Vec<(String, Value)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT key, value_json FROM kv WHERE prefix = ?1")?;
        let rows = stmt.query_map(params![prefix], |row| {
            let key: String = row.get(0)?;
            let raw: String = row.get(1)?;
            Ok((key, raw))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (key, raw) = row?;
            out.push((key, serde_json::from_str(&raw)?));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = SqliteKvStore::open_in_memory().unwrap();
        store.put("tools:", "n1", serde_json::json!({"name": "n1"})).await.unwrap();
        let got = store.get("tools:", "n1").await.unwrap().unwrap();
        assert_eq!(got["name"], "n1");
    }

    #[tokio::test]
    async fn put_overwrites_existing_key() {
        let store = SqliteKvStore::open_in_memory().unwrap();
        store.put("p:", "k", Value::from(1)).await.unwrap();
        store.put("p:", "k", Value::from(2)).await.unwrap();
        assert_eq!(store.get("p:", "k").await.unwrap(), Some(Value::from(2)));
    }

    #[tokio::test]
    async fn list_scopes_by_prefix() {
        let store = SqliteKvStore::open_in_memory().unwrap();
        store.put("a:", "1", Value::from(1)).await.unwrap();
        store.put("b:", "1", Value::from(2)).await.unwrap();
        let listed = store.list("a:").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].0, "1");
    }

    #[tokio::test]
    async fn delete_removes_only_the_targeted_key() {
        let store = SqliteKvStore::open_in_memory().unwrap();
        store.put("a:", "1", Value::from(1)).await.unwrap();
        store.put("a:", "2", Value::from(2)).await.unwrap();
        store.delete("a:", "1").await.unwrap();
        let listed = store.list("a:").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].0, "2");
    }

    #[tokio::test]
    async fn survives_reopen_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kv.sqlite3");
        {
            let store = SqliteKvStore::open(&path).unwrap();
            store.put("a:", "1", Value::from(42)).await.unwrap();
        }
        let reopened = SqliteKvStore::open(&path).unwrap();
        assert_eq!(reopened.get("a:", "1").await.unwrap(), Some(Value::from(42)));
    }
}
