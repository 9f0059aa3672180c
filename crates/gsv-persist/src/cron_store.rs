// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Dedicated cron job table (§4.9 "Cron job" entity). Kept separate from
//! the generic `kv` table so the scheduler can ask SQLite directly for
//! "every job whose `next_run_at_ms` has passed" instead of deserializing
//! and scanning the whole set on every tick.

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::Mutex;

/// One row of the cron table. `job_json` carries the full `CronJob` the
/// scheduler crate owns; this crate never interprets it, only indexes it.
#[derive(Debug, Clone)]
pub struct CronRow {
    pub id: String,
    pub agent_id: String,
    pub next_run_at_ms: Option<i64>,
    pub job_json: Value,
}

pub struct CronStore {
    conn: Mutex<Connection>,
}

impl CronStore {
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
            "CREATE TABLE IF NOT EXISTS cron_jobs (
                id             TEXT PRIMARY KEY,
                agent_id       TEXT NOT NULL,
                next_run_at_ms INTEGER,
                job_json       TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS cron_jobs_next_run_at_ms ON cron_jobs (next_run_at_ms);",
        )?;
        Ok(())
    }

    pub async fn upsert(&self, row: CronRow) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        let raw = serde_json::to_string(&row.job_json)?;
        conn.execute(
            "INSERT INTO cron_jobs (id, agent_id, next_run_at_ms, job_json)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                agent_id = excluded.agent_id,
                next_run_at_ms = excluded.next_run_at_ms,
                job_json = excluded.job_json",
            params![row.id, row.agent_id, row.next_run_at_ms, raw],
        )?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> anyhow::Result<Option<CronRow>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, agent_id, next_run_at_ms, job_json FROM cron_jobs WHERE id = ?1",
            params![id],
            Self::map_row,
        )
        .optional()
        .map_err(Into::into)
    }

    pub async fn delete(&self, id: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM cron_jobs WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub async fn list_for_agent(&self, agent_id: &str) -> anyhow::Result<Vec<CronRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, agent_id, next_run_at_ms, job_json FROM cron_jobs WHERE agent_id = ?1",
        )?;
        let rows = stmt.query_map(params![agent_id], Self::map_row)?;
        rows.collect::<Result<_, _>>().map_err(Into::into)
    }

    /// Every job whose `next_run_at_ms` is due at or before `now_ms`, the
    /// single query the alarm orchestrator (§5) uses to decide what fires.
    pub async fn due_before(&self, now_ms: i64) -> anyhow::Result<Vec<CronRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, agent_id, next_run_at_ms, job_json FROM cron_jobs
             WHERE next_run_at_ms IS NOT NULL AND next_run_at_ms <= ?1",
        )?;
        let rows = stmt.query_map(params![now_ms], Self::map_row)?;
        rows.collect::<Result<_, _>>().map_err(Into::into)
    }

    /// The smallest `next_run_at_ms` across every enabled job, i.e. the next
    /// instant the single alarm timer must wake for (§5 "single timer reset
    /// to min(participant.nextDueMs)").
    pub async fn next_due_at(&self) -> anyhow::Result<Option<i64>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT MIN(next_run_at_ms) FROM cron_jobs WHERE next_run_at_ms IS NOT NULL",
            [],
            |row| row.get(0),
        )
        .map_err(Into::into)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CronRow> {
        let raw: String = row.get(3)?;
        let job_json: Value = serde_json::from_str(&raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;
        Ok(CronRow {
            id: row.get(0)?,
            agent_id: row.get(1)?,
            next_run_at_ms: row.get(2)?,
            job_json,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, agent: &str, due: Option<i64>) -> CronRow {
        CronRow { id: id.into(), agent_id: agent.into(), next_run_at_ms: due, job_json: serde_json::json!({"name": id}) }
    }

    #[tokio::test]
    async fn upsert_then_get_round_trips() {
        let store = CronStore::open_in_memory().unwrap();
        store.upsert(row("j1", "agent-a", Some(1000))).await.unwrap();
        let got = store.get("j1").await.unwrap().unwrap();
        assert_eq!(got.agent_id, "agent-a");
        assert_eq!(got.next_run_at_ms, Some(1000));
    }

    #[tokio::test]
    async fn upsert_replaces_existing_row() {
        let store = CronStore::open_in_memory().unwrap();
        store.upsert(row("j1", "agent-a", Some(1000))).await.unwrap();
        store.upsert(row("j1", "agent-a", Some(2000))).await.unwrap();
        let got = store.get("j1").await.unwrap().unwrap();
        assert_eq!(got.next_run_at_ms, Some(2000));
    }

    #[tokio::test]
    async fn due_before_only_returns_past_due_jobs() {
        let store = CronStore::open_in_memory().unwrap();
        store.upsert(row("past", "a", Some(100))).await.unwrap();
        store.upsert(row("future", "a", Some(10_000))).await.unwrap();
        store.upsert(row("disabled", "a", None)).await.unwrap();

        let due = store.due_before(500).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, "past");
    }

    #[tokio::test]
    async fn next_due_at_picks_the_minimum() {
        let store = CronStore::open_in_memory().unwrap();
        store.upsert(row("a", "agent", Some(5000))).await.unwrap();
        store.upsert(row("b", "agent", Some(1000))).await.unwrap();
        assert_eq!(store.next_due_at().await.unwrap(), Some(1000));
    }

    #[tokio::test]
    async fn list_for_agent_filters_by_owner() {
        let store = CronStore::open_in_memory().unwrap();
        store.upsert(row("a", "agent-1", Some(1))).await.unwrap();
        store.upsert(row("b", "agent-2", Some(1))).await.unwrap();
        let jobs = store.list_for_agent("agent-1").await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, "a");
    }

    #[tokio::test]
    async fn delete_removes_the_job() {
        let store = CronStore::open_in_memory().unwrap();
        store.upsert(row("a", "agent", Some(1))).await.unwrap();
        store.delete("a").await.unwrap();
        assert!(store.get("a").await.unwrap().is_none());
    }
}
