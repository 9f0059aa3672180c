// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Cron job storage and `nextRunAtMs` computation (§4.9).
//!
//! `CronSchedule`/`CronSpec` are tagged unions per the REDESIGN FLAGS
//! guidance: never a nullable-flag struct standing in for a variant.

use chrono::{TimeZone, Utc};
use chrono_tz::Tz;
use gsv_persist::{CronRow, CronStore};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CronSchedule {
    At { at_ms: i64 },
    Every { every_ms: i64, #[serde(default)] anchor_ms: Option<i64> },
    Cron { expr: String, #[serde(default)] tz: Option<String> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum CronSpec {
    SystemEvent { text: String },
    Task {
        message: String,
        #[serde(default)] model: Option<String>,
        #[serde(default)] thinking: Option<String>,
        #[serde(default)] timeout_seconds: Option<u32>,
        #[serde(default)] deliver: Option<bool>,
        #[serde(default)] channel: Option<String>,
        #[serde(default)] to: Option<String>,
        #[serde(default)] best_effort_deliver: Option<bool>,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronState {
    #[serde(default)] pub next_run_at_ms: Option<i64>,
    #[serde(default)] pub running_at_ms: Option<i64>,
    #[serde(default)] pub last_run_at_ms: Option<i64>,
    #[serde(default)] pub last_status: Option<String>,
    #[serde(default)] pub last_error: Option<String>,
    #[serde(default)] pub last_duration_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronJob {
    pub id: String,
    pub agent_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub enabled: bool,
    #[serde(default)]
    pub delete_after_run: Option<bool>,
    pub schedule: CronSchedule,
    pub spec: CronSpec,
    #[serde(default)]
    pub state: CronState,
}

impl CronJob {
    /// The session to run this job's message in: the agent's main session
    /// for `systemEvent`, an isolated `agent:{agentId}:cron:{jobId}` session
    /// for `task` (§4.9).
    pub fn target_session_key(&self) -> String {
        match &self.spec {
            CronSpec::SystemEvent { .. } => format!("agent:{}", self.agent_id),
            CronSpec::Task { .. } => format!("agent:{}:cron:{}", self.agent_id, self.id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Due,
    Force,
}

/// Computes the next run instant after `after_ms`, in milliseconds since
/// the epoch, or `None` for a one-shot `at` schedule that has already fired.
pub fn compute_next_run_at_ms(schedule: &CronSchedule, after_ms: i64) -> Option<i64> {
    match schedule {
        CronSchedule::At { at_ms } => (*at_ms > after_ms).then_some(*at_ms),
        CronSchedule::Every { every_ms, anchor_ms } => {
            let anchor = anchor_ms.unwrap_or(0);
            if *every_ms <= 0 {
                return None;
            }
            let elapsed = (after_ms - anchor).max(0);
            let ticks_passed = elapsed / every_ms + 1;
            Some(anchor + ticks_passed * every_ms)
        }
        CronSchedule::Cron { expr, tz } => {
            let schedule = cron::Schedule::from_str(expr).ok()?;
            let zone: Tz = tz.as_deref().unwrap_or("UTC").parse().unwrap_or(chrono_tz::UTC);
            let after = zone.timestamp_millis_opt(after_ms).single()?;
            let next = schedule.after(&after).next()?;
            Some(next.with_timezone(&Utc).timestamp_millis())
        }
    }
}

pub struct CronScheduler {
    store: Arc<CronStore>,
}

impl CronScheduler {
    pub fn new(store: Arc<CronStore>) -> Self {
        Self { store }
    }

    pub async fn add(&self, mut job: CronJob, now_ms: i64) -> anyhow::Result<CronJob> {
        job.state.next_run_at_ms = compute_next_run_at_ms(&job.schedule, now_ms);
        self.persist(&job).await?;
        Ok(job)
    }

    pub async fn update(&self, job: CronJob) -> anyhow::Result<()> {
        self.persist(&job).await
    }

    pub async fn remove(&self, id: &str) -> anyhow::Result<()> {
        self.store.delete(id).await
    }

    pub async fn get(&self, id: &str) -> anyhow::Result<Option<CronJob>> {
        let row = self.store.get(id).await?;
        row.map(|r| serde_json::from_value(r.job_json)).transpose().map_err(Into::into)
    }

    pub async fn list(&self, agent_id: &str) -> anyhow::Result<Vec<CronJob>> {
        let rows = self.store.list_for_agent(agent_id).await?;
        rows.into_iter().map(|r| serde_json::from_value(r.job_json).map_err(Into::into)).collect()
    }

    /// Jobs due to run right now; also returns every enabled job when
    /// `mode == RunMode::Force`.
    pub async fn due(&self, now_ms: i64, mode: RunMode) -> anyhow::Result<Vec<CronJob>> {
        match mode {
            RunMode::Due => {
                let rows = self.store.due_before(now_ms).await?;
                let jobs: Vec<CronJob> = rows
                    .into_iter()
                    .map(|r| serde_json::from_value::<CronJob>(r.job_json))
                    .collect::<Result<_, _>>()?;
                Ok(jobs.into_iter().filter(|j| j.enabled).collect())
            }
            RunMode::Force => {
                // Caller already resolved the specific job id for a forced run.
                Ok(Vec::new())
            }
        }
    }

    /// Records a completed run and recomputes `nextRunAtMs`, deleting the
    /// job outright when `deleteAfterRun` is set and it just fired.
    pub async fn record_completion(
        &self,
        mut job: CronJob,
        now_ms: i64,
        status: &str,
        error: Option<String>,
        duration_ms: i64,
    ) -> anyhow::Result<()> {
        job.state.running_at_ms = None;
        job.state.last_run_at_ms = Some(now_ms);
        job.state.last_status = Some(status.to_string());
        job.state.last_error = error;
        job.state.last_duration_ms = Some(duration_ms);

        if job.delete_after_run.unwrap_or(false) {
            return self.store.delete(&job.id).await;
        }

        job.state.next_run_at_ms = compute_next_run_at_ms(&job.schedule, now_ms);
        self.persist(&job).await
    }

    pub async fn next_due_at(&self) -> anyhow::Result<Option<i64>> {
        self.store.next_due_at().await
    }

    async fn persist(&self, job: &CronJob) -> anyhow::Result<()> {
        self.store.upsert(CronRow {
            id: job.id.clone(),
            agent_id: job.agent_id.clone(),
            next_run_at_ms: job.state.next_run_at_ms,
            job_json: serde_json::to_value(job)?,
        }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: &str, schedule: CronSchedule) -> CronJob {
        CronJob {
            id: id.into(),
            agent_id: "main".into(),
            name: "test".into(),
            description: None,
            enabled: true,
            delete_after_run: None,
            schedule,
            spec: CronSpec::SystemEvent { text: "ping".into() },
            state: CronState::default(),
        }
    }

    #[test]
    fn at_schedule_fires_once_then_has_no_next_run() {
        assert_eq!(compute_next_run_at_ms(&CronSchedule::At { at_ms: 1000 }, 0), Some(1000));
        assert_eq!(compute_next_run_at_ms(&CronSchedule::At { at_ms: 1000 }, 1000), None);
    }

    #[test]
    fn every_schedule_advances_by_one_interval_past_anchor() {
        let sched = CronSchedule::Every { every_ms: 1000, anchor_ms: Some(0) };
        assert_eq!(compute_next_run_at_ms(&sched, 0), Some(1000));
        assert_eq!(compute_next_run_at_ms(&sched, 1500), Some(2000));
    }

    #[test]
    fn cron_expression_resolves_the_next_tick() {
        // Every minute at second 0.
        let sched = CronSchedule::Cron { expr: "0 * * * * *".into(), tz: Some("UTC".into()) };
        let now_ms = Utc::now().timestamp_millis();
        let next = compute_next_run_at_ms(&sched, now_ms).unwrap();
        assert!(next > now_ms);
    }

    #[tokio::test]
    async fn add_then_get_round_trips_and_computes_next_run() {
        let store = Arc::new(CronStore::open_in_memory().unwrap());
        let scheduler = CronScheduler::new(store);
        let added = scheduler.add(job("j1", CronSchedule::At { at_ms: 5000 }), 0).await.unwrap();
        assert_eq!(added.state.next_run_at_ms, Some(5000));

        let got = scheduler.get("j1").await.unwrap().unwrap();
        assert_eq!(got.id, "j1");
    }

    #[tokio::test]
    async fn delete_after_run_removes_the_job_on_completion() {
        let store = Arc::new(CronStore::open_in_memory().unwrap());
        let scheduler = CronScheduler::new(store);
        let mut j = job("j1", CronSchedule::At { at_ms: 1000 });
        j.delete_after_run = Some(true);
        scheduler.add(j.clone(), 0).await.unwrap();

        scheduler.record_completion(j, 1000, "ok", None, 5).await.unwrap();
        assert!(scheduler.get("j1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn task_spec_gets_an_isolated_session_key() {
        let j = CronJob {
            spec: CronSpec::Task {
                message: "do the thing".into(),
                model: None, thinking: None, timeout_seconds: None,
                deliver: None, channel: None, to: None, best_effort_deliver: None,
            },
            ..job("j1", CronSchedule::At { at_ms: 0 })
        };
        assert_eq!(j.target_session_key(), "agent:main:cron:j1");
    }
}
