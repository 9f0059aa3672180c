// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The single alarm orchestrator (§4.10, invariant P8).
//!
//! Every scheduled-work source (heartbeat, cron, pending-op TTLs, transfer
//! GC, probe retries, ...) implements [`AlarmParticipant`]; the
//! orchestrator holds no participant state itself; it only asks each one
//! for its next due instant, sleeps until the earliest, and runs every
//! participant whose deadline has passed.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::time::{Duration, Instant};

#[async_trait]
pub trait AlarmParticipant: Send + Sync {
    /// Milliseconds since the epoch this participant next needs to run, or
    /// `None` if it currently has no scheduled work.
    async fn next_due_ms(&self) -> anyhow::Result<Option<i64>>;
    /// Runs whatever work is due as of `now_ms`. Implementations recompute
    /// their own `next_due_ms` internally as a side effect.
    async fn run(&self, now_ms: i64) -> anyhow::Result<()>;
    fn name(&self) -> &str;
}

pub struct AlarmOrchestrator {
    participants: Vec<Arc<dyn AlarmParticipant>>,
}

impl AlarmOrchestrator {
    pub fn new(participants: Vec<Arc<dyn AlarmParticipant>>) -> Self {
        Self { participants }
    }

    /// `min(participant.nextDueMs)` across every participant, or `None`
    /// when nothing has pending work — the alarm should be cleared.
    pub async fn next_wakeup_ms(&self) -> anyhow::Result<Option<i64>> {
        let mut min: Option<i64> = None;
        for p in &self.participants {
            if let Some(due) = p.next_due_ms().await? {
                min = Some(min.map_or(due, |m: i64| m.min(due)));
            }
        }
        Ok(min)
    }

    /// Runs every participant whose `next_due_ms()` is `<= now_ms`.
    pub async fn fire_due(&self, now_ms: i64) -> anyhow::Result<()> {
        for p in &self.participants {
            if let Some(due) = p.next_due_ms().await? {
                if due <= now_ms {
                    if let Err(e) = p.run(now_ms).await {
                        tracing::warn!(participant = p.name(), error = %e, "alarm participant run failed");
                    }
                }
            }
        }
        Ok(())
    }

    /// Runs the orchestrator loop forever: sleep until the earliest
    /// participant deadline (or indefinitely if none has work), fire due
    /// participants, recompute, repeat. Intended to run as its own task.
    pub async fn run_forever(&self, now_ms: impl Fn() -> i64 + Send + Sync) -> anyhow::Result<()> {
        loop {
            let now = now_ms();
            self.fire_due(now).await?;
            match self.next_wakeup_ms().await? {
                Some(next) => {
                    let delay_ms = (next - now_ms()).max(0) as u64;
                    tokio::time::sleep_until(Instant::now() + Duration::from_millis(delay_ms)).await;
                }
                None => {
                    // No participant has work; park until something registers
                    // new work and wakes this task via an external signal.
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

    struct FakeParticipant {
        name: String,
        due: AtomicI64,
        runs: AtomicU32,
    }

    #[async_trait]
    impl AlarmParticipant for FakeParticipant {
        async fn next_due_ms(&self) -> anyhow::Result<Option<i64>> {
            let due = self.due.load(Ordering::SeqCst);
            Ok((due >= 0).then_some(due))
        }

        async fn run(&self, _now_ms: i64) -> anyhow::Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.due.store(-1, Ordering::SeqCst);
            Ok(())
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    #[tokio::test]
    async fn next_wakeup_is_the_minimum_across_participants() {
        let a = Arc::new(FakeParticipant { name: "a".into(), due: AtomicI64::new(5000), runs: AtomicU32::new(0) });
        let b = Arc::new(FakeParticipant { name: "b".into(), due: AtomicI64::new(1000), runs: AtomicU32::new(0) });
        let orchestrator = AlarmOrchestrator::new(vec![a, b]);
        assert_eq!(orchestrator.next_wakeup_ms().await.unwrap(), Some(1000));
    }

    #[tokio::test]
    async fn next_wakeup_is_none_when_nothing_is_scheduled() {
        let orchestrator = AlarmOrchestrator::new(vec![]);
        assert_eq!(orchestrator.next_wakeup_ms().await.unwrap(), None);
    }

    #[tokio::test]
    async fn fire_due_only_runs_participants_past_their_deadline() {
        let a = Arc::new(FakeParticipant { name: "a".into(), due: AtomicI64::new(5000), runs: AtomicU32::new(0) });
        let b = Arc::new(FakeParticipant { name: "b".into(), due: AtomicI64::new(1000), runs: AtomicU32::new(0) });
        let orchestrator = AlarmOrchestrator::new(vec![a.clone(), b.clone()]);
        orchestrator.fire_due(2000).await.unwrap();
        assert_eq!(a.runs.load(Ordering::SeqCst), 0);
        assert_eq!(b.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn frontier_retracts_after_a_participant_is_cancelled() {
        // Mirrors spec scenario 6: cancel one participant, alarm recomputes.
        let a = Arc::new(FakeParticipant { name: "a".into(), due: AtomicI64::new(5000), runs: AtomicU32::new(0) });
        let b = Arc::new(FakeParticipant { name: "b".into(), due: AtomicI64::new(2000), runs: AtomicU32::new(0) });
        let c = Arc::new(FakeParticipant { name: "c".into(), due: AtomicI64::new(3000), runs: AtomicU32::new(0) });
        let orchestrator = AlarmOrchestrator::new(vec![a.clone(), b.clone(), c.clone()]);
        assert_eq!(orchestrator.next_wakeup_ms().await.unwrap(), Some(2000));

        b.due.store(-1, Ordering::SeqCst); // "cancel" participant b
        assert_eq!(orchestrator.next_wakeup_ms().await.unwrap(), Some(3000));
    }
}
