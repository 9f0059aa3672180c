// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Async-exec completion pipeline (spec §4.7): exactly-once delivery of a
//! remote process's terminal event to whatever session is waiting on it,
//! surviving node reconnects and gateway restarts via durable dedup +
//! retry state.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;

const PENDING_SESSION_TTL_MS: i64 = 24 * 60 * 60 * 1000;
const DELIVERED_DEDUP_TTL_MS: i64 = 24 * 60 * 60 * 1000;
const OUTPUT_TAIL_MAX_BYTES: usize = 4 * 1024;
const MAX_BACKOFF_MS: i64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecEventKind {
    Started,
    Finished,
    Failed,
    TimedOut,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeExecEvent {
    pub node_id: String,
    pub session_id: String,
    pub event: ExecEventKind,
    pub call_id: String,
    pub event_id: Option<String>,
    pub started_at_ms: Option<i64>,
    pub ended_at_ms: Option<i64>,
    pub exit_code: Option<i32>,
    pub signal: Option<String>,
    pub output_tail: Option<String>,
}

fn compute_event_id(event: &NodeExecEvent) -> String {
    if let Some(id) = &event.event_id {
        return id.clone();
    }
    let mut hasher = Sha256::new();
    hasher.update(event.node_id.as_bytes());
    hasher.update(event.session_id.as_bytes());
    hasher.update(format!("{:?}", event.event).as_bytes());
    hasher.update(event.call_id.as_bytes());
    hasher.update(event.started_at_ms.unwrap_or(0).to_le_bytes());
    hasher.update(event.ended_at_ms.unwrap_or(0).to_le_bytes());
    hasher.update(event.exit_code.unwrap_or(0).to_le_bytes());
    hasher.update(event.signal.as_deref().unwrap_or("").as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone)]
struct PendingSession {
    session_key: String,
    call_id: String,
    expires_at_ms: i64,
}

#[derive(Debug, Clone)]
pub struct DeliveryEnvelope {
    pub event_id: String,
    pub session_key: String,
    pub call_id: String,
    pub event: NodeExecEvent,
    pub attempts: u32,
    pub next_attempt_at_ms: i64,
    pub expires_at_ms: i64,
    pub last_error: Option<String>,
}

pub enum RegisterOutcome {
    AckDrop,
    Touched,
    Queued(DeliveryEnvelope),
    DroppedNoPendingSession,
}

#[derive(Default)]
pub struct AsyncExecPipeline {
    pending_sessions: Mutex<HashMap<(String, String), PendingSession>>,
    delivered: Mutex<HashMap<String, i64>>,
    queue: Mutex<HashMap<String, DeliveryEnvelope>>,
}

impl AsyncExecPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_running(&self, node_id: &str, session_id: &str, session_key: &str, call_id: &str, now_ms: i64) {
        self.pending_sessions.lock().unwrap().insert(
            (node_id.to_string(), session_id.to_string()),
            PendingSession { session_key: session_key.to_string(), call_id: call_id.to_string(), expires_at_ms: now_ms + PENDING_SESSION_TTL_MS },
        );
    }

    pub fn on_event(&self, event: NodeExecEvent, now_ms: i64) -> RegisterOutcome {
        let event_id = compute_event_id(&event);

        if self.delivered.lock().unwrap().contains_key(&event_id) {
            return RegisterOutcome::AckDrop;
        }
        if self.queue.lock().unwrap().contains_key(&event_id) {
            return RegisterOutcome::AckDrop;
        }

        if event.event == ExecEventKind::Started {
            let mut sessions = self.pending_sessions.lock().unwrap();
            if let Some(entry) = sessions.get_mut(&(event.node_id.clone(), event.session_id.clone())) {
                entry.expires_at_ms = now_ms + PENDING_SESSION_TTL_MS;
                return RegisterOutcome::Touched;
            }
            return RegisterOutcome::DroppedNoPendingSession;
        }

        let pending = self.pending_sessions.lock().unwrap().remove(&(event.node_id.clone(), event.session_id.clone()));
        let Some(pending) = pending else {
            return RegisterOutcome::DroppedNoPendingSession;
        };

        let mut event = event;
        if let Some(tail) = &event.output_tail {
            if tail.len() > OUTPUT_TAIL_MAX_BYTES {
                let start = tail.len() - OUTPUT_TAIL_MAX_BYTES;
                event.output_tail = Some(tail[start..].to_string());
            }
        }

        let envelope = DeliveryEnvelope {
            event_id: event_id.clone(),
            session_key: pending.session_key,
            call_id: pending.call_id,
            event,
            attempts: 0,
            next_attempt_at_ms: now_ms,
            expires_at_ms: now_ms + DELIVERED_DEDUP_TTL_MS,
            last_error: None,
        };
        self.queue.lock().unwrap().insert(event_id, envelope.clone());
        RegisterOutcome::Queued(envelope)
    }

    pub fn due_envelopes(&self, now_ms: i64) -> Vec<DeliveryEnvelope> {
        self.queue.lock().unwrap().values().filter(|e| e.next_attempt_at_ms <= now_ms).cloned().collect()
    }

    pub fn mark_delivered(&self, event_id: &str, now_ms: i64) {
        self.queue.lock().unwrap().remove(event_id);
        self.delivered.lock().unwrap().insert(event_id.to_string(), now_ms + DELIVERED_DEDUP_TTL_MS);
    }

    pub fn mark_failed(&self, event_id: &str, error: String, now_ms: i64) {
        let mut queue = self.queue.lock().unwrap();
        if let Some(envelope) = queue.get_mut(event_id) {
            envelope.attempts += 1;
            let backoff_ms = (1_000i64.saturating_mul(1i64 << (envelope.attempts.saturating_sub(1)).min(16))).min(MAX_BACKOFF_MS);
            envelope.next_attempt_at_ms = now_ms + backoff_ms;
            envelope.last_error = Some(error);
        }
    }

    /// Sweeps envelopes whose `expiresAt` has passed and delivered-dedup
    /// entries past their TTL. Returns the discarded envelopes for logging.
    pub fn sweep_expired(&self, now_ms: i64) -> Vec<DeliveryEnvelope> {
        let mut queue = self.queue.lock().unwrap();
        let expired_ids: Vec<String> = queue.values().filter(|e| e.expires_at_ms <= now_ms).map(|e| e.event_id.clone()).collect();
        let expired: Vec<DeliveryEnvelope> = expired_ids.iter().filter_map(|id| queue.remove(id)).collect();
        drop(queue);

        let mut delivered = self.delivered.lock().unwrap();
        delivered.retain(|_, expires_at| *expires_at > now_ms);
        let mut sessions = self.pending_sessions.lock().unwrap();
        sessions.retain(|_, s| s.expires_at_ms > now_ms);

        expired
    }

    pub fn earliest_deadline_ms(&self) -> Option<i64> {
        let queue_min = self.queue.lock().unwrap().values().map(|e| e.next_attempt_at_ms).min();
        let session_min = self.pending_sessions.lock().unwrap().values().map(|s| s.expires_at_ms).min();
        [queue_min, session_min].into_iter().flatten().min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: ExecEventKind, node: &str, session: &str) -> NodeExecEvent {
        NodeExecEvent {
            node_id: node.into(),
            session_id: session.into(),
            event: kind,
            call_id: "call-1".into(),
            event_id: None,
            started_at_ms: Some(0),
            ended_at_ms: Some(1),
            exit_code: Some(0),
            signal: None,
            output_tail: None,
        }
    }

    #[test]
    fn terminal_event_without_a_pending_session_is_dropped() {
        let pipeline = AsyncExecPipeline::new();
        let outcome = pipeline.on_event(event(ExecEventKind::Finished, "n1", "s1"), 0);
        assert!(matches!(outcome, RegisterOutcome::DroppedNoPendingSession));
    }

    #[test]
    fn terminal_event_after_register_is_queued_exactly_once() {
        let pipeline = AsyncExecPipeline::new();
        pipeline.register_running("n1", "s1", "agent:a", "call-1", 0);

        let outcome = pipeline.on_event(event(ExecEventKind::Finished, "n1", "s1"), 10);
        let envelope = match outcome {
            RegisterOutcome::Queued(e) => e,
            _ => panic!("expected queued"),
        };
        pipeline.mark_delivered(&envelope.event_id, 20);

        // A duplicate delivery of the identical event is deduped even after
        // the pending-session entry is long gone.
        let dup = pipeline.on_event(event(ExecEventKind::Finished, "n1", "s1"), 30);
        assert!(matches!(dup, RegisterOutcome::AckDrop));
    }

    #[test]
    fn started_event_refreshes_ttl_without_draining_the_pending_session() {
        let pipeline = AsyncExecPipeline::new();
        pipeline.register_running("n1", "s1", "agent:a", "call-1", 0);
        let outcome = pipeline.on_event(event(ExecEventKind::Started, "n1", "s1"), 10);
        assert!(matches!(outcome, RegisterOutcome::Touched));

        // The pending session must still be there for the terminal event.
        let outcome = pipeline.on_event(event(ExecEventKind::Finished, "n1", "s1"), 20);
        assert!(matches!(outcome, RegisterOutcome::Queued(_)));
    }

    #[test]
    fn failed_delivery_backs_off_exponentially_capped_at_sixty_seconds() {
        let pipeline = AsyncExecPipeline::new();
        pipeline.register_running("n1", "s1", "agent:a", "call-1", 0);
        let envelope = match pipeline.on_event(event(ExecEventKind::Finished, "n1", "s1"), 0) {
            RegisterOutcome::Queued(e) => e,
            _ => panic!(),
        };
        pipeline.mark_failed(&envelope.event_id, "downstream unavailable".into(), 0);
        pipeline.mark_failed(&envelope.event_id, "downstream unavailable".into(), 1_000);
        pipeline.mark_failed(&envelope.event_id, "downstream unavailable".into(), 3_000);

        let due = pipeline.due_envelopes(1_000_000);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].attempts, 3);
        assert!(due[0].next_attempt_at_ms - 3_000 <= MAX_BACKOFF_MS);
    }

    #[test]
    fn output_tail_is_truncated_to_last_four_kilobytes() {
        let pipeline = AsyncExecPipeline::new();
        pipeline.register_running("n1", "s1", "agent:a", "call-1", 0);
        let mut ev = event(ExecEventKind::Finished, "n1", "s1");
        ev.output_tail = Some("x".repeat(OUTPUT_TAIL_MAX_BYTES + 100));
        let envelope = match pipeline.on_event(ev, 0) {
            RegisterOutcome::Queued(e) => e,
            _ => panic!(),
        };
        assert_eq!(envelope.event.output_tail.unwrap().len(), OUTPUT_TAIL_MAX_BYTES);
    }
}
