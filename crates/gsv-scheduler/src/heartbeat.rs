// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Per-agent heartbeat scheduler (§4.9 "Heartbeats").

use std::collections::HashMap;
use std::sync::Mutex;

const HEARTBEAT_OK: &str = "HEARTBEAT_OK";
const MIN_DELIVERABLE_LEN: usize = 300;
const DEDUP_WINDOW_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    Deliver(String),
    Suppressed,
}

/// Tracks, per agent, the text and timestamp of the last delivered
/// heartbeat so identical responses within 24h are suppressed.
#[derive(Default)]
pub struct HeartbeatScheduler {
    last_delivered: Mutex<HashMap<String, (String, i64)>>,
}

impl HeartbeatScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies the `HEARTBEAT_OK` strip rule, the short-response rule, and
    /// the 24h identical-text dedup rule, in that order, and — if the
    /// response should be delivered — records it for future dedup checks.
    pub fn evaluate(&self, agent_id: &str, raw_response: &str, now_ms: i64) -> HeartbeatOutcome {
        let trimmed = raw_response.trim();
        let stripped = if trimmed.starts_with(HEARTBEAT_OK) {
            trimmed[HEARTBEAT_OK.len()..].trim_start()
        } else if trimmed.ends_with(HEARTBEAT_OK) {
            trimmed[..trimmed.len() - HEARTBEAT_OK.len()].trim_end()
        } else {
            trimmed
        };

        if stripped.is_empty() || stripped.len() <= MIN_DELIVERABLE_LEN {
            return HeartbeatOutcome::Suppressed;
        }

        {
            let mut last = self.last_delivered.lock().unwrap();
            if let Some((last_text, last_at)) = last.get(agent_id) {
                if last_text == stripped && now_ms - last_at < DEDUP_WINDOW_MS {
                    return HeartbeatOutcome::Suppressed;
                }
            }
            last.insert(agent_id.to_string(), (stripped.to_string(), now_ms));
        }

        HeartbeatOutcome::Deliver(stripped.to_string())
    }

    /// The per-agent internal session used to run the heartbeat prompt
    /// (§4.9: `agent:{agentId}:heartbeat:system:internal`).
    pub fn internal_session_key(agent_id: &str) -> String {
        format!("agent:{agent_id}:heartbeat:system:internal")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_leading_heartbeat_ok_token() {
        let hb = HeartbeatScheduler::new();
        let long_text = "x".repeat(350);
        let response = format!("{HEARTBEAT_OK} {long_text}");
        match hb.evaluate("agent-1", &response, 0) {
            HeartbeatOutcome::Deliver(text) => assert_eq!(text, long_text),
            _ => panic!("expected delivery"),
        }
    }

    #[test]
    fn short_remaining_text_is_suppressed() {
        let hb = HeartbeatScheduler::new();
        assert_eq!(hb.evaluate("agent-1", "HEARTBEAT_OK all good", 0), HeartbeatOutcome::Suppressed);
    }

    #[test]
    fn empty_remaining_text_is_suppressed() {
        let hb = HeartbeatScheduler::new();
        assert_eq!(hb.evaluate("agent-1", "HEARTBEAT_OK", 0), HeartbeatOutcome::Suppressed);
    }

    #[test]
    fn identical_text_within_24h_is_suppressed_on_second_delivery() {
        let hb = HeartbeatScheduler::new();
        let long_text = "y".repeat(400);
        hb.evaluate("agent-1", &long_text, 0);
        let outcome = hb.evaluate("agent-1", &long_text, 1000);
        assert_eq!(outcome, HeartbeatOutcome::Suppressed);
    }

    #[test]
    fn identical_text_after_24h_is_delivered_again() {
        let hb = HeartbeatScheduler::new();
        let long_text = "z".repeat(400);
        hb.evaluate("agent-1", &long_text, 0);
        let outcome = hb.evaluate("agent-1", &long_text, DEDUP_WINDOW_MS + 1);
        assert_eq!(outcome, HeartbeatOutcome::Deliver(long_text));
    }

    #[test]
    fn distinct_agents_do_not_share_dedup_state() {
        let hb = HeartbeatScheduler::new();
        let long_text = "w".repeat(400);
        hb.evaluate("agent-1", &long_text, 0);
        let outcome = hb.evaluate("agent-2", &long_text, 10);
        assert_eq!(outcome, HeartbeatOutcome::Deliver(long_text));
    }
}
