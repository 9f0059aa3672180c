// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! An in-process reference `SessionBridge`, used by the gateway's own
//! integration tests in place of a real LLM session host. Every
//! `chat_send` immediately replies with a synthetic final chat event that
//! echoes the input text — enough to exercise the gateway's dispatch and
//! broadcast plumbing without a model in the loop.

use crate::bridge::{ChatSendOutcome, SessionBridge, ToolResultOutcome};
use crate::events::{ChannelContext, ChatEvent, ChatEventState, SessionSnapshot, UserMessage};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;

pub struct LoopbackSessionBridge {
    history: Mutex<HashMap<String, Vec<Value>>>,
    events: mpsc::UnboundedSender<(String, ChatEvent)>,
}

impl LoopbackSessionBridge {
    /// `events` receives `(sessionKey, ChatEvent)` pairs as if the session
    /// actor had called `broadcastToSession` — the gateway owns the other
    /// end and fans them out to connected clients/channels.
    pub fn new(events: mpsc::UnboundedSender<(String, ChatEvent)>) -> Self {
        Self { history: Mutex::new(HashMap::new()), events }
    }
}

#[async_trait]
impl SessionBridge for LoopbackSessionBridge {
    async fn chat_send(
        &self,
        session_key: &str,
        message: UserMessage,
        run_id: &str,
        _snapshot: SessionSnapshot,
        _idempotency_key: Option<&str>,
        channel_context: Option<ChannelContext>,
    ) -> anyhow::Result<ChatSendOutcome> {
        {
            let mut history = self.history.lock().unwrap();
            history.entry(session_key.to_string()).or_default().push(json!({
                "role": "user",
                "text": message.text,
            }));
        }

        let reply = format!("echo: {}", message.text);
        {
            let mut history = self.history.lock().unwrap();
            history.entry(session_key.to_string()).or_default().push(json!({
                "role": "assistant",
                "text": reply,
            }));
        }

        let _ = self.events.send((
            session_key.to_string(),
            ChatEvent { run_id: run_id.to_string(), state: ChatEventState::Final, text: Some(reply), channel_context },
        ));

        Ok(ChatSendOutcome { ok: true, run_id: run_id.to_string(), queued: false })
    }

    async fn tool_result(
        &self,
        _session_key: &str,
        _call_id: &str,
        _result: Option<Value>,
        _error: Option<Value>,
    ) -> anyhow::Result<ToolResultOutcome> {
        Ok(ToolResultOutcome { ok: true })
    }

    async fn ingest_async_exec_completion(&self, _session_key: &str, _completion: Value) -> anyhow::Result<()> {
        Ok(())
    }

    async fn get(&self, session_key: &str) -> anyhow::Result<Value> {
        let history = self.history.lock().unwrap();
        Ok(json!({ "sessionKey": session_key, "turns": history.get(session_key).map(|h| h.len()).unwrap_or(0) }))
    }

    async fn stats(&self, session_key: &str) -> anyhow::Result<Value> {
        self.get(session_key).await
    }

    async fn patch(&self, session_key: &str, _patch: Value) -> anyhow::Result<Value> {
        self.get(session_key).await
    }

    async fn reset(&self, session_key: &str) -> anyhow::Result<()> {
        self.history.lock().unwrap().remove(session_key);
        Ok(())
    }

    async fn compact(&self, session_key: &str, keep_last_n: Option<u32>) -> anyhow::Result<()> {
        let n = keep_last_n.unwrap_or(0) as usize;
        let mut history = self.history.lock().unwrap();
        if let Some(turns) = history.get_mut(session_key) {
            if turns.len() > n {
                let drop = turns.len() - n;
                turns.drain(0..drop);
            }
        }
        Ok(())
    }

    async fn abort(&self, _session_key: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn history(&self, session_key: &str, limit: Option<u32>) -> anyhow::Result<Vec<Value>> {
        let history = self.history.lock().unwrap();
        let turns = history.get(session_key).cloned().unwrap_or_default();
        match limit {
            Some(n) => Ok(turns.into_iter().rev().take(n as usize).rev().collect()),
            None => Ok(turns),
        }
    }

    async fn preview(&self, session_key: &str, n: Option<u32>) -> anyhow::Result<Vec<Value>> {
        self.history(session_key, n).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn chat_send_echoes_and_emits_a_final_event() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let bridge = LoopbackSessionBridge::new(tx);

        bridge
            .chat_send("agent:main", UserMessage { text: "hello".into(), media: vec![] }, "run-1", SessionSnapshot::default(), None, None)
            .await
            .unwrap();

        let (key, evt) = rx.try_recv().unwrap();
        assert_eq!(key, "agent:main");
        assert_eq!(evt.state, ChatEventState::Final);
        assert_eq!(evt.text.unwrap(), "echo: hello");
    }

    #[tokio::test]
    async fn reset_clears_history() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let bridge = LoopbackSessionBridge::new(tx);
        bridge
            .chat_send("k", UserMessage { text: "hi".into(), media: vec![] }, "r1", SessionSnapshot::default(), None, None)
            .await
            .unwrap();
        bridge.reset("k").await.unwrap();
        assert!(bridge.history("k", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn compact_keeps_only_the_last_n_turns() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let bridge = LoopbackSessionBridge::new(tx);
        for i in 0..3 {
            bridge
                .chat_send("k", UserMessage { text: format!("msg{i}"), media: vec![] }, "r", SessionSnapshot::default(), None, None)
                .await
                .unwrap();
        }
        // 3 user + 3 assistant turns = 6
        bridge.compact("k", Some(2)).await.unwrap();
        assert_eq!(bridge.history("k", None).await.unwrap().len(), 2);
    }
}
