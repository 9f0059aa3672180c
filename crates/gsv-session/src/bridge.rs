// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The `SessionBridge` contract itself (§4.6). An external collaborator:
//! the gateway only ever calls through this trait, never reaches into a
//! session's own state.

use crate::events::{ChannelContext, SessionSnapshot, UserMessage};
use async_trait::async_trait;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct ChatSendOutcome {
    pub ok: bool,
    pub run_id: String,
    pub queued: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct ToolResultOutcome {
    pub ok: bool,
}

#[async_trait]
pub trait SessionBridge: Send + Sync {
    /// Enqueues a user turn. `run_id` is a fresh UUID minted by the caller,
    /// not by the session (§4.6: "`runId` is a fresh UUID per turn").
    async fn chat_send(
        &self,
        session_key: &str,
        message: UserMessage,
        run_id: &str,
        snapshot: SessionSnapshot,
        idempotency_key: Option<&str>,
        channel_context: Option<ChannelContext>,
    ) -> anyhow::Result<ChatSendOutcome>;

    /// Delivers a tool completion. Returns `ok:false` (not an error) when
    /// the `callId` is unknown to the session — a race with `abort` the
    /// caller must tolerate, never a hard failure (§4.6).
    async fn tool_result(
        &self,
        session_key: &str,
        call_id: &str,
        result: Option<Value>,
        error: Option<Value>,
    ) -> anyhow::Result<ToolResultOutcome>;

    /// Delivers a terminal async-exec event, including a fresh snapshot so
    /// the session can fold it into history as it sees fit (§4.7).
    async fn ingest_async_exec_completion(&self, session_key: &str, completion: Value) -> anyhow::Result<()>;

    async fn get(&self, session_key: &str) -> anyhow::Result<Value>;
    async fn stats(&self, session_key: &str) -> anyhow::Result<Value>;
    async fn patch(&self, session_key: &str, patch: Value) -> anyhow::Result<Value>;
    async fn reset(&self, session_key: &str) -> anyhow::Result<()>;
    async fn compact(&self, session_key: &str, keep_last_n: Option<u32>) -> anyhow::Result<()>;
    async fn abort(&self, session_key: &str) -> anyhow::Result<()>;
    async fn history(&self, session_key: &str, limit: Option<u32>) -> anyhow::Result<Vec<Value>>;
    async fn preview(&self, session_key: &str, n: Option<u32>) -> anyhow::Result<Vec<Value>>;
}
