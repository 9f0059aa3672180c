// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The channel adapter contract. Each real backend (WhatsApp, Telegram via
//! `teloxide`, Discord via `serenity`, ...) implements this trait; the
//! gateway only ever talks to `dyn ChannelWorker`.

use async_trait::async_trait;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    LoggedOut,
    LoggingIn,
    Connected,
    Error,
}

#[async_trait]
pub trait ChannelWorker: Send + Sync {
    async fn start(&self, account_id: &str) -> anyhow::Result<()>;
    async fn stop(&self, account_id: &str) -> anyhow::Result<()>;
    async fn status(&self, account_id: &str) -> anyhow::Result<ChannelStatus>;
    async fn login(&self, account_id: &str) -> anyhow::Result<()>;
    async fn logout(&self, account_id: &str) -> anyhow::Result<()>;
    /// Delivers `text` to `peer_id` on `account_id`, preferring a
    /// service-binding RPC; falls back to the live WebSocket connection
    /// when no binding is configured (§4.5 "Channel delivery").
    async fn send(&self, account_id: &str, peer_id: &str, text: &str) -> anyhow::Result<()>;
}

/// In-process reference adapter: records every delivered message instead
/// of reaching out to a real messaging backend. Used by gateway tests.
#[derive(Default)]
pub struct LoopbackChannel {
    status: Mutex<ChannelStatus>,
    sent: Mutex<Vec<(String, String, String)>>,
}

impl LoopbackChannel {
    pub fn new() -> Self {
        Self { status: Mutex::new(ChannelStatus::LoggedOut), sent: Mutex::new(Vec::new()) }
    }

    pub fn sent_messages(&self) -> Vec<(String, String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChannelWorker for LoopbackChannel {
    async fn start(&self, _account_id: &str) -> anyhow::Result<()> {
        *self.status.lock().unwrap() = ChannelStatus::Connected;
        Ok(())
    }

    async fn stop(&self, _account_id: &str) -> anyhow::Result<()> {
        *self.status.lock().unwrap() = ChannelStatus::LoggedOut;
        Ok(())
    }

    async fn status(&self, _account_id: &str) -> anyhow::Result<ChannelStatus> {
        Ok(*self.status.lock().unwrap())
    }

    async fn login(&self, _account_id: &str) -> anyhow::Result<()> {
        *self.status.lock().unwrap() = ChannelStatus::Connected;
        Ok(())
    }

    async fn logout(&self, _account_id: &str) -> anyhow::Result<()> {
        *self.status.lock().unwrap() = ChannelStatus::LoggedOut;
        Ok(())
    }

    async fn send(&self, account_id: &str, peer_id: &str, text: &str) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push((account_id.to_string(), peer_id.to_string(), text.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_records_the_delivered_message() {
        let channel = LoopbackChannel::new();
        channel.send("default", "+1555", "hi there").await.unwrap();
        let sent = channel.sent_messages();
        assert_eq!(sent, vec![("default".to_string(), "+1555".to_string(), "hi there".to_string())]);
    }

    #[tokio::test]
    async fn login_then_status_reports_connected() {
        let channel = LoopbackChannel::new();
        channel.login("default").await.unwrap();
        assert_eq!(channel.status("default").await.unwrap(), ChannelStatus::Connected);
    }
}
