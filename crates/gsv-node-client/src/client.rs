// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! A minimal gateway client: connect, send `connect`, exchange frames.
//! Used both by real node processes and by the gateway's own test suite
//! as a fake peer.

use crate::codec::{next_frame, send_frame, WsStream};
use gsv_protocol::{ConnectParams, Frame};
use std::collections::HashMap;
use tokio_tungstenite::connect_async;

pub struct NodeClient {
    ws: WsStream,
    next_id: u64,
}

impl NodeClient {
    pub async fn connect(url: &str, params: ConnectParams) -> anyhow::Result<(Self, Frame)> {
        let (ws, _response) = connect_async(url).await?;
        let mut client = Self { ws, next_id: 1 };
        client
            .request("connect", Some(serde_json::to_value(&params)?))
            .await?;
        let hello = next_frame(&mut client.ws).await?.ok_or_else(|| anyhow::anyhow!("socket closed before hello-ok"))?;
        Ok((client, hello))
    }

    pub async fn request(&mut self, method: &str, params: Option<serde_json::Value>) -> anyhow::Result<String> {
        let id = self.next_id.to_string();
        self.next_id += 1;
        send_frame(&mut self.ws, &Frame::Req { id: id.clone(), method: method.to_string(), params }).await?;
        Ok(id)
    }

    pub async fn recv(&mut self) -> anyhow::Result<Option<Frame>> {
        next_frame(&mut self.ws).await
    }

    pub async fn send_event(&mut self, event: &str, payload: Option<serde_json::Value>) -> anyhow::Result<()> {
        send_frame(&mut self.ws, &Frame::evt(event, payload)).await
    }

    pub async fn send_res_ok(&mut self, id: &str, payload: Option<serde_json::Value>) -> anyhow::Result<()> {
        send_frame(&mut self.ws, &Frame::ok_res(id, payload)).await
    }

    /// Drains frames until `predicate` matches one, collecting everything
    /// skipped along the way. Used in tests to wait for a specific reply
    /// amid interleaved events.
    pub async fn wait_for(&mut self, predicate: impl Fn(&Frame) -> bool) -> anyhow::Result<Frame> {
        loop {
            match self.recv().await? {
                Some(frame) if predicate(&frame) => return Ok(frame),
                Some(_) => continue,
                None => anyhow::bail!("socket closed while waiting for a matching frame"),
            }
        }
    }
}

/// Correlates `req`/`res` pairs by `id` for callers that issue several
/// in-flight requests at once.
#[derive(Default)]
pub struct PendingRequests {
    inner: HashMap<String, String>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, id: &str, method: &str) {
        self.inner.insert(id.to_string(), method.to_string());
    }

    pub fn resolve(&mut self, id: &str) -> Option<String> {
        self.inner.remove(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_requests_resolve_removes_the_tracked_method() {
        let mut pending = PendingRequests::new();
        pending.track("1", "tools.list");
        assert_eq!(pending.resolve("1"), Some("tools.list".to_string()));
        assert_eq!(pending.resolve("1"), None);
    }
}
