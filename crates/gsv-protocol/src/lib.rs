// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Wire protocol shared by every peer class the gateway multiplexes:
//! interactive clients, tool-executing nodes, and channel adapters.
//!
//! # Frame kinds
//!
//! A single WebSocket carries three JSON frame kinds plus one opaque binary
//! kind (transfer chunks):
//!
//! - [`Frame::Req`] — a request awaiting a matching `res`.
//! - [`Frame::Res`] — the reply to a `req`, tagged `ok:true`/`ok:false`.
//! - [`Frame::Evt`] — a fire-and-forget event (tool invocations, chat
//!   deltas, transfer control messages, ...).
//!
//! Binary frames are `[4-byte LE transferId][chunk bytes]` and are handled
//! outside this crate — they never carry JSON and so have no `Frame` variant.

mod error;
pub mod methods;

pub use error::GatewayError;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

// ── Frames ──────────────────────────────────────────────────────────────────

/// One JSON frame exchanged over a gateway WebSocket connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Req {
        id: String,
        method: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<Value>,
    },
    Res {
        id: String,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorPayload>,
    },
    Evt {
        event: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
    },
}

impl Frame {
    pub fn ok_res(id: impl Into<String>, payload: Option<Value>) -> Self {
        Frame::Res { id: id.into(), ok: true, payload, error: None }
    }

    pub fn err_res(id: impl Into<String>, error: ErrorPayload) -> Self {
        Frame::Res { id: id.into(), ok: false, payload: None, error: Some(error) }
    }

    pub fn evt(event: impl Into<String>, payload: Option<Value>) -> Self {
        Frame::Evt { event: event.into(), payload, seq: None }
    }

    /// `req` frames must be handled even on a not-yet-`connected` socket only
    /// when the method is `connect` (spec §4.1 / §4.2 step 2).
    pub fn as_req(&self) -> Option<(&str, &str, Option<&Value>)> {
        match self {
            Frame::Req { id, method, params } => Some((id, method, params.as_ref())),
            _ => None,
        }
    }
}

/// `{code, message, details?, retryable?}` — the shape of every `ok:false` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: u16,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

// ── Connect handshake ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMode {
    Client,
    Node,
    Channel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub id: String,
    pub version: String,
    pub platform: String,
    pub mode: ConnectionMode,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub account_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthParams {
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Closed enumeration of capabilities a node/tool may declare (§3, P10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    #[serde(rename = "shell.exec")]
    ShellExec,
    #[serde(rename = "fs.read")]
    FsRead,
    #[serde(rename = "fs.write")]
    FsWrite,
    #[serde(rename = "net.fetch")]
    NetFetch,
    #[serde(rename = "proc.spawn")]
    ProcSpawn,
    #[serde(rename = "media.transfer")]
    MediaTransfer,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRuntimeInfo {
    #[serde(default)]
    pub host_capabilities: Vec<Capability>,
    #[serde(default)]
    pub tool_capabilities: HashMap<String, Vec<Capability>>,
    #[serde(default)]
    pub host_os: Option<String>,
    #[serde(default)]
    pub host_env: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    pub min_protocol: u32,
    pub max_protocol: u32,
    pub client: ClientInfo,
    #[serde(default)]
    pub tools: Option<Vec<ToolDefinition>>,
    #[serde(default)]
    pub node_runtime: Option<NodeRuntimeInfo>,
    #[serde(default)]
    pub auth: Option<AuthParams>,
}

pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub version: String,
    #[serde(rename = "connectionId")]
    pub connection_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Features {
    pub methods: Vec<String>,
    pub events: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloOk {
    #[serde(rename = "type")]
    pub kind: String,
    pub protocol: u32,
    pub server: ServerInfo,
    pub features: Features,
}

impl HelloOk {
    pub fn new(connection_id: String, server_version: impl Into<String>) -> Self {
        Self {
            kind: "hello-ok".to_string(),
            protocol: PROTOCOL_VERSION,
            server: ServerInfo { version: server_version.into(), connection_id },
            features: Features {
                methods: methods::ALL.iter().map(|m| m.to_string()).collect(),
                events: vec![
                    "tool.invoke".into(),
                    "logs.get".into(),
                    "chat.partial".into(),
                    "chat.final".into(),
                    "chat.error".into(),
                    "transfer.send".into(),
                    "transfer.receive".into(),
                    "transfer.start".into(),
                    "transfer.end".into(),
                ],
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn req_frame_round_trips_through_json() {
        let f = Frame::Req {
            id: "1".into(),
            method: "tool.invoke".into(),
            params: Some(serde_json::json!({"tool": "n1__Bash"})),
        };
        let s = serde_json::to_string(&f).unwrap();
        assert!(s.contains("\"type\":\"req\""));
        let back: Frame = serde_json::from_str(&s).unwrap();
        match back {
            Frame::Req { method, .. } => assert_eq!(method, "tool.invoke"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn res_error_frame_has_no_payload_field_when_absent() {
        let f = Frame::err_res("5", ErrorPayload { code: 404, message: "nope".into(), details: None, retryable: None });
        let s = serde_json::to_string(&f).unwrap();
        assert!(!s.contains("\"payload\""));
    }

    #[test]
    fn connect_params_parses_camel_case_fields() {
        let json = serde_json::json!({
            "minProtocol": 1,
            "maxProtocol": 1,
            "client": {"id": "c1", "version": "1.0", "platform": "mac", "mode": "client"}
        });
        let p: ConnectParams = serde_json::from_value(json).unwrap();
        assert_eq!(p.min_protocol, 1);
        assert_eq!(p.client.mode, ConnectionMode::Client);
    }

    #[test]
    fn hello_ok_serializes_with_literal_type_tag() {
        let h = HelloOk::new("conn-1".into(), "0.1.0");
        let v = serde_json::to_value(&h).unwrap();
        assert_eq!(v["type"], "hello-ok");
        assert_eq!(v["protocol"], 1);
    }

    #[test]
    fn capability_uses_dotted_wire_name() {
        let s = serde_json::to_string(&Capability::ShellExec).unwrap();
        assert_eq!(s, "\"shell.exec\"");
    }
}
