// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Message and event shapes crossing the session bridge boundary.

use gsv_protocol::ToolDefinition;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Routing breadcrumbs carried alongside a channel-originated turn so chat
/// events can be delivered back to the right channel binding (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelContext {
    pub channel: String,
    pub account_id: String,
    pub peer: Value,
    pub inbound_message_id: String,
    pub agent_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMessage {
    pub text: String,
    #[serde(default)]
    pub media: Vec<Value>,
}

/// `tools`/`runtimeNodes` are deep copies taken at dispatch time (§4.6) —
/// callers must clone before handing a snapshot to `chatSend` so later
/// gateway-side mutation never leaks into the session's view.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionSnapshot {
    pub tools: Vec<ToolDefinition>,
    pub runtime_nodes: Vec<Value>,
}

/// A broadcast chunk the session actor fans out via `broadcastToSession`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEvent {
    pub run_id: String,
    pub state: ChatEventState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_context: Option<ChannelContext>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatEventState {
    Partial,
    Final,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultDelivery {
    pub call_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}
