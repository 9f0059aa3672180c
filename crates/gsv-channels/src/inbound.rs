// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Inbound channel message handling (§4.5 steps 1-4).

use crate::slash::{parse_slash_command, SlashCommand};
use gsv_session::{ChannelContext, UserMessage};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Peer {
    pub kind: String,
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub peer: Peer,
    #[serde(default)]
    pub sender: Option<String>,
    pub message_id: String,
    pub text: String,
    pub timestamp: i64,
    #[serde(default)]
    pub reply_to_id: Option<String>,
    #[serde(default)]
    pub reply_to_text: Option<String>,
    #[serde(default)]
    pub media: Vec<Value>,
    #[serde(default)]
    pub was_mentioned: bool,
}

#[derive(Debug, Clone)]
pub enum InboundDispatch {
    /// A recognized slash command — the caller must answer directly from
    /// session state and never invoke the model (§4.5 step 3).
    SlashCommand { session_key: String, command: SlashCommand },
    /// A normal turn to hand to `SessionBridge::chat_send` (§4.5 step 4).
    Chat { session_key: String, message: UserMessage, channel_context: ChannelContext },
}

/// Canonicalizes the session key for this inbound message and decides
/// whether it is a slash command or a chat turn.
///
/// `is_main_dm_scope` is the caller's verdict on whether `inbound.peer`
/// matches the configured main DM scope (§4.5: "or the `mainKey` when the
/// peer matches the configured main DM scope") — channel-specific DM-scope
/// matching rules live with the channel config, not in this routing layer.
pub fn dispatch_inbound(
    channel: &str,
    account_id: &str,
    agent_id: &str,
    main_key: &str,
    is_main_dm_scope: bool,
    inbound: InboundMessage,
) -> InboundDispatch {
    let session_key = if is_main_dm_scope {
        main_key.to_string()
    } else {
        format!("agent:{agent_id}:{channel}:{}:{}", inbound.peer.kind, inbound.peer.id)
    };

    if let Some(command) = parse_slash_command(&inbound.text) {
        return InboundDispatch::SlashCommand { session_key, command };
    }

    let channel_context = ChannelContext {
        channel: channel.to_string(),
        account_id: account_id.to_string(),
        peer: serde_json::to_value(&inbound.peer).unwrap_or(Value::Null),
        inbound_message_id: inbound.message_id.clone(),
        agent_id: agent_id.to_string(),
    };

    InboundDispatch::Chat {
        session_key,
        message: UserMessage { text: inbound.text, media: inbound.media },
        channel_context,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(text: &str) -> InboundMessage {
        InboundMessage {
            peer: Peer { kind: "dm".into(), id: "+1555".into(), name: None },
            sender: None,
            message_id: "m1".into(),
            text: text.to_string(),
            timestamp: 0,
            reply_to_id: None,
            reply_to_text: None,
            media: vec![],
            was_mentioned: false,
        }
    }

    #[test]
    fn non_main_scope_builds_the_dotted_session_key() {
        let dispatch = dispatch_inbound("whatsapp", "default", "main", "main", false, msg("hi"));
        match dispatch {
            InboundDispatch::Chat { session_key, .. } => assert_eq!(session_key, "agent:main:whatsapp:dm:+1555"),
            _ => panic!("expected chat dispatch"),
        }
    }

    #[test]
    fn main_scope_uses_the_configured_main_key() {
        let dispatch = dispatch_inbound("whatsapp", "default", "main", "main", true, msg("hi"));
        match dispatch {
            InboundDispatch::Chat { session_key, .. } => assert_eq!(session_key, "main"),
            _ => panic!("expected chat dispatch"),
        }
    }

    #[test]
    fn slash_text_short_circuits_before_model_invocation() {
        let dispatch = dispatch_inbound("whatsapp", "default", "main", "main", false, msg("/status"));
        match dispatch {
            InboundDispatch::SlashCommand { command, .. } => assert_eq!(command, crate::slash::SlashCommand::Status),
            _ => panic!("expected slash command dispatch"),
        }
    }
}
