// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Outbound channel delivery — mapping a `ChatEvent` from the session
//! bridge back onto a channel send (§4.5 "Outbound").

use gsv_session::{ChatEvent, ChatEventState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundDelivery {
    /// `state == "partial"`: forward the chunk, keep the typing indicator up.
    TypingChunk(String),
    /// `state == "final"`: stop typing, deliver the message.
    Final(String),
    /// `state == "error"`: stop typing, nothing to deliver.
    Suppressed,
}

/// Translates a chat event into what (if anything) should be sent to the
/// channel. Returns `None` when the event carries no `channelContext` —
/// the turn did not originate from a channel, so there is nothing to do.
pub fn deliver_outbound(event: &ChatEvent) -> Option<OutboundDelivery> {
    event.channel_context.as_ref()?;
    Some(match event.state {
        ChatEventState::Partial => OutboundDelivery::TypingChunk(event.text.clone().unwrap_or_default()),
        ChatEventState::Final => OutboundDelivery::Final(event.text.clone().unwrap_or_default()),
        ChatEventState::Error => OutboundDelivery::Suppressed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gsv_session::ChannelContext;
    use serde_json::json;

    fn ctx() -> ChannelContext {
        ChannelContext {
            channel: "whatsapp".into(),
            account_id: "default".into(),
            peer: json!({"kind": "dm", "id": "+1555"}),
            inbound_message_id: "m1".into(),
            agent_id: "main".into(),
        }
    }

    #[test]
    fn events_without_channel_context_deliver_nothing() {
        let evt = ChatEvent { run_id: "r1".into(), state: ChatEventState::Final, text: Some("hi".into()), channel_context: None };
        assert_eq!(deliver_outbound(&evt), None);
    }

    #[test]
    fn final_state_delivers_the_message_and_stops_typing() {
        let evt = ChatEvent { run_id: "r1".into(), state: ChatEventState::Final, text: Some("done".into()), channel_context: Some(ctx()) };
        assert_eq!(deliver_outbound(&evt), Some(OutboundDelivery::Final("done".into())));
    }

    #[test]
    fn error_state_suppresses_delivery() {
        let evt = ChatEvent { run_id: "r1".into(), state: ChatEventState::Error, text: None, channel_context: Some(ctx()) };
        assert_eq!(deliver_outbound(&evt), Some(OutboundDelivery::Suppressed));
    }

    #[test]
    fn partial_state_forwards_as_a_typing_chunk() {
        let evt = ChatEvent { run_id: "r1".into(), state: ChatEventState::Partial, text: Some("wor".into()), channel_context: Some(ctx()) };
        assert_eq!(deliver_outbound(&evt), Some(OutboundDelivery::TypingChunk("wor".into())));
    }
}
