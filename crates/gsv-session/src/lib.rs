// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The session bridge contract (§4.6).
//!
//! The session is an external actor addressed by `sessionKey` — a durable
//! per-conversation LLM loop the gateway never inspects directly. This
//! crate only defines the narrow RPC surface the gateway calls across that
//! boundary, in the style of the teacher's `ControlCommand`/`ControlEvent`
//! protocol: a closed set of tagged messages, not a shared-memory object.
//!
//! Production deployments implement [`SessionBridge`] against whatever
//! process actually hosts sessions (out of scope for this crate, per the
//! gateway's own scope boundary); [`LoopbackSessionBridge`] is an in-process
//! reference implementation used by the gateway's own integration tests.

mod bridge;
mod events;
mod loopback;

pub use bridge::{ChatSendOutcome, SessionBridge, ToolResultOutcome};
pub use events::{ChannelContext, ChatEvent, ChatEventState, SessionSnapshot, ToolResultDelivery, UserMessage};
pub use loopback::LoopbackSessionBridge;
