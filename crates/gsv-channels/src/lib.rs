// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Channel inbound/outbound routing (§4.5).
//!
//! A channel is a messaging surface (WhatsApp, Telegram, Discord, ...) fed
//! into the gateway either over a service-binding RPC or its own WebSocket
//! `channel.inbound` frame. This crate owns:
//!
//! - [`InboundMessage`] canonicalization into a `sessionKey` and the
//!   slash-command short-circuit (`dispatch_inbound`).
//! - [`ChannelWorker`], the external-collaborator contract a channel
//!   adapter implements (start/stop/status/login/logout/send) — in the
//!   style of the teacher's stub crate, which declared `teloxide`/
//!   `serenity` as optional per-channel backends without yet wiring one up.
//! - [`LoopbackChannel`], an in-process reference adapter for tests.

mod inbound;
mod outbound;
mod slash;
mod worker;

pub use inbound::{dispatch_inbound, InboundDispatch, InboundMessage, Peer};
pub use outbound::{deliver_outbound, OutboundDelivery};
pub use slash::{parse_slash_command, SlashCommand};
pub use worker::{ChannelStatus, ChannelWorker, LoopbackChannel};
