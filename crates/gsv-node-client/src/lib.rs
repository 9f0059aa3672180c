// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Shared WebSocket client for any peer that dials a gateway: a node
//! offering tools, an interactive client, or a channel adapter. One small
//! SDK instead of three near-identical hand-rolled socket loops, matching
//! the teacher's `sven-node-client` (declared but never filled in — this
//! is the implementation that stub Cargo.toml's dependency choice implied).

mod client;
mod codec;

pub use client::NodeClient;
pub use codec::{next_frame, send_frame};
