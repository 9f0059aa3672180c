// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! RPC handlers (spec §4.2-§4.12). Each submodule owns the handlers for one
//! method group; [`crate::dispatcher::dispatch`] routes a precheck'd frame
//! to the right function here.

pub mod channels;
pub mod chat;
pub mod config;
pub mod connect;
pub mod misc;
pub mod scheduler;
pub mod session;
pub mod surface;
pub mod tools;
pub mod transfer;

use serde_json::Value;

/// Deserializes `params` into `T`, turning a missing/malformed payload into
/// the same `GatewayError::BadParams` every handler reports for it.
pub fn parse_params<T: serde::de::DeserializeOwned>(params: Option<Value>) -> Result<T, gsv_protocol::GatewayError> {
    serde_json::from_value(params.unwrap_or(Value::Null)).map_err(|e| gsv_protocol::GatewayError::BadParams(e.to_string()))
}
