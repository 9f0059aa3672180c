// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Native tools: always present under the `gsv__` prefix, invoked inside
//! the gateway process rather than routed to a node (spec §4.3, P6).
//!
//! Per the spec's Open Questions, the two near-duplicate surface tools
//! found in the source collapse into a single `gsv__surface_view` tool
//! with actions `{open, list, close, eval}` (`eval` being the legacy
//! focus alias).

use gsv_protocol::ToolDefinition;
use serde_json::{json, Value};

pub const PING: &str = "gsv__ping";
pub const LIST_NODES: &str = "gsv__list_nodes";
pub const LIST_TOOLS: &str = "gsv__list_tools";
pub const SURFACE_VIEW: &str = "gsv__surface_view";

pub fn definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: PING.to_string(),
            description: "Checks gateway liveness; echoes the caller's payload back.".to_string(),
            input_schema: json!({"type": "object", "properties": {"echo": {"type": "string"}}}),
        },
        ToolDefinition {
            name: LIST_NODES.to_string(),
            description: "Lists every node ever seen by the gateway, with online/offline status.".to_string(),
            input_schema: json!({"type": "object", "properties": {}}),
        },
        ToolDefinition {
            name: LIST_TOOLS.to_string(),
            description: "Lists every resolvable tool, native and node-namespaced.".to_string(),
            input_schema: json!({"type": "object", "properties": {}}),
        },
        ToolDefinition {
            name: SURFACE_VIEW.to_string(),
            description: "Manages client-side surfaces (windows/tabs): open, list, close, eval (focus).".to_string(),
            input_schema: json!({
                "type": "object",
                "required": ["action"],
                "properties": {
                    "action": {"type": "string", "enum": ["open", "list", "close", "eval"]},
                    "surfaceId": {"type": "string"},
                    "kind": {"type": "string", "enum": ["app", "media", "component", "webview"]},
                    "label": {"type": "string"},
                    "contentRef": {"type": "string"},
                    "targetClientId": {"type": "string"}
                }
            }),
        },
    ]
}

pub fn is_native(tool_name: &str) -> bool {
    definitions().iter().any(|t| t.name == tool_name)
}

/// Executes one of the four native tools inline — these never leave the
/// gateway process, so they answer synchronously rather than deferring
/// through a node round trip.
pub async fn invoke(
    state: &crate::state::GatewayState,
    ctx: &crate::connection::ConnCtx,
    tool_name: &str,
    arguments: serde_json::Value,
    now_ms: i64,
) -> crate::dispatcher::HandlerResult {
    use crate::dispatcher::HandlerOutcome;
    use crate::surface::SurfaceKind;
    use gsv_protocol::GatewayError;

    match tool_name {
        PING => Ok(HandlerOutcome::Ok(json!({ "pong": true, "echo": arguments.get("echo").cloned().unwrap_or(Value::Null) }))),
        LIST_NODES => {
            let nodes = state.nodes.list().await?;
            Ok(HandlerOutcome::Ok(json!({ "nodes": nodes })))
        }
        LIST_TOOLS => {
            let tools = state.nodes.all_tools().await?;
            Ok(HandlerOutcome::Ok(json!({ "tools": tools })))
        }
        SURFACE_VIEW => {
            let action = arguments.get("action").and_then(Value::as_str).unwrap_or("list");
            match action {
                "list" => {
                    let target = arguments.get("targetClientId").and_then(Value::as_str);
                    Ok(HandlerOutcome::Ok(json!({ "surfaces": state.surfaces.list(target) })))
                }
                "open" => {
                    let surface_id = arguments.get("surfaceId").and_then(Value::as_str).map(str::to_string).unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                    let kind: SurfaceKind = serde_json::from_value(arguments.get("kind").cloned().unwrap_or(json!("app"))).map_err(|e| GatewayError::BadParams(e.to_string()))?;
                    let label = arguments.get("label").and_then(Value::as_str).unwrap_or("").to_string();
                    let content_ref = arguments.get("contentRef").and_then(Value::as_str).unwrap_or("").to_string();
                    let target_client_id = arguments.get("targetClientId").and_then(Value::as_str).unwrap_or(&ctx.peer_id).to_string();
                    let surface = state.surfaces.open(surface_id, kind, label, content_ref, target_client_id, Some(ctx.peer_id.clone()), None, None, now_ms);
                    Ok(HandlerOutcome::Ok(serde_json::to_value(surface).unwrap()))
                }
                "close" => {
                    let surface_id = arguments.get("surfaceId").and_then(Value::as_str).ok_or_else(|| GatewayError::BadParams("surfaceId required".into()))?;
                    let surface = state.surfaces.close(surface_id)?;
                    Ok(HandlerOutcome::Ok(serde_json::to_value(surface).unwrap()))
                }
                "eval" => {
                    let surface_id = arguments.get("surfaceId").and_then(Value::as_str).ok_or_else(|| GatewayError::BadParams("surfaceId required".into()))?;
                    let z_index = arguments.get("zIndex").and_then(Value::as_i64).unwrap_or(0) as i32;
                    let surface = state.surfaces.focus(surface_id, z_index, now_ms)?;
                    Ok(HandlerOutcome::Ok(serde_json::to_value(surface).unwrap()))
                }
                other => Err(GatewayError::BadParams(format!("unknown surface action {other}"))),
            }
        }
        other => Err(GatewayError::NotFound(format!("native tool {other} not found"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_native_tool_is_recognized_by_name() {
        for def in definitions() {
            assert!(is_native(&def.name));
        }
    }

    #[test]
    fn native_tools_all_carry_the_gsv_prefix() {
        for def in definitions() {
            assert!(def.name.starts_with("gsv__"));
        }
    }
}
