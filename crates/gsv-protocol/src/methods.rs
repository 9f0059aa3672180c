// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The complete RPC method set (§4.2), grouped the way the spec groups them.
//! Kept as `&'static str` constants rather than an enum so the registry can
//! key a `HashMap<&str, MethodSpec>` without a parse step on every frame.

pub const CONNECT: &str = "connect";

// Tool lifecycle
pub const TOOLS_LIST: &str = "tools.list";
pub const TOOL_REQUEST: &str = "tool.request";
pub const TOOL_INVOKE: &str = "tool.invoke";
pub const TOOL_RESULT: &str = "tool.result";
pub const NODE_PROBE_RESULT: &str = "node.probe.result";
pub const NODE_EXEC_EVENT: &str = "node.exec.event";
pub const NODE_FORGET: &str = "node.forget";

// Logs
pub const LOGS_GET: &str = "logs.get";
pub const LOGS_RESULT: &str = "logs.result";

// Chat
pub const CHAT_SEND: &str = "chat.send";

// Config
pub const CONFIG_GET: &str = "config.get";
pub const CONFIG_SET: &str = "config.set";

// Session
pub const SESSION_GET: &str = "session.get";
pub const SESSION_PATCH: &str = "session.patch";
pub const SESSION_STATS: &str = "session.stats";
pub const SESSION_RESET: &str = "session.reset";
pub const SESSION_HISTORY: &str = "session.history";
pub const SESSION_PREVIEW: &str = "session.preview";
pub const SESSION_COMPACT: &str = "session.compact";
pub const SESSIONS_LIST: &str = "sessions.list";

// Heartbeat
pub const HEARTBEAT_STATUS: &str = "heartbeat.status";
pub const HEARTBEAT_START: &str = "heartbeat.start";
pub const HEARTBEAT_TRIGGER: &str = "heartbeat.trigger";

// Cron
pub const CRON_STATUS: &str = "cron.status";
pub const CRON_LIST: &str = "cron.list";
pub const CRON_ADD: &str = "cron.add";
pub const CRON_UPDATE: &str = "cron.update";
pub const CRON_REMOVE: &str = "cron.remove";
pub const CRON_RUN: &str = "cron.run";
pub const CRON_RUNS: &str = "cron.runs";

// Surface
pub const SURFACE_OPEN: &str = "surface.open";
pub const SURFACE_CLOSE: &str = "surface.close";
pub const SURFACE_UPDATE: &str = "surface.update";
pub const SURFACE_FOCUS: &str = "surface.focus";
pub const SURFACE_LIST: &str = "surface.list";

// Transfer
pub const TRANSFER_META: &str = "transfer.meta";
pub const TRANSFER_ACCEPT: &str = "transfer.accept";
pub const TRANSFER_COMPLETE: &str = "transfer.complete";
pub const TRANSFER_DONE: &str = "transfer.done";

// Channel
pub const CHANNEL_INBOUND: &str = "channel.inbound";
pub const CHANNEL_START: &str = "channel.start";
pub const CHANNEL_STOP: &str = "channel.stop";
pub const CHANNEL_STATUS: &str = "channel.status";
pub const CHANNEL_LOGIN: &str = "channel.login";
pub const CHANNEL_LOGOUT: &str = "channel.logout";
pub const CHANNELS_LIST: &str = "channels.list";

// Skills
pub const SKILLS_STATUS: &str = "skills.status";
pub const SKILLS_UPDATE: &str = "skills.update";

// Workspace
pub const WORKSPACE_LIST: &str = "workspace.list";
pub const WORKSPACE_READ: &str = "workspace.read";
pub const WORKSPACE_WRITE: &str = "workspace.write";
pub const WORKSPACE_DELETE: &str = "workspace.delete";

// Filesystem auth
pub const FS_AUTHORIZE: &str = "fs.authorize";

// Canvas (deferred, §3/§9 — registered but answers 501)
pub const CANVAS_LIST: &str = "canvas.list";
pub const CANVAS_GET: &str = "canvas.get";
pub const CANVAS_CREATE: &str = "canvas.create";
pub const CANVAS_UPSERT: &str = "canvas.upsert";
pub const CANVAS_PATCH: &str = "canvas.patch";
pub const CANVAS_DELETE: &str = "canvas.delete";
pub const CANVAS_OPEN: &str = "canvas.open";
pub const CANVAS_CLOSE: &str = "canvas.close";
pub const CANVAS_ACTION: &str = "canvas.action";

pub const ALL: &[&str] = &[
    CONNECT,
    TOOLS_LIST, TOOL_REQUEST, TOOL_INVOKE, TOOL_RESULT, NODE_PROBE_RESULT, NODE_EXEC_EVENT, NODE_FORGET,
    LOGS_GET, LOGS_RESULT,
    CHAT_SEND,
    CONFIG_GET, CONFIG_SET,
    SESSION_GET, SESSION_PATCH, SESSION_STATS, SESSION_RESET, SESSION_HISTORY, SESSION_PREVIEW, SESSION_COMPACT, SESSIONS_LIST,
    HEARTBEAT_STATUS, HEARTBEAT_START, HEARTBEAT_TRIGGER,
    CRON_STATUS, CRON_LIST, CRON_ADD, CRON_UPDATE, CRON_REMOVE, CRON_RUN, CRON_RUNS,
    SURFACE_OPEN, SURFACE_CLOSE, SURFACE_UPDATE, SURFACE_FOCUS, SURFACE_LIST,
    TRANSFER_META, TRANSFER_ACCEPT, TRANSFER_COMPLETE, TRANSFER_DONE,
    CHANNEL_INBOUND, CHANNEL_START, CHANNEL_STOP, CHANNEL_STATUS, CHANNEL_LOGIN, CHANNEL_LOGOUT, CHANNELS_LIST,
    SKILLS_STATUS, SKILLS_UPDATE,
    WORKSPACE_LIST, WORKSPACE_READ, WORKSPACE_WRITE, WORKSPACE_DELETE,
    FS_AUTHORIZE,
    CANVAS_LIST, CANVAS_GET, CANVAS_CREATE, CANVAS_UPSERT, CANVAS_PATCH, CANVAS_DELETE, CANVAS_OPEN, CANVAS_CLOSE, CANVAS_ACTION,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_contains_connect_first() {
        assert_eq!(ALL[0], CONNECT);
    }

    #[test]
    fn all_has_no_duplicates() {
        let mut seen = std::collections::HashSet::new();
        for m in ALL {
            assert!(seen.insert(*m), "duplicate method {m}");
        }
    }
}
