// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Session-key canonicalization (§4.11, invariant P4): every entry point
//! (channel inbound, client RPC, cron, heartbeat) produces the same stable
//! address for the same logical conversation, regardless of how it arrived.

/// Canonicalizes `input` into a stable `sessionKey`.
///
/// - `input == main_key` → returned unchanged (the main DM scope).
/// - `input` already `agent:`-prefixed → returned as-is, except the agent id
///   segment is lower-cased (an agent id is case-insensitive everywhere
///   else in the config tree; this keeps `Agent:Foo:x` and `agent:foo:x`
///   from aliasing to two different sessions).
/// - otherwise → `agent:{default_agent_id}:{input}`.
///
/// Applying this function twice to its own output is a no-op (idempotent),
/// since the second call always falls into one of the first two branches.
pub fn canonicalize_session_key(input: &str, main_key: &str, default_agent_id: &str) -> String {
    if input == main_key {
        return input.to_string();
    }
    if let Some(rest) = input.strip_prefix("agent:") {
        let mut parts = rest.splitn(2, ':');
        let agent_id = parts.next().unwrap_or_default().to_lowercase();
        return match parts.next() {
            Some(tail) => format!("agent:{agent_id}:{tail}"),
            None => format!("agent:{agent_id}"),
        };
    }
    format!("agent:{default_agent_id}:{input}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn main_key_passes_through_unchanged() {
        assert_eq!(canonicalize_session_key("main", "main", "default"), "main");
    }

    #[test]
    fn agent_prefixed_input_passes_through_with_lowercased_agent_id() {
        assert_eq!(
            canonicalize_session_key("agent:Research:whatsapp:dm:+1555", "main", "default"),
            "agent:research:whatsapp:dm:+1555"
        );
    }

    #[test]
    fn bare_input_gets_default_agent_prefix() {
        assert_eq!(
            canonicalize_session_key("whatsapp:dm:+1555", "main", "default"),
            "agent:default:whatsapp:dm:+1555"
        );
    }

    #[test]
    fn canonicalization_is_idempotent() {
        let once = canonicalize_session_key("whatsapp:dm:+1555", "main", "default");
        let twice = canonicalize_session_key(&once, "main", "default");
        assert_eq!(once, twice);
    }

    #[test]
    fn bare_agent_prefix_without_tail_does_not_panic() {
        assert_eq!(canonicalize_session_key("agent:Foo", "main", "default"), "agent:foo");
    }
}
