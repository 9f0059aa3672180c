// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The built-in default tree, seeded before any config file is merged in
//! (§4.11: "a typed default layered underneath"). Keys match the list in
//! spec §6 exactly.

use serde_json::{json, Value};

pub fn defaults() -> Value {
    json!({
        "model": {
            "provider": "anthropic",
            "id": "claude-opus-4-6",
        },
        "apiKeys": {
            "anthropic": Value::Null,
            "openai": Value::Null,
            "google": Value::Null,
        },
        "auth": {
            "token": Value::Null,
        },
        "timeouts": {
            "llmMs": 60_000,
            "toolMs": 30_000,
            "skillProbeMaxAgeMs": 300_000,
        },
        "session": {
            "mainKey": "main",
            "dmScope": "direct",
        },
        "agents": {
            "list": [],
            "defaultHeartbeat": {
                "every": "6h",
                "activeHours": Value::Null,
                "target": Value::Null,
                "prompt": Value::Null,
            },
        },
        "cron": {
            "enabled": true,
            "maxJobs": 100,
            "maxRunsPerJobHistory": 50,
            "maxConcurrentRuns": 4,
        },
        "userTimezone": "UTC",
        "channels": {},
        "skills": {
            "entries": {},
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_seed_main_session_key() {
        assert_eq!(defaults()["session"]["mainKey"], "main");
    }

    #[test]
    fn defaults_enable_cron() {
        assert_eq!(defaults()["cron"]["enabled"], true);
    }
}
