// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Redaction of secret-bearing config keys before a tree reaches a client
//! (§4.11: "API-key and auth-token fields are redacted (`***`) in any
//! 'safe' serialization").

use serde_json::Value;

const REDACTED: &str = "***";

/// Replaces every leaf under `apiKeys.*` and `auth.token` with `"***"`.
/// Structure and every other key are left untouched.
pub fn redact_safe(mut tree: Value) -> Value {
    if let Some(api_keys) = tree.get_mut("apiKeys").and_then(Value::as_object_mut) {
        for (_, v) in api_keys.iter_mut() {
            if !v.is_null() {
                *v = Value::String(REDACTED.to_string());
            }
        }
    }
    if let Some(token) = tree.pointer_mut("/auth/token") {
        if !token.is_null() {
            *token = Value::String(REDACTED.to_string());
        }
    }
    tree
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn leaves_tree_without_secrets_untouched() {
        let tree = json!({"model": {"provider": "anthropic"}});
        assert_eq!(redact_safe(tree.clone()), tree);
    }

    #[test]
    fn null_api_key_stays_null_instead_of_becoming_a_fake_secret() {
        let tree = json!({"apiKeys": {"google": null}});
        let safe = redact_safe(tree);
        assert!(safe["apiKeys"]["google"].is_null());
    }

    #[test]
    fn missing_auth_section_does_not_panic() {
        let tree = json!({"model": {"provider": "anthropic"}});
        let safe = redact_safe(tree);
        assert!(safe.get("auth").is_none());
    }
}
