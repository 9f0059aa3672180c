// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Dot-path addressable configuration (spec §4.11).
//!
//! Generalizes the fixed `Config` struct the teacher's config crate used to
//! deserialize into: instead of a typed struct, the merged YAML layers land
//! in a `serde_json::Value` tree that any `model.*`/`apiKeys.*`/`cron.*`
//! dotted path can reach into. The layering algorithm itself — search an
//! ordered list of file locations, deep-merge each that exists, explicit
//! path wins last — is unchanged from the teacher's `merge_yaml`/
//! `config_search_paths`.

mod defaults;
mod paths;
mod redact;
mod session_key;

pub use paths::config_search_paths;
pub use redact::redact_safe;
pub use session_key::canonicalize_session_key;

use anyhow::Context;
use serde_json::Value;
use std::path::Path;
use std::sync::RwLock;

/// The gateway's live configuration: a deep-merged JSON tree behind a
/// single-writer lock, addressed by dotted path.
pub struct ConfigStore {
    tree: RwLock<Value>,
}

impl ConfigStore {
    pub fn new(tree: Value) -> Self {
        Self { tree: RwLock::new(tree) }
    }

    /// Load the layered defaults + every discovered config file + an
    /// optional explicit override path (`--config`), in that priority order.
    pub fn load(extra: Option<&Path>) -> anyhow::Result<Self> {
        let mut merged = defaults::defaults();

        for path in config_search_paths() {
            if path.is_file() {
                tracing::debug!(path = %path.display(), "loading config layer");
                let layer = read_yaml_as_json(&path)?;
                merge(&mut merged, layer);
            }
        }

        if let Some(p) = extra {
            tracing::debug!(path = %p.display(), "loading explicit config");
            let layer = read_yaml_as_json(p)?;
            merge(&mut merged, layer);
        }

        Ok(Self::new(merged))
    }

    pub fn get_path(&self, path: &str) -> Option<Value> {
        let tree = self.tree.read().unwrap();
        walk(&tree, path).cloned()
    }

    /// Deep-merges `value` at `path` into the persisted tree. A scalar
    /// overwrites a scalar; an object merges key-by-key into an existing
    /// object (spec: "nested writes are deep-merged into the persisted
    /// shallow snapshot").
    pub fn set_path(&self, path: &str, value: Value) {
        let mut tree = self.tree.write().unwrap();
        set_at(&mut tree, path, value);
    }

    /// The whole tree with `apiKeys.*` and `auth.token` replaced by `"***"`,
    /// safe to hand to a client over `config.get`.
    pub fn safe_snapshot(&self) -> Value {
        let tree = self.tree.read().unwrap();
        redact_safe(tree.clone())
    }
}

fn read_yaml_as_json(path: &Path) -> anyhow::Result<Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let yaml: serde_yaml::Value = serde_yaml::from_str(&text)
        .with_context(|| format!("parsing {}", path.display()))?;
    Ok(serde_json::to_value(yaml).with_context(|| format!("converting {}", path.display()))?)
}

fn merge(dst: &mut Value, src: Value) {
    match (dst, src) {
        (Value::Object(d), Value::Object(s)) => {
            for (k, v) in s {
                merge(d.entry(k).or_insert(Value::Null), v);
            }
        }
        (dst, src) => *dst = src,
    }
}

fn walk<'a>(tree: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(tree, |node, segment| node.get(segment))
}

fn set_at(tree: &mut Value, path: &str, value: Value) {
    let segments: Vec<&str> = path.split('.').collect();
    let mut node = tree;
    for segment in &segments[..segments.len().saturating_sub(1)] {
        if !node.is_object() {
            *node = Value::Object(Default::default());
        }
        node = node
            .as_object_mut()
            .unwrap()
            .entry(segment.to_string())
            .or_insert(Value::Object(Default::default()));
    }
    if let Some(last) = segments.last() {
        if !node.is_object() {
            *node = Value::Object(Default::default());
        }
        let slot = node.as_object_mut().unwrap().entry(last.to_string()).or_insert(Value::Null);
        merge(slot, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_path_reaches_nested_scalar() {
        let store = ConfigStore::new(json!({"model": {"provider": "anthropic"}}));
        assert_eq!(store.get_path("model.provider"), Some(json!("anthropic")));
    }

    #[test]
    fn get_path_returns_none_for_missing_key() {
        let store = ConfigStore::new(json!({}));
        assert_eq!(store.get_path("model.provider"), None);
    }

    #[test]
    fn set_path_deep_merges_without_clobbering_siblings() {
        let store = ConfigStore::new(json!({"model": {"provider": "anthropic", "id": "claude"}}));
        store.set_path("model.provider", json!("openai"));
        assert_eq!(store.get_path("model.provider"), Some(json!("openai")));
        assert_eq!(store.get_path("model.id"), Some(json!("claude")));
    }

    #[test]
    fn set_path_creates_intermediate_objects() {
        let store = ConfigStore::new(json!({}));
        store.set_path("cron.maxJobs", json!(50));
        assert_eq!(store.get_path("cron.maxJobs"), Some(json!(50)));
    }

    #[test]
    fn safe_snapshot_redacts_api_keys_and_auth_token() {
        let store = ConfigStore::new(json!({
            "apiKeys": {"anthropic": "sk-ant-secret", "openai": "sk-secret"},
            "auth": {"token": "top-secret"},
            "model": {"provider": "anthropic"},
        }));
        let safe = store.safe_snapshot();
        assert_eq!(safe["apiKeys"]["anthropic"], "***");
        assert_eq!(safe["apiKeys"]["openai"], "***");
        assert_eq!(safe["auth"]["token"], "***");
        assert_eq!(safe["model"]["provider"], "anthropic");
    }
}
