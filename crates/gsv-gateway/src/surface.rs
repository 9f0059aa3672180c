// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Surfaces (spec §3 "Surface"): renderable windows/tabs a client or node
//! opens, tracked centrally and broadcast-replicated to every other client.
//!
//! The spec's Open Questions note two near-duplicate surface-tool
//! definitions in the source that should collapse into a single native
//! `View` tool with actions `{open, list, close, eval}` — see
//! [`crate::native_tools`] for where that tool is wired in. `eval` is the
//! legacy alias for `focus`.

use gsv_protocol::GatewayError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceKind {
    App,
    Media,
    Component,
    Webview,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceState {
    Open,
    Minimized,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Surface {
    pub surface_id: String,
    pub kind: SurfaceKind,
    pub label: String,
    pub content_ref: String,
    pub target_client_id: String,
    pub source_client_id: Option<String>,
    pub state: SurfaceState,
    pub rect: Option<Rect>,
    pub z_index: Option<i32>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

#[derive(Default)]
pub struct SurfaceRegistry {
    surfaces: Mutex<HashMap<String, Surface>>,
}

impl SurfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(
        &self,
        surface_id: String,
        kind: SurfaceKind,
        label: String,
        content_ref: String,
        target_client_id: String,
        source_client_id: Option<String>,
        rect: Option<Rect>,
        z_index: Option<i32>,
        now_ms: i64,
    ) -> Surface {
        let surface = Surface {
            surface_id: surface_id.clone(),
            kind,
            label,
            content_ref,
            target_client_id,
            source_client_id,
            state: SurfaceState::Open,
            rect,
            z_index,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
        };
        self.surfaces.lock().unwrap().insert(surface_id, surface.clone());
        surface
    }

    pub fn close(&self, surface_id: &str) -> Result<Surface, GatewayError> {
        let mut surfaces = self.surfaces.lock().unwrap();
        let surface = surfaces.get_mut(surface_id).ok_or_else(|| GatewayError::NotFound(surface_id.to_string()))?;
        surface.state = SurfaceState::Closed;
        Ok(surface.clone())
    }

    pub fn update(&self, surface_id: &str, rect: Option<Rect>, z_index: Option<i32>, state: Option<SurfaceState>, now_ms: i64) -> Result<Surface, GatewayError> {
        let mut surfaces = self.surfaces.lock().unwrap();
        let surface = surfaces.get_mut(surface_id).ok_or_else(|| GatewayError::NotFound(surface_id.to_string()))?;
        if let Some(rect) = rect {
            surface.rect = Some(rect);
        }
        if let Some(z) = z_index {
            surface.z_index = Some(z);
        }
        if let Some(state) = state {
            surface.state = state;
        }
        surface.updated_at_ms = now_ms;
        Ok(surface.clone())
    }

    /// `surface.focus` — legacy alias `eval` on the collapsed `View` tool
    /// maps to the same operation: bring to front by bumping `zIndex`.
    pub fn focus(&self, surface_id: &str, z_index: i32, now_ms: i64) -> Result<Surface, GatewayError> {
        self.update(surface_id, None, Some(z_index), None, now_ms)
    }

    pub fn list(&self, target_client_id: Option<&str>) -> Vec<Surface> {
        let surfaces = self.surfaces.lock().unwrap();
        surfaces
            .values()
            .filter(|s| target_client_id.map_or(true, |id| s.target_client_id == id))
            .cloned()
            .collect()
    }

    pub fn get(&self, surface_id: &str) -> Option<Surface> {
        self.surfaces.lock().unwrap().get(surface_id).cloned()
    }

    pub fn remove(&self, surface_id: &str) -> Option<Surface> {
        self.surfaces.lock().unwrap().remove(surface_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_then_list_then_close() {
        let registry = SurfaceRegistry::new();
        registry.open("s1".into(), SurfaceKind::App, "Terminal".into(), "ref".into(), "client-1".into(), None, None, None, 0);

        let listed = registry.list(Some("client-1"));
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].state, SurfaceState::Open);

        let closed = registry.close("s1").unwrap();
        assert_eq!(closed.state, SurfaceState::Closed);
    }

    #[test]
    fn focus_bumps_z_index_without_touching_other_fields() {
        let registry = SurfaceRegistry::new();
        registry.open("s1".into(), SurfaceKind::Media, "Preview".into(), "ref".into(), "client-1".into(), None, None, Some(1), 0);
        let focused = registry.focus("s1", 99, 10).unwrap();
        assert_eq!(focused.z_index, Some(99));
        assert_eq!(focused.label, "Preview");
    }

    #[test]
    fn list_filters_by_target_client() {
        let registry = SurfaceRegistry::new();
        registry.open("s1".into(), SurfaceKind::App, "a".into(), "r".into(), "client-1".into(), None, None, None, 0);
        registry.open("s2".into(), SurfaceKind::App, "b".into(), "r".into(), "client-2".into(), None, None, None, 0);
        assert_eq!(registry.list(Some("client-1")).len(), 1);
        assert_eq!(registry.list(None).len(), 2);
    }
}
