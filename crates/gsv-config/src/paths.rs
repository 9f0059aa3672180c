// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Ordered config file search locations, lowest to highest priority.
//! Unchanged in shape from the teacher's `sven-config::loader`, renamed
//! from `sven` to `gsv`.

use std::path::PathBuf;

pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    paths.push(PathBuf::from("/etc/gsv/config.yaml"));
    paths.push(PathBuf::from("/etc/gsv/config.yml"));

    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".config/gsv/config.yaml"));
        paths.push(home.join(".config/gsv/config.yml"));
    }
    if let Some(cfg) = dirs::config_dir() {
        paths.push(cfg.join("gsv/config.yaml"));
        paths.push(cfg.join("gsv/config.yml"));
    }

    paths.push(PathBuf::from(".gsv/config.yaml"));
    paths.push(PathBuf::from(".gsv/config.yml"));
    paths.push(PathBuf::from(".gsv.yaml"));
    paths.push(PathBuf::from(".gsv.yml"));
    paths.push(PathBuf::from("gsv.yaml"));
    paths.push(PathBuf::from("gsv.yml"));

    paths
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_path_comes_before_home_paths() {
        let paths = config_search_paths();
        let system_idx = paths.iter().position(|p| p == &PathBuf::from("/etc/gsv/config.yaml")).unwrap();
        let local_idx = paths.iter().position(|p| p == &PathBuf::from("gsv.yaml")).unwrap();
        assert!(system_idx < local_idx);
    }
}
