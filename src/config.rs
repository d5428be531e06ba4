// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration loading.
//!
//! `IndexConfig` defaults cover everything; a project may override fields
//! through `.artidex.yaml` at its root. Unknown fields are rejected so typos
//! surface instead of silently falling back to defaults.

use std::path::Path;

use crate::error::Result;
use crate::types::IndexConfig;

/// Project-level config file name.
pub const CONFIG_FILE_NAME: &str = ".artidex.yaml";

/// Load the config for a project: defaults, overridden by `.artidex.yaml`
/// when present.
pub fn load_config(project_root: &Path) -> Result<IndexConfig> {
    let path = project_root.join(CONFIG_FILE_NAME);
    if !path.is_file() {
        return Ok(IndexConfig::default());
    }

    let raw = std::fs::read_to_string(&path)?;
    let config: IndexConfig = serde_yaml::from_str(&raw)?;
    tracing::debug!(path = %path.display(), "loaded project config");
    Ok(config)
}
