// Copyright 2026 Modmount Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::defs;

/// Snapshot of what this boot actually mounted, written after post-fs-data
/// for the manager and the `modules` listing to read.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RuntimeState {
    pub core_only: bool,
    pub modules: Vec<String>,
    pub overlay_modules: Vec<String>,
}

impl RuntimeState {
    pub fn save(&self) -> Result<()> {
        self.save_to(Path::new(defs::STATE_FILE))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string(self).context("Failed to serialize state")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    pub fn load() -> Result<Self> {
        let content = fs::read_to_string(defs::STATE_FILE).context("No runtime state")?;
        serde_json::from_str(&content).context("Failed to parse runtime state")
    }
}
