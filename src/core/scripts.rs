// Copyright 2026 Modmount Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{fs, path::Path};

use anyhow::Result;

use crate::{core::modules::Module, utils};

/// Run every executable regular file in `<core_dir>/<stage>.d`, in directory
/// order. Script failures never fail the stage.
pub fn exec_common_scripts(core_dir: &Path, stage: &str) -> Result<()> {
    let dir = core_dir.join(format!("{stage}.d"));
    let Ok(entries) = fs::read_dir(&dir) else {
        return Ok(());
    };

    for entry in entries.flatten() {
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if !meta.is_file() || !utils::is_executable(&meta) {
            continue;
        }
        log::info!("{stage}.d: exec [{}]", entry.file_name().to_string_lossy());
        if let Err(e) = utils::run_script(entry.path()) {
            log::warn!("{stage}.d script failed: {e:#}");
        }
    }
    Ok(())
}

/// Run each active module's `<stage>.sh`, if present.
pub fn exec_module_scripts(modules: &[Module], stage: &str) {
    for module in modules {
        let script = module.path.join(format!("{stage}.sh"));
        if !script.exists() {
            continue;
        }
        log::info!("{}: exec [{stage}.sh]", module.id);
        if let Err(e) = utils::run_script(&script) {
            log::warn!("{}: {stage}.sh failed: {e:#}", module.id);
        }
    }
}
