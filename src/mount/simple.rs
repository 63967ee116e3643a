// Copyright 2026 Modmount Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{fs, path::Path};

use anyhow::Result;

use crate::utils::{bind_mount, clone_attr};

fn rel(path: &Path) -> &Path {
    path.strip_prefix("/").unwrap_or(path)
}

/// Bind individually staged files over their live counterparts. Used before
/// `/data` is available, so only files already present under the cache
/// staging tree participate; paths missing from the live partition are
/// skipped, never created.
pub fn simple_mount(cache_root: &Path, live_root: &Path, path: &Path) -> Result<()> {
    let staged_dir = cache_root.join(rel(path));
    let Ok(dir) = fs::read_dir(&staged_dir) else {
        return Ok(());
    };

    for entry in dir.flatten() {
        let name = entry.file_name();
        let target = path.join(&name);
        let live = live_root.join(rel(&target));
        if !live.exists() {
            continue;
        }

        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            simple_mount(cache_root, live_root, &target)?;
        } else if file_type.is_file() {
            let staged = entry.path();
            if let Err(e) = clone_attr(&live, &staged).and_then(|_| bind_mount(&staged, &live)) {
                log::error!("simple mount {}: {:#}", target.display(), e);
            }
        }
    }

    Ok(())
}
