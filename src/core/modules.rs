// Copyright 2026 Modmount Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    collections::HashSet,
    fs,
    io::{BufRead, BufReader},
    os::unix::fs::symlink,
    path::{Path, PathBuf},
    sync::OnceLock,
};

use anyhow::Result;
use rayon::prelude::*;
use regex_lite::Regex;
use serde::Serialize;

use crate::{core::state::RuntimeState, defs};

static MODULE_PROP_REGEX: OnceLock<Regex> = OnceLock::new();

#[derive(Debug, Clone)]
pub struct Module {
    pub id: String,
    pub path: PathBuf,
    /// Participates in the overlay: has `auto_mount` and a `system/` tree.
    pub overlay: bool,
    /// `system.prop`, handed to the property injector by the orchestrator.
    pub prop_file: Option<PathBuf>,
}

/// Enumerate active modules under the mounted image. Modules flagged
/// `remove` are deleted here; `disable` keeps them on disk but out of this
/// boot. The result is ordered by id, which is the precedence order for
/// colliding contributions.
pub fn scan(mount_point: &Path) -> Result<Vec<Module>> {
    let entries = fs::read_dir(mount_point)?.collect::<std::io::Result<Vec<_>>>()?;

    let mut modules: Vec<Module> = entries
        .into_par_iter()
        .filter_map(|entry| {
            let path = entry.path();
            if !path.is_dir() {
                return None;
            }

            let id = entry.file_name().to_string_lossy().to_string();
            if defs::RESERVED_IMG_ENTRIES.contains(&id.as_str()) {
                return None;
            }

            if path.join(defs::REMOVE_FILE_NAME).exists() {
                log::info!("Remove module: {id}");
                if let Err(e) = fs::remove_dir_all(&path) {
                    log::warn!("Failed to remove module {id}: {e}");
                }
                return None;
            }
            if path.join(defs::DISABLE_FILE_NAME).exists() {
                log::debug!("Skip disabled module: {id}");
                return None;
            }

            let prop_file =
                Some(path.join(defs::SYSTEM_PROP_FILE_NAME)).filter(|p| p.exists());

            let overlay = path.join(defs::AUTO_MOUNT_FILE_NAME).exists()
                && path.join("system").is_dir();
            if overlay && let Err(e) = expose_vendor_root(&path) {
                log::warn!("vendor link for {id}: {e:#}");
            }

            Some(Module {
                id,
                path,
                overlay,
                prop_file,
            })
        })
        .collect();

    modules.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(modules)
}

/// Give the hoisted vendor tree a uniform entry point: `<mod>/vendor`
/// becomes a symlink to `<mod>/system/vendor`, so `/vendor/...` contract
/// paths resolve on the module side the same way `/system/...` ones do.
fn expose_vendor_root(module_path: &Path) -> Result<()> {
    let inner = module_path.join("system/vendor");
    if !inner.exists() {
        return Ok(());
    }

    let link = module_path.join("vendor");
    if let Ok(meta) = link.symlink_metadata() {
        if meta.is_dir() {
            // A real directory here is module breakage; leave it alone.
            return Ok(());
        }
        fs::remove_file(&link)?;
    }
    symlink(&inner, &link)?;
    Ok(())
}

#[derive(Default)]
struct ModuleProp {
    name: String,
    version: String,
    author: String,
    description: String,
}

impl From<&Path> for ModuleProp {
    fn from(path: &Path) -> Self {
        let mut prop = ModuleProp::default();
        let re = MODULE_PROP_REGEX.get_or_init(|| {
            Regex::new(r"^([a-zA-Z0-9_.]+)=(.*)$").expect("Failed to compile module prop regex")
        });

        if let Ok(file) = fs::File::open(path) {
            for line in BufReader::new(file).lines().map_while(Result::ok) {
                if let Some(caps) = re.captures(line.trim()) {
                    let k = caps.get(1).map_or("", |m| m.as_str());
                    let v = caps.get(2).map_or("", |m| m.as_str());

                    match k {
                        "name" => prop.name = v.to_string(),
                        "version" => prop.version = v.to_string(),
                        "author" => prop.author = v.to_string(),
                        "description" => prop.description = v.to_string(),
                        _ => {}
                    }
                }
            }
        }
        prop
    }
}

#[derive(Serialize)]
struct ModuleInfo {
    id: String,
    name: String,
    version: String,
    author: String,
    description: String,
    overlay: bool,
    mounted: bool,
}

impl ModuleInfo {
    fn new(m: Module, mounted_set: &HashSet<&str>) -> Self {
        let prop = ModuleProp::from(m.path.join(defs::MODULE_PROP_FILE_NAME).as_path());
        Self {
            mounted: mounted_set.contains(m.id.as_str()),
            id: m.id,
            name: prop.name,
            version: prop.version,
            author: prop.author,
            description: prop.description,
            overlay: m.overlay,
        }
    }
}

pub fn print_list(mount_point: &Path) -> Result<()> {
    let modules = scan(mount_point)?;

    let state = RuntimeState::load().unwrap_or_default();
    let mounted_set: HashSet<&str> = state.overlay_modules.iter().map(|s| s.as_str()).collect();

    let infos: Vec<ModuleInfo> = modules
        .into_iter()
        .map(|m| ModuleInfo::new(m, &mounted_set))
        .collect();
    println!("{}", serde_json::to_string(&infos)?);
    Ok(())
}
