// Copyright 2026 Modmount Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
    thread,
    time::Duration,
};

use anyhow::Result;

use crate::{
    conf::config::Config,
    core::{
        image,
        modules::{self, Module},
        scripts,
        state::RuntimeState,
        workers::Workers,
    },
    defs,
    mount::{
        magic::magic_mount,
        mirror,
        node::{MountEnv, Node, construct_tree, hoist_vendor},
        simple::simple_mount,
    },
    utils,
};

/// State shared by the stage threads. The module list is produced at
/// post-fs-data and consumed (then released) at late-start.
pub struct StageContext {
    pub config: Config,
    pub modules: Mutex<Vec<Module>>,
    pub workers: Mutex<Workers>,
}

impl StageContext {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            modules: Mutex::new(Vec::new()),
            workers: Mutex::new(Workers::default()),
        }
    }

    pub fn workers(&self) -> MutexGuard<'_, Workers> {
        self.workers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn modules(&self) -> MutexGuard<'_, Vec<Module>> {
        self.modules
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// One-shot creator of the init handshake file. Releasing twice is a no-op;
/// init only ever sees a single unblock per stage.
pub struct Unblocker {
    path: PathBuf,
    released: bool,
}

impl Unblocker {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            released: false,
        }
    }

    pub fn release(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = utils::touch_file(&self.path) {
            log::error!("Failed to unblock boot: {e:#}");
        }
        self.released = true;
    }
}

pub fn post_fs(ctx: &StageContext) {
    log::info!("** post-fs mode running");
    let mut unblocker = Unblocker::new(defs::UNBLOCK_FILE);

    if let Err(e) = ctx.workers().spawn_log_monitor(Path::new(defs::DEBUG_LOG)) {
        log::warn!("log monitor: {e:#}");
    }

    // Uninstall or core-only mode: nothing to mount this early.
    if !Path::new(defs::UNINSTALLER).exists() && !Path::new(defs::DISABLE_FILE).exists() {
        let cache = Path::new(defs::CACHE_MOUNT);
        let live_root = Path::new("/");
        for root in ["/system", "/vendor"] {
            if let Err(e) = simple_mount(cache, live_root, Path::new(root)) {
                log::error!("simple mount {root}: {e:#}");
            }
        }
    }

    unblocker.release();
}

pub fn post_fs_data(ctx: &StageContext) {
    if Path::new(defs::LATE_LOG_MARKER).exists()
        && let Err(e) = ctx.workers().spawn_log_monitor(Path::new(defs::DEBUG_LOG))
    {
        log::warn!("log monitor: {e:#}");
    }

    log::info!("** post-fs-data mode running");
    let mut unblocker = Unblocker::new(defs::UNBLOCK_FILE);

    if !mirror::is_mounted("/data") {
        log::warn!("/data is not mounted yet, skipping module load");
        unblocker.release();
        return;
    }

    // /data is up: move off the cache boot log.
    if let Err(e) = utils::redirect_log_file(&ctx.config.daemon_log_file) {
        log::warn!("log redirect: {e:#}");
    }

    if Path::new(defs::UNINSTALLER).exists() {
        unblocker.release();
        if let Err(e) = utils::spawn_detached_shell(
            &format!("sh {}", defs::UNINSTALLER),
            &[("BOOTMODE", "true")],
        ) {
            log::error!("uninstaller: {e:#}");
        }
        return;
    }

    if let Err(e) = load_modules(ctx) {
        log::error!("post-fs-data failed: {e:#}");
    }
    unblocker.release();
}

fn load_modules(ctx: &StageContext) -> Result<()> {
    let cfg = &ctx.config;

    for img in &cfg.staging_imgs {
        image::merge_image(img, &cfg.main_img)?;
    }

    let mut new_img = false;
    if !cfg.main_img.exists() {
        image::create_image(&cfg.main_img, defs::NEW_IMG_SIZE_MB)?;
        new_img = true;
    }

    log::info!("* Mounting {}", cfg.main_img.display());
    let image_mount = image::mount_image(&cfg.main_img, &cfg.mount_point)?;

    let core_dir = cfg.core_dir();
    if new_img {
        for dir in ["", "post-fs-data.d", "service.d", "props"] {
            utils::ensure_dir_exists(core_dir.join(dir))?;
        }
    }

    ctx.workers().spawn_sepolicy(&core_dir);

    log::info!("* Running post-fs-data.d scripts");
    scripts::exec_common_scripts(&core_dir, "post-fs-data")?;

    if Path::new(defs::DISABLE_FILE).exists() {
        log::info!("* Core-only mode, skipping overlay");
        RuntimeState {
            core_only: true,
            ..Default::default()
        }
        .save()?;
        finish_data_stage(ctx, &core_dir);
        return Ok(());
    }

    log::info!("* Loading modules");
    let module_list = modules::scan(&cfg.mount_point)?;
    for module in &module_list {
        if let Some(prop) = &module.prop_file {
            log::info!("{}: loading [system.prop]", module.id);
            if let Err(e) = utils::load_prop_file(prop) {
                log::warn!("{}: {e:#}", module.id);
            }
        }
    }

    let env = MountEnv::from_defs(&cfg.mount_point);
    let mut sys_root = Node::new_root("/system");
    let mut has_modules = false;
    for module in module_list.iter().filter(|m| m.overlay) {
        log::info!("{}: constructing magic mount structure", module.id);
        construct_tree(&env, &module.id, &mut sys_root, Path::new("/system"))?;
        has_modules = true;
    }

    // Trim the image to fit while nothing holds it, then bring it back for
    // the rest of the boot.
    image_mount.unmount()?;
    image::trim_image(&cfg.main_img)?;
    let _resident = image::mount_image(&cfg.main_img, &cfg.mount_point)?;

    if has_modules {
        log::info!("* Mounting system/vendor mirrors");
        let separate_vendor = mirror::mount_mirrors(&env.mirror_dir)?;

        let ven_root = hoist_vendor(&mut sys_root, separate_vendor);

        magic_mount(&env, &mut sys_root, Path::new(""), cfg.strict_mount)?;
        if let Some(mut ven) = ven_root {
            magic_mount(&env, &mut ven, Path::new(""), cfg.strict_mount)?;
        }
    }
    // The tree has no role once the namespace is populated; drop it.
    drop(sys_root);

    log::info!("* Running module post-fs-data scripts");
    scripts::exec_module_scripts(&module_list, "post-fs-data");

    let state = RuntimeState {
        core_only: false,
        modules: module_list.iter().map(|m| m.id.clone()).collect(),
        overlay_modules: module_list
            .iter()
            .filter(|m| m.overlay)
            .map(|m| m.id.clone())
            .collect(),
    };
    if let Err(e) = state.save() {
        log::warn!("runtime state: {e:#}");
    }

    *ctx.modules() = module_list;

    finish_data_stage(ctx, &core_dir);
    Ok(())
}

/// Tail work shared by the overlay and core-only paths.
fn finish_data_stage(ctx: &StageContext, core_dir: &Path) {
    let hosts = core_dir.join("hosts");
    if hosts.exists() {
        log::info!("* Enabling systemless hosts support");
        if let Err(e) = utils::bind_mount(&hosts, Path::new("/system/etc/hosts")) {
            log::error!("systemless hosts: {e:#}");
        }
    }

    // Hiding defaults to on; only an explicit 0 disables it.
    if utils::getprop(defs::HIDE_PROP).as_deref() != Some("0") {
        ctx.workers().spawn_hide(core_dir);
    }
}

pub fn late_start(ctx: &StageContext) {
    log::info!("** late_start service mode running");

    // Service scripts rely on the finished policy patch.
    ctx.workers().join_sepolicy();

    let core_dir = ctx.config.core_dir();
    log::info!("* Running service.d scripts");
    if let Err(e) = scripts::exec_common_scripts(&core_dir, "service") {
        log::warn!("service.d: {e:#}");
    }

    if Path::new(defs::DISABLE_FILE).exists() {
        utils::setprop(defs::DISABLE_PROP, "1");
        return;
    }

    {
        let module_list = ctx.modules();
        log::info!("* Running module service scripts");
        scripts::exec_module_scripts(&module_list, "service");
    }

    install_manager(&ctx.config);

    // Boot is done; the module list has served its purpose.
    ctx.modules().clear();
}

fn install_manager(cfg: &Config) {
    let apk = Path::new(defs::MANAGER_APK);
    if !apk.exists() {
        return;
    }

    for attempt in 1..=cfg.manager_install_retries {
        thread::sleep(Duration::from_secs(5));
        match utils::pm_install(apk) {
            Ok(true) => {
                log::info!("Manager package installed");
                if let Err(e) = fs::remove_file(apk) {
                    log::warn!("Failed to remove {}: {e}", apk.display());
                }
                return;
            }
            Ok(false) => log::debug!("package manager not up yet (attempt {attempt})"),
            Err(e) => log::warn!("pm install: {e:#}"),
        }
    }
    log::warn!("Giving up on the manager install; package manager never came up");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unblock_is_idempotent() {
        let path = std::env::temp_dir().join(format!("modmount-unblock-{}", std::process::id()));
        let _ = fs::remove_file(&path);

        let mut unblocker = Unblocker::new(&path);
        unblocker.release();
        assert!(path.exists());

        // A second release must not recreate the handshake file.
        fs::remove_file(&path).unwrap();
        unblocker.release();
        assert!(!path.exists());
    }
}
