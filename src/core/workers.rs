// Copyright 2026 Modmount Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    fs::File,
    path::Path,
    process::{Child, Command, Stdio},
};

use anyhow::{Context, Result};

/// Long-lived helper processes owned by the daemon. Nothing here is
/// fire-and-forget: every child is tracked so the daemon can wait for or
/// stop it at stage boundaries and shutdown.
#[derive(Default)]
pub struct Workers {
    sepolicy: Option<Child>,
    log_monitor: Option<Child>,
    hide: Option<Child>,
}

impl Workers {
    /// Kick off the policy-patch helper. late-start waits for it before
    /// running service scripts.
    pub fn spawn_sepolicy(&mut self, core_dir: &Path) {
        if self.sepolicy.is_some() {
            return;
        }
        let script = core_dir.join("sepolicy.sh");
        if !script.exists() {
            return;
        }
        match Command::new("sh").arg(&script).stdin(Stdio::null()).spawn() {
            Ok(child) => {
                log::info!("sepolicy helper running [{}]", script.display());
                self.sepolicy = Some(child);
            }
            Err(e) => log::warn!("Failed to spawn sepolicy helper: {e}"),
        }
    }

    pub fn join_sepolicy(&mut self) {
        if let Some(mut child) = self.sepolicy.take() {
            match child.wait() {
                Ok(status) => log::debug!("sepolicy helper exited with {status}"),
                Err(e) => log::warn!("sepolicy helper wait failed: {e}"),
            }
        }
    }

    /// Capture logcat into the debug log until shutdown.
    pub fn spawn_log_monitor(&mut self, log_path: &Path) -> Result<()> {
        if self.log_monitor.is_some() {
            return Ok(());
        }
        let sink = File::create(log_path)
            .with_context(|| format!("Failed to create {}", log_path.display()))?;
        let child = Command::new("logcat")
            .args(["-v", "brief"])
            .stdin(Stdio::null())
            .stdout(sink)
            .spawn()
            .context("Failed to spawn logcat")?;
        self.log_monitor = Some(child);
        Ok(())
    }

    /// Start the hide helper when present.
    pub fn spawn_hide(&mut self, core_dir: &Path) {
        if self.hide.is_some() {
            return;
        }
        let helper = core_dir.join("hide");
        if !helper.exists() {
            return;
        }
        match Command::new(&helper).stdin(Stdio::null()).spawn() {
            Ok(child) => {
                log::info!("hide helper running");
                self.hide = Some(child);
            }
            Err(e) => log::warn!("Failed to spawn hide helper: {e}"),
        }
    }

    pub fn shutdown(&mut self) {
        self.join_sepolicy();
        for child in [self.log_monitor.take(), self.hide.take()].into_iter().flatten() {
            let mut child = child;
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
