// Copyright 2026 Modmount Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    path::Path,
    process::{Command, Stdio},
};

use anyhow::{Context, Result};

/// Run a shell script to completion. Non-zero exits are logged, not
/// propagated.
pub fn run_script<P: AsRef<Path>>(script: P) -> Result<()> {
    let script = script.as_ref();
    let status = Command::new("sh")
        .arg(script)
        .stdin(Stdio::null())
        .status()
        .with_context(|| format!("Failed to exec sh {}", script.display()))?;

    if !status.success() {
        log::warn!("script {} exited with {}", script.display(), status);
    }
    Ok(())
}

/// Spawn a shell command and leave it running.
pub fn spawn_detached_shell(cmdline: &str, env: &[(&str, &str)]) -> Result<()> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(cmdline).stdin(Stdio::null());
    for (k, v) in env {
        cmd.env(k, v);
    }
    cmd.spawn()
        .with_context(|| format!("Failed to spawn: {cmdline}"))?;
    Ok(())
}

pub fn getprop(name: &str) -> Option<String> {
    let output = Command::new("getprop").arg(name).output().ok()?;
    let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if value.is_empty() { None } else { Some(value) }
}

pub fn setprop(name: &str, value: &str) {
    let done = Command::new("resetprop")
        .args([name, value])
        .status()
        .map(|s| s.success())
        .unwrap_or(false);
    if !done
        && let Err(e) = Command::new("setprop").args([name, value]).status()
    {
        log::warn!("setprop {name}={value} failed: {e}");
    }
}

/// Hand a module prop file to the property injector.
pub fn load_prop_file<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    let status = Command::new("resetprop")
        .arg("--file")
        .arg(path)
        .status()
        .with_context(|| format!("Failed to exec resetprop --file {}", path.display()))?;
    if !status.success() {
        log::warn!("resetprop --file {} exited with {}", path.display(), status);
    }
    Ok(())
}

/// Install an APK through the package manager. Returns false while pm is not
/// up yet (its output contains "Error:").
pub fn pm_install<P: AsRef<Path>>(apk: P) -> Result<bool> {
    let output = Command::new("sh")
        .arg("-c")
        .arg(format!("pm install -r {}", apk.as_ref().display()))
        .output()
        .context("Failed to exec pm install")?;

    let combined = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    Ok(!combined.contains("Error:"))
}
