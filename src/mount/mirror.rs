// Copyright 2026 Modmount Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{fs, os::unix::fs::symlink, path::Path};

use anyhow::{Context, Result};
use procfs::process::Process;
use rustix::mount::{MountFlags, mount};

use crate::utils::ensure_dir_exists;

/// Block devices backing the live partitions, as listed by the mount table.
#[derive(Debug, Default, PartialEq)]
pub struct MirrorSources {
    pub system: Option<String>,
    pub vendor: Option<String>,
}

impl MirrorSources {
    pub fn separate_vendor(&self) -> bool {
        self.vendor.is_some()
    }
}

/// Pick the first entries whose mount point is exactly `/system` or
/// `/vendor` out of `/proc/mounts`-shaped lines.
pub fn recognise<'a, I>(lines: I) -> MirrorSources
where
    I: IntoIterator<Item = &'a str>,
{
    let mut sources = MirrorSources::default();
    for line in lines {
        let mut fields = line.split_whitespace();
        let (Some(device), Some(mount_point)) = (fields.next(), fields.next()) else {
            continue;
        };
        match mount_point {
            "/system" if sources.system.is_none() => sources.system = Some(device.to_string()),
            "/vendor" if sources.vendor.is_none() => sources.vendor = Some(device.to_string()),
            _ => {}
        }
    }
    sources
}

fn scan_mount_table() -> Result<MirrorSources> {
    if let Ok(process) = Process::myself()
        && let Ok(mountinfo) = process.mountinfo()
    {
        let mut sources = MirrorSources::default();
        for m in mountinfo {
            let point = m.mount_point.to_string_lossy();
            let device = m.mount_source.clone().unwrap_or_default();
            if point == "/system" && sources.system.is_none() {
                sources.system = Some(device);
            } else if point == "/vendor" && sources.vendor.is_none() {
                sources.vendor = Some(device);
            }
        }
        return Ok(sources);
    }

    let content = fs::read_to_string("/proc/mounts").context("Failed to read /proc/mounts")?;
    Ok(recognise(content.lines()))
}

pub fn is_mounted<P: AsRef<Path>>(path: P) -> bool {
    let path_str = path.as_ref().to_string_lossy();
    let search = path_str.trim_end_matches('/');

    if let Ok(process) = Process::myself()
        && let Ok(mountinfo) = process.mountinfo()
    {
        return mountinfo
            .into_iter()
            .any(|m| m.mount_point.to_string_lossy() == search);
    }

    if let Ok(content) = fs::read_to_string("/proc/mounts") {
        for line in content.lines() {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() > 1 && parts[1] == search {
                return true;
            }
        }
    }
    false
}

fn mount_one(device: &str, target: &Path) -> Result<()> {
    ensure_dir_exists(target)?;
    mount(
        device,
        target,
        c"ext4",
        MountFlags::RDONLY,
        None::<&std::ffi::CStr>,
    )
    .with_context(|| format!("Failed to mirror {} at {}", device, target.display()))?;
    log::info!("mirror: {} -> {}", device, target.display());
    Ok(())
}

/// Mount read-only mirrors of the live partitions under `mirror_dir`.
/// Returns whether vendor is a separate partition. Without one,
/// `mirror_dir/vendor` becomes a symlink into the system mirror so every
/// later lookup has a uniform path.
pub fn mount_mirrors(mirror_dir: &Path) -> Result<bool> {
    let sources = scan_mount_table()?;
    let system_dev = sources
        .system
        .as_deref()
        .context("no /system entry in the mount table")?;

    mount_one(system_dev, &mirror_dir.join("system"))?;

    if let Some(vendor_dev) = sources.vendor.as_deref() {
        mount_one(vendor_dev, &mirror_dir.join("vendor"))?;
    } else {
        let link = mirror_dir.join("vendor");
        if link.symlink_metadata().is_err() {
            symlink(mirror_dir.join("system/vendor"), &link)
                .context("Failed to link the vendor mirror")?;
        }
        log::info!("mirror: vendor -> system/vendor");
    }

    Ok(sources.separate_vendor())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MOUNTS: &str = "\
rootfs / rootfs ro,seclabel 0 0
tmpfs /dev tmpfs rw,seclabel,nosuid,relatime 0 0
/dev/block/bootdevice/by-name/system /system ext4 ro,seclabel,relatime 0 0
/dev/block/bootdevice/by-name/vendor /vendor ext4 ro,seclabel,relatime 0 0
/dev/block/bootdevice/by-name/userdata /data ext4 rw,seclabel,relatime 0 0";

    #[test]
    fn recognises_system_and_vendor() {
        let sources = recognise(MOUNTS.lines());
        assert_eq!(
            sources.system.as_deref(),
            Some("/dev/block/bootdevice/by-name/system")
        );
        assert_eq!(
            sources.vendor.as_deref(),
            Some("/dev/block/bootdevice/by-name/vendor")
        );
        assert!(sources.separate_vendor());
    }

    #[test]
    fn missing_vendor_is_not_separate() {
        let lines = "/dev/block/sda1 /system ext4 ro 0 0";
        let sources = recognise(lines.lines());
        assert!(sources.system.is_some());
        assert!(!sources.separate_vendor());
    }

    #[test]
    fn first_entry_wins() {
        let lines = "\
/dev/block/sda1 /system ext4 ro 0 0
/dev/block/sdb1 /system ext4 ro 0 0";
        let sources = recognise(lines.lines());
        assert_eq!(sources.system.as_deref(), Some("/dev/block/sda1"));
    }

    #[test]
    fn prefix_mount_points_do_not_match() {
        let lines = "/dev/block/sda1 /system_ext ext4 ro 0 0";
        let sources = recognise(lines.lines());
        assert_eq!(sources, MirrorSources::default());
    }
}
