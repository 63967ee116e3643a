// Copyright 2026 Modmount Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    fs::{self, File},
    path::{Path, PathBuf},
    process::Command,
};

use anyhow::{Context, Result, bail, ensure};
use loopdev::{LoopControl, LoopDevice};
use regex_lite::Regex;
use rustix::mount::{MountFlags, UnmountFlags, mount, unmount};

use crate::{
    defs,
    utils::{clone_dir, ensure_dir_exists, rm_rf},
};

const SOURCE_TMP: &str = "/dev/.modmount_src";
const TARGET_TMP: &str = "/dev/.modmount_dst";

/// Image sizes are managed in MiB, rounded upward to a 32 MiB grid with one
/// spare unit of slack.
pub fn round_size(mb: u64) -> u64 {
    (mb.div_ceil(32) + 2) * 32
}

/// Pull the `used/total blocks` figures out of an `e2fsck -yf` summary.
fn parse_fsck_summary(output: &str) -> Option<(u64, u64)> {
    let re = Regex::new(r"(\d+)/(\d+) blocks").ok()?;
    let caps = re.captures(output)?;
    let used = caps.get(1)?.as_str().parse().ok()?;
    let total = caps.get(2)?.as_str().parse().ok()?;
    Some((used, total))
}

/// Query an image for used and total size in MiB. Runs a forced filesystem
/// check as a side effect, which is what keeps stale journals from breaking
/// the later resize.
pub fn image_size(img: &Path) -> Result<(u64, u64)> {
    let output = Command::new("e2fsck")
        .arg("-yf")
        .arg(img)
        .output()
        .with_context(|| format!("Failed to exec e2fsck {}", img.display()))?;

    if let Some(code) = output.status.code()
        && code > 2
    {
        bail!("e2fsck {} exited with {}", img.display(), code);
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let (used_blocks, total_blocks) = parse_fsck_summary(&stdout)
        .with_context(|| format!("No block summary in e2fsck output for {}", img.display()))?;

    // 1024-byte blocks, see create_image.
    Ok((used_blocks.div_ceil(1024), total_blocks / 1024))
}

pub fn resize_image(img: &Path, size_mb: u64) -> Result<()> {
    log::info!("resize: {} -> {}M", img.display(), size_mb);
    let status = Command::new("resize2fs")
        .arg(img)
        .arg(format!("{size_mb}M"))
        .status()
        .with_context(|| format!("Failed to exec resize2fs {}", img.display()))?;
    ensure!(status.success(), "resize2fs {} failed: {}", img.display(), status);
    Ok(())
}

pub fn create_image(img: &Path, size_mb: u64) -> Result<()> {
    log::info!("create: {} ({size_mb} MiB)", img.display());
    if let Some(parent) = img.parent() {
        ensure_dir_exists(parent)?;
    }

    File::create(img)
        .with_context(|| format!("Failed to create {}", img.display()))?
        .set_len(size_mb * 1024 * 1024)
        .context("Failed to extend image file")?;

    let result = Command::new("mkfs.ext4")
        .args(["-b", "1024"])
        .arg(img)
        .output()
        .context("Failed to exec mkfs.ext4")?;
    ensure!(
        result.status.success(),
        "mkfs.ext4 {} failed: {}",
        img.display(),
        String::from_utf8_lossy(&result.stderr)
    );
    Ok(())
}

/// A loop-mounted image. Held for the duration of the mount and released
/// explicitly; the boot sequence never unwinds implicitly.
pub struct LoopMount {
    pub target: PathBuf,
    pub device: PathBuf,
}

pub fn mount_image(img: &Path, target: &Path) -> Result<LoopMount> {
    ensure_dir_exists(target)?;

    let control = LoopControl::open().context("Failed to open /dev/loop-control")?;
    let device = control.next_free().context("No free loop device")?;
    device
        .attach_file(img)
        .with_context(|| format!("Failed to attach {}", img.display()))?;
    let device_path = device
        .path()
        .context("Unable to resolve the loop device path")?;

    if let Err(e) = mount(
        &device_path,
        target,
        c"ext4",
        MountFlags::empty(),
        None::<&std::ffi::CStr>,
    ) {
        let _ = device.detach();
        return Err(e).with_context(|| {
            format!("Failed to mount {} at {}", img.display(), target.display())
        });
    }

    log::info!(
        "mount: {} ({}) -> {}",
        img.display(),
        device_path.display(),
        target.display()
    );
    Ok(LoopMount {
        target: target.to_path_buf(),
        device: device_path,
    })
}

impl LoopMount {
    pub fn unmount(self) -> Result<()> {
        unmount(&self.target, UnmountFlags::empty())
            .with_context(|| format!("Failed to unmount {}", self.target.display()))?;
        LoopDevice::open(&self.device)
            .and_then(|d| d.detach())
            .with_context(|| format!("Failed to detach {}", self.device.display()))?;
        Ok(())
    }
}

fn free_space_mb(path: &Path) -> Result<u64> {
    let stat = rustix::fs::statvfs(path)
        .with_context(|| format!("Failed to statvfs {}", path.display()))?;
    Ok(stat.f_bavail * stat.f_frsize / (1024 * 1024))
}

/// Merge a staging image into the main image. A missing source is a no-op;
/// a missing target is claimed by rename. Modules present in both are
/// upgraded: the target copy is dropped before the clone.
pub fn merge_image(src: &Path, dst: &Path) -> Result<()> {
    if !src.exists() {
        return Ok(());
    }
    if !dst.exists() {
        log::info!("merge: adopting {} as {}", src.display(), dst.display());
        fs::rename(src, dst)
            .with_context(|| format!("Failed to rename {} -> {}", src.display(), dst.display()))?;
        return Ok(());
    }

    let (s_used, _) = image_size(src)?;
    let (t_used, t_total) = image_size(dst)?;
    let n_total = round_size(s_used + t_used);
    if n_total > t_total {
        let needed = n_total - t_total;
        let free = free_space_mb(dst.parent().unwrap_or(Path::new("/")))?;
        ensure!(
            free >= needed,
            "not enough space to grow {}: need {needed} MiB, {free} MiB free",
            dst.display()
        );
    }
    if n_total != t_total {
        resize_image(dst, n_total)?;
    }

    ensure_dir_exists(SOURCE_TMP)?;
    ensure_dir_exists(TARGET_TMP)?;
    let src_mount = mount_image(src, Path::new(SOURCE_TMP))?;
    let dst_mount = match mount_image(dst, Path::new(TARGET_TMP)) {
        Ok(m) => m,
        Err(e) => {
            let _ = src_mount.unmount();
            return Err(e);
        }
    };

    let result = (|| -> Result<()> {
        for entry in fs::read_dir(SOURCE_TMP)?.flatten() {
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if defs::RESERVED_IMG_ENTRIES.contains(&name.as_str()) {
                continue;
            }
            let target = Path::new(TARGET_TMP).join(&name);
            if target.exists() {
                log::info!("Upgrade module: {name}");
                rm_rf(&target)?;
            } else {
                log::info!("New module: {name}");
            }
        }
        clone_dir(SOURCE_TMP, TARGET_TMP)
    })();

    src_mount.unmount()?;
    dst_mount.unmount()?;
    let _ = fs::remove_dir(SOURCE_TMP);
    let _ = fs::remove_dir(TARGET_TMP);
    result?;

    fs::remove_file(src).with_context(|| format!("Failed to remove {}", src.display()))?;
    Ok(())
}

/// Shrink an image to its rounded used size.
pub fn trim_image(img: &Path) -> Result<()> {
    let (used, total) = image_size(img)?;
    let new_size = round_size(used);
    if new_size != total {
        resize_image(img, new_size)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding_climbs_the_32_mib_grid() {
        assert_eq!(round_size(0), 64);
        assert_eq!(round_size(1), 96);
        assert_eq!(round_size(32), 96);
        assert_eq!(round_size(33), 128);
        // 10 MiB staged + 20 MiB resident round up to three units.
        assert_eq!(round_size(30), 96);
    }

    #[test]
    fn fsck_summary_yields_block_counts() {
        let output = "\
e2fsck 1.47.0 (5-Feb-2023)
Pass 1: Checking inodes, blocks, and sizes
Pass 5: Checking group summary information
/data/modmount.img: 137/16384 files (0.7% non-contiguous), 20770/65536 blocks
";
        assert_eq!(parse_fsck_summary(output), Some((20770, 65536)));
    }

    #[test]
    fn fsck_summary_requires_the_block_line() {
        assert_eq!(parse_fsck_summary("e2fsck: no such file"), None);
    }
}
