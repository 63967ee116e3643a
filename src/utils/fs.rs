use std::{
    ffi::CString,
    fs::{self, File},
    os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt, symlink},
    path::Path,
};

use anyhow::{Context, Result};
#[cfg(any(target_os = "linux", target_os = "android"))]
use extattr::{Flags as XattrFlags, lgetxattr, lsetxattr};
use rustix::{
    fs::{AtFlags, CWD, Gid, Mode, Timespec, Timestamps, Uid, chmod, chownat, utimensat},
    mount::mount_bind,
};
use walkdir::WalkDir;

const SELINUX_XATTR: &str = "security.selinux";

pub fn ensure_dir_exists<T: AsRef<Path>>(dir: T) -> Result<()> {
    if !dir.as_ref().exists() {
        fs::create_dir_all(&dir)?;
    }
    Ok(())
}

pub fn touch_file<P: AsRef<Path>>(path: P) -> Result<()> {
    File::create(path.as_ref())
        .map(|_| ())
        .with_context(|| format!("Failed to create {}", path.as_ref().display()))
}

/// Tolerant recursive delete. Missing paths are not an error.
pub fn rm_rf<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    match path.symlink_metadata() {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path)?,
        Ok(_) => fs::remove_file(path)?,
        Err(_) => {}
    }
    Ok(())
}

pub fn bind_mount<S: AsRef<Path>, D: AsRef<Path>>(src: S, dst: D) -> Result<()> {
    log::info!("bind: {} -> {}", src.as_ref().display(), dst.as_ref().display());
    mount_bind(src.as_ref(), dst.as_ref()).with_context(|| {
        format!(
            "Failed to bind {} over {}",
            src.as_ref().display(),
            dst.as_ref().display()
        )
    })
}

pub fn lsetfilecon<P: AsRef<Path>>(path: P, con: &str) -> Result<()> {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        if let Err(e) = lsetxattr(
            path.as_ref(),
            SELINUX_XATTR,
            con.as_bytes(),
            XattrFlags::empty(),
        ) {
            let io_err = std::io::Error::from(e);
            log::debug!(
                "lsetfilecon: {} -> {} failed: {}",
                path.as_ref().display(),
                con,
                io_err
            );
        }
    }
    Ok(())
}

#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn lgetfilecon<P: AsRef<Path>>(path: P) -> Result<String> {
    let con = lgetxattr(path.as_ref(), SELINUX_XATTR).with_context(|| {
        format!(
            "Failed to get SELinux context for {}",
            path.as_ref().display()
        )
    })?;
    let con_str = String::from_utf8_lossy(&con).trim_matches('\0').to_string();

    Ok(con_str)
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub fn lgetfilecon<P: AsRef<Path>>(_path: P) -> Result<String> {
    unimplemented!();
}

fn timestamps_of(meta: &fs::Metadata) -> Timestamps {
    Timestamps {
        last_access: Timespec {
            tv_sec: meta.atime(),
            tv_nsec: meta.atime_nsec() as _,
        },
        last_modification: Timespec {
            tv_sec: meta.mtime(),
            tv_nsec: meta.mtime_nsec() as _,
        },
    }
}

/// Copy mode, ownership, SELinux label and timestamps from `src` onto `dst`.
/// Content is untouched.
pub fn clone_attr<S: AsRef<Path>, D: AsRef<Path>>(src: S, dst: D) -> Result<()> {
    let (src, dst) = (src.as_ref(), dst.as_ref());
    let meta = src
        .symlink_metadata()
        .with_context(|| format!("Failed to stat {}", src.display()))?;

    if !meta.file_type().is_symlink() {
        chmod(dst, Mode::from_raw_mode(meta.permissions().mode()))
            .with_context(|| format!("Failed to chmod {}", dst.display()))?;
    }
    chownat(
        CWD,
        dst,
        Some(Uid::from_raw(meta.uid())),
        Some(Gid::from_raw(meta.gid())),
        AtFlags::SYMLINK_NOFOLLOW,
    )
    .with_context(|| format!("Failed to chown {}", dst.display()))?;

    if let Ok(con) = lgetfilecon(src) {
        lsetfilecon(dst, &con)?;
    }

    if let Err(e) = utimensat(CWD, dst, &timestamps_of(&meta), AtFlags::SYMLINK_NOFOLLOW) {
        log::debug!("clone_attr: timestamps for {}: {}", dst.display(), e);
    }
    Ok(())
}

/// Recreate the symlink at `src` as `dst`, carrying its SELinux label and
/// ownership over.
pub fn clone_symlink<S: AsRef<Path>, D: AsRef<Path>>(src: S, dst: D) -> Result<()> {
    let (src, dst) = (src.as_ref(), dst.as_ref());
    let target = fs::read_link(src)
        .with_context(|| format!("Failed to read link {}", src.display()))?;
    if dst.symlink_metadata().is_ok() {
        fs::remove_file(dst)?;
    }
    symlink(&target, dst)
        .with_context(|| format!("Failed to link {} -> {}", dst.display(), target.display()))?;
    clone_attr(src, dst)?;
    log::info!("cplink: {} -> {}", src.display(), dst.display());
    Ok(())
}

fn make_device_node(path: &Path, mode: u32, rdev: u64) -> Result<()> {
    let c_path = CString::new(path.as_os_str().as_encoded_bytes())?;
    let dev = rdev as libc::dev_t;
    unsafe {
        if libc::mknod(c_path.as_ptr(), mode as libc::mode_t, dev) != 0 {
            let err = std::io::Error::last_os_error();
            anyhow::bail!("mknod failed for {}: {}", path.display(), err);
        }
    }
    Ok(())
}

/// Attribute-preserving recursive copy of `src` into `dst`. Existing entries
/// in `dst` are overwritten file by file.
pub fn clone_dir<S: AsRef<Path>, D: AsRef<Path>>(src: S, dst: D) -> Result<()> {
    let (src, dst) = (src.as_ref(), dst.as_ref());
    ensure_dir_exists(dst)?;

    for entry in WalkDir::new(src).min_depth(1).into_iter().filter_map(|e| e.ok()) {
        let rel = entry
            .path()
            .strip_prefix(src)
            .context("walked outside the clone root")?;
        let target = dst.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            ensure_dir_exists(&target)?;
            clone_attr(entry.path(), &target)?;
        } else if file_type.is_symlink() {
            clone_symlink(entry.path(), &target)?;
        } else if file_type.is_char_device() || file_type.is_block_device() || file_type.is_fifo()
        {
            let meta = entry.metadata()?;
            if target.symlink_metadata().is_ok() {
                fs::remove_file(&target)?;
            }
            make_device_node(&target, meta.permissions().mode(), meta.rdev())?;
            clone_attr(entry.path(), &target)?;
        } else {
            if target.symlink_metadata().is_ok() {
                fs::remove_file(&target)?;
            }
            fs::copy(entry.path(), &target).with_context(|| {
                format!(
                    "Failed to copy {} -> {}",
                    entry.path().display(),
                    target.display()
                )
            })?;
            clone_attr(entry.path(), &target)?;
        }
    }
    Ok(())
}

pub fn is_executable(meta: &fs::Metadata) -> bool {
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("modmount-fs-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn clone_dir_carries_structure_and_links() {
        let root = scratch("clone");
        let src = root.join("src");
        let dst = root.join("dst");
        fs::create_dir_all(src.join("sub")).unwrap();
        fs::write(src.join("sub/file.conf"), b"payload").unwrap();
        symlink("sub/file.conf", src.join("link")).unwrap();
        // A stale file in the target must be replaced, not appended to.
        fs::create_dir_all(&dst).unwrap();
        fs::write(dst.join("link"), b"stale").unwrap();

        clone_dir(&src, &dst).unwrap();

        assert_eq!(fs::read(dst.join("sub/file.conf")).unwrap(), b"payload");
        let link = dst.join("link");
        assert!(link.symlink_metadata().unwrap().file_type().is_symlink());
        assert_eq!(fs::read_link(&link).unwrap(), PathBuf::from("sub/file.conf"));

        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn rm_rf_swallows_missing_paths() {
        let root = scratch("rmrf");
        rm_rf(root.join("not-there")).unwrap();
        fs::write(root.join("file"), b"x").unwrap();
        rm_rf(root.join("file")).unwrap();
        assert!(!root.join("file").exists());
        fs::remove_dir_all(root).unwrap();
    }
}
