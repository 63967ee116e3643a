// Copyright 2026 Modmount Developers
// SPDX-License-Identifier: GPL-3.0-or-later

pub const MOUNT_POINT: &str = "/modmount";
pub const MIRR_DIR: &str = "/dev/modmount/mirror";
pub const DUMMY_DIR: &str = "/dev/modmount/dummy";
pub const MAIN_IMG: &str = "/data/modmount.img";
pub const MERGE_IMG: &str = "/data/modmount_merge.img";
pub const CACHE_IMG: &str = "/cache/modmount.img";
pub const CACHE_MOUNT: &str = "/cache/modmount_mount";
pub const UNBLOCK_FILE: &str = "/dev/.modmount.unblock";
pub const DISABLE_FILE: &str = "/cache/.disable_modmount";
pub const UNINSTALLER: &str = "/cache/modmount_uninstaller.sh";
pub const MANAGER_APK: &str = "/data/modmount.apk";
pub const LATE_LOG_MARKER: &str = "/data/modmount_debug";
pub const SOCKET_PATH: &str = "/dev/.modmount.sock";
pub const STATE_FILE: &str = "/dev/.modmount_state.json";

pub const BOOT_LOG_FILE: &str = "/cache/modmount.log";
pub const DAEMON_LOG_FILE: &str = "/data/adb/modmount/daemon.log";
pub const DEBUG_LOG: &str = "/cache/modmount_debug.log";
pub const CONFIG_FILE: &str = "/data/adb/modmount/config.toml";

pub const REMOVE_FILE_NAME: &str = "remove";
pub const DISABLE_FILE_NAME: &str = "disable";
pub const AUTO_MOUNT_FILE_NAME: &str = "auto_mount";
pub const REPLACE_DIR_FILE_NAME: &str = ".replace";
pub const MODULE_PROP_FILE_NAME: &str = "module.prop";
pub const SYSTEM_PROP_FILE_NAME: &str = "system.prop";

pub const DISABLE_PROP: &str = "ro.modmount.disable";
pub const HIDE_PROP: &str = "persist.modmount.hide";

// Entries at the image top level that are never modules.
pub const RESERVED_IMG_ENTRIES: &[&str] = &[".core", "lost+found"];

// Fresh images are created at this size and then trimmed to fit.
pub const NEW_IMG_SIZE_MB: u64 = 64;

pub const STAGE_POST_FS: u32 = 1;
pub const STAGE_POST_FS_DATA: u32 = 2;
pub const STAGE_LATE_START: u32 = 3;
