// Copyright 2026 Modmount Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::defs;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub verbose: bool,
    /// Promote individual bind failures during materialisation to
    /// stage-fatal. Off by default: a partial overlay beats a bootloop.
    #[serde(default)]
    pub strict_mount: bool,
    #[serde(default = "default_manager_install_retries")]
    pub manager_install_retries: u32,
    #[serde(default = "default_mount_point")]
    pub mount_point: PathBuf,
    #[serde(default = "default_main_img")]
    pub main_img: PathBuf,
    /// Staging images merged into the main image at post-fs-data, in order.
    #[serde(default = "default_staging_imgs")]
    pub staging_imgs: Vec<PathBuf>,
    /// Boot log, writable before `/data` comes up.
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
    /// Steady-state log, adopted once `/data` is mounted.
    #[serde(default = "default_daemon_log_file")]
    pub daemon_log_file: PathBuf,
}

fn default_manager_install_retries() -> u32 {
    60
}

fn default_mount_point() -> PathBuf {
    PathBuf::from(defs::MOUNT_POINT)
}

fn default_main_img() -> PathBuf {
    PathBuf::from(defs::MAIN_IMG)
}

fn default_staging_imgs() -> Vec<PathBuf> {
    vec![PathBuf::from(defs::CACHE_IMG), PathBuf::from(defs::MERGE_IMG)]
}

fn default_log_file() -> PathBuf {
    PathBuf::from(defs::BOOT_LOG_FILE)
}

fn default_daemon_log_file() -> PathBuf {
    PathBuf::from(defs::DAEMON_LOG_FILE)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            verbose: false,
            strict_mount: false,
            manager_install_retries: default_manager_install_retries(),
            mount_point: default_mount_point(),
            main_img: default_main_img(),
            staging_imgs: default_staging_imgs(),
            log_file: default_log_file(),
            daemon_log_file: default_daemon_log_file(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).context("failed to read config file")?;

        let config: Config = toml::from_str(&content).context("failed to parse config file")?;

        Ok(config)
    }

    pub fn load_default() -> Result<Self> {
        Self::from_file(defs::CONFIG_FILE)
    }

    pub fn merge_with_cli(&mut self, verbose: bool) {
        if verbose {
            self.verbose = true;
        }
    }

    /// The `.core` directory inside the mounted image: common script dirs,
    /// the props store and the optional helpers live here.
    pub fn core_dir(&self) -> PathBuf {
        self.mount_point.join(".core")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_takes_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.mount_point, PathBuf::from(defs::MOUNT_POINT));
        assert_eq!(config.manager_install_retries, 60);
        assert!(!config.strict_mount);
        assert_eq!(config.staging_imgs.len(), 2);
        assert_eq!(config.log_file, PathBuf::from(defs::BOOT_LOG_FILE));
        assert_eq!(config.daemon_log_file, PathBuf::from(defs::DAEMON_LOG_FILE));
    }

    #[test]
    fn overrides_stick() {
        let config: Config = toml::from_str(
            "mount_point = \"/tmp/mnt\"\nstrict_mount = true\nmanager_install_retries = 3\n",
        )
        .unwrap();
        assert_eq!(config.mount_point, PathBuf::from("/tmp/mnt"));
        assert!(config.strict_mount);
        assert_eq!(config.manager_install_retries, 3);

        let mut config = config;
        config.merge_with_cli(true);
        assert!(config.verbose);
    }
}
