// Copyright 2026 Modmount Developers
// SPDX-License-Identifier: GPL-3.0-or-later
mod conf;
mod core;
mod defs;
mod mount;
mod utils;

use anyhow::{Context, Result};
use clap::Parser;
use conf::{
    cli::{Cli, Commands},
    config::Config,
};
use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn load_config(cli: &Cli) -> Result<Config> {
    if let Some(config_path) = &cli.config {
        return Config::from_file(config_path).with_context(|| {
            format!(
                "Failed to load config from custom path: {}",
                config_path.display()
            )
        });
    }

    match Config::load_default() {
        Ok(config) => Ok(config),
        Err(e) => {
            let is_not_found = e
                .root_cause()
                .downcast_ref::<std::io::Error>()
                .map(|io_err| io_err.kind() == std::io::ErrorKind::NotFound)
                .unwrap_or(false);

            if is_not_found {
                Ok(Config::default())
            } else {
                Err(e).context(format!(
                    "Failed to load default config from {}",
                    defs::CONFIG_FILE
                ))
            }
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(&cli)?;
    config.merge_with_cli(cli.verbose);

    match cli.command {
        Commands::Daemon => {
            let _log_guard = utils::init_logging(config.verbose, Some(&config.log_file))
                .context("Failed to initialize logging")?;

            tracing::info!(">> Initializing modmount daemon...");
            if let Ok(version) = std::fs::read_to_string("/proc/sys/kernel/osrelease") {
                tracing::debug!("Kernel version: {}", version.trim());
            }

            crate::core::daemon::run(config)
        }
        Commands::PostFs => {
            let _guard = utils::init_logging(config.verbose, None)?;
            crate::core::daemon::request_stage(defs::STAGE_POST_FS)
        }
        Commands::PostFsData => {
            let _guard = utils::init_logging(config.verbose, None)?;
            crate::core::daemon::request_stage(defs::STAGE_POST_FS_DATA)
        }
        Commands::LateStart => {
            let _guard = utils::init_logging(config.verbose, None)?;
            crate::core::daemon::request_stage(defs::STAGE_LATE_START)
        }
        Commands::Modules => {
            let _guard = utils::init_logging(config.verbose, None)?;
            crate::core::modules::print_list(&config.mount_point)
        }
        Commands::Trim => {
            let _guard = utils::init_logging(config.verbose, None)?;
            crate::core::image::trim_image(&config.main_img)
        }
        Commands::Merge { src } => {
            let _guard = utils::init_logging(config.verbose, None)?;
            crate::core::image::merge_image(&src, &config.main_img)
        }
    }
}
