// Copyright 2026 Modmount Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "modmount", version, about = "Boot-stage module overlay daemon")]
pub struct Cli {
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the boot daemon: serve stage requests from init.
    Daemon,
    /// Signal the daemon that init reached post-fs.
    PostFs,
    /// Signal the daemon that init reached post-fs-data.
    PostFsData,
    /// Signal the daemon that init reached late-start.
    LateStart,
    /// List active modules as JSON.
    Modules,
    /// Shrink the module image to its used size.
    Trim,
    /// Merge a staging image into the module image.
    Merge { src: PathBuf },
}
