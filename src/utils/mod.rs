// Copyright 2026 Modmount Developers
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod fs;
pub mod log;
pub mod process;

pub use self::{fs::*, log::*, process::*};
