// Copyright 2026 Modmount Developers
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod daemon;
pub mod image;
pub mod modules;
pub mod scripts;
pub mod stages;
pub mod state;
pub mod workers;
