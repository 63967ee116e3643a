// Copyright 2026 Modmount Developers
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod magic;
pub mod mirror;
pub mod node;
pub mod simple;
