// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Process plumbing shared by the payoutd binaries: config file lookup,
//! logging and plugin loading.

pub mod config;
pub mod logging;
pub mod plugins;

pub use config::{ConfigError, ConfigFile};
pub use logging::init_logging;
pub use plugins::load_backend_plugins;
