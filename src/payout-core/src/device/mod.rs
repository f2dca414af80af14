// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

pub mod init;
pub mod session;

pub use init::{initialize, InitError, InitOptions};
pub use session::{ChannelSet, DeviceProfile, DeviceRole, DeviceSession};
