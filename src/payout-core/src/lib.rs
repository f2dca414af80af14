// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

pub mod device;
pub mod ssp;

pub type DynResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

pub use device::session::{ChannelSet, DeviceProfile, DeviceRole, DeviceSession};
pub use ssp::{
    Currency, PollEvent, PollEventKind, ResponseStatus, Route, SspError, SspResult,
    SspTransport, UnitSetup,
};
