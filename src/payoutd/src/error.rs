// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use payout_core::{DeviceRole, SspError};
use thiserror::Error;

/// Failures that stop the cash task and with it the daemon.
#[derive(Debug, Error)]
pub enum CashTaskError {
    /// The unit reset and refused the host protocol version; its protocol
    /// state is unknown.
    #[error("{role}: re-pinning host protocol after reset failed: {source}")]
    ProtocolRepin { role: DeviceRole, source: SspError },
}
