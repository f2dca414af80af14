// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Types shared with the secure serial transport that talks to the
//! cash peripherals, plus the command codec layered on top of it.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod codec;
pub mod commands;

pub type SspResult<T> = Result<T, SspError>;

/// Alias to reduce type complexity in SspTransport.
pub type SspFuture<'a, T> = Pin<Box<dyn Future<Output = SspResult<T>> + Send + 'a>>;

/// Leading status byte of every device response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    Ok,
    UnknownCommand,
    WrongParameters,
    ParameterOutOfRange,
    CannotProcess,
    SoftwareError,
    Fail,
    KeyNotSet,
    Other(u8),
}

impl ResponseStatus {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0xF0 => ResponseStatus::Ok,
            0xF2 => ResponseStatus::UnknownCommand,
            0xF3 => ResponseStatus::WrongParameters,
            0xF4 => ResponseStatus::ParameterOutOfRange,
            0xF5 => ResponseStatus::CannotProcess,
            0xF6 => ResponseStatus::SoftwareError,
            0xF8 => ResponseStatus::Fail,
            0xFA => ResponseStatus::KeyNotSet,
            other => ResponseStatus::Other(other),
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            ResponseStatus::Ok => 0xF0,
            ResponseStatus::UnknownCommand => 0xF2,
            ResponseStatus::WrongParameters => 0xF3,
            ResponseStatus::ParameterOutOfRange => 0xF4,
            ResponseStatus::CannotProcess => 0xF5,
            ResponseStatus::SoftwareError => 0xF6,
            ResponseStatus::Fail => 0xF8,
            ResponseStatus::KeyNotSet => 0xFA,
            ResponseStatus::Other(byte) => byte,
        }
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ResponseStatus::Ok => "ok",
            ResponseStatus::UnknownCommand => "unknown command",
            ResponseStatus::WrongParameters => "wrong parameters",
            ResponseStatus::ParameterOutOfRange => "parameter out of range",
            ResponseStatus::CannotProcess => "cannot process",
            ResponseStatus::SoftwareError => "software error",
            ResponseStatus::Fail => "fail",
            ResponseStatus::KeyNotSet => "key not set",
            ResponseStatus::Other(_) => "unexpected status",
        };
        write!(f, "{} (0x{:02X})", label, self.as_byte())
    }
}

/// Outcome of a transport call that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SspError {
    /// No answer within the transport's timeout and retry budget.
    #[error("no response from device")]
    Timeout,
    #[error("encryption key not set")]
    KeyNotSet,
    /// The device answered with a non-OK status; `data` holds the bytes
    /// that followed the status byte.
    #[error("device answered {status}")]
    Status {
        status: ResponseStatus,
        data: Vec<u8>,
    },
    #[error("malformed device response: {0}")]
    Malformed(String),
    #[error("hardware unavailable")]
    Unavailable,
}

impl SspError {
    pub fn status(status: ResponseStatus) -> Self {
        if status == ResponseStatus::KeyNotSet {
            return SspError::KeyNotSet;
        }
        SspError::Status {
            status,
            data: Vec::new(),
        }
    }

    /// First byte after the status byte, which carries the failure reason
    /// for payout-type commands.
    pub fn error_byte(&self) -> Option<u8> {
        match self {
            SspError::Status { data, .. } => data.first().copied(),
            _ => None,
        }
    }
}

/// Three letter ASCII currency code as it travels on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency([u8; 3]);

impl Currency {
    pub const EUR: Currency = Currency(*b"EUR");

    pub fn from_wire(code: [u8; 3]) -> Self {
        Currency(code)
    }

    pub fn as_bytes(&self) -> &[u8; 3] {
        &self.0
    }
}

impl Default for Currency {
    fn default() -> Self {
        Currency::EUR
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0.iter().take_while(|b| **b != 0) {
            write!(f, "{}", *byte as char)?;
        }
        Ok(())
    }
}

impl FromStr for Currency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() != 3 || !bytes.iter().all(u8::is_ascii_uppercase) {
            return Err(format!(
                "currency '{}' must be three upper-case ASCII letters",
                s
            ));
        }
        Ok(Currency([bytes[0], bytes[1], bytes[2]]))
    }
}

impl TryFrom<String> for Currency {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.to_string()
    }
}

/// Where a validator sends an accepted note of a given value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    /// Kept in the payout store, available for later payouts.
    Storage,
    /// Sent to the cashbox, out of reach for payouts.
    Cashbox,
}

impl Route {
    pub fn as_byte(self) -> u8 {
        match self {
            Route::Storage => 0x00,
            Route::Cashbox => 0x01,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelData {
    pub value: u32,
    pub currency: Currency,
}

/// Answer to the setup request, read once during initialization.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UnitSetup {
    pub unit_type: u8,
    pub firmware_version: String,
    pub protocol_version: u8,
    pub channels: Vec<ChannelData>,
}

impl UnitSetup {
    /// Look up a 1-based channel index as reported by poll events.
    pub fn channel(&self, index: u32) -> SspResult<&ChannelData> {
        let position = (index as usize).checked_sub(1);
        position
            .and_then(|p| self.channels.get(p))
            .ok_or_else(|| {
                SspError::Malformed(format!(
                    "channel {} outside channel table of {}",
                    index,
                    self.channels.len()
                ))
            })
    }
}

/// Poll event kinds the daemon knows how to name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEventKind {
    Reset,
    Read,
    Credit,
    Rejecting,
    Rejected,
    Stacking,
    Stored,
    Stacked,
    SafeJam,
    UnsafeJam,
    Disabled,
    FraudAttempt,
    StackerFull,
    ClearedFromFront,
    ClearedIntoCashbox,
    CashboxRemoved,
    CashboxReplaced,
    Dispensing,
    Dispensed,
    Jammed,
    Floating,
    Floated,
    IncompletePayout,
    IncompleteFloat,
    CashboxPaid,
    CoinCredit,
    Emptying,
    Empty,
    SmartEmptying,
    SmartEmptied,
    CalibrationFail,
}

impl PollEventKind {
    pub fn from_code(code: u8) -> Option<Self> {
        let kind = match code {
            0xF1 => PollEventKind::Reset,
            0xEF => PollEventKind::Read,
            0xEE => PollEventKind::Credit,
            0xED => PollEventKind::Rejecting,
            0xEC => PollEventKind::Rejected,
            0xCC => PollEventKind::Stacking,
            0xDB => PollEventKind::Stored,
            0xEB => PollEventKind::Stacked,
            0xEA => PollEventKind::SafeJam,
            0xE9 => PollEventKind::UnsafeJam,
            0xE8 => PollEventKind::Disabled,
            0xE6 => PollEventKind::FraudAttempt,
            0xE7 => PollEventKind::StackerFull,
            0xE1 => PollEventKind::ClearedFromFront,
            0xE2 => PollEventKind::ClearedIntoCashbox,
            0xE3 => PollEventKind::CashboxRemoved,
            0xE4 => PollEventKind::CashboxReplaced,
            0xDA => PollEventKind::Dispensing,
            0xD2 => PollEventKind::Dispensed,
            0xD5 => PollEventKind::Jammed,
            0xD7 => PollEventKind::Floating,
            0xD8 => PollEventKind::Floated,
            0xDC => PollEventKind::IncompletePayout,
            0xDD => PollEventKind::IncompleteFloat,
            0xDE => PollEventKind::CashboxPaid,
            0xDF => PollEventKind::CoinCredit,
            0xC2 => PollEventKind::Emptying,
            0xC3 => PollEventKind::Empty,
            0xB3 => PollEventKind::SmartEmptying,
            0xB4 => PollEventKind::SmartEmptied,
            0x83 => PollEventKind::CalibrationFail,
            _ => return None,
        };
        Some(kind)
    }

    pub fn code(self) -> u8 {
        match self {
            PollEventKind::Reset => 0xF1,
            PollEventKind::Read => 0xEF,
            PollEventKind::Credit => 0xEE,
            PollEventKind::Rejecting => 0xED,
            PollEventKind::Rejected => 0xEC,
            PollEventKind::Stacking => 0xCC,
            PollEventKind::Stored => 0xDB,
            PollEventKind::Stacked => 0xEB,
            PollEventKind::SafeJam => 0xEA,
            PollEventKind::UnsafeJam => 0xE9,
            PollEventKind::Disabled => 0xE8,
            PollEventKind::FraudAttempt => 0xE6,
            PollEventKind::StackerFull => 0xE7,
            PollEventKind::ClearedFromFront => 0xE1,
            PollEventKind::ClearedIntoCashbox => 0xE2,
            PollEventKind::CashboxRemoved => 0xE3,
            PollEventKind::CashboxReplaced => 0xE4,
            PollEventKind::Dispensing => 0xDA,
            PollEventKind::Dispensed => 0xD2,
            PollEventKind::Jammed => 0xD5,
            PollEventKind::Floating => 0xD7,
            PollEventKind::Floated => 0xD8,
            PollEventKind::IncompletePayout => 0xDC,
            PollEventKind::IncompleteFloat => 0xDD,
            PollEventKind::CashboxPaid => 0xDE,
            PollEventKind::CoinCredit => 0xDF,
            PollEventKind::Emptying => 0xC2,
            PollEventKind::Empty => 0xC3,
            PollEventKind::SmartEmptying => 0xB3,
            PollEventKind::SmartEmptied => 0xB4,
            PollEventKind::CalibrationFail => 0x83,
        }
    }
}

/// Sub-code carried by a calibration failure event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationFailure {
    NoError,
    SensorFlap,
    SensorExit,
    SensorCoil1,
    SensorCoil2,
    NotInitialized,
    ChecksumError,
    RecalibrationRequested,
}

impl CalibrationFailure {
    pub fn from_code(code: u32) -> Option<Self> {
        let failure = match code {
            0 => CalibrationFailure::NoError,
            1 => CalibrationFailure::SensorFlap,
            2 => CalibrationFailure::SensorExit,
            3 => CalibrationFailure::SensorCoil1,
            4 => CalibrationFailure::SensorCoil2,
            5 => CalibrationFailure::NotInitialized,
            6 => CalibrationFailure::ChecksumError,
            7 => CalibrationFailure::RecalibrationRequested,
            _ => return None,
        };
        Some(failure)
    }

    pub fn description(self) -> &'static str {
        match self {
            CalibrationFailure::NoError => "no error",
            CalibrationFailure::SensorFlap => "sensor flap",
            CalibrationFailure::SensorExit => "sensor exit",
            CalibrationFailure::SensorCoil1 => "sensor coil 1",
            CalibrationFailure::SensorCoil2 => "sensor coil 2",
            CalibrationFailure::NotInitialized => "not initialized",
            CalibrationFailure::ChecksumError => "checksum error",
            CalibrationFailure::RecalibrationRequested => "recalibration requested",
        }
    }
}

/// One item of a poll response. The meaning of `data1`/`data2` depends on
/// the event kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollEvent {
    pub code: u8,
    pub data1: u32,
    pub data2: u32,
    pub currency: Currency,
}

impl PollEvent {
    pub fn new(kind: PollEventKind) -> Self {
        Self {
            code: kind.code(),
            data1: 0,
            data2: 0,
            currency: Currency::default(),
        }
    }

    pub fn with_data(mut self, data1: u32, data2: u32) -> Self {
        self.data1 = data1;
        self.data2 = data2;
        self
    }

    pub fn kind(&self) -> Option<PollEventKind> {
        PollEventKind::from_code(self.code)
    }
}

/// Capability set of the secure serial transport for one device address.
///
/// Framing, checksums, encryption and wire-level retries live behind this
/// trait. Calls for one device must never overlap.
pub trait SspTransport: Send {
    fn sync<'a>(&'a mut self) -> SspFuture<'a, ()>;

    fn setup_encryption<'a>(&'a mut self, key: u64) -> SspFuture<'a, ()>;

    fn host_protocol<'a>(&'a mut self, version: u8) -> SspFuture<'a, ()>;

    fn setup_request<'a>(&'a mut self) -> SspFuture<'a, UnitSetup>;

    fn enable<'a>(&'a mut self) -> SspFuture<'a, ()>;

    fn disable<'a>(&'a mut self) -> SspFuture<'a, ()>;

    fn set_inhibits<'a>(&'a mut self, low: u8, high: u8) -> SspFuture<'a, ()>;

    fn enable_payout<'a>(&'a mut self, unit_type: u8) -> SspFuture<'a, ()>;

    fn set_route<'a>(
        &'a mut self,
        amount: u32,
        currency: Currency,
        route: Route,
    ) -> SspFuture<'a, ()>;

    fn set_coinmech_inhibits<'a>(
        &'a mut self,
        value: u32,
        currency: Currency,
        enabled: bool,
    ) -> SspFuture<'a, ()>;

    fn poll<'a>(&'a mut self) -> SspFuture<'a, Vec<PollEvent>>;

    fn run_calibration<'a>(&'a mut self) -> SspFuture<'a, ()>;

    /// Send a raw command and return the full response, status byte first.
    /// Only transport-level failures are reported as errors here.
    fn send_command<'a>(&'a mut self, data: &'a [u8]) -> SspFuture<'a, Vec<u8>>;
}
