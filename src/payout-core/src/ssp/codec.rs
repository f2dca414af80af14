// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Payload layouts for the commands the transport has no helper for.
//!
//! All multi-byte numbers are little-endian. Encoders return the complete
//! command (opcode first); decoders take the response without its status
//! byte.

use super::{Currency, ResponseStatus, SspError, SspResult};

pub const CMD_DISPLAY_ON: u8 = 0x03;
pub const CMD_DISPLAY_OFF: u8 = 0x04;
pub const CMD_CHANNEL_SECURITY: u8 = 0x0F;
pub const CMD_LAST_REJECT_NOTE: u8 = 0x17;
pub const CMD_GET_FIRMWARE_VERSION: u8 = 0x20;
pub const CMD_GET_DATASET_VERSION: u8 = 0x21;
pub const CMD_GET_ALL_LEVELS: u8 = 0x22;
pub const CMD_SET_REFILL_MODE: u8 = 0x30;
pub const CMD_PAYOUT: u8 = 0x33;
pub const CMD_SET_DENOMINATION_LEVEL: u8 = 0x34;
pub const CMD_FLOAT: u8 = 0x3D;
pub const CMD_EMPTY: u8 = 0x3F;
pub const CMD_SMART_EMPTY: u8 = 0x52;
pub const CMD_CONFIGURE_BEZEL: u8 = 0x54;

/// Host protocol version this daemon speaks.
pub const HOST_PROTOCOL_VERSION: u8 = 0x06;

/// Smallest amount a float keeps back, in cents.
pub const FLOAT_MINIMUM: u16 = 100;

const FIRMWARE_VERSION_LEN: usize = 16;
const DATASET_VERSION_LEN: usize = 8;
const LEVEL_RECORD_LEN: usize = 9;

/// Vendor sequence that makes the payout reject notes unfit for storage
/// instead of routing them to the cashbox.
const REFILL_MODE_PAYLOAD: [u8; 8] = [0x05, 0x81, 0x10, 0x11, 0x01, 0x01, 0x52, 0xF5];

const REJECT_REASONS: [&str; 29] = [
    "note accepted",
    "note length incorrect",
    "undisclosed (reject reason 2)",
    "undisclosed (reject reason 3)",
    "undisclosed (reject reason 4)",
    "undisclosed (reject reason 5)",
    "channel inhibited",
    "second note inserted",
    "undisclosed (reject reason 8)",
    "note recognised in more than one channel",
    "undisclosed (reject reason 10)",
    "note too long",
    "undisclosed (reject reason 12)",
    "mechanism slow/stalled",
    "strimming attempt detected",
    "fraud channel reject",
    "no notes inserted",
    "peak detect fail",
    "twisted note detected",
    "escrow time-out",
    "bar code scan fail",
    "rear sensor 2 fail",
    "slot fail 1",
    "slot fail 2",
    "lens over-sample",
    "width detect fail",
    "short note detected",
    "note payout",
    "unable to stack note",
];

/// Whether a payout or float is only checked or actually executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayoutOption {
    Test,
    Do,
}

impl PayoutOption {
    pub fn as_byte(self) -> u8 {
        match self {
            PayoutOption::Test => 0x19,
            PayoutOption::Do => 0x58,
        }
    }
}

/// Reason reported by the device when a payout or float is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayoutFailure {
    NotEnoughValue,
    CannotPayExact,
    Busy,
    Disabled,
    Unknown,
}

impl PayoutFailure {
    pub fn from_code(code: u8) -> Self {
        match code {
            0x01 => PayoutFailure::NotEnoughValue,
            0x02 => PayoutFailure::CannotPayExact,
            0x03 => PayoutFailure::Busy,
            0x04 => PayoutFailure::Disabled,
            _ => PayoutFailure::Unknown,
        }
    }

    pub fn from_error(err: &SspError) -> Self {
        err.error_byte()
            .map(Self::from_code)
            .unwrap_or(PayoutFailure::Unknown)
    }

    pub fn description(self) -> &'static str {
        match self {
            PayoutFailure::NotEnoughValue => "not enough value in smart payout",
            PayoutFailure::CannotPayExact => "can't pay exact amount",
            PayoutFailure::Busy => "smart payout busy",
            PayoutFailure::Disabled => "smart payout disabled",
            PayoutFailure::Unknown => "unknown",
        }
    }
}

/// One record of the get-all-levels answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenominationLevel {
    pub value: u32,
    pub level: u16,
    pub currency: Currency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityLevel {
    Unused,
    Low,
    Standard,
    High,
    Inhibited,
    Unknown(u8),
}

impl SecurityLevel {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0 => SecurityLevel::Unused,
            1 => SecurityLevel::Low,
            2 => SecurityLevel::Standard,
            3 => SecurityLevel::High,
            4 => SecurityLevel::Inhibited,
            other => SecurityLevel::Unknown(other),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SecurityLevel::Unused => "unused",
            SecurityLevel::Low => "low",
            SecurityLevel::Standard => "standard",
            SecurityLevel::High => "high",
            SecurityLevel::Inhibited => "inhibited",
            SecurityLevel::Unknown(_) => "unknown",
        }
    }
}

/// Split a raw response into its payload, or the error its status names.
pub fn check_status(response: &[u8]) -> SspResult<&[u8]> {
    let (&status, payload) = response
        .split_first()
        .ok_or_else(|| SspError::Malformed("empty response".to_string()))?;
    match ResponseStatus::from_byte(status) {
        ResponseStatus::Ok => Ok(payload),
        ResponseStatus::KeyNotSet => Err(SspError::KeyNotSet),
        status => Err(SspError::Status {
            status,
            data: payload.to_vec(),
        }),
    }
}

/// Text for a last-reject reason code.
pub fn reject_reason(code: u8) -> &'static str {
    REJECT_REASONS
        .get(code as usize)
        .copied()
        .unwrap_or("undefined")
}

pub fn encode_refill_mode() -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + REFILL_MODE_PAYLOAD.len());
    out.push(CMD_SET_REFILL_MODE);
    out.extend_from_slice(&REFILL_MODE_PAYLOAD);
    out
}

pub fn encode_set_denomination_level(level: u16, value: u32, currency: Currency) -> Vec<u8> {
    let mut out = Vec::with_capacity(10);
    out.push(CMD_SET_DENOMINATION_LEVEL);
    out.extend_from_slice(&level.to_le_bytes());
    out.extend_from_slice(&value.to_le_bytes());
    out.extend_from_slice(currency.as_bytes());
    out
}

pub fn encode_float(amount: u32, currency: Currency, option: PayoutOption) -> Vec<u8> {
    let mut out = Vec::with_capacity(11);
    out.push(CMD_FLOAT);
    out.extend_from_slice(&FLOAT_MINIMUM.to_le_bytes());
    out.extend_from_slice(&amount.to_le_bytes());
    out.extend_from_slice(currency.as_bytes());
    out.push(option.as_byte());
    out
}

pub fn encode_payout(amount: u32, currency: Currency, option: PayoutOption) -> Vec<u8> {
    let mut out = Vec::with_capacity(9);
    out.push(CMD_PAYOUT);
    out.extend_from_slice(&amount.to_le_bytes());
    out.extend_from_slice(currency.as_bytes());
    out.push(option.as_byte());
    out
}

pub fn encode_configure_bezel(red: u8, green: u8, blue: u8, persist: bool) -> Vec<u8> {
    vec![CMD_CONFIGURE_BEZEL, red, green, blue, u8::from(persist)]
}

pub fn decode_firmware_version(payload: &[u8]) -> SspResult<String> {
    decode_ascii(payload, FIRMWARE_VERSION_LEN, "firmware version")
}

pub fn decode_dataset_version(payload: &[u8]) -> SspResult<String> {
    decode_ascii(payload, DATASET_VERSION_LEN, "dataset version")
}

fn decode_ascii(payload: &[u8], len: usize, what: &str) -> SspResult<String> {
    let bytes = payload.get(..len).ok_or_else(|| {
        SspError::Malformed(format!(
            "{} needs {} bytes, got {}",
            what,
            len,
            payload.len()
        ))
    })?;
    Ok(bytes
        .iter()
        .take_while(|b| **b != 0)
        .map(|b| *b as char)
        .collect())
}

pub fn decode_last_reject(payload: &[u8]) -> SspResult<u8> {
    payload
        .first()
        .copied()
        .ok_or_else(|| SspError::Malformed("missing reject reason".to_string()))
}

pub fn decode_levels(payload: &[u8]) -> SspResult<Vec<DenominationLevel>> {
    let (&count, records) = payload
        .split_first()
        .ok_or_else(|| SspError::Malformed("missing level count".to_string()))?;
    let needed = count as usize * LEVEL_RECORD_LEN;
    if records.len() < needed {
        return Err(SspError::Malformed(format!(
            "{} level records need {} bytes, got {}",
            count,
            needed,
            records.len()
        )));
    }

    Ok(records[..needed]
        .chunks_exact(LEVEL_RECORD_LEN)
        .map(|record| DenominationLevel {
            level: u16::from_le_bytes([record[0], record[1]]),
            value: u32::from_le_bytes([record[2], record[3], record[4], record[5]]),
            currency: Currency::from_wire([record[6], record[7], record[8]]),
        })
        .collect())
}

pub fn decode_channel_security(payload: &[u8]) -> SspResult<Vec<SecurityLevel>> {
    let (&count, levels) = payload
        .split_first()
        .ok_or_else(|| SspError::Malformed("missing channel count".to_string()))?;
    let levels = levels.get(..count as usize).ok_or_else(|| {
        SspError::Malformed(format!(
            "{} channel security bytes expected, got {}",
            count,
            levels.len()
        ))
    })?;
    Ok(levels.iter().copied().map(SecurityLevel::from_byte).collect())
}
