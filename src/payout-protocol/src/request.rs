// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Inbound request parsing and field validation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Why a request was rejected before any command could run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("could not parse json")]
    Parse { reason: String, line: usize },
    #[error("property 'msgId' missing or not a string")]
    MissingMsgId,
    #[error("property 'cmd' missing or not a string")]
    MissingCmd { correl_id: String },
}

/// A command specific field that is missing or unusable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("property '{0}' missing or not a string")]
    NotAString(&'static str),
    #[error("property '{0}' missing or not a number")]
    NotANumber(&'static str),
    #[error("property '{0}' must be a whole number of cents")]
    NotWholeCents(&'static str),
    #[error("property '{0}' must be a whole number between 0 and {1}")]
    OutOfRange(&'static str, u32),
    #[error("property '{0}' must be a boolean")]
    NotABool(&'static str),
}

/// A syntactically valid request carrying `msgId` and `cmd`.
#[derive(Debug, Clone)]
pub struct Request {
    msg_id: String,
    cmd: String,
    fields: Map<String, Value>,
    raw: String,
}

/// Parse and validate the envelope of an inbound message.
pub fn parse_request(raw: &str) -> Result<Request, RequestError> {
    let value: Value = serde_json::from_str(raw).map_err(|e| RequestError::Parse {
        reason: strip_position(&e),
        line: e.line(),
    })?;
    let fields = match value {
        Value::Object(fields) => fields,
        _ => Map::new(),
    };

    let msg_id = fields
        .get("msgId")
        .and_then(Value::as_str)
        .ok_or(RequestError::MissingMsgId)?
        .to_string();
    let cmd = fields
        .get("cmd")
        .and_then(Value::as_str)
        .ok_or_else(|| RequestError::MissingCmd {
            correl_id: msg_id.clone(),
        })?
        .to_string();

    Ok(Request {
        msg_id,
        cmd,
        fields,
        raw: raw.to_string(),
    })
}

fn strip_position(err: &serde_json::Error) -> String {
    let text = err.to_string();
    let suffix = format!(" at line {} column {}", err.line(), err.column());
    text.strip_suffix(&suffix).unwrap_or(&text).to_string()
}

impl Request {
    pub fn msg_id(&self) -> &str {
        &self.msg_id
    }

    pub fn cmd(&self) -> &str {
        &self.cmd
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn str_field(&self, name: &'static str) -> Result<&str, FieldError> {
        self.fields
            .get(name)
            .and_then(Value::as_str)
            .ok_or(FieldError::NotAString(name))
    }

    /// A non-negative integral amount in cents. `550.0` is accepted,
    /// `5.5` is not.
    pub fn amount(&self, name: &'static str) -> Result<u32, FieldError> {
        let number = self.number(name)?;
        whole(number, u32::MAX).ok_or(FieldError::NotWholeCents(name))
    }

    /// A non-negative integer no larger than `max`.
    pub fn bounded(&self, name: &'static str, max: u32) -> Result<u32, FieldError> {
        let number = self.number(name)?;
        whole(number, max).ok_or(FieldError::OutOfRange(name, max))
    }

    /// Optional boolean, `false` when absent.
    pub fn flag(&self, name: &'static str) -> Result<bool, FieldError> {
        match self.fields.get(name) {
            None | Some(Value::Null) => Ok(false),
            Some(Value::Bool(flag)) => Ok(*flag),
            Some(_) => Err(FieldError::NotABool(name)),
        }
    }

    fn number(&self, name: &'static str) -> Result<&serde_json::Number, FieldError> {
        match self.fields.get(name) {
            Some(Value::Number(number)) => Ok(number),
            _ => Err(FieldError::NotANumber(name)),
        }
    }
}

fn whole(number: &serde_json::Number, max: u32) -> Option<u32> {
    if let Some(n) = number.as_u64() {
        return u32::try_from(n).ok().filter(|n| *n <= max);
    }
    if number.is_i64() {
        return None;
    }
    let n = number.as_f64()?;
    if n.fract() != 0.0 || n < 0.0 || n > max as f64 {
        return None;
    }
    Some(n as u32)
}

/// How `cmd` is resolved to a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandMatching {
    /// The parsed `cmd` value must equal a command name.
    #[default]
    Exact,
    /// Search the raw body for `"cmd":"<name>"`, first hit in the legacy
    /// order wins. Whitespace around the colon defeats the match.
    RawBody,
}

const QUIT: &str = "quit";

/// Whether the request asks the daemon to shut down.
pub fn is_quit(request: &Request, matching: CommandMatching) -> bool {
    match matching {
        CommandMatching::Exact => request.cmd() == QUIT,
        CommandMatching::RawBody => request.raw().contains(&cmd_pattern(QUIT)),
    }
}

fn cmd_pattern(name: &str) -> String {
    format!("\"cmd\":\"{}\"", name)
}

/// Commands addressed to a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Empty,
    SmartEmpty,
    Enable,
    Disable,
    EnableChannels,
    DisableChannels,
    InhibitChannels,
    TestFloat,
    DoFloat,
    TestPayout,
    DoPayout,
    GetFirmwareVersion,
    GetDatasetVersion,
    ChannelSecurityData,
    GetAllLevels,
    SetDenominationLevel,
    LastRejectNote,
    ConfigureBezel,
    DisplayOn,
    DisplayOff,
}

impl Command {
    /// Resolution order for raw body matching.
    pub const LEGACY_ORDER: [Command; 20] = [
        Command::Empty,
        Command::SmartEmpty,
        Command::Enable,
        Command::Disable,
        Command::EnableChannels,
        Command::DisableChannels,
        Command::InhibitChannels,
        Command::TestFloat,
        Command::DoFloat,
        Command::TestPayout,
        Command::DoPayout,
        Command::GetFirmwareVersion,
        Command::GetDatasetVersion,
        Command::ChannelSecurityData,
        Command::GetAllLevels,
        Command::SetDenominationLevel,
        Command::LastRejectNote,
        Command::ConfigureBezel,
        Command::DisplayOn,
        Command::DisplayOff,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Command::Empty => "empty",
            Command::SmartEmpty => "smart-empty",
            Command::Enable => "enable",
            Command::Disable => "disable",
            Command::EnableChannels => "enable-channels",
            Command::DisableChannels => "disable-channels",
            Command::InhibitChannels => "inhibit-channels",
            Command::TestFloat => "test-float",
            Command::DoFloat => "do-float",
            Command::TestPayout => "test-payout",
            Command::DoPayout => "do-payout",
            Command::GetFirmwareVersion => "get-firmware-version",
            Command::GetDatasetVersion => "get-dataset-version",
            Command::ChannelSecurityData => "channel-security-data",
            Command::GetAllLevels => "get-all-levels",
            Command::SetDenominationLevel => "set-denomination-level",
            Command::LastRejectNote => "last-reject-note",
            Command::ConfigureBezel => "configure-bezel",
            Command::DisplayOn => "display-on",
            Command::DisplayOff => "display-off",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::LEGACY_ORDER.into_iter().find(|c| c.name() == name)
    }

    pub fn resolve(request: &Request, matching: CommandMatching) -> Option<Self> {
        match matching {
            CommandMatching::Exact => Self::from_name(request.cmd()),
            CommandMatching::RawBody => Self::LEGACY_ORDER
                .into_iter()
                .find(|c| request.raw().contains(&cmd_pattern(c.name()))),
        }
    }
}
