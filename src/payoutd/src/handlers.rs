// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Device command handlers.
//!
//! Every handler produces exactly one reply for its request. Field
//! validation happens before anything is sent to the device.

use payout_core::ssp::codec::{reject_reason, PayoutFailure, PayoutOption};
use payout_core::ssp::commands;
use payout_core::{ChannelSet, Currency, DeviceRole, DeviceSession, SspResult, SspTransport};
use payout_protocol::{Command, Correlation, FieldError, Request};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::DenominationLevelFields;

pub const HARDWARE_UNAVAILABLE: &str = "hardware unavailable";

/// Settings that shape command arguments.
#[derive(Debug, Clone, Copy)]
pub struct HandlerSettings {
    pub currency: Currency,
    pub level_fields: DenominationLevelFields,
}

#[derive(Debug, Clone, Copy)]
enum Dispense {
    Payout,
    Float,
}

/// Run `command` against a ready session and build its reply.
pub async fn handle(
    session: &mut DeviceSession,
    command: Command,
    request: &Request,
    corr: &Correlation,
    settings: &HandlerSettings,
) -> Value {
    match run(session, command, request, corr, settings).await {
        Ok(reply) => reply,
        Err(e) => {
            warn!("{}: {} without transport: {}", session.role(), command.name(), e);
            corr.error(HARDWARE_UNAVAILABLE)
        }
    }
}

/// `Err` only when the session has no transport; device failures are
/// part of the reply.
async fn run(
    session: &mut DeviceSession,
    command: Command,
    request: &Request,
    corr: &Correlation,
    settings: &HandlerSettings,
) -> SspResult<Value> {
    let role = session.role();
    let reply = match command {
        Command::Empty => {
            ignore(role, command, commands::empty(session.transport()?).await);
            corr.accepted()
        }
        Command::SmartEmpty => {
            ignore(role, command, commands::smart_empty(session.transport()?).await);
            corr.accepted()
        }
        Command::Enable => {
            ignore(role, command, session.transport()?.enable().await);
            corr.accepted()
        }
        Command::Disable => {
            ignore(role, command, session.transport()?.disable().await);
            corr.accepted()
        }
        Command::EnableChannels => {
            set_channels(session, request, corr, ChannelSet::enabled_in).await?
        }
        Command::DisableChannels => {
            set_channels(session, request, corr, ChannelSet::disabled_in).await?
        }
        Command::InhibitChannels => {
            set_channels(session, request, corr, |set, _| set.inhibited()).await?
        }
        Command::TestFloat => {
            let transport = session.transport()?;
            dispense(transport, request, corr, settings, Dispense::Float, PayoutOption::Test).await
        }
        Command::DoFloat => {
            let transport = session.transport()?;
            dispense(transport, request, corr, settings, Dispense::Float, PayoutOption::Do).await
        }
        Command::TestPayout => {
            let transport = session.transport()?;
            dispense(transport, request, corr, settings, Dispense::Payout, PayoutOption::Test).await
        }
        Command::DoPayout => {
            let transport = session.transport()?;
            dispense(transport, request, corr, settings, Dispense::Payout, PayoutOption::Do).await
        }
        Command::GetFirmwareVersion => {
            version(corr, commands::get_firmware_version(session.transport()?).await)
        }
        Command::GetDatasetVersion => {
            version(corr, commands::get_dataset_version(session.transport()?).await)
        }
        Command::ChannelSecurityData => {
            match commands::channel_security_data(session.transport()?).await {
                Ok(levels) => {
                    let channels: Vec<Value> = levels
                        .iter()
                        .enumerate()
                        .map(|(idx, level)| json!({"channel": idx + 1, "security": level.name()}))
                        .collect();
                    corr.reply([("channels", Value::Array(channels))])
                }
                Err(e) => {
                    warn!("{}: reading channel security failed: {}", role, e);
                    corr.failed()
                }
            }
        }
        Command::GetAllLevels => match commands::get_all_levels(session.transport()?).await {
            Ok(levels) => {
                let levels: Vec<Value> = levels
                    .iter()
                    .map(|l| json!({"value": l.value, "level": l.level, "cc": l.currency.to_string()}))
                    .collect();
                corr.reply([("levels", Value::Array(levels))])
            }
            Err(e) => {
                warn!("{}: reading levels failed: {}", role, e);
                corr.failed()
            }
        },
        Command::SetDenominationLevel => {
            let transport = session.transport()?;
            set_denomination_level(transport, request, corr, settings).await
        }
        Command::LastRejectNote => match commands::last_reject_note(session.transport()?).await {
            Ok(code) => corr.reply([
                ("reason", json!(reject_reason(code))),
                ("code", json!(code)),
            ]),
            Err(e) => {
                debug!("{}: last reject note failed: {}", role, e);
                corr.bare([("timeout", json!("last reject note"))])
            }
        },
        Command::ConfigureBezel => match bezel_fields(request) {
            Ok((red, green, blue, persist)) => {
                let transport = session.transport()?;
                result(corr, commands::configure_bezel(transport, red, green, blue, persist).await)
            }
            Err(e) => corr.error(&e.to_string()),
        },
        Command::DisplayOn => result(corr, commands::display_on(session.transport()?).await),
        Command::DisplayOff => result(corr, commands::display_off(session.transport()?).await),
    };
    Ok(reply)
}

fn ignore(role: DeviceRole, command: Command, outcome: SspResult<()>) {
    if let Err(e) = outcome {
        debug!("{}: {} failed: {}", role, command.name(), e);
    }
}

fn result(corr: &Correlation, outcome: SspResult<()>) -> Value {
    match outcome {
        Ok(()) => corr.ok(),
        Err(e) => {
            debug!("command failed: {}", e);
            corr.failed()
        }
    }
}

fn version(corr: &Correlation, outcome: SspResult<String>) -> Value {
    match outcome {
        Ok(version) => corr.reply([("version", json!(version))]),
        Err(e) => {
            warn!("reading version failed: {}", e);
            corr.failed()
        }
    }
}

/// Compute the new inhibit mask from the requested set and the current
/// mask, and keep it only once the device acknowledged.
async fn set_channels(
    session: &mut DeviceSession,
    request: &Request,
    corr: &Correlation,
    update: fn(ChannelSet, u8) -> u8,
) -> SspResult<Value> {
    let digits = match request.str_field("channels") {
        Ok(digits) => digits,
        Err(e) => return Ok(corr.error(&e.to_string())),
    };
    session.transport()?;
    let mask = update(ChannelSet::parse(digits), session.channel_inhibits());
    Ok(match session.apply_channel_inhibits(mask).await {
        Ok(()) => {
            info!("{}: channel mask now {:08b}", session.role(), mask);
            corr.ok()
        }
        Err(e) => {
            warn!("{}: setting channel mask {:08b} failed: {}", session.role(), mask, e);
            corr.failed()
        }
    })
}

async fn dispense(
    transport: &mut dyn SspTransport,
    request: &Request,
    corr: &Correlation,
    settings: &HandlerSettings,
    kind: Dispense,
    option: PayoutOption,
) -> Value {
    let amount = match request.amount("amount") {
        Ok(amount) => amount,
        Err(e) => return corr.error(&e.to_string()),
    };
    let outcome = match kind {
        Dispense::Payout => commands::payout(transport, amount, settings.currency, option).await,
        Dispense::Float => commands::float(transport, amount, settings.currency, option).await,
    };
    match outcome {
        Ok(()) => corr.ok(),
        Err(e) => {
            let failure = PayoutFailure::from_error(&e);
            info!("{:?} of {} refused: {}", kind, amount, failure.description());
            corr.error(failure.description())
        }
    }
}

/// The device adds non-zero levels to the stored count, so the count is
/// zeroed first to make the requested level absolute. Only the second
/// step is reported.
async fn set_denomination_level(
    transport: &mut dyn SspTransport,
    request: &Request,
    corr: &Correlation,
    settings: &HandlerSettings,
) -> Value {
    let (value_field, level_field) = match settings.level_fields {
        DenominationLevelFields::Swapped => ("level", "amount"),
        DenominationLevelFields::Named => ("amount", "level"),
    };
    let value = match request.amount(value_field) {
        Ok(value) => value,
        Err(e) => return corr.error(&e.to_string()),
    };
    let level = match request.bounded(level_field, u16::MAX as u32) {
        Ok(level) => level as u16,
        Err(e) => return corr.error(&e.to_string()),
    };

    if level > 0 {
        let reset =
            commands::set_denomination_level(&mut *transport, 0, value, settings.currency).await;
        if let Err(e) = reset {
            debug!("resetting level of {} failed: {}", value, e);
        }
    }
    let outcome =
        commands::set_denomination_level(&mut *transport, level, value, settings.currency).await;
    result(corr, outcome)
}

fn bezel_fields(request: &Request) -> Result<(u8, u8, u8, bool), FieldError> {
    let red = request.bounded("r", u8::MAX as u32)? as u8;
    let green = request.bounded("g", u8::MAX as u32)? as u8;
    let blue = request.bounded("b", u8::MAX as u32)? as u8;
    let persist = request.flag("persist")?;
    Ok((red, green, blue, persist))
}
