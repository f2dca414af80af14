// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! One-time handshake and role specific configuration of a device.
//!
//! Tested against the simulated devices in `payout-backend` (`sim.rs`).

use thiserror::Error;
use tracing::{info, warn};

use super::session::{DeviceRole, DeviceSession};
use crate::ssp::{commands, Currency, Route, SspError};

/// Initialization step that failed; the device stays not-ready.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("no device found: {0}")]
    Sync(SspError),
    #[error("encryption setup failed: {0}")]
    Encryption(SspError),
    #[error("host protocol pin failed: {0}")]
    HostProtocol(SspError),
    #[error("setup request failed: {0}")]
    SetupRequest(SspError),
    #[error("enable failed: {0}")]
    Enable(SspError),
    #[error("setting inhibits failed: {0}")]
    Inhibits(SspError),
    #[error("enable payout failed: {0}")]
    EnablePayout(SspError),
    #[error("hardware unavailable")]
    Unavailable,
}

/// Settings applied after the handshake.
#[derive(Debug, Clone)]
pub struct InitOptions {
    pub currency: Currency,
    /// Note value (cents) to destination, validator only.
    pub routes: Vec<(u32, Route)>,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            currency: Currency::EUR,
            routes: vec![
                (500, Route::Cashbox),
                (1000, Route::Cashbox),
                (2000, Route::Cashbox),
                (5000, Route::Storage),
                (10000, Route::Storage),
                (20000, Route::Storage),
                (50000, Route::Storage),
            ],
        }
    }
}

/// Run the handshake, then the role specific configuration. The session is
/// marked ready only when every mandatory step succeeded.
pub async fn initialize(session: &mut DeviceSession, options: &InitOptions) -> Result<(), InitError> {
    session.set_ready(false);
    if !session.has_transport() {
        return Err(InitError::Unavailable);
    }

    info!(
        "Initializing {} (address 0x{:02X}, '{}')",
        session.role(),
        session.address(),
        session.name()
    );

    handshake(session).await?;

    match session.role() {
        DeviceRole::Validator => configure_validator(session, options).await?,
        DeviceRole::Hopper => configure_hopper(session).await,
    }

    session.set_ready(true);
    info!("{} initialized", session.role());
    Ok(())
}

async fn handshake(session: &mut DeviceSession) -> Result<(), InitError> {
    let transport = session.transport().map_err(|_| InitError::Unavailable)?;
    transport.sync().await.map_err(InitError::Sync)?;
    info!("{}: device found", session.role());

    session
        .negotiate_encryption()
        .await
        .map_err(InitError::Encryption)?;
    info!("{}: encryption setup", session.role());

    session
        .pin_protocol_version()
        .await
        .map_err(InitError::HostProtocol)?;
    info!("{}: host protocol verified", session.role());

    let transport = session.transport().map_err(|_| InitError::Unavailable)?;
    let setup = transport
        .setup_request()
        .await
        .map_err(InitError::SetupRequest)?;
    for (index, channel) in setup.channels.iter().enumerate() {
        info!(
            "{}: channel {}: {} {}",
            session.role(),
            index + 1,
            channel.value,
            channel.currency
        );
    }
    session.set_setup(setup);

    let transport = session.transport().map_err(|_| InitError::Unavailable)?;
    match commands::get_firmware_version(transport).await {
        Ok(version) => info!("{}: full firmware version: {}", session.role(), version),
        Err(e) => warn!("{}: reading firmware version failed: {}", session.role(), e),
    }
    let transport = session.transport().map_err(|_| InitError::Unavailable)?;
    match commands::get_dataset_version(transport).await {
        Ok(version) => info!("{}: full dataset version: {}", session.role(), version),
        Err(e) => warn!("{}: reading dataset version failed: {}", session.role(), e),
    }

    let transport = session.transport().map_err(|_| InitError::Unavailable)?;
    transport.enable().await.map_err(InitError::Enable)?;
    Ok(())
}

async fn configure_validator(
    session: &mut DeviceSession,
    options: &InitOptions,
) -> Result<(), InitError> {
    let transport = session.transport().map_err(|_| InitError::Unavailable)?;
    if let Err(e) = commands::set_refill_mode(transport).await {
        warn!("validator: setting refill mode failed: {}", e);
    }

    for &(amount, route) in &options.routes {
        let transport = session.transport().map_err(|_| InitError::Unavailable)?;
        if let Err(e) = transport.set_route(amount, options.currency, route).await {
            warn!("validator: routing {} to {:?} failed: {}", amount, route, e);
        }
    }

    session
        .reset_channel_inhibits()
        .await
        .map_err(InitError::Inhibits)?;

    let unit_type = session.setup().map(|s| s.unit_type).unwrap_or_default();
    let transport = session.transport().map_err(|_| InitError::Unavailable)?;
    transport
        .enable_payout(unit_type)
        .await
        .map_err(InitError::EnablePayout)?;
    Ok(())
}

async fn configure_hopper(session: &mut DeviceSession) {
    let channels = session
        .setup()
        .map(|s| s.channels.clone())
        .unwrap_or_default();
    for channel in channels {
        let Ok(transport) = session.transport() else {
            return;
        };
        if let Err(e) = transport
            .set_coinmech_inhibits(channel.value, channel.currency, true)
            .await
        {
            warn!(
                "hopper: enabling coin mech for {} {} failed: {}",
                channel.value, channel.currency, e
            );
        }
    }
}
