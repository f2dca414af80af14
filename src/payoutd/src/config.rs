// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Configuration file support for payoutd.
//!
//! Config is loaded from the `[payoutd]` section of `payoutd.toml`.
//! Default search order:
//! 1. Path specified via `--config` CLI argument
//! 2. `./payoutd.toml`
//! 3. `~/.config/payoutd/payoutd.toml`
//! 4. `/etc/payoutd/payoutd.toml`

use std::path::{Path, PathBuf};

use payout_app::{ConfigError, ConfigFile};
use payout_core::device::InitOptions;
use payout_core::{Currency, DeviceProfile, Route};
use payout_protocol::CommandMatching;
use serde::{Deserialize, Serialize};

const DEFAULT_KEY: u64 = 0x0123_4567_0123_4567;

/// Top-level daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PayoutdConfig {
    pub general: GeneralConfig,
    /// Message bus connection
    pub bus: BusConfig,
    /// Device transport
    pub transport: TransportConfig,
    pub hopper: HopperConfig,
    pub validator: ValidatorConfig,
    /// Currency used for payouts, floats and routing
    pub currency: Currency,
    /// Loop timing
    pub behavior: BehaviorConfig,
    /// Legacy request handling
    pub compat: CompatConfig,
}

/// General application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub host: String,
    pub port: u16,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
        }
    }
}

impl BusConfig {
    pub fn url(&self) -> String {
        format!("redis://{}:{}/", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Backend name; `sim` is built in, plugins add others
    pub backend: String,
    /// Serial device shared by both peripherals
    pub device: String,
    pub baud: u32,
    /// Per-command timeout in milliseconds
    pub timeout_ms: u64,
    /// Retries before a command times out
    pub retry_level: u8,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            backend: "sim".to_string(),
            device: "/dev/ttyACM0".to_string(),
            baud: 9600,
            timeout_ms: 1000,
            retry_level: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HopperConfig {
    pub address: u8,
    pub name: String,
    /// Fixed part of the encryption key
    pub key: u64,
    pub enabled: bool,
}

impl Default for HopperConfig {
    fn default() -> Self {
        Self {
            address: 0x10,
            name: "Mr. Coin".to_string(),
            key: DEFAULT_KEY,
            enabled: true,
        }
    }
}

impl HopperConfig {
    pub fn profile(&self) -> DeviceProfile {
        DeviceProfile {
            address: self.address,
            name: self.name.clone(),
            key: self.key,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    pub address: u8,
    pub name: String,
    /// Fixed part of the encryption key
    pub key: u64,
    pub enabled: bool,
    /// Where accepted notes go, by value in cents
    pub routes: Vec<RouteConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    pub amount: u32,
    pub destination: Route,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            address: 0x00,
            name: "Ms. Note".to_string(),
            key: DEFAULT_KEY,
            enabled: true,
            routes: InitOptions::default()
                .routes
                .into_iter()
                .map(|(amount, destination)| RouteConfig {
                    amount,
                    destination,
                })
                .collect(),
        }
    }
}

impl ValidatorConfig {
    pub fn profile(&self) -> DeviceProfile {
        DeviceProfile {
            address: self.address,
            name: self.name.clone(),
            key: self.key,
        }
    }
}

/// Timing of the cash task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    /// Interval between poll rounds in milliseconds
    pub poll_interval_ms: u64,
    /// Pause before every device command in milliseconds
    pub settle_delay_ms: u64,
    /// Interval of the shutdown flag check in milliseconds
    pub quit_check_interval_ms: u64,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            settle_delay_ms: 300,
            quit_check_interval_ms: 500,
        }
    }
}

/// Which request field carries what for `set-denomination-level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DenominationLevelFields {
    /// `level` holds the denomination value, `amount` the level.
    #[default]
    Swapped,
    /// `amount` holds the denomination value, `level` the level.
    Named,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CompatConfig {
    pub command_matching: CommandMatching,
    pub denomination_level_fields: DenominationLevelFields,
}

impl PayoutdConfig {
    pub fn validate(&self) -> Result<(), String> {
        validate_log_level(self.general.log_level.as_deref())?;

        if self.bus.host.trim().is_empty() {
            return Err("[bus].host must not be empty".to_string());
        }
        if self.bus.port == 0 {
            return Err("[bus].port must be > 0".to_string());
        }

        if self.transport.backend.trim().is_empty() {
            return Err("[transport].backend must not be empty".to_string());
        }
        if self.transport.device.trim().is_empty() {
            return Err("[transport].device must not be empty".to_string());
        }
        if self.transport.baud == 0 {
            return Err("[transport].baud must be > 0".to_string());
        }
        if self.transport.timeout_ms == 0 {
            return Err("[transport].timeout_ms must be > 0".to_string());
        }

        if self.hopper.enabled
            && self.validator.enabled
            && self.hopper.address == self.validator.address
        {
            return Err(format!(
                "[hopper].address and [validator].address must differ (both 0x{:02X})",
                self.hopper.address
            ));
        }
        validate_routes(&self.validator.routes)?;

        if self.behavior.poll_interval_ms == 0 {
            return Err("[behavior].poll_interval_ms must be > 0".to_string());
        }
        if self.behavior.quit_check_interval_ms == 0 {
            return Err("[behavior].quit_check_interval_ms must be > 0".to_string());
        }
        Ok(())
    }

    /// Routing and currency handed to the device initializer.
    pub fn init_options(&self) -> InitOptions {
        InitOptions {
            currency: self.currency,
            routes: self
                .validator
                .routes
                .iter()
                .map(|route| (route.amount, route.destination))
                .collect(),
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        <Self as ConfigFile>::load_from_file(path)
    }

    /// Load configuration from the default search paths.
    /// Returns default config if no config file is found.
    pub fn load_from_default_paths() -> Result<(Self, Option<PathBuf>), ConfigError> {
        <Self as ConfigFile>::load_from_default_paths()
    }

    /// Example configuration under the `[payoutd]` section header.
    pub fn example_toml() -> String {
        #[derive(Serialize)]
        struct Wrapper {
            #[serde(rename = "payoutd")]
            inner: PayoutdConfig,
        }
        let example = PayoutdConfig {
            general: GeneralConfig {
                log_level: Some("info".to_string()),
            },
            ..PayoutdConfig::default()
        };
        toml::to_string_pretty(&Wrapper { inner: example }).unwrap_or_default()
    }
}

fn validate_log_level(level: Option<&str>) -> Result<(), String> {
    if let Some(level) = level {
        match level {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(format!(
                    "[general].log_level '{}' is invalid (expected one of: trace, debug, info, warn, error)",
                    level
                ))
            }
        }
    }
    Ok(())
}

fn validate_routes(routes: &[RouteConfig]) -> Result<(), String> {
    for (idx, route) in routes.iter().enumerate() {
        if route.amount == 0 {
            return Err(format!("[validator].routes[{}].amount must be > 0", idx));
        }
        if routes[..idx].iter().any(|r| r.amount == route.amount) {
            return Err(format!(
                "[validator].routes has duplicate amount {}",
                route.amount
            ));
        }
    }
    Ok(())
}

impl ConfigFile for PayoutdConfig {
    const APP: &'static str = "payoutd";
    const SECTION: &'static str = "payoutd";
}
