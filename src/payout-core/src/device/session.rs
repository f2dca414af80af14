// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ssp::codec::HOST_PROTOCOL_VERSION;
use crate::ssp::{SspError, SspResult, SspTransport, UnitSetup};

/// High inhibit byte sent with every channel mask; only eight channels are
/// in use.
const HIGH_CHANNELS: u8 = 0xFF;

/// The two peripherals this daemon drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceRole {
    Hopper,
    Validator,
}

impl DeviceRole {
    /// Fixed poll order.
    pub const ALL: [DeviceRole; 2] = [DeviceRole::Hopper, DeviceRole::Validator];

    pub fn as_str(self) -> &'static str {
        match self {
            DeviceRole::Hopper => "hopper",
            DeviceRole::Validator => "validator",
        }
    }
}

impl fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static identity of a device, fixed at configuration time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProfile {
    pub address: u8,
    pub name: String,
    pub key: u64,
}

/// Set of 1-based channel numbers named by a request, as a bit mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelSet(u8);

impl ChannelSet {
    /// Every digit '1'..='8' found in `digits` selects that channel; anything
    /// else is ignored.
    pub fn parse(digits: &str) -> Self {
        let bits = digits
            .chars()
            .filter_map(|c| c.to_digit(10))
            .filter(|d| (1..=8).contains(d))
            .fold(0u8, |acc, d| acc | 1 << (d - 1));
        ChannelSet(bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn enabled_in(self, mask: u8) -> u8 {
        mask | self.0
    }

    pub fn disabled_in(self, mask: u8) -> u8 {
        mask & !self.0
    }

    /// Mask with every channel enabled except the selected ones.
    pub fn inhibited(self) -> u8 {
        !self.0
    }
}

/// Per-device state owned by the cash task.
pub struct DeviceSession {
    role: DeviceRole,
    profile: DeviceProfile,
    channel_inhibits: u8,
    setup: Option<UnitSetup>,
    ready: bool,
    transport: Option<Box<dyn SspTransport>>,
}

impl DeviceSession {
    pub fn new(
        role: DeviceRole,
        profile: DeviceProfile,
        transport: Option<Box<dyn SspTransport>>,
    ) -> Self {
        Self {
            role,
            profile,
            channel_inhibits: 0,
            setup: None,
            ready: false,
            transport,
        }
    }

    pub fn role(&self) -> DeviceRole {
        self.role
    }

    pub fn address(&self) -> u8 {
        self.profile.address
    }

    pub fn name(&self) -> &str {
        &self.profile.name
    }

    pub fn key(&self) -> u64 {
        self.profile.key
    }

    /// Last inhibit mask the device acknowledged.
    pub fn channel_inhibits(&self) -> u8 {
        self.channel_inhibits
    }

    pub fn setup(&self) -> Option<&UnitSetup> {
        self.setup.as_ref()
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn has_transport(&self) -> bool {
        self.transport.is_some()
    }

    pub fn transport(&mut self) -> SspResult<&mut (dyn SspTransport + 'static)> {
        match self.transport.as_deref_mut() {
            Some(transport) => Ok(transport),
            None => Err(SspError::Unavailable),
        }
    }

    pub(crate) fn set_setup(&mut self, setup: UnitSetup) {
        self.setup = Some(setup);
    }

    pub(crate) fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
    }

    /// Write a new low inhibit mask and remember it once acknowledged.
    pub async fn apply_channel_inhibits(&mut self, mask: u8) -> SspResult<()> {
        self.transport()?.set_inhibits(mask, HIGH_CHANNELS).await?;
        self.channel_inhibits = mask;
        Ok(())
    }

    /// Initial inhibit write during setup, high byte cleared.
    pub(crate) async fn reset_channel_inhibits(&mut self) -> SspResult<()> {
        self.transport()?.set_inhibits(0, 0).await?;
        self.channel_inhibits = 0;
        Ok(())
    }

    pub async fn negotiate_encryption(&mut self) -> SspResult<()> {
        let key = self.profile.key;
        self.transport()?.setup_encryption(key).await
    }

    pub async fn pin_protocol_version(&mut self) -> SspResult<()> {
        self.transport()?
            .host_protocol(HOST_PROTOCOL_VERSION)
            .await
    }
}

impl fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("role", &self.role)
            .field("address", &format_args!("0x{:02X}", self.profile.address))
            .field("name", &self.profile.name)
            .field("channel_inhibits", &format_args!("{:08b}", self.channel_inhibits))
            .field("ready", &self.ready)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_set_parse() {
        assert_eq!(ChannelSet::parse("135").bits(), 0b0001_0101);
        assert_eq!(ChannelSet::parse("8").bits(), 0b1000_0000);
        assert_eq!(ChannelSet::parse("1,2 x9 0").bits(), 0b0000_0011);
        assert_eq!(ChannelSet::parse("").bits(), 0);
        assert_eq!(ChannelSet::parse("11").bits(), 0b0000_0001);
    }

    #[test]
    fn test_enable_then_disable_restores_mask() {
        let set = ChannelSet::parse("246");
        for mask in [0x00u8, 0x81, 0xFF, 0x2A] {
            let enabled = set.enabled_in(mask);
            let restored = set.disabled_in(enabled);
            if mask & set.bits() == 0 {
                assert_eq!(restored, mask);
            }
            assert_eq!(restored & set.bits(), 0);
        }
    }

    #[test]
    fn test_inhibited_mask() {
        assert_eq!(ChannelSet::parse("12").inhibited(), 0b1111_1100);
        assert_eq!(ChannelSet::default().inhibited(), 0xFF);
    }

    #[test]
    fn test_session_without_transport_is_unavailable() {
        let mut session = DeviceSession::new(
            DeviceRole::Hopper,
            DeviceProfile {
                address: 0x10,
                name: "Mr. Coin".to_string(),
                key: 0x0123_4567_0123_4567,
            },
            None,
        );
        assert!(!session.is_ready());
        assert!(matches!(session.transport(), Err(SspError::Unavailable)));
        assert!(session.setup().is_none());
    }

    #[test]
    fn test_role_names() {
        assert_eq!(DeviceRole::Hopper.to_string(), "hopper");
        assert_eq!(DeviceRole::ALL[1], DeviceRole::Validator);
    }
}
