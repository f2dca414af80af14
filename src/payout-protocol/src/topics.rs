// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use payout_core::DeviceRole;

pub const METACASH: &str = "metacash";
pub const HOPPER_REQUEST: &str = "hopper-request";
pub const VALIDATOR_REQUEST: &str = "validator-request";

/// Topics the daemon subscribes to.
pub const SUBSCRIBED: [&str; 3] = [METACASH, HOPPER_REQUEST, VALIDATOR_REQUEST];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundTopic {
    Metacash,
    Request(DeviceRole),
}

impl InboundTopic {
    /// `None` for topics the daemon has no handler for.
    pub fn classify(topic: &str) -> Option<Self> {
        match topic {
            METACASH => Some(InboundTopic::Metacash),
            HOPPER_REQUEST => Some(InboundTopic::Request(DeviceRole::Hopper)),
            VALIDATOR_REQUEST => Some(InboundTopic::Request(DeviceRole::Validator)),
            _ => None,
        }
    }
}

pub fn response_topic(role: DeviceRole) -> &'static str {
    match role {
        DeviceRole::Hopper => "hopper-response",
        DeviceRole::Validator => "validator-response",
    }
}

pub fn event_topic(role: DeviceRole) -> &'static str {
    match role {
        DeviceRole::Hopper => "hopper-event",
        DeviceRole::Validator => "validator-event",
    }
}
