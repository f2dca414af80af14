// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Fire-and-forget outbound messages.
//!
//! Callers hand messages to a channel; the bus task drains it and
//! publishes. Nobody waits for the bus.

use payout_core::DeviceRole;
use payout_protocol::{event_topic, response_topic};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub topic: &'static str,
    pub payload: Value,
}

#[derive(Debug, Clone)]
pub struct Publisher {
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl Publisher {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Answer on the response topic of `role`.
    pub fn respond(&self, role: DeviceRole, payload: Value) {
        self.publish(response_topic(role), payload);
    }

    /// Spontaneous device event.
    pub fn event(&self, role: DeviceRole, payload: Value) {
        self.publish(event_topic(role), payload);
    }

    pub fn publish(&self, topic: &'static str, payload: Value) {
        if self.tx.send(OutboundMessage { topic, payload }).is_err() {
            debug!("Publisher closed, dropping message for {}", topic);
        }
    }
}
