// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Routing of inbound bus messages.
//!
//! Validation failures and `quit` are answered here. Everything else is
//! handed to the cash task, which owns the devices.

use std::sync::Arc;

use payout_protocol::{
    is_quit, parse_request, rejection, Command, CommandMatching, Correlation, InboundTopic,
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::cash_task::DeviceRequest;
use crate::handlers::HARDWARE_UNAVAILABLE;
use crate::publisher::Publisher;

pub struct Dispatcher {
    publisher: Publisher,
    device_tx: mpsc::Sender<DeviceRequest>,
    matching: CommandMatching,
    shutdown: Arc<watch::Sender<bool>>,
}

impl Dispatcher {
    pub fn new(
        publisher: Publisher,
        device_tx: mpsc::Sender<DeviceRequest>,
        matching: CommandMatching,
        shutdown: Arc<watch::Sender<bool>>,
    ) -> Self {
        Self {
            publisher,
            device_tx,
            matching,
            shutdown,
        }
    }

    /// Handle one message. Every request on a device topic gets exactly one
    /// reply, either from here or from the cash task.
    pub async fn dispatch(&self, topic: &str, payload: &str) {
        let role = match InboundTopic::classify(topic) {
            Some(InboundTopic::Request(role)) => role,
            Some(InboundTopic::Metacash) => {
                debug!("metacash: {}", payload);
                return;
            }
            None => return,
        };
        debug!("{} -> {}", topic, payload);

        let request = match parse_request(payload) {
            Ok(request) => request,
            Err(e) => {
                warn!("{}: rejected request: {}", role, e);
                self.publisher.respond(role, rejection(&e));
                return;
            }
        };
        let correlation = Correlation::new(request.msg_id());

        if is_quit(&request, self.matching) {
            info!("quit requested on {}", topic);
            self.publisher.respond(role, correlation.ok());
            let _ = self.shutdown.send(true);
            return;
        }

        let device_request = DeviceRequest {
            role,
            command: Command::resolve(&request, self.matching),
            request,
            correlation,
        };
        if let Err(mpsc::error::SendError(rejected)) = self.device_tx.send(device_request).await {
            warn!("{}: cash task gone, dropping '{}'", role, rejected.request.cmd());
            self.publisher
                .respond(role, rejected.correlation.error(HARDWARE_UNAVAILABLE));
        }
    }
}

#[cfg(test)]
mod tests {
    use payout_core::DeviceRole;
    use serde_json::{json, Value};
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;
    use crate::publisher::OutboundMessage;

    struct Harness {
        dispatcher: Dispatcher,
        outbound: UnboundedReceiver<OutboundMessage>,
        devices: mpsc::Receiver<DeviceRequest>,
        shutdown: watch::Receiver<bool>,
    }

    fn harness(matching: CommandMatching) -> Harness {
        let (publisher, outbound) = Publisher::channel();
        let (device_tx, devices) = mpsc::channel(4);
        let (shutdown_tx, shutdown) = watch::channel(false);
        Harness {
            dispatcher: Dispatcher::new(publisher, device_tx, matching, Arc::new(shutdown_tx)),
            outbound,
            devices,
            shutdown,
        }
    }

    fn reply(h: &mut Harness) -> OutboundMessage {
        h.outbound.try_recv().expect("one reply published")
    }

    #[tokio::test]
    async fn test_unparsable_message() {
        let mut h = harness(CommandMatching::Exact);
        h.dispatcher.dispatch("hopper-request", "{\"msgId\":\n").await;
        let message = reply(&mut h);
        assert_eq!(message.topic, "hopper-response");
        assert_eq!(message.payload["error"], "could not parse json");
        assert_eq!(message.payload["line"], 2);
        assert!(message.payload.get("correlId").is_none());
        assert!(h.outbound.try_recv().is_err());
        assert!(h.devices.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_missing_ids_are_rejected() {
        let mut h = harness(CommandMatching::Exact);
        h.dispatcher
            .dispatch("validator-request", r#"{"cmd":"enable"}"#)
            .await;
        assert_eq!(
            reply(&mut h).payload,
            json!({"error": "property 'msgId' missing or not a string"})
        );

        h.dispatcher
            .dispatch("validator-request", r#"{"msgId":"c1","cmd":5}"#)
            .await;
        let message = reply(&mut h);
        assert_eq!(message.topic, "validator-response");
        assert_eq!(
            message.payload,
            json!({"correlId": "c1", "error": "property 'cmd' missing or not a string"})
        );
        assert!(h.devices.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_quit_acknowledges_and_signals_shutdown() {
        let mut h = harness(CommandMatching::Exact);
        h.dispatcher
            .dispatch("hopper-request", r#"{"msgId":"q1","cmd":"quit"}"#)
            .await;
        let message = reply(&mut h);
        assert_eq!(message.topic, "hopper-response");
        assert_eq!(message.payload["result"], "ok");
        assert_eq!(message.payload["correlId"], "q1");
        assert!(*h.shutdown.borrow());
        assert!(h.devices.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_requests_are_forwarded() {
        let mut h = harness(CommandMatching::Exact);
        h.dispatcher
            .dispatch(
                "validator-request",
                r#"{"msgId":"d1","cmd":"do-payout","amount":550}"#,
            )
            .await;
        let forwarded = h.devices.try_recv().expect("forwarded");
        assert_eq!(forwarded.role, DeviceRole::Validator);
        assert_eq!(forwarded.command, Some(Command::DoPayout));
        assert_eq!(forwarded.correlation.correl_id(), "d1");
        assert_ne!(forwarded.correlation.msg_id(), "d1");
        assert!(h.outbound.try_recv().is_err());

        h.dispatcher
            .dispatch("hopper-request", r#"{"msgId":"d2","cmd":"dance"}"#)
            .await;
        let forwarded = h.devices.try_recv().expect("forwarded");
        assert_eq!(forwarded.command, None);
        assert_eq!(forwarded.request.cmd(), "dance");
    }

    #[tokio::test]
    async fn test_raw_body_matching() {
        let mut h = harness(CommandMatching::RawBody);
        h.dispatcher
            .dispatch(
                "hopper-request",
                r#"{"msgId":"e1","cmd":"enable"}"#,
            )
            .await;
        let forwarded = h.devices.try_recv().expect("forwarded");
        assert_eq!(forwarded.command, Some(Command::Enable));

        // whitespace around the colon defeats the body search
        h.dispatcher
            .dispatch("hopper-request", r#"{"msgId":"e2", "cmd" : "enable"}"#)
            .await;
        let forwarded = h.devices.try_recv().expect("forwarded");
        assert_eq!(forwarded.command, None);
    }

    #[tokio::test]
    async fn test_other_topics_are_silent() {
        let mut h = harness(CommandMatching::Exact);
        h.dispatcher
            .dispatch("metacash", r#"{"msgId":"m1","cmd":"quit"}"#)
            .await;
        h.dispatcher.dispatch("weather", "not json").await;
        assert!(h.outbound.try_recv().is_err());
        assert!(h.devices.try_recv().is_err());
        assert!(!*h.shutdown.borrow());
    }

    #[tokio::test]
    async fn test_closed_cash_task_answers_unavailable() {
        let mut h = harness(CommandMatching::Exact);
        let (closed_tx, closed_rx) = mpsc::channel(1);
        drop(closed_rx);
        h.dispatcher.device_tx = closed_tx;
        h.dispatcher
            .dispatch("hopper-request", r#"{"msgId":"f1","cmd":"enable"}"#)
            .await;
        let payload: Value = reply(&mut h).payload;
        assert_eq!(payload, json!({"correlId": "f1", "error": "hardware unavailable"}));
    }
}
