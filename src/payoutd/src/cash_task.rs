// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! The cash task owns both device sessions.
//!
//! Both peripherals share one serial line, so polls and commands run one
//! at a time from a single loop. Every device call is preceded by the
//! settle delay the peripherals need between commands.

use std::time::Duration;

use payout_core::device::{initialize, InitOptions};
use payout_core::{DeviceRole, DeviceSession, PollEvent, SspError, SspResult};
use payout_protocol::{translate_event, Command, Correlation, Request, SideEffect};
use serde_json::json;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

use crate::error::CashTaskError;
use crate::handlers::{self, HandlerSettings, HARDWARE_UNAVAILABLE};
use crate::publisher::Publisher;

/// Commands slower than this are logged as warnings.
const SLOW_COMMAND: Duration = Duration::from_millis(2000);

/// Configuration for the cash task.
pub struct CashTaskConfig {
    pub hopper: DeviceSession,
    pub validator: DeviceSession,
    pub init: InitOptions,
    pub poll_interval: Duration,
    pub settle_delay: Duration,
    pub settings: HandlerSettings,
}

/// A validated request routed to one device.
#[derive(Debug)]
pub struct DeviceRequest {
    pub role: DeviceRole,
    /// `None` when `cmd` named no known command.
    pub command: Option<Command>,
    pub request: Request,
    pub correlation: Correlation,
}

struct Devices {
    hopper: DeviceSession,
    validator: DeviceSession,
}

impl Devices {
    fn get_mut(&mut self, role: DeviceRole) -> &mut DeviceSession {
        match role {
            DeviceRole::Hopper => &mut self.hopper,
            DeviceRole::Validator => &mut self.validator,
        }
    }
}

pub async fn run_cash_task(
    config: CashTaskConfig,
    mut rx: mpsc::Receiver<DeviceRequest>,
    publisher: Publisher,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), CashTaskError> {
    let CashTaskConfig {
        hopper,
        validator,
        init,
        poll_interval,
        settle_delay,
        settings,
    } = config;
    let mut devices = Devices { hopper, validator };

    for role in DeviceRole::ALL {
        let session = devices.get_mut(role);
        if !session.has_transport() {
            warn!("{}: no transport, hardware unavailable", role);
            continue;
        }
        if let Err(e) = initialize(session, &init).await {
            error!("{}: initialization failed: {}", role, e);
        }
    }

    let mut poll_sleep = Box::pin(time::sleep(poll_interval));
    loop {
        tokio::select! {
            _ = &mut poll_sleep => {
                poll_sleep = Box::pin(time::sleep(poll_interval));
                for role in DeviceRole::ALL {
                    let session = devices.get_mut(role);
                    if !session.is_ready() {
                        continue;
                    }
                    time::sleep(settle_delay).await;
                    poll_device(session, &publisher).await?;
                }
            }

            maybe_req = rx.recv() => {
                let Some(req) = maybe_req else { break; };
                let role = req.role;
                let reply = process_request(devices.get_mut(role), req, settle_delay, &settings).await;
                publisher.respond(role, reply);
            }

            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    info!("cash task shutting down");
    Ok(())
}

async fn process_request(
    session: &mut DeviceSession,
    req: DeviceRequest,
    settle_delay: Duration,
    settings: &HandlerSettings,
) -> serde_json::Value {
    let DeviceRequest {
        role,
        command,
        request,
        correlation,
    } = req;

    if !session.is_ready() {
        debug!("{}: '{}' while not ready", role, request.cmd());
        return correlation.error(HARDWARE_UNAVAILABLE);
    }
    let Some(command) = command else {
        info!("{}: unknown command '{}'", role, request.cmd());
        return correlation.error_with("unknown command", [("cmd", json!(request.cmd()))]);
    };

    time::sleep(settle_delay).await;
    let started = Instant::now();
    let reply = handlers::handle(session, command, &request, &correlation, settings).await;
    let elapsed = started.elapsed();
    if elapsed > SLOW_COMMAND {
        warn!("{}: {} took {:?}", role, command.name(), elapsed);
    } else {
        debug!("{}: {} completed in {:?}", role, command.name(), elapsed);
    }
    reply
}

async fn poll(session: &mut DeviceSession) -> SspResult<Vec<PollEvent>> {
    session.transport()?.poll().await
}

async fn calibrate(session: &mut DeviceSession) -> SspResult<()> {
    session.transport()?.run_calibration().await
}

/// Poll once and publish every event in order. A failed protocol re-pin
/// after a reset is the only error returned.
async fn poll_device(session: &mut DeviceSession, publisher: &Publisher) -> Result<(), CashTaskError> {
    let role = session.role();
    let events = match poll(session).await {
        Ok(events) => events,
        Err(SspError::Timeout) => {
            warn!("{}: poll timed out", role);
            return Ok(());
        }
        Err(SspError::KeyNotSet) => {
            info!("{}: encryption key not set, negotiating", role);
            if let Err(e) = session.negotiate_encryption().await {
                warn!("{}: encryption negotiation failed: {}", role, e);
            }
            return Ok(());
        }
        Err(e) => {
            warn!("{}: poll failed: {}", role, e);
            return Ok(());
        }
    };

    for event in &events {
        let translated = translate_event(role, event, session.setup());
        debug!("{} event: {}", role, translated.message);
        publisher.event(role, translated.message);

        match translated.side_effect {
            Some(SideEffect::RepinProtocol) => {
                session
                    .pin_protocol_version()
                    .await
                    .map_err(|source| CashTaskError::ProtocolRepin { role, source })?;
                info!("{}: host protocol pinned again after reset", role);
            }
            Some(SideEffect::RunCalibration) => {
                if let Err(e) = calibrate(session).await {
                    warn!("{}: running calibration failed: {}", role, e);
                }
            }
            None => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use payout_backend::sim::{SimHandle, SimOp, SimulatedDevice};
    use payout_core::{DeviceProfile, PollEventKind, ResponseStatus};
    use payout_protocol::{parse_request, CommandMatching};
    use serde_json::Value;
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;
    use crate::config::DenominationLevelFields;
    use crate::publisher::OutboundMessage;

    const SETTINGS: HandlerSettings = HandlerSettings {
        currency: payout_core::Currency::EUR,
        level_fields: DenominationLevelFields::Swapped,
    };

    fn profile(address: u8) -> DeviceProfile {
        DeviceProfile {
            address,
            name: "test".to_string(),
            key: 0x0123_4567_0123_4567,
        }
    }

    fn simulated(role: DeviceRole, address: u8) -> (DeviceSession, SimHandle) {
        let (device, handle) = SimulatedDevice::new(role, address);
        (
            DeviceSession::new(role, profile(address), Some(Box::new(device))),
            handle,
        )
    }

    async fn ready(role: DeviceRole, address: u8) -> (DeviceSession, SimHandle) {
        let (mut session, handle) = simulated(role, address);
        initialize(&mut session, &InitOptions::default())
            .await
            .expect("simulated device initializes");
        (session, handle)
    }

    fn device_request(role: DeviceRole, raw: &str) -> DeviceRequest {
        let request = parse_request(raw).expect("valid request");
        DeviceRequest {
            role,
            command: Command::resolve(&request, CommandMatching::Exact),
            correlation: Correlation::with_ids("r1".to_string(), request.msg_id().to_string()),
            request,
        }
    }

    async fn next_on(rx: &mut UnboundedReceiver<OutboundMessage>, topic: &str) -> Value {
        loop {
            let message = time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("message before timeout")
                .expect("publisher open");
            if message.topic == topic {
                return message.payload;
            }
        }
    }

    struct Running {
        requests: mpsc::Sender<DeviceRequest>,
        outbound: UnboundedReceiver<OutboundMessage>,
        shutdown: watch::Sender<bool>,
        handle: tokio::task::JoinHandle<Result<(), CashTaskError>>,
    }

    fn start(hopper: DeviceSession, validator: DeviceSession) -> Running {
        let (publisher, outbound) = Publisher::channel();
        let (requests, rx) = mpsc::channel(8);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let config = CashTaskConfig {
            hopper,
            validator,
            init: InitOptions::default(),
            poll_interval: Duration::from_millis(20),
            settle_delay: Duration::ZERO,
            settings: SETTINGS,
        };
        let handle = tokio::spawn(run_cash_task(config, rx, publisher, shutdown_rx));
        Running {
            requests,
            outbound,
            shutdown,
            handle,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_are_answered_on_role_topic() {
        let (hopper, _hopper_sim) = simulated(DeviceRole::Hopper, 0x10);
        let (validator, validator_sim) = simulated(DeviceRole::Validator, 0x00);
        let mut running = start(hopper, validator);

        running
            .requests
            .send(device_request(
                DeviceRole::Validator,
                r#"{"msgId":"a1","cmd":"get-dataset-version"}"#,
            ))
            .await
            .expect("task running");
        let reply = next_on(&mut running.outbound, "validator-response").await;
        assert_eq!(
            reply,
            json!({"msgId": "r1", "correlId": "a1", "version": "EUR01610"})
        );
        assert!(validator_sim.is_payout_enabled());

        running
            .requests
            .send(device_request(
                DeviceRole::Hopper,
                r#"{"msgId":"a2","cmd":"fly"}"#,
            ))
            .await
            .expect("task running");
        let reply = next_on(&mut running.outbound, "hopper-response").await;
        assert_eq!(
            reply,
            json!({"correlId": "a2", "error": "unknown command", "cmd": "fly"})
        );

        running.shutdown.send(true).expect("task listening");
        assert!(running.handle.await.expect("task joined").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_without_transport_is_unavailable() {
        let hopper = DeviceSession::new(DeviceRole::Hopper, profile(0x10), None);
        let validator = DeviceSession::new(DeviceRole::Validator, profile(0x00), None);
        let mut running = start(hopper, validator);

        for raw in [
            r#"{"msgId":"b1","cmd":"enable"}"#,
            r#"{"msgId":"b2","cmd":"no-such-command"}"#,
        ] {
            running
                .requests
                .send(device_request(DeviceRole::Hopper, raw))
                .await
                .expect("task running");
            let reply = next_on(&mut running.outbound, "hopper-response").await;
            assert_eq!(reply["error"], "hardware unavailable");
        }

        drop(running.requests);
        assert!(running.handle.await.expect("task joined").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_publishes_events() {
        let (hopper, hopper_sim) = simulated(DeviceRole::Hopper, 0x10);
        let (validator, validator_sim) = simulated(DeviceRole::Validator, 0x00);
        let mut running = start(hopper, validator);

        hopper_sim.insert_coin(200);
        let event = next_on(&mut running.outbound, "hopper-event").await;
        assert_eq!(event, json!({"event": "coin credit", "amount": 200, "cc": "EUR"}));

        validator_sim.push_event(PollEvent::new(PollEventKind::Stacked));
        let event = next_on(&mut running.outbound, "validator-event").await;
        assert_eq!(event, json!({"event": "stacked"}));

        running.shutdown.send(true).expect("task listening");
        assert!(running.handle.await.expect("task joined").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_init_only_takes_one_device_down() {
        let (hopper, hopper_sim) = simulated(DeviceRole::Hopper, 0x10);
        let (validator, validator_sim) = simulated(DeviceRole::Validator, 0x00);
        hopper_sim.fail_next(SimOp::Sync, SspError::Timeout);
        let mut running = start(hopper, validator);

        running
            .requests
            .send(device_request(
                DeviceRole::Hopper,
                r#"{"msgId":"h1","cmd":"do-payout","amount":100}"#,
            ))
            .await
            .expect("task running");
        let reply = next_on(&mut running.outbound, "hopper-response").await;
        assert_eq!(
            reply,
            json!({"correlId": "h1", "error": "hardware unavailable"})
        );

        running
            .requests
            .send(device_request(
                DeviceRole::Validator,
                r#"{"msgId":"v1","cmd":"get-firmware-version"}"#,
            ))
            .await
            .expect("task running");
        let reply = next_on(&mut running.outbound, "validator-response").await;
        assert_eq!(reply["correlId"], "v1");
        assert!(reply.get("version").is_some());

        validator_sim.push_event(PollEvent::new(PollEventKind::Stacked));
        let event = next_on(&mut running.outbound, "validator-event").await;
        assert_eq!(event, json!({"event": "stacked"}));
        assert!(!hopper_sim.calls().contains(&SimOp::Poll));

        running.shutdown.send(true).expect("task listening");
        assert!(running.handle.await.expect("task joined").is_ok());
    }

    #[tokio::test]
    async fn test_reset_renegotiates_and_repins() {
        let (mut session, sim) = ready(DeviceRole::Hopper, 0x10).await;
        let (publisher, mut outbound) = Publisher::channel();

        sim.power_cycle();
        assert_eq!(sim.protocol(), 0);

        // the key is gone first; the poll asks for a new one
        poll_device(&mut session, &publisher).await.expect("not fatal");
        assert!(outbound.try_recv().is_err());

        poll_device(&mut session, &publisher).await.expect("re-pin works");
        let event = outbound.try_recv().expect("reset published");
        assert_eq!(event.payload, json!({"event": "unit reset"}));
        assert_eq!(sim.protocol(), 6);
        let negotiations = sim
            .calls()
            .iter()
            .filter(|op| **op == SimOp::SetupEncryption)
            .count();
        assert_eq!(negotiations, 2);
    }

    #[tokio::test]
    async fn test_failed_repin_is_fatal_and_stops_the_batch() {
        let (mut session, sim) = ready(DeviceRole::Validator, 0x00).await;
        let (publisher, mut outbound) = Publisher::channel();

        sim.power_cycle();
        sim.push_event(PollEvent::new(PollEventKind::Stacked));
        poll_device(&mut session, &publisher).await.expect("not fatal");

        sim.fail_next(SimOp::HostProtocol, SspError::status(ResponseStatus::Fail));
        let err = poll_device(&mut session, &publisher)
            .await
            .expect_err("re-pin failure is fatal");
        assert!(matches!(
            err,
            CashTaskError::ProtocolRepin {
                role: DeviceRole::Validator,
                ..
            }
        ));
        assert_eq!(
            outbound.try_recv().expect("reset published").payload,
            json!({"event": "unit reset"})
        );
        assert!(outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_poll_timeout_publishes_nothing() {
        let (mut session, sim) = ready(DeviceRole::Hopper, 0x10).await;
        let (publisher, mut outbound) = Publisher::channel();
        sim.insert_coin(100);
        sim.fail_next(SimOp::Poll, SspError::Timeout);

        poll_device(&mut session, &publisher).await.expect("not fatal");
        assert!(outbound.try_recv().is_err());

        poll_device(&mut session, &publisher).await.expect("not fatal");
        assert_eq!(outbound.try_recv().expect("event").payload["amount"], 100);
    }

    #[tokio::test]
    async fn test_recalibration_request_runs_calibration() {
        let (mut session, sim) = ready(DeviceRole::Hopper, 0x10).await;
        let (publisher, mut outbound) = Publisher::channel();
        sim.push_event(PollEvent::new(PollEventKind::CalibrationFail).with_data(7, 0));

        poll_device(&mut session, &publisher).await.expect("not fatal");
        assert_eq!(
            outbound.try_recv().expect("event").payload,
            json!({"event": "recalibrating"})
        );
        assert!(sim.calls().contains(&SimOp::RunCalibration));
    }
}
