// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Normalized event vocabulary.
//!
//! Each poll event becomes exactly one outbound message. Hopper and
//! validator name some kinds differently, and a few kinds ask the caller to
//! act on the device before the next event is handled.

use payout_core::ssp::CalibrationFailure;
use payout_core::{DeviceRole, PollEvent, PollEventKind, UnitSetup};
use serde_json::{json, Map, Value};

/// Device action the caller must take for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideEffect {
    /// The unit reset; pin the host protocol version again.
    RepinProtocol,
    /// The unit asked to be recalibrated.
    RunCalibration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranslatedEvent {
    pub message: Value,
    pub side_effect: Option<SideEffect>,
}

impl TranslatedEvent {
    fn plain(message: Value) -> Self {
        Self {
            message,
            side_effect: None,
        }
    }
}

/// Translate one poll event. `setup` is the device's capability table,
/// used to price channel indexed validator events.
pub fn translate_event(
    role: DeviceRole,
    event: &PollEvent,
    setup: Option<&UnitSetup>,
) -> TranslatedEvent {
    let Some(kind) = event.kind() else {
        return TranslatedEvent::plain(unknown(event));
    };

    match kind {
        PollEventKind::Reset => TranslatedEvent {
            message: named("unit reset"),
            side_effect: Some(SideEffect::RepinProtocol),
        },
        PollEventKind::CalibrationFail => calibration(event),
        _ => {
            let message = match role {
                DeviceRole::Hopper => hopper(kind, event),
                DeviceRole::Validator => validator(kind, event, setup),
            };
            TranslatedEvent::plain(message.unwrap_or_else(|| unknown(event)))
        }
    }
}

fn hopper(kind: PollEventKind, event: &PollEvent) -> Option<Value> {
    let message = match kind {
        PollEventKind::Read if event.data1 > 0 => {
            json!({"event": "read", "channel": event.data1})
        }
        PollEventKind::Read => named("reading"),
        PollEventKind::Dispensing => with_amount("dispensing", event),
        PollEventKind::Dispensed => with_amount("dispensed", event),
        PollEventKind::Floating => with_amount_cc("floating", event),
        PollEventKind::Floated => with_amount_cc("floated", event),
        PollEventKind::CashboxPaid => with_amount_cc("cashbox paid", event),
        PollEventKind::CoinCredit => with_amount_cc("coin credit", event),
        PollEventKind::SmartEmptying => with_amount_cc("smart emptying", event),
        PollEventKind::SmartEmptied => with_amount_cc("smart emptied", event),
        PollEventKind::Jammed => named("jammed"),
        PollEventKind::FraudAttempt => named("fraud attempt"),
        PollEventKind::Empty => named("empty"),
        PollEventKind::Emptying => named("emptying"),
        PollEventKind::Disabled => named("disabled"),
        PollEventKind::Credit => json!({
            "event": "credit",
            "channel": event.data1,
            "cc": event.currency.to_string(),
        }),
        PollEventKind::IncompletePayout => incomplete("incomplete payout", event),
        PollEventKind::IncompleteFloat => incomplete("incomplete float", event),
        _ => return None,
    };
    Some(message)
}

fn validator(kind: PollEventKind, event: &PollEvent, setup: Option<&UnitSetup>) -> Option<Value> {
    let message = match kind {
        PollEventKind::Read if event.data1 > 0 => priced("read", event, setup),
        PollEventKind::Read => named("reading"),
        PollEventKind::Credit => priced("credit", event, setup),
        PollEventKind::Empty => named("empty"),
        PollEventKind::Emptying => named("emptying"),
        PollEventKind::SmartEmptying => named("smart emptying"),
        PollEventKind::IncompletePayout => incomplete("incomplete payout", event),
        PollEventKind::IncompleteFloat => incomplete("incomplete float", event),
        PollEventKind::Rejecting => named("rejecting"),
        PollEventKind::Rejected => named("rejected"),
        PollEventKind::Stacking => named("stacking"),
        PollEventKind::Stored => named("stored"),
        PollEventKind::Stacked => named("stacked"),
        PollEventKind::SafeJam => named("safe jam"),
        PollEventKind::UnsafeJam => named("unsafe jam"),
        PollEventKind::Disabled => named("disabled"),
        PollEventKind::FraudAttempt => json!({"event": "fraud attempt", "dispensed": event.data1}),
        PollEventKind::StackerFull => named("stacker full"),
        PollEventKind::CashboxRemoved => named("cashbox removed"),
        PollEventKind::CashboxReplaced => named("cashbox replaced"),
        PollEventKind::ClearedFromFront => named("cleared from front"),
        PollEventKind::ClearedIntoCashbox => named("cleared into cashbox"),
        _ => return None,
    };
    Some(message)
}

fn named(name: &str) -> Value {
    json!({ "event": name })
}

fn unknown(event: &PollEvent) -> Value {
    json!({"event": "unknown", "id": format!("0x{:02X}", event.code)})
}

fn with_amount(name: &str, event: &PollEvent) -> Value {
    json!({"event": name, "amount": event.data1})
}

fn with_amount_cc(name: &str, event: &PollEvent) -> Value {
    json!({"event": name, "amount": event.data1, "cc": event.currency.to_string()})
}

fn incomplete(name: &str, event: &PollEvent) -> Value {
    json!({
        "event": name,
        "dispensed": event.data1,
        "requested": event.data2,
        "cc": event.currency.to_string(),
    })
}

/// Note event priced from the 1-based channel in `data1`. A channel the
/// table does not have yields an error field instead of an amount.
fn priced(name: &str, event: &PollEvent, setup: Option<&UnitSetup>) -> Value {
    let mut map = Map::new();
    map.insert("event".to_string(), json!(name));
    match setup.map(|s| s.channel(event.data1)) {
        Some(Ok(channel)) => {
            map.insert("amount".to_string(), json!(channel.value as u64 * 100));
        }
        _ => {
            map.insert("error".to_string(), json!("malformed device response"));
        }
    }
    map.insert("channel".to_string(), json!(event.data1));
    Value::Object(map)
}

fn calibration(event: &PollEvent) -> TranslatedEvent {
    match CalibrationFailure::from_code(event.data1) {
        Some(CalibrationFailure::RecalibrationRequested) => TranslatedEvent {
            message: named("recalibrating"),
            side_effect: Some(SideEffect::RunCalibration),
        },
        Some(failure) => TranslatedEvent::plain(
            json!({"event": "calibration fail", "error": failure.description()}),
        ),
        None => TranslatedEvent::plain(json!({
            "event": "calibration fail",
            "error": "unknown",
            "code": event.data1,
        })),
    }
}

#[cfg(test)]
mod tests {
    use payout_core::ssp::ChannelData;
    use payout_core::Currency;

    use super::*;

    fn note_table() -> UnitSetup {
        UnitSetup {
            unit_type: 0x06,
            firmware_version: "0414".to_string(),
            protocol_version: 6,
            channels: [5, 10, 20, 50]
                .into_iter()
                .map(|value| ChannelData {
                    value,
                    currency: Currency::EUR,
                })
                .collect(),
        }
    }

    fn event(kind: PollEventKind, data1: u32, data2: u32) -> PollEvent {
        PollEvent::new(kind).with_data(data1, data2)
    }

    #[test]
    fn test_reset_requests_repin_for_both_roles() {
        for role in DeviceRole::ALL {
            let translated = translate_event(role, &event(PollEventKind::Reset, 0, 0), None);
            assert_eq!(translated.message, json!({"event": "unit reset"}));
            assert_eq!(translated.side_effect, Some(SideEffect::RepinProtocol));
        }
    }

    #[test]
    fn test_validator_credit_is_priced() {
        let setup = note_table();
        let credit = translate_event(
            DeviceRole::Validator,
            &event(PollEventKind::Credit, 3, 0),
            Some(&setup),
        );
        assert_eq!(
            credit.message,
            json!({"event": "credit", "amount": 2000, "channel": 3})
        );
        let read = translate_event(
            DeviceRole::Validator,
            &event(PollEventKind::Read, 4, 0),
            Some(&setup),
        );
        assert_eq!(read.message["amount"], 5000);
        let reading = translate_event(
            DeviceRole::Validator,
            &event(PollEventKind::Read, 0, 0),
            Some(&setup),
        );
        assert_eq!(reading.message, json!({"event": "reading"}));
    }

    #[test]
    fn test_out_of_range_channel_is_flagged() {
        let setup = note_table();
        for channel in [0, 5, 99] {
            let translated = translate_event(
                DeviceRole::Validator,
                &event(PollEventKind::Credit, channel, 0),
                Some(&setup),
            );
            assert_eq!(translated.message["error"], "malformed device response");
            assert!(translated.message.get("amount").is_none());
        }
        let no_table = translate_event(
            DeviceRole::Validator,
            &event(PollEventKind::Credit, 1, 0),
            None,
        );
        assert_eq!(no_table.message["error"], "malformed device response");
    }

    #[test]
    fn test_hopper_vocabulary() {
        let coin = translate_event(
            DeviceRole::Hopper,
            &event(PollEventKind::CoinCredit, 200, 0),
            None,
        );
        assert_eq!(
            coin.message,
            json!({"event": "coin credit", "amount": 200, "cc": "EUR"})
        );
        let read = translate_event(DeviceRole::Hopper, &event(PollEventKind::Read, 2, 0), None);
        assert_eq!(read.message, json!({"event": "read", "channel": 2}));
        let incomplete = translate_event(
            DeviceRole::Hopper,
            &event(PollEventKind::IncompletePayout, 150, 200),
            None,
        );
        assert_eq!(
            incomplete.message,
            json!({"event": "incomplete payout", "dispensed": 150, "requested": 200, "cc": "EUR"})
        );
    }

    #[test]
    fn test_role_specific_kinds() {
        // stacker events only exist on the validator
        let hopper = translate_event(DeviceRole::Hopper, &event(PollEventKind::Stacked, 0, 0), None);
        assert_eq!(hopper.message, json!({"event": "unknown", "id": "0xEB"}));
        let validator = translate_event(
            DeviceRole::Validator,
            &event(PollEventKind::Stacked, 0, 0),
            None,
        );
        assert_eq!(validator.message, json!({"event": "stacked"}));

        let fraud = translate_event(
            DeviceRole::Validator,
            &event(PollEventKind::FraudAttempt, 500, 0),
            None,
        );
        assert_eq!(fraud.message, json!({"event": "fraud attempt", "dispensed": 500}));
    }

    #[test]
    fn test_unmapped_code_is_never_dropped() {
        let raw = PollEvent {
            code: 0x42,
            data1: 0,
            data2: 0,
            currency: Currency::EUR,
        };
        let translated = translate_event(DeviceRole::Validator, &raw, None);
        assert_eq!(translated.message, json!({"event": "unknown", "id": "0x42"}));
        assert_eq!(translated.side_effect, None);
    }

    #[test]
    fn test_calibration_outcomes() {
        let flap = translate_event(
            DeviceRole::Hopper,
            &event(PollEventKind::CalibrationFail, 1, 0),
            None,
        );
        assert_eq!(
            flap.message,
            json!({"event": "calibration fail", "error": "sensor flap"})
        );
        let again = translate_event(
            DeviceRole::Validator,
            &event(PollEventKind::CalibrationFail, 7, 0),
            None,
        );
        assert_eq!(again.message, json!({"event": "recalibrating"}));
        assert_eq!(again.side_effect, Some(SideEffect::RunCalibration));
        let odd = translate_event(
            DeviceRole::Hopper,
            &event(PollEventKind::CalibrationFail, 12, 0),
            None,
        );
        assert_eq!(
            odd.message,
            json!({"event": "calibration fail", "error": "unknown", "code": 12})
        );
    }
}
