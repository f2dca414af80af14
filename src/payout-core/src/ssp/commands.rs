// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Codec operations executed through a transport.
//!
//! No retries happen here; the transport owns the retry budget and a
//! timeout surfaces as `SspError::Timeout`.

use super::codec::{self, DenominationLevel, PayoutOption, SecurityLevel};
use super::{Currency, SspResult, SspTransport};

async fn exchange(transport: &mut dyn SspTransport, command: &[u8]) -> SspResult<Vec<u8>> {
    let response = transport.send_command(command).await?;
    codec::check_status(&response).map(<[u8]>::to_vec)
}

pub async fn get_firmware_version(transport: &mut dyn SspTransport) -> SspResult<String> {
    let payload = exchange(transport, &[codec::CMD_GET_FIRMWARE_VERSION]).await?;
    codec::decode_firmware_version(&payload)
}

pub async fn get_dataset_version(transport: &mut dyn SspTransport) -> SspResult<String> {
    let payload = exchange(transport, &[codec::CMD_GET_DATASET_VERSION]).await?;
    codec::decode_dataset_version(&payload)
}

/// Returns the raw reason code; see [`codec::reject_reason`].
pub async fn last_reject_note(transport: &mut dyn SspTransport) -> SspResult<u8> {
    let payload = exchange(transport, &[codec::CMD_LAST_REJECT_NOTE]).await?;
    codec::decode_last_reject(&payload)
}

pub async fn set_refill_mode(transport: &mut dyn SspTransport) -> SspResult<()> {
    exchange(transport, &codec::encode_refill_mode()).await?;
    Ok(())
}

/// A zero `level` sets the stored count of `value` to zero; any other level
/// is added to the current count by the device.
pub async fn set_denomination_level(
    transport: &mut dyn SspTransport,
    level: u16,
    value: u32,
    currency: Currency,
) -> SspResult<()> {
    let command = codec::encode_set_denomination_level(level, value, currency);
    exchange(transport, &command).await?;
    Ok(())
}

pub async fn get_all_levels(
    transport: &mut dyn SspTransport,
) -> SspResult<Vec<DenominationLevel>> {
    let payload = exchange(transport, &[codec::CMD_GET_ALL_LEVELS]).await?;
    codec::decode_levels(&payload)
}

pub async fn float(
    transport: &mut dyn SspTransport,
    amount: u32,
    currency: Currency,
    option: PayoutOption,
) -> SspResult<()> {
    exchange(transport, &codec::encode_float(amount, currency, option)).await?;
    Ok(())
}

pub async fn payout(
    transport: &mut dyn SspTransport,
    amount: u32,
    currency: Currency,
    option: PayoutOption,
) -> SspResult<()> {
    exchange(transport, &codec::encode_payout(amount, currency, option)).await?;
    Ok(())
}

pub async fn channel_security_data(
    transport: &mut dyn SspTransport,
) -> SspResult<Vec<SecurityLevel>> {
    let payload = exchange(transport, &[codec::CMD_CHANNEL_SECURITY]).await?;
    codec::decode_channel_security(&payload)
}

pub async fn configure_bezel(
    transport: &mut dyn SspTransport,
    red: u8,
    green: u8,
    blue: u8,
    persist: bool,
) -> SspResult<()> {
    let command = codec::encode_configure_bezel(red, green, blue, persist);
    exchange(transport, &command).await?;
    Ok(())
}

pub async fn display_on(transport: &mut dyn SspTransport) -> SspResult<()> {
    exchange(transport, &[codec::CMD_DISPLAY_ON]).await?;
    Ok(())
}

pub async fn display_off(transport: &mut dyn SspTransport) -> SspResult<()> {
    exchange(transport, &[codec::CMD_DISPLAY_OFF]).await?;
    Ok(())
}

pub async fn empty(transport: &mut dyn SspTransport) -> SspResult<()> {
    exchange(transport, &[codec::CMD_EMPTY]).await?;
    Ok(())
}

pub async fn smart_empty(transport: &mut dyn SspTransport) -> SspResult<()> {
    exchange(transport, &[codec::CMD_SMART_EMPTY]).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::ssp::{
        PollEvent, ResponseStatus, Route, SspError, SspFuture, UnitSetup,
    };

    /// Replays canned raw responses and records every command sent.
    #[derive(Default)]
    struct ReplayTransport {
        responses: VecDeque<SspResult<Vec<u8>>>,
        sent: Vec<Vec<u8>>,
    }

    impl ReplayTransport {
        fn answering(responses: Vec<SspResult<Vec<u8>>>) -> Self {
            Self {
                responses: responses.into(),
                sent: Vec::new(),
            }
        }
    }

    fn unused<'a, T: Send + 'a>() -> SspFuture<'a, T> {
        Box::pin(async { Err(SspError::Malformed("not scripted".to_string())) })
    }

    impl SspTransport for ReplayTransport {
        fn sync<'a>(&'a mut self) -> SspFuture<'a, ()> {
            unused()
        }
        fn setup_encryption<'a>(&'a mut self, _key: u64) -> SspFuture<'a, ()> {
            unused()
        }
        fn host_protocol<'a>(&'a mut self, _version: u8) -> SspFuture<'a, ()> {
            unused()
        }
        fn setup_request<'a>(&'a mut self) -> SspFuture<'a, UnitSetup> {
            unused()
        }
        fn enable<'a>(&'a mut self) -> SspFuture<'a, ()> {
            unused()
        }
        fn disable<'a>(&'a mut self) -> SspFuture<'a, ()> {
            unused()
        }
        fn set_inhibits<'a>(&'a mut self, _low: u8, _high: u8) -> SspFuture<'a, ()> {
            unused()
        }
        fn enable_payout<'a>(&'a mut self, _unit_type: u8) -> SspFuture<'a, ()> {
            unused()
        }
        fn set_route<'a>(
            &'a mut self,
            _amount: u32,
            _currency: Currency,
            _route: Route,
        ) -> SspFuture<'a, ()> {
            unused()
        }
        fn set_coinmech_inhibits<'a>(
            &'a mut self,
            _value: u32,
            _currency: Currency,
            _enabled: bool,
        ) -> SspFuture<'a, ()> {
            unused()
        }
        fn poll<'a>(&'a mut self) -> SspFuture<'a, Vec<PollEvent>> {
            unused()
        }
        fn run_calibration<'a>(&'a mut self) -> SspFuture<'a, ()> {
            unused()
        }
        fn send_command<'a>(&'a mut self, data: &'a [u8]) -> SspFuture<'a, Vec<u8>> {
            self.sent.push(data.to_vec());
            let next = self.responses.pop_front().unwrap_or(Err(SspError::Timeout));
            Box::pin(async move { next })
        }
    }

    #[tokio::test]
    async fn firmware_version_is_read_after_status() {
        let mut response = vec![0xF0];
        response.extend_from_slice(b"NV0200414149800X");
        let mut transport = ReplayTransport::answering(vec![Ok(response)]);
        let version = get_firmware_version(&mut transport).await.expect("version");
        assert_eq!(version, "NV0200414149800X");
        assert_eq!(transport.sent, vec![vec![codec::CMD_GET_FIRMWARE_VERSION]]);
    }

    #[tokio::test]
    async fn payout_refusal_keeps_error_byte() {
        let mut transport = ReplayTransport::answering(vec![Ok(vec![0xF5, 0x02])]);
        let err = payout(&mut transport, 550, Currency::EUR, PayoutOption::Do)
            .await
            .expect_err("payout refused");
        assert_eq!(err.error_byte(), Some(0x02));
        assert!(matches!(
            err,
            SspError::Status {
                status: ResponseStatus::CannotProcess,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn timeout_is_not_a_status() {
        let mut transport = ReplayTransport::answering(vec![Err(SspError::Timeout)]);
        let err = last_reject_note(&mut transport).await.expect_err("timeout");
        assert_eq!(err, SspError::Timeout);
    }

    #[tokio::test]
    async fn empty_levels_answer() {
        let mut transport = ReplayTransport::answering(vec![Ok(vec![0xF0, 0x00])]);
        let levels = get_all_levels(&mut transport).await.expect("levels");
        assert!(levels.is_empty());
    }

    #[tokio::test]
    async fn key_not_set_status() {
        let mut transport = ReplayTransport::answering(vec![Ok(vec![0xFA])]);
        assert_eq!(empty(&mut transport).await, Err(SspError::KeyNotSet));
    }
}
