// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Simulated hopper and validator for development and testing.
//!
//! Holds device state in memory and answers every call immediately. A
//! [`SimHandle`] shares that state so tests can queue poll events, inject
//! failures and inspect what was sent.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use payout_core::ssp::codec;
use payout_core::ssp::{ChannelData, SspFuture};
use payout_core::{
    Currency, DeviceRole, PollEvent, PollEventKind, ResponseStatus, Route, SspError, SspResult,
    SspTransport, UnitSetup,
};

const VALIDATOR_UNIT_TYPE: u8 = 0x06;
const HOPPER_UNIT_TYPE: u8 = 0x03;

/// Note values in whole currency units, as the validator reports them.
const NOTE_VALUES: [u32; 7] = [5, 10, 20, 50, 100, 200, 500];
/// Coin values in cents.
const COIN_VALUES: [u32; 8] = [1, 2, 5, 10, 20, 50, 100, 200];

/// Reject reason code for a note on an inhibited channel.
const REJECT_CHANNEL_INHIBIT: u8 = 0x06;

const SECURITY_STANDARD: u8 = 2;
const SECURITY_INHIBITED: u8 = 4;

/// Transport call recorded by the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimOp {
    Sync,
    SetupEncryption,
    HostProtocol,
    SetupRequest,
    Enable,
    Disable,
    SetInhibits,
    EnablePayout,
    SetRoute,
    SetCoinmechInhibits,
    Poll,
    RunCalibration,
    /// Raw command, by opcode.
    Command(u8),
}

struct SimState {
    role: DeviceRole,
    address: u8,
    keyed: bool,
    protocol: u8,
    enabled: bool,
    payout_enabled: bool,
    inhibits: (u8, u8),
    currency: Currency,
    channels: Vec<ChannelData>,
    /// Stored count per value in cents.
    levels: BTreeMap<u32, u16>,
    routes: HashMap<u32, Route>,
    coinmech: HashMap<u32, bool>,
    pending: VecDeque<PollEvent>,
    last_reject: u8,
    display_on: bool,
    bezel: Option<(u8, u8, u8, bool)>,
    faults: HashMap<SimOp, VecDeque<SspError>>,
    calls: Vec<SimOp>,
    commands: Vec<Vec<u8>>,
}

impl SimState {
    fn new(role: DeviceRole, address: u8) -> Self {
        let currency = Currency::EUR;
        let values: &[u32] = match role {
            DeviceRole::Validator => &NOTE_VALUES,
            DeviceRole::Hopper => &COIN_VALUES,
        };
        Self {
            role,
            address,
            keyed: false,
            protocol: 0,
            enabled: false,
            payout_enabled: false,
            inhibits: (0, 0),
            currency,
            channels: values
                .iter()
                .map(|&value| ChannelData { value, currency })
                .collect(),
            levels: BTreeMap::new(),
            routes: HashMap::new(),
            coinmech: HashMap::new(),
            pending: VecDeque::new(),
            last_reject: 0,
            display_on: true,
            bezel: None,
            faults: HashMap::new(),
            calls: Vec::new(),
            commands: Vec::new(),
        }
    }

    /// Record the call and return an injected failure if one is queued.
    fn enter(&mut self, op: SimOp) -> SspResult<()> {
        self.calls.push(op);
        if let Some(err) = self.faults.get_mut(&op).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        Ok(())
    }

    fn keyed(&self) -> SspResult<()> {
        if self.keyed {
            Ok(())
        } else {
            Err(SspError::KeyNotSet)
        }
    }

    fn stored_value(&self) -> u64 {
        self.levels
            .iter()
            .map(|(&value, &level)| value as u64 * level as u64)
            .sum()
    }

    /// Greedy selection of stored denominations, largest first.
    fn select(&self, amount: u32) -> Option<Vec<(u32, u16)>> {
        let mut remaining = amount;
        let mut picked = Vec::new();
        for (&value, &level) in self.levels.iter().rev() {
            if remaining == 0 {
                break;
            }
            let count = (remaining / value).min(level as u32) as u16;
            if count > 0 {
                remaining -= value * count as u32;
                picked.push((value, count));
            }
        }
        (remaining == 0).then_some(picked)
    }

    fn take(&mut self, picked: &[(u32, u16)]) {
        for &(value, count) in picked {
            if let Some(level) = self.levels.get_mut(&value) {
                *level = level.saturating_sub(count);
            }
        }
    }

    fn push(&mut self, kind: PollEventKind, data1: u32, data2: u32) {
        let mut event = PollEvent::new(kind).with_data(data1, data2);
        event.currency = self.currency;
        self.pending.push_back(event);
    }

    fn command(&mut self, data: &[u8]) -> Vec<u8> {
        self.commands.push(data.to_vec());
        if !self.keyed {
            return vec![ResponseStatus::KeyNotSet.as_byte()];
        }
        let Some((&opcode, payload)) = data.split_first() else {
            return status(ResponseStatus::WrongParameters);
        };
        match opcode {
            codec::CMD_GET_FIRMWARE_VERSION => {
                let version: &[u8; 16] = match self.role {
                    DeviceRole::Validator => b"NV02004141498000",
                    DeviceRole::Hopper => b"SH03004122143000",
                };
                ok_with(version)
            }
            codec::CMD_GET_DATASET_VERSION => ok_with(b"EUR01610"),
            codec::CMD_LAST_REJECT_NOTE => ok_with(&[self.last_reject]),
            codec::CMD_SET_REFILL_MODE if payload.len() == 8 => ok(),
            codec::CMD_SET_DENOMINATION_LEVEL => self.set_denomination_level(payload),
            codec::CMD_GET_ALL_LEVELS => self.all_levels(),
            codec::CMD_PAYOUT => self.payout(payload),
            codec::CMD_FLOAT => self.float(payload),
            codec::CMD_CHANNEL_SECURITY => self.channel_security(),
            codec::CMD_CONFIGURE_BEZEL => match payload {
                &[r, g, b, persist] => {
                    self.bezel = Some((r, g, b, persist != 0));
                    ok()
                }
                _ => status(ResponseStatus::WrongParameters),
            },
            codec::CMD_DISPLAY_ON => {
                self.display_on = true;
                ok()
            }
            codec::CMD_DISPLAY_OFF => {
                self.display_on = false;
                ok()
            }
            codec::CMD_EMPTY => {
                self.levels.clear();
                self.push(PollEventKind::Emptying, 0, 0);
                self.push(PollEventKind::Empty, 0, 0);
                ok()
            }
            codec::CMD_SMART_EMPTY => {
                let total = self.stored_value() as u32;
                self.levels.clear();
                self.push(PollEventKind::SmartEmptying, total, 0);
                self.push(PollEventKind::SmartEmptied, total, 0);
                ok()
            }
            codec::CMD_SET_REFILL_MODE => status(ResponseStatus::WrongParameters),
            _ => status(ResponseStatus::UnknownCommand),
        }
    }

    fn set_denomination_level(&mut self, payload: &[u8]) -> Vec<u8> {
        let &[l0, l1, v0, v1, v2, v3, ..] = payload else {
            return status(ResponseStatus::WrongParameters);
        };
        let level = u16::from_le_bytes([l0, l1]);
        let value = u32::from_le_bytes([v0, v1, v2, v3]);
        if level == 0 {
            self.levels.insert(value, 0);
        } else {
            let entry = self.levels.entry(value).or_insert(0);
            *entry = entry.saturating_add(level);
        }
        ok()
    }

    fn all_levels(&self) -> Vec<u8> {
        let mut out = vec![ResponseStatus::Ok.as_byte(), self.levels.len() as u8];
        for (&value, &level) in &self.levels {
            out.extend_from_slice(&level.to_le_bytes());
            out.extend_from_slice(&value.to_le_bytes());
            out.extend_from_slice(self.currency.as_bytes());
        }
        out
    }

    fn refusal(&self, amount: u32) -> Option<u8> {
        if !self.enabled {
            return Some(0x04);
        }
        if self.stored_value() < amount as u64 {
            return Some(0x01);
        }
        None
    }

    fn payout(&mut self, payload: &[u8]) -> Vec<u8> {
        let &[a0, a1, a2, a3, _, _, _, option] = payload else {
            return status(ResponseStatus::WrongParameters);
        };
        let amount = u32::from_le_bytes([a0, a1, a2, a3]);
        if let Some(code) = self.refusal(amount) {
            return cannot_process(code);
        }
        let Some(picked) = self.select(amount) else {
            return cannot_process(0x02);
        };
        if option == codec::PayoutOption::Do.as_byte() {
            self.take(&picked);
            self.push(PollEventKind::Dispensing, amount, 0);
            self.push(PollEventKind::Dispensed, amount, 0);
        }
        ok()
    }

    fn float(&mut self, payload: &[u8]) -> Vec<u8> {
        let &[_, _, a0, a1, a2, a3, _, _, _, option] = payload else {
            return status(ResponseStatus::WrongParameters);
        };
        let keep = u32::from_le_bytes([a0, a1, a2, a3]);
        if let Some(code) = self.refusal(keep) {
            return cannot_process(code);
        }
        let moved = (self.stored_value() - keep as u64) as u32;
        if option == codec::PayoutOption::Do.as_byte() {
            if let Some(picked) = self.select(moved) {
                self.take(&picked);
            }
            self.push(PollEventKind::Floating, moved, 0);
            self.push(PollEventKind::Floated, moved, 0);
        }
        ok()
    }

    fn channel_security(&self) -> Vec<u8> {
        let mut out = vec![ResponseStatus::Ok.as_byte(), self.channels.len() as u8];
        for index in 0..self.channels.len() {
            let enabled = self.inhibits.0 & (1 << index) != 0;
            out.push(if enabled { SECURITY_STANDARD } else { SECURITY_INHIBITED });
        }
        out
    }
}

fn ok() -> Vec<u8> {
    vec![ResponseStatus::Ok.as_byte()]
}

fn ok_with(payload: &[u8]) -> Vec<u8> {
    let mut out = ok();
    out.extend_from_slice(payload);
    out
}

fn status(status: ResponseStatus) -> Vec<u8> {
    vec![status.as_byte()]
}

fn cannot_process(code: u8) -> Vec<u8> {
    vec![ResponseStatus::CannotProcess.as_byte(), code]
}

fn lock(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Transport side of a simulated device.
pub struct SimulatedDevice {
    state: Arc<Mutex<SimState>>,
}

/// Test side of a simulated device.
#[derive(Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedDevice {
    pub fn new(role: DeviceRole, address: u8) -> (Self, SimHandle) {
        let state = Arc::new(Mutex::new(SimState::new(role, address)));
        (
            Self {
                state: state.clone(),
            },
            SimHandle { state },
        )
    }

    fn run<'a, T, F>(&'a mut self, op: SimOp, keyed: bool, f: F) -> SspFuture<'a, T>
    where
        T: Send + 'a,
        F: FnOnce(&mut SimState) -> SspResult<T>,
    {
        let result = {
            let mut state = lock(&self.state);
            state
                .enter(op)
                .and_then(|_| if keyed { state.keyed() } else { Ok(()) })
                .and_then(|_| f(&mut state))
        };
        Box::pin(async move { result })
    }
}

impl SspTransport for SimulatedDevice {
    fn sync<'a>(&'a mut self) -> SspFuture<'a, ()> {
        self.run(SimOp::Sync, false, |_| Ok(()))
    }

    fn setup_encryption<'a>(&'a mut self, _key: u64) -> SspFuture<'a, ()> {
        self.run(SimOp::SetupEncryption, false, |state| {
            state.keyed = true;
            Ok(())
        })
    }

    fn host_protocol<'a>(&'a mut self, version: u8) -> SspFuture<'a, ()> {
        self.run(SimOp::HostProtocol, true, move |state| {
            if version > codec::HOST_PROTOCOL_VERSION {
                return Err(SspError::status(ResponseStatus::Fail));
            }
            state.protocol = version;
            Ok(())
        })
    }

    fn setup_request<'a>(&'a mut self) -> SspFuture<'a, UnitSetup> {
        self.run(SimOp::SetupRequest, true, |state| {
            Ok(UnitSetup {
                unit_type: match state.role {
                    DeviceRole::Validator => VALIDATOR_UNIT_TYPE,
                    DeviceRole::Hopper => HOPPER_UNIT_TYPE,
                },
                firmware_version: "0414".to_string(),
                protocol_version: state.protocol,
                channels: state.channels.clone(),
            })
        })
    }

    fn enable<'a>(&'a mut self) -> SspFuture<'a, ()> {
        self.run(SimOp::Enable, true, |state| {
            state.enabled = true;
            Ok(())
        })
    }

    fn disable<'a>(&'a mut self) -> SspFuture<'a, ()> {
        self.run(SimOp::Disable, true, |state| {
            state.enabled = false;
            state.push(PollEventKind::Disabled, 0, 0);
            Ok(())
        })
    }

    fn set_inhibits<'a>(&'a mut self, low: u8, high: u8) -> SspFuture<'a, ()> {
        self.run(SimOp::SetInhibits, true, move |state| {
            state.inhibits = (low, high);
            Ok(())
        })
    }

    fn enable_payout<'a>(&'a mut self, unit_type: u8) -> SspFuture<'a, ()> {
        self.run(SimOp::EnablePayout, true, move |state| {
            if state.role != DeviceRole::Validator || unit_type != VALIDATOR_UNIT_TYPE {
                return Err(SspError::status(ResponseStatus::WrongParameters));
            }
            state.payout_enabled = true;
            Ok(())
        })
    }

    fn set_route<'a>(
        &'a mut self,
        amount: u32,
        _currency: Currency,
        route: Route,
    ) -> SspFuture<'a, ()> {
        self.run(SimOp::SetRoute, true, move |state| {
            state.routes.insert(amount, route);
            Ok(())
        })
    }

    fn set_coinmech_inhibits<'a>(
        &'a mut self,
        value: u32,
        _currency: Currency,
        enabled: bool,
    ) -> SspFuture<'a, ()> {
        self.run(SimOp::SetCoinmechInhibits, true, move |state| {
            state.coinmech.insert(value, enabled);
            Ok(())
        })
    }

    fn poll<'a>(&'a mut self) -> SspFuture<'a, Vec<PollEvent>> {
        self.run(SimOp::Poll, true, |state| Ok(state.pending.drain(..).collect()))
    }

    fn run_calibration<'a>(&'a mut self) -> SspFuture<'a, ()> {
        self.run(SimOp::RunCalibration, true, |_| Ok(()))
    }

    fn send_command<'a>(&'a mut self, data: &'a [u8]) -> SspFuture<'a, Vec<u8>> {
        let opcode = data.first().copied().unwrap_or_default();
        self.run(SimOp::Command(opcode), false, move |state| Ok(state.command(data)))
    }
}

impl SimHandle {
    pub fn address(&self) -> u8 {
        lock(&self.state).address
    }

    /// Queue an event for the next poll.
    pub fn push_event(&self, event: PollEvent) {
        lock(&self.state).pending.push_back(event);
    }

    /// Make the next call of `op` fail with `err`.
    pub fn fail_next(&self, op: SimOp, err: SspError) {
        lock(&self.state)
            .faults
            .entry(op)
            .or_default()
            .push_back(err);
    }

    /// Power cycle: the key is lost, the protocol pin reverts and a reset
    /// event is queued.
    pub fn power_cycle(&self) {
        let mut state = lock(&self.state);
        state.keyed = false;
        state.protocol = 0;
        state.push(PollEventKind::Reset, 0, 0);
    }

    /// Present a note on a 1-based channel.
    pub fn insert_note(&self, channel: u32) {
        let mut state = lock(&self.state);
        let index = channel.saturating_sub(1) as usize;
        let accepted = channel >= 1
            && index < state.channels.len()
            && state.inhibits.0 & (1 << index) != 0;
        state.push(PollEventKind::Read, 0, 0);
        if !accepted {
            state.last_reject = REJECT_CHANNEL_INHIBIT;
            state.push(PollEventKind::Rejecting, 0, 0);
            state.push(PollEventKind::Rejected, 0, 0);
            return;
        }
        let cents = state.channels[index].value * 100;
        state.push(PollEventKind::Read, channel, 0);
        state.push(PollEventKind::Stacking, 0, 0);
        state.push(PollEventKind::Credit, channel, 0);
        match state.routes.get(&cents).copied().unwrap_or(Route::Cashbox) {
            Route::Storage => {
                *state.levels.entry(cents).or_insert(0) += 1;
                state.push(PollEventKind::Stored, 0, 0);
            }
            Route::Cashbox => state.push(PollEventKind::Stacked, 0, 0),
        }
    }

    /// Drop a coin of `value` cents into the hopper.
    pub fn insert_coin(&self, value: u32) {
        let mut state = lock(&self.state);
        *state.levels.entry(value).or_insert(0) += 1;
        state.push(PollEventKind::CoinCredit, value, 0);
    }

    pub fn calls(&self) -> Vec<SimOp> {
        lock(&self.state).calls.clone()
    }

    /// Raw commands sent so far, opcode first.
    pub fn commands(&self) -> Vec<Vec<u8>> {
        lock(&self.state).commands.clone()
    }

    pub fn inhibits(&self) -> (u8, u8) {
        lock(&self.state).inhibits
    }

    pub fn level(&self, value: u32) -> u16 {
        lock(&self.state).levels.get(&value).copied().unwrap_or(0)
    }

    pub fn set_level(&self, value: u32, level: u16) {
        lock(&self.state).levels.insert(value, level);
    }

    pub fn set_last_reject(&self, code: u8) {
        lock(&self.state).last_reject = code;
    }

    pub fn is_enabled(&self) -> bool {
        lock(&self.state).enabled
    }

    pub fn is_payout_enabled(&self) -> bool {
        lock(&self.state).payout_enabled
    }

    pub fn protocol(&self) -> u8 {
        lock(&self.state).protocol
    }

    pub fn route(&self, amount: u32) -> Option<Route> {
        lock(&self.state).routes.get(&amount).copied()
    }

    pub fn coinmech_enabled(&self, value: u32) -> Option<bool> {
        lock(&self.state).coinmech.get(&value).copied()
    }

    pub fn display_on(&self) -> bool {
        lock(&self.state).display_on
    }

    pub fn bezel(&self) -> Option<(u8, u8, u8, bool)> {
        lock(&self.state).bezel
    }
}
