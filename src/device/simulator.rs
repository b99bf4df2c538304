//! In-memory eSSP device.
//!
//! `SimulatedDevice` implements [`SspTransport`] without hardware: poll
//! responses come from a script, any primitive can be forced to fail, and
//! every call is recorded. Clones share state, so a test can keep one handle
//! while the session owns the other.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use super::codes::{PayoutOption, ResponseCode};
use super::transport::{ChannelReport, PollEvent, PortResult, Rejection, SetupReport, SspTransport};

/// Primitive names, used to force failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Init,
    Sync,
    SetupEncryption,
    HostProtocol,
    SetupRequest,
    Enable,
    Disable,
    EnablePayout,
    DisablePayout,
    SetInhibits,
    SetCoinmechInhibit,
    Poll,
    Reject,
    SetRoute,
    GetRouting,
    GetNoteAmount,
    Payout,
    Empty,
    ConfigureBezel,
    Reset,
    RunCalibration,
}

/// A recorded primitive call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Init { port: String, address: u8 },
    Sync,
    SetupEncryption,
    HostProtocol(u8),
    SetupRequest,
    Enable,
    Disable,
    EnablePayout(u8),
    DisablePayout,
    SetInhibits(u8, u8),
    SetCoinmechInhibit { value: u32, currency: String, enabled: bool },
    Poll,
    Reject,
    SetRoute { value: u32, currency: String, route: u8 },
    GetRouting { value: u32, currency: String },
    GetNoteAmount { value: u32, currency: String },
    Payout { value: u32, currency: String, option: PayoutOption },
    Empty,
    ConfigureBezel { red: u8, green: u8, blue: u8, persist: bool },
    Reset,
    RunCalibration,
    Close,
}

struct SimState {
    setup: SetupReport,
    /// Keyed by (minor-unit value, currency).
    levels: HashMap<(u32, String), u16>,
    routes: HashMap<(u32, String), u8>,
    polls: VecDeque<PortResult<Vec<PollEvent>>>,
    failures: HashMap<Command, Rejection>,
    one_shot: HashSet<Command>,
    calls: Vec<Call>,
}

/// Scriptable in-memory device.
#[derive(Clone)]
pub struct SimulatedDevice {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedDevice {
    /// A device of `unit_type` with the given channel table (major units).
    pub fn new(unit_type: u8, channels: &[(u32, &str)]) -> Self {
        let setup = SetupReport {
            unit_type,
            firmware: "0400".to_string(),
            protocol_version: super::codes::HOST_PROTOCOL_VERSION,
            channels: channels
                .iter()
                .map(|(value, cc)| ChannelReport {
                    value: *value,
                    currency: cc.to_string(),
                })
                .collect(),
        };
        Self {
            state: Arc::new(Mutex::new(SimState {
                setup,
                levels: HashMap::new(),
                routes: HashMap::new(),
                polls: VecDeque::new(),
                failures: HashMap::new(),
                one_shot: HashSet::new(),
                calls: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Set the stored note count for a denomination (minor units).
    pub fn set_level(&self, value: u32, currency: &str, count: u16) {
        self.lock()
            .levels
            .insert((value, currency.to_string()), count);
    }

    /// Set the raw route code for a denomination (minor units).
    pub fn set_routing(&self, value: u32, currency: &str, route: u8) {
        self.lock()
            .routes
            .insert((value, currency.to_string()), route);
    }

    /// Queue the events returned by the next unscripted poll.
    pub fn push_poll(&self, events: Vec<PollEvent>) {
        self.lock().polls.push_back(Ok(events));
    }

    /// Queue a failed poll.
    pub fn push_poll_failure(&self, rejection: Rejection) {
        self.lock().polls.push_back(Err(rejection));
    }

    /// Make `command` fail on every call until [`SimulatedDevice::clear_failure`].
    pub fn fail(&self, command: Command, rejection: Rejection) {
        let mut state = self.lock();
        state.one_shot.remove(&command);
        state.failures.insert(command, rejection);
    }

    /// Make only the next call of `command` fail.
    pub fn fail_once(&self, command: Command, rejection: Rejection) {
        let mut state = self.lock();
        state.one_shot.insert(command);
        state.failures.insert(command, rejection);
    }

    pub fn clear_failure(&self, command: Command) {
        let mut state = self.lock();
        state.failures.remove(&command);
        state.one_shot.remove(&command);
    }

    /// Snapshot of every call made so far.
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Number of calls matching `pred`.
    pub fn count_calls(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| pred(*c)).count()
    }

    /// Scripted polls not yet consumed.
    pub fn pending_polls(&self) -> usize {
        self.lock().polls.len()
    }

    fn record(&self, command: Command, call: Call) -> PortResult<()> {
        let mut state = self.lock();
        state.calls.push(call);
        match state.failures.get(&command).cloned() {
            Some(rejection) => {
                if state.one_shot.remove(&command) {
                    state.failures.remove(&command);
                }
                Err(rejection)
            }
            None => Ok(()),
        }
    }
}

impl SspTransport for SimulatedDevice {
    fn init(&mut self, port: &str, address: u8) -> PortResult<()> {
        self.record(
            Command::Init,
            Call::Init {
                port: port.to_string(),
                address,
            },
        )
    }

    fn sync(&mut self) -> PortResult<()> {
        self.record(Command::Sync, Call::Sync)
    }

    fn setup_encryption(&mut self, _key: u64) -> PortResult<()> {
        self.record(Command::SetupEncryption, Call::SetupEncryption)
    }

    fn set_host_protocol_version(&mut self, version: u8) -> PortResult<()> {
        self.record(Command::HostProtocol, Call::HostProtocol(version))?;
        if version != self.lock().setup.protocol_version {
            return Err(Rejection::new(ResponseCode::Fail));
        }
        Ok(())
    }

    fn setup_request(&mut self) -> PortResult<SetupReport> {
        self.record(Command::SetupRequest, Call::SetupRequest)?;
        Ok(self.lock().setup.clone())
    }

    fn enable(&mut self) -> PortResult<()> {
        self.record(Command::Enable, Call::Enable)
    }

    fn disable(&mut self) -> PortResult<()> {
        self.record(Command::Disable, Call::Disable)
    }

    fn enable_payout(&mut self, unit_type: u8) -> PortResult<()> {
        self.record(Command::EnablePayout, Call::EnablePayout(unit_type))
    }

    fn disable_payout(&mut self) -> PortResult<()> {
        self.record(Command::DisablePayout, Call::DisablePayout)
    }

    fn set_inhibits(&mut self, mask_lo: u8, mask_hi: u8) -> PortResult<()> {
        self.record(Command::SetInhibits, Call::SetInhibits(mask_lo, mask_hi))
    }

    fn set_coinmech_inhibit(
        &mut self,
        value: u32,
        currency: &str,
        enabled: bool,
    ) -> PortResult<()> {
        self.record(
            Command::SetCoinmechInhibit,
            Call::SetCoinmechInhibit {
                value,
                currency: currency.to_string(),
                enabled,
            },
        )
    }

    fn poll(&mut self) -> PortResult<Vec<PollEvent>> {
        self.record(Command::Poll, Call::Poll)?;
        self.lock().polls.pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }

    fn reject(&mut self) -> PortResult<()> {
        self.record(Command::Reject, Call::Reject)
    }

    fn set_route(&mut self, value: u32, currency: &str, route: u8) -> PortResult<()> {
        self.record(
            Command::SetRoute,
            Call::SetRoute {
                value,
                currency: currency.to_string(),
                route,
            },
        )?;
        self.lock()
            .routes
            .insert((value, currency.to_string()), route);
        Ok(())
    }

    fn get_routing(&mut self, value: u32, currency: &str) -> PortResult<u8> {
        self.record(
            Command::GetRouting,
            Call::GetRouting {
                value,
                currency: currency.to_string(),
            },
        )?;
        // Devices default every denomination to the cashbox.
        Ok(self
            .lock()
            .routes
            .get(&(value, currency.to_string()))
            .copied()
            .unwrap_or(1))
    }

    fn get_note_amount(&mut self, value: u32, currency: &str) -> PortResult<u16> {
        self.record(
            Command::GetNoteAmount,
            Call::GetNoteAmount {
                value,
                currency: currency.to_string(),
            },
        )?;
        Ok(self
            .lock()
            .levels
            .get(&(value, currency.to_string()))
            .copied()
            .unwrap_or(0))
    }

    fn payout(&mut self, value: u32, currency: &str, option: PayoutOption) -> PortResult<()> {
        self.record(
            Command::Payout,
            Call::Payout {
                value,
                currency: currency.to_string(),
                option,
            },
        )
    }

    fn empty(&mut self) -> PortResult<()> {
        self.record(Command::Empty, Call::Empty)
    }

    fn configure_bezel(&mut self, red: u8, green: u8, blue: u8, persist: bool) -> PortResult<()> {
        self.record(
            Command::ConfigureBezel,
            Call::ConfigureBezel {
                red,
                green,
                blue,
                persist,
            },
        )
    }

    fn reset(&mut self) -> PortResult<()> {
        self.record(Command::Reset, Call::Reset)
    }

    fn run_calibration(&mut self) -> PortResult<()> {
        self.record(Command::RunCalibration, Call::RunCalibration)
    }

    fn close(&mut self) {
        self.lock().calls.push(Call::Close);
    }

    fn description(&self) -> String {
        let state = self.lock();
        format!(
            "Simulated(unit={}, channels={})",
            state.setup.unit_type,
            state.setup.channels.len()
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unscripted_poll_is_empty() {
        let mut dev = SimulatedDevice::new(6, &[(500, "RUB")]);
        assert_eq!(dev.poll().unwrap(), Vec::new());
    }

    #[test]
    fn test_scripted_polls_in_order() {
        let mut dev = SimulatedDevice::new(6, &[]);
        dev.push_poll(vec![PollEvent::new(0xEF, 1)]);
        dev.push_poll_failure(Rejection::timeout());
        assert_eq!(dev.poll().unwrap()[0].code, 0xEF);
        assert!(dev.poll().unwrap_err().is_timeout());
        assert_eq!(dev.pending_polls(), 0);
    }

    #[test]
    fn test_fail_once_then_recovers() {
        let mut dev = SimulatedDevice::new(6, &[]);
        dev.fail_once(Command::Enable, Rejection::new(ResponseCode::Fail));
        assert!(dev.enable().is_err());
        assert!(dev.enable().is_ok());
    }

    #[test]
    fn test_persistent_failure_until_cleared() {
        let mut dev = SimulatedDevice::new(6, &[]);
        dev.fail(Command::Sync, Rejection::timeout());
        assert!(dev.sync().is_err());
        assert!(dev.sync().is_err());
        dev.clear_failure(Command::Sync);
        assert!(dev.sync().is_ok());
    }

    #[test]
    fn test_clones_share_state() {
        let dev = SimulatedDevice::new(6, &[(500, "RUB")]);
        let mut other = dev.clone();
        dev.set_level(50000, "RUB", 3);
        assert_eq!(other.get_note_amount(50000, "RUB").unwrap(), 3);
        assert_eq!(
            dev.count_calls(|c| matches!(c, Call::GetNoteAmount { .. })),
            1
        );
    }

    #[test]
    fn test_set_route_updates_routing() {
        let mut dev = SimulatedDevice::new(6, &[]);
        assert_eq!(dev.get_routing(10000, "RUB").unwrap(), 1);
        dev.set_route(10000, "RUB", 0).unwrap();
        assert_eq!(dev.get_routing(10000, "RUB").unwrap(), 0);
    }

    #[test]
    fn test_host_protocol_mismatch_fails() {
        let mut dev = SimulatedDevice::new(6, &[]);
        assert!(dev.set_host_protocol_version(5).is_err());
        assert!(dev.set_host_protocol_version(6).is_ok());
    }

    #[test]
    fn test_description() {
        let dev = SimulatedDevice::new(6, &[(500, "RUB"), (1000, "RUB")]);
        assert_eq!(dev.description(), "Simulated(unit=6, channels=2)");
    }
}
