//! Poll loop and event interpretation.
//!
//! The `Controller` is the only code that talks to the transport once the
//! session is open. Each tick it polls, folds the reported events into the
//! ledger and the pending-note slot, then drains queued actions if the device
//! is idle.

use std::sync::atomic::Ordering;
use std::sync::{Arc, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::{DeviceInfo, SessionState, Shared};
use crate::config::EncryptionKey;
use crate::device::codes::{
    CalibrationFailure, EventKind, ResponseCode, UnitType, HOST_PROTOCOL_VERSION,
};
use crate::device::transport::{PollEvent, SspTransport};
use crate::error::ProtocolError;
use crate::ledger::{Amount, Denomination, InventoryLedger, Note};
use crate::lifecycle::PendingNote;

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Poll-thread state: the transport plus everything only the poll thread
/// may mutate.
pub(crate) struct Controller {
    pub(super) port: Box<dyn SspTransport>,
    pub(super) shared: Arc<Shared>,
    pub(super) pending: PendingNote,
    pub(super) device: DeviceInfo,
    pub(super) encryption_key: EncryptionKey,
    /// False only after the caller explicitly disabled the validator.
    pub(super) validator_enabled: bool,
}

impl Controller {
    pub(crate) fn new(
        port: Box<dyn SspTransport>,
        shared: Arc<Shared>,
        encryption_key: EncryptionKey,
    ) -> Self {
        Self {
            port,
            shared,
            pending: PendingNote::new(),
            device: DeviceInfo {
                unit_type: UnitType::BanknoteValidator,
                firmware: String::new(),
                protocol_version: HOST_PROTOCOL_VERSION,
                channel_count: 0,
            },
            encryption_key,
            validator_enabled: false,
        }
    }

    pub(super) fn ledger(&self) -> RwLockReadGuard<'_, InventoryLedger> {
        self.shared.ledger.read().unwrap_or_else(|e| e.into_inner())
    }

    pub(super) fn ledger_mut(&self) -> RwLockWriteGuard<'_, InventoryLedger> {
        self.shared.ledger.write().unwrap_or_else(|e| e.into_inner())
    }

    pub(super) fn renegotiate_key(&mut self) {
        match self.port.setup_encryption(self.encryption_key.value()) {
            Ok(()) => info!("Encryption key negotiated"),
            Err(rejection) => warn!(error = %rejection, "Encryption key negotiation failed"),
        }
    }

    /// One poll-interpret-drain cycle. Returns the number of events handled.
    pub(crate) fn run_cycle(&mut self) -> Result<usize, ProtocolError> {
        let events = match self.port.poll() {
            Ok(events) => events,
            Err(rejection) if rejection.is_timeout() => {
                error!("SSP poll timeout");
                return Err(ProtocolError::PollTimeout);
            }
            Err(rejection) if rejection.code == ResponseCode::KeyNotSet => {
                // Device state is unknown until the next poll; skip this tick.
                warn!("Device reports key not set, renegotiating");
                self.renegotiate_key();
                return Ok(0);
            }
            Err(rejection) => {
                error!(error = %rejection, "SSP poll error");
                return Err(ProtocolError::PollFailed(rejection));
            }
        };

        // Disabled reports after an explicit disable are the device's normal
        // idle state, not activity.
        let active = events
            .iter()
            .filter(|e| self.validator_enabled || EventKind::from_code(e.code) != EventKind::Disabled)
            .count();

        if active == 0 {
            if self.shared.busy.swap(false, Ordering::SeqCst) {
                debug!("Device free");
            }
        } else if !self.shared.busy.swap(true, Ordering::SeqCst) {
            debug!("Device busy");
        }

        for event in &events {
            self.interpret(event)?;
        }

        self.drain_actions();
        Ok(events.len())
    }

    fn event_currency(&self, event: &PollEvent) -> String {
        let cc = event.currency.trim_end_matches('\0').trim();
        if cc.is_empty() {
            self.ledger().currency().to_string()
        } else {
            cc.to_string()
        }
    }

    fn dispensed_amount(&self, event: &PollEvent) -> Denomination {
        Denomination::Amount(Amount::new(event.data1, &self.event_currency(event)))
    }

    /// Fold one poll event into session state.
    pub(crate) fn interpret(&mut self, event: &PollEvent) -> Result<(), ProtocolError> {
        let kind = EventKind::from_code(event.code);
        match kind {
            EventKind::Disabled => {
                if self.validator_enabled {
                    info!("Device reports disabled, re-enabling");
                    if let Err(e) = self.enable_validator() {
                        warn!(error = %e, "Re-enable after disabled event failed");
                    }
                } else {
                    trace!("Device disabled");
                }
            }

            EventKind::Reset => {
                info!("Device reset, pinning host protocol version");
                self.port
                    .set_host_protocol_version(HOST_PROTOCOL_VERSION)
                    .map_err(ProtocolError::HostProtocol)?;
            }

            EventKind::Read => {
                if event.data1 > 0 {
                    let note = self.ledger().resolve(event.data1);
                    info!(note = %note, "Note read");
                    self.pending.seen(note);
                }
            }

            EventKind::Credit => {
                let note = self.ledger().resolve(event.data1);
                info!(note = %note, "Credit");
                self.pending.credited(note.clone());
                self.shared.outbox.push(Some(note), kind);
            }

            EventKind::Stored => match self.pending.take_stored() {
                Some(Denomination::Note(note)) => match self.ledger_mut().store_note(&note) {
                    Some(channel) => info!(note = %note, channel, "Stored in payout"),
                    None => warn!(note = %note, "Stored note matches no channel, not counted"),
                },
                Some(other) => warn!(note = %other, "Stored note not counted"),
                None => debug!("Stored event without a credited note"),
            },

            EventKind::Stacked => {
                let reported = (event.data1 > 0).then(|| self.ledger().resolve(event.data1));
                match self.pending.take_stacked(reported) {
                    Some(Denomination::Note(note)) => {
                        self.ledger_mut().add_to_cashbox(note.value);
                        info!(note = %note, "Stacked in cashbox");
                    }
                    Some(other) => warn!(note = %other, "Stacked note not counted"),
                    None => warn!("Stacked event without a pending note"),
                }
            }

            EventKind::Dispensing => {
                if event.data1 > 0 {
                    let note = self.dispensed_amount(event);
                    info!(amount = %note, "Dispensing");
                    self.pending.dispensing(note.clone());
                    self.shared.outbox.push(Some(note), kind);
                } else {
                    debug!("Dispensing");
                }
            }

            EventKind::Dispensed => {
                let reported = (event.data1 > 0).then(|| self.dispensed_amount(event));
                let note = self.pending.take_dispensed(reported);
                info!(amount = ?note, "Dispensed");
                self.shared.outbox.push(note, kind);
            }

            EventKind::CashboxReplaced => {
                let previous = self.ledger_mut().replace_cashbox();
                info!(previous, "Cashbox replaced");
                self.shared.outbox.push(None, kind);
            }

            EventKind::SmartEmptied => {
                let (moved, currency) = {
                    let mut ledger = self.ledger_mut();
                    (ledger.smart_empty(), ledger.currency().to_string())
                };
                let emptied = Note::new(moved, &currency);
                info!(amount = %emptied, "Emptied to cashbox");
                self.shared
                    .outbox
                    .push(Some(Denomination::Note(emptied)), kind);
            }

            EventKind::IncompletePayout | EventKind::IncompleteFloat => {
                warn!(
                    event = %kind,
                    paid = event.data1,
                    requested = event.data2,
                    currency = %event.currency.trim_end_matches('\0'),
                    "Interrupted operation detected at power-up"
                );
            }

            EventKind::FraudAttempt => {
                let note = self.ledger().resolve(event.data1);
                warn!(note = %note, "Fraud attempt");
                self.shared.outbox.push(Some(note), kind);
            }

            EventKind::CalibrationFail => {
                let reason = CalibrationFailure::from_code(event.data1);
                warn!(reason = %reason, "Calibration fail");
                if reason == CalibrationFailure::RecalibrationRequired {
                    info!("Running auto-calibration");
                    if let Err(rejection) = self.port.run_calibration() {
                        warn!(error = %rejection, "Calibration request failed");
                    }
                }
            }

            EventKind::Unknown(code) => {
                warn!(code, "Unknown poll event");
                self.shared.outbox.push(None, kind);
            }

            _ => {
                debug!(event = %kind, "Poll event");
                self.shared.outbox.push(None, kind);
            }
        }
        Ok(())
    }

    fn drain_actions(&mut self) {
        let shared = Arc::clone(&self.shared);
        shared
            .actions
            .drain_if_idle(&shared.busy, |action| self.execute(action));
    }

    /// Close the link: reject anything in escrow, release the port.
    pub(crate) fn shutdown(&mut self) {
        if let Err(rejection) = self.port.reject() {
            debug!(error = %rejection, "Nothing to reject on close");
        }
        self.port.close();
        info!(port = %self.port.description(), "Device link closed");
    }
}

// ---------------------------------------------------------------------------
// Loop
// ---------------------------------------------------------------------------

/// Poll until `stop` is cancelled or a fatal outcome, then close the link.
/// `done` is cancelled on the way out.
pub(crate) fn run(
    mut controller: Controller,
    interval: Duration,
    stop: CancellationToken,
    done: CancellationToken,
) -> Result<(), ProtocolError> {
    info!(interval_ms = (interval.as_millis() as u64), "Poll loop started");

    let result = loop {
        if stop.is_cancelled() {
            break Ok(());
        }
        let tick = Instant::now();
        if let Err(e) = controller.run_cycle() {
            break Err(e);
        }

        let deadline = tick + interval;
        while !stop.is_cancelled() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::park_timeout(deadline - now);
        }
    };

    controller.shutdown();
    {
        let mut state = controller
            .shared
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *state = match &result {
            Ok(()) => SessionState::Stopped,
            Err(e) => SessionState::Failed(e.clone()),
        };
    }
    match &result {
        Ok(()) => info!("Poll loop stopped"),
        Err(e) => error!(error = %e, "Poll loop terminated"),
    }
    done.cancel();
    result
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{BezelColor, QueuedAction};
    use crate::config::SessionConfig;
    use crate::device::codes::Route;
    use crate::device::simulator::{Call, Command, SimulatedDevice};
    use crate::device::transport::Rejection;

    const READ: u8 = 0xEF;
    const CREDIT: u8 = 0xEE;
    const STORED: u8 = 0xDB;
    const STACKED: u8 = 0xEB;
    const DISPENSING: u8 = 0xDA;
    const DISPENSED: u8 = 0xD2;
    const CASHBOX_REPLACED: u8 = 0xE4;
    const SMART_EMPTIED: u8 = 0xB4;
    const DISABLED: u8 = 0xE8;
    const RESET: u8 = 0xF1;
    const CALIBRATION_FAIL: u8 = 0x83;
    const FRAUD: u8 = 0xE6;

    fn device() -> SimulatedDevice {
        let dev = SimulatedDevice::new(6, &[(500, "RUB"), (1000, "RUB")]);
        dev.set_level(50_000, "RUB", 3);
        dev.set_routing(50_000, "RUB", 0);
        dev
    }

    fn booted(dev: &SimulatedDevice) -> Controller {
        let shared = Arc::new(Shared::new("RUB"));
        let mut ctl = Controller::new(
            Box::new(dev.clone()),
            shared,
            EncryptionKey::default(),
        );
        ctl.bootstrap(&SessionConfig::new("sim")).unwrap();
        // First idle poll clears the initial busy flag and drains the bezel.
        ctl.run_cycle().unwrap();
        ctl
    }

    fn inventory(ctl: &Controller, channel: u8) -> u32 {
        ctl.ledger().channel(channel).unwrap().inventory_count
    }

    fn busy(ctl: &Controller) -> bool {
        ctl.shared.busy.load(Ordering::SeqCst)
    }

    #[test]
    fn test_read_credit_stored_increments_channel() {
        let dev = device();
        let mut ctl = booted(&dev);
        let before = inventory(&ctl, 1);

        dev.push_poll(vec![PollEvent::new(READ, 1)]);
        ctl.run_cycle().unwrap();
        dev.push_poll(vec![PollEvent::new(CREDIT, 1), PollEvent::new(STORED, 0)]);
        ctl.run_cycle().unwrap();

        assert_eq!(inventory(&ctl, 1), before + 1);
        assert!(ctl.pending.is_empty());

        let event = ctl.shared.outbox.pull().unwrap();
        assert_eq!(event.kind, EventKind::Credit);
        assert_eq!(
            event.note,
            Some(Denomination::Note(Note::new(500, "RUB")))
        );
        assert!(ctl.shared.outbox.pull().is_none(), "read must not be pushed");
    }

    #[test]
    fn test_credit_stacked_adds_to_cashbox_only() {
        let dev = device();
        let mut ctl = booted(&dev);
        let before = ctl.ledger().snapshot();

        dev.push_poll(vec![PollEvent::new(CREDIT, 2), PollEvent::new(STACKED, 0)]);
        ctl.run_cycle().unwrap();

        let after = ctl.ledger().snapshot();
        assert_eq!(after.cashbox_total, before.cashbox_total + 1000);
        assert_eq!(after.channels, before.channels);
        assert!(ctl.pending.is_empty());
    }

    #[test]
    fn test_stacked_channel_overrides_pending() {
        let dev = device();
        let mut ctl = booted(&dev);
        dev.push_poll(vec![PollEvent::new(CREDIT, 2), PollEvent::new(STACKED, 1)]);
        ctl.run_cycle().unwrap();
        assert_eq!(ctl.ledger().cashbox_total(), 500);
    }

    #[test]
    fn test_stacked_without_pending_note_changes_nothing() {
        let dev = device();
        let mut ctl = booted(&dev);
        dev.push_poll(vec![PollEvent::new(STACKED, 0)]);
        ctl.run_cycle().unwrap();
        assert_eq!(ctl.ledger().cashbox_total(), 0);
    }

    #[test]
    fn test_stored_without_credit_is_ignored() {
        let dev = device();
        let mut ctl = booted(&dev);
        dev.push_poll(vec![PollEvent::new(READ, 1), PollEvent::new(STORED, 0)]);
        ctl.run_cycle().unwrap();
        assert_eq!(inventory(&ctl, 1), 3);
    }

    #[test]
    fn test_cashbox_replaced_resets_total() {
        let dev = device();
        let mut ctl = booted(&dev);
        ctl.ledger_mut().add_to_cashbox(12_345);
        dev.push_poll(vec![PollEvent::new(CASHBOX_REPLACED, 0)]);
        ctl.run_cycle().unwrap();
        assert_eq!(ctl.ledger().cashbox_total(), 0);
        let event = ctl.shared.outbox.pull().unwrap();
        assert_eq!(event.kind, EventKind::CashboxReplaced);
        assert_eq!(event.note, None);
    }

    #[test]
    fn test_smart_emptied_moves_store_to_cashbox() {
        let dev = device();
        let mut ctl = booted(&dev);
        ctl.ledger_mut().add_to_cashbox(100);
        dev.push_poll(vec![PollEvent::new(SMART_EMPTIED, 0)]);
        ctl.run_cycle().unwrap();

        let snap = ctl.ledger().snapshot();
        assert_eq!(snap.cashbox_total, 1600);
        assert!(snap.channels.iter().all(|c| c.inventory_count == 0));
        let event = ctl.shared.outbox.pull().unwrap();
        assert_eq!(event.kind, EventKind::SmartEmptied);
        assert_eq!(
            event.note,
            Some(Denomination::Note(Note::new(1500, "RUB")))
        );
    }

    #[test]
    fn test_dispensing_and_dispensed() {
        let dev = device();
        let mut ctl = booted(&dev);
        dev.push_poll(vec![PollEvent::new(DISPENSING, 200_000)]);
        ctl.run_cycle().unwrap();
        dev.push_poll(vec![PollEvent::new(DISPENSED, 0)]);
        ctl.run_cycle().unwrap();

        let first = ctl.shared.outbox.pull().unwrap();
        assert_eq!(first.kind, EventKind::Dispensing);
        assert_eq!(
            first.note,
            Some(Denomination::Amount(Amount::new(200_000, "RUB")))
        );
        let second = ctl.shared.outbox.pull().unwrap();
        assert_eq!(second.kind, EventKind::Dispensed);
        assert_eq!(
            second.note,
            Some(Denomination::Amount(Amount::new(200_000, "RUB")))
        );
        assert!(ctl.pending.is_empty());
    }

    #[test]
    fn test_dispensing_fractional_amounts_are_exact() {
        let dev = device();
        let mut ctl = booted(&dev);
        dev.push_poll(vec![PollEvent::new(DISPENSING, 250)]);
        ctl.run_cycle().unwrap();
        dev.push_poll(vec![PollEvent::new(DISPENSING, 50)]);
        ctl.run_cycle().unwrap();

        let first = ctl.shared.outbox.pull().unwrap().note.unwrap();
        assert_eq!(first, Denomination::Amount(Amount::new(250, "RUB")));
        assert_eq!(first.to_string(), "2.50 RUB");
        let second = ctl.shared.outbox.pull().unwrap().note.unwrap();
        assert_eq!(second, Denomination::Amount(Amount::new(50, "RUB")));
        assert_eq!(second.to_string(), "0.50 RUB");
    }

    #[test]
    fn test_dispensed_uses_event_currency() {
        let dev = device();
        let mut ctl = booted(&dev);
        dev.push_poll(vec![PollEvent {
            code: DISPENSED,
            data1: 1_005,
            data2: 0,
            currency: "EUR\0".into(),
        }]);
        ctl.run_cycle().unwrap();
        assert_eq!(
            ctl.shared.outbox.pull().unwrap().note,
            Some(Denomination::Amount(Amount::new(1_005, "EUR")))
        );
    }

    #[test]
    fn test_unknown_channel_passes_raw_identifier() {
        let dev = device();
        let mut ctl = booted(&dev);
        dev.push_poll(vec![PollEvent::new(CREDIT, 7), PollEvent::new(FRAUD, 0)]);
        ctl.run_cycle().unwrap();
        assert_eq!(
            ctl.shared.outbox.pull().unwrap().note,
            Some(Denomination::Unidentified(7))
        );
        assert_eq!(
            ctl.shared.outbox.pull().unwrap().note,
            Some(Denomination::Unidentified(0))
        );
    }

    #[test]
    fn test_unhandled_and_unknown_events_recorded_verbatim() {
        let dev = device();
        let mut ctl = booted(&dev);
        dev.push_poll(vec![PollEvent::new(0xE7, 0), PollEvent::new(0x42, 9)]);
        ctl.run_cycle().unwrap();
        assert_eq!(ctl.shared.outbox.pull().unwrap().kind, EventKind::StackerFull);
        let unknown = ctl.shared.outbox.pull().unwrap();
        assert_eq!(unknown.kind, EventKind::Unknown(0x42));
        assert_eq!(unknown.note, None);
    }

    #[test]
    fn test_incomplete_payout_is_log_only() {
        let dev = device();
        let mut ctl = booted(&dev);
        dev.push_poll(vec![PollEvent {
            code: 0xDC,
            data1: 100,
            data2: 200,
            currency: "RUB".into(),
        }]);
        ctl.run_cycle().unwrap();
        assert!(ctl.shared.outbox.is_empty());
    }

    #[test]
    fn test_disabled_event_re_enables() {
        let dev = device();
        let mut ctl = booted(&dev);
        let enables = dev.count_calls(|c| *c == Call::Enable);
        dev.push_poll(vec![PollEvent::new(DISABLED, 0)]);
        ctl.run_cycle().unwrap();
        assert_eq!(dev.count_calls(|c| *c == Call::Enable), enables + 1);
    }

    #[test]
    fn test_disabled_event_after_explicit_disable_is_idle() {
        let dev = device();
        let mut ctl = booted(&dev);
        ctl.shared.actions.enqueue(QueuedAction::DisableValidator);
        ctl.run_cycle().unwrap();
        let enables = dev.count_calls(|c| *c == Call::Enable);

        dev.push_poll(vec![PollEvent::new(DISABLED, 0)]);
        ctl.shared.actions.enqueue(QueuedAction::EnableValidator);
        ctl.run_cycle().unwrap();

        assert!(!busy(&ctl));
        // Only the queued enable ran, not an automatic one.
        assert_eq!(dev.count_calls(|c| *c == Call::Enable), enables + 1);
        assert!(ctl.validator_enabled);
    }

    #[test]
    fn test_reset_pins_protocol_version() {
        let dev = device();
        let mut ctl = booted(&dev);
        dev.push_poll(vec![PollEvent::new(RESET, 0)]);
        ctl.run_cycle().unwrap();
        assert_eq!(dev.count_calls(|c| *c == Call::HostProtocol(6)), 2);
    }

    #[test]
    fn test_reset_with_failed_version_is_fatal() {
        let dev = device();
        let mut ctl = booted(&dev);
        dev.fail(Command::HostProtocol, Rejection::new(ResponseCode::Fail));
        dev.push_poll(vec![PollEvent::new(RESET, 0)]);
        assert!(matches!(
            ctl.run_cycle(),
            Err(ProtocolError::HostProtocol(_))
        ));
    }

    #[test]
    fn test_calibration_fail_recal_runs_calibration() {
        let dev = device();
        let mut ctl = booted(&dev);
        dev.push_poll(vec![PollEvent::new(CALIBRATION_FAIL, 0x01)]);
        ctl.run_cycle().unwrap();
        assert_eq!(dev.count_calls(|c| *c == Call::RunCalibration), 0);
        dev.push_poll(vec![PollEvent::new(CALIBRATION_FAIL, 0x07)]);
        ctl.run_cycle().unwrap();
        assert_eq!(dev.count_calls(|c| *c == Call::RunCalibration), 1);
    }

    #[test]
    fn test_poll_timeout_is_fatal() {
        let dev = device();
        let mut ctl = booted(&dev);
        dev.push_poll_failure(Rejection::timeout());
        assert_eq!(ctl.run_cycle(), Err(ProtocolError::PollTimeout));
    }

    #[test]
    fn test_poll_error_is_fatal() {
        let dev = device();
        let mut ctl = booted(&dev);
        dev.push_poll_failure(Rejection::new(ResponseCode::Fail));
        assert!(matches!(ctl.run_cycle(), Err(ProtocolError::PollFailed(_))));
    }

    #[test]
    fn test_key_not_set_renegotiates_and_continues() {
        let dev = device();
        let mut ctl = booted(&dev);
        let before = dev.count_calls(|c| *c == Call::SetupEncryption);
        dev.push_poll_failure(Rejection::new(ResponseCode::KeyNotSet));
        assert_eq!(ctl.run_cycle(), Ok(0));
        assert_eq!(
            dev.count_calls(|c| *c == Call::SetupEncryption),
            before + 1
        );
        assert!(ctl.run_cycle().is_ok());
    }

    #[test]
    fn test_payout_blocks_drain_until_idle_poll() {
        let dev = device();
        let mut ctl = booted(&dev);
        assert!(!busy(&ctl));

        ctl.shared
            .actions
            .enqueue(QueuedAction::payout(2000, "RUB").unwrap());
        ctl.shared
            .actions
            .enqueue(QueuedAction::configure_bezel(10, 20, 30, false));
        ctl.run_cycle().unwrap();

        assert!(busy(&ctl));
        assert_eq!(ctl.shared.actions.len(), 1);
        assert_eq!(
            dev.count_calls(|c| matches!(c, Call::Payout { value: 200_000, .. })),
            1
        );
        let custom = Call::ConfigureBezel {
            red: 10,
            green: 20,
            blue: 30,
            persist: false,
        };
        assert_eq!(dev.count_calls(|c| *c == custom), 0);

        dev.push_poll(vec![PollEvent::new(DISPENSING, 200_000)]);
        ctl.run_cycle().unwrap();
        assert_eq!(dev.count_calls(|c| *c == custom), 0);

        ctl.run_cycle().unwrap();
        assert!(!busy(&ctl));
        assert_eq!(dev.count_calls(|c| *c == custom), 1);
        assert!(ctl.shared.actions.is_empty());
    }

    #[test]
    fn test_payout_sets_paying_bezel() {
        let dev = device();
        let mut ctl = booted(&dev);
        ctl.shared
            .actions
            .enqueue(QueuedAction::payout(500, "RUB").unwrap());
        ctl.run_cycle().unwrap();
        let paying = BezelColor::PAYING;
        assert_eq!(
            dev.calls().last(),
            Some(&Call::ConfigureBezel {
                red: paying.red,
                green: paying.green,
                blue: paying.blue,
                persist: false,
            })
        );
    }

    #[test]
    fn test_refused_payout_leaves_device_idle() {
        let dev = device();
        let mut ctl = booted(&dev);
        dev.fail(
            Command::Payout,
            Rejection::with_data(ResponseCode::CannotProcess, &[0x01]),
        );
        ctl.shared
            .actions
            .enqueue(QueuedAction::payout(9000, "RUB").unwrap());
        ctl.shared.actions.enqueue(QueuedAction::Reset);
        ctl.run_cycle().unwrap();
        assert!(!busy(&ctl));
        assert!(ctl.shared.actions.is_empty());
        assert_eq!(dev.count_calls(|c| *c == Call::Reset), 1);
    }

    #[test]
    fn test_empty_storage_sets_busy() {
        let dev = device();
        let mut ctl = booted(&dev);
        ctl.shared.actions.enqueue(QueuedAction::EmptyStorage);
        ctl.shared.actions.enqueue(QueuedAction::DisablePayout);
        ctl.run_cycle().unwrap();
        assert!(busy(&ctl));
        assert_eq!(dev.count_calls(|c| *c == Call::DisablePayout), 0);
    }

    #[test]
    fn test_update_payout_refreshes_ledger() {
        let dev = device();
        let mut ctl = booted(&dev);
        dev.set_level(100_000, "RUB", 4);
        dev.set_routing(100_000, "RUB", 0);
        dev.fail(Command::GetNoteAmount, Rejection::timeout());
        ctl.shared.actions.enqueue(QueuedAction::UpdatePayout);
        ctl.run_cycle().unwrap();
        // Count queries failed: counts kept, routes refreshed.
        assert_eq!(inventory(&ctl, 2), 0);
        assert_eq!(ctl.ledger().channel(2).unwrap().route, Route::Payout);

        dev.clear_failure(Command::GetNoteAmount);
        ctl.shared.actions.enqueue(QueuedAction::UpdatePayout);
        ctl.run_cycle().unwrap();
        assert_eq!(inventory(&ctl, 2), 4);
    }

    #[test]
    fn test_get_note_amount_result_and_sentinel() {
        let dev = device();
        let mut ctl = booted(&dev);
        ctl.shared
            .actions
            .enqueue(QueuedAction::get_note_amount(500, "RUB").unwrap());
        ctl.run_cycle().unwrap();
        let result = ctl.shared.last_note_amount().unwrap();
        assert_eq!(result.note, Note::new(500, "RUB"));
        assert_eq!(result.count, Some(3));

        dev.fail(Command::GetNoteAmount, Rejection::timeout());
        ctl.shared
            .actions
            .enqueue(QueuedAction::get_note_amount(500, "RUB").unwrap());
        ctl.run_cycle().unwrap();
        assert_eq!(ctl.shared.last_note_amount().unwrap().count, None);
    }

    #[test]
    fn test_route_actions_send_wire_codes() {
        let dev = device();
        let mut ctl = booted(&dev);
        ctl.shared
            .actions
            .enqueue(QueuedAction::route_to_cashbox(500, "RUB").unwrap());
        ctl.shared
            .actions
            .enqueue(QueuedAction::route_to_storage(1000, "RUB").unwrap());
        ctl.run_cycle().unwrap();
        let routes: Vec<Call> = dev
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::SetRoute { .. }))
            .collect();
        assert_eq!(
            routes,
            vec![
                Call::SetRoute {
                    value: 50_000,
                    currency: "RUB".into(),
                    route: 1
                },
                Call::SetRoute {
                    value: 100_000,
                    currency: "RUB".into(),
                    route: 0
                },
            ]
        );
    }

    #[test]
    fn test_run_stops_on_timeout_and_closes_port() {
        let dev = device();
        let ctl = booted(&dev);
        let shared = Arc::clone(&ctl.shared);
        dev.push_poll_failure(Rejection::timeout());
        let stop = CancellationToken::new();
        let done = CancellationToken::new();
        let result = run(ctl, Duration::from_millis(1), stop, done.clone());

        assert_eq!(result, Err(ProtocolError::PollTimeout));
        assert!(done.is_cancelled());
        assert_eq!(
            shared.state(),
            SessionState::Failed(ProtocolError::PollTimeout)
        );
        let calls = dev.calls();
        assert_eq!(calls.last(), Some(&Call::Close));
        let polls_after = dev.count_calls(|c| *c == Call::Poll);
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(dev.count_calls(|c| *c == Call::Poll), polls_after);
    }

    #[test]
    fn test_run_exits_when_stopped() {
        let dev = device();
        let ctl = booted(&dev);
        let shared = Arc::clone(&ctl.shared);
        let stop = CancellationToken::new();
        stop.cancel();
        let result = run(ctl, Duration::from_millis(1), stop, CancellationToken::new());
        assert_eq!(result, Ok(()));
        assert_eq!(shared.state(), SessionState::Stopped);
        assert!(dev.calls().contains(&Call::Reject));
    }
}
