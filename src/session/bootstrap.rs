//! Connection handshake and validator arming.
//!
//! Runs on the caller's thread inside [`crate::Session::open`], before the
//! poll thread exists. The same arming sequence is reused when a queued
//! enable or an unexpected disable re-arms the validator.

use tracing::{debug, info, warn};

use super::executor::wire_value;
use super::poll::Controller;
use crate::actions::{BezelColor, QueuedAction};
use crate::config::SessionConfig;
use crate::device::codes::{Route, UnitType, HOST_PROTOCOL_VERSION};
use crate::device::transport::{Rejection, SetupReport};
use crate::error::{BootstrapStage, ConnectError};
use crate::ledger::{Channel, Note};

/// A fatal step of the arming sequence failed.
#[derive(Debug)]
pub(crate) struct StepFailure {
    pub stage: BootstrapStage,
    pub rejection: Rejection,
}

impl StepFailure {
    fn at(stage: BootstrapStage) -> impl FnOnce(Rejection) -> Self {
        move |rejection| Self { stage, rejection }
    }
}

impl From<StepFailure> for ConnectError {
    fn from(failure: StepFailure) -> Self {
        ConnectError::Stage {
            stage: failure.stage,
            rejection: failure.rejection,
        }
    }
}

impl Controller {
    /// Full handshake: link, key, protocol version, channel table, arming.
    pub(crate) fn bootstrap(&mut self, config: &SessionConfig) -> Result<(), ConnectError> {
        self.port
            .init(&config.port, config.address)
            .map_err(ConnectError::stage(BootstrapStage::Init))?;
        self.port
            .sync()
            .map_err(ConnectError::stage(BootstrapStage::Sync))?;
        debug!("Link synchronised");

        match self.port.setup_encryption(self.encryption_key.value()) {
            Ok(()) => info!("Encryption key negotiated"),
            Err(rejection) if config.abort_on_encryption_failure => {
                return Err(ConnectError::stage(BootstrapStage::Encryption)(rejection));
            }
            Err(rejection) => {
                warn!(error = %rejection, "Encryption setup failed, continuing without it");
            }
        }

        self.port
            .set_host_protocol_version(HOST_PROTOCOL_VERSION)
            .map_err(ConnectError::stage(BootstrapStage::HostProtocol))?;

        let report = self
            .port
            .setup_request()
            .map_err(ConnectError::stage(BootstrapStage::SetupRequest))?;
        self.load_setup(report);

        self.arm(config.route_to_storage_threshold)?;
        info!(
            unit = %self.device.unit_type,
            firmware = %self.device.firmware,
            channels = self.device.channel_count,
            "Device ready"
        );
        Ok(())
    }

    /// Build the channel table from the setup report, querying stored
    /// counts and routes per channel. Per-channel query failures are logged
    /// and leave defaults.
    fn load_setup(&mut self, report: SetupReport) {
        self.device.unit_type = UnitType::from_code(report.unit_type);
        self.device.firmware = report.firmware.trim_end_matches('\0').to_string();
        self.device.protocol_version = report.protocol_version;

        let mut channels = Vec::new();
        for (position, entry) in report.channels.iter().enumerate() {
            let Ok(index) = u8::try_from(position + 1) else {
                warn!(position, "Channel index out of range, ignoring rest of table");
                break;
            };
            if entry.value == 0 {
                continue;
            }
            let currency = entry.currency.trim_end_matches('\0').trim();
            let note = Note::new(u64::from(entry.value), currency);

            let (inventory_count, route) = match wire_value(&note) {
                Ok(value) => (self.stored_count(index, &note, value), self.stored_route(index, &note, value)),
                Err(e) => {
                    warn!(channel = index, error = %e, "Channel not queried");
                    (0, Route::Unknown)
                }
            };
            debug!(channel = index, note = %note, inventory_count, route = %route, "Channel");
            channels.push((
                index,
                Channel {
                    note,
                    inventory_count,
                    route,
                },
            ));
        }

        self.device.channel_count = channels.len();
        let mut ledger = self.ledger_mut();
        for (index, channel) in channels {
            ledger.insert_channel(index, channel);
        }
    }

    fn stored_count(&mut self, index: u8, note: &Note, value: u32) -> u32 {
        match self.port.get_note_amount(value, &note.currency) {
            Ok(count) => u32::from(count),
            Err(rejection) => {
                warn!(channel = index, note = %note, error = %rejection, "Stored count unavailable");
                0
            }
        }
    }

    fn stored_route(&mut self, index: u8, note: &Note, value: u32) -> Route {
        match self.port.get_routing(value, &note.currency) {
            Ok(code) => Route::from_code(code),
            Err(rejection) => {
                warn!(channel = index, note = %note, error = %rejection, "Route unavailable");
                Route::Unknown
            }
        }
    }

    /// Enable note acceptance for the current unit type and queue the ready
    /// bezel colour. Payout denominations at or below `reroute_threshold`
    /// are routed to the payout store.
    pub(crate) fn arm(&mut self, reroute_threshold: Option<u64>) -> Result<(), StepFailure> {
        self.port
            .enable()
            .map_err(StepFailure::at(BootstrapStage::Enable))?;
        self.validator_enabled = true;

        let unit = self.device.unit_type;
        if unit.is_coin_hopper() {
            let notes: Vec<Note> = self.ledger().channels().map(|(_, c)| c.note.clone()).collect();
            for note in notes {
                let value = match wire_value(&note) {
                    Ok(value) => value,
                    Err(e) => {
                        warn!(error = %e, "Coin inhibit skipped");
                        continue;
                    }
                };
                if let Err(rejection) = self.port.set_coinmech_inhibit(value, &note.currency, true) {
                    warn!(note = %note, error = %rejection, "Coin inhibit failed");
                }
            }
        } else {
            if unit.supports_payout() {
                match self.port.enable_payout(unit.code()) {
                    Ok(()) => info!("Payout enabled"),
                    Err(rejection) => warn!(error = %rejection, "Payout enable failed"),
                }
                if let Some(threshold) = reroute_threshold {
                    self.route_small_to_storage(threshold);
                }
            }
            self.port
                .set_inhibits(0xFF, 0xFF)
                .map_err(StepFailure::at(BootstrapStage::Inhibits))?;
        }

        self.shared.actions.enqueue(QueuedAction::ConfigureBezel {
            color: BezelColor::READY,
        });
        info!(unit = %unit, "Validator enabled");
        Ok(())
    }

    fn route_small_to_storage(&mut self, threshold: u64) {
        let candidates: Vec<Note> = self
            .ledger()
            .channels()
            .filter(|(_, c)| c.note.value <= threshold && c.route != Route::Payout)
            .map(|(_, c)| c.note.clone())
            .collect();

        for note in candidates {
            let value = match wire_value(&note) {
                Ok(value) => value,
                Err(e) => {
                    warn!(error = %e, "Route to storage skipped");
                    continue;
                }
            };
            match self
                .port
                .set_route(value, &note.currency, Route::Payout.code().unwrap_or(0))
            {
                Ok(()) => info!(note = %note, "Routed to storage"),
                Err(rejection) => warn!(note = %note, error = %rejection, "Route to storage failed"),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
