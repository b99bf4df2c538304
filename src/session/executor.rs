//! Queued action execution.
//!
//! Runs on the poll thread between polls, only while the device is idle.
//! Failures are logged and dropped; nothing here stops the loop.

use chrono::Utc;
use std::sync::atomic::Ordering;
use tracing::{debug, info, warn};

use super::poll::Controller;
use super::NoteAmount;
use crate::actions::{BezelColor, QueuedAction};
use crate::device::codes::{PayoutOption, PayoutRefusal, Route};
use crate::device::transport::Rejection;
use crate::error::{ActionError, InvalidAction};
use crate::ledger::Note;

/// Minor-unit value for the transport, refusing notes the wire cannot carry.
pub(super) fn wire_value(note: &Note) -> Result<u32, ActionError> {
    note.minor_units().ok_or_else(|| ActionError::Unaddressable {
        note: note.to_string(),
        source: InvalidAction::AmountTooLarge(note.value),
    })
}

impl Controller {
    pub(super) fn execute(&mut self, action: QueuedAction) {
        debug!(action = %action, "Executing queued action");
        if let Err(e) = self.try_execute(&action) {
            warn!(error = %e, "Queued action failed");
        }
    }

    fn try_execute(&mut self, action: &QueuedAction) -> Result<(), ActionError> {
        let rejected = |rejection: Rejection| ActionError::Rejected {
            action: action.to_string(),
            rejection,
        };

        match action {
            QueuedAction::EnableValidator => self.enable_validator()?,
            QueuedAction::DisableValidator => {
                self.port.disable().map_err(rejected)?;
                self.validator_enabled = false;
                info!("Validator disabled");
            }
            QueuedAction::UpdatePayout => self.update_payout()?,
            QueuedAction::RouteToCashbox { note } => self.route(note, Route::Cashbox, rejected)?,
            QueuedAction::RouteToStorage { note } => self.route(note, Route::Payout, rejected)?,
            QueuedAction::Payout { note } => self.payout(note)?,
            QueuedAction::TestPayout { note } => {
                self.request_payout(note, PayoutOption::Test)?;
                info!(amount = %note, "Payout possible");
            }
            QueuedAction::DisablePayout => {
                self.port.disable_payout().map_err(rejected)?;
                info!("Payout disabled");
            }
            QueuedAction::GetNoteAmount { note } => self.query_note_amount(note),
            QueuedAction::EmptyStorage => {
                self.port.empty().map_err(rejected)?;
                self.set_bezel(BezelColor::EMPTYING);
                self.shared.busy.store(true, Ordering::SeqCst);
                info!("Emptying payout store");
            }
            QueuedAction::ConfigureBezel { color } => {
                self.port
                    .configure_bezel(color.red, color.green, color.blue, color.persist)
                    .map_err(rejected)?;
            }
            QueuedAction::Reset => {
                self.port.reset().map_err(rejected)?;
                info!("Device reset requested");
            }
        }
        Ok(())
    }

    /// Re-run the arming sequence without touching routes.
    pub(super) fn enable_validator(&mut self) -> Result<(), ActionError> {
        self.arm(None).map_err(|failure| ActionError::Rejected {
            action: failure.stage.to_string(),
            rejection: failure.rejection,
        })
    }

    fn route(
        &mut self,
        note: &Note,
        route: Route,
        rejected: impl FnOnce(Rejection) -> ActionError,
    ) -> Result<(), ActionError> {
        let code = route.code().unwrap_or(0);
        let value = wire_value(note)?;
        self.port
            .set_route(value, &note.currency, code)
            .map_err(rejected)?;
        info!(note = %note, route = %route, "Route set");
        Ok(())
    }

    fn request_payout(&mut self, note: &Note, option: PayoutOption) -> Result<(), ActionError> {
        let value = wire_value(note)?;
        self.port
            .payout(value, &note.currency, option)
            .map_err(|rejection| {
                let reason = rejection.data.first().copied();
                match reason {
                    Some(code) => ActionError::PayoutRefused {
                        reason: PayoutRefusal::from_code(code),
                    },
                    None => ActionError::Rejected {
                        action: format!("Payout {note}"),
                        rejection,
                    },
                }
            })
    }

    fn payout(&mut self, note: &Note) -> Result<(), ActionError> {
        self.request_payout(note, PayoutOption::Commit)?;
        self.set_bezel(BezelColor::PAYING);
        self.shared.busy.store(true, Ordering::SeqCst);
        info!(amount = %note, "Paying out");
        Ok(())
    }

    /// Immediate bezel change, bypassing the queue.
    fn set_bezel(&mut self, color: BezelColor) {
        if let Err(rejection) =
            self.port
                .configure_bezel(color.red, color.green, color.blue, color.persist)
        {
            warn!(error = %rejection, "Bezel update failed");
        }
    }

    fn update_payout(&mut self) -> Result<(), ActionError> {
        if !self.device.unit_type.supports_payout() {
            return Err(ActionError::NoPayoutUnit {
                action: QueuedAction::UpdatePayout.to_string(),
            });
        }

        let channels: Vec<(u8, Note)> = self
            .ledger()
            .channels()
            .map(|(index, c)| (index, c.note.clone()))
            .collect();

        for (index, note) in channels {
            let value = match wire_value(&note) {
                Ok(value) => value,
                Err(e) => {
                    warn!(channel = index, error = %e, "Channel skipped");
                    continue;
                }
            };
            match self.port.get_note_amount(value, &note.currency) {
                Ok(count) => self.ledger_mut().set_inventory(index, u32::from(count)),
                Err(rejection) => {
                    warn!(channel = index, note = %note, error = %rejection, "Stored count query failed");
                }
            }
            match self.port.get_routing(value, &note.currency) {
                Ok(code) => self.ledger_mut().set_route(index, Route::from_code(code)),
                Err(rejection) => {
                    warn!(channel = index, note = %note, error = %rejection, "Route query failed");
                }
            }
        }
        debug!(ledger = %self.ledger().snapshot(), "Payout status updated");
        Ok(())
    }

    fn query_note_amount(&mut self, note: &Note) {
        let count = match wire_value(note) {
            Ok(value) => match self.port.get_note_amount(value, &note.currency) {
                Ok(count) => {
                    info!(note = %note, count, "Stored note count");
                    Some(count)
                }
                Err(rejection) => {
                    warn!(note = %note, error = %rejection, "Stored note count unavailable");
                    None
                }
            },
            Err(e) => {
                warn!(error = %e, "Stored note count not queried");
                None
            }
        };
        let mut slot = self
            .shared
            .note_amount
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *slot = Some(NoteAmount {
            note: note.clone(),
            count,
            queried_at: Utc::now(),
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
