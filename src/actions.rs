//! Deferred device commands.
//!
//! Callers enqueue [`QueuedAction`]s from any thread; the poll thread drains
//! them one by one while the device is idle.

use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::error::InvalidAction;
use crate::ledger::Note;

// ---------------------------------------------------------------------------
// Bezel colours
// ---------------------------------------------------------------------------

/// Bezel indicator setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BezelColor {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    /// Store in device non-volatile memory.
    pub persist: bool,
}

impl BezelColor {
    /// Accepting notes.
    pub const READY: Self = Self::rgb(0, 255, 0);
    /// Paying out.
    pub const PAYING: Self = Self::rgb(0, 0, 255);
    /// Emptying the payout store.
    pub const EMPTYING: Self = Self::rgb(255, 255, 0);

    pub const fn rgb(red: u8, green: u8, blue: u8) -> Self {
        Self {
            red,
            green,
            blue,
            persist: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// A command waiting for the poll thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum QueuedAction {
    EnableValidator,
    DisableValidator,
    /// Refresh stored counts and routes for every channel.
    UpdatePayout,
    RouteToCashbox { note: Note },
    RouteToStorage { note: Note },
    Payout { note: Note },
    /// Ask whether the amount could be paid, without paying it.
    TestPayout { note: Note },
    DisablePayout,
    GetNoteAmount { note: Note },
    EmptyStorage,
    ConfigureBezel { color: BezelColor },
    Reset,
}

fn checked_note(amount: u64, currency: &str) -> Result<Note, InvalidAction> {
    if amount == 0 {
        return Err(InvalidAction::ZeroAmount);
    }
    let valid_code = currency.len() == 3 && currency.bytes().all(|b| b.is_ascii_uppercase());
    if !valid_code {
        return Err(InvalidAction::Currency(currency.to_string()));
    }
    let note = Note::new(amount, currency);
    if note.minor_units().is_none() {
        return Err(InvalidAction::AmountTooLarge(amount));
    }
    Ok(note)
}

impl QueuedAction {
    pub fn route_to_cashbox(amount: u64, currency: &str) -> Result<Self, InvalidAction> {
        Ok(Self::RouteToCashbox {
            note: checked_note(amount, currency)?,
        })
    }

    pub fn route_to_storage(amount: u64, currency: &str) -> Result<Self, InvalidAction> {
        Ok(Self::RouteToStorage {
            note: checked_note(amount, currency)?,
        })
    }

    pub fn payout(amount: u64, currency: &str) -> Result<Self, InvalidAction> {
        Ok(Self::Payout {
            note: checked_note(amount, currency)?,
        })
    }

    pub fn test_payout(amount: u64, currency: &str) -> Result<Self, InvalidAction> {
        Ok(Self::TestPayout {
            note: checked_note(amount, currency)?,
        })
    }

    pub fn get_note_amount(amount: u64, currency: &str) -> Result<Self, InvalidAction> {
        Ok(Self::GetNoteAmount {
            note: checked_note(amount, currency)?,
        })
    }

    pub fn configure_bezel(red: u8, green: u8, blue: u8, persist: bool) -> Self {
        Self::ConfigureBezel {
            color: BezelColor {
                red,
                green,
                blue,
                persist,
            },
        }
    }
}

impl fmt::Display for QueuedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EnableValidator => f.write_str("Enable validator"),
            Self::DisableValidator => f.write_str("Disable validator"),
            Self::UpdatePayout => f.write_str("Update payout status"),
            Self::RouteToCashbox { note } => write!(f, "Route {note} to cashbox"),
            Self::RouteToStorage { note } => write!(f, "Route {note} to storage"),
            Self::Payout { note } => write!(f, "Payout {note}"),
            Self::TestPayout { note } => write!(f, "Test payout {note}"),
            Self::DisablePayout => f.write_str("Disable payout"),
            Self::GetNoteAmount { note } => write!(f, "Get note amount {note}"),
            Self::EmptyStorage => f.write_str("Empty storage"),
            Self::ConfigureBezel { color } => write!(
                f,
                "Configure bezel ({}, {}, {})",
                color.red, color.green, color.blue
            ),
            Self::Reset => f.write_str("Reset"),
        }
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// Thread-safe FIFO of pending actions.
#[derive(Debug, Default)]
pub struct ActionQueue {
    inner: Mutex<VecDeque<QueuedAction>>,
}

impl ActionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<QueuedAction>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append an action. Never blocks beyond the queue lock.
    pub fn enqueue(&self, action: QueuedAction) {
        self.lock().push_back(action);
    }

    pub fn pop(&self) -> Option<QueuedAction> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Execute queued actions in order while `busy` is clear. Checks `busy`
    /// before every pop, so an action that sets it ends the drain. The queue
    /// lock is not held while `execute` runs. Returns the number executed.
    pub fn drain_if_idle(&self, busy: &AtomicBool, mut execute: impl FnMut(QueuedAction)) -> usize {
        let mut executed = 0;
        while !busy.load(Ordering::SeqCst) {
            let Some(action) = self.pop() else {
                break;
            };
            execute(action);
            executed += 1;
        }
        executed
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
