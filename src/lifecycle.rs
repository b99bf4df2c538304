//! Note lifecycle tracker.
//!
//! A single pending-note slot bridges "note seen" and "note settled" across
//! poll cycles: `Empty -> Seen -> Credited -> (stored | stacked) -> Empty`.
//! Dispensing flows reuse the same slot. The slot is owned by the poll thread.

use serde::Serialize;
use tracing::warn;

use crate::ledger::Denomination;

/// Last lifecycle step observed for the pending note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteStage {
    Empty,
    /// Read and held in escrow.
    Seen,
    /// Past the point of recovery; funds may be counted as accepted.
    Credited,
    Dispensing,
}

/// The one note currently mid-transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingNote {
    stage: NoteStage,
    note: Option<Denomination>,
}

impl PendingNote {
    pub fn new() -> Self {
        Self {
            stage: NoteStage::Empty,
            note: None,
        }
    }

    pub fn stage(&self) -> NoteStage {
        self.stage
    }

    pub fn note(&self) -> Option<&Denomination> {
        self.note.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.stage == NoteStage::Empty && self.note.is_none()
    }

    pub fn clear(&mut self) {
        self.stage = NoteStage::Empty;
        self.note = None;
    }

    fn replace(&mut self, stage: NoteStage, note: Denomination) {
        if self.stage == NoteStage::Credited {
            // A credited note that never settled is about to lose its slot.
            warn!(
                previous = ?self.note,
                next = %note,
                "Pending credited note overwritten before it was stored or stacked"
            );
        }
        self.stage = stage;
        self.note = Some(note);
    }

    /// A note was read into escrow.
    pub fn seen(&mut self, note: Denomination) {
        self.replace(NoteStage::Seen, note);
    }

    /// A note was credited.
    pub fn credited(&mut self, note: Denomination) {
        self.replace(NoteStage::Credited, note);
    }

    /// The device is paying out; `note` is the raw dispensed amount.
    pub fn dispensing(&mut self, note: Denomination) {
        self.replace(NoteStage::Dispensing, note);
    }

    /// Settle a credited note into the payout store. Returns the note only if
    /// the slot was `Credited`; otherwise the slot is left untouched.
    pub fn take_stored(&mut self) -> Option<Denomination> {
        if self.stage != NoteStage::Credited {
            return None;
        }
        let note = self.note.take();
        self.clear();
        note
    }

    /// Settle the pending note into the cashbox. A channel carried by the
    /// stacked event overrides whatever the slot held.
    pub fn take_stacked(&mut self, reported: Option<Denomination>) -> Option<Denomination> {
        let note = reported.or_else(|| self.note.take());
        self.clear();
        note
    }

    /// Finish a payout. A reported amount overrides the slot.
    pub fn take_dispensed(&mut self, reported: Option<Denomination>) -> Option<Denomination> {
        let note = reported.or_else(|| self.note.take());
        self.clear();
        note
    }
}

impl Default for PendingNote {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
