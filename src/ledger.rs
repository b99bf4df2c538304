//! Inventory ledger: the channel table and the cashbox running total.
//!
//! Written only by the poll thread; callers read it through
//! [`InventoryLedger::snapshot`] taken under the session's lock.
//!
//! Note values are kept in major units. The transport speaks minor units, see
//! [`Note::minor_units`]; payout amounts stay exact as [`Amount`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::device::codes::Route;

/// Minor units per major unit on the wire.
pub const MINOR_UNITS_PER_MAJOR: u64 = 100;

/// Currency assumed until the device reports its channel table.
pub const DEFAULT_CURRENCY: &str = "RUB";

// ---------------------------------------------------------------------------
// Note
// ---------------------------------------------------------------------------

/// A denomination: face value in major units plus currency code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Note {
    pub value: u64,
    pub currency: String,
}

impl Note {
    pub fn new(value: u64, currency: &str) -> Self {
        Self {
            value,
            currency: currency.to_string(),
        }
    }

    /// Value as sent to the transport, or `None` when it does not fit the
    /// 32-bit wire field.
    pub fn minor_units(&self) -> Option<u32> {
        self.value
            .checked_mul(MINOR_UNITS_PER_MAJOR)
            .and_then(|minor| u32::try_from(minor).ok())
    }
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.currency)
    }
}

// ---------------------------------------------------------------------------
// Amount
// ---------------------------------------------------------------------------

/// An exact sum in minor units, as reported for payouts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Amount {
    pub minor_units: u32,
    pub currency: String,
}

impl Amount {
    pub fn new(minor_units: u32, currency: &str) -> Self {
        Self {
            minor_units,
            currency: currency.to_string(),
        }
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let minor = u64::from(self.minor_units);
        write!(
            f,
            "{}.{:02} {}",
            minor / MINOR_UNITS_PER_MAJOR,
            minor % MINOR_UNITS_PER_MAJOR,
            self.currency
        )
    }
}

/// What an event refers to: a resolved note, an exact payout amount, or the
/// raw channel identifier when the channel is 0 or not in the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Denomination {
    Note(Note),
    Amount(Amount),
    Unidentified(u32),
}

impl Denomination {
    pub fn note(&self) -> Option<&Note> {
        match self {
            Self::Note(note) => Some(note),
            Self::Amount(_) | Self::Unidentified(_) => None,
        }
    }
}

impl fmt::Display for Denomination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Note(note) => note.fmt(f),
            Self::Amount(amount) => amount.fmt(f),
            Self::Unidentified(raw) => write!(f, "unidentified channel {raw}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// One denomination slot known to the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub note: Note,
    /// Notes of this denomination held in the payout store.
    pub inventory_count: u32,
    pub route: Route,
}

/// Read-only copy of one channel, as handed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    pub index: u8,
    pub note: Note,
    pub inventory_count: u32,
    pub route: Route,
}

/// Consistent copy of the whole ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub cashbox_total: u64,
    pub currency: String,
    pub channels: Vec<ChannelSnapshot>,
}

impl LedgerSnapshot {
    /// Value held in the payout store.
    pub fn stored_value(&self) -> u64 {
        self.channels
            .iter()
            .map(|c| c.note.value * u64::from(c.inventory_count))
            .sum()
    }
}

impl fmt::Display for LedgerSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Cashbox: {} {}", self.cashbox_total, self.currency)?;
        let detail: Vec<String> = self
            .channels
            .iter()
            .map(|c| format!("{}: {}", c.note, c.inventory_count))
            .collect();
        write!(
            f,
            "Storage: {} {} ({})",
            self.stored_value(),
            self.currency,
            detail.join(", ")
        )
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Channel table plus cashbox total.
#[derive(Debug, Clone)]
pub struct InventoryLedger {
    channels: BTreeMap<u8, Channel>,
    cashbox: u64,
    currency: String,
}

impl InventoryLedger {
    pub fn new(default_currency: &str) -> Self {
        Self {
            channels: BTreeMap::new(),
            cashbox: 0,
            currency: default_currency.to_string(),
        }
    }

    /// Register a channel reported by the device. The last registered
    /// channel's currency becomes the ledger currency.
    pub fn insert_channel(&mut self, index: u8, channel: Channel) {
        self.currency = channel.note.currency.clone();
        self.channels.insert(index, channel);
    }

    pub fn channel(&self, index: u8) -> Option<&Channel> {
        self.channels.get(&index)
    }

    pub fn channels(&self) -> impl Iterator<Item = (u8, &Channel)> {
        self.channels.iter().map(|(i, c)| (*i, c))
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn cashbox_total(&self) -> u64 {
        self.cashbox
    }

    /// Map a device channel identifier to a note.
    pub fn resolve(&self, raw: u32) -> Denomination {
        u8::try_from(raw)
            .ok()
            .and_then(|index| self.channels.get(&index))
            .map(|c| Denomination::Note(c.note.clone()))
            .unwrap_or(Denomination::Unidentified(raw))
    }

    /// Count one more stored note of this denomination. Returns the channel
    /// index, or `None` when no channel carries this note.
    pub fn store_note(&mut self, note: &Note) -> Option<u8> {
        let (index, channel) = self.channels.iter_mut().find(|(_, c)| &c.note == note)?;
        channel.inventory_count = channel.inventory_count.saturating_add(1);
        Some(*index)
    }

    pub fn add_to_cashbox(&mut self, value: u64) {
        self.cashbox = self.cashbox.saturating_add(value);
    }

    /// A new cashbox was fitted. Returns the total that was in the old one.
    pub fn replace_cashbox(&mut self) -> u64 {
        std::mem::take(&mut self.cashbox)
    }

    /// Move the whole payout store into the cashbox. Returns the value moved.
    pub fn smart_empty(&mut self) -> u64 {
        let moved = self.stored_value();
        for channel in self.channels.values_mut() {
            channel.inventory_count = 0;
        }
        self.add_to_cashbox(moved);
        moved
    }

    pub fn set_inventory(&mut self, index: u8, count: u32) {
        if let Some(channel) = self.channels.get_mut(&index) {
            channel.inventory_count = count;
        }
    }

    pub fn set_route(&mut self, index: u8, route: Route) {
        if let Some(channel) = self.channels.get_mut(&index) {
            channel.route = route;
        }
    }

    /// Value held in the payout store.
    pub fn stored_value(&self) -> u64 {
        self.channels
            .values()
            .map(|c| c.note.value * u64::from(c.inventory_count))
            .sum()
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            cashbox_total: self.cashbox,
            currency: self.currency.clone(),
            channels: self
                .channels
                .iter()
                .map(|(index, c)| ChannelSnapshot {
                    index: *index,
                    note: c.note.clone(),
                    inventory_count: c.inventory_count,
                    route: c.route,
                })
                .collect(),
        }
    }
}

impl Default for InventoryLedger {
    fn default() -> Self {
        Self::new(DEFAULT_CURRENCY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
