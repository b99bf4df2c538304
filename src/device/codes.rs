//! Protocol codes shared by the transport port and the session controller.
//!
//! Every code family is a closed enum with an explicit `from_code` / `code`
//! mapping. Callers compare variants, never raw bytes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Host protocol version this controller implements.
pub const HOST_PROTOCOL_VERSION: u8 = 6;

// ---------------------------------------------------------------------------
// Generic command responses
// ---------------------------------------------------------------------------

/// Status returned by a transport primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseCode {
    Ok,
    CommandNotKnown,
    WrongParameters,
    ParameterOutOfRange,
    CannotProcess,
    SoftwareError,
    Fail,
    KeyNotSet,
    /// The engine gave up waiting for the device.
    Timeout,
    Other(u8),
}

impl ResponseCode {
    pub fn from_code(code: u8) -> Self {
        match code {
            0xF0 => Self::Ok,
            0xF2 => Self::CommandNotKnown,
            0xF3 => Self::WrongParameters,
            0xF4 => Self::ParameterOutOfRange,
            0xF5 => Self::CannotProcess,
            0xF6 => Self::SoftwareError,
            0xF8 => Self::Fail,
            0xFA => Self::KeyNotSet,
            0xFF => Self::Timeout,
            other => Self::Other(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Ok => 0xF0,
            Self::CommandNotKnown => 0xF2,
            Self::WrongParameters => 0xF3,
            Self::ParameterOutOfRange => 0xF4,
            Self::CannotProcess => 0xF5,
            Self::SoftwareError => 0xF6,
            Self::Fail => 0xF8,
            Self::KeyNotSet => 0xFA,
            Self::Timeout => 0xFF,
            Self::Other(code) => code,
        }
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Ok => "ok",
            Self::CommandNotKnown => "command not known",
            Self::WrongParameters => "wrong number of parameters",
            Self::ParameterOutOfRange => "parameter out of range",
            Self::CannotProcess => "command cannot be processed",
            Self::SoftwareError => "software error",
            Self::Fail => "fail",
            Self::KeyNotSet => "key not set",
            Self::Timeout => "timeout",
            Self::Other(code) => return write!(f, "status 0x{code:02X}"),
        };
        f.write_str(text)
    }
}

// ---------------------------------------------------------------------------
// Poll events
// ---------------------------------------------------------------------------

/// Event kind reported in a poll response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    CalibrationFail,
    JamRecovery,
    SmartEmptying,
    SmartEmptied,
    Emptying,
    Emptied,
    Stacking,
    BarcodeAck,
    Dispensed,
    CoinsLow,
    CoinsEmpty,
    Jammed,
    Halted,
    Floating,
    Floated,
    PayoutTimeout,
    Dispensing,
    Stored,
    IncompletePayout,
    IncompleteFloat,
    CashboxPaid,
    CoinCredit,
    NotePathOpen,
    ClearedFromFront,
    ClearedIntoCashbox,
    CashboxRemoved,
    CashboxReplaced,
    BarcodeValidate,
    FraudAttempt,
    StackerFull,
    Disabled,
    UnsafeJam,
    SafeJam,
    Stacked,
    Rejected,
    Rejecting,
    Credit,
    Read,
    Reset,
    KeyNotSet,
    /// A code this controller has no name for; recorded verbatim.
    Unknown(u8),
}

impl EventKind {
    pub fn from_code(code: u8) -> Self {
        match code {
            0x83 => Self::CalibrationFail,
            0xB0 => Self::JamRecovery,
            0xB3 => Self::SmartEmptying,
            0xB4 => Self::SmartEmptied,
            0xC2 => Self::Emptying,
            0xC3 => Self::Emptied,
            0xCC => Self::Stacking,
            0xD1 => Self::BarcodeAck,
            0xD2 => Self::Dispensed,
            0xD3 => Self::CoinsLow,
            0xD4 => Self::CoinsEmpty,
            0xD5 => Self::Jammed,
            0xD6 => Self::Halted,
            0xD7 => Self::Floating,
            0xD8 => Self::Floated,
            0xD9 => Self::PayoutTimeout,
            0xDA => Self::Dispensing,
            0xDB => Self::Stored,
            0xDC => Self::IncompletePayout,
            0xDD => Self::IncompleteFloat,
            0xDE => Self::CashboxPaid,
            0xDF => Self::CoinCredit,
            0xE0 => Self::NotePathOpen,
            0xE1 => Self::ClearedFromFront,
            0xE2 => Self::ClearedIntoCashbox,
            0xE3 => Self::CashboxRemoved,
            0xE4 => Self::CashboxReplaced,
            0xE5 => Self::BarcodeValidate,
            0xE6 => Self::FraudAttempt,
            0xE7 => Self::StackerFull,
            0xE8 => Self::Disabled,
            0xE9 => Self::UnsafeJam,
            0xEA => Self::SafeJam,
            0xEB => Self::Stacked,
            0xEC => Self::Rejected,
            0xED => Self::Rejecting,
            0xEE => Self::Credit,
            0xEF => Self::Read,
            0xF1 => Self::Reset,
            0xFA => Self::KeyNotSet,
            other => Self::Unknown(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::CalibrationFail => 0x83,
            Self::JamRecovery => 0xB0,
            Self::SmartEmptying => 0xB3,
            Self::SmartEmptied => 0xB4,
            Self::Emptying => 0xC2,
            Self::Emptied => 0xC3,
            Self::Stacking => 0xCC,
            Self::BarcodeAck => 0xD1,
            Self::Dispensed => 0xD2,
            Self::CoinsLow => 0xD3,
            Self::CoinsEmpty => 0xD4,
            Self::Jammed => 0xD5,
            Self::Halted => 0xD6,
            Self::Floating => 0xD7,
            Self::Floated => 0xD8,
            Self::PayoutTimeout => 0xD9,
            Self::Dispensing => 0xDA,
            Self::Stored => 0xDB,
            Self::IncompletePayout => 0xDC,
            Self::IncompleteFloat => 0xDD,
            Self::CashboxPaid => 0xDE,
            Self::CoinCredit => 0xDF,
            Self::NotePathOpen => 0xE0,
            Self::ClearedFromFront => 0xE1,
            Self::ClearedIntoCashbox => 0xE2,
            Self::CashboxRemoved => 0xE3,
            Self::CashboxReplaced => 0xE4,
            Self::BarcodeValidate => 0xE5,
            Self::FraudAttempt => 0xE6,
            Self::StackerFull => 0xE7,
            Self::Disabled => 0xE8,
            Self::UnsafeJam => 0xE9,
            Self::SafeJam => 0xEA,
            Self::Stacked => 0xEB,
            Self::Rejected => 0xEC,
            Self::Rejecting => 0xED,
            Self::Credit => 0xEE,
            Self::Read => 0xEF,
            Self::Reset => 0xF1,
            Self::KeyNotSet => 0xFA,
            Self::Unknown(code) => code,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::CalibrationFail => "Calibration failed",
            Self::JamRecovery => "Jam recovery",
            Self::SmartEmptying => "Smart emptying",
            Self::SmartEmptied => "Smart emptied",
            Self::Emptying => "Emptying",
            Self::Emptied => "Empty",
            Self::Stacking => "Note stacking",
            Self::BarcodeAck => "Barcode ACK",
            Self::Dispensed => "Dispensed",
            Self::CoinsLow => "Coins low",
            Self::CoinsEmpty => "Coins empty",
            Self::Jammed => "Jammed",
            Self::Halted => "Halted",
            Self::Floating => "Floating",
            Self::Floated => "Floated",
            Self::PayoutTimeout => "Timeout",
            Self::Dispensing => "Dispensing",
            Self::Stored => "Note stored in payout",
            Self::IncompletePayout => "Incomplete payout",
            Self::IncompleteFloat => "Incomplete float",
            Self::CashboxPaid => "Cashbox paid",
            Self::CoinCredit => "Coin credit",
            Self::NotePathOpen => "Note path open",
            Self::ClearedFromFront => "Cleared from front",
            Self::ClearedIntoCashbox => "Cleared into cashbox",
            Self::CashboxRemoved => "Cashbox removed",
            Self::CashboxReplaced => "Cashbox replaced",
            Self::BarcodeValidate => "Barcode ticket validated",
            Self::FraudAttempt => "Fraud attempt",
            Self::StackerFull => "Stacker full",
            Self::Disabled => "Disabled",
            Self::UnsafeJam => "Unsafe note jam",
            Self::SafeJam => "Safe note jam",
            Self::Stacked => "Note stacked",
            Self::Rejected => "Note rejected",
            Self::Rejecting => "Note rejecting",
            Self::Credit => "Credit note",
            Self::Read => "Read note",
            Self::Reset => "Reset",
            Self::KeyNotSet => "Key not set",
            Self::Unknown(code) => return write!(f, "Unknown event 0x{code:02X}"),
        };
        f.write_str(text)
    }
}

// ---------------------------------------------------------------------------
// Unit type
// ---------------------------------------------------------------------------

/// Peripheral class reported by the setup request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitType {
    BanknoteValidator,
    SmartHopper,
    SmartPayout,
    NoteFloat,
    AddonPrinter,
    StandAlonePrinter,
    Tebs,
    TebsWithPayout,
    TebsWithTicket,
    Other(u8),
}

impl UnitType {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::BanknoteValidator,
            3 => Self::SmartHopper,
            6 => Self::SmartPayout,
            7 => Self::NoteFloat,
            8 => Self::AddonPrinter,
            11 => Self::StandAlonePrinter,
            13 => Self::Tebs,
            14 => Self::TebsWithPayout,
            15 => Self::TebsWithTicket,
            other => Self::Other(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::BanknoteValidator => 0,
            Self::SmartHopper => 3,
            Self::SmartPayout => 6,
            Self::NoteFloat => 7,
            Self::AddonPrinter => 8,
            Self::StandAlonePrinter => 11,
            Self::Tebs => 13,
            Self::TebsWithPayout => 14,
            Self::TebsWithTicket => 15,
            Self::Other(code) => code,
        }
    }

    /// Coin units take per-denomination coin-mech inhibits instead of the
    /// blanket inhibit mask.
    pub fn is_coin_hopper(self) -> bool {
        matches!(self, Self::SmartHopper)
    }

    /// Units with a payout module that must be enabled separately.
    pub fn supports_payout(self) -> bool {
        matches!(self, Self::SmartPayout | Self::NoteFloat)
    }
}

impl fmt::Display for UnitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::BanknoteValidator => "Banknote validator",
            Self::SmartHopper => "Smart Hopper",
            Self::SmartPayout => "SMART Payout",
            Self::NoteFloat => "Note Float",
            Self::AddonPrinter => "Addon Printer",
            Self::StandAlonePrinter => "Stand Alone Printer",
            Self::Tebs => "TEBS",
            Self::TebsWithPayout => "TEBS with SMART Payout",
            Self::TebsWithTicket => "TEBS with SMART Ticket",
            Self::Other(code) => return write!(f, "Unit type {code}"),
        };
        f.write_str(text)
    }
}

// ---------------------------------------------------------------------------
// Route
// ---------------------------------------------------------------------------

/// Where the device sends an accepted note of a denomination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// Kept in the payout store, available for dispensing.
    Payout,
    Cashbox,
    /// The routing query failed or returned an unrecognised code.
    Unknown,
}

impl Route {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Payout,
            1 => Self::Cashbox,
            _ => Self::Unknown,
        }
    }

    /// Wire code for `set_route`. `Unknown` has no wire form.
    pub fn code(self) -> Option<u8> {
        match self {
            Self::Payout => Some(0),
            Self::Cashbox => Some(1),
            Self::Unknown => None,
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Payout => "Payout",
            Self::Cashbox => "Cashbox",
            Self::Unknown => "Unknown",
        })
    }
}

// ---------------------------------------------------------------------------
// Payout option byte
// ---------------------------------------------------------------------------

/// Option byte sent with a payout request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutOption {
    /// Only check whether the amount could be paid.
    Test,
    Commit,
}

impl PayoutOption {
    pub fn code(self) -> u8 {
        match self {
            Self::Test => 0x19,
            Self::Commit => 0x58,
        }
    }
}

// ---------------------------------------------------------------------------
// Payout refusal reason
// ---------------------------------------------------------------------------

/// Reason byte the device returns when it refuses a payout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutRefusal {
    NotEnoughValue,
    CannotPayExactAmount,
    Busy,
    Disabled,
    Other(u8),
}

impl PayoutRefusal {
    pub fn from_code(code: u8) -> Self {
        match code {
            0x01 => Self::NotEnoughValue,
            0x02 => Self::CannotPayExactAmount,
            0x03 => Self::Busy,
            0x04 => Self::Disabled,
            other => Self::Other(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::NotEnoughValue => 0x01,
            Self::CannotPayExactAmount => 0x02,
            Self::Busy => 0x03,
            Self::Disabled => 0x04,
            Self::Other(code) => code,
        }
    }
}

impl fmt::Display for PayoutRefusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NotEnoughValue => "not enough value in smart payout",
            Self::CannotPayExactAmount => "can't pay exact amount",
            Self::Busy => "smart payout is busy",
            Self::Disabled => "smart payout is disabled",
            Self::Other(code) => return write!(f, "refusal code 0x{code:02X}"),
        };
        f.write_str(text)
    }
}

// ---------------------------------------------------------------------------
// Calibration failure
// ---------------------------------------------------------------------------

/// Sub-reason carried by a calibration-fail event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationFailure {
    NoFailure,
    SensorFlap,
    SensorExit,
    SensorCoil1,
    SensorCoil2,
    NotInitialised,
    ChecksumError,
    RecalibrationRequired,
    Other(u32),
}

impl CalibrationFailure {
    pub fn from_code(code: u32) -> Self {
        match code {
            0x00 => Self::NoFailure,
            0x01 => Self::SensorFlap,
            0x02 => Self::SensorExit,
            0x03 => Self::SensorCoil1,
            0x04 => Self::SensorCoil2,
            0x05 => Self::NotInitialised,
            0x06 => Self::ChecksumError,
            0x07 => Self::RecalibrationRequired,
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for CalibrationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NoFailure => "No failure",
            Self::SensorFlap => "Optical sensor flap",
            Self::SensorExit => "Optical sensor exit",
            Self::SensorCoil1 => "Coil sensor 1",
            Self::SensorCoil2 => "Coil sensor 2",
            Self::NotInitialised => "Unit not initialised",
            Self::ChecksumError => "Data checksum error",
            Self::RecalibrationRequired => "Recalibration by command required",
            Self::Other(code) => return write!(f, "Failure code {code}"),
        };
        f.write_str(text)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_known_codes() {
        assert_eq!(EventKind::from_code(0xEE), EventKind::Credit);
        assert_eq!(EventKind::from_code(0xEF), EventKind::Read);
        assert_eq!(EventKind::from_code(0xE4), EventKind::CashboxReplaced);
        assert_eq!(EventKind::Stacked.code(), 0xEB);
    }

    #[test]
    fn test_event_kind_unknown_code_is_preserved() {
        let kind = EventKind::from_code(0x42);
        assert_eq!(kind, EventKind::Unknown(0x42));
        assert_eq!(kind.code(), 0x42);
        assert_eq!(kind.to_string(), "Unknown event 0x42");
    }

    #[test]
    fn test_every_named_event_code_maps_back() {
        for code in 0u8..=255 {
            let kind = EventKind::from_code(code);
            assert_eq!(kind.code(), code, "code 0x{code:02X} did not map back");
        }
    }

    #[test]
    fn test_response_code_timeout_and_key_not_set() {
        assert_eq!(ResponseCode::from_code(0xFF), ResponseCode::Timeout);
        assert_eq!(ResponseCode::from_code(0xFA), ResponseCode::KeyNotSet);
        assert_eq!(ResponseCode::from_code(0xF0), ResponseCode::Ok);
        assert_eq!(ResponseCode::Other(0x11).code(), 0x11);
    }

    #[test]
    fn test_unit_type_capabilities() {
        assert!(UnitType::SmartPayout.supports_payout());
        assert!(UnitType::NoteFloat.supports_payout());
        assert!(!UnitType::BanknoteValidator.supports_payout());
        assert!(UnitType::SmartHopper.is_coin_hopper());
        assert!(!UnitType::SmartHopper.supports_payout());
        assert_eq!(UnitType::from_code(99), UnitType::Other(99));
    }

    #[test]
    fn test_route_codes() {
        assert_eq!(Route::from_code(0), Route::Payout);
        assert_eq!(Route::from_code(1), Route::Cashbox);
        assert_eq!(Route::from_code(7), Route::Unknown);
        assert_eq!(Route::Unknown.code(), None);
        assert_eq!(Route::Payout.code(), Some(0));
    }

    #[test]
    fn test_payout_refusal_display() {
        assert_eq!(
            PayoutRefusal::from_code(0x02).to_string(),
            "can't pay exact amount"
        );
        assert_eq!(PayoutRefusal::from_code(0x09), PayoutRefusal::Other(0x09));
    }

    #[test]
    fn test_calibration_recal_code() {
        assert_eq!(
            CalibrationFailure::from_code(7),
            CalibrationFailure::RecalibrationRequired
        );
    }

    #[test]
    fn test_payout_option_bytes() {
        assert_eq!(PayoutOption::Commit.code(), 0x58);
        assert_eq!(PayoutOption::Test.code(), 0x19);
    }
}
