//! Transport port for eSSP devices.
//!
//! Defines the `SspTransport` trait: the primitive request/response operations
//! of the protocol engine. Implementations own link sync, key exchange, CRC
//! framing and the physical port; the session controller only sees typed
//! results and a `Rejection` for any non-OK status.
//!
//! Value units at this boundary: the setup request reports channel values in
//! major units, every other primitive takes and reports minor units.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::codes::{PayoutOption, ResponseCode};

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// A non-OK status plus whatever response bytes the device returned with it.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("device responded {code}")]
pub struct Rejection {
    pub code: ResponseCode,
    /// Response buffer after the status byte (e.g. a payout refusal reason).
    pub data: Vec<u8>,
}

impl Rejection {
    pub fn new(code: ResponseCode) -> Self {
        Self {
            code,
            data: Vec::new(),
        }
    }

    pub fn with_data(code: ResponseCode, data: &[u8]) -> Self {
        Self {
            code,
            data: data.to_vec(),
        }
    }

    pub fn timeout() -> Self {
        Self::new(ResponseCode::Timeout)
    }

    pub fn is_timeout(&self) -> bool {
        self.code == ResponseCode::Timeout
    }
}

/// Result of a transport primitive.
pub type PortResult<T> = Result<T, Rejection>;

/// One entry of the device's channel table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelReport {
    /// Face value in major units; 0 marks an unused channel.
    pub value: u32,
    pub currency: String,
}

/// Parsed setup-request response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupReport {
    pub unit_type: u8,
    pub firmware: String,
    pub protocol_version: u8,
    /// Channel 1 is at index 0.
    pub channels: Vec<ChannelReport>,
}

/// One event from a poll response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollEvent {
    pub code: u8,
    /// Channel index for note events, minor-unit value for payout events.
    pub data1: u32,
    pub data2: u32,
    pub currency: String,
}

impl PollEvent {
    pub fn new(code: u8, data1: u32) -> Self {
        Self {
            code,
            data1,
            data2: 0,
            currency: String::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Transport trait
// ---------------------------------------------------------------------------

/// Primitive operations of the eSSP protocol engine.
///
/// Every call is blocking; the session controller calls them from its own
/// poll thread only.
pub trait SspTransport: Send {
    /// Open the port and bind the device address.
    fn init(&mut self, port: &str, address: u8) -> PortResult<()>;

    fn sync(&mut self) -> PortResult<()>;

    /// Negotiate the session encryption key.
    fn setup_encryption(&mut self, key: u64) -> PortResult<()>;

    fn set_host_protocol_version(&mut self, version: u8) -> PortResult<()>;

    fn setup_request(&mut self) -> PortResult<SetupReport>;

    fn enable(&mut self) -> PortResult<()>;

    fn disable(&mut self) -> PortResult<()>;

    fn enable_payout(&mut self, unit_type: u8) -> PortResult<()>;

    fn disable_payout(&mut self) -> PortResult<()>;

    /// Denomination inhibit mask; a set bit enables the channel.
    fn set_inhibits(&mut self, mask_lo: u8, mask_hi: u8) -> PortResult<()>;

    fn set_coinmech_inhibit(&mut self, value: u32, currency: &str, enabled: bool)
        -> PortResult<()>;

    fn poll(&mut self) -> PortResult<Vec<PollEvent>>;

    /// Reject the note held in escrow, if any.
    fn reject(&mut self) -> PortResult<()>;

    fn set_route(&mut self, value: u32, currency: &str, route: u8) -> PortResult<()>;

    /// Raw route code for a denomination.
    fn get_routing(&mut self, value: u32, currency: &str) -> PortResult<u8>;

    /// Number of notes of a denomination held in the payout store.
    fn get_note_amount(&mut self, value: u32, currency: &str) -> PortResult<u16>;

    fn payout(&mut self, value: u32, currency: &str, option: PayoutOption) -> PortResult<()>;

    /// Move the whole payout store to the cashbox.
    fn empty(&mut self) -> PortResult<()>;

    fn configure_bezel(&mut self, red: u8, green: u8, blue: u8, persist: bool)
        -> PortResult<()>;

    fn reset(&mut self) -> PortResult<()>;

    fn run_calibration(&mut self) -> PortResult<()>;

    /// Release the physical port.
    fn close(&mut self);

    /// Human-readable description of the connection target.
    fn description(&self) -> String;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
