//! eSSP cash device session controller.
//!
//! Drives a banknote validator or payout unit over an [`SspTransport`]:
//! handshake, background polling, note lifecycle tracking, an inventory
//! ledger, a deferred action queue and an outbox of domain events.
//!
//! ```no_run
//! use essp_controller::{Session, SessionConfig};
//! use essp_controller::device::simulator::SimulatedDevice;
//!
//! let device = SimulatedDevice::new(6, &[(500, "RUB"), (1000, "RUB")]);
//! let session = Session::open(SessionConfig::new("/dev/ttyACM0"), device)?;
//! session.enqueue_payout(500, "RUB")?;
//! while let Some(event) = session.pull_event() {
//!     println!("{:?}", event.kind);
//! }
//! session.close()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod actions;
pub mod config;
pub mod device;
pub mod error;
pub mod ledger;
pub mod lifecycle;
pub mod logging;
pub mod outbox;
pub mod ports;
pub mod session;

pub use actions::{BezelColor, QueuedAction};
pub use config::{EncryptionKey, SessionConfig};
pub use device::codes::{EventKind, Route, UnitType};
pub use device::transport::{Rejection, SspTransport};
pub use error::{ActionError, BootstrapStage, ConnectError, InvalidAction, ProtocolError};
pub use ledger::{Denomination, LedgerSnapshot, Note};
pub use outbox::DomainEvent;
pub use session::{DeviceInfo, NoteAmount, Session, SessionState};

/// Short git SHA this crate was built from, or "unknown".
pub const BUILD_GIT_SHA: &str = env!("BUILD_GIT_SHA");
