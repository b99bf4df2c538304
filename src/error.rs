//! Error types for the session controller.
//!
//! `ConnectError` and `ProtocolError` are fatal and reach the session owner.
//! `ActionError` is only ever logged by the poll thread.

use std::fmt;
use thiserror::Error;

use crate::device::codes::PayoutRefusal;
use crate::device::transport::Rejection;

/// Handshake step that failed during [`crate::Session::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapStage {
    Init,
    Sync,
    Encryption,
    HostProtocol,
    SetupRequest,
    Enable,
    Inhibits,
}

impl fmt::Display for BootstrapStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Init => "transport init",
            Self::Sync => "link sync",
            Self::Encryption => "encryption setup",
            Self::HostProtocol => "host protocol version",
            Self::SetupRequest => "setup request",
            Self::Enable => "validator enable",
            Self::Inhibits => "inhibit setup",
        })
    }
}

/// The session could not be started.
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("Invalid session config: {0}")]
    InvalidConfig(String),

    #[error("Bootstrap failed at {stage}: {rejection}")]
    Stage {
        stage: BootstrapStage,
        rejection: Rejection,
    },

    #[error("Failed to start poll thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl ConnectError {
    pub(crate) fn stage(stage: BootstrapStage) -> impl FnOnce(Rejection) -> Self {
        move |rejection| Self::Stage { stage, rejection }
    }
}

/// The poll loop stopped because the device link is no longer usable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Poll timed out, device link lost")]
    PollTimeout,

    #[error("Poll failed: {0}")]
    PollFailed(Rejection),

    #[error("Host protocol version rejected after reset: {0}")]
    HostProtocol(Rejection),

    #[error("Poll thread panicked")]
    LoopPanicked,
}

/// A queued action the device refused. Logged, never returned to callers.
#[derive(Error, Debug)]
pub enum ActionError {
    #[error("{action} failed: {rejection}")]
    Rejected {
        action: String,
        rejection: Rejection,
    },

    #[error("Payout refused: {reason}")]
    PayoutRefused { reason: PayoutRefusal },

    #[error("{action} requires a payout unit")]
    NoPayoutUnit { action: String },

    #[error("{note} cannot be sent to the device: {source}")]
    Unaddressable { note: String, source: InvalidAction },
}

/// Parameters rejected when building a [`crate::actions::QueuedAction`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidAction {
    #[error("Amount must be greater than zero")]
    ZeroAmount,

    #[error("Amount {0} does not fit the device's 32-bit minor-unit field")]
    AmountTooLarge(u64),

    #[error("Invalid currency code: {0:?}")]
    Currency(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
