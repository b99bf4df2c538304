//! Device-facing layer: wire codes, the transport port, and an in-memory
//! device for tests and demos.

pub mod codes;
pub mod simulator;
pub mod transport;

pub use transport::{ChannelReport, PollEvent, PortResult, Rejection, SetupReport, SspTransport};
