//! Core engine behind `serprog`: Intel HEX loading, the framed serial
//! wire protocol, and the session orchestrator that drives a full
//! programming transaction. No CLI, terminal, or progress-bar concerns
//! live here; see the `serprog` binary crate for those.

pub mod client;
pub mod codec;
pub mod command;
pub mod device;
pub mod hex;
pub mod session;
pub mod transport;

pub use client::{CommandClient, CommunicationError};
pub use codec::{encode, DecodeError, Decoder, Packet};
pub use device::{resolve as resolve_device, DeviceSpec, DEVICES};
pub use hex::{pad_to_page, parse as parse_hex, split_pages, HexError, Page, Section};
pub use session::{ProgramRequest, SessionError, SessionOrchestrator};
pub use transport::{Clock, SystemClock, Transport, TransportError};

#[cfg(feature = "serial")]
pub use transport::SerialTransport;

/// Reports progress through a long-running operation. Implemented by the
/// CLI with a real progress bar; [`NoProgress`] is a no-op for tests and
/// library consumers who don't want one.
pub trait ProgressReporter {
    fn start(&mut self, total_steps: usize);
    fn advance(&mut self, steps: usize);
    fn finish(&mut self);
}

pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn start(&mut self, _total_steps: usize) {}
    fn advance(&mut self, _steps: usize) {}
    fn finish(&mut self) {}
}
