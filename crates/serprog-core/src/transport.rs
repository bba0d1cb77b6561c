//! Byte-oriented transport and clock abstractions the command client is
//! built on, so its receive-timeout logic can be tested without real time
//! passing or a real serial port being open.

use std::time::Instant;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A byte-level serial link. Implementations block on write and poll for a
/// single byte with a deadline on read, matching the model the command
/// client is driven by.
pub trait Transport {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Reads one byte, returning `None` if `deadline` elapses first.
    fn read_byte(&mut self, deadline: Instant) -> Result<Option<u8>, TransportError>;
}

/// A monotonic clock, injected so timeout behavior is deterministic in
/// tests rather than depending on `Instant::now()` and real sleeps.
pub trait Clock {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[cfg(feature = "serial")]
mod serial {
    use super::{Transport, TransportError};
    use std::io::{Read, Write};
    use std::time::{Duration, Instant};

    /// A real serial link, 115200 8-N-1, opened by the caller and handed to
    /// [`crate::client::CommandClient`].
    pub struct SerialTransport {
        port: Box<dyn serialport::SerialPort>,
    }

    impl SerialTransport {
        pub fn open(path: &str) -> Result<Self, serialport::Error> {
            let port = serialport::new(path, 115_200)
                .timeout(Duration::from_secs(1))
                .open()?;
            Ok(Self { port })
        }
    }

    impl Transport for SerialTransport {
        fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
            self.port.write_all(bytes).map_err(std::io::Error::from)?;
            Ok(())
        }

        fn read_byte(&mut self, deadline: Instant) -> Result<Option<u8>, TransportError> {
            let mut buf = [0u8; 1];
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Ok(None);
                }
                let _ = self.port.set_timeout(remaining.min(Duration::from_millis(250)));
                match self.port.read(&mut buf) {
                    Ok(0) => continue,
                    Ok(_) => return Ok(Some(buf[0])),
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                    Err(e) => return Err(TransportError::Io(e)),
                }
            }
        }
    }
}

#[cfg(feature = "serial")]
pub use serial::SerialTransport;

/// An in-memory transport and clock pair for tests: bytes are queued in
/// advance, writes are recorded, and the clock advances only when told to.
#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;
    use std::time::Duration;

    #[derive(Clone, Default)]
    pub struct FakeClock(Rc<RefCell<Instant>>);

    impl FakeClock {
        pub fn new() -> Self {
            Self(Rc::new(RefCell::new(Instant::now())))
        }

        pub fn advance(&self, dur: Duration) {
            let mut inner = self.0.borrow_mut();
            *inner += dur;
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> Instant {
            *self.0.borrow()
        }
    }

    pub struct FakeTransport {
        pub inbound: VecDeque<u8>,
        pub outbound: Vec<u8>,
        pub clock: FakeClock,
    }

    impl FakeTransport {
        pub fn new(clock: FakeClock) -> Self {
            Self {
                inbound: VecDeque::new(),
                outbound: Vec::new(),
                clock,
            }
        }

        pub fn push_inbound(&mut self, bytes: &[u8]) {
            self.inbound.extend(bytes.iter().copied());
        }
    }

    impl Transport for FakeTransport {
        fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
            self.outbound.extend_from_slice(bytes);
            Ok(())
        }

        fn read_byte(&mut self, deadline: Instant) -> Result<Option<u8>, TransportError> {
            if self.clock.now() >= deadline {
                return Ok(None);
            }
            match self.inbound.pop_front() {
                Some(b) => Ok(Some(b)),
                None => {
                    self.clock.advance(Duration::from_millis(1));
                    Ok(None)
                }
            }
        }
    }
}
