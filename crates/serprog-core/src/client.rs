//! Pairs outbound commands with their inbound acknowledgements over a
//! [`Transport`], using the [`Decoder`] to assemble frames.

use std::time::Duration;

use thiserror::Error;

use crate::codec::{encode, DecodeError, Decoder, Packet};
use crate::transport::{Clock, Transport, TransportError};

/// The default per-packet timeout for polled receives.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
/// The hard cap on real time a single polled receive loop will spend
/// waiting for bytes, independent of the configured timeout.
pub const POLL_BUDGET: Duration = Duration::from_secs(3);

#[derive(Error, Debug)]
pub enum CommunicationError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("timed out waiting for a response")]
    Timeout,
    #[error("expected response to command {expected:#04x}, got {got:#04x}")]
    UnexpectedCommand { expected: u8, got: u8 },
}

/// The result of a command exchange that reached the target: `ok` mirrors
/// the target's status byte (zero means success) and `extra` holds whatever
/// payload bytes followed it, empty when `ok` is false. A nonzero status is
/// not a communication failure, so it never becomes an `Err` here; see
/// [`CommunicationError`] for what does.
pub struct Reply {
    pub ok: bool,
    pub extra: Vec<u8>,
}

/// `CHK_PROTOCOL` response: the protocol version the target reports, valid
/// only when `ok`.
pub struct ChkProtocolReply {
    pub ok: bool,
    pub protocol_version: u8,
}

/// `CHK_DEVICE` response: the detected device id, valid only when `ok`.
pub struct ChkDeviceReply {
    pub ok: bool,
    pub device_id: u8,
}

/// Response shape shared by `FLASH_GET_PGSZ` and `EEPROM_GET_PGSZ`.
pub struct PageSizeReply {
    pub ok: bool,
    pub size: u16,
}

/// Response shape shared by `FLASH_ERASE_SECTOR`, `EEPROM_WRITE`,
/// `EEPROM_READ`, and `EEPROM_ERASE`, all of which report a `u32` count.
pub struct CountReply {
    pub ok: bool,
    pub count: u32,
}

/// `FLASH_READ` response: the raw payload bytes, empty when `!ok`.
pub struct FlashReadReply {
    pub ok: bool,
    pub data: Vec<u8>,
}

pub struct CommandClient<T: Transport, C: Clock> {
    transport: T,
    clock: C,
    decoder: Decoder,
    timeout: Duration,
}

impl<T: Transport, C: Clock> CommandClient<T, C> {
    pub fn new(transport: T, clock: C) -> Self {
        Self {
            transport,
            clock,
            decoder: Decoder::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn send(&mut self, command: u8, payload: &[u8]) -> Result<(), CommunicationError> {
        self.transport
            .write_all(&encode(command, payload))
            .map_err(CommunicationError::from)
    }

    /// Reads frames until one is assembled, bounded by `min(timeout,
    /// POLL_BUDGET)` of real time.
    fn receive_polled(&mut self) -> Result<Packet, CommunicationError> {
        let budget = self.timeout.min(POLL_BUDGET);
        let deadline = self.clock.now() + budget;
        loop {
            match self.transport.read_byte(deadline)? {
                Some(byte) => {
                    if let Some(packet) = self.decoder.step(byte)? {
                        return Ok(packet);
                    }
                }
                None => return Err(CommunicationError::Timeout),
            }
            if self.clock.now() >= deadline {
                return Err(CommunicationError::Timeout);
            }
        }
    }

    /// Reads frames with no timeout; used for target operations known to
    /// take longer than the polled budget (mass erase, ext-flash boot).
    fn receive_blocking(&mut self) -> Result<Packet, CommunicationError> {
        let far_future = self.clock.now() + Duration::from_secs(24 * 60 * 60);
        loop {
            if let Some(byte) = self.transport.read_byte(far_future)? {
                if let Some(packet) = self.decoder.step(byte)? {
                    return Ok(packet);
                }
            }
        }
    }

    /// Sends `command` and pairs it with its response. The target's status
    /// byte is reported through `Reply::ok`, never through `Err`: only a
    /// transport failure, checksum failure, timeout, or a response carrying
    /// the wrong command byte is a [`CommunicationError`].
    fn exchange(
        &mut self,
        command: u8,
        payload: &[u8],
        blocking: bool,
    ) -> Result<Reply, CommunicationError> {
        self.send(command, payload)?;
        let packet = if blocking {
            self.receive_blocking()?
        } else {
            self.receive_polled()?
        };
        if packet.command != command {
            return Err(CommunicationError::UnexpectedCommand {
                expected: command,
                got: packet.command,
            });
        }
        let status = *packet.payload.first().unwrap_or(&0);
        let ok = status == 0;
        let extra = if ok {
            packet.payload.get(1..).unwrap_or(&[]).to_vec()
        } else {
            Vec::new()
        };
        Ok(Reply { ok, extra })
    }

    pub fn chk_protocol(&mut self, probe: &[u8; 4]) -> Result<ChkProtocolReply, CommunicationError> {
        let reply = self.exchange(crate::command::CHK_PROTOCOL, probe, false)?;
        Ok(ChkProtocolReply {
            ok: reply.ok,
            protocol_version: *reply.extra.first().unwrap_or(&0),
        })
    }

    pub fn chk_device(&mut self) -> Result<ChkDeviceReply, CommunicationError> {
        let reply = self.exchange(crate::command::CHK_DEVICE, &[], false)?;
        Ok(ChkDeviceReply {
            ok: reply.ok,
            device_id: *reply.extra.first().unwrap_or(&0),
        })
    }

    pub fn prog_end(&mut self) -> Result<bool, CommunicationError> {
        Ok(self.exchange(crate::command::PROG_END, &[], false)?.ok)
    }

    pub fn prog_ext_flash_boot(&mut self) -> Result<bool, CommunicationError> {
        Ok(self
            .exchange(crate::command::PROG_EXT_FLASH_BOOT, &[], true)?
            .ok)
    }

    pub fn flash_set_pgsz(&mut self, size: u32) -> Result<bool, CommunicationError> {
        Ok(self
            .exchange(crate::command::FLASH_SET_PGSZ, &size.to_le_bytes(), false)?
            .ok)
    }

    pub fn flash_get_pgsz(&mut self) -> Result<PageSizeReply, CommunicationError> {
        let reply = self.exchange(crate::command::FLASH_GET_PGSZ, &[], false)?;
        Ok(PageSizeReply {
            ok: reply.ok,
            size: le_u16(&reply.extra),
        })
    }

    pub fn flash_write(&mut self, address: u32, data: &[u8]) -> Result<bool, CommunicationError> {
        let mut payload = Vec::with_capacity(4 + data.len());
        payload.extend_from_slice(&address.to_le_bytes());
        payload.extend_from_slice(data);
        Ok(self.exchange(crate::command::FLASH_WRITE, &payload, false)?.ok)
    }

    pub fn flash_read(&mut self) -> Result<FlashReadReply, CommunicationError> {
        let reply = self.exchange(crate::command::FLASH_READ, &[], false)?;
        Ok(FlashReadReply {
            ok: reply.ok,
            data: reply.extra,
        })
    }

    pub fn flash_erase_sector(&mut self, sector: u16) -> Result<CountReply, CommunicationError> {
        let reply = self.exchange(
            crate::command::FLASH_ERASE_SECTOR,
            &sector.to_le_bytes(),
            false,
        )?;
        Ok(CountReply {
            ok: reply.ok,
            count: le_u32(&reply.extra),
        })
    }

    pub fn flash_erase_all(&mut self) -> Result<bool, CommunicationError> {
        Ok(self
            .exchange(crate::command::FLASH_ERASE_ALL, &[], true)?
            .ok)
    }

    pub fn eeprom_set_pgsz(&mut self, size: u32) -> Result<bool, CommunicationError> {
        Ok(self
            .exchange(crate::command::EEPROM_SET_PGSZ, &size.to_le_bytes(), false)?
            .ok)
    }

    pub fn eeprom_get_pgsz(&mut self) -> Result<PageSizeReply, CommunicationError> {
        let reply = self.exchange(crate::command::EEPROM_GET_PGSZ, &[], false)?;
        Ok(PageSizeReply {
            ok: reply.ok,
            size: le_u16(&reply.extra),
        })
    }

    pub fn eeprom_write(&mut self, page_data: &[u8]) -> Result<CountReply, CommunicationError> {
        let reply = self.exchange(crate::command::EEPROM_WRITE, page_data, false)?;
        Ok(CountReply {
            ok: reply.ok,
            count: le_u32(&reply.extra),
        })
    }

    pub fn eeprom_read(&mut self) -> Result<CountReply, CommunicationError> {
        let reply = self.exchange(crate::command::EEPROM_READ, &[], false)?;
        Ok(CountReply {
            ok: reply.ok,
            count: le_u32(&reply.extra),
        })
    }

    pub fn eeprom_erase(&mut self) -> Result<CountReply, CommunicationError> {
        let reply = self.exchange(crate::command::EEPROM_ERASE, &[], false)?;
        Ok(CountReply {
            ok: reply.ok,
            count: le_u32(&reply.extra),
        })
    }

    pub fn eeprom_erase_all(&mut self) -> Result<bool, CommunicationError> {
        Ok(self
            .exchange(crate::command::EEPROM_ERASE_ALL, &[], false)?
            .ok)
    }

    pub fn ext_flash_fopen(&mut self) -> Result<bool, CommunicationError> {
        Ok(self
            .exchange(crate::command::EXT_FLASH_FOPEN, b"fopen", false)?
            .ok)
    }

    pub fn ext_flash_write(&mut self, address: u32, data: &[u8]) -> Result<bool, CommunicationError> {
        let mut payload = Vec::with_capacity(4 + data.len());
        payload.extend_from_slice(&address.to_le_bytes());
        payload.extend_from_slice(data);
        Ok(self
            .exchange(crate::command::EXT_FLASH_WRITE, &payload, false)?
            .ok)
    }

    /// `timestamp` is `[minute, hour, day, month, year - 2000]` in local time.
    pub fn ext_flash_fclose(&mut self, timestamp: [u8; 5]) -> Result<bool, CommunicationError> {
        Ok(self
            .exchange(crate::command::EXT_FLASH_FCLOSE, &timestamp, false)?
            .ok)
    }
}

fn le_u16(bytes: &[u8]) -> u16 {
    let mut buf = [0u8; 2];
    let n = bytes.len().min(2);
    buf[..n].copy_from_slice(&bytes[..n]);
    u16::from_le_bytes(buf)
}

fn le_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    let n = bytes.len().min(4);
    buf[..n].copy_from_slice(&bytes[..n]);
    u32::from_le_bytes(buf)
}
