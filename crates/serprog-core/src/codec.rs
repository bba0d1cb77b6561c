//! Frame encoding and the streaming frame decoder.
//!
//! Wire format: `A5 A5 A5 | CMD(1) | LEN(2 BE) | PAYLOAD | CHK(1)`, where
//! `CHK = sum(payload) mod 256`. The checksum covers the payload only.

use thiserror::Error;

pub const HEADER: [u8; 3] = [0xA5, 0xA5, 0xA5];

/// A decoded or to-be-encoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub command: u8,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(command: u8, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            command,
            payload: payload.into(),
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("checksum mismatch: expected {expected:#04x}, got {got:#04x}")]
    ChecksumMismatch { expected: u8, got: u8 },
}

/// Encodes a command and payload into a complete wire frame.
///
/// `payload.len()` must fit in a `u16`; this is a precondition of the wire
/// format, not something the host protocol ever violates in practice, so
/// it is asserted rather than threaded through as a `Result`.
pub fn encode(command: u8, payload: &[u8]) -> Vec<u8> {
    assert!(payload.len() <= u16::MAX as usize, "payload too large to frame");

    let mut out = Vec::with_capacity(HEADER.len() + 3 + payload.len() + 1);
    out.extend_from_slice(&HEADER);
    out.push(command);
    out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    out.extend_from_slice(payload);
    out.push(checksum(payload));
    out
}

fn checksum(payload: &[u8]) -> u8 {
    payload.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Header,
    Command,
    LengthHi,
    LengthLo,
    Data,
    Checksum,
}

/// Byte-at-a-time frame decoder.
///
/// `step` returns `Ok(None)` while more bytes are needed, `Ok(Some(packet))`
/// once a checksum-valid frame has been assembled, and `Err(_)` on a
/// checksum failure. Either outcome resets the decoder to scan for the next
/// header, so there is no sticky error flag a caller must remember to clear.
pub struct Decoder {
    phase: Phase,
    window: [u8; 3],
    command: u8,
    length: u16,
    data: Vec<u8>,
    running_checksum: u8,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            phase: Phase::Header,
            window: [0; 3],
            command: 0,
            length: 0,
            data: Vec::new(),
            running_checksum: 0,
        }
    }

    fn reset(&mut self) {
        self.phase = Phase::Header;
        self.window = [0; 3];
        self.data.clear();
        self.running_checksum = 0;
    }

    pub fn step(&mut self, byte: u8) -> Result<Option<Packet>, DecodeError> {
        // The rolling header window is updated on every byte, not only while
        // scanning for a header: a fresh `A5 A5 A5` match is an unconditional
        // interrupt that discards whatever command/length/data state was in
        // progress and restarts assembly from `Command`, so that stray 0xA5
        // bytes trailing a real header (or appearing anywhere else in the
        // stream) can't desync the decoder past the next genuine frame.
        self.window[0] = self.window[1];
        self.window[1] = self.window[2];
        self.window[2] = byte;
        if self.window == HEADER {
            self.phase = Phase::Command;
            self.data.clear();
            self.running_checksum = 0;
            return Ok(None);
        }

        match self.phase {
            Phase::Header => Ok(None),
            Phase::Command => {
                self.command = byte;
                self.phase = Phase::LengthHi;
                Ok(None)
            }
            Phase::LengthHi => {
                self.length = (byte as u16) << 8;
                self.phase = Phase::LengthLo;
                Ok(None)
            }
            Phase::LengthLo => {
                self.length |= byte as u16;
                self.data.reserve(self.length as usize);
                self.phase = if self.length == 0 {
                    Phase::Checksum
                } else {
                    Phase::Data
                };
                Ok(None)
            }
            Phase::Data => {
                self.data.push(byte);
                self.running_checksum = self.running_checksum.wrapping_add(byte);
                if self.data.len() == self.length as usize {
                    self.phase = Phase::Checksum;
                }
                Ok(None)
            }
            Phase::Checksum => {
                let expected = self.running_checksum;
                let command = self.command;
                let data = std::mem::take(&mut self.data);
                self.reset();
                if byte == expected {
                    Ok(Some(Packet::new(command, data)))
                } else {
                    Err(DecodeError::ChecksumMismatch {
                        expected,
                        got: byte,
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(bytes: &[u8]) -> Vec<Result<Packet, DecodeError>> {
        let mut decoder = Decoder::new();
        let mut out = Vec::new();
        for &b in bytes {
            match decoder.step(b) {
                Ok(Some(packet)) => out.push(Ok(packet)),
                Ok(None) => {}
                Err(e) => out.push(Err(e)),
            }
        }
        out
    }

    #[test]
    fn s1_encode_fixed() {
        let framed = encode(0x01, b"test");
        assert_eq!(
            framed,
            vec![0xA5, 0xA5, 0xA5, 0x01, 0x00, 0x04, b't', b'e', b's', b't', 0xD0]
        );
    }

    #[test]
    fn s2_decode_with_leading_noise() {
        let bytes = [0x00, 0xA5, 0xA5, 0xA5, 0xA5, 0xA5, 0xA5, 0x02, 0x00, 0x00, 0x00];
        let results = decode_all(&bytes);
        assert_eq!(results, vec![Ok(Packet::new(0x02, Vec::new()))]);
    }

    #[test]
    fn round_trip_arbitrary_payload() {
        for payload in [&b""[..], b"x", b"hello world", &[0u8; 300]] {
            let framed = encode(0x42, payload);
            let results = decode_all(&framed);
            assert_eq!(results, vec![Ok(Packet::new(0x42, payload.to_vec()))]);
        }
    }

    #[test]
    fn checksum_detection() {
        let mut framed = encode(0x10, b"abc");
        let payload_start = HEADER.len() + 3;
        framed[payload_start] ^= 0xFF;
        let results = decode_all(&framed);
        assert_eq!(results.len(), 1);
        assert!(results[0].is_err());
    }

    #[test]
    fn resync_after_garbage() {
        let mut bytes = vec![0x01, 0x02, 0xA5, 0x00];
        bytes.extend(encode(0x05, b"payload"));
        let results = decode_all(&bytes);
        assert_eq!(results, vec![Ok(Packet::new(0x05, b"payload".to_vec()))]);
    }
}
