//! Intel HEX parsing and the page-shaping pipeline: parse -> pad -> split.

use std::path::{Path, PathBuf};

use thiserror::Error;

pub const PAGE_SIZE: usize = 512;
pub const FILL_BYTE: u8 = 0xFF;

#[derive(Error, Debug)]
pub enum HexError {
    #[error("{path}: not a valid Intel HEX file: {reason}")]
    Format { path: PathBuf, reason: String },
    #[error("{0}: file not found")]
    NotFound(PathBuf),
}

/// A contiguous run of image bytes at a known start address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub start_address: u32,
    pub data: Vec<u8>,
}

/// A fixed-size, page-aligned block, the unit of target write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub address: u32,
    pub data: Vec<u8>,
}

/// Parses an Intel HEX file into address-ordered, disjoint sections.
pub fn parse(path: impl AsRef<Path>) -> Result<Vec<Section>, HexError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|_| HexError::NotFound(path.to_path_buf()))?;
    parse_str(&text).map_err(|reason| HexError::Format {
        path: path.to_path_buf(),
        reason,
    })
}

fn fmt_err(msg: impl Into<String>) -> String {
    msg.into()
}

fn parse_str(text: &str) -> Result<Vec<Section>, String> {
    let mut sections: Vec<Section> = Vec::new();
    let mut extended_address: u32 = 0;
    let mut eof_seen = false;

    for line in text.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        if !line.starts_with(':') {
            return Err(fmt_err(format!("line does not start with ':': {line:?}")));
        }
        let body = &line[1..];
        if body.len() < 10 {
            return Err(fmt_err(format!("line too short: {line:?}")));
        }

        let record_length = parse_hex_u8(&body[0..2])?;
        let address = parse_hex_u16(&body[2..6])?;
        let record_type = parse_hex_u8(&body[6..8])?;

        let expected_len = 10 + 2 * record_length as usize;
        if body.len() != expected_len {
            return Err(fmt_err(format!(
                "line length {} does not match declared record length {}",
                body.len(),
                record_length
            )));
        }

        let payload_hex = &body[8..8 + 2 * record_length as usize];
        let payload = parse_hex_bytes(payload_hex)?;
        // Checksum byte is present but intentionally not verified; see
        // design notes on Intel HEX checksum leniency.
        let _checksum = parse_hex_u8(&body[8 + 2 * record_length as usize..])?;

        match record_type {
            0x00 => {
                let absolute = (extended_address << 16) + address as u32;
                match sections.last_mut() {
                    Some(prev) if absolute == prev.start_address + prev.data.len() as u32 => {
                        prev.data.extend_from_slice(&payload);
                    }
                    _ => sections.push(Section {
                        start_address: absolute,
                        data: payload,
                    }),
                }
            }
            0x01 => {
                if address != 0 {
                    return Err(fmt_err("EOF record with nonzero address"));
                }
                eof_seen = true;
            }
            0x02 | 0x03 | 0x05 => {
                // Extended segment address / start segment address / start
                // linear address: accepted and ignored.
            }
            0x04 => {
                if payload.len() < 2 {
                    return Err(fmt_err("extended linear address record too short"));
                }
                extended_address = ((payload[0] as u32) << 8) | payload[1] as u32;
            }
            other => return Err(fmt_err(format!("unknown record type {other:#04x}"))),
        }
    }

    if !eof_seen {
        return Err(fmt_err("missing EOF record"));
    }

    Ok(sections)
}

fn parse_hex_u8(s: &str) -> Result<u8, String> {
    u8::from_str_radix(s, 16).map_err(|_| fmt_err(format!("invalid hex byte: {s:?}")))
}

fn parse_hex_u16(s: &str) -> Result<u16, String> {
    u16::from_str_radix(s, 16).map_err(|_| fmt_err(format!("invalid hex word: {s:?}")))
}

fn parse_hex_bytes(s: &str) -> Result<Vec<u8>, String> {
    if s.len() % 2 != 0 {
        return Err(fmt_err("odd number of hex digits"));
    }
    (0..s.len())
        .step_by(2)
        .map(|i| parse_hex_u8(&s[i..i + 2]))
        .collect()
}

/// Pads each section so it starts and ends on a `page_size` boundary,
/// filling with `fill_byte`. Idempotent.
pub fn pad_to_page(sections: &[Section], page_size: usize, fill_byte: u8) -> Vec<Section> {
    sections
        .iter()
        .map(|section| {
            let pad_front = (section.start_address as usize) % page_size;
            let mut data = Vec::with_capacity(pad_front + section.data.len());
            data.extend(std::iter::repeat(fill_byte).take(pad_front));
            data.extend_from_slice(&section.data);

            let pad_back = (page_size - (data.len() % page_size)) % page_size;
            data.extend(std::iter::repeat(fill_byte).take(pad_back));

            Section {
                start_address: section.start_address - pad_front as u32,
                data,
            }
        })
        .collect()
}

/// Slices page-aligned sections into fixed-size pages.
pub fn split_pages(sections: &[Section], page_size: usize) -> Vec<Page> {
    let mut pages = Vec::new();
    for section in sections {
        for (i, chunk) in section.data.chunks(page_size).enumerate() {
            pages.push(Page {
                address: section.start_address + (i * page_size) as u32,
                data: chunk.to_vec(),
            });
        }
    }
    pages
}
