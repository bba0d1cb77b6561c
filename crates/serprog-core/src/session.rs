//! The session orchestrator: prepares images, identifies the target, and
//! walks a stage machine to completion.
//!
//! Per design notes, stages are modeled as a tagged variant held in an
//! ordered `Vec` with a cursor index, not a runtime iterator object.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::client::{CommandClient, CommunicationError};
use crate::device::{self, DeviceSpec};
use crate::hex::{self, HexError, Page, FILL_BYTE, PAGE_SIZE};
use crate::transport::{Clock, Transport};
use crate::ProgressReporter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Flash,
    ExtFlash,
    Eeprom,
}

impl std::fmt::Display for ImageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ImageKind::Flash => "flash",
            ImageKind::ExtFlash => "external flash",
            ImageKind::Eeprom => "eeprom",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("unknown device type {0:?}")]
    DeviceType(String),
    #[error("{0}: file not found")]
    FileNotFound(PathBuf),
    #[error("{kind} image {path:?} is not a valid Intel HEX file: {source}")]
    Image {
        kind: ImageKind,
        path: PathBuf,
        #[source]
        source: HexError,
    },
    #[error("device reported protocol version {got}, expected {expected}")]
    ProtocolMismatch { expected: u8, got: u8 },
    #[error("requested device {requested} but target identified as {detected}")]
    CheckDevice { requested: u8, detected: u8 },
    #[error("no image selected: enable at least one of flash, extflash, or eeprom")]
    NothingToProgram,
    #[error(transparent)]
    Communication(#[from] CommunicationError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    FlashProg,
    ExtFlashProg,
    EepromProg,
    ExtFlashBoot,
    End,
}

/// What the caller asked to be programmed.
#[derive(Debug, Clone, Default)]
pub struct ProgramRequest {
    pub device: String,
    pub flash: Option<PathBuf>,
    pub ext_flash: Option<PathBuf>,
    pub eeprom: Option<PathBuf>,
    pub ext_flash_boot: bool,
}

struct TimeConstants {
    flash: f64,
    eeprom: f64,
    ext_flash: f64,
    fixed: f64,
}

const DEVICE_1_CONSTANTS: TimeConstants = TimeConstants {
    flash: 0.23,
    eeprom: 0.05,
    ext_flash: 0.30,
    fixed: 4.5,
};

const DEVICE_2_CONSTANTS: TimeConstants = TimeConstants {
    flash: 0.14,
    eeprom: 0.05,
    ext_flash: 0.20,
    fixed: 3.3,
};

pub struct SessionOrchestrator<T: Transport, C: Clock> {
    client: CommandClient<T, C>,
    device: &'static DeviceSpec,
    flash_pages: Vec<Page>,
    ext_flash_pages: Vec<Page>,
    eeprom_pages: Vec<Page>,
    stages: Vec<Stage>,
    stage_index: usize,
    flash_cursor: usize,
    ext_flash_cursor: usize,
    eeprom_cursor: usize,
    cur_step: usize,
    total_steps: usize,
    estimated_seconds: f64,
}

impl<T: Transport, C: Clock> SessionOrchestrator<T, C> {
    /// Prepares a session: parses images, performs the device handshake,
    /// and builds the stage list. No bytes are written to the target
    /// until this returns `Ok`.
    pub fn prepare(
        transport: T,
        clock: C,
        request: &ProgramRequest,
    ) -> Result<Self, SessionError> {
        let requested = device::resolve(&request.device)
            .ok_or_else(|| SessionError::DeviceType(request.device.clone()))?;

        if request.flash.is_none()
            && request.ext_flash.is_none()
            && request.eeprom.is_none()
            && !request.ext_flash_boot
        {
            return Err(SessionError::NothingToProgram);
        }

        let flash_pages = load_pages(ImageKind::Flash, request.flash.as_deref())?;
        let ext_flash_pages = load_pages(ImageKind::ExtFlash, request.ext_flash.as_deref())?;
        let eeprom_pages = load_pages(ImageKind::Eeprom, request.eeprom.as_deref())?;

        let mut client = CommandClient::new(transport, clock);

        let protocol_reply = client.chk_protocol(&[0, 0, 0, 0])?;
        if !protocol_reply.ok || protocol_reply.protocol_version != 1 {
            return Err(SessionError::ProtocolMismatch {
                expected: 1,
                got: protocol_reply.protocol_version,
            });
        }

        let detected_id = client.chk_device()?.device_id;
        let device = if requested.protocol_version == 0 {
            device::by_id(detected_id).unwrap_or(requested)
        } else {
            if detected_id != requested.id {
                return Err(SessionError::CheckDevice {
                    requested: requested.id,
                    detected: detected_id,
                });
            }
            requested
        };

        let mut stages = Vec::new();
        if request.flash.is_some() {
            stages.push(Stage::FlashProg);
        }
        if request.ext_flash.is_some() {
            stages.push(Stage::ExtFlashProg);
        }
        if request.eeprom.is_some() {
            stages.push(Stage::EepromProg);
        }
        if request.ext_flash_boot {
            stages.push(Stage::ExtFlashBoot);
        }
        stages.push(Stage::End);

        let total_steps = flash_pages.len() + ext_flash_pages.len() + eeprom_pages.len() + 1;

        let constants = match device.id {
            1 => &DEVICE_1_CONSTANTS,
            2 => &DEVICE_2_CONSTANTS,
            _ => &DEVICE_1_CONSTANTS,
        };
        let estimated_seconds = constants.flash * flash_pages.len() as f64
            + constants.eeprom * eeprom_pages.len() as f64
            + constants.ext_flash * ext_flash_pages.len() as f64
            + constants.fixed;

        Ok(Self {
            client,
            device,
            flash_pages,
            ext_flash_pages,
            eeprom_pages,
            stages,
            stage_index: 0,
            flash_cursor: 0,
            ext_flash_cursor: 0,
            eeprom_cursor: 0,
            cur_step: 0,
            total_steps,
            estimated_seconds,
        })
    }

    pub fn device(&self) -> &'static DeviceSpec {
        self.device
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    pub fn cur_step(&self) -> usize {
        self.cur_step
    }

    pub fn estimated_seconds(&self) -> f64 {
        self.estimated_seconds
    }

    pub fn flash_bytes(&self) -> usize {
        self.flash_pages.len() * PAGE_SIZE
    }

    pub fn ext_flash_bytes(&self) -> usize {
        self.ext_flash_pages.len() * PAGE_SIZE
    }

    pub fn eeprom_bytes(&self) -> usize {
        self.eeprom_pages.len() * PAGE_SIZE
    }

    pub fn is_complete(&self) -> bool {
        self.cur_step >= self.total_steps
    }

    /// Runs the session to completion, driving `do_step` and reporting
    /// progress through `reporter`.
    pub fn run(&mut self, reporter: &mut impl ProgressReporter) -> Result<(), SessionError> {
        reporter.start(self.total_steps);
        while !self.is_complete() {
            self.do_step()?;
            reporter.advance(1);
        }
        reporter.finish();
        Ok(())
    }

    /// Advances the session by exactly one unit of work.
    pub fn do_step(&mut self) -> Result<(), SessionError> {
        let stage = *self
            .stages
            .get(self.stage_index)
            .expect("do_step called after session completion");

        match stage {
            Stage::FlashProg => {
                if self.flash_cursor == 0 && !self.client.flash_erase_all()? {
                    log::warn!("target reported failure erasing flash");
                }
                // `flash` being enabled doesn't guarantee the image produced
                // any pages (an EOF-only hex file is valid and empty); in
                // that case the stage still runs its one-time erase above,
                // then falls straight through to the next stage.
                if let Some(page) = self.flash_pages.get(self.flash_cursor) {
                    if !self.client.flash_write(page.address, &page.data)? {
                        log::warn!("target reported failure writing flash page {:#010x}", page.address);
                    }
                    self.flash_cursor += 1;
                    self.cur_step += 1;
                }
                if self.flash_cursor >= self.flash_pages.len() {
                    self.stage_index += 1;
                }
            }
            Stage::ExtFlashProg => {
                if self.ext_flash_cursor == 0 && !self.client.ext_flash_fopen()? {
                    log::warn!("target reported failure opening external flash file");
                }
                if let Some(page) = self.ext_flash_pages.get(self.ext_flash_cursor) {
                    if !self.client.ext_flash_write(page.address, &page.data)? {
                        log::warn!(
                            "target reported failure writing external flash page {:#010x}",
                            page.address
                        );
                    }
                    self.ext_flash_cursor += 1;
                    self.cur_step += 1;
                }
                if self.ext_flash_cursor >= self.ext_flash_pages.len() {
                    if !self.client.ext_flash_fclose(timestamp_now())? {
                        log::warn!("target reported failure closing external flash file");
                    }
                    self.stage_index += 1;
                }
            }
            Stage::EepromProg => {
                if let Some(page) = self.eeprom_pages.get(self.eeprom_cursor) {
                    if !self.client.eeprom_write(&page.data)?.ok {
                        log::warn!("target reported failure writing eeprom page");
                    }
                    self.eeprom_cursor += 1;
                    self.cur_step += 1;
                }
                if self.eeprom_cursor >= self.eeprom_pages.len() {
                    self.stage_index += 1;
                }
            }
            Stage::ExtFlashBoot => {
                if !self.client.prog_ext_flash_boot()? {
                    log::warn!("target reported failure booting from external flash");
                }
                self.stage_index += 1;
            }
            Stage::End => {
                if !self.client.prog_end()? {
                    log::warn!("target reported failure on programming end");
                }
                self.cur_step += 1;
                self.stage_index += 1;
            }
        }
        Ok(())
    }
}

fn load_pages(kind: ImageKind, path: Option<&Path>) -> Result<Vec<Page>, SessionError> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let sections = hex::parse(path).map_err(|source| match source {
        HexError::NotFound(path) => SessionError::FileNotFound(path),
        source => SessionError::Image {
            kind,
            path: path.to_path_buf(),
            source,
        },
    })?;
    let padded = hex::pad_to_page(&sections, PAGE_SIZE, FILL_BYTE);
    Ok(hex::split_pages(&padded, PAGE_SIZE))
}

fn timestamp_now() -> [u8; 5] {
    use std::time::{SystemTime, UNIX_EPOCH};

    // Civil calendar conversion from a Unix timestamp, since the standard
    // library has no local-time API; this treats the clock as UTC, which
    // matches the protocol's informational (non-authoritative) use of the
    // field.
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let (year, month, day, hour, minute) = civil_from_unix(secs);
    [
        minute,
        hour,
        day,
        month,
        (year - 2000).clamp(0, 255) as u8,
    ]
}

/// Howard Hinnant's `civil_from_days` algorithm, adapted to also split out
/// the time-of-day component.
fn civil_from_unix(secs: u64) -> (i64, u8, u8, u8, u8) {
    let days = (secs / 86_400) as i64;
    let time_of_day = (secs % 86_400) as u32;
    let hour = (time_of_day / 3600) as u8;
    let minute = ((time_of_day % 3600) / 60) as u8;

    let z = days + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u8;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u8;
    let year = if m <= 2 { y + 1 } else { y };

    (year, m, d, hour, minute)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode;
    use crate::transport::fake::{FakeClock, FakeTransport};
    use std::io::Write;

    fn write_fixture(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(bytes).unwrap();
        f
    }

    #[test]
    fn s5_handshake_mismatch_aborts_before_writes() {
        let clock = FakeClock::new();
        let mut transport = FakeTransport::new(clock.clone());
        let mut inbound = Vec::new();
        inbound.extend(encode(crate::command::CHK_PROTOCOL, &[0x00, 0x01]));
        inbound.extend(encode(crate::command::CHK_DEVICE, &[0x00, 0x02]));
        transport.push_inbound(&inbound);

        let request = ProgramRequest {
            device: "1".to_string(),
            flash: None,
            ext_flash: None,
            eeprom: None,
            ext_flash_boot: false,
        };
        // "flash: None" with no image selected would hit NothingToProgram
        // before the handshake; supply a dummy file-backed flash image so
        // the handshake mismatch is what actually fires.
        let file = write_fixture(&one_page_hex_512());
        let request = ProgramRequest {
            flash: Some(file.path().to_path_buf()),
            ..request
        };

        let err = SessionOrchestrator::prepare(transport, clock, &request).unwrap_err();
        match err {
            SessionError::CheckDevice {
                requested,
                detected,
            } => {
                assert_eq!(requested, 1);
                assert_eq!(detected, 2);
            }
            other => panic!("expected CheckDevice error, got {other:?}"),
        }
    }

    #[test]
    fn s6_end_to_end_one_page_flash() {
        let clock = FakeClock::new();
        let mut transport = FakeTransport::new(clock.clone());
        let mut inbound = Vec::new();
        inbound.extend(encode(crate::command::CHK_PROTOCOL, &[0x00, 0x01]));
        inbound.extend(encode(crate::command::CHK_DEVICE, &[0x00, 0x01]));
        inbound.extend(encode(crate::command::FLASH_ERASE_ALL, &[0x00]));
        inbound.extend(encode(crate::command::FLASH_WRITE, &[0x00]));
        inbound.extend(encode(crate::command::PROG_END, &[0x00]));
        transport.push_inbound(&inbound);

        let file = write_fixture(&one_page_hex_512());

        let request = ProgramRequest {
            device: "1".to_string(),
            flash: Some(file.path().to_path_buf()),
            ext_flash: None,
            eeprom: None,
            ext_flash_boot: false,
        };

        let mut session = SessionOrchestrator::prepare(transport, clock, &request).unwrap();
        assert_eq!(session.total_steps(), 2);

        let mut reporter = crate::NoProgress;
        session.run(&mut reporter).unwrap();
        assert!(session.is_complete());
    }

    fn one_page_hex_512() -> Vec<u8> {
        // One data record covering bytes [0, 16) at address 0, then EOF.
        // pad_to_page grows this to a full 512-byte page at address 0.
        let mut out = Vec::new();
        out.extend_from_slice(b":10000000");
        for b in 0u8..16 {
            out.extend_from_slice(format!("{b:02X}").as_bytes());
        }
        out.extend_from_slice(b"00\n");
        out.extend_from_slice(b":00000001FF\n");
        out
    }

    #[test]
    fn unknown_device_is_rejected() {
        let clock = FakeClock::new();
        let transport = FakeTransport::new(clock.clone());
        let request = ProgramRequest {
            device: "no-such-device".to_string(),
            flash: None,
            ext_flash: None,
            eeprom: None,
            ext_flash_boot: true,
        };
        let err = SessionOrchestrator::prepare(transport, clock, &request).unwrap_err();
        assert!(matches!(err, SessionError::DeviceType(_)));
    }

    #[test]
    fn nothing_selected_is_rejected() {
        let clock = FakeClock::new();
        let transport = FakeTransport::new(clock.clone());
        let request = ProgramRequest {
            device: "1".to_string(),
            flash: None,
            ext_flash: None,
            eeprom: None,
            ext_flash_boot: false,
        };
        let err = SessionOrchestrator::prepare(transport, clock, &request).unwrap_err();
        assert!(matches!(err, SessionError::NothingToProgram));
    }

    #[test]
    fn missing_flash_image_is_file_not_found() {
        let clock = FakeClock::new();
        let transport = FakeTransport::new(clock.clone());
        let request = ProgramRequest {
            device: "1".to_string(),
            flash: Some(PathBuf::from("/nonexistent/firmware.hex")),
            ext_flash: None,
            eeprom: None,
            ext_flash_boot: false,
        };
        let err = SessionOrchestrator::prepare(transport, clock, &request).unwrap_err();
        assert!(matches!(err, SessionError::FileNotFound(_)));
    }

    #[test]
    fn nonzero_status_during_write_does_not_abort_session() {
        let clock = FakeClock::new();
        let mut transport = FakeTransport::new(clock.clone());
        let mut inbound = Vec::new();
        inbound.extend(encode(crate::command::CHK_PROTOCOL, &[0x00, 0x01]));
        inbound.extend(encode(crate::command::CHK_DEVICE, &[0x00, 0x01]));
        inbound.extend(encode(crate::command::FLASH_ERASE_ALL, &[0x00]));
        // Target reports a nonzero status for the write; the session must
        // still reach completion rather than treat this as communication
        // failure.
        inbound.extend(encode(crate::command::FLASH_WRITE, &[0x01]));
        inbound.extend(encode(crate::command::PROG_END, &[0x00]));
        transport.push_inbound(&inbound);

        let file = write_fixture(&one_page_hex_512());
        let request = ProgramRequest {
            device: "1".to_string(),
            flash: Some(file.path().to_path_buf()),
            ext_flash: None,
            eeprom: None,
            ext_flash_boot: false,
        };

        let mut session = SessionOrchestrator::prepare(transport, clock, &request).unwrap();
        let mut reporter = crate::NoProgress;
        session.run(&mut reporter).unwrap();
        assert!(session.is_complete());
    }

    #[test]
    fn enabled_image_with_zero_pages_still_runs_its_stage() {
        // An EOF-only hex file is a valid, empty image: the flash stage is
        // enabled by the presence of a path, not by whether parsing it
        // produced any pages, so FLASH_ERASE_ALL must still be issued.
        let clock = FakeClock::new();
        let mut transport = FakeTransport::new(clock.clone());
        let mut inbound = Vec::new();
        inbound.extend(encode(crate::command::CHK_PROTOCOL, &[0x00, 0x01]));
        inbound.extend(encode(crate::command::CHK_DEVICE, &[0x00, 0x01]));
        inbound.extend(encode(crate::command::FLASH_ERASE_ALL, &[0x00]));
        inbound.extend(encode(crate::command::PROG_END, &[0x00]));
        transport.push_inbound(&inbound);

        let file = write_fixture(b":00000001FF\n");
        let request = ProgramRequest {
            device: "1".to_string(),
            flash: Some(file.path().to_path_buf()),
            ext_flash: None,
            eeprom: None,
            ext_flash_boot: false,
        };

        let mut session = SessionOrchestrator::prepare(transport, clock, &request).unwrap();
        assert_eq!(session.total_steps(), 1);

        let mut reporter = crate::NoProgress;
        session.run(&mut reporter).unwrap();
        assert!(session.is_complete());
    }
}
