//! Protocol command opcodes.
//!
//! The orchestrator only issues a subset of these; the rest are retained
//! for forward compatibility with targets that implement more of the
//! protocol than this host currently drives (see design notes on
//! `FLASH_ERASE_SECTOR` and the `EXT_FLASH_*` read/verify/delete family).

pub const CHK_PROTOCOL: u8 = 0x01;
pub const CHK_DEVICE: u8 = 0x02;
pub const PROG_END: u8 = 0x03;
pub const PROG_EXT_FLASH_BOOT: u8 = 0x04;

pub const FLASH_SET_PGSZ: u8 = 0x10;
pub const FLASH_GET_PGSZ: u8 = 0x11;
pub const FLASH_WRITE: u8 = 0x12;
pub const FLASH_READ: u8 = 0x13;
pub const FLASH_VERIFY: u8 = 0x14;
pub const FLASH_ERASE_SECTOR: u8 = 0x15;
pub const FLASH_ERASE_ALL: u8 = 0x16;

pub const EEPROM_SET_PGSZ: u8 = 0x20;
pub const EEPROM_GET_PGSZ: u8 = 0x21;
pub const EEPROM_WRITE: u8 = 0x22;
pub const EEPROM_READ: u8 = 0x23;
pub const EEPROM_ERASE: u8 = 0x24;
pub const EEPROM_ERASE_ALL: u8 = 0x25;

pub const EXT_FLASH_FOPEN: u8 = 0x30;
pub const EXT_FLASH_FCLOSE: u8 = 0x31;
pub const EXT_FLASH_WRITE: u8 = 0x32;
pub const EXT_FLASH_READ: u8 = 0x33;
pub const EXT_FLASH_VERIFY: u8 = 0x34;
pub const EXT_FLASH_ERASE_SECTOR: u8 = 0x35;
pub const EXT_FLASH_HEX_DEL: u8 = 0x36;
