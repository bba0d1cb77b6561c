//! Static device catalog.
//!
//! Modeled as a compile-time table rather than a runtime registry of
//! trait objects: the set of supported devices is small and fixed at
//! build time, so `resolve` can afford to be O(n).

/// A single catalog entry: protocol version and user-application memory
/// window for one target device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSpec {
    pub id: u8,
    pub name: &'static str,
    pub protocol_version: u8,
    pub userapp_start: u32,
    pub userapp_size: u32,
    pub note: &'static str,
}

/// `id = 0` is the "auto" pseudo-entry: it carries `protocol_version = 0`
/// and is never itself a detected device, only a requested one.
pub const DEVICES: &[DeviceSpec] = &[
    DeviceSpec {
        id: 0,
        name: "auto",
        protocol_version: 0,
        userapp_start: 0,
        userapp_size: 0,
        note: "resolved from the target's handshake response",
    },
    DeviceSpec {
        id: 1,
        name: "atsame54_devb",
        protocol_version: 1,
        userapp_start: 0x0001_0000,
        userapp_size: 0x000F_0000,
        note: "",
    },
];

/// Looks a device up by numeric id (as a decimal string) or by name.
pub fn resolve(s: &str) -> Option<&'static DeviceSpec> {
    if let Ok(id) = s.parse::<u8>() {
        return DEVICES.iter().find(|d| d.id == id);
    }
    DEVICES.iter().find(|d| d.name.eq_ignore_ascii_case(s))
}

pub fn by_id(id: u8) -> Option<&'static DeviceSpec> {
    DEVICES.iter().find(|d| d.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_by_name() {
        assert_eq!(resolve("atsame54_devb").unwrap().id, 1);
        assert_eq!(resolve("ATSAME54_DEVB").unwrap().id, 1);
    }

    #[test]
    fn resolves_by_number() {
        assert_eq!(resolve("1").unwrap().name, "atsame54_devb");
        assert_eq!(resolve("0").unwrap().name, "auto");
    }

    #[test]
    fn unknown_device_is_none() {
        assert!(resolve("nonexistent").is_none());
        assert!(resolve("99").is_none());
    }
}
