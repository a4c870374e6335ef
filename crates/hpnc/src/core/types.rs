// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wire-level value types shared across the stack.
//!
//! These are the semantic types of the data model: MAC addresses, IPv4
//! parameter sets, PROFINET UUIDs (with the byte-order variants fielded
//! stacks disagree on), station names, and sample quality.

use crate::core::ser::{Cursor, CursorMut, SerResult};
use std::fmt;

/// 48-bit Ethernet MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    /// PROFINET DCP identify multicast (IEC 61158-6).
    pub const DCP_MULTICAST: MacAddr = MacAddr([0x01, 0x0E, 0xCF, 0x00, 0x00, 0x00]);
    /// All-ones broadcast.
    pub const BROADCAST: MacAddr = MacAddr([0xFF; 6]);

    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    pub fn write(&self, cursor: &mut CursorMut<'_>) -> SerResult<()> {
        cursor.write_bytes(&self.0)
    }

    pub fn read(cursor: &mut Cursor<'_>) -> SerResult<Self> {
        let bytes = cursor.read_bytes(6)?;
        let mut mac = [0u8; 6];
        mac.copy_from_slice(bytes);
        Ok(MacAddr(mac))
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

/// IPv4 parameter set carried by DCP (address, netmask, gateway).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IpParams {
    pub addr: [u8; 4],
    pub netmask: [u8; 4],
    pub gateway: [u8; 4],
}

impl IpParams {
    pub fn new(addr: [u8; 4], netmask: [u8; 4], gateway: [u8; 4]) -> Self {
        Self {
            addr,
            netmask,
            gateway,
        }
    }

    pub fn is_unset(&self) -> bool {
        self.addr == [0, 0, 0, 0]
    }

    pub fn write(&self, cursor: &mut CursorMut<'_>) -> SerResult<()> {
        cursor.write_bytes(&self.addr)?;
        cursor.write_bytes(&self.netmask)?;
        cursor.write_bytes(&self.gateway)
    }

    pub fn read(cursor: &mut Cursor<'_>) -> SerResult<Self> {
        let mut out = IpParams::default();
        out.addr.copy_from_slice(cursor.read_bytes(4)?);
        out.netmask.copy_from_slice(cursor.read_bytes(4)?);
        out.gateway.copy_from_slice(cursor.read_bytes(4)?);
        Ok(out)
    }
}

impl fmt::Display for IpParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.addr[0], self.addr[1], self.addr[2], self.addr[3]
        )
    }
}

/// 128-bit UUID in DCE field layout (time_low, time_mid, time_hi, clock, node).
///
/// Stored in the order the fields are written when the stack uses the
/// "as stored" wire format. `swapped()` yields the variant with the first
/// three fields byte-swapped, which a second family of device stacks
/// expects. Neither is authoritative on the wire -- the connect strategy
/// decides which to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PnUuid(pub [u8; 16]);

impl PnUuid {
    /// PROFINET IO device interface UUID (IEC 61158-6).
    pub const IFACE_DEVICE: PnUuid = PnUuid([
        0xDE, 0xA0, 0x00, 0x01, 0x6C, 0x97, 0x11, 0xD1, 0x82, 0x71, 0x00, 0xA0, 0x24, 0x42, 0xDF,
        0x7D,
    ]);
    /// PROFINET IO controller interface UUID (IEC 61158-6).
    pub const IFACE_CONTROLLER: PnUuid = PnUuid([
        0xDE, 0xA0, 0x00, 0x02, 0x6C, 0x97, 0x11, 0xD1, 0x82, 0x71, 0x00, 0xA0, 0x24, 0x42, 0xDF,
        0x7D,
    ]);

    /// Build an object UUID for a device instance (vendor/device id encoded
    /// in the node field per IEC 61158-6 Sec. CM object UUID rules).
    pub fn object_for_device(instance: u16, device_id: u16, vendor_id: u16) -> Self {
        let mut uuid = [0u8; 16];
        uuid[0..4].copy_from_slice(&0xDEA0_0000u32.to_be_bytes());
        uuid[4..6].copy_from_slice(&0x6C97u16.to_be_bytes());
        uuid[6..8].copy_from_slice(&0x11D1u16.to_be_bytes());
        uuid[8] = 0x82;
        uuid[9] = 0x71;
        uuid[10..12].copy_from_slice(&instance.to_be_bytes());
        uuid[12..14].copy_from_slice(&device_id.to_be_bytes());
        uuid[14..16].copy_from_slice(&vendor_id.to_be_bytes());
        PnUuid(uuid)
    }

    /// Variant with time_low/time_mid/time_hi byte-swapped (little-endian
    /// DREP encoding of the first three fields).
    pub fn swapped(&self) -> Self {
        let b = &self.0;
        PnUuid([
            b[3], b[2], b[1], b[0], b[5], b[4], b[7], b[6], b[8], b[9], b[10], b[11], b[12], b[13],
            b[14], b[15],
        ])
    }

    pub fn is_nil(&self) -> bool {
        self.0 == [0u8; 16]
    }

    pub fn write(&self, cursor: &mut CursorMut<'_>) -> SerResult<()> {
        cursor.write_bytes(&self.0)
    }

    pub fn read(cursor: &mut Cursor<'_>) -> SerResult<Self> {
        let bytes = cursor.read_bytes(16)?;
        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(bytes);
        Ok(PnUuid(uuid))
    }
}

impl fmt::Display for PnUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7], b[8], b[9], b[10], b[11], b[12],
            b[13], b[14], b[15]
        )
    }
}

/// Maximum station name length per IEC 61158-6 (DCP NameOfStation).
pub const STATION_NAME_MAX: usize = 240;

/// Validated PROFINET station name.
///
/// Lower-case letters, digits, '-' and '.' label separators; labels must not
/// start or end with '-'. The full grammar has more corner cases (port
/// names), but this covers what DCP Set accepts from the fielded RTUs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StationName(String);

impl StationName {
    pub fn parse(raw: &str) -> Result<Self, String> {
        if raw.is_empty() {
            return Err("station name must not be empty".into());
        }
        if raw.len() > STATION_NAME_MAX {
            return Err(format!(
                "station name exceeds {} octets: {}",
                STATION_NAME_MAX,
                raw.len()
            ));
        }
        for label in raw.split('.') {
            if label.is_empty() {
                return Err("empty label in station name".into());
            }
            if label.starts_with('-') || label.ends_with('-') {
                return Err(format!("label '{}' must not begin or end with '-'", label));
            }
            if !label
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
            {
                return Err(format!("label '{}' has characters outside [a-z0-9-]", label));
            }
        }
        Ok(StationName(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Decode from wire octets (DCP NameOfStation block payload).
    pub fn from_wire(raw: &[u8]) -> Result<Self, String> {
        let s = std::str::from_utf8(raw).map_err(|_| "station name is not UTF-8".to_string())?;
        Self::parse(s)
    }
}

impl fmt::Display for StationName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sample quality per the OPC convention the plant historians expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[repr(u16)]
pub enum Quality {
    Good = 0x00C0,
    Uncertain = 0x0040,
    Bad = 0x0000,
}

impl Quality {
    pub fn from_wire(raw: u16) -> Self {
        match raw {
            0x00C0 => Quality::Good,
            0x0040 => Quality::Uncertain,
            _ => Quality::Bad,
        }
    }

    pub fn is_good(self) -> bool {
        matches!(self, Quality::Good)
    }
}

/// One recorded process value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub tag: u32,
    pub timestamp_ns: i64,
    pub value: f64,
    pub quality: Quality,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mac_display_and_multicast() {
        let mac = MacAddr([0x01, 0x0E, 0xCF, 0x00, 0x00, 0x00]);
        assert_eq!(mac.to_string(), "01:0E:CF:00:00:00");
        assert!(mac.is_multicast());
        assert!(!MacAddr([0x00, 0x0A, 0xCD, 1, 2, 3]).is_multicast());
    }

    #[test]
    fn test_uuid_swap_is_involution() {
        let uuid = PnUuid::IFACE_DEVICE;
        assert_ne!(uuid.swapped(), uuid);
        assert_eq!(uuid.swapped().swapped(), uuid);
    }

    #[test]
    fn test_object_uuid_encodes_ids() {
        let uuid = PnUuid::object_for_device(1, 0x0C05, 0x0272);
        assert_eq!(&uuid.0[12..14], &0x0C05u16.to_be_bytes());
        assert_eq!(&uuid.0[14..16], &0x0272u16.to_be_bytes());
    }

    #[test]
    fn test_station_name_rules() {
        assert!(StationName::parse("intake-rtu-01").is_ok());
        assert!(StationName::parse("plant.intake-rtu-01").is_ok());
        assert!(StationName::parse("").is_err());
        assert!(StationName::parse("Intake").is_err());
        assert!(StationName::parse("-intake").is_err());
        assert!(StationName::parse("intake-").is_err());
        assert!(StationName::parse("intake..rtu").is_err());
        let long = "a".repeat(STATION_NAME_MAX + 1);
        assert!(StationName::parse(&long).is_err());
    }

    #[test]
    fn test_quality_wire_mapping() {
        assert_eq!(Quality::from_wire(0x00C0), Quality::Good);
        assert_eq!(Quality::from_wire(0x0040), Quality::Uncertain);
        assert_eq!(Quality::from_wire(0x1234), Quality::Bad);
        assert!(Quality::Good.is_good());
    }

    #[test]
    fn test_ip_params_roundtrip() {
        let params = IpParams::new([192, 168, 1, 50], [255, 255, 255, 0], [192, 168, 1, 1]);
        let mut buf = [0u8; 12];
        {
            let mut cursor = CursorMut::new(&mut buf);
            params.write(&mut cursor).expect("Write IP params");
        }
        let mut cursor = Cursor::new(&buf);
        let back = IpParams::read(&mut cursor).expect("Read IP params");
        assert_eq!(back, params);
        assert_eq!(back.to_string(), "192.168.1.50");
    }
}
