//! Utilities for dealing with BLE UUIDs, converting to and from their short formats.

use uuid::Uuid;

use crate::{Error, Result};

const BLUETOOTH_BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;
const BLUETOOTH_BASE_MASK: u128 = 0x00000000_ffff_ffff_ffff_ffffffffffff;
const BLUETOOTH_BASE_MASK_16: u128 = 0xffff0000_ffff_ffff_ffff_ffffffffffff;

/// Convert a 32-bit BLE short UUID to a full 128-bit UUID by filling in the standard Bluetooth Base
/// UUID.
pub const fn uuid_from_u32(short: u32) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96))
}

/// Convert a 16-bit BLE short UUID to a full 128-bit UUID by filling in the standard Bluetooth Base
/// UUID.
pub const fn uuid_from_u16(short: u16) -> Uuid {
    uuid_from_u32(short as u32)
}

/// An extension trait for `Uuid` which provides BLE-specific methods.
pub trait BleUuid {
    /// If the UUID is derived from the Bluetooth Base UUID then return its 32-bit short form,
    /// otherwise return `None`.
    fn to_ble_u32(&self) -> Option<u32>;

    /// Like [`BleUuid::to_ble_u32`], for UUIDs with a 16-bit short form.
    fn to_ble_u16(&self) -> Option<u16>;

    /// Convert the UUID to a string, using short format if applicable.
    fn to_short_string(&self) -> String;
}

impl BleUuid for Uuid {
    fn to_ble_u32(&self) -> Option<u32> {
        let value = self.as_u128();
        (value & BLUETOOTH_BASE_MASK == BLUETOOTH_BASE_UUID).then_some((value >> 96) as u32)
    }

    fn to_ble_u16(&self) -> Option<u16> {
        let value = self.as_u128();
        (value & BLUETOOTH_BASE_MASK_16 == BLUETOOTH_BASE_UUID).then_some((value >> 96) as u16)
    }

    fn to_short_string(&self) -> String {
        if let Some(short) = self.to_ble_u16() {
            format!("{:#06x}", short)
        } else if let Some(short) = self.to_ble_u32() {
            format!("{:#010x}", short)
        } else {
            self.to_string()
        }
    }
}

/// Parses a UUID given either as 4 or 8 hex digits (a short form relative to the Bluetooth Base
/// UUID) or as a full 128-bit UUID in any format accepted by [`Uuid::parse_str`].
pub fn parse_ble_uuid(s: &str) -> Result<Uuid> {
    let s = s.trim();
    let invalid = || Error::InvalidUuid(s.to_owned());
    match s.len() {
        4 => u16::from_str_radix(s, 16)
            .map(uuid_from_u16)
            .map_err(|_| invalid()),
        8 => u32::from_str_radix(s, 16)
            .map(uuid_from_u32)
            .map_err(|_| invalid()),
        _ => Uuid::parse_str(s).map_err(|_| invalid()),
    }
}
