// gattlink Source Code File
//
// Copyright 2020 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! The `api` module contains the traits and types which make up gattlink's public surface: the
//! [`Transport`] capability a platform BLE stack has to provide, the [`EventSink`] through which
//! the host is informed, and the identifiers and enums shared between them.

pub mod bleuuid;
mod event_sink;
mod transport;

use std::fmt::{self, Display, Formatter};

use bitflags::bitflags;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
#[cfg(feature = "serde")]
use serde_cr as serde;
use uuid::Uuid;

pub use self::event_sink::{EventSink, SessionEvent};
pub use self::transport::{Transport, TransportEvent, TransportEventSender};
use crate::Result;

/// Opaque identifier of a peripheral, usually the platform's address string. It is kept exactly
/// as the transport reported it.
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_cr")
)]
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        DeviceId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for DeviceId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        DeviceId::new(id)
    }
}

impl From<String> for DeviceId {
    fn from(id: String) -> Self {
        DeviceId(id)
    }
}

/// Identifier of a characteristic within the active connection. The UUID string is trimmed and
/// upper-cased, so `"2a00"` and `" 2A00"` name the same characteristic.
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_cr")
)]
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct CharacteristicId(String);

impl CharacteristicId {
    pub fn new(uuid: &str) -> Self {
        CharacteristicId(uuid.trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CharacteristicId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CharacteristicId {
    fn from(uuid: &str) -> Self {
        CharacteristicId::new(uuid)
    }
}

impl From<String> for CharacteristicId {
    fn from(uuid: String) -> Self {
        CharacteristicId::new(&uuid)
    }
}

impl From<Uuid> for CharacteristicId {
    fn from(uuid: Uuid) -> Self {
        CharacteristicId::new(&uuid.hyphenated().to_string())
    }
}

/// Lifecycle phase of a [`Session`](crate::Session). Exactly one phase holds at any time.
///
/// The discriminants are stable and can be handed across an FFI boundary as-is.
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_cr")
)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Phase {
    #[default]
    Uninitialized = 0,
    Initialized = 1,
    Scanning = 2,
    Connecting = 3,
    Connected = 4,
}

impl From<Phase> for u8 {
    fn from(phase: Phase) -> Self {
        phase as u8
    }
}

/// Error codes reported to the host through [`EventSink::on_error`].
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_cr")
)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorKind {
    #[default]
    NoError = 0,
    HardwareUnsupported = 1,
    /// The adapter is disabled. Can be reported at initialisation or at any time afterwards.
    HardwarePoweredOff = 2,
    PermissionDenied = 3,
    /// A dispatched GATT operation never received its completion callback.
    OperationTimedOut = 4,
}

impl From<ErrorKind> for u8 {
    fn from(kind: ErrorKind) -> Self {
        kind as u8
    }
}

/// Power and capability state of the platform adapter, as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterState {
    PoweredOn,
    PoweredOff,
    TurningOn,
    TurningOff,
    /// The device has no Bluetooth LE capability.
    Unsupported,
    /// The application has not been granted the Bluetooth permissions.
    Unauthorized,
}

/// Status code attached to GATT callbacks. Zero is success, everything else is platform
/// specific (e.g. 133 is Android's catch-all `GATT_ERROR`).
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_cr")
)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GattStatus(pub i32);

impl GattStatus {
    pub const SUCCESS: GattStatus = GattStatus(0);

    pub fn is_success(&self) -> bool {
        *self == Self::SUCCESS
    }
}

impl Display for GattStatus {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The filter used when scanning for BLE devices.
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_cr")
)]
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
pub struct ScanFilter {
    /// If the filter contains at least one service UUID, only devices supporting at least one
    /// of the given services will be reported.
    pub services: Vec<Uuid>,
}

impl ScanFilter {
    /// Parses a comma-separated list of service UUIDs, as handed over by hosts that can only
    /// pass a single string. Short 16/32-bit forms are expanded with the Bluetooth base UUID.
    /// An empty string yields a filter which matches every device.
    pub fn parse(services: &str) -> Result<Self> {
        let services = services
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(bleuuid::parse_ble_uuid)
            .collect::<Result<Vec<_>>>()?;
        Ok(ScanFilter { services })
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

bitflags! {
    /// A set of properties that indicate what operations are supported by a Characteristic.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct CharPropFlags: u8 {
        const BROADCAST = 0x01;
        const READ = 0x02;
        const WRITE_WITHOUT_RESPONSE = 0x04;
        const WRITE = 0x08;
        const NOTIFY = 0x10;
        const INDICATE = 0x20;
        const AUTHENTICATED_SIGNED_WRITES = 0x40;
        const EXTENDED_PROPERTIES = 0x80;
    }
}

/// The kind of a queued GATT operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Subscribe,
    Read,
    Write,
}

impl Display for OperationKind {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        Display::fmt(
            match self {
                OperationKind::Subscribe => "subscribe",
                OperationKind::Read => "read",
                OperationKind::Write => "write",
            },
            f,
        )
    }
}

/// A characteristic reported by service discovery, together with the transport's handle for it.
#[derive(Debug, Clone)]
pub struct DiscoveredCharacteristic<C> {
    /// Identifier of the service the characteristic belongs to, as reported by the transport.
    pub service: String,
    pub uuid: CharacteristicId,
    pub properties: CharPropFlags,
    pub handle: C,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::bleuuid::uuid_from_u16;
    use crate::Error;

    #[test]
    fn characteristic_id_is_case_normalized() {
        assert_eq!(CharacteristicId::from("2a00"), CharacteristicId::from("2A00"));
        assert_eq!(CharacteristicId::from(" 2a01 ").as_str(), "2A01");
        assert_eq!(
            CharacteristicId::from(uuid_from_u16(0x2a00)).as_str(),
            "00002A00-0000-1000-8000-00805F9B34FB"
        );
    }

    #[test]
    fn device_id_is_kept_verbatim() {
        assert_eq!(DeviceId::from("aa:bb").to_string(), "aa:bb");
        assert_ne!(DeviceId::from("aa:bb"), DeviceId::from("AA:BB"));
    }

    #[test]
    fn phase_and_error_codes() {
        assert_eq!(u8::from(Phase::Uninitialized), 0);
        assert_eq!(u8::from(Phase::Connected), 4);
        assert_eq!(u8::from(ErrorKind::PermissionDenied), 3);
        assert_eq!(Phase::default(), Phase::Uninitialized);
        assert_eq!(ErrorKind::default(), ErrorKind::NoError);
    }

    #[test]
    fn gatt_status_success() {
        assert!(GattStatus::SUCCESS.is_success());
        assert!(!GattStatus(133).is_success());
    }

    #[test]
    fn parse_scan_filter() {
        let filter = ScanFilter::parse("180d, 0000180f-0000-1000-8000-00805f9b34fb,").unwrap();
        assert_eq!(
            filter.services,
            vec![uuid_from_u16(0x180d), uuid_from_u16(0x180f)]
        );
        assert!(ScanFilter::parse("").unwrap().is_empty());
        assert!(matches!(
            ScanFilter::parse("180d,nope"),
            Err(Error::InvalidUuid(s)) if s == "nope"
        ));
    }
}
