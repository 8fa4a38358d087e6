//! GATT constants and session defaults.

use uuid::Uuid;

use crate::api::bleuuid::uuid_from_u16;

/// Client Characteristic Configuration descriptor, written to enable notifications or
/// indications on the peripheral.
pub const CLIENT_CHARACTERISTIC_CONFIGURATION_UUID: Uuid = uuid_from_u16(0x2902);

pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];
pub const ENABLE_INDICATION_VALUE: [u8; 2] = [0x02, 0x00];

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
pub const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;
