// gattlink Source Code File
//
// Copyright 2020 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
#[cfg(feature = "serde")]
use serde_cr as serde;

use super::{CharacteristicId, DeviceId, ErrorKind, Phase};

/// The notifications a [`Session`](crate::Session) produces toward the host application.
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_cr")
)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    ScanResult {
        name: String,
        rssi: i16,
        device: DeviceId,
    },
    CharacteristicUpdate {
        characteristic: CharacteristicId,
        #[cfg_attr(feature = "serde", serde(with = "serde_bytes"))]
        value: Vec<u8>,
        device: DeviceId,
    },
    CharacteristicDiscovered {
        service: String,
        characteristic: CharacteristicId,
    },
    Connected(DeviceId),
    Disconnected(DeviceId),
    /// The connection attempt failed, or an established connection dropped with an error status.
    ConnectError(DeviceId),
    StatusChanged(Phase),
    Error(ErrorKind),
}

/// Receives everything the session reports to the host.
///
/// The session calls the `on_*` methods. Each of them has a default implementation which wraps
/// its arguments into a [`SessionEvent`] and passes it to [`emit`](EventSink::emit), so a sink can
/// either handle the single event type or override the callbacks it cares about.
///
/// Sinks are called from the session's event loop and must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: SessionEvent);

    fn on_scan_result(&self, name: &str, rssi: i16, device: &DeviceId) {
        self.emit(SessionEvent::ScanResult {
            name: name.to_owned(),
            rssi,
            device: device.clone(),
        });
    }

    fn on_characteristic_update(
        &self,
        characteristic: &CharacteristicId,
        value: &[u8],
        device: &DeviceId,
    ) {
        self.emit(SessionEvent::CharacteristicUpdate {
            characteristic: characteristic.clone(),
            value: value.to_vec(),
            device: device.clone(),
        });
    }

    fn on_characteristic_discovered(&self, service: &str, characteristic: &CharacteristicId) {
        self.emit(SessionEvent::CharacteristicDiscovered {
            service: service.to_owned(),
            characteristic: characteristic.clone(),
        });
    }

    fn on_connected(&self, device: &DeviceId) {
        self.emit(SessionEvent::Connected(device.clone()));
    }

    fn on_disconnected(&self, device: &DeviceId) {
        self.emit(SessionEvent::Disconnected(device.clone()));
    }

    fn on_connect_error(&self, device: &DeviceId) {
        self.emit(SessionEvent::ConnectError(device.clone()));
    }

    fn on_status_changed(&self, phase: Phase) {
        self.emit(SessionEvent::StatusChanged(phase));
    }

    fn on_error(&self, kind: ErrorKind) {
        self.emit(SessionEvent::Error(kind));
    }
}

impl<F> EventSink for F
where
    F: Fn(SessionEvent) + Send + Sync,
{
    fn emit(&self, event: SessionEvent) {
        self(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct CountingSink {
        connected: Mutex<u32>,
        other: Mutex<Vec<SessionEvent>>,
    }

    impl EventSink for CountingSink {
        fn emit(&self, event: SessionEvent) {
            self.other.lock().unwrap().push(event);
        }

        fn on_connected(&self, _device: &DeviceId) {
            *self.connected.lock().unwrap() += 1;
        }
    }

    #[test]
    fn closures_receive_wrapped_events() {
        let seen = Arc::new(Mutex::new(Vec::<SessionEvent>::new()));
        let sink = {
            let seen = seen.clone();
            move |event: SessionEvent| seen.lock().unwrap().push(event)
        };
        sink.on_characteristic_update(&"2a19".into(), &[0x64], &"AA:BB".into());
        sink.on_status_changed(Phase::Connected);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                SessionEvent::CharacteristicUpdate {
                    characteristic: "2A19".into(),
                    value: vec![0x64],
                    device: "AA:BB".into(),
                },
                SessionEvent::StatusChanged(Phase::Connected),
            ]
        );
    }

    #[test]
    fn overridden_callbacks_bypass_emit() {
        let sink = CountingSink {
            connected: Mutex::new(0),
            other: Mutex::new(Vec::new()),
        };
        sink.on_connected(&"AA:BB".into());
        sink.on_disconnected(&"AA:BB".into());
        assert_eq!(*sink.connected.lock().unwrap(), 1);
        assert_eq!(
            *sink.other.lock().unwrap(),
            vec![SessionEvent::Disconnected("AA:BB".into())]
        );
    }
}
