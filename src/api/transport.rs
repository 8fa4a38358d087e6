// gattlink Source Code File
//
// Copyright 2020 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

use std::fmt::{self, Debug, Formatter};

use async_trait::async_trait;
use log::trace;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use super::{
    AdapterState, CharacteristicId, DeviceId, DiscoveredCharacteristic, GattStatus, ScanFilter,
};
use crate::session::LoopMessage;
use crate::Result;

/// The capability a platform BLE stack provides to a [`Session`](crate::Session).
///
/// Every request method returns as soon as the stack has accepted (`Ok`) or refused (`Err`) the
/// request. It must not wait for the radio: the outcome of an accepted request is reported later
/// as a [`TransportEvent`] through the [`TransportEventSender`] handed out by the session. The
/// session never has more than one read, write or descriptor write outstanding.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Handle of a peripheral which can be connected to.
    type Device: Clone + Debug + Send + Sync + 'static;
    /// Handle of a characteristic on the connected peripheral.
    type Characteristic: Clone + Debug + Send + Sync + 'static;

    /// Reports whether BLE is available, permitted and powered on.
    async fn adapter_state(&self) -> Result<AdapterState>;

    /// Starts a scan for BLE devices. Results are reported as [`TransportEvent::ScanResult`].
    async fn start_scan(&self, filter: &ScanFilter) -> Result<()>;

    /// Stops scanning for BLE devices.
    async fn stop_scan(&self) -> Result<()>;

    /// Requests a connection to `device`. Completion is reported as
    /// [`TransportEvent::Connected`] or [`TransportEvent::Disconnected`].
    async fn connect(&self, device: &Self::Device) -> Result<()>;

    /// Requests termination of the current connection. The resulting
    /// [`TransportEvent::Disconnected`] must still be delivered.
    async fn disconnect(&self) -> Result<()>;

    /// Releases the handle of the current connection. Called once per connection, after the
    /// session has stopped using it.
    async fn close(&self);

    /// Starts service discovery on the current connection. Completion is reported as
    /// [`TransportEvent::ServicesDiscovered`].
    async fn discover_services(&self) -> Result<()>;

    /// Completion is reported as [`TransportEvent::CharacteristicRead`].
    async fn read_characteristic(&self, characteristic: &Self::Characteristic) -> Result<()>;

    /// Completion is reported as [`TransportEvent::CharacteristicWrite`].
    async fn write_characteristic(
        &self,
        characteristic: &Self::Characteristic,
        data: &[u8],
    ) -> Result<()>;

    /// Enables or disables local delivery of value changes for `characteristic`. This call has no
    /// completion event.
    async fn set_notification(
        &self,
        characteristic: &Self::Characteristic,
        enabled: bool,
    ) -> Result<()>;

    /// Writes a descriptor of `characteristic`. Completion is reported as
    /// [`TransportEvent::DescriptorWrite`].
    async fn write_descriptor(
        &self,
        characteristic: &Self::Characteristic,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<()>;

    /// Releases all adapter resources. Called when the session is deinitialized.
    async fn release(&self) {}
}

/// Asynchronous callbacks from the platform BLE stack.
#[derive(Debug, Clone)]
pub enum TransportEvent<D, C> {
    ScanResult {
        device: DeviceId,
        name: Option<String>,
        rssi: i16,
        handle: D,
    },
    Connected,
    Disconnected {
        status: GattStatus,
    },
    ServicesDiscovered {
        status: GattStatus,
        characteristics: Vec<DiscoveredCharacteristic<C>>,
    },
    CharacteristicRead {
        characteristic: CharacteristicId,
        value: Vec<u8>,
        status: GattStatus,
    },
    CharacteristicWrite {
        characteristic: CharacteristicId,
        status: GattStatus,
    },
    /// A notification or indication pushed by the peripheral.
    CharacteristicChanged {
        characteristic: CharacteristicId,
        value: Vec<u8>,
    },
    DescriptorWrite {
        characteristic: CharacteristicId,
        descriptor: Uuid,
        status: GattStatus,
    },
    AdapterStateChanged(AdapterState),
}

/// Hands transport callbacks to the session's event loop. Sending never blocks and may happen
/// from any thread.
pub struct TransportEventSender<D, C> {
    sender: UnboundedSender<LoopMessage<D, C>>,
}

impl<D, C> TransportEventSender<D, C> {
    pub(crate) fn new(sender: UnboundedSender<LoopMessage<D, C>>) -> Self {
        TransportEventSender { sender }
    }

    /// Delivers `event` to the session. Returns `false` if the session has shut down.
    pub fn send(&self, event: TransportEvent<D, C>) -> bool {
        match self.sender.send(LoopMessage::Transport(event)) {
            Ok(()) => true,
            Err(_) => {
                trace!("Dropping transport event, session loop has finished");
                false
            }
        }
    }
}

impl<D, C> Clone for TransportEventSender<D, C> {
    fn clone(&self) -> Self {
        TransportEventSender {
            sender: self.sender.clone(),
        }
    }
}

impl<D, C> Debug for TransportEventSender<D, C> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("TransportEventSender")
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}
