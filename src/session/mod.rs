// gattlink Source Code File
//
// Copyright 2020 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! The [`Session`] handle and the event loop behind it.
//!
//! Every session owns one task which holds the transport, the entity cache, the operation queue
//! and the lifecycle phase. Host commands and transport callbacks both reach that task through a
//! single channel, so they are applied strictly in arrival order and never concurrently.

mod internal;

use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use dashmap::DashMap;
use log::debug;
use tokio::sync::{mpsc, oneshot};

use self::internal::SessionInternal;
use crate::api::{
    CharacteristicId, DeviceId, ErrorKind, EventSink, OperationKind, Phase, ScanFilter, Transport,
    TransportEvent, TransportEventSender,
};
use crate::config::SessionConfig;
use crate::{Error, Result};

type Responder<T> = oneshot::Sender<Result<T>>;

pub(crate) enum SessionCommand {
    Initialize(Responder<()>),
    Deinitialize(Responder<()>),
    StartScan(ScanFilter, Responder<()>),
    StopScan(Responder<()>),
    Connect(DeviceId, Responder<()>),
    Disconnect(Responder<()>),
    Enqueue {
        kind: OperationKind,
        characteristic: CharacteristicId,
        payload: Vec<u8>,
        responder: Responder<()>,
    },
    Status(oneshot::Sender<SessionStatus>),
    Shutdown(Responder<()>),
}

// Everything the event loop reacts to, from either side.
pub(crate) enum LoopMessage<D, C> {
    Command(SessionCommand),
    Transport(TransportEvent<D, C>),
}

/// A snapshot of a session's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub phase: Phase,
    /// The error code most recently reported through [`EventSink::on_error`].
    pub last_error: ErrorKind,
    /// The device being connected to or connected.
    pub active_device: Option<DeviceId>,
    /// Whether the transport is scanning. Stays set while connecting from a scan.
    pub scanning: bool,
    pub operation_in_flight: bool,
    /// Operations waiting behind the one in flight.
    pub queued_operations: usize,
}

/// Handle to a GATT session. Cloning the handle does not create a new session.
///
/// Commands return as soon as the session has accepted or rejected them. Their outcome on the
/// radio is reported to the [`EventSink`] the session was created with.
pub struct Session<T: Transport> {
    sender: mpsc::UnboundedSender<LoopMessage<T::Device, T::Characteristic>>,
    devices: Arc<DashMap<DeviceId, T::Device>>,
}

impl<T: Transport> Session<T> {
    /// Starts a session on the current tokio runtime. The session starts out
    /// [`Phase::Uninitialized`].
    pub fn new(
        transport: T,
        sink: impl EventSink + 'static,
        config: SessionConfig,
    ) -> Result<Self> {
        config.validate()?;
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|err| Error::Other(Box::new(err)))?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let internal = SessionInternal::new(transport, Box::new(sink), config, receiver);
        let devices = internal.device_view();
        runtime.spawn(internal.run());
        Ok(Session { sender, devices })
    }

    /// The channel through which the transport reports its callbacks to this session.
    pub fn event_sender(&self) -> TransportEventSender<T::Device, T::Characteristic> {
        TransportEventSender::new(self.sender.clone())
    }

    async fn request<R>(
        &self,
        command: impl FnOnce(oneshot::Sender<R>) -> SessionCommand,
    ) -> Result<R> {
        let (responder, response) = oneshot::channel();
        self.sender
            .send(LoopMessage::Command(command(responder)))
            .map_err(|_| Error::SessionClosed)?;
        response.await.map_err(|_| Error::SessionClosed)
    }

    /// Checks that Bluetooth LE is supported, permitted and powered on. Initializing an
    /// initialized session does nothing.
    pub async fn initialize(&self) -> Result<()> {
        self.request(SessionCommand::Initialize).await?
    }

    /// Disconnects, stops scanning, forgets every scanned device and releases the adapter.
    pub async fn deinitialize(&self) -> Result<()> {
        self.request(SessionCommand::Deinitialize).await?
    }

    pub async fn start_scan(&self, filter: ScanFilter) -> Result<()> {
        self.request(|responder| SessionCommand::StartScan(filter, responder))
            .await?
    }

    pub async fn stop_scan(&self) -> Result<()> {
        self.request(SessionCommand::StopScan).await?
    }

    /// Connects to a device reported by a scan. Services are discovered as soon as the
    /// connection is up.
    pub async fn connect(&self, device: impl Into<DeviceId>) -> Result<()> {
        let device = device.into();
        self.request(|responder| SessionCommand::Connect(device, responder))
            .await?
    }

    /// Asks the transport to drop the connection. [`EventSink::on_disconnected`] follows once
    /// it has.
    pub async fn disconnect(&self) -> Result<()> {
        self.request(SessionCommand::Disconnect).await?
    }

    async fn enqueue(
        &self,
        kind: OperationKind,
        characteristic: CharacteristicId,
        payload: Vec<u8>,
    ) -> Result<()> {
        self.request(|responder| SessionCommand::Enqueue {
            kind,
            characteristic,
            payload,
            responder,
        })
        .await?
    }

    /// Queues a read. The value arrives through [`EventSink::on_characteristic_update`].
    pub async fn read(&self, characteristic: impl Into<CharacteristicId>) -> Result<()> {
        self.enqueue(OperationKind::Read, characteristic.into(), Vec::new())
            .await
    }

    pub async fn write(
        &self,
        characteristic: impl Into<CharacteristicId>,
        data: impl Into<Vec<u8>>,
    ) -> Result<()> {
        self.enqueue(OperationKind::Write, characteristic.into(), data.into())
            .await
    }

    /// Queues a subscription to notifications, or to indications if the characteristic does not
    /// notify. Values arrive through [`EventSink::on_characteristic_update`].
    pub async fn subscribe(&self, characteristic: impl Into<CharacteristicId>) -> Result<()> {
        self.enqueue(OperationKind::Subscribe, characteristic.into(), Vec::new())
            .await
    }

    pub async fn status(&self) -> Result<SessionStatus> {
        self.request(SessionCommand::Status).await
    }

    pub async fn last_error(&self) -> Result<ErrorKind> {
        Ok(self.status().await?.last_error)
    }

    /// Devices reported by scans since the session was initialized, which can be connected to.
    pub fn discovered_devices(&self) -> Vec<DeviceId> {
        let mut devices: Vec<_> = self
            .devices
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        devices.sort();
        devices
    }

    /// Deinitializes the session and stops its event loop. Every later command fails with
    /// [`Error::SessionClosed`].
    pub async fn shutdown(&self) -> Result<()> {
        debug!("Shutting down session");
        self.request(SessionCommand::Shutdown).await?
    }
}

impl<T: Transport> Clone for Session<T> {
    fn clone(&self) -> Self {
        Session {
            sender: self.sender.clone(),
            devices: self.devices.clone(),
        }
    }
}

impl<T: Transport> Debug for Session<T> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("Session")
            .field("closed", &self.sender.is_closed())
            .field("discovered_devices", &self.devices.len())
            .finish()
    }
}
