// gattlink Source Code File
//
// Copyright 2020 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

use std::sync::Arc;

use dashmap::DashMap;
use log::{debug, error, info, trace, warn};
use tokio::select;
use tokio::sync::{mpsc::UnboundedReceiver, oneshot};
use tokio::time::sleep_until;

use super::{LoopMessage, SessionCommand, SessionStatus};
use crate::api::{
    bleuuid::BleUuid, AdapterState, CharacteristicId, DeviceId, DiscoveredCharacteristic, ErrorKind,
    EventSink, GattStatus, OperationKind, Phase, ScanFilter, Transport, TransportEvent,
};
use crate::common::entity_cache::{CachedCharacteristic, EntityCache};
use crate::common::operation_queue::{OperationQueue, QueuedOperation};
use crate::config::SessionConfig;
use crate::constants::CLIENT_CHARACTERISTIC_CONFIGURATION_UUID;
use crate::{Error, Result};

type Message<T> = LoopMessage<<T as Transport>::Device, <T as Transport>::Characteristic>;

// What woke the loop up.
enum LoopStep<T: Transport> {
    Message(Message<T>),
    OperationTimedOut,
    // Every handle and transport sender is gone.
    Finished,
}

/// The state machine of a session. Owned by the session's event loop task, so none of its
/// state needs locking.
pub(super) struct SessionInternal<T: Transport> {
    transport: T,
    sink: Box<dyn EventSink>,
    config: SessionConfig,
    receiver: UnboundedReceiver<Message<T>>,
    cache: EntityCache<T::Device, T::Characteristic>,
    queue: OperationQueue<T::Characteristic>,
    phase: Phase,
    active: Option<DeviceId>,
    scanning: bool,
    powered: bool,
    last_error: ErrorKind,
}

impl<T: Transport> SessionInternal<T> {
    pub(super) fn new(
        transport: T,
        sink: Box<dyn EventSink>,
        config: SessionConfig,
        receiver: UnboundedReceiver<Message<T>>,
    ) -> Self {
        SessionInternal {
            transport,
            sink,
            cache: EntityCache::new(config.device_cache_limit),
            queue: OperationQueue::new(config.queue_capacity, config.operation_timeout()),
            config,
            receiver,
            phase: Phase::Uninitialized,
            active: None,
            scanning: false,
            powered: false,
            last_error: ErrorKind::NoError,
        }
    }

    pub(super) fn device_view(&self) -> Arc<DashMap<DeviceId, T::Device>> {
        self.cache.device_view()
    }

    pub(super) async fn run(mut self) {
        debug!("Session loop started");
        loop {
            let step = match self.queue.deadline() {
                Some(deadline) => select! {
                    biased;
                    message = self.receiver.recv() => {
                        message.map_or(LoopStep::<T>::Finished, LoopStep::Message)
                    }
                    _ = sleep_until(deadline) => LoopStep::OperationTimedOut,
                },
                None => self
                    .receiver
                    .recv()
                    .await
                    .map_or(LoopStep::<T>::Finished, LoopStep::Message),
            };
            match step {
                LoopStep::Message(LoopMessage::Command(command)) => {
                    if !self.handle_command(command).await {
                        break;
                    }
                }
                LoopStep::Message(LoopMessage::Transport(event)) => {
                    self.handle_transport_event(event).await
                }
                LoopStep::OperationTimedOut => self.on_operation_timeout().await,
                LoopStep::Finished => break,
            }
        }
        debug!("Session loop finished");
    }

    // Returns false once the loop should stop.
    async fn handle_command(&mut self, command: SessionCommand) -> bool {
        match command {
            SessionCommand::Initialize(responder) => reply(responder, self.initialize().await),
            SessionCommand::Deinitialize(responder) => {
                reply(responder, self.deinitialize().await)
            }
            SessionCommand::StartScan(filter, responder) => {
                reply(responder, self.start_scan(filter).await)
            }
            SessionCommand::StopScan(responder) => reply(responder, self.stop_scan().await),
            SessionCommand::Connect(device, responder) => {
                reply(responder, self.connect(device).await)
            }
            SessionCommand::Disconnect(responder) => reply(responder, self.disconnect().await),
            SessionCommand::Enqueue {
                kind,
                characteristic,
                payload,
                responder,
            } => reply(responder, self.enqueue(kind, characteristic, payload).await),
            SessionCommand::Status(responder) => {
                if responder.send(self.status()).is_err() {
                    trace!("Status requested, but nobody waited for it");
                }
            }
            SessionCommand::Shutdown(responder) => {
                reply(responder, self.deinitialize().await);
                return false;
            }
        }
        true
    }

    async fn handle_transport_event(
        &mut self,
        event: TransportEvent<T::Device, T::Characteristic>,
    ) {
        match event {
            TransportEvent::ScanResult {
                device,
                name,
                rssi,
                handle,
            } => self.on_scan_result(device, name, rssi, handle),
            TransportEvent::Connected => self.on_connected().await,
            TransportEvent::Disconnected { status } => self.on_disconnected(status).await,
            TransportEvent::ServicesDiscovered {
                status,
                characteristics,
            } => self.on_services_discovered(status, characteristics),
            TransportEvent::CharacteristicRead {
                characteristic,
                value,
                status,
            } => {
                if status.is_success() {
                    self.forward_update(&characteristic, &value);
                }
                self.on_operation_complete(OperationKind::Read, &characteristic, status)
                    .await
            }
            TransportEvent::CharacteristicWrite {
                characteristic,
                status,
            } => {
                self.on_operation_complete(OperationKind::Write, &characteristic, status)
                    .await
            }
            TransportEvent::CharacteristicChanged {
                characteristic,
                value,
            } => self.forward_update(&characteristic, &value),
            TransportEvent::DescriptorWrite {
                characteristic,
                descriptor,
                status,
            } => {
                if descriptor == CLIENT_CHARACTERISTIC_CONFIGURATION_UUID {
                    self.on_operation_complete(OperationKind::Subscribe, &characteristic, status)
                        .await
                } else {
                    trace!(
                        "Ignoring write of descriptor {} on {}",
                        descriptor,
                        characteristic
                    );
                }
            }
            TransportEvent::AdapterStateChanged(state) => {
                self.on_adapter_state_changed(state).await
            }
        }
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            debug!("Session phase {:?} -> {:?}", self.phase, phase);
            self.phase = phase;
            self.sink.on_status_changed(phase);
        }
    }

    fn report_error(&mut self, kind: ErrorKind) {
        self.last_error = kind;
        self.sink.on_error(kind);
    }

    fn invalid_state(&self, command: &'static str) -> Error {
        Error::InvalidState {
            command,
            phase: self.phase,
        }
    }

    fn status(&self) -> SessionStatus {
        SessionStatus {
            phase: self.phase,
            last_error: self.last_error,
            active_device: self.active.clone(),
            scanning: self.scanning,
            operation_in_flight: self.queue.is_in_flight(),
            queued_operations: self.queue.len(),
        }
    }

    async fn initialize(&mut self) -> Result<()> {
        if self.phase != Phase::Uninitialized {
            debug!("Session already initialized");
            return Ok(());
        }
        let failure = match self.transport.adapter_state().await? {
            AdapterState::PoweredOn => None,
            AdapterState::Unsupported => Some(ErrorKind::HardwareUnsupported),
            AdapterState::Unauthorized => Some(ErrorKind::PermissionDenied),
            AdapterState::PoweredOff | AdapterState::TurningOn | AdapterState::TurningOff => {
                Some(ErrorKind::HardwarePoweredOff)
            }
        };
        if let Some(kind) = failure {
            error!("Cannot initialize session: {:?}", kind);
            self.powered = false;
            self.report_error(kind);
            return Err(kind.into());
        }
        info!("Session initialized");
        self.powered = true;
        self.last_error = ErrorKind::NoError;
        self.set_phase(Phase::Initialized);
        Ok(())
    }

    async fn deinitialize(&mut self) -> Result<()> {
        if self.phase == Phase::Uninitialized {
            debug!("Session already deinitialized");
            return Ok(());
        }
        if let Some(device) = self.active.clone() {
            if let Err(err) = self.transport.disconnect().await {
                warn!("Failed to disconnect from {}: {}", device, err);
            }
            // The adapter is released below, so no disconnection callback will follow.
            self.sink.on_disconnected(&device);
            self.teardown_connection().await;
        }
        self.force_stop_scan().await;
        debug!("Forgetting scanned devices {:?}", self.cache.devices());
        self.cache.clear_devices();
        self.transport.release().await;
        info!("Session deinitialized");
        self.set_phase(Phase::Uninitialized);
        Ok(())
    }

    async fn start_scan(&mut self, filter: ScanFilter) -> Result<()> {
        if self.phase != Phase::Initialized {
            return Err(self.invalid_state("start scan"));
        }
        if !self.powered {
            return Err(Error::HardwarePoweredOff);
        }
        self.transport.start_scan(&filter).await?;
        info!(
            "Scanning for services {:?}",
            filter
                .services
                .iter()
                .map(|uuid| uuid.to_short_string())
                .collect::<Vec<_>>()
        );
        self.scanning = true;
        self.set_phase(Phase::Scanning);
        Ok(())
    }

    async fn stop_scan(&mut self) -> Result<()> {
        if !self.scanning {
            return Err(self.invalid_state("stop scan"));
        }
        self.transport.stop_scan().await?;
        info!("Scan stopped");
        self.scanning = false;
        if self.phase == Phase::Scanning {
            self.set_phase(Phase::Initialized);
        }
        Ok(())
    }

    // Stops a scan regardless of the outcome at the transport.
    async fn force_stop_scan(&mut self) {
        if !self.scanning {
            return;
        }
        if let Err(err) = self.transport.stop_scan().await {
            warn!("Failed to stop scan: {}", err);
        }
        self.scanning = false;
    }

    async fn connect(&mut self, device: DeviceId) -> Result<()> {
        if let Some(active) = &self.active {
            return Err(Error::AlreadyConnected(active.clone()));
        }
        if !matches!(self.phase, Phase::Initialized | Phase::Scanning) {
            return Err(self.invalid_state("connect"));
        }
        if !self.powered {
            return Err(Error::HardwarePoweredOff);
        }
        let handle = self
            .cache
            .lookup_device(&device)
            .ok_or_else(|| Error::DeviceNotFound(device.clone()))?;

        let previous = self.phase;
        self.active = Some(device.clone());
        self.set_phase(Phase::Connecting);
        if let Err(err) = self.transport.connect(&handle).await {
            self.active = None;
            self.set_phase(previous);
            return Err(err);
        }
        info!("Connecting to {}", device);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        let Some(device) = &self.active else {
            return Err(Error::NotConnected);
        };
        info!("Disconnecting from {}", device);
        self.transport.disconnect().await
    }

    async fn enqueue(
        &mut self,
        kind: OperationKind,
        characteristic: CharacteristicId,
        payload: Vec<u8>,
    ) -> Result<()> {
        if self.phase != Phase::Connected {
            return Err(Error::NotConnected);
        }
        let CachedCharacteristic {
            handle, properties, ..
        } = self
            .cache
            .lookup_characteristic(&characteristic)
            .ok_or_else(|| Error::CharacteristicNotFound(characteristic.to_string()))?;
        self.queue.enqueue(QueuedOperation {
            kind,
            characteristic,
            handle,
            properties,
            payload,
        })?;
        self.queue.try_dispatch_next(&self.transport).await;
        Ok(())
    }

    // Releases everything tied to the current connection.
    async fn teardown_connection(&mut self) {
        self.transport.close().await;
        self.cache.clear_characteristics();
        self.queue.clear();
        self.active = None;
    }

    fn on_scan_result(
        &mut self,
        device: DeviceId,
        name: Option<String>,
        rssi: i16,
        handle: T::Device,
    ) {
        if self.phase == Phase::Uninitialized {
            trace!("Ignoring scan result for {} before initialization", device);
            return;
        }
        let name = match name {
            Some(name) => name,
            None if self.config.ignore_unnamed_devices => {
                trace!("Ignoring unnamed device {}", device);
                return;
            }
            None => String::new(),
        };
        self.cache.record_device(device.clone(), handle);
        self.sink.on_scan_result(&name, rssi, &device);
    }

    async fn on_connected(&mut self) {
        let Some(device) = self.active.clone().filter(|_| self.phase == Phase::Connecting) else {
            warn!("Ignoring connection while {:?}", self.phase);
            return;
        };
        info!("Connected to {}", device);
        self.set_phase(Phase::Connected);
        self.sink.on_connected(&device);
        if let Err(err) = self.transport.discover_services().await {
            error!("Failed to start service discovery on {}: {}", device, err);
        }
    }

    async fn on_disconnected(&mut self, status: GattStatus) {
        let Some(device) = self.active.clone() else {
            debug!("Ignoring disconnection without an active connection");
            return;
        };
        if status.is_success() {
            info!("Disconnected from {}", device);
            let phase = if self.scanning {
                Phase::Scanning
            } else {
                Phase::Initialized
            };
            self.set_phase(phase);
            self.sink.on_disconnected(&device);
        } else {
            error!("Connection to {} failed with GATT status {}", device, status);
            // Leave the radio idle after a failure.
            if let Err(err) = self.transport.stop_scan().await {
                warn!("Failed to stop scan: {}", err);
            }
            self.scanning = false;
            self.set_phase(Phase::Initialized);
            self.sink.on_connect_error(&device);
        }
        self.teardown_connection().await;
    }

    fn on_services_discovered(
        &mut self,
        status: GattStatus,
        characteristics: Vec<DiscoveredCharacteristic<T::Characteristic>>,
    ) {
        if self.phase != Phase::Connected {
            warn!("Ignoring service discovery while {:?}", self.phase);
            return;
        }
        if !status.is_success() {
            error!("Service discovery failed with GATT status {}", status);
            return;
        }
        for discovered in characteristics {
            self.sink
                .on_characteristic_discovered(&discovered.service, &discovered.uuid);
            self.cache.record_characteristic(
                discovered.uuid,
                CachedCharacteristic {
                    service: discovered.service,
                    properties: discovered.properties,
                    handle: discovered.handle,
                },
            );
        }
        info!("Characteristics available: {:?}", self.cache.characteristics());
    }

    fn forward_update(&self, characteristic: &CharacteristicId, value: &[u8]) {
        match &self.active {
            Some(device) if self.phase == Phase::Connected => {
                self.sink
                    .on_characteristic_update(characteristic, value, device)
            }
            _ => trace!(
                "Dropping value of {} outside of a connection",
                characteristic
            ),
        }
    }

    async fn on_operation_complete(
        &mut self,
        kind: OperationKind,
        characteristic: &CharacteristicId,
        status: GattStatus,
    ) {
        if !status.is_success() {
            warn!(
                "{} of {} completed with GATT status {}",
                kind, characteristic, status
            );
        }
        if self.queue.complete(kind, characteristic) {
            self.queue.try_dispatch_next(&self.transport).await;
        }
    }

    async fn on_operation_timeout(&mut self) {
        if let Some((kind, characteristic)) = self.queue.expire() {
            warn!("{} of {} timed out", kind, characteristic);
            self.report_error(ErrorKind::OperationTimedOut);
            self.queue.try_dispatch_next(&self.transport).await;
        }
    }

    async fn on_adapter_state_changed(&mut self, state: AdapterState) {
        let kind = match state {
            AdapterState::PoweredOn => {
                info!("Adapter powered on");
                self.powered = true;
                return;
            }
            AdapterState::TurningOn | AdapterState::TurningOff => {
                debug!("Adapter is {:?}", state);
                return;
            }
            AdapterState::PoweredOff => ErrorKind::HardwarePoweredOff,
            AdapterState::Unsupported => ErrorKind::HardwareUnsupported,
            AdapterState::Unauthorized => ErrorKind::PermissionDenied,
        };
        warn!("Adapter lost: {:?}", state);
        self.powered = false;
        if self.phase == Phase::Uninitialized {
            return;
        }
        if let Some(device) = self.active.clone() {
            self.sink.on_connect_error(&device);
            self.teardown_connection().await;
        }
        self.scanning = false;
        self.set_phase(Phase::Initialized);
        self.report_error(kind);
    }
}

fn reply<R>(responder: oneshot::Sender<Result<R>>, result: Result<R>) {
    if let Err(err) = &result {
        error!("Command rejected: {}", err);
    }
    if responder.send(result).is_err() {
        trace!("Command caller went away before the reply");
    }
}
