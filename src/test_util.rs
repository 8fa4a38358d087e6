// gattlink Source Code File
//
// Copyright 2020 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! In-memory transport and sink used by the unit tests.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use uuid::Uuid;

use crate::api::{AdapterState, EventSink, ScanFilter, SessionEvent, Transport};
use crate::{Error, Result};

/// A request the session made of the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    AdapterState,
    StartScan(ScanFilter),
    StopScan,
    Connect(String),
    Disconnect,
    Close,
    DiscoverServices,
    Read(u16),
    Write(u16, Vec<u8>),
    SetNotification(u16, bool),
    WriteDescriptor(u16, Uuid, Vec<u8>),
    Release,
}

#[derive(Debug)]
struct MockState {
    calls: Vec<Call>,
    adapter: AdapterState,
    fail_connect: bool,
    fail_start_scan: bool,
    failing_handles: HashSet<u16>,
}

/// Records every call and accepts it, unless told to refuse. Devices are addressed by their id
/// string, characteristics by a numeric handle.
#[derive(Debug, Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        MockTransport {
            state: Arc::new(Mutex::new(MockState {
                calls: Vec::new(),
                adapter: AdapterState::PoweredOn,
                fail_connect: false,
                fail_start_scan: false,
                failing_handles: HashSet::new(),
            })),
        }
    }
}

impl MockTransport {
    pub fn set_adapter_state(&self, adapter: AdapterState) {
        self.state.lock().unwrap().adapter = adapter;
    }

    pub fn fail_connect(&self, fail: bool) {
        self.state.lock().unwrap().fail_connect = fail;
    }

    pub fn fail_start_scan(&self, fail: bool) {
        self.state.lock().unwrap().fail_start_scan = fail;
    }

    /// Reads, writes and notification changes of `handle` are refused.
    pub fn fail_handle(&self, handle: u16) {
        self.state.lock().unwrap().failing_handles.insert(handle);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Returns the calls recorded so far and forgets them.
    pub fn take_calls(&self) -> Vec<Call> {
        std::mem::take(&mut self.state.lock().unwrap().calls)
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn check_handle(&self, handle: u16) -> Result<()> {
        if self.state.lock().unwrap().failing_handles.contains(&handle) {
            return Err(Error::Other(format!("handle {} refused", handle).into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Device = String;
    type Characteristic = u16;

    async fn adapter_state(&self) -> Result<AdapterState> {
        self.record(Call::AdapterState);
        Ok(self.state.lock().unwrap().adapter)
    }

    async fn start_scan(&self, filter: &ScanFilter) -> Result<()> {
        self.record(Call::StartScan(filter.clone()));
        if self.state.lock().unwrap().fail_start_scan {
            return Err(Error::Other("scan refused".into()));
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.record(Call::StopScan);
        Ok(())
    }

    async fn connect(&self, device: &String) -> Result<()> {
        self.record(Call::Connect(device.clone()));
        if self.state.lock().unwrap().fail_connect {
            return Err(Error::Other("connect refused".into()));
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.record(Call::Disconnect);
        Ok(())
    }

    async fn close(&self) {
        self.record(Call::Close);
    }

    async fn discover_services(&self) -> Result<()> {
        self.record(Call::DiscoverServices);
        Ok(())
    }

    async fn read_characteristic(&self, characteristic: &u16) -> Result<()> {
        self.record(Call::Read(*characteristic));
        self.check_handle(*characteristic)
    }

    async fn write_characteristic(&self, characteristic: &u16, data: &[u8]) -> Result<()> {
        self.record(Call::Write(*characteristic, data.to_vec()));
        self.check_handle(*characteristic)
    }

    async fn set_notification(&self, characteristic: &u16, enabled: bool) -> Result<()> {
        self.record(Call::SetNotification(*characteristic, enabled));
        self.check_handle(*characteristic)
    }

    async fn write_descriptor(
        &self,
        characteristic: &u16,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<()> {
        self.record(Call::WriteDescriptor(
            *characteristic,
            descriptor,
            value.to_vec(),
        ));
        Ok(())
    }

    async fn release(&self) {
        self.record(Call::Release);
    }
}

/// Collects every event the session emits.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<SessionEvent>>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn take(&self) -> Vec<SessionEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: SessionEvent) {
        self.events.lock().unwrap().push(event);
    }
}
