// gattlink Source Code File
//
// Copyright 2020 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use dashmap::DashMap;
use log::{debug, trace};

use crate::api::{CharPropFlags, CharacteristicId, DeviceId};

/// A characteristic of the active connection, as recorded by service discovery.
#[derive(Debug, Clone)]
pub struct CachedCharacteristic<C> {
    pub service: String,
    pub properties: CharPropFlags,
    pub handle: C,
}

/// Maps identifiers handed out to the host back to the transport's handles.
///
/// Only the session's event loop writes to the cache. The device map is additionally readable
/// from the public session handle through [`EntityCache::device_view`].
#[derive(Debug)]
pub struct EntityCache<D, C> {
    devices: Arc<DashMap<DeviceId, D>>,
    // Sighting stamps, least recently seen first. Only maintained when a device limit is set.
    device_order: BTreeMap<u64, DeviceId>,
    last_seen: HashMap<DeviceId, u64>,
    next_stamp: u64,
    device_limit: Option<usize>,
    characteristics: HashMap<CharacteristicId, CachedCharacteristic<C>>,
}

impl<D: Clone, C: Clone> EntityCache<D, C> {
    pub fn new(device_limit: Option<usize>) -> Self {
        EntityCache {
            devices: Arc::new(DashMap::new()),
            device_order: BTreeMap::new(),
            last_seen: HashMap::new(),
            next_stamp: 0,
            device_limit,
            characteristics: HashMap::new(),
        }
    }

    pub fn device_view(&self) -> Arc<DashMap<DeviceId, D>> {
        self.devices.clone()
    }

    /// Inserts or replaces the handle for `id`.
    pub fn record_device(&mut self, id: DeviceId, handle: D) {
        if let Some(limit) = self.device_limit {
            if let Some(stamp) = self.last_seen.remove(&id) {
                self.device_order.remove(&stamp);
            } else if self.last_seen.len() >= limit {
                if let Some((_, evicted)) = self.device_order.pop_first() {
                    debug!("Device cache full, forgetting {}", evicted);
                    self.last_seen.remove(&evicted);
                    self.devices.remove(&evicted);
                }
            }
            self.device_order.insert(self.next_stamp, id.clone());
            self.last_seen.insert(id.clone(), self.next_stamp);
            self.next_stamp += 1;
        }
        self.devices.insert(id, handle);
    }

    pub fn lookup_device(&self, id: &DeviceId) -> Option<D> {
        self.devices.get(id).map(|entry| entry.value().clone())
    }

    pub fn devices(&self) -> Vec<DeviceId> {
        let mut ids: Vec<_> = self.devices.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn clear_devices(&mut self) {
        self.devices.clear();
        self.device_order.clear();
        self.last_seen.clear();
    }

    /// Inserts or replaces the characteristic `id`. A UUID exposed by two services keeps only the
    /// entry recorded last.
    pub fn record_characteristic(&mut self, id: CharacteristicId, entry: CachedCharacteristic<C>) {
        if let Some(previous) = self.characteristics.insert(id.clone(), entry) {
            trace!(
                "Characteristic {} of service {} replaced by a later discovery",
                id,
                previous.service
            );
        }
    }

    pub fn lookup_characteristic(&self, id: &CharacteristicId) -> Option<CachedCharacteristic<C>> {
        self.characteristics.get(id).cloned()
    }

    pub fn characteristics(&self) -> Vec<CharacteristicId> {
        let mut ids: Vec<_> = self.characteristics.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn clear_characteristics(&mut self) {
        self.characteristics.clear();
    }
}
