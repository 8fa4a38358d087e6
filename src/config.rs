// gattlink Source Code File
//
// Copyright 2020 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Tunables of a [`Session`](crate::Session).

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
#[cfg(feature = "serde")]
use serde_cr as serde;

use crate::constants::{DEFAULT_OPERATION_TIMEOUT_MS, DEFAULT_QUEUE_CAPACITY};
use crate::{Error, Result};

#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_cr", default)
)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Maximum number of GATT operations waiting behind the one in flight.
    pub queue_capacity: usize,
    /// How long a dispatched operation may wait for its completion callback before the queue
    /// moves on. `None` waits forever.
    pub operation_timeout_ms: Option<u64>,
    /// Upper bound on the number of scanned devices kept for connecting. When reached, the device
    /// seen least recently is forgotten. `None` keeps every device until the session is
    /// deinitialized.
    pub device_cache_limit: Option<usize>,
    /// Scan results without an advertised name are neither cached nor reported.
    pub ignore_unnamed_devices: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            operation_timeout_ms: Some(DEFAULT_OPERATION_TIMEOUT_MS),
            device_cache_limit: None,
            ignore_unnamed_devices: true,
        }
    }
}

impl SessionConfig {
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.operation_timeout_ms =
            timeout.map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn with_device_cache_limit(mut self, limit: Option<usize>) -> Self {
        self.device_cache_limit = limit;
        self
    }

    pub fn with_ignore_unnamed_devices(mut self, ignore: bool) -> Self {
        self.ignore_unnamed_devices = ignore;
        self
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(Error::InvalidConfig(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.operation_timeout_ms == Some(0) {
            return Err(Error::InvalidConfig(
                "operation_timeout_ms must be positive, use None to disable".to_string(),
            ));
        }
        if self.device_cache_limit == Some(0) {
            return Err(Error::InvalidConfig(
                "device_cache_limit must be at least 1, use None for no limit".to_string(),
            ));
        }
        Ok(())
    }
}
