// gattlink Source Code File
//
// Copyright 2020 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! gattlink is a controller for a single Bluetooth Low Energy GATT connection. It sits between a
//! host application and a platform BLE stack, and makes sure that the stack never sees more than
//! one outstanding GATT operation at a time.
//!
//! The platform stack is consumed through the [`api::Transport`] trait, the host is informed
//! through an [`api::EventSink`], and everything in between is owned by a [`Session`].
//!
//! ## Usage
//!
//! ```no_run
//! # use gattlink::api::{EventSink, ScanFilter, Transport};
//! # use gattlink::{EventBroadcaster, Session, SessionConfig};
//! # async fn run<T: Transport>(transport: T) -> gattlink::Result<()> {
//! let events = EventBroadcaster::default();
//! let session = Session::new(transport, events.clone(), SessionConfig::default())?;
//!
//! session.initialize().await?;
//! session.start_scan(ScanFilter::parse("180d")?).await?;
//! # Ok(())
//! # }
//! ```
//!
//! Transport implementations hand their asynchronous callbacks back to the session through the
//! [`api::TransportEventSender`] returned by [`Session::event_sender`].

use static_assertions::assert_impl_all;

use crate::api::{DeviceId, ErrorKind, EventSink, Phase, TransportEventSender};

pub mod api;
mod common;
pub mod config;
pub mod constants;
pub mod session;

#[cfg(test)]
mod test_util;

pub use common::event_broadcaster::EventBroadcaster;
pub use config::SessionConfig;
pub use session::{Session, SessionStatus};

/// The main error type returned by most methods in gattlink.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Permission denied")]
    PermissionDenied,

    #[error("Bluetooth LE is not supported by this device")]
    HardwareUnsupported,

    #[error("Bluetooth adapter is powered off")]
    HardwarePoweredOff,

    #[error("Cannot {command} while the session is {phase:?}")]
    InvalidState {
        command: &'static str,
        phase: Phase,
    },

    #[error("Already connected to {0}")]
    AlreadyConnected(DeviceId),

    #[error("Not connected")]
    NotConnected,

    #[error("Device {0} not found")]
    DeviceNotFound(DeviceId),

    #[error("Characteristic {0} not found")]
    CharacteristicNotFound(String),

    #[error("Operation queue is full ({capacity} entries)")]
    QueueFull { capacity: usize },

    #[error("The operation is not supported: {}", _0)]
    NotSupported(String),

    #[error("Invalid UUID {0:?}")]
    InvalidUuid(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("The session event loop has stopped")]
    SessionClosed,

    #[error("{}", _0)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::HardwareUnsupported => Error::HardwareUnsupported,
            ErrorKind::HardwarePoweredOff => Error::HardwarePoweredOff,
            ErrorKind::PermissionDenied => Error::PermissionDenied,
            other => Error::Other(format!("{:?}", other).into()),
        }
    }
}

/// Convenience type for a result using the gattlink [`Error`] type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

assert_impl_all!(Error: Send, Sync);
assert_impl_all!(EventBroadcaster: EventSink, Clone, Send, Sync);
assert_impl_all!(SessionStatus: Clone, Send, Sync);
assert_impl_all!(TransportEventSender<String, u16>: Clone, Send, Sync);
