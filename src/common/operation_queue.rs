// gattlink Source Code File
//
// Copyright 2020 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

use std::collections::VecDeque;
use std::fmt::Debug;
use std::time::Duration;

use log::{debug, trace, warn};
use tokio::time::Instant;

use crate::api::{CharPropFlags, CharacteristicId, OperationKind, Transport};
use crate::constants::{
    CLIENT_CHARACTERISTIC_CONFIGURATION_UUID, ENABLE_INDICATION_VALUE, ENABLE_NOTIFICATION_VALUE,
};
use crate::{Error, Result};

/// A GATT operation waiting for its turn on the link.
#[derive(Debug, Clone)]
pub struct QueuedOperation<C> {
    pub kind: OperationKind,
    pub characteristic: CharacteristicId,
    pub handle: C,
    pub properties: CharPropFlags,
    /// Bytes to write. Empty for reads and subscriptions.
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone)]
struct InFlight {
    kind: OperationKind,
    characteristic: CharacteristicId,
    deadline: Option<Instant>,
}

/// Bounded FIFO of GATT operations of which at most one is outstanding at the transport.
#[derive(Debug)]
pub struct OperationQueue<C> {
    pending: VecDeque<QueuedOperation<C>>,
    capacity: usize,
    in_flight: Option<InFlight>,
    // Operations given up on which the transport may still complete.
    expired: Vec<(OperationKind, CharacteristicId)>,
    timeout: Option<Duration>,
}

impl<C: Clone + Debug + Send + Sync> OperationQueue<C> {
    pub fn new(capacity: usize, timeout: Option<Duration>) -> Self {
        OperationQueue {
            pending: VecDeque::new(),
            capacity,
            in_flight: None,
            expired: Vec::new(),
            timeout,
        }
    }

    /// Appends `operation`, or rejects it when `capacity` operations are already waiting.
    pub fn enqueue(&mut self, operation: QueuedOperation<C>) -> Result<()> {
        if self.pending.len() >= self.capacity {
            return Err(Error::QueueFull {
                capacity: self.capacity,
            });
        }
        trace!(
            "Queued {} of {} ({} waiting)",
            operation.kind,
            operation.characteristic,
            self.pending.len()
        );
        self.pending.push_back(operation);
        Ok(())
    }

    /// Number of operations waiting, not counting the one in flight.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// When the operation in flight gives up waiting for its completion.
    pub fn deadline(&self) -> Option<Instant> {
        self.in_flight.as_ref().and_then(|op| op.deadline)
    }

    /// Marks the operation in flight as done if it is a `kind` on `characteristic`. Returns
    /// whether it was.
    ///
    /// The first completion matching an expired operation is consumed by that operation, even
    /// when an identical operation has since been dispatched.
    pub fn complete(&mut self, kind: OperationKind, characteristic: &CharacteristicId) -> bool {
        if let Some(index) = self
            .expired
            .iter()
            .position(|(k, c)| *k == kind && c == characteristic)
        {
            self.expired.remove(index);
            debug!("Late {} completion of {}", kind, characteristic);
            return false;
        }
        match &self.in_flight {
            Some(op) if op.kind == kind && op.characteristic == *characteristic => {
                trace!("Completed {} of {}", kind, characteristic);
                self.in_flight = None;
                true
            }
            Some(op) => {
                warn!(
                    "Ignoring {} completion of {}, waiting for {} of {}",
                    kind, characteristic, op.kind, op.characteristic
                );
                false
            }
            None => {
                warn!(
                    "Ignoring {} completion of {}, nothing in flight",
                    kind, characteristic
                );
                false
            }
        }
    }

    /// Abandons the operation in flight, returning what it was.
    pub fn expire(&mut self) -> Option<(OperationKind, CharacteristicId)> {
        let op = self.in_flight.take()?;
        self.expired.push((op.kind, op.characteristic.clone()));
        Some((op.kind, op.characteristic))
    }

    /// Drops every waiting operation and forgets the one in flight.
    pub fn clear(&mut self) {
        if !self.pending.is_empty() || self.in_flight.is_some() {
            debug!(
                "Dropping {} queued operations{}",
                self.pending.len(),
                if self.in_flight.is_some() {
                    " and the one in flight"
                } else {
                    ""
                }
            );
        }
        self.pending.clear();
        self.in_flight = None;
        self.expired.clear();
    }

    /// Hands the next waiting operation to the transport, unless one is already in flight.
    /// Operations the transport refuses are dropped and the next one is tried.
    pub async fn try_dispatch_next<T>(&mut self, transport: &T)
    where
        T: Transport<Characteristic = C>,
    {
        while self.in_flight.is_none() {
            let Some(operation) = self.pending.pop_front() else {
                return;
            };
            self.in_flight = Some(InFlight {
                kind: operation.kind,
                characteristic: operation.characteristic.clone(),
                deadline: self
                    .timeout
                    .and_then(|timeout| Instant::now().checked_add(timeout)),
            });
            debug!(
                "Dispatching {} of {}",
                operation.kind, operation.characteristic
            );
            if let Err(err) = dispatch(transport, &operation).await {
                warn!(
                    "Failed to dispatch {} of {}: {}",
                    operation.kind, operation.characteristic, err
                );
                self.in_flight = None;
            }
        }
    }
}

async fn dispatch<T: Transport>(
    transport: &T,
    operation: &QueuedOperation<T::Characteristic>,
) -> Result<()> {
    match operation.kind {
        OperationKind::Read => transport.read_characteristic(&operation.handle).await,
        OperationKind::Write => {
            transport
                .write_characteristic(&operation.handle, &operation.payload)
                .await
        }
        OperationKind::Subscribe => {
            let value = if operation.properties.contains(CharPropFlags::NOTIFY) {
                ENABLE_NOTIFICATION_VALUE
            } else if operation.properties.contains(CharPropFlags::INDICATE) {
                ENABLE_INDICATION_VALUE
            } else {
                return Err(Error::NotSupported(format!(
                    "{} supports neither notifications nor indications",
                    operation.characteristic
                )));
            };
            transport.set_notification(&operation.handle, true).await?;
            transport
                .write_descriptor(
                    &operation.handle,
                    CLIENT_CHARACTERISTIC_CONFIGURATION_UUID,
                    &value,
                )
                .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{Call, MockTransport};
    use rand::Rng;

    fn operation(kind: OperationKind, handle: u16) -> QueuedOperation<u16> {
        QueuedOperation {
            kind,
            characteristic: CharacteristicId::new(&format!("{:04X}", handle)),
            handle,
            properties: CharPropFlags::READ | CharPropFlags::WRITE | CharPropFlags::NOTIFY,
            payload: if kind == OperationKind::Write {
                vec![handle as u8]
            } else {
                vec![]
            },
        }
    }

    fn expected_calls(operation: &QueuedOperation<u16>) -> Vec<Call> {
        match operation.kind {
            OperationKind::Read => vec![Call::Read(operation.handle)],
            OperationKind::Write => vec![Call::Write(operation.handle, operation.payload.clone())],
            OperationKind::Subscribe => vec![
                Call::SetNotification(operation.handle, true),
                Call::WriteDescriptor(
                    operation.handle,
                    CLIENT_CHARACTERISTIC_CONFIGURATION_UUID,
                    ENABLE_NOTIFICATION_VALUE.to_vec(),
                ),
            ],
        }
    }

    #[tokio::test]
    async fn dispatches_in_fifo_order() {
        let transport = MockTransport::default();
        let mut queue = OperationQueue::new(64, None);
        let mut rng = rand::rng();
        let operations: Vec<_> = (0..32)
            .map(|handle| {
                let kind = match rng.random_range(0..3) {
                    0 => OperationKind::Read,
                    1 => OperationKind::Write,
                    _ => OperationKind::Subscribe,
                };
                operation(kind, handle)
            })
            .collect();
        for op in &operations {
            queue.enqueue(op.clone()).unwrap();
        }

        for op in &operations {
            queue.try_dispatch_next(&transport).await;
            assert!(queue.is_in_flight());
            assert_eq!(transport.take_calls(), expected_calls(op));
            // Nothing else goes out while one is in flight.
            queue.try_dispatch_next(&transport).await;
            assert!(transport.take_calls().is_empty());
            assert!(queue.complete(op.kind, &op.characteristic));
        }
        assert!(!queue.is_in_flight());
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn enqueue_at_capacity_is_rejected() {
        let mut queue = OperationQueue::new(2, None);
        queue.enqueue(operation(OperationKind::Read, 1)).unwrap();
        queue.enqueue(operation(OperationKind::Read, 2)).unwrap();
        assert!(matches!(
            queue.enqueue(operation(OperationKind::Read, 3)),
            Err(Error::QueueFull { capacity: 2 })
        ));
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn refused_dispatch_moves_on() {
        let transport = MockTransport::default();
        transport.fail_handle(1);
        let mut queue = OperationQueue::new(8, None);
        queue.enqueue(operation(OperationKind::Read, 1)).unwrap();
        queue.enqueue(operation(OperationKind::Write, 2)).unwrap();

        queue.try_dispatch_next(&transport).await;
        assert_eq!(
            transport.take_calls(),
            vec![Call::Read(1), Call::Write(2, vec![2])]
        );
        assert!(queue.is_in_flight());
        assert_eq!(queue.len(), 0);
        assert!(queue.complete(OperationKind::Write, &"0002".into()));
    }

    #[tokio::test]
    async fn subscribe_falls_back_to_indication() {
        let transport = MockTransport::default();
        let mut queue = OperationQueue::new(8, None);
        let mut indicate_only = operation(OperationKind::Subscribe, 5);
        indicate_only.properties = CharPropFlags::INDICATE;
        let mut neither = operation(OperationKind::Subscribe, 6);
        neither.properties = CharPropFlags::READ;
        queue.enqueue(neither).unwrap();
        queue.enqueue(indicate_only).unwrap();

        queue.try_dispatch_next(&transport).await;
        // The characteristic without notify or indicate never reaches the transport.
        assert_eq!(
            transport.take_calls(),
            vec![
                Call::SetNotification(5, true),
                Call::WriteDescriptor(
                    5,
                    CLIENT_CHARACTERISTIC_CONFIGURATION_UUID,
                    ENABLE_INDICATION_VALUE.to_vec()
                ),
            ]
        );
    }

    #[tokio::test]
    async fn mismatched_completion_keeps_operation_in_flight() {
        let transport = MockTransport::default();
        let mut queue = OperationQueue::new(8, None);
        queue.enqueue(operation(OperationKind::Read, 1)).unwrap();
        queue.try_dispatch_next(&transport).await;

        assert!(!queue.complete(OperationKind::Write, &"0001".into()));
        assert!(!queue.complete(OperationKind::Read, &"0002".into()));
        assert!(queue.is_in_flight());
        assert!(queue.complete(OperationKind::Read, &"0001".into()));
        assert!(!queue.complete(OperationKind::Read, &"0001".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_follows_timeout() {
        let transport = MockTransport::default();
        let mut queue = OperationQueue::new(8, Some(Duration::from_secs(10)));
        assert_eq!(queue.deadline(), None);
        queue.enqueue(operation(OperationKind::Read, 1)).unwrap();
        let start = Instant::now();
        queue.try_dispatch_next(&transport).await;
        assert_eq!(queue.deadline(), Some(start + Duration::from_secs(10)));

        assert_eq!(
            queue.expire(),
            Some((OperationKind::Read, CharacteristicId::from("0001")))
        );
        assert_eq!(queue.deadline(), None);
        assert!(!queue.is_in_flight());
    }

    #[tokio::test]
    async fn late_completion_does_not_release_repeated_operation() {
        let transport = MockTransport::default();
        let mut queue = OperationQueue::new(8, None);
        queue.enqueue(operation(OperationKind::Read, 1)).unwrap();
        queue.try_dispatch_next(&transport).await;
        queue.expire();

        queue.enqueue(operation(OperationKind::Read, 1)).unwrap();
        queue.enqueue(operation(OperationKind::Write, 2)).unwrap();
        queue.try_dispatch_next(&transport).await;
        assert_eq!(transport.take_calls(), vec![Call::Read(1), Call::Read(1)]);

        // Belongs to the first read.
        assert!(!queue.complete(OperationKind::Read, &"0001".into()));
        assert!(queue.is_in_flight());
        queue.try_dispatch_next(&transport).await;
        assert!(transport.take_calls().is_empty());

        assert!(queue.complete(OperationKind::Read, &"0001".into()));
        queue.try_dispatch_next(&transport).await;
        assert_eq!(transport.take_calls(), vec![Call::Write(2, vec![2])]);
    }

    #[tokio::test]
    async fn unrepresentable_deadline_is_dropped() {
        let transport = MockTransport::default();
        let mut queue = OperationQueue::new(8, Some(Duration::MAX));
        queue.enqueue(operation(OperationKind::Read, 1)).unwrap();
        queue.try_dispatch_next(&transport).await;
        assert!(queue.is_in_flight());
        assert_eq!(queue.deadline(), None);
    }

    #[tokio::test]
    async fn clear_drops_everything() {
        let transport = MockTransport::default();
        let mut queue = OperationQueue::new(8, None);
        queue.enqueue(operation(OperationKind::Read, 1)).unwrap();
        queue.enqueue(operation(OperationKind::Read, 2)).unwrap();
        queue.try_dispatch_next(&transport).await;
        queue.clear();
        assert!(!queue.is_in_flight());
        assert_eq!(queue.len(), 0);
        queue.try_dispatch_next(&transport).await;
        assert_eq!(transport.calls(), vec![Call::Read(1)]);
    }
}
