// gattlink Source Code File
//
// Copyright 2020 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Fans session events out to any number of host-side listeners.

use crate::api::{EventSink, SessionEvent};
use crate::constants::DEFAULT_EVENT_CHANNEL_CAPACITY;
use futures::stream::{Stream, StreamExt};
use log::{trace, warn};
use std::pin::Pin;
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};

/// An [`EventSink`] which queues events for the host to pull, instead of calling back into it
/// from the session's event loop. Every stream returned by [`event_stream`] sees every event
/// emitted after it was created.
///
/// [`event_stream`]: EventBroadcaster::event_stream
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    events_channel: broadcast::Sender<SessionEvent>,
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        EventBroadcaster::with_capacity(DEFAULT_EVENT_CHANNEL_CAPACITY)
    }
}

impl EventBroadcaster {
    /// A listener falling more than `capacity` events behind loses the oldest ones.
    pub fn with_capacity(capacity: usize) -> Self {
        let (broadcast_sender, _) = broadcast::channel(capacity);
        EventBroadcaster {
            events_channel: broadcast_sender,
        }
    }

    pub fn event_stream(&self) -> Pin<Box<dyn Stream<Item = SessionEvent> + Send>> {
        let receiver = self.events_channel.subscribe();
        Box::pin(
            BroadcastStream::new(receiver).filter_map(|x| async move {
                match x {
                    Ok(event) => Some(event),
                    Err(BroadcastStreamRecvError::Lagged(lost)) => {
                        warn!("Event listener lagged behind, {} session events lost", lost);
                        None
                    }
                }
            }),
        )
    }

    pub fn listener_count(&self) -> usize {
        self.events_channel.receiver_count()
    }
}

impl EventSink for EventBroadcaster {
    fn emit(&self, event: SessionEvent) {
        if let Err(lost) = self.events_channel.send(event) {
            trace!("Lost session event, while nothing subscribed: {:?}", lost);
        }
    }
}
