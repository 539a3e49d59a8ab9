//! Bounded per-category event queues between line readers and the aggregator.
//!
//! Publishing never waits: when a queue is full the event is dropped. Delivery
//! is therefore best effort, which keeps slow aggregation from stalling the
//! readers of the crawler's output.

use tokio::sync::mpsc;

use super::types::*;

/// Reference queue capacity per event category
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Producer side, cloned into every line reader
#[derive(Debug, Clone)]
pub struct EventPublisher {
    connection: mpsc::Sender<ConnectionEvent>,
    handshake: mpsc::Sender<HandshakeEvent>,
    goodbye: mpsc::Sender<GoodbyeEvent>,
    error: mpsc::Sender<ErrorEvent>,
}

impl EventPublisher {
    /// Queue an event without blocking; returns false if it was dropped
    pub fn publish(&self, event: Event) -> bool {
        match event {
            Event::Connection(e) => offer(&self.connection, e),
            Event::Handshake(e) => offer(&self.handshake, e),
            Event::Goodbye(e) => offer(&self.goodbye, e),
            Event::Error(e) => offer(&self.error, e),
        }
    }
}

fn offer<T>(queue: &mpsc::Sender<T>, item: T) -> bool {
    queue.try_send(item).is_ok()
}

/// Consumer side, owned by the aggregator
#[derive(Debug)]
pub struct EventQueues {
    pub connection: mpsc::Receiver<ConnectionEvent>,
    pub handshake: mpsc::Receiver<HandshakeEvent>,
    pub goodbye: mpsc::Receiver<GoodbyeEvent>,
    pub error: mpsc::Receiver<ErrorEvent>,
}

impl EventQueues {
    /// Take one already-queued event, if any, without waiting
    pub fn try_next(&mut self) -> Option<Event> {
        if let Ok(e) = self.connection.try_recv() {
            return Some(Event::Connection(e));
        }
        if let Ok(e) = self.handshake.try_recv() {
            return Some(Event::Handshake(e));
        }
        if let Ok(e) = self.goodbye.try_recv() {
            return Some(Event::Goodbye(e));
        }
        if let Ok(e) = self.error.try_recv() {
            return Some(Event::Error(e));
        }
        None
    }

    /// Number of events currently buffered across all queues
    pub fn len(&self) -> usize {
        self.connection.len() + self.handshake.len() + self.goodbye.len() + self.error.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Create the four queues, each holding at most `capacity` events
pub fn bounded(capacity: usize) -> (EventPublisher, EventQueues) {
    let capacity = if capacity == 0 {
        log::warn!("Queue capacity of 0 requested, using 1");
        1
    } else {
        capacity
    };

    let (connection_tx, connection_rx) = mpsc::channel(capacity);
    let (handshake_tx, handshake_rx) = mpsc::channel(capacity);
    let (goodbye_tx, goodbye_rx) = mpsc::channel(capacity);
    let (error_tx, error_rx) = mpsc::channel(capacity);

    (
        EventPublisher {
            connection: connection_tx,
            handshake: handshake_tx,
            goodbye: goodbye_tx,
            error: error_tx,
        },
        EventQueues {
            connection: connection_rx,
            handshake: handshake_rx,
            goodbye: goodbye_rx,
            error: error_rx,
        },
    )
}
