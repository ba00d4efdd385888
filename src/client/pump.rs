//! Event pump
//!
//! Drains the daemon's change notifications into the client-side snapshot.
//! Never waits for new events; blocking is layered on top by the waiter and
//! the async bridge.

use tokio::sync::mpsc::{self, error::TryRecvError};

use crate::service::{Notification, Snapshot};

pub struct EventPump {
    rx: mpsc::UnboundedReceiver<Notification>,
    snapshot: Snapshot,
    closed: bool,
}

impl EventPump {
    pub fn new(rx: mpsc::UnboundedReceiver<Notification>, snapshot: Snapshot) -> Self {
        Self {
            rx,
            snapshot,
            closed: false,
        }
    }

    /// Dispatch every queued notification, returning how many were applied
    pub fn pump_pending(&mut self) -> usize {
        let mut applied = 0;
        loop {
            match self.rx.try_recv() {
                Ok(notification) => {
                    tracing::trace!(?notification, "Dispatching");
                    self.snapshot.apply(notification);
                    applied += 1;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !self.closed {
                        tracing::warn!("Notification stream closed, state will no longer change");
                        self.closed = true;
                    }
                    break;
                }
            }
        }
        applied
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Whether the service stopped publishing notifications
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}
