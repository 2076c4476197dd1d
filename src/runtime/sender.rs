//! Broadcast sender with watchdog monitoring for deadlock detection

use crossbeam_channel::{SendError, Sender as CrossbeamSender};

use super::watchdog::{OperationGuard, WatchdogHandle};

/// Channel message wrapper for end-of-stream signaling
///
/// Wraps data flowing through channels so producers can explicitly signal
/// when no more data will be sent. A capture has a definite end; without an
/// in-band marker a downstream node blocked on `recv()` could only learn of
/// it from a channel disconnect, which a still-held `Sender` clone prevents.
///
/// Nodes never see this enum directly — `Sender::send()` wraps values in
/// `Item(T)` and `Receiver::recv()` unwraps them transparently.
#[derive(Clone, Debug)]
pub enum ChannelMessage<T> {
    /// A data item
    Item(T),
    /// End-of-stream marker — no more data will be sent
    EndOfStream,
}

/// Broadcast sender that sends to one or more consumers
///
/// Direct broadcast from the caller's thread to all destinations, with
/// watchdog monitoring to detect blocked sends.
pub struct Sender<T> {
    destinations: Vec<CrossbeamSender<ChannelMessage<T>>>,
    watchdog_handle: Option<WatchdogHandle>,
}

impl<T: Clone> Sender<T> {
    /// Create a new Sender from a vector of crossbeam senders
    pub fn new(destinations: Vec<CrossbeamSender<ChannelMessage<T>>>) -> Self {
        Self {
            destinations,
            watchdog_handle: None,
        }
    }

    /// Attach a watchdog handle to monitor send operations
    pub fn with_watchdog(&self, watchdog_handle: WatchdogHandle) -> Self {
        Self {
            destinations: self.destinations.clone(),
            watchdog_handle: Some(watchdog_handle),
        }
    }

    /// Get the number of broadcast destinations
    pub fn num_destinations(&self) -> usize {
        self.destinations.len()
    }

    /// Send a value to all destinations
    ///
    /// Wraps the value in `ChannelMessage::Item` and sends to all
    /// destinations sequentially under watchdog monitoring. Fails only when
    /// no destination accepted the value.
    pub fn send(&self, value: T) -> Result<(), SendError<T>> {
        if self.destinations.is_empty() {
            return Ok(());
        }

        let _guard = self.watchdog_handle.as_ref().map(OperationGuard::new);

        let mut any_success = false;
        let mut last_error = None;

        for dest in &self.destinations {
            match dest.send(ChannelMessage::Item(value.clone())) {
                Ok(()) => any_success = true,
                Err(SendError(msg)) => {
                    if let ChannelMessage::Item(v) = msg {
                        last_error = Some(SendError(v));
                    }
                }
            }
        }

        if !any_success {
            if let Some(e) = last_error {
                return Err(e);
            }
        }

        Ok(())
    }

    /// Signal end-of-stream to all destinations
    ///
    /// Sends `ChannelMessage::EndOfStream` to each destination. Downstream
    /// `Receiver`s return `WorkError::Shutdown` on subsequent `recv()` and
    /// `peek()` calls. Call this before dropping the sender when the node
    /// has finished producing data.
    pub fn close(&self) {
        let _guard = self.watchdog_handle.as_ref().map(OperationGuard::new);
        for dest in &self.destinations {
            let _ = dest.send(ChannelMessage::EndOfStream);
        }
    }

    /// Check if this sender has any connected receivers
    pub fn is_connected(&self) -> bool {
        !self.destinations.is_empty()
    }
}

impl<T: Clone> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Self {
            destinations: self.destinations.clone(),
            watchdog_handle: self.watchdog_handle.clone(),
        }
    }
}
