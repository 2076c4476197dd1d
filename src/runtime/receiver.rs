//! Channel receiver with a putback buffer and watchdog monitoring
//!
//! [`Receiver`] wraps a single `crossbeam_channel::Receiver<ChannelMessage<T>>`
//! with a putback buffer, providing `recv`, `peek`, and `put_back`
//! operations. It transparently unwraps `ChannelMessage` and caches
//! end-of-stream state so subsequent calls return `Shutdown`.

use crossbeam_channel::Receiver as CrossbeamReceiver;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use super::errors::{WorkError, WorkResult};
use super::sender::ChannelMessage;
use super::watchdog::{OperationGuard, WatchdogHandle};

/// A single crossbeam receiver with a putback buffer.
///
/// The buffer is externally owned (passed as `&mut VecDeque<T>`) so it
/// persists across calls in the owning node's struct, as is the end-of-stream
/// flag (owned by the `InputPort`).
///
/// Transparently unwraps `ChannelMessage::Item(T)` and returns the value.
/// On `ChannelMessage::EndOfStream`, sets a persistent flag so all subsequent
/// `recv()`/`peek()` calls return `WorkError::Shutdown` immediately.
///
/// Includes watchdog monitoring for deadlock detection (zero-cost with
/// atomics).
pub struct Receiver<'a, T> {
    receiver: &'a CrossbeamReceiver<ChannelMessage<T>>,
    buffer: &'a mut VecDeque<T>,
    watchdog_handle: WatchdogHandle,
    eos: &'a AtomicBool,
}

impl<'a, T> Receiver<'a, T> {
    /// Create a new receiver with watchdog monitoring.
    pub fn new(
        receiver: &'a CrossbeamReceiver<ChannelMessage<T>>,
        buffer: &'a mut VecDeque<T>,
        watchdog_handle: WatchdogHandle,
        eos: &'a AtomicBool,
    ) -> Self {
        Self {
            receiver,
            buffer,
            watchdog_handle,
            eos,
        }
    }

    /// Blocking receive. Returns from the putback buffer first, then falls
    /// through to the underlying channel.
    ///
    /// Returns `Err(WorkError::Shutdown)` if end-of-stream has been received
    /// (either now or in a previous call).
    pub fn recv(&mut self) -> WorkResult<T> {
        if self.eos.load(Ordering::Relaxed) {
            return Err(WorkError::Shutdown);
        }

        if let Some(item) = self.buffer.pop_front() {
            return Ok(item);
        }

        let _guard = OperationGuard::new(&self.watchdog_handle);
        match self.receiver.recv() {
            Ok(ChannelMessage::Item(item)) => Ok(item),
            Ok(ChannelMessage::EndOfStream) => {
                self.eos.store(true, Ordering::Relaxed);
                tracing::debug!("Receiver::recv() - EndOfStream received");
                Err(WorkError::Shutdown)
            }
            Err(_) => {
                tracing::debug!("Receiver::recv() - channel disconnected, returning Shutdown");
                Err(WorkError::Shutdown)
            }
        }
    }

    /// Peek at the front item. If the buffer is empty, blocks on `recv()`
    /// to populate it.
    ///
    /// Returns `Err(WorkError::Shutdown)` if end-of-stream has been received.
    pub fn peek(&mut self) -> WorkResult<&T> {
        if self.eos.load(Ordering::Relaxed) {
            return Err(WorkError::Shutdown);
        }

        if self.buffer.is_empty() {
            let _guard = OperationGuard::new(&self.watchdog_handle);
            match self.receiver.recv() {
                Ok(ChannelMessage::Item(item)) => {
                    self.buffer.push_back(item);
                }
                Ok(ChannelMessage::EndOfStream) => {
                    self.eos.store(true, Ordering::Relaxed);
                    tracing::debug!("Receiver::peek() - EndOfStream received");
                    return Err(WorkError::Shutdown);
                }
                Err(_) => {
                    tracing::debug!("Receiver::peek() - channel disconnected, returning Shutdown");
                    return Err(WorkError::Shutdown);
                }
            }
        }
        Ok(self.buffer.front().unwrap())
    }

    /// Try to receive without blocking. Returns from the putback buffer
    /// first, then tries the underlying channel. Returns Err if it would
    /// block or the channel is closed.
    pub fn try_recv(&mut self) -> Result<T, crossbeam_channel::TryRecvError> {
        if self.eos.load(Ordering::Relaxed) {
            return Err(crossbeam_channel::TryRecvError::Disconnected);
        }

        if let Some(item) = self.buffer.pop_front() {
            return Ok(item);
        }
        // No watchdog needed - this doesn't block
        match self.receiver.try_recv() {
            Ok(ChannelMessage::Item(item)) => Ok(item),
            Ok(ChannelMessage::EndOfStream) => {
                self.eos.store(true, Ordering::Relaxed);
                Err(crossbeam_channel::TryRecvError::Disconnected)
            }
            Err(e) => Err(e),
        }
    }

    /// Receive with a timeout. Returns from the putback buffer first
    /// (immediate), then tries the underlying channel with timeout.
    pub fn recv_timeout(
        &mut self,
        timeout: std::time::Duration,
    ) -> Result<T, crossbeam_channel::RecvTimeoutError> {
        if self.eos.load(Ordering::Relaxed) {
            return Err(crossbeam_channel::RecvTimeoutError::Disconnected);
        }

        if let Some(item) = self.buffer.pop_front() {
            return Ok(item);
        }
        let _guard = OperationGuard::new(&self.watchdog_handle);
        match self.receiver.recv_timeout(timeout) {
            Ok(ChannelMessage::Item(item)) => Ok(item),
            Ok(ChannelMessage::EndOfStream) => {
                self.eos.store(true, Ordering::Relaxed);
                Err(crossbeam_channel::RecvTimeoutError::Disconnected)
            }
            Err(e) => Err(e),
        }
    }

    /// Push an item back to the front of the buffer so the next `recv()`
    /// returns it.
    pub fn put_back(&mut self, item: T) {
        self.buffer.push_front(item);
    }

    /// Check if there are any buffered items.
    pub fn has_buffered(&self) -> bool {
        !self.buffer.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    fn test_watchdog() -> crate::runtime::Watchdog {
        crate::runtime::Watchdog::new()
    }

    #[test]
    fn test_recv_from_buffer_then_channel() {
        let (tx, rx) = bounded::<ChannelMessage<i32>>(10);
        let mut buf = VecDeque::new();
        buf.push_back(42);

        let wd = test_watchdog();
        let handle = wd.register_port("test", "recv", "test_port");
        let eos = AtomicBool::new(false);
        let mut pr = Receiver::new(&rx, &mut buf, handle, &eos);

        // First recv comes from buffer
        assert_eq!(pr.recv().unwrap(), 42);

        // Second recv comes from channel
        tx.send(ChannelMessage::Item(99)).unwrap();
        assert_eq!(pr.recv().unwrap(), 99);

        drop(tx);
    }

    #[test]
    fn test_put_back_and_peek() {
        let (tx, rx) = bounded::<ChannelMessage<i32>>(10);
        let mut buf = VecDeque::new();

        let wd = test_watchdog();
        let handle = wd.register_port("test", "recv", "test_port");
        let eos = AtomicBool::new(false);
        let mut pr = Receiver::new(&rx, &mut buf, handle, &eos);

        assert!(!pr.has_buffered());

        pr.put_back(77);
        assert_eq!(pr.peek().unwrap(), &77);
        assert!(pr.has_buffered());

        assert_eq!(pr.recv().unwrap(), 77);
        assert!(!pr.has_buffered());

        drop(tx);
    }

    #[test]
    fn test_try_recv_does_not_block() {
        let (tx, rx) = bounded::<ChannelMessage<i32>>(10);
        let mut buf = VecDeque::new();

        let wd = test_watchdog();
        let handle = wd.register_port("test", "recv", "test_port");
        let eos = AtomicBool::new(false);
        let mut pr = Receiver::new(&rx, &mut buf, handle, &eos);

        assert!(matches!(
            pr.try_recv(),
            Err(crossbeam_channel::TryRecvError::Empty)
        ));

        tx.send(ChannelMessage::Item(5)).unwrap();
        assert_eq!(pr.try_recv().unwrap(), 5);
    }

    #[test]
    fn test_eos_returns_shutdown() {
        let (tx, rx) = bounded::<ChannelMessage<i32>>(10);
        let mut buf = VecDeque::new();

        let wd = test_watchdog();
        let handle = wd.register_port("test", "recv", "test_port");
        let eos = AtomicBool::new(false);
        let mut pr = Receiver::new(&rx, &mut buf, handle, &eos);

        // Send a value then EOS
        tx.send(ChannelMessage::Item(42)).unwrap();
        tx.send(ChannelMessage::EndOfStream).unwrap();

        // First recv gets the value
        assert_eq!(pr.recv().unwrap(), 42);

        // Second recv gets Shutdown from EOS
        assert!(matches!(pr.recv(), Err(WorkError::Shutdown)));

        // Subsequent recv also returns Shutdown (cached)
        assert!(matches!(pr.recv(), Err(WorkError::Shutdown)));

        // peek also returns Shutdown
        assert!(matches!(pr.peek(), Err(WorkError::Shutdown)));

        drop(tx);
    }

    #[test]
    fn test_eos_persists_across_receivers() {
        let (tx, rx) = bounded::<ChannelMessage<i32>>(10);
        let mut buf = VecDeque::new();

        let wd = test_watchdog();
        let eos = AtomicBool::new(false);

        tx.send(ChannelMessage::EndOfStream).unwrap();

        // First Receiver sees EOS
        {
            let handle = wd.register_port("test", "recv", "test_port");
            let mut pr = Receiver::new(&rx, &mut buf, handle, &eos);
            assert!(matches!(pr.recv(), Err(WorkError::Shutdown)));
        }

        // Second Receiver (simulating the next work() call) also sees EOS
        // immediately
        {
            let handle = wd.register_port("test", "recv", "test_port");
            let mut pr = Receiver::new(&rx, &mut buf, handle, &eos);
            assert!(matches!(pr.recv(), Err(WorkError::Shutdown)));
        }

        drop(tx);
    }

    #[test]
    fn test_disconnect_returns_shutdown() {
        let (tx, rx) = bounded::<ChannelMessage<i32>>(10);
        let mut buf = VecDeque::new();

        let wd = test_watchdog();
        let handle = wd.register_port("test", "recv", "test_port");
        let eos = AtomicBool::new(false);

        drop(tx);

        let mut pr = Receiver::new(&rx, &mut buf, handle, &eos);
        assert!(matches!(pr.recv(), Err(WorkError::Shutdown)));
    }
}
