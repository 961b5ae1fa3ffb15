//! Termination requests
//!
//! Operator interrupts arrive asynchronously, but the session state is only
//! ever touched by the control loop. The signal path therefore only drops a
//! wake-up into a single-slot channel; the loop observes it between per-band
//! operations ([`Termination::poll`]) or blocks on it while the mapping is
//! live ([`Termination::wait`]). Requests that arrive while the slot is
//! already full are coalesced.

use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError, TrySendError};
use tracing::debug;

/// Source of termination requests, consumed by the control loop
pub trait Termination {
    /// Consume a pending request, if any, without blocking
    fn poll(&mut self) -> bool;

    /// Block until a request arrives
    fn wait(&mut self);
}

/// Signal-handler side of the channel
#[derive(Debug, Clone)]
pub struct SignalSender {
    tx: SyncSender<()>,
}

impl SignalSender {
    /// Request termination
    ///
    /// Never blocks. Returns `false` once the receiver is gone.
    pub fn notify(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => true,
            Err(TrySendError::Disconnected(())) => false,
        }
    }
}

/// Control-loop side of the channel
#[derive(Debug)]
pub struct SignalReceiver {
    rx: Receiver<()>,
}

impl Termination for SignalReceiver {
    fn poll(&mut self) -> bool {
        match self.rx.try_recv() {
            Ok(()) => true,
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => false,
        }
    }

    fn wait(&mut self) {
        // With every sender gone no request can ever arrive; treat that as one.
        if self.rx.recv().is_err() {
            debug!("termination channel closed");
        }
    }
}

/// Create a connected sender/receiver pair
pub fn signal_channel() -> (SignalSender, SignalReceiver) {
    let (tx, rx) = mpsc::sync_channel(1);
    (SignalSender { tx }, SignalReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_poll_consumes_request() {
        let (tx, mut rx) = signal_channel();
        assert!(!rx.poll());
        assert!(tx.notify());
        assert!(rx.poll());
        assert!(!rx.poll());
    }

    #[test]
    fn test_requests_coalesce() {
        let (tx, mut rx) = signal_channel();
        assert!(tx.notify());
        assert!(tx.notify());
        assert!(tx.notify());
        assert!(rx.poll());
        assert!(!rx.poll());
    }

    #[test]
    fn test_wait_wakes_on_notify_from_other_thread() {
        let (tx, mut rx) = signal_channel();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            tx.notify();
        });
        rx.wait();
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_returns_when_senders_dropped() {
        let (tx, mut rx) = signal_channel();
        drop(tx);
        rx.wait();
        assert!(!rx.poll());
    }

    #[test]
    fn test_notify_after_receiver_dropped() {
        let (tx, rx) = signal_channel();
        drop(rx);
        assert!(!tx.notify());
    }
}
