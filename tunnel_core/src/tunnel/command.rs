//! Command queue between a tunnel's owner and its background thread.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, PoisonError};

use crate::tunnel::error::{TunnelError, TunnelResult};

/// Commands are accepted before the thread starts and delivered in order
/// once it takes the receiver.
pub(crate) struct CommandQueue<C> {
    tx: Sender<C>,
    rx: Mutex<Option<Receiver<C>>>,
}

impl<C: Send> CommandQueue<C> {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        CommandQueue {
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Fails with [`TunnelError::Closed`] once the loop has exited.
    pub(crate) fn send(&self, command: C) -> TunnelResult<()> {
        self.tx.send(command).map_err(|_| TunnelError::Closed)
    }

    /// The receiving end, handed out once.
    pub(crate) fn take_receiver(&self) -> Option<Receiver<C>> {
        self.rx.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queued_before_receiver_taken() {
        let queue = CommandQueue::new();
        queue.send(1).unwrap();
        queue.send(2).unwrap();

        let rx = queue.take_receiver().unwrap();
        assert!(queue.take_receiver().is_none());
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![1, 2]);

        drop(rx);
        assert!(matches!(queue.send(3), Err(TunnelError::Closed)));
    }
}
