//! Cancellable run context.
//!
//! Cancellation is broadcast by disconnecting a channel: every clone of the
//! context observes it at once, and it composes with `crossbeam_channel::select!`.

use crossbeam_channel::{Receiver, Sender, TryRecvError};

#[derive(Clone, Debug)]
pub struct RunContext {
    cancelled: Receiver<()>,
}

/// Cancels its context when `cancel` is called or when it is dropped.
#[derive(Debug)]
pub struct CancelHandle {
    _tx: Sender<()>,
}

impl CancelHandle {
    pub fn cancel(self) {}
}

impl RunContext {
    /// A context that is never cancelled.
    pub fn background() -> Self {
        Self {
            cancelled: crossbeam_channel::never(),
        }
    }

    pub fn with_cancel() -> (Self, CancelHandle) {
        let (tx, rx) = crossbeam_channel::bounded(0);
        (Self { cancelled: rx }, CancelHandle { _tx: tx })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.cancelled.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Becomes ready (with an error) once the context is cancelled.
    pub fn cancelled(&self) -> &Receiver<()> {
        &self.cancelled
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::background()
    }
}
