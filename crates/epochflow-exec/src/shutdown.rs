//! Tree-wide cancellation.
//!
//! The signal is a zero-capacity channel that never carries a message; dropping
//! the only sender disconnects it, which makes every `recv` on the listener
//! ready at once. Blocking connector calls `select!` on the listener next to
//! their own channel, so one `shutdown()` unblocks every waiting thread.

use std::sync::{Arc, Mutex, PoisonError};

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};

#[derive(Clone, Debug)]
pub struct ShutdownSignal {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    trigger: Mutex<Option<Sender<()>>>,
    listener: Receiver<()>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            inner: Arc::new(Inner {
                trigger: Mutex::new(Some(tx)),
                listener: rx,
            }),
        }
    }

    /// Trigger shutdown. Idempotent.
    pub fn shutdown(&self) {
        let mut trigger = self
            .inner
            .trigger
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if trigger.take().is_some() {
            tracing::debug!("shutdown signal triggered");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        matches!(
            self.inner.listener.try_recv(),
            Err(TryRecvError::Disconnected)
        )
    }

    /// Receiver that becomes ready (disconnected) once shutdown is triggered.
    pub fn listener(&self) -> &Receiver<()> {
        &self.inner.listener
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
