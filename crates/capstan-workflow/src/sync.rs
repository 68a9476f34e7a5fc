//! Cancellation and quorum primitives
//!
//! Both primitives ride on watch channels: cancellation is a bool that only
//! ever flips to true, the countdown latch is a counter that only ever
//! decreases. Observers wait for the value they care about.

use std::sync::Arc;
use tokio::sync::watch;

/// The sending half of a cancellation pair.
///
/// Cancelling is idempotent; dropping the handle without cancelling leaves
/// the signal uncancelled forever, mirroring an abandoned cancel function.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    /// Another signal observing this handle.
    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// The observing half of a cancellation pair
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the pair is cancelled. If the handle was dropped without
    /// cancelling, this pends forever.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// A signal that can never fire; the root of a cancellation tree.
    pub fn none() -> CancelSignal {
        static ROOT: std::sync::OnceLock<watch::Sender<bool>> = std::sync::OnceLock::new();
        let tx = ROOT.get_or_init(|| watch::channel(false).0);
        CancelSignal { rx: tx.subscribe() }
    }
}

/// Create an independent cancellation pair.
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (
        CancelHandle { tx: Arc::new(tx) },
        CancelSignal { rx },
    )
}

/// Create a pair whose signal also fires when `parent` is cancelled.
pub fn cancel_pair_with_parent(parent: CancelSignal) -> (CancelHandle, CancelSignal) {
    let (handle, signal) = cancel_pair();

    let forward = handle.clone();
    tokio::spawn(async move {
        parent.cancelled().await;
        forward.cancel();
    });

    (handle, signal)
}

/// Cancellable N-count synchronization primitive.
///
/// `wait` unblocks all current and future callers once the count reaches
/// zero, or once the associated cancel signal fires (the remaining count is
/// then treated as reached).
#[derive(Debug, Clone)]
pub struct CountdownLatch {
    counter: Arc<watch::Sender<usize>>,
    cancel: CancelSignal,
}

impl CountdownLatch {
    pub fn new(cancel: CancelSignal, count: usize) -> Self {
        let (tx, _rx) = watch::channel(count);
        Self {
            counter: Arc::new(tx),
            cancel,
        }
    }

    /// Decrement the counter; saturates at zero.
    pub fn count_down(&self) {
        self.counter.send_modify(|n| *n = n.saturating_sub(1));
    }

    pub fn remaining(&self) -> usize {
        *self.counter.borrow()
    }

    pub async fn wait(&self) {
        let mut rx = self.counter.subscribe();
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            res = rx.wait_for(|n| *n == 0) => {
                let _ = res;
            }
        }
    }
}
