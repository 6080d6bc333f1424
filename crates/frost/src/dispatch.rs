//! Delivery of async blur results.
//!
//! The async worker never runs user callbacks on its own; it hands each
//! finished [`BlurResult`] plus its callback to a [`ResultDispatcher`].
//! [`LoopDispatcher`] queues them for the thread that drains the paired
//! [`ResultLoop`], [`InlineDispatcher`] runs them on the spot.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use tracing::{trace, warn};

use crate::image::ImageBuffer;
use crate::BlurError;

/// Monotonic id of an async request, unique per engine.
pub type RequestId = u64;

/// Outcome of one async request.
#[derive(Debug)]
pub struct BlurResult {
    pub id: RequestId,
    pub outcome: Result<ImageBuffer, BlurError>,
}

impl BlurResult {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn image(&self) -> Option<&ImageBuffer> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&BlurError> {
        self.outcome.as_ref().err()
    }
}

/// Completion callback, invoked exactly once.
pub type BlurCallback = Box<dyn FnOnce(BlurResult) + Send>;

/// Posts a completed result to the context that should observe it.
pub trait ResultDispatcher: Send + Sync {
    /// Deliver `result` by invoking `callback` once. Results handed to one
    /// dispatcher are delivered in the order they were dispatched.
    fn dispatch(&self, result: BlurResult, callback: BlurCallback);
}

// =============================================================================
// Loop dispatcher
// =============================================================================

type Delivery = (BlurResult, BlurCallback);

/// Queues results for a [`ResultLoop`].
pub struct LoopDispatcher {
    tx: Sender<Delivery>,
}

/// Receiving end of a [`LoopDispatcher`], drained by the originating thread.
pub struct ResultLoop {
    rx: Receiver<Delivery>,
}

impl LoopDispatcher {
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> (LoopDispatcher, ResultLoop) {
        let (tx, rx) = mpsc::channel();
        (LoopDispatcher { tx }, ResultLoop { rx })
    }
}

impl ResultDispatcher for LoopDispatcher {
    fn dispatch(&self, result: BlurResult, callback: BlurCallback) {
        trace!(id = result.id, "queueing result");
        if let Err(mpsc::SendError((result, _))) = self.tx.send((result, callback)) {
            warn!(id = result.id, "result loop dropped, discarding result");
        }
    }
}

impl ResultLoop {
    /// Run every queued callback without blocking. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut count = 0;
        while let Ok((result, callback)) = self.rx.try_recv() {
            callback(result);
            count += 1;
        }
        count
    }

    /// Wait up to `timeout` for one result and run its callback.
    /// Returns `false` on timeout.
    pub fn wait_next(&self, timeout: Duration) -> bool {
        match self.rx.recv_timeout(timeout) {
            Ok((result, callback)) => {
                callback(result);
                true
            }
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => false,
        }
    }
}

// =============================================================================
// Inline dispatcher
// =============================================================================

/// Runs callbacks immediately on the completing thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDispatcher;

impl ResultDispatcher for InlineDispatcher {
    fn dispatch(&self, result: BlurResult, callback: BlurCallback) {
        callback(result);
    }
}
