//! Per-thread render contexts.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, ThreadId};

use tracing::debug;

use super::{GpuResult, OffscreenDevice};

/// Table of render contexts, one per calling thread.
///
/// A context is created the first time a thread renders and is kept until
/// [`teardown`](Self::teardown). While its owner thread renders, the context
/// is taken out of the table, so it is never shared.
pub struct OffscreenRenderContext<D: OffscreenDevice> {
    device: Arc<D>,
    contexts: Mutex<HashMap<ThreadId, D::Context>>,
}

impl<D: OffscreenDevice> OffscreenRenderContext<D> {
    pub fn new(device: Arc<D>) -> Self {
        Self {
            device,
            contexts: Mutex::new(HashMap::new()),
        }
    }

    /// Run `f` with the calling thread's context, creating it on first use.
    pub fn with_current<R>(&self, f: impl FnOnce(&mut D::Context) -> GpuResult<R>) -> GpuResult<R> {
        let id = thread::current().id();
        let existing = self
            .contexts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);

        let mut context = match existing {
            Some(context) => context,
            None => {
                debug!(thread = ?id, device = self.device.name(), "creating render context");
                self.device.create_context()?
            }
        };

        let result = f(&mut context);
        self.contexts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, context);
        result
    }

    /// Destroy every context that is not currently in use.
    pub fn teardown(&self) {
        let drained: Vec<(ThreadId, D::Context)> = self
            .contexts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        if !drained.is_empty() {
            debug!(count = drained.len(), "tearing down render contexts");
        }
        for (_, context) in drained {
            self.device.destroy_context(context);
        }
    }

    /// Number of contexts in the table.
    pub fn len(&self) -> usize {
        self.contexts.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the calling thread already owns a context.
    pub fn has_current(&self) -> bool {
        self.contexts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&thread::current().id())
    }
}

impl<D: OffscreenDevice> Drop for OffscreenRenderContext<D> {
    fn drop(&mut self) {
        self.teardown();
    }
}
