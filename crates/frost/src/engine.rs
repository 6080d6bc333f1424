//! Blur engine façade.
//!
//! [`BlurEngine`] owns one validated [`BlurConfiguration`] and the backend
//! resolved for it. Synchronous calls run on the caller's thread. Async calls
//! go to a single `frost-async` worker with a one-slot queue: a newer request
//! replaces one that has not started, and only the latest request is
//! delivered with an image.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, trace, warn};

use crate::backend::native::NativeBlurFn;
use crate::backend::{create_backend, BackendOptions, BlurBackend, BlurOutcome};
use crate::config::BlurConfiguration;
use crate::dispatch::{BlurCallback, BlurResult, LoopDispatcher, RequestId, ResultDispatcher, ResultLoop};
use crate::gpu::GpuDevice;
use crate::image::ImageBuffer;
use crate::resample::resize_bilinear;
use crate::{BlurError, FrostResult};

// =============================================================================
// Pipeline
// =============================================================================

struct EngineCore {
    config: BlurConfiguration,
    backend: Box<dyn BlurBackend>,
}

impl EngineCore {
    /// recycled check → crop → downsample → blur → upscale
    ///
    /// Crop and downsample work on a copy, so the caller's buffer is still at
    /// hand when the backend reports [`BlurOutcome::Unblurred`].
    fn process(&self, image: ImageBuffer) -> FrostResult<ImageBuffer> {
        if image.is_recycled() {
            return Err(BlurError::RecycledInput);
        }
        if self.config.is_identity() {
            return Ok(image);
        }

        let mut copy = match self.config.translate() {
            (0, 0) => None,
            (x, y) => Some(image.crop_from(x, y)?),
        };

        let (width, height) = copy.as_ref().map_or(image.dimensions(), ImageBuffer::dimensions);
        let (sw, sh) = self.config.scaled_size(width, height)?;
        if (sw, sh) != (width, height) {
            trace!(from = ?(width, height), to = ?(sw, sh), "downsampling");
            let scaled = resize_bilinear(copy.as_ref().unwrap_or(&image), sw, sh)?;
            copy = Some(scaled);
        }

        let Some(mut working) = copy else {
            // Backend works on the caller's buffer directly; an unblurred
            // outcome leaves it untouched.
            let mut image = image;
            self.backend.blur(&mut image)?;
            return Ok(image);
        };

        match self.backend.blur(&mut working)? {
            BlurOutcome::Unblurred => {
                debug!("backend left the image unblurred, returning the input");
                Ok(image)
            }
            BlurOutcome::Blurred => {
                if self.config.upscale() && working.dimensions() != (width, height) {
                    working = resize_bilinear(&working, width, height)?;
                }
                Ok(working)
            }
        }
    }

    /// Like `process`, but a panicking backend becomes a failed result.
    fn process_guarded(&self, image: ImageBuffer) -> FrostResult<ImageBuffer> {
        panic::catch_unwind(AssertUnwindSafe(|| self.process(image)))
            .unwrap_or_else(|_| Err(BlurError::BackendFailure("blur panicked".into())))
    }
}

// =============================================================================
// Async worker
// =============================================================================

struct Request {
    id: RequestId,
    image: ImageBuffer,
    callback: BlurCallback,
}

#[derive(Default)]
struct Slot {
    pending: Option<Request>,
    latest: RequestId,
    shutdown: bool,
}

#[derive(Default)]
struct Queue {
    slot: Mutex<Slot>,
    ready: Condvar,
}

struct AsyncWorker {
    queue: Arc<Queue>,
    handle: JoinHandle<()>,
}

/// Hand `result` to the dispatcher. A panicking callback is logged and
/// swallowed so it cannot take the worker down.
fn deliver(dispatcher: &dyn ResultDispatcher, result: BlurResult, callback: BlurCallback) {
    let id = result.id;
    if panic::catch_unwind(AssertUnwindSafe(|| dispatcher.dispatch(result, callback))).is_err() {
        error!(id, "result callback panicked");
    }
}

fn run_worker(core: Arc<EngineCore>, queue: Arc<Queue>, dispatcher: Arc<dyn ResultDispatcher>) {
    debug!("async worker started");
    loop {
        let request = {
            let mut slot = queue.slot.lock().unwrap_or_else(PoisonError::into_inner);
            while slot.pending.is_none() && !slot.shutdown {
                slot = queue.ready.wait(slot).unwrap_or_else(PoisonError::into_inner);
            }
            let shutdown = slot.shutdown;
            match slot.pending.take() {
                Some(request) if !shutdown => request,
                pending => {
                    drop(slot);
                    if let Some(request) = pending {
                        debug!(id = request.id, "engine shut down with a pending request");
                        let result = BlurResult {
                            id: request.id,
                            outcome: Err(BlurError::ShutDown),
                        };
                        deliver(&*dispatcher, result, request.callback);
                    }
                    break;
                }
            }
        };

        trace!(id = request.id, "async request started");
        let outcome = core.process_guarded(request.image);
        let latest = queue.slot.lock().unwrap_or_else(PoisonError::into_inner).latest;
        let outcome = match outcome {
            Ok(_) if latest != request.id => {
                debug!(id = request.id, latest, "result superseded");
                Err(BlurError::Superseded)
            }
            other => other,
        };
        deliver(
            &*dispatcher,
            BlurResult {
                id: request.id,
                outcome,
            },
            request.callback,
        );
    }
    debug!("async worker stopped");
}

// =============================================================================
// BlurEngine
// =============================================================================

/// Configured blur engine.
///
/// Built with [`BlurConfiguration::builder`]. Dropping the engine stops its
/// async worker and releases backend resources.
pub struct BlurEngine {
    core: Arc<EngineCore>,
    dispatcher: Arc<dyn ResultDispatcher>,
    results: Option<Mutex<ResultLoop>>,
    next_id: AtomicU64,
    worker: Mutex<Option<AsyncWorker>>,
}

impl BlurEngine {
    pub(crate) fn from_parts(
        config: BlurConfiguration,
        gpu_device: GpuDevice,
        native_routine: NativeBlurFn,
        dispatcher: Option<Arc<dyn ResultDispatcher>>,
    ) -> FrostResult<Self> {
        let options = BackendOptions {
            gpu_device,
            native_routine,
        };
        let backend = create_backend(&config, &options)?;

        let (dispatcher, results) = match dispatcher {
            Some(dispatcher) => (dispatcher, None),
            None => {
                let (dispatcher, results) = LoopDispatcher::new();
                (Arc::new(dispatcher) as Arc<dyn ResultDispatcher>, Some(Mutex::new(results)))
            }
        };

        info!(
            backend = backend.name(),
            mode = %config.mode(),
            radius = config.radius(),
            sample_factor = config.sample_factor(),
            concurrent = config.concurrent(),
            "blur engine ready"
        );

        Ok(Self {
            core: Arc::new(EngineCore { config, backend }),
            dispatcher,
            results,
            next_id: AtomicU64::new(1),
            worker: Mutex::new(None),
        })
    }

    pub fn configuration(&self) -> &BlurConfiguration {
        &self.core.config
    }

    /// Name of the resolved backend (`identity`, `cpu`, `native`, `gpu`).
    pub fn backend_name(&self) -> &'static str {
        self.core.backend.name()
    }

    /// Blur on the calling thread.
    ///
    /// Returns the same buffer for radius 0. With a sample factor below 1 and
    /// upscaling disabled, the result has the downsampled size.
    pub fn blur(&self, image: ImageBuffer) -> FrostResult<ImageBuffer> {
        trace!(w = image.width(), h = image.height(), "BlurEngine::blur");
        self.core.process(image)
    }

    /// Queue `image` on the async worker; `callback` receives the result
    /// through the engine's dispatcher.
    pub fn blur_async(&self, image: ImageBuffer, callback: impl FnOnce(BlurResult) + Send + 'static) -> RequestId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let callback: BlurCallback = Box::new(callback);

        if image.is_recycled() {
            self.fail(id, BlurError::RecycledInput, callback);
            return id;
        }

        let queue = match self.queue() {
            Ok(queue) => queue,
            Err(e) => {
                error!("failed to start async worker: {e}");
                self.fail(id, BlurError::BackendFailure(format!("async worker: {e}")), callback);
                return id;
            }
        };

        let replaced = {
            let mut slot = queue.slot.lock().unwrap_or_else(PoisonError::into_inner);
            slot.latest = id;
            slot.pending.replace(Request { id, image, callback })
        };
        queue.ready.notify_one();

        if let Some(old) = replaced {
            debug!(id = old.id, by = id, "pending request replaced");
            self.fail(old.id, BlurError::Superseded, old.callback);
        }
        id
    }

    /// Run queued callbacks of the built-in result loop. Returns how many ran;
    /// always 0 with a custom dispatcher.
    pub fn run_pending_callbacks(&self) -> usize {
        match &self.results {
            Some(results) => results.lock().unwrap_or_else(PoisonError::into_inner).run_pending(),
            None => 0,
        }
    }

    /// Wait up to `timeout` for one callback of the built-in result loop.
    pub fn wait_for_callback(&self, timeout: Duration) -> bool {
        match &self.results {
            Some(results) => results
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .wait_next(timeout),
            None => false,
        }
    }

    /// Drop pooled GPU resources and render contexts. The engine stays
    /// usable.
    pub fn release_resources(&self) {
        self.core.backend.release_resources();
    }

    fn fail(&self, id: RequestId, error: BlurError, callback: BlurCallback) {
        deliver(&*self.dispatcher, BlurResult { id, outcome: Err(error) }, callback);
    }

    /// Queue of the async worker, spawning the worker on first use.
    fn queue(&self) -> std::io::Result<Arc<Queue>> {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(active) = worker.as_ref() {
            if !active.handle.is_finished() {
                return Ok(active.queue.clone());
            }
            warn!("async worker exited unexpectedly, restarting");
        }
        let spawned = self.spawn_worker()?;
        let queue = spawned.queue.clone();
        *worker = Some(spawned);
        Ok(queue)
    }

    fn spawn_worker(&self) -> std::io::Result<AsyncWorker> {
        let queue = Arc::new(Queue::default());
        let handle = {
            let (core, queue, dispatcher) = (self.core.clone(), queue.clone(), self.dispatcher.clone());
            thread::Builder::new()
                .name("frost-async".into())
                .spawn(move || run_worker(core, queue, dispatcher))?
        };
        Ok(AsyncWorker { queue, handle })
    }

    fn stop_worker(&self) {
        let Some(worker) = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take() else {
            return;
        };
        worker
            .queue
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .shutdown = true;
        worker.queue.ready.notify_one();
        if worker.handle.join().is_err() {
            error!("async worker panicked");
        }
    }
}

impl Drop for BlurEngine {
    fn drop(&mut self) {
        self.stop_worker();
        // Results the worker queued on its way out still owe their callbacks.
        // A panicking callback is already off the queue, so retrying moves on.
        loop {
            match panic::catch_unwind(AssertUnwindSafe(|| self.run_pending_callbacks())) {
                Ok(count) => {
                    if count > 0 {
                        debug!(count, "delivered pending results on drop");
                    }
                    break;
                }
                Err(_) => error!("result callback panicked during engine drop"),
            }
        }
        self.release_resources();
    }
}

impl std::fmt::Debug for BlurEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlurEngine")
            .field("config", &self.core.config)
            .field("backend", &self.core.backend.name())
            .finish()
    }
}
