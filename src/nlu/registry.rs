//! Lazy model loading and the bounded inference worker group.
//!
//! Models load on first use, not at startup. A [`ModelHandle`] owns the
//! loader closure, the loaded artifact, a reference count and an
//! optional release hook; the process-wide [`ModelRegistry`] tracks
//! every handle and releases them (in reverse registration order) on
//! shutdown. CPU-bound inference runs on blocking workers gated by a
//! semaphore sized `max(2, cpus / 2)`.

use crate::context::RequestContext;
use crate::error::CoreError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Errors from the NLU layer.
#[derive(Debug, thiserror::Error)]
pub enum NluError {
    #[error("model load failed: {0}")]
    ModelLoad(String),

    #[error("inference failed: {0}")]
    Inference(String),
}

/// Bounded worker group for CPU-bound model work.
pub struct InferenceWorkers {
    semaphore: Arc<Semaphore>,
    size: usize,
}

impl InferenceWorkers {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Run `f` on a blocking worker, waiting for a slot under the
    /// caller's deadline. Cancellation is checked before and after the
    /// blocking section.
    pub async fn run<T, F>(&self, ctx: &RequestContext, f: F) -> Result<T, CoreError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        ctx.check()?;
        let semaphore = Arc::clone(&self.semaphore);
        let permit = ctx
            .run(async move { semaphore.acquire_owned().await })
            .await?
            .map_err(|_| CoreError::Internal("inference worker group closed".into()))?;

        let out = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            f()
        })
        .await
        .map_err(|e| CoreError::Internal(format!("inference task panicked: {e}")))?;

        ctx.check()?;
        Ok(out)
    }
}

/// A lazily loaded model artifact.
pub struct ModelHandle<T: Send + Sync + 'static> {
    name: String,
    loader: Box<dyn Fn() -> Result<T, NluError> + Send + Sync>,
    slot: RwLock<Option<Arc<T>>>,
    refcount: Arc<AtomicUsize>,
    on_release: Option<Box<dyn Fn() + Send + Sync>>,
}

impl<T: Send + Sync + 'static> ModelHandle<T> {
    pub fn new(
        name: &str,
        loader: impl Fn() -> Result<T, NluError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.to_string(),
            loader: Box::new(loader),
            slot: RwLock::new(None),
            refcount: Arc::new(AtomicUsize::new(0)),
            on_release: None,
        }
    }

    pub fn with_release_hook(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_release = Some(Box::new(hook));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_loaded(&self) -> bool {
        self.slot.read().expect("model lock poisoned").is_some()
    }

    /// References currently held by in-flight requests.
    pub fn refcount(&self) -> usize {
        self.refcount.load(Ordering::SeqCst)
    }

    /// Get the model, loading it on first use. The returned guard keeps
    /// the reference count up for the duration of the stage.
    pub fn acquire(&self) -> Result<ModelGuard<T>, NluError> {
        if let Some(model) = self.slot.read().expect("model lock poisoned").as_ref() {
            return Ok(ModelGuard::new(Arc::clone(model), Arc::clone(&self.refcount)));
        }

        let mut slot = self.slot.write().expect("model lock poisoned");
        // Another caller may have loaded while we waited for the lock.
        if let Some(model) = slot.as_ref() {
            return Ok(ModelGuard::new(Arc::clone(model), Arc::clone(&self.refcount)));
        }

        info!(model = %self.name, "loading model");
        let loaded = Arc::new((self.loader)()?);
        *slot = Some(Arc::clone(&loaded));
        Ok(ModelGuard::new(loaded, Arc::clone(&self.refcount)))
    }

    /// Drop the loaded artifact. Outstanding guards keep their copies
    /// alive until they drop; new acquisitions reload.
    pub fn release(&self) {
        let had = self
            .slot
            .write()
            .expect("model lock poisoned")
            .take()
            .is_some();
        if had {
            if self.refcount() > 0 {
                warn!(model = %self.name, refs = self.refcount(), "released model with live references");
            } else {
                debug!(model = %self.name, "model released");
            }
            if let Some(hook) = &self.on_release {
                hook();
            }
        }
    }
}

/// Borrowed model reference; decrements the handle refcount on drop.
pub struct ModelGuard<T: Send + Sync + 'static> {
    model: Arc<T>,
    refcount: Arc<AtomicUsize>,
}

impl<T: Send + Sync + 'static> ModelGuard<T> {
    fn new(model: Arc<T>, refcount: Arc<AtomicUsize>) -> Self {
        refcount.fetch_add(1, Ordering::SeqCst);
        Self { model, refcount }
    }

    /// Clone the inner artifact reference for a blocking closure.
    pub fn artifact(&self) -> Arc<T> {
        Arc::clone(&self.model)
    }
}

impl<T: Send + Sync + 'static> std::ops::Deref for ModelGuard<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.model
    }
}

impl<T: Send + Sync + 'static> Drop for ModelGuard<T> {
    fn drop(&mut self) {
        self.refcount.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Registry view of a model handle, type-erased.
pub trait RegisteredModel: Send + Sync {
    fn name(&self) -> &str;
    fn is_loaded(&self) -> bool;
    fn release(&self);
}

impl<T: Send + Sync + 'static> RegisteredModel for ModelHandle<T> {
    fn name(&self) -> &str {
        self.name()
    }

    fn is_loaded(&self) -> bool {
        self.is_loaded()
    }

    fn release(&self) {
        self.release()
    }
}

/// Process-wide tracker of loaded models.
#[derive(Default)]
pub struct ModelRegistry {
    models: Mutex<Vec<Arc<dyn RegisteredModel>>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, model: Arc<dyn RegisteredModel>) {
        self.models
            .lock()
            .expect("registry mutex poisoned")
            .push(model);
    }

    /// Names of currently loaded models.
    pub fn loaded(&self) -> Vec<String> {
        self.models
            .lock()
            .expect("registry mutex poisoned")
            .iter()
            .filter(|m| m.is_loaded())
            .map(|m| m.name().to_string())
            .collect()
    }

    /// Release every model, most recently registered first.
    pub fn release_all(&self) {
        let models = self.models.lock().expect("registry mutex poisoned");
        for model in models.iter().rev() {
            model.release();
        }
    }
}
