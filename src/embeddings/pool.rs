//! Embedding worker pool.
//!
//! A fixed set of worker slots, each owning its own model instance. Idle slot
//! indices sit on a stack: checkout pops the most recently released slot, so
//! a lightly loaded pool keeps reusing the same warm workers. Workers load
//! lazily on their first checkout.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use super::batch::BatchEncoder;
use super::model::OnnxLoader;
use super::worker::{Worker, WorkerLoader};
use super::{EmbeddingFunction, DEFAULT_BATCH_SIZE, MAX_SEQ_LENGTH};
use crate::config::{default_pool_size, Config};
use crate::error::EmbeddingError;
use crate::metrics::{CHECKOUT_WAIT, GENERATE_REQUESTS, WORKERS_BUSY, WORKERS_READY};
use crate::observability::spans;
use crate::{Error, Result};

/// Worker pool configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of worker slots.
    pub pool_size: usize,
    /// Maximum wait for an idle worker.
    pub checkout_timeout: Duration,
    /// Token length every text is truncated or padded to.
    pub max_sequence_length: usize,
    /// Texts per inference call.
    pub batch_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            checkout_timeout: Duration::from_secs(60),
            max_sequence_length: MAX_SEQ_LENGTH,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Pool of embedding workers.
///
/// Thread-safe and can be cloned cheaply; clones share the same workers.
pub struct EmbeddingPool<L: WorkerLoader = OnnxLoader> {
    inner: Arc<PoolInner<L>>,
}

struct PoolInner<L: WorkerLoader> {
    loader: L,
    config: PoolConfig,
    slots: Vec<Mutex<Worker<L>>>,
    idle: Mutex<Vec<usize>>,
    released: Condvar,
    ready: AtomicUsize,
}

impl<L: WorkerLoader> PoolInner<L> {
    /// Pop the warmest idle slot, waiting up to `timeout` for one.
    fn checkout(&self, timeout: Duration) -> Option<usize> {
        let deadline = Instant::now().checked_add(timeout);
        let mut idle = self.idle.lock();
        loop {
            if let Some(slot) = idle.pop() {
                return Some(slot);
            }
            match deadline {
                Some(deadline) => {
                    if self.released.wait_until(&mut idle, deadline).timed_out() {
                        return idle.pop();
                    }
                }
                None => self.released.wait(&mut idle),
            }
        }
    }

    fn checkin(&self, slot: usize) {
        self.idle.lock().push(slot);
        self.released.notify_one();
    }
}

impl EmbeddingPool<OnnxLoader> {
    /// Create a pool for the reference ONNX model described by `config`.
    ///
    /// No model is loaded until the first call to [`EmbeddingPool::generate`].
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        Self::new(OnnxLoader::new(config.artifact()), config.pool_config())
    }
}

impl<L: WorkerLoader> EmbeddingPool<L> {
    /// Create a pool of `config.pool_size` uninitialized workers.
    ///
    /// # Errors
    ///
    /// Returns an error if any size in `config` is zero.
    pub fn new(loader: L, config: PoolConfig) -> Result<Self> {
        if config.pool_size == 0 {
            return Err(Error::config("pool_size cannot be 0"));
        }
        if config.batch_size == 0 {
            return Err(Error::config("batch_size cannot be 0"));
        }
        if config.max_sequence_length == 0 {
            return Err(Error::config("max_sequence_length cannot be 0"));
        }

        let encoder = BatchEncoder::new(config.batch_size, config.max_sequence_length);
        let dimension = loader.dimension();
        let slots = (0..config.pool_size)
            .map(|slot| Mutex::new(Worker::new(slot, encoder, dimension)))
            .collect();

        // Reversed so slot 0 is checked out first.
        let idle = (0..config.pool_size).rev().collect();

        tracing::info!(
            pool_size = config.pool_size,
            batch_size = config.batch_size,
            max_sequence_length = config.max_sequence_length,
            checkout_timeout_ms = config.checkout_timeout.as_millis(),
            "Embedding pool created"
        );

        Ok(Self {
            inner: Arc::new(PoolInner {
                loader,
                config,
                slots,
                idle: Mutex::new(idle),
                released: Condvar::new(),
                ready: AtomicUsize::new(0),
            }),
        })
    }

    /// Pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Number of worker slots.
    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.slots.len()
    }

    /// Number of slots not currently leased.
    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.inner.idle.lock().len()
    }

    /// Number of workers with a loaded model.
    #[must_use]
    pub fn ready_count(&self) -> usize {
        self.inner.ready.load(Ordering::Acquire)
    }

    /// Width of every vector this pool returns.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.inner.loader.dimension()
    }

    /// Check out an idle worker, loading its model on first use.
    ///
    /// Blocks until a worker is idle or the checkout timeout elapses. The
    /// most recently released worker is handed out first. The worker returns
    /// to the pool when the lease is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`EmbeddingError::CheckoutTimeout`] if no worker frees up in
    /// time, or [`EmbeddingError::Initialization`] if the model fails to load
    /// or panics while loading. A failed load releases the slot; the next
    /// checkout retries it.
    pub fn acquire(&self) -> Result<WorkerLease<'_, L>> {
        let started = Instant::now();

        let Some(slot) = self.inner.checkout(self.inner.config.checkout_timeout) else {
            let waited = started.elapsed();
            tracing::warn!(
                waited_ms = waited.as_millis(),
                pool_size = self.size(),
                "Timed out waiting for an idle embedding worker"
            );
            return Err(EmbeddingError::CheckoutTimeout { waited }.into());
        };
        CHECKOUT_WAIT.observe(started.elapsed().as_secs_f64());

        let mut lease = WorkerLease::new(&self.inner, slot);
        match panic::catch_unwind(AssertUnwindSafe(|| lease.ensure_ready())) {
            Ok(result) => result?,
            Err(_) => {
                lease.discard();
                return Err(EmbeddingError::Initialization(format!(
                    "worker {slot} panicked while loading the model"
                ))
                .into());
            }
        }
        Ok(lease)
    }

    /// Embed `texts`, returning one 384-component unit vector per text in
    /// input order.
    ///
    /// Texts longer than `max_sequence_length` tokens are truncated. The
    /// worker is released on every exit path; a worker that panics is
    /// replaced with a fresh one.
    ///
    /// # Errors
    ///
    /// Returns an error if `texts` is empty, no worker frees up in time, the
    /// model fails to load, or inference fails.
    pub fn generate<S: AsRef<str>>(&self, texts: &[S]) -> Result<Vec<Vec<f32>>> {
        let result = self.generate_inner(texts);
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.phase(),
        };
        GENERATE_REQUESTS.with_label_values(&[outcome]).inc();
        result
    }

    fn generate_inner<S: AsRef<str>>(&self, texts: &[S]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Err(EmbeddingError::EmptyInput.into());
        }

        let _span = spans::generate_span(texts.len()).entered();
        let mut lease = self.acquire()?;
        let slot = lease.slot();

        match panic::catch_unwind(AssertUnwindSafe(|| lease.generate(texts))) {
            Ok(result) => result,
            Err(_) => {
                lease.discard();
                Err(EmbeddingError::WorkerCrashed { slot }.into())
            }
        }
    }

    /// Embed a single text.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding generation fails.
    pub fn generate_one(&self, text: &str) -> Result<Vec<f32>> {
        self.generate(&[text])?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::Inference("no embedding returned".to_string()).into())
    }

    /// Embed `texts` on tokio's blocking thread pool.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding generation fails or the task panics.
    pub async fn generate_async(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let pool = self.clone();
        tokio::task::spawn_blocking(move || pool.generate(&texts))
            .await
            .map_err(|e| Error::internal(format!("embedding task failed: {e}")))?
    }
}

impl<L: WorkerLoader> Clone for EmbeddingPool<L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<L: WorkerLoader> EmbeddingFunction for EmbeddingPool<L> {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.generate(texts)
    }

    fn dimension(&self) -> usize {
        self.inner.loader.dimension()
    }
}

impl<L: WorkerLoader> std::fmt::Debug for EmbeddingPool<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingPool")
            .field("config", &self.inner.config)
            .field("idle", &self.idle_count())
            .field("ready", &self.ready_count())
            .finish()
    }
}

/// Exclusive use of one worker, returned to the pool on drop.
pub struct WorkerLease<'a, L: WorkerLoader> {
    pool: &'a PoolInner<L>,
    slot: usize,
    worker: Option<MutexGuard<'a, Worker<L>>>,
    discard: bool,
}

impl<'a, L: WorkerLoader> WorkerLease<'a, L> {
    fn new(pool: &'a PoolInner<L>, slot: usize) -> Self {
        WORKERS_BUSY.inc();
        Self {
            pool,
            slot,
            worker: Some(pool.slots[slot].lock()),
            discard: false,
        }
    }

    fn worker(&mut self) -> Result<&mut Worker<L>> {
        self.worker
            .as_deref_mut()
            .ok_or_else(|| Error::internal("worker lease already released"))
    }

    fn ensure_ready(&mut self) -> Result<()> {
        let pool = self.pool;
        let worker = self.worker()?;
        if worker.is_ready() {
            return Ok(());
        }
        worker.initialize(&pool.loader)?;
        pool.ready.fetch_add(1, Ordering::AcqRel);
        WORKERS_READY.inc();
        Ok(())
    }

    /// Pool slot of the leased worker.
    #[must_use]
    pub const fn slot(&self) -> usize {
        self.slot
    }

    /// Embed `texts` on the leased worker.
    ///
    /// # Errors
    ///
    /// Returns an error if tokenization or inference fails.
    pub fn generate<S: AsRef<str>>(&mut self, texts: &[S]) -> Result<Vec<Vec<f32>>> {
        self.worker()?.generate(texts)
    }

    /// Replace the leased worker with a fresh uninitialized one on release.
    pub fn discard(&mut self) {
        self.discard = true;
    }
}

impl<L: WorkerLoader> Drop for WorkerLease<'_, L> {
    fn drop(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            if self.discard {
                tracing::error!(slot = self.slot, "Discarding crashed embedding worker");
                if worker.is_ready() {
                    self.pool.ready.fetch_sub(1, Ordering::AcqRel);
                    WORKERS_READY.dec();
                }
                let encoder = BatchEncoder::new(
                    self.pool.config.batch_size,
                    self.pool.config.max_sequence_length,
                );
                *worker = Worker::new(self.slot, encoder, self.pool.loader.dimension());
            }
        }

        WORKERS_BUSY.dec();
        self.pool.checkin(self.slot);
    }
}
