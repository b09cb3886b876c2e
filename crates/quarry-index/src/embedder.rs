//! The embedding worker pool.
//!
//! Each worker unit is a dedicated OS thread that constructs one
//! [`EmbeddingBackend`](crate::model::EmbeddingBackend) at startup and
//! keeps it warm for the lifetime of the pool. Units share nothing; the
//! orchestrator talks to them over channels with a typed message
//! protocol, correlating responses by batch id. A unit signals `ready`
//! (carrying its resolved dimension) after the model loads, and no work
//! is dispatched before that.
//!
//! Failure model: one chunk failing to embed produces a failure record
//! for that chunk only. A unit failing to start shrinks the pool
//! (degraded but running); zero ready units fails startup. `shutdown` is
//! coarse and out-of-band: units stop between chunks, abandoning the
//! in-flight batch and everything still queued, and each abandoned batch
//! surfaces as a [`QuarryError::Worker`] to whoever awaits it.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use quarry_core::{Chunk, EmbeddingConfig, EmbeddingRecord, QuarryError};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::model::{BackendFactory, EmbeddingStrategy};

/// Messages accepted by a worker unit.
enum WorkerRequest {
    /// Embed every chunk independently; reply with per-chunk records.
    Process {
        batch_id: u64,
        chunks: Vec<Chunk>,
        reply: oneshot::Sender<BatchResult>,
    },
    /// Embed one query text with the same strategy as indexed chunks.
    EmbedQuery {
        batch_id: u64,
        text: String,
        reply: oneshot::Sender<Result<Vec<f32>, QuarryError>>,
    },
    /// Wake a unit blocked on an empty queue so it can observe the stop
    /// flag. Termination itself is signaled out-of-band.
    Shutdown,
}

/// A completed batch, correlated to its request by `batch_id`.
struct BatchResult {
    batch_id: u64,
    records: Vec<EmbeddingRecord>,
}

/// What a unit reports once its model has loaded.
#[derive(Debug, Clone)]
struct WorkerReady {
    model_name: String,
    dimension: usize,
    device: String,
}

#[derive(Debug)]
struct WorkerHandle {
    id: usize,
    sender: mpsc::Sender<WorkerRequest>,
    join: Option<JoinHandle<()>>,
}

/// A batch that has been dispatched but not yet completed.
///
/// Created by [`EmbeddingPool::dispatch`]; the request is already on a
/// worker's queue, so several `PendingBatch`es run in parallel across
/// units and can be awaited in any order.
pub struct PendingBatch {
    batch_id: u64,
    reply: oneshot::Receiver<BatchResult>,
}

impl PendingBatch {
    /// The identifier correlating this batch with its results.
    pub fn batch_id(&self) -> u64 {
        self.batch_id
    }

    /// Wait for the batch's per-chunk records.
    ///
    /// # Errors
    ///
    /// Returns [`QuarryError::Worker`] if the serving unit terminated
    /// before replying; the batch must be retried or reported.
    pub async fn wait(self) -> Result<Vec<EmbeddingRecord>, QuarryError> {
        let result = self.reply.await.map_err(|_| {
            QuarryError::Worker(format!(
                "worker terminated before completing batch {}",
                self.batch_id
            ))
        })?;
        debug_assert_eq!(result.batch_id, self.batch_id);
        Ok(result.records)
    }
}

/// Pool of embedding worker units.
///
/// # Examples
///
/// ```
/// use quarry_core::{Chunk, EmbeddingConfig};
/// use quarry_index::embedder::EmbeddingPool;
/// use quarry_index::testing::hash_backend_factory;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let config = EmbeddingConfig {
///     model: "hash-test".into(),
///     worker_threads: 2,
///     ..EmbeddingConfig::default()
/// };
/// let pool = EmbeddingPool::start(&config, hash_backend_factory(64))
///     .await
///     .unwrap();
/// assert_eq!(pool.dimension(), 64);
/// # }
/// ```
#[derive(Debug)]
pub struct EmbeddingPool {
    workers: Vec<WorkerHandle>,
    next_worker: AtomicUsize,
    next_batch: AtomicU64,
    stop: Arc<AtomicBool>,
    model_name: String,
    dimension: usize,
    device: String,
}

impl EmbeddingPool {
    /// Spawn `worker_threads` units and wait for their ready signals.
    ///
    /// Units that fail to initialize are logged and dropped; the pool
    /// runs degraded with the rest.
    ///
    /// # Errors
    ///
    /// Returns [`QuarryError::Worker`] if zero units become ready, or
    /// [`QuarryError::Config`] if ready units disagree on the resolved
    /// dimension.
    pub async fn start(
        config: &EmbeddingConfig,
        factory: BackendFactory,
    ) -> Result<Self, QuarryError> {
        let stop = Arc::new(AtomicBool::new(false));
        let mut spawned = Vec::with_capacity(config.worker_threads);
        for id in 0..config.worker_threads {
            let (sender, receiver) = mpsc::channel();
            let (ready_sender, ready_receiver) = oneshot::channel();
            let worker_config = config.clone();
            let worker_factory = factory.clone();
            let worker_stop = stop.clone();
            let join = std::thread::Builder::new()
                .name(format!("quarry-embed-{id}"))
                .spawn(move || {
                    worker_loop(
                        id,
                        &worker_config,
                        &worker_factory,
                        &receiver,
                        &worker_stop,
                        ready_sender,
                    );
                })?;
            spawned.push((id, sender, join, ready_receiver));
        }

        let mut workers = Vec::new();
        let mut first_ready: Option<WorkerReady> = None;
        for (id, sender, join, ready_receiver) in spawned {
            match ready_receiver.await {
                Ok(Ok(ready)) => {
                    if let Some(first) = &first_ready {
                        if first.dimension != ready.dimension {
                            return Err(QuarryError::Config(format!(
                                "worker {id} resolved dimension {} but the pool resolved {}",
                                ready.dimension, first.dimension
                            )));
                        }
                    } else {
                        first_ready = Some(ready);
                    }
                    workers.push(WorkerHandle {
                        id,
                        sender,
                        join: Some(join),
                    });
                }
                Ok(Err(e)) => {
                    warn!(worker = id, error = %e, "embedding worker failed to start");
                    let _ = join.join();
                }
                Err(_) => {
                    warn!(worker = id, "embedding worker exited before signaling ready");
                    let _ = join.join();
                }
            }
        }

        let Some(ready) = first_ready else {
            return Err(QuarryError::Worker(
                "no embedding workers became ready".into(),
            ));
        };
        if workers.len() < config.worker_threads {
            warn!(
                ready = workers.len(),
                requested = config.worker_threads,
                "embedding pool running degraded"
            );
        }
        info!(
            model = %ready.model_name,
            dimension = ready.dimension,
            workers = workers.len(),
            "embedding pool ready"
        );

        Ok(Self {
            workers,
            next_worker: AtomicUsize::new(0),
            next_batch: AtomicU64::new(0),
            stop,
            model_name: ready.model_name,
            dimension: ready.dimension,
            device: ready.device,
        })
    }

    /// The resolved output dimension, uniform across all units.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// The resolved model name.
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// The device units run inference on.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Number of ready units (may be fewer than requested).
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Queue a batch on the next unit (round-robin) and return a handle
    /// to await its results.
    pub fn dispatch(&self, chunks: Vec<Chunk>) -> PendingBatch {
        let batch_id = self.next_batch.fetch_add(1, Ordering::Relaxed);
        let (reply, receiver) = oneshot::channel();
        let worker = &self.workers[self.next_worker.fetch_add(1, Ordering::Relaxed) % self.workers.len()];
        debug!(batch_id, worker = worker.id, chunks = chunks.len(), "dispatching batch");
        if worker
            .sender
            .send(WorkerRequest::Process {
                batch_id,
                chunks,
                reply,
            })
            .is_err()
        {
            // The unit is gone; the dropped reply sender surfaces this
            // as a Worker error when the batch is awaited.
            warn!(batch_id, worker = worker.id, "worker unavailable for batch");
        }
        PendingBatch { batch_id, reply: receiver }
    }

    /// Embed a batch of chunks and wait for the per-chunk records.
    ///
    /// # Errors
    ///
    /// Returns [`QuarryError::Worker`] if the serving unit died
    /// mid-batch. Individual chunk failures are `success = false`
    /// records, not errors.
    pub async fn process_batch(
        &self,
        chunks: Vec<Chunk>,
    ) -> Result<Vec<EmbeddingRecord>, QuarryError> {
        self.dispatch(chunks).wait().await
    }

    /// Embed a query with the same strategy and dimension as indexed
    /// chunks.
    ///
    /// # Errors
    ///
    /// Returns [`QuarryError::Embedding`] if inference fails, or
    /// [`QuarryError::Worker`] if the serving unit died.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, QuarryError> {
        let batch_id = self.next_batch.fetch_add(1, Ordering::Relaxed);
        let (reply, receiver) = oneshot::channel();
        let worker = &self.workers[self.next_worker.fetch_add(1, Ordering::Relaxed) % self.workers.len()];
        if worker
            .sender
            .send(WorkerRequest::EmbedQuery {
                batch_id,
                text: text.to_string(),
                reply,
            })
            .is_err()
        {
            return Err(QuarryError::Worker(
                "worker unavailable for query embedding".into(),
            ));
        }
        receiver
            .await
            .map_err(|_| QuarryError::Worker("worker terminated while embedding query".into()))?
    }

    /// Tell every unit to terminate.
    ///
    /// The stop flag is observed between chunks, so a unit exits within
    /// one embed call regardless of how much work is queued. The
    /// in-flight batch and everything behind it are abandoned; their
    /// awaiters receive [`QuarryError::Worker`].
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::SeqCst);
        // Wake units blocked on an empty queue.
        for worker in &self.workers {
            let _ = worker.sender.send(WorkerRequest::Shutdown);
        }
    }
}

impl Drop for EmbeddingPool {
    fn drop(&mut self) {
        self.shutdown();
        for worker in &mut self.workers {
            if let Some(join) = worker.join.take() {
                let _ = join.join();
            }
        }
    }
}

/// Body of one worker unit: load the backend, signal ready, then serve
/// requests until the stop flag is set or the channel closes.
///
/// Returning drops the receiver and with it every queued request, so the
/// abandoned batches' reply senders drop and their awaiters see
/// [`QuarryError::Worker`].
fn worker_loop(
    id: usize,
    config: &EmbeddingConfig,
    factory: &BackendFactory,
    receiver: &mpsc::Receiver<WorkerRequest>,
    stop: &AtomicBool,
    ready: oneshot::Sender<Result<WorkerReady, QuarryError>>,
) {
    let mut backend = match (**factory)(config) {
        Ok(backend) => backend,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let strategy = EmbeddingStrategy::resolve(backend.model_name(), config.dimension);
    let dimension = strategy.output_dimension(backend.native_dimension());
    let announced = WorkerReady {
        model_name: backend.model_name().to_string(),
        dimension,
        device: backend.device().to_string(),
    };
    if ready.send(Ok(announced)).is_err() {
        return;
    }
    debug!(worker = id, dimension, "worker ready");

    while let Ok(request) = receiver.recv() {
        if stop.load(Ordering::SeqCst) {
            debug!(worker = id, "worker stopping, abandoning queued work");
            return;
        }
        match request {
            WorkerRequest::Process {
                batch_id,
                chunks,
                reply,
            } => {
                let mut records = Vec::with_capacity(chunks.len());
                for chunk in chunks {
                    // Dropping `reply` here fails the batch for its
                    // awaiter, which is the contract for abandoned work.
                    if stop.load(Ordering::SeqCst) {
                        debug!(worker = id, batch_id, "worker stopping mid-batch");
                        return;
                    }
                    records.push(match backend.embed(&chunk.text) {
                        Ok(raw) => EmbeddingRecord::success(chunk, strategy.postprocess(raw)),
                        Err(e) => {
                            debug!(worker = id, batch_id, error = %e, "chunk failed to embed");
                            EmbeddingRecord::failure(chunk, e.to_string())
                        }
                    });
                }
                if stop.load(Ordering::SeqCst) {
                    debug!(worker = id, batch_id, "worker stopping, dropping finished batch");
                    return;
                }
                let _ = reply.send(BatchResult { batch_id, records });
            }
            WorkerRequest::EmbedQuery { text, reply, .. } => {
                let result = backend
                    .embed(&text)
                    .map(|raw| strategy.postprocess(raw));
                let _ = reply.send(result);
            }
            WorkerRequest::Shutdown => {
                debug!(worker = id, "worker shutting down");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        failing_backend_factory, flaky_startup_factory, hash_backend_factory, slow_backend_factory,
    };
    use std::path::PathBuf;
    use std::time::{Duration, Instant};

    fn test_config(worker_threads: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            model: "hash-test".into(),
            dimension: None,
            worker_threads,
            device: "cpu".into(),
        }
    }

    fn chunk(text: &str, start: u32) -> Chunk {
        Chunk {
            file: PathBuf::from("src/lib.rs"),
            start_line: start,
            end_line: start + 10,
            text: text.into(),
        }
    }

    #[tokio::test]
    async fn pool_embeds_a_batch() {
        let pool = EmbeddingPool::start(&test_config(2), hash_backend_factory(32))
            .await
            .unwrap();
        let records = pool
            .process_batch(vec![
                chunk("fn alpha() { one(); }", 1),
                chunk("fn beta() { two(); }", 12),
            ])
            .await
            .unwrap();

        assert_eq!(records.len(), 2);
        for record in &records {
            assert!(record.success);
            assert_eq!(record.vector.len(), 32);
        }
    }

    #[tokio::test]
    async fn one_failing_chunk_does_not_poison_the_batch() {
        let pool = EmbeddingPool::start(&test_config(1), failing_backend_factory(32, "POISON"))
            .await
            .unwrap();
        let records = pool
            .process_batch(vec![
                chunk("fn good() { fine(); }", 1),
                chunk("fn bad() { POISON; }", 12),
                chunk("fn also_good() { fine(); }", 24),
            ])
            .await
            .unwrap();

        assert_eq!(records.len(), 3);
        assert!(records[0].success);
        assert!(!records[1].success);
        assert!(records[1].vector.is_empty());
        assert!(records[1].error.as_deref().unwrap().contains("POISON"));
        assert!(records[2].success);
    }

    #[tokio::test]
    async fn query_uses_same_dimension_as_chunks() {
        let pool = EmbeddingPool::start(&test_config(2), hash_backend_factory(48))
            .await
            .unwrap();
        let query = pool.embed_query("find the auth middleware").await.unwrap();
        assert_eq!(query.len(), pool.dimension());
    }

    #[tokio::test]
    async fn degraded_pool_continues_with_remaining_workers() {
        let pool = EmbeddingPool::start(&test_config(3), flaky_startup_factory(32, 1))
            .await
            .unwrap();
        assert_eq!(pool.worker_count(), 2);

        let records = pool
            .process_batch(vec![chunk("fn still_works() { run(); }", 1)])
            .await
            .unwrap();
        assert!(records[0].success);
    }

    #[tokio::test]
    async fn zero_ready_workers_fails_startup() {
        let result = EmbeddingPool::start(&test_config(2), flaky_startup_factory(32, 2)).await;
        let err = result.unwrap_err();
        assert!(matches!(err, QuarryError::Worker(_)), "got {err}");
    }

    #[tokio::test]
    async fn dispatch_after_shutdown_surfaces_worker_error() {
        let pool = EmbeddingPool::start(&test_config(1), hash_backend_factory(32))
            .await
            .unwrap();
        pool.shutdown();
        // Give the unit a moment to drain its queue and exit.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let result = pool
            .process_batch(vec![chunk("fn too_late() { gone(); }", 1)])
            .await;
        assert!(matches!(result, Err(QuarryError::Worker(_))));
    }

    #[tokio::test]
    async fn shutdown_abandons_in_flight_and_queued_batches() {
        // One slow unit, two batches queued behind each other. Shutdown
        // lands while the first batch is mid-embed; both awaiters must
        // see a worker error instead of late results.
        let pool = EmbeddingPool::start(
            &test_config(1),
            slow_backend_factory(32, Duration::from_millis(200)),
        )
        .await
        .unwrap();

        let first = pool.dispatch(vec![
            chunk("fn slow_one() { crunch(); }", 1),
            chunk("fn slow_two() { crunch(); }", 12),
        ]);
        let second = pool.dispatch(vec![chunk("fn queued() { waits(); }", 24)]);

        // Let the unit pick up the first batch before signaling.
        tokio::time::sleep(Duration::from_millis(50)).await;
        pool.shutdown();

        assert!(matches!(first.wait().await, Err(QuarryError::Worker(_))));
        assert!(matches!(second.wait().await, Err(QuarryError::Worker(_))));
    }

    #[tokio::test]
    async fn shutdown_latency_is_bounded_by_one_embed_call() {
        // A long queue must not delay teardown: the unit exits after at
        // most the embed call it is in, not after draining the queue.
        let pool = EmbeddingPool::start(
            &test_config(1),
            slow_backend_factory(32, Duration::from_millis(100)),
        )
        .await
        .unwrap();

        for i in 0..20 {
            // Handles are dropped; abandoned replies go nowhere.
            let _ = pool.dispatch(vec![chunk("fn burst() { spin(); }", i * 10 + 1)]);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        let started = Instant::now();
        drop(pool);
        // 20 batches x 100ms would be ~2s if the queue drained.
        assert!(
            started.elapsed() < Duration::from_millis(1000),
            "pool teardown drained the queue: {:?}",
            started.elapsed()
        );
    }

    #[tokio::test]
    async fn batches_correlate_by_id() {
        let pool = EmbeddingPool::start(&test_config(2), hash_backend_factory(32))
            .await
            .unwrap();
        let first = pool.dispatch(vec![chunk("fn one() { a(); }", 1)]);
        let second = pool.dispatch(vec![chunk("fn two() { b(); }", 20)]);
        assert_ne!(first.batch_id(), second.batch_id());

        // Await out of dispatch order.
        let second_records = second.wait().await.unwrap();
        let first_records = first.wait().await.unwrap();
        assert_eq!(first_records[0].start_line, 1);
        assert_eq!(second_records[0].start_line, 20);
    }
}
