//! Thread-pool implementation of [`WorkerBridge`].
//!
//! Requests are queued on a crossbeam channel shared by all workers. Each
//! worker runs the tile pipeline (fetch, decode, and for full detail expand
//! the occupancy and mesh it), checking the task's cancellation flag between
//! stages, and reports back on a result channel. [`WorkerPool::poll`] runs on
//! the owner thread: it hands results to their completers, fails requests
//! whose deadline passed, and replaces crashed workers.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, unbounded};
use dashmap::DashMap;
use tessera_mesh::MeshKernel;
use tessera_voxel::AtlasImage;

use crate::bridge::{Detail, FetchPayload, FetchRequest, FetchResult, WorkerBridge};
use crate::error::FetchError;
use crate::scheduler::{CancelToken, Completer, TaskContext, TaskId};
use crate::source::TileSource;

/// The per-request work done on a worker thread.
pub struct TilePipeline {
    source: Box<dyn TileSource>,
    kernel: Box<dyn MeshKernel>,
    side: usize,
}

impl TilePipeline {
    pub fn new(source: Box<dyn TileSource>, kernel: Box<dyn MeshKernel>, side: usize) -> Self {
        Self {
            source,
            kernel,
            side,
        }
    }

    /// Runs every stage for the request. Returns `None` if the token was
    /// cancelled between stages.
    pub fn process(&self, request: &FetchRequest, cancel: &CancelToken) -> Option<FetchResult> {
        if cancel.is_cancelled() {
            return None;
        }
        let bytes = match self.source.fetch(request.tile) {
            Ok(bytes) => bytes,
            Err(e) => return Some(Err(e)),
        };
        if cancel.is_cancelled() {
            return None;
        }
        let bitmap = match AtlasImage::decode(&bytes) {
            Ok(bitmap) => bitmap,
            Err(e) => return Some(Err(e.into())),
        };
        if request.mode != Detail::Full {
            return Some(Ok(FetchPayload {
                bitmap,
                occupancy: None,
                mesh: None,
                mode: Detail::Image,
            }));
        }
        if cancel.is_cancelled() {
            return None;
        }
        let occupancy = match bitmap.to_occupancy(self.side) {
            Ok(occupancy) => occupancy,
            Err(e) => return Some(Err(e.into())),
        };
        if cancel.is_cancelled() {
            return None;
        }
        let mesh = self.kernel.mesh(&occupancy);
        Some(Ok(FetchPayload {
            bitmap,
            occupancy: Some(occupancy),
            mesh: Some(mesh),
            mode: Detail::Full,
        }))
    }
}

struct Job {
    id: TaskId,
    request: FetchRequest,
    cancel: CancelToken,
}

struct Pending {
    deadline: Instant,
    cancel: CancelToken,
    completer: Completer<FetchResult>,
}

enum WorkerMessage {
    Done { id: TaskId, result: FetchResult },
    Crashed { worker: usize, reason: String },
}

/// Fixed-size pool of fetch workers.
pub struct WorkerPool {
    job_sender: Sender<Job>,
    job_receiver: Receiver<Job>,
    result_sender: Sender<WorkerMessage>,
    result_receiver: Receiver<WorkerMessage>,
    pending: DashMap<TaskId, Pending>,
    pipeline: Arc<TilePipeline>,
    timeout: Duration,
    threads: usize,
    spawned: AtomicUsize,
}

impl WorkerPool {
    /// Starts `threads` workers (0 picks a count from the available cores).
    pub fn new(pipeline: TilePipeline, threads: usize, timeout: Duration) -> std::io::Result<Self> {
        let threads = if threads == 0 {
            let cpus = num_cpus::get().max(2);
            (cpus - 1).max(1)
        } else {
            threads
        };
        let (job_sender, job_receiver) = unbounded();
        let (result_sender, result_receiver) = unbounded();
        let pool = Self {
            job_sender,
            job_receiver,
            result_sender,
            result_receiver,
            pending: DashMap::new(),
            pipeline: Arc::new(pipeline),
            timeout,
            threads,
            spawned: AtomicUsize::new(0),
        };
        for _ in 0..threads {
            pool.spawn_worker()?;
        }
        tracing::info!(threads, ?timeout, "worker pool started");
        Ok(pool)
    }

    fn spawn_worker(&self) -> std::io::Result<()> {
        let worker = self.spawned.fetch_add(1, Ordering::Relaxed);
        let jobs = self.job_receiver.clone();
        let results = self.result_sender.clone();
        let pipeline = Arc::clone(&self.pipeline);

        std::thread::Builder::new()
            .name(format!("tile-worker-{worker}"))
            .spawn(move || {
                while let Ok(job) = jobs.recv() {
                    let outcome = catch_unwind(AssertUnwindSafe(|| {
                        pipeline.process(&job.request, &job.cancel)
                    }));
                    match outcome {
                        Ok(Some(result)) => {
                            let _ = results.send(WorkerMessage::Done { id: job.id, result });
                        }
                        Ok(None) => {}
                        Err(panic) => {
                            let reason = panic
                                .downcast_ref::<&str>()
                                .map(|s| s.to_string())
                                .or_else(|| panic.downcast_ref::<String>().cloned())
                                .unwrap_or_else(|| "unknown panic".to_string());
                            let _ = results.send(WorkerMessage::Crashed { worker, reason });
                            return;
                        }
                    }
                }
            })?;
        Ok(())
    }

    /// Number of worker threads kept alive.
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Workers spawned so far, including replacements.
    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::Relaxed)
    }

    /// Requests handed out and not yet delivered, failed or cancelled.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    fn fail_all(&self, error: &FetchError) {
        let ids: Vec<TaskId> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, pending)) = self.pending.remove(&id) {
                pending.cancel.cancel();
                pending.completer.complete(Err(error.clone()));
            }
        }
    }
}

impl WorkerBridge for WorkerPool {
    fn run(&self, request: FetchRequest, ctx: TaskContext<FetchResult>) {
        let id = ctx.id();
        let (cancel, completer) = ctx.into_parts();
        self.pending.insert(
            id,
            Pending {
                deadline: Instant::now() + self.timeout,
                cancel: cancel.clone(),
                completer,
            },
        );
        let job = Job {
            id,
            request,
            cancel,
        };
        if self.job_sender.send(job).is_err()
            && let Some((_, pending)) = self.pending.remove(&id)
        {
            pending
                .completer
                .complete(Err(FetchError::Network("worker pool shut down".into())));
        }
    }

    fn poll(&self) {
        while let Ok(message) = self.result_receiver.try_recv() {
            match message {
                WorkerMessage::Done { id, result } => {
                    if let Some((_, pending)) = self.pending.remove(&id) {
                        pending.completer.complete(result);
                    }
                }
                WorkerMessage::Crashed { worker, reason } => {
                    tracing::warn!(worker, %reason, "tile worker crashed, respawning");
                    if let Err(e) = self.spawn_worker() {
                        tracing::error!("failed to respawn tile worker: {e}");
                    }
                    self.fail_all(&FetchError::WorkerCrashed);
                }
            }
        }

        let now = Instant::now();
        let finished: Vec<(TaskId, bool)> = self
            .pending
            .iter()
            .filter_map(|entry| {
                let p = entry.value();
                if p.cancel.is_cancelled() {
                    Some((*entry.key(), false))
                } else if now >= p.deadline {
                    Some((*entry.key(), true))
                } else {
                    None
                }
            })
            .collect();
        for (id, expired) in finished {
            let Some((_, pending)) = self.pending.remove(&id) else {
                continue;
            };
            if expired {
                tracing::warn!(id, timeout = ?self.timeout, "tile request timed out");
                pending.cancel.cancel();
                pending.completer.complete(Err(FetchError::Timeout(self.timeout)));
            }
        }
    }
}
