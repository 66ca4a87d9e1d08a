//! Task queue and worker pool
//!
//! A fixed number of workers pull fetch jobs from a shared FIFO queue and run
//! them one at a time. The shared rate limiter, not the worker count, bounds
//! how often the portal is hit.

use async_trait::async_trait;
use futures::FutureExt;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::data_collector::JobOutcome;
use crate::models::FetchJob;

/// Work performed for each dequeued job
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, job: &FetchJob) -> JobOutcome;
}

/// Outcome counters accumulated since the last [`WorkerPool::take_stats`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub completed: usize,
    pub stored: usize,
    pub already_stored: usize,
    pub not_filed: usize,
    pub transient_failures: usize,
    pub parse_failures: usize,
    pub store_failures: usize,
    pub cancelled: usize,
}

impl SweepStats {
    fn record(&mut self, outcome: &JobOutcome) {
        self.completed += 1;
        match outcome {
            JobOutcome::Stored => self.stored += 1,
            JobOutcome::AlreadyStored => self.already_stored += 1,
            JobOutcome::NotFiled => self.not_filed += 1,
            JobOutcome::Transient(_) => self.transient_failures += 1,
            JobOutcome::ParseFailed(_) => self.parse_failures += 1,
            JobOutcome::StoreFailed(_) => self.store_failures += 1,
        }
    }

    pub fn failures(&self) -> usize {
        self.transient_failures + self.parse_failures + self.store_failures
    }
}

#[derive(Default)]
struct QueueState {
    jobs: VecDeque<FetchJob>,
    /// queued plus in-flight jobs
    outstanding: usize,
    closed: bool,
    stats: SweepStats,
}

#[derive(Default)]
struct Shared {
    state: Mutex<QueueState>,
    job_ready: Notify,
    idle: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // counters stay consistent even if a holder panicked
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn complete(&self, outcome: &JobOutcome) {
        let mut state = self.lock();
        state.outstanding -= 1;
        state.stats.record(outcome);
        if state.outstanding == 0 {
            self.idle.notify_waiters();
        }
    }
}

/// Fixed-size pool of fetch workers fed by a FIFO queue
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `worker_count` workers (at least one) on the current runtime
    pub fn start(handler: Arc<dyn JobHandler>, worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        let shared = Arc::new(Shared::default());

        let workers = (0..worker_count)
            .map(|worker_id| {
                let shared = Arc::clone(&shared);
                let handler = Arc::clone(&handler);
                tokio::spawn(worker_loop(worker_id, shared, handler))
            })
            .collect();

        info!("🚀 Started {} fetch workers", worker_count);
        Self { shared, workers }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Queue a job. Returns false once the pool has been cancelled.
    pub fn enqueue(&self, job: FetchJob) -> bool {
        {
            let mut state = self.shared.lock();
            if state.closed {
                warn!("pool is shutting down, dropping job {}", job);
                return false;
            }
            state.jobs.push_back(job);
            state.outstanding += 1;
        }
        self.shared.job_ready.notify_one();
        true
    }

    /// Queue jobs in order; returns how many were accepted
    pub fn enqueue_all<I>(&self, jobs: I) -> usize
    where
        I: IntoIterator<Item = FetchJob>,
    {
        jobs.into_iter().map(|job| self.enqueue(job)).filter(|accepted| *accepted).count()
    }

    /// Jobs queued or running
    pub fn outstanding(&self) -> usize {
        self.shared.lock().outstanding
    }

    /// Wait until every queued and in-flight job has finished.
    ///
    /// Jobs enqueued while draining are waited for as long as they arrive
    /// before the outstanding count reaches zero.
    pub async fn drain(&self) {
        loop {
            let idle = self.shared.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();

            if self.shared.lock().outstanding == 0 {
                return;
            }
            idle.await;
        }
    }

    /// Take the counters accumulated since the previous call
    pub fn take_stats(&self) -> SweepStats {
        std::mem::take(&mut self.shared.lock().stats)
    }

    /// Stop accepting work and drop queued jobs. In-flight jobs finish
    /// normally; use [`drain`](Self::drain) to wait for them.
    pub fn cancel(&self) -> usize {
        let dropped = {
            let mut state = self.shared.lock();
            state.closed = true;
            let dropped = state.jobs.len();
            state.jobs.clear();
            state.outstanding -= dropped;
            state.stats.cancelled += dropped;
            if state.outstanding == 0 {
                self.shared.idle.notify_waiters();
            }
            dropped
        };
        self.shared.job_ready.notify_waiters();

        if dropped > 0 {
            info!("🛑 Cancelled {} queued jobs", dropped);
        }
        dropped
    }

    /// Cancel, let in-flight jobs finish, and wait for every worker to exit
    pub async fn shutdown(self) {
        self.cancel();
        for result in futures::future::join_all(self.workers).await {
            if let Err(e) = result {
                error!("worker task ended abnormally: {}", e);
            }
        }
        debug!("worker pool stopped");
    }
}

async fn worker_loop(worker_id: usize, shared: Arc<Shared>, handler: Arc<dyn JobHandler>) {
    debug!("worker {} started", worker_id);

    loop {
        // register before checking the queue so a notify between the two is not lost
        let job_ready = shared.job_ready.notified();
        tokio::pin!(job_ready);
        job_ready.as_mut().enable();

        let next = {
            let mut state = shared.lock();
            if state.closed {
                break;
            }
            state.jobs.pop_front()
        };

        let Some(job) = next else {
            job_ready.await;
            continue;
        };

        debug!("worker {} processing {}", worker_id, job);
        let outcome = match AssertUnwindSafe(handler.handle(&job)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(_) => {
                error!("💥 worker {} panicked while processing {}", worker_id, job);
                JobOutcome::Transient("job panicked".to_string())
            }
        };
        shared.complete(&outcome);
    }

    debug!("worker {} stopped", worker_id);
}
