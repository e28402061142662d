//! Fixed-size worker pool backing [`PrefetchDataset`](super::PrefetchDataset).
//!
//! Workers pull tasks from one shared bounded channel. There is no shared
//! output channel: every task carries its own reply handle, so results are
//! routed back to the exact caller that scheduled them.
//!
//! # Lifecycle
//! - Threads are spawned once at construction, named `prefetch-worker-{id}`
//! - Each worker polls the task channel with a timeout and checks the
//!   shutdown flag between polls
//! - Drop raises the flag, closes the task channel and joins every thread

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::debug;

/// How long an idle worker waits on the task channel before re-checking the
/// shutdown flag.
pub(crate) const POLL_INTERVAL_MS: u64 = 20;

thread_local! {
    /// Id of the pool worker running on this thread (0 outside a pool).
    pub(crate) static WORKER_ID: Cell<usize> = const { Cell::new(0) };
}

/// Thread pool with a single bounded task queue.
///
/// - Task channel: consumer -> workers
/// - Shutdown flag: set on drop, observed by idle workers
pub(crate) struct WorkerPool<Task> {
    workers: Vec<thread::JoinHandle<()>>,
    task_tx: Option<Sender<Task>>,
    shutdown: Arc<AtomicBool>,
}

impl<Task> WorkerPool<Task>
where
    Task: Send + 'static,
{
    /// Spawns `num_workers` threads, each running `handle` for every task it
    /// receives.
    pub(crate) fn new<F>(num_workers: usize, buffer_size: usize, handle: F) -> Result<Self>
    where
        F: Fn(Task) + Send + Sync + 'static,
    {
        if num_workers == 0 {
            return Err(anyhow!(
                "Cannot create WorkerPool with 0 workers. \
                Use a pass-through dataset instead."
            ));
        }
        if buffer_size == 0 {
            return Err(anyhow!(
                "Cannot create WorkerPool with buffer_size 0. \
                Buffer size must be > 0 to prevent deadlocks."
            ));
        }

        let (task_tx, task_rx) = bounded::<Task>(buffer_size);
        let shutdown = Arc::new(AtomicBool::new(false));
        let handle = Arc::new(handle);
        let mut workers = Vec::with_capacity(num_workers);

        for worker_id in 0..num_workers {
            let task_rx = task_rx.clone();
            let worker_shutdown = shutdown.clone();
            let handle = handle.clone();

            let spawned = thread::Builder::new()
                .name(format!("prefetch-worker-{}", worker_id))
                .spawn(move || {
                    WORKER_ID.with(|id| id.set(worker_id));
                    Self::run(task_rx, worker_shutdown, handle.as_ref());
                })
                .with_context(|| format!("Failed to spawn worker thread {}", worker_id));

            match spawned {
                Ok(worker) => workers.push(worker),
                Err(e) => {
                    // Tear down the threads that did start before reporting
                    drop(Self {
                        workers,
                        task_tx: Some(task_tx),
                        shutdown,
                    });
                    return Err(e);
                }
            }
        }

        debug!(num_workers, buffer_size, "started prefetch worker pool");
        Ok(Self {
            workers,
            task_tx: Some(task_tx),
            shutdown,
        })
    }

    fn run(task_rx: Receiver<Task>, shutdown: Arc<AtomicBool>, handle: &(dyn Fn(Task) + Sync)) {
        loop {
            if shutdown.load(Ordering::Acquire) {
                break;
            }
            match task_rx.recv_timeout(Duration::from_millis(POLL_INTERVAL_MS)) {
                Ok(task) => handle(task),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    /// Queues a task, blocking while the channel is full.
    pub(crate) fn submit(&self, task: Task) -> Result<()> {
        let task_tx = self
            .task_tx
            .as_ref()
            .ok_or_else(|| anyhow!("WorkerPool is shut down"))?;
        task_tx
            .send(task)
            .map_err(|_| anyhow!("All prefetch workers have exited"))
    }

    pub(crate) fn num_workers(&self) -> usize {
        self.workers.len()
    }
}

impl<Task> Drop for WorkerPool<Task> {
    fn drop(&mut self) {
        // Signal shutdown to all workers
        self.shutdown.store(true, Ordering::Release);

        // Close the task channel; queued tasks are dropped with it
        self.task_tx.take();

        // Wait for in-flight tasks to finish
        let num_workers = self.workers.len();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        debug!(num_workers, "stopped prefetch worker pool");
    }
}
