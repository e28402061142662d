//! src/prefetch/mod.rs
//!
//! Asynchronous read-ahead over any [`Dataset`].
//!
//! ```text
//!                 ┌──────────── window (Mutex<VecDeque>) ────────────┐
//!   get(i) ──►    │ i │ i+1 │ i+2 │ ... │ i+D-1 │   one reply per index │
//!                 └──┬─────┬─────┬───────────┬──────────────────────┘
//!                    │     │     │           │   FetchTask { index, reply }
//!                    ▼     ▼     ▼           ▼
//!               ┌──────────── bounded task channel ─────────────┐
//!               │  prefetch-worker-0 .. prefetch-worker-{P-1}   │──► source.get(index)
//!               └───────────────────────────────────────────────┘
//! ```
//!
//! The window holds the reply receivers of a contiguous run of scheduled
//! indices. `get(i)` takes the receiver for `i` out of the window under the
//! lock, tops the window back up, then waits for the result with the lock
//! released. Because each index has its own reply channel, results are
//! delivered in request order whatever order the workers finish in.

mod pool;

use crate::dataset::Dataset;
use crate::error::{check_index, DataError};
use crate::sample::Sample;
use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use pool::{WorkerPool, WORKER_ID};
use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

type Reply = Result<Sample>;

/// One scheduled retrieval.
struct FetchTask {
    index: usize,
    reply: Sender<Reply>,
}

/// Contiguous run of scheduled indices `start .. start + pending.len()`.
#[derive(Default)]
struct Window {
    start: usize,
    pending: VecDeque<Receiver<Reply>>,
}

impl Window {
    fn contains(&self, index: usize) -> bool {
        index >= self.start && index < self.start + self.pending.len()
    }

    fn next_unscheduled(&self) -> usize {
        self.start + self.pending.len()
    }
}

/// Wraps a dataset with a fixed pool of `num_threads` workers that keep up
/// to `prefetch_size` indices ahead of the consumer.
///
/// - Results come back in the order they were requested.
/// - Under sequential increasing access every index is read from the source
///   exactly once.
/// - A failing or panicking `source.get` only affects its own `get` call.
/// - Dropping the wrapper stops and joins every worker before the source
///   handle is released.
///
/// With `num_threads == 0` or `prefetch_size == 0` no pool is started and
/// `get` forwards to the source directly.
pub struct PrefetchDataset<D: Dataset + ?Sized> {
    source: Arc<D>,
    prefetch_size: usize,
    window: Mutex<Window>,
    pool: Option<WorkerPool<FetchTask>>,
}

impl<D: Dataset + ?Sized + 'static> PrefetchDataset<D> {
    pub fn new(source: Arc<D>, num_threads: usize, prefetch_size: usize) -> Result<Self> {
        if num_threads == 0 || prefetch_size == 0 {
            debug!(num_threads, prefetch_size, "prefetch disabled, forwarding to source");
            return Ok(Self {
                source,
                prefetch_size: 0,
                window: Mutex::new(Window::default()),
                pool: None,
            });
        }

        let worker_source = source.clone();
        let pool = WorkerPool::new(
            num_threads,
            prefetch_size * 2,
            move |task: FetchTask| {
                let result = fetch_guarded(worker_source.as_ref(), task.index);
                // The consumer may have discarded this index; nothing to do then
                let _ = task.reply.send(result);
            },
        )?;

        let prefetch = Self {
            source,
            prefetch_size,
            window: Mutex::new(Window::default()),
            pool: Some(pool),
        };
        {
            let mut window = prefetch.lock_window()?;
            prefetch.refill(&mut window)?;
        }
        debug!(
            num_threads,
            prefetch_size,
            len = prefetch.source.len(),
            "started prefetch dataset"
        );
        Ok(prefetch)
    }

    pub fn source(&self) -> &Arc<D> {
        &self.source
    }

    pub fn prefetch_size(&self) -> usize {
        self.prefetch_size
    }

    pub fn num_threads(&self) -> usize {
        self.pool.as_ref().map_or(0, |pool| pool.num_workers())
    }

    fn lock_window(&self) -> Result<std::sync::MutexGuard<'_, Window>> {
        self.window
            .lock()
            .map_err(|_| anyhow!("Prefetch window lock poisoned"))
    }

    fn schedule(&self, index: usize) -> Result<Receiver<Reply>> {
        let pool = self
            .pool
            .as_ref()
            .ok_or_else(|| anyhow!("Prefetch pool is not running"))?;
        let (reply, receiver) = bounded(1);
        pool.submit(FetchTask { index, reply })?;
        Ok(receiver)
    }

    /// Tops the window up to `prefetch_size` scheduled indices.
    fn refill(&self, window: &mut Window) -> Result<()> {
        let len = self.source.len();
        while window.pending.len() < self.prefetch_size {
            let next = window.next_unscheduled();
            if next >= len {
                break;
            }
            let receiver = self.schedule(next)?;
            window.pending.push_back(receiver);
        }
        Ok(())
    }
}

impl<D: Dataset + ?Sized + 'static> Dataset for PrefetchDataset<D> {
    fn len(&self) -> usize {
        self.source.len()
    }

    fn get(&self, index: usize) -> Result<Sample> {
        check_index(index, self.len())?;
        if self.pool.is_none() {
            return self.source.get(index);
        }

        let receiver = {
            let mut window = self.lock_window()?;
            if window.contains(index) {
                let skipped = index - window.start;
                window.pending.drain(..skipped);
            } else {
                debug!(index, window_start = window.start, "prefetch miss, restarting window");
                window.pending.clear();
            }
            window.start = index;

            let receiver = match window.pending.pop_front() {
                Some(receiver) => receiver,
                None => self.schedule(index)?,
            };
            window.start = index + 1;
            self.refill(&mut window)?;
            receiver
        };

        receiver
            .recv()
            .map_err(|_| anyhow::Error::from(DataError::WorkerDisconnected { index }))?
    }
}

impl<D: Dataset + ?Sized> Drop for PrefetchDataset<D> {
    fn drop(&mut self) {
        // Discard pending replies first so workers do not block on them
        if let Ok(mut window) = self.window.lock() {
            window.pending.clear();
        }
        // Joins every worker; the source handle is released afterwards
        self.pool.take();
    }
}

/// Runs `source.get(index)`, turning a panic into [`DataError::WorkerPanicked`].
fn fetch_guarded<D: Dataset + ?Sized>(source: &D, index: usize) -> Reply {
    match panic::catch_unwind(AssertUnwindSafe(|| source.get(index))) {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            let worker_id = WORKER_ID.with(|id| id.get());
            warn!(worker_id, index, %message, "source panicked during prefetch");
            Err(DataError::WorkerPanicked { index, message }.into())
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
