// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Fixed pool of persistent worker threads.
//!
//! Workers are spawned once and then sleep on a [`StartSignal`]. Each call
//! to [`ThreadPool::run`] hands every worker the same task, releases them,
//! and blocks the caller until all of them have finished. There is no
//! queue: one task runs at a time and the calling thread does not compute.

use crate::barrier::{CountdownLatch, StartSignal};
use crate::RuntimeError;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

/// Work executed by every worker of a pool.
pub trait WorkerTask: Send + Sync {
    /// Runs worker `ith` of `nth`.
    fn run(&self, ith: usize, nth: usize);
}

struct Shared {
    signal: StartSignal,
    done: CountdownLatch,
    task: Mutex<Option<Arc<dyn WorkerTask>>>,
    thread_count: usize,
}

/// A fixed set of named worker threads.
pub struct ThreadPool {
    shared: Arc<Shared>,
    handles: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Spawns `thread_count` workers named `ginfer-worker-{i}`.
    ///
    /// # Errors
    /// - [`RuntimeError::ConfigError`] for a zero thread count.
    /// - [`RuntimeError::ThreadSpawn`] if the OS refuses a thread.
    pub fn new(thread_count: usize) -> Result<Self, RuntimeError> {
        if thread_count == 0 {
            return Err(RuntimeError::ConfigError("thread count must be at least 1".into()));
        }
        let shared = Arc::new(Shared {
            signal: StartSignal::new(),
            done: CountdownLatch::new(0),
            task: Mutex::new(None),
            thread_count,
        });

        let mut pool = Self {
            shared,
            handles: Vec::with_capacity(thread_count),
        };
        for index in 0..thread_count {
            let shared = pool.shared.clone();
            // On error, dropping `pool` shuts down the workers spawned so far.
            let handle = thread::Builder::new()
                .name(format!("ginfer-worker-{index}"))
                .spawn(move || worker_loop(&shared, index))
                .map_err(|source| RuntimeError::ThreadSpawn { index, source })?;
            pool.handles.push(handle);
        }

        tracing::info!(threads = thread_count, "worker pool spawned");
        Ok(pool)
    }

    /// Number of workers.
    pub fn thread_count(&self) -> usize {
        self.shared.thread_count
    }

    /// Runs `task` on every worker and waits for all of them to return.
    ///
    /// The exclusive borrow keeps a second pass from being released while
    /// workers are still inside the first.
    pub fn run(&mut self, task: Arc<dyn WorkerTask>) {
        *self.shared.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
        self.shared.done.reset(self.shared.thread_count);
        let generation = self.shared.signal.release();
        tracing::trace!(generation, "pool released");
        self.shared.done.wait();
        self.shared.task.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

fn worker_loop(shared: &Shared, index: usize) {
    let mut seen = 0;
    while let Some(generation) = shared.signal.wait(seen) {
        seen = generation;
        let task = shared.task.lock().unwrap_or_else(PoisonError::into_inner).clone();
        if let Some(task) = task {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| task.run(index, shared.thread_count)));
            if outcome.is_err() {
                // Peers are parked on barriers this worker will never reach.
                tracing::error!(worker = index, "worker panicked; aborting");
                std::process::abort();
            }
        }
        shared.done.count_down();
    }
    tracing::trace!(worker = index, "worker exiting");
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shared.signal.shutdown();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
        tracing::debug!("worker pool shut down");
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("thread_count", &self.shared.thread_count)
            .finish()
    }
}
