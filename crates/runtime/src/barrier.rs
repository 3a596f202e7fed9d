// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Synchronisation primitives for the worker pool.
//!
//! | Primitive | Used for |
//! |---|---|
//! | [`SpinBarrier`] | rendezvous of all workers around one kernel |
//! | [`BarrierPair`] | the start/end barriers of one blocking op |
//! | [`CountdownLatch`] | the main thread waiting for a pass to finish |
//! | [`StartSignal`] | releasing idle workers into the next pass |
//!
//! Mutex poisoning is ignored everywhere: a worker panic aborts the whole
//! process before any lock could be observed poisoned.

use std::hint;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── SpinBarrier ────────────────────────────────────────────────────

/// Reusable N-party barrier.
///
/// Each round has a generation number (the barrier's "sense"). Arriving
/// threads record the generation, count themselves in, and wait until the
/// last arrival flips the generation. Waiters spin for `spin_iterations`
/// before parking on a condition variable, so short kernels pay no syscall.
///
/// Everything a thread wrote before arriving happens-before everything any
/// thread reads after leaving the same round.
#[derive(Debug)]
pub struct SpinBarrier {
    parties: AtomicUsize,
    waiting: AtomicUsize,
    generation: AtomicU64,
    arrivals: AtomicU64,
    spin_iterations: u32,
    lock: Mutex<()>,
    cvar: Condvar,
}

impl SpinBarrier {
    /// Creates a barrier for `parties` threads (at least one).
    pub fn new(parties: usize, spin_iterations: u32) -> Self {
        Self {
            parties: AtomicUsize::new(parties.max(1)),
            waiting: AtomicUsize::new(0),
            generation: AtomicU64::new(0),
            arrivals: AtomicU64::new(0),
            spin_iterations,
            lock: Mutex::new(()),
            cvar: Condvar::new(),
        }
    }

    /// Blocks until all parties have arrived.
    ///
    /// Returns `true` on exactly one thread per round (the last to arrive).
    pub fn arrive_and_wait(&self) -> bool {
        self.arrivals.fetch_add(1, Ordering::Relaxed);
        let generation = self.generation.load(Ordering::Acquire);
        let parties = self.parties.load(Ordering::Relaxed);

        if self.waiting.fetch_add(1, Ordering::AcqRel) + 1 == parties {
            self.waiting.store(0, Ordering::Relaxed);
            {
                let _guard = lock(&self.lock);
                self.generation.store(generation.wrapping_add(1), Ordering::Release);
            }
            self.cvar.notify_all();
            return true;
        }

        for _ in 0..self.spin_iterations {
            if self.generation.load(Ordering::Acquire) != generation {
                return false;
            }
            hint::spin_loop();
        }

        let mut guard = lock(&self.lock);
        while self.generation.load(Ordering::Acquire) == generation {
            guard = self.cvar.wait(guard).unwrap_or_else(PoisonError::into_inner);
        }
        false
    }

    /// Rearms the barrier for `parties` threads.
    ///
    /// Must only be called while no thread is waiting on it.
    pub fn reset(&self, parties: usize) {
        self.parties.store(parties.max(1), Ordering::Relaxed);
        self.waiting.store(0, Ordering::Release);
    }

    /// Number of parties per round.
    pub fn parties(&self) -> usize {
        self.parties.load(Ordering::Relaxed)
    }

    /// Total arrivals since creation. Diagnostic only.
    pub fn arrivals(&self) -> u64 {
        self.arrivals.load(Ordering::Relaxed)
    }

    /// Completed rounds since creation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

/// The barriers around one blocking op: every worker passes `start` before
/// reading the op's inputs and `end` after writing its shard.
#[derive(Debug)]
pub struct BarrierPair {
    pub start: SpinBarrier,
    pub end: SpinBarrier,
}

impl BarrierPair {
    pub fn new(parties: usize, spin_iterations: u32) -> Self {
        Self {
            start: SpinBarrier::new(parties, spin_iterations),
            end: SpinBarrier::new(parties, spin_iterations),
        }
    }

    pub fn reset(&self, parties: usize) {
        self.start.reset(parties);
        self.end.reset(parties);
    }
}

// ── CountdownLatch ─────────────────────────────────────────────────

/// One-shot counter the main thread waits on; rearmed per pass.
#[derive(Debug, Default)]
pub struct CountdownLatch {
    remaining: Mutex<usize>,
    cvar: Condvar,
}

impl CountdownLatch {
    pub fn new(count: usize) -> Self {
        Self {
            remaining: Mutex::new(count),
            cvar: Condvar::new(),
        }
    }

    /// Sets the count for the next round.
    pub fn reset(&self, count: usize) {
        *lock(&self.remaining) = count;
    }

    /// Decrements the count, waking waiters when it reaches zero.
    pub fn count_down(&self) {
        let mut remaining = lock(&self.remaining);
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            self.cvar.notify_all();
        }
    }

    /// Blocks until the count reaches zero.
    pub fn wait(&self) {
        let mut remaining = lock(&self.remaining);
        while *remaining > 0 {
            remaining = self.cvar.wait(remaining).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

// ── StartSignal ────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct SignalState {
    generation: u64,
    shutdown: bool,
}

/// Generation counter that releases idle workers.
///
/// The mutex handoff is the happens-before edge between the main thread
/// writing a pass's inputs and the workers reading them.
#[derive(Debug, Default)]
pub struct StartSignal {
    state: Mutex<SignalState>,
    cvar: Condvar,
}

impl StartSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the next generation and wakes every waiting worker.
    pub fn release(&self) -> u64 {
        let mut state = lock(&self.state);
        state.generation += 1;
        let generation = state.generation;
        drop(state);
        self.cvar.notify_all();
        generation
    }

    /// Wakes every worker for good.
    pub fn shutdown(&self) {
        lock(&self.state).shutdown = true;
        self.cvar.notify_all();
    }

    /// Blocks until a generation newer than `seen` starts.
    ///
    /// Returns `None` once the signal is shut down.
    pub fn wait(&self, seen: u64) -> Option<u64> {
        let mut state = lock(&self.state);
        while !state.shutdown && state.generation == seen {
            state = self.cvar.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
        if state.shutdown {
            None
        } else {
            Some(state.generation)
        }
    }
}
