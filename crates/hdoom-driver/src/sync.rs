//! Blocking primitives: completions, the interruptible device lock and the reference count.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Counting completion signal.
///
/// `complete` may run before the matching `wait`; the count carries it over. `reinit` drops any
/// stale completions before a new request is issued.
pub(crate) struct Completion {
    name: &'static str,
    done: Mutex<u32>,
    cond: Condvar,
}

impl Completion {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            done: Mutex::new(0),
            cond: Condvar::new(),
        }
    }

    pub(crate) fn reinit(&self) {
        *lock(&self.done) = 0;
    }

    pub(crate) fn complete(&self) {
        let mut done = lock(&self.done);
        *done = done.saturating_add(1);
        self.cond.notify_all();
    }

    /// Blocks until a completion is available, then consumes it. Logs every `warn_after` spent
    /// waiting.
    pub(crate) fn wait(&self, warn_after: Duration) {
        let started = Instant::now();
        let mut done = lock(&self.done);
        while *done == 0 {
            let (guard, res) = self
                .cond
                .wait_timeout(done, warn_after)
                .unwrap_or_else(PoisonError::into_inner);
            done = guard;
            if res.timed_out() && *done == 0 {
                tracing::warn!(
                    signal = self.name,
                    waited_ms = started.elapsed().as_millis() as u64,
                    "device has not signalled yet"
                );
            }
        }
        *done -= 1;
    }
}

struct Gate {
    held: bool,
    /// Bumped by `interrupt_waiters`; a waiter that sees it change gives up.
    generation: u64,
}

/// Mutex whose waiters can be interrupted.
///
/// The payload sits behind an ordinary mutex that is only ever taken by the gate holder, so it is
/// uncontended.
pub(crate) struct BatchLock<T> {
    gate: Mutex<Gate>,
    cond: Condvar,
    data: Mutex<T>,
}

impl<T> BatchLock<T> {
    pub(crate) fn new(value: T) -> Self {
        Self {
            gate: Mutex::new(Gate {
                held: false,
                generation: 0,
            }),
            cond: Condvar::new(),
            data: Mutex::new(value),
        }
    }

    /// Acquires the lock, failing with [`Error::Interrupted`] if `interrupt_waiters` is called
    /// while this thread is blocked.
    pub(crate) fn lock_interruptible(&self) -> Result<BatchGuard<'_, T>> {
        let mut gate = lock(&self.gate);
        let generation = gate.generation;
        while gate.held {
            gate = self.cond.wait(gate).unwrap_or_else(PoisonError::into_inner);
            if gate.generation != generation {
                return Err(Error::Interrupted);
            }
        }
        gate.held = true;
        drop(gate);
        Ok(self.guard())
    }

    /// Acquires the lock ignoring interruptions. Used on release paths that cannot fail.
    pub(crate) fn lock(&self) -> BatchGuard<'_, T> {
        let mut gate = lock(&self.gate);
        while gate.held {
            gate = self.cond.wait(gate).unwrap_or_else(PoisonError::into_inner);
        }
        gate.held = true;
        drop(gate);
        self.guard()
    }

    pub(crate) fn interrupt_waiters(&self) {
        lock(&self.gate).generation += 1;
        self.cond.notify_all();
    }

    fn guard(&self) -> BatchGuard<'_, T> {
        BatchGuard {
            lock: self,
            data: lock(&self.data),
        }
    }
}

pub(crate) struct BatchGuard<'a, T> {
    lock: &'a BatchLock<T>,
    data: MutexGuard<'a, T>,
}

impl<T> Deref for BatchGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.data
    }
}

impl<T> DerefMut for BatchGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.data
    }
}

impl<T> Drop for BatchGuard<'_, T> {
    fn drop(&mut self) {
        lock(&self.lock.gate).held = false;
        self.lock.cond.notify_all();
    }
}

/// Reference count with a callback on the last `put`.
pub(crate) struct RefCount {
    count: AtomicUsize,
}

impl RefCount {
    pub(crate) fn new(initial: usize) -> Self {
        Self {
            count: AtomicUsize::new(initial),
        }
    }

    /// Increments the count unless it already dropped to zero.
    pub(crate) fn try_get(&self) -> bool {
        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n != 0).then_some(n + 1)
            })
            .is_ok()
    }

    pub(crate) fn put(&self, on_last: impl FnOnce()) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            on_last();
        }
    }

    pub(crate) fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }
}
