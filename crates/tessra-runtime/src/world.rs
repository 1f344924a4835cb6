//! The world handle
//!
//! A [`World`] bundles a rank's communicator with the process-local task
//! pool bookkeeping: an outstanding-task counter driving [`fence`]
//! (World::fence), a first-error slot for evaluation-time failures, and a
//! program-order id source for distributed containers. Worlds are cheap
//! handles; every component of an evaluation holds a clone.
//!
//! There is deliberately no default-world singleton: whoever evaluates an
//! expression passes the world of the assigned array.

use crate::comm::{Comm, LocalComm};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tessra_core::error::{Error, Result};
use tracing::trace;

struct WorldInner {
    comm: Arc<dyn Comm>,
    /// Monotonic count of tasks ever spawned; drives fence termination
    started: AtomicUsize,
    /// Tasks spawned but not yet finished
    pending: AtomicUsize,
    quiet_lock: Mutex<()>,
    quiet_cond: Condvar,
    /// First evaluation-time error, surfaced at the next fence
    error: Mutex<Option<Error>>,
    next_id: AtomicU64,
}

/// Shared handle to one rank's runtime
#[derive(Clone)]
pub struct World {
    inner: Arc<WorldInner>,
}

impl World {
    /// A single-rank world with trivial collectives
    pub fn local() -> World {
        World::new(Arc::new(LocalComm::new()))
    }

    /// A world over an explicit communicator
    pub fn new(comm: Arc<dyn Comm>) -> World {
        World {
            inner: Arc::new(WorldInner {
                comm,
                started: AtomicUsize::new(0),
                pending: AtomicUsize::new(0),
                quiet_lock: Mutex::new(()),
                quiet_cond: Condvar::new(),
                error: Mutex::new(None),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// This process's rank
    pub fn rank(&self) -> usize {
        self.inner.comm.rank()
    }

    /// Number of ranks
    pub fn nprocs(&self) -> usize {
        self.inner.comm.nprocs()
    }

    /// The communicator
    pub fn comm(&self) -> &Arc<dyn Comm> {
        &self.inner.comm
    }

    /// Next program-order id for a distributed container
    ///
    /// Worlds run SPMD, so every rank allocates the same sequence and ids
    /// agree across the computation.
    pub fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Spawn a task on the work-stealing pool
    ///
    /// Tasks must not block on unready futures; dependent work is wired
    /// through future callbacks, which may themselves spawn.
    pub fn spawn(&self, f: impl FnOnce() + Send + 'static) {
        self.inner.started.fetch_add(1, Ordering::Relaxed);
        self.inner.pending.fetch_add(1, Ordering::AcqRel);
        let inner = self.inner.clone();
        rayon::spawn(move || {
            f();
            if inner.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
                let _guard = inner.quiet_lock.lock();
                inner.quiet_cond.notify_all();
            }
        });
    }

    fn wait_local_quiet(&self) {
        let mut guard = self.inner.quiet_lock.lock();
        while self.inner.pending.load(Ordering::Acquire) != 0 {
            self.inner.quiet_cond.wait(&mut guard);
        }
    }

    /// Block until every task on every rank has retired
    ///
    /// Cross-rank work can re-light a locally quiet rank (a remote tile
    /// arriving fires callbacks that spawn), so the fence repeats a
    /// drain-and-count round until two consecutive global spawn counts
    /// agree. Surfaces the first recorded evaluation error.
    pub fn fence(&self) -> Result<()> {
        let mut rounds = 0usize;
        loop {
            self.wait_local_quiet();
            let s1 = self
                .inner
                .comm
                .all_reduce_usize_sum(self.inner.started.load(Ordering::Acquire));
            self.wait_local_quiet();
            let s2 = self
                .inner
                .comm
                .all_reduce_usize_sum(self.inner.started.load(Ordering::Acquire));
            rounds += 1;
            if s1 == s2 {
                break;
            }
        }
        trace!(rounds, "fence settled");
        if let Some(e) = self.inner.error.lock().take() {
            return Err(e);
        }
        Ok(())
    }

    /// Record an evaluation-time error; the first one wins
    pub fn record_error(&self, e: Error) {
        let mut slot = self.inner.error.lock();
        if slot.is_none() {
            *slot = Some(e);
        }
    }

    /// True when an error is waiting to be surfaced
    pub fn has_error(&self) -> bool {
        self.inner.error.lock().is_some()
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("rank", &self.rank())
            .field("nprocs", &self.nprocs())
            .finish()
    }
}
