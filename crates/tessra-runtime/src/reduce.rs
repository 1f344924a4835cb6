//! Dependency-driven reduction tasks
//!
//! A [`ReduceTask`] folds an arbitrary number of future-valued arguments
//! into one result, reducing each argument as soon as it becomes ready.
//! Arrival order is non-deterministic, so the operation must be
//! associative and commutative; in exchange no argument ever waits for a
//! specific partner, which beats a fixed binary reduction tree when
//! arguments arrive from remote ranks and other tasks.
//!
//! The engine keeps two slots behind one short-lived lock: a parked
//! accumulator and a parked argument. When an argument becomes ready it is
//! matched against whichever slot is occupied — folding into the parked
//! accumulator, or pairing with the parked argument under a fresh
//! accumulator — and the actual folding always runs as a spawned task
//! outside the lock. A dependency counter retires the task: when every
//! added argument has folded and [`submit`](ReduceTask::submit) has been
//! called, a final task applies the post-processing step and sets the
//! result future.
//!
//! [`ReducePairTask`] is the two-argument variant used by dot products: a
//! pair is ready only once both halves have resolved.

use crate::future::{join2, Future};
use crate::world::World;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::trace;

/// An associative, commutative reduction over ready arguments
///
/// The contract mirrors the four call forms of the classic reduction
/// functor: make an identity, fold in one argument, combine two
/// accumulators, and post-process the final accumulator.
pub trait ReduceOp: Send + Sync + 'static {
    /// Argument type delivered by the input futures
    type Arg: Send + Sync + 'static;
    /// Accumulator and result type
    type Result: Send + Sync + 'static;

    /// A fresh, empty accumulator
    fn identity(&self) -> Self::Result;

    /// Fold one argument into an accumulator
    fn fold(&self, acc: &mut Self::Result, arg: &Self::Arg);

    /// Combine two accumulators
    fn combine(&self, acc: &mut Self::Result, other: Self::Result);

    /// Post-process the final accumulator (e.g. a final square root)
    fn finalize(&self, acc: Self::Result) -> Self::Result {
        acc
    }
}

struct Slots<Op: ReduceOp> {
    acc: Option<Op::Result>,
    arg: Option<Future<Op::Arg>>,
}

struct ReduceInner<Op: ReduceOp> {
    world: World,
    op: Op,
    slots: Mutex<Slots<Op>>,
    /// One per unfolded argument, plus one released by submit
    deps: AtomicUsize,
    result: Future<Op::Result>,
}

impl<Op: ReduceOp> ReduceInner<Op> {
    /// An argument future has resolved; match it against the slots.
    fn ready(this: &Arc<Self>, arg: Future<Op::Arg>) {
        let mut slots = this.slots.lock();
        if let Some(acc) = slots.acc.take() {
            drop(slots);
            let task = this.clone();
            this.world.spawn(move || {
                let mut acc = acc;
                task.op.fold(&mut acc, arg.get().as_ref());
                Self::reduce(&task, acc);
                Self::dec(&task, 1);
            });
        } else if let Some(other) = slots.arg.take() {
            drop(slots);
            let task = this.clone();
            this.world.spawn(move || {
                let mut acc = task.op.identity();
                task.op.fold(&mut acc, other.get().as_ref());
                task.op.fold(&mut acc, arg.get().as_ref());
                Self::reduce(&task, acc);
                Self::dec(&task, 2);
            });
        } else {
            slots.arg = Some(arg);
        }
    }

    /// Keep folding whatever is parked, then park the accumulator.
    fn reduce(this: &Arc<Self>, mut acc: Op::Result) {
        loop {
            let mut slots = this.slots.lock();
            if let Some(arg) = slots.arg.take() {
                drop(slots);
                this.op.fold(&mut acc, arg.get().as_ref());
                Self::dec(this, 1);
            } else if let Some(other) = slots.acc.take() {
                drop(slots);
                this.op.combine(&mut acc, other);
            } else {
                slots.acc = Some(acc);
                return;
            }
        }
    }

    /// Retire `n` dependencies; the last one runs the finalize task.
    fn dec(this: &Arc<Self>, n: usize) {
        if this.deps.fetch_sub(n, Ordering::AcqRel) == n {
            let task = this.clone();
            this.world.spawn(move || {
                let acc = task
                    .slots
                    .lock()
                    .acc
                    .take()
                    .expect("final accumulator is parked when dependencies retire");
                let result = task.op.finalize(acc);
                if let Err(e) = task.result.set(result) {
                    task.world.record_error(e);
                }
            });
        }
    }
}

/// Fan-in reduction over a stream of future-valued arguments
pub struct ReduceTask<Op: ReduceOp> {
    inner: Arc<ReduceInner<Op>>,
    count: usize,
}

impl<Op: ReduceOp> ReduceTask<Op> {
    /// Create a reduction on `world` with operation `op`
    pub fn new(world: &World, op: Op) -> Self {
        let identity = op.identity();
        Self {
            inner: Arc::new(ReduceInner {
                world: world.clone(),
                op,
                slots: Mutex::new(Slots {
                    acc: Some(identity),
                    arg: None,
                }),
                deps: AtomicUsize::new(1),
                result: Future::new(),
            }),
            count: 0,
        }
    }

    /// Add an argument; it folds as soon as its future resolves
    pub fn add(&mut self, arg: Future<Op::Arg>) {
        self.count += 1;
        self.inner.deps.fetch_add(1, Ordering::AcqRel);
        let inner = self.inner.clone();
        let registered = arg.clone();
        arg.register_callback(Box::new(move || ReduceInner::ready(&inner, registered)));
    }

    /// Number of arguments added so far
    pub fn count(&self) -> usize {
        self.count
    }

    /// Stop accepting arguments and return the result future
    ///
    /// With no arguments added, the result is the finalized identity.
    pub fn submit(self) -> Future<Op::Result> {
        trace!(args = self.count, "reduce task submitted");
        let result = self.inner.result.clone();
        ReduceInner::dec(&self.inner, 1);
        result
    }
}

/// Pairwise reduction contract for [`ReducePairTask`]
pub trait ReducePairOp: Send + Sync + 'static {
    type First: Send + Sync + 'static;
    type Second: Send + Sync + 'static;
    type Result: Send + Sync + 'static;

    fn identity(&self) -> Self::Result;
    fn fold_pair(&self, acc: &mut Self::Result, first: &Self::First, second: &Self::Second);
    fn combine(&self, acc: &mut Self::Result, other: Self::Result);
    fn finalize(&self, acc: Self::Result) -> Self::Result {
        acc
    }
}

/// Adapter folding resolved pairs through a [`ReducePairOp`]
pub struct PairOpAdapter<Op>(Op);

impl<Op: ReducePairOp> ReduceOp for PairOpAdapter<Op> {
    type Arg = (Arc<Op::First>, Arc<Op::Second>);
    type Result = Op::Result;

    fn identity(&self) -> Self::Result {
        self.0.identity()
    }

    fn fold(&self, acc: &mut Self::Result, arg: &Self::Arg) {
        self.0.fold_pair(acc, &arg.0, &arg.1);
    }

    fn combine(&self, acc: &mut Self::Result, other: Self::Result) {
        self.0.combine(acc, other);
    }

    fn finalize(&self, acc: Self::Result) -> Self::Result {
        self.0.finalize(acc)
    }
}

/// Fan-in reduction over pairs of futures
///
/// A pair becomes ready only when both halves have resolved; neither half
/// blocks other pairs from reducing in the meantime.
pub struct ReducePairTask<Op: ReducePairOp> {
    task: ReduceTask<PairOpAdapter<Op>>,
}

impl<Op: ReducePairOp> ReducePairTask<Op> {
    pub fn new(world: &World, op: Op) -> Self {
        Self {
            task: ReduceTask::new(world, PairOpAdapter(op)),
        }
    }

    /// Add a pair of arguments with two-count readiness
    pub fn add(&mut self, first: Future<Op::First>, second: Future<Op::Second>) {
        self.task.add(join2(&first, &second));
    }

    pub fn count(&self) -> usize {
        self.task.count()
    }

    pub fn submit(self) -> Future<Op::Result> {
        self.task.submit()
    }
}
