//! Rank communicators
//!
//! [`Comm`] is the seam between the evaluation core and whatever carries
//! bytes between ranks. The core only needs collectives (barrier,
//! all-reduce, broadcast) and shared distributed state keyed by a
//! program-order id; an MPI transport would implement this trait, and the
//! workspace ships two in-process implementations:
//!
//! - [`LocalComm`]: a single rank, every collective trivial.
//! - [`ThreadComm`]: `n` ranks driven by `n` threads of one process,
//!   coordinating through a shared hub. This is what the test suite uses
//!   to exercise real multi-rank paths (remote tiles, replicated shapes,
//!   fence termination detection) without a launcher.
//!
//! Collectives are SPMD: every rank must call them in the same order.

use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Barrier};

use tessra_core::error::Result;

/// Type-erased value moved through a collective
pub type BoxedValue = Box<dyn Any + Send>;

/// Type-erased shared state registered by id
pub type SharedAny = Arc<dyn Any + Send + Sync>;

/// Combine two deposited values into one
pub type CombineFn<'a> = &'a (dyn Fn(BoxedValue, BoxedValue) -> BoxedValue + Sync);

/// Clone a reduced value for distribution to every rank
pub type CloneFn<'a> = &'a (dyn Fn(&(dyn Any + Send)) -> BoxedValue + Sync);

/// Collective communication across ranks
pub trait Comm: Send + Sync {
    /// This process's rank
    fn rank(&self) -> usize;

    /// Number of ranks
    fn nprocs(&self) -> usize;

    /// Block until every rank arrives
    fn barrier(&self);

    /// Global sum of one counter per rank
    fn all_reduce_usize_sum(&self, value: usize) -> usize;

    /// Element-wise global sum, replicated into `data` on every rank
    fn all_reduce_f64_sum(&self, data: &mut [f64]);

    /// All-reduce with a user combine; every rank receives the result
    fn all_reduce_boxed(
        &self,
        value: BoxedValue,
        combine: CombineFn<'_>,
        clone: CloneFn<'_>,
    ) -> BoxedValue;

    /// Broadcast from `root`; only the root's `value` is consulted
    fn broadcast_boxed(
        &self,
        root: usize,
        value: Option<BoxedValue>,
        clone: CloneFn<'_>,
    ) -> BoxedValue;

    /// Shared state keyed by a program-order id
    ///
    /// Every rank registering `id` observes the same object; `make` runs
    /// on the first registration.
    fn shared_state(&self, id: u64, make: &dyn Fn() -> SharedAny) -> SharedAny;
}

/// Typed all-reduce over a [`Comm`]
pub fn all_reduce<T, F>(comm: &dyn Comm, value: T, op: F) -> Result<T>
where
    T: Clone + Send + 'static,
    F: Fn(T, T) -> T + Sync,
{
    let combine = |a: BoxedValue, b: BoxedValue| -> BoxedValue {
        let a = a.downcast::<T>().expect("all-reduce deposit type");
        let b = b.downcast::<T>().expect("all-reduce deposit type");
        Box::new(op(*a, *b))
    };
    let clone = |v: &(dyn Any + Send)| -> BoxedValue {
        Box::new(
            v.downcast_ref::<T>()
                .expect("all-reduce result type")
                .clone(),
        )
    };
    let out = comm.all_reduce_boxed(Box::new(value), &combine, &clone);
    Ok(*out.downcast::<T>().expect("all-reduce result type"))
}

/// Typed broadcast over a [`Comm`]
pub fn broadcast<T>(comm: &dyn Comm, root: usize, value: Option<T>) -> Result<T>
where
    T: Clone + Send + 'static,
{
    let clone = |v: &(dyn Any + Send)| -> BoxedValue {
        Box::new(
            v.downcast_ref::<T>()
                .expect("broadcast value type")
                .clone(),
        )
    };
    let out = comm.broadcast_boxed(root, value.map(|v| Box::new(v) as BoxedValue), &clone);
    Ok(*out.downcast::<T>().expect("broadcast value type"))
}

/// Single-rank communicator
#[derive(Default)]
pub struct LocalComm {
    registry: Mutex<HashMap<u64, SharedAny>>,
}

impl LocalComm {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Comm for LocalComm {
    fn rank(&self) -> usize {
        0
    }

    fn nprocs(&self) -> usize {
        1
    }

    fn barrier(&self) {}

    fn all_reduce_usize_sum(&self, value: usize) -> usize {
        value
    }

    fn all_reduce_f64_sum(&self, _data: &mut [f64]) {}

    fn all_reduce_boxed(
        &self,
        value: BoxedValue,
        _combine: CombineFn<'_>,
        _clone: CloneFn<'_>,
    ) -> BoxedValue {
        value
    }

    fn broadcast_boxed(
        &self,
        _root: usize,
        value: Option<BoxedValue>,
        _clone: CloneFn<'_>,
    ) -> BoxedValue {
        value.expect("single-rank broadcast must supply the value")
    }

    fn shared_state(&self, id: u64, make: &dyn Fn() -> SharedAny) -> SharedAny {
        self.registry
            .lock()
            .entry(id)
            .or_insert_with(make)
            .clone()
    }
}

// One in-flight collective round on the hub.
#[derive(Default)]
struct Round {
    deposits: Vec<BoxedValue>,
    f64_acc: Vec<f64>,
    result: Option<BoxedValue>,
}

struct Hub {
    nprocs: usize,
    barrier: Barrier,
    round: Mutex<Round>,
    registry: Mutex<HashMap<u64, SharedAny>>,
}

/// One rank of an in-process multi-rank communicator
pub struct ThreadComm {
    rank: usize,
    hub: Arc<Hub>,
}

impl ThreadComm {
    /// Create communicators for `nprocs` ranks sharing one hub
    pub fn split(nprocs: usize) -> Vec<ThreadComm> {
        assert!(nprocs > 0, "communicator needs at least one rank");
        let hub = Arc::new(Hub {
            nprocs,
            barrier: Barrier::new(nprocs),
            round: Mutex::new(Round::default()),
            registry: Mutex::new(HashMap::new()),
        });
        (0..nprocs)
            .map(|rank| ThreadComm {
                rank,
                hub: hub.clone(),
            })
            .collect()
    }
}

impl Comm for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn nprocs(&self) -> usize {
        self.hub.nprocs
    }

    fn barrier(&self) {
        self.hub.barrier.wait();
    }

    fn all_reduce_usize_sum(&self, value: usize) -> usize {
        let combine = |a: BoxedValue, b: BoxedValue| -> BoxedValue {
            let a = a.downcast::<usize>().expect("usize deposit");
            let b = b.downcast::<usize>().expect("usize deposit");
            Box::new(*a + *b)
        };
        let clone = |v: &(dyn Any + Send)| -> BoxedValue {
            Box::new(*v.downcast_ref::<usize>().expect("usize result"))
        };
        *self
            .all_reduce_boxed(Box::new(value), &combine, &clone)
            .downcast::<usize>()
            .expect("usize result")
    }

    fn all_reduce_f64_sum(&self, data: &mut [f64]) {
        {
            let mut round = self.hub.round.lock();
            if round.f64_acc.is_empty() {
                round.f64_acc = data.to_vec();
            } else {
                for (acc, x) in round.f64_acc.iter_mut().zip(data.iter()) {
                    *acc += x;
                }
            }
        }
        let leader = self.hub.barrier.wait().is_leader();
        {
            let round = self.hub.round.lock();
            data.copy_from_slice(&round.f64_acc);
        }
        self.hub.barrier.wait();
        if leader {
            self.hub.round.lock().f64_acc.clear();
        }
        self.hub.barrier.wait();
    }

    fn all_reduce_boxed(
        &self,
        value: BoxedValue,
        combine: CombineFn<'_>,
        clone: CloneFn<'_>,
    ) -> BoxedValue {
        self.hub.round.lock().deposits.push(value);
        let leader = self.hub.barrier.wait().is_leader();
        if leader {
            let mut round = self.hub.round.lock();
            let mut it = std::mem::take(&mut round.deposits).into_iter();
            let mut acc = it.next().expect("at least one deposit");
            for v in it {
                acc = combine(acc, v);
            }
            round.result = Some(acc);
        }
        self.hub.barrier.wait();
        let out = {
            let round = self.hub.round.lock();
            clone(
                round
                    .result
                    .as_ref()
                    .expect("reduced value present")
                    .as_ref(),
            )
        };
        self.hub.barrier.wait();
        if leader {
            self.hub.round.lock().result = None;
        }
        self.hub.barrier.wait();
        out
    }

    fn broadcast_boxed(
        &self,
        root: usize,
        value: Option<BoxedValue>,
        clone: CloneFn<'_>,
    ) -> BoxedValue {
        if self.rank == root {
            let v = value.expect("broadcast root must supply the value");
            self.hub.round.lock().result = Some(v);
        }
        self.hub.barrier.wait();
        let out = {
            let round = self.hub.round.lock();
            clone(
                round
                    .result
                    .as_ref()
                    .expect("broadcast value present")
                    .as_ref(),
            )
        };
        self.hub.barrier.wait();
        if self.rank == root {
            self.hub.round.lock().result = None;
        }
        self.hub.barrier.wait();
        out
    }

    fn shared_state(&self, id: u64, make: &dyn Fn() -> SharedAny) -> SharedAny {
        self.hub
            .registry
            .lock()
            .entry(id)
            .or_insert_with(make)
            .clone()
    }
}
