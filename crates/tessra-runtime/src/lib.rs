//! # tessra-runtime
//!
//! Runtime layer for the Tessra stack.
//!
//! This crate provides the asynchronous machinery the distributed
//! evaluators are built on, with no knowledge of tensors beyond the value
//! types it transports:
//!
//! - **Futures** ([`Future`]) with set/probe/callback semantics; tasks are
//!   wired through callbacks and never block a pool worker
//! - **Worlds** ([`World`]) bundling a communicator with task accounting,
//!   a multi-round [`fence`](World::fence), and error delivery
//! - **Communicators** ([`Comm`], [`LocalComm`], [`ThreadComm`]) — the
//!   trait seam an MPI transport would implement, plus in-process
//!   implementations for single-rank use and threaded multi-rank tests
//! - **Distributed stores** ([`DistStore`]) mapping tile ordinals to value
//!   futures across ranks
//! - **Reduce tasks** ([`ReduceTask`], [`ReducePairTask`]) folding future
//!   streams with dependency-driven, non-deterministic ordering
//!
//! ## Scheduling model
//!
//! Tasks run on rayon's work-stealing pool. The only blocking primitives
//! are [`Future::get`] and [`World::fence`], both reserved for user-side
//! code at expression boundaries.

pub mod comm;
pub mod future;
pub mod reduce;
pub mod store;
pub mod world;

mod property_tests;

// Re-exports
pub use comm::{all_reduce, broadcast, Comm, LocalComm, ThreadComm};
pub use future::{join2, Consumed, Future};
pub use reduce::{ReduceOp, ReducePairOp, ReducePairTask, ReduceTask};
pub use store::DistStore;
pub use world::World;
