//! # Tessra
//!
//! Distributed block-sparse tensor algebra for Rust.
//!
//! Multi-dimensional arrays are partitioned into rectangular tiles, tiles
//! are distributed across ranks, and expressions written in index
//! notation compile into a dataflow graph of tile-level tasks:
//!
//! ```no_run
//! use tessra::{DistArray, TiledRange, World};
//!
//! # fn demo() -> tessra::Result<()> {
//! let world = World::local();
//! let trange = TiledRange::uniform(&[8, 8], 4)?;
//!
//! let a = DistArray::<f64>::new(&world, trange.clone())?;
//! let b = DistArray::<f64>::new(&world, trange.clone())?;
//! a.fill(1.0)?;
//! b.fill(1.0)?;
//!
//! let mut c = DistArray::<f64>::new(&world, trange)?;
//! c.assign("m,n", a.tsr("m,k")? * b.tsr("k,n")?)?;
//! assert_eq!(c.tsr("m,n")?.norm()?, 64.0);
//! # Ok(())
//! # }
//! ```
//!
//! The stack:
//!
//! - [`tessra_core`]: variable lists, permutations, tiled ranges, shapes,
//!   process maps, tiles and kernels
//! - [`tessra_runtime`]: callback futures, worlds and fences, rank
//!   communicators, distributed stores, reduce tasks
//! - [`tessra_expr`]: expression trees, engines, distributed evaluators,
//!   distributed arrays, reductions, conversions

pub use tessra_core::{
    default_pmap, BlockedPmap, CyclicPmap, CyclicPmap2D, Error, GemmHelper, Index, Permutation,
    Pmap, Range, Result, Shape, Tile, TiledRange, TiledRange1, VariableList,
};
pub use tessra_expr::{
    sparse_shape_from_local_norms, to_dense, to_sparse, DistArray, DistEval, Expr,
};
pub use tessra_runtime::{
    all_reduce, broadcast, Comm, DistStore, Future, LocalComm, ReduceOp, ReducePairOp,
    ReducePairTask, ReduceTask, ThreadComm, World,
};

pub use tessra_core as core;
pub use tessra_expr as expr;
pub use tessra_runtime as runtime;
