//! # tessra-expr
//!
//! Expression layer for the Tessra stack.
//!
//! Tensor expressions are written against annotated distributed arrays
//! and compiled into trees of distributed evaluators:
//!
//! ```no_run
//! use tessra_core::TiledRange;
//! use tessra_expr::DistArray;
//! use tessra_runtime::World;
//!
//! # fn demo() -> tessra_core::Result<()> {
//! let world = World::local();
//! let trange = TiledRange::uniform(&[8, 8], 4)?;
//!
//! let a = DistArray::<f64>::new(&world, trange.clone())?;
//! let b = DistArray::<f64>::new(&world, trange.clone())?;
//! a.fill(1.0)?;
//! b.fill(1.0)?;
//!
//! // c("m,n") = a("m,k") * b("k,n")
//! let mut c = DistArray::<f64>::new(&world, trange)?;
//! c.assign("m,n", a.tsr("m,k")? * b.tsr("k,n")?)?;
//!
//! // Reductions return scalars replicated on every rank
//! let total = c.tsr("m,n")?.sum()?;
//! # let _ = total;
//! # Ok(())
//! # }
//! ```
//!
//! The pipeline: an [`Expr`] tree binds index annotations to arrays; each
//! node's engine resolves variable orderings, shapes, tiled ranges, and
//! process maps in two phases; the engines wire distributed evaluators
//! whose tiles are futures flowing through the runtime's task graph; an
//! assignment moves evaluator tiles into a fresh array and swaps it in
//! after a successful fence.

pub mod array;
pub mod conversions;
pub mod dist_eval;
pub mod expr;
pub mod reductions;
pub mod tile_op;

mod engine;
mod property_tests;

use scirs2_core::numeric::{Float, FromPrimitive};

/// Element bound for everything flowing through the expression layer
///
/// Satisfied by `f32` and `f64`.
pub trait Element:
    Float + FromPrimitive + Send + Sync + std::fmt::Debug + 'static
{
}

impl<T> Element for T where T: Float + FromPrimitive + Send + Sync + std::fmt::Debug + 'static {}

// Re-exports
pub use array::DistArray;
pub use conversions::{sparse_shape_from_local_norms, to_dense, to_sparse};
pub use dist_eval::DistEval;
pub use expr::Expr;
pub use tile_op::{BinaryKind, BinaryTileOp, TileArg, UnaryTileOp};
