//! # tessra-core
//!
//! Core tiled-tensor types for the Tessra stack.
//!
//! This crate provides the structural vocabulary of a distributed
//! block-sparse tensor, with no runtime or communication dependencies:
//!
//! - **Variable lists** ([`VariableList`]) for index-notation annotations
//! - **Permutations** ([`Permutation`]) over axes, coordinates and ranges
//! - **Ranges and tiled ranges** ([`Range`], [`TiledRange1`], [`TiledRange`])
//!   with row-major ordinal maps
//! - **Shapes** ([`Shape`]) answering which tiles are structurally zero
//! - **Process maps** ([`Pmap`] with blocked, cyclic and 2-D cyclic
//!   decompositions) assigning tiles to ranks
//! - **Tiles and kernels** ([`Tile`], [`kernels`]) for the dense numeric
//!   blocks flowing through the task graph
//!
//! ## SciRS2 Integration
//!
//! Numeric element bounds come from `scirs2-core`. Direct use of
//! `ndarray`, `rand`, or `num-traits` is not permitted in this stack.
//!
//! ## Ordinal convention
//!
//! Every ordinal in this crate is row-major: the last axis varies fastest.
//! This applies to element ranges and tile grids alike, and the
//! higher-level crates inherit it.
//!
//! ## Quick Start
//!
//! ```
//! use tessra_core::{Shape, TiledRange, TiledRange1};
//!
//! let trange = TiledRange::new(vec![
//!     TiledRange1::new(vec![0, 4, 8]).unwrap(),
//!     TiledRange1::new(vec![0, 4, 8]).unwrap(),
//! ]);
//! assert_eq!(trange.tile_count(), 4);
//!
//! let shape = Shape::sparse(vec![1.0, 0.0, 0.0, 1.0], 1e-10);
//! assert!(shape.is_zero(1));
//! ```

pub mod error;
pub mod kernels;
pub mod perm;
pub mod pmap;
pub mod range;
pub mod shape;
pub mod tile;
pub mod tiled_range;
pub mod vars;

mod property_tests;

// Re-exports
pub use error::{Error, Result};
pub use kernels::GemmHelper;
pub use perm::Permutation;
pub use pmap::{default_pmap, BlockedPmap, CyclicPmap, CyclicPmap2D, Pmap};
pub use range::{Index, Range};
pub use shape::Shape;
pub use tile::Tile;
pub use tiled_range::{TiledRange, TiledRange1};
pub use vars::VariableList;
