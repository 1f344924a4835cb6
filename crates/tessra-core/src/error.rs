//! Unified error types for tiled-tensor operations
//!
//! Every fallible operation in the Tessra stack reports one of the error
//! kinds defined here. Structural problems (mismatched ranges, bad labels,
//! invalid process grids) are detected eagerly, while evaluation-time
//! problems (zero operands, consumed tile slots) surface through the
//! runtime's error channel.
//!
//! # Examples
//!
//! ```
//! use tessra_core::error::{Error, VariableError};
//!
//! fn check_labels(labels: &[&str]) -> Result<(), Error> {
//!     for (i, l) in labels.iter().enumerate() {
//!         if l.is_empty() {
//!             return Err(Error::Variable(VariableError::EmptyLabel { position: i }));
//!         }
//!     }
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// Result alias used throughout the Tessra crates
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for all tiled-tensor operations
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Shape errors (zero tiles, shape mismatches)
    #[error("Shape error: {0}")]
    Shape(#[from] ShapeError),

    /// Range errors (tiled range mismatch, out-of-range ordinals)
    #[error("Range error: {0}")]
    Range(#[from] RangeError),

    /// Variable-list errors (bad labels, incompatible annotations)
    #[error("Variable error: {0}")]
    Variable(#[from] VariableError),

    /// Permutation errors (non-bijective images, dimension mismatch)
    #[error("Permutation error: {0}")]
    Permutation(#[from] PermutationError),

    /// Process-map errors (invalid process grids)
    #[error("Process map error: {0}")]
    Pmap(#[from] PmapError),

    /// A consumable tile argument was already consumed
    #[error("Consumability error: {0}")]
    Consumability(String),

    /// An operation with no zero identity received a zero argument
    #[error("Invalid zero operand: {0}")]
    InvalidZeroOperand(String),
}

/// Shape errors for tile-level structure
#[derive(Error, Debug, Clone)]
pub enum ShapeError {
    #[error("Tile {ordinal} is structurally zero and cannot be read")]
    ZeroTile { ordinal: usize },

    #[error("Zero tile used where a nonzero operand is required: {context}")]
    ZeroOperand { context: String },

    #[error("Shape size mismatch: {left} vs {right} tiles")]
    SizeMismatch { left: usize, right: usize },

    #[error("Operation requires a sparse shape, got a dense shape")]
    DenseShape,
}

/// Range errors for element and tile ranges
#[derive(Error, Debug, Clone)]
pub enum RangeError {
    #[error("Dimension count mismatch: expected {expected}, got {got}")]
    RankMismatch { expected: usize, got: usize },

    #[error("Range bounds invalid: lower {lower:?} exceeds upper {upper:?}")]
    InvalidBounds { lower: Vec<usize>, upper: Vec<usize> },

    #[error("Ordinal {ordinal} out of range for volume {volume}")]
    OrdinalOutOfRange { ordinal: usize, volume: usize },

    #[error("Element {element} outside the tiled interval [{lo}, {hi})")]
    ElementOutOfRange { element: usize, lo: usize, hi: usize },

    #[error("Tile boundaries must be strictly increasing at position {position}")]
    UnsortedBoundaries { position: usize },

    #[error("Tiled ranges are not equal: {context}")]
    TiledRangeMismatch { context: String },

    #[error("Tile volume mismatch: range holds {expected} elements, data holds {got}")]
    VolumeMismatch { expected: usize, got: usize },
}

/// Variable-list errors for index annotations
#[derive(Error, Debug, Clone)]
pub enum VariableError {
    #[error("Empty index label at position {position}")]
    EmptyLabel { position: usize },

    #[error("Invalid index label '{label}': must match [A-Za-z_][A-Za-z0-9_]*")]
    InvalidLabel { label: String },

    #[error("Duplicate index label '{label}'")]
    DuplicateLabel { label: String },

    #[error("Label count {labels} does not match tensor dimension {rank}")]
    RankMismatch { labels: usize, rank: usize },

    #[error("Variable lists are not permutations of each other: '{left}' vs '{right}'")]
    NotPermutationEquivalent { left: String, right: String },
}

/// Permutation errors
#[derive(Error, Debug, Clone)]
pub enum PermutationError {
    #[error("Image sequence {image:?} is not a bijection on 0..{len}")]
    NotBijective { image: Vec<usize>, len: usize },

    #[error("Permutation of rank {perm} applied to object of rank {arg}")]
    RankMismatch { perm: usize, arg: usize },
}

/// Process-map errors
#[derive(Error, Debug, Clone)]
pub enum PmapError {
    #[error("Process grid {proc_rows}x{proc_cols} does not fit {nprocs} processes")]
    GridTooLarge {
        proc_rows: usize,
        proc_cols: usize,
        nprocs: usize,
    },

    #[error("Process grid dimensions must be nonzero")]
    ZeroGrid,

    #[error("Rank {rank} out of range for {nprocs} processes")]
    InvalidRank { rank: usize, nprocs: usize },
}
