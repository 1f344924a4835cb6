//! Tile-sparsity shapes
//!
//! A [`Shape`] answers "is this tile structurally zero?". The dense variant
//! says no for every tile; the sparse variant stores one Frobenius-norm
//! estimate per tile of the grid plus a threshold `τ`, with the invariant
//! `is_zero(t) ⇔ norm[t] < τ`. Shapes are immutable after construction and
//! cheap to share.
//!
//! Binary shape operations combine tile norms by the triangle and
//! submultiplicativity bounds (`‖a+b‖ ≤ ‖a‖+‖b‖`, `‖a·b‖ ≤ ‖a‖·‖b‖`) and
//! re-threshold the result, so a structurally zero output tile is never
//! scheduled in the first place.

use crate::error::{Result, ShapeError};
use crate::perm::Permutation;
use crate::range::Range;

// Stand-in norm for tiles of a dense shape when combining with sparse
// norms. Finite so that products against true zeros stay zero.
const DENSE_NORM: f64 = f64::MAX;

/// Dense or tile-norm-based sparse shape
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    /// Every tile may be nonzero
    Dense,
    /// Per-tile norm estimates with a zero threshold
    Sparse(SparseShapeData),
}

/// Norm tensor and threshold backing a sparse [`Shape`]
#[derive(Debug, Clone, PartialEq)]
pub struct SparseShapeData {
    norms: Vec<f64>,
    threshold: f64,
}

impl SparseShapeData {
    /// Per-tile norms, in tile-grid row-major order
    pub fn norms(&self) -> &[f64] {
        &self.norms
    }

    /// The zero threshold `τ`
    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

impl Shape {
    /// The dense (never-zero) shape
    pub fn dense() -> Self {
        Shape::Dense
    }

    /// A sparse shape from replicated tile norms and a threshold
    pub fn sparse(norms: Vec<f64>, threshold: f64) -> Self {
        Shape::Sparse(SparseShapeData { norms, threshold })
    }

    /// Default threshold: machine epsilon scaled by the element volume
    pub fn default_threshold(volume: usize) -> f64 {
        f64::EPSILON * volume as f64
    }

    /// True for the dense variant
    pub fn is_dense(&self) -> bool {
        matches!(self, Shape::Dense)
    }

    /// True when tile `t` is structurally zero
    pub fn is_zero(&self, t: usize) -> bool {
        match self {
            Shape::Dense => false,
            Shape::Sparse(data) => {
                debug_assert!(t < data.norms.len());
                data.norms[t] < data.threshold
            }
        }
    }

    /// Norm estimate for tile `t`; infinite for a dense shape
    pub fn norm(&self, t: usize) -> f64 {
        match self {
            Shape::Dense => f64::INFINITY,
            Shape::Sparse(data) => data.norms[t],
        }
    }

    /// The threshold `τ` of a sparse shape
    pub fn threshold(&self) -> Option<f64> {
        match self {
            Shape::Dense => None,
            Shape::Sparse(data) => Some(data.threshold),
        }
    }

    /// Number of tiles covered by a sparse shape
    pub fn tile_count(&self) -> Option<usize> {
        match self {
            Shape::Dense => None,
            Shape::Sparse(data) => Some(data.norms.len()),
        }
    }

    /// Fraction of structurally zero tiles (0 for dense)
    pub fn sparsity(&self) -> f64 {
        match self {
            Shape::Dense => 0.0,
            Shape::Sparse(data) => {
                if data.norms.is_empty() {
                    return 0.0;
                }
                let zeros = data.norms.iter().filter(|&&n| n < data.threshold).count();
                zeros as f64 / data.norms.len() as f64
            }
        }
    }

    // Norm used when combining with a possibly dense operand. Structural
    // zeros combine as exact zeros: a zero tile is never produced, so its
    // norm estimate must not leak into the result's nonzero set.
    fn combine_norm(&self, t: usize) -> f64 {
        match self {
            Shape::Dense => DENSE_NORM,
            Shape::Sparse(data) => {
                if data.norms[t] < data.threshold {
                    0.0
                } else {
                    data.norms[t]
                }
            }
        }
    }

    fn check_size(&self, other: &Shape) -> Result<()> {
        if let (Some(l), Some(r)) = (self.tile_count(), other.tile_count()) {
            if l != r {
                return Err(ShapeError::SizeMismatch { left: l, right: r }.into());
            }
        }
        Ok(())
    }

    fn combined_threshold(&self, other: &Shape) -> f64 {
        match (self.threshold(), other.threshold()) {
            (Some(a), Some(b)) => a.max(b),
            (Some(a), None) => a,
            (None, Some(b)) => b,
            (None, None) => 0.0,
        }
    }

    /// Permute the norm tensor over a tile grid `tiles_range`
    pub fn permute(&self, perm: &Permutation, tiles_range: &Range) -> Result<Shape> {
        match self {
            Shape::Dense => Ok(Shape::Dense),
            Shape::Sparse(data) => {
                if perm.is_identity() {
                    return Ok(self.clone());
                }
                let permuted_range = tiles_range.permute(perm)?;
                let mut norms = vec![0.0; data.norms.len()];
                for (ord, coord) in tiles_range.iter().enumerate() {
                    let target = perm.apply(&coord)?;
                    norms[permuted_range.ordinal(&target)?] = data.norms[ord];
                }
                Ok(Shape::sparse(norms, data.threshold))
            }
        }
    }

    /// Shape of an element-wise sum (or difference)
    pub fn add(&self, other: &Shape) -> Result<Shape> {
        self.check_size(other)?;
        match (self, other) {
            (Shape::Dense, _) | (_, Shape::Dense) => Ok(Shape::Dense),
            (Shape::Sparse(l), _) => {
                let norms = (0..l.norms.len())
                    .map(|t| self.combine_norm(t) + other.combine_norm(t))
                    .collect();
                Ok(Shape::sparse(norms, self.combined_threshold(other)))
            }
        }
    }

    /// Shape of an element-wise (Hadamard) product
    ///
    /// A tile is zero whenever it is zero on either side, so a sparse
    /// operand keeps the result sparse even against a dense one.
    pub fn mult(&self, other: &Shape) -> Result<Shape> {
        self.check_size(other)?;
        match (self, other) {
            (Shape::Dense, Shape::Dense) => Ok(Shape::Dense),
            _ => {
                let count = self
                    .tile_count()
                    .or(other.tile_count())
                    .expect("one operand is sparse");
                let norms = (0..count)
                    .map(|t| {
                        let a = self.combine_norm(t);
                        let b = other.combine_norm(t);
                        if a == 0.0 || b == 0.0 {
                            0.0
                        } else {
                            a * b
                        }
                    })
                    .collect();
                Ok(Shape::sparse(norms, self.combined_threshold(other)))
            }
        }
    }

    /// Shape scaled by `|factor|`
    pub fn scale(&self, factor: f64) -> Shape {
        match self {
            Shape::Dense => Shape::Dense,
            Shape::Sparse(data) => Shape::sparse(
                data.norms.iter().map(|n| n * factor.abs()).collect(),
                data.threshold,
            ),
        }
    }

    /// Shape of a contraction: `self` viewed as an `m x k` tile grid times
    /// `other` viewed as a `k x n` tile grid
    ///
    /// Result norm is the accumulated product bound
    /// `‖Σ_k A(m,k)·B(k,n)‖ ≤ Σ_k ‖A(m,k)‖·‖B(k,n)‖`.
    pub fn contract(&self, other: &Shape, m: usize, k: usize, n: usize) -> Result<Shape> {
        if let Some(count) = self.tile_count() {
            if count != m * k {
                return Err(ShapeError::SizeMismatch {
                    left: count,
                    right: m * k,
                }
                .into());
            }
        }
        if let Some(count) = other.tile_count() {
            if count != k * n {
                return Err(ShapeError::SizeMismatch {
                    left: count,
                    right: k * n,
                }
                .into());
            }
        }
        match (self, other) {
            (Shape::Dense, Shape::Dense) => Ok(Shape::Dense),
            _ => {
                let mut norms = vec![0.0; m * n];
                for mi in 0..m {
                    for ki in 0..k {
                        let a = self.combine_norm(mi * k + ki);
                        if a == 0.0 {
                            continue;
                        }
                        for ni in 0..n {
                            let b = other.combine_norm(ki * n + ni);
                            if b != 0.0 {
                                norms[mi * n + ni] += a * b;
                            }
                        }
                    }
                }
                Ok(Shape::sparse(norms, self.combined_threshold(other)))
            }
        }
    }
}
