//! Element-wise and contraction kernels over dense tiles
//!
//! Free functions consumed by the tile-op dispatch layer. Out-of-place
//! kernels allocate the result tile; `_to` variants fold into an existing
//! tile the caller owns. Kernels taking a [`Permutation`] fuse the axis
//! permutation into the write loop rather than materializing twice.
//!
//! All kernels are reentrant and hold no global state. Binary kernels
//! require both arguments to cover the same element range; the contraction
//! kernel matches trailing axes of the left argument against leading axes
//! of the right one, as arranged by the expression engine.
//!
//! # Examples
//!
//! ```
//! use tessra_core::kernels;
//! use tessra_core::perm::Permutation;
//! use tessra_core::range::Range;
//! use tessra_core::tile::Tile;
//!
//! let r = Range::from_extents(vec![2, 2]).unwrap();
//! let a = Tile::from_elem(r.clone(), 2.0);
//! let b = Tile::from_elem(r, 3.0);
//! let c = kernels::add(&a, &b, 1.0, &Permutation::identity()).unwrap();
//! assert_eq!(c.data(), &[5.0, 5.0, 5.0, 5.0]);
//! ```

use crate::error::{RangeError, Result};
use crate::perm::Permutation;
use crate::range::Range;
use crate::tile::Tile;
use scirs2_core::numeric::{Float, Num};

fn check_same_range<T>(a: &Tile<T>, b: &Tile<T>) -> Result<()> {
    if a.range() != b.range() {
        return Err(RangeError::TiledRangeMismatch {
            context: format!("tile ranges differ: {} vs {}", a.range(), b.range()),
        }
        .into());
    }
    Ok(())
}

// Apply an element-wise binary kernel, writing the result either straight
// through or through the permuted coordinate map.
fn binary_kernel<T: Num + Copy>(
    a: &Tile<T>,
    b: &Tile<T>,
    perm: &Permutation,
    f: impl Fn(T, T) -> T,
) -> Result<Tile<T>> {
    check_same_range(a, b)?;
    if perm.is_identity() {
        let data = a
            .data()
            .iter()
            .zip(b.data().iter())
            .map(|(&x, &y)| f(x, y))
            .collect();
        return Tile::new(a.range().clone(), data);
    }
    let out_range = a.range().permute(perm)?;
    let mut out = vec![T::zero(); out_range.volume()];
    for (ord, coord) in a.range().iter().enumerate() {
        let target = perm.apply(&coord)?;
        out[out_range.ordinal(&target)?] = f(a[ord], b[ord]);
    }
    Tile::new(out_range, out)
}

fn unary_kernel<T: Num + Copy>(
    a: &Tile<T>,
    perm: &Permutation,
    f: impl Fn(T) -> T,
) -> Result<Tile<T>> {
    if perm.is_identity() {
        let data = a.data().iter().map(|&x| f(x)).collect();
        return Tile::new(a.range().clone(), data);
    }
    let out_range = a.range().permute(perm)?;
    let mut out = vec![T::zero(); out_range.volume()];
    for (ord, coord) in a.range().iter().enumerate() {
        let target = perm.apply(&coord)?;
        out[out_range.ordinal(&target)?] = f(a[ord]);
    }
    Tile::new(out_range, out)
}

/// Permuted copy of a tile
pub fn permute<T: Num + Copy>(a: &Tile<T>, perm: &Permutation) -> Result<Tile<T>> {
    unary_kernel(a, perm, |x| x)
}

/// `(a + b) * factor`, optionally permuted
pub fn add<T: Num + Copy>(
    a: &Tile<T>,
    b: &Tile<T>,
    factor: T,
    perm: &Permutation,
) -> Result<Tile<T>> {
    binary_kernel(a, b, perm, |x, y| (x + y) * factor)
}

/// In-place `a = (a + b) * factor`
pub fn add_to<T: Num + Copy>(a: &mut Tile<T>, b: &Tile<T>, factor: T) -> Result<()> {
    check_same_range(a, b)?;
    for (x, &y) in a.data_mut().iter_mut().zip(b.data().iter()) {
        *x = (*x + y) * factor;
    }
    Ok(())
}

/// `(a - b) * factor`, optionally permuted
pub fn subt<T: Num + Copy>(
    a: &Tile<T>,
    b: &Tile<T>,
    factor: T,
    perm: &Permutation,
) -> Result<Tile<T>> {
    binary_kernel(a, b, perm, |x, y| (x - y) * factor)
}

/// In-place `a = (a - b) * factor`
pub fn subt_to<T: Num + Copy>(a: &mut Tile<T>, b: &Tile<T>, factor: T) -> Result<()> {
    check_same_range(a, b)?;
    for (x, &y) in a.data_mut().iter_mut().zip(b.data().iter()) {
        *x = (*x - y) * factor;
    }
    Ok(())
}

/// Element-wise `(a * b) * factor`, optionally permuted
pub fn mult<T: Num + Copy>(
    a: &Tile<T>,
    b: &Tile<T>,
    factor: T,
    perm: &Permutation,
) -> Result<Tile<T>> {
    binary_kernel(a, b, perm, |x, y| x * y * factor)
}

/// In-place element-wise `a = (a * b) * factor`
pub fn mult_to<T: Num + Copy>(a: &mut Tile<T>, b: &Tile<T>, factor: T) -> Result<()> {
    check_same_range(a, b)?;
    for (x, &y) in a.data_mut().iter_mut().zip(b.data().iter()) {
        *x = *x * y * factor;
    }
    Ok(())
}

/// `a * factor`, optionally permuted
pub fn scale<T: Num + Copy>(a: &Tile<T>, factor: T, perm: &Permutation) -> Result<Tile<T>> {
    unary_kernel(a, perm, |x| x * factor)
}

/// In-place `a = a * factor`
pub fn scale_to<T: Num + Copy>(a: &mut Tile<T>, factor: T) {
    for x in a.data_mut() {
        *x = *x * factor;
    }
}

/// `-a`, optionally permuted
pub fn neg<T: Num + Copy>(a: &Tile<T>, perm: &Permutation) -> Result<Tile<T>> {
    unary_kernel(a, perm, |x| T::zero() - x)
}

/// Axis bookkeeping for the fused matrix view of a tile contraction
///
/// The engine arranges the left argument as `[outer..., contracted...]` and
/// the right as `[contracted..., outer...]`, so a tile contraction is a
/// plain `m x k` by `k x n` matrix product over row-major flattened groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GemmHelper {
    left_rank: usize,
    right_rank: usize,
    num_contract: usize,
}

impl GemmHelper {
    pub fn new(left_rank: usize, right_rank: usize, num_contract: usize) -> Result<Self> {
        if num_contract == 0 || num_contract > left_rank || num_contract > right_rank {
            return Err(RangeError::RankMismatch {
                expected: left_rank,
                got: num_contract,
            }
            .into());
        }
        Ok(Self {
            left_rank,
            right_rank,
            num_contract,
        })
    }

    /// Rank of the contraction result
    pub fn result_rank(&self) -> usize {
        self.left_rank + self.right_rank - 2 * self.num_contract
    }

    /// Number of contracted axes
    pub fn num_contract(&self) -> usize {
        self.num_contract
    }

    fn split(&self, left: &Range, right: &Range) -> Result<(usize, usize, usize, Range)> {
        if left.rank() != self.left_rank {
            return Err(RangeError::RankMismatch {
                expected: self.left_rank,
                got: left.rank(),
            }
            .into());
        }
        if right.rank() != self.right_rank {
            return Err(RangeError::RankMismatch {
                expected: self.right_rank,
                got: right.rank(),
            }
            .into());
        }
        let split_l = self.left_rank - self.num_contract;
        // Contracted extents must agree pairwise
        for i in 0..self.num_contract {
            if left.extents()[split_l + i] != right.extents()[i] {
                return Err(RangeError::TiledRangeMismatch {
                    context: format!(
                        "contracted extent mismatch: {} vs {}",
                        left.extents()[split_l + i],
                        right.extents()[i]
                    ),
                }
                .into());
            }
        }
        let m: usize = left.extents()[..split_l].iter().product();
        let k: usize = left.extents()[split_l..].iter().product();
        let n: usize = right.extents()[self.num_contract..].iter().product();
        let result_range = Range::new(
            left.lower()[..split_l]
                .iter()
                .chain(right.lower()[self.num_contract..].iter())
                .copied()
                .collect::<Vec<_>>(),
            left.upper()[..split_l]
                .iter()
                .chain(right.upper()[self.num_contract..].iter())
                .copied()
                .collect::<Vec<_>>(),
        )?;
        Ok((m, k, n, result_range))
    }

    /// Element range of the contraction of tiles covering `left` and `right`
    pub fn result_range(&self, left: &Range, right: &Range) -> Result<Range> {
        Ok(self.split(left, right)?.3)
    }
}

/// Contraction `a . b * factor` over the helper's fused axes
pub fn gemm<T: Num + Copy>(
    a: &Tile<T>,
    b: &Tile<T>,
    factor: T,
    helper: &GemmHelper,
) -> Result<Tile<T>> {
    let (_, _, _, range) = helper.split(a.range(), b.range())?;
    let mut c = Tile::from_elem(range, T::zero());
    gemm_acc(&mut c, a, b, factor, helper)?;
    Ok(c)
}

/// Accumulating contraction `c += a . b * factor`
pub fn gemm_acc<T: Num + Copy>(
    c: &mut Tile<T>,
    a: &Tile<T>,
    b: &Tile<T>,
    factor: T,
    helper: &GemmHelper,
) -> Result<()> {
    let (m, k, n, range) = helper.split(a.range(), b.range())?;
    if c.range() != &range {
        return Err(RangeError::TiledRangeMismatch {
            context: format!("gemm result range mismatch: {} vs {}", c.range(), range),
        }
        .into());
    }
    let av = a.data();
    let bv = b.data();
    let cv = c.data_mut();
    for i in 0..m {
        for l in 0..k {
            let x = av[i * k + l] * factor;
            if x == T::zero() {
                continue;
            }
            let brow = &bv[l * n..(l + 1) * n];
            let crow = &mut cv[i * n..(i + 1) * n];
            for (cj, &bj) in crow.iter_mut().zip(brow.iter()) {
                *cj = *cj + x * bj;
            }
        }
    }
    Ok(())
}

/// Sum of all elements
pub fn sum<T: Num + Copy>(a: &Tile<T>) -> T {
    a.data().iter().fold(T::zero(), |acc, &x| acc + x)
}

/// Product of all elements
pub fn product<T: Num + Copy>(a: &Tile<T>) -> T {
    a.data().iter().fold(T::one(), |acc, &x| acc * x)
}

/// Sum of squared elements as `f64`
pub fn squared_norm<T: Float>(a: &Tile<T>) -> f64 {
    a.data()
        .iter()
        .map(|x| {
            let v = x.to_f64().unwrap_or(0.0);
            v * v
        })
        .sum()
}

/// Frobenius norm as `f64`
pub fn norm<T: Float>(a: &Tile<T>) -> f64 {
    squared_norm(a).sqrt()
}

/// Minimum element; positive infinity for an empty tile
pub fn min<T: Float>(a: &Tile<T>) -> T {
    a.data()
        .iter()
        .fold(T::infinity(), |acc, &x| if x < acc { x } else { acc })
}

/// Maximum element; negative infinity for an empty tile
pub fn max<T: Float>(a: &Tile<T>) -> T {
    a.data()
        .iter()
        .fold(T::neg_infinity(), |acc, &x| if x > acc { x } else { acc })
}

/// Minimum absolute value
pub fn abs_min<T: Float>(a: &Tile<T>) -> T {
    a.data().iter().fold(T::infinity(), |acc, &x| {
        let v = x.abs();
        if v < acc {
            v
        } else {
            acc
        }
    })
}

/// Maximum absolute value
pub fn abs_max<T: Float>(a: &Tile<T>) -> T {
    a.data().iter().fold(T::zero(), |acc, &x| {
        let v = x.abs();
        if v > acc {
            v
        } else {
            acc
        }
    })
}

/// Sum of diagonal elements of a 2-D tile
///
/// Only the diagonal coordinates actually covered by the tile's range
/// contribute, so per-tile traces sum to the global trace.
pub fn trace<T: Num + Copy>(a: &Tile<T>) -> Result<T> {
    let r = a.range();
    if r.rank() != 2 {
        return Err(RangeError::RankMismatch {
            expected: 2,
            got: r.rank(),
        }
        .into());
    }
    let lo = r.lower()[0].max(r.lower()[1]);
    let hi = r.upper()[0].min(r.upper()[1]);
    let mut acc = T::zero();
    for i in lo..hi {
        acc = acc + a.at(&[i, i])?;
    }
    Ok(acc)
}

/// Inner product of two tiles over the same range
pub fn dot<T: Num + Copy>(a: &Tile<T>, b: &Tile<T>) -> Result<T> {
    check_same_range(a, b)?;
    Ok(a.data()
        .iter()
        .zip(b.data().iter())
        .fold(T::zero(), |acc, (&x, &y)| acc + x * y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn tile2x2(vals: [f64; 4]) -> Tile<f64> {
        Tile::new(Range::from_extents(vec![2, 2]).unwrap(), vals.to_vec()).unwrap()
    }

    #[test]
    fn add_scales_the_sum() {
        let a = tile2x2([1.0, 2.0, 3.0, 4.0]);
        let b = tile2x2([4.0, 3.0, 2.0, 1.0]);
        let c = add(&a, &b, 2.0, &Permutation::identity()).unwrap();
        assert_eq!(c.data(), &[10.0, 10.0, 10.0, 10.0]);
    }

    #[test]
    fn add_rejects_mismatched_ranges() {
        let a = tile2x2([0.0; 4]);
        let b = Tile::from_elem(Range::from_extents(vec![4]).unwrap(), 0.0);
        assert!(add(&a, &b, 1.0, &Permutation::identity()).is_err());
    }

    #[test]
    fn permuted_binary_kernel_transposes() {
        let a = tile2x2([1.0, 2.0, 3.0, 4.0]);
        let b = tile2x2([0.0, 0.0, 0.0, 0.0]);
        let p = Permutation::new(vec![1, 0]).unwrap();
        let c = add(&a, &b, 1.0, &p).unwrap();
        assert_eq!(c.data(), &[1.0, 3.0, 2.0, 4.0]);
    }

    #[test]
    fn in_place_variants_match_out_of_place() {
        let a = tile2x2([1.0, 2.0, 3.0, 4.0]);
        let b = tile2x2([5.0, 6.0, 7.0, 8.0]);
        let id = Permutation::identity();

        let mut a2 = a.clone();
        add_to(&mut a2, &b, 3.0).unwrap();
        assert_eq!(a2, add(&a, &b, 3.0, &id).unwrap());

        let mut a3 = a.clone();
        subt_to(&mut a3, &b, 2.0).unwrap();
        assert_eq!(a3, subt(&a, &b, 2.0, &id).unwrap());

        let mut a4 = a.clone();
        mult_to(&mut a4, &b, 1.5).unwrap();
        assert_eq!(a4, mult(&a, &b, 1.5, &id).unwrap());
    }

    #[test]
    fn neg_flips_sign() {
        let a = tile2x2([1.0, -2.0, 0.0, 4.0]);
        let c = neg(&a, &Permutation::identity()).unwrap();
        assert_eq!(c.data(), &[-1.0, 2.0, 0.0, -4.0]);
    }

    #[test]
    fn gemm_matches_hand_product() {
        // [1 2; 3 4] * [5 6; 7 8] = [19 22; 43 50]
        let a = tile2x2([1.0, 2.0, 3.0, 4.0]);
        let b = tile2x2([5.0, 6.0, 7.0, 8.0]);
        let h = GemmHelper::new(2, 2, 1).unwrap();
        let c = gemm(&a, &b, 1.0, &h).unwrap();
        assert_eq!(c.data(), &[19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn gemm_acc_accumulates() {
        let a = tile2x2([1.0, 0.0, 0.0, 1.0]);
        let b = tile2x2([1.0, 2.0, 3.0, 4.0]);
        let h = GemmHelper::new(2, 2, 1).unwrap();
        let mut c = gemm(&a, &b, 1.0, &h).unwrap();
        gemm_acc(&mut c, &a, &b, 1.0, &h).unwrap();
        assert_eq!(c.data(), &[2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn gemm_result_range_concatenates_outer_axes() {
        let a = Tile::from_elem(Range::new(vec![2, 0], vec![4, 3]).unwrap(), 1.0);
        let b = Tile::from_elem(Range::new(vec![0, 5], vec![3, 9]).unwrap(), 1.0);
        let h = GemmHelper::new(2, 2, 1).unwrap();
        let c = gemm(&a, &b, 1.0, &h).unwrap();
        assert_eq!(c.range().lower(), &[2, 5]);
        assert_eq!(c.range().upper(), &[4, 9]);
        // Every element is the sum over k of 1*1
        assert!(c.data().iter().all(|&x| x == 3.0));
    }

    #[test]
    fn higher_order_gemm_fuses_axes() {
        // a: (2,2,3), b: (3,2) contracting one axis -> (2,2,2)
        let ra = Range::from_extents(vec![2, 2, 3]).unwrap();
        let rb = Range::from_extents(vec![3, 2]).unwrap();
        let a = Tile::from_fn(ra, |c| (c[0] + c[1] + c[2]) as f64);
        let b = Tile::from_fn(rb, |c| (c[0] * 2 + c[1]) as f64);
        let h = GemmHelper::new(3, 2, 1).unwrap();
        let c = gemm(&a, &b, 1.0, &h).unwrap();
        assert_eq!(c.range().extents(), &[2, 2, 2]);
        // Check one entry by hand: c[0,1,0] = sum_k a[0,1,k]*b[k,0]
        let expect: f64 = (0..3).map(|k| (1 + k) as f64 * (k * 2) as f64).sum();
        assert_eq!(c.at(&[0, 1, 0]).unwrap(), expect);
    }

    #[test]
    fn reductions_on_known_data() {
        let a = tile2x2([1.0, -2.0, 3.0, -4.0]);
        assert_eq!(sum(&a), -2.0);
        assert_eq!(product(&a), 24.0);
        assert_eq!(min(&a), -4.0);
        assert_eq!(max(&a), 3.0);
        assert_eq!(abs_min(&a), 1.0);
        assert_eq!(abs_max(&a), 4.0);
        assert_relative_eq!(squared_norm(&a), 30.0);
        assert_relative_eq!(norm(&a), 30.0f64.sqrt());
    }

    #[test]
    fn trace_uses_global_diagonal() {
        // Tile covering rows 2..4, cols 0..4: diagonal elements (2,2),(3,3)
        let r = Range::new(vec![2, 0], vec![4, 4]).unwrap();
        let t = Tile::from_fn(r, |c| if c[0] == c[1] { 1.0 } else { 0.0 });
        assert_eq!(trace(&t).unwrap(), 2.0);
    }

    #[test]
    fn dot_is_elementwise_inner_product() {
        let a = tile2x2([1.0, 2.0, 3.0, 4.0]);
        let b = tile2x2([4.0, 3.0, 2.0, 1.0]);
        assert_eq!(dot(&a, &b).unwrap(), 4.0 + 6.0 + 6.0 + 4.0);
    }
}
