//! Axis permutations
//!
//! A [`Permutation`] is a bijection on `{0..n-1}` stored as its image
//! sequence: applying `p` to a coordinate tuple `x` produces `y` with
//! `y[p[i]] = x[i]`. The empty permutation is the distinguished identity
//! value; every operation treats it as a no-op, so callers never need to
//! special-case it.

use crate::error::{PermutationError, Result};
use smallvec::SmallVec;

/// Inline image storage; tensors of rank > 6 spill to the heap
type Image = SmallVec<[usize; 6]>;

/// A bijection on `{0..n-1}` stored as the image sequence
///
/// # Examples
///
/// ```
/// use tessra_core::perm::Permutation;
///
/// let p = Permutation::new(vec![2, 0, 1]).unwrap();
/// assert_eq!(p.apply(&[10, 20, 30]).unwrap(), vec![20, 30, 10]);
/// assert!(Permutation::identity().is_identity());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Permutation {
    image: Image,
}

impl Permutation {
    /// The identity permutation (empty image)
    pub fn identity() -> Self {
        Self {
            image: Image::new(),
        }
    }

    /// Construct from an image sequence, validating it is a bijection
    pub fn new(image: impl IntoIterator<Item = usize>) -> Result<Self> {
        let image: Image = image.into_iter().collect();
        let n = image.len();
        let mut seen = vec![false; n];
        for &i in &image {
            if i >= n || seen[i] {
                return Err(PermutationError::NotBijective {
                    image: image.to_vec(),
                    len: n,
                }
                .into());
            }
            seen[i] = true;
        }
        Ok(Self { image })
    }

    /// True for the identity (empty) permutation
    pub fn is_identity(&self) -> bool {
        self.image.is_empty() || self.image.iter().enumerate().all(|(i, &p)| i == p)
    }

    /// Rank of the permuted space (0 for the identity)
    pub fn len(&self) -> usize {
        self.image.len()
    }

    /// True when the image is empty
    pub fn is_empty(&self) -> bool {
        self.image.is_empty()
    }

    /// The image sequence (empty for the identity)
    pub fn image(&self) -> &[usize] {
        &self.image
    }

    /// Apply to a coordinate tuple: `out[p[i]] = coord[i]`
    ///
    /// The identity returns the input unchanged regardless of its length.
    pub fn apply<T: Clone>(&self, coord: &[T]) -> Result<Vec<T>> {
        if self.is_empty() {
            return Ok(coord.to_vec());
        }
        if coord.len() != self.image.len() {
            return Err(PermutationError::RankMismatch {
                perm: self.image.len(),
                arg: coord.len(),
            }
            .into());
        }
        let mut out: Vec<T> = coord.to_vec();
        for (i, x) in coord.iter().enumerate() {
            out[self.image[i]] = x.clone();
        }
        Ok(out)
    }

    /// Composition `self ∘ other`: apply `other` first, then `self`
    ///
    /// The image of the composite is `c[i] = self[other[i]]`.
    pub fn compose(&self, other: &Permutation) -> Result<Permutation> {
        if self.is_empty() {
            return Ok(other.clone());
        }
        if other.is_empty() {
            return Ok(self.clone());
        }
        if self.len() != other.len() {
            return Err(PermutationError::RankMismatch {
                perm: self.len(),
                arg: other.len(),
            }
            .into());
        }
        let image: Image = other.image.iter().map(|&i| self.image[i]).collect();
        Ok(Permutation { image })
    }

    /// The inverse permutation: `inv[p[i]] = i`
    pub fn inverse(&self) -> Permutation {
        if self.is_empty() {
            return Permutation::identity();
        }
        let mut image: Image = self.image.clone();
        for (i, &p) in self.image.iter().enumerate() {
            image[p] = i;
        }
        Permutation { image }
    }
}

impl std::fmt::Display for Permutation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "id");
        }
        write!(f, "{{")?;
        for (i, p) in self.image.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}->{}", i, p)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_non_bijections() {
        assert!(Permutation::new(vec![0, 0]).is_err());
        assert!(Permutation::new(vec![1, 2]).is_err());
        assert!(Permutation::new(vec![3, 0, 1]).is_err());
    }

    #[test]
    fn apply_reorders_components() {
        let p = Permutation::new(vec![1, 0]).unwrap();
        assert_eq!(p.apply(&["a", "b"]).unwrap(), vec!["b", "a"]);
    }

    #[test]
    fn identity_is_a_no_op() {
        let id = Permutation::identity();
        assert_eq!(id.apply(&[7usize, 8, 9]).unwrap(), vec![7, 8, 9]);
        let p = Permutation::new(vec![2, 0, 1]).unwrap();
        assert_eq!(id.compose(&p).unwrap(), p);
        assert_eq!(p.compose(&id).unwrap(), p);
    }

    #[test]
    fn explicit_identity_image_compares_as_identity() {
        let p = Permutation::new(vec![0, 1, 2]).unwrap();
        assert!(p.is_identity());
    }

    #[test]
    fn inverse_round_trips() {
        let p = Permutation::new(vec![2, 0, 3, 1]).unwrap();
        let x = [4usize, 5, 6, 7];
        let y = p.apply(&x).unwrap();
        assert_eq!(p.inverse().apply(&y).unwrap(), x.to_vec());
    }

    #[test]
    fn compose_applies_right_then_left() {
        let a = Permutation::new(vec![1, 2, 0]).unwrap();
        let b = Permutation::new(vec![0, 2, 1]).unwrap();
        let c = a.compose(&b).unwrap();
        let x = [10usize, 20, 30];
        let via_c = c.apply(&x).unwrap();
        let via_steps = a.apply(&b.apply(&x).unwrap()).unwrap();
        assert_eq!(via_c, via_steps);
    }
}
