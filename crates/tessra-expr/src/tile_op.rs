//! Tile-op dispatch
//!
//! Binds the kernels of `tessra_core::kernels` to the argument forms the
//! evaluators actually hand over: a tile argument is either structurally
//! [`Zero`](TileArg::Zero), an owned value the op may reuse in place, or a
//! shared value it must not touch. Ownership is the consumability flag:
//! evaluators consume their single-consumer inputs (yielding `Own` when the
//! last reference arrives) and share everything else, so dispatch picks the
//! in-place kernel exactly when it is safe.
//!
//! Dispatch rules, in order: a non-identity permutation forces the
//! out-of-place permuting kernel; an owned left argument folds in place; an
//! owned right argument folds in place for commutative ops only; otherwise
//! the out-of-place kernel runs. Zero arguments take the operation's
//! algebraic identity (`0 + r = r`, `l - 0 = l`, ...); operations with no
//! zero identity report [`Error::InvalidZeroOperand`].

use crate::Element;
use std::sync::Arc;
use tessra_core::error::{Error, Result};
use tessra_core::kernels;
use tessra_core::perm::Permutation;
use tessra_core::tile::Tile;
use tessra_runtime::Consumed;

/// A tile argument with its consumability encoded in ownership
pub enum TileArg<T> {
    /// A structurally zero tile
    Zero,
    /// The last live reference: the op may mutate or reuse the storage
    Own(Tile<T>),
    /// A shared reference: the op must leave the storage alone
    Shared(Arc<Tile<T>>),
}

impl<T> TileArg<T> {
    /// Wrap a consumed future value
    pub fn from_consumed(value: Consumed<Tile<T>>) -> Self {
        match value {
            Consumed::Own(t) => TileArg::Own(t),
            Consumed::Shared(t) => TileArg::Shared(t),
        }
    }

    /// True for the zero argument
    pub fn is_zero(&self) -> bool {
        matches!(self, TileArg::Zero)
    }

    fn tile(&self) -> Option<&Tile<T>> {
        match self {
            TileArg::Zero => None,
            TileArg::Own(t) => Some(t),
            TileArg::Shared(t) => Some(t),
        }
    }
}

/// Unary tile operation: scale and/or permute
///
/// The no-op form (factor one, identity permutation) passes owned tiles
/// through untouched and clones shared ones.
#[derive(Debug, Clone)]
pub struct UnaryTileOp<T> {
    factor: T,
    perm: Permutation,
}

impl<T: Element> UnaryTileOp<T> {
    /// The pass-through op
    pub fn noop() -> Self {
        Self {
            factor: T::one(),
            perm: Permutation::identity(),
        }
    }

    /// A scaling op
    pub fn scale(factor: T) -> Self {
        Self {
            factor,
            perm: Permutation::identity(),
        }
    }

    /// Attach a result permutation
    pub fn with_perm(mut self, perm: Permutation) -> Self {
        self.perm = perm;
        self
    }

    /// The result permutation
    pub fn permutation(&self) -> &Permutation {
        &self.perm
    }

    /// The scale factor
    pub fn factor(&self) -> T {
        self.factor
    }

    /// True when evaluation would pass tiles through unchanged
    pub fn is_noop(&self) -> bool {
        self.factor == T::one() && self.perm.is_identity()
    }

    /// Evaluate one argument tile
    pub fn eval(&self, arg: TileArg<T>) -> Result<Tile<T>> {
        match arg {
            TileArg::Zero => Err(Error::InvalidZeroOperand(
                "unary tile op applied to a zero tile".to_string(),
            )),
            TileArg::Own(mut t) => {
                if !self.perm.is_identity() {
                    kernels::scale(&t, self.factor, &self.perm)
                } else {
                    if self.factor != T::one() {
                        kernels::scale_to(&mut t, self.factor);
                    }
                    Ok(t)
                }
            }
            TileArg::Shared(t) => {
                if self.is_noop() {
                    Ok((*t).clone())
                } else {
                    kernels::scale(&t, self.factor, &self.perm)
                }
            }
        }
    }
}

/// The element-wise binary operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryKind {
    Add,
    Subt,
    Mult,
}

impl BinaryKind {
    fn is_commutative(self) -> bool {
        matches!(self, BinaryKind::Add | BinaryKind::Mult)
    }
}

/// Binary tile operation with scale factor and result permutation
#[derive(Debug, Clone)]
pub struct BinaryTileOp<T> {
    kind: BinaryKind,
    factor: T,
    perm: Permutation,
}

impl<T: Element> BinaryTileOp<T> {
    pub fn new(kind: BinaryKind, factor: T, perm: Permutation) -> Self {
        Self { kind, factor, perm }
    }

    pub fn kind(&self) -> BinaryKind {
        self.kind
    }

    // One side is zero: apply the surviving side's identity form.
    // `factor` carries the sign for the zero-left subtraction case.
    fn zero_side(&self, arg: TileArg<T>, factor: T) -> Result<Tile<T>> {
        match arg {
            TileArg::Zero => unreachable!("zero-zero handled by caller"),
            TileArg::Own(mut t) => {
                if !self.perm.is_identity() {
                    kernels::scale(&t, factor, &self.perm)
                } else {
                    if factor != T::one() {
                        kernels::scale_to(&mut t, factor);
                    }
                    Ok(t)
                }
            }
            TileArg::Shared(t) => kernels::scale(&t, factor, &self.perm),
        }
    }

    /// Evaluate an argument pair
    pub fn eval(&self, left: TileArg<T>, right: TileArg<T>) -> Result<Tile<T>> {
        match (left.is_zero(), right.is_zero()) {
            (true, true) => {
                return Err(Error::InvalidZeroOperand(
                    "binary tile op applied to two zero tiles".to_string(),
                ))
            }
            (true, false) => {
                return match self.kind {
                    BinaryKind::Add => self.zero_side(right, self.factor),
                    BinaryKind::Subt => self.zero_side(right, T::zero() - self.factor),
                    BinaryKind::Mult => Err(Error::InvalidZeroOperand(
                        "multiplication has no zero-operand identity".to_string(),
                    )),
                }
            }
            (false, true) => {
                return match self.kind {
                    BinaryKind::Add | BinaryKind::Subt => self.zero_side(left, self.factor),
                    BinaryKind::Mult => Err(Error::InvalidZeroOperand(
                        "multiplication has no zero-operand identity".to_string(),
                    )),
                }
            }
            (false, false) => {}
        }

        if !self.perm.is_identity() {
            let l = left.tile().expect("nonzero left");
            let r = right.tile().expect("nonzero right");
            return match self.kind {
                BinaryKind::Add => kernels::add(l, r, self.factor, &self.perm),
                BinaryKind::Subt => kernels::subt(l, r, self.factor, &self.perm),
                BinaryKind::Mult => kernels::mult(l, r, self.factor, &self.perm),
            };
        }

        match (left, right) {
            (TileArg::Own(mut l), right) => {
                let r = right.tile().expect("nonzero right");
                match self.kind {
                    BinaryKind::Add => kernels::add_to(&mut l, r, self.factor)?,
                    BinaryKind::Subt => kernels::subt_to(&mut l, r, self.factor)?,
                    BinaryKind::Mult => kernels::mult_to(&mut l, r, self.factor)?,
                }
                Ok(l)
            }
            (TileArg::Shared(l), TileArg::Own(mut r)) if self.kind.is_commutative() => {
                match self.kind {
                    BinaryKind::Add => kernels::add_to(&mut r, &l, self.factor)?,
                    BinaryKind::Mult => kernels::mult_to(&mut r, &l, self.factor)?,
                    BinaryKind::Subt => unreachable!("subtraction is not commutative"),
                }
                Ok(r)
            }
            (left, right) => {
                let l = left.tile().expect("nonzero left");
                let r = right.tile().expect("nonzero right");
                let id = Permutation::identity();
                match self.kind {
                    BinaryKind::Add => kernels::add(l, r, self.factor, &id),
                    BinaryKind::Subt => kernels::subt(l, r, self.factor, &id),
                    BinaryKind::Mult => kernels::mult(l, r, self.factor, &id),
                }
            }
        }
    }
}
