//! Expression reductions
//!
//! Scalar reductions over expressions: the expression is compiled to its
//! distributed evaluator, this rank's nonzero tile futures seed a reduce
//! task, and the local result enters a world all-reduce. Fold order is
//! non-deterministic, which is sound because every offered operation is
//! associative and commutative.
//!
//! The pairwise dot product uses the pair-reduce engine: a tile pair
//! contributes only once both halves have resolved, and both operands
//! must be tiled identically.

use crate::engine;
use crate::expr::Expr;
use crate::Element;
use tessra_core::error::{RangeError, Result};
use tessra_core::kernels;
use tessra_core::tile::Tile;
use tessra_runtime::{all_reduce, ReduceOp, ReducePairOp, ReducePairTask, ReduceTask, World};

#[derive(Clone, Copy, PartialEq, Eq)]
enum ScalarKind {
    Sum,
    Product,
    Min,
    Max,
    AbsMin,
    AbsMax,
    Trace,
}

struct ScalarReduceOp<T: Element> {
    kind: ScalarKind,
    world: World,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T: Element> ScalarReduceOp<T> {
    fn new(kind: ScalarKind, world: World) -> Self {
        Self {
            kind,
            world,
            _marker: std::marker::PhantomData,
        }
    }

    fn merge(kind: ScalarKind, a: T, b: T) -> T {
        match kind {
            ScalarKind::Sum | ScalarKind::Trace => a + b,
            ScalarKind::Product => a * b,
            ScalarKind::Min | ScalarKind::AbsMin => a.min(b),
            ScalarKind::Max | ScalarKind::AbsMax => a.max(b),
        }
    }

    fn empty(kind: ScalarKind) -> T {
        match kind {
            ScalarKind::Sum | ScalarKind::Trace => T::zero(),
            ScalarKind::Product => T::one(),
            ScalarKind::Min | ScalarKind::AbsMin => T::infinity(),
            ScalarKind::Max => T::neg_infinity(),
            ScalarKind::AbsMax => T::zero(),
        }
    }
}

impl<T: Element> ReduceOp for ScalarReduceOp<T> {
    type Arg = Tile<T>;
    type Result = T;

    fn identity(&self) -> T {
        Self::empty(self.kind)
    }

    fn fold(&self, acc: &mut T, tile: &Tile<T>) {
        let v = match self.kind {
            ScalarKind::Sum => kernels::sum(tile),
            ScalarKind::Product => kernels::product(tile),
            ScalarKind::Min => kernels::min(tile),
            ScalarKind::Max => kernels::max(tile),
            ScalarKind::AbsMin => kernels::abs_min(tile),
            ScalarKind::AbsMax => kernels::abs_max(tile),
            ScalarKind::Trace => match kernels::trace(tile) {
                Ok(v) => v,
                Err(e) => {
                    self.world.record_error(e);
                    return;
                }
            },
        };
        *acc = Self::merge(self.kind, *acc, v);
    }

    fn combine(&self, acc: &mut T, other: T) {
        *acc = Self::merge(self.kind, *acc, other);
    }
}

struct SquaredNormOp<T: Element>(std::marker::PhantomData<fn() -> T>);

impl<T: Element> ReduceOp for SquaredNormOp<T> {
    type Arg = Tile<T>;
    type Result = f64;

    fn identity(&self) -> f64 {
        0.0
    }

    fn fold(&self, acc: &mut f64, tile: &Tile<T>) {
        *acc += kernels::squared_norm(tile);
    }

    fn combine(&self, acc: &mut f64, other: f64) {
        *acc += other;
    }
}

struct DotOp<T: Element> {
    world: World,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T: Element> ReducePairOp for DotOp<T> {
    type First = Tile<T>;
    type Second = Tile<T>;
    type Result = T;

    fn identity(&self) -> T {
        T::zero()
    }

    fn fold_pair(&self, acc: &mut T, left: &Tile<T>, right: &Tile<T>) {
        match kernels::dot(left, right) {
            Ok(v) => *acc = *acc + v,
            Err(e) => self.world.record_error(e),
        }
    }

    fn combine(&self, acc: &mut T, other: T) {
        *acc = *acc + other;
    }
}

impl<T: Element> Expr<T> {
    fn reduce_scalar(&self, kind: ScalarKind) -> Result<T> {
        let (world, eval) = engine::compile(&self.node, None, None)?;
        if kind == ScalarKind::Trace && eval.trange().rank() != 2 {
            return Err(RangeError::RankMismatch {
                expected: 2,
                got: eval.trange().rank(),
            }
            .into());
        }
        let mut task = ReduceTask::new(&world, ScalarReduceOp::new(kind, world.clone()));
        for &t in eval.pmap().local() {
            if !eval.is_zero(t) {
                task.add(eval.get(t));
            }
        }
        let local = task.submit();
        world.fence()?;
        let local = *local.get();
        all_reduce(world.comm().as_ref(), local, |a, b| {
            ScalarReduceOp::<T>::merge(kind, a, b)
        })
    }

    /// Sum of all elements
    pub fn sum(&self) -> Result<T> {
        self.reduce_scalar(ScalarKind::Sum)
    }

    /// Product over all structurally nonzero tiles' elements
    pub fn product(&self) -> Result<T> {
        self.reduce_scalar(ScalarKind::Product)
    }

    /// Minimum element over nonzero tiles
    pub fn min(&self) -> Result<T> {
        self.reduce_scalar(ScalarKind::Min)
    }

    /// Maximum element over nonzero tiles
    pub fn max(&self) -> Result<T> {
        self.reduce_scalar(ScalarKind::Max)
    }

    /// Minimum absolute element over nonzero tiles
    pub fn abs_min(&self) -> Result<T> {
        self.reduce_scalar(ScalarKind::AbsMin)
    }

    /// Maximum absolute element over nonzero tiles
    pub fn abs_max(&self) -> Result<T> {
        self.reduce_scalar(ScalarKind::AbsMax)
    }

    /// Trace of a matrix expression
    pub fn trace(&self) -> Result<T> {
        self.reduce_scalar(ScalarKind::Trace)
    }

    /// Sum of squared elements, as `f64`
    pub fn squared_norm(&self) -> Result<f64> {
        let (world, eval) = engine::compile::<T>(&self.node, None, None)?;
        let mut task =
            ReduceTask::new(&world, SquaredNormOp::<T>(std::marker::PhantomData));
        for &t in eval.pmap().local() {
            if !eval.is_zero(t) {
                task.add(eval.get(t));
            }
        }
        let local = task.submit();
        world.fence()?;
        let local = *local.get();
        all_reduce(world.comm().as_ref(), local, |a, b| a + b)
    }

    /// Frobenius norm, as `f64`
    pub fn norm(&self) -> Result<f64> {
        Ok(self.squared_norm()?.sqrt())
    }

    /// Inner product with another expression
    ///
    /// Both operands must be tiled identically; the right-hand side is
    /// aligned to this expression's labels.
    pub fn dot(&self, other: &Expr<T>) -> Result<T> {
        let (world, left) = engine::compile(&self.node, None, None)?;
        let target = engine::natural_vars(&self.node)?;
        let (_, right) = engine::compile(&other.node, Some(&target), None)?;
        if left.trange() != right.trange() {
            return Err(RangeError::TiledRangeMismatch {
                context: format!(
                    "dot operands tiled differently: {} vs {}",
                    left.trange(),
                    right.trange()
                ),
            }
            .into());
        }
        let mut task = ReducePairTask::new(
            &world,
            DotOp::<T> {
                world: world.clone(),
                _marker: std::marker::PhantomData,
            },
        );
        for &t in left.pmap().local() {
            if left.is_zero(t) || right.is_zero(t) {
                continue;
            }
            task.add(left.get(t), right.get(t));
        }
        let local = task.submit();
        world.fence()?;
        let local = *local.get();
        all_reduce(world.comm().as_ref(), local, |a, b| a + b)
    }
}
