//! Distributed tiled arrays
//!
//! A [`DistArray`] is a world, a tiled range, a shape, a process map, and
//! a distributed store of tile futures. Handles are cheap clones sharing
//! one underlying array. Tile slots are assigned once per evaluation;
//! assigning an expression replaces the whole array, and only after the
//! evaluation has fenced successfully — a failed evaluation leaves the
//! left-hand side untouched.
//!
//! # Examples
//!
//! ```no_run
//! use tessra_core::TiledRange;
//! use tessra_expr::DistArray;
//! use tessra_runtime::World;
//!
//! # fn demo() -> tessra_core::Result<()> {
//! let world = World::local();
//! let trange = TiledRange::uniform(&[8, 8], 4)?;
//! let a = DistArray::<f64>::new(&world, trange.clone())?;
//! a.fill(1.0)?;
//!
//! let b = DistArray::<f64>::new(&world, trange.clone())?;
//! b.fill(1.0)?;
//!
//! let mut c = DistArray::<f64>::new(&world, trange)?;
//! c.assign("m,n", a.tsr("m,k")? * b.tsr("k,n")?)?;
//! # Ok(())
//! # }
//! ```

use crate::engine;
use crate::expr::Expr;
use crate::Element;
use std::sync::Arc;
use tessra_core::error::{RangeError, Result, ShapeError};
use tessra_core::pmap::{default_pmap, Pmap};
use tessra_core::shape::Shape;
use tessra_core::tile::Tile;
use tessra_core::tiled_range::TiledRange;
use tessra_core::vars::VariableList;
use tessra_runtime::{DistStore, Future, World};
use tracing::debug;

struct ArrayInner<T: Element> {
    world: World,
    trange: TiledRange,
    shape: Arc<Shape>,
    pmap: Arc<dyn Pmap>,
    store: DistStore<Tile<T>>,
}

/// Distributed block-sparse tensor
pub struct DistArray<T: Element> {
    inner: Arc<ArrayInner<T>>,
}

impl<T: Element> Clone for DistArray<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Element> DistArray<T> {
    /// A dense array with the default blocked distribution
    pub fn new(world: &World, trange: TiledRange) -> Result<Self> {
        Self::with_shape(world, trange, Shape::dense())
    }

    /// An array with an explicit shape and the default distribution
    pub fn with_shape(world: &World, trange: TiledRange, shape: Shape) -> Result<Self> {
        let pmap = default_pmap(world.rank(), world.nprocs(), trange.tile_count())?;
        Self::with_pmap(world, trange, shape, pmap)
    }

    /// An array with explicit shape and distribution
    pub fn with_pmap(
        world: &World,
        trange: TiledRange,
        shape: Shape,
        pmap: Arc<dyn Pmap>,
    ) -> Result<Self> {
        if let Some(count) = shape.tile_count() {
            if count != trange.tile_count() {
                return Err(ShapeError::SizeMismatch {
                    left: count,
                    right: trange.tile_count(),
                }
                .into());
            }
        }
        if pmap.size() != trange.tile_count() {
            return Err(RangeError::TiledRangeMismatch {
                context: format!(
                    "process map covers {} tiles, tiled range has {}",
                    pmap.size(),
                    trange.tile_count()
                ),
            }
            .into());
        }
        Ok(Self {
            inner: Arc::new(ArrayInner {
                world: world.clone(),
                trange,
                shape: Arc::new(shape),
                pmap,
                store: DistStore::new(world),
            }),
        })
    }

    pub(crate) fn from_parts(
        world: World,
        trange: TiledRange,
        shape: Arc<Shape>,
        pmap: Arc<dyn Pmap>,
    ) -> Self {
        let store = DistStore::new(&world);
        Self {
            inner: Arc::new(ArrayInner {
                world,
                trange,
                shape,
                pmap,
                store,
            }),
        }
    }

    /// The owning world
    pub fn world(&self) -> &World {
        &self.inner.world
    }

    /// The array's tiled range
    pub fn trange(&self) -> &TiledRange {
        &self.inner.trange
    }

    /// The array's shape
    pub fn shape(&self) -> &Arc<Shape> {
        &self.inner.shape
    }

    /// The array's process map
    pub fn pmap(&self) -> &Arc<dyn Pmap> {
        &self.inner.pmap
    }

    pub(crate) fn store(&self) -> &DistStore<Tile<T>> {
        &self.inner.store
    }

    /// True when tile `t` is structurally zero
    pub fn is_zero(&self, t: usize) -> bool {
        self.inner.shape.is_zero(t)
    }

    /// True when tile `t` lives on this rank
    pub fn is_local(&self, t: usize) -> bool {
        self.inner.pmap.is_local(t)
    }

    /// Ordinals of this rank's structurally nonzero tiles
    pub fn local_tiles(&self) -> impl Iterator<Item = usize> + '_ {
        self.inner
            .pmap
            .local()
            .iter()
            .copied()
            .filter(|&t| !self.is_zero(t))
    }

    /// The future for tile `t`
    ///
    /// Remote tiles resolve when the owner's assignment arrives. Reading
    /// a structurally zero tile is a shape error; callers consult
    /// [`is_zero`](Self::is_zero) first.
    pub fn get(&self, t: usize) -> Result<Future<Tile<T>>> {
        if self.is_zero(t) {
            return Err(ShapeError::ZeroTile { ordinal: t }.into());
        }
        Ok(self.inner.store.get(t))
    }

    /// Assign tile `t` from a materialized tile
    pub fn set_tile(&self, t: usize, tile: Tile<T>) -> Result<()> {
        if self.is_zero(t) {
            return Err(ShapeError::ZeroTile { ordinal: t }.into());
        }
        let expected = self.inner.trange.make_tile_range(t)?;
        if tile.range() != &expected {
            return Err(RangeError::TiledRangeMismatch {
                context: format!("tile range {} does not cover slot {}", tile.range(), expected),
            }
            .into());
        }
        self.inner.store.set_value(&self.inner.world, t, tile);
        Ok(())
    }

    /// Assign tile `t` from a future
    pub fn set_tile_future(&self, t: usize, tile: Future<Tile<T>>) -> Result<()> {
        if self.is_zero(t) {
            return Err(ShapeError::ZeroTile { ordinal: t }.into());
        }
        self.inner.store.set(&self.inner.world, t, tile);
        Ok(())
    }

    /// Fill every local nonzero tile with one value
    pub fn fill(&self, value: T) -> Result<()> {
        self.fill_with(|_| value)
    }

    /// Fill every local nonzero tile from a function of the global
    /// element coordinate
    pub fn fill_with(&self, f: impl Fn(&[usize]) -> T) -> Result<()> {
        for t in self.local_tiles().collect::<Vec<_>>() {
            let range = self.inner.trange.make_tile_range(t)?;
            self.inner
                .store
                .set_value(&self.inner.world, t, Tile::from_fn(range, &f));
        }
        Ok(())
    }

    /// Annotate the array for use in an expression
    ///
    /// The label count must match the array's dimension.
    pub fn tsr(&self, vars: &str) -> Result<Expr<T>> {
        let annot = VariableList::parse(vars)?;
        annot.check_rank(self.inner.trange.rank())?;
        Ok(Expr::tsr(self.clone(), annot))
    }

    /// Evaluate `expr` into this array: `self(vars) = expr`
    ///
    /// The world, target labels, and (when the tile counts line up) the
    /// process map come from this array. The result is swapped in only
    /// after a successful fence; on error the array is unchanged.
    pub fn assign(&mut self, vars: &str, expr: Expr<T>) -> Result<()> {
        let target = VariableList::parse(vars)?;
        let (world, eval) = engine::compile(
            &expr.node,
            Some(&target),
            Some(self.inner.pmap.clone()),
        )?;
        let result = DistArray::from_parts(
            world.clone(),
            eval.trange().clone(),
            eval.shape().clone(),
            eval.pmap().clone(),
        );
        let mut assigned = 0usize;
        for &t in eval.pmap().local() {
            if eval.is_zero(t) {
                continue;
            }
            result.inner.store.set(&world, t, eval.get(t));
            assigned += 1;
        }
        debug!(tiles = assigned, target = %target, "assignment wired");
        eval.wait()?;
        self.inner = result.inner;
        Ok(())
    }

    /// `self(vars) += expr`
    pub fn add_assign(&mut self, vars: &str, expr: Expr<T>) -> Result<()> {
        let lhs = self.tsr(vars)?;
        self.assign(vars, lhs + expr)
    }

    /// `self(vars) -= expr`
    pub fn sub_assign(&mut self, vars: &str, expr: Expr<T>) -> Result<()> {
        let lhs = self.tsr(vars)?;
        self.assign(vars, lhs - expr)
    }

    /// `self(vars) *= expr` (element-wise or contraction by labels)
    pub fn mul_assign(&mut self, vars: &str, expr: Expr<T>) -> Result<()> {
        let lhs = self.tsr(vars)?;
        self.assign(vars, lhs * expr)
    }

    /// Fence the owning world
    pub fn wait(&self) -> Result<()> {
        self.inner.world.fence()
    }
}

impl<T: Element> std::fmt::Debug for DistArray<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistArray")
            .field("trange", &self.inner.trange.to_string())
            .field("sparsity", &self.inner.shape.sparsity())
            .field("rank", &self.inner.world.rank())
            .finish()
    }
}
