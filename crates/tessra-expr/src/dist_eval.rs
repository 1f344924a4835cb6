//! Distributed evaluators
//!
//! A [`DistEval`] is a lazy, tile-indexed tensor node: a tiled range, a
//! shape, a process map, and a distributed store of tile futures wired at
//! construction time. Wiring spawns no kernel work by itself — every tile
//! task fires through future callbacks as its inputs resolve, locally or
//! on another rank. `get` hands out the future for any tile the shape
//! declares nonzero; for a given output tile, the future resolves only
//! after every contribution has folded, while distinct output tiles are
//! entirely unordered.
//!
//! Node kinds: array sources (with scale/permutation folded into the tile
//! op and optional block offsets), unary and binary element-wise nodes,
//! and the contraction node. The contraction runs SUMMA-style on a 2-D
//! cyclic process grid: result tiles are owner-computed, the left row
//! panels and right column panels a rank needs for step `k` are fetched
//! once and shared across that rank's result tiles, and the per-tile
//! partial products fan into a dependency-driven reduce task.

use crate::array::DistArray;
use crate::tile_op::{BinaryTileOp, TileArg, UnaryTileOp};
use crate::Element;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tessra_core::error::Result;
use tessra_core::kernels::{self, GemmHelper};
use tessra_core::pmap::Pmap;
use tessra_core::range::{Index, Range};
use tessra_core::shape::Shape;
use tessra_core::tile::Tile;
use tessra_core::tiled_range::TiledRange;
use tessra_runtime::{join2, DistStore, Future, ReduceOp, ReduceTask, World};
use tracing::debug;

/// Lazy tile-future view of a tensor node
pub struct DistEval<T: Element> {
    world: World,
    trange: TiledRange,
    shape: Arc<Shape>,
    pmap: Arc<dyn Pmap>,
    store: DistStore<Tile<T>>,
}

impl<T: Element> Clone for DistEval<T> {
    fn clone(&self) -> Self {
        Self {
            world: self.world.clone(),
            trange: self.trange.clone(),
            shape: self.shape.clone(),
            pmap: self.pmap.clone(),
            store: self.store.clone(),
        }
    }
}

// Run `task` once both futures have resolved.
fn when_both<T: Element>(
    world: &World,
    a: &Future<Tile<T>>,
    b: &Future<Tile<T>>,
    task: impl FnOnce() + Send + 'static,
) {
    let pending = Arc::new(AtomicUsize::new(2));
    let slot: Arc<Mutex<Option<Box<dyn FnOnce() + Send>>>> =
        Arc::new(Mutex::new(Some(Box::new(task))));
    for which in 0..2 {
        let pending = pending.clone();
        let slot = slot.clone();
        let world = world.clone();
        let cb: Box<dyn FnOnce() + Send> = Box::new(move || {
            if pending.fetch_sub(1, Ordering::AcqRel) == 1 {
                if let Some(task) = slot.lock().take() {
                    world.spawn(task);
                }
            }
        });
        if which == 0 {
            a.register_callback(cb);
        } else {
            b.register_callback(cb);
        }
    }
}

impl<T: Element> DistEval<T> {
    fn frame(
        world: &World,
        trange: TiledRange,
        shape: Arc<Shape>,
        pmap: Arc<dyn Pmap>,
    ) -> Self {
        Self {
            world: world.clone(),
            trange,
            shape,
            pmap,
            store: DistStore::new(world),
        }
    }

    /// The evaluator's tiled range
    pub fn trange(&self) -> &TiledRange {
        &self.trange
    }

    /// The evaluator's shape
    pub fn shape(&self) -> &Arc<Shape> {
        &self.shape
    }

    /// The evaluator's process map
    pub fn pmap(&self) -> &Arc<dyn Pmap> {
        &self.pmap
    }

    /// The owning world
    pub fn world(&self) -> &World {
        &self.world
    }

    /// True when tile `t` is structurally zero
    pub fn is_zero(&self, t: usize) -> bool {
        self.shape.is_zero(t)
    }

    /// Future for tile `t`; valid for any tile the shape declares nonzero
    pub fn get(&self, t: usize) -> Future<Tile<T>> {
        debug_assert!(!self.is_zero(t), "requested a structurally zero tile");
        self.store.get(t)
    }

    /// Block until the evaluator tree has retired on every rank
    pub fn wait(&self) -> Result<()> {
        self.world.fence()
    }

    // Wire one output tile from one source future. `shared_pull` keeps the
    // source readable (array tiles have other consumers); otherwise the
    // task consumes it. `rebase` rebinds the result to a block-local range.
    fn chain_unary(
        &self,
        t: usize,
        src: Future<Tile<T>>,
        op: UnaryTileOp<T>,
        shared_pull: bool,
        rebase: Option<Range>,
    ) {
        let out = self.store.get(t);
        let world = self.world.clone();
        let ready = src.clone();
        src.register_callback(Box::new(move || {
            let w = world.clone();
            world.spawn(move || {
                let arg = if shared_pull {
                    TileArg::Shared(ready.get())
                } else {
                    match ready.consume() {
                        Ok(c) => TileArg::from_consumed(c),
                        Err(e) => {
                            w.record_error(e);
                            return;
                        }
                    }
                };
                let result = op.eval(arg).and_then(|tile| match rebase {
                    Some(range) => tile.with_range(range),
                    None => Ok(tile),
                });
                match result {
                    Ok(tile) => {
                        if let Err(e) = out.set(tile) {
                            w.record_error(e);
                        }
                    }
                    Err(e) => w.record_error(e),
                }
            });
        }));
    }

    /// Source node over a materialized array
    ///
    /// `trange`/`shape` describe the (possibly blocked and permuted)
    /// output; `block_lower` offsets output tile coordinates into the
    /// source grid. Array tiles are pulled shared: the array keeps
    /// serving other consumers.
    pub(crate) fn from_array(
        array: &DistArray<T>,
        op: UnaryTileOp<T>,
        trange: TiledRange,
        shape: Arc<Shape>,
        pmap: Arc<dyn Pmap>,
        block_lower: Option<Index>,
    ) -> Result<Self> {
        let eval = Self::frame(array.world(), trange, shape, pmap);
        let inv = op.permutation().inverse();
        let mut wired = 0usize;
        for &t in eval.pmap.local() {
            if eval.shape.is_zero(t) {
                continue;
            }
            let coord = eval.trange.tiles_range().coord(t)?;
            let natural = inv.apply(&coord)?;
            let src_coord: Index = match &block_lower {
                Some(lower) => natural
                    .iter()
                    .zip(lower.iter())
                    .map(|(c, l)| c + l)
                    .collect(),
                None => natural.iter().copied().collect(),
            };
            let src_ord = array.trange().tiles_range().ordinal(&src_coord)?;
            let src = array.store().get(src_ord);
            let rebase = if block_lower.is_some() {
                Some(eval.trange.make_tile_range(t)?)
            } else {
                None
            };
            if op.is_noop() && rebase.is_none() {
                eval.store.set(&eval.world, t, src);
            } else {
                eval.chain_unary(t, src, op.clone(), true, rebase);
            }
            wired += 1;
        }
        debug!(tiles = wired, "array evaluator wired");
        Ok(eval)
    }

    /// Unary node over a child evaluator
    pub(crate) fn unary(
        child: DistEval<T>,
        op: UnaryTileOp<T>,
        trange: TiledRange,
        shape: Arc<Shape>,
        pmap: Arc<dyn Pmap>,
    ) -> Result<Self> {
        let eval = Self::frame(&child.world, trange, shape, pmap);
        let inv = op.permutation().inverse();
        for &t in eval.pmap.local() {
            if eval.shape.is_zero(t) {
                continue;
            }
            let coord = eval.trange.tiles_range().coord(t)?;
            let natural = inv.apply(&coord)?;
            let src_ord = child.trange.tiles_range().ordinal(&natural)?;
            let src = child.get(src_ord);
            if op.is_noop() {
                eval.store.set(&eval.world, t, src);
            } else {
                eval.chain_unary(t, src, op.clone(), false, None);
            }
        }
        Ok(eval)
    }

    /// Binary element-wise node
    ///
    /// Children are aligned to the same tiled range. Where one child is
    /// structurally zero the op's zero variant runs on the other; where
    /// both are zero but the norm bound still claims a nonzero result
    /// (possible with a zero threshold), an explicit zero tile is
    /// delivered so the output future always resolves.
    pub(crate) fn binary(
        left: DistEval<T>,
        right: DistEval<T>,
        op: BinaryTileOp<T>,
        trange: TiledRange,
        shape: Arc<Shape>,
        pmap: Arc<dyn Pmap>,
    ) -> Result<Self> {
        let eval = Self::frame(&left.world, trange, shape, pmap);
        for &t in eval.pmap.local() {
            if eval.shape.is_zero(t) {
                continue;
            }
            let lz = left.is_zero(t);
            let rz = right.is_zero(t);
            match (lz, rz) {
                (true, true) => {
                    let range = eval.trange.make_tile_range(t)?;
                    eval.store
                        .set_value(&eval.world, t, Tile::from_elem(range, T::zero()));
                }
                (true, false) => {
                    eval.chain_binary_one(t, right.get(t), op.clone(), true);
                }
                (false, true) => {
                    eval.chain_binary_one(t, left.get(t), op.clone(), false);
                }
                (false, false) => {
                    let lfut = left.get(t);
                    let rfut = right.get(t);
                    let out = eval.store.get(t);
                    let world = eval.world.clone();
                    let op = op.clone();
                    let (l2, r2) = (lfut.clone(), rfut.clone());
                    when_both(&eval.world, &lfut, &rfut, move || {
                        let pull = |f: &Future<Tile<T>>| -> Result<TileArg<T>> {
                            Ok(TileArg::from_consumed(f.consume()?))
                        };
                        let result = pull(&l2)
                            .and_then(|l| pull(&r2).map(|r| (l, r)))
                            .and_then(|(l, r)| op.eval(l, r));
                        match result {
                            Ok(tile) => {
                                if let Err(e) = out.set(tile) {
                                    world.record_error(e);
                                }
                            }
                            Err(e) => world.record_error(e),
                        }
                    });
                }
            }
        }
        Ok(eval)
    }

    // Wire a binary output whose other side is structurally zero.
    // `zero_left` marks which side the zero sits on.
    fn chain_binary_one(
        &self,
        t: usize,
        src: Future<Tile<T>>,
        op: BinaryTileOp<T>,
        zero_left: bool,
    ) {
        let out = self.store.get(t);
        let world = self.world.clone();
        let ready = src.clone();
        src.register_callback(Box::new(move || {
            let w = world.clone();
            world.spawn(move || {
                let arg = match ready.consume() {
                    Ok(c) => TileArg::from_consumed(c),
                    Err(e) => {
                        w.record_error(e);
                        return;
                    }
                };
                let result = if zero_left {
                    op.eval(TileArg::Zero, arg)
                } else {
                    op.eval(arg, TileArg::Zero)
                };
                match result {
                    Ok(tile) => {
                        if let Err(e) = out.set(tile) {
                            w.record_error(e);
                        }
                    }
                    Err(e) => w.record_error(e),
                }
            });
        }));
    }

    /// Contraction node on a 2-D cyclic process grid
    ///
    /// The left child is arranged `[outer..., contracted...]` and the
    /// right `[contracted..., outer...]`, so tile grids flatten to
    /// `m_t x k_t` and `k_t x n_t` matrices of tiles. Each local result
    /// tile accumulates its nonzero partial products through a reduce
    /// task; panel futures are shared between all result tiles on this
    /// rank that need them.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn contract(
        left: DistEval<T>,
        right: DistEval<T>,
        factor: T,
        helper: GemmHelper,
        k_t: usize,
        n_t: usize,
        trange: TiledRange,
        shape: Arc<Shape>,
        pmap: Arc<dyn Pmap>,
    ) -> Result<Self> {
        let eval = Self::frame(&left.world, trange, shape, pmap);
        let mut scheduled = 0usize;
        for &t in eval.pmap.local() {
            if eval.shape.is_zero(t) {
                continue;
            }
            let mi = t / n_t;
            let ni = t % n_t;
            let range = eval.trange.make_tile_range(t)?;
            let mut task = ReduceTask::new(
                &eval.world,
                GemmAccOp {
                    world: eval.world.clone(),
                    range: range.clone(),
                    factor,
                    helper,
                },
            );
            for ki in 0..k_t {
                let lo = mi * k_t + ki;
                let ro = ki * n_t + ni;
                if left.is_zero(lo) || right.is_zero(ro) {
                    continue;
                }
                task.add(join2(&left.get(lo), &right.get(ro)));
            }
            if task.count() == 0 {
                // Norm bound claims nonzero but every product vanished
                eval.store
                    .set_value(&eval.world, t, Tile::from_elem(range, T::zero()));
            } else {
                scheduled += task.count();
                let result = task.submit();
                eval.store.set(&eval.world, t, result);
            }
        }
        debug!(partials = scheduled, "contraction evaluator wired");
        Ok(eval)
    }
}

// Accumulates tile products into one result tile: the reduce op behind
// each contraction output.
struct GemmAccOp<T: Element> {
    world: World,
    range: Range,
    factor: T,
    helper: GemmHelper,
}

impl<T: Element> ReduceOp for GemmAccOp<T> {
    type Arg = (Arc<Tile<T>>, Arc<Tile<T>>);
    type Result = Tile<T>;

    fn identity(&self) -> Tile<T> {
        Tile::from_elem(self.range.clone(), T::zero())
    }

    fn fold(&self, acc: &mut Tile<T>, arg: &Self::Arg) {
        if let Err(e) = kernels::gemm_acc(acc, &arg.0, &arg.1, self.factor, &self.helper) {
            self.world.record_error(e);
        }
    }

    fn combine(&self, acc: &mut Tile<T>, other: Tile<T>) {
        if let Err(e) = kernels::add_to(acc, &other, T::one()) {
            self.world.record_error(e);
        }
    }
}
