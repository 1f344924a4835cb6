//! Expression engines
//!
//! An engine is the compiled form of one expression node. Compilation is
//! phased the same way evaluation will be distributed:
//!
//! 1. [`Engine::from_expr`] converts the tree, folding scalar factors and
//!    negations into the nearest operation node and classifying every
//!    multiply as Hadamard or contraction from its annotations.
//! 2. [`init_vars`](Engine::init_vars) pushes target variable lists down
//!    the tree, choosing each node's output ordering to minimize
//!    permutations: element-wise nodes forward the target to both
//!    children, contractions arrange children as `[outer, contracted]` /
//!    `[contracted, outer]` and permute only their own output.
//! 3. [`init_struct`](Engine::init_struct) computes tiled ranges and
//!    shapes bottom-up, validating operand compatibility.
//! 4. [`init_distribution`](Engine::init_distribution) assigns process
//!    maps: pushed down through element-wise nodes, a 2-D cyclic grid at
//!    contractions.
//! 5. [`make_dist_eval`](Engine::make_dist_eval) wires the evaluator
//!    tree.

use crate::array::DistArray;
use crate::dist_eval::DistEval;
use crate::expr::ExprNode;
use crate::tile_op::{BinaryKind, BinaryTileOp, UnaryTileOp};
use crate::Element;
use std::sync::Arc;
use tessra_core::error::{RangeError, Result, VariableError};
use tessra_core::kernels::GemmHelper;
use tessra_core::perm::Permutation;
use tessra_core::pmap::{default_pmap, CyclicPmap2D, Pmap};
use tessra_core::range::{Index, Range};
use tessra_core::shape::Shape;
use tessra_core::tiled_range::{TiledRange, TiledRange1};
use tessra_core::vars::VariableList;
use tessra_runtime::World;

fn vars_from_labels(labels: Vec<String>) -> Result<VariableList> {
    VariableList::parse(&labels.join(","))
}

enum EngineKind<T: Element> {
    Leaf {
        array: DistArray<T>,
        annot: VariableList,
        block: Option<(Index, Index)>,
    },
    Binary {
        kind: BinaryKind,
        left: Box<Engine<T>>,
        right: Box<Engine<T>>,
    },
    Contract {
        left: Box<Engine<T>>,
        right: Box<Engine<T>>,
        num_contract: usize,
        helper: Option<GemmHelper>,
        m_t: usize,
        k_t: usize,
        n_t: usize,
        core_pmap: Option<Arc<dyn Pmap>>,
    },
}

/// Compiled expression node
pub(crate) struct Engine<T: Element> {
    kind: EngineKind<T>,
    /// Output labels before target adjustment
    natural: VariableList,
    /// Target output labels (after `init_vars`)
    vars: VariableList,
    /// Permutation taking the natural output to `vars`
    perm: Permutation,
    /// Accumulated scale factor (negations fold in here)
    factor: T,
    nat_trange: Option<TiledRange>,
    nat_shape: Option<Arc<Shape>>,
    trange: Option<TiledRange>,
    shape: Option<Arc<Shape>>,
    pmap: Option<Arc<dyn Pmap>>,
}

impl<T: Element> Engine<T> {
    fn node(kind: EngineKind<T>, natural: VariableList) -> Self {
        Self {
            kind,
            natural,
            vars: VariableList::default(),
            perm: Permutation::identity(),
            factor: T::one(),
            nat_trange: None,
            nat_shape: None,
            trange: None,
            shape: None,
            pmap: None,
        }
    }

    /// Convert an expression tree, folding factors and classifying nodes
    pub(crate) fn from_expr(node: ExprNode<T>) -> Result<Engine<T>> {
        match node {
            ExprNode::Tsr {
                array,
                annot,
                block,
            } => {
                annot.check_rank(array.trange().rank())?;
                let natural = annot.clone();
                Ok(Engine::node(
                    EngineKind::Leaf {
                        array,
                        annot,
                        block,
                    },
                    natural,
                ))
            }
            ExprNode::Scale(inner, s) => {
                let mut e = Engine::from_expr(*inner)?;
                e.factor = e.factor * s;
                Ok(e)
            }
            ExprNode::Neg(inner) => {
                let mut e = Engine::from_expr(*inner)?;
                e.factor = -e.factor;
                Ok(e)
            }
            ExprNode::Add(l, r) => Self::binary_node(BinaryKind::Add, *l, *r),
            ExprNode::Subt(l, r) => Self::binary_node(BinaryKind::Subt, *l, *r),
            ExprNode::Mult(l, r) => {
                let left = Engine::from_expr(*l)?;
                let right = Engine::from_expr(*r)?;
                if left.natural.is_permutation_of(&right.natural) {
                    let natural = left.natural.clone();
                    Ok(Engine::node(
                        EngineKind::Binary {
                            kind: BinaryKind::Mult,
                            left: Box::new(left),
                            right: Box::new(right),
                        },
                        natural,
                    ))
                } else {
                    let common = left.natural.common(&right.natural);
                    if common.is_empty() {
                        return Err(VariableError::NotPermutationEquivalent {
                            left: left.natural.to_string(),
                            right: right.natural.to_string(),
                        }
                        .into());
                    }
                    let natural = left.natural.contract(&right.natural);
                    Ok(Engine::node(
                        EngineKind::Contract {
                            left: Box::new(left),
                            right: Box::new(right),
                            num_contract: common.len(),
                            helper: None,
                            m_t: 0,
                            k_t: 0,
                            n_t: 0,
                            core_pmap: None,
                        },
                        natural,
                    ))
                }
            }
        }
    }

    fn binary_node(kind: BinaryKind, l: ExprNode<T>, r: ExprNode<T>) -> Result<Engine<T>> {
        let left = Engine::from_expr(l)?;
        let right = Engine::from_expr(r)?;
        if !left.natural.is_permutation_of(&right.natural) {
            return Err(VariableError::NotPermutationEquivalent {
                left: left.natural.to_string(),
                right: right.natural.to_string(),
            }
            .into());
        }
        let natural = left.natural.clone();
        Ok(Engine::node(
            EngineKind::Binary {
                kind,
                left: Box::new(left),
                right: Box::new(right),
            },
            natural,
        ))
    }

    /// The node's natural output labels
    pub(crate) fn natural(&self) -> &VariableList {
        &self.natural
    }

    /// The final tiled range (after `init_struct`)
    pub(crate) fn trange(&self) -> &TiledRange {
        self.trange.as_ref().expect("engine struct initialized")
    }

    /// The final shape (after `init_struct`)
    pub(crate) fn shape(&self) -> &Arc<Shape> {
        self.shape.as_ref().expect("engine struct initialized")
    }

    /// The node's process map (after `init_distribution`)
    pub(crate) fn pmap(&self) -> &Arc<dyn Pmap> {
        self.pmap.as_ref().expect("engine distribution initialized")
    }

    /// The world of the leftmost array in the expression
    pub(crate) fn world(&self) -> &World {
        match &self.kind {
            EngineKind::Leaf { array, .. } => array.world(),
            EngineKind::Binary { left, .. } => left.world(),
            EngineKind::Contract { left, .. } => left.world(),
        }
    }

    /// Phase 1: choose output variable orderings
    pub(crate) fn init_vars(&mut self, target: &VariableList) -> Result<()> {
        if !self.natural.is_permutation_of(target) {
            return Err(VariableError::NotPermutationEquivalent {
                left: self.natural.to_string(),
                right: target.to_string(),
            }
            .into());
        }
        match &mut self.kind {
            EngineKind::Leaf { .. } => {
                self.perm = self.natural.permutation_to(target)?;
            }
            EngineKind::Binary { left, right, .. } => {
                left.init_vars(target)?;
                right.init_vars(target)?;
                self.natural = target.clone();
                self.perm = Permutation::identity();
            }
            EngineKind::Contract { left, right, .. } => {
                let lv = left.natural.clone();
                let rv = right.natural.clone();
                let contracted: Vec<String> = lv
                    .iter()
                    .filter(|v| rv.contains(v))
                    .map(str::to_string)
                    .collect();
                let outer_l: Vec<String> = lv
                    .iter()
                    .filter(|v| !rv.contains(v))
                    .map(str::to_string)
                    .collect();
                let outer_r: Vec<String> = rv
                    .iter()
                    .filter(|v| !lv.contains(v))
                    .map(str::to_string)
                    .collect();
                let left_target =
                    vars_from_labels(outer_l.iter().chain(contracted.iter()).cloned().collect())?;
                let right_target =
                    vars_from_labels(contracted.iter().chain(outer_r.iter()).cloned().collect())?;
                left.init_vars(&left_target)?;
                right.init_vars(&right_target)?;
                self.perm = self.natural.permutation_to(target)?;
            }
        }
        self.vars = target.clone();
        Ok(())
    }

    /// Phase 2: compute tiled ranges and shapes bottom-up
    pub(crate) fn init_struct(&mut self) -> Result<()> {
        let factor = self.factor;
        let perm = self.perm.clone();
        match &mut self.kind {
            EngineKind::Leaf {
                array,
                annot,
                block,
            } => {
                annot.check_rank(array.trange().rank())?;
                let (base_trange, base_shape) = match block {
                    None => (array.trange().clone(), (**array.shape()).clone()),
                    Some((lower, upper)) => block_structs(array, lower, upper)?,
                };
                let nat_shape = scale_shape(base_shape, factor);
                self.trange = Some(base_trange.permute(&perm)?);
                self.shape = Some(Arc::new(
                    nat_shape.permute(&perm, base_trange.tiles_range())?,
                ));
                self.nat_trange = Some(base_trange);
                self.nat_shape = Some(Arc::new(nat_shape));
            }
            EngineKind::Binary { kind, left, right } => {
                left.init_struct()?;
                right.init_struct()?;
                if left.trange() != right.trange() {
                    return Err(RangeError::TiledRangeMismatch {
                        context: format!(
                            "element-wise operands differ: {} vs {}",
                            left.trange(),
                            right.trange()
                        ),
                    }
                    .into());
                }
                let combined = match kind {
                    BinaryKind::Add | BinaryKind::Subt => left.shape().add(right.shape())?,
                    BinaryKind::Mult => left.shape().mult(right.shape())?,
                };
                let shaped = Arc::new(scale_shape(combined, factor));
                self.trange = Some(left.trange().clone());
                self.shape = Some(shaped);
                self.nat_trange = self.trange.clone();
                self.nat_shape = self.shape.clone();
            }
            EngineKind::Contract {
                left,
                right,
                num_contract,
                helper,
                m_t,
                k_t,
                n_t,
                ..
            } => {
                left.init_struct()?;
                right.init_struct()?;
                let lt = left.trange().clone();
                let rt = right.trange().clone();
                let l_rank = lt.rank();
                let r_rank = rt.rank();
                let k = *num_contract;
                // Contracted tilings must agree boundary-for-boundary
                for i in 0..k {
                    if lt.dim(l_rank - k + i) != rt.dim(i) {
                        return Err(RangeError::TiledRangeMismatch {
                            context: format!(
                                "contracted axis {} tiled differently on the two operands",
                                i
                            ),
                        }
                        .into());
                    }
                }
                *m_t = (0..l_rank - k).map(|d| lt.dim(d).tile_count()).product();
                *k_t = (0..k).map(|d| rt.dim(d).tile_count()).product();
                *n_t = (k..r_rank).map(|d| rt.dim(d).tile_count()).product();
                *helper = Some(GemmHelper::new(l_rank, r_rank, k)?);

                let axes: Vec<TiledRange1> = (0..l_rank - k)
                    .map(|d| lt.dim(d).clone())
                    .chain((k..r_rank).map(|d| rt.dim(d).clone()))
                    .collect();
                let nat_trange = TiledRange::new(axes);
                let nat_shape = scale_shape(
                    left.shape().contract(right.shape(), *m_t, *k_t, *n_t)?,
                    factor,
                );
                self.trange = Some(nat_trange.permute(&perm)?);
                self.shape = Some(Arc::new(
                    nat_shape.permute(&perm, nat_trange.tiles_range())?,
                ));
                self.nat_trange = Some(nat_trange);
                self.nat_shape = Some(Arc::new(nat_shape));
            }
        }
        Ok(())
    }

    /// Phase 3: assign process maps
    pub(crate) fn init_distribution(
        &mut self,
        world: &World,
        hint: Option<Arc<dyn Pmap>>,
    ) -> Result<()> {
        let size = self.trange().tile_count();
        let perm_is_identity = self.perm.is_identity();
        match &mut self.kind {
            EngineKind::Leaf { .. } => {
                self.pmap = Some(resolve_pmap(hint, world, size)?);
            }
            EngineKind::Binary { left, right, .. } => {
                let pmap = resolve_pmap(hint, world, size)?;
                left.init_distribution(world, Some(pmap.clone()))?;
                right.init_distribution(world, Some(pmap.clone()))?;
                self.pmap = Some(pmap);
            }
            EngineKind::Contract {
                left,
                right,
                m_t,
                n_t,
                core_pmap,
                ..
            } => {
                left.init_distribution(world, None)?;
                right.init_distribution(world, None)?;
                let core: Arc<dyn Pmap> = Arc::new(CyclicPmap2D::with_default_grid(
                    world.rank(),
                    world.nprocs(),
                    *m_t,
                    *n_t,
                )?);
                *core_pmap = Some(core.clone());
                self.pmap = if perm_is_identity {
                    Some(core)
                } else {
                    Some(resolve_pmap(hint, world, size)?)
                };
            }
        }
        Ok(())
    }

    /// Phase 4: wire the distributed evaluator tree
    pub(crate) fn make_dist_eval(&self) -> Result<DistEval<T>> {
        match &self.kind {
            EngineKind::Leaf { array, block, .. } => {
                let op = UnaryTileOp::scale(self.factor).with_perm(self.perm.clone());
                DistEval::from_array(
                    array,
                    op,
                    self.trange().clone(),
                    self.shape().clone(),
                    self.pmap().clone(),
                    block.as_ref().map(|(lower, _)| lower.clone()),
                )
            }
            EngineKind::Binary { kind, left, right } => {
                let l = left.make_dist_eval()?;
                let r = right.make_dist_eval()?;
                let op = BinaryTileOp::new(*kind, self.factor, self.perm.clone());
                DistEval::binary(
                    l,
                    r,
                    op,
                    self.trange().clone(),
                    self.shape().clone(),
                    self.pmap().clone(),
                )
            }
            EngineKind::Contract {
                left,
                right,
                helper,
                k_t,
                n_t,
                core_pmap,
                ..
            } => {
                let l = left.make_dist_eval()?;
                let r = right.make_dist_eval()?;
                let helper = helper.expect("engine struct initialized");
                let core_pmap = core_pmap.clone().expect("engine distribution initialized");
                let nat_trange = self
                    .nat_trange
                    .clone()
                    .expect("engine struct initialized");
                let nat_shape = self.nat_shape.clone().expect("engine struct initialized");
                let core = DistEval::contract(
                    l,
                    r,
                    self.factor,
                    helper,
                    *k_t,
                    *n_t,
                    nat_trange,
                    nat_shape,
                    core_pmap,
                )?;
                if self.perm.is_identity() {
                    Ok(core)
                } else {
                    DistEval::unary(
                        core,
                        UnaryTileOp::noop().with_perm(self.perm.clone()),
                        self.trange().clone(),
                        self.shape().clone(),
                        self.pmap().clone(),
                    )
                }
            }
        }
    }
}

fn resolve_pmap(
    hint: Option<Arc<dyn Pmap>>,
    world: &World,
    size: usize,
) -> Result<Arc<dyn Pmap>> {
    match hint {
        Some(p) if p.size() == size => Ok(p),
        _ => default_pmap(world.rank(), world.nprocs(), size),
    }
}

fn scale_shape<T: Element>(shape: Shape, factor: T) -> Shape {
    if factor == T::one() {
        shape
    } else {
        shape.scale(factor.to_f64().map(f64::abs).unwrap_or(1.0))
    }
}

// Sub-box structures for a block expression: re-based tilings plus the
// sliced norm tensor.
fn block_structs<T: Element>(
    array: &DistArray<T>,
    lower: &Index,
    upper: &Index,
) -> Result<(TiledRange, Shape)> {
    let src = array.trange();
    let mut axes = Vec::with_capacity(src.rank());
    for d in 0..src.rank() {
        let bounds = src.dim(d).boundaries();
        let origin = bounds[lower[d]];
        let rebased: Vec<usize> = bounds[lower[d]..=upper[d]]
            .iter()
            .map(|b| b - origin)
            .collect();
        axes.push(TiledRange1::new(rebased)?);
    }
    let trange = TiledRange::new(axes);

    let shape = match &**array.shape() {
        Shape::Dense => Shape::Dense,
        sparse => {
            let block_grid = Range::new(lower.clone(), upper.clone())?;
            let src_grid = array.trange().tiles_range();
            let mut norms = vec![0.0; block_grid.volume()];
            for (ord, coord) in block_grid.iter().enumerate() {
                norms[ord] = sparse.norm(src_grid.ordinal(&coord)?);
            }
            Shape::sparse(
                norms,
                sparse
                    .threshold()
                    .unwrap_or_else(|| Shape::default_threshold(trange.elements_range().volume())),
            )
        }
    };
    Ok((trange, shape))
}

/// The natural output labels of an expression tree
pub(crate) fn natural_vars<T: Element>(node: &ExprNode<T>) -> Result<VariableList> {
    Ok(Engine::from_expr(node.clone())?.natural().clone())
}

/// Compile an expression down to its distributed evaluator
///
/// `target` defaults to the expression's natural labels (reductions);
/// `pmap_hint` carries the left-hand side's distribution and is honored
/// when the result's tile count matches.
pub(crate) fn compile<T: Element>(
    node: &ExprNode<T>,
    target: Option<&VariableList>,
    pmap_hint: Option<Arc<dyn Pmap>>,
) -> Result<(World, DistEval<T>)> {
    let mut engine = Engine::from_expr(node.clone())?;
    let target = match target {
        Some(t) => t.clone(),
        None => engine.natural().clone(),
    };
    engine.init_vars(&target)?;
    engine.init_struct()?;
    let world = engine.world().clone();
    engine.init_distribution(&world, pmap_hint)?;
    tracing::debug!(vars = %engine.vars, tiles = engine.trange().tile_count(), "expression compiled");
    let eval = engine.make_dist_eval()?;
    Ok((world, eval))
}
