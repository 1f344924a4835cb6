//! Dense/sparse array conversions and replicated shape construction
//!
//! Sparse shapes are built collectively: each rank supplies a norm tensor
//! that is zero everywhere except its own tiles, an element-wise sum
//! all-reduce replicates the full tensor, and thresholding fixes the zero
//! set identically on every rank.

use crate::array::DistArray;
use crate::Element;
use tessra_core::error::{Result, ShapeError};
use tessra_core::shape::Shape;
use tessra_core::tiled_range::TiledRange;
use tessra_runtime::World;

/// Build a replicated sparse shape from this rank's tile norms
///
/// `local_norms` covers the full tile grid with zeros for non-local
/// tiles; the all-reduce sum replicates every rank's contribution.
/// Collective: every rank of the world must call this in step.
pub fn sparse_shape_from_local_norms(
    world: &World,
    trange: &TiledRange,
    mut local_norms: Vec<f64>,
    threshold: Option<f64>,
) -> Result<Shape> {
    if local_norms.len() != trange.tile_count() {
        return Err(ShapeError::SizeMismatch {
            left: local_norms.len(),
            right: trange.tile_count(),
        }
        .into());
    }
    world.comm().all_reduce_f64_sum(&mut local_norms);
    let threshold =
        threshold.unwrap_or_else(|| Shape::default_threshold(trange.elements_range().volume()));
    Ok(Shape::sparse(local_norms, threshold))
}

/// Convert an array to block-sparse form by measuring tile norms
///
/// Local tile norms feed a replicated sparse shape; tiles that survive
/// the threshold are carried over, dropped tiles become structural
/// zeros. Collective; call after the source array has been fenced.
pub fn to_sparse<T: Element>(
    array: &DistArray<T>,
    threshold: Option<f64>,
) -> Result<DistArray<T>> {
    let world = array.world().clone();
    let trange = array.trange().clone();

    let mut norms = vec![0.0; trange.tile_count()];
    for t in array.local_tiles().collect::<Vec<_>>() {
        norms[t] = array.get(t)?.get().norm();
    }
    let shape = sparse_shape_from_local_norms(&world, &trange, norms, threshold)?;

    let result = DistArray::with_pmap(&world, trange, shape, array.pmap().clone())?;
    for t in result.local_tiles().collect::<Vec<_>>() {
        result.set_tile_future(t, array.get(t)?)?;
    }
    world.fence()?;
    Ok(result)
}

/// Convert an array to dense form
///
/// Structurally zero tiles materialize as explicit zero tiles; nonzero
/// tiles are carried over. Collective.
pub fn to_dense<T: Element>(array: &DistArray<T>) -> Result<DistArray<T>> {
    let world = array.world().clone();
    let result = DistArray::with_pmap(
        &world,
        array.trange().clone(),
        Shape::dense(),
        array.pmap().clone(),
    )?;
    for &t in array.pmap().local() {
        if array.is_zero(t) {
            let range = array.trange().make_tile_range(t)?;
            result.set_tile(t, tessra_core::tile::Tile::from_elem(range, T::zero()))?;
        } else {
            result.set_tile_future(t, array.get(t)?)?;
        }
    }
    world.fence()?;
    Ok(result)
}
