//! End-to-end expression evaluation on a single rank
//!
//! Exercises the full pipeline (expression tree -> engines -> distributed
//! evaluators -> array assignment) through the public API.

use anyhow::Result;
use approx::assert_relative_eq;
use tessra_core::shape::Shape;
use tessra_core::tiled_range::{TiledRange, TiledRange1};
use tessra_expr::{to_dense, to_sparse, DistArray};
use tessra_runtime::World;

fn square_trange() -> TiledRange {
    TiledRange::new(vec![
        TiledRange1::new(vec![0, 4, 8]).unwrap(),
        TiledRange1::new(vec![0, 4, 8]).unwrap(),
    ])
}

// Gather an element through the tile that holds it
fn element(array: &DistArray<f64>, coord: &[usize]) -> f64 {
    let tile_coord = array.trange().element_to_tile(coord).unwrap();
    let t = array
        .trange()
        .tiles_range()
        .ordinal(&tile_coord)
        .unwrap();
    if array.is_zero(t) {
        return 0.0;
    }
    array.get(t).unwrap().get().at(coord).unwrap()
}

#[test]
fn dense_gemm_all_ones() -> Result<()> {
    let world = World::local();
    let a = DistArray::<f64>::new(&world, square_trange())?;
    let b = DistArray::<f64>::new(&world, square_trange())?;
    a.fill(1.0)?;
    b.fill(1.0)?;

    let mut c = DistArray::<f64>::new(&world, square_trange())?;
    c.assign("m,n", a.tsr("m,k")? * b.tsr("k,n")?)?;

    for r in 0..8 {
        for col in 0..8 {
            assert_relative_eq!(element(&c, &[r, col]), 8.0);
        }
    }
    assert_relative_eq!(c.tsr("m,n")?.norm()?, 64.0);
    Ok(())
}

#[test]
fn transpose_assignment() -> Result<()> {
    let world = World::local();
    let trange = TiledRange::uniform(&[4, 4], 2)?;
    let a = DistArray::<f64>::new(&world, trange.clone())?;
    a.fill_with(|c| (c[0] * 10 + c[1]) as f64)?;

    let mut b = DistArray::<f64>::new(&world, trange)?;
    b.assign("i,j", a.tsr("j,i")?)?;

    for r in 0..4 {
        for c in 0..4 {
            assert_relative_eq!(element(&b, &[r, c]), (c * 10 + r) as f64);
        }
    }
    Ok(())
}

#[test]
fn identity_evaluation_round_trips() -> Result<()> {
    let world = World::local();
    let trange = TiledRange::uniform(&[6, 6], 3)?;
    let a = DistArray::<f64>::new(&world, trange.clone())?;
    a.fill_with(|c| (c[0] * 7 + c[1] * 3) as f64)?;

    let mut b = DistArray::<f64>::new(&world, trange)?;
    b.assign("i,j", a.tsr("i,j")?)?;

    for &t in b.pmap().local() {
        let got = b.get(t)?.get();
        let want = a.get(t)?.get();
        assert_eq!(got.data(), want.data());
        assert_eq!(got.range(), want.range());
    }
    Ok(())
}

#[test]
fn sparse_drop_skips_zero_tiles() -> Result<()> {
    let world = World::local();
    let trange = TiledRange::new(vec![TiledRange1::new(vec![0, 4, 8, 12, 16])?]);
    let shape = Shape::sparse(vec![10.0, 0.0, 1e-20, 5.0], 1e-10);

    let mask: Vec<bool> = (0..4).map(|t| shape.is_zero(t)).collect();
    assert_eq!(mask, vec![false, true, true, false]);

    let a = DistArray::<f64>::with_shape(&world, trange, shape)?;
    a.fill(1.0)?;

    // Only tiles 0 and 3 contribute: 8 elements
    assert_relative_eq!(a.tsr("i")?.sum()?, 8.0);
    Ok(())
}

#[test]
fn dot_product_of_ones() -> Result<()> {
    let world = World::local();
    let trange = TiledRange::uniform(&[16], 4)?;
    let a = DistArray::<f64>::new(&world, trange.clone())?;
    let b = DistArray::<f64>::new(&world, trange)?;
    a.fill(1.0)?;
    b.fill(1.0)?;

    assert_relative_eq!(a.tsr("i")?.dot(&b.tsr("i")?)?, 16.0);
    Ok(())
}

#[test]
fn compound_assignment_accumulates() -> Result<()> {
    let world = World::local();
    let trange = square_trange();
    let a = DistArray::<f64>::new(&world, trange.clone())?;
    let b = DistArray::<f64>::new(&world, trange.clone())?;
    a.fill_with(|c| (c[0] + 1) as f64)?;
    b.fill_with(|c| (c[1] + 1) as f64)?;

    let mut c = DistArray::<f64>::new(&world, trange.clone())?;
    c.fill(0.0)?;
    c.add_assign("i,j", a.tsr("i,k")? * b.tsr("k,j")?)?;
    c.add_assign("i,j", a.tsr("i,k")? * b.tsr("k,j")?)?;

    let mut once = DistArray::<f64>::new(&world, trange)?;
    once.assign("i,j", a.tsr("i,k")? * b.tsr("k,j")?)?;

    for r in 0..8 {
        for col in 0..8 {
            assert_relative_eq!(
                element(&c, &[r, col]),
                2.0 * element(&once, &[r, col])
            );
        }
    }
    Ok(())
}

#[test]
fn add_subtract_scale_negate() -> Result<()> {
    let world = World::local();
    let trange = TiledRange::uniform(&[6], 2)?;
    let a = DistArray::<f64>::new(&world, trange.clone())?;
    let b = DistArray::<f64>::new(&world, trange.clone())?;
    a.fill(3.0)?;
    b.fill(1.0)?;

    let mut c = DistArray::<f64>::new(&world, trange.clone())?;
    // c = 2*(a + b) - (-a) = 2a + 2b + a = 11 everywhere
    c.assign(
        "i",
        2.0 * (a.tsr("i")? + b.tsr("i")?) - (-a.tsr("i")?),
    )?;
    for i in 0..6 {
        assert_relative_eq!(element(&c, &[i]), 11.0);
    }

    // Hadamard product
    let mut h = DistArray::<f64>::new(&world, trange)?;
    h.assign("i", a.tsr("i")? * b.tsr("i")?)?;
    for i in 0..6 {
        assert_relative_eq!(element(&h, &[i]), 3.0);
    }
    Ok(())
}

#[test]
fn matrix_vector_contraction() -> Result<()> {
    let world = World::local();
    let mat_trange = TiledRange::uniform(&[6, 4], 2)?;
    let vec_trange = TiledRange::uniform(&[4], 2)?;
    let a = DistArray::<f64>::new(&world, mat_trange)?;
    let x = DistArray::<f64>::new(&world, vec_trange)?;
    a.fill_with(|c| (c[0] + c[1]) as f64)?;
    x.fill(1.0)?;

    let mut y = DistArray::<f64>::new(&world, TiledRange::uniform(&[6], 2)?)?;
    y.assign("i", a.tsr("i,k")? * x.tsr("k")?)?;

    for i in 0..6 {
        let want: f64 = (0..4).map(|k| (i + k) as f64).sum();
        assert_relative_eq!(element(&y, &[i]), want);
    }
    Ok(())
}

#[test]
fn contraction_with_permuted_output() -> Result<()> {
    let world = World::local();
    let trange = TiledRange::uniform(&[4, 4], 2)?;
    let a = DistArray::<f64>::new(&world, trange.clone())?;
    let b = DistArray::<f64>::new(&world, trange.clone())?;
    a.fill_with(|c| (c[0] * 4 + c[1]) as f64)?;
    b.fill_with(|c| (c[0] + 2 * c[1]) as f64)?;

    // c("n,m") = a("m,k") * b("k,n"): the product transposed
    let mut c = DistArray::<f64>::new(&world, trange.clone())?;
    c.assign("n,m", a.tsr("m,k")? * b.tsr("k,n")?)?;

    let mut plain = DistArray::<f64>::new(&world, trange)?;
    plain.assign("m,n", a.tsr("m,k")? * b.tsr("k,n")?)?;

    for m in 0..4 {
        for n in 0..4 {
            assert_relative_eq!(element(&c, &[n, m]), element(&plain, &[m, n]));
        }
    }
    Ok(())
}

#[test]
fn block_expression_extracts_subrange() -> Result<()> {
    let world = World::local();
    let trange = TiledRange::uniform(&[8, 8], 2)?;
    let a = DistArray::<f64>::new(&world, trange)?;
    a.fill_with(|c| (c[0] * 100 + c[1]) as f64)?;

    // Tile block [1,3) x [2,4): elements [2,6) x [4,8), re-based to zero
    let mut b = DistArray::<f64>::new(&world, TiledRange::uniform(&[4, 4], 2)?)?;
    b.assign("i,j", a.tsr("i,j")?.block(&[1, 2], &[3, 4])?)?;

    for r in 0..4 {
        for c in 0..4 {
            assert_relative_eq!(
                element(&b, &[r, c]),
                ((r + 2) * 100 + (c + 4)) as f64
            );
        }
    }
    Ok(())
}

#[test]
fn scalar_reductions() -> Result<()> {
    let world = World::local();
    let trange = TiledRange::uniform(&[4, 4], 2)?;
    let a = DistArray::<f64>::new(&world, trange)?;
    a.fill_with(|c| (c[0] * 4 + c[1]) as f64 - 7.5)?;

    let expr = a.tsr("i,j")?;
    assert_relative_eq!(expr.sum()?, (0..16).map(|v| v as f64 - 7.5).sum::<f64>());
    assert_relative_eq!(expr.min()?, -7.5);
    assert_relative_eq!(expr.max()?, 7.5);
    assert_relative_eq!(expr.abs_min()?, 0.5);
    assert_relative_eq!(expr.abs_max()?, 7.5);
    let sq: f64 = (0..16).map(|v| (v as f64 - 7.5).powi(2)).sum();
    assert_relative_eq!(expr.squared_norm()?, sq);
    assert_relative_eq!(expr.norm()?, sq.sqrt());

    // Trace of the un-shifted values: 0 + 5 + 10 + 15
    let b = DistArray::<f64>::new(&world, TiledRange::uniform(&[4, 4], 2)?)?;
    b.fill_with(|c| (c[0] * 4 + c[1]) as f64)?;
    assert_relative_eq!(b.tsr("i,j")?.trace()?, 30.0);
    Ok(())
}

#[test]
fn reduction_over_all_zero_shape_is_identity() -> Result<()> {
    let world = World::local();
    let trange = TiledRange::uniform(&[8], 4)?;
    let shape = Shape::sparse(vec![0.0, 0.0], 1e-10);
    let a = DistArray::<f64>::with_shape(&world, trange, shape)?;

    assert_relative_eq!(a.tsr("i")?.sum()?, 0.0);
    assert_relative_eq!(a.tsr("i")?.product()?, 1.0);
    assert_relative_eq!(a.tsr("i")?.squared_norm()?, 0.0);
    Ok(())
}

#[test]
fn empty_result_keeps_tiled_range() -> Result<()> {
    let world = World::local();
    let trange = TiledRange::uniform(&[8], 4)?;
    let shape = Shape::sparse(vec![0.0, 0.0], 1e-10);
    let a = DistArray::<f64>::with_shape(&world, trange.clone(), shape)?;

    let mut b = DistArray::<f64>::new(&world, trange.clone())?;
    b.assign("i", a.tsr("i")?)?;
    assert_eq!(b.trange(), &trange);
    assert!((0..2).all(|t| b.is_zero(t)));
    Ok(())
}

#[test]
fn sparse_round_trip_preserves_tiles() -> Result<()> {
    let world = World::local();
    let trange = TiledRange::uniform(&[8], 2)?;
    let shape = Shape::sparse(vec![5.0, 0.0, 3.0, 0.0], 1e-10);
    let a = DistArray::<f64>::with_shape(&world, trange, shape)?;
    a.fill(2.0)?;

    let round = to_sparse(&to_dense(&a)?, Some(1e-10))?;
    assert_eq!(round.trange(), a.trange());
    for t in 0..4 {
        assert_eq!(round.is_zero(t), a.is_zero(t));
        if !a.is_zero(t) {
            assert_eq!(round.get(t)?.get().data(), a.get(t)?.get().data());
        }
    }
    Ok(())
}

#[test]
fn sparse_contraction_skips_structural_zeros() -> Result<()> {
    let world = World::local();
    let trange = TiledRange::uniform(&[4, 4], 2)?;
    // Left has a zero block row; right is dense
    let shape = Shape::sparse(vec![1.0, 1.0, 0.0, 0.0], 1e-10);
    let a = DistArray::<f64>::with_shape(&world, trange.clone(), shape)?;
    a.fill(1.0)?;
    let b = DistArray::<f64>::new(&world, trange.clone())?;
    b.fill(1.0)?;

    let mut c = DistArray::<f64>::new(&world, trange)?;
    c.assign("m,n", a.tsr("m,k")? * b.tsr("k,n")?)?;

    // Rows 0..2 see the full contraction, rows 2..4 are structurally zero
    for r in 0..2 {
        for col in 0..4 {
            assert_relative_eq!(element(&c, &[r, col]), 4.0);
        }
    }
    for r in 2..4 {
        for col in 0..4 {
            assert_relative_eq!(element(&c, &[r, col]), 0.0);
        }
    }
    Ok(())
}

#[test]
fn mismatched_annotations_are_rejected() -> Result<()> {
    let world = World::local();
    let trange = TiledRange::uniform(&[4, 4], 2)?;
    let a = DistArray::<f64>::new(&world, trange.clone())?;
    a.fill(1.0)?;

    // Wrong label count
    assert!(a.tsr("i").is_err());
    assert!(a.tsr("i,i").is_err());

    // Disjoint labels in an addition
    let b = DistArray::<f64>::new(&world, trange.clone())?;
    b.fill(1.0)?;
    let mut c = DistArray::<f64>::new(&world, trange)?;
    assert!(c.assign("i,j", a.tsr("i,j")? + b.tsr("k,l")?).is_err());
    Ok(())
}

#[test]
fn mismatched_tilings_are_rejected() -> Result<()> {
    let world = World::local();
    let a = DistArray::<f64>::new(&world, TiledRange::uniform(&[8], 4)?)?;
    let b = DistArray::<f64>::new(&world, TiledRange::uniform(&[8], 2)?)?;
    a.fill(1.0)?;
    b.fill(1.0)?;

    let mut c = DistArray::<f64>::new(&world, TiledRange::uniform(&[8], 4)?)?;
    assert!(c.assign("i", a.tsr("i")? + b.tsr("i")?).is_err());
    assert!(a.tsr("i")?.dot(&b.tsr("i")?).is_err());
    Ok(())
}

#[test]
fn failed_assignment_leaves_lhs_untouched() -> Result<()> {
    let world = World::local();
    let trange = TiledRange::uniform(&[4], 2)?;
    let a = DistArray::<f64>::new(&world, trange.clone())?;
    a.fill(9.0)?;

    let mut c = DistArray::<f64>::new(&world, trange)?;
    c.fill(5.0)?;
    let bad = DistArray::<f64>::new(&world, TiledRange::uniform(&[4], 1)?)?;
    bad.fill(1.0)?;
    assert!(c.assign("i", a.tsr("i")? + bad.tsr("i")?).is_err());

    // The failed assignment must not have replaced c
    for i in 0..4 {
        assert_relative_eq!(element(&c, &[i]), 5.0);
    }
    Ok(())
}
