//! Multi-rank evaluation over the in-process thread communicator
//!
//! Each rank runs the same SPMD program on its own thread; tiles live
//! where the process maps put them and remote reads go through the
//! shared-hub fetch path.

use std::sync::Arc;
use tessra_core::shape::Shape;
use tessra_core::tiled_range::TiledRange;
use tessra_expr::{sparse_shape_from_local_norms, to_sparse, DistArray};
use tessra_runtime::{ThreadComm, World};

fn run_ranks(nprocs: usize, body: impl Fn(World) + Send + Sync) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let comms = ThreadComm::split(nprocs);
    std::thread::scope(|scope| {
        for comm in comms {
            let body = &body;
            scope.spawn(move || body(World::new(Arc::new(comm))));
        }
    });
}

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
fn gemm_matches_across_ranks() {
    for nprocs in [2, 4] {
        run_ranks(nprocs, |world| {
            let trange = TiledRange::uniform(&[8, 8], 2).unwrap();
            let a = DistArray::<f64>::new(&world, trange.clone()).unwrap();
            let b = DistArray::<f64>::new(&world, trange.clone()).unwrap();
            a.fill_with(|c| (c[0] + 2 * c[1]) as f64).unwrap();
            b.fill_with(|c| (3 * c[0] + c[1]) as f64).unwrap();
            world.fence().unwrap();

            let mut c = DistArray::<f64>::new(&world, trange).unwrap();
            c.assign("m,n", a.tsr("m,k").unwrap() * b.tsr("k,n").unwrap())
                .unwrap();

            // Every rank verifies the full result through remote reads
            for m in 0..8 {
                for n in 0..8 {
                    let want: f64 = (0..8)
                        .map(|k| ((m + 2 * k) * (3 * k + n)) as f64)
                        .sum();
                    assert_eq!(element(&c, &[m, n]), want);
                }
            }
            world.fence().unwrap();
        });
    }
}

#[test]
fn transpose_across_ranks() {
    run_ranks(3, |world| {
        let trange = TiledRange::uniform(&[6, 6], 2).unwrap();
        let a = DistArray::<f64>::new(&world, trange.clone()).unwrap();
        a.fill_with(|c| (c[0] * 10 + c[1]) as f64).unwrap();
        world.fence().unwrap();

        let mut b = DistArray::<f64>::new(&world, trange).unwrap();
        b.assign("i,j", a.tsr("j,i").unwrap()).unwrap();

        for r in 0..6 {
            for c in 0..6 {
                assert_eq!(element(&b, &[r, c]), (c * 10 + r) as f64);
            }
        }
        world.fence().unwrap();
    });
}

#[test]
fn replicated_sparse_shape_agrees() {
    run_ranks(4, |world| {
        let trange = TiledRange::uniform(&[16], 2).unwrap();
        let probe = DistArray::<f64>::new(&world, trange.clone()).unwrap();

        // Each rank reports norms for its own tiles only
        let mut local = vec![0.0; trange.tile_count()];
        for &t in probe.pmap().local() {
            local[t] = (t + 1) as f64;
        }
        let shape =
            sparse_shape_from_local_norms(&world, &trange, local, Some(3.5)).unwrap();

        // Every rank sees the identical replicated norm tensor
        for t in 0..trange.tile_count() {
            assert_eq!(shape.norm(t), (t + 1) as f64);
            assert_eq!(shape.is_zero(t), ((t + 1) as f64) < 3.5);
        }
        world.fence().unwrap();
    });
}

#[test]
fn to_sparse_replicates_the_zero_set() {
    run_ranks(2, |world| {
        let trange = TiledRange::uniform(&[8], 2).unwrap();
        let a = DistArray::<f64>::new(&world, trange).unwrap();
        // Tiles 1 and 3 hold zeros, tiles 0 and 2 hold ones
        a.fill_with(|c| if (c[0] / 2) % 2 == 0 { 1.0 } else { 0.0 })
            .unwrap();
        world.fence().unwrap();

        let s = to_sparse(&a, Some(1e-10)).unwrap();
        assert!(!s.is_zero(0));
        assert!(s.is_zero(1));
        assert!(!s.is_zero(2));
        assert!(s.is_zero(3));
        world.fence().unwrap();
    });
}

#[test]
fn distributed_reductions_agree_on_every_rank() {
    run_ranks(3, |world| {
        let trange = TiledRange::uniform(&[12], 3).unwrap();
        let a = DistArray::<f64>::new(&world, trange.clone()).unwrap();
        let b = DistArray::<f64>::new(&world, trange).unwrap();
        a.fill_with(|c| c[0] as f64).unwrap();
        b.fill(2.0).unwrap();
        world.fence().unwrap();

        let dot = a.tsr("i").unwrap().dot(&b.tsr("i").unwrap()).unwrap();
        let want: f64 = (0..12).map(|v| (v * 2) as f64).sum();
        assert_eq!(dot, want);

        let sum = a.tsr("i").unwrap().sum().unwrap();
        assert_eq!(sum, (0..12).map(|v| v as f64).sum::<f64>());

        let max = a.tsr("i").unwrap().max().unwrap();
        assert_eq!(max, 11.0);
        world.fence().unwrap();
    });
}

#[test]
fn sparse_contraction_across_ranks() {
    run_ranks(4, |world| {
        let trange = TiledRange::uniform(&[8, 8], 4).unwrap();
        // 2x2 tile grid; left lower row is structurally zero
        let shape = Shape::sparse(vec![10.0, 10.0, 0.0, 0.0], 1e-10);
        let a = DistArray::<f64>::with_shape(&world, trange.clone(), shape).unwrap();
        a.fill(1.0).unwrap();
        let b = DistArray::<f64>::new(&world, trange.clone()).unwrap();
        b.fill(1.0).unwrap();
        world.fence().unwrap();

        let mut c = DistArray::<f64>::new(&world, trange).unwrap();
        c.assign("m,n", a.tsr("m,k").unwrap() * b.tsr("k,n").unwrap())
            .unwrap();

        for m in 0..8 {
            for n in 0..8 {
                let want = if m < 4 { 8.0 } else { 0.0 };
                assert_eq!(element(&c, &[m, n]), want);
            }
        }
        world.fence().unwrap();
    });
}
