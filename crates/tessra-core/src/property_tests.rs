//! Property-based tests for the core tiled-tensor types
//!
//! Uses proptest to check the algebraic laws the rest of the stack leans
//! on: permutation round-trips, element-to-tile containment, the sparse
//! shape threshold invariant, and process-map partitioning.

#[cfg(test)]
mod tests {
    use crate::perm::Permutation;
    use crate::pmap::{BlockedPmap, CyclicPmap, CyclicPmap2D, Pmap};
    use crate::range::Range;
    use crate::shape::Shape;
    use crate::tiled_range::TiledRange1;
    use proptest::prelude::*;

    // Strategy for a permutation image of rank 1..=5
    fn perm_strategy() -> impl Strategy<Value = Vec<usize>> {
        (1usize..=5).prop_flat_map(|n| Just((0..n).collect::<Vec<_>>()).prop_shuffle())
    }

    // Strategy for a strictly increasing boundary vector
    fn boundaries_strategy() -> impl Strategy<Value = Vec<usize>> {
        prop::collection::vec(1usize..8, 1..6).prop_map(|steps| {
            let mut acc = 0;
            let mut b = vec![0];
            for s in steps {
                acc += s;
                b.push(acc);
            }
            b
        })
    }

    proptest! {
        #[test]
        fn prop_permutation_round_trip(image in perm_strategy()) {
            let p = Permutation::new(image).unwrap();
            let inv = p.inverse();
            let coord: Vec<usize> = (100..100 + p.len()).collect();
            let there = p.apply(&coord).unwrap();
            let back = inv.apply(&there).unwrap();
            prop_assert_eq!(back, coord);
        }

        #[test]
        fn prop_permutation_inverse_composes_to_identity(image in perm_strategy()) {
            let p = Permutation::new(image).unwrap();
            let composed = p.inverse().compose(&p).unwrap();
            prop_assert!(composed.is_identity());
        }

        #[test]
        fn prop_range_permute_round_trip(image in perm_strategy()) {
            let p = Permutation::new(image.clone()).unwrap();
            let r = Range::from_extents((0..image.len()).map(|d| d + 2)).unwrap();
            let back = r.permute(&p).unwrap().permute(&p.inverse()).unwrap();
            prop_assert_eq!(back, r);
        }

        #[test]
        fn prop_element_to_tile_contains(boundaries in boundaries_strategy()) {
            let tr = TiledRange1::new(boundaries).unwrap();
            for k in tr.elements() {
                let t = tr.element_to_tile(k).unwrap();
                prop_assert!(tr.tile(t).unwrap().contains(&k));
            }
        }

        #[test]
        fn prop_shape_threshold_invariant(
            norms in prop::collection::vec(0.0f64..10.0, 1..32),
            threshold in 0.01f64..5.0,
        ) {
            let s = Shape::sparse(norms.clone(), threshold);
            for (t, &n) in norms.iter().enumerate() {
                prop_assert_eq!(s.is_zero(t), n < threshold);
            }
        }

        #[test]
        fn prop_blocked_pmap_partitions(nprocs in 1usize..6, size in 0usize..40) {
            let mut seen = vec![false; size];
            for rank in 0..nprocs {
                let m = BlockedPmap::new(rank, nprocs, size).unwrap();
                for &t in m.local() {
                    prop_assert!(!seen[t]);
                    prop_assert_eq!(m.owner(t), rank);
                    seen[t] = true;
                }
            }
            prop_assert!(seen.into_iter().all(|s| s));
        }

        #[test]
        fn prop_cyclic_pmap_partitions(nprocs in 1usize..6, size in 0usize..40) {
            let mut seen = vec![false; size];
            for rank in 0..nprocs {
                let m = CyclicPmap::new(rank, nprocs, size).unwrap();
                for &t in m.local() {
                    prop_assert!(!seen[t]);
                    seen[t] = true;
                }
            }
            prop_assert!(seen.into_iter().all(|s| s));
        }

        #[test]
        fn prop_cyclic_2d_partitions(
            rows in 1usize..7,
            cols in 1usize..7,
            proc_rows in 1usize..3,
            proc_cols in 1usize..3,
        ) {
            let nprocs = proc_rows * proc_cols;
            let mut seen = vec![false; rows * cols];
            for rank in 0..nprocs {
                let m = CyclicPmap2D::new(rank, nprocs, rows, cols, proc_rows, proc_cols)
                    .unwrap();
                for &t in m.local() {
                    prop_assert!(!seen[t]);
                    prop_assert_eq!(m.owner(t), rank);
                    seen[t] = true;
                }
            }
            prop_assert!(seen.into_iter().all(|s| s));
        }
    }
}
