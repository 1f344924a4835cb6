//! Property-based tests for the expression layer
//!
//! Checks algebraic laws of full evaluations over randomly generated
//! tilings and integer-valued fills (integer values keep floating-point
//! sums exact, so non-deterministic fold orders cannot perturb results).

#[cfg(test)]
mod tests {
    use crate::DistArray;
    use proptest::prelude::*;
    use tessra_core::tiled_range::{TiledRange, TiledRange1};
    use tessra_runtime::World;

    // Random strictly increasing boundaries covering up to ~20 elements
    fn boundaries() -> impl Strategy<Value = Vec<usize>> {
        prop::collection::vec(1usize..5, 1..5).prop_map(|steps| {
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
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_double_transpose_is_identity(rows in boundaries(), cols in boundaries()) {
            let world = World::local();
            let trange = TiledRange::new(vec![
                TiledRange1::new(rows).unwrap(),
                TiledRange1::new(cols).unwrap(),
            ]);
            let a = DistArray::<f64>::new(&world, trange).unwrap();
            a.fill_with(|c| (c[0] * 31 + c[1] * 7) as f64).unwrap();

            let mut b = DistArray::<f64>::new(&world, a.trange().permute(
                &tessra_core::perm::Permutation::new(vec![1, 0]).unwrap()).unwrap()).unwrap();
            b.assign("j,i", a.tsr("i,j").unwrap()).unwrap();

            let mut c = DistArray::<f64>::new(&world, a.trange().clone()).unwrap();
            c.assign("i,j", b.tsr("j,i").unwrap()).unwrap();

            prop_assert_eq!(c.trange(), a.trange());
            for &t in c.pmap().local() {
                let got = c.get(t).unwrap().get();
                let want = a.get(t).unwrap().get();
                prop_assert_eq!(got.data(), want.data());
            }
        }

        #[test]
        fn prop_sum_is_linear(bounds in boundaries()) {
            let world = World::local();
            let trange = TiledRange::new(vec![TiledRange1::new(bounds).unwrap()]);
            let a = DistArray::<f64>::new(&world, trange.clone()).unwrap();
            let b = DistArray::<f64>::new(&world, trange).unwrap();
            a.fill_with(|c| c[0] as f64).unwrap();
            b.fill_with(|c| (c[0] * 2 + 1) as f64).unwrap();

            let lhs = (a.tsr("i").unwrap() + b.tsr("i").unwrap()).sum().unwrap();
            let rhs = a.tsr("i").unwrap().sum().unwrap() + b.tsr("i").unwrap().sum().unwrap();
            prop_assert_eq!(lhs, rhs);
        }

        #[test]
        fn prop_scaled_norm_scales(bounds in boundaries(), factor in -4.0f64..4.0) {
            let world = World::local();
            let trange = TiledRange::new(vec![TiledRange1::new(bounds).unwrap()]);
            let a = DistArray::<f64>::new(&world, trange).unwrap();
            a.fill_with(|c| (c[0] + 1) as f64).unwrap();

            let scaled = (a.tsr("i").unwrap() * factor).norm().unwrap();
            let base = a.tsr("i").unwrap().norm().unwrap();
            prop_assert!((scaled - factor.abs() * base).abs() < 1e-9 * (1.0 + base));
        }
    }
}
