//! Property-based tests for the runtime layer
//!
//! The load-bearing law is reduction order-invariance: for a commutative,
//! associative operation, the reduce-task result must not depend on the
//! order in which argument futures resolve.

#[cfg(test)]
mod tests {
    use crate::future::Future;
    use crate::reduce::{ReduceOp, ReduceTask};
    use crate::world::World;
    use proptest::prelude::*;

    struct SumOp;

    impl ReduceOp for SumOp {
        type Arg = f64;
        type Result = f64;

        fn identity(&self) -> f64 {
            0.0
        }

        fn fold(&self, acc: &mut f64, arg: &f64) {
            *acc += *arg;
        }

        fn combine(&self, acc: &mut f64, other: f64) {
            *acc += other;
        }
    }

    proptest! {
        // Resolve the same argument multiset under permuted schedules and
        // require the identical sum every time.
        #[test]
        fn prop_reduce_is_order_invariant(
            values in prop::collection::vec(-100i64..100, 1..24),
            order in any::<u64>(),
        ) {
            let expected: f64 = values.iter().map(|&v| v as f64).sum();

            let world = World::local();
            let mut task = ReduceTask::new(&world, SumOp);
            let futures: Vec<Future<f64>> =
                (0..values.len()).map(|_| Future::new()).collect();
            for f in &futures {
                task.add(f.clone());
            }
            let result = task.submit();

            // Deterministically shuffle the resolution order from the seed
            let mut schedule: Vec<usize> = (0..values.len()).collect();
            let mut state = order;
            for i in (1..schedule.len()).rev() {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                let j = (state >> 33) as usize % (i + 1);
                schedule.swap(i, j);
            }

            for &i in &schedule {
                let f = futures[i].clone();
                let v = values[i] as f64;
                world.spawn(move || {
                    f.set(v).expect("argument future set once");
                });
            }

            world.fence().unwrap();
            prop_assert_eq!(*result.get(), expected);
        }
    }
}
