//! Generators exposed as `proptest` strategies.
//!
//! Each tree is generated from a [`DeterministicRng`] seeded by the proptest
//! runner. Discards become proptest rejections; fatal errors panic so they
//! fail the test instead of being filtered away. Values do not shrink.

use std::fmt;
use std::marker::PhantomData;

use fhs_dtype::DType;
use fhs_ndarray::Shape;
use fhs_random::{DeterministicRng, Draw};
use fhs_runtime::TrialFailure;
use fhs_ufunc::Tensor;
use proptest::prelude::Rng;
use proptest::strategy::{Just, NewTree, Strategy};
use proptest::test_runner::TestRunner;

use crate::broadcast::broadcasting_shapes;
use crate::config::GenerationConfig;
use crate::error::StrategyError;
use crate::sampler::tensors_in_support;
use crate::slices::{SliceExpr, valid_slices};
use crate::support::Support;

pub struct Generated<T, F> {
    label: &'static str,
    generate: F,
    _value: PhantomData<fn() -> T>,
}

impl<T, F> fmt::Debug for Generated<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Generated")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Wraps `generate` as a strategy named `label`.
pub fn generated<T, F>(label: &'static str, generate: F) -> Generated<T, F>
where
    F: Fn(&mut dyn Draw) -> Result<T, StrategyError>,
{
    Generated {
        label,
        generate,
        _value: PhantomData,
    }
}

impl<T, F> Strategy for Generated<T, F>
where
    T: Clone + fmt::Debug,
    F: Fn(&mut dyn Draw) -> Result<T, StrategyError>,
{
    type Tree = Just<T>;
    type Value = T;

    fn new_tree(&self, runner: &mut TestRunner) -> NewTree<Self> {
        let mut rng = DeterministicRng::new(runner.rng().next_u64());
        match (self.generate)(&mut rng) {
            Ok(value) => Ok(Just(value)),
            Err(err) if err.is_discard() => Err(format!("{}: {err}", self.label).into()),
            Err(err) => panic!("{} could not generate a value: {err}", self.label),
        }
    }
}

/// `n` shapes jointly broadcasting to `target`.
pub fn broadcasting_shapes_strategy(
    target: Shape,
    n: usize,
) -> impl Strategy<Value = Vec<Shape>> {
    generated("broadcasting_shapes", move |draw| {
        broadcasting_shapes(draw, &target, n, false)
    })
}

pub fn valid_slices_strategy(batch_shape: Shape) -> impl Strategy<Value = SliceExpr> {
    generated("valid_slices", move |draw| valid_slices(draw, &batch_shape))
}

/// Tensors in `support` with drawn batch shape and event size.
pub fn tensors_in_support_strategy(
    support: Support,
    dtype: DType,
    config: GenerationConfig,
) -> impl Strategy<Value = Tensor> {
    generated("tensors_in_support", move |draw| {
        tensors_in_support(draw, support, None, None, dtype, &config)
    })
}

#[cfg(test)]
mod tests {
    use super::{broadcasting_shapes_strategy, generated, valid_slices_strategy};
    use crate::error::StrategyError;
    use fhs_ndarray::broadcast_shapes;
    use fhs_random::Draw;
    use proptest::strategy::{Strategy, ValueTree};
    use proptest::test_runner::TestRunner;

    #[test]
    fn trees_hold_generated_values() {
        let mut runner = TestRunner::deterministic();
        let strategy = broadcasting_shapes_strategy(vec![2, 3], 3);
        for _ in 0..20 {
            let shapes = strategy
                .new_tree(&mut runner)
                .expect("no discards")
                .current();
            assert_eq!(broadcast_shapes(&shapes).expect("compatible"), vec![2, 3]);
        }
    }

    #[test]
    fn discards_become_rejections() {
        let mut runner = TestRunner::deterministic();
        let strategy = generated("odd_only", |draw: &mut dyn Draw| {
            let v = draw.integers(0, 9)?;
            if v % 2 == 0 {
                Err(StrategyError::discard("even"))
            } else {
                Ok(v)
            }
        });
        let mut accepted = 0;
        let mut rejected = 0;
        for _ in 0..100 {
            match strategy.new_tree(&mut runner) {
                Ok(tree) => {
                    assert_eq!(tree.current() % 2, 1);
                    accepted += 1;
                }
                Err(reason) => {
                    assert!(reason.message().contains("odd_only"));
                    rejected += 1;
                }
            }
        }
        assert!(accepted > 0 && rejected > 0);
    }

    #[test]
    #[should_panic(expected = "could not generate")]
    fn fatal_errors_panic() {
        let mut runner = TestRunner::deterministic();
        let strategy = broadcasting_shapes_strategy(vec![2], 1);
        let _ = strategy.new_tree(&mut runner);
    }

    #[test]
    fn slice_strategy_is_deterministic_per_runner() {
        let strategy = valid_slices_strategy(vec![4, 3, 2]);
        let collect = || {
            let mut runner = TestRunner::deterministic();
            (0..10)
                .map(|_| strategy.new_tree(&mut runner).expect("slices").current())
                .collect::<Vec<_>>()
        };
        assert_eq!(collect(), collect());
    }
}
