//! Constrained value sampling: raw elements drawn per dtype, pushed through a
//! constraining transform, then checked for finiteness.

use fhs_dtype::DType;
use fhs_ndarray::{Shape, element_count};
use fhs_random::{Draw, FloatWidth};
use fhs_ufunc::Tensor;

use crate::config::GenerationConfig;
use crate::constraints::Constrainer;
use crate::error::StrategyError;
use crate::support::{Support, constrainer, min_rank_for_support};

/// How individual raw elements are drawn.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ElementStrategy {
    Floats { min: f64, max: f64, width: FloatWidth },
    Booleans,
}

impl ElementStrategy {
    /// Default elements for `dtype`: bounded finite floats at the dtype's
    /// own width, or booleans. Other dtypes have no default.
    pub fn for_dtype(dtype: DType, config: &GenerationConfig) -> Result<Self, StrategyError> {
        if dtype.is_bool() {
            return Ok(Self::Booleans);
        }
        match FloatWidth::from_bits(dtype.bit_width()) {
            Some(width) if dtype.is_float() => Ok(Self::Floats {
                min: -config.element_bound,
                max: config.element_bound,
                width,
            }),
            _ => Err(StrategyError::UnsupportedDType(dtype)),
        }
    }

    fn draw(self, draw: &mut dyn Draw) -> Result<f64, StrategyError> {
        match self {
            Self::Floats { min, max, width } => Ok(draw.floats(min, max, width)?),
            Self::Booleans => Ok(if draw.boolean() { 1.0 } else { 0.0 }),
        }
    }
}

/// Draws a `shape`-shaped tensor and maps it through `constrainer`.
pub fn constrained_tensors(
    draw: &mut dyn Draw,
    constrainer: &Constrainer,
    shape: &[usize],
    dtype: DType,
    elements: Option<ElementStrategy>,
    config: &GenerationConfig,
) -> Result<Tensor, StrategyError> {
    let elements = match elements {
        Some(elements) => elements,
        None => ElementStrategy::for_dtype(dtype, config)?,
    };
    let count = element_count(shape)?;
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        values.push(elements.draw(draw)?);
    }
    let raw = Tensor::new(shape.to_vec(), values, dtype)?;
    let constrained = constrainer.apply(&raw)?;
    if config.finite_check && constrained.dtype().is_float() && !constrained.all_finite() {
        return Err(StrategyError::NonFiniteConstrainedValue {
            transform: constrainer.name().to_string(),
            values: constrained.into_values(),
        });
    }
    Ok(constrained)
}

/// Bounds for [`shapes`]. `max_side: None` means `min_side` plus the
/// configured side span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShapeBounds {
    pub min_ndims: usize,
    pub max_ndims: usize,
    pub min_lastdimsize: usize,
    pub min_side: usize,
    pub max_side: Option<usize>,
}

impl Default for ShapeBounds {
    fn default() -> Self {
        Self {
            min_ndims: 0,
            max_ndims: 3,
            min_lastdimsize: 1,
            min_side: 1,
            max_side: None,
        }
    }
}

/// A shape of rank in `[min_ndims, max_ndims]` whose trailing side is at
/// least `min_lastdimsize`.
pub fn shapes(
    draw: &mut dyn Draw,
    bounds: &ShapeBounds,
    config: &GenerationConfig,
) -> Result<Shape, StrategyError> {
    let rank = draw.sizes(bounds.min_ndims, bounds.max_ndims)?;
    let max_side = bounds
        .max_side
        .unwrap_or(bounds.min_side.saturating_add(config.side_span));
    let mut shape = Vec::with_capacity(rank);
    for _ in 0..rank {
        shape.push(draw.sizes(bounds.min_side, max_side)?);
    }
    if let Some(last) = shape.last_mut() {
        *last = (*last).max(bounds.min_lastdimsize);
    }
    Ok(shape)
}

/// A tensor living in `support`, shaped `batch_shape + [event_dim] * min_rank`.
/// Missing batch shapes and event sizes are drawn.
pub fn tensors_in_support(
    draw: &mut dyn Draw,
    support: Support,
    batch_shape: Option<&[usize]>,
    event_dim: Option<usize>,
    dtype: DType,
    config: &GenerationConfig,
) -> Result<Tensor, StrategyError> {
    let event_dim = match event_dim {
        Some(event_dim) => event_dim,
        None => draw_event_dim(draw, config)?,
    };
    let mut shape = match batch_shape {
        Some(batch_shape) => batch_shape.to_vec(),
        None => shapes(draw, &ShapeBounds::default(), config)?,
    };
    let min_rank = min_rank_for_support(support)?;
    shape.extend(std::iter::repeat_n(event_dim, min_rank));
    let constrainer = constrainer(support)?;
    constrained_tensors(draw, &constrainer, &shape, dtype, None, config)
}

pub(crate) fn draw_event_dim(
    draw: &mut dyn Draw,
    config: &GenerationConfig,
) -> Result<usize, StrategyError> {
    Ok(draw.sizes(
        *config.event_dim_range.start(),
        *config.event_dim_range.end(),
    )?)
}

#[cfg(test)]
mod tests {
    use super::{ElementStrategy, ShapeBounds, constrained_tensors, shapes, tensors_in_support};
    use crate::config::GenerationConfig;
    use crate::constraints::Constrainer;
    use crate::error::StrategyError;
    use crate::support::Support;
    use fhs_dtype::DType;
    use fhs_random::{DeterministicRng, FloatWidth};
    use fhs_ufunc::Tensor;

    #[test]
    fn default_elements_by_dtype() {
        let cfg = GenerationConfig::default();
        assert_eq!(
            ElementStrategy::for_dtype(DType::F32, &cfg),
            Ok(ElementStrategy::Floats {
                min: -200.0,
                max: 200.0,
                width: FloatWidth::W32
            })
        );
        assert_eq!(
            ElementStrategy::for_dtype(DType::Bool, &cfg),
            Ok(ElementStrategy::Booleans)
        );
        for dtype in [DType::I32, DType::U8, DType::I64] {
            assert_eq!(
                ElementStrategy::for_dtype(dtype, &cfg),
                Err(StrategyError::UnsupportedDType(dtype))
            );
        }
    }

    #[test]
    fn raw_floats_respect_bounds_and_width() {
        let cfg = GenerationConfig::default();
        let mut rng = DeterministicRng::new(3);
        let x = constrained_tensors(
            &mut rng,
            &Constrainer::Identity,
            &[4, 5],
            DType::F32,
            None,
            &cfg,
        )
        .expect("identity tensor");
        assert_eq!(x.shape(), &[4, 5]);
        for &v in x.values() {
            assert!((-200.0..=200.0).contains(&v));
            assert_eq!(f64::from(v as f32), v);
        }
    }

    #[test]
    fn boolean_tensors_hold_zero_or_one() {
        let cfg = GenerationConfig::default();
        let mut rng = DeterministicRng::new(8);
        let x = constrained_tensors(
            &mut rng,
            &Constrainer::Identity,
            &[32],
            DType::Bool,
            None,
            &cfg,
        )
        .expect("bool tensor");
        assert!(x.values().iter().all(|&v| v == 0.0 || v == 1.0));
    }

    #[test]
    fn non_finite_results_are_fatal_unless_unchecked() {
        fn blow_up(x: &Tensor) -> Result<Tensor, StrategyError> {
            Ok(x.map(|_| f64::INFINITY))
        }
        let custom = Constrainer::Custom {
            name: "blow_up",
            transform: blow_up,
        };
        let cfg = GenerationConfig::default();
        let mut rng = DeterministicRng::new(1);
        let err = constrained_tensors(&mut rng, &custom, &[2], DType::F64, None, &cfg)
            .expect_err("infinite output");
        assert!(matches!(
            err,
            StrategyError::NonFiniteConstrainedValue { ref transform, .. } if transform == "blow_up"
        ));

        let unchecked = cfg.without_finite_check();
        let x = constrained_tensors(&mut rng, &custom, &[2], DType::F64, None, &unchecked)
            .expect("check skipped");
        assert!(!x.all_finite());
    }

    #[test]
    fn shapes_stay_in_bounds() {
        let cfg = GenerationConfig::default();
        let bounds = ShapeBounds {
            min_ndims: 1,
            max_ndims: 4,
            min_lastdimsize: 3,
            min_side: 1,
            max_side: Some(5),
        };
        let mut rng = DeterministicRng::new(21);
        for _ in 0..200 {
            let shape = shapes(&mut rng, &bounds, &cfg).expect("shape");
            assert!((1..=4).contains(&shape.len()));
            assert!(shape.iter().all(|&side| (1..=5).contains(&side)));
            assert!(shape.last().is_some_and(|&last| last >= 3));
        }
    }

    #[test]
    fn absent_max_side_spans_five_past_min_side() {
        let cfg = GenerationConfig::default();
        let mut rng = DeterministicRng::new(8);
        let mut widest = 0;
        for _ in 0..300 {
            let shape = shapes(&mut rng, &ShapeBounds::default(), &cfg).expect("shape");
            assert!(shape.iter().all(|&side| (1..=6).contains(&side)));
            widest = widest.max(shape.iter().copied().max().unwrap_or(0));
        }
        assert_eq!(widest, 6);

        let bounds = ShapeBounds {
            min_ndims: 2,
            min_side: 3,
            ..ShapeBounds::default()
        };
        for _ in 0..100 {
            let shape = shapes(&mut rng, &bounds, &cfg).expect("shape");
            assert!(shape.iter().all(|&side| (3..=8).contains(&side)));
        }
    }

    #[test]
    fn tensors_in_support_append_event_axes() {
        let cfg = GenerationConfig::default();
        let mut rng = DeterministicRng::new(5);
        let x = tensors_in_support(
            &mut rng,
            Support::MatrixLowerTril,
            Some(&[2][..]),
            Some(3),
            DType::F32,
            &cfg,
        )
        .expect("lower tril");
        assert_eq!(x.shape(), &[2, 3, 3]);
        for m in x.values().chunks(9) {
            assert_eq!((m[1], m[2], m[5]), (0.0, 0.0, 0.0));
        }

        let simplex = tensors_in_support(
            &mut rng,
            Support::VectorPositiveWithL1Norm1SizeGt1,
            Some(&[][..]),
            Some(2),
            DType::F64,
            &cfg,
        )
        .expect("simplex");
        assert_eq!(simplex.shape(), &[3]);

        let err = tensors_in_support(&mut rng, Support::Other, None, None, DType::F32, &cfg)
            .expect_err("no transform");
        assert!(matches!(err, StrategyError::UnrecognizedSupport(_)));
    }
}
