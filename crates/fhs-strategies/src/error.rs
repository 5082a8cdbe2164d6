use std::collections::BTreeMap;
use std::fmt;

use fhs_dtype::DType;
use fhs_linalg::LinAlgError;
use fhs_ndarray::ShapeError;
use fhs_random::RandomError;
use fhs_runtime::{DiscardSignal, TrialFailure};
use fhs_ufunc::UFuncError;

use crate::discard::BackendError;

pub const STRATEGY_REASON_CODES: [&str; 13] = [
    "strategy_unrecognized_support",
    "strategy_unsupported_dtype",
    "strategy_unrecognized_selector",
    "strategy_degenerate_broadcast",
    "strategy_non_finite_constrained_value",
    "strategy_excessive_usage",
    "strategy_invalid_discard_rule",
    "trial_discarded",
    "strategy_backend_failure",
    "strategy_shape_failure",
    "strategy_ufunc_failure",
    "strategy_linalg_failure",
    "strategy_random_failure",
];

/// Everything a strategy can report. Only [`StrategyError::Discarded`] is a
/// request to retry; every other variant is fatal.
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyError {
    UnrecognizedSupport(String),
    UnsupportedDType(DType),
    UnrecognizedSelector(String),
    DegenerateBroadcast {
        n: usize,
    },
    NonFiniteConstrainedValue {
        transform: String,
        values: Vec<f64>,
    },
    ExcessiveUsage {
        scope: String,
        max_permissible: usize,
        counts: BTreeMap<String, usize>,
    },
    /// A discard rule pattern failed to compile.
    InvalidDiscardRule(String),
    Discarded(DiscardSignal),
    Backend(BackendError),
    Shape(ShapeError),
    Ufunc(UFuncError),
    LinAlg(LinAlgError),
    Random(RandomError),
}

impl StrategyError {
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::UnrecognizedSupport(_) => "strategy_unrecognized_support",
            Self::UnsupportedDType(_) => "strategy_unsupported_dtype",
            Self::UnrecognizedSelector(_) => "strategy_unrecognized_selector",
            Self::DegenerateBroadcast { .. } => "strategy_degenerate_broadcast",
            Self::NonFiniteConstrainedValue { .. } => "strategy_non_finite_constrained_value",
            Self::ExcessiveUsage { .. } => "strategy_excessive_usage",
            Self::InvalidDiscardRule(_) => "strategy_invalid_discard_rule",
            Self::Discarded(_) => "trial_discarded",
            Self::Backend(_) => "strategy_backend_failure",
            Self::Shape(_) => "strategy_shape_failure",
            Self::Ufunc(_) => "strategy_ufunc_failure",
            Self::LinAlg(_) => "strategy_linalg_failure",
            Self::Random(_) => "strategy_random_failure",
        }
    }

    pub(crate) fn discard(reason: impl Into<String>) -> Self {
        Self::Discarded(DiscardSignal::new(reason))
    }
}

impl fmt::Display for StrategyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnrecognizedSupport(support) => write!(f, "unrecognized support: {support}"),
            Self::UnsupportedDType(dtype) => write!(f, "unsupported dtype: {dtype}"),
            Self::UnrecognizedSelector(token) => {
                write!(f, "unrecognized selector kind: {token:?}")
            }
            Self::DegenerateBroadcast { n } => write!(
                f,
                "broadcasting_shapes(shape, n={n}) is degenerate; use \
                 broadcast_compatible_shape, or allow it explicitly when n is drawn"
            ),
            Self::NonFiniteConstrainedValue { transform, values } => {
                write!(f, "{transform} generated non-finite param value: {values:?}")
            }
            Self::ExcessiveUsage {
                scope,
                max_permissible,
                counts,
            } => write!(
                f,
                "more than {max_permissible} tensor conversions detected for {scope}: {counts:?}"
            ),
            Self::InvalidDiscardRule(err) => write!(f, "invalid discard rule: {err}"),
            Self::Discarded(signal) => write!(f, "{signal}"),
            Self::Backend(err) => write!(f, "{err}"),
            Self::Shape(err) => write!(f, "{err}"),
            Self::Ufunc(err) => write!(f, "{err}"),
            Self::LinAlg(err) => write!(f, "{err}"),
            Self::Random(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for StrategyError {}

impl TrialFailure for StrategyError {
    fn is_discard(&self) -> bool {
        matches!(self, Self::Discarded(_))
    }

    fn reason_code(&self) -> &'static str {
        StrategyError::reason_code(self)
    }
}

impl From<DiscardSignal> for StrategyError {
    fn from(signal: DiscardSignal) -> Self {
        Self::Discarded(signal)
    }
}

impl From<BackendError> for StrategyError {
    fn from(err: BackendError) -> Self {
        Self::Backend(err)
    }
}

impl From<ShapeError> for StrategyError {
    fn from(err: ShapeError) -> Self {
        Self::Shape(err)
    }
}

impl From<UFuncError> for StrategyError {
    fn from(err: UFuncError) -> Self {
        Self::Ufunc(err)
    }
}

impl From<LinAlgError> for StrategyError {
    fn from(err: LinAlgError) -> Self {
        Self::LinAlg(err)
    }
}

impl From<RandomError> for StrategyError {
    fn from(err: RandomError) -> Self {
        Self::Random(err)
    }
}
