//! The support catalog: named value domains, each resolved by matching to
//! its constraining transform and minimum tensor rank.

use std::fmt;

use crate::constraints::{Constrainer, GT_NEG1_EPS, POSITIVE_EPS};
use crate::error::StrategyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Support {
    ScalarUnconstrained,
    ScalarNonNegative,
    ScalarNonZero,
    ScalarPositive,
    ScalarGtNeg1,
    ScalarInNeg1_1,
    ScalarIn0_1,
    VectorUnconstrained,
    VectorSizeTriangular,
    VectorPositiveWithL1Norm1SizeGt1,
    VectorStrictlyIncreasing,
    MatrixUnconstrained,
    MatrixLowerTril,
    MatrixLowerTrilPositiveDefinite,
    MatrixPositiveDefinite,
    CorrelationCholesky,
    Other,
}

/// Whether a support constrains scalars, last-axis vectors or trailing
/// matrices. The family fixes the minimum rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupportFamily {
    Scalar,
    Vector,
    Matrix,
}

impl SupportFamily {
    #[must_use]
    pub const fn min_rank(self) -> usize {
        match self {
            Self::Scalar => 0,
            Self::Vector => 1,
            Self::Matrix => 2,
        }
    }
}

impl Support {
    pub const ALL: [Self; 17] = [
        Self::ScalarUnconstrained,
        Self::ScalarNonNegative,
        Self::ScalarNonZero,
        Self::ScalarPositive,
        Self::ScalarGtNeg1,
        Self::ScalarInNeg1_1,
        Self::ScalarIn0_1,
        Self::VectorUnconstrained,
        Self::VectorSizeTriangular,
        Self::VectorPositiveWithL1Norm1SizeGt1,
        Self::VectorStrictlyIncreasing,
        Self::MatrixUnconstrained,
        Self::MatrixLowerTril,
        Self::MatrixLowerTrilPositiveDefinite,
        Self::MatrixPositiveDefinite,
        Self::CorrelationCholesky,
        Self::Other,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::ScalarUnconstrained => "SCALAR_UNCONSTRAINED",
            Self::ScalarNonNegative => "SCALAR_NON_NEGATIVE",
            Self::ScalarNonZero => "SCALAR_NON_ZERO",
            Self::ScalarPositive => "SCALAR_POSITIVE",
            Self::ScalarGtNeg1 => "SCALAR_GT_NEG1",
            Self::ScalarInNeg1_1 => "SCALAR_IN_NEG1_1",
            Self::ScalarIn0_1 => "SCALAR_IN_0_1",
            Self::VectorUnconstrained => "VECTOR_UNCONSTRAINED",
            Self::VectorSizeTriangular => "VECTOR_SIZE_TRIANGULAR",
            Self::VectorPositiveWithL1Norm1SizeGt1 => "VECTOR_POSITIVE_WITH_L1_NORM_1_SIZE_GT1",
            Self::VectorStrictlyIncreasing => "VECTOR_STRICTLY_INCREASING",
            Self::MatrixUnconstrained => "MATRIX_UNCONSTRAINED",
            Self::MatrixLowerTril => "MATRIX_LOWER_TRIL",
            Self::MatrixLowerTrilPositiveDefinite => "MATRIX_LOWER_TRIL_POSITIVE_DEFINITE",
            Self::MatrixPositiveDefinite => "MATRIX_POSITIVE_DEFINITE",
            Self::CorrelationCholesky => "CORRELATION_CHOLESKY",
            Self::Other => "OTHER",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, StrategyError> {
        Self::ALL
            .into_iter()
            .find(|support| support.name() == name)
            .ok_or_else(|| StrategyError::UnrecognizedSupport(name.to_string()))
    }

    /// The transform and family of every support that has one.
    #[must_use]
    pub const fn profile(self) -> Option<(Constrainer, SupportFamily)> {
        use SupportFamily::{Matrix, Scalar, Vector};
        let profile = match self {
            Self::ScalarUnconstrained => (Constrainer::Identity, Scalar),
            Self::ScalarNonNegative => (Constrainer::Softplus, Scalar),
            Self::ScalarNonZero => (Constrainer::NonZero, Scalar),
            Self::ScalarPositive => (Constrainer::SoftplusPlusEps(POSITIVE_EPS), Scalar),
            Self::ScalarGtNeg1 => (Constrainer::SoftplusPlusEps(GT_NEG1_EPS), Scalar),
            Self::ScalarInNeg1_1 => (Constrainer::ScaledTanh, Scalar),
            Self::ScalarIn0_1 => (Constrainer::Sigmoid, Scalar),
            Self::VectorUnconstrained | Self::VectorSizeTriangular => {
                (Constrainer::Identity, Vector)
            }
            Self::VectorPositiveWithL1Norm1SizeGt1 => (Constrainer::L1Simplex, Vector),
            Self::VectorStrictlyIncreasing => (Constrainer::StrictlyIncreasing, Vector),
            Self::MatrixUnconstrained => (Constrainer::Identity, Matrix),
            Self::MatrixLowerTril => (Constrainer::LowerTril, Matrix),
            Self::MatrixLowerTrilPositiveDefinite => {
                (Constrainer::LowerTrilPositiveDefinite, Matrix)
            }
            Self::MatrixPositiveDefinite => (Constrainer::PositiveDefinite, Matrix),
            Self::CorrelationCholesky | Self::Other => return None,
        };
        Some(profile)
    }

    fn resolve(self) -> Result<(Constrainer, SupportFamily), StrategyError> {
        self.profile()
            .ok_or_else(|| StrategyError::UnrecognizedSupport(self.name().to_string()))
    }
}

impl fmt::Display for Support {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The transform that maps unconstrained reals into `support`.
pub fn constrainer(support: Support) -> Result<Constrainer, StrategyError> {
    support.resolve().map(|(constrainer, _)| constrainer)
}

pub fn min_rank_for_support(support: Support) -> Result<usize, StrategyError> {
    support.resolve().map(|(_, family)| family.min_rank())
}

/// [`constrainer`] keyed by the SCREAMING_SNAKE support tag.
pub fn constrainer_for_name(name: &str) -> Result<Constrainer, StrategyError> {
    constrainer(Support::from_name(name)?)
}

pub fn min_rank_for_support_name(name: &str) -> Result<usize, StrategyError> {
    min_rank_for_support(Support::from_name(name)?)
}
