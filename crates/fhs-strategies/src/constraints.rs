//! Constraining transforms: maps from unconstrained reals into a support.

use fhs_linalg::{
    add_scaled_identity, band_part, diag_part, matmul_transpose_b, matrix_transpose, qr,
    set_diag,
};
use fhs_ufunc::{BinaryOp, Tensor, UnaryOp};

use crate::error::StrategyError;

pub const POSITIVE_EPS: f64 = 1e-6;
pub const GT_NEG1_EPS: f64 = -1.0 + 1e-6;
pub const NON_ZERO_REPLACEMENT: f64 = 1e-6;
pub const TANH_SHRINK: f64 = 1.0 - 1e-6;
pub const INCREMENT_FLOOR: f64 = 1e-3;
pub const SIMPLEX_PAD: f64 = 1e-6;
pub const DIAGONAL_SHIFT: f64 = 0.1;

/// A transform from unconstrained tensors into some support.
#[derive(Debug, Clone, Copy)]
pub enum Constrainer {
    Identity,
    Sigmoid,
    Softplus,
    SoftplusPlusEps(f64),
    NonZero,
    ScaledTanh,
    StrictlyIncreasing,
    L1Simplex,
    Symmetric,
    PositiveDefinite,
    Orthonormal,
    LowerTrilPositiveDefinite,
    LowerTril,
    Custom {
        name: &'static str,
        transform: fn(&Tensor) -> Result<Tensor, StrategyError>,
    },
}

impl Constrainer {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Sigmoid => "sigmoid",
            Self::Softplus => "softplus",
            Self::SoftplusPlusEps(_) => "softplus_plus_eps",
            Self::NonZero => "nonzero",
            Self::ScaledTanh => "scaled_tanh",
            Self::StrictlyIncreasing => "strictly_increasing",
            Self::L1Simplex => "l1_simplex",
            Self::Symmetric => "symmetric",
            Self::PositiveDefinite => "positive_definite",
            Self::Orthonormal => "orthonormal",
            Self::LowerTrilPositiveDefinite => "lower_tril_positive_definite",
            Self::LowerTril => "lower_tril",
            Self::Custom { name, .. } => *name,
        }
    }

    pub fn apply(&self, x: &Tensor) -> Result<Tensor, StrategyError> {
        match self {
            Self::Identity => Ok(x.clone()),
            Self::Sigmoid => Ok(x.elementwise_unary(UnaryOp::Sigmoid)),
            Self::Softplus => Ok(x.elementwise_unary(UnaryOp::Softplus)),
            Self::SoftplusPlusEps(eps) => Ok(softplus_plus_eps(x, *eps)),
            Self::NonZero => Ok(x.where_equal(0.0, NON_ZERO_REPLACEMENT)),
            Self::ScaledTanh => Ok(x
                .elementwise_unary(UnaryOp::Tanh)
                .mul_scalar(TANH_SHRINK)),
            Self::StrictlyIncreasing => strictly_increasing(x),
            Self::L1Simplex => l1_simplex(x),
            Self::Symmetric => symmetric(x),
            Self::PositiveDefinite => positive_definite(x),
            Self::Orthonormal => orthonormal(x),
            Self::LowerTrilPositiveDefinite => lower_tril_positive_definite(x),
            Self::LowerTril => lower_tril(x),
            Self::Custom { transform, .. } => transform(x),
        }
    }
}

#[must_use]
pub fn softplus_plus_eps(x: &Tensor, eps: f64) -> Tensor {
    x.elementwise_unary(UnaryOp::Softplus).add_scalar(eps)
}

/// `cumsum(|x| + 1e-3)` along the last axis.
pub fn strictly_increasing(x: &Tensor) -> Result<Tensor, StrategyError> {
    Ok(x
        .map(|v| v.abs() + INCREMENT_FLOOR)
        .cumsum_last_axis()?)
}

/// Pads the last axis with one small entry, then projects each lane onto
/// the probability simplex. The last axis grows by one.
pub fn l1_simplex(x: &Tensor) -> Result<Tensor, StrategyError> {
    let padded = x.append_last_axis(SIMPLEX_PAD)?;
    Ok(padded
        .l1_normalize_last_axis()?
        .elementwise_unary(UnaryOp::Abs))
}

/// `(x + xᵀ) / 2` over the trailing two axes.
pub fn symmetric(x: &Tensor) -> Result<Tensor, StrategyError> {
    let xt = matrix_transpose(x)?;
    Ok(x.elementwise_binary(&xt, BinaryOp::Add)?.mul_scalar(0.5))
}

/// `sym(x xᵀ + 0.1 I)`.
pub fn positive_definite(x: &Tensor) -> Result<Tensor, StrategyError> {
    let gram = matmul_transpose_b(x)?;
    symmetric(&add_scaled_identity(&gram, DIAGONAL_SHIFT)?)
}

/// The `q` factor of the QR decomposition of `positive_definite(x)`.
pub fn orthonormal(x: &Tensor) -> Result<Tensor, StrategyError> {
    let (q, _) = qr(&positive_definite(x)?)?;
    Ok(q)
}

pub fn lower_tril_positive_definite(x: &Tensor) -> Result<Tensor, StrategyError> {
    let diag = softplus_plus_eps(&diag_part(x)?, DIAGONAL_SHIFT);
    lower_tril(&set_diag(x, &diag)?)
}

pub fn lower_tril(x: &Tensor) -> Result<Tensor, StrategyError> {
    Ok(band_part(x, None, Some(0))?)
}

/// A value shaped like `high` that is strictly greater than the broadcast
/// `low`. Axes along which `low` is larger than `high` are max-reduced back
/// down to `high`'s shape.
pub fn ensure_high_gt_low(low: &Tensor, high: &Tensor) -> Result<Tensor, StrategyError> {
    let floor = low.map(|v| v + v.abs() * 0.1 + 0.1);
    let mut new_high = floor.elementwise_binary(high, BinaryOp::Maximum)?;
    while new_high.rank() > high.rank() {
        new_high = new_high.reduce_max(0, false)?;
    }
    for axis in 0..high.rank() {
        if high.shape()[axis] < new_high.shape()[axis] {
            new_high = new_high.reduce_max(axis, true)?;
        }
    }
    Ok(new_high)
}

#[cfg(test)]
mod tests {
    use super::{
        Constrainer, ensure_high_gt_low, l1_simplex, lower_tril, lower_tril_positive_definite,
        orthonormal, positive_definite, strictly_increasing, symmetric,
    };
    use crate::error::StrategyError;
    use fhs_dtype::DType;
    use fhs_linalg::{cholesky, matmul, matrix_transpose};
    use fhs_ufunc::Tensor;

    fn t(shape: &[usize], values: &[f64]) -> Tensor {
        Tensor::new(shape.to_vec(), values.to_vec(), DType::F64).expect("valid tensor")
    }

    fn close(lhs: &[f64], rhs: &[f64]) -> bool {
        lhs.len() == rhs.len() && lhs.iter().zip(rhs).all(|(a, b)| (a - b).abs() < 1e-9)
    }

    #[test]
    fn sigmoid_of_zero_is_one_half() {
        let out = Constrainer::Sigmoid
            .apply(&Tensor::scalar(0.0, DType::F32))
            .expect("sigmoid");
        assert_eq!(out.values(), &[0.5]);
    }

    #[test]
    fn lower_tril_zeroes_the_upper_triangle() {
        let out = lower_tril(&t(&[2, 2], &[1.0, 2.0, 3.0, 4.0])).expect("band part");
        assert_eq!(out.values(), &[1.0, 0.0, 3.0, 4.0]);
    }

    #[test]
    fn scalar_transforms_hit_their_ranges() {
        let x = t(&[5], &[-200.0, -1.0, 0.0, 1.0, 200.0]);
        let nonzero = Constrainer::NonZero.apply(&x).expect("nonzero");
        assert!(nonzero.values().iter().all(|&v| v != 0.0));
        let positive = Constrainer::SoftplusPlusEps(1e-6).apply(&x).expect("positive");
        assert!(positive.values().iter().all(|&v| v > 0.0));
        let gt_neg1 = Constrainer::SoftplusPlusEps(-1.0 + 1e-6)
            .apply(&x)
            .expect("gt -1");
        assert!(gt_neg1.values().iter().all(|&v| v > -1.0));
        let tanh = Constrainer::ScaledTanh.apply(&x).expect("tanh");
        assert!(tanh.values().iter().all(|&v| v > -1.0 && v < 1.0));
    }

    #[test]
    fn strictly_increasing_accumulates_positive_steps() {
        let out = strictly_increasing(&t(&[2, 3], &[-1.0, 0.0, 2.0, 5.0, -5.0, 0.0]))
            .expect("cumsum");
        assert!(close(
            out.values(),
            &[1.001, 1.002, 3.003, 5.001, 10.002, 10.003]
        ));
        assert!(
            out.values()
                .chunks(3)
                .all(|lane| lane.windows(2).all(|w| w[0] < w[1]))
        );
    }

    #[test]
    fn l1_simplex_grows_last_axis_and_sums_to_one() {
        let out = l1_simplex(&t(&[2, 2], &[3.0, -1.0, 0.0, 0.0])).expect("simplex");
        assert_eq!(out.shape(), &[2, 3]);
        for lane in out.values().chunks(3) {
            let total: f64 = lane.iter().sum();
            assert!((total - 1.0).abs() < 1e-12);
            assert!(lane.iter().all(|&v| v >= 0.0));
        }
        // An all-zero lane collapses onto the padding entry.
        assert!(close(&out.values()[3..], &[0.0, 0.0, 1.0]));
    }

    #[test]
    fn positive_definite_is_symmetric_and_factorizes() {
        let x = t(&[2, 2, 2], &[1.0, 2.0, 2.0, 4.0, -3.0, 0.5, 7.0, 1.0]);
        let pd = positive_definite(&x).expect("pd");
        let sym = symmetric(&pd).expect("sym");
        assert!(close(pd.values(), sym.values()));
        cholesky(&pd).expect("positive definite matrices factorize");
    }

    #[test]
    fn lower_tril_positive_definite_has_positive_diagonal() {
        let x = t(&[3, 3], &[-50.0, 1.0, 2.0, 3.0, 0.0, 4.0, 5.0, 6.0, 9.0]);
        let out = lower_tril_positive_definite(&x).expect("tril pd");
        let v = out.values();
        assert!(v[0] >= 0.1 && v[4] > 0.1 && v[8] > 0.1);
        assert_eq!((v[1], v[2], v[5]), (0.0, 0.0, 0.0));
        assert!((v[3] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn orthonormal_columns() {
        let x = t(&[3, 3], &[1.0, 2.0, 0.0, -1.0, 0.5, 3.0, 2.0, 2.0, 2.0]);
        let q = orthonormal(&x).expect("qr");
        let qtq = matmul(&matrix_transpose(&q).expect("transpose"), &q).expect("matmul");
        let eye = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];
        assert!(
            qtq.values()
                .iter()
                .zip(eye)
                .all(|(a, b)| (a - b).abs() < 1e-9)
        );
    }

    #[test]
    fn high_is_reduced_back_to_its_own_shape() {
        let low = t(&[2, 1], &[1.0, 2.0]);
        let high = t(&[2], &[0.0, 5.0]);
        let out = ensure_high_gt_low(&low, &high).expect("high > low");
        assert_eq!(out.shape(), &[2]);
        assert!(close(out.values(), &[2.3, 5.0]));
    }

    #[test]
    fn custom_transforms_dispatch_by_pointer() {
        fn double(x: &Tensor) -> Result<Tensor, StrategyError> {
            Ok(x.mul_scalar(2.0))
        }
        let custom = Constrainer::Custom {
            name: "double",
            transform: double,
        };
        assert_eq!(custom.name(), "double");
        let out = custom.apply(&t(&[2], &[1.0, -3.0])).expect("custom");
        assert_eq!(out.values(), &[2.0, -6.0]);
    }
}
