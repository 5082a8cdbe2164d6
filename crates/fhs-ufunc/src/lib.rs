#![forbid(unsafe_code)]

use fhs_dtype::{DType, promote};
use fhs_ndarray::{ShapeError, broadcast_shape, contiguous_strides_elems, element_count};

pub const UFUNC_REASON_CODES: [&str; 4] = [
    "ufunc_shape_contract_violation",
    "ufunc_invalid_input_length",
    "ufunc_axis_out_of_bounds",
    "ufunc_rank_too_low",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Minimum,
    Maximum,
}

impl BinaryOp {
    #[must_use]
    pub fn apply(self, lhs: f64, rhs: f64) -> f64 {
        match self {
            Self::Add => lhs + rhs,
            Self::Sub => lhs - rhs,
            Self::Mul => lhs * rhs,
            Self::Div => lhs / rhs,
            Self::Minimum => {
                if lhs.is_nan() || rhs.is_nan() {
                    f64::NAN
                } else {
                    lhs.min(rhs)
                }
            }
            Self::Maximum => {
                if lhs.is_nan() || rhs.is_nan() {
                    f64::NAN
                } else {
                    lhs.max(rhs)
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Identity,
    Abs,
    Negative,
    Exp,
    Tanh,
    Sigmoid,
    Softplus,
}

impl UnaryOp {
    #[must_use]
    pub fn apply(self, x: f64) -> f64 {
        match self {
            Self::Identity => x,
            Self::Abs => x.abs(),
            Self::Negative => -x,
            Self::Exp => x.exp(),
            Self::Tanh => x.tanh(),
            // Split on sign so neither branch exponentiates a large positive.
            Self::Sigmoid => {
                if x >= 0.0 {
                    1.0 / (1.0 + (-x).exp())
                } else {
                    let e = x.exp();
                    e / (1.0 + e)
                }
            }
            Self::Softplus => x.max(0.0) + (-x.abs()).exp().ln_1p(),
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Abs => "abs",
            Self::Negative => "negative",
            Self::Exp => "exp",
            Self::Tanh => "tanh",
            Self::Sigmoid => "sigmoid",
            Self::Softplus => "softplus",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UFuncError {
    Shape(ShapeError),
    InvalidInputLength { expected: usize, actual: usize },
    AxisOutOfBounds { axis: usize, ndim: usize },
    RankTooLow { op: &'static str, rank: usize, required: usize },
}

impl std::fmt::Display for UFuncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Shape(err) => write!(f, "shape error: {err}"),
            Self::InvalidInputLength { expected, actual } => {
                write!(
                    f,
                    "invalid input length expected={expected} actual={actual}"
                )
            }
            Self::AxisOutOfBounds { axis, ndim } => {
                write!(f, "axis {axis} out of bounds for ndim={ndim}")
            }
            Self::RankTooLow { op, rank, required } => {
                write!(f, "{op} requires rank >= {required}, got rank {rank}")
            }
        }
    }
}

impl std::error::Error for UFuncError {}

impl UFuncError {
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Shape(_) => "ufunc_shape_contract_violation",
            Self::InvalidInputLength { .. } => "ufunc_invalid_input_length",
            Self::AxisOutOfBounds { .. } => "ufunc_axis_out_of_bounds",
            Self::RankTooLow { .. } => "ufunc_rank_too_low",
        }
    }
}

impl From<ShapeError> for UFuncError {
    fn from(err: ShapeError) -> Self {
        Self::Shape(err)
    }
}

/// Dense row-major tensor. Values are held as f64 and kept representable
/// in `dtype` by every transform.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    values: Vec<f64>,
    dtype: DType,
}

impl Tensor {
    pub fn new(shape: Vec<usize>, values: Vec<f64>, dtype: DType) -> Result<Self, UFuncError> {
        let expected = element_count(&shape)?;
        if values.len() != expected {
            return Err(UFuncError::InvalidInputLength {
                expected,
                actual: values.len(),
            });
        }
        let values = values.into_iter().map(|v| dtype.quantize(v)).collect();
        Ok(Self {
            shape,
            values,
            dtype,
        })
    }

    #[must_use]
    pub fn scalar(value: f64, dtype: DType) -> Self {
        Self {
            shape: Vec::new(),
            values: vec![dtype.quantize(value)],
            dtype,
        }
    }

    pub fn full(shape: Vec<usize>, value: f64, dtype: DType) -> Result<Self, UFuncError> {
        let count = element_count(&shape)?;
        Self::new(shape, vec![value; count], dtype)
    }

    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    #[must_use]
    pub fn into_values(self) -> Vec<f64> {
        self.values
    }

    #[must_use]
    pub const fn dtype(&self) -> DType {
        self.dtype
    }

    #[must_use]
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    #[must_use]
    pub fn all_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }

    #[must_use]
    pub fn elementwise_unary(&self, op: UnaryOp) -> Self {
        self.map(|v| op.apply(v))
    }

    #[must_use]
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        let values = self
            .values
            .iter()
            .map(|&v| self.dtype.quantize(f(v)))
            .collect();
        Self {
            shape: self.shape.clone(),
            values,
            dtype: self.dtype,
        }
    }

    #[must_use]
    pub fn add_scalar(&self, rhs: f64) -> Self {
        self.map(|v| v + rhs)
    }

    #[must_use]
    pub fn mul_scalar(&self, rhs: f64) -> Self {
        self.map(|v| v * rhs)
    }

    /// Replaces every element equal to `target` with `replacement`.
    #[must_use]
    pub fn where_equal(&self, target: f64, replacement: f64) -> Self {
        self.map(|v| if v == target { replacement } else { v })
    }

    pub fn elementwise_binary(&self, rhs: &Self, op: BinaryOp) -> Result<Self, UFuncError> {
        let out_shape = broadcast_shape(&self.shape, &rhs.shape)?;
        let out_count = element_count(&out_shape)?;
        let out_dtype = promote(self.dtype, rhs.dtype);

        if self.shape == rhs.shape {
            let values = self
                .values
                .iter()
                .zip(&rhs.values)
                .map(|(&lhs, &rhs)| out_dtype.quantize(op.apply(lhs, rhs)))
                .collect::<Vec<_>>();
            return Ok(Self {
                shape: out_shape,
                values,
                dtype: out_dtype,
            });
        }

        let lhs_steps = aligned_broadcast_axis_steps(
            out_shape.len(),
            &self.shape,
            &contiguous_strides_elems(&self.shape),
        );
        let rhs_steps = aligned_broadcast_axis_steps(
            out_shape.len(),
            &rhs.shape,
            &contiguous_strides_elems(&rhs.shape),
        );

        let mut out_multi = vec![0usize; out_shape.len()];
        let mut lhs_flat = 0usize;
        let mut rhs_flat = 0usize;
        let mut out_values = Vec::with_capacity(out_count);

        for flat in 0..out_count {
            out_values.push(out_dtype.quantize(op.apply(self.values[lhs_flat], rhs.values[rhs_flat])));

            // Odometer increment; source offsets follow incrementally.
            if flat + 1 == out_count || out_shape.is_empty() {
                continue;
            }

            for axis in (0..out_shape.len()).rev() {
                out_multi[axis] += 1;
                lhs_flat += lhs_steps[axis];
                rhs_flat += rhs_steps[axis];

                if out_multi[axis] < out_shape[axis] {
                    break;
                }

                out_multi[axis] = 0;
                lhs_flat -= lhs_steps[axis] * out_shape[axis];
                rhs_flat -= rhs_steps[axis] * out_shape[axis];
            }
        }

        Ok(Self {
            shape: out_shape,
            values: out_values,
            dtype: out_dtype,
        })
    }

    /// Applies `f` to every lane along the last axis. All lanes must come
    /// back with the same length, which becomes the new last-axis size.
    pub fn map_last_axis(
        &self,
        op: &'static str,
        f: impl Fn(&[f64]) -> Vec<f64>,
    ) -> Result<Self, UFuncError> {
        let Some((&lane_len, batch)) = self.shape.split_last() else {
            return Err(UFuncError::RankTooLow {
                op,
                rank: 0,
                required: 1,
            });
        };
        let lanes = element_count(batch)?;
        let mut out_len = None;
        let mut values = Vec::new();
        for lane_idx in 0..lanes {
            let lane = &self.values[lane_idx * lane_len..(lane_idx + 1) * lane_len];
            let mapped = f(lane);
            match out_len {
                None => out_len = Some(mapped.len()),
                Some(len) if len != mapped.len() => {
                    return Err(UFuncError::InvalidInputLength {
                        expected: len,
                        actual: mapped.len(),
                    });
                }
                Some(_) => {}
            }
            values.extend(mapped.into_iter().map(|v| self.dtype.quantize(v)));
        }
        // No lanes observed: use a zero-filled lane for the output length.
        let out_len = out_len.unwrap_or_else(|| f(&vec![0.0; lane_len]).len());
        let mut shape = batch.to_vec();
        shape.push(out_len);
        Ok(Self {
            shape,
            values,
            dtype: self.dtype,
        })
    }

    /// Running sum along the last axis.
    pub fn cumsum_last_axis(&self) -> Result<Self, UFuncError> {
        self.map_last_axis("cumsum", |lane| {
            lane.iter()
                .scan(0.0, |acc, &v| {
                    *acc += v;
                    Some(*acc)
                })
                .collect()
        })
    }

    /// Appends `value` to the end of every last-axis lane.
    pub fn append_last_axis(&self, value: f64) -> Result<Self, UFuncError> {
        self.map_last_axis("append", |lane| {
            let mut out = lane.to_vec();
            out.push(value);
            out
        })
    }

    /// Divides every last-axis lane by its L1 norm.
    pub fn l1_normalize_last_axis(&self) -> Result<Self, UFuncError> {
        self.map_last_axis("l1_normalize", |lane| {
            let norm: f64 = lane.iter().map(|v| v.abs()).sum();
            lane.iter().map(|v| v / norm).collect()
        })
    }

    pub fn reduce_max(&self, axis: usize, keepdims: bool) -> Result<Self, UFuncError> {
        if axis >= self.shape.len() {
            return Err(UFuncError::AxisOutOfBounds {
                axis,
                ndim: self.shape.len(),
            });
        }
        let out_shape = reduced_shape(&self.shape, axis, keepdims);
        let out_count = element_count(&out_shape)?;
        let mut out_values = vec![f64::NEG_INFINITY; out_count];
        reduce_fold_axis_contiguous(&self.values, &self.shape, axis, &mut out_values, f64::max);
        Ok(Self {
            shape: out_shape,
            values: out_values,
            dtype: self.dtype,
        })
    }
}

#[must_use]
fn aligned_broadcast_axis_steps(
    out_ndim: usize,
    src_shape: &[usize],
    src_strides: &[usize],
) -> Vec<usize> {
    if out_ndim == 0 {
        return Vec::new();
    }

    let mut axis_steps = vec![0usize; out_ndim];
    let offset = out_ndim - src_shape.len();

    for (axis, (&dim, &stride)) in src_shape.iter().zip(src_strides).enumerate() {
        axis_steps[axis + offset] = if dim == 1 { 0 } else { stride };
    }

    axis_steps
}

fn reduce_fold_axis_contiguous(
    values: &[f64],
    shape: &[usize],
    axis: usize,
    out_values: &mut [f64],
    fold: impl Fn(f64, f64) -> f64,
) {
    debug_assert!(axis < shape.len());
    if out_values.is_empty() {
        return;
    }

    let axis_len = shape[axis];
    if axis_len == 0 {
        return;
    }

    let inner = shape[axis + 1..].iter().copied().product::<usize>();
    let outer = shape[..axis].iter().copied().product::<usize>();

    let mut out_flat = 0usize;
    for outer_idx in 0..outer {
        let base = outer_idx * axis_len * inner;
        for inner_idx in 0..inner {
            let mut offset = base + inner_idx;
            let mut acc = values[offset];
            offset += inner;
            for _ in 1..axis_len {
                acc = fold(acc, values[offset]);
                offset += inner;
            }
            out_values[out_flat] = acc;
            out_flat += 1;
        }
    }
}

fn reduced_shape(shape: &[usize], axis: usize, keepdims: bool) -> Vec<usize> {
    if keepdims {
        shape
            .iter()
            .enumerate()
            .map(|(idx, &dim)| if idx == axis { 1 } else { dim })
            .collect()
    } else {
        shape
            .iter()
            .enumerate()
            .filter_map(|(idx, &dim)| (idx != axis).then_some(dim))
            .collect()
    }
}
