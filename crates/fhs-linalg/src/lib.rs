#![forbid(unsafe_code)]

//! Batched matrix transforms over the trailing two axes of a [`Tensor`].

use core::fmt;

use fhs_ndarray::element_count;
use fhs_ufunc::{Tensor, UFuncError};

/// Message the Cholesky kernel reports on a non-positive-definite input.
pub const CHOLESKY_FAILURE_MESSAGE: &str =
    "Cholesky decomposition was not successful. The input might not be valid.";

/// A QR column whose residual falls below this fraction of its original
/// norm is treated as linearly dependent on the earlier columns.
const QR_RANK_TOLERANCE: f64 = 1e3 * f64::EPSILON;

pub const LINALG_REASON_CODES: [&str; 3] = [
    "linalg_shape_contract_violation",
    "linalg_cholesky_contract_violation",
    "linalg_ufunc_failure",
];

#[derive(Debug, Clone, PartialEq)]
pub enum LinAlgError {
    ShapeContractViolation(&'static str),
    CholeskyContractViolation(&'static str),
    Ufunc(UFuncError),
}

impl LinAlgError {
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::ShapeContractViolation(_) => "linalg_shape_contract_violation",
            Self::CholeskyContractViolation(_) => "linalg_cholesky_contract_violation",
            Self::Ufunc(_) => "linalg_ufunc_failure",
        }
    }
}

impl fmt::Display for LinAlgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShapeContractViolation(msg) => write!(f, "{msg}"),
            Self::CholeskyContractViolation(msg) => write!(f, "{msg}"),
            Self::Ufunc(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for LinAlgError {}

impl From<UFuncError> for LinAlgError {
    fn from(err: UFuncError) -> Self {
        Self::Ufunc(err)
    }
}

/// Batch shape and trailing matrix dimensions of a stacked-matrix shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixStack {
    pub batch: Vec<usize>,
    pub rows: usize,
    pub cols: usize,
}

impl MatrixStack {
    fn count(&self) -> Result<usize, LinAlgError> {
        element_count(&self.batch).map_err(|err| LinAlgError::Ufunc(err.into()))
    }

    fn shape(&self, rows: usize, cols: usize) -> Vec<usize> {
        let mut shape = self.batch.clone();
        shape.push(rows);
        shape.push(cols);
        shape
    }
}

pub fn validate_matrix_shape(shape: &[usize]) -> Result<MatrixStack, LinAlgError> {
    if shape.len() < 2 {
        return Err(LinAlgError::ShapeContractViolation(
            "linalg input must be at least 2D",
        ));
    }
    let (batch, matrix) = shape.split_at(shape.len() - 2);
    Ok(MatrixStack {
        batch: batch.to_vec(),
        rows: matrix[0],
        cols: matrix[1],
    })
}

pub fn validate_square_matrix(shape: &[usize]) -> Result<MatrixStack, LinAlgError> {
    let stack = validate_matrix_shape(shape)?;
    if stack.rows != stack.cols {
        return Err(LinAlgError::ShapeContractViolation(
            "expected square trailing matrix dimensions",
        ));
    }
    Ok(stack)
}

/// Runs `kernel` over every matrix in the stack, each given as a row-major
/// slice, and reassembles the `(rows, cols)`-shaped results.
fn map_matrices(
    x: &Tensor,
    out_rows: usize,
    out_cols: usize,
    mut kernel: impl FnMut(&[f64]) -> Result<Vec<f64>, LinAlgError>,
) -> Result<Tensor, LinAlgError> {
    let stack = validate_matrix_shape(x.shape())?;
    let per = stack.rows * stack.cols;
    let mut values = Vec::with_capacity(stack.count()? * out_rows * out_cols);
    for idx in 0..stack.count()? {
        values.extend(kernel(&x.values()[idx * per..(idx + 1) * per])?);
    }
    Ok(Tensor::new(stack.shape(out_rows, out_cols), values, x.dtype())?)
}

pub fn matrix_transpose(x: &Tensor) -> Result<Tensor, LinAlgError> {
    let stack = validate_matrix_shape(x.shape())?;
    let (m, n) = (stack.rows, stack.cols);
    map_matrices(x, n, m, |a| {
        let mut out = vec![0.0; m * n];
        for i in 0..m {
            for j in 0..n {
                out[j * m + i] = a[i * n + j];
            }
        }
        Ok(out)
    })
}

/// `x @ xᵀ` for every matrix in the stack.
pub fn matmul_transpose_b(x: &Tensor) -> Result<Tensor, LinAlgError> {
    let stack = validate_matrix_shape(x.shape())?;
    let (m, n) = (stack.rows, stack.cols);
    map_matrices(x, m, m, |a| {
        let mut out = vec![0.0; m * m];
        for i in 0..m {
            for j in 0..m {
                out[i * m + j] = (0..n).map(|k| a[i * n + k] * a[j * n + k]).sum();
            }
        }
        Ok(out)
    })
}

/// Batched `lhs @ rhs`; both operands must share one batch shape.
pub fn matmul(lhs: &Tensor, rhs: &Tensor) -> Result<Tensor, LinAlgError> {
    let l = validate_matrix_shape(lhs.shape())?;
    let r = validate_matrix_shape(rhs.shape())?;
    if l.batch != r.batch || l.cols != r.rows {
        return Err(LinAlgError::ShapeContractViolation(
            "matmul operands have incompatible shapes",
        ));
    }
    let (m, k, n) = (l.rows, l.cols, r.cols);
    let rhs_values = rhs.values();
    let mut idx = 0usize;
    map_matrices(lhs, m, n, |a| {
        let b = &rhs_values[idx * k * n..(idx + 1) * k * n];
        idx += 1;
        let mut out = vec![0.0; m * n];
        for i in 0..m {
            for j in 0..n {
                out[i * n + j] = (0..k).map(|p| a[i * k + p] * b[p * n + j]).sum();
            }
        }
        Ok(out)
    })
}

/// `x + alpha * I` on every square matrix.
pub fn add_scaled_identity(x: &Tensor, alpha: f64) -> Result<Tensor, LinAlgError> {
    let stack = validate_square_matrix(x.shape())?;
    let n = stack.rows;
    map_matrices(x, n, n, |a| {
        let mut out = a.to_vec();
        for i in 0..n {
            out[i * n + i] += alpha;
        }
        Ok(out)
    })
}

/// Keeps the band of `num_lower` sub-diagonals and `num_upper`
/// super-diagonals; `None` keeps that whole triangle.
pub fn band_part(
    x: &Tensor,
    num_lower: Option<usize>,
    num_upper: Option<usize>,
) -> Result<Tensor, LinAlgError> {
    let stack = validate_matrix_shape(x.shape())?;
    let (m, n) = (stack.rows, stack.cols);
    map_matrices(x, m, n, |a| {
        let mut out = a.to_vec();
        for i in 0..m {
            for j in 0..n {
                let below = i.saturating_sub(j);
                let above = j.saturating_sub(i);
                let keep = num_lower.is_none_or(|k| below <= k)
                    && num_upper.is_none_or(|k| above <= k);
                if !keep {
                    out[i * n + j] = 0.0;
                }
            }
        }
        Ok(out)
    })
}

/// Main diagonal of every matrix, shape `batch + [min(rows, cols)]`.
pub fn diag_part(x: &Tensor) -> Result<Tensor, LinAlgError> {
    let stack = validate_matrix_shape(x.shape())?;
    let (m, n) = (stack.rows, stack.cols);
    let k = m.min(n);
    let per = m * n;
    let mut values = Vec::with_capacity(stack.count()? * k);
    for idx in 0..stack.count()? {
        let a = &x.values()[idx * per..(idx + 1) * per];
        values.extend((0..k).map(|i| a[i * n + i]));
    }
    let mut shape = stack.batch;
    shape.push(k);
    Ok(Tensor::new(shape, values, x.dtype())?)
}

/// Replaces the main diagonal of every matrix with `diag`, which must have
/// the shape [`diag_part`] returns.
pub fn set_diag(x: &Tensor, diag: &Tensor) -> Result<Tensor, LinAlgError> {
    let stack = validate_matrix_shape(x.shape())?;
    let (m, n) = (stack.rows, stack.cols);
    let k = m.min(n);
    let mut expected = stack.batch.clone();
    expected.push(k);
    if diag.shape() != expected.as_slice() {
        return Err(LinAlgError::ShapeContractViolation(
            "set_diag diagonal shape does not match the matrix stack",
        ));
    }
    let diag_values = diag.values();
    let mut idx = 0usize;
    map_matrices(x, m, n, |a| {
        let mut out = a.to_vec();
        for i in 0..k {
            out[i * n + i] = diag_values[idx * k + i];
        }
        idx += 1;
        Ok(out)
    })
}

/// Lower Cholesky factor of every symmetric positive-definite matrix.
pub fn cholesky(x: &Tensor) -> Result<Tensor, LinAlgError> {
    let stack = validate_square_matrix(x.shape())?;
    let n = stack.rows;
    map_matrices(x, n, n, |a| {
        let mut l = vec![0.0; n * n];
        for j in 0..n {
            let mut diag = a[j * n + j];
            for k in 0..j {
                diag -= l[j * n + k] * l[j * n + k];
            }
            if !diag.is_finite() || diag <= 0.0 {
                return Err(LinAlgError::CholeskyContractViolation(
                    CHOLESKY_FAILURE_MESSAGE,
                ));
            }
            let ljj = diag.sqrt();
            l[j * n + j] = ljj;
            for i in j + 1..n {
                let mut v = a[i * n + j];
                for k in 0..j {
                    v -= l[i * n + k] * l[j * n + k];
                }
                l[i * n + j] = v / ljj;
            }
        }
        Ok(l)
    })
}

/// Reduced QR factorisation `x = q r` by modified Gram-Schmidt with one
/// reorthogonalisation pass, with `r` carrying a non-negative diagonal.
/// Rank-deficient columns get a unit vector orthogonal to the preceding ones.
pub fn qr(x: &Tensor) -> Result<(Tensor, Tensor), LinAlgError> {
    let stack = validate_matrix_shape(x.shape())?;
    let (m, n) = (stack.rows, stack.cols);
    let k = m.min(n);
    let per = m * n;
    let mut q_values = Vec::with_capacity(stack.count()? * m * k);
    let mut r_values = Vec::with_capacity(stack.count()? * k * n);
    for idx in 0..stack.count()? {
        let a = &x.values()[idx * per..(idx + 1) * per];
        let (q, r) = qr_single(a, m, n);
        q_values.extend(q);
        r_values.extend(r);
    }
    let q = Tensor::new(stack.shape(m, k), q_values, x.dtype())?;
    let r = Tensor::new(stack.shape(k, n), r_values, x.dtype())?;
    Ok((q, r))
}

fn qr_single(a: &[f64], m: usize, n: usize) -> (Vec<f64>, Vec<f64>) {
    let k = m.min(n);
    // Column-major working copies of q's columns.
    let mut q_cols: Vec<Vec<f64>> = Vec::with_capacity(k);
    let mut r = vec![0.0; k * n];
    for j in 0..n {
        let mut v: Vec<f64> = (0..m).map(|i| a[i * n + j]).collect();
        let column_norm = dot(&v, &v).sqrt();
        for _ in 0..2 {
            for (p, qp) in q_cols.iter().enumerate() {
                let proj = dot(qp, &v);
                r[p * n + j] += proj;
                axpy(-proj, qp, &mut v);
            }
        }
        if j < k {
            let norm = dot(&v, &v).sqrt();
            if norm > QR_RANK_TOLERANCE * column_norm {
                v.iter_mut().for_each(|x| *x /= norm);
                r[j * n + j] = norm;
            } else {
                v = orthogonal_unit(&q_cols, m);
                r[j * n + j] = 0.0;
            }
            q_cols.push(v);
        }
    }
    let mut q = vec![0.0; m * k];
    for (j, col) in q_cols.iter().enumerate() {
        for i in 0..m {
            q[i * k + j] = col[i];
        }
    }
    (q, r)
}

fn orthogonal_unit(basis: &[Vec<f64>], m: usize) -> Vec<f64> {
    for e in 0..m {
        let mut v = vec![0.0; m];
        v[e] = 1.0;
        for b in basis {
            let proj = dot(b, &v);
            axpy(-proj, b, &mut v);
        }
        let norm = dot(&v, &v).sqrt();
        if norm > 0.5 {
            v.iter_mut().for_each(|x| *x /= norm);
            return v;
        }
    }
    vec![0.0; m]
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn axpy(alpha: f64, x: &[f64], y: &mut [f64]) {
    for (yi, xi) in y.iter_mut().zip(x) {
        *yi = alpha.mul_add(*xi, *yi);
    }
}
