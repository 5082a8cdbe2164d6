#![forbid(unsafe_code)]

/// Fully defined array shape: one size per axis, outermost first.
pub type Shape = Vec<usize>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShapeError {
    Overflow,
    IncompatibleBroadcast { lhs: Vec<usize>, rhs: Vec<usize> },
    RankTooLow { rank: usize, required: usize },
}

impl ShapeError {
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Overflow => "shape_size_overflow",
            Self::IncompatibleBroadcast { .. } => "shape_broadcast_incompatible",
            Self::RankTooLow { .. } => "shape_rank_too_low",
        }
    }
}

impl std::fmt::Display for ShapeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Overflow => write!(f, "size arithmetic overflow"),
            Self::IncompatibleBroadcast { lhs, rhs } => {
                write!(f, "cannot broadcast {:?} with {:?}", lhs, rhs)
            }
            Self::RankTooLow { rank, required } => {
                write!(f, "rank {rank} is below the required rank {required}")
            }
        }
    }
}

impl std::error::Error for ShapeError {}

pub fn broadcast_shape(lhs: &[usize], rhs: &[usize]) -> Result<Shape, ShapeError> {
    let nd = lhs.len().max(rhs.len());
    let mut out = Vec::with_capacity(nd);

    for idx in 0..nd {
        let l = *lhs.get(lhs.len().wrapping_sub(1 + idx)).unwrap_or(&1);
        let r = *rhs.get(rhs.len().wrapping_sub(1 + idx)).unwrap_or(&1);

        let merged = if l == r {
            l
        } else if l == 1 {
            r
        } else if r == 1 {
            l
        } else {
            return Err(ShapeError::IncompatibleBroadcast {
                lhs: lhs.to_vec(),
                rhs: rhs.to_vec(),
            });
        };

        out.push(merged);
    }

    out.reverse();
    Ok(out)
}

pub fn broadcast_shapes<S: AsRef<[usize]>>(shapes: &[S]) -> Result<Shape, ShapeError> {
    let mut acc = Vec::new();
    for shape in shapes {
        acc = broadcast_shape(&acc, shape.as_ref())?;
    }
    Ok(acc)
}

/// Left-pads `shape` with unit axes up to `rank`. Shapes already at or
/// above `rank` are returned unchanged.
#[must_use]
pub fn pad_to_rank(shape: &[usize], rank: usize) -> Shape {
    let pad = rank.saturating_sub(shape.len());
    let mut out = vec![1; pad];
    out.extend_from_slice(shape);
    out
}

/// The trailing `rank` axes of `shape`.
pub fn trailing_axes(shape: &[usize], rank: usize) -> Result<&[usize], ShapeError> {
    if rank > shape.len() {
        return Err(ShapeError::RankTooLow {
            rank: shape.len(),
            required: rank,
        });
    }
    Ok(&shape[shape.len() - rank..])
}

pub fn element_count(shape: &[usize]) -> Result<usize, ShapeError> {
    shape.iter().try_fold(1usize, |acc, &dim| {
        acc.checked_mul(dim).ok_or(ShapeError::Overflow)
    })
}

/// Row-major strides measured in elements.
#[must_use]
pub fn contiguous_strides_elems(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![0usize; shape.len()];
    let mut stride = 1usize;
    for (i, &dim) in shape.iter().enumerate().rev() {
        strides[i] = stride;
        stride = stride.saturating_mul(dim);
    }
    strides
}
