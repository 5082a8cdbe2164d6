//! Multi-axis index expressions that are structurally legal for a shape.

use std::fmt;

use fhs_random::{Draw, lists};

use crate::error::StrategyError;

/// Range bounds and steps are drawn from `[-SLICE_BOUND, SLICE_BOUND]`, so
/// they often overshoot the axis.
pub const SLICE_BOUND: i64 = 100;
pub const MAX_NEW_AXES: usize = 3;
pub const ELLIPSIS_TOKEN: &str = "...";
pub const NEW_AXIS_TOKEN: &str = "newaxis";

/// One selector in an index expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceItem {
    Index(i64),
    Range {
        start: Option<i64>,
        stop: Option<i64>,
        step: Option<i64>,
    },
    NewAxis,
    Ellipsis,
}

impl SliceItem {
    /// Whether the selector addresses an existing axis.
    #[must_use]
    pub const fn consumes_axis(self) -> bool {
        matches!(self, Self::Index(_) | Self::Range { .. })
    }

    /// Parses a token written by [`stringify_slices`].
    pub fn from_token(token: &str) -> Result<Self, StrategyError> {
        let unrecognized = || StrategyError::UnrecognizedSelector(token.to_string());
        match token {
            ELLIPSIS_TOKEN => return Ok(Self::Ellipsis),
            NEW_AXIS_TOKEN => return Ok(Self::NewAxis),
            _ => {}
        }
        if !token.contains(':') {
            return token.parse().map(Self::Index).map_err(|_| unrecognized());
        }
        let parts: Vec<&str> = token.split(':').collect();
        if parts.len() > 3 {
            return Err(unrecognized());
        }
        let field = |idx: usize| -> Result<Option<i64>, StrategyError> {
            match parts.get(idx).copied().unwrap_or("") {
                "" => Ok(None),
                text => text.parse().map(Some).map_err(|_| unrecognized()),
            }
        };
        let step = field(2)?;
        if step == Some(0) {
            return Err(unrecognized());
        }
        Ok(Self::Range {
            start: field(0)?,
            stop: field(1)?,
            step,
        })
    }
}

impl fmt::Display for SliceItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let part = |v: &Option<i64>| v.map(|v| v.to_string()).unwrap_or_default();
        match self {
            Self::Index(idx) => write!(f, "{idx}"),
            Self::Range { start, stop, step } => {
                write!(f, "{}:{}:{}", part(start), part(stop), part(step))
            }
            Self::NewAxis => f.write_str(NEW_AXIS_TOKEN),
            Self::Ellipsis => f.write_str(ELLIPSIS_TOKEN),
        }
    }
}

/// A bare selector or a sequence of them. The two index an array the same
/// way but reach it through different calling conventions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SliceExpr {
    Single(SliceItem),
    Tuple(Vec<SliceItem>),
}

impl SliceExpr {
    #[must_use]
    pub fn items(&self) -> &[SliceItem] {
        match self {
            Self::Single(item) => std::slice::from_ref(item),
            Self::Tuple(items) => items,
        }
    }

    #[must_use]
    pub fn axes_consumed(&self) -> usize {
        self.items().iter().filter(|item| item.consumes_axis()).count()
    }

    /// Parses tokens as written by [`stringify_slices`] into a tuple.
    pub fn from_tokens<S: AsRef<str>>(tokens: &[S]) -> Result<Self, StrategyError> {
        tokens
            .iter()
            .map(|token| SliceItem::from_token(token.as_ref()))
            .collect::<Result<Vec<_>, _>>()
            .map(Self::Tuple)
    }
}

/// One token per selector: the integer, `start:stop:step` with unset
/// fields left empty, [`NEW_AXIS_TOKEN`] or [`ELLIPSIS_TOKEN`].
#[must_use]
pub fn stringify_slices(expr: &SliceExpr) -> Vec<String> {
    expr.items().iter().map(ToString::to_string).collect()
}

fn optional_bound(draw: &mut dyn Draw) -> Result<Option<i64>, StrategyError> {
    if draw.boolean() {
        return Ok(None);
    }
    Ok(Some(draw.integers(-SLICE_BOUND, SLICE_BOUND)?))
}

fn arbitrary_range(draw: &mut dyn Draw) -> Result<SliceItem, StrategyError> {
    let start = optional_bound(draw)?;
    let stop = optional_bound(draw)?;
    let step = if draw.boolean() {
        None
    } else {
        let magnitude = draw.integers(1, SLICE_BOUND)?;
        Some(if draw.boolean() { -magnitude } else { magnitude })
    };
    Ok(SliceItem::Range { start, stop, step })
}

/// An in-bounds index or an arbitrary range for an axis of size `side`.
/// Empty axes have no in-bounds index and always get a range.
fn axis_selector(draw: &mut dyn Draw, side: usize) -> Result<SliceItem, StrategyError> {
    if side > 0 && draw.boolean() {
        let idx = draw.sizes(0, side - 1)?;
        return Ok(SliceItem::Index(i64::try_from(idx).unwrap_or(i64::MAX)));
    }
    arbitrary_range(draw)
}

/// A slice expression legal for an array of shape `batch_shape`.
///
/// Up to `rank` selectors come first, then an optional ellipsis, then
/// selectors for as many of the remaining axes as are drawn; with an
/// ellipsis they bind to the trailing axes. Up to three new axes are then
/// spliced in, and a lone selector is sometimes returned bare.
pub fn valid_slices(
    draw: &mut dyn Draw,
    batch_shape: &[usize],
) -> Result<SliceExpr, StrategyError> {
    let rank = batch_shape.len();
    let mut items = Vec::new();

    let before = draw.sizes(0, rank)?;
    for &side in &batch_shape[..before] {
        items.push(axis_selector(draw, side)?);
    }

    let has_ellipsis = draw.boolean();
    let after = draw.sizes(0, rank - before)?;
    let remaining = if has_ellipsis {
        items.push(SliceItem::Ellipsis);
        rank - after..rank
    } else {
        before..before + after
    };
    for &side in &batch_shape[remaining] {
        items.push(axis_selector(draw, side)?);
    }

    let len = items.len();
    let mut positions = lists(draw, 0, MAX_NEW_AXES, |d| d.sizes(0, len))?;
    positions.sort_unstable();
    for pos in positions.into_iter().rev() {
        items.insert(pos, SliceItem::NewAxis);
    }

    if items.len() == 1 && draw.boolean() {
        return Ok(SliceExpr::Single(items[0]));
    }
    Ok(SliceExpr::Tuple(items))
}
