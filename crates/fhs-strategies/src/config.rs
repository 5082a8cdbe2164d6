use std::ops::RangeInclusive;

/// Largest total rank (batch plus event axes) a generated parameter may have
/// before the draw is discarded.
pub const DEFAULT_MAX_PARAM_RANK: usize = 5;
pub const DEFAULT_EVENT_DIM_RANGE: RangeInclusive<usize> = 2..=6;
/// Raw float elements are drawn from `[-bound, bound]`.
pub const DEFAULT_ELEMENT_BOUND: f64 = 200.0;
/// Without an explicit `max_side`, sides range over `min_side..=min_side + span`.
pub const DEFAULT_SIDE_SPAN: usize = 5;

/// Tunables of the generators. Everything here reflects limits of a numeric
/// backend rather than of the algorithms, so callers can move them.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    pub max_param_rank: usize,
    pub event_dim_range: RangeInclusive<usize>,
    pub element_bound: f64,
    pub side_span: usize,
    /// Check every constrained tensor for non-finite values.
    pub finite_check: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_param_rank: DEFAULT_MAX_PARAM_RANK,
            event_dim_range: DEFAULT_EVENT_DIM_RANGE,
            element_bound: DEFAULT_ELEMENT_BOUND,
            side_span: DEFAULT_SIDE_SPAN,
            finite_check: true,
        }
    }
}

impl GenerationConfig {
    #[must_use]
    pub fn with_max_param_rank(mut self, max_param_rank: usize) -> Self {
        self.max_param_rank = max_param_rank;
        self
    }

    #[must_use]
    pub fn without_finite_check(mut self) -> Self {
        self.finite_check = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::{DEFAULT_MAX_PARAM_RANK, DEFAULT_SIDE_SPAN, GenerationConfig};

    #[test]
    fn defaults_match_backend_limits() {
        let cfg = GenerationConfig::default();
        assert_eq!(cfg.max_param_rank, DEFAULT_MAX_PARAM_RANK);
        assert_eq!(cfg.event_dim_range, 2..=6);
        assert!((cfg.element_bound - 200.0).abs() < f64::EPSILON);
        assert_eq!(cfg.side_span, DEFAULT_SIDE_SPAN);
        assert!(cfg.finite_check);
    }

    #[test]
    fn builders_override_single_knobs() {
        let cfg = GenerationConfig::default()
            .with_max_param_rank(7)
            .without_finite_check();
        assert_eq!(cfg.max_param_rank, 7);
        assert!(!cfg.finite_check);
        assert_eq!(cfg.side_span, GenerationConfig::default().side_span);
    }
}
