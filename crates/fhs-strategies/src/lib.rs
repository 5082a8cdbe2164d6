#![forbid(unsafe_code)]

//! Constrained random generation of array shapes, constrained tensors and
//! index expressions for property-based tests of numeric code.
//!
//! Every generator draws through [`fhs_random::Draw`], so the same seed
//! reproduces the same values. Generators report
//! [`StrategyError::Discarded`] when a draw should be abandoned and retried;
//! every other error is a caller bug.

pub mod broadcast;
pub mod config;
pub mod constraints;
pub mod discard;
pub mod error;
pub mod params;
pub mod proptest_bridge;
pub mod sampler;
pub mod slices;
pub mod support;
pub mod usage;

pub use broadcast::{broadcast_compatible_shape, broadcasting_named_shapes, broadcasting_shapes};
pub use config::GenerationConfig;
pub use constraints::{
    Constrainer, ensure_high_gt_low, lower_tril, lower_tril_positive_definite, orthonormal,
    positive_definite, softplus_plus_eps, symmetric,
};
pub use discard::{
    BackendError, BackendErrorKind, finite_ground_truth_only, no_cholesky_decomposition_errors,
    no_rank_errors,
};
pub use error::{STRATEGY_REASON_CODES, StrategyError};
pub use params::{
    MaybeVariable, ParamStrategyFn, ParamsRequest, Variable, broadcasting_params, maybe_variable,
    select_params,
};
pub use sampler::{ElementStrategy, ShapeBounds, constrained_tensors, shapes, tensors_in_support};
pub use slices::{SliceExpr, SliceItem, stringify_slices, valid_slices};
pub use support::{
    Support, SupportFamily, constrainer, constrainer_for_name, min_rank_for_support,
    min_rank_for_support_name,
};
pub use usage::{DEFAULT_MAX_PERMISSIBLE, UsageHandle, UsageTable};
