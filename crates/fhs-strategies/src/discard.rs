//! Scoped guards that turn known backend numerical failures into discards.
//!
//! Each guard runs a body and inspects its failure. A failure whose category
//! and message match one of the guard's rules becomes
//! [`StrategyError::Discarded`]; anything else is returned unchanged.

use std::fmt;
use std::sync::OnceLock;

use fhs_linalg::LinAlgError;
use regex::Regex;

use crate::error::StrategyError;

/// Category of a failure raised by the numeric backend under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    Unimplemented,
    InvalidArgument,
    Value,
    Other,
}

impl BackendErrorKind {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Unimplemented => "unimplemented",
            Self::InvalidArgument => "invalid_argument",
            Self::Value => "value",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub message: String,
}

impl BackendError {
    #[must_use]
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error: {}", self.kind.name(), self.message)
    }
}

impl std::error::Error for BackendError {}

impl From<LinAlgError> for BackendError {
    fn from(err: LinAlgError) -> Self {
        match err {
            LinAlgError::CholeskyContractViolation(msg) => {
                Self::new(BackendErrorKind::InvalidArgument, format!("{msg} [Op:Cholesky]"))
            }
            LinAlgError::ShapeContractViolation(msg) => {
                Self::new(BackendErrorKind::InvalidArgument, msg)
            }
            LinAlgError::Ufunc(err) => Self::new(BackendErrorKind::Other, err.to_string()),
        }
    }
}

#[derive(Debug)]
struct DiscardRule {
    kind: BackendErrorKind,
    pattern: Regex,
    reason: &'static str,
}

impl DiscardRule {
    fn matches(&self, err: &BackendError) -> bool {
        err.kind == self.kind && self.pattern.is_match(&err.message)
    }
}

const CHOLESKY_MESSAGE: &str =
    "Cholesky decomposition was not successful. The input might not be valid. [Op:Cholesky]";
const NON_FINITE_GROUND_TRUTH: &str =
    "Cannot check accuracy if ground truth or derivatives are not finite";

/// Matches "Broadcast between [..] and [..] is not supported yet" where the
/// shapes have at least `left_rank` and `right_rank` axes.
fn rank_broadcasting_pattern(left_rank: usize, right_rank: usize) -> String {
    format!(
        r"Broadcast between \[([0-9]*,){{{},}}[0-9]*\] and \[([0-9]*,){{{},}}[0-9]*\] is not supported yet",
        left_rank - 1,
        right_rank - 1
    )
}

type RuleTable = Result<Vec<DiscardRule>, regex::Error>;

fn compile(specs: Vec<(BackendErrorKind, String, &'static str)>) -> RuleTable {
    specs
        .into_iter()
        .map(|(kind, pattern, reason)| {
            Ok(DiscardRule {
                kind,
                pattern: Regex::new(&pattern)?,
                reason,
            })
        })
        .collect()
}

fn resolve(table: &'static RuleTable) -> Result<&'static [DiscardRule], StrategyError> {
    table
        .as_ref()
        .map(Vec::as_slice)
        .map_err(|err| StrategyError::InvalidDiscardRule(err.to_string()))
}

fn rank_rules() -> Result<&'static [DiscardRule], StrategyError> {
    static RULES: OnceLock<RuleTable> = OnceLock::new();
    resolve(RULES.get_or_init(|| {
        use BackendErrorKind::{InvalidArgument, Unimplemented, Value};
        compile(vec![
            (
                Unimplemented,
                rank_broadcasting_pattern(1, 6),
                "broadcast against a tensor of rank >= 6",
            ),
            (
                Unimplemented,
                rank_broadcasting_pattern(6, 1),
                "broadcast against a tensor of rank >= 6",
            ),
            (
                Unimplemented,
                r"Unhandled input dimensions (8|9|[1-9][0-9]+)".to_string(),
                "op on a tensor of rank >= 8",
            ),
            (
                Unimplemented,
                r"inputs rank not in \[0,([6-9]|[1-9][0-9]+)\]".to_string(),
                "op on a tensor of rank >= 7",
            ),
            (
                Unimplemented,
                r"is not implemented for tensors of rank > (8|9|[1-9][0-9]+).".to_string(),
                "op on a tensor of rank >= 8",
            ),
            (
                InvalidArgument,
                r"only support up to 7 input dimensions".to_string(),
                "op on a tensor of rank >= 8",
            ),
            (
                Value,
                r"does not work on tensors with more than (8|9|[1-9][0-9]+) dimensions"
                    .to_string(),
                "op on a tensor of rank >= 8",
            ),
        ])
    }))
}

fn cholesky_rules() -> Result<&'static [DiscardRule], StrategyError> {
    static RULES: OnceLock<RuleTable> = OnceLock::new();
    resolve(RULES.get_or_init(|| {
        compile(vec![(
            BackendErrorKind::InvalidArgument,
            regex::escape(CHOLESKY_MESSAGE),
            "cholesky decomposition failed",
        )])
    }))
}

fn finite_ground_truth_rules() -> Result<&'static [DiscardRule], StrategyError> {
    static RULES: OnceLock<RuleTable> = OnceLock::new();
    resolve(RULES.get_or_init(|| {
        compile(vec![(
            BackendErrorKind::InvalidArgument,
            NON_FINITE_GROUND_TRUTH.to_string(),
            "non-finite ground truth",
        )])
    }))
}

fn guarded<T, E>(
    rules: Result<&[DiscardRule], StrategyError>,
    body: impl FnOnce() -> Result<T, E>,
) -> Result<T, StrategyError>
where
    E: Into<StrategyError>,
{
    let rules = rules?;
    let err = match body() {
        Ok(value) => return Ok(value),
        Err(err) => err.into(),
    };
    let backend = match &err {
        StrategyError::Backend(backend) => Some(backend.clone()),
        StrategyError::LinAlg(linalg) => Some(BackendError::from(linalg.clone())),
        _ => None,
    };
    if let Some(rule) = backend.and_then(|backend| rules.iter().find(|r| r.matches(&backend))) {
        return Err(StrategyError::discard(rule.reason));
    }
    Err(err)
}

/// Discards trials that trip a backend rank ceiling.
pub fn no_rank_errors<T, E: Into<StrategyError>>(
    body: impl FnOnce() -> Result<T, E>,
) -> Result<T, StrategyError> {
    guarded(rank_rules(), body)
}

/// Discards trials whose Cholesky decomposition failed.
pub fn no_cholesky_decomposition_errors<T, E: Into<StrategyError>>(
    body: impl FnOnce() -> Result<T, E>,
) -> Result<T, StrategyError> {
    guarded(cholesky_rules(), body)
}

/// Discards trials whose high-precision reference was not finite.
pub fn finite_ground_truth_only<T, E: Into<StrategyError>>(
    body: impl FnOnce() -> Result<T, E>,
) -> Result<T, StrategyError> {
    guarded(finite_ground_truth_rules(), body)
}

#[cfg(test)]
mod tests {
    use super::{
        BackendError, BackendErrorKind, cholesky_rules, compile, finite_ground_truth_only,
        finite_ground_truth_rules, guarded, no_cholesky_decomposition_errors, no_rank_errors,
        rank_rules,
    };
    use crate::error::StrategyError;
    use fhs_dtype::DType;
    use fhs_linalg::cholesky;
    use fhs_ufunc::Tensor;

    fn fail(kind: BackendErrorKind, message: &str) -> Result<(), BackendError> {
        Err(BackendError::new(kind, message))
    }

    fn is_discard<T>(result: &Result<T, StrategyError>) -> bool {
        matches!(result, Err(StrategyError::Discarded(_)))
    }

    const RANK_RULE_COUNT: usize = 7;

    #[test]
    fn every_rule_compiles() {
        assert_eq!(rank_rules().expect("rank rules").len(), RANK_RULE_COUNT);
        assert_eq!(cholesky_rules().expect("cholesky rules").len(), 1);
        assert_eq!(finite_ground_truth_rules().expect("ground truth rules").len(), 1);
    }

    #[test]
    fn malformed_rule_patterns_are_fatal() {
        let table = compile(vec![
            (BackendErrorKind::Value, "fine".to_string(), "ok"),
            (BackendErrorKind::Value, "(unclosed".to_string(), "broken"),
        ]);
        let err = table.expect_err("unclosed group");
        let rules = Err(StrategyError::InvalidDiscardRule(err.to_string()));
        let mut ran = false;
        let result = guarded(rules, || {
            ran = true;
            fail(BackendErrorKind::Value, "fine")
        });
        assert!(!ran);
        let err = result.expect_err("broken table");
        assert_eq!(err.reason_code(), "strategy_invalid_discard_rule");
        assert!(!is_discard(&Err::<(), _>(err)));
    }

    #[test]
    fn rank_broadcast_limits_are_discarded_both_ways() {
        let low_high = "Broadcast between [3] and [1,2,3,4,5,6] is not supported yet";
        let high_low = "Broadcast between [1,1,1,1,1,2] and [2] is not supported yet";
        assert!(is_discard(&no_rank_errors(|| fail(
            BackendErrorKind::Unimplemented,
            low_high
        ))));
        assert!(is_discard(&no_rank_errors(|| fail(
            BackendErrorKind::Unimplemented,
            high_low
        ))));
        // Rank 5 against rank 1 is within limits and must surface.
        let within = "Broadcast between [3] and [1,2,3,4,5] is not supported yet";
        let err = no_rank_errors(|| fail(BackendErrorKind::Unimplemented, within))
            .expect_err("propagates");
        assert_eq!(
            err,
            StrategyError::Backend(BackendError::new(BackendErrorKind::Unimplemented, within))
        );
    }

    #[test]
    fn high_rank_op_messages_are_discarded() {
        use BackendErrorKind::{InvalidArgument, Unimplemented, Value};
        let cases = [
            (Unimplemented, "Unhandled input dimensions 9"),
            (Unimplemented, "Unhandled input dimensions 12"),
            (Unimplemented, "PadV2: inputs rank not in [0,6]"),
            (Unimplemented, "ReverseV2 is not implemented for tensors of rank > 8."),
            (InvalidArgument, "ArgMax: only support up to 7 input dimensions"),
            (Value, "reverse does not work on tensors with more than 8 dimensions"),
        ];
        for (kind, message) in cases {
            assert!(is_discard(&no_rank_errors(|| fail(kind, message))), "{message}");
        }
        // Right message, wrong category.
        let err = no_rank_errors(|| fail(Value, "Unhandled input dimensions 9"))
            .expect_err("category mismatch propagates");
        assert!(matches!(err, StrategyError::Backend(_)));
        let err = no_rank_errors(|| fail(Unimplemented, "Unhandled input dimensions 7"))
            .expect_err("rank 7 is handled");
        assert!(matches!(err, StrategyError::Backend(_)));
    }

    #[test]
    fn cholesky_failures_from_linalg_are_discarded() {
        let indefinite =
            Tensor::new(vec![2, 2], vec![1.0, 2.0, 2.0, 1.0], DType::F64).expect("tensor");
        let result = no_cholesky_decomposition_errors(|| cholesky(&indefinite));
        assert!(is_discard(&result));

        let pd = Tensor::new(vec![2, 2], vec![4.0, 2.0, 2.0, 3.0], DType::F64).expect("tensor");
        let l = no_cholesky_decomposition_errors(|| cholesky(&pd)).expect("factorizes");
        assert_eq!(l.shape(), &[2, 2]);

        // Other guards leave Cholesky failures alone.
        let err = no_rank_errors(|| cholesky(&indefinite)).expect_err("not a rank error");
        assert!(matches!(err, StrategyError::LinAlg(_)));
    }

    #[test]
    fn finite_ground_truth_guard() {
        let message = "numerics: Cannot check accuracy if ground truth or derivatives are not finite";
        assert!(is_discard(&finite_ground_truth_only(|| fail(
            BackendErrorKind::InvalidArgument,
            message
        ))));
        let err = finite_ground_truth_only(|| -> Result<(), StrategyError> {
            Err(StrategyError::UnsupportedDType(DType::I8))
        })
        .expect_err("unrelated failures propagate");
        assert_eq!(err, StrategyError::UnsupportedDType(DType::I8));
    }

    #[test]
    fn guards_nest() {
        let result = no_rank_errors(|| {
            no_cholesky_decomposition_errors(|| {
                fail(BackendErrorKind::Value, "does not work on tensors with more than 10 dimensions")
            })
        });
        assert!(is_discard(&result));
    }
}
