//! Named parameter sets whose batch shapes jointly broadcast to a target,
//! with mutually exclusive groups and optional variable wrapping.

use std::collections::{BTreeMap, BTreeSet};

use fhs_dtype::DType;
use fhs_random::{Draw, sampled_from};
use fhs_ufunc::Tensor;

use crate::broadcast::broadcasting_named_shapes;
use crate::config::GenerationConfig;
use crate::constraints::Constrainer;
use crate::error::StrategyError;
use crate::sampler::{constrained_tensors, draw_event_dim};
use crate::usage::{UsageHandle, UsageTable};

/// Replacement sampler for parameter values: `(draw, shape, dtype,
/// constrainer) -> tensor`.
pub type ParamStrategyFn<'a> =
    dyn Fn(&mut dyn Draw, &[usize], DType, &Constrainer) -> Result<Tensor, StrategyError> + 'a;

/// A mutable stand-in for a tensor, with an acceptable second value that
/// tests may switch to once.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub value: Tensor,
    pub alt_value: Tensor,
}

impl Variable {
    /// Swaps the current and alternate values.
    pub fn mutate(&mut self) {
        std::mem::swap(&mut self.value, &mut self.alt_value);
    }
}

/// A generated parameter: a plain tensor, a variable, or a variable whose
/// every materialisation is counted.
#[derive(Debug, Clone)]
pub enum MaybeVariable {
    Tensor(Tensor),
    Variable(Variable),
    Deferred {
        variable: Variable,
        usage: UsageHandle,
    },
}

impl MaybeVariable {
    /// The current value. Reading a deferred handle counts as one use.
    #[must_use]
    pub fn materialize(&self) -> Tensor {
        match self {
            Self::Tensor(value) => value.clone(),
            Self::Variable(variable) => variable.value.clone(),
            Self::Deferred { variable, usage } => {
                usage.record();
                variable.value.clone()
            }
        }
    }

    /// Shape of the current value; never counted.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        match self {
            Self::Tensor(value) => value.shape(),
            Self::Variable(variable) | Self::Deferred { variable, .. } => variable.value.shape(),
        }
    }

    #[must_use]
    pub fn variable(&self) -> Option<&Variable> {
        match self {
            Self::Tensor(_) => None,
            Self::Variable(variable) | Self::Deferred { variable, .. } => Some(variable),
        }
    }

    pub fn variable_mut(&mut self) -> Option<&mut Variable> {
        match self {
            Self::Tensor(_) => None,
            Self::Variable(variable) | Self::Deferred { variable, .. } => Some(variable),
        }
    }

    #[must_use]
    pub fn usage(&self) -> Option<&UsageHandle> {
        match self {
            Self::Deferred { usage, .. } => Some(usage),
            _ => None,
        }
    }
}

/// Draws a value with `strategy` and, when `enable_vars` is set, wraps it
/// on a coin flip into a [`Variable`] carrying a second draw, which a
/// further coin flip instruments against `usage`.
pub fn maybe_variable<F>(
    draw: &mut dyn Draw,
    name: &str,
    enable_vars: bool,
    usage: &UsageTable,
    mut strategy: F,
) -> Result<MaybeVariable, StrategyError>
where
    F: FnMut(&mut dyn Draw) -> Result<Tensor, StrategyError>,
{
    let value = strategy(draw)?;
    if !enable_vars || !draw.boolean() {
        return Ok(MaybeVariable::Tensor(value));
    }
    let alt_value = strategy(draw)?;
    let variable = Variable {
        name: name.to_string(),
        value,
        alt_value,
    };
    if draw.boolean() {
        Ok(MaybeVariable::Deferred {
            usage: usage.handle(name),
            variable,
        })
    } else {
        Ok(MaybeVariable::Variable(variable))
    }
}

fn identity_constraint(_: &str) -> Constrainer {
    Constrainer::Identity
}

/// Inputs to [`broadcasting_params`].
#[derive(Clone, Copy)]
pub struct ParamsRequest<'a> {
    pub batch_shape: &'a [usize],
    pub params_event_ndims: &'a BTreeMap<String, usize>,
    /// Size shared by every event axis; drawn when absent.
    pub event_dim: Option<usize>,
    pub enable_vars: bool,
    pub constraint_fn_for: &'a dyn Fn(&str) -> Constrainer,
    pub mutex_params: &'a [BTreeSet<String>],
    pub param_strategy_fn: Option<&'a ParamStrategyFn<'a>>,
    pub dtype: DType,
}

impl<'a> ParamsRequest<'a> {
    #[must_use]
    pub fn new(batch_shape: &'a [usize], params_event_ndims: &'a BTreeMap<String, usize>) -> Self {
        Self {
            batch_shape,
            params_event_ndims,
            event_dim: None,
            enable_vars: false,
            constraint_fn_for: &identity_constraint,
            mutex_params: &[],
            param_strategy_fn: None,
            dtype: DType::F32,
        }
    }

    #[must_use]
    pub fn with_mutex_params(mut self, mutex_params: &'a [BTreeSet<String>]) -> Self {
        self.mutex_params = mutex_params;
        self
    }

    #[must_use]
    pub fn with_constraints(mut self, constraint_fn_for: &'a dyn Fn(&str) -> Constrainer) -> Self {
        self.constraint_fn_for = constraint_fn_for;
        self
    }

    #[must_use]
    pub fn with_event_dim(mut self, event_dim: usize) -> Self {
        self.event_dim = Some(event_dim);
        self
    }

    #[must_use]
    pub fn with_vars(mut self, enable_vars: bool) -> Self {
        self.enable_vars = enable_vars;
        self
    }

    #[must_use]
    pub fn with_param_strategy(mut self, param_strategy_fn: &'a ParamStrategyFn<'a>) -> Self {
        self.param_strategy_fn = Some(param_strategy_fn);
        self
    }

    #[must_use]
    pub fn with_dtype(mut self, dtype: DType) -> Self {
        self.dtype = dtype;
        self
    }
}

impl std::fmt::Debug for ParamsRequest<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParamsRequest")
            .field("batch_shape", &self.batch_shape)
            .field("params_event_ndims", &self.params_event_ndims)
            .field("event_dim", &self.event_dim)
            .field("enable_vars", &self.enable_vars)
            .field("mutex_params", &self.mutex_params)
            .field("custom_strategy", &self.param_strategy_fn.is_some())
            .field("dtype", &self.dtype)
            .finish_non_exhaustive()
    }
}

/// Picks names one at a time from the sorted remaining candidates; each pick
/// removes every name sharing a mutex group with it.
pub fn select_params(
    draw: &mut dyn Draw,
    names: impl IntoIterator<Item = String>,
    mutex_params: &[BTreeSet<String>],
) -> Result<Vec<String>, StrategyError> {
    let mut remaining: BTreeSet<String> = names.into_iter().collect();
    let mut selected = Vec::with_capacity(remaining.len());
    while !remaining.is_empty() {
        let candidates: Vec<&String> = remaining.iter().collect();
        let param = (*sampled_from(draw, &candidates)?).clone();
        remaining.remove(&param);
        for group in mutex_params.iter().filter(|group| group.contains(&param)) {
            remaining.retain(|name| !group.contains(name));
        }
        selected.push(param);
    }
    Ok(selected)
}

/// Parameters whose batch shapes broadcast to `request.batch_shape`, each
/// followed by its event axes and pushed through its constrainer.
///
/// A parameter whose total rank exceeds `config.max_param_rank` discards the
/// whole draw.
pub fn broadcasting_params(
    draw: &mut dyn Draw,
    request: &ParamsRequest<'_>,
    usage: &UsageTable,
    config: &GenerationConfig,
) -> Result<BTreeMap<String, MaybeVariable>, StrategyError> {
    let event_dim = match request.event_dim {
        Some(event_dim) => event_dim,
        None => draw_event_dim(draw, config)?,
    };
    let selected = select_params(
        draw,
        request.params_event_ndims.keys().cloned(),
        request.mutex_params,
    )?;
    let batch_shapes = broadcasting_named_shapes(draw, request.batch_shape, &selected)?;

    let mut params = BTreeMap::new();
    for name in &selected {
        let event_ndims = request.params_event_ndims.get(name).copied().unwrap_or(0);
        let mut shape = batch_shapes[name].clone();
        shape.extend(std::iter::repeat_n(event_dim, event_ndims));
        if shape.len() > config.max_param_rank {
            return Err(StrategyError::discard(format!(
                "param {name} has rank {} > {}",
                shape.len(),
                config.max_param_rank
            )));
        }

        let constrainer = (request.constraint_fn_for)(name);
        let value = maybe_variable(draw, name, request.enable_vars, usage, |draw| {
            match request.param_strategy_fn {
                Some(strategy) => strategy(draw, &shape, request.dtype, &constrainer),
                None => {
                    constrained_tensors(draw, &constrainer, &shape, request.dtype, None, config)
                }
            }
        })?;
        params.insert(name.clone(), value);
    }
    Ok(params)
}
