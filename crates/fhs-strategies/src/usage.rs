//! Counting how often instrumented handles are materialised.
//!
//! A [`UsageTable`] is created by the caller and handed to whatever creates
//! handles. [`UsageTable::measure`] swaps in an empty count map for the
//! duration of one scope, so nothing recorded before the scope leaks into
//! its verdict.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::error::StrategyError;

/// Materialisations each handle may see inside one measured scope.
pub const DEFAULT_MAX_PERMISSIBLE: usize = 2;

type UsageKey = (u64, String);

#[derive(Debug, Default)]
struct UsageState {
    next_id: Cell<u64>,
    counts: RefCell<BTreeMap<UsageKey, usize>>,
}

/// Shared count map. Cloning yields another view of the same table.
#[derive(Debug, Clone, Default)]
pub struct UsageTable {
    state: Rc<UsageState>,
}

/// Identity of one instrumented value inside a [`UsageTable`].
#[derive(Debug, Clone)]
pub struct UsageHandle {
    id: u64,
    name: String,
    table: UsageTable,
}

impl UsageHandle {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    pub fn record(&self) {
        let mut counts = self.table.state.counts.borrow_mut();
        *counts.entry((self.id, self.name.clone())).or_insert(0) += 1;
    }

    /// Materialisations recorded in the current scope.
    #[must_use]
    pub fn count(&self) -> usize {
        self.table
            .state
            .counts
            .borrow()
            .get(&(self.id, self.name.clone()))
            .copied()
            .unwrap_or(0)
    }
}

impl UsageTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh handle. Two handles never share an id, even with equal names.
    #[must_use]
    pub fn handle(&self, name: &str) -> UsageHandle {
        let id = self.state.next_id.get();
        self.state.next_id.set(id + 1);
        UsageHandle {
            id,
            name: name.to_string(),
            table: self.clone(),
        }
    }

    /// Counts keyed `name#id`.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, usize> {
        labelled(&self.state.counts.borrow())
    }

    /// Runs `body` against an empty count map and fails with
    /// [`StrategyError::ExcessiveUsage`] if any handle was materialised more
    /// than `max_permissible` times. An error from `body` wins over the
    /// usage verdict. The previous counts are restored afterwards, also when
    /// `body` panics.
    pub fn measure<T>(
        &self,
        scope: &str,
        max_permissible: usize,
        body: impl FnOnce() -> Result<T, StrategyError>,
    ) -> Result<T, StrategyError> {
        let guard = ScopeGuard::enter(&self.state.counts);
        let result = body();
        let scoped = guard.exit();
        let value = result?;
        if scoped.values().any(|&count| count > max_permissible) {
            return Err(StrategyError::ExcessiveUsage {
                scope: scope.to_string(),
                max_permissible,
                counts: labelled(&scoped),
            });
        }
        Ok(value)
    }
}

/// Holds the outer counts of a measured scope and puts them back on exit or
/// unwind.
struct ScopeGuard<'a> {
    counts: &'a RefCell<BTreeMap<UsageKey, usize>>,
    outer: Option<BTreeMap<UsageKey, usize>>,
}

impl<'a> ScopeGuard<'a> {
    fn enter(counts: &'a RefCell<BTreeMap<UsageKey, usize>>) -> Self {
        let outer = counts.replace(BTreeMap::new());
        Self {
            counts,
            outer: Some(outer),
        }
    }

    /// Restores the outer counts and returns the ones recorded in the scope.
    fn exit(mut self) -> BTreeMap<UsageKey, usize> {
        let outer = self.outer.take().unwrap_or_default();
        self.counts.replace(outer)
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        if let Some(outer) = self.outer.take() {
            if let Ok(mut counts) = self.counts.try_borrow_mut() {
                *counts = outer;
            }
        }
    }
}

fn labelled(counts: &BTreeMap<UsageKey, usize>) -> BTreeMap<String, usize> {
    counts
        .iter()
        .map(|((id, name), count)| (format!("{name}#{id}"), *count))
        .collect()
}
