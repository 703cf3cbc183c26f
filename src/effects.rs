//! Effect summaries and the static effect registry.
//!
//! Positions are 1-based over the normalized positional argument list of a
//! call site.

use crate::ir::CallableRef;
use itertools::Itertools;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Module whose primitives the registry describes out of the box.
pub const CORE_MODULE: &str = "core";

// ============================================================================
// Position sets
// ============================================================================

/// A set of argument positions that may be open-ended, for variadic primitives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionSet {
    explicit: BTreeSet<usize>,
    /// Every position `>= rest_from` is included.
    rest_from: Option<usize>,
}

impl PositionSet {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn of(positions: &[usize]) -> Self {
        Self {
            explicit: positions.iter().copied().filter(|p| *p > 0).collect(),
            rest_from: None,
        }
    }

    pub fn from(start: usize) -> Self {
        Self {
            explicit: BTreeSet::new(),
            rest_from: Some(start.max(1)),
        }
    }

    pub fn all() -> Self {
        Self::from(1)
    }

    pub fn is_empty(&self) -> bool {
        self.explicit.is_empty() && self.rest_from.is_none()
    }

    pub fn contains(&self, position: usize) -> bool {
        self.explicit.contains(&position) || self.rest_from.is_some_and(|r| position >= r)
    }

    /// Concrete positions for a call with `arity` arguments.
    pub fn resolve(&self, arity: usize) -> BTreeSet<usize> {
        (1..=arity).filter(|p| self.contains(*p)).collect()
    }
}

impl fmt::Display for PositionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = self.explicit.iter().map(|p| p.to_string()).collect();
        if let Some(rest) = self.rest_from {
            parts.push(format!("{rest}.."));
        }
        write!(f, "{{{}}}", parts.join(", "))
    }
}

// ============================================================================
// Specs and summaries
// ============================================================================

/// Effects of a callable, independent of any particular call's arity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EffectSpec {
    #[serde(default)]
    pub writes: PositionSet,
    #[serde(default)]
    pub consumes: PositionSet,
    #[serde(default)]
    pub ret_aliases: PositionSet,
}

impl EffectSpec {
    /// No effect on tracked state; the result is fresh.
    pub fn pure() -> Self {
        Self::default()
    }

    pub fn writes(mut self, positions: PositionSet) -> Self {
        self.writes = positions;
        self
    }

    pub fn consumes(mut self, positions: PositionSet) -> Self {
        self.consumes = positions;
        self
    }

    pub fn ret_aliases(mut self, positions: PositionSet) -> Self {
        self.ret_aliases = positions;
        self
    }

    pub fn summarize(&self, arity: usize) -> EffectSummary {
        EffectSummary {
            writes: self.writes.resolve(arity),
            consumes: self.consumes.resolve(arity),
            ret_aliases: self.ret_aliases.resolve(arity),
            over_budget: false,
        }
    }
}

/// Effects of one call site or one analysed callee.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EffectSummary {
    pub writes: BTreeSet<usize>,
    pub consumes: BTreeSet<usize>,
    pub ret_aliases: BTreeSet<usize>,
    /// A recursive cycle was cut with a conservative placeholder.
    pub over_budget: bool,
}

impl EffectSummary {
    pub fn none() -> Self {
        Self::default()
    }

    /// Writes and consumes every position; the result aliases all of them.
    pub fn conservative(arity: usize) -> Self {
        let all: BTreeSet<usize> = (1..=arity).collect();
        Self {
            writes: all.clone(),
            consumes: all.clone(),
            ret_aliases: all,
            over_budget: false,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.writes.is_empty() && self.consumes.is_empty() && self.ret_aliases.is_empty()
    }

    /// The summary a caller should act on: over-budget summaries degrade to
    /// maximally consuming.
    pub fn effective(&self, arity: usize) -> EffectSummary {
        if self.over_budget {
            let mut conservative = Self::conservative(arity);
            conservative.over_budget = true;
            conservative
        } else {
            self.clone()
        }
    }
}

impl fmt::Display for EffectSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let set = |s: &BTreeSet<usize>| format!("{{{}}}", s.iter().join(", "));
        write!(
            f,
            "writes={} consumes={} ret_aliases={}",
            set(&self.writes),
            set(&self.consumes),
            set(&self.ret_aliases)
        )?;
        if self.over_budget {
            f.write_str(" (over budget)")?;
        }
        Ok(())
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Effect specs for primitives whose IR is not walked.
#[derive(Debug, Default)]
pub struct EffectRegistry {
    entries: RwLock<FxHashMap<CallableRef, EffectSpec>>,
}

impl EffectRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-populated with the `core` primitives.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        {
            let mut entries = registry.entries.write();
            for (name, spec) in builtin_specs() {
                entries.insert(CallableRef::new(CORE_MODULE, name), spec);
            }
        }
        registry
    }

    /// Add or replace the spec for `callable`. Returns the previous spec.
    pub fn register(&self, callable: CallableRef, spec: EffectSpec) -> Option<EffectSpec> {
        tracing::debug!(%callable, writes = %spec.writes, consumes = %spec.consumes, "registered effect spec");
        self.entries.write().insert(callable, spec)
    }

    pub fn lookup(&self, callable: &CallableRef) -> Option<EffectSpec> {
        self.entries.read().get(callable).cloned()
    }

    pub fn contains(&self, callable: &CallableRef) -> bool {
        self.entries.read().contains_key(callable)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn builtin_specs() -> Vec<(&'static str, EffectSpec)> {
    let one = || PositionSet::of(&[1]);
    vec![
        (
            "set_index",
            EffectSpec::pure().writes(one()).consumes(PositionSet::of(&[3])),
        ),
        (
            "set_field",
            EffectSpec::pure().writes(one()).consumes(PositionSet::of(&[3])),
        ),
        (
            "push",
            EffectSpec::pure()
                .writes(one())
                .consumes(PositionSet::from(2))
                .ret_aliases(one()),
        ),
        ("get_index", EffectSpec::pure().ret_aliases(one())),
        ("get_field", EffectSpec::pure().ret_aliases(one())),
        ("copy", EffectSpec::pure()),
        ("deep_copy", EffectSpec::pure()),
        ("tuple", EffectSpec::pure().ret_aliases(PositionSet::all())),
        ("vector", EffectSpec::pure().ret_aliases(PositionSet::all())),
        (
            "ptr_store",
            EffectSpec::pure().writes(one()).consumes(PositionSet::of(&[2])),
        ),
        ("store_global", EffectSpec::pure().consumes(PositionSet::of(&[2]))),
        ("identity", EffectSpec::pure().ret_aliases(one())),
        ("length", EffectSpec::pure()),
        ("print", EffectSpec::pure()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_ended_sets_resolve_against_arity() {
        let rest = PositionSet::from(2);
        assert!(rest.resolve(1).is_empty());
        assert_eq!(rest.resolve(4), BTreeSet::from([2, 3, 4]));
        assert!(PositionSet::of(&[0]).is_empty());
        assert_eq!(rest.to_string(), "{2..}");
    }

    #[test]
    fn builtins_cover_core_stores() {
        let registry = EffectRegistry::with_builtins();
        let push = registry.lookup(&CallableRef::new("core", "push")).unwrap();
        let summary = push.summarize(3);
        assert_eq!(summary.writes, BTreeSet::from([1]));
        assert_eq!(summary.consumes, BTreeSet::from([2, 3]));
        assert_eq!(summary.ret_aliases, BTreeSet::from([1]));

        let copy = registry.lookup(&CallableRef::new("core", "copy")).unwrap();
        assert!(copy.summarize(1).is_noop());
        assert!(registry.lookup(&CallableRef::new("main", "push")).is_none());
    }

    #[test]
    fn register_replaces_entries() {
        let registry = EffectRegistry::new();
        let callable = CallableRef::new("ffi", "poke");
        assert!(registry.register(callable.clone(), EffectSpec::pure()).is_none());
        let previous = registry.register(
            callable.clone(),
            EffectSpec::pure().writes(PositionSet::all()),
        );
        assert_eq!(previous, Some(EffectSpec::pure()));
        assert_eq!(registry.lookup(&callable).unwrap().summarize(2).writes.len(), 2);
    }

    #[test]
    fn over_budget_summaries_degrade() {
        let summary = EffectSummary {
            over_budget: true,
            ..EffectSummary::none()
        };
        let effective = summary.effective(2);
        assert_eq!(effective.consumes, BTreeSet::from([1, 2]));
        assert!(effective.over_budget);
        assert_eq!(
            EffectSummary::conservative(1).to_string(),
            "writes={1} consumes={1} ret_aliases={1}"
        );
    }
}
