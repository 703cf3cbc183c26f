//! Per-call-site effect resolution.
//!
//! Three tiers, first match wins:
//!
//! 1. the static [`EffectRegistry`];
//! 2. recursive summarization of the callee body, bounded by
//!    `max_summary_depth` and cached in a [`SummaryCache`];
//! 3. the unknown-call policy, applied later by the detector because the
//!    permissive policy depends on liveness.

use crate::alias::ResultAliases;
use crate::analysis::analyze_function;
use crate::config::{Config, ConfigSignature, UnknownCallPolicy};
use crate::detector::summarize_effects;
use crate::effects::{EffectRegistry, EffectSummary};
use crate::error::{BorrowCheckError, CheckResult};
use crate::handles::{Handle, HandleSpace};
use crate::ir::{
    CallArg, CallTarget, CallableRef, Generation, IrFunction, IrProvider, Operand,
    Specialization, StmtKind, Ty,
};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::ThreadId;

// ============================================================================
// Call normalization
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct CallSlot {
    pub operand: Operand,
    pub ty: Ty,
}

/// A call's arguments as a flat positional list.
///
/// Keyword arguments follow the positional ones in source order. A splat of a
/// tuple-typed value expands to one slot per element; a splat of anything
/// else occupies one slot and also stands for every position past the end.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedCall {
    pub slots: Vec<CallSlot>,
    pub open_tail: Option<Operand>,
}

impl NormalizedCall {
    pub fn normalize(function: &IrFunction, stmt: usize, args: &[CallArg]) -> CheckResult<Self> {
        let mut call = NormalizedCall::default();
        let mut keywords = Vec::new();

        for arg in args {
            match arg {
                CallArg::Positional(op) => call.push(function, op),
                CallArg::Keyword(_, op) => keywords.push(op),
                CallArg::Splat(op) => match function.operand_type(op) {
                    Ty::Tuple(items) => {
                        for ty in items {
                            call.slots.push(CallSlot {
                                operand: op.clone(),
                                ty,
                            });
                        }
                    }
                    _ => {
                        if call.open_tail.is_some() {
                            return Err(BorrowCheckError::unmodelable(
                                &function.callable,
                                format!("{} with two variadic splats", function.render_stmt(stmt)),
                            ));
                        }
                        call.open_tail = Some(op.clone());
                        call.slots.push(CallSlot {
                            operand: op.clone(),
                            ty: Ty::Any,
                        });
                    }
                },
            }
        }
        for op in keywords {
            call.push(function, op);
        }
        Ok(call)
    }

    fn push(&mut self, function: &IrFunction, op: &Operand) {
        self.slots.push(CallSlot {
            operand: op.clone(),
            ty: function.operand_type(op),
        });
    }

    pub fn arity(&self) -> usize {
        self.slots.len()
    }

    pub fn is_variadic(&self) -> bool {
        self.open_tail.is_some()
    }

    /// Operand passed at 1-based `position`.
    pub fn operand_at(&self, position: usize) -> Option<&Operand> {
        position
            .checked_sub(1)
            .and_then(|i| self.slots.get(i))
            .map(|slot| &slot.operand)
            .or(self.open_tail.as_ref())
    }

    pub fn arg_types(&self) -> Vec<Ty> {
        self.slots.iter().map(|s| s.ty.clone()).collect()
    }

    /// `(position, handle)` for every tracked argument.
    pub fn tracked_positions(&self, handles: &HandleSpace) -> Vec<(usize, Handle)> {
        self.slots
            .iter()
            .enumerate()
            .map(|(i, slot)| (i + 1, handles.of_operand(&slot.operand)))
            .filter(|(_, h)| !h.is_none())
            .collect()
    }
}

// ============================================================================
// Statement effects
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectSource {
    Registry,
    Summary,
    /// Placeholder for a recursive cycle edge; maximally conservative.
    OverBudget,
}

/// How one statement affects tracked state.
#[derive(Debug, Clone, PartialEq)]
pub enum StmtEffect {
    None,
    Known {
        callee: CallableRef,
        call: NormalizedCall,
        summary: EffectSummary,
        source: EffectSource,
    },
    /// The unknown-call policy decides.
    Unknown { call: NormalizedCall },
    /// Native call: every tracked operand is written.
    Opaque,
}

impl StmtEffect {
    /// What the statement's result aliases.
    pub fn result_aliases(&self, handles: &HandleSpace, policy: UnknownCallPolicy) -> ResultAliases {
        match self {
            StmtEffect::Known { call, summary, .. } => ResultAliases::of(
                summary
                    .ret_aliases
                    .iter()
                    .filter_map(|p| call.operand_at(*p))
                    .map(|op| handles.of_operand(op))
                    .filter(|h| !h.is_none())
                    .collect(),
            ),
            StmtEffect::Unknown { call } if policy == UnknownCallPolicy::Conservative => {
                ResultAliases {
                    sources: call
                        .tracked_positions(handles)
                        .into_iter()
                        .map(|(_, h)| h)
                        .collect(),
                    inherits_origin: false,
                }
            }
            _ => ResultAliases::default(),
        }
    }
}

// ============================================================================
// Summary cache
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SummaryKey {
    pub spec: Specialization,
    pub remaining_depth: usize,
    pub config: ConfigSignature,
    pub generation: Generation,
}

impl SummaryKey {
    /// The key without its depth. A callee is in progress at every depth at
    /// once, so recursion is caught however far the budget has fallen.
    fn in_progress_key(&self) -> InProgressKey {
        InProgressKey {
            spec: self.spec.clone(),
            config: self.config,
            generation: self.generation,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct InProgressKey {
    spec: Specialization,
    config: ConfigSignature,
    generation: Generation,
}

#[derive(Debug, Default)]
struct SummaryEntries {
    done: FxHashMap<SummaryKey, EffectSummary>,
    in_progress: FxHashMap<InProgressKey, ThreadId>,
}

enum Claim {
    Hit(EffectSummary),
    /// This thread is already summarizing the callee.
    Cycle,
    /// Another thread is summarizing the callee.
    Busy,
    Claimed,
}

/// Callee summaries keyed by specialization, remaining depth, policy and
/// code generation.
#[derive(Debug, Default)]
pub struct SummaryCache {
    entries: Mutex<SummaryEntries>,
    computed: AtomicU64,
}

impl SummaryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn claim(&self, key: &SummaryKey) -> Claim {
        let mut entries = self.entries.lock();
        if let Some(summary) = entries.done.get(key) {
            return Claim::Hit(summary.clone());
        }
        let current = std::thread::current().id();
        match entries.in_progress.get(&key.in_progress_key()) {
            Some(owner) if *owner == current => Claim::Cycle,
            Some(_) => Claim::Busy,
            None => {
                entries.in_progress.insert(key.in_progress_key(), current);
                Claim::Claimed
            }
        }
    }

    fn finish(&self, key: SummaryKey, result: &CheckResult<EffectSummary>) {
        let mut entries = self.entries.lock();
        entries.in_progress.remove(&key.in_progress_key());
        if let Ok(summary) = result {
            entries.done.insert(key, summary.clone());
        }
    }

    /// Drop every entry from a generation older than `current`.
    pub fn purge_stale(&self, current: Generation) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.done.len();
        entries.done.retain(|key, _| key.generation >= current);
        entries.in_progress.retain(|key, _| key.generation >= current);
        before - entries.done.len()
    }

    /// Forget every completed summary.
    pub fn clear(&self) {
        self.entries.lock().done.clear();
    }

    /// Number of completed summaries held.
    pub fn len(&self) -> usize {
        self.entries.lock().done.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of summaries computed (not served from cache) so far.
    pub fn computed(&self) -> u64 {
        self.computed.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Summarizer
// ============================================================================

/// Resolves call-site effects for one check under one policy.
pub struct Summarizer<'c> {
    provider: &'c dyn IrProvider,
    registry: &'c EffectRegistry,
    cache: &'c SummaryCache,
    config: &'c Config,
    generation: Generation,
}

impl<'c> Summarizer<'c> {
    pub fn new(
        provider: &'c dyn IrProvider,
        registry: &'c EffectRegistry,
        cache: &'c SummaryCache,
        config: &'c Config,
        generation: Generation,
    ) -> Self {
        Self {
            provider,
            registry,
            cache,
            config,
            generation,
        }
    }

    pub fn config(&self) -> &Config {
        self.config
    }

    pub fn provider(&self) -> &dyn IrProvider {
        self.provider
    }

    /// Effect of statement `idx`, with `remaining` levels of callee
    /// summarization left.
    pub fn statement_effect(
        &self,
        function: &IrFunction,
        idx: usize,
        remaining: usize,
    ) -> CheckResult<StmtEffect> {
        let (target, args) = match &function.stmts[idx].kind {
            StmtKind::Foreign { .. } => return Ok(StmtEffect::Opaque),
            StmtKind::Call { target, args } => (target, args),
            _ => return Ok(StmtEffect::None),
        };

        let call = NormalizedCall::normalize(function, idx, args)?;
        let CallTarget::Static(callee) = target else {
            return Ok(StmtEffect::Unknown { call });
        };

        if let Some(spec) = self.registry.lookup(callee) {
            let summary = spec.summarize(call.arity());
            return Ok(StmtEffect::Known {
                callee: callee.clone(),
                call,
                summary,
                source: EffectSource::Registry,
            });
        }

        // Past the budget a call gets the same fallback as one whose body is
        // unavailable.
        if !self.config.scope.allows_summaries()
            || self.config.max_summary_depth == 0
            || remaining == 0
            || call.is_variadic()
        {
            return Ok(StmtEffect::Unknown { call });
        }

        let spec = Specialization::new(callee.clone(), call.arg_types());
        match self.summarize(&spec, remaining - 1) {
            Ok(summary) => {
                let source = if summary.over_budget {
                    EffectSource::OverBudget
                } else {
                    EffectSource::Summary
                };
                Ok(StmtEffect::Known {
                    callee: callee.clone(),
                    summary: summary.effective(call.arity()),
                    call,
                    source,
                })
            }
            Err(err) => self.degrade(err, call),
        }
    }

    fn degrade(&self, err: BorrowCheckError, call: NormalizedCall) -> CheckResult<StmtEffect> {
        if err.is_analysis_infeasible() {
            tracing::debug!(error = %err, "callee cannot be summarized; using unknown-call policy");
            Ok(StmtEffect::Unknown { call })
        } else {
            Err(err)
        }
    }

    /// Effect summary of `spec`, whose own call sites get `remaining` further
    /// levels of summarization.
    pub fn summarize(&self, spec: &Specialization, remaining: usize) -> CheckResult<EffectSummary> {
        let key = SummaryKey {
            spec: spec.clone(),
            remaining_depth: remaining,
            config: self.config.signature(),
            generation: self.generation,
        };

        match self.cache.claim(&key) {
            Claim::Hit(summary) => {
                tracing::trace!(%spec, remaining, "summary cache hit");
                Ok(summary)
            }
            Claim::Cycle => {
                tracing::debug!(%spec, "recursive summary; assuming everything is consumed");
                let mut summary = EffectSummary::conservative(spec.arg_types.len());
                summary.over_budget = true;
                Ok(summary)
            }
            Claim::Busy => self.compute(spec, remaining),
            Claim::Claimed => {
                let result = self.compute(spec, remaining);
                self.cache.finish(key, &result);
                result
            }
        }
    }

    fn compute(&self, spec: &Specialization, remaining: usize) -> CheckResult<EffectSummary> {
        let body = self.provider.fetch(spec, self.config.ir_detail)?;
        let facts = analyze_function(body, self, remaining)?;
        let summary = summarize_effects(&facts);
        self.cache.computed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(%spec, remaining, %summary, "summarized callee");
        Ok(summary)
    }
}
