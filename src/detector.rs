//! Violation detection.
//!
//! Each block is walked in reverse with the running live set. At every
//! statement the resolved effects are checked against the alias classes:
//!
//! - a written handle conflicts with any *other* handle in `live_during`
//!   that shares its class under a different origin;
//! - a consumed handle gets the same check, and additionally escapes if any
//!   member of its class is still live after the statement.

use crate::analysis::FunctionFacts;
use crate::config::UnknownCallPolicy;
use crate::diagnostics::{
    SourceLocation, Violation, ViolationDetail, ViolationKind, violation_message,
};
use crate::effects::EffectSummary;
use crate::handles::Handle;
use crate::ir::StmtKind;
use crate::liveness::HandleSet;
use crate::summarize::{EffectSource, StmtEffect};
use rustc_hash::FxHashSet;
use std::collections::BTreeSet;

/// Effects of one statement mapped onto handles.
#[derive(Debug, Default)]
struct Resolved {
    writes: Vec<(usize, Handle)>,
    consumes: Vec<(usize, Handle)>,
    /// The statement's own result, exempt from conflict checks.
    exempt: Handle,
    over_budget: bool,
}

fn sorted(set: &HandleSet) -> Vec<Handle> {
    let mut handles: Vec<Handle> = set.iter().copied().collect();
    handles.sort_unstable();
    handles
}

/// A live handle other than `handle` (and `exempt`) that shares its class
/// under a different origin.
fn conflicting(
    facts: &FunctionFacts,
    handle: Handle,
    exempt: Handle,
    during: &[Handle],
) -> Option<Handle> {
    let origin = facts.aliases.origin(handle);
    during.iter().copied().find(|&other| {
        other != handle
            && other != exempt
            && facts.aliases.same_class(other, handle)
            && facts.aliases.origin(other) != origin
    })
}

/// True if `handle` or any alias of it (other than `exempt`) is live after
/// the statement.
fn used_later(facts: &FunctionFacts, handle: Handle, exempt: Handle, after: &HandleSet) -> bool {
    after
        .iter()
        .any(|&other| other != exempt && facts.aliases.same_class(other, handle))
}

fn resolve(facts: &FunctionFacts, idx: usize, after: &HandleSet, during: &[Handle]) -> Resolved {
    let handles = &facts.handles;
    match &facts.effects[idx] {
        StmtEffect::None => Resolved::default(),
        StmtEffect::Opaque => {
            let mut resolved = Resolved::default();
            let StmtKind::Foreign { args, .. } = &facts.function.stmts[idx].kind else {
                return resolved;
            };
            for (i, op) in args.iter().enumerate() {
                let h = handles.of_operand(op);
                if !h.is_none() {
                    resolved.writes.push((i + 1, h));
                }
            }
            resolved
        }
        StmtEffect::Known {
            call,
            summary,
            source,
            ..
        } => {
            let at = |positions: &BTreeSet<usize>| -> Vec<(usize, Handle)> {
                positions
                    .iter()
                    .filter_map(|p| call.operand_at(*p).map(|op| (*p, handles.of_operand(op))))
                    .filter(|(_, h)| !h.is_none())
                    .collect()
            };
            Resolved {
                writes: at(&summary.writes),
                consumes: at(&summary.consumes),
                exempt: handles.defined_by(idx),
                over_budget: *source == EffectSource::OverBudget,
            }
        }
        StmtEffect::Unknown { call } => {
            let tracked = call.tracked_positions(handles);
            let touched = match facts.policy {
                UnknownCallPolicy::Conservative => true,
                UnknownCallPolicy::Permissive => tracked.iter().any(|(_, h)| {
                    conflicting(facts, *h, Handle::NONE, during).is_some()
                        || used_later(facts, *h, Handle::NONE, after)
                }),
            };
            Resolved {
                writes: if touched { tracked } else { Vec::new() },
                ..Resolved::default()
            }
        }
    }
}

/// Reverse-walk every block and collect violations, ordered by statement.
pub fn detect_violations(facts: &FunctionFacts) -> Vec<Violation> {
    let function = &*facts.function;
    let mut found: Vec<Violation> = Vec::new();
    let mut reported: FxHashSet<(usize, usize, ViolationKind)> = FxHashSet::default();

    for block in &function.blocks {
        let sets = facts
            .liveness
            .statement_sets(function, &facts.handles, block.id);

        for (offset, idx) in block.stmts.clone().enumerate().rev() {
            let (after, during) = &sets[offset];
            let during = sorted(during);
            let resolved = resolve(facts, idx, after, &during);

            if facts.debug {
                tracing::trace!(
                    stmt = idx + 1,
                    live = after.len(),
                    writes = resolved.writes.len(),
                    consumes = resolved.consumes.len(),
                    "{}",
                    function.render_stmt(idx)
                );
            }

            let mut emit = |kind: ViolationKind, position: usize, handle: Handle, other: Option<Handle>| {
                if !reported.insert((idx, position, kind)) {
                    return;
                }
                found.push(make_violation(facts, idx, kind, position, handle, other));
            };

            for &(position, handle) in &resolved.writes {
                if let Some(other) = conflicting(facts, handle, resolved.exempt, &during) {
                    emit(ViolationKind::WriteConflict, position, handle, Some(other));
                }
            }
            for &(position, handle) in &resolved.consumes {
                if let Some(other) = conflicting(facts, handle, resolved.exempt, &during) {
                    emit(ViolationKind::ConsumeConflict, position, handle, Some(other));
                }
                if used_later(facts, handle, resolved.exempt, after) {
                    emit(ViolationKind::Escape, position, handle, None);
                }
            }

            if resolved.over_budget {
                tracing::debug!(stmt = idx + 1, "call checked against an over-budget summary");
            }
        }
    }

    found.sort_by_key(|v| v.stmt);
    found
}

fn make_violation(
    facts: &FunctionFacts,
    idx: usize,
    kind: ViolationKind,
    position: usize,
    handle: Handle,
    other: Option<Handle>,
) -> Violation {
    let function = &*facts.function;
    let stmt = &function.stmts[idx];
    let name = |h: Handle| {
        facts
            .aliases
            .origin_name(h)
            .unwrap_or_else(|| facts.handles.name(h))
            .to_owned()
    };
    let primary = name(handle);
    let secondary = other.map(name);

    let location = match stmt.line {
        Some(line) => SourceLocation::Line {
            file: function.file.clone(),
            line,
        },
        None => SourceLocation::Lowered(function.render_stmt(idx)),
    };

    Violation {
        function: function.callable.to_string(),
        stmt: idx + 1,
        message: violation_message(kind, &primary, secondary.as_deref()),
        location,
        text: stmt
            .text
            .clone()
            .unwrap_or_else(|| function.render_stmt(idx)),
        detail: Some(ViolationDetail {
            kind,
            primary,
            secondary,
            parent_expr: function.render_call_expr(idx),
            arg_position: Some(position),
        }),
    }
}

/// Effect summary of a whole function body, over its argument positions.
///
/// This is the effect-only subset of [`detect_violations`]: the same
/// resolution runs, but instead of reporting conflicts every written or
/// consumed handle is traced back to the arguments it aliases.
pub fn summarize_effects(facts: &FunctionFacts) -> EffectSummary {
    let function = &*facts.function;
    let handles = &facts.handles;
    let args: Vec<(usize, Handle)> = (0..handles.arg_count())
        .map(|i| (i + 1, handles.of_arg(i)))
        .filter(|(_, h)| handles.is_tracked(*h))
        .collect();
    let positions_of = |h: Handle| {
        args.iter()
            .filter(move |(_, a)| facts.aliases.same_class(*a, h))
            .map(|(p, _)| *p)
    };

    let mut summary = EffectSummary::none();
    for block in &function.blocks {
        let sets = facts.liveness.statement_sets(function, handles, block.id);
        for (offset, idx) in block.stmts.clone().enumerate() {
            let (after, during) = &sets[offset];
            let resolved = resolve(facts, idx, after, &sorted(during));
            summary.over_budget |= resolved.over_budget;

            for (_, h) in &resolved.writes {
                summary.writes.extend(positions_of(*h));
            }
            for (_, h) in &resolved.consumes {
                summary.consumes.extend(positions_of(*h));
            }
            if let StmtKind::Return(op) = &function.stmts[idx].kind {
                summary.ret_aliases.extend(positions_of(handles.of_operand(op)));
            }
        }
    }
    summary
}
