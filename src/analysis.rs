//! Runs the per-function passes once and bundles their results.

use crate::alias::{AliasMap, build_alias_classes};
use crate::config::UnknownCallPolicy;
use crate::error::CheckResult;
use crate::handles::HandleSpace;
use crate::ir::IrFunction;
use crate::liveness::Liveness;
use crate::summarize::{StmtEffect, Summarizer};
use crate::type_classifier::TrackingClassifier;
use std::sync::Arc;

/// Everything the detector needs about one function body.
#[derive(Debug)]
pub struct FunctionFacts {
    pub function: Arc<IrFunction>,
    pub handles: HandleSpace,
    pub effects: Vec<StmtEffect>,
    pub aliases: AliasMap,
    pub liveness: Liveness,
    pub policy: UnknownCallPolicy,
    /// Emit a trace event per statement while detecting.
    pub debug: bool,
}

/// Classify, resolve call effects, build alias classes and liveness.
///
/// `remaining` is the number of callee-summary levels still allowed for this
/// body's own call sites.
pub fn analyze_function(
    function: Arc<IrFunction>,
    summarizer: &Summarizer<'_>,
    remaining: usize,
) -> CheckResult<FunctionFacts> {
    let _span = tracing::debug_span!("analyze", callable = %function.callable, remaining).entered();

    let handles = {
        let classifier = TrackingClassifier::new(&function.types);
        HandleSpace::new(&function, &classifier)
    };
    let policy = summarizer.config().unknown_call_policy;

    let effects = (0..function.stmts.len())
        .map(|idx| summarizer.statement_effect(&function, idx, remaining))
        .collect::<CheckResult<Vec<_>>>()?;

    let call_aliases: Vec<_> = effects
        .iter()
        .map(|effect| effect.result_aliases(&handles, policy))
        .collect();
    let aliases = build_alias_classes(&function, &handles, &call_aliases);
    let liveness = Liveness::compute(&function, &handles);

    tracing::trace!(
        tracked = handles.tracked_handles().count(),
        origins = aliases.origin_count(),
        "function analysed"
    );

    Ok(FunctionFacts {
        function,
        handles,
        effects,
        aliases,
        liveness,
        policy,
        debug: summarizer.config().debug,
    })
}
