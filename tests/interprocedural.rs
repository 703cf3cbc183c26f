mod support;

use ir_borrowck::effects::EffectRegistry;
use ir_borrowck::summarize::{SummaryCache, Summarizer};
use ir_borrowck::{
    BorrowCheckError, CallableRef, Config, EffectSpec, IrProvider, PositionSet, Scope,
    UnknownCallPolicy, ViolationKind,
};
use std::collections::BTreeSet;
use support::{Harness, kinds};

const CALLS: &str = r#"
module app

fn fill(dst: Array<Int>, v: Array<Int>) -> Nothing
  call core.set_index(dst, 1, v) : Nothing
  return nothing
end

fn write_through_callee() -> Array<Int>
  %1 = new Array<Int>() !xs
  %2 = copy %1 !alias
  %3 = new Array<Int>() !v
  call app.fill(%1, %3) : Nothing
  return %2
end

fn escape_through_callee(dst: Array<Int>) -> Array<Int>
  %1 = new Array<Int>() !v
  call app.fill(dst, %1) : Nothing
  return %1
end

fn outer(xs: Array<Int>) -> Nothing
  call app.inner(xs) : Nothing
  return nothing
end

fn inner(xs: Array<Int>) -> Array<Int>
  %1 = copy xs !ys
  call core.set_index(xs, 1, 0) : Nothing
  return %1
end

fn uses_library(xs: Array<Int>) -> Nothing
  call lib.missing(xs) : Nothing
  return nothing
end
"#;

const CHAIN: &str = r#"
module app

fn a(xs: Array<Int>) -> Nothing
  call app.b(xs) : Nothing
  return nothing
end

fn b(xs: Array<Int>) -> Nothing
  call app.c(xs) : Nothing
  return nothing
end

fn c(xs: Array<Int>) -> Nothing
  call core.set_index(xs, 1, 0) : Nothing
  return nothing
end

fn top(xs: Array<Int>) -> Array<Int>
  call app.a(xs) : Nothing
  return xs
end

fn shared_top(xs: Array<Int>) -> Array<Int>
  %1 = copy xs !ys
  call app.a(xs) : Nothing
  return %1
end
"#;

const CYCLE: &str = r#"
module app

fn f(xs: Array<Int>) -> Nothing
  call app.g(xs) : Nothing
  return nothing
end

fn g(xs: Array<Int>) -> Nothing
  call app.f(xs) : Nothing
  return nothing
end
"#;

#[test]
fn callee_writes_are_seen_at_the_call_site() {
    let h = Harness::new(CALLS);
    let report = h.violations("app.write_through_callee", &Config::default());
    assert_eq!(kinds(&report), vec![ViolationKind::WriteConflict]);
    let detail = report.violations[0].detail.clone().unwrap();
    assert_eq!(detail.primary, "xs");
    assert_eq!(detail.secondary.as_deref(), Some("alias"));
    assert_eq!(detail.parent_expr.as_deref(), Some("app.fill(%1, %3)"));
}

#[test]
fn callee_stores_escape_at_the_call_site() {
    let h = Harness::new(CALLS);
    let report = h.violations("app.escape_through_callee", &Config::default());
    assert_eq!(kinds(&report), vec![ViolationKind::Escape]);
    assert_eq!(report.violations[0].detail.as_ref().unwrap().arg_position, Some(2));
}

#[test]
fn scope_none_never_summarizes() {
    let h = Harness::new(CALLS);
    let config = Config::default().with_scope(Scope::None);
    h.check("app.escape_through_callee", &config).unwrap();
    assert_eq!(h.checker.stats().summaries_computed, 0);
}

#[test]
fn function_scope_does_not_report_inside_callees() {
    let h = Harness::new(CALLS);
    h.check("app.outer", &Config::default()).unwrap();
    assert_eq!(h.checker.stats().functions_analysed, 1);
}

#[test]
fn module_scope_reports_violations_inside_callees() {
    let h = Harness::new(CALLS);
    let config = Config::default().with_scope(Scope::Module);
    let report = h.violations("app.outer", &config);

    assert_eq!(report.callable, "app.outer(Array<Int>)");
    assert_eq!(report.len(), 1);
    assert_eq!(report.violations[0].function, "app.inner");
    assert_eq!(report.violations[0].kind(), Some(ViolationKind::WriteConflict));
}

#[test]
fn traversal_filters_by_module_kind() {
    let h = Harness::new(CALLS);
    let module = Config::default().with_scope(Scope::Module);
    h.check("app.uses_library", &module).unwrap();

    // `lib` has no bodies; user scope walks into it and cannot fetch IR.
    let user = Config::default().with_scope(Scope::User);
    let err = h.check("app.uses_library", &user).unwrap_err();
    assert!(
        matches!(err, BorrowCheckError::IrUnavailable { .. }),
        "unexpected error: {err}"
    );

    // Scope `all` tolerates callees that cannot be analysed.
    let all = Config::default().with_scope(Scope::All);
    h.check("app.uses_library", &all).unwrap();

    h.program.mark_library("lib");
    h.check("app.uses_library", &user).unwrap();
}

#[test]
fn target_module_overrides_the_home_module() {
    let h = Harness::new(CALLS);
    let config = Config::default()
        .with_scope(Scope::Module)
        .with_target_module("elsewhere");
    h.check("app.outer", &config).unwrap();
}

#[test]
fn summaries_gain_precision_as_depth_grows() {
    let h = Harness::new(CHAIN);
    let spec = h.program.specialization("app.a").unwrap();
    let registry = EffectRegistry::with_builtins();
    let cache = SummaryCache::new();
    let config = Config::default();
    let summarizer = Summarizer::new(
        &*h.program,
        &registry,
        &cache,
        &config,
        h.program.generation(),
    );

    let shallow = summarizer.summarize(&spec, 0).unwrap();
    let middle = summarizer.summarize(&spec, 1).unwrap();
    let deep = summarizer.summarize(&spec, 2).unwrap();

    // Below the write in `c`, the permissive fallback sees nothing.
    for summary in [&shallow, &middle, &deep] {
        assert!(!summary.over_budget);
        assert!(summary.consumes.is_empty());
    }
    assert!(shallow.writes.is_empty());
    assert!(middle.writes.is_empty());
    assert_eq!(deep.writes, BTreeSet::from([1]));

    // Cached and deterministic.
    let computed = cache.computed();
    assert_eq!(summarizer.summarize(&spec, 2).unwrap(), deep);
    assert_eq!(cache.computed(), computed);
}

#[test]
fn shallow_budgets_use_the_unknown_call_policy() {
    let h = Harness::new(CHAIN);
    let shallow = Config::default().with_max_summary_depth(1);
    h.check("app.top", &shallow).unwrap();
    h.check("app.shared_top", &shallow).unwrap();

    let report = h.violations(
        "app.shared_top",
        &shallow.with_unknown_call_policy(UnknownCallPolicy::Conservative),
    );
    assert_eq!(kinds(&report), vec![ViolationKind::WriteConflict]);

    let report = h.violations("app.shared_top", &Config::default());
    assert_eq!(kinds(&report), vec![ViolationKind::WriteConflict]);
    assert_eq!(report.violations[0].detail.as_ref().unwrap().secondary.as_deref(), Some("ys"));
}

#[test]
fn recursive_call_graphs_terminate() {
    let h = Harness::new(CYCLE);
    let config = Config::default().with_scope(Scope::All);
    h.check("app.f", &config).unwrap();
    assert_eq!(h.checker.stats().functions_analysed, 2);

    h.check("app.f", &config).unwrap();
    h.check("app.g", &config).unwrap();
    let stats = h.checker.stats();
    assert_eq!(stats.functions_analysed, 2);
    assert_eq!(stats.cache_hits, 2);
}

#[test]
fn clean_results_are_cached_until_the_code_changes() {
    let h = Harness::new(CALLS);
    h.check("app.outer", &Config::default()).unwrap();
    h.check("app.outer", &Config::default()).unwrap();
    assert_eq!(h.checker.stats().functions_analysed, 1);
    assert_eq!(h.checker.stats().cache_hits, 1);

    h.program
        .load_source(
            r#"
module app
fn outer(xs: Array<Int>) -> Nothing
  %1 = copy xs !ys
  call app.inner(xs) : Nothing
  call core.push(%1, 1) : Array<Int>
  return nothing
end
"#,
        )
        .unwrap();

    let report = h.violations("app.outer", &Config::default());
    assert_eq!(kinds(&report), vec![ViolationKind::WriteConflict]);
    assert_eq!(report.violations[0].stmt, 2);
}

#[test]
fn violating_results_are_not_cached() {
    let h = Harness::new(CALLS);
    for _ in 0..2 {
        let report = h.violations("app.write_through_callee", &Config::default());
        assert_eq!(report.len(), 1);
    }
    assert_eq!(h.checker.stats().functions_analysed, 2);
}

#[test]
fn registering_an_effect_invalidates_cached_results() {
    let h = Harness::new(
        r#"
module app
fn uses_ffi(xs: Array<Int>) -> Array<Int>
  call ffi.poke(xs) : Nothing
  return xs
end
"#,
    );
    h.check("app.uses_ffi", &Config::default()).unwrap();

    let previous = h.checker.register_effect(
        CallableRef::new("ffi", "poke"),
        EffectSpec::pure().consumes(PositionSet::of(&[1])),
    );
    assert!(previous.is_none());

    let report = h.violations("app.uses_ffi", &Config::default());
    assert_eq!(kinds(&report), vec![ViolationKind::Escape]);
}
