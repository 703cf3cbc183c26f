mod support;

use ir_borrowck::{BorrowCheckError, Config, UnknownCallPolicy, ViolationKind};
use support::{Harness, kinds};

const PROGRAM: &str = r#"
module app

fn passthrough(a: Array<Int>, f: Fn) -> Any
  %1 = call dyn f(a) : Any !r
  return %1
end

fn shared(a: Array<Int>, f: Fn) -> Array<Int>
  %1 = copy a !b
  call dyn f(a) : Nothing
  return %1
end

fn used_later(a: Array<Int>, f: Fn) -> Array<Int>
  call dyn f(a) : Nothing
  return a
end

fn scalars(n: Int, f: Fn) -> Int
  %1 = call dyn f(n) : Int !m
  return n
end

fn external(a: Array<Int>) -> Array<Int>
  %1 = copy a !b
  call ext.mystery(a) : Nothing
  return %1
end

fn sink(a: Array<Int>) -> Nothing
  return nothing
end

fn direct(xs: Array<Int>) -> Array<Int>
  %1 = copy xs !ys
  call app.sink(xs) : Nothing
  return %1
end

fn splat(xs: Array<Int>) -> Array<Int>
  %1 = copy xs !ys
  call app.sink(...xs) : Nothing
  return %1
end

fn two_splats(xs: Array<Int>) -> Nothing
  call app.sink(...xs, ...xs) : Nothing
  return nothing
end
"#;

fn conservative() -> Config {
    Config::default().with_unknown_call_policy(UnknownCallPolicy::Conservative)
}

#[test]
fn permissive_policy_ignores_unshared_arguments() {
    let h = Harness::new(PROGRAM);
    h.check("app.passthrough", &Config::default()).unwrap();
}

#[test]
fn conservative_policy_assumes_results_alias_arguments() {
    let h = Harness::new(PROGRAM);
    let report = h.violations("app.passthrough", &conservative());
    assert_eq!(kinds(&report), vec![ViolationKind::WriteConflict]);
    let detail = report.violations[0].detail.clone().unwrap();
    assert_eq!(detail.primary, "a");
    assert_eq!(detail.secondary.as_deref(), Some("r"));
    assert_eq!(detail.parent_expr.as_deref(), Some("dyn f(a)"));
}

#[test]
fn visibly_shared_arguments_are_written_under_either_policy() {
    let h = Harness::new(PROGRAM);
    for config in [Config::default(), conservative()] {
        let report = h.violations("app.shared", &config);
        assert_eq!(kinds(&report), vec![ViolationKind::WriteConflict]);
        assert_eq!(
            report.violations[0].detail.as_ref().unwrap().secondary.as_deref(),
            Some("b")
        );
    }
}

#[test]
fn writes_without_a_second_binding_are_fine() {
    let h = Harness::new(PROGRAM);
    h.check("app.used_later", &Config::default()).unwrap();
    h.check("app.used_later", &conservative()).unwrap();
}

#[test]
fn untracked_arguments_never_matter() {
    let h = Harness::new(PROGRAM);
    h.check("app.scalars", &conservative()).unwrap();
}

#[test]
fn calls_without_a_body_fall_back_to_the_policy() {
    let h = Harness::new(PROGRAM);
    let report = h.violations("app.external", &Config::default());
    assert_eq!(kinds(&report), vec![ViolationKind::WriteConflict]);

    let no_summaries = Config::default().with_max_summary_depth(0);
    let report = h.violations("app.direct", &no_summaries);
    assert_eq!(kinds(&report), vec![ViolationKind::WriteConflict]);
}

#[test]
fn variadic_calls_are_not_summarized() {
    let h = Harness::new(PROGRAM);
    h.check("app.direct", &Config::default()).unwrap();

    let report = h.violations("app.splat", &Config::default());
    assert_eq!(kinds(&report), vec![ViolationKind::WriteConflict]);
}

#[test]
fn two_open_splats_cannot_be_modelled() {
    let h = Harness::new(PROGRAM);
    let err = h.check("app.two_splats", &Config::default()).unwrap_err();
    assert!(
        matches!(err, BorrowCheckError::Unmodelable { .. }),
        "unexpected error: {err}"
    );
    assert!(err.is_analysis_infeasible());
}
