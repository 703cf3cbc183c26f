mod support;

use ir_borrowck::{Config, IrDetail, SourceLocation, ViolationKind, check_source};
use support::{Harness, kinds};

const PROGRAM: &str = r#"
module app

fn alias_then_write() -> Array<Int> in "app.src"
  %1 = new Array<Int>(1, 2, 3) !x @1 -- x = [1, 2, 3]
  %2 = copy %1 !y @2 -- y = x
  %3 = call core.set_index(%1, 1, 0) : Nothing @3 -- x[1] = 0
  return %2 @4
end

fn copy_then_write() -> Array<Int>
  %1 = new Array<Int>(1, 2, 3) !x
  %2 = copy %1 !y
  %3 = call core.copy(%1) : Array<Int> !c
  call core.set_index(%1, 1, 0) : Nothing
  return %3
end

fn remember(k: Symbol) -> Array<Int>
  %1 = new Array<Int>(1, 2, 3) !x
  %2 = global cache : Dict<Symbol, Array<Int>>
  call core.set_index(%2, k, %1) : Nothing
  return %1
end

fn remember_count(k: Symbol, n: Int) -> Int
  %1 = global cache : Dict<Symbol, Int>
  call core.set_index(%1, k, n) : Nothing
  return n
end

fn grow(xs: Array<Int>) -> Array<Int>
  %1 = call core.push(xs, 4) : Array<Int> !xs
  %2 = call core.push(%1, 5) : Array<Int> !xs
  return %2
end

fn stash(v: Array<Int>) -> Array<Array<Int>>
  %1 = call core.vector(v) : Array<Array<Int>> !box
  call core.push(v, 1) : Array<Int>
  return %1
end

fn pick(c: Bool, a: Array<Int>) -> Array<Int>
  %1 = new Array<Int>() !b
  branch c bb1 bb2
bb1:
  goto bb2
bb2:
  %4 = phi [bb0: %1, bb1: a] : Array<Int> !r
  call core.set_index(a, 1, 0) : Nothing
  return %4
end

fn poke(xs: Array<Int>) -> Array<Int>
  %1 = copy xs !ys
  foreign "memset"(xs, 0) : Nothing
  return %1
end

fn keyword_store(d: Dict<Symbol, Array<Int>>, v: Array<Int>) -> Array<Int>
  call core.set_index(d, value=v, :k) : Nothing
  return v
end

fn twice(xs: Array<Int>, v: Array<Int>) -> Array<Int>
  %1 = copy xs !ys
  call core.set_index(xs, 1, v) : Nothing
  call core.push(ys, v) : Array<Int> !ys
  return v
end
"#;

#[test]
fn write_through_a_copy_is_reported_once() {
    let h = Harness::new(PROGRAM);
    let report = h.violations("app.alias_then_write", &Config::default());

    assert_eq!(kinds(&report), vec![ViolationKind::WriteConflict]);
    let v = &report.violations[0];
    assert_eq!(v.stmt, 3);
    let detail = v.detail.as_ref().unwrap();
    assert_eq!(detail.primary, "x");
    assert_eq!(detail.secondary.as_deref(), Some("y"));
    assert_eq!(detail.parent_expr.as_deref(), Some("core.set_index(%1, 1, 0)"));
    assert_eq!(detail.arg_position, Some(1));

    insta::assert_snapshot!(report.render(), @r"
    1 borrow violation in app.alias_then_write()
      app.alias_then_write %3 at app.src:3: cannot write `x`: value is aliased by another live binding `y`
        | x[1] = 0
    ");
}

#[test]
fn copies_break_the_alias_class() {
    let h = Harness::new(PROGRAM);
    h.check("app.copy_then_write", &Config::default()).unwrap();
}

#[test]
fn storing_into_a_global_then_using_the_value_escapes() {
    let h = Harness::new(PROGRAM);
    let report = h.violations("app.remember", &Config::default());

    assert_eq!(kinds(&report), vec![ViolationKind::Escape]);
    let v = &report.violations[0];
    assert_eq!(v.stmt, 3);
    assert_eq!(v.detail.as_ref().unwrap().arg_position, Some(3));
    assert_eq!(
        v.location,
        SourceLocation::Lowered("%3 = call core.set_index(%2, k, %1)".to_string())
    );
    assert_eq!(v.text, "%3 = call core.set_index(%2, k, %1)");
}

#[test]
fn storing_untracked_values_is_fine() {
    let h = Harness::new(PROGRAM);
    h.check("app.remember_count", &Config::default()).unwrap();
}

#[test]
fn lowered_ir_tracks_everything() {
    let h = Harness::new(PROGRAM);
    let config = Config::default().with_ir_detail(IrDetail::Lowered);
    let report = h.violations("app.remember_count", &config);
    assert_eq!(kinds(&report), vec![ViolationKind::Escape]);
}

#[test]
fn rebinding_the_same_name_is_an_in_place_update() {
    let h = Harness::new(PROGRAM);
    h.check("app.grow", &Config::default()).unwrap();
}

#[test]
fn containers_alias_their_elements() {
    let h = Harness::new(PROGRAM);
    let report = h.violations("app.stash", &Config::default());
    assert_eq!(kinds(&report), vec![ViolationKind::WriteConflict]);
    let detail = report.violations[0].detail.clone().unwrap();
    assert_eq!(detail.primary, "v");
    assert_eq!(detail.secondary.as_deref(), Some("box"));
}

#[test]
fn phi_joins_merge_alias_classes() {
    let h = Harness::new(PROGRAM);
    let report = h.violations("app.pick", &Config::default());
    assert_eq!(kinds(&report), vec![ViolationKind::WriteConflict]);
    assert_eq!(report.violations[0].stmt, 5);
    assert_eq!(
        report.violations[0].detail.as_ref().unwrap().secondary.as_deref(),
        Some("r")
    );
}

#[test]
fn foreign_calls_write_every_tracked_operand() {
    let h = Harness::new(PROGRAM);
    let report = h.violations("app.poke", &Config::default());
    assert_eq!(kinds(&report), vec![ViolationKind::WriteConflict]);
    assert_eq!(
        report.violations[0].detail.as_ref().unwrap().parent_expr.as_deref(),
        Some("foreign \"memset\"(xs, 0)")
    );
}

#[test]
fn all_violations_are_reported_together_in_order() {
    let h = Harness::new(PROGRAM);
    let report = h.violations("app.twice", &Config::default());
    assert_eq!(
        kinds(&report),
        vec![
            ViolationKind::WriteConflict,
            ViolationKind::Escape,
            ViolationKind::Escape,
        ]
    );
    assert_eq!(report.iter().map(|v| v.stmt).collect::<Vec<_>>(), vec![2, 2, 3]);
    assert_eq!(report.count(ViolationKind::Escape), 2);

    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(json["callable"], "app.twice(Array<Int>, Array<Int>)");
    assert_eq!(json["violations"][1]["detail"]["kind"], "escape");
}

#[test]
fn check_source_parses_and_checks() {
    let err = check_source(PROGRAM, "app.alias_then_write", &Config::default()).unwrap_err();
    assert_eq!(err.violations().map(|r| r.len()), Some(1));
    check_source(PROGRAM, "app.grow", &Config::default()).unwrap();

    let missing = check_source(PROGRAM, "app.nope", &Config::default()).unwrap_err();
    assert!(missing.is_analysis_infeasible());
}

#[test]
fn keyword_arguments_follow_the_positional_ones() {
    let h = Harness::new(PROGRAM);
    let report = h.violations("app.keyword_store", &Config::default());

    assert_eq!(kinds(&report), vec![ViolationKind::Escape]);
    let detail = report.violations[0].detail.as_ref().unwrap();
    assert_eq!(detail.primary, "v");
    assert_eq!(detail.arg_position, Some(3));
}
