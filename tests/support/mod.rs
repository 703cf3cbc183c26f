#![allow(dead_code)]

use ir_borrowck::{
    BorrowCheckError, CheckResult, Checker, Config, Program, ViolationKind, ViolationReport,
};
use std::sync::Arc;

/// A program parsed from text plus a checker over it.
pub struct Harness {
    pub program: Arc<Program>,
    pub checker: Checker,
}

impl Harness {
    pub fn new(source: &str) -> Self {
        let program = Arc::new(Program::from_source(source).expect("IR should parse"));
        let checker = Checker::new(program.clone());
        Self { program, checker }
    }

    pub fn check(&self, entry: &str, config: &Config) -> CheckResult<()> {
        let spec = self.program.specialization(entry)?;
        self.checker.check(&spec, config)
    }

    /// Violations reported for `entry`; panics if the check passed or failed
    /// for another reason.
    pub fn violations(&self, entry: &str, config: &Config) -> ViolationReport {
        match self.check(entry, config) {
            Err(BorrowCheckError::Violations(report)) => report,
            Ok(()) => panic!("expected violations in `{entry}`, check passed"),
            Err(other) => panic!("expected violations in `{entry}`, got: {other}"),
        }
    }
}

pub fn kinds(report: &ViolationReport) -> Vec<ViolationKind> {
    report.iter().filter_map(|v| v.kind()).collect()
}
