//! Best-effort aliasing and escape checker over SSA function bodies.
//!
//! The crate inspects the lowered IR of a function and flags two classes of
//! ownership bugs: writes to a value that another live binding can observe,
//! and values stored somewhere longer-lived while still used afterwards.
//! It is a development tripwire, not a proof system.
//!
//! The pipeline per function is [`type_classifier`] → [`handles`] →
//! [`alias`] + [`liveness`] → [`detector`], with call effects resolved by
//! [`summarize`]. [`Checker`] caches clean results per specialization and
//! walks the call graph when the configured [`Scope`] asks for it.

pub mod alias;
pub mod analysis;
pub mod cache;
pub mod config;
pub mod detector;
pub mod diagnostics;
pub mod driver;
pub mod effects;
pub mod error;
pub mod handles;
pub mod ir;
pub mod liveness;
pub mod summarize;
pub mod telemetry;
pub mod type_classifier;

use std::sync::Arc;

pub use config::{Config, IrDetail, Scope, UnknownCallPolicy};
pub use diagnostics::{SourceLocation, Violation, ViolationDetail, ViolationKind, ViolationReport};
pub use driver::{CheckStats, Checker};
pub use effects::{EffectRegistry, EffectSpec, EffectSummary, PositionSet};
pub use error::{BorrowCheckError, CheckResult};
pub use ir::{CallableRef, Generation, IrProvider, ModuleId, Program, Specialization, Ty};

/// Parse `source` and check `entry` (`module.name`) at its declared argument
/// types.
pub fn check_source(source: &str, entry: &str, config: &Config) -> CheckResult<()> {
    let program = Arc::new(Program::from_source(source)?);
    let spec = program.specialization(entry)?;
    Checker::new(program).check(&spec, config)
}
