//! Where function bodies come from.
//!
//! The checker never owns IR; it asks an [`IrProvider`] for the body of a
//! specialization. [`Program`] is the in-memory provider used by embedders and
//! tests: a set of modules whose every redefinition bumps the code generation.

use crate::config::IrDetail;
use crate::error::{BorrowCheckError, CheckResult};
use crate::ir::parse::parse_module;
use crate::ir::{CallableRef, IrFunction, ModuleId, Specialization};
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Monotonically increasing code-generation counter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct Generation(pub u64);

impl Generation {
    pub fn next(self) -> Self {
        Generation(self.0 + 1)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// Whether a module is user-authored or part of a library the user does not
/// own. Drives the `user` interprocedural scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    User,
    Library,
}

/// Source of function bodies for the checker.
pub trait IrProvider: Send + Sync {
    /// Fetch the body a call with these argument types dispatches to.
    fn fetch(&self, spec: &Specialization, detail: IrDetail) -> CheckResult<Arc<IrFunction>>;

    /// Current code generation. Cached results from older generations are stale.
    fn generation(&self) -> Generation;

    fn module_kind(&self, _module: &ModuleId) -> ModuleKind {
        ModuleKind::User
    }
}

#[derive(Debug, Default)]
struct ProgramState {
    functions: FxHashMap<CallableRef, Arc<IrFunction>>,
    library_modules: FxHashSet<ModuleId>,
    generation: Generation,
}

/// In-memory collection of function bodies.
#[derive(Debug, Default)]
pub struct Program {
    state: RwLock<ProgramState>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a module in the text IR format into a fresh program.
    pub fn from_source(source: &str) -> CheckResult<Self> {
        let program = Self::new();
        program.load_source(source)?;
        Ok(program)
    }

    /// Parse and define every function in `source`.
    pub fn load_source(&self, source: &str) -> CheckResult<Vec<CallableRef>> {
        let parsed = parse_module(source)?;
        let names = parsed.functions.iter().map(|f| f.callable.clone()).collect();
        let mut state = self.state.write();
        state.library_modules.extend(parsed.library_modules);
        for function in parsed.functions {
            state
                .functions
                .insert(function.callable.clone(), Arc::new(function));
        }
        state.generation = state.generation.next();
        tracing::debug!(generation = %state.generation, "loaded IR module");
        Ok(names)
    }

    /// Define or redefine a function. Returns the new generation.
    pub fn define(&self, function: IrFunction) -> Generation {
        let mut state = self.state.write();
        state
            .functions
            .insert(function.callable.clone(), Arc::new(function));
        state.generation = state.generation.next();
        state.generation
    }

    pub fn remove(&self, callable: &CallableRef) -> bool {
        let mut state = self.state.write();
        let removed = state.functions.remove(callable).is_some();
        if removed {
            state.generation = state.generation.next();
        }
        removed
    }

    pub fn mark_library(&self, module: impl Into<String>) {
        self.state
            .write()
            .library_modules
            .insert(ModuleId::new(module));
    }

    pub fn get(&self, callable: &CallableRef) -> Option<Arc<IrFunction>> {
        self.state.read().functions.get(callable).cloned()
    }

    /// Specialization for a defined function at its declared argument types.
    pub fn specialization(&self, path: &str) -> CheckResult<Specialization> {
        let callable = CallableRef::parse(path)
            .ok_or_else(|| BorrowCheckError::other(format!("invalid callable path `{path}`")))?;
        self.get(&callable)
            .map(|f| f.specialization())
            .ok_or_else(|| BorrowCheckError::unavailable(&callable, "not defined"))
    }

    pub fn len(&self) -> usize {
        self.state.read().functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl IrProvider for Program {
    fn fetch(&self, spec: &Specialization, detail: IrDetail) -> CheckResult<Arc<IrFunction>> {
        let Some(function) = self.get(&spec.callable) else {
            return Err(BorrowCheckError::unavailable(
                &spec.callable,
                "no body is defined",
            ));
        };

        if function.arg_count() != spec.arg_types.len() {
            return Err(BorrowCheckError::unavailable(
                &spec.callable,
                format!(
                    "no method for {} arguments (body takes {})",
                    spec.arg_types.len(),
                    function.arg_count()
                ),
            ));
        }

        match detail {
            IrDetail::Typed => Ok(function),
            IrDetail::Lowered => Ok(Arc::new(function.erase_types())),
        }
    }

    fn generation(&self) -> Generation {
        self.state.read().generation
    }

    fn module_kind(&self, module: &ModuleId) -> ModuleKind {
        if self.state.read().library_modules.contains(module) {
            ModuleKind::Library
        } else {
            ModuleKind::User
        }
    }
}
