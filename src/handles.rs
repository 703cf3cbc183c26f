//! The handle index space.
//!
//! Handle `0` is reserved for "not tracked". Handles `1..=n` are the `n`
//! function arguments, followed by one handle per statement result.

use crate::ir::{IrFunction, Operand};
use crate::type_classifier::TrackingClassifier;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Handle(pub u32);

impl Handle {
    pub const NONE: Handle = Handle(0);

    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "h{}", self.0)
    }
}

/// What a handle denotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Arg(usize),
    Stmt(usize),
}

/// Handle numbering and tracked mask for one function body.
#[derive(Debug, Clone)]
pub struct HandleSpace {
    arg_count: usize,
    tracked: Vec<bool>,
    names: Vec<String>,
}

impl HandleSpace {
    pub fn new(function: &IrFunction, classifier: &TrackingClassifier<'_>) -> Self {
        let arg_count = function.arg_count();
        let total = 1 + arg_count + function.stmts.len();
        let mut tracked = Vec::with_capacity(total);
        let mut names = Vec::with_capacity(total);

        tracked.push(false);
        names.push(String::new());

        for (name, ty) in function.arg_names.iter().zip(&function.arg_types) {
            tracked.push(classifier.is_tracked(ty));
            names.push(name.clone());
        }
        for (idx, stmt) in function.stmts.iter().enumerate() {
            tracked.push(!stmt.kind.is_terminator() && classifier.is_tracked(&stmt.ty));
            names.push(
                stmt.binding
                    .clone()
                    .unwrap_or_else(|| format!("%{}", idx + 1)),
            );
        }

        Self {
            arg_count,
            tracked,
            names,
        }
    }

    /// Number of slots, including the reserved handle 0.
    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }

    pub fn arg_count(&self) -> usize {
        self.arg_count
    }

    pub fn of_arg(&self, index: usize) -> Handle {
        Handle((index + 1) as u32)
    }

    pub fn of_stmt(&self, index: usize) -> Handle {
        Handle((self.arg_count + 1 + index) as u32)
    }

    /// The tracked handle an operand reads, or [`Handle::NONE`].
    pub fn of_operand(&self, op: &Operand) -> Handle {
        let handle = match op {
            Operand::Arg(a) => self.of_arg(*a),
            Operand::Ssa(s) => self.of_stmt(*s),
            Operand::Const(_) => return Handle::NONE,
        };
        if self.is_tracked(handle) {
            handle
        } else {
            Handle::NONE
        }
    }

    /// The tracked handle defined by statement `index`, or [`Handle::NONE`].
    pub fn defined_by(&self, index: usize) -> Handle {
        let handle = self.of_stmt(index);
        if self.is_tracked(handle) {
            handle
        } else {
            Handle::NONE
        }
    }

    pub fn is_tracked(&self, handle: Handle) -> bool {
        self.tracked.get(handle.index()).copied().unwrap_or(false)
    }

    pub fn slot(&self, handle: Handle) -> Option<Slot> {
        let index = handle.index();
        if index == 0 || index >= self.tracked.len() {
            None
        } else if index <= self.arg_count {
            Some(Slot::Arg(index - 1))
        } else {
            Some(Slot::Stmt(index - self.arg_count - 1))
        }
    }

    /// Source-level name of the binding a handle was assigned to.
    pub fn name(&self, handle: Handle) -> &str {
        self.names
            .get(handle.index())
            .map(String::as_str)
            .unwrap_or("?")
    }

    pub fn tracked_handles(&self) -> impl Iterator<Item = Handle> + '_ {
        self.tracked
            .iter()
            .enumerate()
            .filter(|(_, t)| **t)
            .map(|(i, _)| Handle(i as u32))
    }
}
