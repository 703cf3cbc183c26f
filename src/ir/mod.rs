//! Read-only view of a lowered function body.
//!
//! A function is a control-flow graph of basic blocks. Blocks own contiguous
//! ranges of a flat statement vector, every statement owns exactly one result
//! slot, and operands refer to arguments, earlier (or, through phi nodes,
//! later) statement results, or constants.

pub mod builder;
pub mod parse;
pub mod program;
pub mod types;

use crate::error::{BorrowCheckError, CheckResult};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

pub use builder::FunctionBuilder;
pub use program::{Generation, IrProvider, ModuleKind, Program};
pub use types::{StructDef, Ty, TypeEnv};

// ============================================================================
// Identities
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleId(pub String);

impl ModuleId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModuleId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// A callable identified by defining module and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallableRef {
    pub module: ModuleId,
    pub name: String,
}

impl CallableRef {
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            module: ModuleId::new(module),
            name: name.into(),
        }
    }

    /// Parse `module.name`; the split happens at the last dot.
    pub fn parse(path: &str) -> Option<Self> {
        let (module, name) = path.rsplit_once('.')?;
        if module.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self::new(module, name))
    }
}

impl fmt::Display for CallableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.module, self.name)
    }
}

/// A callable paired with concrete argument types: the unit of caching.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Specialization {
    pub callable: CallableRef,
    pub arg_types: Vec<Ty>,
}

impl Specialization {
    pub fn new(callable: CallableRef, arg_types: Vec<Ty>) -> Self {
        Self {
            callable,
            arg_types,
        }
    }
}

impl fmt::Display for Specialization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({})",
            self.callable,
            self.arg_types.iter().map(|t| t.to_string()).join(", ")
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub usize);

impl BlockId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

// ============================================================================
// Operands and statements
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Int(i64),
    Float(f64),
    Bool(bool),
    Nothing,
    Str(String),
    Symbol(String),
}

impl Constant {
    pub fn ty(&self) -> Ty {
        match self {
            Constant::Int(_) => Ty::Int,
            Constant::Float(_) => Ty::Float,
            Constant::Bool(_) => Ty::Bool,
            Constant::Nothing => Ty::Nothing,
            Constant::Str(_) => Ty::Str,
            Constant::Symbol(_) => Ty::Symbol,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Int(v) => write!(f, "{v}"),
            Constant::Float(v) => write!(f, "{v:?}"),
            Constant::Bool(v) => write!(f, "{v}"),
            Constant::Nothing => f.write_str("nothing"),
            Constant::Str(s) => write!(f, "{s:?}"),
            Constant::Symbol(s) => write!(f, ":{s}"),
        }
    }
}

/// A statement operand. Indices are 0-based.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Arg(usize),
    Ssa(usize),
    Const(Constant),
}

impl Operand {
    pub fn int(v: i64) -> Self {
        Operand::Const(Constant::Int(v))
    }

    pub fn nothing() -> Self {
        Operand::Const(Constant::Nothing)
    }

    pub fn symbol(s: impl Into<String>) -> Self {
        Operand::Const(Constant::Symbol(s.into()))
    }

    pub fn str(s: impl Into<String>) -> Self {
        Operand::Const(Constant::Str(s.into()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallTarget {
    /// Target resolved at lowering time.
    Static(CallableRef),
    /// Target is a runtime value (dynamic dispatch, closure call).
    Dynamic(Operand),
}

/// One argument in its surface form, before positional normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum CallArg {
    Positional(Operand),
    Keyword(String, Operand),
    /// Expands a tuple-like value into trailing positions.
    Splat(Operand),
}

impl CallArg {
    pub fn operand(&self) -> &Operand {
        match self {
            CallArg::Positional(op) | CallArg::Keyword(_, op) | CallArg::Splat(op) => op,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// Identity-preserving copy of a handle.
    Copy(Operand),
    Call {
        target: CallTarget,
        args: Vec<CallArg>,
    },
    /// Native call whose effects cannot be summarized.
    Foreign {
        symbol: String,
        args: Vec<Operand>,
    },
    /// Fresh allocation of `ty` initialised from `args`.
    New {
        ty: Ty,
        args: Vec<Operand>,
    },
    /// Reference to a process-wide global binding.
    GlobalRef(String),
    /// Join of values flowing in from predecessor blocks.
    Phi(Vec<(BlockId, Operand)>),
    Goto(BlockId),
    Branch {
        cond: Operand,
        then_block: BlockId,
        else_block: BlockId,
    },
    Return(Operand),
    Nop,
}

impl StmtKind {
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            StmtKind::Goto(_) | StmtKind::Branch { .. } | StmtKind::Return(_)
        )
    }

    pub fn is_phi(&self) -> bool {
        matches!(self, StmtKind::Phi(_))
    }

    /// Every operand this statement reads, in source order. Phi operands are
    /// included; liveness attributes them to predecessor edges instead.
    pub fn operands(&self) -> Vec<&Operand> {
        match self {
            StmtKind::Copy(op) | StmtKind::Return(op) => vec![op],
            StmtKind::Call { target, args } => {
                let mut out = Vec::with_capacity(args.len() + 1);
                if let CallTarget::Dynamic(callee) = target {
                    out.push(callee);
                }
                out.extend(args.iter().map(CallArg::operand));
                out
            }
            StmtKind::Foreign { args, .. } | StmtKind::New { args, .. } => args.iter().collect(),
            StmtKind::Phi(edges) => edges.iter().map(|(_, op)| op).collect(),
            StmtKind::Branch { cond, .. } => vec![cond],
            StmtKind::GlobalRef(_) | StmtKind::Goto(_) | StmtKind::Nop => Vec::new(),
        }
    }

    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            StmtKind::Goto(target) => vec![*target],
            StmtKind::Branch {
                then_block,
                else_block,
                ..
            } => {
                if then_block == else_block {
                    vec![*then_block]
                } else {
                    vec![*then_block, *else_block]
                }
            }
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    /// Static type of the result slot.
    pub ty: Ty,
    /// Source-level binding the result is assigned to, if any.
    pub binding: Option<String>,
    pub line: Option<u32>,
    /// Original source text of the statement, when known.
    pub text: Option<String>,
}

impl Stmt {
    pub fn new(kind: StmtKind, ty: Ty) -> Self {
        Self {
            kind,
            ty,
            binding: None,
            line: None,
            text: None,
        }
    }

    /// A statement whose result slot is unused.
    pub fn effect(kind: StmtKind) -> Self {
        Self::new(kind, Ty::Nothing)
    }

    pub fn bind(mut self, name: impl Into<String>) -> Self {
        self.binding = Some(name.into());
        self
    }

    pub fn at_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub id: BlockId,
    pub stmts: Range<usize>,
    pub succs: Vec<BlockId>,
    pub preds: Vec<BlockId>,
}

// ============================================================================
// Function bodies
// ============================================================================

#[derive(Debug, Clone)]
pub struct IrFunction {
    pub callable: CallableRef,
    pub arg_names: Vec<String>,
    pub arg_types: Vec<Ty>,
    pub ret_type: Ty,
    pub stmts: Vec<Stmt>,
    pub blocks: Vec<Block>,
    pub file: Option<String>,
    pub types: TypeEnv,
}

impl IrFunction {
    /// Assemble a function from per-block statement lists and validate it.
    pub fn from_blocks(
        callable: CallableRef,
        args: Vec<(String, Ty)>,
        ret_type: Ty,
        blocks: Vec<Vec<Stmt>>,
        file: Option<String>,
        types: TypeEnv,
    ) -> CheckResult<Self> {
        if blocks.is_empty() {
            return Err(BorrowCheckError::invalid_ir(&callable, "function has no blocks"));
        }

        let (arg_names, arg_types): (Vec<_>, Vec<_>) = args.into_iter().unzip();
        let mut stmts = Vec::new();
        let mut ranges = Vec::with_capacity(blocks.len());

        for block in blocks {
            let start = stmts.len();
            stmts.extend(block);
            ranges.push(start..stmts.len());
        }

        let mut built = Vec::with_capacity(ranges.len());
        for (index, range) in ranges.into_iter().enumerate() {
            let id = BlockId(index);
            let Some(last) = range.end.checked_sub(1).filter(|last| *last >= range.start) else {
                return Err(BorrowCheckError::invalid_ir(
                    &callable,
                    format!("{id} is empty"),
                ));
            };
            let succs = stmts[last].kind.successors();
            built.push(Block {
                id,
                stmts: range,
                succs,
                preds: Vec::new(),
            });
        }

        for index in 0..built.len() {
            let succs = built[index].succs.clone();
            for succ in succs {
                if let Some(target) = built.get_mut(succ.0) {
                    target.preds.push(BlockId(index));
                }
            }
        }

        let function = Self {
            callable,
            arg_names,
            arg_types,
            ret_type,
            stmts,
            blocks: built,
            file,
            types,
        };
        function.validate()?;
        Ok(function)
    }

    fn validate(&self) -> CheckResult<()> {
        let fail = |reason: String| Err(BorrowCheckError::invalid_ir(&self.callable, reason));

        for block in &self.blocks {
            for idx in block.stmts.clone() {
                let stmt = &self.stmts[idx];
                let is_last = idx + 1 == block.stmts.end;
                if stmt.kind.is_terminator() != is_last {
                    return fail(if is_last {
                        format!("{} does not end in a terminator", block.id)
                    } else {
                        format!("terminator %{} is not the last statement of {}", idx + 1, block.id)
                    });
                }

                for succ in stmt.kind.successors() {
                    if succ.0 >= self.blocks.len() {
                        return fail(format!("%{} jumps to missing block {succ}", idx + 1));
                    }
                }

                for op in stmt.kind.operands() {
                    match op {
                        Operand::Arg(a) if *a >= self.arg_names.len() => {
                            return fail(format!("%{} reads missing argument #{}", idx + 1, a + 1));
                        }
                        Operand::Ssa(s) if *s >= self.stmts.len() => {
                            return fail(format!("%{} reads missing value %{}", idx + 1, s + 1));
                        }
                        _ => {}
                    }
                }

                if let StmtKind::Phi(edges) = &stmt.kind {
                    for (pred, _) in edges {
                        if !block.preds.contains(pred) {
                            return fail(format!(
                                "phi %{} names {pred}, which is not a predecessor of {}",
                                idx + 1,
                                block.id
                            ));
                        }
                    }
                }
            }
        }

        Ok(())
    }

    pub fn arg_count(&self) -> usize {
        self.arg_names.len()
    }

    pub fn entry(&self) -> BlockId {
        BlockId(0)
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0]
    }

    pub fn specialization(&self) -> Specialization {
        Specialization::new(self.callable.clone(), self.arg_types.clone())
    }

    pub fn operand_type(&self, op: &Operand) -> Ty {
        match op {
            Operand::Arg(a) => self.arg_types.get(*a).cloned().unwrap_or(Ty::Any),
            Operand::Ssa(s) => self.stmts.get(*s).map(|s| s.ty.clone()).unwrap_or(Ty::Any),
            Operand::Const(c) => c.ty(),
        }
    }

    /// Blocks reachable from the entry in reverse post-order.
    pub fn reverse_post_order(&self) -> Vec<BlockId> {
        let mut visited = vec![false; self.blocks.len()];
        let mut post = Vec::with_capacity(self.blocks.len());
        let mut stack = vec![(self.entry(), 0usize)];
        visited[0] = true;

        while let Some((block, next)) = stack.pop() {
            let succs = &self.blocks[block.0].succs;
            if let Some(succ) = succs.get(next) {
                stack.push((block, next + 1));
                if !visited[succ.0] {
                    visited[succ.0] = true;
                    stack.push((*succ, 0));
                }
            } else {
                post.push(block);
            }
        }

        post.reverse();
        post
    }

    /// Copy of this function with every type erased to `Any`.
    pub fn erase_types(&self) -> Self {
        let mut erased = self.clone();
        for ty in &mut erased.arg_types {
            *ty = Ty::Any;
        }
        for stmt in &mut erased.stmts {
            stmt.ty = Ty::Any;
        }
        erased.ret_type = Ty::Any;
        erased
    }

    // ------------------------------------------------------------------------
    // Rendering
    // ------------------------------------------------------------------------

    pub fn render_operand(&self, op: &Operand) -> String {
        match op {
            Operand::Arg(a) => self
                .arg_names
                .get(*a)
                .cloned()
                .unwrap_or_else(|| format!("#{}", a + 1)),
            Operand::Ssa(s) => format!("%{}", s + 1),
            Operand::Const(c) => c.to_string(),
        }
    }

    fn render_args(&self, args: &[CallArg]) -> String {
        args.iter()
            .map(|arg| match arg {
                CallArg::Positional(op) => self.render_operand(op),
                CallArg::Keyword(name, op) => format!("{name}={}", self.render_operand(op)),
                CallArg::Splat(op) => format!("...{}", self.render_operand(op)),
            })
            .join(", ")
    }

    /// The call expression of a call-like statement, e.g. `core.push(x, 1)`.
    pub fn render_call_expr(&self, idx: usize) -> Option<String> {
        match &self.stmts.get(idx)?.kind {
            StmtKind::Call { target, args } => {
                let callee = match target {
                    CallTarget::Static(c) => c.to_string(),
                    CallTarget::Dynamic(op) => format!("dyn {}", self.render_operand(op)),
                };
                Some(format!("{callee}({})", self.render_args(args)))
            }
            StmtKind::Foreign { symbol, args } => Some(format!(
                "foreign {symbol:?}({})",
                args.iter().map(|op| self.render_operand(op)).join(", ")
            )),
            StmtKind::New { ty, args } => Some(format!(
                "new {ty}({})",
                args.iter().map(|op| self.render_operand(op)).join(", ")
            )),
            _ => None,
        }
    }

    /// Lowered form of statement `idx`, e.g. `%3 = call core.push(x, 1)`.
    pub fn render_stmt(&self, idx: usize) -> String {
        let stmt = &self.stmts[idx];
        let body = match &stmt.kind {
            StmtKind::Copy(op) => format!("copy {}", self.render_operand(op)),
            StmtKind::Call { .. } => {
                format!("call {}", self.render_call_expr(idx).unwrap_or_default())
            }
            StmtKind::Foreign { .. } | StmtKind::New { .. } => {
                self.render_call_expr(idx).unwrap_or_default()
            }
            StmtKind::GlobalRef(name) => format!("global {name}"),
            StmtKind::Phi(edges) => format!(
                "phi [{}]",
                edges
                    .iter()
                    .map(|(b, op)| format!("{b}: {}", self.render_operand(op)))
                    .join(", ")
            ),
            StmtKind::Goto(b) => return format!("goto {b}"),
            StmtKind::Branch {
                cond,
                then_block,
                else_block,
            } => {
                return format!(
                    "branch {} {then_block} {else_block}",
                    self.render_operand(cond)
                );
            }
            StmtKind::Return(op) => return format!("return {}", self.render_operand(op)),
            StmtKind::Nop => return "nop".to_string(),
        };
        format!("%{} = {body}", idx + 1)
    }
}

impl fmt::Display for IrFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args = self
            .arg_names
            .iter()
            .zip(&self.arg_types)
            .map(|(n, t)| format!("{n}: {t}"))
            .join(", ");
        writeln!(f, "fn {}({args}) -> {}", self.callable, self.ret_type)?;
        for block in &self.blocks {
            writeln!(f, "{}:", block.id)?;
            for idx in block.stmts.clone() {
                let stmt = &self.stmts[idx];
                write!(f, "  {}", self.render_stmt(idx))?;
                if !stmt.kind.is_terminator() && stmt.ty != Ty::Nothing {
                    write!(f, " : {}", stmt.ty)?;
                }
                if let Some(binding) = &stmt.binding {
                    write!(f, " !{binding}")?;
                }
                if let Some(line) = stmt.line {
                    write!(f, " @{line}")?;
                }
                writeln!(f)?;
            }
        }
        f.write_str("end")
    }
}
