use crate::error::{BorrowCheckError, CheckResult};
use crate::ir::{
    BlockId, CallArg, CallTarget, CallableRef, IrFunction, Operand, Stmt, StmtKind, Ty, TypeEnv,
};

/// Incremental construction of an [`IrFunction`].
///
/// Blocks are appended in order and statements always go to the most recent
/// block, so statement indices are known as soon as a statement is pushed.
#[derive(Debug, Clone)]
pub struct FunctionBuilder {
    callable: CallableRef,
    args: Vec<(String, Ty)>,
    ret_type: Ty,
    blocks: Vec<Vec<Stmt>>,
    next_index: usize,
    file: Option<String>,
    types: TypeEnv,
}

impl FunctionBuilder {
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            callable: CallableRef::new(module, name),
            args: Vec::new(),
            ret_type: Ty::Any,
            blocks: vec![Vec::new()],
            next_index: 0,
            file: None,
            types: TypeEnv::new(),
        }
    }

    pub fn arg(mut self, name: impl Into<String>, ty: Ty) -> Self {
        self.args.push((name.into(), ty));
        self
    }

    pub fn returns(mut self, ty: Ty) -> Self {
        self.ret_type = ty;
        self
    }

    pub fn file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn types(mut self, types: TypeEnv) -> Self {
        self.types = types;
        self
    }

    /// Operand for the argument called `name`.
    ///
    /// # Panics
    /// Panics if no such argument was declared; builder misuse is a
    /// programming error in the caller.
    pub fn arg_op(&self, name: &str) -> Operand {
        let index = self
            .args
            .iter()
            .position(|(n, _)| n == name)
            .unwrap_or_else(|| panic!("no argument named `{name}`"));
        Operand::Arg(index)
    }

    /// Operand that the next pushed statement will produce.
    pub fn next_value(&self) -> Operand {
        Operand::Ssa(self.next_index)
    }

    pub fn current_block(&self) -> BlockId {
        BlockId(self.blocks.len() - 1)
    }

    /// Start a new block; subsequent statements go there.
    pub fn start_block(&mut self) -> BlockId {
        self.blocks.push(Vec::new());
        self.current_block()
    }

    pub fn push(&mut self, stmt: Stmt) -> Operand {
        let op = Operand::Ssa(self.next_index);
        self.next_index += 1;
        if let Some(block) = self.blocks.last_mut() {
            block.push(stmt);
        }
        op
    }

    pub fn copy(&mut self, src: Operand, binding: &str, ty: Ty) -> Operand {
        self.push(Stmt::new(StmtKind::Copy(src), ty).bind(binding))
    }

    pub fn call(&mut self, callee: &str, args: Vec<Operand>, ty: Ty) -> Operand {
        let callee = CallableRef::parse(callee).unwrap_or_else(|| CallableRef::new("", callee));
        self.push(Stmt::new(
            StmtKind::Call {
                target: CallTarget::Static(callee),
                args: args.into_iter().map(CallArg::Positional).collect(),
            },
            ty,
        ))
    }

    pub fn dynamic_call(&mut self, callee: Operand, args: Vec<Operand>, ty: Ty) -> Operand {
        self.push(Stmt::new(
            StmtKind::Call {
                target: CallTarget::Dynamic(callee),
                args: args.into_iter().map(CallArg::Positional).collect(),
            },
            ty,
        ))
    }

    pub fn new_object(&mut self, ty: Ty, args: Vec<Operand>) -> Operand {
        self.push(Stmt::new(
            StmtKind::New {
                ty: ty.clone(),
                args,
            },
            ty,
        ))
    }

    pub fn global(&mut self, name: &str, ty: Ty) -> Operand {
        self.push(Stmt::new(StmtKind::GlobalRef(name.to_owned()), ty))
    }

    pub fn ret(&mut self, value: Operand) {
        self.push(Stmt::effect(StmtKind::Return(value)));
    }

    pub fn goto(&mut self, target: BlockId) {
        self.push(Stmt::effect(StmtKind::Goto(target)));
    }

    pub fn branch(&mut self, cond: Operand, then_block: BlockId, else_block: BlockId) {
        self.push(Stmt::effect(StmtKind::Branch {
            cond,
            then_block,
            else_block,
        }));
    }

    /// Bind the most recently pushed statement to a source-level name.
    pub fn name_last(&mut self, binding: &str) {
        if let Some(stmt) = self.blocks.last_mut().and_then(|b| b.last_mut()) {
            stmt.binding = Some(binding.to_owned());
        }
    }

    pub fn finish(self) -> CheckResult<IrFunction> {
        if self.blocks.iter().all(Vec::is_empty) {
            return Err(BorrowCheckError::invalid_ir(
                &self.callable,
                "function body is empty",
            ));
        }
        IrFunction::from_blocks(
            self.callable,
            self.args,
            self.ret_type,
            self.blocks,
            self.file,
            self.types,
        )
    }
}
