//! Line-oriented text format for function bodies.
//!
//! ```text
//! module app
//! library module core
//! mutable struct Counter { n: Int }
//!
//! fn bump(c: Counter, xs: Array<Int>) -> Array<Int> in "app.src"
//! bb0:
//!   %1 = copy xs : Array<Int> !ys @3 -- ys = xs
//!   %2 = call core.set_index(xs, 1, 0) @4
//!   branch true bb1 bb1
//! bb1:
//!   return %1
//! end
//! ```
//!
//! Statements are numbered from `%1` in textual order; an explicit `%N =`
//! prefix must match that position. `#` starts a comment, `--` attaches the
//! rest of the line as the statement's source text. A symbol literal is a
//! colon immediately followed by a name (`:key`); a type annotation colon must
//! be followed by whitespace.

use crate::error::{BorrowCheckError, CheckResult};
use crate::ir::{
    BlockId, CallArg, CallTarget, CallableRef, Constant, IrFunction, ModuleId, Operand, Stmt,
    StmtKind, StructDef, Ty, TypeEnv,
};

/// Everything defined by one source text.
#[derive(Debug, Default)]
pub struct ParsedSource {
    pub functions: Vec<IrFunction>,
    pub library_modules: Vec<ModuleId>,
}

pub fn parse_module(source: &str) -> CheckResult<ParsedSource> {
    Parser::new(source).run()
}

/// Parse a single type expression such as `Dict<Symbol, Array<Int>>`.
pub fn parse_type(text: &str) -> CheckResult<Ty> {
    let tokens = lex_line(text, 1)?;
    let mut cursor = Cursor::new(&tokens, 1);
    let ty = cursor.ty()?;
    cursor.expect_end()?;
    Ok(ty)
}

// ============================================================================
// Lexer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Value(usize),
    Int(i64),
    Float(f64),
    Str(String),
    Symbol(String),
    Punct(char),
    Arrow,
    Ellipsis,
    /// Source text attached with `--`.
    Text(String),
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.'
}

fn lex_line(line: &str, line_no: usize) -> CheckResult<Vec<Token>> {
    let chars: Vec<char> = line.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '#' {
            break;
        }
        if c == '-' && chars.get(i + 1) == Some(&'-') {
            let text: String = chars[i + 2..].iter().collect();
            tokens.push(Token::Text(text.trim().to_owned()));
            break;
        }
        if c == '-' && chars.get(i + 1) == Some(&'>') {
            tokens.push(Token::Arrow);
            i += 2;
            continue;
        }
        if c == '.' && chars.get(i + 1) == Some(&'.') && chars.get(i + 2) == Some(&'.') {
            tokens.push(Token::Ellipsis);
            i += 3;
            continue;
        }
        if c == '"' {
            let mut text = String::new();
            i += 1;
            loop {
                match chars.get(i) {
                    None => return Err(BorrowCheckError::parse(line_no, "unterminated string")),
                    Some('"') => break,
                    Some('\\') => {
                        match chars.get(i + 1) {
                            Some('n') => text.push('\n'),
                            Some(other) => text.push(*other),
                            None => {
                                return Err(BorrowCheckError::parse(
                                    line_no,
                                    "unterminated string",
                                ));
                            }
                        }
                        i += 2;
                        continue;
                    }
                    Some(other) => text.push(*other),
                }
                i += 1;
            }
            tokens.push(Token::Str(text));
            i += 1;
            continue;
        }
        if c == '%' {
            let start = i + 1;
            let mut end = start;
            while end < chars.len() && chars[end].is_ascii_digit() {
                end += 1;
            }
            let digits: String = chars[start..end].iter().collect();
            let n: usize = digits
                .parse()
                .map_err(|_| BorrowCheckError::parse(line_no, "expected value number after `%`"))?;
            if n == 0 {
                return Err(BorrowCheckError::parse(line_no, "values are numbered from %1"));
            }
            tokens.push(Token::Value(n));
            i = end;
            continue;
        }
        if c == ':' && chars.get(i + 1).is_some_and(|n| n.is_alphabetic() || *n == '_') {
            let start = i + 1;
            let mut end = start;
            while end < chars.len() && is_ident_char(chars[end]) {
                end += 1;
            }
            tokens.push(Token::Symbol(chars[start..end].iter().collect()));
            i = end;
            continue;
        }
        let negative = c == '-' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit());
        if c.is_ascii_digit() || negative {
            let start = i;
            let mut end = if negative { i + 1 } else { i };
            let mut is_float = false;
            while end < chars.len() && (chars[end].is_ascii_digit() || chars[end] == '.') {
                if chars[end] == '.' {
                    is_float = true;
                }
                end += 1;
            }
            let text: String = chars[start..end].iter().collect();
            let token = if is_float {
                text.parse()
                    .map(Token::Float)
                    .map_err(|_| BorrowCheckError::parse(line_no, format!("bad number `{text}`")))?
            } else {
                text.parse()
                    .map(Token::Int)
                    .map_err(|_| BorrowCheckError::parse(line_no, format!("bad number `{text}`")))?
            };
            tokens.push(token);
            i = end;
            continue;
        }
        if is_ident_char(c) {
            let start = i;
            while i < chars.len() && is_ident_char(chars[i]) {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
            continue;
        }
        if "()[]{}<>,:=@!".contains(c) {
            tokens.push(Token::Punct(c));
            i += 1;
            continue;
        }
        return Err(BorrowCheckError::parse(
            line_no,
            format!("unexpected character `{c}`"),
        ));
    }

    Ok(tokens)
}

// ============================================================================
// Token cursor
// ============================================================================

struct Cursor<'t> {
    tokens: &'t [Token],
    pos: usize,
    line: usize,
}

impl<'t> Cursor<'t> {
    fn new(tokens: &'t [Token], line: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            line,
        }
    }

    fn err<T>(&self, message: impl Into<String>) -> CheckResult<T> {
        Err(BorrowCheckError::parse(self.line, message))
    }

    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&'t Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn eat_punct(&mut self, c: char) -> bool {
        if self.peek() == Some(&Token::Punct(c)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, c: char) -> CheckResult<()> {
        if self.eat_punct(c) {
            Ok(())
        } else {
            self.err(format!("expected `{c}`, found {}", self.describe()))
        }
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        if matches!(self.peek(), Some(Token::Ident(w)) if w == word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn ident(&mut self) -> CheckResult<String> {
        match self.next() {
            Some(Token::Ident(name)) => Ok(name.clone()),
            _ => {
                self.pos -= 1;
                self.err(format!("expected a name, found {}", self.describe()))
            }
        }
    }

    fn expect_end(&self) -> CheckResult<()> {
        if self.at_end() {
            Ok(())
        } else {
            self.err(format!("unexpected trailing {}", self.describe()))
        }
    }

    fn describe(&self) -> String {
        match self.peek() {
            None => "end of line".to_string(),
            Some(Token::Ident(s)) => format!("`{s}`"),
            Some(Token::Value(n)) => format!("`%{n}`"),
            Some(Token::Int(n)) => format!("`{n}`"),
            Some(Token::Float(n)) => format!("`{n}`"),
            Some(Token::Str(s)) => format!("{s:?}"),
            Some(Token::Symbol(s)) => format!("`:{s}`"),
            Some(Token::Punct(c)) => format!("`{c}`"),
            Some(Token::Arrow) => "`->`".to_string(),
            Some(Token::Ellipsis) => "`...`".to_string(),
            Some(Token::Text(_)) => "source text".to_string(),
        }
    }

    fn ty(&mut self) -> CheckResult<Ty> {
        let name = self.ident()?;
        let params = if self.eat_punct('<') {
            let mut params = vec![self.ty()?];
            while self.eat_punct(',') {
                params.push(self.ty()?);
            }
            self.expect_punct('>')?;
            params
        } else {
            Vec::new()
        };

        let arity = |n: usize, cursor: &Self| -> CheckResult<()> {
            if params.len() == n {
                Ok(())
            } else {
                cursor.err(format!("`{name}` takes {n} type parameter(s)"))
            }
        };

        let ty = match name.as_str() {
            "Int" => Ty::Int,
            "Float" => Ty::Float,
            "Bool" => Ty::Bool,
            "Char" => Ty::Char,
            "Nothing" => Ty::Nothing,
            "Symbol" => Ty::Symbol,
            "Str" => Ty::Str,
            "Type" => Ty::TypeTag,
            "Ptr" => Ty::Ptr,
            "Fn" => Ty::Fn,
            "Any" => Ty::Any,
            "Tuple" => Ty::Tuple(params.clone()),
            "Union" => Ty::Union(params.clone()),
            "Array" => {
                arity(1, self)?;
                Ty::array(params[0].clone())
            }
            "Ref" => {
                arity(1, self)?;
                Ty::reference(params[0].clone())
            }
            "Dict" => {
                arity(2, self)?;
                Ty::dict(params[0].clone(), params[1].clone())
            }
            _ => {
                arity(0, self)?;
                Ty::named(name.clone())
            }
        };
        Ok(ty)
    }
}

// ============================================================================
// Parser
// ============================================================================

struct FunctionDraft {
    callable: CallableRef,
    args: Vec<(String, Ty)>,
    ret_type: Ty,
    file: Option<String>,
    blocks: Vec<Vec<Stmt>>,
    stmt_count: usize,
    start_line: usize,
}

struct Parser<'s> {
    lines: Vec<(usize, &'s str)>,
    module: ModuleId,
    types: TypeEnv,
    out: ParsedSource,
}

impl<'s> Parser<'s> {
    fn new(source: &'s str) -> Self {
        Self {
            lines: source.lines().enumerate().map(|(i, l)| (i + 1, l)).collect(),
            module: ModuleId::new("main"),
            types: TypeEnv::new(),
            out: ParsedSource::default(),
        }
    }

    fn run(mut self) -> CheckResult<ParsedSource> {
        let mut drafts = Vec::new();
        let mut current: Option<FunctionDraft> = None;
        let lines = std::mem::take(&mut self.lines);

        for (line_no, raw) in lines {
            let tokens = lex_line(raw, line_no)?;
            if tokens.is_empty() {
                continue;
            }
            let mut cursor = Cursor::new(&tokens, line_no);

            if let Some(draft) = current.as_mut() {
                if cursor.eat_keyword("end") {
                    cursor.expect_end()?;
                    if let Some(done) = current.take() {
                        drafts.push(done);
                    }
                } else {
                    Self::body_line(draft, &mut cursor)?;
                }
                continue;
            }

            if cursor.eat_keyword("module") {
                self.module = ModuleId::new(cursor.ident()?);
                cursor.expect_end()?;
            } else if cursor.eat_keyword("library") {
                if !cursor.eat_keyword("module") {
                    return cursor.err("expected `module` after `library`");
                }
                self.module = ModuleId::new(cursor.ident()?);
                cursor.expect_end()?;
                self.out.library_modules.push(self.module.clone());
            } else if cursor.eat_keyword("mutable") {
                if !cursor.eat_keyword("struct") {
                    return cursor.err("expected `struct` after `mutable`");
                }
                self.struct_decl(&mut cursor, true)?;
            } else if cursor.eat_keyword("struct") {
                self.struct_decl(&mut cursor, false)?;
            } else if cursor.eat_keyword("fn") {
                current = Some(self.fn_header(&mut cursor, line_no)?);
            } else {
                return cursor.err(format!("expected a declaration, found {}", cursor.describe()));
            }
        }

        if let Some(draft) = current {
            return Err(BorrowCheckError::parse(
                draft.start_line,
                format!("function `{}` is missing `end`", draft.callable),
            ));
        }

        for draft in drafts {
            let function = IrFunction::from_blocks(
                draft.callable,
                draft.args,
                draft.ret_type,
                draft.blocks,
                draft.file,
                self.types.clone(),
            )?;
            self.out.functions.push(function);
        }
        Ok(self.out)
    }

    fn struct_decl(&mut self, cursor: &mut Cursor<'_>, mutable: bool) -> CheckResult<()> {
        let mut def = StructDef::new(cursor.ident()?, mutable);
        cursor.expect_punct('{')?;
        if !cursor.eat_punct('}') {
            loop {
                let field = cursor.ident()?;
                cursor.expect_punct(':')?;
                def = def.field(field, cursor.ty()?);
                if cursor.eat_punct('}') {
                    break;
                }
                cursor.expect_punct(',')?;
            }
        }
        cursor.expect_end()?;
        self.types.insert(def);
        Ok(())
    }

    fn fn_header(&self, cursor: &mut Cursor<'_>, line_no: usize) -> CheckResult<FunctionDraft> {
        let name = cursor.ident()?;
        let callable = if name.contains('.') {
            CallableRef::parse(&name)
                .ok_or_else(|| BorrowCheckError::parse(line_no, format!("bad name `{name}`")))?
        } else {
            CallableRef::new(self.module.as_str(), name)
        };

        cursor.expect_punct('(')?;
        let mut args = Vec::new();
        if !cursor.eat_punct(')') {
            loop {
                let arg = cursor.ident()?;
                cursor.expect_punct(':')?;
                args.push((arg, cursor.ty()?));
                if cursor.eat_punct(')') {
                    break;
                }
                cursor.expect_punct(',')?;
            }
        }

        let ret_type = if cursor.peek() == Some(&Token::Arrow) {
            cursor.next();
            cursor.ty()?
        } else {
            Ty::Any
        };

        let file = if cursor.eat_keyword("in") {
            match cursor.next() {
                Some(Token::Str(file)) => Some(file.clone()),
                _ => return cursor.err("expected a file name string after `in`"),
            }
        } else {
            None
        };
        cursor.expect_end()?;

        Ok(FunctionDraft {
            callable,
            args,
            ret_type,
            file,
            blocks: Vec::new(),
            stmt_count: 0,
            start_line: line_no,
        })
    }

    fn body_line(draft: &mut FunctionDraft, cursor: &mut Cursor<'_>) -> CheckResult<()> {
        // Block label: `bbN:`
        if let Some(Token::Ident(label)) = cursor.peek() {
            if let Some(index) = block_label(label) {
                if cursor.tokens.get(cursor.pos + 1) == Some(&Token::Punct(':'))
                    && cursor.tokens.len() == cursor.pos + 2
                {
                    if index != draft.blocks.len() {
                        return cursor.err(format!(
                            "expected label bb{}, found bb{index}",
                            draft.blocks.len()
                        ));
                    }
                    draft.blocks.push(Vec::new());
                    return Ok(());
                }
            }
        }

        if draft.blocks.is_empty() {
            draft.blocks.push(Vec::new());
        }

        let position = draft.stmt_count + 1;
        if let Some(Token::Value(n)) = cursor.peek() {
            if cursor.tokens.get(cursor.pos + 1) == Some(&Token::Punct('=')) {
                if *n != position {
                    return cursor.err(format!("expected %{position}, found %{n}"));
                }
                cursor.pos += 2;
            }
        }

        let kind = Self::stmt_kind(draft, cursor)?;
        let mut stmt = Stmt::new(kind, Ty::Any);
        let mut explicit_ty = None;

        while !cursor.at_end() {
            match cursor.next() {
                Some(Token::Punct(':')) => explicit_ty = Some(cursor.ty()?),
                Some(Token::Punct('!')) => stmt.binding = Some(cursor.ident()?),
                Some(Token::Punct('@')) => match cursor.next() {
                    Some(Token::Int(line)) if *line > 0 => match u32::try_from(*line) {
                        Ok(line) => stmt.line = Some(line),
                        Err(_) => return cursor.err(format!("line number {line} is out of range")),
                    },
                    _ => return cursor.err("expected a line number after `@`"),
                },
                Some(Token::Text(text)) => stmt.text = Some(text.clone()),
                _ => {
                    cursor.pos -= 1;
                    return cursor.err(format!("unexpected {}", cursor.describe()));
                }
            }
        }

        stmt.ty = match explicit_ty {
            Some(ty) => ty,
            None => Self::default_type(draft, &stmt.kind),
        };

        if let Some(block) = draft.blocks.last_mut() {
            block.push(stmt);
        }
        draft.stmt_count += 1;
        Ok(())
    }

    fn default_type(draft: &FunctionDraft, kind: &StmtKind) -> Ty {
        match kind {
            StmtKind::New { ty, .. } => ty.clone(),
            StmtKind::Copy(Operand::Arg(a)) => {
                draft.args.get(*a).map(|(_, t)| t.clone()).unwrap_or(Ty::Any)
            }
            StmtKind::Copy(Operand::Ssa(s)) => draft
                .blocks
                .iter()
                .flatten()
                .nth(*s)
                .map(|stmt| stmt.ty.clone())
                .unwrap_or(Ty::Any),
            StmtKind::Copy(Operand::Const(c)) => c.ty(),
            k if k.is_terminator() => Ty::Nothing,
            StmtKind::Nop => Ty::Nothing,
            _ => Ty::Any,
        }
    }

    fn stmt_kind(draft: &FunctionDraft, cursor: &mut Cursor<'_>) -> CheckResult<StmtKind> {
        let keyword = cursor.ident()?;
        let kind = match keyword.as_str() {
            "copy" => StmtKind::Copy(Self::operand(draft, cursor)?),
            "call" => {
                let target = if cursor.eat_keyword("dyn") {
                    CallTarget::Dynamic(Self::operand(draft, cursor)?)
                } else {
                    let name = cursor.ident()?;
                    let callable = CallableRef::parse(&name).ok_or_else(|| {
                        BorrowCheckError::parse(cursor.line, format!("callee `{name}` needs a module"))
                    })?;
                    CallTarget::Static(callable)
                };
                StmtKind::Call {
                    target,
                    args: Self::call_args(draft, cursor)?,
                }
            }
            "foreign" => {
                let symbol = match cursor.next() {
                    Some(Token::Str(s)) => s.clone(),
                    _ => return cursor.err("expected a symbol string after `foreign`"),
                };
                StmtKind::Foreign {
                    symbol,
                    args: Self::operand_list(draft, cursor)?,
                }
            }
            "new" => {
                let ty = cursor.ty()?;
                StmtKind::New {
                    ty,
                    args: Self::operand_list(draft, cursor)?,
                }
            }
            "global" => StmtKind::GlobalRef(cursor.ident()?),
            "phi" => {
                cursor.expect_punct('[')?;
                let mut edges = Vec::new();
                if !cursor.eat_punct(']') {
                    loop {
                        let label = cursor.ident()?;
                        let block = Self::block_ref(cursor, &label)?;
                        cursor.expect_punct(':')?;
                        edges.push((block, Self::operand(draft, cursor)?));
                        if cursor.eat_punct(']') {
                            break;
                        }
                        cursor.expect_punct(',')?;
                    }
                }
                StmtKind::Phi(edges)
            }
            "goto" => {
                let label = cursor.ident()?;
                StmtKind::Goto(Self::block_ref(cursor, &label)?)
            }
            "branch" => {
                let cond = Self::operand(draft, cursor)?;
                let then_label = cursor.ident()?;
                let then_block = Self::block_ref(cursor, &then_label)?;
                let else_label = cursor.ident()?;
                let else_block = Self::block_ref(cursor, &else_label)?;
                StmtKind::Branch {
                    cond,
                    then_block,
                    else_block,
                }
            }
            "return" => StmtKind::Return(Self::operand(draft, cursor)?),
            "nop" => StmtKind::Nop,
            other => return cursor.err(format!("unknown statement `{other}`")),
        };
        Ok(kind)
    }

    fn block_ref(cursor: &Cursor<'_>, label: &str) -> CheckResult<BlockId> {
        match block_label(label) {
            Some(index) => Ok(BlockId(index)),
            None => cursor.err(format!("expected a block label, found `{label}`")),
        }
    }

    fn operand(draft: &FunctionDraft, cursor: &mut Cursor<'_>) -> CheckResult<Operand> {
        let op = match cursor.next() {
            Some(Token::Value(n)) => Operand::Ssa(n - 1),
            Some(Token::Int(v)) => Operand::Const(Constant::Int(*v)),
            Some(Token::Float(v)) => Operand::Const(Constant::Float(*v)),
            Some(Token::Str(s)) => Operand::Const(Constant::Str(s.clone())),
            Some(Token::Symbol(s)) => Operand::Const(Constant::Symbol(s.clone())),
            Some(Token::Ident(name)) => match name.as_str() {
                "true" => Operand::Const(Constant::Bool(true)),
                "false" => Operand::Const(Constant::Bool(false)),
                "nothing" => Operand::Const(Constant::Nothing),
                _ => match draft.args.iter().position(|(n, _)| n == name) {
                    Some(index) => Operand::Arg(index),
                    None => return cursor.err(format!("unknown argument `{name}`")),
                },
            },
            _ => {
                cursor.pos -= 1;
                return cursor.err(format!("expected an operand, found {}", cursor.describe()));
            }
        };
        Ok(op)
    }

    fn operand_list(draft: &FunctionDraft, cursor: &mut Cursor<'_>) -> CheckResult<Vec<Operand>> {
        cursor.expect_punct('(')?;
        let mut ops = Vec::new();
        if cursor.eat_punct(')') {
            return Ok(ops);
        }
        loop {
            ops.push(Self::operand(draft, cursor)?);
            if cursor.eat_punct(')') {
                return Ok(ops);
            }
            cursor.expect_punct(',')?;
        }
    }

    fn call_args(draft: &FunctionDraft, cursor: &mut Cursor<'_>) -> CheckResult<Vec<CallArg>> {
        cursor.expect_punct('(')?;
        let mut args = Vec::new();
        if cursor.eat_punct(')') {
            return Ok(args);
        }
        loop {
            let arg = if cursor.peek() == Some(&Token::Ellipsis) {
                cursor.next();
                CallArg::Splat(Self::operand(draft, cursor)?)
            } else if matches!(cursor.peek(), Some(Token::Ident(_)))
                && cursor.tokens.get(cursor.pos + 1) == Some(&Token::Punct('='))
            {
                let name = cursor.ident()?;
                cursor.expect_punct('=')?;
                CallArg::Keyword(name, Self::operand(draft, cursor)?)
            } else {
                CallArg::Positional(Self::operand(draft, cursor)?)
            };
            args.push(arg);
            if cursor.eat_punct(')') {
                return Ok(args);
            }
            cursor.expect_punct(',')?;
        }
    }
}

fn block_label(label: &str) -> Option<usize> {
    label.strip_prefix("bb")?.parse().ok()
}
