//! Single-pass Pratt parser and bytecode emitter.
//!
//! There is no intermediate AST: `Compiler` advances the token stream and
//! emits bytecode into the current function-compiler context's chunk in
//! the same pass, in contrast to the teacher's `atlas-runtime::compiler`,
//! which walks an already-built `ast::Program`. The precedence-climbing
//! structure and the locals/upvalue bookkeeping below are a direct
//! generalization of the teacher's `Local`/`UpvalueCapture`/`UpvalueContext`
//! machinery (see `compiler/mod.rs` in the teacher) to the tree-less shape
//! this spec requires.

use crate::chunk::Opcode;
use crate::errors::CompileError;
use crate::heap::{GcRef, Heap};
use crate::interner::Interner;
use crate::object::{HeapObject, ObjFunction, UpvalueDescriptor};
use crate::scanner::{Scanner, Token, TokenKind};
use crate::value::Value;

const MAX_LOCALS: usize = 256;
const MAX_UPVALUES: usize = 256;
/// Should equal the VM's frame capacity (`VmConfig::default().frame_capacity`);
/// nesting deeper than this can never be called without overflowing it.
const MAX_NESTED_FUNCTIONS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
enum Precedence {
    None,
    Assignment, // =
    Or,         // or
    And,        // and
    Equality,   // == !=
    Comparison, // < > <= >=
    Term,       // + -
    Factor,     // * / %
    Unary,      // ! -
    Power,      // ^
    Call,       // ()
    Primary,
}

impl Precedence {
    fn next(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Power,
            Precedence::Power => Precedence::Call,
            Precedence::Call | Precedence::Primary => Precedence::Primary,
        }
    }
}

fn infix_precedence(kind: TokenKind) -> Precedence {
    use TokenKind::*;
    match kind {
        Or => Precedence::Or,
        And => Precedence::And,
        EqualEqual | BangEqual => Precedence::Equality,
        Less | LessEqual | Greater | GreaterEqual => Precedence::Comparison,
        Plus | Minus => Precedence::Term,
        Star | Slash | Percent => Precedence::Factor,
        Caret => Precedence::Power,
        LeftParen => Precedence::Call,
        _ => Precedence::None,
    }
}

/// A local variable known to the current function-compiler context.
/// `depth == -1` marks "declared but not yet initialized" (spec invariant
/// 4): reading it is a compile error.
struct Local {
    name: String,
    depth: i32,
    captured: bool,
}

/// Per-nesting-level state, one per function currently being compiled.
/// The outermost (`Script`) context sits at the bottom of `Compiler::contexts`.
struct FunctionContext {
    function: ObjFunction,
    kind: FunctionKind,
    locals: Vec<Local>,
    scope_depth: i32,
    upvalues: Vec<UpvalueDescriptor>,
}

impl FunctionContext {
    fn new(kind: FunctionKind, name: Option<GcRef>) -> Self {
        // Slot 0 is reserved for the callee itself; claiming it with an
        // empty, already-initialized local keeps GET_LOCAL/SET_LOCAL
        // frame-relative indexing uniform between the top-level script
        // and nested functions.
        let locals = vec![Local {
            name: String::new(),
            depth: 0,
            captured: false,
        }];
        Self {
            function: ObjFunction::new(name),
            kind,
            locals,
            scope_depth: 0,
            upvalues: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionKind {
    Script,
    Function,
}

/// One compile-time diagnostic: the error plus where it was raised.
#[derive(Debug, Clone)]
pub struct CompileIssue {
    pub error: CompileError,
    pub line: u32,
    /// The lexeme at the point of the error, or `None` when it was raised
    /// at end-of-file.
    pub lexeme: Option<String>,
}

type CResult<T> = Result<T, CompileError>;

/// Single-pass Pratt parser / bytecode emitter.
pub struct Compiler<'src, 'heap> {
    scanner: Scanner<'src>,
    heap: &'heap mut Heap,
    interner: &'heap mut Interner,
    previous: Token<'src>,
    current: Token<'src>,
    had_error: bool,
    panic_mode: bool,
    issues: Vec<CompileIssue>,
    contexts: Vec<FunctionContext>,
}

impl<'src, 'heap> Compiler<'src, 'heap> {
    /// Compile `source` to a top-level function object, or collect the
    /// diagnostics for every error found.
    ///
    /// Takes the VM's own heap and string interner so that string constants
    /// produced at compile time (identifiers, literals) share identity with
    /// strings the VM produces at run time — equality on `Value::Obj` is by
    /// `GcRef`, so two equal strings must resolve to the same handle.
    pub fn compile(
        source: &'src str,
        heap: &'heap mut Heap,
        interner: &'heap mut Interner,
    ) -> Result<GcRef, Vec<CompileIssue>> {
        let mut scanner = Scanner::new(source);
        let first = scanner.scan_token();
        let mut compiler = Compiler {
            scanner,
            heap,
            interner,
            previous: first,
            current: first,
            had_error: false,
            panic_mode: false,
            issues: Vec::new(),
            contexts: vec![FunctionContext::new(FunctionKind::Script, None)],
        };
        compiler.skip_error_tokens();

        while !compiler.check(TokenKind::Eof) {
            if let Err(e) = compiler.declaration() {
                compiler.report(e);
                compiler.synchronize();
            }
        }

        if compiler.had_error {
            return Err(compiler.issues);
        }

        let ctx = compiler.contexts.pop().expect("script context present");
        let mut function = ctx.function;
        function.chunk.emit_op(Opcode::Null, compiler.previous.line);
        function.chunk.emit_op(Opcode::Return, compiler.previous.line);
        let function_ref = compiler.heap.allocate(HeapObject::Function(function));
        Ok(function_ref)
    }

    // --- token stream plumbing -------------------------------------------------

    fn skip_error_tokens(&mut self) {
        while self.current.kind == TokenKind::Error {
            let message = compile_error_for_lexeme(self.current.lexeme);
            self.report_at(message, self.current.line, None);
            self.current = self.scanner.scan_token();
        }
    }

    fn advance(&mut self) {
        self.previous = self.current;
        self.current = self.scanner.scan_token();
        self.skip_error_tokens();
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn match_token(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume(&mut self, kind: TokenKind, error: CompileError) -> CResult<()> {
        if self.check(kind) {
            self.advance();
            Ok(())
        } else {
            Err(error)
        }
    }

    fn report(&mut self, error: CompileError) {
        let (line, lexeme) = if self.previous.kind == TokenKind::Eof {
            (self.previous.line, None)
        } else {
            (self.previous.line, Some(self.previous.lexeme.to_string()))
        };
        self.report_at(error, line, lexeme);
    }

    fn report_at(&mut self, error: CompileError, line: u32, lexeme: Option<String>) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;
        self.issues.push(CompileIssue {
            error,
            line,
            lexeme,
        });
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => self.advance(),
            }
        }
    }

    // --- bytecode emission ------------------------------------------------------

    fn current_ctx(&mut self) -> &mut FunctionContext {
        self.contexts.last_mut().expect("at least one context")
    }

    fn emit(&mut self, op: Opcode) {
        let line = self.previous.line;
        self.current_ctx().function.chunk.emit_op(op, line);
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.current_ctx().function.chunk.emit_byte(byte, line);
    }

    fn emit_u16(&mut self, value: u16) {
        let line = self.previous.line;
        self.current_ctx().function.chunk.emit_u16(value, line);
    }

    fn emit_constant(&mut self, value: Value) -> CResult<()> {
        let idx = self
            .current_ctx()
            .function
            .chunk
            .add_constant(value)
            .map_err(|_| CompileError::TooManyConstants)?;
        self.emit(Opcode::Constant);
        self.emit_byte(idx);
        Ok(())
    }

    fn intern(&mut self, text: &str) -> GcRef {
        self.interner.intern(self.heap, text)
    }

    fn emit_jump(&mut self, op: Opcode) -> usize {
        self.emit(op);
        self.emit_u16(0xFFFF);
        self.current_ctx().function.chunk.current_offset() - 2
    }

    fn patch_jump(&mut self, offset: usize) -> CResult<()> {
        self.current_ctx()
            .function
            .chunk
            .patch_jump(offset)
            .map_err(|_| CompileError::JumpTooLarge)
    }

    fn emit_loop(&mut self, loop_start: usize) -> CResult<()> {
        self.emit(Opcode::Loop);
        let offset = self.current_ctx().function.chunk.current_offset() - loop_start + 2;
        if offset > u16::MAX as usize {
            return Err(CompileError::LoopBodyTooLarge);
        }
        self.emit_u16(offset as u16);
        Ok(())
    }

    // --- scopes, locals, upvalues ------------------------------------------------

    fn begin_scope(&mut self) {
        self.current_ctx().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        let ctx = self.current_ctx();
        ctx.scope_depth -= 1;
        let depth = ctx.scope_depth;
        while let Some(local) = ctx.locals.last() {
            if local.depth <= depth {
                break;
            }
            if local.captured {
                self.emit(Opcode::CloseUpvalue);
            } else {
                self.emit(Opcode::Pop);
            }
            self.current_ctx().locals.pop();
        }
    }

    fn add_local(&mut self, name: String) -> CResult<()> {
        let ctx = self.current_ctx();
        if ctx.locals.len() >= MAX_LOCALS {
            return Err(CompileError::TooManyLocals);
        }
        ctx.locals.push(Local {
            name,
            depth: -1,
            captured: false,
        });
        Ok(())
    }

    fn declare_variable(&mut self, name: &str) -> CResult<()> {
        let ctx = self.current_ctx();
        if ctx.scope_depth == 0 {
            return Ok(());
        }
        let depth = ctx.scope_depth;
        for local in ctx.locals.iter().rev() {
            if local.depth != -1 && local.depth < depth {
                break;
            }
            if local.name == name {
                return Err(CompileError::DuplicateLocal);
            }
        }
        self.add_local(name.to_string())
    }

    fn mark_initialized(&mut self) {
        let ctx = self.current_ctx();
        if ctx.scope_depth == 0 {
            return;
        }
        let depth = ctx.scope_depth;
        if let Some(local) = ctx.locals.last_mut() {
            local.depth = depth;
        }
    }

    fn resolve_local(&self, ctx_index: usize, name: &str) -> CResult<Option<u8>> {
        let ctx = &self.contexts[ctx_index];
        for (i, local) in ctx.locals.iter().enumerate().rev() {
            if local.name == name {
                if local.depth == -1 {
                    return Err(CompileError::ReadInOwnInitializer);
                }
                return Ok(Some(i as u8));
            }
        }
        Ok(None)
    }

    fn add_upvalue(&mut self, ctx_index: usize, is_local: bool, index: u8) -> CResult<u8> {
        let ctx = &mut self.contexts[ctx_index];
        for (i, uv) in ctx.upvalues.iter().enumerate() {
            if uv.is_local == is_local && uv.index == index {
                return Ok(i as u8);
            }
        }
        if ctx.upvalues.len() >= MAX_UPVALUES {
            return Err(CompileError::TooManyUpvalues);
        }
        ctx.upvalues.push(UpvalueDescriptor { is_local, index });
        ctx.function.upvalue_count = ctx.upvalues.len() as u8;
        Ok((ctx.upvalues.len() - 1) as u8)
    }

    /// Recursive upvalue resolution: a local in the immediate parent is
    /// captured directly (`is_local = true`); anything further out chains
    /// through the parent's own upvalue table (`is_local = false`).
    fn resolve_upvalue(&mut self, ctx_index: usize, name: &str) -> CResult<Option<u8>> {
        if ctx_index == 0 {
            return Ok(None);
        }
        let parent_index = ctx_index - 1;
        if let Some(local) = self.resolve_local(parent_index, name)? {
            self.contexts[parent_index].locals[local as usize].captured = true;
            return Ok(Some(self.add_upvalue(ctx_index, true, local)?));
        }
        if let Some(upvalue) = self.resolve_upvalue(parent_index, name)? {
            return Ok(Some(self.add_upvalue(ctx_index, false, upvalue)?));
        }
        Ok(None)
    }

    // --- declarations & statements -----------------------------------------------

    fn declaration(&mut self) -> CResult<()> {
        if self.match_token(TokenKind::Var) {
            self.var_declaration()
        } else if self.match_token(TokenKind::Fun) {
            self.fun_declaration()
        } else {
            self.statement()
        }
    }

    fn parse_variable_name(&mut self, error: CompileError) -> CResult<u8> {
        self.consume(TokenKind::Identifier, error)?;
        let name = self.previous.lexeme.to_string();
        self.declare_variable(&name)?;
        if self.current_ctx().scope_depth > 0 {
            return Ok(0);
        }
        let name_ref = self.intern(&name);
        self.emit_constant_index(Value::Obj(name_ref))
    }

    fn emit_constant_index(&mut self, value: Value) -> CResult<u8> {
        self.current_ctx()
            .function
            .chunk
            .add_constant(value)
            .map_err(|_| CompileError::TooManyConstants)
    }

    fn define_variable(&mut self, global_idx: u8) {
        if self.current_ctx().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit(Opcode::DefineGlobal);
        self.emit_byte(global_idx);
    }

    fn var_declaration(&mut self) -> CResult<()> {
        let global_idx = self.parse_variable_name(CompileError::ExpectVariableName)?;
        if self.match_token(TokenKind::Equal) {
            self.expression()?;
        } else {
            self.emit(Opcode::Null);
        }
        self.consume(TokenKind::Semicolon, CompileError::ExpectSemicolon)?;
        self.define_variable(global_idx);
        Ok(())
    }

    fn fun_declaration(&mut self) -> CResult<()> {
        self.consume(TokenKind::Identifier, CompileError::ExpectVariableName)?;
        let name = self.previous.lexeme.to_string();
        self.declare_variable(&name)?;
        if self.current_ctx().scope_depth > 0 {
            self.mark_initialized();
        }
        let global_idx = if self.current_ctx().scope_depth == 0 {
            let name_ref = self.intern(&name);
            Some(self.emit_constant_index(Value::Obj(name_ref))?)
        } else {
            None
        };
        self.function(FunctionKind::Function, &name)?;
        if let Some(idx) = global_idx {
            self.emit(Opcode::DefineGlobal);
            self.emit_byte(idx);
        }
        Ok(())
    }

    fn function(&mut self, kind: FunctionKind, name: &str) -> CResult<()> {
        if self.contexts.len() >= MAX_NESTED_FUNCTIONS {
            return Err(CompileError::TooManyNestedFunctions);
        }
        let name_ref = self.intern(name);
        self.contexts.push(FunctionContext::new(kind, Some(name_ref)));
        self.begin_scope();

        self.consume(TokenKind::LeftParen, CompileError::ExpectLeftParen("function name"))?;
        if !self.check(TokenKind::RightParen) {
            loop {
                if self.current_ctx().function.arity == 255 {
                    return Err(CompileError::TooManyParameters);
                }
                self.current_ctx().function.arity += 1;
                let param_idx = self.parse_variable_name(CompileError::ExpectVariableName)?;
                self.define_variable(param_idx);
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, CompileError::ExpectRightParen)?;
        self.consume(TokenKind::LeftBrace, CompileError::ExpectRightBrace)?;
        self.block()?;

        self.emit(Opcode::Null);
        self.emit(Opcode::Return);

        let finished = self.contexts.pop().expect("pushed above");
        let upvalues = finished.upvalues.clone();
        let function_ref = self.heap.allocate(HeapObject::Function(finished.function));
        self.emit_constant(Value::Obj(function_ref))?;
        // emit_constant already wrote CONSTANT + idx; now append CLOSURE
        // metadata describing how to resolve each upvalue.
        self.rewrite_last_constant_as_closure(upvalues);
        Ok(())
    }

    /// `emit_constant` already pushed `CONSTANT <idx>`; splice a `CLOSURE`
    /// opcode in its place (same idx) followed by the upvalue descriptor
    /// pairs, since `CLOSURE`'s first operand is also a constant index.
    fn rewrite_last_constant_as_closure(&mut self, upvalues: Vec<UpvalueDescriptor>) {
        let ctx = self.current_ctx();
        let code = &mut ctx.function.chunk.code;
        let len = code.len();
        // Layout just emitted: [CONSTANT, idx]. Replace the opcode byte.
        code[len - 2] = Opcode::Closure as u8;
        for uv in upvalues {
            self.emit_byte(uv.is_local as u8);
            self.emit_byte(uv.index);
        }
    }

    fn block(&mut self) -> CResult<()> {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            if let Err(e) = self.declaration() {
                self.report(e);
                self.synchronize();
            }
        }
        self.consume(TokenKind::RightBrace, CompileError::ExpectRightBrace)
    }

    fn statement(&mut self) -> CResult<()> {
        if self.match_token(TokenKind::Print) {
            self.print_statement()
        } else if self.match_token(TokenKind::If) {
            self.if_statement()
        } else if self.match_token(TokenKind::While) {
            self.while_statement()
        } else if self.match_token(TokenKind::For) {
            self.for_statement()
        } else if self.match_token(TokenKind::Return) {
            self.return_statement()
        } else if self.match_token(TokenKind::LeftBrace) {
            self.begin_scope();
            let result = self.block();
            self.end_scope();
            result
        } else {
            self.expression_statement()
        }
    }

    fn print_statement(&mut self) -> CResult<()> {
        self.expression()?;
        self.consume(TokenKind::Semicolon, CompileError::ExpectSemicolon)?;
        self.emit(Opcode::Print);
        Ok(())
    }

    fn expression_statement(&mut self) -> CResult<()> {
        self.expression()?;
        self.consume(TokenKind::Semicolon, CompileError::ExpectSemicolon)?;
        self.emit(Opcode::Pop);
        Ok(())
    }

    fn if_statement(&mut self) -> CResult<()> {
        self.consume(TokenKind::LeftParen, CompileError::ExpectLeftParen("if"))?;
        self.expression()?;
        self.consume(TokenKind::RightParen, CompileError::ExpectRightParen)?;

        let then_jump = self.emit_jump(Opcode::JumpIfFalse);
        self.emit(Opcode::Pop);
        self.statement()?;

        let else_jump = self.emit_jump(Opcode::Jump);
        self.patch_jump(then_jump)?;
        self.emit(Opcode::Pop);

        if self.match_token(TokenKind::Else) {
            self.statement()?;
        }
        self.patch_jump(else_jump)?;
        Ok(())
    }

    fn while_statement(&mut self) -> CResult<()> {
        let loop_start = self.current_ctx().function.chunk.current_offset();
        self.consume(TokenKind::LeftParen, CompileError::ExpectLeftParen("while"))?;
        self.expression()?;
        self.consume(TokenKind::RightParen, CompileError::ExpectRightParen)?;

        let exit_jump = self.emit_jump(Opcode::JumpIfFalse);
        self.emit(Opcode::Pop);
        self.statement()?;
        self.emit_loop(loop_start)?;

        self.patch_jump(exit_jump)?;
        self.emit(Opcode::Pop);
        Ok(())
    }

    fn for_statement(&mut self) -> CResult<()> {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, CompileError::ExpectLeftParen("for"))?;

        if self.match_token(TokenKind::Semicolon) {
            // no initializer
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration()?;
        } else {
            self.expression_statement()?;
        }

        let mut loop_start = self.current_ctx().function.chunk.current_offset();
        let mut exit_jump = None;
        if !self.match_token(TokenKind::Semicolon) {
            self.expression()?;
            self.consume(TokenKind::Semicolon, CompileError::ExpectSemicolon)?;
            exit_jump = Some(self.emit_jump(Opcode::JumpIfFalse));
            self.emit(Opcode::Pop);
        }

        if !self.match_token(TokenKind::RightParen) {
            let body_jump = self.emit_jump(Opcode::Jump);
            let increment_start = self.current_ctx().function.chunk.current_offset();
            self.expression()?;
            self.emit(Opcode::Pop);
            self.consume(TokenKind::RightParen, CompileError::ExpectRightParen)?;

            self.emit_loop(loop_start)?;
            loop_start = increment_start;
            self.patch_jump(body_jump)?;
        }

        self.statement()?;
        self.emit_loop(loop_start)?;

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump)?;
            self.emit(Opcode::Pop);
        }

        self.end_scope();
        Ok(())
    }

    fn return_statement(&mut self) -> CResult<()> {
        if self.contexts.last().unwrap().kind == FunctionKind::Script {
            return Err(CompileError::ReturnFromTopLevel);
        }
        if self.match_token(TokenKind::Semicolon) {
            self.emit(Opcode::Null);
            self.emit(Opcode::Return);
        } else {
            self.expression()?;
            self.consume(TokenKind::Semicolon, CompileError::ExpectSemicolon)?;
            self.emit(Opcode::Return);
        }
        Ok(())
    }

    // --- expressions --------------------------------------------------------------

    fn expression(&mut self) -> CResult<()> {
        self.parse_precedence(Precedence::Assignment)
    }

    fn parse_precedence(&mut self, precedence: Precedence) -> CResult<()> {
        self.advance();
        let can_assign = precedence <= Precedence::Assignment;
        self.prefix(self.previous.kind, can_assign)?;

        while precedence <= infix_precedence(self.current.kind) {
            self.advance();
            self.infix(self.previous.kind, can_assign)?;
        }

        if can_assign && self.match_token(TokenKind::Equal) {
            return Err(CompileError::InvalidAssignmentTarget);
        }
        Ok(())
    }

    fn prefix(&mut self, kind: TokenKind, can_assign: bool) -> CResult<()> {
        use TokenKind::*;
        match kind {
            LeftParen => self.grouping(),
            Minus | Bang => self.unary(kind),
            Int => self.int_literal(),
            Float => self.float_literal(),
            String => self.string_literal(),
            True | False | Null => self.literal(kind),
            Identifier => self.variable(can_assign),
            _ => Err(CompileError::ExpectExpression),
        }
    }

    fn infix(&mut self, kind: TokenKind, can_assign: bool) -> CResult<()> {
        use TokenKind::*;
        match kind {
            Plus | Minus | Star | Slash | Percent | EqualEqual | BangEqual | Less | LessEqual
            | Greater | GreaterEqual => self.binary(kind),
            Caret => self.power(),
            And => self.and(),
            Or => self.or(),
            LeftParen => self.call(),
            _ => {
                let _ = can_assign;
                Ok(())
            }
        }
    }

    fn grouping(&mut self) -> CResult<()> {
        self.expression()?;
        self.consume(TokenKind::RightParen, CompileError::ExpectRightParen)
    }

    fn unary(&mut self, kind: TokenKind) -> CResult<()> {
        self.parse_precedence(Precedence::Unary)?;
        match kind {
            TokenKind::Minus => self.emit(Opcode::Negate),
            TokenKind::Bang => self.emit(Opcode::Not),
            _ => unreachable!(),
        }
        Ok(())
    }

    fn binary(&mut self, kind: TokenKind) -> CResult<()> {
        let prec = infix_precedence(kind);
        self.parse_precedence(prec.next())?;
        match kind {
            TokenKind::Plus => self.emit(Opcode::Add),
            TokenKind::Minus => self.emit(Opcode::Subtract),
            TokenKind::Star => self.emit(Opcode::Multiply),
            TokenKind::Slash => self.emit(Opcode::Divide),
            TokenKind::Percent => self.emit(Opcode::Modulo),
            TokenKind::EqualEqual => self.emit(Opcode::Equal),
            TokenKind::BangEqual => {
                self.emit(Opcode::Equal);
                self.emit(Opcode::Not);
            }
            TokenKind::Less => self.emit(Opcode::Less),
            TokenKind::LessEqual => {
                self.emit(Opcode::Greater);
                self.emit(Opcode::Not);
            }
            TokenKind::Greater => self.emit(Opcode::Greater),
            TokenKind::GreaterEqual => {
                self.emit(Opcode::Less);
                self.emit(Opcode::Not);
            }
            _ => unreachable!(),
        }
        Ok(())
    }

    /// `^` is right-associative, unlike the other arithmetic operators:
    /// parse the RHS at `Power` precedence itself, not `Power.next()`.
    fn power(&mut self) -> CResult<()> {
        self.parse_precedence(Precedence::Power)?;
        self.emit(Opcode::Power);
        Ok(())
    }

    fn and(&mut self) -> CResult<()> {
        let end_jump = self.emit_jump(Opcode::JumpIfFalse);
        self.emit(Opcode::Pop);
        self.parse_precedence(Precedence::And)?;
        self.patch_jump(end_jump)
    }

    fn or(&mut self) -> CResult<()> {
        let else_jump = self.emit_jump(Opcode::JumpIfFalse);
        let end_jump = self.emit_jump(Opcode::Jump);
        self.patch_jump(else_jump)?;
        self.emit(Opcode::Pop);
        self.parse_precedence(Precedence::Or)?;
        self.patch_jump(end_jump)
    }

    fn call(&mut self) -> CResult<()> {
        let mut argc: u32 = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression()?;
                argc += 1;
                if argc > 255 {
                    return Err(CompileError::TooManyArguments);
                }
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, CompileError::ExpectRightParen)?;
        self.emit(Opcode::Call);
        self.emit_byte(argc as u8);
        Ok(())
    }

    fn int_literal(&mut self) -> CResult<()> {
        let value: i64 = self.previous.lexeme.parse().map_err(|_| CompileError::ExpectExpression)?;
        self.emit_constant(Value::Int(value))
    }

    fn float_literal(&mut self) -> CResult<()> {
        let value: f64 = self.previous.lexeme.parse().map_err(|_| CompileError::ExpectExpression)?;
        self.emit_constant(Value::Float(value))
    }

    fn string_literal(&mut self) -> CResult<()> {
        let raw = self.previous.lexeme;
        let text = &raw[1..raw.len() - 1];
        let r = self.intern(text);
        self.emit_constant(Value::Obj(r))
    }

    fn literal(&mut self, kind: TokenKind) -> CResult<()> {
        match kind {
            TokenKind::True => self.emit(Opcode::True),
            TokenKind::False => self.emit(Opcode::False),
            TokenKind::Null => self.emit(Opcode::Null),
            _ => unreachable!(),
        }
        Ok(())
    }

    fn variable(&mut self, can_assign: bool) -> CResult<()> {
        let name = self.previous.lexeme.to_string();
        self.named_variable(&name, can_assign)
    }

    fn named_variable(&mut self, name: &str, can_assign: bool) -> CResult<()> {
        let ctx_index = self.contexts.len() - 1;
        let (get_op, set_op, arg): (Opcode, Opcode, u8) =
            if let Some(slot) = self.resolve_local(ctx_index, name)? {
                (Opcode::GetLocal, Opcode::SetLocal, slot)
            } else if let Some(upvalue) = self.resolve_upvalue(ctx_index, name)? {
                (Opcode::GetUpvalue, Opcode::SetUpvalue, upvalue)
            } else {
                let name_ref = self.intern(name);
                let idx = self.emit_constant_index(Value::Obj(name_ref))?;
                (Opcode::GetGlobal, Opcode::SetGlobal, idx)
            };

        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression()?;
            self.emit(set_op);
            self.emit_byte(arg);
        } else {
            self.emit(get_op);
            self.emit_byte(arg);
        }
        Ok(())
    }
}

/// Map a scanner error-token message back to a [`CompileError`] variant.
fn compile_error_for_lexeme(message: &str) -> CompileError {
    match message {
        "Unterminated string." => CompileError::UnterminatedString,
        _ => CompileError::UnexpectedCharacter,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_ok(src: &str) -> (GcRef, Heap) {
        let mut heap = Heap::new(1 << 20, 2);
        let mut interner = Interner::new();
        let r = Compiler::compile(src, &mut heap, &mut interner).unwrap_or_else(|issues| {
            panic!("unexpected compile errors: {:?}", issues.iter().map(|i| &i.error).collect::<Vec<_>>())
        });
        (r, heap)
    }

    fn compile_err(src: &str) -> Vec<CompileError> {
        let mut heap = Heap::new(1 << 20, 2);
        let mut interner = Interner::new();
        match Compiler::compile(src, &mut heap, &mut interner) {
            Ok(_) => panic!("expected compile error for: {src}"),
            Err(issues) => issues.into_iter().map(|i| i.error).collect(),
        }
    }

    #[test]
    fn compiles_trivial_print() {
        let (r, heap) = compile_ok("print 1 + 2 * 3;");
        match heap.resolve(r) {
            HeapObject::Function(f) => assert!(!f.chunk.code.is_empty()),
            _ => panic!(),
        }
    }

    #[test]
    fn rejects_reading_local_in_own_initializer() {
        let errs = compile_err("{ var a = a; }");
        assert_eq!(errs, vec![CompileError::ReadInOwnInitializer]);
    }

    #[test]
    fn rejects_duplicate_local_in_same_scope() {
        let errs = compile_err("{ var a = 1; var a = 2; }");
        assert_eq!(errs, vec![CompileError::DuplicateLocal]);
    }

    #[test]
    fn rejects_return_at_top_level() {
        let errs = compile_err("return 1;");
        assert_eq!(errs, vec![CompileError::ReturnFromTopLevel]);
    }

    #[test]
    fn accepts_255_parameters_rejects_256() {
        let params: Vec<String> = (0..255).map(|i| format!("p{i}")).collect();
        let src_ok = format!("fun f({}) {{ return 0; }}", params.join(", "));
        let (_r, _h) = compile_ok(&src_ok);

        let params2: Vec<String> = (0..256).map(|i| format!("p{i}")).collect();
        let src_bad = format!("fun f({}) {{ return 0; }}", params2.join(", "));
        let errs = compile_err(&src_bad);
        assert_eq!(errs, vec![CompileError::TooManyParameters]);
    }

    #[test]
    fn too_many_constants_in_one_chunk_errors() {
        let mut src = String::new();
        for i in 0..300 {
            src.push_str(&format!("print {i};\n"));
        }
        let errs = compile_err(&src);
        assert!(errs.contains(&CompileError::TooManyConstants));
    }
}
