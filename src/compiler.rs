use std::io::Write;

use arrayvec::ArrayVec;

use crate::chunk::Chunk;
use crate::gc::Gc;
use crate::op;
use crate::scanner::{ScanError, Scanner, Token, TokenKind};
use crate::value::Value;

const LOCALS_MAX: usize = 256;

/// A single-pass compiler: tokens are pulled from the scanner and bytecode
/// is emitted directly into the chunk, with no syntax tree in between.
pub struct Compiler<'a, W> {
    scanner: Scanner<'a>,
    previous: Token<'a>,
    current: Token<'a>,
    had_error: bool,
    /// Set on the first error of a statement; suppresses further reports
    /// until `synchronize` finds a statement boundary.
    panic_mode: bool,

    function: &'a mut Chunk,
    gc: &'a mut Gc,
    stderr: &'a mut W,

    locals: ArrayVec<Local<'a>, LOCALS_MAX>,
    scope_depth: usize,
}

impl<'a, W: Write> Compiler<'a, W> {
    /// Compiles `source` into `function`, writing diagnostics to `stderr`.
    /// Always consumes the entire source so that multiple errors can be
    /// reported; returns whether compilation succeeded.
    pub fn compile(
        source: &'a [u8],
        function: &'a mut Chunk,
        gc: &'a mut Gc,
        stderr: &'a mut W,
    ) -> bool {
        let mut compiler = Compiler::new(source, function, gc, stderr);
        compiler.advance();
        while !compiler.matches(TokenKind::Eof) {
            compiler.declaration();
        }
        compiler.emit_u8(op::RETURN);

        if cfg!(feature = "compiler-trace") && !compiler.had_error {
            compiler.function.debug("code");
        }
        !compiler.had_error
    }

    fn new(
        source: &'a [u8],
        function: &'a mut Chunk,
        gc: &'a mut Gc,
        stderr: &'a mut W,
    ) -> Self {
        Compiler {
            scanner: Scanner::new(source),
            previous: Token::EOF,
            current: Token::EOF,
            had_error: false,
            panic_mode: false,
            function,
            gc,
            stderr,
            locals: ArrayVec::new(),
            scope_depth: 0,
        }
    }

    fn declaration(&mut self) {
        if self.matches(TokenKind::Let) {
            self.let_declaration();
        } else {
            self.statement();
        }

        if self.panic_mode {
            self.synchronize();
        }
    }

    fn let_declaration(&mut self) {
        let global = self.parse_variable("Expect let binding name.");

        if self.matches(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_u8(op::NIL);
        }
        self.consume(TokenKind::Semicolon, "Expect ';' after let declaration.");

        self.define_variable(global);
    }

    fn statement(&mut self) {
        if self.matches(TokenKind::Print) {
            self.print_statement();
        } else if self.matches(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else if self.matches(TokenKind::If) {
            self.if_statement();
        } else {
            self.expression_statement();
        }
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit_u8(op::PRINT);
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        // The condition stays on the stack across the jump; each branch
        // starts by discarding it.
        let then_jump = self.emit_jump(op::JUMP_IF_FALSE);
        self.emit_u8(op::POP);
        self.statement();
        let else_jump = self.emit_jump(op::JUMP);

        self.patch_jump(then_jump);
        self.emit_u8(op::POP);
        if self.matches(TokenKind::Else) {
            self.statement();
        }

        self.patch_jump(else_jump);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit_u8(op::POP);
    }

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let prefix = match Self::rule(self.previous.kind).prefix {
            Some(prefix) => prefix,
            None => {
                self.error("Expect expression.");
                return;
            }
        };

        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, can_assign);

        while precedence <= Self::rule(self.current.kind).precedence {
            self.advance();
            if let Some(infix) = Self::rule(self.previous.kind).infix {
                infix(self, can_assign);
            }
        }

        if can_assign && self.matches(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn grouping(&mut self, _can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn number(&mut self, _can_assign: bool) {
        // The scanner only produces number lexemes that parse as f64.
        let value: f64 = self.previous.lexeme.parse().unwrap_or_default();
        self.emit_constant(Value::Number(value));
    }

    fn string(&mut self, _can_assign: bool) {
        let object = self.gc.intern(self.previous.lexeme);
        self.emit_constant(Value::String(object));
    }

    fn literal(&mut self, _can_assign: bool) {
        match self.previous.kind {
            TokenKind::False => self.emit_u8(op::FALSE),
            TokenKind::Nil => self.emit_u8(op::NIL),
            TokenKind::True => self.emit_u8(op::TRUE),
            _ => unreachable!("literal rule on a non-literal token"),
        }
    }

    fn variable(&mut self, can_assign: bool) {
        self.named_variable(self.previous, can_assign);
    }

    fn unary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match operator {
            TokenKind::Minus => self.emit_u8(op::NEGATE),
            TokenKind::Bang => self.emit_u8(op::NOT),
            _ => unreachable!("unary rule on a non-unary token"),
        }
    }

    fn binary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        // Parsing the right operand one level tighter keeps binary
        // operators left-associative.
        self.parse_precedence(Self::rule(operator).precedence.next());
        match operator {
            TokenKind::BangEqual => self.emit_u8(op::NOT_EQUAL),
            TokenKind::EqualEqual => self.emit_u8(op::EQUAL),
            TokenKind::Greater => self.emit_u8(op::GREATER),
            TokenKind::GreaterEqual => self.emit_u8(op::GREATER_EQUAL),
            TokenKind::Less => self.emit_u8(op::LESS),
            TokenKind::LessEqual => self.emit_u8(op::LESS_EQUAL),
            TokenKind::Plus => self.emit_u8(op::ADD),
            TokenKind::Minus => self.emit_u8(op::SUBTRACT),
            TokenKind::Star => self.emit_u8(op::MULTIPLY),
            TokenKind::Slash => self.emit_u8(op::DIVIDE),
            _ => unreachable!("binary rule on a non-binary token"),
        }
    }

    fn and(&mut self, _can_assign: bool) {
        // If the left operand is falsey, it is the result: skip the right
        // operand.
        let end_jump = self.emit_jump(op::JUMP_IF_FALSE);
        self.emit_u8(op::POP);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or(&mut self, _can_assign: bool) {
        // If the left operand is truthy, it is the result: skip over the
        // unconditional jump that evaluates the right operand.
        let else_jump = self.emit_jump(op::JUMP_IF_FALSE);
        let end_jump = self.emit_jump(op::JUMP);

        self.patch_jump(else_jump);
        self.emit_u8(op::POP);
        self.parse_precedence(Precedence::Or);

        self.patch_jump(end_jump);
    }

    fn named_variable(&mut self, name: Token<'a>, can_assign: bool) {
        let (get_op, set_op, arg) = match self.resolve_local(&name) {
            Some(slot) => (op::GET_LOCAL, op::SET_LOCAL, slot),
            None => (op::GET_GLOBAL, op::SET_GLOBAL, self.identifier_constant(name)),
        };

        if can_assign && self.matches(TokenKind::Equal) {
            self.expression();
            self.emit_u8(set_op);
            self.emit_u16(arg);
        } else if let Some(binary_op) = compound_op(self.current.kind).filter(|_| can_assign) {
            // `x op= e` reads x, evaluates e, applies op, and stores back.
            self.advance();
            self.emit_u8(get_op);
            self.emit_u16(arg);
            self.expression();
            self.emit_u8(binary_op);
            self.emit_u8(set_op);
            self.emit_u16(arg);
        } else {
            self.emit_u8(get_op);
            self.emit_u16(arg);
        }
    }

    /// Consumes an identifier and declares it. Returns the constant-pool
    /// index of the name for globals, and 0 for locals (which are resolved
    /// by stack slot, not by name).
    fn parse_variable(&mut self, message: &str) -> u16 {
        self.consume(TokenKind::Identifier, message);
        self.declare_variable();
        if self.scope_depth > 0 {
            return 0;
        }
        self.identifier_constant(self.previous)
    }

    fn declare_variable(&mut self) {
        if self.scope_depth == 0 {
            return;
        }

        let name = self.previous;
        if self
            .locals
            .iter()
            .rev()
            .take_while(|local| local.depth.map_or(true, |depth| depth >= self.scope_depth))
            .any(|local| local.name.lexeme == name.lexeme)
        {
            self.error("Already a let binding with this name in this scope.");
        }
        self.add_local(name);
    }

    fn define_variable(&mut self, global: u16) {
        if self.scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_u8(op::DEFINE_GLOBAL);
        self.emit_u16(global);
    }

    fn add_local(&mut self, name: Token<'a>) {
        // The depth stays unset until the initializer has run; reading the
        // binding before then is an error.
        if self.locals.try_push(Local { name, depth: None }).is_err() {
            self.error("Too many local let bindings in function.");
        }
    }

    fn mark_initialized(&mut self) {
        if let Some(local) = self.locals.last_mut() {
            local.depth = Some(self.scope_depth);
        }
    }

    fn resolve_local(&mut self, name: &Token) -> Option<u16> {
        let (slot, initialized) = self
            .locals
            .iter()
            .enumerate()
            .rev()
            .find(|(_, local)| local.name.lexeme == name.lexeme)
            .map(|(slot, local)| (slot, local.depth.is_some()))?;

        if !initialized {
            self.error("Can't read local let binding in its own initializer.");
        }
        Some(slot as u16)
    }

    fn identifier_constant(&mut self, name: Token<'a>) -> u16 {
        let object = self.gc.intern(name.lexeme);
        self.make_constant(Value::String(object))
    }

    fn begin_scope(&mut self) {
        self.scope_depth += 1;
    }

    /// Locals live on the operand stack; leaving their scope pops them.
    fn end_scope(&mut self) {
        self.scope_depth -= 1;
        while self
            .locals
            .last()
            .map_or(false, |local| local.depth.map_or(true, |depth| depth > self.scope_depth))
        {
            self.locals.pop();
            self.emit_u8(op::POP);
        }
    }

    fn emit_u8(&mut self, byte: u8) {
        let line = self.previous.line;
        self.function.write_u8(byte, line);
    }

    fn emit_u16(&mut self, value: u16) {
        let line = self.previous.line;
        self.function.write_u16(value, line);
    }

    fn emit_constant(&mut self, value: Value) {
        let idx = self.make_constant(value);
        self.emit_u8(op::CONSTANT);
        self.emit_u16(idx);
    }

    fn make_constant(&mut self, value: Value) -> u16 {
        match self.function.add_constant(value) {
            Some(idx) => idx,
            None => {
                self.error("Too many constants.");
                0
            }
        }
    }

    /// Emits a jump with a placeholder operand and returns the operand's
    /// offset for later patching.
    fn emit_jump(&mut self, op: u8) -> usize {
        self.emit_u8(op);
        let offset = self.function.ops.len();
        self.emit_u8(0xFF);
        self.emit_u8(0xFF);
        offset
    }

    /// Patches the jump operand at `offset` to land on the next instruction
    /// to be emitted.
    fn patch_jump(&mut self, offset: usize) {
        // -2 to account for the operand itself, which is read before the
        // jump is taken.
        let jump = self.function.ops.len() - offset - 2;
        let jump = match u16::try_from(jump) {
            Ok(jump) => jump,
            Err(_) => {
                self.error("Too much code to jump over.");
                return;
            }
        };
        self.function.ops[offset] = (jump >> 8) as u8;
        self.function.ops[offset + 1] = jump as u8;
    }

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            match self.scanner.scan_token() {
                Ok(token) => {
                    self.current = token;
                    break;
                }
                Err(err) => self.scan_error(&err),
            }
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.check(kind) {
            self.advance();
        } else {
            self.error_at_current(message);
        }
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    /// Discards tokens until a statement boundary, so that one mistake does
    /// not cascade into a pile of follow-on errors.
    fn synchronize(&mut self) {
        self.panic_mode = false;

        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Let
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => {}
            }
            self.advance();
        }
    }

    fn error(&mut self, message: &str) {
        let (line, column) = (self.previous.line, self.previous.column);
        self.error_at(line, column, message);
    }

    fn error_at_current(&mut self, message: &str) {
        let (line, column) = (self.current.line, self.current.column);
        self.error_at(line, column, message);
    }

    fn scan_error(&mut self, err: &ScanError) {
        let message = err.to_string();
        self.error_at(err.line, err.column, &message);
    }

    fn error_at(&mut self, line: usize, column: usize, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;
        // Diagnostics are best-effort; a failed write has nowhere to go.
        let _ = writeln!(self.stderr, "[line {line}:{column}] Error: {message}");
    }

    fn rule(kind: TokenKind) -> ParseRule<'a, W> {
        let (prefix, infix, precedence): RuleParts<'a, W> = match kind {
            TokenKind::LeftParen => (Some(Self::grouping), None, Precedence::None),
            TokenKind::Minus => (Some(Self::unary), Some(Self::binary), Precedence::Term),
            TokenKind::Plus => (None, Some(Self::binary), Precedence::Term),
            TokenKind::Slash => (None, Some(Self::binary), Precedence::Factor),
            TokenKind::Star => (None, Some(Self::binary), Precedence::Factor),
            TokenKind::Bang => (Some(Self::unary), None, Precedence::None),
            TokenKind::BangEqual => (None, Some(Self::binary), Precedence::Equality),
            TokenKind::EqualEqual => (None, Some(Self::binary), Precedence::Equality),
            TokenKind::Greater => (None, Some(Self::binary), Precedence::Comparison),
            TokenKind::GreaterEqual => (None, Some(Self::binary), Precedence::Comparison),
            TokenKind::Less => (None, Some(Self::binary), Precedence::Comparison),
            TokenKind::LessEqual => (None, Some(Self::binary), Precedence::Comparison),
            TokenKind::Identifier => (Some(Self::variable), None, Precedence::None),
            TokenKind::String => (Some(Self::string), None, Precedence::None),
            TokenKind::Number => (Some(Self::number), None, Precedence::None),
            TokenKind::And => (None, Some(Self::and), Precedence::And),
            TokenKind::Or => (None, Some(Self::or), Precedence::Or),
            TokenKind::False => (Some(Self::literal), None, Precedence::None),
            TokenKind::Nil => (Some(Self::literal), None, Precedence::None),
            TokenKind::True => (Some(Self::literal), None, Precedence::None),
            _ => (None, None, Precedence::None),
        };
        ParseRule { prefix, infix, precedence }
    }
}

/// The binary opcode a compound-assignment token applies, if any.
fn compound_op(kind: TokenKind) -> Option<u8> {
    match kind {
        TokenKind::PlusEqual => Some(op::ADD),
        TokenKind::MinusEqual => Some(op::SUBTRACT),
        TokenKind::StarEqual => Some(op::MULTIPLY),
        TokenKind::SlashEqual => Some(op::DIVIDE),
        _ => None,
    }
}

/// Binding powers, weakest first. A token's infix rule binds its right
/// operand at the next tighter level.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
enum Precedence {
    None,
    Assignment,
    Or,
    And,
    Equality,
    Comparison,
    Term,
    Factor,
    Unary,
    Call,
    Primary,
}

impl Precedence {
    fn next(self) -> Self {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call | Precedence::Primary => Precedence::Primary,
        }
    }
}

type ParseFn<'a, W> = fn(&mut Compiler<'a, W>, bool);
type RuleParts<'a, W> = (Option<ParseFn<'a, W>>, Option<ParseFn<'a, W>>, Precedence);

struct ParseRule<'a, W> {
    prefix: Option<ParseFn<'a, W>>,
    infix: Option<ParseFn<'a, W>>,
    precedence: Precedence,
}

struct Local<'a> {
    name: Token<'a>,
    /// `None` until the initializer finishes running.
    depth: Option<usize>,
}
