use std::hash::BuildHasherDefault;
use std::io::Write;
use std::ptr;

use hashbrown::hash_map::Entry;
use hashbrown::HashMap;
use rustc_hash::FxHasher;
use thiserror::Error;

use crate::chunk::Chunk;
use crate::compiler::Compiler;
use crate::gc::Gc;
use crate::object::ObjectString;
use crate::op;
use crate::util;
use crate::value::Value;

const STACK_MAX: usize = 256;

/// Outcome of one [`Vm::interpret`] call, mapped to an exit code by the
/// binary.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InterpretResult {
    Ok,
    CompileError,
    RuntimeError,
}

#[derive(Debug, Error, Eq, PartialEq)]
pub enum RuntimeError {
    #[error("Operand must be a number.")]
    UnaryOperandType,
    #[error("Operands must be numbers.")]
    BinaryOperandTypes,
    #[error("Operands must be numbers or strings.")]
    AddOperandTypes,
    #[error("Undefined let binding '{0}'.")]
    UndefinedBinding(String),
}

pub struct Vm {
    globals: HashMap<*mut ObjectString, Value, BuildHasherDefault<FxHasher>>,
    gc: Gc,

    /// `stack` can be safely accessed without bounds checking because the
    /// compiler enforces stack discipline: statements are net-zero, locals
    /// are capped at 256 slots, and execution stops at `op::RETURN`.
    stack: Box<[Value; STACK_MAX]>,
    stack_top: *mut Value,
}

impl Vm {
    pub fn new() -> Self {
        Vm {
            globals: HashMap::with_capacity_and_hasher(256, BuildHasherDefault::default()),
            gc: Gc::new(),
            stack: Box::new([Value::Nil; STACK_MAX]),
            stack_top: ptr::null_mut(),
        }
    }

    /// Compiles and runs `source`. The caller owns `function` and may reuse
    /// it across calls (see [`Chunk::reset`]); `stdout` receives `print`
    /// output and `stderr` the diagnostics.
    pub fn interpret(
        &mut self,
        source: &[u8],
        function: &mut Chunk,
        stdout: &mut impl Write,
        stderr: &mut impl Write,
    ) -> InterpretResult {
        self.stack_top = self.stack.as_mut_ptr();

        if !Compiler::compile(source, function, &mut self.gc, stderr) {
            return InterpretResult::CompileError;
        }

        match self.run(function, stdout) {
            Ok(()) => InterpretResult::Ok,
            Err((err, line)) => {
                let _ = writeln!(stderr, "{err}");
                let _ = writeln!(stderr, "[line {line}] in script");
                self.stack_top = self.stack.as_mut_ptr();
                InterpretResult::RuntimeError
            }
        }
    }

    fn run(
        &mut self,
        function: &Chunk,
        stdout: &mut impl Write,
    ) -> Result<(), (RuntimeError, usize)> {
        // Instruction pointer into the current chunk. Decoding through a raw
        // pointer is safe as long as the compiler emits well-formed code:
        // jumps land inside the chunk and execution stops at `op::RETURN`.
        let mut ip = function.ops.as_ptr();

        /// Reads one byte from the chunk.
        macro_rules! read_u8 {
            () => {{
                let byte = unsafe { *ip };
                ip = unsafe { ip.add(1) };
                byte
            }};
        }

        /// Reads a big-endian 2-byte operand from the chunk.
        macro_rules! read_u16 {
            () => {{
                let hi = read_u8!();
                let lo = read_u8!();
                u16::from_be_bytes([hi, lo])
            }};
        }

        /// Reads a [`Value`] from the constant pool.
        macro_rules! read_constant {
            () => {{
                let constant_idx = read_u16!() as usize;
                *unsafe { function.constants.get_unchecked(constant_idx) }
            }};
        }

        /// Reads an interned name from the constant pool. The compiler only
        /// emits string constants as operands of the global ops.
        macro_rules! read_string {
            () => {{
                match read_constant!() {
                    Value::String(object) => object,
                    _ => util::unreachable(),
                }
            }};
        }

        /// Pushes a value onto the stack.
        macro_rules! push {
            ($value:expr) => {{
                let value = $value;
                unsafe { *self.stack_top = value };
                self.stack_top = unsafe { self.stack_top.add(1) };
            }};
        }

        /// Pops a [`Value`] from the stack.
        macro_rules! pop {
            () => {{
                self.stack_top = unsafe { self.stack_top.sub(1) };
                unsafe { *self.stack_top }
            }};
        }

        /// Peeks at the [`Value`] `n` slots below the top of the stack.
        macro_rules! peek {
            ($n:expr) => {{
                unsafe { *self.stack_top.sub($n + 1) }
            }};
        }

        /// Fails with a runtime error, located at the last-read byte.
        macro_rules! err {
            ($err:expr) => {{
                let offset = unsafe { ip.offset_from(function.ops.as_ptr()) } as usize;
                return Err(($err, function.lines[offset - 1]));
            }};
        }

        /// Binary operator that acts on any two [`Value`]s.
        macro_rules! binary_op {
            ($op:tt) => {{
                let b = pop!();
                let a = pop!();
                push!(Value::from(a $op b));
            }};
        }

        /// Binary operator that only acts on numbers.
        macro_rules! binary_op_number {
            ($op:tt) => {{
                let b = pop!();
                let a = pop!();
                match (a, b) {
                    (Value::Number(a), Value::Number(b)) => push!(Value::from(a $op b)),
                    _ => err!(RuntimeError::BinaryOperandTypes),
                }
            }};
        }

        loop {
            if cfg!(feature = "vm-trace") {
                eprint!("     ");
                let mut slot = self.stack.as_ptr();
                while slot < self.stack_top as *const Value {
                    eprint!("[ {} ]", unsafe { *slot });
                    slot = unsafe { slot.add(1) };
                }
                eprintln!();
                let offset = unsafe { ip.offset_from(function.ops.as_ptr()) } as usize;
                function.debug_op(offset);
            }

            match read_u8!() {
                op::CONSTANT => push!(read_constant!()),
                op::NIL => push!(Value::Nil),
                op::TRUE => push!(Value::Bool(true)),
                op::FALSE => push!(Value::Bool(false)),
                op::POP => {
                    pop!();
                }
                op::GET_LOCAL => {
                    let slot = read_u16!() as usize;
                    push!(unsafe { *self.stack.as_ptr().add(slot) });
                }
                op::SET_LOCAL => {
                    let slot = read_u16!() as usize;
                    let value = peek!(0);
                    unsafe { *self.stack.as_mut_ptr().add(slot) = value };
                }
                op::GET_GLOBAL => {
                    let name = read_string!();
                    match self.globals.get(&name) {
                        Some(&value) => push!(value),
                        None => {
                            err!(RuntimeError::UndefinedBinding(
                                unsafe { (*name).value }.to_string()
                            ))
                        }
                    }
                }
                op::DEFINE_GLOBAL => {
                    let name = read_string!();
                    // Peek, bind, pop: the value stays stack-rooted until
                    // the table holds it.
                    let value = peek!(0);
                    self.globals.insert(name, value);
                    pop!();
                }
                op::SET_GLOBAL => {
                    let name = read_string!();
                    let value = peek!(0);
                    match self.globals.entry(name) {
                        Entry::Occupied(mut entry) => {
                            entry.insert(value);
                        }
                        Entry::Vacant(_) => {
                            err!(RuntimeError::UndefinedBinding(
                                unsafe { (*name).value }.to_string()
                            ))
                        }
                    }
                }
                op::EQUAL => binary_op!(==),
                op::NOT_EQUAL => binary_op!(!=),
                op::GREATER => binary_op_number!(>),
                op::GREATER_EQUAL => binary_op_number!(>=),
                op::LESS => binary_op_number!(<),
                op::LESS_EQUAL => binary_op_number!(<=),
                // ADD is a special case: it concatenates strings as well as
                // adding numbers.
                op::ADD => {
                    let b = peek!(0);
                    let a = peek!(1);
                    match (a, b) {
                        (Value::Number(a), Value::Number(b)) => {
                            pop!();
                            pop!();
                            push!(Value::from(a + b));
                        }
                        (Value::String(a), Value::String(b)) => {
                            let result = unsafe { [(*a).value, (*b).value] }.concat();
                            // The operands stay on the stack while the
                            // result is allocated, keeping them rooted if a
                            // collection runs.
                            let object = self.alloc(result, function);
                            pop!();
                            pop!();
                            push!(Value::from(object));
                        }
                        _ => err!(RuntimeError::AddOperandTypes),
                    }
                }
                op::SUBTRACT => binary_op_number!(-),
                op::MULTIPLY => binary_op_number!(*),
                op::DIVIDE => binary_op_number!(/),
                op::NOT => {
                    let value = pop!();
                    push!(!value);
                }
                op::NEGATE => match pop!() {
                    Value::Number(number) => push!(Value::from(-number)),
                    _ => err!(RuntimeError::UnaryOperandType),
                },
                op::PRINT => {
                    let value = pop!();
                    // Print output is best-effort, like the diagnostics.
                    let _ = writeln!(stdout, "{value}");
                    let _ = stdout.flush();
                }
                op::JUMP => {
                    let offset = read_u16!() as usize;
                    ip = unsafe { ip.add(offset) };
                }
                op::JUMP_IF_FALSE => {
                    let offset = read_u16!() as usize;
                    if !peek!(0).to_bool() {
                        ip = unsafe { ip.add(offset) };
                    }
                }
                op::RETURN => break,
                _ => util::unreachable(),
            }
        }

        Ok(())
    }

    /// Allocates the interned string for `string`, collecting first if the
    /// heap has outgrown its threshold.
    fn alloc(&mut self, string: String, function: &Chunk) -> *mut ObjectString {
        if self.gc.should_collect() {
            self.collect_garbage(function);
        }
        self.gc.intern(string)
    }

    /// Marks the root set (operand stack, globals, constants of the current
    /// chunk), then lets the collector trace and sweep.
    fn collect_garbage(&mut self, function: &Chunk) {
        if cfg!(feature = "gc-trace") {
            eprintln!("-- gc begin");
        }

        let mut slot = self.stack.as_ptr();
        while slot < self.stack_top as *const Value {
            self.gc.mark(unsafe { *slot });
            slot = unsafe { slot.add(1) };
        }

        for (&name, &value) in &self.globals {
            self.gc.mark_object(name);
            self.gc.mark(value);
        }

        for &constant in &function.constants {
            self.gc.mark(constant);
        }

        self.gc.trace();
        self.gc.sweep();

        if cfg!(feature = "gc-trace") {
            eprintln!("-- gc end ({} bytes live)", self.gc.bytes_allocated());
        }
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{InterpretResult, Vm};
    use crate::chunk::Chunk;

    fn interpret(source: &str) -> (InterpretResult, String, String) {
        let mut vm = Vm::new();
        let mut function = Chunk::new();
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let result = vm.interpret(source.as_bytes(), &mut function, &mut stdout, &mut stderr);
        (result, String::from_utf8(stdout).unwrap(), String::from_utf8(stderr).unwrap())
    }

    fn run_ok(source: &str) -> String {
        let (result, stdout, stderr) = interpret(source);
        assert_eq!(result, InterpretResult::Ok, "{stderr}");
        stdout
    }

    #[test]
    fn arithmetic() {
        assert_eq!(run_ok("print 1 + 2;"), "3\n");
        assert_eq!(run_ok("print (1 + 2) * 3 - 4 / 2;"), "7\n");
        assert_eq!(run_ok("print -(1 + 2);"), "-3\n");
    }

    #[test]
    fn division_by_zero_is_ieee() {
        assert_eq!(run_ok("print 1 / 0;"), "inf\n");
        assert_eq!(run_ok("print -1 / 0;"), "-inf\n");
        assert_eq!(run_ok("print 0 / 0;"), "NaN\n");
    }

    #[test]
    fn string_concatenation() {
        assert_eq!(run_ok("print \"foo\" + \"bar\";"), "foobar\n");
        assert_eq!(run_ok("print \"\" + \"x\" + \"\";"), "x\n");
    }

    #[test]
    fn comparison_and_equality() {
        assert_eq!(run_ok("print 1 < 2;"), "true\n");
        assert_eq!(run_ok("print 1 >= 2;"), "false\n");
        assert_eq!(run_ok("print \"a\" + \"b\" == \"ab\";"), "true\n");
        assert_eq!(run_ok("print 1 == \"1\";"), "false\n");
        assert_eq!(run_ok("print nil == false;"), "false\n");
        assert_eq!(run_ok("print 1 != 2;"), "true\n");
    }

    #[test]
    fn truthiness() {
        assert_eq!(run_ok("print !nil;"), "true\n");
        assert_eq!(run_ok("print !0;"), "false\n");
        assert_eq!(run_ok("print !\"\";"), "false\n");
    }

    #[test]
    fn globals() {
        assert_eq!(run_ok("let a = 10; let b = 20; print a + b;"), "30\n");
        assert_eq!(run_ok("let a; print a;"), "nil\n");
        assert_eq!(run_ok("let a = 1; a = 2; print a;"), "2\n");
        assert_eq!(run_ok("let a = 1; a += 2; print a;"), "3\n");
    }

    #[test]
    fn locals_and_shadowing() {
        assert_eq!(run_ok("{ let x = 1; { let x = 2; print x; } print x; }"), "2\n1\n");
        assert_eq!(run_ok("{ let x = 1; x *= 4; print x; }"), "4\n");
    }

    #[test]
    fn if_and_logic() {
        assert_eq!(run_ok("if (true) print \"t\"; else print \"f\";"), "t\n");
        assert_eq!(run_ok("if (false) print \"t\"; else print \"f\";"), "f\n");
        assert_eq!(run_ok("if (nil) print \"t\";"), "");
        assert_eq!(run_ok("print true and \"yes\";"), "yes\n");
        assert_eq!(run_ok("print false or \"fallback\";"), "fallback\n");
        assert_eq!(run_ok("print nil and 1;"), "nil\n");
        assert_eq!(run_ok("print 1 or 2;"), "1\n");
    }

    #[test]
    fn statements_leave_the_stack_empty() {
        // A run that grows and shrinks scopes; any imbalance would corrupt
        // later reads, so the printed value doubles as a stack check.
        let source = "
            let total = 0;
            { let a = 1; { let b = 2; total = a + b; } }
            { let c = 4; total += c; }
            print total;
        ";
        assert_eq!(run_ok(source), "7\n");
    }

    #[test]
    fn runtime_error_add_types() {
        let (result, stdout, stderr) = interpret("print 1 + \"x\";");
        assert_eq!(result, InterpretResult::RuntimeError);
        assert_eq!(stdout, "");
        assert_eq!(stderr, "Operands must be numbers or strings.\n[line 1] in script\n");
    }

    #[test]
    fn runtime_error_reports_the_line() {
        let (result, _stdout, stderr) = interpret("let a = 1;\nprint -\"x\";");
        assert_eq!(result, InterpretResult::RuntimeError);
        assert_eq!(stderr, "Operand must be a number.\n[line 2] in script\n");
    }

    #[test]
    fn runtime_error_undefined_global() {
        let (result, _stdout, stderr) = interpret("print a;");
        assert_eq!(result, InterpretResult::RuntimeError);
        assert_eq!(stderr, "Undefined let binding 'a'.\n[line 1] in script\n");
    }

    #[test]
    fn assigning_an_undefined_global_fails() {
        let (result, _stdout, stderr) = interpret("a = 1;");
        assert_eq!(result, InterpretResult::RuntimeError);
        assert_eq!(stderr, "Undefined let binding 'a'.\n[line 1] in script\n");
    }

    #[test]
    fn comparing_mixed_types_fails() {
        let (result, _stdout, stderr) = interpret("print 1 < \"2\";");
        assert_eq!(result, InterpretResult::RuntimeError);
        assert_eq!(stderr, "Operands must be numbers.\n[line 1] in script\n");
    }

    #[test]
    fn compile_error_skips_execution() {
        let (result, stdout, stderr) = interpret("print 1 + ;\nprint 2;");
        assert_eq!(result, InterpretResult::CompileError);
        assert_eq!(stdout, "");
        assert!(stderr.contains("Expect expression."), "{stderr}");
    }

    #[test]
    fn globals_persist_across_interpret_calls() {
        let mut vm = Vm::new();
        let mut function = Chunk::new();
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        let result = vm.interpret(b"let a = 40;", &mut function, &mut stdout, &mut stderr);
        assert_eq!(result, InterpretResult::Ok);

        function.reset();
        let result = vm.interpret(b"print a + 2;", &mut function, &mut stdout, &mut stderr);
        assert_eq!(result, InterpretResult::Ok);
        assert_eq!(String::from_utf8(stdout).unwrap(), "42\n");
    }

    #[test]
    fn interned_strings_share_constants() {
        // Both literals intern to the same handle, so the pool holds a
        // single string constant.
        let mut vm = Vm::new();
        let mut function = Chunk::new();
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let result = vm.interpret(
            b"print \"repeated\" == \"repeated\";",
            &mut function,
            &mut stdout,
            &mut stderr,
        );
        assert_eq!(result, InterpretResult::Ok);
        assert_eq!(function.constants.len(), 1);
        assert_eq!(String::from_utf8(stdout).unwrap(), "true\n");
    }
}
