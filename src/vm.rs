//! The Moss virtual machine.
//!
//! The VM is a **stack-based interpreter** that executes compiled
//! [`Bytecode`]. It owns three fixed-capacity regions:
//!
//! - the operand stack (`STACK_SIZE` slots), with `sp` pointing at the
//!   next free slot;
//! - the globals table (`GLOBALS_SIZE` slots), indexed by the compiler's
//!   global symbol numbers;
//! - the frame stack (`MAX_FRAMES` entries), one [`Frame`] per active
//!   call.
//!
//! # Execution model
//!
//! Each frame runs one closure. Its `ip` starts at −1 and the dispatch
//! loop pre-increments, so a jump stores `target − 1` and lands exactly
//! on `target`. A frame's locals live in the shared operand stack at
//! `[bp, bp + num_locals)`; the caller leaves the arguments there, so
//! argument `i` is local slot `i`.
//!
//! On `OpCall` with `n` arguments the callee sits at `stack[sp − 1 − n]`
//! and the new frame's `bp` is `sp − n`. Returning rewinds `sp` to
//! `bp − 1` (dropping locals, arguments and the callee in one move) and
//! pushes the return value, or `null` for a bare return.

use std::collections::HashMap;
use std::rc::Rc;

use tracing::trace;

use crate::bytecode::{read_u16, read_u8, Opcode};
use crate::compiler::Bytecode;
use crate::value::{Closure, CompiledFn, HashPair, Value};

/// Operand stack capacity, in values.
pub const STACK_SIZE: usize = 2048;
/// Globals table capacity.
pub const GLOBALS_SIZE: usize = 65536;
/// Call depth limit.
pub const MAX_FRAMES: usize = 1024;

// ─────────────────────────────────────────────────────────────────────────────
// Runtime errors
// ─────────────────────────────────────────────────────────────────────────────

/// A runtime error raised by the VM. A failed run leaves the VM in an
/// unspecified state; it must not be reused.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuntimeError {
    #[error("stack overflow")]
    StackOverflow,
    #[error("frame overflow")]
    FrameOverflow,
    #[error("wrong number of arguments: want={want}, got={got}")]
    WrongNumberOfArguments { want: usize, got: usize },
    #[error("calling non-closure and non-builtin")]
    NotCallable,
    #[error("unsupported types for binary operation: {0} {1}")]
    UnsupportedBinaryTypes(&'static str, &'static str),
    #[error("unknown string operator: {0}")]
    UnknownStringOperator(Opcode),
    #[error("unknown integer operator: {0}")]
    UnknownIntegerOperator(Opcode),
    #[error("unknown operator: {op} ({left} {right})")]
    UnknownOperator { op: Opcode, left: &'static str, right: &'static str },
    #[error("unsupported type for negation: {0}")]
    UnsupportedNegation(&'static str),
    #[error("division by zero")]
    DivisionByZero,
    #[error("index operator not supported: {0}")]
    IndexNotSupported(&'static str),
    #[error("unusable as hash key: {0}")]
    UnusableHashKey(&'static str),
    #[error("not a function: {0}")]
    NotAFunction(String),
    #[error("unknown opcode: {0:#04x}")]
    UnknownOpcode(u8),
}

// ─────────────────────────────────────────────────────────────────────────────
// Frame
// ─────────────────────────────────────────────────────────────────────────────

/// One active call: the closure being executed, its instruction pointer
/// and the base of its locals region on the operand stack.
#[derive(Debug)]
struct Frame {
    closure: Rc<Closure>,
    /// Index of the instruction being executed; −1 before the first one.
    ip: isize,
    /// Stack offset where this frame's locals begin.
    bp: usize,
}

impl Frame {
    fn new(closure: Rc<Closure>, bp: usize) -> Self {
        Frame { closure, ip: -1, bp }
    }

    fn instructions(&self) -> &[u8] {
        &self.closure.func.instructions
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Vm
// ─────────────────────────────────────────────────────────────────────────────

/// The Moss virtual machine.
pub struct Vm {
    constants: Vec<Value>,
    stack: Vec<Value>,
    /// Points at the next free stack slot; the top of stack is
    /// `stack[sp − 1]`.
    sp: usize,
    globals: Vec<Value>,
    frames: Vec<Frame>,
}

impl Vm {
    /// Wrap `bytecode` for execution: the top-level instructions become a
    /// synthetic zero-argument closure running in frame 0.
    pub fn new(bytecode: Bytecode) -> Self {
        Vm::new_with_global_store(bytecode, vec![Value::Null; GLOBALS_SIZE])
    }

    /// Like [`Vm::new`], but reusing a globals table from an earlier VM,
    /// which is how a REPL driver keeps definitions across inputs. Take
    /// the table back with [`Vm::into_globals`] after the run.
    pub fn new_with_global_store(bytecode: Bytecode, globals: Vec<Value>) -> Self {
        let main_fn = CompiledFn {
            instructions: bytecode.instructions,
            num_locals: 0,
            num_parameters: 0,
        };
        let main_closure = Closure { func: Rc::new(main_fn), free: Vec::new() };

        let mut frames = Vec::with_capacity(MAX_FRAMES);
        frames.push(Frame::new(Rc::new(main_closure), 0));

        Vm {
            constants: bytecode.constants,
            stack: vec![Value::Null; STACK_SIZE],
            sp: 0,
            globals,
            frames,
        }
    }

    /// Surrender the globals table for reuse by a later VM.
    pub fn into_globals(self) -> Vec<Value> {
        self.globals
    }

    /// The value most recently popped off the stack. The compiler ends
    /// every expression statement with `OpPop`, so after a run this is
    /// the last value the program produced.
    pub fn last_popped_stack_elem(&self) -> Value {
        self.stack[self.sp].clone()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Dispatch loop
    // ─────────────────────────────────────────────────────────────────────────

    /// Execute to completion.
    pub fn run(&mut self) -> Result<(), RuntimeError> {
        while self.current_frame().ip < self.current_frame().instructions().len() as isize - 1 {
            self.current_frame_mut().ip += 1;

            let frame = self.current_frame();
            let ip = frame.ip as usize;
            let func = Rc::clone(&frame.closure.func);
            let ins = &func.instructions;

            let op = Opcode::try_from(ins[ip]).map_err(RuntimeError::UnknownOpcode)?;
            match op {
                Opcode::Constant => {
                    let const_index = read_u16(&ins[ip + 1..]) as usize;
                    self.current_frame_mut().ip += 2;
                    let constant = self.constants[const_index].clone();
                    self.push(constant)?;
                }
                Opcode::True => self.push(Value::Bool(true))?,
                Opcode::False => self.push(Value::Bool(false))?,
                Opcode::Null => self.push(Value::Null)?,
                Opcode::Pop => {
                    self.pop();
                }

                Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div => {
                    self.execute_binary_operation(op)?;
                }
                Opcode::Equal | Opcode::NotEqual | Opcode::GreaterThan => {
                    self.execute_comparison(op)?;
                }
                Opcode::Bang => self.execute_bang_operator()?,
                Opcode::Minus => self.execute_minus_operator()?,

                Opcode::Jump => {
                    let target = read_u16(&ins[ip + 1..]) as isize;
                    // The loop's pre-increment lands on `target`.
                    self.current_frame_mut().ip = target - 1;
                }
                Opcode::JumpIf => {
                    let target = read_u16(&ins[ip + 1..]) as isize;
                    self.current_frame_mut().ip += 2;
                    let condition = self.pop();
                    if !condition.is_truthy() {
                        self.current_frame_mut().ip = target - 1;
                    }
                }

                Opcode::SetGlobal => {
                    let global_index = read_u16(&ins[ip + 1..]) as usize;
                    self.current_frame_mut().ip += 2;
                    self.globals[global_index] = self.pop();
                }
                Opcode::GetGlobal => {
                    let global_index = read_u16(&ins[ip + 1..]) as usize;
                    self.current_frame_mut().ip += 2;
                    let value = self.globals[global_index].clone();
                    self.push(value)?;
                }

                Opcode::SetLocal => {
                    let local_index = read_u8(&ins[ip + 1..]) as usize;
                    self.current_frame_mut().ip += 1;
                    let bp = self.current_frame().bp;
                    self.stack[bp + local_index] = self.pop();
                }
                Opcode::GetLocal => {
                    let local_index = read_u8(&ins[ip + 1..]) as usize;
                    self.current_frame_mut().ip += 1;
                    let bp = self.current_frame().bp;
                    let value = self.stack[bp + local_index].clone();
                    self.push(value)?;
                }

                Opcode::Array => {
                    let count = read_u16(&ins[ip + 1..]) as usize;
                    self.current_frame_mut().ip += 2;
                    let array = self.build_array(self.sp - count, self.sp);
                    self.sp -= count;
                    self.push(array)?;
                }
                Opcode::Hash => {
                    let count = read_u16(&ins[ip + 1..]) as usize;
                    self.current_frame_mut().ip += 2;
                    let hash = self.build_hash(self.sp - count, self.sp)?;
                    self.sp -= count;
                    self.push(hash)?;
                }
                Opcode::Index => {
                    let index = self.pop();
                    let left = self.pop();
                    self.execute_index_expression(left, index)?;
                }

                Opcode::Call => {
                    let num_args = read_u8(&ins[ip + 1..]) as usize;
                    self.current_frame_mut().ip += 1;
                    self.execute_call(num_args)?;
                }
                Opcode::ReturnValue => {
                    let return_value = self.pop();
                    let frame = self.pop_frame();
                    self.sp = frame.bp - 1;
                    self.push(return_value)?;
                }
                Opcode::Return => {
                    let frame = self.pop_frame();
                    self.sp = frame.bp - 1;
                    self.push(Value::Null)?;
                }

                Opcode::GetBuiltin => {
                    let builtin_index = read_u8(&ins[ip + 1..]) as usize;
                    self.current_frame_mut().ip += 1;
                    let builtin = &crate::builtins::BUILTINS[builtin_index];
                    self.push(Value::Builtin(builtin))?;
                }
                Opcode::Closure => {
                    let const_index = read_u16(&ins[ip + 1..]) as usize;
                    let free_count = read_u8(&ins[ip + 3..]) as usize;
                    self.current_frame_mut().ip += 3;
                    self.push_closure(const_index, free_count)?;
                }
                Opcode::GetFree => {
                    let free_index = read_u8(&ins[ip + 1..]) as usize;
                    self.current_frame_mut().ip += 1;
                    let value = self.current_frame().closure.free[free_index].clone();
                    self.push(value)?;
                }
                Opcode::CurrentClosure => {
                    let closure = Rc::clone(&self.current_frame().closure);
                    self.push(Value::Closure(closure))?;
                }
            }
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Frames
    // ─────────────────────────────────────────────────────────────────────────

    fn current_frame(&self) -> &Frame {
        self.frames.last().expect("frame stack is never empty")
    }

    fn current_frame_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("frame stack is never empty")
    }

    fn push_frame(&mut self, frame: Frame) -> Result<(), RuntimeError> {
        if self.frames.len() >= MAX_FRAMES {
            return Err(RuntimeError::FrameOverflow);
        }
        trace!(depth = self.frames.len() + 1, "push frame");
        self.frames.push(frame);
        Ok(())
    }

    fn pop_frame(&mut self) -> Frame {
        trace!(depth = self.frames.len() - 1, "pop frame");
        self.frames.pop().expect("frame stack is never empty")
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Calls and closures
    // ─────────────────────────────────────────────────────────────────────────

    fn execute_call(&mut self, num_args: usize) -> Result<(), RuntimeError> {
        let callee = self.stack[self.sp - 1 - num_args].clone();
        match callee {
            Value::Closure(closure) => self.call_closure(closure, num_args),
            Value::Builtin(builtin) => self.call_builtin(builtin, num_args),
            _ => Err(RuntimeError::NotCallable),
        }
    }

    fn call_closure(&mut self, closure: Rc<Closure>, num_args: usize) -> Result<(), RuntimeError> {
        if num_args != closure.func.num_parameters {
            return Err(RuntimeError::WrongNumberOfArguments {
                want: closure.func.num_parameters,
                got: num_args,
            });
        }

        let bp = self.sp - num_args;
        let num_locals = closure.func.num_locals;
        self.push_frame(Frame::new(closure, bp))?;
        // Arguments occupy the first local slots; the rest are reserved
        // above them.
        self.sp = bp + num_locals;
        Ok(())
    }

    fn call_builtin(
        &mut self,
        builtin: &'static crate::value::Builtin,
        num_args: usize,
    ) -> Result<(), RuntimeError> {
        let args = &self.stack[self.sp - num_args..self.sp];
        let result = (builtin.func)(args);
        self.sp = self.sp - num_args - 1;
        // A builtin with nothing to return produces null. Error values
        // are pushed as-is, not unwrapped.
        self.push(result.unwrap_or(Value::Null))
    }

    fn push_closure(&mut self, const_index: usize, free_count: usize) -> Result<(), RuntimeError> {
        let constant = self.constants[const_index].clone();
        let Value::CompiledFn(func) = constant else {
            return Err(RuntimeError::NotAFunction(constant.to_string()));
        };

        let mut free = Vec::with_capacity(free_count);
        for i in 0..free_count {
            free.push(self.stack[self.sp - free_count + i].clone());
        }
        self.sp -= free_count;

        self.push(Value::Closure(Rc::new(Closure { func, free })))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Operators
    // ─────────────────────────────────────────────────────────────────────────

    fn execute_binary_operation(&mut self, op: Opcode) -> Result<(), RuntimeError> {
        let right = self.pop();
        let left = self.pop();
        match (&left, &right) {
            (Value::Int(left), Value::Int(right)) => {
                self.execute_integer_binary_operation(op, *left, *right)
            }
            (Value::Str(left), Value::Str(right)) => {
                if op != Opcode::Add {
                    return Err(RuntimeError::UnknownStringOperator(op));
                }
                let concatenated = format!("{left}{right}");
                self.push(Value::string(concatenated))
            }
            _ => Err(RuntimeError::UnsupportedBinaryTypes(
                left.type_name(),
                right.type_name(),
            )),
        }
    }

    fn execute_integer_binary_operation(
        &mut self,
        op: Opcode,
        left: i64,
        right: i64,
    ) -> Result<(), RuntimeError> {
        let result = match op {
            Opcode::Add => left.wrapping_add(right),
            Opcode::Sub => left.wrapping_sub(right),
            Opcode::Mul => left.wrapping_mul(right),
            Opcode::Div => {
                if right == 0 {
                    return Err(RuntimeError::DivisionByZero);
                }
                left.wrapping_div(right)
            }
            _ => return Err(RuntimeError::UnknownIntegerOperator(op)),
        };
        self.push(Value::Int(result))
    }

    fn execute_comparison(&mut self, op: Opcode) -> Result<(), RuntimeError> {
        let right = self.pop();
        let left = self.pop();

        if let (Value::Int(left), Value::Int(right)) = (&left, &right) {
            let result = match op {
                Opcode::Equal => left == right,
                Opcode::NotEqual => left != right,
                Opcode::GreaterThan => left > right,
                _ => return Err(RuntimeError::UnknownIntegerOperator(op)),
            };
            return self.push(Value::Bool(result));
        }

        match op {
            Opcode::Equal => self.push(Value::Bool(left == right)),
            Opcode::NotEqual => self.push(Value::Bool(left != right)),
            _ => Err(RuntimeError::UnknownOperator {
                op,
                left: left.type_name(),
                right: right.type_name(),
            }),
        }
    }

    fn execute_bang_operator(&mut self) -> Result<(), RuntimeError> {
        let operand = self.pop();
        let negated = matches!(operand, Value::Bool(false) | Value::Null);
        self.push(Value::Bool(negated))
    }

    fn execute_minus_operator(&mut self) -> Result<(), RuntimeError> {
        let operand = self.pop();
        match operand {
            Value::Int(value) => self.push(Value::Int(value.wrapping_neg())),
            other => Err(RuntimeError::UnsupportedNegation(other.type_name())),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Composite construction and indexing
    // ─────────────────────────────────────────────────────────────────────────

    fn build_array(&self, start: usize, end: usize) -> Value {
        Value::Array(Rc::new(self.stack[start..end].to_vec()))
    }

    fn build_hash(&self, start: usize, end: usize) -> Result<Value, RuntimeError> {
        let mut pairs = HashMap::new();
        for i in (start..end).step_by(2) {
            let key = self.stack[i].clone();
            let value = self.stack[i + 1].clone();
            let hash_key = key
                .hash_key()
                .ok_or(RuntimeError::UnusableHashKey(key.type_name()))?;
            pairs.insert(hash_key, HashPair { key, value });
        }
        Ok(Value::Hash(Rc::new(pairs)))
    }

    fn execute_index_expression(&mut self, left: Value, index: Value) -> Result<(), RuntimeError> {
        match (&left, &index) {
            (Value::Array(elements), Value::Int(i)) => {
                // Out-of-range array access is null, not an error.
                let element = usize::try_from(*i)
                    .ok()
                    .and_then(|i| elements.get(i).cloned())
                    .unwrap_or(Value::Null);
                self.push(element)
            }
            (Value::Hash(pairs), _) => {
                let hash_key = index
                    .hash_key()
                    .ok_or(RuntimeError::UnusableHashKey(index.type_name()))?;
                let value = pairs
                    .get(&hash_key)
                    .map(|pair| pair.value.clone())
                    .unwrap_or(Value::Null);
                self.push(value)
            }
            _ => Err(RuntimeError::IndexNotSupported(left.type_name())),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Stack helpers
    // ─────────────────────────────────────────────────────────────────────────

    fn push(&mut self, value: Value) -> Result<(), RuntimeError> {
        if self.sp >= STACK_SIZE {
            return Err(RuntimeError::StackOverflow);
        }
        self.stack[self.sp] = value;
        self.sp += 1;
        Ok(())
    }

    /// The popped slot is left in place so [`Vm::last_popped_stack_elem`]
    /// can observe it.
    fn pop(&mut self) -> Value {
        let value = self.stack[self.sp - 1].clone();
        self.sp -= 1;
        value
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
