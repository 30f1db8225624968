//! The Moss language compiler and virtual machine library.
//!
//! This crate takes a Moss program from AST to result:
//!
//! 1. **AST** (`ast`) — the typed [`ast::Program`] tree this crate
//!    consumes; a front end (or an embedder) produces it.
//! 2. **Bytecode** (`bytecode`) — [`bytecode::Opcode`] definitions and
//!    the encode / decode / disassemble primitives.
//! 3. **Values** (`value`) — the runtime [`value::Value`] universe and
//!    hash keys.
//! 4. **Compiler** (`compiler`) — lowers an AST to instructions plus a
//!    constant pool, with a scoped symbol table and closure capture.
//! 5. **Builtins** (`builtins`) — the fixed table of host functions.
//! 6. **VM** (`vm`) — the stack machine that executes
//!    [`compiler::Bytecode`].
//!
//! # Entry point
//!
//! The simplest way to run a program an embedder has built:
//!
//! ```rust
//! use moss::ast::{Expression, Program, Statement};
//!
//! let program = Program::new(vec![Statement::expression(Expression::infix(
//!     "+",
//!     Expression::IntegerLiteral(1),
//!     Expression::IntegerLiteral(2),
//! ))]);
//! let result = moss::run_program(&program).unwrap();
//! assert_eq!(result, moss::value::Value::Int(3));
//! ```
//!
//! A REPL-style driver that wants definitions to survive between inputs
//! should instead keep a [`compiler::Compiler`] state pair alive via
//! `into_state` / `new_with_state` and thread the globals table through
//! [`vm::Vm::new_with_global_store`].

// ─────────────────────────────────────────────────────────────────────────────
// Modules
// ─────────────────────────────────────────────────────────────────────────────

pub mod ast;
pub mod builtins;
pub mod bytecode;
pub mod compiler;
pub mod value;
pub mod vm;

use tracing::debug;

// ─────────────────────────────────────────────────────────────────────────────
// Unified error type
// ─────────────────────────────────────────────────────────────────────────────

/// The unified error type for both pipeline stages.
///
/// Each variant wraps the corresponding stage's error so callers can
/// handle them uniformly or match on the stage.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MossError {
    /// A compile-time error (unknown operator, unresolved name).
    #[error("compile error: {0}")]
    Compile(#[from] compiler::CompileError),

    /// A runtime error raised by the VM.
    #[error("runtime error: {0}")]
    Runtime(#[from] vm::RuntimeError),
}

/// Shorthand result type for the whole pipeline.
pub type MossResult<T> = Result<T, MossError>;

// ─────────────────────────────────────────────────────────────────────────────
// Pipeline helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Compile a program to a [`compiler::Bytecode`] artifact.
pub fn compile_program(program: &ast::Program) -> MossResult<compiler::Bytecode> {
    let mut compiler = compiler::Compiler::new();
    compiler.compile(program)?;
    let bytecode = compiler.bytecode();
    debug!(
        instructions = bytecode.instructions.len(),
        constants = bytecode.constants.len(),
        "compiled program"
    );
    Ok(bytecode)
}

/// Full pipeline: compile and execute, returning the value the last
/// top-level expression produced (null for a program of pure
/// definitions).
pub fn run_program(program: &ast::Program) -> MossResult<value::Value> {
    let bytecode = compile_program(program)?;
    let mut machine = vm::Vm::new(bytecode);
    machine.run()?;
    Ok(machine.last_popped_stack_elem())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
