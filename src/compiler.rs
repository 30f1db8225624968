//! AST-to-bytecode compiler for the Moss language.
//!
//! The compiler performs a single-pass walk of a [`Program`] and emits
//! encoded instructions plus a constant pool, packaged as a [`Bytecode`].
//!
//! # Scope model
//!
//! Each function literal is compiled in its own [`CompilationScope`]: a
//! fresh instruction buffer with its own last/previous-emitted tracking
//! for back-patching. Entering a function pushes a scope and a symbol
//! table layer; leaving pops both and turns the buffer into a
//! [`CompiledFn`] constant, referenced by an `OpClosure` emitted in the
//! enclosing scope.
//!
//! # Symbol resolution
//!
//! The [`SymbolTable`] is a stack of layers. Resolution walks outward;
//! when a name defined in an enclosing function (not the global layer) is
//! reached from an inner one, it is promoted to a free symbol in every
//! layer in between, and each layer records the promotion in its
//! `free_symbols` list. That list drives the capture loads emitted just
//! before `OpClosure`, so the VM finds the free values on the stack in
//! declaration order.
//!
//! # Jumps
//!
//! Forward jumps are emitted with a placeholder operand and patched in
//! place once the target offset is known, by re-encoding the instruction
//! and overwriting its operand bytes.

use std::collections::HashMap;
use std::rc::Rc;

use tracing::trace;

use crate::ast::{BlockStatement, Expression, Program, Statement};
use crate::builtins;
use crate::bytecode::{make, Instructions, Opcode};
use crate::value::{CompiledFn, Value};

// ─────────────────────────────────────────────────────────────────────────────
// Errors and output artifact
// ─────────────────────────────────────────────────────────────────────────────

/// A compile-time error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    #[error("unknown operator {0}")]
    UnknownOperator(String),
    #[error("undefined variable {0}")]
    UndefinedVariable(String),
}

/// The compiler's output: the outermost scope's instruction stream and
/// the constant pool, ready to hand to the VM.
#[derive(Debug, Clone, PartialEq)]
pub struct Bytecode {
    pub instructions: Instructions,
    pub constants: Vec<Value>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Symbol table
// ─────────────────────────────────────────────────────────────────────────────

/// Where a resolved name lives at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolScope {
    /// The VM-wide globals table.
    Global,
    /// A local slot of the enclosing function's frame.
    Local,
    /// A captured value of the enclosing closure.
    Free,
    /// The fixed builtin table.
    Builtin,
    /// The name the enclosing function is being bound to; loads as the
    /// currently running closure instead of capturing it.
    Function,
}

/// A resolved name: its scope kind and the index to address it with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub scope: SymbolScope,
    pub index: usize,
}

/// One layer of the symbol table, corresponding to one function body
/// (the bottom layer is the global scope).
#[derive(Debug, Default)]
struct Layer {
    store: HashMap<String, Symbol>,
    num_definitions: usize,
    /// Original symbols promoted to Free in this layer, in promotion
    /// order. The index of a Free symbol is its position here.
    free_symbols: Vec<Symbol>,
}

/// Compile-time name resolution across nested function scopes.
#[derive(Debug)]
pub struct SymbolTable {
    layers: Vec<Layer>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    /// A table with only the global layer.
    pub fn new() -> Self {
        SymbolTable { layers: vec![Layer::default()] }
    }

    fn push_layer(&mut self) {
        self.layers.push(Layer::default());
    }

    fn pop_layer(&mut self) -> Layer {
        debug_assert!(self.layers.len() > 1, "the global layer is never popped");
        self.layers.pop().unwrap_or_default()
    }

    /// Define `name` in the current layer. Global in the bottom layer,
    /// Local anywhere else.
    pub fn define(&mut self, name: &str) -> Symbol {
        let scope = if self.layers.len() == 1 { SymbolScope::Global } else { SymbolScope::Local };
        let layer = self.layers.last_mut().expect("symbol table always has a layer");
        let symbol = Symbol { name: name.to_string(), scope, index: layer.num_definitions };
        layer.num_definitions += 1;
        layer.store.insert(symbol.name.clone(), symbol.clone());
        symbol
    }

    /// Pre-define a builtin in the global layer with its table index.
    pub fn define_builtin(&mut self, index: usize, name: &str) -> Symbol {
        let symbol = Symbol { name: name.to_string(), scope: SymbolScope::Builtin, index };
        self.layers[0].store.insert(symbol.name.clone(), symbol.clone());
        symbol
    }

    /// Record the name the current function is being bound to, so the
    /// body can refer to it without capturing anything.
    pub fn define_function_name(&mut self, name: &str) -> Symbol {
        let symbol = Symbol { name: name.to_string(), scope: SymbolScope::Function, index: 0 };
        let layer = self.layers.last_mut().expect("symbol table always has a layer");
        layer.store.insert(symbol.name.clone(), symbol.clone());
        symbol
    }

    /// Resolve `name` from the current layer outward. A hit in an outer
    /// function layer is promoted to a Free symbol in every layer the
    /// lookup passed through.
    pub fn resolve(&mut self, name: &str) -> Option<Symbol> {
        self.resolve_in(self.layers.len() - 1, name)
    }

    fn resolve_in(&mut self, layer_index: usize, name: &str) -> Option<Symbol> {
        if let Some(symbol) = self.layers[layer_index].store.get(name) {
            return Some(symbol.clone());
        }
        if layer_index == 0 {
            return None;
        }

        let outer = self.resolve_in(layer_index - 1, name)?;
        match outer.scope {
            // Globals and builtins are addressable from anywhere.
            SymbolScope::Global | SymbolScope::Builtin => Some(outer),
            _ => Some(self.define_free(layer_index, outer)),
        }
    }

    fn define_free(&mut self, layer_index: usize, original: Symbol) -> Symbol {
        let layer = &mut self.layers[layer_index];
        layer.free_symbols.push(original.clone());
        let symbol = Symbol {
            name: original.name,
            scope: SymbolScope::Free,
            index: layer.free_symbols.len() - 1,
        };
        layer.store.insert(symbol.name.clone(), symbol.clone());
        symbol
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Compilation scopes
// ─────────────────────────────────────────────────────────────────────────────

/// The opcode and offset of an instruction already written to the
/// current scope, kept for back-patching and trailing-pop removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EmittedInstruction {
    opcode: Opcode,
    position: usize,
}

/// The emission state of one function body being compiled.
#[derive(Debug, Default)]
struct CompilationScope {
    instructions: Instructions,
    last_instruction: Option<EmittedInstruction>,
    previous_instruction: Option<EmittedInstruction>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Compiler
// ─────────────────────────────────────────────────────────────────────────────

/// The Moss bytecode compiler.
///
/// Create one with [`Compiler::new`], feed it a program with
/// [`Compiler::compile`], and collect the artifact with
/// [`Compiler::bytecode`]. A REPL-style driver can thread the symbol
/// table and constant pool through successive compiles with
/// [`Compiler::into_state`] and [`Compiler::new_with_state`].
#[derive(Debug)]
pub struct Compiler {
    constants: Vec<Value>,
    symbols: SymbolTable,
    scopes: Vec<CompilationScope>,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        let mut symbols = SymbolTable::new();
        for (index, builtin) in builtins::BUILTINS.iter().enumerate() {
            symbols.define_builtin(index, builtin.name);
        }
        Compiler {
            constants: Vec::new(),
            symbols,
            scopes: vec![CompilationScope::default()],
        }
    }

    /// Resume compilation with state carried over from a previous
    /// compiler, so new code sees earlier definitions.
    pub fn new_with_state(symbols: SymbolTable, constants: Vec<Value>) -> Self {
        Compiler { constants, symbols, scopes: vec![CompilationScope::default()] }
    }

    /// Tear the compiler down into its reusable state.
    pub fn into_state(self) -> (SymbolTable, Vec<Value>) {
        (self.symbols, self.constants)
    }

    /// Compile a program into the current top scope.
    pub fn compile(&mut self, program: &Program) -> Result<(), CompileError> {
        for statement in &program.statements {
            self.compile_statement(statement)?;
        }
        Ok(())
    }

    /// The compiled artifact: top-scope instructions plus constants.
    pub fn bytecode(&self) -> Bytecode {
        Bytecode {
            instructions: self.scopes[0].instructions.clone(),
            constants: self.constants.clone(),
        }
    }

    // ── Statements ───────────────────────────────────────────────────────────

    fn compile_statement(&mut self, statement: &Statement) -> Result<(), CompileError> {
        match statement {
            Statement::Let { name, value } => {
                // Defined before the value compiles so a function literal
                // can refer to the name it is being bound to.
                let symbol = self.symbols.define(name);
                self.compile_expression(value)?;
                match symbol.scope {
                    SymbolScope::Global => self.emit(Opcode::SetGlobal, &[symbol.index]),
                    _ => self.emit(Opcode::SetLocal, &[symbol.index]),
                };
            }
            Statement::Return { value } => {
                self.compile_expression(value)?;
                self.emit(Opcode::ReturnValue, &[]);
            }
            Statement::Expression { expression } => {
                self.compile_expression(expression)?;
                self.emit(Opcode::Pop, &[]);
            }
        }
        Ok(())
    }

    fn compile_block(&mut self, block: &BlockStatement) -> Result<(), CompileError> {
        for statement in &block.statements {
            self.compile_statement(statement)?;
        }
        Ok(())
    }

    // ── Expressions ──────────────────────────────────────────────────────────

    fn compile_expression(&mut self, expression: &Expression) -> Result<(), CompileError> {
        match expression {
            Expression::IntegerLiteral(value) => {
                let index = self.add_constant(Value::Int(*value));
                self.emit(Opcode::Constant, &[index]);
            }
            Expression::StringLiteral(value) => {
                let index = self.add_constant(Value::string(value.as_str()));
                self.emit(Opcode::Constant, &[index]);
            }
            Expression::BooleanLiteral(true) => {
                self.emit(Opcode::True, &[]);
            }
            Expression::BooleanLiteral(false) => {
                self.emit(Opcode::False, &[]);
            }
            Expression::Identifier(name) => {
                let symbol = self
                    .symbols
                    .resolve(name)
                    .ok_or_else(|| CompileError::UndefinedVariable(name.clone()))?;
                self.load_symbol(&symbol);
            }
            Expression::Prefix { operator, right } => {
                self.compile_expression(right)?;
                match operator.as_str() {
                    "!" => self.emit(Opcode::Bang, &[]),
                    "-" => self.emit(Opcode::Minus, &[]),
                    other => return Err(CompileError::UnknownOperator(other.to_string())),
                };
            }
            // `<` has no opcode of its own: swap the operands and compare
            // with `>`.
            Expression::Infix { operator, left, right } if operator == "<" => {
                self.compile_expression(right)?;
                self.compile_expression(left)?;
                self.emit(Opcode::GreaterThan, &[]);
            }
            Expression::Infix { operator, left, right } => {
                self.compile_expression(left)?;
                self.compile_expression(right)?;
                let op = match operator.as_str() {
                    "+" => Opcode::Add,
                    "-" => Opcode::Sub,
                    "*" => Opcode::Mul,
                    "/" => Opcode::Div,
                    ">" => Opcode::GreaterThan,
                    "==" => Opcode::Equal,
                    "!=" => Opcode::NotEqual,
                    other => return Err(CompileError::UnknownOperator(other.to_string())),
                };
                self.emit(op, &[]);
            }
            Expression::If { condition, consequence, alternative } => {
                self.compile_if(condition, consequence, alternative.as_ref())?;
            }
            Expression::ArrayLiteral(elements) => {
                for element in elements {
                    self.compile_expression(element)?;
                }
                self.emit(Opcode::Array, &[elements.len()]);
            }
            Expression::HashLiteral(pairs) => {
                // Canonical key order keeps the emitted stream (and its
                // disassembly) deterministic.
                let mut sorted: Vec<&(Expression, Expression)> = pairs.iter().collect();
                sorted.sort_by_key(|(key, _)| key.to_string());
                for (key, value) in sorted {
                    self.compile_expression(key)?;
                    self.compile_expression(value)?;
                }
                self.emit(Opcode::Hash, &[pairs.len() * 2]);
            }
            Expression::Index { left, index } => {
                self.compile_expression(left)?;
                self.compile_expression(index)?;
                self.emit(Opcode::Index, &[]);
            }
            Expression::FunctionLiteral { name, parameters, body } => {
                self.compile_function(name.as_deref(), parameters, body)?;
            }
            Expression::Call { function, arguments } => {
                self.compile_expression(function)?;
                for argument in arguments {
                    self.compile_expression(argument)?;
                }
                self.emit(Opcode::Call, &[arguments.len()]);
            }
        }
        Ok(())
    }

    fn compile_if(
        &mut self,
        condition: &Expression,
        consequence: &BlockStatement,
        alternative: Option<&BlockStatement>,
    ) -> Result<(), CompileError> {
        self.compile_expression(condition)?;

        // Placeholder operand, patched once the consequence is compiled.
        let jump_if_position = self.emit(Opcode::JumpIf, &[9999]);

        self.compile_block(consequence)?;
        if self.last_instruction_is(Opcode::Pop) {
            self.remove_last_pop();
        }

        // Both arms produce a value, so the consequence always ends by
        // jumping over the alternative (which is OpNull when the source
        // had no else branch).
        let jump_position = self.emit(Opcode::Jump, &[9999]);

        let after_consequence = self.current_instructions().len();
        self.change_operand(jump_if_position, after_consequence);

        match alternative {
            None => {
                self.emit(Opcode::Null, &[]);
            }
            Some(alternative) => {
                self.compile_block(alternative)?;
                if self.last_instruction_is(Opcode::Pop) {
                    self.remove_last_pop();
                }
            }
        }

        let after_alternative = self.current_instructions().len();
        self.change_operand(jump_position, after_alternative);
        Ok(())
    }

    fn compile_function(
        &mut self,
        name: Option<&str>,
        parameters: &[String],
        body: &BlockStatement,
    ) -> Result<(), CompileError> {
        self.enter_scope();

        if let Some(name) = name {
            self.symbols.define_function_name(name);
        }
        for parameter in parameters {
            self.symbols.define(parameter);
        }

        self.compile_block(body)?;

        // An expression in tail position becomes the return value; a body
        // that does not end in a return yields null.
        if self.last_instruction_is(Opcode::Pop) {
            self.replace_last_pop_with_return();
        }
        if !self.last_instruction_is(Opcode::ReturnValue) {
            self.emit(Opcode::Return, &[]);
        }

        let (instructions, layer) = self.leave_scope();
        let free_symbols = layer.free_symbols;
        let num_locals = layer.num_definitions;

        // Load the captured values in the enclosing scope so OpClosure
        // finds them on the stack in declaration order.
        for symbol in &free_symbols {
            self.load_symbol(symbol);
        }

        let func = CompiledFn { instructions, num_locals, num_parameters: parameters.len() };
        let index = self.add_constant(Value::CompiledFn(Rc::new(func)));
        self.emit(Opcode::Closure, &[index, free_symbols.len()]);
        Ok(())
    }

    fn load_symbol(&mut self, symbol: &Symbol) {
        match symbol.scope {
            SymbolScope::Global => self.emit(Opcode::GetGlobal, &[symbol.index]),
            SymbolScope::Local => self.emit(Opcode::GetLocal, &[symbol.index]),
            SymbolScope::Free => self.emit(Opcode::GetFree, &[symbol.index]),
            SymbolScope::Builtin => self.emit(Opcode::GetBuiltin, &[symbol.index]),
            SymbolScope::Function => self.emit(Opcode::CurrentClosure, &[]),
        };
    }

    // ── Scope management ─────────────────────────────────────────────────────

    fn enter_scope(&mut self) {
        self.scopes.push(CompilationScope::default());
        self.symbols.push_layer();
        trace!(depth = self.scopes.len(), "entered compilation scope");
    }

    fn leave_scope(&mut self) -> (Instructions, Layer) {
        let scope = self.scopes.pop().expect("leave_scope pairs with enter_scope");
        let layer = self.symbols.pop_layer();
        trace!(depth = self.scopes.len(), "left compilation scope");
        (scope.instructions, layer)
    }

    fn current_scope(&self) -> &CompilationScope {
        self.scopes.last().expect("compiler always has a scope")
    }

    fn current_scope_mut(&mut self) -> &mut CompilationScope {
        self.scopes.last_mut().expect("compiler always has a scope")
    }

    fn current_instructions(&self) -> &Instructions {
        &self.current_scope().instructions
    }

    // ── Emission ─────────────────────────────────────────────────────────────

    fn add_constant(&mut self, value: Value) -> usize {
        self.constants.push(value);
        self.constants.len() - 1
    }

    fn emit(&mut self, op: Opcode, operands: &[usize]) -> usize {
        let instruction = make(op, operands);
        let position = self.add_instruction(&instruction);
        self.set_last_instruction(op, position);
        position
    }

    fn add_instruction(&mut self, instruction: &[u8]) -> usize {
        let scope = self.current_scope_mut();
        let position = scope.instructions.len();
        scope.instructions.extend_from_slice(instruction);
        position
    }

    fn set_last_instruction(&mut self, opcode: Opcode, position: usize) {
        let scope = self.current_scope_mut();
        scope.previous_instruction = scope.last_instruction;
        scope.last_instruction = Some(EmittedInstruction { opcode, position });
    }

    fn last_instruction_is(&self, opcode: Opcode) -> bool {
        matches!(self.current_scope().last_instruction, Some(last) if last.opcode == opcode)
    }

    fn remove_last_pop(&mut self) {
        let scope = self.current_scope_mut();
        if let Some(last) = scope.last_instruction {
            scope.instructions.truncate(last.position);
            scope.last_instruction = scope.previous_instruction;
            scope.previous_instruction = None;
        }
    }

    fn replace_instruction(&mut self, position: usize, new_instruction: &[u8]) {
        let instructions = &mut self.current_scope_mut().instructions;
        instructions[position..position + new_instruction.len()]
            .copy_from_slice(new_instruction);
    }

    fn replace_last_pop_with_return(&mut self) {
        let Some(last) = self.current_scope().last_instruction else { return };
        self.replace_instruction(last.position, &make(Opcode::ReturnValue, &[]));
        if let Some(last) = self.current_scope_mut().last_instruction.as_mut() {
            last.opcode = Opcode::ReturnValue;
        }
    }

    /// Re-encode the instruction at `position` with a new operand and
    /// overwrite it in place. Only used for same-width patches (jumps).
    fn change_operand(&mut self, position: usize, operand: usize) {
        let op = Opcode::try_from(self.current_instructions()[position])
            .expect("patch position must address an opcode");
        let new_instruction = make(op, &[operand]);
        self.replace_instruction(position, &new_instruction);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
