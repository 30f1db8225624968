//! Builtin functions exposed to Moss programs.
//!
//! The table is fixed and ordered: the compiler resolves a builtin name to
//! its index here, and the VM's `OpGetBuiltin` pushes the entry at that
//! index, so [`BUILTINS`] is the single source of truth for both sides.
//!
//! Builtins follow an error-as-value convention: misuse (wrong arity,
//! unsupported argument kind) produces a [`Value::Error`] result instead
//! of a Rust error, and a `None` return means the builtin has nothing to
//! say (the VM pushes `null`).

use std::rc::Rc;

use crate::value::{Builtin, Value};

/// All builtins, in table order. Indexed by the u8 operand of
/// `OpGetBuiltin`.
pub static BUILTINS: &[Builtin] = &[
    Builtin { name: "len", func: builtin_len },
    Builtin { name: "puts", func: builtin_puts },
    Builtin { name: "first", func: builtin_first },
    Builtin { name: "last", func: builtin_last },
    Builtin { name: "rest", func: builtin_rest },
    Builtin { name: "push", func: builtin_push },
];

/// Look a builtin up by name.
pub fn lookup(name: &str) -> Option<&'static Builtin> {
    BUILTINS.iter().find(|b| b.name == name)
}

// ─────────────────────────────────────────────────────────────────────────────
// Implementations
// ─────────────────────────────────────────────────────────────────────────────

fn error(message: String) -> Option<Value> {
    Some(Value::error(message))
}

fn wrong_arg_count(got: usize, want: usize) -> Option<Value> {
    error(format!("wrong number of arguments. got={got}, want={want}"))
}

/// `len(x)`: byte length of a string or element count of an array.
fn builtin_len(args: &[Value]) -> Option<Value> {
    if args.len() != 1 {
        return wrong_arg_count(args.len(), 1);
    }
    match &args[0] {
        Value::Str(s) => Some(Value::Int(s.len() as i64)),
        Value::Array(elements) => Some(Value::Int(elements.len() as i64)),
        other => error(format!("argument to `len` not supported, got {}", other.type_name())),
    }
}

/// `puts(...)`: print each argument on its own line. Returns nothing.
fn builtin_puts(args: &[Value]) -> Option<Value> {
    for arg in args {
        println!("{arg}");
    }
    None
}

/// `first(array)`: the first element, or null for an empty array.
fn builtin_first(args: &[Value]) -> Option<Value> {
    if args.len() != 1 {
        return wrong_arg_count(args.len(), 1);
    }
    match &args[0] {
        Value::Array(elements) => Some(elements.first().cloned().unwrap_or(Value::Null)),
        other => error(format!("argument to `first` must be Array, got {}", other.type_name())),
    }
}

/// `last(array)`: the last element, or null for an empty array.
fn builtin_last(args: &[Value]) -> Option<Value> {
    if args.len() != 1 {
        return wrong_arg_count(args.len(), 1);
    }
    match &args[0] {
        Value::Array(elements) => Some(elements.last().cloned().unwrap_or(Value::Null)),
        other => error(format!("argument to `last` must be Array, got {}", other.type_name())),
    }
}

/// `rest(array)`: a new array of every element but the first, or null for
/// an empty array.
fn builtin_rest(args: &[Value]) -> Option<Value> {
    if args.len() != 1 {
        return wrong_arg_count(args.len(), 1);
    }
    match &args[0] {
        Value::Array(elements) => {
            if elements.is_empty() {
                Some(Value::Null)
            } else {
                Some(Value::Array(Rc::new(elements[1..].to_vec())))
            }
        }
        other => error(format!("argument to `rest` must be Array, got {}", other.type_name())),
    }
}

/// `push(array, value)`: a new array with `value` appended. The input
/// array is never mutated.
fn builtin_push(args: &[Value]) -> Option<Value> {
    if args.len() != 2 {
        return wrong_arg_count(args.len(), 2);
    }
    match &args[0] {
        Value::Array(elements) => {
            let mut extended = elements.as_ref().clone();
            extended.push(args[1].clone());
            Some(Value::Array(Rc::new(extended)))
        }
        other => error(format!("argument to `push` must be Array, got {}", other.type_name())),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
