//! Runtime values for the Moss VM.
//!
//! The [`Value`] enum is the central representation of all data at runtime.
//! Scalar values (`Int`, `Bool`, `Null`) are stored inline; composite
//! values (`Str`, `Array`, `Hash`, functions and closures) are shared
//! through `Rc`. Nothing mutates a shared value after construction, so
//! reference counting alone keeps everything reachable from the stack,
//! the globals table and captured closure environments alive.
//!
//! # Hash keys
//!
//! Only `Int`, `Bool` and `Str` may key a hash. A [`HashKey`] is a 64-bit
//! digest tagged with the kind of the value it was derived from, so equal
//! digests of different kinds never collide.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::bytecode::Instructions;

// ─────────────────────────────────────────────────────────────────────────────
// Value
// ─────────────────────────────────────────────────────────────────────────────

/// A runtime value in the Moss VM.
#[derive(Debug, Clone)]
pub enum Value {
    /// 64-bit signed integer.
    Int(i64),
    /// Boolean.
    Bool(bool),
    /// The null value.
    Null,
    /// An immutable string.
    Str(Rc<str>),
    /// An ordered sequence of values.
    Array(Rc<Vec<Value>>),
    /// A mapping from hashable values to key/value pairs.
    Hash(Rc<HashMap<HashKey, HashPair>>),
    /// A compiled function body, as produced by the compiler's constant
    /// pool. Wrapped in a [`Closure`] before it can be called.
    CompiledFn(Rc<CompiledFn>),
    /// A compiled function together with its captured free values.
    Closure(Rc<Closure>),
    /// A host-provided builtin function.
    Builtin(&'static Builtin),
    /// An error produced by a builtin. Carried as a value, not raised.
    Error(Rc<str>),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Null, Value::Null) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Error(a), Value::Error(b)) => a == b,
            // Composites and callables compare by identity.
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Hash(a), Value::Hash(b)) => Rc::ptr_eq(a, b),
            (Value::CompiledFn(a), Value::CompiledFn(b)) => Rc::ptr_eq(a, b),
            (Value::Closure(a), Value::Closure(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => std::ptr::eq(*a, *b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Null => write!(f, "null"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Array(elements) => {
                write!(f, "[")?;
                for (i, v) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            Value::Hash(pairs) => {
                write!(f, "{{")?;
                for (i, pair) in pairs.values().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", pair.key, pair.value)?;
                }
                write!(f, "}}")
            }
            Value::CompiledFn(func) => write!(f, "<compiled fn ({} locals)>", func.num_locals),
            Value::Closure(_) => write!(f, "<closure>"),
            Value::Builtin(builtin) => write!(f, "<builtin {}>", builtin.name),
            Value::Error(message) => write!(f, "ERROR: {message}"),
        }
    }
}

impl Value {
    /// `false` and `null` are the only non-truthy values.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Null => false,
            _ => true,
        }
    }

    /// A human-readable kind name for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "Int",
            Value::Bool(_) => "Bool",
            Value::Null => "Null",
            Value::Str(_) => "String",
            Value::Array(_) => "Array",
            Value::Hash(_) => "Hash",
            Value::CompiledFn(_) => "Fn",
            Value::Closure(_) => "Closure",
            Value::Builtin(_) => "Builtin",
            Value::Error(_) => "Error",
        }
    }

    /// The hash key of this value, or `None` for unhashable kinds.
    pub fn hash_key(&self) -> Option<HashKey> {
        match self {
            Value::Int(n) => Some(HashKey { kind: HashKind::Int, digest: *n as u64 }),
            Value::Bool(b) => Some(HashKey { kind: HashKind::Bool, digest: *b as u64 }),
            Value::Str(s) => {
                let mut hasher = DefaultHasher::new();
                s.hash(&mut hasher);
                Some(HashKey { kind: HashKind::Str, digest: hasher.finish() })
            }
            _ => None,
        }
    }

    /// Shorthand for a string value.
    pub fn string(s: impl Into<Rc<str>>) -> Value {
        Value::Str(s.into())
    }

    /// Shorthand for an error value.
    pub fn error(message: impl Into<Rc<str>>) -> Value {
        Value::Error(message.into())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Hash keys and pairs
// ─────────────────────────────────────────────────────────────────────────────

/// The kind tag of a [`HashKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashKind {
    Int,
    Bool,
    Str,
}

/// A 64-bit digest tagged by the kind of value it hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HashKey {
    pub kind: HashKind,
    pub digest: u64,
}

/// One entry of a hash value. The original key is kept alongside the
/// value so hashes can be displayed and iterated.
#[derive(Debug, Clone, PartialEq)]
pub struct HashPair {
    pub key: Value,
    pub value: Value,
}

// ─────────────────────────────────────────────────────────────────────────────
// Functions, closures and builtins
// ─────────────────────────────────────────────────────────────────────────────

/// A compiled function body: its instruction stream plus the stack-frame
/// layout the VM needs to call it.
#[derive(Debug, PartialEq)]
pub struct CompiledFn {
    pub instructions: Instructions,
    /// Total local slots, parameters included.
    pub num_locals: usize,
    pub num_parameters: usize,
}

/// A [`CompiledFn`] bundled with its captured free values, in capture
/// order. This is the only callable form of compiled code.
#[derive(Debug)]
pub struct Closure {
    pub func: Rc<CompiledFn>,
    pub free: Vec<Value>,
}

/// The type signature of a builtin function.
///
/// A builtin never fails at the Rust level: argument errors come back as
/// a [`Value::Error`], and `None` means "nothing to return" (the VM
/// pushes `null` in that case).
pub type BuiltinFn = fn(args: &[Value]) -> Option<Value>;

/// One entry of the builtin table.
pub struct Builtin {
    pub name: &'static str,
    pub func: BuiltinFn,
}

impl fmt::Debug for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<builtin {}>", self.name)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
