//! Abstract Syntax Tree (AST) node types for the Moss language.
//!
//! The AST is the input boundary of this crate: a front end (or an
//! embedder building trees directly, which is what the test suites do)
//! hands a [`Program`] to the compiler.
//!
//! # Design Principles
//!
//! - **Tagged enums, not trait objects**: statements and expressions are
//!   plain enums the compiler matches on; recursion is boxed.
//! - **No lifetimes**: all strings are owned so trees can be freely moved
//!   and stored.
//! - **Open operator set**: prefix and infix operators are carried as
//!   strings. The compiler rejects operators it does not know, so a
//!   front end can extend the surface syntax without touching these
//!   types.
//!
//! Every node implements [`std::fmt::Display`], rendering a canonical,
//! fully parenthesised source form. The compiler relies on this to order
//! hash-literal keys deterministically.

use std::fmt;

// ─────────────────────────────────────────────────────────────────────────────
// Program and statements
// ─────────────────────────────────────────────────────────────────────────────

/// A complete Moss program: a flat sequence of statements.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub statements: Vec<Statement>,
}

impl Program {
    pub fn new(statements: Vec<Statement>) -> Self {
        Program { statements }
    }
}

/// A statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// `let name = value;`
    Let { name: String, value: Expression },
    /// `return value;`
    Return { value: Expression },
    /// An expression in statement position; its value is discarded.
    Expression { expression: Expression },
}

/// A brace-delimited sequence of statements, as used by `if` arms and
/// function bodies.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BlockStatement {
    pub statements: Vec<Statement>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Expressions
// ─────────────────────────────────────────────────────────────────────────────

/// An expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// A variable reference.
    Identifier(String),
    /// `5`
    IntegerLiteral(i64),
    /// `true` / `false`
    BooleanLiteral(bool),
    /// `"monkey"`
    StringLiteral(String),
    /// `!right`, `-right`
    Prefix { operator: String, right: Box<Expression> },
    /// `left + right` and friends; operators are `+ - * / > < == !=`.
    Infix {
        operator: String,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    /// `if (condition) { consequence } else { alternative }`.
    /// An `if` is an expression; a missing alternative evaluates to null.
    If {
        condition: Box<Expression>,
        consequence: BlockStatement,
        alternative: Option<BlockStatement>,
    },
    /// `fn(parameters) { body }`. `name` is filled in by the front end
    /// when the literal is the right-hand side of a `let`, which is what
    /// lets the function call itself without capturing itself.
    FunctionLiteral {
        name: Option<String>,
        parameters: Vec<String>,
        body: BlockStatement,
    },
    /// `function(arguments...)`
    Call {
        function: Box<Expression>,
        arguments: Vec<Expression>,
    },
    /// `[elements...]`
    ArrayLiteral(Vec<Expression>),
    /// `{key: value, ...}` with pairs in source order.
    HashLiteral(Vec<(Expression, Expression)>),
    /// `left[index]`
    Index {
        left: Box<Expression>,
        index: Box<Expression>,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Construction helpers
// ─────────────────────────────────────────────────────────────────────────────

// The AST is this crate's public input surface, so the boxing and
// stringly-typed fields get small constructors.

impl Statement {
    pub fn let_(name: impl Into<String>, value: Expression) -> Statement {
        Statement::Let { name: name.into(), value }
    }

    pub fn return_(value: Expression) -> Statement {
        Statement::Return { value }
    }

    pub fn expression(expression: Expression) -> Statement {
        Statement::Expression { expression }
    }
}

impl BlockStatement {
    pub fn new(statements: Vec<Statement>) -> Self {
        BlockStatement { statements }
    }
}

impl Expression {
    pub fn identifier(name: impl Into<String>) -> Expression {
        Expression::Identifier(name.into())
    }

    pub fn string(value: impl Into<String>) -> Expression {
        Expression::StringLiteral(value.into())
    }

    pub fn prefix(operator: impl Into<String>, right: Expression) -> Expression {
        Expression::Prefix { operator: operator.into(), right: Box::new(right) }
    }

    pub fn infix(operator: impl Into<String>, left: Expression, right: Expression) -> Expression {
        Expression::Infix {
            operator: operator.into(),
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn if_(
        condition: Expression,
        consequence: BlockStatement,
        alternative: Option<BlockStatement>,
    ) -> Expression {
        Expression::If { condition: Box::new(condition), consequence, alternative }
    }

    /// An anonymous function literal.
    pub fn function(parameters: Vec<&str>, body: BlockStatement) -> Expression {
        Expression::FunctionLiteral {
            name: None,
            parameters: parameters.into_iter().map(String::from).collect(),
            body,
        }
    }

    /// A function literal that knows the name it is being bound to.
    pub fn named_function(
        name: impl Into<String>,
        parameters: Vec<&str>,
        body: BlockStatement,
    ) -> Expression {
        Expression::FunctionLiteral {
            name: Some(name.into()),
            parameters: parameters.into_iter().map(String::from).collect(),
            body,
        }
    }

    pub fn call(function: Expression, arguments: Vec<Expression>) -> Expression {
        Expression::Call { function: Box::new(function), arguments }
    }

    pub fn index(left: Expression, index: Expression) -> Expression {
        Expression::Index { left: Box::new(left), index: Box::new(index) }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Display
// ─────────────────────────────────────────────────────────────────────────────

// Programs and blocks render identically: their statements, concatenated.

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for statement in &self.statements {
            write!(f, "{statement}")?;
        }
        Ok(())
    }
}

impl fmt::Display for BlockStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for statement in &self.statements {
            write!(f, "{statement}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Let { name, value } => write!(f, "let {name} = {value};"),
            Statement::Return { value } => write!(f, "return {value};"),
            Statement::Expression { expression } => write!(f, "{expression}"),
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Identifier(name) => write!(f, "{name}"),
            Expression::IntegerLiteral(value) => write!(f, "{value}"),
            Expression::BooleanLiteral(value) => write!(f, "{value}"),
            Expression::StringLiteral(value) => write!(f, "{value}"),
            Expression::Prefix { operator, right } => write!(f, "({operator}{right})"),
            Expression::Infix { operator, left, right } => {
                write!(f, "({left} {operator} {right})")
            }
            Expression::If { condition, consequence, alternative } => {
                write!(f, "if {condition} {consequence}")?;
                if let Some(alternative) = alternative {
                    write!(f, " else {alternative}")?;
                }
                Ok(())
            }
            Expression::FunctionLiteral { name, parameters, body } => {
                write!(f, "fn")?;
                if let Some(name) = name {
                    write!(f, "<{name}>")?;
                }
                write!(f, "({}) {body}", parameters.join(", "))
            }
            Expression::Call { function, arguments } => {
                let arguments: Vec<String> = arguments.iter().map(|a| a.to_string()).collect();
                write!(f, "{function}({})", arguments.join(", "))
            }
            Expression::ArrayLiteral(elements) => {
                let elements: Vec<String> = elements.iter().map(|e| e.to_string()).collect();
                write!(f, "[{}]", elements.join(", "))
            }
            Expression::HashLiteral(pairs) => {
                let pairs: Vec<String> =
                    pairs.iter().map(|(k, v)| format!("{k}:{v}")).collect();
                write!(f, "{{{}}}", pairs.join(", "))
            }
            Expression::Index { left, index } => write!(f, "({left}[{index}])"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
